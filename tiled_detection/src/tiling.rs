use image::{imageops, RgbImage};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("tile_size must be positive")]
    EmptyTile,
    #[error("overlap ({overlap}) must be smaller than tile_size ({tile_size})")]
    NonPositiveStride { tile_size: u32, overlap: u32 },
}

/// Validated tile geometry: `stride = tile_size - overlap > 0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TilingConfig {
    tile_size: u32,
    overlap: u32,
}

impl TilingConfig {
    pub fn new(tile_size: u32, overlap: u32) -> Result<Self, ConfigurationError> {
        if tile_size == 0 {
            return Err(ConfigurationError::EmptyTile);
        }
        if overlap >= tile_size {
            return Err(ConfigurationError::NonPositiveStride { tile_size, overlap });
        }
        Ok(Self { tile_size, overlap })
    }

    pub fn tile_size(&self) -> u32 {
        self.tile_size
    }

    pub fn overlap(&self) -> u32 {
        self.overlap
    }

    pub fn stride(&self) -> u32 {
        self.tile_size - self.overlap
    }
}

/// A tile's extent in frame-global pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl TileRect {
    pub fn crop(&self, image: &RgbImage) -> RgbImage {
        imageops::crop_imm(image, self.x, self.y, self.width, self.height).to_image()
    }
}

/// A tile together with a copy of the pixels it covers.
#[derive(Debug, Clone)]
pub struct Tile {
    pub rect: TileRect,
    pub pixels: RgbImage,
}

/// Lays a regular grid of overlapping tiles over a `width x height` frame.
///
/// Origins step by `stride` along both axes while they stay inside the frame.
/// Each extent is clamped to the frame edge, and a clamped tile thinner than
/// `overlap` along either axis is skipped. Rows are yielded top to bottom,
/// tiles within a row left to right, but consumers must not rely on it.
pub fn partition(
    width: u32,
    height: u32,
    config: TilingConfig,
) -> impl Iterator<Item = TileRect> {
    let stride = config.stride() as usize;
    let tile_size = config.tile_size;
    let overlap = config.overlap;

    (0..height).step_by(stride).flat_map(move |y| {
        (0..width).step_by(stride).filter_map(move |x| {
            let tile_width = x.saturating_add(tile_size).min(width) - x;
            let tile_height = y.saturating_add(tile_size).min(height) - y;
            if tile_width < overlap || tile_height < overlap {
                return None;
            }
            Some(TileRect {
                x,
                y,
                width: tile_width,
                height: tile_height,
            })
        })
    })
}

/// Partitions `image` and crops each tile lazily.
pub fn tiles(image: &RgbImage, config: TilingConfig) -> impl Iterator<Item = Tile> + '_ {
    partition(image.width(), image.height(), config).map(move |rect| Tile {
        rect,
        pixels: rect.crop(image),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn origins(width: u32, height: u32, config: TilingConfig) -> Vec<(u32, u32)> {
        partition(width, height, config)
            .map(|rect| (rect.x, rect.y))
            .collect()
    }

    #[test]
    fn test_invalid_stride_is_rejected() {
        assert_eq!(
            TilingConfig::new(256, 256),
            Err(ConfigurationError::NonPositiveStride {
                tile_size: 256,
                overlap: 256
            })
        );
        assert!(TilingConfig::new(256, 300).is_err());
        assert_eq!(TilingConfig::new(0, 0), Err(ConfigurationError::EmptyTile));
    }

    #[test]
    fn test_default_geometry_stride() {
        let config = TilingConfig::new(640, 256).unwrap();
        assert_eq!(config.stride(), 384);
    }

    #[test]
    fn test_two_by_two_grid_when_far_sliver_is_dropped() {
        let config = TilingConfig::new(640, 256).unwrap();
        let rects: Vec<_> = partition(1000, 1000, config).collect();

        assert_eq!(
            rects.iter().map(|r| (r.x, r.y)).collect::<Vec<_>>(),
            vec![(0, 0), (384, 0), (0, 384), (384, 384)]
        );
        assert_eq!(rects[0].width, 640);
        assert_eq!(rects[1].width, 616);
        assert_eq!(rects[3].height, 616);
    }

    #[test]
    fn test_1280_square_frame() {
        let config = TilingConfig::new(640, 256).unwrap();
        let got = origins(1280, 1280, config);

        // 1152 leaves a 128 px sliver and is dropped, 768 leaves 512 px and is kept.
        let expected: Vec<(u32, u32)> = [0, 384, 768]
            .iter()
            .flat_map(|&y| [0, 384, 768].into_iter().map(move |x| (x, y)))
            .collect();
        assert_eq!(got, expected);
        for origin in [(0, 0), (384, 0), (0, 384), (384, 384)] {
            assert!(got.contains(&origin));
        }
    }

    #[test]
    fn test_frame_smaller_than_overlap_yields_nothing() {
        let config = TilingConfig::new(640, 256).unwrap();
        assert_eq!(partition(200, 1000, config).count(), 0);
        assert_eq!(partition(0, 0, config).count(), 0);
    }

    #[test]
    fn test_frame_smaller_than_tile_is_one_tile() {
        let config = TilingConfig::new(640, 256).unwrap();
        let rects: Vec<_> = partition(300, 300, config).collect();
        assert_eq!(
            rects,
            vec![TileRect {
                x: 0,
                y: 0,
                width: 300,
                height: 300
            }]
        );
    }

    #[test]
    fn test_tile_bounds_and_coverage() {
        let cases = [
            (1920, 1080, 640, 256),
            (1280, 720, 320, 64),
            (777, 555, 200, 50),
            (2000, 1500, 640, 128),
        ];

        for (width, height, tile_size, overlap) in cases {
            let config = TilingConfig::new(tile_size, overlap).unwrap();
            let rects: Vec<_> = partition(width, height, config).collect();

            let mut covered = vec![false; (width * height) as usize];
            for rect in &rects {
                assert!(rect.width <= tile_size && rect.width >= overlap);
                assert!(rect.height <= tile_size && rect.height >= overlap);
                assert!(rect.x + rect.width <= width);
                assert!(rect.y + rect.height <= height);
                for y in rect.y..rect.y + rect.height {
                    for x in rect.x..rect.x + rect.width {
                        covered[(y * width + x) as usize] = true;
                    }
                }
            }

            // Anything left uncovered sits in a far-edge strip narrower than the overlap.
            for y in 0..height {
                for x in 0..width {
                    if !covered[(y * width + x) as usize] {
                        assert!(
                            x >= width - overlap || y >= height - overlap,
                            "pixel ({}, {}) uncovered in {}x{}",
                            x,
                            y,
                            width,
                            height
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn test_tiles_crop_pixels_at_origin() {
        let mut image = RgbImage::new(500, 500);
        image.put_pixel(300, 310, Rgb([1, 2, 3]));
        let config = TilingConfig::new(400, 100).unwrap();

        let tile = tiles(&image, config)
            .find(|tile| tile.rect.x == 300 && tile.rect.y == 300)
            .expect("tile at (300, 300)");

        assert_eq!(tile.pixels.dimensions(), (200, 200));
        assert_eq!(tile.pixels.get_pixel(0, 10), &Rgb([1, 2, 3]));
    }
}
