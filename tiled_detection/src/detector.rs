use crate::tiling::Tile;
use image::RgbImage;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("Inference failed: {0}")]
    Inference(String),
    #[error("Unexpected model output: {0}")]
    Tensor(String),
    #[error("Detector session poisoned: {0}")]
    Poisoned(String),
    #[error("Failed to load detector: {0}")]
    Load(String),
}

/// One candidate in the coordinate space of the tile that produced it.
/// Coordinates may fall slightly outside the tile.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalDetection {
    pub class_id: u32,
    pub class_name: String,
    pub confidence: f32,
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

/// The object-detection capability: pixels in, candidate boxes out.
///
/// Implementations may block for as long as inference takes. They should drop
/// candidates below `conf_threshold` themselves when that is cheaper than
/// returning them.
pub trait Detector: Send + Sync + 'static {
    fn detect(
        &self,
        pixels: &RgbImage,
        conf_threshold: f32,
    ) -> Result<Vec<LocalDetection>, DetectorError>;
}

/// Boundary around a [`Detector`] for per-tile calls.
///
/// Never fails: a detector error is logged and the tile contributes nothing.
/// Everything returned satisfies `confidence >= conf_threshold`.
#[derive(Debug, Clone)]
pub struct DetectorAdapter<D: Detector> {
    detector: Arc<D>,
    conf_threshold: f32,
}

impl<D: Detector> DetectorAdapter<D> {
    pub fn new(detector: Arc<D>, conf_threshold: f32) -> Self {
        Self {
            detector,
            conf_threshold,
        }
    }

    pub fn detect(&self, tile: &Tile) -> Vec<LocalDetection> {
        match self.detector.detect(&tile.pixels, self.conf_threshold) {
            Ok(detections) => detections
                .into_iter()
                .filter(|d| d.confidence >= self.conf_threshold)
                .collect(),
            Err(e) => {
                tracing::warn!(
                    tile_x = tile.rect.x,
                    tile_y = tile.rect.y,
                    "Detector failed on tile, treating it as empty: {}",
                    e
                );
                Vec::new()
            }
        }
    }
}
