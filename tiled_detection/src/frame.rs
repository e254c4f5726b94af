use image::RgbImage;

/// One decoded image submitted for detection.
///
/// `id` is the caller's correlation token and is echoed back untouched; it is
/// not required to be unique.
#[derive(Debug, Clone)]
pub struct Frame {
    pub id: i64,
    pub image: RgbImage,
}

impl Frame {
    pub fn new(id: i64, image: RgbImage) -> Self {
        Self { id, image }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}
