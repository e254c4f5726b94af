use crate::frame::Frame;
use base64::{engine::general_purpose::STANDARD, Engine};
use detection_proto::FrameRequest;
use image::RgbImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Frame data is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("Frame data is empty")]
    Empty,
    #[error("Error decoding image: {0}")]
    Image(#[from] image::ImageError),
}

pub fn encode_image_bytes(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// base64 text -> encoded image bytes -> RGB pixel buffer.
pub fn decode_image(data: &str) -> Result<RgbImage, DecodeError> {
    let image_data = STANDARD.decode(data.trim())?;
    if image_data.is_empty() {
        return Err(DecodeError::Empty);
    }

    let image_reader = image::ImageReader::new(std::io::Cursor::new(image_data))
        .with_guessed_format()
        .map_err(image::ImageError::IoError)?;

    Ok(image_reader.decode()?.to_rgb8())
}

pub fn decode_frame(request: &FrameRequest) -> Result<Frame, DecodeError> {
    let image = decode_image(&request.data)?;
    Ok(Frame::new(request.frame_id, image))
}

#[cfg(test)]
pub(crate) fn png_base64(image: &RgbImage) -> String {
    let mut image_data: Vec<u8> = Vec::new();
    image
        .write_to(
            &mut std::io::Cursor::new(&mut image_data),
            image::ImageFormat::Png,
        )
        .unwrap();
    encode_image_bytes(&image_data)
}
