//! Uploaded image decoding.

use image::RgbImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("empty image payload")]
    Empty,
    #[error("invalid image: {0}")]
    Undecodable(String),
}

/// A decoded RGB8 image as submitted by a client.
#[derive(Clone)]
pub struct Frame {
    pub rgb: RgbImage,
}

impl Frame {
    /// Decode an encoded image (JPEG, PNG, ...) into RGB8.
    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.is_empty() {
            return Err(FrameError::Empty);
        }
        let decoded = image::load_from_memory(bytes)
            .map_err(|e| FrameError::Undecodable(e.to_string()))?;
        Ok(Self { rgb: decoded.to_rgb8() })
    }

    pub fn width(&self) -> u32 {
        self.rgb.width()
    }

    pub fn height(&self) -> u32 {
        self.rgb.height()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb};
    use std::io::Cursor;

    fn png(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb(color));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    #[test]
    fn test_decode_png() {
        let frame = Frame::decode(&png(4, 3, [10, 20, 30])).unwrap();
        assert_eq!((frame.width(), frame.height()), (4, 3));
        assert_eq!(frame.rgb.get_pixel(2, 1).0, [10, 20, 30]);
    }

    #[test]
    fn test_decode_empty() {
        assert!(matches!(Frame::decode(&[]), Err(FrameError::Empty)));
    }

    #[test]
    fn test_decode_garbage() {
        let result = Frame::decode(b"definitely not an image");
        assert!(matches!(result, Err(FrameError::Undecodable(_))));
    }
}
