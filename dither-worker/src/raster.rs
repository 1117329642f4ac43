use image::RgbaImage;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Owned RGBA8 frame: row-major, 4 interleaved channels per pixel, stride `width * 4`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RasterImage {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl RasterImage {
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            data,
        }
    }

    /// Image filled with a single RGBA color.
    #[cfg(test)]
    pub fn filled(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let count = width as usize * height as usize;
        let mut data = Vec::with_capacity(count * 4);
        for _ in 0..count {
            data.extend_from_slice(&rgba);
        }
        Self::new(width, height, data)
    }

    pub fn expected_len(&self) -> usize {
        (self.width as usize)
            .saturating_mul(self.height as usize)
            .saturating_mul(4)
    }

    /// Check the buffer length against the declared dimensions.
    pub fn validate(&self) -> Result<(), EngineError> {
        let expected = self.expected_len();
        if self.data.len() != expected {
            return Err(EngineError::InvalidDimensions {
                width: self.width,
                height: self.height,
                expected,
                actual: self.data.len(),
            });
        }
        Ok(())
    }

    #[cfg(test)]
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let i = (y as usize * self.width as usize + x as usize) * 4;
        [
            self.data[i],
            self.data[i + 1],
            self.data[i + 2],
            self.data[i + 3],
        ]
    }
}

impl From<RgbaImage> for RasterImage {
    fn from(img: RgbaImage) -> Self {
        let (w, h) = img.dimensions();
        Self::new(w, h, img.into_raw())
    }
}

impl TryFrom<RasterImage> for RgbaImage {
    type Error = EngineError;

    fn try_from(raster: RasterImage) -> Result<Self, Self::Error> {
        raster.validate()?;
        let (w, h) = (raster.width, raster.height);
        RgbaImage::from_raw(w, h, raster.data).ok_or(EngineError::InvalidDimensions {
            width: w,
            height: h,
            expected: w as usize * h as usize * 4,
            actual: 0,
        })
    }
}
