use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use image::{DynamicImage, ImageFormat, RgbaImage};
use std::io::Cursor;
use std::sync::Arc;

/// A still frame grabbed from a window, held as PNG bytes.
///
/// Clones share the underlying buffer, so handing the same frame to the
/// session, the analyzer and observers does not copy pixel data.
#[derive(Debug, Clone)]
pub struct CapturedImage {
    png: Arc<Vec<u8>>,
    width: u32,
    height: u32,
    captured_at: DateTime<Utc>,
}

impl CapturedImage {
    /// Wraps PNG bytes returned by a capture backend, validating that they decode.
    pub fn from_png(png_bytes: Vec<u8>) -> Result<Self> {
        let decoded = image::load_from_memory_with_format(&png_bytes, ImageFormat::Png)
            .context("captured bytes are not a valid PNG")?;

        Ok(Self {
            width: decoded.width(),
            height: decoded.height(),
            png: Arc::new(png_bytes),
            captured_at: Utc::now(),
        })
    }

    pub fn from_rgba(pixels: &RgbaImage) -> Result<Self> {
        let mut png_bytes = Vec::new();
        pixels
            .write_to(&mut Cursor::new(&mut png_bytes), ImageFormat::Png)
            .context("failed to encode frame as PNG")?;

        Ok(Self {
            width: pixels.width(),
            height: pixels.height(),
            png: Arc::new(png_bytes),
            captured_at: Utc::now(),
        })
    }

    pub fn png_bytes(&self) -> &[u8] {
        &self.png
    }

    pub fn shared_bytes(&self) -> Arc<Vec<u8>> {
        Arc::clone(&self.png)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    pub fn decode(&self) -> Result<DynamicImage> {
        image::load_from_memory_with_format(&self.png, ImageFormat::Png)
            .context("failed to decode captured frame")
    }
}
