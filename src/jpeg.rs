//! Grayscale JPEG compression.

use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;

/// Baseline quality used for uploaded frames.
pub const JPEG_QUALITY: u8 = 80;

/// Compress a single-channel grayscale frame to JPEG bytes.
pub fn compress_gray(pixels: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let mut jpeg = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut jpeg, JPEG_QUALITY);
    encoder
        .encode(pixels, width, height, ExtendedColorType::L8)
        .with_context(|| format!("jpeg-compress {}x{} frame", width, height))?;
    Ok(jpeg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compresses_to_valid_jpeg() -> Result<()> {
        let pixels = vec![96u8; 64 * 48];
        let jpeg = compress_gray(&pixels, 64, 48)?;
        // SOI marker and a payload smaller than the raw frame.
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        assert!(jpeg.len() < pixels.len());

        let decoded = image::load_from_memory(&jpeg)?;
        assert_eq!(decoded.width(), 64);
        assert_eq!(decoded.height(), 48);
        Ok(())
    }

    #[test]
    fn rejects_short_pixel_buffer() {
        let pixels = vec![0u8; 10];
        assert!(compress_gray(&pixels, 32, 24).is_err());
    }
}
