//! Frame geometry: crop, rotate, resize.
//!
//! Raw frames arrive as single-channel grayscale at the sensor's capture
//! dimensions. Before compression they are cut down to the configured
//! region of interest, rotated to the mount orientation, and scaled to the
//! output dimensions. When all three are no-ops the input buffer is
//! returned as-is without copying.

use std::borrow::Cow;

use anyhow::{anyhow, Result};
use image::imageops::{self, FilterType};
use image::GrayImage;

/// Rectangular region of interest within the capture frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Deserialize)]
pub struct CropRect {
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
}

/// Mount rotation applied after cropping.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Deserialize)]
#[serde(try_from = "u32")]
pub enum Rotation {
    #[default]
    None,
    Cw90,
    Cw180,
    Cw270,
}

impl TryFrom<u32> for Rotation {
    type Error = String;

    fn try_from(degrees: u32) -> Result<Self, Self::Error> {
        match degrees {
            0 => Ok(Rotation::None),
            90 => Ok(Rotation::Cw90),
            180 => Ok(Rotation::Cw180),
            270 => Ok(Rotation::Cw270),
            other => Err(format!("rotation must be 0/90/180/270, got {}", other)),
        }
    }
}

/// Fit a raw grayscale frame to the output dimensions.
///
/// Returns `Cow::Borrowed` when crop, rotation, and resize are all no-ops;
/// otherwise a newly allocated buffer of `out_width * out_height` bytes.
pub fn fit_frame<'a>(
    raw: &'a [u8],
    capture_width: u32,
    capture_height: u32,
    crop: Option<CropRect>,
    rotation: Rotation,
    out_width: u32,
    out_height: u32,
) -> Result<Cow<'a, [u8]>> {
    let expected = (capture_width as usize) * (capture_height as usize);
    if raw.len() != expected {
        return Err(anyhow!(
            "raw frame length mismatch: expected {} bytes for {}x{}, got {}",
            expected,
            capture_width,
            capture_height,
            raw.len()
        ));
    }

    let crop_is_noop = match crop {
        None => true,
        Some(rect) => {
            rect.left == 0
                && rect.top == 0
                && rect.width == capture_width
                && rect.height == capture_height
        }
    };
    if crop_is_noop
        && rotation == Rotation::None
        && capture_width == out_width
        && capture_height == out_height
    {
        return Ok(Cow::Borrowed(raw));
    }

    let mut img = GrayImage::from_raw(capture_width, capture_height, raw.to_vec())
        .ok_or_else(|| anyhow!("raw frame does not fill {}x{}", capture_width, capture_height))?;

    if let Some(rect) = crop {
        if rect.width == 0 || rect.height == 0 {
            return Err(anyhow!("crop rectangle is empty"));
        }
        if rect.left + rect.width > capture_width || rect.top + rect.height > capture_height {
            return Err(anyhow!(
                "crop {}x{}+{}+{} exceeds capture frame {}x{}",
                rect.width,
                rect.height,
                rect.left,
                rect.top,
                capture_width,
                capture_height
            ));
        }
        img = imageops::crop_imm(&img, rect.left, rect.top, rect.width, rect.height).to_image();
    }

    img = match rotation {
        Rotation::None => img,
        Rotation::Cw90 => imageops::rotate90(&img),
        Rotation::Cw180 => imageops::rotate180(&img),
        Rotation::Cw270 => imageops::rotate270(&img),
    };

    if img.dimensions() != (out_width, out_height) {
        img = imageops::resize(&img, out_width, out_height, FilterType::Triangle);
    }

    Ok(Cow::Owned(img.into_raw()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_transform_borrows_input() -> Result<()> {
        let raw = vec![7u8; 16];
        let out = fit_frame(&raw, 4, 4, None, Rotation::None, 4, 4)?;
        assert!(matches!(out, Cow::Borrowed(_)));
        assert_eq!(&*out, &raw[..]);
        Ok(())
    }

    #[test]
    fn crop_selects_region() -> Result<()> {
        #[rustfmt::skip]
        let raw = vec![
            0, 1, 2, 3,
            4, 5, 6, 7,
            8, 9, 10, 11,
            12, 13, 14, 15,
        ];
        let crop = CropRect {
            left: 1,
            top: 1,
            width: 2,
            height: 2,
        };
        let out = fit_frame(&raw, 4, 4, Some(crop), Rotation::None, 2, 2)?;
        assert_eq!(&*out, &[5, 6, 9, 10]);
        Ok(())
    }

    #[test]
    fn rotate_90_transposes() -> Result<()> {
        let raw = vec![1, 2, 3, 4, 5, 6]; // 3x2
        let out = fit_frame(&raw, 3, 2, None, Rotation::Cw90, 2, 3)?;
        assert_eq!(&*out, &[4, 1, 5, 2, 6, 3]);
        Ok(())
    }

    #[test]
    fn resize_changes_dimensions() -> Result<()> {
        let raw = vec![128u8; 8 * 8];
        let out = fit_frame(&raw, 8, 8, None, Rotation::None, 4, 4)?;
        assert_eq!(out.len(), 16);
        Ok(())
    }

    #[test]
    fn length_mismatch_is_an_error() {
        let raw = vec![0u8; 10];
        assert!(fit_frame(&raw, 4, 4, None, Rotation::None, 4, 4).is_err());
    }

    #[test]
    fn out_of_bounds_crop_is_an_error() {
        let raw = vec![0u8; 16];
        let crop = CropRect {
            left: 2,
            top: 2,
            width: 4,
            height: 4,
        };
        assert!(fit_frame(&raw, 4, 4, Some(crop), Rotation::None, 4, 4).is_err());
    }
}
