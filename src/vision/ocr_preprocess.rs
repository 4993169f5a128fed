//! Image preprocessing for OCR fields
//!
//! Every text field goes through the same fixed chain before it reaches the
//! engine: crop, average-channel greyscale, then a linear contrast stretch of
//! 1.5 around mid-grey.

use image::{GrayImage, RgbaImage};
use tracing::debug;

use crate::capture::frame::CapturedFrame;
use crate::template::OcrArea;

/// Contrast factor applied around the midpoint
pub const CONTRAST_FACTOR: f32 = 1.5;

/// Midpoint of the contrast stretch
pub const CONTRAST_MIDPOINT: f32 = 128.0;

/// Crop an OCR area from the frame and prepare it for recognition
pub fn prepare_ocr_area(frame: &CapturedFrame, area: &OcrArea) -> GrayImage {
    let region = frame.crop(area.x, area.y, area.w, area.h);
    debug!(
        "Prepared OCR area '{}' ({}x{} at {},{})",
        area.label,
        region.width(),
        region.height(),
        area.x,
        area.y
    );
    preprocess_for_ocr(&region)
}

/// Greyscale and contrast-stretch an RGBA region
pub fn preprocess_for_ocr(region: &RgbaImage) -> GrayImage {
    let (width, height) = region.dimensions();
    let mut out = GrayImage::new(width, height);

    for (src, dst) in region.pixels().zip(out.pixels_mut()) {
        let [r, g, b, _] = src.0;
        let gray = apply_grayscale(r, g, b);
        dst.0[0] = apply_contrast(gray, CONTRAST_FACTOR);
    }

    out
}

/// Unweighted mean of the colour channels, rounded to the nearest level
#[inline]
fn apply_grayscale(r: u8, g: u8, b: u8) -> u8 {
    ((r as f32 + g as f32 + b as f32) / 3.0).round() as u8
}

/// Linear contrast around the midpoint, clamped to the 8-bit range
#[inline]
fn apply_contrast(value: u8, factor: f32) -> u8 {
    ((value as f32 - CONTRAST_MIDPOINT) * factor + CONTRAST_MIDPOINT)
        .clamp(0.0, 255.0)
        .round() as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn test_contrast_stretch() {
        // 100: (100-128)*1.5+128 = 86
        // 128: unchanged
        // 200: (200-128)*1.5+128 = 236
        // 250: 311 -> clamped to 255
        assert_eq!(apply_contrast(100, 1.5), 86);
        assert_eq!(apply_contrast(128, 1.5), 128);
        assert_eq!(apply_contrast(200, 1.5), 236);
        assert_eq!(apply_contrast(250, 1.5), 255);
        assert_eq!(apply_contrast(10, 1.5), 0);
    }

    #[test]
    fn test_grayscale_is_channel_average() {
        // red pixel averages to 85, not the luminance-weighted 76
        assert_eq!(apply_grayscale(255, 0, 0), 85);
        assert_eq!(apply_grayscale(10, 20, 30), 20);
    }

    #[test]
    fn test_preprocess_region() {
        let mut region = RgbaImage::new(2, 1);
        region.put_pixel(0, 0, Rgba([255, 0, 0, 255]));
        region.put_pixel(1, 0, Rgba([200, 200, 200, 255]));

        let out = preprocess_for_ocr(&region);
        assert_eq!(out.dimensions(), (2, 1));
        // 85 -> (85-128)*1.5+128 = 63.5 -> 64
        assert_eq!(out.get_pixel(0, 0).0[0], 64);
        assert_eq!(out.get_pixel(1, 0).0[0], 236);
    }

    #[test]
    fn test_prepare_area_clamps_to_frame() {
        let frame = CapturedFrame::new(vec![255u8; 10 * 10 * 4], 10, 10);
        let area = OcrArea {
            x: 5,
            y: 5,
            w: 20,
            h: 3,
            label: "Sınıf".to_string(),
        };
        let out = prepare_ocr_area(&frame, &area);
        assert_eq!(out.dimensions(), (5, 3));
        assert!(out.pixels().all(|p| p.0[0] == 255));
    }
}
