//! Alignment marker detection
//!
//! Scans a frame on a coarse grid for blue-ink pixels and greedily keeps
//! the first hits that are far enough from each other. This is not a blob
//! detector: the result depends on scan order, which is row-major from the
//! top-left corner.

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Pixel coordinate of a detected alignment marker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Corner {
    pub x: u32,
    pub y: u32,
}

impl Corner {
    pub fn distance_to(&self, x: u32, y: u32) -> f64 {
        let dx = self.x as f64 - x as f64;
        let dy = self.y as f64 - y as f64;
        (dx * dx + dy * dy).sqrt()
    }
}

/// Configuration for marker detection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CornerDetectorConfig {
    /// Grid step in both axes
    pub stride: u32,
    /// Red channel must be below this
    pub max_red: u8,
    /// Green channel must be below this
    pub max_green: u8,
    /// Blue channel must be above this
    pub min_blue: u8,
    /// Blue must exceed red and green by this factor
    pub blue_dominance: f32,
    /// Hits closer than this to an accepted corner are duplicates
    pub min_separation: f64,
    /// Stop scanning once this many corners are accepted
    pub max_corners: usize,
}

impl Default for CornerDetectorConfig {
    fn default() -> Self {
        Self {
            stride: 10,
            max_red: 50,
            max_green: 100,
            min_blue: 150,
            blue_dominance: 1.0,
            min_separation: 50.0,
            max_corners: 4,
        }
    }
}

/// Detects blue alignment markers in RGBA frames
#[derive(Debug, Clone, Default)]
pub struct CornerDetector {
    config: CornerDetectorConfig,
}

impl CornerDetector {
    pub fn new() -> Self {
        Self::with_config(CornerDetectorConfig::default())
    }

    pub fn with_config(mut config: CornerDetectorConfig) -> Self {
        config.stride = config.stride.max(1);
        config.max_corners = config.max_corners.clamp(1, 4);
        Self { config }
    }

    pub fn config(&self) -> &CornerDetectorConfig {
        &self.config
    }

    /// Whether an RGB triple looks like marker ink
    #[inline]
    pub fn is_marker_color(&self, r: u8, g: u8, b: u8) -> bool {
        let c = &self.config;
        let dominance = c.blue_dominance.max(0.0);
        r < c.max_red
            && g < c.max_green
            && b > c.min_blue
            && b as f32 > r as f32 * dominance
            && b as f32 > g as f32 * dominance
    }

    /// Scan `pixels` (RGBA, row-major) for up to four markers
    ///
    /// Only grid points inside the frame are sampled, so a buffer shorter
    /// than `width * height * 4` ends the scan early instead of panicking.
    pub fn detect(&self, pixels: &[u8], width: u32, height: u32) -> Vec<Corner> {
        let stride = self.config.stride.max(1) as usize;
        let mut corners: Vec<Corner> = Vec::with_capacity(self.config.max_corners);

        for y in (0..height).step_by(stride) {
            for x in (0..width).step_by(stride) {
                let idx = (y as usize * width as usize + x as usize) * 4;
                let Some(px) = pixels.get(idx..idx + 3) else {
                    return corners;
                };
                if !self.is_marker_color(px[0], px[1], px[2]) {
                    continue;
                }

                let too_close = corners
                    .iter()
                    .any(|c| c.distance_to(x, y) < self.config.min_separation);
                if too_close {
                    continue;
                }

                corners.push(Corner { x, y });
                if corners.len() >= self.config.max_corners {
                    debug!("Corner scan complete early at ({}, {})", x, y);
                    return corners;
                }
            }
        }

        corners
    }
}
