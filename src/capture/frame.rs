//! Frame data structures for captured form images

use image::{DynamicImage, RgbaImage};
use std::path::Path;
use std::time::Instant;
use uuid::Uuid;

/// A captured frame from a camera or an uploaded file
///
/// Frames are immutable once created. Each frame carries a unique id so the
/// recognizer can refuse overlapping work on the same capture.
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    /// Unique capture identifier
    id: Uuid,
    /// Raw RGBA pixel data, row-major
    pub data: Vec<u8>,
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Timestamp when frame was captured
    pub timestamp: Instant,
}

impl CapturedFrame {
    /// Create a new captured frame from RGBA bytes
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Self {
        debug_assert_eq!(data.len(), (width as usize) * (height as usize) * 4);
        Self {
            id: Uuid::new_v4(),
            data,
            width,
            height,
            timestamp: Instant::now(),
        }
    }

    /// Build a frame from any decoded image
    pub fn from_image(image: DynamicImage) -> Self {
        let rgba = image.to_rgba8();
        let (width, height) = rgba.dimensions();
        Self::new(rgba.into_raw(), width, height)
    }

    /// Decode an image file into a frame
    pub fn open(path: &Path) -> image::ImageResult<Self> {
        Ok(Self::from_image(image::open(path)?))
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Whether both frames hold the same picture
    ///
    /// True for clones of one capture and for separately decoded frames with
    /// identical dimensions and pixels.
    pub fn same_image(&self, other: &CapturedFrame) -> bool {
        self.id == other.id
            || (self.width == other.width && self.height == other.height && self.data == other.data)
    }

    /// Get frame dimensions as (width, height)
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// RGBA value at `(x, y)`, or `None` outside the frame
    #[inline]
    pub fn pixel(&self, x: i64, y: i64) -> Option<[u8; 4]> {
        if x < 0 || y < 0 || x >= self.width as i64 || y >= self.height as i64 {
            return None;
        }
        let idx = (y as usize * self.width as usize + x as usize) * 4;
        self.data
            .get(idx..idx + 4)
            .map(|px| [px[0], px[1], px[2], px[3]])
    }

    /// Copy a rectangle out of the frame, clamped to the frame bounds
    pub fn crop(&self, x: u32, y: u32, width: u32, height: u32) -> RgbaImage {
        let x = x.min(self.width);
        let y = y.min(self.height);
        let width = width.min(self.width - x);
        let height = height.min(self.height - y);

        let mut region = Vec::with_capacity((width * height * 4) as usize);
        for row in y..(y + height) {
            let start = ((row * self.width + x) * 4) as usize;
            let end = start + (width * 4) as usize;
            if end <= self.data.len() {
                region.extend_from_slice(&self.data[start..end]);
            }
        }

        RgbaImage::from_raw(width, height, region).unwrap_or_else(|| RgbaImage::new(0, 0))
    }
}
