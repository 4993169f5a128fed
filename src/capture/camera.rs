//! Still image playback camera
//!
//! Presents a list of image files as a video feed, one file per frame
//! request, holding the last image once the list is exhausted.

use async_trait::async_trait;
use std::path::PathBuf;
use tracing::{debug, warn};

use super::frame::CapturedFrame;
use super::{Camera, VideoStream};
use crate::config::CameraSettings;
use crate::error::AcquisitionError;

/// Camera backed by image files
#[derive(Debug, Clone)]
pub struct StillImageCamera {
    paths: Vec<PathBuf>,
}

impl StillImageCamera {
    pub fn new(paths: Vec<PathBuf>) -> Self {
        Self { paths }
    }
}

#[async_trait]
impl Camera for StillImageCamera {
    async fn open(&self, _settings: &CameraSettings) -> Result<Box<dyn VideoStream>, AcquisitionError> {
        if self.paths.is_empty() {
            return Err(AcquisitionError::NoDevice);
        }

        let paths = self.paths.clone();
        let frames = tokio::task::spawn_blocking(move || {
            paths
                .iter()
                .map(|path| {
                    CapturedFrame::open(path)
                        .map_err(|e| AcquisitionError::Stream(format!("{}: {}", path.display(), e)))
                })
                .collect::<Result<Vec<_>, _>>()
        })
        .await
        .map_err(|e| AcquisitionError::Stream(e.to_string()))??;

        debug!("Still image camera opened with {} frames", frames.len());
        Ok(Box::new(StillImageStream::new(frames)))
    }
}

/// Stream over pre-decoded frames
#[derive(Debug)]
pub struct StillImageStream {
    frames: Vec<CapturedFrame>,
    next: usize,
    released: bool,
}

impl StillImageStream {
    pub fn new(frames: Vec<CapturedFrame>) -> Self {
        Self {
            frames,
            next: 0,
            released: false,
        }
    }
}

impl VideoStream for StillImageStream {
    fn current_frame(&mut self) -> Option<CapturedFrame> {
        if self.released || self.frames.is_empty() {
            return None;
        }
        let idx = self.next.min(self.frames.len() - 1);
        self.next = self.next.saturating_add(1);
        self.frames.get(idx).cloned()
    }

    fn release(&mut self) {
        if self.released {
            warn!("Still image stream released twice");
            return;
        }
        self.released = true;
        self.frames.clear();
    }

    fn is_released(&self) -> bool {
        self.released
    }
}
