//! Capture Layer
//!
//! Camera acquisition and frame buffers. Cameras are an external
//! collaborator behind [`Camera`]; acquisition is bounded by a timeout so a
//! device that never answers surfaces as an error instead of a hang.

pub mod camera;
pub mod frame;

pub use camera::StillImageCamera;
pub use frame::CapturedFrame;

use async_trait::async_trait;
use std::time::Duration;
use tracing::info;

use crate::config::CameraSettings;
use crate::error::AcquisitionError;

/// A live source of frames
pub trait VideoStream: Send {
    /// Latest frame, or `None` if nothing has arrived yet or the stream is released
    fn current_frame(&mut self) -> Option<CapturedFrame>;

    /// Stop the device and drop its buffers
    fn release(&mut self);

    fn is_released(&self) -> bool;
}

/// A device that can open video streams
#[async_trait]
pub trait Camera: Send + Sync {
    async fn open(&self, settings: &CameraSettings) -> Result<Box<dyn VideoStream>, AcquisitionError>;
}

/// Open a stream on `camera`, failing once `timeout_ms` has passed
pub async fn acquire(
    camera: &dyn Camera,
    settings: &CameraSettings,
    timeout_ms: u64,
) -> Result<Box<dyn VideoStream>, AcquisitionError> {
    let stream = tokio::time::timeout(Duration::from_millis(timeout_ms), camera.open(settings))
        .await
        .map_err(|_| AcquisitionError::Timeout(timeout_ms))??;
    info!(
        "Camera stream acquired ({}x{} requested, {:?})",
        settings.ideal_width, settings.ideal_height, settings.facing
    );
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SilentCamera;

    #[async_trait]
    impl Camera for SilentCamera {
        async fn open(&self, _settings: &CameraSettings) -> Result<Box<dyn VideoStream>, AcquisitionError> {
            std::future::pending().await
        }
    }

    struct DeniedCamera;

    #[async_trait]
    impl Camera for DeniedCamera {
        async fn open(&self, _settings: &CameraSettings) -> Result<Box<dyn VideoStream>, AcquisitionError> {
            Err(AcquisitionError::PermissionDenied)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_times_out() {
        let result = acquire(&SilentCamera, &CameraSettings::default(), 250).await;
        assert!(matches!(result, Err(AcquisitionError::Timeout(250))));
    }

    #[tokio::test]
    async fn test_acquire_surfaces_denial() {
        let result = acquire(&DeniedCamera, &CameraSettings::default(), 1000).await;
        assert!(matches!(result, Err(AcquisitionError::PermissionDenied)));
    }
}
