//! Alignment Layer
//!
//! Turns per-frame corner detections into a discrete alignment status and
//! drives capture timing for live camera sessions.

pub mod session;

pub use session::{CaptureSession, SessionHandle};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::vision::corners::Corner;

/// Alignment of the physical form in the camera view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlignmentStatus {
    /// No detection cycle has run yet
    #[default]
    Waiting,
    /// Fewer than two markers visible
    Scanning,
    /// Two or three markers visible
    Partial,
    /// All four markers visible
    Aligned,
}

impl AlignmentStatus {
    /// Status implied by a corner count
    pub fn from_corner_count(count: usize) -> Self {
        match count {
            0 | 1 => Self::Scanning,
            2 | 3 => Self::Partial,
            _ => Self::Aligned,
        }
    }
}

/// Alignment state over time
#[derive(Debug, Clone, Default)]
pub struct AlignmentStateMachine {
    status: AlignmentStatus,
    corners: Vec<Corner>,
}

impl AlignmentStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> AlignmentStatus {
        self.status
    }

    /// Corners from the most recent detection
    pub fn corners(&self) -> &[Corner] {
        &self.corners
    }

    /// Enter scanning when a session starts
    pub fn start(&mut self) {
        self.corners.clear();
        self.status = AlignmentStatus::Scanning;
    }

    /// Apply one detection result and return the new status
    pub fn observe(&mut self, corners: Vec<Corner>) -> AlignmentStatus {
        let next = AlignmentStatus::from_corner_count(corners.len());
        if next != self.status {
            debug!("Alignment {:?} -> {:?} ({} corners)", self.status, next, corners.len());
        }
        self.status = next;
        self.corners = corners;
        next
    }

    /// Back to waiting after a capture or a stop
    pub fn reset(&mut self) {
        self.corners.clear();
        self.status = AlignmentStatus::Waiting;
    }
}
