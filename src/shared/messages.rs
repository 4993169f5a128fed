//! Message types emitted by a capture session

use crate::alignment::AlignmentStatus;
use crate::vision::corners::Corner;

/// Progress of a live capture session
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The session started scanning
    Started,
    /// A detection tick moved the alignment status
    StatusChanged {
        status: AlignmentStatus,
        corners: Vec<Corner>,
    },
    /// Auto-capture is armed and fires after the settle delay
    CaptureScheduled { delay_ms: u64 },
    /// Alignment was lost before the settle delay elapsed
    CaptureCancelled,
    /// A frame was captured and the stream released
    Captured { frame_id: uuid::Uuid },
    /// The session was stopped without a capture
    Stopped,
}
