//! Live capture session
//!
//! One task owns the stream, the detection ticker and the settle timer, so a
//! detection tick always finishes before the next one starts. Stopping the
//! session cancels the ticker, disarms any pending capture and releases the
//! stream.

use crossbeam_channel::Sender;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{AlignmentStateMachine, AlignmentStatus};
use crate::capture::{CapturedFrame, VideoStream};
use crate::config::AlignmentSettings;
use crate::error::OmrError;
use crate::shared::SessionEvent;
use crate::vision::corners::CornerDetector;

/// Cross-task control of a running session
#[derive(Debug, Clone)]
pub struct SessionHandle {
    active: Arc<AtomicBool>,
    cancel: CancellationToken,
    capture: Arc<Notify>,
}

impl SessionHandle {
    /// Stop the session; a capture that has not fired yet never will
    pub fn stop(&self) {
        self.active.store(false, Ordering::SeqCst);
        self.cancel.cancel();
    }

    /// Ask for an immediate capture regardless of alignment
    pub fn request_capture(&self) {
        self.capture.notify_one();
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

/// Periodic alignment detection with optional auto-capture
pub struct CaptureSession {
    detector: CornerDetector,
    settings: AlignmentSettings,
    machine: AlignmentStateMachine,
    handle: SessionHandle,
    events: Option<Sender<SessionEvent>>,
}

impl CaptureSession {
    pub fn new(detector: CornerDetector, settings: AlignmentSettings) -> Self {
        Self {
            detector,
            settings,
            machine: AlignmentStateMachine::new(),
            handle: SessionHandle {
                active: Arc::new(AtomicBool::new(false)),
                cancel: CancellationToken::new(),
                capture: Arc::new(Notify::new()),
            },
            events: None,
        }
    }

    /// Report progress on `events`
    pub fn with_events(mut self, events: Sender<SessionEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    pub fn status(&self) -> AlignmentStatus {
        self.machine.status()
    }

    fn emit(&self, event: SessionEvent) {
        if let Some(events) = &self.events {
            if let Err(e) = events.send(event) {
                debug!("Session event dropped, receiver gone: {:?}", e.into_inner());
            }
        }
    }

    /// Scan `stream` until a frame is captured or the session is stopped
    ///
    /// The stream is released on every exit path.
    pub async fn run(&mut self, stream: &mut dyn VideoStream) -> Result<CapturedFrame, OmrError> {
        if self.handle.cancel.is_cancelled() {
            stream.release();
            return Err(OmrError::SessionCancelled);
        }

        self.handle.active.store(true, Ordering::SeqCst);
        self.machine.start();
        self.emit(SessionEvent::Started);
        info!(
            "Capture session started (interval {} ms, settle {} ms, auto-capture {})",
            self.settings.scan_interval_ms, self.settings.settle_delay_ms, self.settings.auto_capture
        );

        let mut ticker = time::interval(Duration::from_millis(self.settings.scan_interval_ms.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let settle_delay = Duration::from_millis(self.settings.settle_delay_ms);
        let settle = time::sleep(settle_delay);
        tokio::pin!(settle);
        let mut settle_armed = false;

        let cancel = self.handle.cancel.clone();
        let capture = self.handle.capture.clone();

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    self.shutdown(stream);
                    self.emit(SessionEvent::Stopped);
                    info!("Capture session stopped");
                    return Err(OmrError::SessionCancelled);
                }

                () = &mut settle, if settle_armed => {
                    settle_armed = false;
                    if let Some(frame) = self.try_capture(stream)? {
                        return Ok(frame);
                    }
                }

                _ = capture.notified() => {
                    debug!("Manual capture requested");
                    if let Some(frame) = self.try_capture(stream)? {
                        return Ok(frame);
                    }
                }

                _ = ticker.tick() => {
                    let Some(status) = self.detect_tick(stream) else {
                        continue;
                    };

                    if status == AlignmentStatus::Aligned {
                        if self.settings.auto_capture && !settle_armed {
                            settle.as_mut().reset(Instant::now() + settle_delay);
                            settle_armed = true;
                            self.emit(SessionEvent::CaptureScheduled { delay_ms: self.settings.settle_delay_ms });
                            debug!("Auto-capture armed");
                        }
                    } else if settle_armed {
                        settle_armed = false;
                        self.emit(SessionEvent::CaptureCancelled);
                        debug!("Alignment lost, auto-capture disarmed");
                    }
                }
            }
        }
    }

    /// Run the detector on the current frame; `None` when no frame is available
    fn detect_tick(&mut self, stream: &mut dyn VideoStream) -> Option<AlignmentStatus> {
        let frame = stream.current_frame()?;
        let corners = self.detector.detect(&frame.data, frame.width, frame.height);
        let previous = self.machine.status();
        let status = self.machine.observe(corners);
        if status != previous {
            self.emit(SessionEvent::StatusChanged {
                status,
                corners: self.machine.corners().to_vec(),
            });
        }
        Some(status)
    }

    /// Take the current frame if the session is still active
    fn try_capture(&mut self, stream: &mut dyn VideoStream) -> Result<Option<CapturedFrame>, OmrError> {
        if !self.handle.is_active() {
            // stop() raced with the timer
            self.shutdown(stream);
            return Err(OmrError::SessionCancelled);
        }

        let Some(frame) = stream.current_frame() else {
            warn!("Capture fired but the stream has no frame");
            return Ok(None);
        };

        self.shutdown(stream);
        self.emit(SessionEvent::Captured { frame_id: frame.id() });
        info!("Captured frame {} ({}x{})", frame.id(), frame.width, frame.height);
        Ok(Some(frame))
    }

    fn shutdown(&mut self, stream: &mut dyn VideoStream) {
        self.handle.active.store(false, Ordering::SeqCst);
        self.machine.reset();
        if !stream.is_released() {
            stream.release();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::camera::StillImageStream;
    use crate::vision::bubble::tests::{blank_frame, paint_square};

    const WIDTH: u32 = 400;
    const HEIGHT: u32 = 300;

    /// Frame with the first `n` of four corner markers painted
    fn frame_with_corners(n: usize) -> CapturedFrame {
        let mut data = blank_frame(WIDTH, HEIGHT);
        let spots = [(40, 40), (360, 40), (40, 260), (360, 260)];
        for &(x, y) in spots.iter().take(n) {
            paint_square(&mut data, WIDTH, x, y, 12, [20, 40, 220]);
        }
        CapturedFrame::new(data, WIDTH, HEIGHT)
    }

    fn settings(auto_capture: bool) -> AlignmentSettings {
        AlignmentSettings {
            scan_interval_ms: 500,
            settle_delay_ms: 1000,
            auto_capture,
            acquire_timeout_ms: 1000,
        }
    }

    fn statuses(events: &crossbeam_channel::Receiver<SessionEvent>) -> Vec<AlignmentStatus> {
        events
            .try_iter()
            .filter_map(|e| match e {
                SessionEvent::StatusChanged { status, .. } => Some(status),
                _ => None,
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_capture_after_alignment() {
        let frames = vec![
            frame_with_corners(0),
            frame_with_corners(1),
            frame_with_corners(3),
            frame_with_corners(4),
        ];
        let aligned_id = frames[3].id();
        let mut stream = StillImageStream::new(frames);
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut session = CaptureSession::new(CornerDetector::new(), settings(true)).with_events(tx);

        let frame = session.run(&mut stream).await.unwrap();

        assert_eq!(frame.id(), aligned_id);
        assert!(stream.is_released());
        assert_eq!(session.status(), AlignmentStatus::Waiting);
        assert!(!session.handle().is_active());
        // scanning is entered on start, so the first change is to partial
        assert_eq!(statuses(&rx), vec![AlignmentStatus::Partial, AlignmentStatus::Aligned]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_alignment_is_not_captured() {
        // aligned for one tick only, then a steady aligned view
        let frames = vec![
            frame_with_corners(4),
            frame_with_corners(2),
            frame_with_corners(2),
            frame_with_corners(4),
        ];
        let steady_id = frames[3].id();
        let mut stream = StillImageStream::new(frames);
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut session = CaptureSession::new(CornerDetector::new(), settings(true)).with_events(tx);

        let frame = session.run(&mut stream).await.unwrap();
        assert_eq!(frame.id(), steady_id);

        let events: Vec<_> = rx.try_iter().collect();
        assert!(events.contains(&SessionEvent::CaptureCancelled));
        let scheduled = events
            .iter()
            .filter(|e| matches!(e, SessionEvent::CaptureScheduled { .. }))
            .count();
        assert_eq!(scheduled, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_before_settle_prevents_capture() {
        let mut stream = StillImageStream::new(vec![frame_with_corners(4)]);
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut session = CaptureSession::new(CornerDetector::new(), settings(true)).with_events(tx);
        let handle = session.handle();

        let stopper = tokio::spawn(async move {
            // first tick fires at once and arms the capture for t=1000ms
            time::sleep(Duration::from_millis(200)).await;
            handle.stop();
        });

        let result = session.run(&mut stream).await;
        stopper.await.unwrap();

        assert!(matches!(result, Err(OmrError::SessionCancelled)));
        assert!(stream.is_released());
        assert_eq!(session.status(), AlignmentStatus::Waiting);

        let events: Vec<_> = rx.try_iter().collect();
        assert!(events.contains(&SessionEvent::Stopped));
        assert!(!events.iter().any(|e| matches!(e, SessionEvent::Captured { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_capture_without_auto() {
        let mut stream = StillImageStream::new(vec![frame_with_corners(1)]);
        let mut session = CaptureSession::new(CornerDetector::new(), settings(false));
        let handle = session.handle();

        let trigger = tokio::spawn(async move {
            time::sleep(Duration::from_millis(1200)).await;
            handle.request_capture();
        });

        let frame = session.run(&mut stream).await.unwrap();
        trigger.await.unwrap();
        assert_eq!(frame.dimensions(), (WIDTH, HEIGHT));
        assert!(stream.is_released());
    }

    #[tokio::test(start_paused = true)]
    async fn test_capture_survives_disconnected_listener() {
        let mut stream = StillImageStream::new(vec![frame_with_corners(4)]);
        let (tx, rx) = crossbeam_channel::unbounded();
        drop(rx);
        let mut session = CaptureSession::new(CornerDetector::new(), settings(true)).with_events(tx);

        let frame = session.run(&mut stream).await.unwrap();
        assert_eq!(frame.dimensions(), (WIDTH, HEIGHT));
        assert!(stream.is_released());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stopped_session_does_not_start() {
        let mut stream = StillImageStream::new(vec![frame_with_corners(4)]);
        let mut session = CaptureSession::new(CornerDetector::new(), settings(true));
        session.handle().stop();

        let result = session.run(&mut stream).await;
        assert!(matches!(result, Err(OmrError::SessionCancelled)));
        assert!(stream.is_released());
    }
}
