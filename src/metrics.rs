//! Per-worker status, backed by atomics so the supervisor and any external
//! status caller can read it lock-free. Grounded on the teacher's
//! `Metrics`/`MLMetrics` atomics pattern in `main_phase6.rs`, generalized
//! from pipeline-wide counters to one `WorkerStatus` per camera plus a
//! single-slot handle on the most recent annotated frame.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};

use crate::frame::Frame;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Starting,
    Running,
    Reconnecting,
    Error,
    Stopped,
}

impl WorkerState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => WorkerState::Starting,
            1 => WorkerState::Running,
            2 => WorkerState::Reconnecting,
            3 => WorkerState::Error,
            _ => WorkerState::Stopped,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            WorkerState::Starting => "starting",
            WorkerState::Running => "running",
            WorkerState::Reconnecting => "reconnecting",
            WorkerState::Error => "error",
            WorkerState::Stopped => "stopped",
        }
    }
}

/// A snapshot of `WorkerStatus` suitable for the status interface (§6) or
/// serialization, since the live struct holds non-`Clone` atomics.
#[derive(Debug, Clone)]
pub struct WorkerStatusSnapshot {
    pub camera_id: String,
    pub state: WorkerState,
    pub last_error: Option<String>,
    pub frames_processed: u64,
    pub events_detected: u64,
    pub start_timestamp: DateTime<Utc>,
}

pub struct WorkerStatus {
    camera_id: String,
    state: AtomicU8,
    last_error: Mutex<Option<String>>,
    frames_processed: AtomicU64,
    events_detected: AtomicU64,
    start_timestamp: DateTime<Utc>,
    current_frame: RwLock<Option<Arc<Frame>>>,
}

impl WorkerStatus {
    pub fn new(camera_id: impl Into<String>) -> Self {
        Self {
            camera_id: camera_id.into(),
            state: AtomicU8::new(WorkerState::Starting as u8),
            last_error: Mutex::new(None),
            frames_processed: AtomicU64::new(0),
            events_detected: AtomicU64::new(0),
            start_timestamp: Utc::now(),
            current_frame: RwLock::new(None),
        }
    }

    pub fn set_state(&self, state: WorkerState) {
        self.state.store(state as u8, Ordering::Relaxed);
    }

    pub fn state(&self) -> WorkerState {
        WorkerState::from_u8(self.state.load(Ordering::Relaxed))
    }

    pub fn set_error(&self, message: impl Into<String>) {
        *self.last_error.lock().unwrap() = Some(message.into());
        self.set_state(WorkerState::Error);
    }

    /// Records a recoverable failure without moving the worker into the
    /// fatal `Error` state — used while the reconnect loop is still active.
    pub fn set_reconnecting(&self, message: impl Into<String>) {
        *self.last_error.lock().unwrap() = Some(message.into());
        self.set_state(WorkerState::Reconnecting);
    }

    pub fn clear_error(&self) {
        *self.last_error.lock().unwrap() = None;
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().unwrap().clone()
    }

    pub fn record_frame(&self) -> u64 {
        self.frames_processed.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn record_events(&self, count: u64) -> u64 {
        self.events_detected.fetch_add(count, Ordering::Relaxed) + count
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames_processed.load(Ordering::Relaxed)
    }

    pub fn events_detected(&self) -> u64 {
        self.events_detected.load(Ordering::Relaxed)
    }

    /// Overwrites the single-slot handle external viewers read from; there
    /// is no queue, so a slow reader only ever sees the most recent frame.
    pub fn publish_frame(&self, frame: Frame) {
        *self.current_frame.write().unwrap() = Some(Arc::new(frame));
    }

    pub fn current_frame(&self) -> Option<Arc<Frame>> {
        self.current_frame.read().unwrap().clone()
    }

    pub fn snapshot(&self) -> WorkerStatusSnapshot {
        WorkerStatusSnapshot {
            camera_id: self.camera_id.clone(),
            state: self.state(),
            last_error: self.last_error(),
            frames_processed: self.frames_processed(),
            events_detected: self.events_detected(),
            start_timestamp: self.start_timestamp,
        }
    }
}

impl WorkerStatusSnapshot {
    pub fn state_str(&self) -> &'static str {
        self.state.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_are_monotonic() {
        let status = WorkerStatus::new("cam-1");
        status.record_frame();
        status.record_frame();
        status.record_events(1);
        let snap = status.snapshot();
        assert_eq!(snap.frames_processed, 2);
        assert_eq!(snap.events_detected, 1);
    }

    #[test]
    fn error_sets_state_and_message() {
        let status = WorkerStatus::new("cam-1");
        status.set_error("stream lost");
        assert_eq!(status.state(), WorkerState::Error);
        assert_eq!(status.last_error().as_deref(), Some("stream lost"));
    }

    #[test]
    fn publish_frame_overwrites_the_single_slot() {
        let status = WorkerStatus::new("cam-1");
        status.publish_frame(Frame::new(vec![0u8; 3], 1, 1, 0));
        status.publish_frame(Frame::new(vec![0u8; 3], 1, 1, 1));
        assert_eq!(status.current_frame().unwrap().frame_index, 1);
    }
}
