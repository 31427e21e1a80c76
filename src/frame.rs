//! The `Frame` entity: a raw RGB pixel matrix with a capture timestamp and
//! a monotonic per-worker frame index. Produced by the frame source (C1),
//! retained in the rolling buffer (C2) for at most the buffer window, and
//! otherwise owned exclusively by one worker.

use chrono::{DateTime, Utc};

#[derive(Debug, Clone)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub captured_at: DateTime<Utc>,
    pub frame_index: u64,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, frame_index: u64) -> Self {
        Self { data, width, height, captured_at: Utc::now(), frame_index }
    }

    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }

    pub fn is_valid(&self) -> bool {
        self.data.len() == self.expected_len()
    }
}
