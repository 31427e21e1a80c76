//! Rolling buffer (C2): a fixed-capacity deque of the most recent K frames,
//! kept as two parallel buffers (raw and annotated). Grounded on the
//! teacher's `VideoBuffer`, generalized from a single time-windowed deque to
//! a frame-count-capped pair and with an atomic snapshot operation for the
//! event sink.

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::frame::Frame;

pub struct RollingBuffer {
    capacity: usize,
    raw: Mutex<VecDeque<Frame>>,
    annotated: Mutex<VecDeque<Frame>>,
}

#[derive(Clone)]
pub struct BufferSnapshot {
    pub raw: Vec<Frame>,
    pub annotated: Vec<Frame>,
}

impl RollingBuffer {
    /// `capacity` is the number of frames to retain, typically `fps * 30`.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            raw: Mutex::new(VecDeque::with_capacity(capacity)),
            annotated: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn push_raw(&self, frame: Frame) {
        let mut buf = self.raw.lock().unwrap();
        push_capped(&mut buf, frame, self.capacity);
    }

    pub fn push_annotated(&self, frame: Frame) {
        let mut buf = self.annotated.lock().unwrap();
        push_capped(&mut buf, frame, self.capacity);
    }

    /// Copy the entire current buffer atomically (a snapshot, not a
    /// reference) before the worker is allowed to mutate it again.
    pub fn snapshot(&self) -> BufferSnapshot {
        let raw = self.raw.lock().unwrap();
        let annotated = self.annotated.lock().unwrap();
        BufferSnapshot { raw: raw.iter().cloned().collect(), annotated: annotated.iter().cloned().collect() }
    }

    pub fn len(&self) -> usize {
        self.raw.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.raw.lock().unwrap().clear();
        self.annotated.lock().unwrap().clear();
    }
}

fn push_capped(buf: &mut VecDeque<Frame>, frame: Frame, capacity: usize) {
    buf.push_back(frame);
    while buf.len() > capacity {
        buf.pop_front();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(i: u64) -> Frame {
        Frame::new(vec![0u8; 3], 1, 1, i)
    }

    #[test]
    fn overwrites_oldest_at_capacity() {
        let buf = RollingBuffer::new(3);
        for i in 0..5 {
            buf.push_raw(frame(i));
        }
        let snap = buf.snapshot();
        let indices: Vec<u64> = snap.raw.iter().map(|f| f.frame_index).collect();
        assert_eq!(indices, vec![2, 3, 4]);
    }

    #[test]
    fn snapshot_is_a_copy_not_a_reference() {
        let buf = RollingBuffer::new(10);
        buf.push_raw(frame(0));
        let snap = buf.snapshot();
        buf.push_raw(frame(1));
        assert_eq!(snap.raw.len(), 1);
        assert_eq!(buf.len(), 2);
    }

    #[test]
    fn raw_and_annotated_are_independent() {
        let buf = RollingBuffer::new(10);
        buf.push_raw(frame(0));
        let snap = buf.snapshot();
        assert_eq!(snap.raw.len(), 1);
        assert_eq!(snap.annotated.len(), 0);
    }
}
