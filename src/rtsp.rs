//! Frame source (C1): RTSP ingestion over GStreamer with a bounded
//! reconnect policy. Grounded on the teacher's `create_rtsp_pipeline`
//! string-builder and appsink wiring, generalized with the connection
//! policy from the design (bounded open attempts, consecutive-failure and
//! wall-clock reconnect triggers, bounded reconnect storms before a fatal
//! error).

use std::time::{Duration, Instant};

use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;

use crate::error::NetworkError;
use crate::frame::Frame;

const OPEN_ATTEMPTS: u32 = 5;
const OPEN_RETRY_DELAY: Duration = Duration::from_secs(3);
const SOCKET_TIMEOUT_SECS: u64 = 60;
const READ_TIMEOUT_SECS: u64 = 15;
const MAX_QUEUE_FRAMES: u32 = 5;
const CONSECUTIVE_FAILURE_LIMIT: u32 = 20;
const STALE_STREAM_LIMIT: Duration = Duration::from_secs(30);
const MAX_RECONNECT_STORMS: u32 = 5;

/// Minimal capability a frame source must provide: open once, then read
/// frames until the stream is lost.
pub trait FrameSource: Send {
    fn open(&mut self) -> Result<(), NetworkError>;
    fn read(&mut self) -> Result<Frame, NetworkError>;
}

pub struct GstRtspSource {
    url: String,
    width: u32,
    height: u32,
    pipeline: Option<gst::Pipeline>,
    frame_index: u64,
}

impl GstRtspSource {
    pub fn new(url: impl Into<String>, width: u32, height: u32) -> Self {
        Self { url: url.into(), width, height, pipeline: None, frame_index: 0 }
    }

    fn build_pipeline(&self) -> Result<gst::Pipeline, NetworkError> {
        if !self.url.starts_with("rtsp://") && !self.url.starts_with("rtsps://") {
            return Err(NetworkError::InvalidUrl(self.url.clone()));
        }

        let pipeline_str = format!(
            "rtspsrc location=\"{}\" protocols=tcp tcp-timeout={} latency={} drop-on-latency=true ! \
             rtph264depay ! h264parse ! avdec_h264 ! \
             videoconvert ! videoscale ! \
             video/x-raw,format=RGB,width={},height={} ! \
             appsink name=sink max-buffers={} drop=true sync=false",
            self.url,
            SOCKET_TIMEOUT_SECS * 1_000_000,
            READ_TIMEOUT_SECS * 1000,
            self.width,
            self.height,
            MAX_QUEUE_FRAMES,
        );

        let element = gst::parse::launch(&pipeline_str)
            .map_err(|e| NetworkError::OpenFailed { url: self.url.clone(), reason: e.to_string() })?;

        element
            .downcast::<gst::Pipeline>()
            .map_err(|_| NetworkError::OpenFailed { url: self.url.clone(), reason: "not a pipeline".into() })
    }

    fn appsink(&self) -> Result<gst_app::AppSink, NetworkError> {
        let pipeline = self.pipeline.as_ref().ok_or_else(|| NetworkError::OpenFailed {
            url: self.url.clone(),
            reason: "pipeline not open".into(),
        })?;

        pipeline
            .by_name("sink")
            .and_then(|e| e.dynamic_cast::<gst_app::AppSink>().ok())
            .ok_or_else(|| NetworkError::OpenFailed { url: self.url.clone(), reason: "missing appsink".into() })
    }
}

impl FrameSource for GstRtspSource {
    fn open(&mut self) -> Result<(), NetworkError> {
        if let Some(old) = self.pipeline.take() {
            let _ = old.set_state(gst::State::Null);
        }

        let pipeline = self.build_pipeline()?;
        pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| NetworkError::OpenFailed { url: self.url.clone(), reason: e.to_string() })?;
        self.pipeline = Some(pipeline);

        // A successful open requires a probe frame to actually decode.
        self.read().map(|_| ())
    }

    fn read(&mut self) -> Result<Frame, NetworkError> {
        let appsink = self.appsink()?;
        let sample = appsink
            .try_pull_sample(gst::ClockTime::from_seconds(READ_TIMEOUT_SECS))
            .ok_or_else(|| NetworkError::OpenFailed { url: self.url.clone(), reason: "read timeout".into() })?;

        let buffer = sample
            .buffer()
            .ok_or_else(|| NetworkError::OpenFailed { url: self.url.clone(), reason: "empty sample".into() })?;
        let map = buffer
            .map_readable()
            .map_err(|e| NetworkError::OpenFailed { url: self.url.clone(), reason: e.to_string() })?;

        self.frame_index += 1;
        Ok(Frame::new(map.as_slice().to_vec(), self.width, self.height, self.frame_index))
    }
}

impl Drop for GstRtspSource {
    fn drop(&mut self) {
        if let Some(p) = self.pipeline.take() {
            let _ = p.set_state(gst::State::Null);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Running,
    Reconnecting,
    Error,
}

/// Wraps any `FrameSource` with the reconnect policy from §4.1: bounded
/// open attempts, a consecutive-failure counter and a wall-clock
/// "time since last good frame", and a bounded number of reconnect storms
/// before the source gives up for good.
pub struct ReconnectingSource<S: FrameSource> {
    inner: S,
    state: ConnectionState,
    consecutive_failures: u32,
    last_good_frame: Instant,
    reconnect_storms: u32,
    last_error: Option<String>,
}

impl<S: FrameSource> ReconnectingSource<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            state: ConnectionState::Running,
            consecutive_failures: 0,
            last_good_frame: Instant::now(),
            reconnect_storms: 0,
            last_error: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Open with up to `OPEN_ATTEMPTS` retries spaced `OPEN_RETRY_DELAY`
    /// apart; each attempt only counts as success if a probe frame decodes.
    pub fn open(&mut self) -> Result<(), NetworkError> {
        let mut last_err = None;
        for attempt in 1..=OPEN_ATTEMPTS {
            match self.inner.open() {
                Ok(()) => {
                    self.state = ConnectionState::Running;
                    self.consecutive_failures = 0;
                    self.last_good_frame = Instant::now();
                    return Ok(());
                }
                Err(e) => {
                    last_err = Some(e);
                    if attempt < OPEN_ATTEMPTS {
                        std::thread::sleep(OPEN_RETRY_DELAY);
                    }
                }
            }
        }
        let err = last_err.unwrap();
        self.last_error = Some(err.to_string());
        self.state = ConnectionState::Error;
        Err(err)
    }

    /// Read one frame, transparently reconnecting per policy. Returns
    /// `NetworkError::ReconnectStormExceeded` only once reconnect storms
    /// are exhausted.
    pub fn read(&mut self) -> Result<Frame, NetworkError> {
        match self.inner.read() {
            Ok(frame) => {
                self.consecutive_failures = 0;
                self.last_good_frame = Instant::now();
                if self.state == ConnectionState::Reconnecting {
                    self.state = ConnectionState::Running;
                    self.reconnect_storms = 0;
                }
                Ok(frame)
            }
            Err(e) => {
                self.consecutive_failures += 1;
                self.last_error = Some(e.to_string());

                let should_reconnect = self.consecutive_failures >= CONSECUTIVE_FAILURE_LIMIT
                    || self.last_good_frame.elapsed() >= STALE_STREAM_LIMIT;

                if !should_reconnect {
                    return Err(e);
                }

                self.state = ConnectionState::Reconnecting;
                self.reconnect_storms += 1;
                if self.reconnect_storms > MAX_RECONNECT_STORMS {
                    self.state = ConnectionState::Error;
                    return Err(NetworkError::ReconnectStormExceeded {
                        url: "<source>".into(),
                        attempts: self.reconnect_storms,
                    });
                }

                self.consecutive_failures = 0;
                self.open()?;
                self.inner.read()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Fails a fixed number of reads, then succeeds forever after.
    struct FlakySource {
        reads_before_recovery: u32,
        reads_seen: u32,
        frame_index: u64,
        opens: u32,
    }

    impl FlakySource {
        fn new(reads_before_recovery: u32) -> Self {
            Self { reads_before_recovery, reads_seen: 0, frame_index: 0, opens: 0 }
        }
    }

    impl FrameSource for FlakySource {
        fn open(&mut self) -> Result<(), NetworkError> {
            self.opens += 1;
            Ok(())
        }

        fn read(&mut self) -> Result<Frame, NetworkError> {
            self.reads_seen += 1;
            if self.reads_seen <= self.reads_before_recovery {
                return Err(NetworkError::OpenFailed { url: "x".into(), reason: "no frame".into() });
            }
            self.frame_index += 1;
            Ok(Frame::new(vec![0u8; 3], 1, 1, self.frame_index))
        }
    }

    #[test]
    fn reconnects_after_consecutive_failure_limit() {
        let mut source = ReconnectingSource::new(FlakySource::new(20));
        source.open().unwrap();

        for _ in 0..19 {
            assert!(source.read().is_err());
            assert_eq!(source.state(), ConnectionState::Running);
        }

        // 20th failure crosses CONSECUTIVE_FAILURE_LIMIT; triggers reconnect,
        // whose retry (inner.read on attempt 21) succeeds.
        let result = source.read();
        assert!(result.is_ok());
        assert_eq!(source.state(), ConnectionState::Running);
    }

    #[test]
    fn successful_read_resets_failure_counter() {
        let mut source = ReconnectingSource::new(FlakySource::new(0));
        source.open().unwrap();
        for _ in 0..5 {
            assert!(source.read().is_ok());
        }
        assert_eq!(source.consecutive_failures, 0);
    }
}
