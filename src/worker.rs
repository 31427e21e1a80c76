//! Camera worker (C9): owns one camera's full C1-C8 stack and runs it on a
//! dedicated blocking task so a stall or panic in one camera's capture or
//! inference loop cannot starve another camera's task. Graceful stop is a
//! `tokio::sync::watch<bool>` signal, the same pattern the pack's
//! `vclip-worker` executor uses for its background claim loop, bounded by a
//! timeout after which the task is aborted outright.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::backends::{PoseBackend, StubFireBackend, StubPoseBackend, TractFireBackend, TractPoseBackend};
use crate::buffer::RollingBuffer;
use crate::clip::{self, ClipWriter};
use crate::config::CameraConfig;
use crate::detect::cash::CashDetector;
use crate::detect::fire::FireDetector;
use crate::detect::unified::UnifiedDetector;
use crate::detect::violence::ViolenceDetector;
use crate::detect::EventDetector;
use crate::error::{ConfigError, NetworkError};
use crate::event::EventSink;
use crate::frame::Frame;
use crate::metrics::{WorkerState, WorkerStatus, WorkerStatusSnapshot};
use crate::rtsp::{ConnectionState, GstRtspSource, ReconnectingSource};

/// How long `stop()` waits for a cooperative exit before aborting the task.
const STOP_TIMEOUT: Duration = Duration::from_secs(10);
/// Rolling buffer window: 30s at an assumed 30fps source rate.
const BUFFER_SECONDS: usize = 30;
const ASSUMED_FPS: usize = 30;
/// Pose/fire/smoke sampling cadence: run inference on every 4th frame.
const DETECT_EVERY_N: u64 = 4;
const STREAM_WIDTH: u32 = 1280;
const STREAM_HEIGHT: u32 = 720;

/// Owns one camera's capture, detection, buffering, and persistence. The
/// worker itself is a thin handle: the actual loop runs inside the
/// `spawn_blocking` task and communicates back only through `status`.
pub struct CameraWorker {
    camera_id: String,
    status: Arc<WorkerStatus>,
    stop_tx: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl CameraWorker {
    /// Spawns the worker's blocking task and returns immediately; the task
    /// itself drives the state machine through `WorkerStatus`.
    pub fn spawn(config: CameraConfig, sink: Arc<dyn EventSink>) -> Self {
        let camera_id = config.camera_id.clone();
        let status = Arc::new(WorkerStatus::new(camera_id.clone()));
        let (stop_tx, stop_rx) = watch::channel(false);

        let task_status = status.clone();
        let handle = tokio::task::spawn_blocking(move || run(config, task_status, stop_rx, sink));

        Self { camera_id, status, stop_tx, handle: Some(handle) }
    }

    pub fn camera_id(&self) -> &str {
        &self.camera_id
    }

    pub fn status(&self) -> WorkerStatusSnapshot {
        self.status.snapshot()
    }

    pub fn current_frame(&self) -> Option<Arc<Frame>> {
        self.status.current_frame()
    }

    /// Whether the underlying task has already returned, with no regard to
    /// whether `stop()` was ever called — used by the supervisor to reap
    /// workers that ended on their own (e.g. a fatal `NetworkError`).
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map(|h| h.is_finished()).unwrap_or(true)
    }

    /// Requests a graceful stop and waits up to `STOP_TIMEOUT` for the loop
    /// to notice and exit; past that, the blocking task is aborted.
    pub async fn stop(&mut self) {
        let _ = self.stop_tx.send(true);

        if let Some(handle) = self.handle.take() {
            let abort_handle = handle.abort_handle();
            if tokio::time::timeout(STOP_TIMEOUT, handle).await.is_err() {
                warn!(camera_id = %self.camera_id, "worker did not stop in time, aborting");
                abort_handle.abort();
            }
        }

        self.status.set_state(WorkerState::Stopped);
    }
}

#[cfg(target_os = "linux")]
fn pin_to_core(core: usize) {
    unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_ZERO(&mut set);
        libc::CPU_SET(core, &mut set);
        let _ = libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set);
    }
}

#[cfg(not(target_os = "linux"))]
fn pin_to_core(_core: usize) {}

/// Loads the pose and fire-object models named in `config`. A configured
/// path that fails to load is fatal (worker ends in `Error`, not a silent
/// pose-blind or color-only fallback) — only an *absent* path falls back to
/// a stub, and only fire's absence is a sanctioned fallback (the
/// color-flicker heuristic in `FireDetector` still runs on every frame;
/// `config::validate` already refuses a missing pose model when cash or
/// violence detection is enabled).
fn build_detectors(
    config: &CameraConfig,
) -> Result<(Box<dyn PoseBackend>, Vec<Box<dyn EventDetector>>), ConfigError> {
    let pose_backend: Box<dyn PoseBackend> = match &config.models.pose_model {
        Some(path) => Box::new(load_model(path, |p| TractPoseBackend::load(p, STREAM_WIDTH, STREAM_HEIGHT))?),
        None => Box::new(StubPoseBackend::new(Vec::new())),
    };

    let fire_backend: Box<dyn crate::backends::FireObjectBackend> = match &config.models.fire_object_model
    {
        Some(path) => Box::new(load_model(path, |p| TractFireBackend::load(p, STREAM_WIDTH, STREAM_HEIGHT))?),
        // No object model configured: the color-flicker fallback in
        // `FireDetector` still runs on every frame.
        None => Box::new(StubFireBackend::new(Vec::new())),
    };

    let detectors: Vec<Box<dyn EventDetector>> = vec![
        Box::new(CashDetector::new(config.cashier_zone.clone(), &config.detectors, config.enable_cash)),
        Box::new(ViolenceDetector::new(
            config.cashier_zone.clone(),
            &config.detectors,
            config.enable_violence,
        )),
        Box::new(FireDetector::new(fire_backend, &config.detectors, config.enable_fire)),
    ];

    Ok((pose_backend, detectors))
}

fn load_model<T>(
    path: &std::path::Path,
    load: impl FnOnce(&std::path::Path) -> anyhow::Result<T>,
) -> Result<T, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::MissingModel(path.to_path_buf()));
    }
    load(path).map_err(|source| ConfigError::ModelLoad { path: path.to_path_buf(), source })
}

/// The blocking capture + inference loop, run inside `spawn_blocking`.
/// Bridges back into the async runtime only for the sink insert inside
/// `clip::persist`, via `Handle::block_on`.
fn run(config: CameraConfig, status: Arc<WorkerStatus>, mut stop_rx: watch::Receiver<bool>, sink: Arc<dyn EventSink>) {
    status.set_state(WorkerState::Starting);
    info!(camera_id = %config.camera_id, "worker starting");

    if let Some(core) = config.cpu_affinity {
        pin_to_core(core);
    }

    let (pose_backend, detectors) = match build_detectors(&config) {
        Ok(built) => built,
        Err(e) => {
            error!(camera_id = %config.camera_id, error = %e, "model load failed, worker exiting");
            status.set_error(e.to_string());
            return;
        }
    };
    let mut unified = UnifiedDetector::new(
        pose_backend,
        detectors,
        config.cashier_zone.clone(),
        config.detectors.pose_confidence_floor,
        DETECT_EVERY_N,
    );

    let buffer = RollingBuffer::new(BUFFER_SECONDS * ASSUMED_FPS);
    let writer = ClipWriter::new(config.media_root.clone());

    let mut source = ReconnectingSource::new(GstRtspSource::new(config.rtsp_url.clone(), STREAM_WIDTH, STREAM_HEIGHT));
    if let Err(e) = source.open() {
        error!(camera_id = %config.camera_id, error = %e, "initial RTSP open failed, worker exiting");
        status.set_error(format!("initial open failed: {e}"));
        return;
    }

    status.set_state(WorkerState::Running);
    let rt = tokio::runtime::Handle::current();

    loop {
        if *stop_rx.borrow_and_update() {
            break;
        }

        match source.read() {
            Ok(frame) => {
                if status.state() == WorkerState::Reconnecting {
                    status.set_state(WorkerState::Running);
                    status.clear_error();
                }

                buffer.push_raw(frame.clone());
                let (detections, annotated) = match unified.process(&frame) {
                    Ok(result) => result,
                    Err(e) => {
                        error!(camera_id = %config.camera_id, error = %e, "inference error budget exceeded, worker ending");
                        status.set_error(e.to_string());
                        break;
                    }
                };
                buffer.push_annotated(annotated.clone());

                status.record_frame();
                status.publish_frame(annotated);

                for detection in &detections {
                    let snapshot = buffer.snapshot();
                    let result = rt.block_on(clip::persist(
                        &writer,
                        sink.as_ref(),
                        detection,
                        &config.camera_id,
                        &config.camera_name,
                        frame.captured_at,
                        &snapshot,
                    ));

                    match result {
                        Ok(_) => {
                            status.record_events(1);
                        }
                        Err(e) => {
                            error!(camera_id = %config.camera_id, error = %e, "failed to persist detection");
                        }
                    }
                }
            }
            Err(NetworkError::ReconnectStormExceeded { attempts, .. }) => {
                error!(camera_id = %config.camera_id, attempts, "reconnect storms exceeded, worker ending");
                status.set_error(format!("reconnect storms exceeded after {attempts} attempts"));
                break;
            }
            Err(e) => {
                // The source itself decides whether a single failed read is
                // still within its own failure budget (`Running`) or has
                // crossed into an active reconnect (`Reconnecting`); only
                // the latter is worth surfacing as a worker state change.
                if source.state() == ConnectionState::Reconnecting {
                    status.set_reconnecting(e.to_string());
                } else {
                    warn!(camera_id = %config.camera_id, error = %e, "frame read failed, within failure budget");
                }
            }
        }
    }

    info!(camera_id = %config.camera_id, "worker stopping");
    status.set_state(WorkerState::Stopped);
}
