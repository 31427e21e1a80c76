//! Supervisor (C10): owns a camera_id -> `CameraWorker` map, starting,
//! stopping, and restarting workers independently so one camera's failure
//! never touches another's. Start/stop are idempotent; `reap` drops the
//! handles of any worker whose task has already ended on its own.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::CameraConfig;
use crate::event::EventSink;
use crate::metrics::WorkerStatusSnapshot;
use crate::worker::CameraWorker;

pub struct Supervisor {
    sink: Arc<dyn EventSink>,
    workers: HashMap<String, CameraWorker>,
}

impl Supervisor {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self { sink, workers: HashMap::new() }
    }

    /// Starts a worker for `config.camera_id` if one isn't already running;
    /// a second call for the same camera is a no-op, not a restart.
    pub fn start(&mut self, config: CameraConfig) {
        if self.workers.contains_key(&config.camera_id) {
            info!(camera_id = %config.camera_id, "start requested for already-running camera, ignoring");
            return;
        }

        let camera_id = config.camera_id.clone();
        info!(camera_id = %camera_id, "starting camera worker");
        let worker = CameraWorker::spawn(config, self.sink.clone());
        self.workers.insert(camera_id, worker);
    }

    pub fn start_all(&mut self, configs: Vec<CameraConfig>) {
        for config in configs {
            self.start(config);
        }
    }

    /// Stops and drops a camera's worker; a no-op if it isn't running.
    pub async fn stop(&mut self, camera_id: &str) {
        if let Some(mut worker) = self.workers.remove(camera_id) {
            info!(camera_id, "stopping camera worker");
            worker.stop().await;
        } else {
            info!(camera_id, "stop requested for camera that isn't running, ignoring");
        }
    }

    pub async fn stop_all(&mut self) {
        let camera_ids: Vec<String> = self.workers.keys().cloned().collect();
        for camera_id in camera_ids {
            self.stop(&camera_id).await;
        }
    }

    /// Stops the existing worker for `config.camera_id` (if any) and starts
    /// a fresh one from `config`.
    pub async fn restart(&mut self, config: CameraConfig) {
        self.stop(&config.camera_id).await;
        self.start(config);
    }

    /// Drops the handles of workers whose task has already ended on its
    /// own (e.g. a fatal `NetworkError` after reconnect storms exhausted),
    /// so their terminal status can still be read via `status()` for one
    /// last tick before they disappear from the map. Returns the camera ids
    /// reaped this call.
    pub fn reap(&mut self) -> Vec<String> {
        let finished: Vec<String> = self
            .workers
            .iter()
            .filter(|(_, worker)| worker.is_finished())
            .map(|(camera_id, _)| camera_id.clone())
            .collect();

        for camera_id in &finished {
            warn!(camera_id, "reaping worker that ended on its own");
            self.workers.remove(camera_id);
        }

        finished
    }

    pub fn status(&self) -> Vec<WorkerStatusSnapshot> {
        self.workers.values().map(|w| w.status()).collect()
    }

    pub fn is_running(&self, camera_id: &str) -> bool {
        self.workers.contains_key(camera_id)
    }

    pub fn camera_ids(&self) -> Vec<String> {
        self.workers.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::NullSink;
    use crate::zone::CashierZone;
    use std::path::PathBuf;

    fn config(camera_id: &str) -> CameraConfig {
        CameraConfig {
            camera_id: camera_id.into(),
            camera_name: "Register 1".into(),
            rtsp_url: "rtsp://127.0.0.1/does-not-exist".into(),
            enable_cash: true,
            enable_violence: true,
            enable_fire: true,
            cashier_zone: CashierZone::Rect { x1: 0.0, y1: 0.0, x2: 640.0, y2: 480.0 },
            detectors: crate::config::DetectorThresholds::default(),
            models: crate::config::ModelPaths { pose_model: None, fire_object_model: None },
            media_root: PathBuf::from("/tmp/cashier-sentry-test-media"),
            cpu_affinity: None,
        }
    }

    #[tokio::test]
    async fn start_is_idempotent() {
        let mut supervisor = Supervisor::new(Arc::new(NullSink));
        supervisor.start(config("cam-1"));
        supervisor.start(config("cam-1"));
        assert_eq!(supervisor.camera_ids(), vec!["cam-1".to_string()]);
        supervisor.stop_all().await;
    }

    #[tokio::test]
    async fn stop_of_unknown_camera_is_a_no_op() {
        let mut supervisor = Supervisor::new(Arc::new(NullSink));
        supervisor.stop("does-not-exist").await;
        assert!(supervisor.status().is_empty());
    }

    #[tokio::test]
    async fn stop_then_start_removes_then_readds_the_worker() {
        let mut supervisor = Supervisor::new(Arc::new(NullSink));
        supervisor.start(config("cam-1"));
        supervisor.stop("cam-1").await;
        assert!(!supervisor.is_running("cam-1"));
        supervisor.start(config("cam-1"));
        assert!(supervisor.is_running("cam-1"));
        supervisor.stop_all().await;
    }
}
