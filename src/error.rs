//! Error taxonomy for the surveillance core.
//!
//! Each variant maps to one of the policies described in the design's error
//! handling section: `ConfigError` and fatal `InferenceError`s end a worker,
//! `NetworkError` is recovered locally by the reconnect loop, and
//! `PersistenceError` never blocks the detector's cooldown.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error(transparent)]
    Inference(#[from] InferenceError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

/// Fatal at worker start: missing/invalid config, unreadable model weights.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("camera config file {path:?} could not be read: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("camera config {path:?} failed to parse: {source}")]
    Invalid {
        path: PathBuf,
        #[source]
        source: Box<config::ConfigError>,
    },

    #[error("camera config is invalid: {0}")]
    Validation(String),

    #[error("model weights not found at {0:?}")]
    MissingModel(PathBuf),

    #[error("failed to load model {path:?}: {source}")]
    ModelLoad {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },
}

/// RTSP open/connect failure. Recovered locally by the reconnect loop;
/// only escalated to fatal after a bounded number of reconnect storms.
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("invalid RTSP url {0:?}")]
    InvalidUrl(String),

    #[error("failed to open RTSP stream {url:?}: {reason}")]
    OpenFailed { url: String, reason: String },

    #[error("exceeded {attempts} reconnect storms for {url:?}")]
    ReconnectStormExceeded { url: String, attempts: u32 },
}

/// Single-frame model call failure. Swallowed per-frame; escalated only
/// once the transient error counter exceeds its window threshold.
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("{backend} inference failed: {reason}")]
    BackendFailed { backend: &'static str, reason: String },

    #[error("frame dimensions {width}x{height} do not match model input")]
    ShapeMismatch { width: u32, height: u32 },

    #[error("transient inference error budget exceeded ({count} in window)")]
    BudgetExceeded { count: u32 },
}

/// Clip/thumbnail/JSON/event write failure. Logged; partial artefacts are
/// retained; the Event record is never inserted.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("failed to encode clip at {path:?}: {reason}")]
    ClipEncode { path: PathBuf, reason: String },

    #[error("failed to write thumbnail at {path:?}: {source}")]
    Thumbnail {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("failed to write JSON sidecar at {path:?}: {source}")]
    Sidecar {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("event sink insert failed: {0}")]
    SinkInsert(String),

    #[error("no frames available to build a clip")]
    EmptyBuffer,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
