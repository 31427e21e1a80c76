//! `cashier_sentry`: multi-camera RTSP surveillance for cashier points,
//! detecting cash hand-to-hand exchange, interpersonal violence, and
//! fire/smoke, and persisting each event as a clip, thumbnail, and JSON
//! sidecar plus a durable row in the event store.

pub mod backends;
pub mod buffer;
pub mod clip;
pub mod config;
pub mod detect;
pub mod error;
pub mod event;
pub mod frame;
pub mod metrics;
pub mod pose;
pub mod rtsp;
pub mod sink;
pub mod supervisor;
pub mod worker;
pub mod zone;

pub use config::CameraConfig;
pub use error::{CoreError, Result};
pub use event::{Event, EventSink};
pub use supervisor::Supervisor;
pub use worker::CameraWorker;
