//! The `Event` entity and the `EventSink` capability it is persisted
//! through. The default sink is the `sqlx`-backed Postgres implementation
//! in `sink::sql`, grounded on the teacher's `database.rs` connection-pool
//! conventions.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::PersistenceError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub camera_id: String,
    pub event_type: String,
    pub confidence: f32,
    pub captured_at: DateTime<Utc>,
    pub clip_path: PathBuf,
    pub thumbnail_path: PathBuf,
    pub json_sidecar_path: PathBuf,
    pub status: String,
    pub bbox: Option<(f32, f32, f32, f32)>,
    pub frame_index: Option<u64>,
}

impl Event {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        camera_id: impl Into<String>,
        event_type: impl Into<String>,
        confidence: f32,
        captured_at: DateTime<Utc>,
        clip_path: PathBuf,
        thumbnail_path: PathBuf,
        json_sidecar_path: PathBuf,
        bbox: Option<(f32, f32, f32, f32)>,
        frame_index: Option<u64>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            camera_id: camera_id.into(),
            event_type: event_type.into(),
            confidence,
            captured_at,
            clip_path,
            thumbnail_path,
            json_sidecar_path,
            status: "pending".into(),
            bbox,
            frame_index,
        }
    }
}

/// External interface: `record_event(...)` per the design's event-sink
/// operation. Errors are logged by the caller and never block the
/// detector's cooldown; the clip and thumbnail are retained on disk for
/// reconciliation regardless of sink outcome.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn record_event(&self, event: &Event) -> Result<(), PersistenceError>;
}

/// A sink that drops every event; used in tests and as a safe default when
/// no durable store is configured.
pub struct NullSink;

#[async_trait]
impl EventSink for NullSink {
    async fn record_event(&self, _event: &Event) -> Result<(), PersistenceError> {
        Ok(())
    }
}
