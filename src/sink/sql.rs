//! Postgres-backed `EventSink`. Grounded on the teacher's `Database` in
//! `database.rs`: the same bounded connection pool and acquire timeout,
//! trimmed to the single `events` table this design needs (no POS/staff
//! risk schema).

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use crate::error::PersistenceError;
use crate::event::{Event, EventSink};

pub struct PostgresSink {
    pool: PgPool,
}

impl PostgresSink {
    pub async fn connect(database_url: &str) -> Result<Self, PersistenceError> {
        info!("connecting to event store");

        let pool = PgPoolOptions::new()
            .max_connections(10)
            .min_connections(2)
            .acquire_timeout(std::time::Duration::from_secs(10))
            .connect(database_url)
            .await
            .map_err(|e| PersistenceError::SinkInsert(e.to_string()))?;

        Ok(Self { pool })
    }

    pub async fn run_migrations(&self) -> Result<(), PersistenceError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| PersistenceError::SinkInsert(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl EventSink for PostgresSink {
    async fn record_event(&self, event: &Event) -> Result<(), PersistenceError> {
        let (bbox_x1, bbox_y1, bbox_x2, bbox_y2) = event
            .bbox
            .map(|(x1, y1, x2, y2)| (Some(x1), Some(y1), Some(x2), Some(y2)))
            .unwrap_or((None, None, None, None));
        let frame_index = event.frame_index.map(|i| i as i64);

        sqlx::query(
            r#"
            INSERT INTO events (
                id, camera_id, event_type, confidence, captured_at,
                clip_path, thumbnail_path, json_sidecar_path, status,
                bbox_x1, bbox_y1, bbox_x2, bbox_y2, frame_index
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(event.id)
        .bind(&event.camera_id)
        .bind(&event.event_type)
        .bind(event.confidence)
        .bind(event.captured_at)
        .bind(event.clip_path.to_string_lossy().to_string())
        .bind(event.thumbnail_path.to_string_lossy().to_string())
        .bind(event.json_sidecar_path.to_string_lossy().to_string())
        .bind(&event.status)
        .bind(bbox_x1)
        .bind(bbox_y1)
        .bind(bbox_x2)
        .bind(bbox_y2)
        .bind(frame_index)
        .execute(&self.pool)
        .await
        .map_err(|e| PersistenceError::SinkInsert(e.to_string()))?;

        Ok(())
    }
}
