//! Event persistence (C8): compose a clip, thumbnail, and JSON sidecar
//! from a buffer snapshot, then hand the resulting paths to an `EventSink`.
//! The clip/thumbnail steps are grounded on the teacher's `save_clip` and
//! `generate_thumbnail` in `video_clip.rs`; the sidecar and sink-insert
//! ordering follow the design's "clip on disk before the Event record
//! exists" rule.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use image::{ImageBuffer, Rgb};
use serde::Serialize;
use tracing::{error, warn};

use crate::buffer::BufferSnapshot;
use crate::detect::Detection;
use crate::error::PersistenceError;
use crate::event::{Event, EventSink};

const THUMBNAIL_WIDTH: u32 = 320;
const THUMBNAIL_HEIGHT: u32 = 240;
const ENCODE_TIMEOUT_SECS: u64 = 20;

#[derive(Debug, Serialize)]
struct Sidecar<'a> {
    timestamp: DateTime<Utc>,
    frame_number: u64,
    confidence: f32,
    bbox: Option<(f32, f32, f32, f32)>,
    camera_id: &'a str,
    camera_name: &'a str,
    event_type: &'a str,
    clip_path: String,
    thumbnail_path: String,
    trigger_time: DateTime<Utc>,
    frames_saved: usize,
    duration_sec: f64,
    #[serde(flatten)]
    detection: serde_json::Value,
}

pub struct ClipWriter {
    media_root: PathBuf,
}

impl ClipWriter {
    pub fn new(media_root: PathBuf) -> Self {
        Self { media_root }
    }

    fn base_name(&self, event_type: &str, camera_id: &str, captured_at: DateTime<Utc>) -> String {
        format!("{}_{}_{}", event_type, camera_id, captured_at.format("%Y%m%d_%H%M%S"))
    }

    fn ensure_dir(&self, sub: &str) -> Result<PathBuf, PersistenceError> {
        let dir = self.media_root.join(sub);
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Encodes the snapshot's raw frames into an H.264 MP4 via an
    /// `appsrc ! videoconvert ! x264enc ! mp4mux ! filesink` pipeline, one
    /// buffer per frame, assuming a nominal 30fps source rate.
    fn write_clip(
        &self,
        event_type: &str,
        camera_id: &str,
        captured_at: DateTime<Utc>,
        snapshot: &BufferSnapshot,
    ) -> Result<PathBuf, PersistenceError> {
        let frames = if snapshot.annotated.is_empty() { &snapshot.raw } else { &snapshot.annotated };
        let Some(first) = frames.first() else {
            return Err(PersistenceError::EmptyBuffer);
        };

        let dir = self.ensure_dir("clips")?;
        let path = dir.join(format!("{}.mp4", self.base_name(event_type, camera_id, captured_at)));
        let fps = 30u64;

        let pipeline_str = format!(
            "appsrc name=src is-live=true format=time caps=video/x-raw,format=RGB,width={},height={},framerate={}/1 ! \
             videoconvert ! x264enc speed-preset=ultrafast tune=zerolatency ! mp4mux faststart=true ! \
             filesink location={}",
            first.width,
            first.height,
            fps,
            path.to_string_lossy(),
        );

        let encode = |pipeline_str: &str, path: &Path| -> Result<(), PersistenceError> {
            let pipeline = gst::parse::launch(pipeline_str).map_err(|e| PersistenceError::ClipEncode {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
            let pipeline = pipeline.downcast::<gst::Pipeline>().map_err(|_| PersistenceError::ClipEncode {
                path: path.to_path_buf(),
                reason: "not a pipeline".into(),
            })?;

            let appsrc = pipeline
                .by_name("src")
                .and_then(|e| e.dynamic_cast::<gst_app::AppSrc>().ok())
                .ok_or_else(|| PersistenceError::ClipEncode {
                    path: path.to_path_buf(),
                    reason: "missing appsrc".into(),
                })?;

            pipeline.set_state(gst::State::Playing).map_err(|e| PersistenceError::ClipEncode {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

            for (i, frame) in frames.iter().enumerate() {
                let mut buffer = gst::Buffer::from_mut_slice(frame.data.clone());
                {
                    let buffer_ref = buffer.get_mut().unwrap();
                    let pts = gst::ClockTime::from_nseconds((i as u64 * 1_000_000_000) / fps);
                    buffer_ref.set_pts(Some(pts));
                    buffer_ref.set_duration(Some(gst::ClockTime::from_nseconds(1_000_000_000 / fps)));
                }
                appsrc.push_buffer(buffer).map_err(|e| PersistenceError::ClipEncode {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                })?;
            }
            appsrc.end_of_stream().ok();

            if let Some(bus) = pipeline.bus() {
                for msg in bus.iter_timed(gst::ClockTime::from_seconds(ENCODE_TIMEOUT_SECS)) {
                    use gst::MessageView;
                    match msg.view() {
                        MessageView::Eos(..) => break,
                        MessageView::Error(err) => {
                            let _ = pipeline.set_state(gst::State::Null);
                            return Err(PersistenceError::ClipEncode {
                                path: path.to_path_buf(),
                                reason: err.error().to_string(),
                            });
                        }
                        _ => {}
                    }
                }
            }

            let _ = pipeline.set_state(gst::State::Null);
            Ok(())
        };

        encode(&pipeline_str, &path)?;
        Ok(path)
    }

    fn write_thumbnail(
        &self,
        event_type: &str,
        camera_id: &str,
        captured_at: DateTime<Utc>,
        snapshot: &BufferSnapshot,
    ) -> Result<PathBuf, PersistenceError> {
        let frames = if snapshot.annotated.is_empty() { &snapshot.raw } else { &snapshot.annotated };
        let Some(last) = frames.last() else {
            return Err(PersistenceError::EmptyBuffer);
        };

        let dir = self.ensure_dir("thumbnails")?;
        let path = dir.join(format!("{}.jpg", self.base_name(event_type, camera_id, captured_at)));

        let img = ImageBuffer::<Rgb<u8>, Vec<u8>>::from_raw(last.width, last.height, last.data.clone())
            .ok_or_else(|| PersistenceError::Thumbnail {
                path: path.clone(),
                source: image::ImageError::Parameter(image::error::ParameterError::from_kind(
                    image::error::ParameterErrorKind::DimensionMismatch,
                )),
            })?;

        let thumbnail = image::imageops::thumbnail(&img, THUMBNAIL_WIDTH, THUMBNAIL_HEIGHT);
        thumbnail
            .save(&path)
            .map_err(|source| PersistenceError::Thumbnail { path: path.clone(), source })?;

        Ok(path)
    }

    fn write_sidecar(
        &self,
        detection: &Detection,
        camera_id: &str,
        camera_name: &str,
        captured_at: DateTime<Utc>,
        clip_path: &Path,
        thumbnail_path: &Path,
        frames_saved: usize,
        duration_sec: f64,
    ) -> Result<PathBuf, PersistenceError> {
        let dir = self.ensure_dir("json")?;
        let path = dir.join(format!(
            "{}.json",
            self.base_name(detection.event_type(), camera_id, captured_at)
        ));

        let detection_json = serde_json::to_value(&detection.kind)
            .map_err(|source| PersistenceError::Sidecar { path: path.clone(), source })?;

        let sidecar = Sidecar {
            timestamp: captured_at,
            frame_number: detection.frame_index,
            confidence: detection.confidence,
            bbox: detection.bbox,
            camera_id,
            camera_name,
            event_type: detection.event_type(),
            clip_path: clip_path.to_string_lossy().to_string(),
            thumbnail_path: thumbnail_path.to_string_lossy().to_string(),
            trigger_time: captured_at,
            frames_saved,
            duration_sec,
            detection: detection_json,
        };

        let file = std::fs::File::create(&path)?;
        serde_json::to_writer_pretty(file, &sidecar)
            .map_err(|source| PersistenceError::Sidecar { path: path.clone(), source })?;

        Ok(path)
    }
}

/// Runs the full C8 persist operation: clip, thumbnail, sidecar, then the
/// sink insert. The clip must exist on disk before the Event record is
/// written; a sink failure is logged but never unwinds — the artefacts
/// stay on disk for reconciliation.
pub async fn persist(
    writer: &ClipWriter,
    sink: &dyn EventSink,
    detection: &Detection,
    camera_id: &str,
    camera_name: &str,
    captured_at: DateTime<Utc>,
    snapshot: &BufferSnapshot,
) -> Result<Event, PersistenceError> {
    let event_type = detection.event_type();

    let clip_path = writer.write_clip(event_type, camera_id, captured_at, snapshot)?;
    let thumbnail_path = writer.write_thumbnail(event_type, camera_id, captured_at, snapshot)?;

    let frames_saved = snapshot.raw.len().max(snapshot.annotated.len());
    let duration_sec = frames_saved as f64 / 30.0;

    let sidecar_path = writer.write_sidecar(
        detection,
        camera_id,
        camera_name,
        captured_at,
        &clip_path,
        &thumbnail_path,
        frames_saved,
        duration_sec,
    )?;

    let event = Event::new(
        camera_id,
        event_type,
        detection.confidence,
        captured_at,
        clip_path,
        thumbnail_path,
        sidecar_path,
        detection.bbox,
        Some(detection.frame_index),
    );

    if let Err(e) = sink.record_event(&event).await {
        warn!(camera_id, event_type, error = %e, "event sink insert failed, artefacts retained on disk");
        error!(clip = %event.clip_path.display(), "retained for reconciliation");
    }

    Ok(event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{CashMetadata, DetectionKind};
    use crate::event::NullSink;
    use crate::zone::CashierZone;

    fn sample_detection() -> Detection {
        let metadata = CashMetadata {
            cashier: dummy_party(),
            customer: dummy_party(),
            measured_hand_distance: 42.0,
            distance_threshold: 100,
            interaction_point: [1.0, 2.0],
            people_count: 2,
            cash_detection: crate::detect::cash::CashDetectionConfig {
                hand_touch_distance_threshold: 100,
                cashier_zone: CashierZone::Rect { x1: 0.0, y1: 0.0, x2: 1.0, y2: 1.0 }.to_json(),
                pose_confidence: 0.3,
            },
        };
        Detection { kind: DetectionKind::Cash(metadata), confidence: 0.9, bbox: None, frame_index: 7 }
    }

    fn dummy_party() -> crate::detect::cash::PartyMetadata {
        crate::detect::cash::PartyMetadata {
            center: [0.0, 0.0],
            bbox: [0.0, 0.0, 1.0, 1.0],
            hands: crate::detect::cash::HandPair {
                left: crate::detect::cash::Hand { x: 0.0, y: 0.0, conf: 0.9 },
                right: crate::detect::cash::Hand { x: 0.0, y: 0.0, conf: 0.9 },
            },
            in_zone: true,
            hand_used: "left",
        }
    }

    #[tokio::test]
    async fn persist_fails_cleanly_on_empty_buffer() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ClipWriter::new(dir.path().to_path_buf());
        let snapshot = BufferSnapshot { raw: Vec::new(), annotated: Vec::new() };
        let detection = sample_detection();

        let result =
            persist(&writer, &NullSink, &detection, "cam-1", "Register 1", Utc::now(), &snapshot).await;
        assert!(matches!(result, Err(PersistenceError::EmptyBuffer)));
    }

    #[test]
    fn sidecar_round_trips_through_serde_json() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ClipWriter::new(dir.path().to_path_buf());
        let detection = sample_detection();

        let path = writer
            .write_sidecar(&detection, "cam-1", "Register 1", Utc::now(), Path::new("clip.mp4"), Path::new("thumb.jpg"), 10, 0.5)
            .unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["camera_id"], "cam-1");
        assert_eq!(value["event_type"], "cash");
    }
}
