//! Per-camera configuration: loaded once at worker start from an on-disk
//! TOML file and then treated as an immutable snapshot for the worker's
//! lifetime. Reloading means restarting the worker, never mutating this
//! struct in place.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::zone::CashierZone;

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraConfig {
    pub camera_id: String,
    pub camera_name: String,
    pub rtsp_url: String,

    #[serde(default = "default_true")]
    pub enable_cash: bool,
    #[serde(default = "default_true")]
    pub enable_violence: bool,
    #[serde(default = "default_true")]
    pub enable_fire: bool,

    pub cashier_zone: CashierZone,

    #[serde(default)]
    pub detectors: DetectorThresholds,

    #[serde(default)]
    pub models: ModelPaths,

    /// Media root; clips/thumbnails/json sidecars are written under
    /// `<media_root>/{clips,thumbnails,json}/`.
    pub media_root: PathBuf,

    /// Optional CPU core to pin this worker's blocking task to.
    /// When absent, the supervisor picks `camera_id_hash % cpu_count`.
    #[serde(default)]
    pub cpu_affinity: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorThresholds {
    pub hand_touch_distance_px: u32,
    pub pose_confidence_floor: f32,

    pub cash_confidence: f32,
    pub min_transaction_frames: u32,
    pub cash_cooldown_frames: u32,

    pub violence_confidence: f32,
    pub min_violence_frames: u32,
    pub violence_cooldown_frames: u32,
    pub motion_threshold: f32,

    pub fire_confidence: f32,
    pub min_fire_frames: u32,
    pub fire_cooldown_frames: u32,
    pub fire_flicker_floor: f32,
}

impl Default for DetectorThresholds {
    fn default() -> Self {
        Self {
            hand_touch_distance_px: 100,
            pose_confidence_floor: 0.3,
            cash_confidence: 0.5,
            min_transaction_frames: 3,
            cash_cooldown_frames: 150,
            violence_confidence: 0.6,
            min_violence_frames: 15,
            violence_cooldown_frames: 90,
            motion_threshold: 100.0,
            fire_confidence: 0.5,
            min_fire_frames: 10,
            fire_cooldown_frames: 300,
            fire_flicker_floor: 0.4,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelPaths {
    pub pose_model: Option<PathBuf>,
    pub fire_object_model: Option<PathBuf>,
}

impl CameraConfig {
    /// Load and validate a single camera's config from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        let raw = config::Config::builder()
            .add_source(config::File::from(path))
            .build()
            .map_err(|source| ConfigError::Invalid {
                path: path.to_path_buf(),
                source: Box::new(source),
            })?;

        let cfg: CameraConfig = raw.try_deserialize().map_err(|source| ConfigError::Invalid {
            path: path.to_path_buf(),
            source: Box::new(source),
        })?;

        cfg.validate()?;
        Ok(cfg)
    }

    /// Load a fleet of camera configs from a directory of `*.toml` files.
    pub fn load_fleet(dir: impl AsRef<Path>) -> Result<Vec<Self>, ConfigError> {
        let dir = dir.as_ref();
        let entries = std::fs::read_dir(dir).map_err(|source| ConfigError::Unreadable {
            path: dir.to_path_buf(),
            source,
        })?;

        let mut configs = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| ConfigError::Unreadable {
                path: dir.to_path_buf(),
                source,
            })?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("toml") {
                configs.push(Self::load(&path)?);
            }
        }
        Ok(configs)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.camera_id.trim().is_empty() {
            return Err(ConfigError::Validation("camera_id must not be empty".into()));
        }
        if !self.rtsp_url.starts_with("rtsp://") && !self.rtsp_url.starts_with("rtsps://") {
            return Err(ConfigError::Validation(format!(
                "rtsp_url {:?} must use rtsp:// or rtsps://",
                self.rtsp_url
            )));
        }
        if self.cashier_zone.is_empty() {
            return Err(ConfigError::Validation("cashier_zone must not be empty".into()));
        }

        let t = &self.detectors;
        for (name, v) in [
            ("pose_confidence_floor", t.pose_confidence_floor),
            ("cash_confidence", t.cash_confidence),
            ("violence_confidence", t.violence_confidence),
            ("fire_confidence", t.fire_confidence),
            ("fire_flicker_floor", t.fire_flicker_floor),
        ] {
            if !(0.0..=1.0).contains(&v) {
                return Err(ConfigError::Validation(format!(
                    "{name} must be within [0,1], got {v}"
                )));
            }
        }
        for (name, v) in [
            ("min_transaction_frames", t.min_transaction_frames),
            ("min_violence_frames", t.min_violence_frames),
            ("min_fire_frames", t.min_fire_frames),
        ] {
            if v < 1 {
                return Err(ConfigError::Validation(format!("{name} must be >= 1, got {v}")));
            }
        }

        if self.enable_cash || self.enable_violence {
            if self.models.pose_model.is_none() {
                return Err(ConfigError::Validation(
                    "pose_model is required when cash or violence detection is enabled".into(),
                ));
            }
        }
        if self.enable_fire && self.models.fire_object_model.is_none() {
            // Fire detection can still run on the color-flicker fallback alone,
            // so a missing object model is not fatal here.
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zone::CashierZone;

    fn base_config() -> CameraConfig {
        CameraConfig {
            camera_id: "cam-1".into(),
            camera_name: "Register 1".into(),
            rtsp_url: "rtsp://127.0.0.1/stream".into(),
            enable_cash: true,
            enable_violence: true,
            enable_fire: true,
            cashier_zone: CashierZone::Rect { x1: 0.0, y1: 0.0, x2: 640.0, y2: 480.0 },
            detectors: DetectorThresholds::default(),
            models: ModelPaths {
                pose_model: Some(PathBuf::from("pose.onnx")),
                fire_object_model: Some(PathBuf::from("fire.onnx")),
            },
            media_root: PathBuf::from("/tmp/media"),
            cpu_affinity: None,
        }
    }

    #[test]
    fn rejects_non_rtsp_url() {
        let mut cfg = base_config();
        cfg.rtsp_url = "http://example.com".into();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_empty_zone() {
        let mut cfg = base_config();
        cfg.cashier_zone = CashierZone::Polygon { vertices: vec![] };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_out_of_range_confidence() {
        let mut cfg = base_config();
        cfg.detectors.cash_confidence = 1.5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn accepts_valid_config() {
        assert!(base_config().validate().is_ok());
    }
}
