use std::path::Path;

use tract_onnx::prelude::*;

use crate::error::InferenceError;
use crate::frame::Frame;
use crate::pose::{Keypoint, PoseResult};

pub trait PoseBackend: Send {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<PoseResult>, InferenceError>;
}

/// ONNX pose model, assumed to emit one `[N, 56]` row per detected person:
/// `[x1, y1, x2, y2, box_conf, kp0_x, kp0_y, kp0_conf, ..., kp16_x, kp16_y, kp16_conf]`
/// (17 keypoints * 3 + 5 box fields), the common YOLO-pose export layout.
pub struct TractPoseBackend {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    width: u32,
    height: u32,
}

const ROW_LEN: usize = 5 + 17 * 3;

impl TractPoseBackend {
    pub fn load<P: AsRef<Path>>(model_path: P, width: u32, height: u32) -> anyhow::Result<Self> {
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, height as usize, width as usize)),
            )?
            .into_optimized()?
            .into_runnable()?;

        Ok(Self { model, width, height })
    }

    fn build_input(&self, frame: &Frame) -> Result<Tensor, InferenceError> {
        if frame.width != self.width || frame.height != self.height {
            return Err(InferenceError::ShapeMismatch { width: frame.width, height: frame.height });
        }

        let width = self.width as usize;
        let height = self.height as usize;
        let pixels = &frame.data;

        let input = tract_ndarray::Array4::from_shape_fn((1, 3, height, width), |(_, c, y, x)| {
            let idx = (y * width + x) * 3 + c;
            pixels[idx] as f32 / 255.0
        });

        Ok(input.into_tensor())
    }

    fn parse_rows(data: &[f32]) -> Vec<PoseResult> {
        data.chunks(ROW_LEN)
            .filter(|row| row.len() == ROW_LEN && row[4] > 0.0)
            .map(|row| {
                let bbox = (row[0], row[1], row[2], row[3]);
                let mut keypoints = [Keypoint::zero(); 17];
                for (i, kp) in keypoints.iter_mut().enumerate() {
                    let base = 5 + i * 3;
                    *kp = Keypoint { x: row[base], y: row[base + 1], confidence: row[base + 2] };
                }
                PoseResult { bbox, keypoints }
            })
            .collect()
    }
}

impl PoseBackend for TractPoseBackend {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<PoseResult>, InferenceError> {
        let input = self.build_input(frame)?;
        let outputs = self.model.run(tvec!(input.into())).map_err(|e| InferenceError::BackendFailed {
            backend: "pose-tract",
            reason: e.to_string(),
        })?;

        let output = outputs.first().ok_or_else(|| InferenceError::BackendFailed {
            backend: "pose-tract",
            reason: "model produced no outputs".into(),
        })?;

        let view = output.to_array_view::<f32>().map_err(|e| InferenceError::BackendFailed {
            backend: "pose-tract",
            reason: e.to_string(),
        })?;
        let data = view.as_slice().ok_or_else(|| InferenceError::BackendFailed {
            backend: "pose-tract",
            reason: "output tensor not contiguous".into(),
        })?;

        Ok(Self::parse_rows(data))
    }
}

/// Deterministic, fixture-driven backend for tests: replays a preset queue
/// of pose results, one `Vec<PoseResult>` per call, repeating the last
/// entry once exhausted.
pub struct StubPoseBackend {
    fixtures: Vec<Vec<PoseResult>>,
    cursor: usize,
}

impl StubPoseBackend {
    pub fn new(fixtures: Vec<Vec<PoseResult>>) -> Self {
        Self { fixtures, cursor: 0 }
    }
}

impl PoseBackend for StubPoseBackend {
    fn detect(&mut self, _frame: &Frame) -> Result<Vec<PoseResult>, InferenceError> {
        if self.fixtures.is_empty() {
            return Ok(Vec::new());
        }
        let idx = self.cursor.min(self.fixtures.len() - 1);
        self.cursor += 1;
        Ok(self.fixtures[idx].clone())
    }
}
