use std::path::Path;

use tract_onnx::prelude::*;

use crate::error::InferenceError;
use crate::frame::Frame;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireLabel {
    Fire,
    Smoke,
    Other,
}

#[derive(Debug, Clone, Copy)]
pub struct FireBox {
    pub bbox: (f32, f32, f32, f32),
    pub label: FireLabel,
    pub confidence: f32,
}

pub trait FireObjectBackend: Send {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<FireBox>, InferenceError>;
}

/// ONNX object detector assumed to emit `[N, 6]` rows of
/// `[x1, y1, x2, y2, confidence, class_id]` with class 0 = fire, 1 = smoke.
pub struct TractFireBackend {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    width: u32,
    height: u32,
}

impl TractFireBackend {
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

    fn label_for(class_id: i64) -> FireLabel {
        match class_id {
            0 => FireLabel::Fire,
            1 => FireLabel::Smoke,
            _ => FireLabel::Other,
        }
    }
}

impl FireObjectBackend for TractFireBackend {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<FireBox>, InferenceError> {
        let input = self.build_input(frame)?;
        let outputs = self.model.run(tvec!(input.into())).map_err(|e| InferenceError::BackendFailed {
            backend: "fire-tract",
            reason: e.to_string(),
        })?;

        let output = outputs.first().ok_or_else(|| InferenceError::BackendFailed {
            backend: "fire-tract",
            reason: "model produced no outputs".into(),
        })?;

        let view = output.to_array_view::<f32>().map_err(|e| InferenceError::BackendFailed {
            backend: "fire-tract",
            reason: e.to_string(),
        })?;
        let data = view.as_slice().ok_or_else(|| InferenceError::BackendFailed {
            backend: "fire-tract",
            reason: "output tensor not contiguous".into(),
        })?;

        let boxes = data
            .chunks(6)
            .filter(|row| row.len() == 6)
            .map(|row| FireBox {
                bbox: (row[0], row[1], row[2], row[3]),
                confidence: row[4],
                label: Self::label_for(row[5].round() as i64),
            })
            .collect();

        Ok(boxes)
    }
}

/// Deterministic fixture-driven backend for tests.
pub struct StubFireBackend {
    fixtures: Vec<Vec<FireBox>>,
    cursor: usize,
}

impl StubFireBackend {
    pub fn new(fixtures: Vec<Vec<FireBox>>) -> Self {
        Self { fixtures, cursor: 0 }
    }
}

impl FireObjectBackend for StubFireBackend {
    fn detect(&mut self, _frame: &Frame) -> Result<Vec<FireBox>, InferenceError> {
        if self.fixtures.is_empty() {
            return Ok(Vec::new());
        }
        let idx = self.cursor.min(self.fixtures.len() - 1);
        self.cursor += 1;
        Ok(self.fixtures[idx].clone())
    }
}
