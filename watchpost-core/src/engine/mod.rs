//! engine — the inference boundary
//!
//! The pipeline only knows [`InferenceEngine::forward`]. [`OrtEngine`] runs an
//! exported detector with ONNX Runtime and re-shapes its named outputs into
//! the `(losses, [detections])` value the decoder expects.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use ort::session::Session;
use ort::value::TensorRef;
use tracing::{debug, info};

use crate::config::ModelConfig;
use crate::detection::{EngineTensor, EngineValue};
use crate::error::PipelineError;
use crate::staging::InputTensor;

/// Opaque detector: staged tensor in, nested output value out.
pub trait InferenceEngine: Send {
    fn forward(&mut self, input: &InputTensor<'_>) -> Result<EngineValue>;
}

impl<E: InferenceEngine + ?Sized> InferenceEngine for Box<E> {
    fn forward(&mut self, input: &InputTensor<'_>) -> Result<EngineValue> {
        (**self).forward(input)
    }
}

/// ONNX Runtime session for an exported detection model.
pub struct OrtEngine {
    session: Session,
    input_name: String,
}

impl OrtEngine {
    /// Build a session from `config.asset`. Any failure is an engine-load error.
    pub fn load(config: &ModelConfig) -> Result<Self, PipelineError> {
        let session = build_session(&config.asset).map_err(|source| PipelineError::EngineLoad {
            asset: config.asset.display().to_string(),
            source,
        })?;
        info!(
            asset = %config.asset.display(),
            input = %config.input_name,
            "loaded detection model"
        );
        Ok(Self {
            session,
            input_name: config.input_name.clone(),
        })
    }
}

impl InferenceEngine for OrtEngine {
    fn forward(&mut self, input: &InputTensor<'_>) -> Result<EngineValue> {
        let tensor = TensorRef::from_array_view((input.shape, input.data))
            .context("failed to wrap staged tensor")?;

        let outputs = self
            .session
            .run(ort::inputs![self.input_name.as_str() => tensor])
            .context("detector inference failed")?;

        let mut detections = BTreeMap::new();
        for (name, value) in outputs.iter() {
            match value.try_extract_tensor::<f32>() {
                Ok((shape, data)) => {
                    let shape = shape.iter().map(|d| (*d).max(0) as usize).collect();
                    detections.insert(
                        name.to_string(),
                        EngineValue::Tensor(EngineTensor::new(shape, data.to_vec())),
                    );
                }
                Err(e) => debug!(output = name, "skipping non-f32 output: {e}"),
            }
        }

        Ok(EngineValue::detection_output(detections))
    }
}

fn build_session(model_path: &Path) -> Result<Session> {
    anyhow::ensure!(
        model_path.is_file(),
        "model file does not exist: {}",
        model_path.display()
    );
    let mut builder = Session::builder().context("failed to create ORT session builder")?;
    builder = builder
        .with_intra_threads(1)
        .context("failed to set ORT intra threads")?;
    builder = builder
        .with_inter_threads(1)
        .context("failed to set ORT inter threads")?;
    builder
        .commit_from_file(model_path)
        .context("failed to load ONNX model")
}
