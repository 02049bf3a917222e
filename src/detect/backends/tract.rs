#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context};
use tract_onnx::prelude::*;

use crate::detect::backend::{BackendKind, InferenceBackend, NpuCoreMask};
use crate::detect::tensor::Tensor as InputTensor;
use crate::error::{Error, Result};

type Plan = TypedRunnableModel<TypedModel>;

/// Tract-based backend for ONNX inference.
///
/// Consumes `u8` NHWC RGB input and feeds the model NCHW `f32` scaled to `[0, 1]`.
/// Has no notion of accelerator cores; affinity requests are ignored.
pub struct TractBackend {
    input_width: u32,
    input_height: u32,
    model: Option<Plan>,
    released: bool,
}

impl TractBackend {
    /// Prepare a backend for a model with a fixed `input_width` x `input_height` input.
    pub fn new(input_width: u32, input_height: u32) -> Self {
        Self {
            input_width,
            input_height,
            model: None,
            released: false,
        }
    }

    fn build_model(&self, model_path: &Path) -> anyhow::Result<Plan> {
        tract_onnx::onnx()
            .model_for_path(model_path)
            .context("failed to parse ONNX model")?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(
                        1,
                        3,
                        self.input_height as usize,
                        self.input_width as usize
                    ),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")
    }

    fn build_input(&self, input: &InputTensor) -> anyhow::Result<Tensor> {
        let (height, width) = (self.input_height as usize, self.input_width as usize);
        if input.shape() != [1, height, width, 3] {
            return Err(anyhow!(
                "input shape {:?} does not match model input [1, {}, {}, 3]",
                input.shape(),
                height,
                width
            ));
        }
        let pixels = input
            .as_u8()
            .ok_or_else(|| anyhow!("portable backend expects u8 input"))?;

        let nchw = tract_ndarray::Array4::from_shape_fn((1, 3, height, width), |(_, c, y, x)| {
            pixels[(y * width + x) * 3 + c] as f32 / 255.0
        });
        Ok(nchw.into_tensor())
    }

    fn convert_outputs(outputs: TVec<TValue>) -> anyhow::Result<Vec<InputTensor>> {
        outputs
            .into_iter()
            .map(|value| {
                let as_f32 = value
                    .cast_to::<f32>()
                    .context("model output tensor is not castable to f32")?;
                let view = as_f32.to_array_view::<f32>()?;
                InputTensor::from_f32(view.shape().to_vec(), view.iter().copied().collect())
            })
            .collect()
    }
}

impl InferenceBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Portable
    }

    fn load(&mut self, model_path: &Path) -> Result<()> {
        if self.released {
            return Err(Error::HandleReleased);
        }
        let model = self
            .build_model(model_path)
            .map_err(|e| Error::model_load(model_path, format!("{:#}", e)))?;
        self.model = Some(model);
        log::info!(
            "TractBackend: loaded {} ({}x{})",
            model_path.display(),
            self.input_width,
            self.input_height
        );
        Ok(())
    }

    fn configure_affinity(&mut self, mask: NpuCoreMask) -> Result<()> {
        log::debug!("TractBackend: ignoring core mask {}", mask);
        Ok(())
    }

    fn run(&mut self, input: &InputTensor) -> Result<Vec<InputTensor>> {
        if self.released {
            return Err(Error::HandleReleased);
        }
        let model = self
            .model
            .as_ref()
            .ok_or_else(|| Error::InferenceFailure("no model loaded".to_string()))?;
        let tensor = self
            .build_input(input)
            .map_err(|e| Error::InferenceFailure(format!("{:#}", e)))?;
        let outputs = model
            .run(tvec!(tensor.into()))
            .map_err(|e| Error::InferenceFailure(format!("ONNX inference failed: {:#}", e)))?;
        Self::convert_outputs(outputs).map_err(|e| Error::InferenceFailure(format!("{:#}", e)))
    }

    fn release(&mut self) {
        self.model = None;
        self.released = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_model_is_load_failure() {
        let mut backend = TractBackend::new(64, 64);
        let err = backend
            .load(Path::new("/nonexistent/fallwatch/model.onnx"))
            .unwrap_err();
        assert!(matches!(err, Error::ModelLoadFailure { .. }));
    }

    #[test]
    fn run_before_load_fails_and_release_is_idempotent() {
        let mut backend = TractBackend::new(2, 2);
        let input = InputTensor::from_u8(vec![1, 2, 2, 3], vec![0; 12]).unwrap();
        assert!(matches!(
            backend.run(&input),
            Err(Error::InferenceFailure(_))
        ));

        backend.release();
        backend.release();
        assert!(matches!(backend.run(&input), Err(Error::HandleReleased)));
    }

    #[test]
    fn affinity_is_a_no_op() {
        let mut backend = TractBackend::new(2, 2);
        assert!(backend.configure_affinity(NpuCoreMask(0xdead)).is_ok());
    }
}
