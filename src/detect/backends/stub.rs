use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::detect::backend::{BackendKind, InferenceBackend, NpuCoreMask};
use crate::detect::tensor::Tensor;
use crate::error::{Error, Result};

/// Stub backend for testing. Returns a fixed set of output tensors.
///
/// Follows the same lifecycle rules as a real runtime, so pipeline and handle
/// behavior can be exercised without a model file.
pub struct StubBackend {
    kind: BackendKind,
    outputs: Vec<Tensor>,
    cores: Option<u32>,
    fail_load: bool,
    runs: Arc<AtomicUsize>,
    loaded: Option<PathBuf>,
    mask: Option<NpuCoreMask>,
    released: bool,
}

impl StubBackend {
    pub fn new(kind: BackendKind) -> Self {
        Self {
            kind,
            outputs: Vec::new(),
            cores: None,
            fail_load: false,
            runs: Arc::new(AtomicUsize::new(0)),
            loaded: None,
            mask: None,
            released: false,
        }
    }

    /// Tensors returned by every `run`.
    pub fn with_outputs(mut self, outputs: Vec<Tensor>) -> Self {
        self.outputs = outputs;
        self
    }

    /// Pretend to be an accelerator with `cores` cores.
    pub fn with_cores(mut self, cores: u32) -> Self {
        self.cores = Some(cores);
        self
    }

    pub fn failing_load(mut self) -> Self {
        self.fail_load = true;
        self
    }

    /// Shared counter of completed `run` calls.
    pub fn run_counter(&self) -> Arc<AtomicUsize> {
        self.runs.clone()
    }

    pub fn core_mask(&self) -> Option<NpuCoreMask> {
        self.mask
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::new(BackendKind::Portable)
    }
}

impl InferenceBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn load(&mut self, model_path: &Path) -> Result<()> {
        if self.released {
            return Err(Error::HandleReleased);
        }
        if self.fail_load {
            return Err(Error::model_load(model_path, "stub configured to fail"));
        }
        self.loaded = Some(model_path.to_path_buf());
        Ok(())
    }

    fn configure_affinity(&mut self, mask: NpuCoreMask) -> Result<()> {
        if let Some(cores) = self.cores {
            mask.validate(cores)
                .map_err(|reason| Error::UnsupportedAffinity {
                    mask: mask.to_string(),
                    reason,
                })?;
        }
        self.mask = Some(mask);
        Ok(())
    }

    fn run(&mut self, _input: &Tensor) -> Result<Vec<Tensor>> {
        if self.released {
            return Err(Error::HandleReleased);
        }
        if self.loaded.is_none() {
            return Err(Error::InferenceFailure("no model loaded".to_string()));
        }
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(self.outputs.clone())
    }

    fn release(&mut self) {
        self.loaded = None;
        self.released = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enforces_load_and_release_order() -> anyhow::Result<()> {
        let input = Tensor::from_u8(vec![1, 1, 1, 3], vec![0; 3])?;
        let mut backend = StubBackend::default()
            .with_outputs(vec![Tensor::from_f32(vec![2], vec![0.5, 1.5])?]);
        let runs = backend.run_counter();

        assert!(matches!(backend.run(&input), Err(Error::InferenceFailure(_))));
        backend.load(Path::new("model.onnx"))?;
        assert_eq!(backend.run(&input)?.len(), 1);
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        backend.release();
        backend.release();
        assert!(matches!(backend.run(&input), Err(Error::HandleReleased)));
        Ok(())
    }

    #[test]
    fn rejects_mask_beyond_core_count() {
        let mut backend = StubBackend::new(BackendKind::NativeAccelerator).with_cores(2);
        assert!(backend.configure_affinity(NpuCoreMask::CORE_0_1).is_ok());
        assert!(matches!(
            backend.configure_affinity(NpuCoreMask::CORE_0_1_2),
            Err(Error::UnsupportedAffinity { .. })
        ));
    }
}
