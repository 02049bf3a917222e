//! Backend selection and the loaded-model handle.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::anyhow;

use crate::detect::backend::{BackendKind, InferenceBackend, NpuCoreMask};
use crate::detect::tensor::Tensor;
use crate::error::{Error, Result};

pub const DEFAULT_INPUT_SIZE: u32 = 640;

/// Which runtime family to use.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendSelection {
    /// Native runtime when it can be loaded, otherwise portable.
    Auto,
    Native,
    Portable,
}

impl BackendSelection {
    /// Default selection for a model artifact: `.rknn` prefers the NPU, `.onnx`
    /// is portable, anything else is not a model this crate can run.
    pub fn from_model_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        match ext.as_deref() {
            Some("rknn") => Ok(BackendSelection::Auto),
            Some("onnx") => Ok(BackendSelection::Portable),
            _ => Err(Error::model_load(
                path,
                "unsupported model format (expected .onnx or .rknn)",
            )),
        }
    }
}

impl fmt::Display for BackendSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendSelection::Auto => f.write_str("auto"),
            BackendSelection::Native => f.write_str("native"),
            BackendSelection::Portable => f.write_str("portable"),
        }
    }
}

impl FromStr for BackendSelection {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(BackendSelection::Auto),
            "native" | "rknn" | "npu" => Ok(BackendSelection::Native),
            "portable" | "onnx" | "tract" => Ok(BackendSelection::Portable),
            other => Err(anyhow!(
                "unknown backend '{}' (expected auto, native or portable)",
                other
            )),
        }
    }
}

/// Everything needed to open a [`DetectorHandle`].
#[derive(Clone, Debug, PartialEq)]
pub struct ModelSettings {
    pub path: PathBuf,
    /// Explicit runtime choice; inferred from the file extension when unset.
    pub backend: Option<BackendSelection>,
    pub core_mask: Option<NpuCoreMask>,
    /// NPU core count override; detected from the device tree when unset.
    pub npu_cores: Option<u32>,
    pub input_width: u32,
    pub input_height: u32,
}

impl ModelSettings {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            backend: None,
            core_mask: None,
            npu_cores: None,
            input_width: DEFAULT_INPUT_SIZE,
            input_height: DEFAULT_INPUT_SIZE,
        }
    }

    pub fn selection(&self) -> Result<BackendSelection> {
        match self.backend {
            Some(selection) => Ok(selection),
            None => BackendSelection::from_model_path(&self.path),
        }
    }
}

/// Construct a backend for `selection`. `Auto` tries `native` first and falls back
/// to `portable` when the native runtime cannot be created.
pub fn select_with<N, P>(selection: BackendSelection, native: N, portable: P) -> Result<Box<dyn InferenceBackend>>
where
    N: FnOnce() -> Result<Box<dyn InferenceBackend>>,
    P: FnOnce() -> Result<Box<dyn InferenceBackend>>,
{
    match selection {
        BackendSelection::Native => native(),
        BackendSelection::Portable => portable(),
        BackendSelection::Auto => match native() {
            Ok(backend) => Ok(backend),
            Err(err) => {
                log::warn!("native runtime unavailable ({}); falling back to portable", err);
                portable()
            }
        },
    }
}

/// Construct the backend for `selection` using the runtimes compiled into this build.
pub fn select_backend(selection: BackendSelection, settings: &ModelSettings) -> Result<Box<dyn InferenceBackend>> {
    select_with(
        selection,
        || native_backend(settings),
        || portable_backend(settings),
    )
}

#[cfg(feature = "backend-rknn")]
fn native_backend(settings: &ModelSettings) -> Result<Box<dyn InferenceBackend>> {
    let backend = crate::detect::backends::RknnBackend::new(settings.npu_cores)
        .map_err(|e| Error::model_load(&settings.path, format!("{:#}", e)))?;
    Ok(Box::new(backend))
}

#[cfg(not(feature = "backend-rknn"))]
fn native_backend(settings: &ModelSettings) -> Result<Box<dyn InferenceBackend>> {
    Err(Error::model_load(
        &settings.path,
        "native backend not compiled in (enable feature backend-rknn)",
    ))
}

#[cfg(feature = "backend-tract")]
fn portable_backend(settings: &ModelSettings) -> Result<Box<dyn InferenceBackend>> {
    Ok(Box::new(crate::detect::backends::TractBackend::new(
        settings.input_width,
        settings.input_height,
    )))
}

#[cfg(not(feature = "backend-tract"))]
fn portable_backend(settings: &ModelSettings) -> Result<Box<dyn InferenceBackend>> {
    Err(Error::model_load(
        &settings.path,
        "portable backend not compiled in (enable feature backend-tract)",
    ))
}

/// After falling back from an `.rknn` model, use the `.onnx` export next to it
/// when one exists.
fn model_path_for(kind: BackendKind, path: &Path) -> PathBuf {
    let is_rknn = path
        .extension()
        .and_then(|e| e.to_str())
        .map_or(false, |e| e.eq_ignore_ascii_case("rknn"));
    if kind == BackendKind::Portable && is_rknn {
        let onnx = path.with_extension("onnx");
        if onnx.is_file() {
            log::info!("using portable model {}", onnx.display());
            return onnx;
        }
    }
    path.to_path_buf()
}

/// A loaded model bound to one backend.
///
/// The backend is chosen once, at construction. After [`DetectorHandle::release`]
/// every inference call fails with [`Error::HandleReleased`].
pub struct DetectorHandle {
    backend: Box<dyn InferenceBackend>,
    kind: BackendKind,
    model_path: PathBuf,
    affinity: Option<NpuCoreMask>,
    released: bool,
}

impl DetectorHandle {
    pub fn open(settings: &ModelSettings) -> Result<Self> {
        let selection = settings.selection()?;
        let backend = select_backend(selection, settings)?;
        let model_path = model_path_for(backend.kind(), &settings.path);
        Self::from_backend(backend, &model_path, settings.core_mask)
    }

    /// Bind an already constructed backend: apply the affinity hint, then load.
    pub fn from_backend(
        mut backend: Box<dyn InferenceBackend>,
        model_path: &Path,
        affinity: Option<NpuCoreMask>,
    ) -> Result<Self> {
        if let Some(mask) = affinity {
            backend.configure_affinity(mask)?;
        }
        backend.load(model_path)?;
        let kind = backend.kind();
        log::info!(
            "DetectorHandle: {} backend ({}) loaded {}",
            kind,
            backend.name(),
            model_path.display()
        );
        Ok(Self {
            backend,
            kind,
            model_path: model_path.to_path_buf(),
            affinity,
            released: false,
        })
    }

    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    pub fn affinity(&self) -> Option<NpuCoreMask> {
        self.affinity
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    pub fn run(&mut self, input: &Tensor) -> Result<Vec<Tensor>> {
        if self.released {
            return Err(Error::HandleReleased);
        }
        self.backend.run(input)
    }

    /// Free the backend. Safe to call more than once.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.backend.release();
        self.released = true;
        log::info!("DetectorHandle: released {}", self.model_path.display());
    }
}

impl Drop for DetectorHandle {
    fn drop(&mut self) {
        self.release();
    }
}
