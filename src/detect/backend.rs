use std::fmt;
use std::path::Path;
use std::str::FromStr;

use anyhow::anyhow;

use crate::detect::tensor::Tensor;
use crate::error::Result;

/// Inference runtime family.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendKind {
    /// Portable graph runtime (ONNX on CPU), used for desktop development.
    Portable,
    /// On-device NPU runtime.
    NativeAccelerator,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Portable => f.write_str("portable"),
            BackendKind::NativeAccelerator => f.write_str("native"),
        }
    }
}

/// NPU core affinity mask, in the native runtime's encoding.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NpuCoreMask(pub u32);

impl NpuCoreMask {
    pub const AUTO: Self = Self(0);
    pub const CORE_0: Self = Self(1);
    pub const CORE_1: Self = Self(2);
    pub const CORE_2: Self = Self(4);
    pub const CORE_0_1: Self = Self(3);
    pub const CORE_0_1_2: Self = Self(7);
    pub const ALL: Self = Self(0xffff);

    /// Check the mask against the number of cores on this device.
    pub fn validate(self, cores: u32) -> Result<(), String> {
        if self == Self::AUTO || self == Self::ALL {
            return Ok(());
        }
        if cores == 0 {
            return Err("no NPU cores detected".to_string());
        }
        let available = if cores >= 32 { u32::MAX } else { (1u32 << cores) - 1 };
        if self.0 & !available != 0 {
            return Err(format!("device has {} NPU core(s)", cores));
        }
        Ok(())
    }
}

impl fmt::Display for NpuCoreMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::AUTO => f.write_str("auto"),
            Self::ALL => f.write_str("all"),
            Self(mask) => write!(f, "{:#x}", mask),
        }
    }
}

impl FromStr for NpuCoreMask {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        let normalized = s.trim().to_ascii_lowercase();
        let mask = match normalized.as_str() {
            "auto" => Self::AUTO,
            "all" => Self::ALL,
            "0" => Self::CORE_0,
            "1" => Self::CORE_1,
            "2" => Self::CORE_2,
            "0_1" => Self::CORE_0_1,
            "0_1_2" => Self::CORE_0_1_2,
            other => {
                let raw = match other.strip_prefix("0x") {
                    Some(hex) => u32::from_str_radix(hex, 16),
                    None => other.parse::<u32>(),
                };
                Self(raw.map_err(|_| anyhow!("invalid NPU core mask '{}'", s))?)
            }
        };
        Ok(mask)
    }
}

/// Inference backend trait.
///
/// A backend owns one loaded model. Implementations must:
/// - reject `run` before `load` with `InferenceFailure`
/// - reject `run` after `release` with `HandleReleased`
/// - treat repeated `release` calls as no-ops
pub trait InferenceBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    fn kind(&self) -> BackendKind;

    /// Load a serialized model.
    fn load(&mut self, model_path: &Path) -> Result<()>;

    /// Restrict execution to a subset of accelerator cores.
    ///
    /// Portable backends accept any mask and ignore it.
    fn configure_affinity(&mut self, mask: NpuCoreMask) -> Result<()>;

    /// One forward pass.
    fn run(&mut self, input: &Tensor) -> Result<Vec<Tensor>>;

    /// Free runtime resources.
    fn release(&mut self);
}
