#![cfg(feature = "backend-rknn")]

//! Rockchip NPU backend.
//!
//! The RKNN runtime (`librknnrt.so`) ships with the board image rather than as a
//! crate, so it is opened at runtime. Failing to open it is what makes backend
//! selection fall back to the portable runtime.

use std::ffi::c_void;
use std::mem;
use std::os::raw::{c_char, c_int};
use std::path::{Path, PathBuf};
use std::ptr;

use anyhow::Context;
use libloading::Library;

use crate::detect::backend::{BackendKind, InferenceBackend, NpuCoreMask};
use crate::detect::tensor::Tensor;
use crate::error::{Error, Result};

const RKNN_RUNTIME_LIBRARY: &str = "librknnrt.so";
const DEVICE_TREE_COMPATIBLE: &str = "/proc/device-tree/compatible";

const RKNN_SUCC: c_int = 0;
const RKNN_QUERY_IN_OUT_NUM: c_int = 0;
const RKNN_QUERY_OUTPUT_ATTR: c_int = 2;
const RKNN_TENSOR_UINT8: c_int = 3;
const RKNN_TENSOR_NHWC: c_int = 1;
const RKNN_MAX_DIMS: usize = 16;
const RKNN_MAX_NAME_LEN: usize = 256;

type RknnContext = u64;

#[repr(C)]
#[derive(Default)]
struct RknnInputOutputNum {
    n_input: u32,
    n_output: u32,
}

#[repr(C)]
#[allow(dead_code)]
struct RknnTensorAttr {
    index: u32,
    n_dims: u32,
    dims: [u32; RKNN_MAX_DIMS],
    name: [c_char; RKNN_MAX_NAME_LEN],
    n_elems: u32,
    size: u32,
    fmt: c_int,
    tensor_type: c_int,
    qnt_type: c_int,
    fl: i8,
    zp: i32,
    scale: f32,
    w_stride: u32,
    size_with_stride: u32,
    pass_through: u8,
    h_stride: u32,
}

#[repr(C)]
#[allow(dead_code)]
struct RknnInput {
    index: u32,
    buf: *mut c_void,
    size: u32,
    pass_through: u8,
    tensor_type: c_int,
    fmt: c_int,
}

#[repr(C)]
struct RknnOutput {
    want_float: u8,
    is_prealloc: u8,
    index: u32,
    buf: *mut c_void,
    size: u32,
}

type InitFn = unsafe extern "C" fn(*mut RknnContext, *mut c_void, u32, u32, *mut c_void) -> c_int;
type DestroyFn = unsafe extern "C" fn(RknnContext) -> c_int;
type QueryFn = unsafe extern "C" fn(RknnContext, c_int, *mut c_void, u32) -> c_int;
type InputsSetFn = unsafe extern "C" fn(RknnContext, u32, *mut RknnInput) -> c_int;
type RunFn = unsafe extern "C" fn(RknnContext, *mut c_void) -> c_int;
type OutputsGetFn =
    unsafe extern "C" fn(RknnContext, u32, *mut RknnOutput, *mut c_void) -> c_int;
type OutputsReleaseFn = unsafe extern "C" fn(RknnContext, u32, *mut RknnOutput) -> c_int;
type SetCoreMaskFn = unsafe extern "C" fn(RknnContext, c_int) -> c_int;

/// Entry points resolved from the runtime library. The pointers stay valid for as
/// long as `_library` is alive.
struct RknnApi {
    init: InitFn,
    destroy: DestroyFn,
    query: QueryFn,
    inputs_set: InputsSetFn,
    run: RunFn,
    outputs_get: OutputsGetFn,
    outputs_release: OutputsReleaseFn,
    set_core_mask: Option<SetCoreMaskFn>,
    _library: Library,
}

impl RknnApi {
    fn open() -> anyhow::Result<Self> {
        // SAFETY: librknnrt has no load-time initializers with preconditions, and every
        // resolved symbol is only called through the signatures of the RKNN C API.
        unsafe {
            let library = Library::new(RKNN_RUNTIME_LIBRARY)
                .with_context(|| format!("failed to open {}", RKNN_RUNTIME_LIBRARY))?;
            let init = *library.get::<InitFn>(b"rknn_init\0")?;
            let destroy = *library.get::<DestroyFn>(b"rknn_destroy\0")?;
            let query = *library.get::<QueryFn>(b"rknn_query\0")?;
            let inputs_set = *library.get::<InputsSetFn>(b"rknn_inputs_set\0")?;
            let run = *library.get::<RunFn>(b"rknn_run\0")?;
            let outputs_get = *library.get::<OutputsGetFn>(b"rknn_outputs_get\0")?;
            let outputs_release = *library.get::<OutputsReleaseFn>(b"rknn_outputs_release\0")?;
            let set_core_mask = library
                .get::<SetCoreMaskFn>(b"rknn_set_core_mask\0")
                .ok()
                .map(|symbol| *symbol);
            Ok(Self {
                init,
                destroy,
                query,
                inputs_set,
                run,
                outputs_get,
                outputs_release,
                set_core_mask,
                _library: library,
            })
        }
    }
}

/// NPU backend driving `librknnrt.so`.
pub struct RknnBackend {
    api: RknnApi,
    cores: u32,
    context: Option<RknnContext>,
    output_dims: Vec<Vec<usize>>,
    core_mask: Option<NpuCoreMask>,
    model_path: Option<PathBuf>,
    released: bool,
}

impl RknnBackend {
    /// Open the runtime library. `cores` overrides NPU core detection.
    pub fn new(cores: Option<u32>) -> anyhow::Result<Self> {
        let api = RknnApi::open()?;
        let cores = cores.or_else(detect_npu_cores).unwrap_or(1);
        log::info!("RknnBackend: runtime loaded, {} NPU core(s)", cores);
        Ok(Self {
            api,
            cores,
            context: None,
            output_dims: Vec::new(),
            core_mask: None,
            model_path: None,
            released: false,
        })
    }

    pub fn cores(&self) -> u32 {
        self.cores
    }

    fn destroy_context(&mut self) {
        if let Some(ctx) = self.context.take() {
            // SAFETY: ctx came from a successful rknn_init and is destroyed once.
            unsafe {
                (self.api.destroy)(ctx);
            }
        }
    }

    fn apply_core_mask(&self, ctx: RknnContext, mask: NpuCoreMask) -> Result<()> {
        let Some(set_core_mask) = self.api.set_core_mask else {
            if mask == NpuCoreMask::AUTO {
                return Ok(());
            }
            return Err(Error::UnsupportedAffinity {
                mask: mask.to_string(),
                reason: "runtime does not export rknn_set_core_mask".to_string(),
            });
        };
        // SAFETY: ctx is a live context owned by this backend.
        let ret = unsafe { set_core_mask(ctx, mask.0 as c_int) };
        if ret != RKNN_SUCC {
            return Err(Error::UnsupportedAffinity {
                mask: mask.to_string(),
                reason: format!("rknn_set_core_mask returned {}", ret),
            });
        }
        Ok(())
    }

    fn query_outputs(&self, ctx: RknnContext) -> std::result::Result<Vec<Vec<usize>>, String> {
        let mut io_num = RknnInputOutputNum::default();
        // SAFETY: io_num is a properly sized, writable rknn_input_output_num.
        let ret = unsafe {
            (self.api.query)(
                ctx,
                RKNN_QUERY_IN_OUT_NUM,
                &mut io_num as *mut _ as *mut c_void,
                mem::size_of::<RknnInputOutputNum>() as u32,
            )
        };
        if ret != RKNN_SUCC {
            return Err(format!("rknn_query(IN_OUT_NUM) returned {}", ret));
        }
        if io_num.n_input != 1 {
            return Err(format!("expected one model input, found {}", io_num.n_input));
        }

        let mut dims = Vec::with_capacity(io_num.n_output as usize);
        for index in 0..io_num.n_output {
            // SAFETY: rknn_tensor_attr is plain old data; all-zero is a valid value.
            let mut attr: RknnTensorAttr = unsafe { mem::zeroed() };
            attr.index = index;
            // SAFETY: attr is a properly sized, writable rknn_tensor_attr.
            let ret = unsafe {
                (self.api.query)(
                    ctx,
                    RKNN_QUERY_OUTPUT_ATTR,
                    &mut attr as *mut _ as *mut c_void,
                    mem::size_of::<RknnTensorAttr>() as u32,
                )
            };
            if ret != RKNN_SUCC {
                return Err(format!("rknn_query(OUTPUT_ATTR {}) returned {}", index, ret));
            }
            let n_dims = (attr.n_dims as usize).min(RKNN_MAX_DIMS);
            dims.push(attr.dims[..n_dims].iter().map(|&d| d as usize).collect());
        }
        Ok(dims)
    }

    fn collect_outputs(&self, outputs: &[RknnOutput]) -> Result<Vec<Tensor>> {
        outputs
            .iter()
            .zip(&self.output_dims)
            .map(|(output, dims)| {
                if output.buf.is_null() {
                    return Err(Error::InferenceFailure(format!(
                        "output {} returned no buffer",
                        output.index
                    )));
                }
                let len = output.size as usize / mem::size_of::<f32>();
                // SAFETY: with want_float set, the runtime fills buf with `size` bytes of
                // f32 data that stays valid until rknn_outputs_release.
                let values =
                    unsafe { std::slice::from_raw_parts(output.buf as *const f32, len) }.to_vec();
                let shape = if dims.iter().product::<usize>() == len {
                    dims.clone()
                } else {
                    vec![len]
                };
                Tensor::from_f32(shape, values).map_err(|e| Error::InferenceFailure(e.to_string()))
            })
            .collect()
    }
}

impl InferenceBackend for RknnBackend {
    fn name(&self) -> &'static str {
        "rknn"
    }

    fn kind(&self) -> BackendKind {
        BackendKind::NativeAccelerator
    }

    fn load(&mut self, model_path: &Path) -> Result<()> {
        if self.released {
            return Err(Error::HandleReleased);
        }
        let mut model = std::fs::read(model_path).map_err(|e| Error::model_load(model_path, e))?;
        if model.is_empty() {
            return Err(Error::model_load(model_path, "model file is empty"));
        }
        self.destroy_context();

        let mut ctx: RknnContext = 0;
        // SAFETY: model outlives the call; rknn_init copies what it needs.
        let ret = unsafe {
            (self.api.init)(
                &mut ctx,
                model.as_mut_ptr() as *mut c_void,
                model.len() as u32,
                0,
                ptr::null_mut(),
            )
        };
        if ret != RKNN_SUCC {
            return Err(Error::model_load(
                model_path,
                format!("rknn_init returned {}", ret),
            ));
        }
        self.context = Some(ctx);

        let output_dims = match self.query_outputs(ctx) {
            Ok(dims) => dims,
            Err(reason) => {
                self.destroy_context();
                return Err(Error::model_load(model_path, reason));
            }
        };
        if let Some(mask) = self.core_mask {
            if let Err(err) = self.apply_core_mask(ctx, mask) {
                self.destroy_context();
                return Err(err);
            }
        }

        self.output_dims = output_dims;
        self.model_path = Some(model_path.to_path_buf());
        log::info!(
            "RknnBackend: loaded {} ({} output(s))",
            model_path.display(),
            self.output_dims.len()
        );
        Ok(())
    }

    fn configure_affinity(&mut self, mask: NpuCoreMask) -> Result<()> {
        mask.validate(self.cores)
            .map_err(|reason| Error::UnsupportedAffinity {
                mask: mask.to_string(),
                reason,
            })?;
        if let Some(ctx) = self.context {
            self.apply_core_mask(ctx, mask)?;
        }
        self.core_mask = Some(mask);
        Ok(())
    }

    fn run(&mut self, input: &Tensor) -> Result<Vec<Tensor>> {
        if self.released {
            return Err(Error::HandleReleased);
        }
        let ctx = self
            .context
            .ok_or_else(|| Error::InferenceFailure("no model loaded".to_string()))?;
        let pixels = input
            .as_u8()
            .ok_or_else(|| Error::InferenceFailure("native backend expects u8 input".into()))?;

        let mut rknn_input = RknnInput {
            index: 0,
            buf: pixels.as_ptr() as *mut c_void,
            size: pixels.len() as u32,
            pass_through: 0,
            tensor_type: RKNN_TENSOR_UINT8,
            fmt: RKNN_TENSOR_NHWC,
        };
        // SAFETY: the runtime only reads from buf, which outlives the call.
        let ret = unsafe { (self.api.inputs_set)(ctx, 1, &mut rknn_input) };
        if ret != RKNN_SUCC {
            return Err(Error::InferenceFailure(format!(
                "rknn_inputs_set returned {}",
                ret
            )));
        }
        // SAFETY: ctx is live and inputs were set above.
        let ret = unsafe { (self.api.run)(ctx, ptr::null_mut()) };
        if ret != RKNN_SUCC {
            return Err(Error::InferenceFailure(format!("rknn_run returned {}", ret)));
        }

        let mut outputs: Vec<RknnOutput> = (0..self.output_dims.len() as u32)
            .map(|index| RknnOutput {
                want_float: 1,
                is_prealloc: 0,
                index,
                buf: ptr::null_mut(),
                size: 0,
            })
            .collect();
        // SAFETY: outputs has one entry per model output, as queried at load time.
        let ret = unsafe {
            (self.api.outputs_get)(
                ctx,
                outputs.len() as u32,
                outputs.as_mut_ptr(),
                ptr::null_mut(),
            )
        };
        if ret != RKNN_SUCC {
            return Err(Error::InferenceFailure(format!(
                "rknn_outputs_get returned {}",
                ret
            )));
        }
        let tensors = self.collect_outputs(&outputs);
        // SAFETY: releases exactly the buffers handed out by rknn_outputs_get.
        unsafe {
            (self.api.outputs_release)(ctx, outputs.len() as u32, outputs.as_mut_ptr());
        }
        tensors
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.destroy_context();
        self.released = true;
        if let Some(path) = self.model_path.take() {
            log::info!("RknnBackend: released {}", path.display());
        }
    }
}

impl Drop for RknnBackend {
    fn drop(&mut self) {
        self.release();
    }
}

/// Number of NPU cores on this board, from the device tree.
pub fn detect_npu_cores() -> Option<u32> {
    let compatible = std::fs::read(DEVICE_TREE_COMPATIBLE).ok()?;
    npu_cores_for_compatible(&String::from_utf8_lossy(&compatible))
}

/// Map a device-tree `compatible` list to the SoC's NPU core count.
pub fn npu_cores_for_compatible(compatible: &str) -> Option<u32> {
    compatible
        .split('\0')
        .filter_map(|entry| entry.split(',').nth(1))
        .find_map(|soc| match soc.trim() {
            s if s.starts_with("rk3588") => Some(3),
            s if s.starts_with("rk3576") => Some(2),
            s if s.starts_with("rk3562") || s.starts_with("rk356") => Some(1),
            _ => None,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_soc_to_core_count() {
        assert_eq!(
            npu_cores_for_compatible("radxa,rock-5b\0rockchip,rk3588\0"),
            Some(3)
        );
        assert_eq!(
            npu_cores_for_compatible("armsom,sige5\0rockchip,rk3576\0"),
            Some(2)
        );
        assert_eq!(npu_cores_for_compatible("rockchip,rk3566\0"), Some(1));
        assert_eq!(npu_cores_for_compatible("raspberrypi,4-model-b\0brcm,bcm2711\0"), None);
    }
}
