pub mod stub;

#[cfg(feature = "backend-rknn")]
pub mod rknn;
#[cfg(feature = "backend-tract")]
pub mod tract;

pub use stub::StubBackend;

#[cfg(feature = "backend-rknn")]
pub use rknn::{detect_npu_cores, RknnBackend};
#[cfg(feature = "backend-tract")]
pub use tract::TractBackend;
