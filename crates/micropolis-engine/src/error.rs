//! Error taxonomy for the renderer core.
//!
//! Backend failures carry the call site that enqueued the failing work and the
//! backend's own description. Cull and depth-limit decisions are ordinary
//! classification outcomes and never show up here.

use std::panic::Location;

use thiserror::Error;

use crate::store::PatchesHandle;

#[derive(Debug, Error)]
pub enum ReyesError {
    /// Validation or out-of-memory error reported by the GPU backend.
    #[error("{}:{}: error: {what}: {message}", location.file(), location.line())]
    Backend {
        what: String,
        message: String,
        location: &'static Location<'static>,
    },

    /// Shader module or pipeline creation failed.
    #[error("{}:{}: error: failed to build kernel `{kernel}` of program `{program}`: {message}", location.file(), location.line())]
    KernelBuild {
        program: String,
        kernel: String,
        message: String,
        location: &'static Location<'static>,
    },

    /// No usable adapter or device.
    #[error("GPU device unavailable: {0}")]
    Device(String),

    /// Waiting on the device failed.
    #[error("device poll failed: {0}")]
    Poll(String),

    /// A statically configured capacity would be exceeded.
    #[error("capacity exceeded for {what}: requested {requested}, capacity {capacity}")]
    Capacity {
        what: &'static str,
        requested: usize,
        capacity: usize,
    },

    #[error("no patches loaded for handle {0:?}")]
    UnknownPatches(PatchesHandle),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ReyesError {
    /// Backend error attributed to `location`, the enqueueing call site.
    pub(crate) fn backend(
        what: impl Into<String>,
        message: impl Into<String>,
        location: &'static Location<'static>,
    ) -> Self {
        Self::Backend {
            what: what.into(),
            message: message.into(),
            location,
        }
    }
}

pub type Result<T> = std::result::Result<T, ReyesError>;
