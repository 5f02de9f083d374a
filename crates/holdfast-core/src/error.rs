//! Error types for holdfast-core.

use crate::engine::ObjectKind;
use crate::handle::{EffectHandle, NativeHandle};
use thiserror::Error;

/// Error type for retention operations.
///
/// Native failures carry the engine's error code as reported by
/// [`NativeEngine::error_code`](crate::NativeEngine::error_code) right after
/// the failing call.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Handle {handle} is not live")]
    HandleInvalid { handle: NativeHandle },

    #[error("Native engine rejected {kind} creation: code {code}")]
    CreationFailure { kind: ObjectKind, code: i32 },

    #[error("Failed to attach effect to {handle}: code {code}")]
    AttachFailure { handle: NativeHandle, code: i32 },

    #[error("Failed to detach from {handle}: code {code}")]
    DetachFailure { handle: NativeHandle, code: i32 },

    #[error("Failed to push parameters to effect {effect}: code {code}")]
    ParameterPushFailure { effect: EffectHandle, code: i32 },

    #[error("Controller already disposed")]
    Disposed,

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// The handle an error refers to, if any.
    pub fn handle(&self) -> Option<NativeHandle> {
        match self {
            Error::HandleInvalid { handle }
            | Error::AttachFailure { handle, .. }
            | Error::DetachFailure { handle, .. } => Some(*handle),
            _ => None,
        }
    }

    /// The native error code, for failures reported by the engine.
    pub fn native_code(&self) -> Option<i32> {
        match self {
            Error::CreationFailure { code, .. }
            | Error::AttachFailure { code, .. }
            | Error::DetachFailure { code, .. }
            | Error::ParameterPushFailure { code, .. } => Some(*code),
            _ => None,
        }
    }
}
