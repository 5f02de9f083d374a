//! # Holdfast - Lifetime layer for handle-based native media engines
//!
//! Keeps everything a native call depends on alive for exactly as long as
//! the engine may touch it, and releases it exactly once when the engine's
//! free notification says it never will again.
//!
//! ## Architecture
//!
//! Holdfast is an umbrella crate that coordinates:
//! - **holdfast-core** - Handle registry, free-notification bridge, pinned
//!   buffers, callback trampolines, release dispatcher
//! - **holdfast-fx** - Effect parameter blocks and the effect controller
//!
//! ## Quick Start
//!
//! ```ignore
//! use holdfast::prelude::*;
//!
//! let holdfast = Holdfast::builder()
//!     .dispatch(DispatchMode::Deferred)
//!     .build(engine)?;
//!
//! let stream = holdfast.create_callback_stream(44_100, 2, 0, |_, buf| {
//!     buf.fill(0);
//!     StreamStatus::Written(buf.len())
//! })?;
//!
//! let echo = holdfast.effect::<Echo>(stream, 0)?;
//! echo.set_delay(0.25)?;
//! echo.activate()?;
//! ```
//!
//! ## Feature Flags
//!
//! - `default` - Core retention layer plus effect controllers
//! - `fx` - Effect controllers
//! - `mock` - In-process mock engine for tests

/// Re-export of holdfast-core for direct access
pub use holdfast_core as core;

pub use holdfast_core::{
    CallbackSlot,
    CreateRequest,
    DispatchMode,
    DspHandle,
    EffectHandle,
    EffectKind,
    FreeNotificationBridge,
    HandleRegistry,

    // Native seam
    NativeEngine,
    NativeHandle,
    NotificationToken,
    ObjectKind,

    // Retention
    OnRelease,
    PinnedBuffer,
    RegistrationId,
    RetainedResource,
    RetentionConfig,
    Sample,
    SampleFormat,
    StreamStatus,
    SyncHandle,
    SyncKind,
};

#[cfg(feature = "mock")]
pub use holdfast_core::mock;

// Effect controllers
#[cfg(feature = "fx")]
pub use holdfast_fx as fx;

#[cfg(feature = "fx")]
pub use holdfast_fx::{
    ActivationState, Compressor, Echo, EffectController, EffectParameters, Freeverb, FreeverbMode,
};

mod builder;
mod engine;
mod error;

pub use builder::HoldfastBuilder;
pub use engine::{DspBinding, Holdfast, SyncBinding};
pub use error::{Error, Result};

/// Convenience prelude for common imports
pub mod prelude {
    pub use crate::{Holdfast, HoldfastBuilder};

    pub use crate::core::{
        DispatchMode, NativeEngine, NativeHandle, RetentionConfig, StreamStatus, SyncKind,
    };

    #[cfg(feature = "fx")]
    pub use crate::fx::{ActivationState, Compressor, Echo, EffectController, Freeverb};
}
