//! Lifetime and retention core for handle-based native media engines.
//!
//! A native engine hands out recyclable integer handles and calls back into
//! Rust through raw function pointers and user-data pointers. Everything such
//! a call depends on (callback closures, sample buffers, parameter blocks)
//! must stay alive until the engine promises never to touch it again, and
//! must be released exactly once when it does.
//!
//! # Primary API
//!
//! - [`HandleRegistry`]: concurrent map from handle to retained resources
//! - [`FreeNotificationBridge`]: one-shot free hooks and create-then-bind
//! - [`PinnedBuffer`]: stable-address sample data handed to the engine
//! - [`StreamCallback`], [`RecordCallback`], [`SyncCallback`], [`DspCallback`]:
//!   closure trampolines retained per handle
//! - [`NativeEngine`]: the seam to the native library
//!
//! # Feature-gated APIs
//!
//! - `"mock"`: [`mock::MockEngine`], an in-process engine with a call log
//!
//! # Example
//!
//! ```ignore
//! use holdfast_core::*;
//! use std::sync::Arc;
//!
//! let registry = Arc::new(HandleRegistry::new());
//! let bridge = FreeNotificationBridge::new(engine, registry, &RetentionConfig::default())?;
//!
//! let buffer = Arc::new(PinnedBuffer::new(vec![0i16; 4096]));
//! let provisional = bridge.registry().provisional();
//! provisional.retain(buffer.clone());
//! let request = CreateRequest::memory_stream(&buffer, 0);
//! let handle = bridge.create_bound(provisional, request.kind(), |e| e.create(&request))?;
//! ```

#[macro_use]
mod macros;

pub mod error;
pub use error::{Error, Result};

mod handle;
pub use handle::{DspHandle, EffectHandle, NativeHandle, SyncHandle};

mod engine;
pub use engine::{
    CreateRequest, DspProc, EffectKind, FreeSyncProc, NativeEngine, ObjectKind, RecordProc,
    SampleFormat, StreamProc, SyncKind, SyncProc, STREAM_PROC_END,
};

mod config;
pub use config::{DispatchMode, RetentionConfig};

mod resource;
pub use resource::{OnRelease, RetainedResource};

mod registry;
pub use registry::{
    DetachedEntry, EntryKey, Generation, HandleRegistry, HookClaim, PendingKey, Provisional,
    RegistrationId,
};

mod dispatch;
pub use dispatch::ReleaseDispatcher;

mod notify;
pub use notify::{FreeNotificationBridge, NotificationToken};

mod pinned;
pub use pinned::{PinnedBuffer, Sample};

mod callback;
pub use callback::{
    CallbackSlot, DspCallback, RecordCallback, StreamCallback, StreamStatus, SyncCallback,
};

#[cfg(any(test, feature = "mock"))]
pub mod mock;

