//! The native engine seam.
//!
//! [`NativeEngine`] is the only way this crate talks to the native library.
//! Bindings implement it by forwarding to the real C functions; tests use
//! [`mock::MockEngine`](crate::mock::MockEngine).

use crate::handle::{DspHandle, EffectHandle, NativeHandle, SyncHandle};
use crate::pinned::{PinnedBuffer, Sample};
use serde::{Deserialize, Serialize};
use std::ffi::c_void;
use std::fmt;

/// Called once when a handle is freed, before its value can be reused.
pub type FreeSyncProc = unsafe extern "C" fn(handle: NativeHandle, user: *mut c_void);

/// Fills `buffer` with up to `length` bytes of sample data. Returns the number
/// of bytes written, OR-ed with [`STREAM_PROC_END`] at end of stream.
pub type StreamProc = unsafe extern "C" fn(
    handle: NativeHandle,
    buffer: *mut c_void,
    length: u32,
    user: *mut c_void,
) -> u32;

/// Receives `length` bytes of recorded data. Returns non-zero to continue.
pub type RecordProc = unsafe extern "C" fn(
    handle: NativeHandle,
    buffer: *const c_void,
    length: u32,
    user: *mut c_void,
) -> i32;

/// Channel event callback.
pub type SyncProc =
    unsafe extern "C" fn(sync: SyncHandle, channel: NativeHandle, data: u32, user: *mut c_void);

/// In-place processing of a channel's decoded data.
pub type DspProc = unsafe extern "C" fn(
    dsp: DspHandle,
    channel: NativeHandle,
    buffer: *mut c_void,
    length: u32,
    user: *mut c_void,
);

/// Flag OR-ed into a [`StreamProc`] return value to end the stream.
pub const STREAM_PROC_END: u32 = 0x8000_0000;

/// Sample layout of a memory stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SampleFormat {
    U8,
    I16,
    I32,
    F32,
}

impl SampleFormat {
    pub fn bytes_per_sample(self) -> usize {
        match self {
            SampleFormat::U8 => 1,
            SampleFormat::I16 => 2,
            SampleFormat::I32 | SampleFormat::F32 => 4,
        }
    }
}

/// Category of native object, used in diagnostics and creation errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectKind {
    MemoryStream,
    CallbackStream,
    Recording,
    Sync,
    Dsp,
    Effect,
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectKind::MemoryStream => write!(f, "memory stream"),
            ObjectKind::CallbackStream => write!(f, "callback stream"),
            ObjectKind::Recording => write!(f, "recording"),
            ObjectKind::Sync => write!(f, "sync"),
            ObjectKind::Dsp => write!(f, "dsp"),
            ObjectKind::Effect => write!(f, "effect"),
        }
    }
}

/// Native effect types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum EffectKind {
    Chorus = 0,
    Compressor = 1,
    Distortion = 2,
    Echo = 3,
    Flanger = 4,
    Gargle = 5,
    ParamEq = 7,
    Reverb = 8,
    Freeverb = 0x10010,
}

/// Channel events a [`SyncProc`] can be attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncKind {
    /// Playback reached the end.
    End,
    /// Playback reached a byte position.
    Position(u64),
    /// Playback stalled waiting for data.
    Stall,
    /// New metadata was received.
    Meta,
}

/// Arguments for a native constructor.
///
/// Pointers inside a request must stay valid until the created handle is
/// freed; the creation paths in this crate guarantee that by retaining the
/// pointee in the [`HandleRegistry`](crate::HandleRegistry) first.
#[derive(Debug, Clone, Copy)]
pub enum CreateRequest {
    MemoryStream {
        data: *const c_void,
        length: usize,
        format: SampleFormat,
        flags: u32,
    },
    CallbackStream {
        freq: u32,
        chans: u32,
        flags: u32,
        callback: StreamProc,
        user: *mut c_void,
    },
    Recording {
        freq: u32,
        chans: u32,
        flags: u32,
        callback: RecordProc,
        user: *mut c_void,
    },
}

impl CreateRequest {
    pub fn memory_stream<T: Sample>(buffer: &PinnedBuffer<T>, flags: u32) -> Self {
        CreateRequest::MemoryStream {
            data: buffer.as_ptr(),
            length: buffer.byte_len(),
            format: T::FORMAT,
            flags,
        }
    }

    pub fn kind(&self) -> ObjectKind {
        match self {
            CreateRequest::MemoryStream { .. } => ObjectKind::MemoryStream,
            CreateRequest::CallbackStream { .. } => ObjectKind::CallbackStream,
            CreateRequest::Recording { .. } => ObjectKind::Recording,
        }
    }
}

/// Trait abstracting the native media engine.
///
/// Implementations must honor the free-notification contract: a hook installed
/// with [`set_free_notification`](Self::set_free_notification) fires at most
/// once, and always before the handle's integer value is handed out again.
/// Hooks may fire on any engine thread, possibly while the engine holds its own
/// internal locks.
pub trait NativeEngine: Send + Sync {
    /// Create a stream or recording. `None` when the engine rejects the request.
    fn create(&self, request: &CreateRequest) -> Option<NativeHandle>;

    /// Free a handle explicitly.
    fn destroy(&self, handle: NativeHandle) -> bool;

    /// Install a one-shot free hook. `false` when `handle` is not live.
    fn set_free_notification(
        &self,
        handle: NativeHandle,
        callback: FreeSyncProc,
        user: *mut c_void,
    ) -> bool;

    fn set_sync(
        &self,
        handle: NativeHandle,
        kind: SyncKind,
        one_time: bool,
        callback: SyncProc,
        user: *mut c_void,
    ) -> Option<SyncHandle>;

    fn remove_sync(&self, handle: NativeHandle, sync: SyncHandle) -> bool;

    fn set_dsp(
        &self,
        handle: NativeHandle,
        callback: DspProc,
        user: *mut c_void,
        priority: i32,
    ) -> Option<DspHandle>;

    fn remove_dsp(&self, handle: NativeHandle, dsp: DspHandle) -> bool;

    fn attach_effect(
        &self,
        handle: NativeHandle,
        kind: EffectKind,
        priority: i32,
    ) -> Option<EffectHandle>;

    fn detach_effect(&self, handle: NativeHandle, effect: EffectHandle) -> bool;

    /// Push a parameter block. `params.as_ptr()` is the block's address.
    fn set_effect_parameters(&self, effect: EffectHandle, params: &[u8]) -> bool;

    /// Error code of the last failed call on this thread.
    fn error_code(&self) -> i32;
}
