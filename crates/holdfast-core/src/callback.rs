//! Closure trampolines retained per handle.
//!
//! Each callback lives in an `Arc<CallbackSlot<F>>` retained by the registry.
//! The slot's address is the user pointer given to the engine, and a generic
//! `extern "C"` trampoline turns the raw call back into a closure call.
//!
//! The closure is taken out of the slot for the duration of a call, so no lock
//! is held while user code runs. A callback may therefore free its own handle
//! (an end-of-stream sync calling `destroy`, say) even when the resulting free
//! notification releases this very slot on the same thread.

use crate::engine::{DspProc, RecordProc, StreamProc, SyncProc, STREAM_PROC_END};
use crate::handle::{DspHandle, NativeHandle, SyncHandle};
use crate::resource::RetainedResource;
use parking_lot::Mutex;
use std::ffi::c_void;
use std::slice;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Result of a stream callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStatus {
    /// Bytes written; more data will follow.
    Written(usize),
    /// Bytes written; the stream ends after them.
    End(usize),
}

impl StreamStatus {
    fn to_native(self, capacity: usize) -> u32 {
        match self {
            StreamStatus::Written(n) => n.min(capacity) as u32,
            StreamStatus::End(n) => n.min(capacity) as u32 | STREAM_PROC_END,
        }
    }
}

/// Holder of one retained closure.
pub struct CallbackSlot<F> {
    callback: Mutex<Option<F>>,
    released: AtomicBool,
    label: &'static str,
}

impl<F: Send> CallbackSlot<F> {
    pub fn new(label: &'static str, callback: F) -> Arc<Self> {
        Arc::new(Self {
            callback: Mutex::new(Some(callback)),
            released: AtomicBool::new(false),
            label,
        })
    }

    /// User pointer for the engine. Valid while the slot is retained.
    pub fn user_data(self: &Arc<Self>) -> *mut c_void {
        Arc::as_ptr(self) as *mut c_void
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Run the closure, or return `fallback` if it is released or already
    /// running on another thread.
    pub fn invoke<R>(&self, fallback: R, call: impl FnOnce(&mut F) -> R) -> R {
        let taken = self.callback.lock().take();
        let Some(mut callback) = taken else {
            return fallback;
        };
        let result = call(&mut callback);

        let mut slot = self.callback.lock();
        if !self.released.load(Ordering::Acquire) {
            *slot = Some(callback);
        } else {
            drop(slot);
            drop(callback);
        }
        result
    }
}

impl<F: Send> RetainedResource for CallbackSlot<F> {
    fn release(&self) {
        let callback = {
            let mut slot = self.callback.lock();
            self.released.store(true, Ordering::Release);
            slot.take()
        };
        if callback.is_some() {
            tracing::trace!(label = self.label, "callback released");
        }
        drop(callback);
    }

    fn label(&self) -> &'static str {
        self.label
    }
}

/// Take a strong reference to the slot behind a user pointer.
///
/// The callback may free its own handle, which drops the registry's
/// reference while the call is still running; the returned `Arc` keeps the
/// slot alive until the trampoline returns.
///
/// # Safety
/// `user` must come from [`CallbackSlot::user_data`] on a slot that is still
/// retained when the engine makes the call.
unsafe fn slot_guard<F>(user: *mut c_void) -> Arc<CallbackSlot<F>> {
    let ptr = user as *const CallbackSlot<F>;
    unsafe {
        Arc::increment_strong_count(ptr);
        Arc::from_raw(ptr)
    }
}

/// Stream procedure: `FnMut(handle, buffer) -> StreamStatus`.
pub struct StreamCallback;

impl StreamCallback {
    pub fn slot<F>(callback: F) -> Arc<CallbackSlot<F>>
    where
        F: FnMut(NativeHandle, &mut [u8]) -> StreamStatus + Send + 'static,
    {
        CallbackSlot::new("stream callback", callback)
    }

    /// The `extern "C"` entry point matching `slot`.
    pub fn trampoline<F>(_slot: &Arc<CallbackSlot<F>>) -> StreamProc
    where
        F: FnMut(NativeHandle, &mut [u8]) -> StreamStatus + Send + 'static,
    {
        stream_trampoline::<F>
    }
}

unsafe extern "C" fn stream_trampoline<F>(
    handle: NativeHandle,
    buffer: *mut c_void,
    length: u32,
    user: *mut c_void,
) -> u32
where
    F: FnMut(NativeHandle, &mut [u8]) -> StreamStatus + Send + 'static,
{
    ffi_guard!(STREAM_PROC_END => {
        // SAFETY: the engine passes back the user pointer we registered, and
        // `buffer` points to `length` writable bytes for this call.
        let slot = unsafe { slot_guard::<F>(user) };
        let data = unsafe { slice::from_raw_parts_mut(buffer.cast::<u8>(), length as usize) };
        slot.invoke(StreamStatus::End(0), |f| f(handle, data))
            .to_native(length as usize)
    })
}

/// Record procedure: `FnMut(handle, data) -> bool` (false stops recording).
pub struct RecordCallback;

impl RecordCallback {
    pub fn slot<F>(callback: F) -> Arc<CallbackSlot<F>>
    where
        F: FnMut(NativeHandle, &[u8]) -> bool + Send + 'static,
    {
        CallbackSlot::new("record callback", callback)
    }

    /// The `extern "C"` entry point matching `slot`.
    pub fn trampoline<F>(_slot: &Arc<CallbackSlot<F>>) -> RecordProc
    where
        F: FnMut(NativeHandle, &[u8]) -> bool + Send + 'static,
    {
        record_trampoline::<F>
    }
}

unsafe extern "C" fn record_trampoline<F>(
    handle: NativeHandle,
    buffer: *const c_void,
    length: u32,
    user: *mut c_void,
) -> i32
where
    F: FnMut(NativeHandle, &[u8]) -> bool + Send + 'static,
{
    ffi_guard!(0 => {
        // SAFETY: as for the stream trampoline, with read-only data.
        let slot = unsafe { slot_guard::<F>(user) };
        let data: &[u8] = if buffer.is_null() {
            &[]
        } else {
            unsafe { slice::from_raw_parts(buffer.cast::<u8>(), length as usize) }
        };
        i32::from(slot.invoke(false, |f| f(handle, data)))
    })
}

/// Sync procedure: `FnMut(sync, channel, data)`.
pub struct SyncCallback;

impl SyncCallback {
    pub fn slot<F>(callback: F) -> Arc<CallbackSlot<F>>
    where
        F: FnMut(SyncHandle, NativeHandle, u32) + Send + 'static,
    {
        CallbackSlot::new("sync callback", callback)
    }

    /// The `extern "C"` entry point matching `slot`.
    pub fn trampoline<F>(_slot: &Arc<CallbackSlot<F>>) -> SyncProc
    where
        F: FnMut(SyncHandle, NativeHandle, u32) + Send + 'static,
    {
        sync_trampoline::<F>
    }
}

unsafe extern "C" fn sync_trampoline<F>(
    sync: SyncHandle,
    channel: NativeHandle,
    data: u32,
    user: *mut c_void,
) where
    F: FnMut(SyncHandle, NativeHandle, u32) + Send + 'static,
{
    ffi_guard!(() => {
        // SAFETY: user pointer registered with the sync.
        let slot = unsafe { slot_guard::<F>(user) };
        slot.invoke((), |f| f(sync, channel, data))
    })
}

/// DSP procedure: `FnMut(dsp, channel, buffer)`, processing in place.
pub struct DspCallback;

impl DspCallback {
    pub fn slot<F>(callback: F) -> Arc<CallbackSlot<F>>
    where
        F: FnMut(DspHandle, NativeHandle, &mut [u8]) + Send + 'static,
    {
        CallbackSlot::new("dsp callback", callback)
    }

    /// The `extern "C"` entry point matching `slot`.
    pub fn trampoline<F>(_slot: &Arc<CallbackSlot<F>>) -> DspProc
    where
        F: FnMut(DspHandle, NativeHandle, &mut [u8]) + Send + 'static,
    {
        dsp_trampoline::<F>
    }
}

unsafe extern "C" fn dsp_trampoline<F>(
    dsp: DspHandle,
    channel: NativeHandle,
    buffer: *mut c_void,
    length: u32,
    user: *mut c_void,
) where
    F: FnMut(DspHandle, NativeHandle, &mut [u8]) + Send + 'static,
{
    ffi_guard!(() => {
        // SAFETY: user pointer registered with the DSP; `buffer` holds
        // `length` bytes owned by the engine for this call.
        let slot = unsafe { slot_guard::<F>(user) };
        let data = unsafe { slice::from_raw_parts_mut(buffer.cast::<u8>(), length as usize) };
        slot.invoke((), |f| f(dsp, channel, data))
    })
}
