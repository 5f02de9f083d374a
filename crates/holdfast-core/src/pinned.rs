//! Pinned sample buffers.
//!
//! A memory stream reads straight from the caller's samples for as long as
//! the stream lives. [`PinnedBuffer`] keeps one shared reference to the data
//! until it is released by the registry; the caller may keep its own clone of
//! the `Arc<[T]>` and observe when the engine's claim on it ends.

use crate::engine::SampleFormat;
use crate::resource::RetainedResource;
use parking_lot::Mutex;
use std::ffi::c_void;
use std::sync::Arc;

/// Sample types a memory stream can be built from.
pub trait Sample: Copy + Send + Sync + 'static {
    const FORMAT: SampleFormat;
}

impl Sample for u8 {
    const FORMAT: SampleFormat = SampleFormat::U8;
}

impl Sample for i16 {
    const FORMAT: SampleFormat = SampleFormat::I16;
}

impl Sample for i32 {
    const FORMAT: SampleFormat = SampleFormat::I32;
}

impl Sample for f32 {
    const FORMAT: SampleFormat = SampleFormat::F32;
}

/// Sample data whose address stays fixed until released.
pub struct PinnedBuffer<T: Sample> {
    data: Mutex<Option<Arc<[T]>>>,
    addr: usize,
    len: usize,
}

impl<T: Sample> PinnedBuffer<T> {
    pub fn new(data: impl Into<Arc<[T]>>) -> Self {
        let data: Arc<[T]> = data.into();
        Self {
            addr: data.as_ptr() as usize,
            len: data.len(),
            data: Mutex::new(Some(data)),
        }
    }

    /// Address handed to the engine. Only meaningful while pinned.
    pub fn as_ptr(&self) -> *const c_void {
        self.addr as *const c_void
    }

    /// Length in samples.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn byte_len(&self) -> usize {
        self.len * T::FORMAT.bytes_per_sample()
    }

    pub fn is_pinned(&self) -> bool {
        self.data.lock().is_some()
    }
}

impl<T: Sample> RetainedResource for PinnedBuffer<T> {
    fn release(&self) {
        if let Some(data) = self.data.lock().take() {
            tracing::trace!(bytes = self.byte_len(), addr = self.addr, "unpinned buffer");
            drop(data);
        }
    }

    fn label(&self) -> &'static str {
        "pinned buffer"
    }
}
