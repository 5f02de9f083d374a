//! In-process engine for tests.
//!
//! [`MockEngine`] behaves like the native library as far as lifetimes go:
//! handle values are recycled (lowest freed value first), free hooks fire on
//! `destroy` before the value is handed out again, and every callback runs
//! without the engine's lock held so it may call back into the engine. Every
//! call is appended to a log of [`EngineCall`]s.

use crate::engine::{
    CreateRequest, DspProc, EffectKind, FreeSyncProc, NativeEngine, ObjectKind, RecordProc,
    StreamProc, SyncKind, SyncProc, STREAM_PROC_END,
};
use crate::handle::{DspHandle, EffectHandle, NativeHandle, SyncHandle};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::ffi::c_void;

/// Error codes reported by the mock.
pub mod codes {
    pub const HANDLE: i32 = 5;
    pub const ILLEGAL_PARAM: i32 = 20;
    pub const NOT_AVAILABLE: i32 = 37;
}

/// One observed call into the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    Create(ObjectKind),
    Destroy(NativeHandle),
    SetFreeNotification(NativeHandle),
    SetSync {
        handle: NativeHandle,
        kind: SyncKind,
        one_time: bool,
    },
    SetDsp {
        handle: NativeHandle,
        priority: i32,
    },
    RemoveSync {
        handle: NativeHandle,
        sync: SyncHandle,
    },
    RemoveDsp {
        handle: NativeHandle,
        dsp: DspHandle,
    },
    AttachEffect {
        handle: NativeHandle,
        kind: EffectKind,
        priority: i32,
    },
    DetachEffect {
        handle: NativeHandle,
        effect: EffectHandle,
    },
    SetEffectParameters {
        effect: EffectHandle,
        bytes: Vec<u8>,
        /// Address of the pushed block.
        address: usize,
    },
}

// Raw user pointers are kept as integers so the state is `Send`.
struct SyncRecord {
    id: SyncHandle,
    kind: SyncKind,
    one_time: bool,
    callback: SyncProc,
    user: usize,
}

struct DspRecord {
    id: DspHandle,
    callback: DspProc,
    user: usize,
    priority: i32,
}

/// An effect attached to a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachedEffect {
    pub effect: EffectHandle,
    pub kind: EffectKind,
    pub priority: i32,
    pub params: Option<Vec<u8>>,
}

enum Source {
    Memory { data: usize, length: usize },
    Stream { callback: StreamProc, user: usize },
    Record { callback: RecordProc, user: usize },
    Plain,
}

struct Channel {
    kind: ObjectKind,
    source: Source,
    free_hooks: Vec<(FreeSyncProc, usize)>,
    syncs: Vec<SyncRecord>,
    dsps: Vec<DspRecord>,
    effects: Vec<AttachedEffect>,
}

#[derive(Default)]
struct Failures {
    create: Option<i32>,
    free_notification: bool,
    attach: Option<i32>,
    detach: Option<i32>,
    push: Option<i32>,
}

struct MockState {
    channels: BTreeMap<u32, Channel>,
    recycled: BTreeSet<u32>,
    next_value: u32,
    next_aux: u32,
    calls: Vec<EngineCall>,
    failures: Failures,
    last_error: i32,
}

impl MockState {
    fn allocate(&mut self) -> NativeHandle {
        if let Some(value) = self.recycled.pop_first() {
            return NativeHandle(value);
        }
        let value = self.next_value;
        self.next_value += 1;
        NativeHandle(value)
    }

    fn aux(&mut self) -> u32 {
        self.next_aux += 1;
        self.next_aux
    }

    fn fail(&mut self, code: i32) {
        self.last_error = code;
    }
}

/// Engine double with recycling handles and a call log.
pub struct MockEngine {
    state: Mutex<MockState>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    /// Hand out fresh handle values starting at `first`.
    pub fn starting_at(first: u32) -> Self {
        Self {
            state: Mutex::new(MockState {
                channels: BTreeMap::new(),
                recycled: BTreeSet::new(),
                next_value: first.max(1),
                next_aux: 0,
                calls: Vec::new(),
                failures: Failures::default(),
                last_error: 0,
            }),
        }
    }

    /// Create a plain channel, as if produced by code outside this crate.
    pub fn create_channel(&self) -> NativeHandle {
        let mut state = self.state.lock();
        let handle = state.allocate();
        state.channels.insert(handle.0, Channel::new(ObjectKind::CallbackStream, Source::Plain));
        handle
    }

    /// A request the mock accepts, with no data behind it.
    pub fn dummy_request(&self) -> CreateRequest {
        CreateRequest::CallbackStream {
            freq: 44_100,
            chans: 2,
            flags: 0,
            callback: silent_stream,
            user: std::ptr::null_mut(),
        }
    }

    pub fn fail_next_create(&self, code: i32) {
        self.state.lock().failures.create = Some(code);
    }

    pub fn fail_next_free_notification(&self) {
        self.state.lock().failures.free_notification = true;
    }

    pub fn fail_next_attach(&self, code: i32) {
        self.state.lock().failures.attach = Some(code);
    }

    pub fn fail_next_detach(&self, code: i32) {
        self.state.lock().failures.detach = Some(code);
    }

    pub fn fail_next_push(&self, code: i32) {
        self.state.lock().failures.push = Some(code);
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.state.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    pub fn count(&self, predicate: impl Fn(&EngineCall) -> bool) -> usize {
        self.state.lock().calls.iter().filter(|c| predicate(c)).count()
    }

    pub fn is_live(&self, handle: NativeHandle) -> bool {
        self.state.lock().channels.contains_key(&handle.0)
    }

    pub fn live_handles(&self) -> Vec<NativeHandle> {
        self.state.lock().channels.keys().map(|&v| NativeHandle(v)).collect()
    }

    pub fn effects_on(&self, handle: NativeHandle) -> Vec<AttachedEffect> {
        self.state
            .lock()
            .channels
            .get(&handle.0)
            .map(|c| c.effects.clone())
            .unwrap_or_default()
    }

    pub fn effect_params(&self, effect: EffectHandle) -> Option<Vec<u8>> {
        let state = self.state.lock();
        state
            .channels
            .values()
            .flat_map(|c| c.effects.iter())
            .find(|e| e.effect == effect)
            .and_then(|e| e.params.clone())
    }

    pub fn sync_count(&self, handle: NativeHandle) -> usize {
        self.state.lock().channels.get(&handle.0).map_or(0, |c| c.syncs.len())
    }

    pub fn dsp_count(&self, handle: NativeHandle) -> usize {
        self.state.lock().channels.get(&handle.0).map_or(0, |c| c.dsps.len())
    }

    /// Read a memory stream's bytes through the pointer it was created with.
    ///
    /// Only sound while the stream's buffer is pinned, which is exactly what
    /// tests use it to check.
    pub fn memory_stream_bytes(&self, handle: NativeHandle) -> Option<Vec<u8>> {
        let state = self.state.lock();
        match state.channels.get(&handle.0)?.source {
            Source::Memory { data, length } => {
                // SAFETY: the buffer is retained until the free hook for
                // `handle` fires, and `handle` is still live here.
                let bytes = unsafe { std::slice::from_raw_parts(data as *const u8, length) };
                Some(bytes.to_vec())
            }
            _ => None,
        }
    }

    /// Pull `length` bytes from a callback stream. Returns the data and
    /// whether the stream signalled its end.
    pub fn pull_stream(&self, handle: NativeHandle, length: usize) -> Option<(Vec<u8>, bool)> {
        let (callback, user) = match self.state.lock().channels.get(&handle.0)?.source {
            Source::Stream { callback, user } => (callback, user),
            _ => return None,
        };
        let mut buffer = vec![0u8; length];
        // SAFETY: `user` is the pointer registered at creation; the engine
        // lock is not held.
        let result = unsafe {
            callback(handle, buffer.as_mut_ptr().cast(), length as u32, user as *mut c_void)
        };
        let written = (result & !STREAM_PROC_END) as usize;
        buffer.truncate(written.min(length));
        Some((buffer, result & STREAM_PROC_END != 0))
    }

    /// Deliver recorded data. Returns the callback's continue flag.
    pub fn feed_recording(&self, handle: NativeHandle, data: &[u8]) -> Option<bool> {
        let (callback, user) = match self.state.lock().channels.get(&handle.0)?.source {
            Source::Record { callback, user } => (callback, user),
            _ => return None,
        };
        // SAFETY: as for `pull_stream`.
        let result =
            unsafe { callback(handle, data.as_ptr().cast(), data.len() as u32, user as *mut c_void) };
        Some(result != 0)
    }

    /// Fire every sync of `kind` on `handle`. One-time syncs are removed
    /// first. Returns how many callbacks ran.
    pub fn fire_sync(&self, handle: NativeHandle, kind: SyncKind, data: u32) -> usize {
        let due: Vec<(SyncHandle, SyncProc, usize)> = {
            let mut state = self.state.lock();
            let Some(channel) = state.channels.get_mut(&handle.0) else {
                return 0;
            };
            let due = channel
                .syncs
                .iter()
                .filter(|s| s.kind == kind)
                .map(|s| (s.id, s.callback, s.user))
                .collect();
            channel.syncs.retain(|s| !(s.kind == kind && s.one_time));
            due
        };
        for &(sync, callback, user) in &due {
            // SAFETY: registered user pointer, lock released.
            unsafe { callback(sync, handle, data, user as *mut c_void) };
        }
        due.len()
    }

    /// Run the channel's DSP chain over `buffer`, highest priority first.
    pub fn run_dsp(&self, handle: NativeHandle, buffer: &mut [u8]) -> usize {
        let chain: Vec<(DspHandle, DspProc, usize)> = {
            let state = self.state.lock();
            let Some(channel) = state.channels.get(&handle.0) else {
                return 0;
            };
            let mut dsps: Vec<&DspRecord> = channel.dsps.iter().collect();
            dsps.sort_by(|a, b| b.priority.cmp(&a.priority));
            dsps.into_iter().map(|d| (d.id, d.callback, d.user)).collect()
        };
        for &(dsp, callback, user) in &chain {
            // SAFETY: registered user pointer, lock released.
            unsafe {
                callback(dsp, handle, buffer.as_mut_ptr().cast(), buffer.len() as u32, user as *mut c_void)
            };
        }
        chain.len()
    }

    /// Destroy every live handle, as the engine does when it shuts down.
    pub fn free_all(&self) -> usize {
        let handles = self.live_handles();
        handles.iter().filter(|&&h| self.destroy(h)).count()
    }
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Channel {
    fn new(kind: ObjectKind, source: Source) -> Self {
        Self {
            kind,
            source,
            free_hooks: Vec::new(),
            syncs: Vec::new(),
            dsps: Vec::new(),
            effects: Vec::new(),
        }
    }
}

unsafe extern "C" fn silent_stream(
    _handle: NativeHandle,
    _buffer: *mut c_void,
    _length: u32,
    _user: *mut c_void,
) -> u32 {
    STREAM_PROC_END
}

impl NativeEngine for MockEngine {
    fn create(&self, request: &CreateRequest) -> Option<NativeHandle> {
        let mut state = self.state.lock();
        state.calls.push(EngineCall::Create(request.kind()));
        if let Some(code) = state.failures.create.take() {
            state.fail(code);
            return None;
        }

        let source = match *request {
            CreateRequest::MemoryStream { data, length, .. } => {
                if data.is_null() && length > 0 {
                    state.fail(codes::ILLEGAL_PARAM);
                    return None;
                }
                Source::Memory {
                    data: data as usize,
                    length,
                }
            }
            CreateRequest::CallbackStream { callback, user, .. } => Source::Stream {
                callback,
                user: user as usize,
            },
            CreateRequest::Recording { callback, user, .. } => Source::Record {
                callback,
                user: user as usize,
            },
        };

        let handle = state.allocate();
        state.channels.insert(handle.0, Channel::new(request.kind(), source));
        Some(handle)
    }

    fn destroy(&self, handle: NativeHandle) -> bool {
        let hooks = {
            let mut state = self.state.lock();
            state.calls.push(EngineCall::Destroy(handle));
            match state.channels.remove(&handle.0) {
                Some(channel) => channel.free_hooks,
                None => {
                    state.fail(codes::HANDLE);
                    return false;
                }
            }
        };

        for (callback, user) in hooks {
            // SAFETY: registered user pointer; each hook fires once since the
            // channel was removed above.
            unsafe { callback(handle, user as *mut c_void) };
        }

        // Only now may the value be handed out again.
        self.state.lock().recycled.insert(handle.0);
        true
    }

    fn set_free_notification(
        &self,
        handle: NativeHandle,
        callback: FreeSyncProc,
        user: *mut c_void,
    ) -> bool {
        let mut state = self.state.lock();
        state.calls.push(EngineCall::SetFreeNotification(handle));
        if std::mem::take(&mut state.failures.free_notification) {
            state.fail(codes::NOT_AVAILABLE);
            return false;
        }
        match state.channels.get_mut(&handle.0) {
            Some(channel) => {
                channel.free_hooks.push((callback, user as usize));
                true
            }
            None => {
                state.fail(codes::HANDLE);
                false
            }
        }
    }

    fn set_sync(
        &self,
        handle: NativeHandle,
        kind: SyncKind,
        one_time: bool,
        callback: SyncProc,
        user: *mut c_void,
    ) -> Option<SyncHandle> {
        let mut state = self.state.lock();
        state.calls.push(EngineCall::SetSync {
            handle,
            kind,
            one_time,
        });
        if !state.channels.contains_key(&handle.0) {
            state.fail(codes::HANDLE);
            return None;
        }
        let id = SyncHandle(state.aux());
        if let Some(channel) = state.channels.get_mut(&handle.0) {
            channel.syncs.push(SyncRecord {
                id,
                kind,
                one_time,
                callback,
                user: user as usize,
            });
        }
        Some(id)
    }

    fn remove_sync(&self, handle: NativeHandle, sync: SyncHandle) -> bool {
        let mut state = self.state.lock();
        state.calls.push(EngineCall::RemoveSync { handle, sync });
        let removed = state.channels.get_mut(&handle.0).is_some_and(|channel| {
            let before = channel.syncs.len();
            channel.syncs.retain(|s| s.id != sync);
            channel.syncs.len() != before
        });
        if !removed {
            state.fail(codes::HANDLE);
        }
        removed
    }

    fn set_dsp(
        &self,
        handle: NativeHandle,
        callback: DspProc,
        user: *mut c_void,
        priority: i32,
    ) -> Option<DspHandle> {
        let mut state = self.state.lock();
        state.calls.push(EngineCall::SetDsp { handle, priority });
        if !state.channels.contains_key(&handle.0) {
            state.fail(codes::HANDLE);
            return None;
        }
        let id = DspHandle(state.aux());
        if let Some(channel) = state.channels.get_mut(&handle.0) {
            channel.dsps.push(DspRecord {
                id,
                callback,
                user: user as usize,
                priority,
            });
        }
        Some(id)
    }

    fn remove_dsp(&self, handle: NativeHandle, dsp: DspHandle) -> bool {
        let mut state = self.state.lock();
        state.calls.push(EngineCall::RemoveDsp { handle, dsp });
        let removed = state.channels.get_mut(&handle.0).is_some_and(|channel| {
            let before = channel.dsps.len();
            channel.dsps.retain(|d| d.id != dsp);
            channel.dsps.len() != before
        });
        if !removed {
            state.fail(codes::HANDLE);
        }
        removed
    }

    fn attach_effect(
        &self,
        handle: NativeHandle,
        kind: EffectKind,
        priority: i32,
    ) -> Option<EffectHandle> {
        let mut state = self.state.lock();
        state.calls.push(EngineCall::AttachEffect {
            handle,
            kind,
            priority,
        });
        if let Some(code) = state.failures.attach.take() {
            state.fail(code);
            return None;
        }
        if !state.channels.contains_key(&handle.0) {
            state.fail(codes::HANDLE);
            return None;
        }
        let effect = EffectHandle(state.aux());
        if let Some(channel) = state.channels.get_mut(&handle.0) {
            channel.effects.push(AttachedEffect {
                effect,
                kind,
                priority,
                params: None,
            });
        }
        Some(effect)
    }

    fn detach_effect(&self, handle: NativeHandle, effect: EffectHandle) -> bool {
        let mut state = self.state.lock();
        state.calls.push(EngineCall::DetachEffect { handle, effect });
        if let Some(code) = state.failures.detach.take() {
            state.fail(code);
            return false;
        }
        let removed = state.channels.get_mut(&handle.0).is_some_and(|channel| {
            let before = channel.effects.len();
            channel.effects.retain(|e| e.effect != effect);
            channel.effects.len() != before
        });
        if !removed {
            state.fail(codes::HANDLE);
        }
        removed
    }

    fn set_effect_parameters(&self, effect: EffectHandle, params: &[u8]) -> bool {
        let mut state = self.state.lock();
        state.calls.push(EngineCall::SetEffectParameters {
            effect,
            bytes: params.to_vec(),
            address: params.as_ptr() as usize,
        });
        if let Some(code) = state.failures.push.take() {
            state.fail(code);
            return false;
        }
        let target = state
            .channels
            .values_mut()
            .flat_map(|c| c.effects.iter_mut())
            .find(|e| e.effect == effect);
        match target {
            Some(attached) => {
                attached.params = Some(params.to_vec());
                true
            }
            None => {
                state.fail(codes::HANDLE);
                false
            }
        }
    }

    fn error_code(&self) -> i32 {
        self.state.lock().last_error
    }
}

impl std::fmt::Debug for MockEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        let kinds: Vec<(u32, ObjectKind)> =
            state.channels.iter().map(|(&v, c)| (v, c.kind)).collect();
        f.debug_struct("MockEngine")
            .field("channels", &kinds)
            .field("calls", &state.calls.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    static FREED: AtomicU32 = AtomicU32::new(0);

    unsafe extern "C" fn record_free(handle: NativeHandle, _user: *mut c_void) {
        FREED.store(handle.0, Ordering::SeqCst);
    }

    #[test]
    fn test_recycles_lowest_value_after_hook() {
        let engine = MockEngine::starting_at(42);
        let request = engine.dummy_request();
        let a = engine.create(&request).unwrap();
        let b = engine.create(&request).unwrap();
        assert_eq!((a, b), (NativeHandle(42), NativeHandle(43)));

        assert!(engine.set_free_notification(a, record_free, std::ptr::null_mut()));
        assert!(engine.destroy(a));
        assert_eq!(FREED.load(Ordering::SeqCst), 42);
        assert!(!engine.destroy(a));
        assert_eq!(engine.error_code(), codes::HANDLE);

        assert_eq!(engine.create(&request), Some(NativeHandle(42)));
    }

    #[test]
    fn test_scripted_failures_apply_once() {
        let engine = MockEngine::new();
        let request = engine.dummy_request();
        engine.fail_next_create(41);
        assert_eq!(engine.create(&request), None);
        assert_eq!(engine.error_code(), 41);
        assert!(engine.create(&request).is_some());
    }

    #[test]
    fn test_effect_calls_logged() {
        let engine = MockEngine::new();
        let channel = engine.create_channel();
        let fx = engine.attach_effect(channel, EffectKind::Reverb, 3).unwrap();
        assert!(engine.set_effect_parameters(fx, &[1, 2, 3, 4]));
        assert_eq!(engine.effect_params(fx), Some(vec![1, 2, 3, 4]));
        assert!(engine.detach_effect(channel, fx));
        assert!(engine.effects_on(channel).is_empty());
        assert_eq!(engine.calls().len(), 3);
    }
}
