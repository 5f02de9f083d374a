//! Holdfast facade: create-then-bind for every resource kind.

use crate::core::{
    CreateRequest, DspCallback, DspHandle, FreeNotificationBridge, HandleRegistry, NativeEngine,
    NativeHandle, ObjectKind, PinnedBuffer, RecordCallback, RegistrationId, RetentionConfig,
    Sample, StreamCallback, StreamStatus, SyncCallback, SyncHandle, SyncKind,
};
use crate::core::Error as CoreError;
use crate::Result;
use std::sync::{Arc, OnceLock};

#[cfg(feature = "fx")]
use crate::fx::{EffectController, EffectParameters};

/// A user sync callback retained under a channel. Pass it back to
/// [`Holdfast::remove_sync`] to take the sync off the channel early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncBinding {
    pub channel: NativeHandle,
    pub sync: SyncHandle,
    pub one_time: bool,
    pub registration: RegistrationId,
}

/// A DSP callback retained under a channel. Pass it back to
/// [`Holdfast::remove_dsp`] to take the DSP off the channel early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DspBinding {
    pub channel: NativeHandle,
    pub dsp: DspHandle,
    pub registration: RegistrationId,
}

/// Retention layer over one native engine.
///
/// Every creation function registers what the native object will touch
/// before the native call, binds a free hook once the handle exists, and
/// rolls everything back if the native call fails. Resources are released
/// by the engine's free notification, never by the caller directly.
///
/// # Example
///
/// ```ignore
/// use holdfast::prelude::*;
///
/// let holdfast = Holdfast::new(engine)?;
///
/// let stream = holdfast.create_memory_stream(samples, 0)?;
/// let reverb = holdfast.effect::<Freeverb>(stream, 0)?;
/// reverb.set_room_size(0.8)?;
/// reverb.activate()?;
///
/// holdfast.free(stream)?; // buffer and block are released by the notification
/// ```
pub struct Holdfast {
    bridge: FreeNotificationBridge,
    config: RetentionConfig,
}

impl Holdfast {
    pub fn builder() -> crate::HoldfastBuilder {
        crate::HoldfastBuilder::default()
    }

    /// Inline dispatch with default settings.
    pub fn new(engine: Arc<dyn NativeEngine>) -> Result<Self> {
        Self::from_config(engine, RetentionConfig::default())
    }

    pub(crate) fn from_config(engine: Arc<dyn NativeEngine>, config: RetentionConfig) -> Result<Self> {
        let registry = Arc::new(HandleRegistry::new());
        let bridge = FreeNotificationBridge::new(engine, registry, &config)?;
        tracing::debug!(dispatch = ?config.dispatch, "holdfast initialized");
        Ok(Self { bridge, config })
    }

    pub fn bridge(&self) -> &FreeNotificationBridge {
        &self.bridge
    }

    pub fn registry(&self) -> &Arc<HandleRegistry> {
        self.bridge.registry()
    }

    pub fn engine(&self) -> &Arc<dyn NativeEngine> {
        self.bridge.engine()
    }

    pub fn config(&self) -> &RetentionConfig {
        &self.config
    }

    /// Stream straight from `data`. The samples stay pinned until the
    /// stream is freed.
    pub fn create_memory_stream<T: Sample>(
        &self,
        data: impl Into<Arc<[T]>>,
        flags: u32,
    ) -> Result<NativeHandle> {
        let buffer = Arc::new(PinnedBuffer::new(data));
        let request = CreateRequest::memory_stream(&buffer, flags);

        let provisional = self.registry().provisional();
        provisional.retain(buffer);
        let handle = self
            .bridge
            .create_bound(provisional, ObjectKind::MemoryStream, |e| e.create(&request))?;
        Ok(handle)
    }

    /// Stream whose data is produced by `callback` on an engine thread.
    pub fn create_callback_stream<F>(
        &self,
        freq: u32,
        chans: u32,
        flags: u32,
        callback: F,
    ) -> Result<NativeHandle>
    where
        F: FnMut(NativeHandle, &mut [u8]) -> StreamStatus + Send + 'static,
    {
        let slot = StreamCallback::slot(callback);
        let request = CreateRequest::CallbackStream {
            freq,
            chans,
            flags,
            callback: StreamCallback::trampoline(&slot),
            user: slot.user_data(),
        };

        let provisional = self.registry().provisional();
        provisional.retain(slot);
        let handle = self
            .bridge
            .create_bound(provisional, ObjectKind::CallbackStream, |e| e.create(&request))?;
        Ok(handle)
    }

    /// Start recording; `callback` returns `false` to stop.
    pub fn start_recording<F>(
        &self,
        freq: u32,
        chans: u32,
        flags: u32,
        callback: F,
    ) -> Result<NativeHandle>
    where
        F: FnMut(NativeHandle, &[u8]) -> bool + Send + 'static,
    {
        let slot = RecordCallback::slot(callback);
        let request = CreateRequest::Recording {
            freq,
            chans,
            flags,
            callback: RecordCallback::trampoline(&slot),
            user: slot.user_data(),
        };

        let provisional = self.registry().provisional();
        provisional.retain(slot);
        let handle = self
            .bridge
            .create_bound(provisional, ObjectKind::Recording, |e| e.create(&request))?;
        Ok(handle)
    }

    /// Attach a sync callback to `channel`.
    ///
    /// A repeating callback stays retained until the channel is freed or the
    /// sync is removed. A one-time callback releases itself right after it
    /// fires, since the engine drops a fired one-time sync without notice.
    pub fn set_sync<F>(
        &self,
        channel: NativeHandle,
        kind: SyncKind,
        one_time: bool,
        mut callback: F,
    ) -> Result<SyncBinding>
    where
        F: FnMut(SyncHandle, NativeHandle, u32) + Send + 'static,
    {
        let registered: Arc<OnceLock<RegistrationId>> = Arc::new(OnceLock::new());
        let release_after =
            one_time.then(|| (Arc::downgrade(self.registry()), Arc::clone(&registered)));

        let slot = SyncCallback::slot(move |sync, ch, data| {
            callback(sync, ch, data);
            if let Some((registry, id)) = &release_after {
                if let (Some(registry), Some(id)) = (registry.upgrade(), id.get()) {
                    registry.release(id);
                    tracing::trace!(%sync, channel = %ch, "one-time sync released");
                }
            }
        });
        let trampoline = SyncCallback::trampoline(&slot);
        let user = slot.user_data();
        let registration = self.bridge.retain(channel, slot)?;
        let _ = registered.set(registration);

        let engine = self.engine();
        let sync = engine
            .set_sync(channel, kind, one_time, trampoline, user)
            .filter(|s| s.is_valid());
        let Some(sync) = sync else {
            let code = engine.error_code();
            self.registry().release(&registration);
            tracing::warn!(%channel, ?kind, code, "set_sync failed, callback released");
            return Err(CoreError::CreationFailure {
                kind: ObjectKind::Sync,
                code,
            }
            .into());
        };

        tracing::debug!(%channel, %sync, ?kind, one_time, "sync attached");
        Ok(SyncBinding {
            channel,
            sync,
            one_time,
            registration,
        })
    }

    /// Take a sync off its channel and release its callback.
    ///
    /// A one-time sync that already fired has nothing left to remove and
    /// returns `Ok`. `HandleInvalid` when the channel was already freed.
    pub fn remove_sync(&self, binding: &SyncBinding) -> Result<()> {
        let registry = self.registry();
        if !registry.contains(&binding.registration) {
            let same_channel =
                registry.generation(binding.channel) == Some(binding.registration.generation());
            if binding.one_time && same_channel {
                return Ok(());
            }
            return Err(CoreError::HandleInvalid {
                handle: binding.channel,
            }
            .into());
        }

        let engine = self.engine();
        if !engine.remove_sync(binding.channel, binding.sync) {
            let code = engine.error_code();
            tracing::warn!(channel = %binding.channel, sync = %binding.sync, code, "remove_sync failed");
            return Err(CoreError::DetachFailure {
                handle: binding.channel,
                code,
            }
            .into());
        }

        registry.release(&binding.registration);
        tracing::debug!(channel = %binding.channel, sync = %binding.sync, "sync removed");
        Ok(())
    }

    /// Attach a DSP callback to `channel` at `priority`.
    pub fn set_dsp<F>(&self, channel: NativeHandle, priority: i32, callback: F) -> Result<DspBinding>
    where
        F: FnMut(DspHandle, NativeHandle, &mut [u8]) + Send + 'static,
    {
        let slot = DspCallback::slot(callback);
        let trampoline = DspCallback::trampoline(&slot);
        let user = slot.user_data();
        let registration = self.bridge.retain(channel, slot)?;

        let engine = self.engine();
        let dsp = engine
            .set_dsp(channel, trampoline, user, priority)
            .filter(|d| d.is_valid());
        let Some(dsp) = dsp else {
            let code = engine.error_code();
            self.registry().release(&registration);
            tracing::warn!(%channel, priority, code, "set_dsp failed, callback released");
            return Err(CoreError::CreationFailure {
                kind: ObjectKind::Dsp,
                code,
            }
            .into());
        };

        tracing::debug!(%channel, %dsp, priority, "dsp attached");
        Ok(DspBinding {
            channel,
            dsp,
            registration,
        })
    }

    /// Take a DSP off its channel and release its callback.
    ///
    /// `HandleInvalid` when the channel was already freed; the callback went
    /// with it.
    pub fn remove_dsp(&self, binding: &DspBinding) -> Result<()> {
        if !self.registry().contains(&binding.registration) {
            return Err(CoreError::HandleInvalid {
                handle: binding.channel,
            }
            .into());
        }

        let engine = self.engine();
        if !engine.remove_dsp(binding.channel, binding.dsp) {
            let code = engine.error_code();
            tracing::warn!(channel = %binding.channel, dsp = %binding.dsp, code, "remove_dsp failed");
            return Err(CoreError::DetachFailure {
                handle: binding.channel,
                code,
            }
            .into());
        }

        self.registry().release(&binding.registration);
        tracing::debug!(channel = %binding.channel, dsp = %binding.dsp, "dsp removed");
        Ok(())
    }

    /// Free `handle` in the engine. Its resources are released by the free
    /// notification this triggers.
    pub fn free(&self, handle: NativeHandle) -> Result<()> {
        if self.engine().destroy(handle) {
            tracing::debug!(%handle, "freed");
            Ok(())
        } else {
            Err(CoreError::HandleInvalid { handle }.into())
        }
    }

    /// Controller for effect `P` on `channel`, Inactive.
    #[cfg(feature = "fx")]
    pub fn effect<P: EffectParameters>(
        &self,
        channel: NativeHandle,
        priority: i32,
    ) -> Result<EffectController<P>> {
        Ok(EffectController::new(&self.bridge, channel, priority)?)
    }

    /// Drain and stop the deferred release worker. Later notifications are
    /// released inline.
    pub fn shutdown(&self) {
        self.bridge.dispatcher().shutdown();
    }
}

impl std::fmt::Debug for Holdfast {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Holdfast")
            .field("config", &self.config)
            .field("entries", &self.registry().len())
            .finish()
    }
}
