//! Free-notification bridge.
//!
//! Installs one native free hook per live registry entry and turns the hook
//! into registry cleanup. The hook context carries the entry generation, so a
//! notification can only ever tear down the incarnation it was installed for.

use crate::config::RetentionConfig;
use crate::dispatch::ReleaseDispatcher;
use crate::engine::{NativeEngine, ObjectKind};
use crate::handle::NativeHandle;
use crate::registry::{
    EntryKey, Generation, HandleRegistry, HookClaim, Provisional, RegistrationId,
};
use crate::resource::RetainedResource;
use crate::{Error, Result};
use std::ffi::c_void;
use std::sync::{Arc, Weak};

/// Proof that a free hook is installed for one generation of a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotificationToken {
    pub handle: NativeHandle,
    pub generation: Generation,
}

struct BridgeShared {
    engine: Arc<dyn NativeEngine>,
    registry: Arc<HandleRegistry>,
    dispatcher: ReleaseDispatcher,
}

impl BridgeShared {
    fn on_freed(&self, handle: NativeHandle, generation: Generation) {
        match self.registry.detach_generation(handle, generation) {
            Some(detached) => {
                tracing::debug!(%handle, generation = generation.get(), resources = detached.len(), "handle freed");
                self.dispatcher.dispatch(detached);
            }
            None => {
                tracing::trace!(%handle, generation = generation.get(), "free notification for released entry");
            }
        }
    }
}

/// Handed to the engine as the hook's user pointer; reclaimed exactly once,
/// either by the trampoline or by `bind` when installation fails.
struct HookContext {
    shared: Weak<BridgeShared>,
    generation: Generation,
}

unsafe extern "C" fn free_trampoline(handle: NativeHandle, user: *mut c_void) {
    ffi_guard!(() => {
        if user.is_null() {
            return;
        }
        // SAFETY: `user` came from `Box::into_raw` in `bind` and the engine
        // fires a free hook at most once.
        let context = unsafe { Box::from_raw(user.cast::<HookContext>()) };
        if let Some(shared) = context.shared.upgrade() {
            shared.on_freed(handle, context.generation);
        }
    })
}

/// Ties registry entries to native free notifications.
///
/// Clones share the same engine, registry and dispatcher.
#[derive(Clone)]
pub struct FreeNotificationBridge {
    shared: Arc<BridgeShared>,
}

impl FreeNotificationBridge {
    pub fn new(
        engine: Arc<dyn NativeEngine>,
        registry: Arc<HandleRegistry>,
        config: &RetentionConfig,
    ) -> Result<Self> {
        let dispatcher = ReleaseDispatcher::new(config)?;
        Ok(Self {
            shared: Arc::new(BridgeShared {
                engine,
                registry,
                dispatcher,
            }),
        })
    }

    pub fn engine(&self) -> &Arc<dyn NativeEngine> {
        &self.shared.engine
    }

    pub fn registry(&self) -> &Arc<HandleRegistry> {
        &self.shared.registry
    }

    pub fn dispatcher(&self) -> &ReleaseDispatcher {
        &self.shared.dispatcher
    }

    /// Make sure a free hook is installed for `handle`'s live entry.
    ///
    /// Idempotent per generation: the first call installs the native hook,
    /// later calls return the same token. Fails with `HandleInvalid` when
    /// there is no live entry or the engine refuses the hook; in the latter
    /// case the entry's resources are left for the caller to release.
    pub fn bind(&self, handle: NativeHandle) -> Result<NotificationToken> {
        let generation = match self.shared.registry.claim_hook(handle) {
            HookClaim::Installed(generation) => {
                return Ok(NotificationToken { handle, generation });
            }
            HookClaim::Missing => return Err(Error::HandleInvalid { handle }),
            HookClaim::Install(generation) => generation,
        };

        let context = Box::into_raw(Box::new(HookContext {
            shared: Arc::downgrade(&self.shared),
            generation,
        }));

        if self
            .shared
            .engine
            .set_free_notification(handle, free_trampoline, context.cast())
        {
            tracing::trace!(%handle, generation = generation.get(), "free hook installed");
            Ok(NotificationToken { handle, generation })
        } else {
            // SAFETY: the engine refused the hook, so it never saw `context`.
            drop(unsafe { Box::from_raw(context) });
            self.shared.registry.unclaim_hook(handle, generation);
            tracing::warn!(%handle, code = self.shared.engine.error_code(), "engine refused free hook");
            Err(Error::HandleInvalid { handle })
        }
    }

    /// Run a native constructor with its resources already retained.
    ///
    /// On failure the provisional resources are released before returning and
    /// no entry is left behind. On success they move to the new handle and a
    /// free hook is installed; if the hook cannot be installed (the handle
    /// died in between) everything is released and the handle must be
    /// treated as unusable.
    pub fn create_bound<F>(
        &self,
        provisional: Provisional<'_>,
        kind: ObjectKind,
        create: F,
    ) -> Result<NativeHandle>
    where
        F: FnOnce(&dyn NativeEngine) -> Option<NativeHandle>,
    {
        let engine = self.shared.engine.as_ref();
        let handle = match create(engine) {
            Some(handle) if handle.is_valid() => handle,
            _ => {
                let code = engine.error_code();
                let released = provisional.rollback();
                tracing::warn!(%kind, code, released, "native creation failed, rolled back");
                return Err(Error::CreationFailure { kind, code });
            }
        };

        provisional.promote(handle);
        if let Err(err) = self.bind(handle) {
            let released = self.shared.registry.release_all(handle);
            tracing::warn!(%handle, %kind, released, "handle died before free hook was installed");
            return Err(err);
        }

        tracing::debug!(%handle, %kind, "created");
        Ok(handle)
    }

    /// Retain `resource` under an existing handle and make sure the handle
    /// has a free hook. On failure the resource is released before returning,
    /// so only call this before handing the resource to the engine.
    pub fn retain(
        &self,
        handle: NativeHandle,
        resource: Arc<dyn RetainedResource>,
    ) -> Result<RegistrationId> {
        let id = self.shared.registry.register(handle, resource);
        if let Err(err) = self.bind(handle) {
            self.shared.registry.release(&id);
            return Err(err);
        }
        Ok(id)
    }

    /// Move the resource behind `id` to `handle` without releasing it.
    ///
    /// Only retention moves; whatever native object uses the resource must be
    /// re-registered on `handle` by the caller.
    ///
    /// `HandleInvalid` for the old key when `id` is no longer registered
    /// (its handle was freed and the resource already released). When
    /// `handle` is not live the resource is released and `HandleInvalid` is
    /// returned for `handle`.
    pub fn rebind(&self, id: &RegistrationId, handle: NativeHandle) -> Result<RegistrationId> {
        let Some(resource) = self.shared.registry.cancel(id) else {
            let stale = match id.key() {
                EntryKey::Handle(old) => old,
                EntryKey::Pending(_) => handle,
            };
            return Err(Error::HandleInvalid { handle: stale });
        };
        let moved = self.retain(handle, resource)?;
        tracing::debug!(from = %id.key(), to = %handle, "registration rebound");
        Ok(moved)
    }
}
