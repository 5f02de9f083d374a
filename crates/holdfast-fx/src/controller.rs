//! Effect parameter controller.
//!
//! One controller drives one effect type on one channel handle. It owns the
//! parameter block's contents and keeps the block pinned in the registry
//! under the channel, so a free notification for the channel both releases
//! the pin and tells the controller its channel is gone.

use crate::block::{BlockPin, SharedBlock};
use crate::params::EffectParameters;
use holdfast_core::{
    EffectHandle, Error, FreeNotificationBridge, NativeHandle, RegistrationId, Result,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Whether the effect is attached to the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ActivationState {
    #[default]
    Inactive,
    Active,
}

struct Binding {
    channel: NativeHandle,
    state: ActivationState,
    priority: i32,
    effect: Option<EffectHandle>,
    pin: Option<RegistrationId>,
    freed: Arc<AtomicBool>,
    /// Active when the channel was freed; the next rebind re-attaches.
    resume: bool,
    disposed: bool,
}

/// Stateful wrapper around one effect on one channel.
///
/// Parameter writes always land in the local block; while Active the whole
/// block is pushed to the engine after each write. All methods take `&self`
/// and serialize on an internal lock, so a controller can be shared between
/// threads.
pub struct EffectController<P: EffectParameters> {
    bridge: FreeNotificationBridge,
    block: SharedBlock<P>,
    binding: Mutex<Binding>,
}

impl<P: EffectParameters> EffectController<P> {
    /// Controller for `channel` with default parameters, Inactive.
    pub fn new(bridge: &FreeNotificationBridge, channel: NativeHandle, priority: i32) -> Result<Self> {
        Self::with_params(bridge, channel, priority, P::default())
    }

    pub fn with_params(
        bridge: &FreeNotificationBridge,
        channel: NativeHandle,
        priority: i32,
        params: P,
    ) -> Result<Self> {
        let block: SharedBlock<P> = Arc::new(Mutex::new(params));
        let (pin, freed) = pin_block(bridge, channel, &block)?;
        tracing::debug!(%channel, kind = ?P::KIND, priority, "effect controller created");

        Ok(Self {
            bridge: bridge.clone(),
            block,
            binding: Mutex::new(Binding {
                channel,
                state: ActivationState::Inactive,
                priority,
                effect: None,
                pin: Some(pin),
                freed,
                resume: false,
                disposed: false,
            }),
        })
    }

    /// Attach the effect and push the current block. No-op while Active.
    ///
    /// On failure the controller stays Inactive and no effect is left
    /// attached.
    pub fn activate(&self) -> Result<()> {
        let mut binding = self.binding.lock();
        ensure_not_disposed(&binding)?;
        if self.settle_freed(&mut binding) {
            return Err(Error::HandleInvalid {
                handle: binding.channel,
            });
        }
        if binding.state == ActivationState::Active {
            return Ok(());
        }
        self.attach(&mut binding)
    }

    /// Detach the effect, keeping the block. No-op while Inactive or after
    /// the channel was freed.
    pub fn deactivate(&self) -> Result<()> {
        let mut binding = self.binding.lock();
        ensure_not_disposed(&binding)?;
        if self.settle_freed(&mut binding) {
            binding.resume = false;
            return Ok(());
        }
        if binding.state == ActivationState::Inactive {
            return Ok(());
        }
        self.detach(&mut binding)
    }

    /// Modify the block. Pushed to the engine when Active.
    ///
    /// The local write happens even when the push fails; the failure is
    /// reported as `ParameterPushFailure` and the controller stays Active.
    pub fn update(&self, f: impl FnOnce(&mut P)) -> Result<()> {
        let mut binding = self.binding.lock();
        ensure_not_disposed(&binding)?;
        f(&mut *self.block.lock());

        if binding.state == ActivationState::Inactive {
            return Ok(());
        }
        if self.settle_freed(&mut binding) {
            return Err(Error::HandleInvalid {
                handle: binding.channel,
            });
        }
        match binding.effect {
            Some(effect) => self.push(effect),
            None => Ok(()),
        }
    }

    /// Replace the whole block.
    pub fn set_params(&self, params: P) -> Result<()> {
        self.update(|p| *p = params)
    }

    /// Copy of the current block.
    pub fn params(&self) -> P {
        *self.block.lock()
    }

    /// Stored while Inactive; while Active the effect is detached and
    /// attached again at the new priority.
    pub fn set_priority(&self, priority: i32) -> Result<()> {
        let mut binding = self.binding.lock();
        ensure_not_disposed(&binding)?;
        if binding.priority == priority {
            return Ok(());
        }
        if self.settle_freed(&mut binding) || binding.state == ActivationState::Inactive {
            binding.priority = priority;
            return Ok(());
        }

        self.detach(&mut binding)?;
        binding.priority = priority;
        self.attach(&mut binding)
    }

    /// Move to `channel`, keeping parameters and activation state.
    ///
    /// An effect that was Active when its old channel was freed is attached
    /// to the new one. The old channel loses every registration this
    /// controller made. If the new channel is not live the controller ends up
    /// Inactive and freed, and a later rebind to a live channel still
    /// re-attaches.
    pub fn rebind(&self, channel: NativeHandle) -> Result<()> {
        let mut binding = self.binding.lock();
        ensure_not_disposed(&binding)?;
        self.settle_freed(&mut binding);

        let was_active = binding.state == ActivationState::Active || binding.resume;
        if binding.state == ActivationState::Active {
            self.detach(&mut binding)?;
        }

        let old = binding.channel;
        binding.channel = channel;
        match self.move_pin(&mut binding, old, channel) {
            Ok(()) => binding.resume = false,
            Err(err) => {
                binding.resume = was_active;
                tracing::warn!(%old, new = %channel, error = %err, "rebind target is not live");
                return Err(err);
            }
        }
        tracing::debug!(%old, new = %channel, was_active, "effect rebound");

        if was_active {
            self.attach(&mut binding)?;
        }
        Ok(())
    }

    /// Detach if Active and release the block pin. Idempotent.
    ///
    /// A detach failure leaves the controller Active and undisposed.
    pub fn dispose(&self) -> Result<()> {
        let mut binding = self.binding.lock();
        if binding.disposed {
            return Ok(());
        }
        if !self.settle_freed(&mut binding) && binding.state == ActivationState::Active {
            self.detach(&mut binding)?;
        }
        if let Some(id) = binding.pin.take() {
            self.bridge.registry().release(&id);
        }
        binding.disposed = true;
        tracing::debug!(channel = %binding.channel, kind = ?P::KIND, "effect controller disposed");
        Ok(())
    }

    pub fn channel(&self) -> NativeHandle {
        self.binding.lock().channel
    }

    pub fn state(&self) -> ActivationState {
        let mut binding = self.binding.lock();
        self.settle_freed(&mut binding);
        binding.state
    }

    pub fn is_active(&self) -> bool {
        self.state() == ActivationState::Active
    }

    pub fn priority(&self) -> i32 {
        self.binding.lock().priority
    }

    pub fn effect_handle(&self) -> Option<EffectHandle> {
        let mut binding = self.binding.lock();
        self.settle_freed(&mut binding);
        binding.effect
    }

    /// Whether the current channel has been freed.
    pub fn is_freed(&self) -> bool {
        let binding = self.binding.lock();
        !binding.disposed && self.channel_gone(&binding)
    }

    pub fn is_disposed(&self) -> bool {
        self.binding.lock().disposed
    }

    /// The block's address, as handed to the engine on each push.
    pub fn block_address(&self) -> usize {
        let block = self.block.lock();
        &*block as *const P as usize
    }

    fn channel_gone(&self, binding: &Binding) -> bool {
        binding.freed.load(Ordering::Acquire)
            || binding
                .pin
                .as_ref()
                .map_or(true, |id| !self.bridge.registry().contains(id))
    }

    /// Drop to Inactive if the channel is gone. Returns whether it is.
    fn settle_freed(&self, binding: &mut Binding) -> bool {
        if binding.disposed || !self.channel_gone(binding) {
            return false;
        }
        if binding.state == ActivationState::Active {
            tracing::debug!(channel = %binding.channel, "channel freed while effect active");
            binding.resume = true;
        }
        binding.state = ActivationState::Inactive;
        binding.effect = None;
        binding.pin = None;
        binding.freed.store(true, Ordering::Release);
        true
    }

    /// Carry the block pin over to `channel`, pinning afresh when the old
    /// channel already released it.
    fn move_pin(&self, binding: &mut Binding, old: NativeHandle, channel: NativeHandle) -> Result<()> {
        if let Some(id) = binding.pin.take() {
            match self.bridge.rebind(&id, channel) {
                Ok(pin) => {
                    binding.pin = Some(pin);
                    return Ok(());
                }
                // Old channel went away between the check and the move
                Err(err) if err.handle() == Some(old) && old != channel => {}
                Err(err) => {
                    binding.freed.store(true, Ordering::Release);
                    return Err(err);
                }
            }
        }

        match pin_block(&self.bridge, channel, &self.block) {
            Ok((pin, freed)) => {
                binding.pin = Some(pin);
                binding.freed = freed;
                Ok(())
            }
            Err(err) => {
                binding.freed = Arc::new(AtomicBool::new(true));
                Err(err)
            }
        }
    }

    fn attach(&self, binding: &mut Binding) -> Result<()> {
        let engine = self.bridge.engine();
        let channel = binding.channel;
        let effect = engine
            .attach_effect(channel, P::KIND, binding.priority)
            .filter(|e| e.is_valid());
        let Some(effect) = effect else {
            let code = engine.error_code();
            tracing::warn!(%channel, kind = ?P::KIND, code, "attach failed");
            return Err(Error::AttachFailure { handle: channel, code });
        };

        if let Err(err) = self.push(effect) {
            if !engine.detach_effect(channel, effect) {
                tracing::warn!(%channel, %effect, code = engine.error_code(), "detach after failed push failed");
            }
            return Err(err);
        }

        binding.effect = Some(effect);
        binding.state = ActivationState::Active;
        tracing::debug!(%channel, %effect, priority = binding.priority, "effect activated");
        Ok(())
    }

    fn detach(&self, binding: &mut Binding) -> Result<()> {
        let engine = self.bridge.engine();
        let channel = binding.channel;
        if let Some(effect) = binding.effect {
            if !engine.detach_effect(channel, effect) {
                let code = engine.error_code();
                tracing::warn!(%channel, %effect, code, "detach failed");
                return Err(Error::DetachFailure { handle: channel, code });
            }
        }
        binding.effect = None;
        binding.state = ActivationState::Inactive;
        tracing::debug!(%channel, "effect deactivated");
        Ok(())
    }

    fn push(&self, effect: EffectHandle) -> Result<()> {
        let engine = self.bridge.engine();
        let block = self.block.lock();
        if engine.set_effect_parameters(effect, block.as_bytes()) {
            Ok(())
        } else {
            let code = engine.error_code();
            tracing::warn!(%effect, code, "parameter push failed");
            Err(Error::ParameterPushFailure { effect, code })
        }
    }
}

impl<P: EffectParameters> Drop for EffectController<P> {
    fn drop(&mut self) {
        if let Err(err) = self.dispose() {
            tracing::warn!(error = %err, "effect controller dropped without clean dispose");
        }
    }
}

impl<P: EffectParameters> std::fmt::Debug for EffectController<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let binding = self.binding.lock();
        f.debug_struct("EffectController")
            .field("kind", &P::KIND)
            .field("channel", &binding.channel)
            .field("state", &binding.state)
            .field("priority", &binding.priority)
            .field("disposed", &binding.disposed)
            .finish()
    }
}

fn ensure_not_disposed(binding: &Binding) -> Result<()> {
    if binding.disposed {
        Err(Error::Disposed)
    } else {
        Ok(())
    }
}

fn pin_block<P: EffectParameters>(
    bridge: &FreeNotificationBridge,
    channel: NativeHandle,
    block: &SharedBlock<P>,
) -> Result<(RegistrationId, Arc<AtomicBool>)> {
    let freed = Arc::new(AtomicBool::new(false));
    let pin = Arc::new(BlockPin::new(block, &freed));
    let id = bridge.retain(channel, pin)?;
    Ok((id, freed))
}
