//! Effect parameter controllers over native channel handles.
//!
//! An [`EffectController`] wraps one native effect on one channel: it holds
//! the effect's `#[repr(C)]` parameter block, attaches and detaches the
//! effect, pushes the block while attached and can follow the effect to a
//! new channel with [`EffectController::rebind`].
//!
//! ```ignore
//! use holdfast_fx::{EffectController, Freeverb};
//!
//! let reverb = EffectController::<Freeverb>::new(&bridge, channel, 0)?;
//! reverb.set_room_size(0.8)?; // stored, nothing attached yet
//! reverb.activate()?;         // attach + push
//! reverb.set_damp(0.3)?;      // push
//! reverb.dispose()?;
//! ```

mod block;
mod controller;
pub mod params;

pub use controller::{ActivationState, EffectController};
pub use params::{Compressor, Echo, EffectParameters, Freeverb, FreeverbMode, ALL_CHANNELS};
