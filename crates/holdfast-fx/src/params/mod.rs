//! Native effect parameter blocks.
//!
//! Each block is a `#[repr(C)]` struct laid out exactly as the engine expects.
//! The controller hands the engine the block's address on every push, so the
//! layout is part of the contract with the native library.

mod compressor;
mod echo;
mod freeverb;

pub use compressor::Compressor;
pub use echo::Echo;
pub use freeverb::{Freeverb, FreeverbMode};

use holdfast_core::EffectKind;
use std::fmt::Debug;
use std::mem;
use std::slice;

/// Channel selector meaning "all channels".
pub const ALL_CHANNELS: i32 = -1;

/// A parameter block for one native effect type.
///
/// # Safety
///
/// Implementors must be `#[repr(C)]` with no padding bytes and no pointers,
/// so that viewing them as `&[u8]` is sound and matches the native layout.
pub unsafe trait EffectParameters: Copy + Default + Debug + Send + Sync + 'static {
    /// Effect type attached for this block.
    const KIND: EffectKind;

    /// The block as the engine reads it.
    fn as_bytes(&self) -> &[u8] {
        // SAFETY: guaranteed by the trait contract.
        unsafe { slice::from_raw_parts((self as *const Self).cast::<u8>(), mem::size_of::<Self>()) }
    }
}

pub(crate) fn unit(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_sizes_have_no_padding() {
        assert_eq!(mem::size_of::<Freeverb>(), 7 * 4);
        assert_eq!(mem::size_of::<Echo>(), 6 * 4);
        assert_eq!(mem::size_of::<Compressor>(), 6 * 4);
        assert_eq!(Freeverb::default().as_bytes().len(), 28);
    }

    #[test]
    fn test_preset_from_json() {
        let preset: Freeverb = serde_json::from_str(
            r#"{"dry_mix":0.2,"wet_mix":0.8,"room_size":0.8,"damp":0.3,"width":1.0,"mode":"Freeze","channel":-1}"#,
        )
        .unwrap();
        approx::assert_relative_eq!(preset.room_size, 0.8);
        approx::assert_relative_eq!(preset.damp, 0.3);
        assert_eq!(preset.mode, FreeverbMode::Freeze);
        assert_eq!(preset.channel, ALL_CHANNELS);
    }

    #[test]
    fn test_unit_clamps() {
        assert_eq!(unit(1.5), 1.0);
        assert_eq!(unit(-0.1), 0.0);
        assert_eq!(unit(f32::NAN), 0.0);
        assert_eq!(unit(0.3), 0.3);
    }
}
