use super::{unit, EffectParameters, ALL_CHANNELS};
use crate::controller::EffectController;
use holdfast_core::{EffectKind, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u32)]
pub enum FreeverbMode {
    #[default]
    Normal = 0,
    /// Infinite decay.
    Freeze = 1,
}

/// Freeverb reverb block.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[repr(C)]
pub struct Freeverb {
    pub dry_mix: f32,
    pub wet_mix: f32,
    pub room_size: f32,
    pub damp: f32,
    pub width: f32,
    pub mode: FreeverbMode,
    pub channel: i32,
}

impl Default for Freeverb {
    fn default() -> Self {
        Self {
            dry_mix: 0.0,
            wet_mix: 1.0,
            room_size: 0.5,
            damp: 0.5,
            width: 1.0,
            mode: FreeverbMode::Normal,
            channel: ALL_CHANNELS,
        }
    }
}

// SAFETY: repr(C), five f32 then two 4-byte fields, no padding.
unsafe impl EffectParameters for Freeverb {
    const KIND: EffectKind = EffectKind::Freeverb;
}

impl EffectController<Freeverb> {
    pub fn room_size(&self) -> f32 {
        self.params().room_size
    }

    /// Clamped to `0.0..=1.0`.
    pub fn set_room_size(&self, value: f32) -> Result<()> {
        self.update(|p| p.room_size = unit(value))
    }

    pub fn damp(&self) -> f32 {
        self.params().damp
    }

    pub fn set_damp(&self, value: f32) -> Result<()> {
        self.update(|p| p.damp = unit(value))
    }

    pub fn width(&self) -> f32 {
        self.params().width
    }

    pub fn set_width(&self, value: f32) -> Result<()> {
        self.update(|p| p.width = unit(value))
    }

    pub fn set_mix(&self, dry: f32, wet: f32) -> Result<()> {
        self.update(|p| {
            p.dry_mix = unit(dry);
            p.wet_mix = unit(wet);
        })
    }

    pub fn mode(&self) -> FreeverbMode {
        self.params().mode
    }

    pub fn set_mode(&self, mode: FreeverbMode) -> Result<()> {
        self.update(|p| p.mode = mode)
    }
}
