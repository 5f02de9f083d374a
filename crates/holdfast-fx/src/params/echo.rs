use super::{unit, EffectParameters, ALL_CHANNELS};
use crate::controller::EffectController;
use holdfast_core::{EffectKind, Result};
use serde::{Deserialize, Serialize};

/// Longest supported delay, in seconds.
pub const MAX_DELAY: f32 = 6.0;

/// Echo block. `feedback` is signed: negative values invert the echo.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[repr(C)]
pub struct Echo {
    pub dry_mix: f32,
    pub wet_mix: f32,
    pub feedback: f32,
    /// Seconds.
    pub delay: f32,
    /// Non-zero swaps the echo between channels.
    pub stereo: i32,
    pub channel: i32,
}

impl Default for Echo {
    fn default() -> Self {
        Self {
            dry_mix: 1.0,
            wet_mix: 0.5,
            feedback: 0.5,
            delay: 0.5,
            stereo: 0,
            channel: ALL_CHANNELS,
        }
    }
}

// SAFETY: repr(C), six 4-byte fields.
unsafe impl EffectParameters for Echo {
    const KIND: EffectKind = EffectKind::Echo;
}

impl EffectController<Echo> {
    pub fn delay(&self) -> f32 {
        self.params().delay
    }

    /// Clamped to `0.0..=MAX_DELAY` seconds.
    pub fn set_delay(&self, seconds: f32) -> Result<()> {
        let seconds = if seconds.is_nan() { 0.0 } else { seconds.clamp(0.0, MAX_DELAY) };
        self.update(|p| p.delay = seconds)
    }

    pub fn feedback(&self) -> f32 {
        self.params().feedback
    }

    pub fn set_feedback(&self, value: f32) -> Result<()> {
        let value = if value.is_nan() { 0.0 } else { value.clamp(-1.0, 1.0) };
        self.update(|p| p.feedback = value)
    }

    pub fn set_mix(&self, dry: f32, wet: f32) -> Result<()> {
        self.update(|p| {
            p.dry_mix = unit(dry);
            p.wet_mix = unit(wet);
        })
    }

    pub fn is_stereo(&self) -> bool {
        self.params().stereo != 0
    }

    pub fn set_stereo(&self, stereo: bool) -> Result<()> {
        self.update(|p| p.stereo = i32::from(stereo))
    }
}
