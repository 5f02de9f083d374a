use super::{EffectParameters, ALL_CHANNELS};
use crate::controller::EffectController;
use holdfast_core::{EffectKind, Result};
use serde::{Deserialize, Serialize};

/// Compressor block. Gain and threshold in dB, times in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[repr(C)]
pub struct Compressor {
    pub gain: f32,
    pub threshold: f32,
    pub ratio: f32,
    pub attack: f32,
    pub release: f32,
    pub channel: i32,
}

impl Default for Compressor {
    fn default() -> Self {
        Self {
            gain: 5.0,
            threshold: -15.0,
            ratio: 3.0,
            attack: 20.0,
            release: 200.0,
            channel: ALL_CHANNELS,
        }
    }
}

// SAFETY: repr(C), six 4-byte fields.
unsafe impl EffectParameters for Compressor {
    const KIND: EffectKind = EffectKind::Compressor;
}

impl EffectController<Compressor> {
    pub fn threshold(&self) -> f32 {
        self.params().threshold
    }

    /// dBFS, at most 0.
    pub fn set_threshold(&self, db: f32) -> Result<()> {
        self.update(|p| p.threshold = db.min(0.0))
    }

    pub fn ratio(&self) -> f32 {
        self.params().ratio
    }

    /// At least 1:1.
    pub fn set_ratio(&self, ratio: f32) -> Result<()> {
        self.update(|p| p.ratio = ratio.max(1.0))
    }

    pub fn gain(&self) -> f32 {
        self.params().gain
    }

    pub fn set_gain(&self, db: f32) -> Result<()> {
        self.update(|p| p.gain = db)
    }

    /// Attack and release, in milliseconds.
    pub fn set_times(&self, attack: f32, release: f32) -> Result<()> {
        self.update(|p| {
            p.attack = attack.max(0.01);
            p.release = release.max(0.01);
        })
    }
}
