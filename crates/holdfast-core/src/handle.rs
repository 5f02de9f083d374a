//! Opaque native handle types.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! native_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[repr(transparent)]
        pub struct $name(pub u32);

        impl $name {
            /// The engine's "no object" value.
            pub const INVALID: Self = Self(0);

            #[inline]
            pub fn is_valid(self) -> bool {
                self.0 != 0
            }

            #[inline]
            pub fn raw(self) -> u32 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "#{}"), self.0)
            }
        }
    };
}

native_id!(
    /// Stream, channel or recording handle. Values are recycled by the engine
    /// once freed, so a handle is only meaningful together with its registry
    /// generation.
    NativeHandle,
    "handle"
);

native_id!(
    /// Effect attached to a channel.
    EffectHandle,
    "fx"
);

native_id!(
    /// DSP callback attached to a channel.
    DspHandle,
    "dsp"
);

native_id!(
    /// Sync (event callback) attached to a channel.
    SyncHandle,
    "sync"
);
