//! Builder for configuring and constructing a [`Holdfast`].

use crate::core::{DispatchMode, NativeEngine, RetentionConfig};
use crate::{Holdfast, Result};
use std::sync::Arc;

/// Defaults to inline release on the engine's notification thread. Switch
/// to [`DispatchMode::Deferred`] when release work must never run nested
/// inside the engine's own callback dispatch.
///
/// # Example
///
/// ```ignore
/// use holdfast::prelude::*;
///
/// let holdfast = Holdfast::builder()
///     .dispatch(DispatchMode::Deferred)
///     .queue_capacity(256)
///     .build(engine)?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct HoldfastBuilder {
    config: RetentionConfig,
}

impl HoldfastBuilder {
    pub fn dispatch(mut self, mode: DispatchMode) -> Self {
        self.config.dispatch = mode;
        self
    }

    /// Default: 1024. Only used in deferred mode.
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue_capacity = capacity;
        self
    }

    /// Default: `"holdfast-release"`
    pub fn worker_name(mut self, name: impl Into<String>) -> Self {
        self.config.worker_name = name.into();
        self
    }

    /// Replace the whole configuration, e.g. one loaded from a file.
    pub fn config(mut self, config: RetentionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self, engine: Arc<dyn NativeEngine>) -> Result<Holdfast> {
        Holdfast::from_config(engine, self.config)
    }
}
