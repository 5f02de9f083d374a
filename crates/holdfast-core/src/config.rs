//! Retention layer configuration.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Where resource release runs after a free notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DispatchMode {
    /// Release on the engine thread that delivered the notification.
    #[default]
    Inline,
    /// Detach on the engine thread, release on the dispatcher worker.
    Deferred,
}

/// Configuration for the retention layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    pub dispatch: DispatchMode,
    /// Bounded queue size of the deferred dispatcher. Releases that do not
    /// fit spill into an overflow list the worker drains; the engine thread
    /// never blocks and never releases inline while the worker runs.
    pub queue_capacity: usize,
    pub worker_name: String,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            dispatch: DispatchMode::Inline,
            queue_capacity: 1024,
            worker_name: "holdfast-release".into(),
        }
    }
}

impl RetentionConfig {
    pub const MAX_QUEUE_CAPACITY: usize = 65536;

    pub fn validate(&self) -> Result<()> {
        if self.queue_capacity == 0 || self.queue_capacity > Self::MAX_QUEUE_CAPACITY {
            return Err(Error::InvalidConfig(format!(
                "queue_capacity {} out of range (1-{})",
                self.queue_capacity,
                Self::MAX_QUEUE_CAPACITY
            )));
        }
        if self.worker_name.trim().is_empty() {
            return Err(Error::InvalidConfig("worker_name is empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RetentionConfig::default();
        assert_eq!(config.dispatch, DispatchMode::Inline);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_capacity() {
        let config = RetentionConfig {
            queue_capacity: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

        let config = RetentionConfig {
            queue_capacity: RetentionConfig::MAX_QUEUE_CAPACITY + 1,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_config_from_json() {
        let config: RetentionConfig = serde_json::from_str(r#"{"dispatch":"Deferred"}"#).unwrap();
        assert_eq!(config.dispatch, DispatchMode::Deferred);
        assert_eq!(config.queue_capacity, 1024);
        assert_eq!(config.worker_name, "holdfast-release");
    }
}
