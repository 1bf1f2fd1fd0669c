//! Bus configuration

use serde::{Deserialize, Serialize};

/// Priority used when a subscription does not name one
pub const DEFAULT_PRIORITY: i32 = 0;

/// Bus configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Priority assigned by `EventBus::subscribe`
    pub default_priority: i32,
    /// Complete the streams of entries removed by an explicit unsubscribe.
    ///
    /// Replacing an entry by re-subscribing always completes the old stream.
    pub complete_on_unsubscribe: bool,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            default_priority: DEFAULT_PRIORITY,
            complete_on_unsubscribe: true,
        }
    }
}

impl BusConfig {
    /// Set the default priority.
    pub fn with_default_priority(mut self, priority: i32) -> Self {
        self.default_priority = priority;
        self
    }

    /// Set whether explicit unsubscribes complete removed streams.
    pub fn with_complete_on_unsubscribe(mut self, complete: bool) -> Self {
        self.complete_on_unsubscribe = complete;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BusConfig::default();
        assert_eq!(config.default_priority, 0);
        assert!(config.complete_on_unsubscribe);
    }

    #[test]
    fn test_partial_deserialize_fills_defaults() {
        let config: BusConfig = serde_json::from_str(r#"{"default_priority": 5}"#).unwrap();
        assert_eq!(config.default_priority, 5);
        assert!(config.complete_on_unsubscribe);
    }

    #[test]
    fn test_builder_methods() {
        let config = BusConfig::default()
            .with_default_priority(-3)
            .with_complete_on_unsubscribe(false);
        assert_eq!(config.default_priority, -3);
        assert!(!config.complete_on_unsubscribe);
    }
}
