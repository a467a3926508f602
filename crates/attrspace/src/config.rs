//! Configuration for an [`AttributeSpace`](crate::AttributeSpace).

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::Error;

/// Default batch window in milliseconds.
pub const DEFAULT_BATCH_DELAY_MS: u64 = 50;

/// Default notification budget per chain.
pub const DEFAULT_MAX_LOOP_DETECTION: u32 = 3;

/// Configuration for an `AttributeSpace` instance.
///
/// Deserializes from camelCase JSON; every field is optional:
///
/// ```rust
/// use attrspace::AttributeSpaceConfig;
///
/// let config: AttributeSpaceConfig =
///     serde_json::from_str(r#"{ "batchDelay": 20, "enableLogging": false }"#).unwrap();
/// assert_eq!(config.batch_delay_ms, 20);
/// assert!(config.enable_batching);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AttributeSpaceConfig {
    /// Route matches through the batcher instead of delivering immediately.
    pub enable_batching: bool,
    /// Fixed batch window in milliseconds.
    #[serde(alias = "batchDelay")]
    pub batch_delay_ms: u64,
    /// Maximum notifications admitted per re-entrant chain (at least 1).
    pub max_loop_detection: u32,
    /// Emit `tracing` events from the bus.
    pub enable_logging: bool,
}

impl Default for AttributeSpaceConfig {
    fn default() -> Self {
        Self {
            enable_batching: true,
            batch_delay_ms: DEFAULT_BATCH_DELAY_MS,
            max_loop_detection: DEFAULT_MAX_LOOP_DETECTION,
            enable_logging: true,
        }
    }
}

impl AttributeSpaceConfig {
    /// Enables or disables batching.
    #[must_use]
    pub fn with_batching(mut self, enabled: bool) -> Self {
        self.enable_batching = enabled;
        self
    }

    /// Sets the batch window.
    #[must_use]
    pub fn with_batch_delay(mut self, delay: Duration) -> Self {
        self.batch_delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Sets the chain budget.
    #[must_use]
    pub fn with_max_loop_detection(mut self, max: u32) -> Self {
        self.max_loop_detection = max;
        self
    }

    /// Enables or disables bus logging.
    #[must_use]
    pub fn with_logging(mut self, enabled: bool) -> Self {
        self.enable_logging = enabled;
        self
    }

    /// Returns the batch window as a [`Duration`].
    #[must_use]
    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }

    /// Checks the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if `max_loop_detection` is 0.
    pub fn validate(&self) -> Result<(), Error> {
        if self.max_loop_detection == 0 {
            return Err(Error::InvalidConfig(
                "max_loop_detection must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
