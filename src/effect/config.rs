//! Interpreter tuning knobs.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Default number of interpreter steps a fiber may take before it yields.
pub const DEFAULT_AUTO_YIELD_THRESHOLD: usize = 1024;

/// Default number of swallowed finalizer failures a fiber reports.
pub const DEFAULT_MAX_FINALIZER_ERRORS_LOGGED: usize = 16;

/// Configuration shared by every fiber of a [`Runtime`](super::Runtime).
///
/// # Examples
///
/// ```rust
/// use strand::effect::RuntimeConfig;
///
/// let config = RuntimeConfig::default().with_auto_yield_threshold(64);
/// assert_eq!(config.auto_yield_threshold, 64);
/// assert!(config.validate().is_ok());
///
/// assert!(RuntimeConfig::default().with_auto_yield_threshold(0).validate().is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct RuntimeConfig {
    /// Steps a run loop takes before handing its worker back to the
    /// execution context. Keeps long synchronous chains from starving
    /// other fibers.
    pub auto_yield_threshold: usize,
    /// Finalizer failures a single canceled fiber reports through
    /// [`ExecutionContext::report_failure`](super::ExecutionContext::report_failure)
    /// before the rest are dropped silently.
    pub max_finalizer_errors_logged: usize,
}

impl RuntimeConfig {
    /// Returns a copy with a different auto-yield threshold.
    #[must_use]
    pub const fn with_auto_yield_threshold(mut self, threshold: usize) -> Self {
        self.auto_yield_threshold = threshold;
        self
    }

    /// Returns a copy with a different finalizer error reporting limit.
    #[must_use]
    pub const fn with_max_finalizer_errors_logged(mut self, limit: usize) -> Self {
        self.max_finalizer_errors_logged = limit;
        self
    }

    /// Checks that the configuration can drive a run loop.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ZeroAutoYieldThreshold`] if the threshold is 0.
    pub const fn validate(&self) -> Result<(), ConfigError> {
        if self.auto_yield_threshold == 0 {
            return Err(ConfigError::ZeroAutoYieldThreshold);
        }
        Ok(())
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            auto_yield_threshold: DEFAULT_AUTO_YIELD_THRESHOLD,
            max_finalizer_errors_logged: DEFAULT_MAX_FINALIZER_ERRORS_LOGGED,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = RuntimeConfig::default();
        assert_eq!(config.auto_yield_threshold, 1024);
        assert_eq!(config.max_finalizer_errors_logged, 16);
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn test_zero_threshold_is_rejected() {
        let config = RuntimeConfig::default().with_auto_yield_threshold(0);
        assert_eq!(config.validate(), Err(ConfigError::ZeroAutoYieldThreshold));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_missing_fields_fall_back_to_defaults() {
        let config: RuntimeConfig =
            serde_json::from_str(r#"{ "auto_yield_threshold": 8 }"#).expect("valid json");
        assert_eq!(config.auto_yield_threshold, 8);
        assert_eq!(config.max_finalizer_errors_logged, 16);
    }
}
