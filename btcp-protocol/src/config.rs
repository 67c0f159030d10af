//! Socket configuration shared by the client and server state machines

use std::time::Duration;
use thiserror::Error;

/// Default advertised window, in segments
pub const DEFAULT_WINDOW: u8 = 100;

/// Default per-attempt timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(100);

/// Default number of attempts for handshake and teardown
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// Configuration errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Window must be at least one segment")]
    ZeroWindow,

    #[error("Timeout must be non-zero")]
    ZeroTimeout,

    #[error("At least one attempt is required")]
    ZeroAttempts,
}

/// Window, timeout and retry budget of one socket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketConfig {
    /// Segments this side advertises to its peer
    pub window: u8,
    /// Retransmission timeout, also the wait per handshake/teardown attempt
    pub timeout: Duration,
    /// Handshake and teardown attempts, and the number of consecutive
    /// retransmission timeouts tolerated by `send`
    pub max_attempts: u32,
}

impl Default for SocketConfig {
    fn default() -> Self {
        SocketConfig {
            window: DEFAULT_WINDOW,
            timeout: DEFAULT_TIMEOUT,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl SocketConfig {
    /// Create a configuration with the default retry budget
    pub fn new(window: u8, timeout: Duration) -> Self {
        SocketConfig {
            window,
            timeout,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Override the retry budget
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Reject values the state machines cannot work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window == 0 {
            return Err(ConfigError::ZeroWindow);
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::ZeroAttempts);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = SocketConfig::default();
        assert_eq!(config.window, 100);
        assert_eq!(config.timeout, Duration::from_millis(100));
        assert_eq!(config.max_attempts, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        let zero_window = SocketConfig::new(0, Duration::from_millis(10));
        assert_eq!(zero_window.validate(), Err(ConfigError::ZeroWindow));

        let zero_timeout = SocketConfig::new(5, Duration::ZERO);
        assert_eq!(zero_timeout.validate(), Err(ConfigError::ZeroTimeout));

        let zero_attempts = SocketConfig::default().with_max_attempts(0);
        assert_eq!(zero_attempts.validate(), Err(ConfigError::ZeroAttempts));
    }
}
