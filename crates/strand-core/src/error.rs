//! Error types for the strand runtime

use core::fmt;

/// Result type for runtime operations
pub type StrandResult<T> = Result<T, StrandError>;

/// Errors that can occur in runtime operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StrandError {
    /// Runtime not initialized
    NotInitialized,

    /// Operation not valid for the task's current state,
    /// e.g. suspending a task that already has a pending I/O operation
    InvalidState,

    /// Poller registration or wait failed (raw errno)
    Poller(i32),

    /// Platform call failed (raw errno)
    Platform(i32),

    /// Configuration rejected by validation
    InvalidConfig(&'static str),
}

impl fmt::Display for StrandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrandError::NotInitialized => write!(f, "runtime not initialized"),
            StrandError::InvalidState => write!(f, "invalid task state for operation"),
            StrandError::Poller(errno) => write!(f, "poller error: errno {}", errno),
            StrandError::Platform(errno) => write!(f, "platform error: errno {}", errno),
            StrandError::InvalidConfig(what) => write!(f, "invalid configuration: {}", what),
        }
    }
}

impl std::error::Error for StrandError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(StrandError::Poller(9).to_string(), "poller error: errno 9");
        assert_eq!(
            StrandError::InvalidConfig("max_events must be > 0").to_string(),
            "invalid configuration: max_events must be > 0"
        );
    }
}
