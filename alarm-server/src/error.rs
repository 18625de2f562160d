//! Error types for the alarm listener.

use crate::server::ListenerState;

/// Errors surfaced by [`AlarmServer`](crate::AlarmServer) lifecycle calls.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The address could not be bound (port in use, permission denied, ...)
    #[error("Failed to bind alarm listener on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// `start` was called on a listener that is already running
    #[error("Alarm listener is already running")]
    AlreadyRunning,

    /// The listener was in a state that does not allow the call
    #[error("Alarm listener is {0:?}")]
    InvalidState(ListenerState),
}

/// Invalid listener configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid listener binding '{value}': {reason}")]
    InvalidBinding { value: String, reason: String },
}

/// Convenience type alias for lifecycle results.
pub type Result<T> = std::result::Result<T, ServerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_error_display() {
        let error = ServerError::Bind {
            addr: "0.0.0.0:8080".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::AddrInUse, "address in use"),
        };
        assert_eq!(
            error.to_string(),
            "Failed to bind alarm listener on 0.0.0.0:8080: address in use"
        );

        assert_eq!(
            ServerError::AlreadyRunning.to_string(),
            "Alarm listener is already running"
        );
        assert_eq!(
            ServerError::InvalidState(ListenerState::Stopping).to_string(),
            "Alarm listener is Stopping"
        );
    }

    #[test]
    fn test_config_error_display() {
        let error = ConfigError::InvalidBinding {
            value: "8080".to_string(),
            reason: "missing port".to_string(),
        };
        assert_eq!(error.to_string(), "Invalid listener binding '8080': missing port");
    }
}
