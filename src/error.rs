use std::error::Error;
use std::fmt;
use std::fmt::Display;

use web_time::Duration;

/// This enum contains all error messages this library can return. Most API
/// functions will generally return a [`Result<_, SyncError>`].
///
/// [`Result<_, SyncError>`]: std::result::Result
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SyncError {
    /// The transport could not be established or maintained within the retry
    /// cap. The connection is terminally failed until the owner
    /// re-initializes it.
    ConnectionFailed {
        /// How many connection attempts were made before giving up.
        attempts: u32,
    },
    /// An awaited confirmation never arrived within its bound.
    Timeout {
        /// How long the session waited before giving up.
        waited: Duration,
    },
    /// An action was invoked without its required session, player, or
    /// connection preconditions. Not recoverable by retry.
    InvalidState {
        /// Further specifies which precondition was missing.
        info: String,
    },
    /// You made an invalid request, usually by using wrong parameters for
    /// function calls or an invalid configuration.
    InvalidRequest {
        /// Further specifies why the request was invalid.
        info: String,
    },
}

impl Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncError::ConnectionFailed { attempts } => {
                write!(
                    f,
                    "Connection failed after {} attempts; re-initialize the session to retry.",
                    attempts
                )
            }
            SyncError::Timeout { waited } => {
                write!(
                    f,
                    "Timed out after {}ms waiting for a confirmation.",
                    waited.as_millis()
                )
            }
            SyncError::InvalidState { info } => {
                write!(f, "Invalid State: {}", info)
            }
            SyncError::InvalidRequest { info } => {
                write!(f, "Invalid Request: {}", info)
            }
        }
    }
}

impl Error for SyncError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_attempt_count() {
        let err = SyncError::ConnectionFailed { attempts: 5 };
        assert!(err.to_string().contains("5 attempts"));
    }

    #[test]
    fn display_includes_timeout_millis() {
        let err = SyncError::Timeout {
            waited: Duration::from_secs(30),
        };
        assert!(err.to_string().contains("30000ms"));
    }

    #[test]
    fn errors_are_comparable() {
        let a = SyncError::InvalidState {
            info: "no mirror".to_owned(),
        };
        let b = SyncError::InvalidState {
            info: "no mirror".to_owned(),
        };
        assert_eq!(a, b);
    }
}
