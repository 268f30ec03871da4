use thiserror::Error;

/// Firmware error types covering configuration, peripherals, and lifecycle faults.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SonarError {
    /// Configuration or initialization error.
    #[error("configuration error: {0}")]
    Config(String),

    /// GPIO output could not be driven.
    #[error("pin error: {0}")]
    Pin(String),

    /// Timer capture unit failure.
    #[error("capture error: {0}")]
    Capture(String),

    /// Serial transport failure.
    #[error("serial error: {0}")]
    Serial(String),

    /// I/O operation error.
    #[error("I/O error: {0}")]
    Io(String),

    /// Real-time scheduling setup failed.
    #[error("real-time setup error: {0}")]
    Realtime(String),

    /// Activity thread could not be started or did not exit cleanly.
    #[error("activity {name}: {reason}")]
    Activity {
        /// Activity name.
        name: String,
        /// What went wrong.
        reason: String,
    },

    /// Invalid state transition attempted.
    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        /// Source state.
        from: String,
        /// Attempted target state.
        to: String,
    },
}

/// Convenience type alias for firmware operations.
pub type SonarResult<T> = Result<T, SonarError>;
