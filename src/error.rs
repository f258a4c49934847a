use crate::protocol::{StopReason, WorkerId};
use crate::Superstep;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Illegal argument: {0}")]
    IllegalArgument(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid graph input: {0}")]
    InvalidGraph(String),

    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse configuration JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to encode or decode a frame: {0}")]
    Codec(#[from] bincode::Error),

    #[error("Worker '{name}' is already registered")]
    DuplicateRegistration { name: String },

    #[error("Registration window is closed")]
    RegistrationWindowClosed,

    #[error("Only {registered} of {expected} workers registered before the deadline")]
    InsufficientWorkers { expected: u32, registered: u32 },

    #[error("Master at {address} unreachable after {attempts} attempts")]
    ConnectionRefused { address: String, attempts: u32 },

    #[error("Connection lost: {0}")]
    Disconnected(String),

    #[error("Superstep {superstep}: expected {expected} messages, received {received}")]
    MessagesLost {
        superstep: Superstep,
        expected: u64,
        received: u64,
    },

    #[error("Computation failed at superstep {superstep}, failed workers: {workers:?}")]
    ComputationFailed {
        superstep: Superstep,
        workers: Vec<WorkerId>,
    },

    #[error("Stopped by master: {0}")]
    Stopped(StopReason),

    #[error("Computation cancelled")]
    Cancelled,

    #[error("Task '{task}' panicked: {message}")]
    Panicked { task: String, message: String },
}

impl Error {
    /// Process exit status for a run that ended with this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::IllegalArgument(_) | Error::InvalidConfig(_) | Error::Json(_) => 2,
            Error::DuplicateRegistration { .. }
            | Error::RegistrationWindowClosed
            | Error::InsufficientWorkers { .. }
            | Error::ConnectionRefused { .. }
            | Error::Stopped(StopReason::RegistrationFailed) => 3,
            Error::ComputationFailed { .. }
            | Error::MessagesLost { .. }
            | Error::Disconnected(_)
            | Error::Stopped(_)
            | Error::Cancelled => 4,
            Error::InvalidGraph(_) | Error::Io(_) | Error::Codec(_) | Error::Panicked { .. } => 1,
        }
    }

    pub fn is_registration_failure(&self) -> bool {
        self.exit_code() == 3
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_separate_failure_classes() {
        assert_eq!(Error::IllegalArgument("worker111".into()).exit_code(), 2);
        assert_eq!(Error::RegistrationWindowClosed.exit_code(), 3);
        assert_eq!(
            Error::InsufficientWorkers {
                expected: 3,
                registered: 2
            }
            .exit_code(),
            3
        );
        assert_eq!(
            Error::ComputationFailed {
                superstep: 4,
                workers: vec![WorkerId(1)]
            }
            .exit_code(),
            4
        );
        assert!(Error::Stopped(StopReason::RegistrationFailed).is_registration_failure());
        assert!(!Error::Cancelled.is_registration_failure());
    }
}
