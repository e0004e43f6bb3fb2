//! Error types for the unlock procedure.
//!
//! The bootloader console gives no structured replies, so most failures are
//! inferred from what is missing in the captured output.

use std::{io, time::Duration};

use thiserror::Error;

use crate::console::SessionState;

/// Everything that can go wrong while driving the device.
#[derive(Debug, Error)]
pub enum UnlockError {
    /// Opening, writing to or reading from the serial port failed.
    #[error("serial connection error: {0}")]
    Connection(String),

    /// An expected token or pattern is absent from the console output.
    #[error("could not parse console output: {0}")]
    Parse(String),

    /// A post-write check did not find what was written.
    #[error("verification failed: {0}")]
    Verification(String),

    /// A banner did not show up before the deadline.
    #[error("no `{banner}` after {elapsed:?}")]
    Timeout { banner: String, elapsed: Duration },

    /// The console cannot take a command in its current state.
    #[error("console not ready for commands ({0:?})")]
    NotReady(SessionState),

    /// A filesystem write was requested without a validated data partition.
    #[error("no valid data partition to write to")]
    MissingPartition,

    /// The flag file may only be persisted once per run.
    #[error("flag persistence was already attempted in this run")]
    AlreadyPersisted,

    #[error("could not write backup: {0}")]
    Backup(#[source] io::Error),

    #[error("could not serialize backup: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Result type for unlock operations
pub type Result<T> = std::result::Result<T, UnlockError>;

impl From<serialport::Error> for UnlockError {
    fn from(e: serialport::Error) -> Self {
        UnlockError::Connection(e.to_string())
    }
}

impl From<io::Error> for UnlockError {
    fn from(e: io::Error) -> Self {
        UnlockError::Connection(e.to_string())
    }
}

impl UnlockError {
    /// Short name of the error kind, used in stage reports.
    pub fn kind(&self) -> &'static str {
        match self {
            UnlockError::Connection(_) => "ConnectionError",
            UnlockError::Parse(_) => "ParseError",
            UnlockError::Verification(_)
            | UnlockError::MissingPartition
            | UnlockError::AlreadyPersisted => "VerificationError",
            UnlockError::Timeout { .. } => "TimeoutError",
            UnlockError::NotReady(_) => "StateError",
            UnlockError::Backup(_) | UnlockError::Serialize(_) => "BackupError",
        }
    }
}
