use crate::channel::ChannelError;
use crate::command::Opcode;
use std::io;
use thiserror::Error;

/// The primary error type for the `ideal-led-lib` library.
#[derive(Error, Debug)]
pub enum LedError {
    #[error("Malformed {opcode} command: {reason}")]
    MalformedCommand { opcode: Opcode, reason: String },

    #[error("Decrypted {expected} response does not match: {found}")]
    DecryptMismatch { expected: Opcode, found: String },

    #[error("Connection to {address} failed: {reason}")]
    ConnectionFailed { address: String, reason: String },

    #[error("{opcode} command timed out after {attempts} attempt(s)")]
    CommandTimeout { opcode: Opcode, attempts: u32 },

    #[error("Session busy: {opcode} rejected while another command is in flight")]
    SessionBusy { opcode: Opcode },

    #[error("Cancelled during {context}")]
    Cancelled { context: String },

    #[error("Session is not connected ({opcode} not sent)")]
    NotConnected { opcode: Opcode },

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Invalid configuration: {0}")]
    Config(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl LedError {
    /// Errors a probe records as a failed command instead of aborting the run.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LedError::CommandTimeout { .. }
                | LedError::SessionBusy { .. }
                | LedError::ConnectionFailed { .. }
                | LedError::Channel(_)
                | LedError::DecryptMismatch { .. }
        )
    }
}
