use std::io;

use thiserror::Error;

// Distinct from any OS error code and from zero (success).
pub const PROTOCOL_VIOLATION_CODE: i32 = -1;

#[derive(Debug, Error)]
pub enum SenderError {
    #[error("failed the bind: {0}")]
    Bind(#[source] io::Error),

    #[error("corrupt handshake message")]
    CorruptHandshake,

    #[error("corrupt request")]
    CorruptRequest,

    #[error("socket i/o failed: {0}")]
    Socket(#[source] io::Error),

    #[error("stream operation failed: {0}")]
    Stream(#[source] io::Error),
}

impl SenderError {
    pub fn code(&self) -> i32 {
        match self {
            SenderError::Bind(e) | SenderError::Socket(e) | SenderError::Stream(e) => {
                e.raw_os_error().unwrap_or(PROTOCOL_VIOLATION_CODE)
            }
            SenderError::CorruptHandshake | SenderError::CorruptRequest => {
                PROTOCOL_VIOLATION_CODE
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum ReceiverError {
    #[error("invalid handshake")]
    InvalidHandshake,

    #[error("socket i/o failed: {0}")]
    Socket(#[source] io::Error),

    #[error("stream operation failed: {0}")]
    Stream(#[source] io::Error),
}

impl ReceiverError {
    pub fn code(&self) -> i32 {
        match self {
            ReceiverError::Socket(e) | ReceiverError::Stream(e) => {
                e.raw_os_error().unwrap_or(PROTOCOL_VIOLATION_CODE)
            }
            ReceiverError::InvalidHandshake => PROTOCOL_VIOLATION_CODE,
        }
    }
}
