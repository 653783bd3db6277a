//! Protocol error types.

use thiserror::Error;

/// Errors raised while reassembling or validating frames.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Unterminated input grew past the configured reassembly limit.
    #[error("frame exceeds {limit} bytes without a terminator")]
    FrameTooLarge {
        /// Configured limit in bytes.
        limit: usize,
    },
    /// A frame arrived without a header its command requires.
    #[error("{command} frame missing {header} header")]
    MissingHeader {
        /// Command of the offending frame.
        command: String,
        /// Name of the missing header.
        header: &'static str,
    },
}

/// Result type for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;
