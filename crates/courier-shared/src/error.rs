use thiserror::Error;

/// Failures while framing or decoding the wire protocol.
///
/// All of these are connection-fatal: once a frame cannot be decoded the
/// stream position can no longer be trusted.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("Frame is not valid UTF-8")]
    InvalidUtf8,

    #[error("Malformed JSON: {0}")]
    MalformedJson(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}
