use thiserror::Error;

/// Errors that can occur while operating on a stream file.
///
/// Unexpected end-of-file on the read side is deliberately *not* here:
/// truncated streams from an aborted recorder are expected, and the read
/// loop reports them as success after forwarding a synthetic close frame.
#[derive(Debug, Error)]
pub enum StreamFileError {
    /// A stream file is already attached to this controller.
    #[error("already attached to a stream file")]
    Busy,

    /// Operation invoked in the wrong lifecycle state. The message names
    /// what the operation required; the caller must fix its call order.
    #[error("{0}")]
    InvalidState(&'static str),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The file does not start with the stream signature.
    #[error("bad stream magic 0x{0:08x}")]
    BadMagic(u32),

    /// The header names a stream version this build cannot parse.
    #[error("unsupported stream version 0x{0:02x}")]
    UnsupportedVersion(u32),
}
