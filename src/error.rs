use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced across the public API.
///
/// Most framing and decode failures never reach this type: per the error
/// handling policy, a malformed KISS/AX.25 frame or an incomplete AXDP
/// message is dropped or buffered internally and only logged. These
/// variants exist so internal diagnostics and unit tests have something
/// concrete to assert on; callers mostly see `ResourceBound`, `Transfer`
/// and `Protocol` variants.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// KISS or AX.25 framing was malformed; the offending frame was dropped.
    #[error("framing error: {0}")]
    Framing(String),

    /// AXDP TLV stream could not be decoded even though the magic was present.
    #[error("axdp decode error: {0}")]
    Decode(String),

    /// A chunk or whole-file integrity check failed.
    #[error("integrity error: {0}")]
    Integrity(String),

    /// A session-level protocol violation (FRMR, unexpected SABM, N2 exceeded).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A decompression bound was exceeded.
    #[error("resource bound exceeded: {0}")]
    ResourceBound(String),

    /// Persistence read or write failed.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// A file transfer failed (peer NACK, cancel, retry exhaustion, timeout).
    #[error("transfer error: {0}")]
    Transfer(String),

    /// No session exists for the given key.
    #[error("no session for {0}")]
    NoSuchSession(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}
