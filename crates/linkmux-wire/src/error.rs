/// Errors that can occur while encoding or decoding wire primitives.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    /// A decode ran past the available bytes.
    #[error("truncated field ({needed} bytes needed, {have} available)")]
    Truncated { needed: usize, have: usize },

    /// A null-terminated string has no terminator before the buffer ends.
    #[error("unterminated string ({0} bytes scanned)")]
    MissingTerminator(usize),

    /// A null-terminated string holds invalid UTF-8.
    #[error("invalid utf-8 in string field")]
    InvalidUtf8,

    /// A string scheduled for encoding contains an embedded NUL byte.
    #[error("string contains embedded NUL at offset {0}")]
    EmbeddedNul(usize),
}

pub type Result<T> = std::result::Result<T, WireError>;
