//! Error types for the EXB format

use thiserror::Error;

use crate::tag::FieldKind;

/// EXB error types
#[derive(Debug, Error)]
pub enum ExbError {
    /// Encountered unexpected end of input.
    #[error("Unexpected end of input")]
    UnexpectedEof,
    /// Stream does not start with a valid endianness byte.
    #[error("Invalid endianness marker: {0:#04x}")]
    InvalidEndianMarker(u8),
    /// A tag's field kind nibble is outside the known range.
    #[error("Unknown field kind in tag byte {0:#04x}")]
    CorruptTag(u8),
    /// A decode routine expected one field kind and got an incompatible one.
    #[error("Expected {expected:?} field, got {got:?}")]
    UnexpectedFieldKind {
        /// The kind the decode routine was prepared to handle.
        expected: FieldKind,
        /// The kind actually found in the stream.
        got: FieldKind,
    },
    /// Encoded integer magnitude exceeds the destination type.
    #[error("Encoded integer does not fit the destination type")]
    IntegerTooLarge,
    /// Varint ran past the maximum encoded length.
    #[error("Varint exceeds the maximum encoded length")]
    VarintTooLarge,
    /// Negative integer decode requested into an unsigned destination.
    #[error("Negative integer cannot be decoded into an unsigned type")]
    SignMismatch,
    /// Integer byte count or float width outside the supported set.
    #[error("Unsupported width code: {0}")]
    UnsupportedWidth(u8),
    /// A reserved field kind was encountered.
    #[error("Unsupported field kind: {0:?}")]
    UnsupportedFieldKind(FieldKind),
    /// String or type name bytes are not valid UTF-8.
    #[error("String data is not valid UTF-8")]
    InvalidUtf8,
    /// Skip-buffer bookkeeping violated the nesting discipline.
    #[error("Shared object protocol violation: {0}")]
    SharedObjectProtocol(String),
    /// Cumulative buffered shared-object bytes would exceed the configured cap.
    #[error("Shared object buffer limit of {0} bytes exceeded")]
    SharedBufferLimitExceeded(usize),
    /// A back-referenced shared object id was never materialized.
    #[error("Referenced shared object id {0} was never loaded")]
    UnresolvedSharedPointer(u32),
    /// A polymorphic type name has no registered binding.
    #[error("Unknown polymorphic type: {0}")]
    UnknownPolymorphicType(String),
    /// A configured security limit was exceeded.
    #[error("Limit exceeded: {0}")]
    LimitExceeded(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, ExbError>;
