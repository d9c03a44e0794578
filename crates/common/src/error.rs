//! Common error types shared across crates.

use thiserror::Error;

/// Boxed source error carried by transport failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Broad failure category of a [`CryptoError`].
///
/// Every category is terminal for the operation that raised it. Transport
/// failures are surfaced as-is; whether to retry them is the caller's call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Invalid key lengths, misaligned part sizes, unsupported algorithm tags.
    Configuration,
    /// A persisted envelope field is missing or cannot be decoded.
    Decode,
    /// The master key for an object cannot be found or does not open it.
    KeyResolution,
    /// The storage transport (or local I/O) failed.
    Transport,
}

/// A failure reported by the storage transport collaborator.
#[derive(Debug, Error)]
#[error("{operation} failed for object {key:?}")]
pub struct TransportError {
    /// The transport operation that failed (e.g. `"get_object"`).
    pub operation: &'static str,
    /// Object key the operation targeted.
    pub key: String,
    /// Underlying error from the transport implementation.
    #[source]
    pub source: BoxError,
}

impl TransportError {
    /// Construct a [`TransportError`] from any error type.
    pub fn new(operation: &'static str, key: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self {
            operation,
            key: key.into(),
            source: source.into(),
        }
    }
}

/// Top-level error type of the client-side encryption engine.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// A size, length or option supplied by the caller is invalid.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// An algorithm tag is not one this client can handle.
    #[error("unsupported {kind} algorithm: {name:?}")]
    UnsupportedAlgorithm {
        /// Which slot the tag came from (`"content"` or `"wrap"`).
        kind: &'static str,
        /// The offending tag.
        name: String,
    },

    /// Master key material could not be parsed.
    #[error("invalid master key: {0}")]
    InvalidKey(String),

    /// An envelope field is empty or cannot be decoded.
    #[error("malformed envelope field {field}: {reason}")]
    MalformedEnvelope {
        /// Metadata key of the offending field.
        field: &'static str,
        /// What was wrong with it.
        reason: String,
    },

    /// Wrapping or unwrapping key material through the master key failed.
    #[error("{operation} failed: {reason}")]
    KeyWrap {
        /// `"wrap"` or `"unwrap"`, optionally qualified by back-end.
        operation: &'static str,
        /// Description safe to log; never contains key bytes.
        reason: String,
    },

    /// No usable master key exists for the object's material descriptor.
    #[error("cannot decrypt object with material descriptor {descriptor:?}: {reason}")]
    CannotDecrypt {
        /// The descriptor recorded in the object's envelope.
        descriptor: String,
        /// Why resolution failed.
        reason: String,
    },

    /// The storage transport failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Local I/O failed while reading or writing a stream.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl CryptoError {
    /// Returns the [`ErrorClass`] this error belongs to.
    pub fn class(&self) -> ErrorClass {
        match self {
            CryptoError::InvalidConfig(_)
            | CryptoError::UnsupportedAlgorithm { .. }
            | CryptoError::InvalidKey(_) => ErrorClass::Configuration,
            CryptoError::MalformedEnvelope { .. } => ErrorClass::Decode,
            CryptoError::KeyWrap { .. } | CryptoError::CannotDecrypt { .. } => {
                ErrorClass::KeyResolution
            }
            CryptoError::Transport(_) | CryptoError::Io(_) => ErrorClass::Transport,
        }
    }

    /// Whether the engine may retry this error. Always `false`; retrying
    /// transport failures is up to the caller.
    pub fn is_retryable(&self) -> bool {
        false
    }

    /// Shorthand for an [`CryptoError::UnsupportedAlgorithm`] in the content slot.
    pub fn unsupported_content(name: impl Into<String>) -> Self {
        CryptoError::UnsupportedAlgorithm {
            kind: "content",
            name: name.into(),
        }
    }

    /// Shorthand for an [`CryptoError::UnsupportedAlgorithm`] in the wrap slot.
    pub fn unsupported_wrap(name: impl Into<String>) -> Self {
        CryptoError::UnsupportedAlgorithm {
            kind: "wrap",
            name: name.into(),
        }
    }
}
