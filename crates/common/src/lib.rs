//! Error taxonomy and object-metadata protocol shared across `client-crypto` crates.

pub mod error;
pub mod protocol;

pub use error::{CryptoError, ErrorClass, TransportError};
