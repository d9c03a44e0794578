//! Tracing and optional OpenTelemetry export for the command-line client.
//!
//! # Telemetry invariants
//!
//! - **No key material** may appear in any span attribute or log field:
//!   only object keys, part numbers, sizes and algorithm tags.
//! - Log level is configurable via `CLIENT_CRYPTO_LOG_LEVEL` (default: `info`);
//!   `RUST_LOG` overrides it when set.
//! - Logs go to stderr so command output on stdout stays machine-readable.

pub mod init;

pub use init::{init_telemetry, shutdown_telemetry};
