//! Error types reported back to callers as values.
//!
//! The reactor core otherwise follows §7 of the design: syscalls return
//! `io::Result`/`(n, errno)` pairs and application-visible failure travels
//! through the `onConnection`/`onClose` callbacks, never a bubbled error.
//! `Error` exists only for the handful of paths that hand a failure back
//! to the caller directly: address resolution, TLS context setup, and
//! configuration validation.

use std::io;
use std::net::AddrParseError;

/// Errors returned directly to a caller, as opposed to delivered through a
/// connection's callbacks.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("address resolution failed for {host}:{port}: {source}")]
    AddressResolution {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },

    #[error("invalid address literal: {0}")]
    AddressParse(#[from] AddrParseError),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[cfg(feature = "tls")]
    #[error("TLS error: {0}")]
    Tls(#[from] openssl::error::ErrorStack),

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
