//! # Link Error Handling
//!
//! This module provides the error handling for the bcr_link library, covering
//! transport failures (serial and TCP), line-framing problems, Modbus frame
//! verification, and UPS query mapping errors.
//!
//! ## Overview
//!
//! All fallible operations in the crate return [`LinkResult<T>`], an alias for
//! `Result<T, LinkError>`. Every variant carries enough context to report the
//! failure once, at the call site that owns it: open/connect failures are a
//! failed result to the caller, trigger-write failures are reported without
//! tearing the session down, and frame verification failures are always
//! explicit, never silently treated as valid.
//!
//! ## Error Categories
//!
//! ### Transport Errors
//! - **Open/Connect**: serial port open failures, TCP connect refusal, bounded
//!   connect timeouts
//! - **Write/Read**: short or failed writes, serial read timeouts
//! - **Disconnect**: peer closure or loss detected mid-session
//!
//! ### Protocol Errors
//! - **Invalid Frame**: Modbus ADU verification failures (short buffer,
//!   declared length exceeding the bytes on hand, CRC mismatch on RTU)
//! - **Malformed Query**: a textual UPS query name with no register mapping
//!
//! ## Error Recovery
//!
//! Transport-level errors are generally worth retrying from the application
//! side (the library itself never retries); protocol errors are not:
//!
//! ```rust
//! use bcr_link::LinkError;
//!
//! let timeout = LinkError::read_timeout(1000);
//! assert!(timeout.is_recoverable());
//!
//! let bad_frame = LinkError::invalid_frame("declared length exceeds buffer");
//! assert!(!bad_frame.is_recoverable());
//! ```

use thiserror::Error;

/// Result type alias for link operations
///
/// Convenience alias using `LinkError` as the error type for all transport,
/// framing, session and codec operations throughout the crate.
pub type LinkResult<T> = Result<T, LinkError>;

/// Link-layer error types
///
/// Covers every failure condition surfaced by the crate, from transport-level
/// issues to Modbus frame verification and UPS query mapping. Each variant
/// carries the context needed to diagnose the failure and decide whether a
/// retry makes sense.
#[derive(Error, Debug, Clone)]
pub enum LinkError {
    /// Transport open failure
    ///
    /// The serial port or TCP socket could not be opened/connected. The
    /// session is left fully closed; a failed open never leaves partial
    /// state behind.
    ///
    /// # Examples
    /// - Serial port name does not exist or is held by another process
    /// - TCP connection refused by the remote host
    #[error("Transport open failed: {message}")]
    OpenFailed { message: String },

    /// TCP connect attempt exceeded its bound
    ///
    /// Connect attempts are bounded (3000 ms by default) and fail with this
    /// variant rather than hanging indefinitely.
    #[error("Connect to {address} timed out after {timeout_ms}ms")]
    ConnectTimeout { address: String, timeout_ms: u64 },

    /// Write failure
    ///
    /// A send (including the trigger command) could not deliver the full
    /// buffer, or the post-write flush failed. Reported to the caller but
    /// does not tear down the session.
    #[error("Write failed: {message}")]
    WriteFailed { message: String },

    /// Read exceeded its timeout bound
    ///
    /// Serial reads are bounded at 1000 ms; the UPS exchange bounds reads at
    /// its connect timeout. Inside the receive loop this is logged and the
    /// loop continues.
    #[error("Read timed out after {timeout_ms}ms")]
    ReadTimeout { timeout_ms: u64 },

    /// Connection lost outside an orderly closure
    ///
    /// Raised when an operation is attempted on a transport that is no longer
    /// connected, or when the link drops mid-operation. Orderly peer closure
    /// (a zero-byte read) is not an error; it terminates the receive loop
    /// cleanly instead.
    #[error("Unexpected disconnect: {message}")]
    UnexpectedDisconnect { message: String },

    /// Modbus frame verification failure
    ///
    /// The buffer failed `verify_frame`: shorter than a minimal ADU, a
    /// declared length field claiming more bytes than are present, or a CRC
    /// mismatch on the RTU variant.
    #[error("Invalid frame: {message}")]
    InvalidFrame { message: String },

    /// UPS query with no register mapping
    ///
    /// A textual query name supplied by the caller does not map to any
    /// entry in the fixed UPS register table.
    #[error("Unknown UPS query: {query}")]
    MalformedQuery { query: String },

    /// I/O related errors (network, serial)
    ///
    /// Low-level failures that do not fit a more specific variant.
    #[error("I/O error: {message}")]
    Io { message: String },

    /// Serialization errors from application tooling
    #[error("Serialization error: {message}")]
    Serialization { message: String },
}

impl LinkError {
    /// Create a transport open failure
    pub fn open_failed<S: Into<String>>(message: S) -> Self {
        Self::OpenFailed { message: message.into() }
    }

    /// Create a connect timeout error
    ///
    /// # Arguments
    ///
    /// * `address` - The `host:port` target of the connect attempt
    /// * `timeout_ms` - The bound that expired, in milliseconds
    pub fn connect_timeout<S: Into<String>>(address: S, timeout_ms: u64) -> Self {
        Self::ConnectTimeout {
            address: address.into(),
            timeout_ms,
        }
    }

    /// Create a write failure
    pub fn write_failed<S: Into<String>>(message: S) -> Self {
        Self::WriteFailed { message: message.into() }
    }

    /// Create a read timeout error
    pub fn read_timeout(timeout_ms: u64) -> Self {
        Self::ReadTimeout { timeout_ms }
    }

    /// Create an unexpected disconnect error
    pub fn unexpected_disconnect<S: Into<String>>(message: S) -> Self {
        Self::UnexpectedDisconnect { message: message.into() }
    }

    /// Create an invalid frame error
    pub fn invalid_frame<S: Into<String>>(message: S) -> Self {
        Self::InvalidFrame { message: message.into() }
    }

    /// Create a malformed query error
    pub fn malformed_query<S: Into<String>>(query: S) -> Self {
        Self::MalformedQuery { query: query.into() }
    }

    /// Create an I/O error
    pub fn io<S: Into<String>>(message: S) -> Self {
        Self::Io { message: message.into() }
    }

    /// Create a serialization error
    pub fn serialization<S: Into<String>>(message: S) -> Self {
        Self::Serialization { message: message.into() }
    }

    /// Check if the error is recoverable (worth retrying)
    ///
    /// Transport conditions are usually transient (the port may free up, the
    /// peer may come back), while frame and query errors will fail the same
    /// way on every retry. The library never retries on its own; this helper
    /// is for the caller's retry policy.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use bcr_link::LinkError;
    ///
    /// assert!(LinkError::connect_timeout("10.0.0.5:2001", 3000).is_recoverable());
    /// assert!(!LinkError::malformed_query("ChargeLevel").is_recoverable());
    /// ```
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Io { .. }
                | Self::OpenFailed { .. }
                | Self::ConnectTimeout { .. }
                | Self::WriteFailed { .. }
                | Self::ReadTimeout { .. }
                | Self::UnexpectedDisconnect { .. }
        )
    }

    /// Check if the error is a network/serial transport issue
    ///
    /// Identifies errors raised by the underlying link rather than by frame
    /// parsing or query mapping.
    pub fn is_transport_error(&self) -> bool {
        matches!(
            self,
            Self::Io { .. }
                | Self::OpenFailed { .. }
                | Self::ConnectTimeout { .. }
                | Self::WriteFailed { .. }
                | Self::ReadTimeout { .. }
                | Self::UnexpectedDisconnect { .. }
        )
    }

    /// Check if the error is a protocol issue
    ///
    /// # Examples
    ///
    /// ```rust
    /// use bcr_link::LinkError;
    ///
    /// assert!(LinkError::invalid_frame("buffer shorter than MBAP header").is_protocol_error());
    /// assert!(!LinkError::io("connection reset").is_protocol_error());
    /// ```
    pub fn is_protocol_error(&self) -> bool {
        matches!(self, Self::InvalidFrame { .. } | Self::MalformedQuery { .. })
    }
}

/// Convert from std::io::Error
///
/// Preserves the original error message for debugging.
impl From<std::io::Error> for LinkError {
    fn from(err: std::io::Error) -> Self {
        Self::io(err.to_string())
    }
}

/// Convert from tokio timeout errors
///
/// Yields a generic read timeout; operations that know their bound construct
/// the error themselves with the actual duration.
impl From<tokio::time::error::Elapsed> for LinkError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Self::read_timeout(0)
    }
}

/// Convert from serde JSON errors
impl From<serde_json::Error> for LinkError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(format!("JSON error: {}", err))
    }
}
