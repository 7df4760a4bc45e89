//! Error handling for the Modbus transport engine
//!
//! Faults (timeouts, framing corruption, I/O errors) travel through
//! [`ModbusError`]. Application-level validation failures on the slave side
//! are not faults: they become [`ProtocolViolation`] values that the listener
//! converts into Modbus exception responses on the wire.

use thiserror::Error;

/// Result type used throughout the crate
pub type Result<T> = std::result::Result<T, ModbusError>;

/// Modbus transport error type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModbusError {
    /// Connection establishment and maintenance errors
    #[error("Connection error: {0}")]
    Connection(String),

    /// Operation timeout errors
    #[error("Timeout error: {0}")]
    Timeout(String),

    /// Input/Output operation errors
    #[error("IO error: {0}")]
    Io(String),

    /// Malformed or truncated frames
    #[error("Frame error: {0}")]
    Frame(String),

    /// Response header fields do not match the request
    #[error("Response mismatch: {0}")]
    Mismatch(String),

    /// The remote peer answered with a Modbus exception
    #[error("Slave exception: function {function:#04x}, exception code {code:#04x}")]
    Exception {
        /// Function code of the failed request
        function: u8,
        /// Exception code returned by the peer
        code: u8,
    },

    /// Invalid request parameters (quantity out of range, empty PDU, ...)
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Operation requires an established connection
    #[error("Not connected")]
    NotConnected,

    /// Operation requires a bound listening socket
    #[error("Server not bound")]
    NotBound,

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),
}

impl ModbusError {
    /// Create a connection error
    pub fn connection<S: Into<String>>(msg: S) -> Self {
        ModbusError::Connection(msg.into())
    }

    /// Create a timeout error
    pub fn timeout<S: Into<String>>(msg: S) -> Self {
        ModbusError::Timeout(msg.into())
    }

    /// Create an IO error
    pub fn io<S: Into<String>>(msg: S) -> Self {
        ModbusError::Io(msg.into())
    }

    /// Create a frame error
    pub fn frame<S: Into<String>>(msg: S) -> Self {
        ModbusError::Frame(msg.into())
    }

    /// Create an invalid data error
    pub fn invalid_data<S: Into<String>>(msg: S) -> Self {
        ModbusError::InvalidData(msg.into())
    }
}

/// Protocol violation detected while decoding an inbound request.
///
/// Carries the function code of the offending request and the Modbus
/// exception code to report. The slave listener answers these with an
/// exception response instead of propagating an error; the exchange itself
/// is considered successful.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolViolation {
    /// Function code of the offending request
    pub function_code: u8,
    /// Modbus exception code to send back
    pub exception_code: u8,
}

impl ProtocolViolation {
    /// Create a new protocol violation
    pub fn new(function_code: u8, exception_code: u8) -> Self {
        Self {
            function_code,
            exception_code,
        }
    }
}
