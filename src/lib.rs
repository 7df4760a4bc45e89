//! # mblink — Modbus TCP master/slave transport engine
//!
//! A small, self-contained Modbus-over-TCP implementation for exchanging
//! register reads and writes between a controller and field devices. The
//! crate covers both roles: a synchronous request/response **master** over
//! one persistent connection, and a single-client **slave** built around a
//! bounded accept/receive poll cycle with an in-process register bank.
//!
//! ## Function codes
//!
//! | Code | Function                 | Master | Slave |
//! |------|--------------------------|--------|-------|
//! | 0x01 | Read Coils               | yes    | yes   |
//! | 0x02 | Read Discrete Inputs     | yes    | yes   |
//! | 0x03 | Read Holding Registers   | yes    | yes   |
//! | 0x04 | Read Input Registers     | yes    | yes   |
//! | 0x05 | Write Single Coil        | yes    | yes   |
//! | 0x06 | Write Single Register    | yes    | yes   |
//! | 0x0F | Write Multiple Coils     | yes    | —     |
//! | 0x10 | Write Multiple Registers | yes    | —     |
//!
//! The slave answers anything else with an ILLEGAL_FUNCTION exception.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use mblink::{ModbusClient, ModbusTcpClient};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> mblink::Result<()> {
//!     let mut client =
//!         ModbusTcpClient::connect("127.0.0.1", 502, Duration::from_secs(5)).await?;
//!
//!     let ok = client.write_single_register(1, 10, 42).await?;
//!     assert!(ok);
//!
//!     let values = client.read_holding_registers(1, 10, 1).await?;
//!     println!("HREG[10] = {}", values[0]);
//!
//!     client.close().await
//! }
//! ```

/// Protocol constants from the Modbus specification
pub mod constants;

/// Error types and result handling
pub mod error;

/// Fixed-size PDU buffer and builder
pub mod pdu;

/// Function-specific PDU construction and validation
pub mod functions;

/// MBAP framing and transaction sequencing
pub mod frame;

/// Register types and the slave-side register bank
pub mod registers;

/// Master transport
pub mod client;

/// Slave listener
pub mod server;

/// Slave request dispatching
pub mod dispatch;

/// Connection and listener configuration
pub mod config;

// ============================================================================
// Re-exports
// ============================================================================

pub use client::{ModbusClient, ModbusTcpClient};
pub use config::{ClientConfig, ServerConfig};
pub use dispatch::{function_target, FunctionTarget, ModbusTcpSlave};
pub use error::{ModbusError, ProtocolViolation, Result};
pub use frame::{MbapHeader, TransactionSequencer};
pub use pdu::{ModbusPdu, PduBuilder};
pub use registers::{ChangeListener, RegisterBank, RegisterType};
pub use server::{ModbusTcpServer, ParsedRequest};

/// Modbus TCP default port
pub const DEFAULT_TCP_PORT: u16 = 502;

/// Default master timeout in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;
