//! Modbus protocol constants
//!
//! Derived from the official Modbus specification. The 253-byte PDU limit is
//! inherited from the RS485 ADU limit of 256 bytes (minus address and CRC)
//! and bounds every quantity limit below.

// ============================================================================
// Frame sizes
// ============================================================================

/// Full MBAP header length: Transaction ID(2) + Protocol ID(2) + Length(2) +
/// Unit ID(1)
pub const MBAP_HEADER_LEN: usize = 7;

/// Pre-header length parsed by the slave before slicing the payload:
/// Transaction ID(2) + Protocol ID(2) + Length(2)
pub const MBAP_PREHEADER_LEN: usize = 6;

/// Maximum PDU (Protocol Data Unit) size per Modbus specification
pub const MAX_PDU_SIZE: usize = 253;

/// Bias added to the function code in exception responses
pub const ERROR_BIAS: u8 = 0x80;

/// Receive buffer for inbound requests on the slave side
pub const REQUEST_BUFFER_SIZE: usize = 128;

/// Receive buffer for responses on the master side.
/// Max frame is 7 + 253 = 260 bytes; 512 leaves margin.
pub const RESPONSE_BUFFER_SIZE: usize = 512;

// ============================================================================
// Quantity limits
// ============================================================================

/// Maximum registers per FC03/FC04 read: (253 - 2) / 2 = 125
pub const MAX_READ_REGISTERS: u16 = 125;

/// Maximum registers per FC16 write: (253 - 6) / 2 = 123
pub const MAX_WRITE_REGISTERS: u16 = 123;

/// Maximum coils per FC01/FC02 read, per the Modbus specification
pub const MAX_READ_COILS: u16 = 2000;

/// Maximum coils per FC15 write, per the Modbus specification (0x7B0)
pub const MAX_WRITE_COILS: u16 = 1968;

// ============================================================================
// Function codes
// ============================================================================

/// Read Coils (FC01)
pub const FC_READ_COILS: u8 = 0x01;

/// Read Discrete Inputs (FC02)
pub const FC_READ_DISCRETE_INPUTS: u8 = 0x02;

/// Read Holding Registers (FC03)
pub const FC_READ_HOLDING_REGISTERS: u8 = 0x03;

/// Read Input Registers (FC04)
pub const FC_READ_INPUT_REGISTERS: u8 = 0x04;

/// Write Single Coil (FC05)
pub const FC_WRITE_SINGLE_COIL: u8 = 0x05;

/// Write Single Register (FC06)
pub const FC_WRITE_SINGLE_REGISTER: u8 = 0x06;

/// Write Multiple Coils (FC15)
pub const FC_WRITE_MULTIPLE_COILS: u8 = 0x0F;

/// Write Multiple Registers (FC16)
pub const FC_WRITE_MULTIPLE_REGISTERS: u8 = 0x10;

// ============================================================================
// Wire values for FC05 (Write Single Coil)
// ============================================================================

/// Coil ON value in an FC05 request
pub const COIL_ON: u16 = 0xFF00;

/// Coil OFF value in an FC05 request
pub const COIL_OFF: u16 = 0x0000;

// ============================================================================
// Exception codes
// ============================================================================

/// Illegal Function
pub const EXCEPTION_ILLEGAL_FUNCTION: u8 = 0x01;

/// Illegal Data Address
pub const EXCEPTION_ILLEGAL_DATA_ADDRESS: u8 = 0x02;

/// Illegal Data Value
pub const EXCEPTION_ILLEGAL_DATA_VALUE: u8 = 0x03;

/// Server Device Failure
pub const EXCEPTION_SERVER_DEVICE_FAILURE: u8 = 0x04;

/// Human-readable description for an exception code
pub fn exception_description(exception_code: u8) -> &'static str {
    match exception_code {
        0x01 => "Illegal Function",
        0x02 => "Illegal Data Address",
        0x03 => "Illegal Data Value",
        0x04 => "Slave Device Failure",
        0x05 => "Acknowledge",
        0x06 => "Slave Device Busy",
        0x08 => "Memory Parity Error",
        0x0A => "Gateway Path Unavailable",
        0x0B => "Gateway Target Device Failed to Respond",
        _ => "Unknown Exception",
    }
}
