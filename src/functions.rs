//! Function-specific PDU construction and validation
//!
//! Request builders for the master side, response builders for the slave
//! side, and echo validation for write confirmations. Quantity limits follow
//! the Modbus specification (see [`crate::constants`]).

use crate::constants::{
    COIL_OFF, COIL_ON, ERROR_BIAS, FC_READ_COILS, FC_READ_DISCRETE_INPUTS,
    FC_READ_HOLDING_REGISTERS, FC_READ_INPUT_REGISTERS, FC_WRITE_MULTIPLE_COILS,
    FC_WRITE_MULTIPLE_REGISTERS, FC_WRITE_SINGLE_COIL, FC_WRITE_SINGLE_REGISTER, MAX_READ_COILS,
    MAX_READ_REGISTERS, MAX_WRITE_COILS, MAX_WRITE_REGISTERS,
};
use crate::error::{ModbusError, Result};
use crate::pdu::{ModbusPdu, PduBuilder};

// ============================================================================
// Request builders (master side)
// ============================================================================

fn read_request(function_code: u8, starting_address: u16, quantity: u16, max: u16) -> Result<ModbusPdu> {
    if quantity == 0 || quantity > max {
        return Err(ModbusError::invalid_data(format!(
            "Invalid quantity {quantity} for FC{function_code:02} (must be 1..={max})"
        )));
    }

    Ok(PduBuilder::new()
        .function_code(function_code)?
        .address(starting_address)?
        .quantity(quantity)?
        .build())
}

/// Build an FC01 (Read Coils) request PDU
pub fn read_coils(starting_address: u16, quantity: u16) -> Result<ModbusPdu> {
    read_request(FC_READ_COILS, starting_address, quantity, MAX_READ_COILS)
}

/// Build an FC02 (Read Discrete Inputs) request PDU
pub fn read_discrete_inputs(starting_address: u16, quantity: u16) -> Result<ModbusPdu> {
    read_request(
        FC_READ_DISCRETE_INPUTS,
        starting_address,
        quantity,
        MAX_READ_COILS,
    )
}

/// Build an FC03 (Read Holding Registers) request PDU
pub fn read_holding_registers(starting_address: u16, quantity: u16) -> Result<ModbusPdu> {
    read_request(
        FC_READ_HOLDING_REGISTERS,
        starting_address,
        quantity,
        MAX_READ_REGISTERS,
    )
}

/// Build an FC04 (Read Input Registers) request PDU
pub fn read_input_registers(starting_address: u16, quantity: u16) -> Result<ModbusPdu> {
    read_request(
        FC_READ_INPUT_REGISTERS,
        starting_address,
        quantity,
        MAX_READ_REGISTERS,
    )
}

/// Build an FC05 (Write Single Coil) request PDU.
///
/// The wire value is 0xFF00 for ON and 0x0000 for OFF.
pub fn write_single_coil(output_address: u16, output_value: bool) -> Result<ModbusPdu> {
    Ok(PduBuilder::new()
        .function_code(FC_WRITE_SINGLE_COIL)?
        .address(output_address)?
        .quantity(if output_value { COIL_ON } else { COIL_OFF })?
        .build())
}

/// Build an FC06 (Write Single Register) request PDU
pub fn write_single_register(register_address: u16, register_value: u16) -> Result<ModbusPdu> {
    Ok(PduBuilder::new()
        .function_code(FC_WRITE_SINGLE_REGISTER)?
        .address(register_address)?
        .quantity(register_value)?
        .build())
}

/// Build an FC15 (Write Multiple Coils) request PDU.
///
/// Coil states are packed eight per byte, least-significant bit first.
pub fn write_multiple_coils(starting_address: u16, values: &[bool]) -> Result<ModbusPdu> {
    if values.is_empty() || values.len() > MAX_WRITE_COILS as usize {
        return Err(ModbusError::invalid_data(format!(
            "Invalid coil count {} for FC15 (must be 1..={MAX_WRITE_COILS})",
            values.len()
        )));
    }

    let mut pdu = PduBuilder::new()
        .function_code(FC_WRITE_MULTIPLE_COILS)?
        .address(starting_address)?
        .quantity(values.len() as u16)?
        .byte(values.len().div_ceil(8) as u8)?
        .build();

    for chunk in values.chunks(8) {
        let mut byte = 0u8;
        for (bit, &value) in chunk.iter().enumerate() {
            if value {
                byte |= 1 << bit;
            }
        }
        pdu.push(byte)?;
    }

    Ok(pdu)
}

/// Build an FC16 (Write Multiple Registers) request PDU
pub fn write_multiple_registers(starting_address: u16, values: &[u16]) -> Result<ModbusPdu> {
    if values.is_empty() || values.len() > MAX_WRITE_REGISTERS as usize {
        return Err(ModbusError::invalid_data(format!(
            "Invalid register count {} for FC16 (must be 1..={MAX_WRITE_REGISTERS})",
            values.len()
        )));
    }

    let mut pdu = PduBuilder::new()
        .function_code(FC_WRITE_MULTIPLE_REGISTERS)?
        .address(starting_address)?
        .quantity(values.len() as u16)?
        .byte((values.len() * 2) as u8)?
        .build();

    for &value in values {
        pdu.push_u16(value)?;
    }

    Ok(pdu)
}

// ============================================================================
// Response builders (slave side)
// ============================================================================

/// Build a normal response PDU for an accepted request.
///
/// * FC01/FC02: `values` are coil states (nonzero = ON), bit-packed behind a
///   byte count.
/// * FC03/FC04: `values` are register words, emitted big-endian behind a
///   byte count.
/// * FC05/FC06: the request's address and value bytes are echoed back;
///   `request_data` must hold the two value bytes from the request.
/// * FC15/FC16: address and quantity are acknowledged.
pub fn response(
    function_code: u8,
    register_addr: u16,
    quantity: u16,
    request_data: &[u8],
    values: &[u16],
) -> Result<ModbusPdu> {
    match function_code {
        FC_READ_COILS | FC_READ_DISCRETE_INPUTS => {
            let mut pdu = PduBuilder::new()
                .function_code(function_code)?
                .byte(values.len().div_ceil(8) as u8)?
                .build();

            for chunk in values.chunks(8) {
                let mut byte = 0u8;
                for (bit, &value) in chunk.iter().enumerate() {
                    if value != 0 {
                        byte |= 1 << bit;
                    }
                }
                pdu.push(byte)?;
            }

            Ok(pdu)
        }
        FC_READ_HOLDING_REGISTERS | FC_READ_INPUT_REGISTERS => {
            if values.is_empty() || values.len() > MAX_READ_REGISTERS as usize {
                return Err(ModbusError::invalid_data(format!(
                    "Invalid register count {} in read response",
                    values.len()
                )));
            }

            let mut pdu = PduBuilder::new()
                .function_code(function_code)?
                .byte((values.len() * 2) as u8)?
                .build();

            for &value in values {
                pdu.push_u16(value)?;
            }

            Ok(pdu)
        }
        FC_WRITE_SINGLE_COIL | FC_WRITE_SINGLE_REGISTER => {
            if request_data.len() < 2 {
                return Err(ModbusError::invalid_data(
                    "Write echo requires the request's value bytes",
                ));
            }

            Ok(PduBuilder::new()
                .function_code(function_code)?
                .address(register_addr)?
                .data(&request_data[..2])?
                .build())
        }
        FC_WRITE_MULTIPLE_COILS | FC_WRITE_MULTIPLE_REGISTERS => Ok(PduBuilder::new()
            .function_code(function_code)?
            .address(register_addr)?
            .quantity(quantity)?
            .build()),
        _ => Err(ModbusError::invalid_data(format!(
            "No response layout for function code {function_code:#04x}"
        ))),
    }
}

/// Build an exception response PDU: biased function code plus exception code
pub fn exception_response(function_code: u8, exception_code: u8) -> Result<ModbusPdu> {
    Ok(PduBuilder::new()
        .function_code(function_code | ERROR_BIAS)?
        .byte(exception_code)?
        .build())
}

// ============================================================================
// Master-side write confirmation checks
// ============================================================================

/// Check a single-write confirmation payload against the sent address/value.
///
/// `payload` is the response with the MBAP header and function code already
/// stripped: address(2) + value(2).
pub fn validate_single_write_echo(payload: &[u8], address: u16, value: u16) -> bool {
    if payload.len() < 4 {
        return false;
    }

    let echoed_addr = u16::from_be_bytes([payload[0], payload[1]]);
    let echoed_value = u16::from_be_bytes([payload[2], payload[3]]);

    echoed_addr == address && echoed_value == value
}

/// Check a multiple-write confirmation payload against the sent
/// address/quantity.
pub fn validate_multiple_write_echo(payload: &[u8], address: u16, quantity: u16) -> bool {
    if payload.len() < 4 {
        return false;
    }

    let echoed_addr = u16::from_be_bytes([payload[0], payload[1]]);
    let echoed_qty = u16::from_be_bytes([payload[2], payload[3]]);

    echoed_addr == address && echoed_qty == quantity
}
