//! Modbus TCP master transport
//!
//! One persistent outbound connection, strictly synchronous request/response:
//! a request is framed, sent, and its single response awaited (bounded by the
//! operation timeout) before the next request may start. Retries are a caller
//! concern; the transaction counter advances even on failure.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::constants::{COIL_OFF, COIL_ON, RESPONSE_BUFFER_SIZE};
use crate::error::{ModbusError, Result};
use crate::frame::{self, TransactionSequencer};
use crate::functions;
use crate::pdu::ModbusPdu;

/// Unified interface for Modbus master operations.
///
/// Read results come back in the function's natural shape: bit-unpacked
/// booleans for coil/discrete reads, 16-bit words for register reads (with
/// `_signed` variants for two's-complement interpretation), and a
/// confirmation flag for writes derived from the echoed response fields.
#[async_trait]
pub trait ModbusClient: Send {
    /// Read coils (FC01)
    async fn read_coils(
        &mut self,
        slave_addr: u8,
        starting_addr: u16,
        coil_qty: u16,
    ) -> Result<Vec<bool>>;

    /// Read discrete inputs (FC02)
    async fn read_discrete_inputs(
        &mut self,
        slave_addr: u8,
        starting_addr: u16,
        input_qty: u16,
    ) -> Result<Vec<bool>>;

    /// Read holding registers (FC03)
    async fn read_holding_registers(
        &mut self,
        slave_addr: u8,
        starting_addr: u16,
        register_qty: u16,
    ) -> Result<Vec<u16>>;

    /// Read holding registers (FC03), interpreting each word as signed
    async fn read_holding_registers_signed(
        &mut self,
        slave_addr: u8,
        starting_addr: u16,
        register_qty: u16,
    ) -> Result<Vec<i16>>;

    /// Read input registers (FC04)
    async fn read_input_registers(
        &mut self,
        slave_addr: u8,
        starting_addr: u16,
        register_qty: u16,
    ) -> Result<Vec<u16>>;

    /// Read input registers (FC04), interpreting each word as signed
    async fn read_input_registers_signed(
        &mut self,
        slave_addr: u8,
        starting_addr: u16,
        register_qty: u16,
    ) -> Result<Vec<i16>>;

    /// Write a single coil (FC05); true when the slave echoed the request
    async fn write_single_coil(
        &mut self,
        slave_addr: u8,
        output_address: u16,
        output_value: bool,
    ) -> Result<bool>;

    /// Write a single holding register (FC06)
    async fn write_single_register(
        &mut self,
        slave_addr: u8,
        register_address: u16,
        register_value: u16,
    ) -> Result<bool>;

    /// Write multiple coils (FC15)
    async fn write_multiple_coils(
        &mut self,
        slave_addr: u8,
        starting_address: u16,
        output_values: &[bool],
    ) -> Result<bool>;

    /// Write multiple holding registers (FC16)
    async fn write_multiple_registers(
        &mut self,
        slave_addr: u8,
        starting_address: u16,
        register_values: &[u16],
    ) -> Result<bool>;
}

/// Modbus TCP master over one persistent connection
pub struct ModbusTcpClient {
    stream: TcpStream,
    timeout: Duration,
    sequencer: TransactionSequencer,
}

impl ModbusTcpClient {
    /// Connect to a slave endpoint.
    ///
    /// The timeout bounds the connect itself and every subsequent receive.
    pub async fn connect(host: &str, port: u16, timeout_duration: Duration) -> Result<Self> {
        Self::from_address(&format!("{host}:{port}"), timeout_duration).await
    }

    /// Connect to a `host:port` address string
    pub async fn from_address(addr: &str, timeout_duration: Duration) -> Result<Self> {
        info!("Connecting to Modbus TCP endpoint: {}", addr);

        match timeout(timeout_duration, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    warn!("Failed to set TCP_NODELAY: {}", e);
                }

                info!("Connected to Modbus TCP endpoint: {}", addr);
                Ok(Self {
                    stream,
                    timeout: timeout_duration,
                    sequencer: TransactionSequencer::new(),
                })
            }
            Ok(Err(e)) => Err(ModbusError::connection(format!(
                "Failed to connect to {addr}: {e}"
            ))),
            Err(_) => Err(ModbusError::timeout(format!(
                "Connection to {addr} timed out"
            ))),
        }
    }

    /// Connect using a [`ClientConfig`]
    pub async fn with_config(config: &ClientConfig) -> Result<Self> {
        Self::connect(&config.host, config.port, config.timeout()).await
    }

    /// Send one framed request and await its response payload.
    ///
    /// Obtains a transaction id, frames and sends the PDU, performs a single
    /// bounded receive and validates the response header. `count_prefixed`
    /// selects whether the response carries a byte-count byte ahead of the
    /// data (true for all read operations).
    pub async fn send_and_receive(
        &mut self,
        unit_id: u8,
        pdu: &ModbusPdu,
        count_prefixed: bool,
    ) -> Result<Vec<u8>> {
        let function_code = pdu
            .function_code()
            .ok_or_else(|| ModbusError::invalid_data("Cannot send an empty PDU"))?;

        // The counter advances even if the exchange fails below.
        let transaction_id = self.sequencer.next_id();
        let request = frame::encode_frame(transaction_id, unit_id, pdu)?;

        debug!(
            "Request tid={:04X} unit={} fc={:02X}: {}",
            transaction_id,
            unit_id,
            function_code,
            hex::encode(&request)
        );

        self.stream
            .write_all(&request)
            .await
            .map_err(|e| ModbusError::io(format!("Send failed: {e}")))?;

        let mut buffer = [0u8; RESPONSE_BUFFER_SIZE];
        let received = match timeout(self.timeout, self.stream.read(&mut buffer)).await {
            Ok(Ok(0)) => {
                return Err(ModbusError::connection("Connection closed by peer"));
            }
            Ok(Ok(n)) => n,
            Ok(Err(e)) => {
                return Err(ModbusError::io(format!("Receive failed: {e}")));
            }
            Err(_) => {
                return Err(ModbusError::timeout(format!(
                    "No response for tid={transaction_id:04X} within {:?}",
                    self.timeout
                )));
            }
        };

        debug!(
            "Response tid={:04X}: {}",
            transaction_id,
            hex::encode(&buffer[..received])
        );

        frame::validate_response(
            &buffer[..received],
            transaction_id,
            unit_id,
            function_code,
            count_prefixed,
        )
    }

    /// Shut the connection down
    pub async fn close(mut self) -> Result<()> {
        self.stream
            .shutdown()
            .await
            .map_err(|e| ModbusError::io(format!("Shutdown failed: {e}")))
    }
}

#[async_trait]
impl ModbusClient for ModbusTcpClient {
    async fn read_coils(
        &mut self,
        slave_addr: u8,
        starting_addr: u16,
        coil_qty: u16,
    ) -> Result<Vec<bool>> {
        let pdu = functions::read_coils(starting_addr, coil_qty)?;
        let payload = self.send_and_receive(slave_addr, &pdu, true).await?;
        Ok(unpack_bits(&payload))
    }

    async fn read_discrete_inputs(
        &mut self,
        slave_addr: u8,
        starting_addr: u16,
        input_qty: u16,
    ) -> Result<Vec<bool>> {
        let pdu = functions::read_discrete_inputs(starting_addr, input_qty)?;
        let payload = self.send_and_receive(slave_addr, &pdu, true).await?;
        Ok(unpack_bits(&payload))
    }

    async fn read_holding_registers(
        &mut self,
        slave_addr: u8,
        starting_addr: u16,
        register_qty: u16,
    ) -> Result<Vec<u16>> {
        let pdu = functions::read_holding_registers(starting_addr, register_qty)?;
        let payload = self.send_and_receive(slave_addr, &pdu, true).await?;
        Ok(to_words(&payload))
    }

    async fn read_holding_registers_signed(
        &mut self,
        slave_addr: u8,
        starting_addr: u16,
        register_qty: u16,
    ) -> Result<Vec<i16>> {
        let pdu = functions::read_holding_registers(starting_addr, register_qty)?;
        let payload = self.send_and_receive(slave_addr, &pdu, true).await?;
        Ok(to_signed_words(&payload))
    }

    async fn read_input_registers(
        &mut self,
        slave_addr: u8,
        starting_addr: u16,
        register_qty: u16,
    ) -> Result<Vec<u16>> {
        let pdu = functions::read_input_registers(starting_addr, register_qty)?;
        let payload = self.send_and_receive(slave_addr, &pdu, true).await?;
        Ok(to_words(&payload))
    }

    async fn read_input_registers_signed(
        &mut self,
        slave_addr: u8,
        starting_addr: u16,
        register_qty: u16,
    ) -> Result<Vec<i16>> {
        let pdu = functions::read_input_registers(starting_addr, register_qty)?;
        let payload = self.send_and_receive(slave_addr, &pdu, true).await?;
        Ok(to_signed_words(&payload))
    }

    async fn write_single_coil(
        &mut self,
        slave_addr: u8,
        output_address: u16,
        output_value: bool,
    ) -> Result<bool> {
        let pdu = functions::write_single_coil(output_address, output_value)?;
        let payload = self.send_and_receive(slave_addr, &pdu, false).await?;

        let wire_value = if output_value { COIL_ON } else { COIL_OFF };
        Ok(functions::validate_single_write_echo(
            &payload,
            output_address,
            wire_value,
        ))
    }

    async fn write_single_register(
        &mut self,
        slave_addr: u8,
        register_address: u16,
        register_value: u16,
    ) -> Result<bool> {
        let pdu = functions::write_single_register(register_address, register_value)?;
        let payload = self.send_and_receive(slave_addr, &pdu, false).await?;

        Ok(functions::validate_single_write_echo(
            &payload,
            register_address,
            register_value,
        ))
    }

    async fn write_multiple_coils(
        &mut self,
        slave_addr: u8,
        starting_address: u16,
        output_values: &[bool],
    ) -> Result<bool> {
        let pdu = functions::write_multiple_coils(starting_address, output_values)?;
        let payload = self.send_and_receive(slave_addr, &pdu, false).await?;

        Ok(functions::validate_multiple_write_echo(
            &payload,
            starting_address,
            output_values.len() as u16,
        ))
    }

    async fn write_multiple_registers(
        &mut self,
        slave_addr: u8,
        starting_address: u16,
        register_values: &[u16],
    ) -> Result<bool> {
        let pdu = functions::write_multiple_registers(starting_address, register_values)?;
        let payload = self.send_and_receive(slave_addr, &pdu, false).await?;

        Ok(functions::validate_multiple_write_echo(
            &payload,
            starting_address,
            register_values.len() as u16,
        ))
    }
}

/// Unpack coil status bytes into booleans, least-significant bit first.
///
/// Every bit of every byte is unpacked; quantities that are not a multiple
/// of eight come back with trailing padding bits, which callers truncate.
fn unpack_bits(bytes: &[u8]) -> Vec<bool> {
    bytes
        .iter()
        .flat_map(|&byte| (0..8).map(move |bit| byte & (1 << bit) != 0))
        .collect()
}

/// Interpret a payload as big-endian unsigned 16-bit words
fn to_words(payload: &[u8]) -> Vec<u16> {
    payload
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect()
}

/// Interpret a payload as big-endian signed 16-bit words
fn to_signed_words(payload: &[u8]) -> Vec<i16> {
    payload
        .chunks_exact(2)
        .map(|pair| i16::from_be_bytes([pair[0], pair[1]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unpack_bits_lsb_first() {
        // 0xCD = 1100_1101 -> bits 0,2,3,6,7 set
        let bits = unpack_bits(&[0xCD]);
        assert_eq!(
            bits,
            vec![true, false, true, true, false, false, true, true]
        );

        // Two bytes unpack to sixteen booleans
        assert_eq!(unpack_bits(&[0xCD, 0x01]).len(), 16);
    }

    #[test]
    fn test_word_decoding() {
        let payload = [0x00, 0x64, 0xFF, 0x38];
        assert_eq!(to_words(&payload), vec![100, 0xFF38]);
        assert_eq!(to_signed_words(&payload), vec![100, -200]);

        // Trailing odd byte is ignored
        assert_eq!(to_words(&[0x00, 0x01, 0x02]), vec![1]);
    }

    #[test]
    fn test_connect_refused_is_connection_error() {
        // Nothing listens on port 1; the refusal must map to Connection,
        // not Timeout.
        let result = tokio_test::block_on(ModbusTcpClient::connect(
            "127.0.0.1",
            1,
            Duration::from_secs(2),
        ));
        assert!(matches!(result, Err(ModbusError::Connection(_))));
    }
}
