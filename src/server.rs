//! Modbus TCP slave listener
//!
//! Owns a bound listening socket plus at most one active client connection
//! and produces at most one parsed inbound request per poll cycle. Every
//! socket call is bounded by a deadline; a timeout on the slave side is
//! benign ("no work this cycle"), never an error. A new incoming connection
//! unconditionally replaces the previous client: last-to-connect wins.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::constants::{
    EXCEPTION_ILLEGAL_DATA_VALUE, FC_READ_COILS, FC_READ_DISCRETE_INPUTS,
    FC_READ_HOLDING_REGISTERS, FC_READ_INPUT_REGISTERS, FC_WRITE_MULTIPLE_COILS,
    FC_WRITE_MULTIPLE_REGISTERS, FC_WRITE_SINGLE_COIL, FC_WRITE_SINGLE_REGISTER,
    MAX_READ_COILS, MAX_READ_REGISTERS, MAX_WRITE_COILS, MAX_WRITE_REGISTERS,
    MBAP_PREHEADER_LEN, REQUEST_BUFFER_SIZE,
};
use crate::error::{ModbusError, ProtocolViolation, Result};
use crate::frame;
use crate::functions;
use crate::pdu::ModbusPdu;

/// Receive timeout applied once a client is connected.
///
/// Decoupled from the accept timeout: with a connection established the poll
/// cycle must keep turning, so receives are bounded short and a timeout just
/// means "no request yet".
const CLIENT_RECV_TIMEOUT: Duration = Duration::from_millis(500);

/// One inbound request, parsed from the unit-id-plus-PDU region of a frame.
///
/// Consumed exactly once by the dispatcher and not retained afterward.
#[derive(Debug, Clone)]
pub struct ParsedRequest {
    /// Transaction id from the request's MBAP header
    pub transaction_id: u16,
    /// Destination unit id
    pub unit_id: u8,
    /// Function code
    pub function: u8,
    /// Starting register address
    pub register_addr: u16,
    /// Quantity field, for the functions that carry one
    pub quantity: Option<u16>,
    /// Function-specific payload after the address field
    pub data: Vec<u8>,
}

impl ParsedRequest {
    /// Parse the unit-id-plus-PDU region of an inbound frame.
    ///
    /// Quantity-range violations yield a [`ProtocolViolation`] that the
    /// listener answers with an exception response. Function codes this
    /// slave does not serve parse permissively; the dispatcher rejects them.
    pub fn from_unit_pdu(
        transaction_id: u16,
        raw: &[u8],
    ) -> std::result::Result<Self, ProtocolViolation> {
        let function = raw.get(1).copied().unwrap_or(0);

        if raw.len() < 4 {
            return Err(ProtocolViolation::new(function, EXCEPTION_ILLEGAL_DATA_VALUE));
        }

        let unit_id = raw[0];
        let register_addr = u16::from_be_bytes([raw[2], raw[3]]);

        let read_quantity = |max: u16| -> std::result::Result<u16, ProtocolViolation> {
            if raw.len() < 6 {
                return Err(ProtocolViolation::new(function, EXCEPTION_ILLEGAL_DATA_VALUE));
            }
            let quantity = u16::from_be_bytes([raw[4], raw[5]]);
            if quantity == 0 || quantity > max {
                return Err(ProtocolViolation::new(function, EXCEPTION_ILLEGAL_DATA_VALUE));
            }
            Ok(quantity)
        };

        let (quantity, data) = match function {
            FC_READ_COILS | FC_READ_DISCRETE_INPUTS => {
                (Some(read_quantity(MAX_READ_COILS)?), Vec::new())
            }
            FC_READ_HOLDING_REGISTERS | FC_READ_INPUT_REGISTERS => {
                (Some(read_quantity(MAX_READ_REGISTERS)?), Vec::new())
            }
            FC_WRITE_SINGLE_COIL | FC_WRITE_SINGLE_REGISTER => {
                if raw.len() < 6 {
                    return Err(ProtocolViolation::new(
                        function,
                        EXCEPTION_ILLEGAL_DATA_VALUE,
                    ));
                }
                (None, raw[4..6].to_vec())
            }
            FC_WRITE_MULTIPLE_COILS => {
                // Byte-count byte at raw[6] is skipped
                (Some(read_quantity(MAX_WRITE_COILS)?), raw.get(7..).unwrap_or(&[]).to_vec())
            }
            FC_WRITE_MULTIPLE_REGISTERS => {
                (Some(read_quantity(MAX_WRITE_REGISTERS)?), raw.get(7..).unwrap_or(&[]).to_vec())
            }
            _ => (None, raw.get(4..).unwrap_or(&[]).to_vec()),
        };

        Ok(Self {
            transaction_id,
            unit_id,
            function,
            register_addr,
            quantity,
            data,
        })
    }

    /// View of the payload as big-endian 16-bit words
    pub fn data_as_registers(&self) -> Vec<u16> {
        self.data
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect()
    }
}

/// Modbus TCP slave listener: one listening socket, at most one client.
#[derive(Debug, Default)]
pub struct ModbusTcpServer {
    listener: Option<TcpListener>,
    client: Option<TcpStream>,
    bound: bool,
    last_transaction_id: u16,
}

impl ModbusTcpServer {
    /// Create an unbound listener
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind and listen on a local endpoint.
    ///
    /// Any prior listening or client socket is closed first, so rebinding is
    /// always safe.
    pub async fn bind(&mut self, local_addr: &str, local_port: u16, backlog: u32) -> Result<()> {
        // Dropping the old sockets closes them.
        self.client = None;
        self.listener = None;
        self.bound = false;

        let addr: SocketAddr = format!("{local_addr}:{local_port}")
            .parse()
            .map_err(|e| ModbusError::Config(format!("Invalid bind address: {e}")))?;

        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        }
        .map_err(|e| ModbusError::io(format!("Socket creation failed: {e}")))?;

        socket
            .set_reuseaddr(true)
            .map_err(|e| ModbusError::io(format!("SO_REUSEADDR failed: {e}")))?;
        socket
            .bind(addr)
            .map_err(|e| ModbusError::connection(format!("Failed to bind {addr}: {e}")))?;

        let listener = socket
            .listen(backlog)
            .map_err(|e| ModbusError::connection(format!("Failed to listen on {addr}: {e}")))?;

        info!("Modbus slave listening on {}", addr);
        self.listener = Some(listener);
        self.bound = true;
        Ok(())
    }

    /// True once [`bind`](Self::bind) has succeeded.
    ///
    /// Tracked locally; querying it cannot fail.
    pub fn is_bound(&self) -> bool {
        self.bound
    }

    /// Transaction id of the most recently received request
    pub fn last_transaction_id(&self) -> u16 {
        self.last_transaction_id
    }

    /// Local address of the listening socket, once bound
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .as_ref()
            .ok_or(ModbusError::NotBound)?
            .local_addr()
            .map_err(|e| ModbusError::io(format!("Local address query failed: {e}")))
    }

    /// Poll for one inbound request, honoring an overall deadline.
    ///
    /// Repeats accept/receive attempts until a request is produced or the
    /// deadline elapses, in which case `Ok(None)` is returned; running out
    /// of time is not an error. A zero timeout performs exactly one attempt.
    pub async fn poll(
        &mut self,
        overall_timeout: Duration,
        allowed_unit_ids: Option<&[u8]>,
    ) -> Result<Option<ParsedRequest>> {
        if !self.bound {
            return Err(ModbusError::NotBound);
        }

        if overall_timeout.is_zero() {
            return Ok(self.accept_and_parse(Duration::ZERO, allowed_unit_ids).await);
        }

        let deadline = Instant::now() + overall_timeout;
        loop {
            // Block in accept only while no client is seated; once connected
            // the cycle must keep checking for data without stalling.
            let accept_timeout = if self.client.is_none() {
                deadline.saturating_duration_since(Instant::now())
            } else {
                Duration::ZERO
            };

            if let Some(request) = self.accept_and_parse(accept_timeout, allowed_unit_ids).await {
                return Ok(Some(request));
            }

            if Instant::now() >= deadline {
                return Ok(None);
            }
        }
    }

    /// One accept/receive/parse attempt.
    ///
    /// Returns `None` for every benign outcome: accept or receive timeout,
    /// peer disconnect, filtered unit id, or a malformed request that was
    /// answered with an exception response. Framing corruption and
    /// non-timeout I/O failures drop the active client connection.
    pub async fn accept_and_parse(
        &mut self,
        accept_timeout: Duration,
        allowed_unit_ids: Option<&[u8]>,
    ) -> Option<ParsedRequest> {
        let listener = self.listener.as_ref()?;

        match timeout(accept_timeout, listener.accept()).await {
            Ok(Ok((stream, peer))) => {
                if self.client.is_some() {
                    debug!("New connection from {} replaces the active client", peer);
                } else {
                    info!("Accepted Modbus connection from {}", peer);
                }
                // Dropping the previous stream closes it.
                self.client = Some(stream);
            }
            Ok(Err(e)) => {
                warn!("Accept failed: {}", e);
            }
            Err(_) => {
                // No new connection this cycle
            }
        }

        let mut buffer = [0u8; REQUEST_BUFFER_SIZE];
        let outcome = {
            let stream = self.client.as_mut()?;
            timeout(CLIENT_RECV_TIMEOUT, stream.read(&mut buffer)).await
        };

        let received = match outcome {
            Ok(Ok(0)) => {
                debug!("Client closed the connection");
                self.client = None;
                return None;
            }
            Ok(Ok(n)) => n,
            Ok(Err(e)) => {
                warn!("Receive failed: {}, dropping client", e);
                self.client = None;
                return None;
            }
            Err(_) => {
                // No request yet
                return None;
            }
        };

        let raw = &buffer[..received];
        debug!("Inbound frame: {}", hex::encode(raw));

        let (transaction_id, protocol_id, length) = match frame::decode_request_header(raw) {
            Ok(fields) => fields,
            Err(e) => {
                warn!("Malformed request header ({}), dropping client", e);
                self.client = None;
                return None;
            }
        };

        // A nonzero protocol id is framing corruption, not a retryable
        // condition.
        if protocol_id != 0 {
            warn!(
                "Nonzero protocol id {:04X}, dropping client",
                protocol_id
            );
            self.client = None;
            return None;
        }

        let end = MBAP_PREHEADER_LEN + length as usize;
        let unit_pdu = match raw.get(MBAP_PREHEADER_LEN..end) {
            Some(slice) if slice.len() >= 2 => slice,
            _ => {
                warn!(
                    "Declared length {} exceeds received frame, dropping client",
                    length
                );
                self.client = None;
                return None;
            }
        };

        self.last_transaction_id = transaction_id;

        // Address filtering, not an error: requests for other units are
        // silently discarded.
        if let Some(allowed) = allowed_unit_ids {
            if !allowed.contains(&unit_pdu[0]) {
                debug!("Discarding request for filtered unit {}", unit_pdu[0]);
                return None;
            }
        }

        match ParsedRequest::from_unit_pdu(transaction_id, unit_pdu) {
            Ok(request) => Some(request),
            Err(violation) => {
                debug!(
                    "Protocol violation in request (fc={:02X}, exception={:02X})",
                    violation.function_code, violation.exception_code
                );
                if let Err(e) = self
                    .send_exception_raw(
                        transaction_id,
                        unit_pdu[0],
                        violation.function_code,
                        violation.exception_code,
                    )
                    .await
                {
                    warn!("Failed to send exception response: {}", e);
                }
                None
            }
        }
    }

    /// Send a normal response for an accepted request.
    ///
    /// `values` carries the register/coil sequence for read responses and is
    /// empty for write confirmations, which echo the request instead.
    pub async fn send_response(&mut self, request: &ParsedRequest, values: &[u16]) -> Result<()> {
        let pdu = functions::response(
            request.function,
            request.register_addr,
            request.quantity.unwrap_or(0),
            &request.data,
            values,
        )?;

        self.send_pdu(request.transaction_id, request.unit_id, &pdu).await
    }

    /// Send an exception response for an accepted request
    pub async fn send_exception(
        &mut self,
        request: &ParsedRequest,
        exception_code: u8,
    ) -> Result<()> {
        self.send_exception_raw(
            request.transaction_id,
            request.unit_id,
            request.function,
            exception_code,
        )
        .await
    }

    async fn send_exception_raw(
        &mut self,
        transaction_id: u16,
        unit_id: u8,
        function_code: u8,
        exception_code: u8,
    ) -> Result<()> {
        let pdu = functions::exception_response(function_code, exception_code)?;
        self.send_pdu(transaction_id, unit_id, &pdu).await
    }

    async fn send_pdu(&mut self, transaction_id: u16, unit_id: u8, pdu: &ModbusPdu) -> Result<()> {
        let stream = self.client.as_mut().ok_or(ModbusError::NotConnected)?;
        let frame = frame::encode_frame(transaction_id, unit_id, pdu)?;

        debug!("Outbound frame: {}", hex::encode(&frame));

        stream
            .write_all(&frame)
            .await
            .map_err(|e| ModbusError::io(format!("Response send failed: {e}")))
    }
}
