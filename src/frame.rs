//! MBAP framing for Modbus TCP
//!
//! Encodes and decodes the 7-byte Modbus Application Protocol header
//! (transaction id, protocol id, length, unit id) around a PDU, and holds
//! the transaction sequencer used to correlate master requests with
//! responses.

use tracing::trace;

use crate::constants::{ERROR_BIAS, MBAP_HEADER_LEN, MBAP_PREHEADER_LEN};
use crate::error::{ModbusError, Result};
use crate::pdu::ModbusPdu;

/// Modbus TCP MBAP header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MbapHeader {
    /// Transaction identifier
    pub transaction_id: u16,
    /// Protocol identifier (always 0 for Modbus)
    pub protocol_id: u16,
    /// Byte count of unit id plus PDU
    pub length: u16,
    /// Unit identifier (slave address within the connection)
    pub unit_id: u8,
}

impl MbapHeader {
    /// Build the header for an outbound PDU.
    ///
    /// The length field counts the unit id byte plus the PDU bytes.
    pub fn for_pdu(transaction_id: u16, unit_id: u8, pdu_len: usize) -> Self {
        Self {
            transaction_id,
            protocol_id: 0,
            length: (pdu_len + 1) as u16,
            unit_id,
        }
    }

    /// Encode the header into its 7-byte wire form
    pub fn encode(&self) -> [u8; MBAP_HEADER_LEN] {
        let mut raw = [0u8; MBAP_HEADER_LEN];
        raw[0..2].copy_from_slice(&self.transaction_id.to_be_bytes());
        raw[2..4].copy_from_slice(&self.protocol_id.to_be_bytes());
        raw[4..6].copy_from_slice(&self.length.to_be_bytes());
        raw[6] = self.unit_id;
        raw
    }

    /// Decode a full 7-byte header from the start of `raw`
    pub fn decode(raw: &[u8]) -> Result<Self> {
        if raw.len() < MBAP_HEADER_LEN {
            return Err(ModbusError::frame(format!(
                "MBAP header truncated: {} bytes",
                raw.len()
            )));
        }

        Ok(Self {
            transaction_id: u16::from_be_bytes([raw[0], raw[1]]),
            protocol_id: u16::from_be_bytes([raw[2], raw[3]]),
            length: u16::from_be_bytes([raw[4], raw[5]]),
            unit_id: raw[6],
        })
    }
}

/// Monotonically increasing transaction id source.
///
/// Owned by one master transport; a fresh transport starts at 0 and the
/// counter wraps at 2^16. It advances on every send, including failed ones.
#[derive(Debug, Default)]
pub struct TransactionSequencer {
    next: u16,
}

impl TransactionSequencer {
    /// Create a sequencer starting at 0
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the current id and advance the counter
    pub fn next_id(&mut self) -> u16 {
        let id = self.next;
        self.next = self.next.wrapping_add(1);
        id
    }
}

/// Frame a PDU with an MBAP header for transmission
pub fn encode_frame(transaction_id: u16, unit_id: u8, pdu: &ModbusPdu) -> Result<Vec<u8>> {
    if pdu.is_empty() {
        return Err(ModbusError::frame("Cannot frame an empty PDU"));
    }

    let header = MbapHeader::for_pdu(transaction_id, unit_id, pdu.len());

    let mut frame = Vec::with_capacity(MBAP_HEADER_LEN + pdu.len());
    frame.extend_from_slice(&header.encode());
    frame.extend_from_slice(pdu.as_slice());

    trace!(
        "Encoded frame: tid={:04X}, unit={}, {}",
        transaction_id,
        unit_id,
        hex::encode(&frame)
    );

    Ok(frame)
}

/// Parse the 6-byte pre-header of an inbound request.
///
/// Returns `(transaction_id, protocol_id, length)`. The slave uses the
/// declared length to slice out the unit-id-plus-PDU region before any
/// further validation.
pub fn decode_request_header(raw: &[u8]) -> Result<(u16, u16, u16)> {
    if raw.len() < MBAP_PREHEADER_LEN {
        return Err(ModbusError::frame(format!(
            "Request pre-header truncated: {} bytes",
            raw.len()
        )));
    }

    let transaction_id = u16::from_be_bytes([raw[0], raw[1]]);
    let protocol_id = u16::from_be_bytes([raw[2], raw[3]]);
    let length = u16::from_be_bytes([raw[4], raw[5]]);

    Ok((transaction_id, protocol_id, length))
}

/// Validate a response frame against the request it answers.
///
/// Correlation failures (transaction id, protocol id, unit id) yield
/// [`ModbusError::Mismatch`]; a biased function code yields
/// [`ModbusError::Exception`] carrying the exception code. On success the
/// header and function code (plus the byte-count byte when `count_prefixed`)
/// are stripped and the remaining payload returned.
pub fn validate_response(
    raw: &[u8],
    transaction_id: u16,
    unit_id: u8,
    function_code: u8,
    count_prefixed: bool,
) -> Result<Vec<u8>> {
    if raw.len() < MBAP_HEADER_LEN + 1 {
        return Err(ModbusError::frame(format!(
            "Response truncated: {} bytes",
            raw.len()
        )));
    }

    let header = MbapHeader::decode(raw)?;
    let received_fc = raw[MBAP_HEADER_LEN];

    if header.transaction_id != transaction_id {
        return Err(ModbusError::Mismatch(format!(
            "Wrong transaction id: sent {:04X}, received {:04X}",
            transaction_id, header.transaction_id
        )));
    }

    if header.protocol_id != 0 {
        return Err(ModbusError::Mismatch(format!(
            "Invalid protocol id: {:04X}",
            header.protocol_id
        )));
    }

    if header.unit_id != unit_id {
        return Err(ModbusError::Mismatch(format!(
            "Wrong unit id: sent {}, received {}",
            unit_id, header.unit_id
        )));
    }

    if received_fc == function_code.wrapping_add(ERROR_BIAS) {
        let code = raw.get(MBAP_HEADER_LEN + 1).copied().unwrap_or(0);
        return Err(ModbusError::Exception {
            function: function_code,
            code,
        });
    }

    // Read responses carry a byte-count byte ahead of the data; write
    // confirmations do not.
    let header_len = if count_prefixed {
        MBAP_HEADER_LEN + 2
    } else {
        MBAP_HEADER_LEN + 1
    };

    if raw.len() < header_len {
        return Err(ModbusError::frame(format!(
            "Response shorter than header: {} bytes",
            raw.len()
        )));
    }

    Ok(raw[header_len..].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response_frame(tid: u16, pid: u16, unit: u8, pdu: &[u8]) -> Vec<u8> {
        let mut raw = Vec::new();
        raw.extend_from_slice(&tid.to_be_bytes());
        raw.extend_from_slice(&pid.to_be_bytes());
        raw.extend_from_slice(&((pdu.len() + 1) as u16).to_be_bytes());
        raw.push(unit);
        raw.extend_from_slice(pdu);
        raw
    }

    #[test]
    fn test_header_roundtrip() {
        let header = MbapHeader::for_pdu(0x1234, 17, 5);
        assert_eq!(header.length, 6);

        let decoded = MbapHeader::decode(&header.encode()).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn test_frame_roundtrip() {
        let pdu = ModbusPdu::from_slice(&[0x03, 0x00, 0x01, 0x00, 0x02]).unwrap();
        let frame = encode_frame(0x0001, 1, &pdu).unwrap();
        assert_eq!(frame.len(), MBAP_HEADER_LEN + 5);

        let (tid, pid, length) = decode_request_header(&frame).unwrap();
        assert_eq!(tid, 0x0001);
        assert_eq!(pid, 0);
        assert_eq!(length as usize, pdu.len() + 1);
        assert_eq!(&frame[MBAP_PREHEADER_LEN + 1..], pdu.as_slice());
    }

    #[test]
    fn test_empty_pdu_rejected() {
        let pdu = ModbusPdu::new();
        assert!(encode_frame(0, 1, &pdu).is_err());
    }

    #[test]
    fn test_sequencer_is_monotonic_and_wraps() {
        let mut seq = TransactionSequencer::new();
        assert_eq!(seq.next_id(), 0);
        assert_eq!(seq.next_id(), 1);

        // Drain one full cycle; every id must be the successor of the last
        let mut prev = seq.next_id();
        for _ in 0..u16::MAX {
            let id = seq.next_id();
            assert_eq!(id, prev.wrapping_add(1));
            prev = id;
        }
    }

    #[test]
    fn test_validate_response_happy_path() {
        // FC03 read response: count byte + two registers
        let raw = response_frame(7, 0, 1, &[0x03, 0x04, 0x00, 0x64, 0x00, 0xC8]);
        let payload = validate_response(&raw, 7, 1, 0x03, true).unwrap();
        assert_eq!(payload, vec![0x00, 0x64, 0x00, 0xC8]);

        // FC06 write confirmation: no count byte
        let raw = response_frame(8, 0, 1, &[0x06, 0x00, 0x0A, 0x00, 0x2A]);
        let payload = validate_response(&raw, 8, 1, 0x06, false).unwrap();
        assert_eq!(payload, vec![0x00, 0x0A, 0x00, 0x2A]);
    }

    #[test]
    fn test_validate_response_transaction_mismatch() {
        let raw = response_frame(7, 0, 1, &[0x03, 0x02, 0x00, 0x64]);
        let err = validate_response(&raw, 9, 1, 0x03, true).unwrap_err();
        assert!(matches!(err, ModbusError::Mismatch(_)));
    }

    #[test]
    fn test_validate_response_protocol_id_mismatch() {
        let raw = response_frame(7, 5, 1, &[0x03, 0x02, 0x00, 0x64]);
        let err = validate_response(&raw, 7, 1, 0x03, true).unwrap_err();
        assert!(matches!(err, ModbusError::Mismatch(_)));
    }

    #[test]
    fn test_validate_response_unit_id_mismatch() {
        let raw = response_frame(7, 0, 2, &[0x03, 0x02, 0x00, 0x64]);
        let err = validate_response(&raw, 7, 1, 0x03, true).unwrap_err();
        assert!(matches!(err, ModbusError::Mismatch(_)));
    }

    #[test]
    fn test_validate_response_remote_exception() {
        let raw = response_frame(7, 0, 1, &[0x83, 0x02]);
        let err = validate_response(&raw, 7, 1, 0x03, true).unwrap_err();
        assert_eq!(
            err,
            ModbusError::Exception {
                function: 0x03,
                code: 0x02
            }
        );
    }

    #[test]
    fn test_validate_response_truncated() {
        let err = validate_response(&[0x00, 0x01, 0x00], 1, 1, 0x03, false).unwrap_err();
        assert!(matches!(err, ModbusError::Frame(_)));
    }
}
