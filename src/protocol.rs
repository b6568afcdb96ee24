//! Modbus protocol encoding for the UPS query path
//!
//! This module provides PDU construction, the [`FrameCodec`] abstraction over
//! packet framing, and concrete codecs for Modbus TCP (MBAP header) and
//! Modbus RTU (CRC16 trailer). Transaction ids are issued per codec instance,
//! so independent connections never share a counter.

use byteorder::{BigEndian, ByteOrder};
use crc::{Crc, CRC_16_MODBUS};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{LinkError, LinkResult};

/// Modbus TCP prefix size: transaction id (2) + protocol id (2) + length (2) + unit id (1)
pub const MBAP_HEADER_SIZE: usize = 7;

/// CRC calculator for RTU framing
const CRC_MODBUS: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);

/// Modbus function codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ModbusFunction {
    /// Read Coils (0x01)
    ReadCoils = 0x01,
    /// Read Discrete Inputs (0x02)
    ReadDiscreteInputs = 0x02,
    /// Read Holding Registers (0x03)
    ReadHoldingRegisters = 0x03,
    /// Read Input Registers (0x04)
    ReadInputRegisters = 0x04,
    /// Write Single Coil (0x05)
    WriteSingleCoil = 0x05,
    /// Write Single Register (0x06)
    WriteSingleRegister = 0x06,
    /// Write Multiple Coils (0x0F)
    WriteMultipleCoils = 0x0F,
    /// Write Multiple Registers (0x10)
    WriteMultipleRegisters = 0x10,
}

impl ModbusFunction {
    /// Convert from function code byte
    pub fn from_u8(value: u8) -> LinkResult<Self> {
        match value {
            0x01 => Ok(ModbusFunction::ReadCoils),
            0x02 => Ok(ModbusFunction::ReadDiscreteInputs),
            0x03 => Ok(ModbusFunction::ReadHoldingRegisters),
            0x04 => Ok(ModbusFunction::ReadInputRegisters),
            0x05 => Ok(ModbusFunction::WriteSingleCoil),
            0x06 => Ok(ModbusFunction::WriteSingleRegister),
            0x0F => Ok(ModbusFunction::WriteMultipleCoils),
            0x10 => Ok(ModbusFunction::WriteMultipleRegisters),
            _ => Err(LinkError::invalid_frame(format!(
                "Unsupported function code: 0x{:02X}",
                value
            ))),
        }
    }

    /// Convert to function code byte
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Check if this is a read function
    pub fn is_read_function(self) -> bool {
        matches!(
            self,
            ModbusFunction::ReadCoils
                | ModbusFunction::ReadDiscreteInputs
                | ModbusFunction::ReadHoldingRegisters
                | ModbusFunction::ReadInputRegisters
        )
    }

    /// Check if this is a write function
    pub fn is_write_function(self) -> bool {
        !self.is_read_function()
    }
}

impl fmt::Display for ModbusFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModbusFunction::ReadCoils => "ReadCoils",
            ModbusFunction::ReadDiscreteInputs => "ReadDiscreteInputs",
            ModbusFunction::ReadHoldingRegisters => "ReadHoldingRegisters",
            ModbusFunction::ReadInputRegisters => "ReadInputRegisters",
            ModbusFunction::WriteSingleCoil => "WriteSingleCoil",
            ModbusFunction::WriteSingleRegister => "WriteSingleRegister",
            ModbusFunction::WriteMultipleCoils => "WriteMultipleCoils",
            ModbusFunction::WriteMultipleRegisters => "WriteMultipleRegisters",
        };
        write!(f, "{}(0x{:02X})", name, self.to_u8())
    }
}

/// A protocol data unit: function code plus data, independent of framing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModbusPdu {
    /// Function code byte. Responses may carry the exception flag (0x80 set),
    /// so this is stored raw rather than as [`ModbusFunction`].
    pub function_code: u8,
    /// Function-specific data following the function code
    pub payload: Vec<u8>,
}

impl ModbusPdu {
    /// Build a Read Holding Registers (0x03) request PDU
    pub fn read_holding_registers(start_address: u16, count: u16) -> Self {
        Self::read_request(ModbusFunction::ReadHoldingRegisters, start_address, count)
    }

    /// Build a Read Input Registers (0x04) request PDU
    pub fn read_input_registers(start_address: u16, count: u16) -> Self {
        Self::read_request(ModbusFunction::ReadInputRegisters, start_address, count)
    }

    /// Build a Write Single Register (0x06) request PDU
    pub fn write_single_register(address: u16, value: u16) -> Self {
        let mut payload = Vec::with_capacity(4);
        payload.extend_from_slice(&address.to_be_bytes());
        payload.extend_from_slice(&value.to_be_bytes());
        Self {
            function_code: ModbusFunction::WriteSingleRegister.to_u8(),
            payload,
        }
    }

    /// Build a PDU for a function code without a typed constructor
    pub fn raw(function_code: u8, payload: Vec<u8>) -> Self {
        Self {
            function_code,
            payload,
        }
    }

    fn read_request(function: ModbusFunction, start_address: u16, count: u16) -> Self {
        // Address (2 bytes) + Quantity (2 bytes), big-endian
        let mut payload = Vec::with_capacity(4);
        payload.extend_from_slice(&start_address.to_be_bytes());
        payload.extend_from_slice(&count.to_be_bytes());
        Self {
            function_code: function.to_u8(),
            payload,
        }
    }

    /// Typed view of the function code with the exception flag masked off
    pub fn function(&self) -> LinkResult<ModbusFunction> {
        ModbusFunction::from_u8(self.function_code & 0x7F)
    }

    /// Check for the exception flag in the function code
    pub fn is_exception(&self) -> bool {
        self.function_code & 0x80 != 0
    }

    /// Serialize as function code followed by payload
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(1 + self.payload.len());
        bytes.push(self.function_code);
        bytes.extend_from_slice(&self.payload);
        bytes
    }

    /// Parse from raw PDU bytes as returned by [`FrameCodec::extract_pdu`]
    pub fn from_bytes(bytes: &[u8]) -> LinkResult<Self> {
        if bytes.is_empty() {
            return Err(LinkError::invalid_frame("Empty PDU"));
        }
        Ok(Self {
            function_code: bytes[0],
            payload: bytes[1..].to_vec(),
        })
    }
}

/// Packet framing for one Modbus transport flavor
///
/// A codec owns whatever per-connection state its framing needs (for TCP,
/// the transaction counter), so building a packet takes `&mut self`.
pub trait FrameCodec {
    /// Wrap a PDU in this flavor's frame, consuming the next transaction id if there is one
    fn build_packet(&mut self, unit_id: u8, pdu: &ModbusPdu) -> Vec<u8>;

    /// Check that `frame` is structurally complete for this flavor
    fn verify_frame(&self, frame: &[u8]) -> bool;

    /// Strip the framing and return the raw PDU bytes
    fn extract_pdu(&self, frame: &[u8]) -> LinkResult<Vec<u8>>;
}

/// Modbus TCP codec: MBAP header framing with a per-instance transaction counter
#[derive(Debug, Default)]
pub struct ModbusTcpCodec {
    transaction_id: u16,
}

impl ModbusTcpCodec {
    /// Create a codec with a fresh transaction counter. The first packet it
    /// builds carries transaction id 1.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get next transaction ID. Wraps past 65535 back to 1; 0 is never issued.
    fn next_transaction_id(&mut self) -> u16 {
        self.transaction_id = self.transaction_id.wrapping_add(1);
        if self.transaction_id == 0 {
            self.transaction_id = 1;
        }
        self.transaction_id
    }

    /// The most recently issued transaction id, or 0 if none yet
    pub fn last_transaction_id(&self) -> u16 {
        self.transaction_id
    }

    /// Build a Read Input Registers (0x04) packet in one call
    pub fn build_read_input_registers(
        &mut self,
        unit_id: u8,
        start_address: u16,
        count: u16,
    ) -> Vec<u8> {
        self.build_packet(unit_id, &ModbusPdu::read_input_registers(start_address, count))
    }

    /// Declared frame length for a buffered MBAP prefix: 6 header bytes plus
    /// the length field's claim (unit id + PDU). Returns `None` until enough
    /// of the header has arrived to know.
    pub fn expected_frame_len(buffer: &[u8]) -> Option<usize> {
        if buffer.len() < 6 {
            return None;
        }
        Some(6 + BigEndian::read_u16(&buffer[4..6]) as usize)
    }
}

impl FrameCodec for ModbusTcpCodec {
    fn build_packet(&mut self, unit_id: u8, pdu: &ModbusPdu) -> Vec<u8> {
        let pdu_bytes = pdu.to_bytes();
        let transaction_id = self.next_transaction_id();
        let protocol_id = 0u16; // Always 0 for Modbus

        let mut frame = Vec::with_capacity(MBAP_HEADER_SIZE + pdu_bytes.len());

        // MBAP header: Transaction ID (2) + Protocol ID (2) + Length (2) + Unit ID (1)
        frame.extend_from_slice(&transaction_id.to_be_bytes());
        frame.extend_from_slice(&protocol_id.to_be_bytes());
        frame.extend_from_slice(&((pdu_bytes.len() + 1) as u16).to_be_bytes()); // unit id + PDU
        frame.push(unit_id);
        frame.extend_from_slice(&pdu_bytes);

        frame
    }

    fn verify_frame(&self, frame: &[u8]) -> bool {
        // Shortest valid frame is the MBAP header plus one function code byte
        if frame.len() < MBAP_HEADER_SIZE + 1 {
            return false;
        }
        let declared = BigEndian::read_u16(&frame[4..6]) as usize;
        frame.len() >= 6 + declared
    }

    fn extract_pdu(&self, frame: &[u8]) -> LinkResult<Vec<u8>> {
        if !self.verify_frame(frame) {
            return Err(LinkError::invalid_frame(format!(
                "Incomplete MBAP frame: {} bytes",
                frame.len()
            )));
        }
        Ok(frame[MBAP_HEADER_SIZE..].to_vec())
    }
}

/// Modbus RTU codec: unit id + PDU + CRC16 trailer (little-endian on the wire)
#[derive(Debug, Clone, Copy, Default)]
pub struct ModbusRtuCodec;

impl ModbusRtuCodec {
    /// Create an RTU codec. RTU framing is stateless.
    pub fn new() -> Self {
        Self
    }

    /// Calculate CRC for an RTU frame body
    fn calculate_crc(data: &[u8]) -> u16 {
        CRC_MODBUS.checksum(data)
    }
}

impl FrameCodec for ModbusRtuCodec {
    fn build_packet(&mut self, unit_id: u8, pdu: &ModbusPdu) -> Vec<u8> {
        let pdu_bytes = pdu.to_bytes();
        let mut frame = Vec::with_capacity(pdu_bytes.len() + 3);
        frame.push(unit_id);
        frame.extend_from_slice(&pdu_bytes);

        let crc = Self::calculate_crc(&frame);
        frame.extend_from_slice(&crc.to_le_bytes()); // CRC is little-endian in RTU

        frame
    }

    fn verify_frame(&self, frame: &[u8]) -> bool {
        // Unit id + function code + CRC is the minimum
        if frame.len() < 4 {
            return false;
        }
        let data_len = frame.len() - 2;
        let received_crc = u16::from_le_bytes([frame[data_len], frame[data_len + 1]]);
        received_crc == Self::calculate_crc(&frame[..data_len])
    }

    fn extract_pdu(&self, frame: &[u8]) -> LinkResult<Vec<u8>> {
        if frame.len() < 4 {
            return Err(LinkError::invalid_frame("RTU frame too short"));
        }
        let data_len = frame.len() - 2;
        let received_crc = u16::from_le_bytes([frame[data_len], frame[data_len + 1]]);
        let calculated_crc = Self::calculate_crc(&frame[..data_len]);
        if received_crc != calculated_crc {
            return Err(LinkError::invalid_frame(format!(
                "CRC mismatch: expected 0x{:04X}, got 0x{:04X}",
                calculated_crc, received_crc
            )));
        }
        Ok(frame[1..data_len].to_vec())
    }
}

/// Data conversion utilities
pub mod data_utils {
    use super::*;

    /// Convert register values to bytes (big-endian)
    pub fn registers_to_bytes(registers: &[u16]) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(registers.len() * 2);
        for &register in registers {
            bytes.extend_from_slice(&register.to_be_bytes());
        }
        bytes
    }

    /// Convert bytes to register values (big-endian)
    pub fn bytes_to_registers(bytes: &[u8]) -> LinkResult<Vec<u16>> {
        if bytes.len() % 2 != 0 {
            return Err(LinkError::invalid_frame(
                "Register byte array length must be even",
            ));
        }

        let mut registers = Vec::new();
        for chunk in bytes.chunks(2) {
            registers.push(u16::from_be_bytes([chunk[0], chunk[1]]));
        }
        Ok(registers)
    }

    /// Convert u32 to two u16 registers (big-endian)
    pub fn u32_to_registers(value: u32) -> [u16; 2] {
        [(value >> 16) as u16, value as u16]
    }

    /// Convert two u16 registers to u32 (big-endian)
    pub fn registers_to_u32(registers: &[u16]) -> LinkResult<u32> {
        if registers.len() < 2 {
            return Err(LinkError::invalid_frame("Need at least 2 registers for u32"));
        }
        Ok(((registers[0] as u32) << 16) | (registers[1] as u32))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_function_conversion() {
        assert_eq!(
            ModbusFunction::from_u8(0x04).unwrap(),
            ModbusFunction::ReadInputRegisters
        );
        assert_eq!(ModbusFunction::ReadInputRegisters.to_u8(), 0x04);

        assert!(ModbusFunction::from_u8(0xFF).is_err());
        assert!(ModbusFunction::ReadInputRegisters.is_read_function());
        assert!(ModbusFunction::WriteSingleRegister.is_write_function());
    }

    #[test]
    fn test_read_request_payload_layout() {
        let pdu = ModbusPdu::read_input_registers(0x0082, 1);
        assert_eq!(pdu.function_code, 0x04);
        assert_eq!(pdu.payload, vec![0x00, 0x82, 0x00, 0x01]);

        let pdu = ModbusPdu::read_holding_registers(0x1234, 0x0002);
        assert_eq!(pdu.function_code, 0x03);
        assert_eq!(pdu.payload, vec![0x12, 0x34, 0x00, 0x02]);
    }

    #[test]
    fn test_write_single_register_payload_layout() {
        let pdu = ModbusPdu::write_single_register(0x00AB, 0x0100);
        assert_eq!(pdu.function_code, 0x06);
        assert_eq!(pdu.payload, vec![0x00, 0xAB, 0x01, 0x00]);
    }

    #[test]
    fn test_pdu_round_trip() {
        let pdu = ModbusPdu::raw(0x04, vec![0x02, 0x01, 0x9A]);
        let parsed = ModbusPdu::from_bytes(&pdu.to_bytes()).unwrap();
        assert_eq!(parsed, pdu);

        assert!(ModbusPdu::from_bytes(&[]).is_err());
    }

    #[test]
    fn test_exception_flag() {
        let pdu = ModbusPdu::raw(0x84, vec![0x02]);
        assert!(pdu.is_exception());
        assert_eq!(pdu.function().unwrap(), ModbusFunction::ReadInputRegisters);

        let pdu = ModbusPdu::read_input_registers(0, 1);
        assert!(!pdu.is_exception());
    }

    #[test]
    fn test_tcp_packet_layout() {
        let mut codec = ModbusTcpCodec::new();
        let packet = codec.build_read_input_registers(0x01, 0x0082, 1);

        // First packet from a fresh codec carries transaction id 1
        assert_eq!(
            packet,
            vec![0x00, 0x01, 0x00, 0x00, 0x00, 0x03, 0x01, 0x04, 0x00, 0x82, 0x00, 0x01]
        );
        assert_eq!(packet.len(), MBAP_HEADER_SIZE + 5);
        assert_eq!(codec.last_transaction_id(), 1);
    }

    #[test]
    fn test_transaction_ids_increase() {
        let mut codec = ModbusTcpCodec::new();
        let pdu = ModbusPdu::read_input_registers(0, 1);

        let first = codec.build_packet(0x01, &pdu);
        let second = codec.build_packet(0x01, &pdu);
        assert_eq!(BigEndian::read_u16(&first[0..2]), 1);
        assert_eq!(BigEndian::read_u16(&second[0..2]), 2);
    }

    #[test]
    fn test_transaction_id_wrap_skips_zero() {
        let mut codec = ModbusTcpCodec {
            transaction_id: u16::MAX,
        };
        let packet = codec.build_packet(0x01, &ModbusPdu::read_input_registers(0, 1));
        assert_eq!(BigEndian::read_u16(&packet[0..2]), 1);
    }

    #[test]
    fn test_tcp_verify_frame() {
        let codec = ModbusTcpCodec::new();

        // Below the 8-byte minimum
        assert!(!codec.verify_frame(&[0x00, 0x01, 0x00, 0x00, 0x00, 0x03, 0x01]));

        // Complete 12-byte read request
        let frame = [
            0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x01, 0x04, 0x00, 0x82, 0x00, 0x01,
        ];
        assert!(codec.verify_frame(&frame));

        // Length field claims more bytes than arrived
        let truncated = [0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x01, 0x04, 0x00, 0x82];
        assert!(!codec.verify_frame(&truncated));
    }

    #[test]
    fn test_tcp_extract_pdu() {
        let mut codec = ModbusTcpCodec::new();
        let pdu = ModbusPdu::read_input_registers(0x0080, 2);
        let packet = codec.build_packet(0x01, &pdu);

        let extracted = codec.extract_pdu(&packet).unwrap();
        assert_eq!(extracted, pdu.to_bytes());

        assert!(codec.extract_pdu(&packet[..6]).is_err());
    }

    #[test]
    fn test_expected_frame_len() {
        assert_eq!(ModbusTcpCodec::expected_frame_len(&[0x00, 0x01]), None);
        let header = [0x00, 0x01, 0x00, 0x00, 0x00, 0x07];
        assert_eq!(ModbusTcpCodec::expected_frame_len(&header), Some(13));
    }

    #[test]
    fn test_rtu_round_trip() {
        let mut codec = ModbusRtuCodec::new();
        let pdu = ModbusPdu::read_input_registers(0x0097, 2);
        let frame = codec.build_packet(0x01, &pdu);

        assert_eq!(frame[0], 0x01);
        assert!(codec.verify_frame(&frame));
        assert_eq!(codec.extract_pdu(&frame).unwrap(), pdu.to_bytes());
    }

    #[test]
    fn test_rtu_rejects_corrupt_crc() {
        let mut codec = ModbusRtuCodec::new();
        let mut frame = codec.build_packet(0x01, &ModbusPdu::read_input_registers(0, 1));
        let last = frame.len() - 1;
        frame[last] ^= 0xFF;

        assert!(!codec.verify_frame(&frame));
        assert!(codec.extract_pdu(&frame).is_err());
        assert!(!codec.verify_frame(&[0x01, 0x04]));
    }

    #[test]
    fn test_data_utils() {
        let registers = vec![0x1234, 0x5678];
        let bytes = data_utils::registers_to_bytes(&registers);
        assert_eq!(bytes, vec![0x12, 0x34, 0x56, 0x78]);

        let back = data_utils::bytes_to_registers(&bytes).unwrap();
        assert_eq!(back, registers);
        assert!(data_utils::bytes_to_registers(&[0x12, 0x34, 0x56]).is_err());

        let words = data_utils::u32_to_registers(0x0001_2C00);
        assert_eq!(words, [0x0001, 0x2C00]);
        assert_eq!(data_utils::registers_to_u32(&words).unwrap(), 0x0001_2C00);
        assert!(data_utils::registers_to_u32(&[1]).is_err());
    }
}
