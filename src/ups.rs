//! UPS monitoring over Modbus TCP
//!
//! The UPS answers Read Input Registers (0x04) queries on unit id 0x01.
//! [`UpsQueryType`] names the documented register spans and [`UpsClient`]
//! drives the request/response exchange, handing payloads back as raw PDUs.
//! Register contents are device-specific raw words; interpretation and
//! scaling belong to the caller.
//!
//! # Example
//!
//! ```no_run
//! use bcr_link::ups::{UpsClient, UpsQueryType};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = UpsClient::connect("192.168.1.60", 502).await?;
//!
//!     let pdu = client.read_query(UpsQueryType::ChargeState).await?;
//!     println!("charge payload: {:02X?}", pdu.payload);
//!
//!     client.disconnect().await?;
//!     Ok(())
//! }
//! ```

use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{LinkError, LinkResult};
use crate::logging::{CallbackLogger, LogLevel};
use crate::protocol::{FrameCodec, ModbusPdu, ModbusTcpCodec};
use crate::transport::{LinkTransport, TcpTransport, TransportStats};
use crate::{DEFAULT_CONNECT_TIMEOUT_MS, UPS_RESPONSE_BUFFER_SIZE, UPS_UNIT_ID};

/// The register spans a UPS exposes for monitoring
///
/// Each variant maps to a start address and register count for a Read Input
/// Registers query. Addresses follow the device's published map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UpsQueryType {
    /// Status bit block (alarms, line state)
    BitRegister,
    /// Estimated runtime remaining
    RemainingTime,
    /// Battery charge level
    ChargeState,
    /// Battery voltage
    BatteryVoltage,
    /// Temperature inside the unit
    InternalTemperature,
    /// Voltage on the output side
    OutputVoltage,
    /// Voltage on the input side
    InputVoltage,
}

impl UpsQueryType {
    /// Start address and register count for this query
    pub fn register_span(self) -> (u16, u16) {
        match self {
            UpsQueryType::BitRegister => (0x0000, 5),
            UpsQueryType::RemainingTime => (0x0080, 2),
            UpsQueryType::ChargeState => (0x0082, 1),
            UpsQueryType::BatteryVoltage => (0x0083, 2),
            UpsQueryType::InternalTemperature => (0x0087, 1),
            UpsQueryType::OutputVoltage => (0x008E, 2),
            UpsQueryType::InputVoltage => (0x0097, 2),
        }
    }

    /// First register of the span
    pub fn start_address(self) -> u16 {
        self.register_span().0
    }

    /// Number of registers in the span
    pub fn register_count(self) -> u16 {
        self.register_span().1
    }

    /// Every supported query, in register-map order
    pub fn all() -> [UpsQueryType; 7] {
        [
            UpsQueryType::BitRegister,
            UpsQueryType::RemainingTime,
            UpsQueryType::ChargeState,
            UpsQueryType::BatteryVoltage,
            UpsQueryType::InternalTemperature,
            UpsQueryType::OutputVoltage,
            UpsQueryType::InputVoltage,
        ]
    }

    /// Stable name used for display and parsing
    pub fn name(self) -> &'static str {
        match self {
            UpsQueryType::BitRegister => "bit_register",
            UpsQueryType::RemainingTime => "remaining_time",
            UpsQueryType::ChargeState => "charge_state",
            UpsQueryType::BatteryVoltage => "battery_voltage",
            UpsQueryType::InternalTemperature => "internal_temperature",
            UpsQueryType::OutputVoltage => "output_voltage",
            UpsQueryType::InputVoltage => "input_voltage",
        }
    }
}

impl fmt::Display for UpsQueryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for UpsQueryType {
    type Err = LinkError;

    /// Parse a query name, tolerating case and `_`/`-` separators
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .to_ascii_lowercase()
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .collect();
        match normalized.as_str() {
            "bitregister" | "bits" => Ok(UpsQueryType::BitRegister),
            "remainingtime" | "runtime" => Ok(UpsQueryType::RemainingTime),
            "chargestate" | "charge" => Ok(UpsQueryType::ChargeState),
            "batteryvoltage" | "battery" => Ok(UpsQueryType::BatteryVoltage),
            "internaltemperature" | "temperature" => Ok(UpsQueryType::InternalTemperature),
            "outputvoltage" | "output" => Ok(UpsQueryType::OutputVoltage),
            "inputvoltage" | "input" => Ok(UpsQueryType::InputVoltage),
            _ => Err(LinkError::malformed_query(s)),
        }
    }
}

/// Modbus TCP client for one UPS
///
/// Owns its transport and codec directly; UPS traffic is strict
/// request/response, so no background task is involved. Reads and writes are
/// bounded by the connect timeout.
pub struct UpsClient {
    transport: TcpTransport,
    codec: ModbusTcpCodec,
    logger: Option<CallbackLogger>,
}

impl UpsClient {
    /// Connect with the default 3000 ms bound
    pub async fn connect(host: &str, port: u16) -> LinkResult<Self> {
        Self::connect_with_timeout(host, port, Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS))
            .await
    }

    /// Connect with an explicit bound, which also caps each read and write
    pub async fn connect_with_timeout(
        host: &str,
        port: u16,
        timeout: Duration,
    ) -> LinkResult<Self> {
        let transport = TcpTransport::connect_with_timeout(host, port, timeout)
            .await?
            .with_io_timeout(timeout)
            .with_chunk_capacity(UPS_RESPONSE_BUFFER_SIZE);

        Ok(Self {
            transport,
            codec: ModbusTcpCodec::new(),
            logger: None,
        })
    }

    /// Attach a callback logger
    pub fn with_logger(mut self, logger: CallbackLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Enable or disable hex packet logging on the transport
    pub fn set_packet_logging(&mut self, enabled: bool) {
        self.transport.set_packet_logging(enabled);
    }

    /// The remote endpoint this client talks to
    pub fn address(&self) -> &str {
        &self.transport.address
    }

    /// Whether the transport still holds a live connection
    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// Transport counters for this connection
    pub fn stats(&self) -> TransportStats {
        self.transport.get_stats()
    }

    /// Build the Read Input Registers packet for `query`
    ///
    /// Consumes the next transaction id, so each call yields a distinct
    /// packet even for the same query.
    pub fn build_read_command(&mut self, query: UpsQueryType) -> Vec<u8> {
        let (start, count) = query.register_span();
        self.codec
            .build_read_input_registers(UPS_UNIT_ID, start, count)
    }

    /// One raw write followed by one raw read
    ///
    /// Returns `Ok(None)` when the peer closed instead of answering. The
    /// single read may return a partial frame on a congested link; use
    /// [`exchange`](Self::exchange) when the response must be complete.
    pub async fn send_and_receive(
        &mut self,
        request: &[u8],
        rx_buffer_size: usize,
    ) -> LinkResult<Option<Bytes>> {
        self.transport.send(request).await?;

        let response = self.transport.read_up_to(rx_buffer_size).await?;
        if response.is_empty() {
            return Ok(None);
        }
        Ok(Some(response))
    }

    /// Write a request and read until the MBAP length field is satisfied
    ///
    /// Reassembles responses that arrive split across TCP segments. A peer
    /// that closes mid-frame yields `UnexpectedDisconnect`; one that stalls
    /// runs into the read bound.
    pub async fn exchange(&mut self, request: &[u8]) -> LinkResult<Bytes> {
        self.transport.send(request).await?;

        let mut frame = BytesMut::with_capacity(UPS_RESPONSE_BUFFER_SIZE);
        loop {
            let chunk = self.transport.read_up_to(UPS_RESPONSE_BUFFER_SIZE).await?;
            if chunk.is_empty() {
                return Err(LinkError::unexpected_disconnect(
                    "UPS closed the connection mid-frame",
                ));
            }
            frame.extend_from_slice(&chunk);

            if let Some(expected) = ModbusTcpCodec::expected_frame_len(&frame) {
                if frame.len() >= expected {
                    break;
                }
            }
        }

        let frame = frame.freeze();
        if !self.codec.verify_frame(&frame) {
            return Err(LinkError::invalid_frame(format!(
                "UPS response failed frame verification ({} bytes)",
                frame.len()
            )));
        }
        Ok(frame)
    }

    /// Query one register span and return the response PDU
    pub async fn read_query(&mut self, query: UpsQueryType) -> LinkResult<ModbusPdu> {
        let request = self.build_read_command(query);

        if let Some(ref logger) = self.logger {
            let (start, count) = query.register_span();
            logger.info(&format!(
                "UPS query {} (start 0x{:04X}, {} registers)",
                query, start, count
            ));
            logger.log_packet(LogLevel::Debug, "UPS ->", &request);
        }

        let frame = self.exchange(&request).await?;

        if let Some(ref logger) = self.logger {
            logger.log_packet(LogLevel::Debug, "UPS <-", &frame);
        }

        let pdu_bytes = self.codec.extract_pdu(&frame)?;
        ModbusPdu::from_bytes(&pdu_bytes)
    }

    /// Close the connection. Safe to call repeatedly.
    pub async fn disconnect(&mut self) -> LinkResult<()> {
        self.transport.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn test_query_register_map() {
        assert_eq!(UpsQueryType::BitRegister.register_span(), (0x0000, 5));
        assert_eq!(UpsQueryType::RemainingTime.register_span(), (0x0080, 2));
        assert_eq!(UpsQueryType::ChargeState.register_span(), (0x0082, 1));
        assert_eq!(UpsQueryType::BatteryVoltage.register_span(), (0x0083, 2));
        assert_eq!(UpsQueryType::InternalTemperature.register_span(), (0x0087, 1));
        assert_eq!(UpsQueryType::OutputVoltage.register_span(), (0x008E, 2));
        assert_eq!(UpsQueryType::InputVoltage.register_span(), (0x0097, 2));
        assert_eq!(UpsQueryType::all().len(), 7);
    }

    #[test]
    fn test_query_name_parsing() {
        assert_eq!(
            "charge_state".parse::<UpsQueryType>().unwrap(),
            UpsQueryType::ChargeState
        );
        assert_eq!(
            "Battery-Voltage".parse::<UpsQueryType>().unwrap(),
            UpsQueryType::BatteryVoltage
        );
        assert_eq!(
            "runtime".parse::<UpsQueryType>().unwrap(),
            UpsQueryType::RemainingTime
        );

        let err = "wattage".parse::<UpsQueryType>().unwrap_err();
        assert!(err.is_protocol_error());
        assert!(err.to_string().contains("wattage"));
    }

    #[test]
    fn test_display_round_trips() {
        for query in UpsQueryType::all() {
            let parsed: UpsQueryType = query.to_string().parse().unwrap();
            assert_eq!(parsed, query);
        }
    }

    #[tokio::test]
    async fn test_charge_state_exchange_with_split_response() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let ups = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();

            let mut request = [0u8; 12];
            sock.read_exact(&mut request).await.unwrap();
            assert_eq!(
                request,
                [0x00, 0x01, 0x00, 0x00, 0x00, 0x03, 0x01, 0x04, 0x00, 0x82, 0x00, 0x01]
            );

            // 11-byte response delivered in two segments to force reassembly
            let response = [
                0x00, 0x01, 0x00, 0x00, 0x00, 0x05, 0x01, 0x04, 0x02, 0x00, 0x55,
            ];
            sock.write_all(&response[..6]).await.unwrap();
            sock.flush().await.unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
            sock.write_all(&response[6..]).await.unwrap();
            sock.flush().await.unwrap();
        });

        let mut client = UpsClient::connect("127.0.0.1", port).await.unwrap();
        let pdu = client.read_query(UpsQueryType::ChargeState).await.unwrap();

        assert_eq!(pdu.function_code, 0x04);
        assert!(!pdu.is_exception());
        assert_eq!(pdu.payload, vec![0x02, 0x00, 0x55]);

        let stats = client.stats();
        assert_eq!(stats.writes, 1);
        assert!(stats.reads >= 2);

        ups.await.unwrap();
        client.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_send_and_receive_none_when_peer_closes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let ups = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            // Swallow the request, then hang up without answering
            let mut buf = [0u8; 12];
            let _ = sock.read_exact(&mut buf).await;
        });

        let mut client = UpsClient::connect("127.0.0.1", port).await.unwrap();
        let request = client.build_read_command(UpsQueryType::BitRegister);
        let response = client
            .send_and_receive(&request, UPS_RESPONSE_BUFFER_SIZE)
            .await
            .unwrap();

        assert!(response.is_none());
        assert!(!client.is_connected());

        ups.await.unwrap();
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let accept = tokio::spawn(async move { listener.accept().await.unwrap() });

        let mut client = UpsClient::connect("127.0.0.1", port).await.unwrap();
        client.disconnect().await.unwrap();
        client.disconnect().await.unwrap();
        assert!(!client.is_connected());

        drop(accept);
    }
}
