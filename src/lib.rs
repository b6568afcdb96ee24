//! # BCR Link - Barcode Reader & UPS Device Link Layer
//!
//! **Author:** Evan Liu <evan.liu@voltageenergy.com>
//! **Version:** 0.2.0
//! **License:** MIT
//!
//! A transport-agnostic device link layer for industrial fixed-mount barcode
//! readers, with Modbus TCP monitoring of the UPS that keeps the scan station
//! alive through power events.
//!
//! ## Features
//!
//! - **🔌 Transport Agnostic**: one line pipeline over RS-232 ports and TCP device servers
//! - **⚡ Async Throughout**: Tokio tasks own the I/O; callers talk over channels
//! - **📡 Trigger/Scan Workflow**: `LON` trigger command, terminator-framed replies
//! - **🔍 Error Classification**: device `ERROR` replies surfaced as typed lines
//! - **🔋 UPS Monitoring**: Modbus TCP input-register queries with frame reassembly
//! - **📊 Built-in Monitoring**: per-link transport and per-session statistics
//!
//! ## UPS Register Map (unit id 0x01, function 0x04)
//!
//! | Query | Start | Registers |
//! |-------|-------|-----------|
//! | `bit_register` | 0x0000 | 5 |
//! | `remaining_time` | 0x0080 | 2 |
//! | `charge_state` | 0x0082 | 1 |
//! | `battery_voltage` | 0x0083 | 2 |
//! | `internal_temperature` | 0x0087 | 1 |
//! | `output_voltage` | 0x008E | 2 |
//! | `input_voltage` | 0x0097 | 2 |
//!
//! ## Quick Start
//!
//! ### Reader Example
//!
//! ```rust,no_run
//! use bcr_link::{LinkResult, ReaderSession};
//!
//! #[tokio::main]
//! async fn main() -> LinkResult<()> {
//!     // Readers behind a serial device server speak TCP
//!     let mut session = ReaderSession::tcp("192.168.1.50", 2001);
//!     let mut lines = session.subscribe();
//!
//!     session.connect().await?;
//!     session.trigger_read().await?;
//!
//!     if let Ok(line) = lines.recv().await {
//!         println!("scanned: {}", line.text);
//!     }
//!
//!     session.disconnect().await?;
//!     Ok(())
//! }
//! ```
//!
//! ### UPS Example
//!
//! ```rust,no_run
//! use bcr_link::{UpsClient, UpsQueryType};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = UpsClient::connect("192.168.1.60", 502).await?;
//!
//!     for query in UpsQueryType::all() {
//!         let pdu = client.read_query(query).await?;
//!         println!("{}: {:02X?}", query, pdu.payload);
//!     }
//!
//!     client.disconnect().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐      ┌─────────────────┐
//! │   Application   │      │   Application   │
//! └─────────────────┘      └─────────────────┘
//!          │                        │
//! ┌─────────────────┐      ┌─────────────────┐
//! │  ReaderSession  │      │    UpsClient    │
//! │ (trigger/lines) │      │  (Modbus TCP)   │
//! └─────────────────┘      └─────────────────┘
//!          │                        │
//! ┌─────────────────┐      ┌─────────────────┐
//! │   LineFramer    │      │   FrameCodec    │
//! │ (Stream/Burst)  │      │  (MBAP / CRC)   │
//! └─────────────────┘      └─────────────────┘
//!          │                        │
//! ┌──────────────────────────────────────────┐
//! │       LinkTransport (Serial / TCP)       │
//! └──────────────────────────────────────────┘
//! ```

/// Core error types and result handling
///
/// Author: Evan Liu <evan.liu@voltageenergy.com>
pub mod error;

/// Connection configuration for serial and TCP links
///
/// Author: Evan Liu <evan.liu@voltageenergy.com>
pub mod config;

/// Byte-level transport layer for serial and TCP communication
///
/// Author: Evan Liu <evan.liu@voltageenergy.com>
pub mod transport;

/// Terminator-delimited line framing and classification
///
/// Author: Evan Liu <evan.liu@voltageenergy.com>
pub mod framer;

/// Modbus protocol encoding for UPS queries
///
/// Author: Evan Liu <evan.liu@voltageenergy.com>
pub mod protocol;

/// Reader session pipeline and line fan-out
///
/// Author: Evan Liu <evan.liu@voltageenergy.com>
pub mod session;

/// UPS monitoring client
///
/// Author: Evan Liu <evan.liu@voltageenergy.com>
pub mod ups;

/// Logging system for the library
///
/// Author: Evan Liu <evan.liu@voltageenergy.com>
pub mod logging;

// Re-export main types for convenience
pub use error::{LinkError, LinkResult};
pub use config::{ConnectionConfig, TransportKind};
pub use transport::{open_transport, LinkTransport, SerialTransport, TcpTransport, TransportStats};
pub use framer::{DecodedLine, FramingMode, LineFramer, LineKind};
pub use protocol::{
    FrameCodec, ModbusFunction, ModbusPdu, ModbusRtuCodec, ModbusTcpCodec, MBAP_HEADER_SIZE,
};
pub use session::{ReaderSession, SessionStats};
pub use ups::{UpsClient, UpsQueryType};
pub use logging::{CallbackLogger, LogCallback, LogLevel};

/// Line terminator the readers ship with (bare carriage return)
pub const DEFAULT_TERMINATOR: &str = "\r";

/// Software trigger command that starts one scan cycle
pub const TRIGGER_COMMAND: &str = "LON";

/// Default bound on TCP connection establishment (3 seconds)
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 3000;

/// Bound on each serial read and write (1 second)
pub const SERIAL_TIMEOUT_MS: u64 = 1000;

/// Fixed reader baud rate (8N1 framing)
pub const SERIAL_BAUD_RATE: u32 = 115_200;

/// Read-chunk capacity for reader links
pub const READER_CHUNK_SIZE: usize = 1024;

/// Receive buffer size for UPS responses
pub const UPS_RESPONSE_BUFFER_SIZE: usize = 256;

/// Modbus unit id the UPS answers on
pub const UPS_UNIT_ID: u8 = 0x01;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get library information
pub fn info() -> String {
    format!(
        "BCR Link v{} - Barcode reader and UPS device link layer by Evan Liu",
        VERSION
    )
}
