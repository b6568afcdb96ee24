//! # Link Transport Layer
//!
//! This module provides the transport layer implementations for reader and UPS
//! communication, supporting serial and TCP links behind a unified byte-level
//! interface.
//!
//! ## Supported Transports
//!
//! ### Serial (`SerialTransport`)
//! - Fixed reader parameters: 115200 baud, 8 data bits, no parity, 1 stop bit
//! - DTR and RTS asserted after open
//! - Read and write bounded at 1000 ms each
//!
//! ### TCP (`TcpTransport`)
//! - Bounded connect (3000 ms default) failing with `ConnectTimeout`, never a
//!   hang
//! - Optional read/write timeouts (the UPS path bounds both, the reader path
//!   leaves reads unbounded)
//! - Configurable chunk capacity per link
//!
//! Unlike a request/response transport, this layer moves raw byte chunks: the
//! line framer upstream decides where messages begin and end, so `read_chunk`
//! hands back whatever one read yields. An empty chunk signals orderly peer
//! closure, exactly once, after which the transport reports disconnected.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use bcr_link::transport::{LinkTransport, TcpTransport};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut transport = TcpTransport::connect("192.168.0.50", 2001).await?;
//!
//!     transport.send(b"LON\r").await?;
//!     let chunk = transport.read_chunk().await?;
//!     if chunk.is_empty() {
//!         println!("peer closed the connection");
//!     } else {
//!         println!("got {} bytes", chunk.len());
//!     }
//!
//!     let stats = transport.get_stats();
//!     println!("bytes sent: {}, received: {}", stats.bytes_sent, stats.bytes_received);
//!
//!     transport.close().await?;
//!     Ok(())
//! }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_serial::{self, SerialPort};
use tracing::info;

use crate::config::{ConnectionConfig, TransportKind};
use crate::error::{LinkError, LinkResult};
use crate::{DEFAULT_CONNECT_TIMEOUT_MS, READER_CHUNK_SIZE, SERIAL_BAUD_RATE, SERIAL_TIMEOUT_MS};

/// Format raw bytes as hex string for packet logging
fn format_hex_packet(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Log packet with direction and link label
fn log_packet(direction: &str, data: &[u8], link: &str) {
    info!("[LINK-{}] {} {}", link, direction, format_hex_packet(data));
}

/// Byte-level transport abstraction for serial and TCP links
///
/// Defines the common interface the reader session and the UPS client drive.
/// Implementations own their underlying handle exclusively; lifecycle is
/// open → active → closed, and a failed open leaves nothing partially
/// constructed.
///
/// ## Thread Safety
///
/// Implementations are `Send + Sync`; a session moves its boxed transport
/// into the I/O task that owns it for the connection's lifetime.
#[async_trait]
pub trait LinkTransport: Send + Sync {
    /// Write the full buffer to the link
    ///
    /// TCP links flush explicitly after the write. Where a write timeout is
    /// configured the whole write+flush is bounded by it. A failure is
    /// reported to the caller and does not drop the link; retrying is the
    /// caller's decision.
    async fn send(&mut self, data: &[u8]) -> LinkResult<()>;

    /// Read whatever the link currently has, up to the chunk capacity
    ///
    /// An empty chunk means the peer closed in an orderly fashion; it is
    /// returned exactly once and the transport reports disconnected
    /// afterwards. Serial reads fail with `ReadTimeout` when the 1000 ms
    /// bound expires; the receive loop treats that as a non-fatal condition.
    async fn read_chunk(&mut self) -> LinkResult<Bytes>;

    /// Close the link
    ///
    /// Idempotent: safe to call repeatedly or after a failed open.
    async fn close(&mut self) -> LinkResult<()>;

    /// Check if the transport believes the link is active
    ///
    /// A local check only; it does not probe the remote end.
    fn is_connected(&self) -> bool;

    /// Get communication statistics for this link
    fn get_stats(&self) -> TransportStats;
}

/// Transport layer statistics
#[derive(Debug, Clone, Default)]
pub struct TransportStats {
    pub writes: u64,
    pub reads: u64,
    pub errors: u64,
    pub timeouts: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

/// TCP transport implementation
pub struct TcpTransport {
    stream: Option<TcpStream>,
    /// Remote endpoint as given at connect time
    pub address: String,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
    chunk_capacity: usize,
    stats: TransportStats,
    /// Enable packet logging for debugging
    packet_logging: bool,
}

impl TcpTransport {
    /// Connect with the default 3000 ms bound
    pub async fn connect(host: &str, port: u16) -> LinkResult<Self> {
        Self::connect_with_timeout(host, port, Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS))
            .await
    }

    /// Connect with an explicit bound
    ///
    /// Fails with `ConnectTimeout` when the bound expires and `OpenFailed`
    /// when the peer refuses or the target is unreachable. No read or write
    /// timeout is set; use [`TcpTransport::with_io_timeout`] for links that
    /// need bounded exchanges.
    pub async fn connect_with_timeout(
        host: &str,
        port: u16,
        connect_timeout: Duration,
    ) -> LinkResult<Self> {
        let address = format!("{}:{}", host, port);
        let stream = match timeout(connect_timeout, TcpStream::connect((host, port))).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(LinkError::open_failed(format!(
                    "Failed to connect to {}: {}",
                    address, e
                )))
            }
            Err(_) => {
                return Err(LinkError::connect_timeout(
                    address,
                    connect_timeout.as_millis() as u64,
                ))
            }
        };

        Ok(Self {
            stream: Some(stream),
            address,
            read_timeout: None,
            write_timeout: None,
            chunk_capacity: READER_CHUNK_SIZE,
            stats: TransportStats::default(),
            packet_logging: false,
        })
    }

    /// Bound both reads and writes by `io_timeout`
    pub fn with_io_timeout(mut self, io_timeout: Duration) -> Self {
        self.read_timeout = Some(io_timeout);
        self.write_timeout = Some(io_timeout);
        self
    }

    /// Override the read-chunk capacity
    pub fn with_chunk_capacity(mut self, capacity: usize) -> Self {
        self.chunk_capacity = capacity;
        self
    }

    /// Enable or disable packet logging
    pub fn set_packet_logging(&mut self, enabled: bool) {
        self.packet_logging = enabled;
    }

    /// One read of at most `max_len` bytes
    ///
    /// The sized primitive behind `read_chunk`; the UPS exchange calls it
    /// directly with its response buffer size.
    pub async fn read_up_to(&mut self, max_len: usize) -> LinkResult<Bytes> {
        let read_timeout = self.read_timeout;
        let mut buf = BytesMut::zeroed(max_len);

        let read_result = {
            let stream = match self.stream.as_mut() {
                Some(stream) => stream,
                None => {
                    return Err(LinkError::unexpected_disconnect(
                        "TCP stream is not connected",
                    ))
                }
            };
            match read_timeout {
                Some(bound) => timeout(bound, stream.read(&mut buf)).await,
                None => Ok(stream.read(&mut buf).await),
            }
        };

        match read_result {
            Err(_) => {
                self.stats.timeouts += 1;
                Err(LinkError::read_timeout(
                    read_timeout.map(|d| d.as_millis() as u64).unwrap_or(0),
                ))
            }
            Ok(Ok(0)) => {
                // Orderly closure: hand the empty chunk back once, then report
                // disconnected on every later call.
                self.stats.reads += 1;
                self.stream = None;
                Ok(Bytes::new())
            }
            Ok(Ok(n)) => {
                self.stats.reads += 1;
                self.stats.bytes_received += n as u64;
                buf.truncate(n);
                if self.packet_logging {
                    log_packet("recv", &buf, "TCP");
                }
                Ok(buf.freeze())
            }
            Ok(Err(e)) => {
                self.stats.errors += 1;
                self.stream = None;
                Err(LinkError::unexpected_disconnect(format!(
                    "TCP read from {} failed: {}",
                    self.address, e
                )))
            }
        }
    }
}

#[async_trait]
impl LinkTransport for TcpTransport {
    async fn send(&mut self, data: &[u8]) -> LinkResult<()> {
        let write_timeout = self.write_timeout;

        let write_result = {
            let stream = match self.stream.as_mut() {
                Some(stream) => stream,
                None => {
                    return Err(LinkError::unexpected_disconnect(
                        "TCP stream is not connected",
                    ))
                }
            };
            let write_and_flush = async {
                stream.write_all(data).await?;
                stream.flush().await
            };
            match write_timeout {
                Some(bound) => timeout(bound, write_and_flush).await,
                None => Ok(write_and_flush.await),
            }
        };

        match write_result {
            Err(_) => {
                self.stats.timeouts += 1;
                self.stats.errors += 1;
                Err(LinkError::write_failed(format!(
                    "TCP write to {} timed out",
                    self.address
                )))
            }
            Ok(Err(e)) => {
                self.stats.errors += 1;
                Err(LinkError::write_failed(format!(
                    "TCP write to {} failed: {}",
                    self.address, e
                )))
            }
            Ok(Ok(())) => {
                self.stats.writes += 1;
                self.stats.bytes_sent += data.len() as u64;
                if self.packet_logging {
                    log_packet("send", data, "TCP");
                }
                Ok(())
            }
        }
    }

    async fn read_chunk(&mut self) -> LinkResult<Bytes> {
        let capacity = self.chunk_capacity;
        self.read_up_to(capacity).await
    }

    async fn close(&mut self) -> LinkResult<()> {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn get_stats(&self) -> TransportStats {
        self.stats.clone()
    }
}

/// Serial transport implementation
///
/// Opens with the fixed reader parameters; both reads and writes are bounded
/// at 1000 ms.
pub struct SerialTransport {
    port: Option<tokio_serial::SerialStream>,
    /// Port name/path as given at open time
    pub port_name: String,
    io_timeout: Duration,
    chunk_capacity: usize,
    stats: TransportStats,
    /// Enable packet logging for debugging
    packet_logging: bool,
}

impl SerialTransport {
    /// Open a serial port with the fixed reader parameters
    ///
    /// 115200 baud, 8 data bits, no parity, 1 stop bit; DTR and RTS are
    /// asserted once the port is open so the attached reader powers its
    /// interface. Any failure, including the control-line writes, leaves the
    /// port closed.
    pub fn open(port_name: &str) -> LinkResult<Self> {
        let builder = tokio_serial::new(port_name, SERIAL_BAUD_RATE)
            .data_bits(tokio_serial::DataBits::Eight)
            .stop_bits(tokio_serial::StopBits::One)
            .parity(tokio_serial::Parity::None)
            .timeout(Duration::from_millis(SERIAL_TIMEOUT_MS));

        let mut port = tokio_serial::SerialStream::open(&builder).map_err(|e| {
            LinkError::open_failed(format!("Failed to open serial port {}: {}", port_name, e))
        })?;

        port.write_data_terminal_ready(true).map_err(|e| {
            LinkError::open_failed(format!("Failed to assert DTR on {}: {}", port_name, e))
        })?;
        port.write_request_to_send(true).map_err(|e| {
            LinkError::open_failed(format!("Failed to assert RTS on {}: {}", port_name, e))
        })?;

        Ok(Self {
            port: Some(port),
            port_name: port_name.to_string(),
            io_timeout: Duration::from_millis(SERIAL_TIMEOUT_MS),
            chunk_capacity: READER_CHUNK_SIZE,
            stats: TransportStats::default(),
            packet_logging: false,
        })
    }

    /// Enable or disable packet logging
    pub fn set_packet_logging(&mut self, enabled: bool) {
        self.packet_logging = enabled;
    }
}

#[async_trait]
impl LinkTransport for SerialTransport {
    async fn send(&mut self, data: &[u8]) -> LinkResult<()> {
        let io_timeout = self.io_timeout;

        let write_result = {
            let port = match self.port.as_mut() {
                Some(port) => port,
                None => {
                    return Err(LinkError::unexpected_disconnect(
                        "Serial port is not open",
                    ))
                }
            };
            let write_and_flush = async {
                port.write_all(data).await?;
                port.flush().await
            };
            timeout(io_timeout, write_and_flush).await
        };

        match write_result {
            Err(_) => {
                self.stats.timeouts += 1;
                self.stats.errors += 1;
                Err(LinkError::write_failed(format!(
                    "Serial write on {} timed out after {}ms",
                    self.port_name, SERIAL_TIMEOUT_MS
                )))
            }
            Ok(Err(e)) => {
                self.stats.errors += 1;
                Err(LinkError::write_failed(format!(
                    "Serial write on {} failed: {}",
                    self.port_name, e
                )))
            }
            Ok(Ok(())) => {
                self.stats.writes += 1;
                self.stats.bytes_sent += data.len() as u64;
                if self.packet_logging {
                    log_packet("send", data, "SERIAL");
                }
                Ok(())
            }
        }
    }

    async fn read_chunk(&mut self) -> LinkResult<Bytes> {
        let io_timeout = self.io_timeout;
        let mut buf = BytesMut::zeroed(self.chunk_capacity);

        let read_result = {
            let port = match self.port.as_mut() {
                Some(port) => port,
                None => {
                    return Err(LinkError::unexpected_disconnect(
                        "Serial port is not open",
                    ))
                }
            };
            timeout(io_timeout, port.read(&mut buf)).await
        };

        match read_result {
            Err(_) => {
                // Bounded read expired with nothing available; the port stays
                // open and the receive loop decides whether to keep polling.
                self.stats.timeouts += 1;
                Err(LinkError::read_timeout(SERIAL_TIMEOUT_MS))
            }
            Ok(Ok(0)) => {
                self.stats.reads += 1;
                self.port = None;
                Ok(Bytes::new())
            }
            Ok(Ok(n)) => {
                self.stats.reads += 1;
                self.stats.bytes_received += n as u64;
                buf.truncate(n);
                if self.packet_logging {
                    log_packet("recv", &buf, "SERIAL");
                }
                Ok(buf.freeze())
            }
            Ok(Err(e)) => {
                self.stats.errors += 1;
                self.port = None;
                Err(LinkError::unexpected_disconnect(format!(
                    "Serial read on {} failed: {}",
                    self.port_name, e
                )))
            }
        }
    }

    async fn close(&mut self) -> LinkResult<()> {
        // Dropping the stream releases the port handle; DTR/RTS fall with it.
        self.port.take();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.port.is_some()
    }

    fn get_stats(&self) -> TransportStats {
        self.stats.clone()
    }
}

/// Open the transport selected by `config`
///
/// Validates the configuration first so a bad one fails before any OS
/// resource is touched; a failed open returns the error with nothing left
/// half-open.
pub async fn open_transport(config: &ConnectionConfig) -> LinkResult<Box<dyn LinkTransport>> {
    config.validate()?;
    match config.kind {
        TransportKind::Serial => {
            let name = config.serial_port.as_deref().unwrap_or_default();
            Ok(Box::new(SerialTransport::open(name)?))
        }
        TransportKind::Tcp => {
            let host = config.host.as_deref().unwrap_or_default();
            let port = config.port.unwrap_or_default();
            Ok(Box::new(TcpTransport::connect(host, port).await?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn test_stats_default() {
        let stats = TransportStats::default();
        assert_eq!(stats.writes, 0);
        assert_eq!(stats.reads, 0);
        assert_eq!(stats.errors, 0);
        assert_eq!(stats.bytes_sent, 0);
    }

    #[test]
    fn test_format_hex_packet() {
        assert_eq!(format_hex_packet(&[0x00, 0x01, 0xAB]), "00 01 AB");
        assert_eq!(format_hex_packet(&[]), "");
    }

    #[tokio::test]
    async fn test_tcp_connect_refused_is_open_failure() {
        // Port 1 on loopback is essentially never listening.
        let result = TcpTransport::connect("127.0.0.1", 1).await;
        match result {
            Err(e) => assert!(e.is_transport_error()),
            Ok(_) => panic!("connect to 127.0.0.1:1 unexpectedly succeeded"),
        }

        // The config-driven factory surfaces the same failure.
        let config = ConnectionConfig::tcp("127.0.0.1", 1);
        assert!(open_transport(&config).await.is_err());
    }

    #[tokio::test]
    async fn test_tcp_zero_byte_read_disconnects() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (sock, _) = listener.accept().await.unwrap();
            drop(sock); // close immediately
        });

        let mut transport = TcpTransport::connect("127.0.0.1", addr.port()).await.unwrap();
        assert!(transport.is_connected());

        let chunk = transport.read_chunk().await.unwrap();
        assert!(chunk.is_empty());
        assert!(!transport.is_connected());

        // A second read on the dead link is an explicit error, not another
        // empty chunk.
        assert!(transport.read_chunk().await.is_err());

        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_tcp_close_is_idempotent() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accept = tokio::spawn(async move { listener.accept().await.unwrap() });

        let mut transport = TcpTransport::connect("127.0.0.1", addr.port()).await.unwrap();
        transport.close().await.unwrap();
        transport.close().await.unwrap();
        assert!(!transport.is_connected());

        drop(accept);
    }

    #[tokio::test]
    async fn test_tcp_send_and_receive_roundtrip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 16];
            let n = sock.read(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], b"LON\r");
            sock.write_all(b"CODE-001\r").await.unwrap();
        });

        let mut transport = TcpTransport::connect("127.0.0.1", addr.port()).await.unwrap();
        transport.send(b"LON\r").await.unwrap();
        let chunk = transport.read_chunk().await.unwrap();
        assert_eq!(&chunk[..], b"CODE-001\r");

        let stats = transport.get_stats();
        assert_eq!(stats.writes, 1);
        assert_eq!(stats.bytes_sent, 4);
        assert_eq!(stats.bytes_received, 9);

        server.await.unwrap();
    }

    #[test]
    fn test_serial_open_bad_port_fails_closed() {
        let result = SerialTransport::open("/dev/definitely-not-a-port");
        match result {
            Err(e) => assert!(e.is_transport_error()),
            Ok(_) => panic!("opening a nonexistent serial port should fail"),
        }
    }
}
