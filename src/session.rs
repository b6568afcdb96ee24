//! Reader session pipeline
//!
//! [`ReaderSession`] owns the connection lifecycle for one barcode reader.
//! After `connect`, an I/O task drives the transport (writes commands, reads
//! raw chunks) and a framing task turns those chunks into [`DecodedLine`]s.
//! Decoded lines fan out three ways: a broadcast channel for live
//! subscribers, a watch channel holding the most recent line, and an
//! in-memory result log.
//!
//! # Example
//!
//! ```no_run
//! use bcr_link::session::ReaderSession;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut session = ReaderSession::tcp("192.168.1.50", 2001);
//!     let mut lines = session.subscribe();
//!
//!     session.connect().await?;
//!     session.trigger_read().await?;
//!
//!     let line = lines.recv().await?;
//!     println!("scanned: {}", line.text);
//!
//!     session.disconnect().await?;
//!     Ok(())
//! }
//! ```

use bytes::Bytes;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch, RwLock};
use tokio::task::JoinHandle;
use log::{debug, info, warn};

use crate::config::{ConnectionConfig, TransportKind};
use crate::error::{LinkError, LinkResult};
use crate::framer::{DecodedLine, FramingMode, LineFramer};
use crate::transport::{open_transport, LinkTransport};
use crate::TRIGGER_COMMAND;

/// Pending writes queued toward the I/O task
const WRITE_QUEUE_DEPTH: usize = 8;

/// Raw chunks in flight between the I/O task and the framing task
const CHUNK_QUEUE_DEPTH: usize = 32;

/// Decoded lines buffered per broadcast subscriber
const LINE_CHANNEL_CAPACITY: usize = 64;

/// Counters for one session's lifetime
#[derive(Debug, Clone, Default)]
pub struct SessionStats {
    /// Trigger commands accepted by the device link
    pub triggers_sent: u64,
    /// Lines decoded from the byte stream
    pub lines_decoded: u64,
    /// Decoded lines the device flagged as errors
    pub error_lines: u64,
}

#[derive(Debug, Default)]
struct SessionCounters {
    triggers_sent: AtomicU64,
    lines_decoded: AtomicU64,
    error_lines: AtomicU64,
}

/// A write queued to the I/O task, answered over a oneshot
struct WriteRequest {
    payload: Vec<u8>,
    reply: oneshot::Sender<LinkResult<()>>,
}

/// Connection lifecycle and line pipeline for one barcode reader
pub struct ReaderSession {
    config: ConnectionConfig,
    connected: Arc<AtomicBool>,
    counters: Arc<SessionCounters>,
    history: Arc<RwLock<Vec<DecodedLine>>>,
    line_tx: broadcast::Sender<DecodedLine>,
    last_line_tx: Arc<watch::Sender<Option<DecodedLine>>>,
    last_line_rx: watch::Receiver<Option<DecodedLine>>,
    shutdown_tx: Option<broadcast::Sender<()>>,
    write_tx: Option<mpsc::Sender<WriteRequest>>,
    io_task: Option<JoinHandle<()>>,
    framing_task: Option<JoinHandle<()>>,
}

impl ReaderSession {
    /// Create a session for the given connection. Nothing is opened until
    /// [`connect`](Self::connect).
    pub fn new(config: ConnectionConfig) -> Self {
        let (line_tx, _) = broadcast::channel(LINE_CHANNEL_CAPACITY);
        let (last_line_tx, last_line_rx) = watch::channel(None);

        Self {
            config,
            connected: Arc::new(AtomicBool::new(false)),
            counters: Arc::new(SessionCounters::default()),
            history: Arc::new(RwLock::new(Vec::new())),
            line_tx,
            last_line_tx: Arc::new(last_line_tx),
            last_line_rx,
            shutdown_tx: None,
            write_tx: None,
            io_task: None,
            framing_task: None,
        }
    }

    /// Create a session for a serial reader
    pub fn serial(port_name: &str) -> Self {
        Self::new(ConnectionConfig::serial(port_name))
    }

    /// Create a session for a TCP-attached reader
    pub fn tcp(host: &str, port: u16) -> Self {
        Self::new(ConnectionConfig::tcp(host, port))
    }

    /// The connection settings this session was built with
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Open the transport and start the pipeline tasks
    ///
    /// Reconnecting is allowed: any previous pipeline is torn down first.
    /// Subscribers obtained from [`subscribe`](Self::subscribe) stay valid
    /// across reconnects.
    pub async fn connect(&mut self) -> LinkResult<()> {
        self.disconnect().await?;

        let transport = open_transport(&self.config).await?;

        // Serial readers deliver one scan per burst; TCP readers interleave
        // lines in a continuous stream.
        let mode = match self.config.kind {
            TransportKind::Serial => FramingMode::Burst,
            TransportKind::Tcp => FramingMode::Stream,
        };
        let framer = LineFramer::new(self.config.terminator_bytes(), mode);

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let (write_tx, write_rx) = mpsc::channel(WRITE_QUEUE_DEPTH);
        let (chunk_tx, chunk_rx) = mpsc::channel(CHUNK_QUEUE_DEPTH);

        self.connected.store(true, Ordering::SeqCst);

        self.io_task = Some(tokio::spawn(run_io(
            transport,
            shutdown_rx,
            write_rx,
            chunk_tx,
            Arc::clone(&self.connected),
        )));
        self.framing_task = Some(tokio::spawn(run_framing(
            framer,
            chunk_rx,
            self.line_tx.clone(),
            Arc::clone(&self.last_line_tx),
            Arc::clone(&self.history),
            Arc::clone(&self.counters),
        )));

        self.shutdown_tx = Some(shutdown_tx);
        self.write_tx = Some(write_tx);

        info!("[SESSION] connected to {}", self.config.endpoint());
        Ok(())
    }

    /// Stop the pipeline and close the transport
    ///
    /// Safe to call at any time, including before the first connect and
    /// repeatedly after the peer already dropped the link.
    pub async fn disconnect(&mut self) -> LinkResult<()> {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
        self.write_tx = None;

        if let Some(task) = self.io_task.take() {
            let _ = task.await;
        }
        if let Some(task) = self.framing_task.take() {
            let _ = task.await;
        }

        if self.connected.swap(false, Ordering::SeqCst) {
            info!("[SESSION] disconnected from {}", self.config.endpoint());
        }
        Ok(())
    }

    /// Whether the pipeline currently holds a live transport
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Send the trigger command, asking the device to perform one scan
    ///
    /// A failed write is reported here but does not tear the session down;
    /// the read side keeps running.
    pub async fn trigger_read(&self) -> LinkResult<()> {
        let terminator = self.config.terminator_bytes();
        let mut command = Vec::with_capacity(TRIGGER_COMMAND.len() + terminator.len());
        command.extend_from_slice(TRIGGER_COMMAND.as_bytes());
        command.extend_from_slice(terminator);

        self.send_raw(&command).await?;
        self.counters.triggers_sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Send arbitrary bytes to the device
    pub async fn send_raw(&self, payload: &[u8]) -> LinkResult<()> {
        let write_tx = self
            .write_tx
            .as_ref()
            .ok_or_else(|| LinkError::unexpected_disconnect("session is not connected"))?;

        let (reply_tx, reply_rx) = oneshot::channel();
        write_tx
            .send(WriteRequest {
                payload: payload.to_vec(),
                reply: reply_tx,
            })
            .await
            .map_err(|_| LinkError::unexpected_disconnect("reader I/O task is gone"))?;

        reply_rx
            .await
            .map_err(|_| LinkError::unexpected_disconnect("reader I/O task dropped the reply"))?
    }

    /// Subscribe to decoded lines as they arrive
    pub fn subscribe(&self) -> broadcast::Receiver<DecodedLine> {
        self.line_tx.subscribe()
    }

    /// Watch the most recently decoded line (`None` until the first one)
    pub fn last_line(&self) -> watch::Receiver<Option<DecodedLine>> {
        self.last_line_rx.clone()
    }

    /// Snapshot of every line decoded since the last [`clear_results`](Self::clear_results)
    pub async fn results(&self) -> Vec<DecodedLine> {
        self.history.read().await.clone()
    }

    /// Drop the accumulated result log
    pub async fn clear_results(&self) {
        self.history.write().await.clear();
    }

    /// Counters accumulated over the session's lifetime
    pub fn stats(&self) -> SessionStats {
        SessionStats {
            triggers_sent: self.counters.triggers_sent.load(Ordering::Relaxed),
            lines_decoded: self.counters.lines_decoded.load(Ordering::Relaxed),
            error_lines: self.counters.error_lines.load(Ordering::Relaxed),
        }
    }
}

/// I/O task: single owner of the transport. Serializes writes from the
/// session handle with the continuous read loop.
async fn run_io(
    mut transport: Box<dyn LinkTransport>,
    mut shutdown_rx: broadcast::Receiver<()>,
    mut write_rx: mpsc::Receiver<WriteRequest>,
    chunk_tx: mpsc::Sender<Bytes>,
    connected: Arc<AtomicBool>,
) {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                let _ = transport.close().await;
                break;
            }
            request = write_rx.recv() => {
                match request {
                    Some(request) => {
                        let result = transport.send(&request.payload).await;
                        if let Err(ref e) = result {
                            warn!("[SESSION] write failed: {}", e);
                        }
                        let _ = request.reply.send(result);
                    }
                    None => {
                        // Session handle dropped without an explicit disconnect
                        let _ = transport.close().await;
                        break;
                    }
                }
            }
            chunk = transport.read_chunk() => {
                match chunk {
                    Ok(data) if data.is_empty() => {
                        info!("[SESSION] peer closed the connection");
                        break;
                    }
                    Ok(data) => {
                        if chunk_tx.send(data).await.is_err() {
                            break;
                        }
                    }
                    Err(LinkError::ReadTimeout { .. }) => {
                        // Serial polls run out the clock while the scanner idles
                        continue;
                    }
                    Err(e) => {
                        warn!("[SESSION] read failed: {}", e);
                        break;
                    }
                }
            }
        }
    }
    connected.store(false, Ordering::SeqCst);
}

/// Framing task: sole owner of the line framer. Publishes each decoded line
/// to the broadcast, watch, and history sinks.
async fn run_framing(
    mut framer: LineFramer,
    mut chunk_rx: mpsc::Receiver<Bytes>,
    line_tx: broadcast::Sender<DecodedLine>,
    last_line_tx: Arc<watch::Sender<Option<DecodedLine>>>,
    history: Arc<RwLock<Vec<DecodedLine>>>,
    counters: Arc<SessionCounters>,
) {
    while let Some(chunk) = chunk_rx.recv().await {
        for line in framer.feed(&chunk) {
            counters.lines_decoded.fetch_add(1, Ordering::Relaxed);
            if line.is_error() {
                counters.error_lines.fetch_add(1, Ordering::Relaxed);
                warn!("[READER] device reported: {}", line.text);
            } else {
                debug!("[READER] decoded: {}", line.text);
            }

            history.write().await.push(line.clone());
            let _ = last_line_tx.send(Some(line.clone()));
            // No live subscribers is fine; watch and history still record it
            let _ = line_tx.send(line);
        }
    }
}
