//! # Connection Configuration
//!
//! Connection parameters for reader sessions, supplied once per connect by the
//! application and immutable for the session's lifetime. Exactly one of the
//! serial name or the host/port pair is meaningful depending on the transport
//! kind.

use serde::{Deserialize, Serialize};

use crate::error::{LinkError, LinkResult};
use crate::DEFAULT_TERMINATOR;

/// Which underlying link a session runs over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportKind {
    /// Local serial port (fixed 115200 8N1, DTR/RTS asserted)
    Serial,
    /// Raw TCP socket to a networked reader
    Tcp,
}

/// Connection parameters for one session
///
/// Built via [`ConnectionConfig::serial`] or [`ConnectionConfig::tcp`]; the
/// terminator defaults to carriage-return and must stay fixed for the life of
/// the session (changing it mid-session is undefined).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Transport selector
    pub kind: TransportKind,
    /// Serial port name, e.g. `COM3` or `/dev/ttyUSB0` (serial only)
    pub serial_port: Option<String>,
    /// Remote host or IP literal (TCP only)
    pub host: Option<String>,
    /// Remote TCP port (TCP only)
    pub port: Option<u16>,
    /// Line terminator shared by trigger writes and inbound framing
    pub terminator: String,
}

impl ConnectionConfig {
    /// Configuration for a serial-attached reader
    pub fn serial<S: Into<String>>(port_name: S) -> Self {
        Self {
            kind: TransportKind::Serial,
            serial_port: Some(port_name.into()),
            host: None,
            port: None,
            terminator: DEFAULT_TERMINATOR.to_string(),
        }
    }

    /// Configuration for a TCP-attached reader
    pub fn tcp<S: Into<String>>(host: S, port: u16) -> Self {
        Self {
            kind: TransportKind::Tcp,
            serial_port: None,
            host: Some(host.into()),
            port: Some(port),
            terminator: DEFAULT_TERMINATOR.to_string(),
        }
    }

    /// Override the line terminator
    pub fn with_terminator<S: Into<String>>(mut self, terminator: S) -> Self {
        self.terminator = terminator.into();
        self
    }

    /// Validate that the parameters required by `kind` are present
    ///
    /// Called by the transport factory before any OS resource is touched, so a
    /// bad configuration fails the open without partial state.
    pub fn validate(&self) -> LinkResult<()> {
        if self.terminator.is_empty() {
            return Err(LinkError::open_failed("terminator must not be empty"));
        }
        match self.kind {
            TransportKind::Serial => match &self.serial_port {
                Some(name) if !name.is_empty() => Ok(()),
                _ => Err(LinkError::open_failed("serial port name is required")),
            },
            TransportKind::Tcp => {
                let host_ok = self.host.as_ref().map(|h| !h.is_empty()).unwrap_or(false);
                if !host_ok {
                    return Err(LinkError::open_failed("TCP host is required"));
                }
                match self.port {
                    Some(p) if p != 0 => Ok(()),
                    _ => Err(LinkError::open_failed("TCP port is required")),
                }
            }
        }
    }

    /// Human-readable endpoint for log lines, e.g. `COM3` or `10.0.0.5:2001`
    pub fn endpoint(&self) -> String {
        match self.kind {
            TransportKind::Serial => self.serial_port.clone().unwrap_or_else(|| "<unset>".into()),
            TransportKind::Tcp => format!(
                "{}:{}",
                self.host.as_deref().unwrap_or("<unset>"),
                self.port.map(|p| p.to_string()).unwrap_or_else(|| "<unset>".into())
            ),
        }
    }

    /// Terminator as raw bytes for the framer and trigger writes
    pub fn terminator_bytes(&self) -> &[u8] {
        self.terminator.as_bytes()
    }
}
