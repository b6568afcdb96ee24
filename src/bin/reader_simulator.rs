/// Barcode Reader Simulator
///
/// Author: Evan Liu <evan.liu@voltageenergy.com>
/// Emulates a TCP-attached fixed-mount reader: waits for the LON trigger and
/// answers with a scan line, occasionally reporting a failed read the way a
/// real unit does when no label sits in view.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{info, warn};

/// EAN-13 codes the simulated label carousel cycles through
const BARCODES: &[&str] = &[
    "4006381333931",
    "4012345678901",
    "7611400983416",
    "9002236311036",
];

/// Simulated reader behavior knobs
struct SimulatorConfig {
    /// Chance a trigger answers ERROR instead of a scan (0.0 to 1.0)
    error_rate: f32,
    /// Decode latency before the line goes out
    scan_delay: Duration,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    println!("🚀 BCR Reader Simulator");
    println!("=======================");

    let bind_address = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:2001".to_string());
    let error_rate: f32 = std::env::args()
        .nth(2)
        .and_then(|s| s.parse().ok())
        .unwrap_or(0.1);

    let config = Arc::new(SimulatorConfig {
        error_rate,
        scan_delay: Duration::from_millis(80),
    });

    let listener = TcpListener::bind(&bind_address).await?;
    info!("listening on {}", bind_address);

    println!("📋 Simulator running:");
    println!("   - Trigger a scan with 'LON' + CR");
    println!("   - About {}% of scans answer ERROR 04", (error_rate * 100.0) as u32);
    println!("   - Press Ctrl+C to stop");
    println!("");

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (socket, peer) = accepted?;
                let config = Arc::clone(&config);
                tokio::spawn(async move {
                    handle_reader_client(socket, peer, config).await;
                });
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                break;
            }
        }
    }

    println!("\n✅ Simulator stopped");
    Ok(())
}

/// One connected host: consume CR-terminated commands, answer each trigger
async fn handle_reader_client(
    mut socket: TcpStream,
    peer: SocketAddr,
    config: Arc<SimulatorConfig>,
) {
    info!("host connected from {}", peer);

    let mut pending: Vec<u8> = Vec::new();
    let mut buf = [0u8; 256];

    loop {
        let n = match socket.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                warn!("read from {} failed: {}", peer, e);
                break;
            }
        };
        pending.extend_from_slice(&buf[..n]);

        while let Some(pos) = pending.iter().position(|&b| b == b'\r') {
            let raw: Vec<u8> = pending.drain(..=pos).collect();
            let command = String::from_utf8_lossy(&raw[..raw.len() - 1])
                .trim()
                .to_string();

            let reply = answer(&command, &config).await;
            if reply.is_empty() {
                continue;
            }
            if socket.write_all(reply.as_bytes()).await.is_err() {
                return;
            }
            let _ = socket.flush().await;
        }
    }

    info!("host {} disconnected", peer);
}

/// Device behavior for one received command
async fn answer(command: &str, config: &SimulatorConfig) -> String {
    match command {
        "LON" => {
            tokio::time::sleep(config.scan_delay).await;
            if rand::random::<f32>() < config.error_rate {
                warn!("simulating a failed read");
                "ERROR 04\r".to_string()
            } else {
                let index = rand::random::<usize>() % BARCODES.len();
                let code = BARCODES[index];
                info!("scanned {}", code);
                format!("{}\r", code)
            }
        }
        // Trigger release is acknowledged silently, like the real unit
        "LOFF" => String::new(),
        _ => {
            warn!("unknown command {:?}", command);
            "ERROR 02\r".to_string()
        }
    }
}
