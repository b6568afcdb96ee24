/// BCR Link Reader Demo
///
/// Author: Evan Liu <evan.liu@voltageenergy.com>
/// Connects to a barcode reader, fires software triggers, and prints the
/// decoded lines. Works against a real device server or the bundled
/// reader_simulator.

use std::time::Duration;
use log::info;
use tokio::time::timeout;

use bcr_link::{DecodedLine, LinkError, LinkResult, ReaderSession};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .init();

    println!("🚀 BCR Link Reader Demo");
    println!("=======================");

    let endpoint = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:2001".to_string());
    let (host, port) = parse_endpoint(&endpoint)?;

    println!("📡 Connecting to reader at {}...", endpoint);
    let mut session = ReaderSession::tcp(&host, port);
    let mut lines = session.subscribe();

    session.connect().await?;
    info!("connected to {}", endpoint);
    println!("✅ Connected");

    for round in 1..=5 {
        println!("\n📤 Trigger {} of 5...", round);
        if let Err(e) = session.trigger_read().await {
            println!("  ⚠️  Trigger failed: {}", e);
            continue;
        }

        match timeout(Duration::from_secs(3), lines.recv()).await {
            Ok(Ok(line)) => print_line(&line),
            Ok(Err(_)) => {
                println!("  ⚠️  Line channel closed");
                break;
            }
            Err(_) => println!("  ⚠️  No scan within 3 seconds"),
        }
    }

    let results = session.results().await;
    println!("\n📋 Result log holds {} lines", results.len());

    let stats = session.stats();
    println!("📊 Session statistics:");
    println!("   Triggers sent: {}", stats.triggers_sent);
    println!("   Lines decoded: {}", stats.lines_decoded);
    println!("   Error lines: {}", stats.error_lines);

    session.disconnect().await?;
    println!("\n🔌 Disconnected");
    println!("👋 Thank you for using BCR Link by Evan Liu!");

    Ok(())
}

fn print_line(line: &DecodedLine) {
    if line.is_error() {
        println!("  ❌ Device error: {}", line.text);
    } else {
        println!("  ✅ Scanned: {}", line.text);
    }
}

fn parse_endpoint(endpoint: &str) -> LinkResult<(String, u16)> {
    let (host, port) = endpoint.rsplit_once(':').ok_or_else(|| {
        LinkError::open_failed(format!("Invalid endpoint '{}', expected host:port", endpoint))
    })?;
    let port: u16 = port
        .parse()
        .map_err(|_| LinkError::open_failed(format!("Invalid port in '{}'", endpoint)))?;
    Ok((host.to_string(), port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_endpoint() {
        assert_eq!(
            parse_endpoint("127.0.0.1:2001").unwrap(),
            ("127.0.0.1".to_string(), 2001)
        );
        assert!(parse_endpoint("no-port-here").is_err());
        assert!(parse_endpoint("host:99999").is_err());
    }
}
