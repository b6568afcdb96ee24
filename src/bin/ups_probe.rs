/// UPS Probe
///
/// Author: Evan Liu <evan.liu@voltageenergy.com>
/// Connects to a Modbus TCP UPS and walks its monitoring registers, printing
/// the raw words and the combined value for two-register spans. Pass a query
/// name as the second argument to probe a single span instead.

use std::str::FromStr;

use bcr_link::protocol::data_utils;
use bcr_link::{CallbackLogger, LinkError, LinkResult, ModbusPdu, UpsClient, UpsQueryType};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .init();

    println!("🚀 BCR UPS Probe");
    println!("================");

    let endpoint = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:5020".to_string());
    let (host, port) = parse_endpoint(&endpoint)?;

    let queries: Vec<UpsQueryType> = match std::env::args().nth(2) {
        Some(name) => match UpsQueryType::from_str(&name) {
            Ok(query) => vec![query],
            Err(e) => {
                println!("❌ {}", e);
                let names: Vec<&str> = UpsQueryType::all().iter().map(|q| q.name()).collect();
                println!("   Valid queries: {}", names.join(", "));
                return Err(e.into());
            }
        },
        None => UpsQueryType::all().to_vec(),
    };

    println!("🔌 Connecting to UPS at {}...", endpoint);
    let mut client = UpsClient::connect(&host, port)
        .await?
        .with_logger(CallbackLogger::console());
    println!("✅ Connected\n");

    let mut failures = 0u32;
    for query in &queries {
        match client.read_query(*query).await {
            Ok(pdu) => print_reading(*query, &pdu),
            Err(e) => {
                failures += 1;
                println!("❌ {} failed: {}", query, e);
            }
        }
        println!("");
    }

    let stats = client.stats();
    println!("📊 Transport statistics:");
    println!("   Writes:         {}", stats.writes);
    println!("   Reads:          {}", stats.reads);
    println!("   Bytes sent:     {}", stats.bytes_sent);
    println!("   Bytes received: {}", stats.bytes_received);
    println!("   Errors:         {}", stats.errors);

    client.disconnect().await?;
    log::info!(
        "probe finished: {} queries, {} failures",
        queries.len(),
        failures
    );

    println!("\n👋 Thank you for using BCR Link by Evan Liu!");
    Ok(())
}

/// Dump one response PDU in human-readable form
fn print_reading(query: UpsQueryType, pdu: &ModbusPdu) {
    if pdu.is_exception() {
        let code = pdu.payload.first().copied().unwrap_or(0);
        println!(
            "⚠️ {} answered exception 0x{:02X} (raw {})",
            query,
            code,
            hex::encode(pdu.to_bytes())
        );
        return;
    }

    // Read Input Registers responses lead with a byte count
    let data = match pdu.payload.split_first() {
        Some((_byte_count, data)) => data,
        None => {
            println!("⚠️ {} answered an empty payload", query);
            return;
        }
    };

    match data_utils::bytes_to_registers(data) {
        Ok(registers) => {
            println!("📊 {}", query);
            println!("   Registers: {}", format_registers(&registers));
            if registers.len() == 2 {
                if let Ok(combined) = data_utils::registers_to_u32(&registers) {
                    println!("   Combined:  {}", combined);
                }
            }
            println!("   Raw:       {}", hex::encode(pdu.to_bytes()));
        }
        Err(e) => println!("⚠️ {} payload not register-shaped: {}", query, e),
    }
}

/// Render registers as hex words
fn format_registers(registers: &[u16]) -> String {
    let words: Vec<String> = registers.iter().map(|r| format!("0x{:04X}", r)).collect();
    format!("[{}]", words.join(", "))
}

/// Split `host:port`
fn parse_endpoint(endpoint: &str) -> LinkResult<(String, u16)> {
    let (host, port) = endpoint
        .rsplit_once(':')
        .ok_or_else(|| LinkError::open_failed(format!("Missing port in {:?}", endpoint)))?;
    let port: u16 = port
        .parse()
        .map_err(|_| LinkError::open_failed(format!("Invalid port in {:?}", endpoint)))?;
    Ok((host.to_string(), port))
}
