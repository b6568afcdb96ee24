/// UPS Simulator
///
/// Author: Evan Liu <evan.liu@voltageenergy.com>
/// Serves the UPS monitoring register map over Modbus TCP so the probe and
/// integration setups can run without the physical unit. Answers Read Input
/// Registers on unit id 0x01 and drifts the live readings over time.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use bcr_link::protocol::data_utils;
use bcr_link::ModbusTcpCodec;

/// Virtual UPS holding the monitoring register map
struct UpsSimulator {
    /// Unit id this device answers on
    unit_id: u8,
    /// Input register bank
    registers: RwLock<HashMap<u16, u16>>,
}

impl UpsSimulator {
    fn new(unit_id: u8) -> Self {
        Self {
            unit_id,
            registers: RwLock::new(Self::initial_registers()),
        }
    }

    /// Seed the register map with plausible mains-powered readings
    fn initial_registers() -> HashMap<u16, u16> {
        let mut map = HashMap::new();

        // Status bit block at 0x0000, 5 registers
        map.insert(0x0000, 0x0005);
        for address in 0x0001..=0x0004 {
            map.insert(address, 0);
        }

        // Remaining runtime, seconds
        let runtime = data_utils::u32_to_registers(7200);
        map.insert(0x0080, runtime[0]);
        map.insert(0x0081, runtime[1]);

        // Charge percent
        map.insert(0x0082, 85);

        // Battery voltage, centivolts (27.40 V)
        let battery = data_utils::u32_to_registers(2740);
        map.insert(0x0083, battery[0]);
        map.insert(0x0084, battery[1]);

        // Internal temperature, degrees C
        map.insert(0x0087, 23);

        // Output voltage, centivolts (230.00 V)
        let output = data_utils::u32_to_registers(23_000);
        map.insert(0x008E, output[0]);
        map.insert(0x008F, output[1]);

        // Input voltage, centivolts (231.20 V)
        let input = data_utils::u32_to_registers(23_120);
        map.insert(0x0097, input[0]);
        map.insert(0x0098, input[1]);

        map
    }

    /// Answer one complete MBAP frame, or stay silent for other unit ids
    async fn process_frame(&self, frame: &[u8]) -> Option<Vec<u8>> {
        if frame.len() < 8 {
            return None;
        }
        let transaction_id = u16::from_be_bytes([frame[0], frame[1]]);
        let unit_id = frame[6];
        let function = frame[7];

        if unit_id != self.unit_id {
            debug!("ignoring frame for unit {}", unit_id);
            return None;
        }
        if function != 0x04 {
            warn!("unsupported function 0x{:02X}", function);
            return Some(exception_response(transaction_id, unit_id, function, 0x01));
        }
        if frame.len() < 12 {
            return Some(exception_response(transaction_id, unit_id, function, 0x03));
        }

        let start = u16::from_be_bytes([frame[8], frame[9]]);
        let count = u16::from_be_bytes([frame[10], frame[11]]);
        if count == 0 || count > 125 {
            return Some(exception_response(transaction_id, unit_id, function, 0x03));
        }
        if start.checked_add(count - 1).is_none() {
            return Some(exception_response(transaction_id, unit_id, function, 0x02));
        }

        let registers = self.registers.read().await;
        let mut words = Vec::with_capacity(count as usize);
        for i in 0..count {
            words.push(registers.get(&(start + i)).copied().unwrap_or(0));
        }
        drop(registers);

        debug!("read {} registers from 0x{:04X}", count, start);

        let data = data_utils::registers_to_bytes(&words);
        let mut response = Vec::with_capacity(9 + data.len());
        response.extend_from_slice(&transaction_id.to_be_bytes());
        response.extend_from_slice(&[0x00, 0x00]);
        response.extend_from_slice(&((3 + data.len()) as u16).to_be_bytes());
        response.push(unit_id);
        response.push(function);
        response.push(data.len() as u8);
        response.extend_from_slice(&data);
        Some(response)
    }

    /// Wander the live readings a little, like a real unit under load
    async fn drift(&self) {
        let mut registers = self.registers.write().await;

        let charge = registers.entry(0x0082).or_insert(85);
        if rand::random::<f32>() < 0.5 {
            *charge = (*charge + 1).min(100);
        } else {
            *charge = charge.saturating_sub(1).max(20);
        }

        let jitter = (rand::random::<f32>() * 100.0) as u32;
        let input = data_utils::u32_to_registers(23_070 + jitter);
        registers.insert(0x0097, input[0]);
        registers.insert(0x0098, input[1]);
    }
}

/// MBAP exception frame: echoed transaction id, flagged function, one code byte
fn exception_response(transaction_id: u16, unit_id: u8, function: u8, code: u8) -> Vec<u8> {
    let mut response = Vec::with_capacity(9);
    response.extend_from_slice(&transaction_id.to_be_bytes());
    response.extend_from_slice(&[0x00, 0x00, 0x00, 0x03]);
    response.push(unit_id);
    response.push(function | 0x80);
    response.push(code);
    response
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    println!("🚀 BCR UPS Simulator");
    println!("====================");

    let bind_address = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:5020".to_string());

    let simulator = Arc::new(UpsSimulator::new(0x01));

    let listener = TcpListener::bind(&bind_address).await?;
    info!("listening on {}", bind_address);

    println!("📋 Serving unit id 0x01 with registers:");
    println!("   0x0000 x5  status bits");
    println!("   0x0080 x2  remaining runtime (s)");
    println!("   0x0082 x1  charge (%)");
    println!("   0x0083 x2  battery voltage (cV)");
    println!("   0x0087 x1  internal temperature (°C)");
    println!("   0x008E x2  output voltage (cV)");
    println!("   0x0097 x2  input voltage (cV)");
    println!("   Press Ctrl+C to stop");
    println!("");

    // Readings wander while the simulator runs
    let drifting = Arc::clone(&simulator);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(2));
        loop {
            ticker.tick().await;
            drifting.drift().await;
        }
    });

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (socket, peer) = accepted?;
                let simulator = Arc::clone(&simulator);
                tokio::spawn(async move {
                    handle_ups_client(socket, peer, simulator).await;
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

/// One connected client: reassemble MBAP frames and answer each in turn
async fn handle_ups_client(
    mut socket: TcpStream,
    peer: SocketAddr,
    simulator: Arc<UpsSimulator>,
) {
    info!("client connected from {}", peer);

    let mut buffer: Vec<u8> = Vec::new();
    let mut chunk = [0u8; 512];

    loop {
        let n = match socket.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                warn!("read from {} failed: {}", peer, e);
                break;
            }
        };
        buffer.extend_from_slice(&chunk[..n]);

        while let Some(expected) = ModbusTcpCodec::expected_frame_len(&buffer) {
            if buffer.len() < expected {
                break;
            }
            let frame: Vec<u8> = buffer.drain(..expected).collect();
            if let Some(response) = simulator.process_frame(&frame).await {
                if socket.write_all(&response).await.is_err() {
                    return;
                }
            }
        }
    }

    info!("client {} disconnected", peer);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_charge_state_query() {
        let simulator = UpsSimulator::new(0x01);
        let mut codec = ModbusTcpCodec::new();
        let request = codec.build_read_input_registers(0x01, 0x0082, 1);

        let response = simulator.process_frame(&request).await.unwrap();
        assert_eq!(&response[..2], &request[..2]);
        assert_eq!(response[6], 0x01);
        assert_eq!(response[7], 0x04);
        assert_eq!(response[8], 2);
        assert_eq!(u16::from_be_bytes([response[9], response[10]]), 85);
    }

    #[tokio::test]
    async fn test_unsupported_function_answers_exception() {
        let simulator = UpsSimulator::new(0x01);
        let frame = [
            0x00, 0x07, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x00, 0x00, 0x01,
        ];
        let response = simulator.process_frame(&frame).await.unwrap();
        assert_eq!(response.len(), 9);
        assert_eq!(response[7], 0x83);
        assert_eq!(response[8], 0x01);
    }

    #[tokio::test]
    async fn test_other_unit_stays_silent() {
        let simulator = UpsSimulator::new(0x01);
        let mut codec = ModbusTcpCodec::new();
        let request = codec.build_read_input_registers(0x02, 0x0082, 1);
        assert!(simulator.process_frame(&request).await.is_none());
    }

    #[tokio::test]
    async fn test_zero_count_answers_illegal_value() {
        let simulator = UpsSimulator::new(0x01);
        let mut codec = ModbusTcpCodec::new();
        let request = codec.build_read_input_registers(0x01, 0x0082, 0);
        let response = simulator.process_frame(&request).await.unwrap();
        assert_eq!(response[7], 0x84);
        assert_eq!(response[8], 0x03);
    }
}
