//! Integration Tests for the BCR Link Library
//!
//! Scripted TCP devices stand in for the physical reader and UPS, so these
//! tests exercise the public API end to end: the session pipeline, line
//! framing across chunk boundaries, and the Modbus TCP query path.

use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{sleep, timeout};
use bcr_link::*;

/// Test a full trigger conversation with a line split across TCP segments
#[tokio::test]
async fn test_session_conversation_with_mixed_lines() {
    let (listener, port) = bind_device().await;

    // Scripted reader: first trigger answers a scan delivered in two
    // segments, second trigger answers a device error.
    let device = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();

        let mut trigger = [0u8; 4];
        socket.read_exact(&mut trigger).await.unwrap();
        assert_eq!(&trigger, b"LON\r");
        socket.write_all(b"4006381").await.unwrap();
        socket.flush().await.unwrap();
        sleep(Duration::from_millis(30)).await;
        socket.write_all(b"333931\r").await.unwrap();
        socket.flush().await.unwrap();

        socket.read_exact(&mut trigger).await.unwrap();
        assert_eq!(&trigger, b"LON\r");
        socket.write_all(b"ERROR 04\r").await.unwrap();
        socket.flush().await.unwrap();
    });

    let mut session = ReaderSession::tcp("127.0.0.1", port);
    let mut lines = session.subscribe();
    session.connect().await.unwrap();

    session.trigger_read().await.unwrap();
    let scan = recv_line(&mut lines).await;
    assert_eq!(scan.text, "4006381333931");
    assert_eq!(scan.kind, LineKind::Data);

    session.trigger_read().await.unwrap();
    let error = recv_line(&mut lines).await;
    assert_eq!(error.text, "ERROR 04");
    assert!(error.is_error());

    device.await.unwrap();

    let results = session.results().await;
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].text, "4006381333931");
    assert_eq!(results[1].text, "ERROR 04");
    assert_eq!(
        session.last_line().borrow().as_ref().unwrap().text,
        "ERROR 04"
    );

    let stats = session.stats();
    assert_eq!(stats.triggers_sent, 2);
    assert_eq!(stats.lines_decoded, 2);
    assert_eq!(stats.error_lines, 1);

    session.clear_results().await;
    assert!(session.results().await.is_empty());

    session.disconnect().await.unwrap();
}

/// Test that continuously scanning readers need no trigger at all
#[tokio::test]
async fn test_session_receives_unsolicited_lines() {
    let (listener, port) = bind_device().await;

    let device = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        for code in ["9002236311036", "7611400983416", "4012345678901"] {
            socket.write_all(code.as_bytes()).await.unwrap();
            socket.write_all(b"\r").await.unwrap();
            socket.flush().await.unwrap();
            sleep(Duration::from_millis(10)).await;
        }
    });

    let mut session = ReaderSession::tcp("127.0.0.1", port);
    let mut lines = session.subscribe();
    session.connect().await.unwrap();

    assert_eq!(recv_line(&mut lines).await.text, "9002236311036");
    assert_eq!(recv_line(&mut lines).await.text, "7611400983416");
    assert_eq!(recv_line(&mut lines).await.text, "4012345678901");

    device.await.unwrap();

    let stats = session.stats();
    assert_eq!(stats.triggers_sent, 0);
    assert_eq!(stats.lines_decoded, 3);
    assert_eq!(stats.error_lines, 0);

    session.disconnect().await.unwrap();
}

/// Test a reader configured for CRLF line endings
#[tokio::test]
async fn test_session_with_crlf_terminator() {
    let (listener, port) = bind_device().await;

    let device = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut trigger = [0u8; 5];
        socket.read_exact(&mut trigger).await.unwrap();
        assert_eq!(&trigger, b"LON\r\n");
        socket.write_all(b"CODE123\r\nERROR 11\r\n").await.unwrap();
        socket.flush().await.unwrap();
    });

    let config = ConnectionConfig::tcp("127.0.0.1", port).with_terminator("\r\n");
    let mut session = ReaderSession::new(config);
    let mut lines = session.subscribe();
    session.connect().await.unwrap();
    session.trigger_read().await.unwrap();

    assert_eq!(recv_line(&mut lines).await.text, "CODE123");
    let error = recv_line(&mut lines).await;
    assert_eq!(error.text, "ERROR 11");
    assert!(error.is_error());

    device.await.unwrap();
    session.disconnect().await.unwrap();
}

/// Test that subscribers stay live across a disconnect and reconnect
#[tokio::test]
async fn test_session_reconnects_with_live_subscriber() {
    let (listener, port) = bind_device().await;

    let device = tokio::spawn(async move {
        for text in ["FIRST-1\r", "SECOND-2\r"] {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(text.as_bytes()).await.unwrap();
            socket.flush().await.unwrap();
            // Hold the connection until the host hangs up
            let mut sink = [0u8; 16];
            while socket.read(&mut sink).await.unwrap_or(0) > 0 {}
        }
    });

    let mut session = ReaderSession::tcp("127.0.0.1", port);
    let mut lines = session.subscribe();

    session.connect().await.unwrap();
    assert_eq!(recv_line(&mut lines).await.text, "FIRST-1");
    session.disconnect().await.unwrap();
    assert!(!session.is_connected());

    session.connect().await.unwrap();
    assert_eq!(recv_line(&mut lines).await.text, "SECOND-2");

    device.await.unwrap();

    let results = session.results().await;
    assert_eq!(results.len(), 2);
    assert_eq!(session.stats().lines_decoded, 2);

    session.disconnect().await.unwrap();
}

/// A device-side hangup parks the session in the disconnected state without
/// surfacing an error anywhere
#[tokio::test]
async fn test_session_observes_peer_hangup() {
    let (listener, port) = bind_device().await;

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        socket.write_all(b"LAST-1\r").await.unwrap();
        socket.flush().await.unwrap();
        // Dropping the socket hangs up from the device side
    });

    let mut session = ReaderSession::tcp("127.0.0.1", port);
    let mut lines = session.subscribe();
    session.connect().await.unwrap();

    assert_eq!(recv_line(&mut lines).await.text, "LAST-1");

    // The io task notices the zero-byte read shortly after the last line
    for _ in 0..100 {
        if !session.is_connected() {
            break;
        }
        sleep(Duration::from_millis(20)).await;
    }
    assert!(!session.is_connected());

    // The handle stays usable after the hangup
    session.disconnect().await.unwrap();
    assert_eq!(session.results().await.len(), 1);
}

/// Test that sequential UPS queries carry advancing transaction ids
#[tokio::test]
async fn test_ups_sequential_queries_advance_transaction_ids() {
    let (listener, port) = bind_device().await;
    let (capture_tx, mut capture_rx) = mpsc::unbounded_channel::<Vec<u8>>();

    let device = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        for _ in 0..3 {
            let mut request = [0u8; 12];
            socket.read_exact(&mut request).await.unwrap();
            capture_tx.send(request.to_vec()).unwrap();

            let response = input_registers_response(&request, 85);
            socket.write_all(&response).await.unwrap();
            socket.flush().await.unwrap();
        }
    });

    let mut client = UpsClient::connect("127.0.0.1", port).await.unwrap();

    let queries = [
        UpsQueryType::ChargeState,
        UpsQueryType::RemainingTime,
        UpsQueryType::InputVoltage,
    ];
    for query in queries {
        let pdu = client.read_query(query).await.unwrap();
        assert!(!pdu.is_exception());
        assert_eq!(
            pdu.payload[0] as u16,
            query.register_count() * 2,
            "byte count for {}",
            query
        );
    }

    device.await.unwrap();

    for (i, query) in queries.iter().enumerate() {
        let request = capture_rx.recv().await.unwrap();
        let transaction_id = u16::from_be_bytes([request[0], request[1]]);
        assert_eq!(transaction_id, (i + 1) as u16);
        assert_eq!(
            u16::from_be_bytes([request[8], request[9]]),
            query.start_address()
        );
        assert_eq!(
            u16::from_be_bytes([request[10], request[11]]),
            query.register_count()
        );
    }

    client.disconnect().await.unwrap();
}

/// Test that a Modbus exception surfaces as a PDU, not a transport error
#[tokio::test]
async fn test_ups_exception_response_surfaces_as_pdu() {
    let (listener, port) = bind_device().await;

    let device = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = [0u8; 12];
        socket.read_exact(&mut request).await.unwrap();

        // Illegal data address exception for Read Input Registers
        let response = [
            request[0], request[1], 0x00, 0x00, 0x00, 0x03, 0x01, 0x84, 0x02,
        ];
        socket.write_all(&response).await.unwrap();
        socket.flush().await.unwrap();
    });

    let mut client = UpsClient::connect("127.0.0.1", port).await.unwrap();
    let pdu = client.read_query(UpsQueryType::BitRegister).await.unwrap();

    assert!(pdu.is_exception());
    assert_eq!(pdu.function_code, 0x84);
    assert_eq!(pdu.payload, vec![0x02]);
    assert_eq!(pdu.function().unwrap(), ModbusFunction::ReadInputRegisters);

    device.await.unwrap();
    client.disconnect().await.unwrap();
}

/// Test several independent sessions running concurrently
#[tokio::test]
async fn test_concurrent_reader_sessions() {
    let session_count = 3;
    let mut ports = Vec::new();

    for i in 0..session_count {
        let (listener, port) = bind_device().await;
        ports.push(port);
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut trigger = [0u8; 4];
            socket.read_exact(&mut trigger).await.unwrap();
            socket
                .write_all(format!("SCAN-{:03}\r", i).as_bytes())
                .await
                .unwrap();
            socket.flush().await.unwrap();
        });
    }

    let tasks: Vec<_> = ports
        .into_iter()
        .map(|port| async move {
            let mut session = ReaderSession::tcp("127.0.0.1", port);
            let mut lines = session.subscribe();
            session.connect().await.unwrap();
            session.trigger_read().await.unwrap();
            let line = recv_line(&mut lines).await;
            session.disconnect().await.unwrap();
            line.text
        })
        .collect();

    let mut texts = futures::future::join_all(tasks).await;
    texts.sort();
    assert_eq!(texts, vec!["SCAN-000", "SCAN-001", "SCAN-002"]);
}

// Helper functions for tests

/// Bind a scripted device on an ephemeral port
async fn bind_device() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

/// Receive one decoded line, failing loudly instead of hanging
async fn recv_line(lines: &mut broadcast::Receiver<DecodedLine>) -> DecodedLine {
    timeout(Duration::from_secs(2), lines.recv())
        .await
        .expect("timed out waiting for a line")
        .expect("line channel closed")
}

/// Build a Read Input Registers response echoing the request header, with
/// every register set to `fill`
fn input_registers_response(request: &[u8], fill: u16) -> Vec<u8> {
    let count = u16::from_be_bytes([request[10], request[11]]) as usize;
    let data = protocol::data_utils::registers_to_bytes(&vec![fill; count]);

    let mut response = Vec::with_capacity(9 + data.len());
    response.extend_from_slice(&request[..2]);
    response.extend_from_slice(&[0x00, 0x00]);
    response.extend_from_slice(&((3 + data.len()) as u16).to_be_bytes());
    response.push(request[6]);
    response.push(request[7]);
    response.push(data.len() as u8);
    response.extend_from_slice(&data);
    response
}
