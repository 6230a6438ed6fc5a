//! End-to-end TCP session tests: the manager driving the TCP backend
//! against a loopback adapter that speaks the `>`-terminated protocol.

use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use obd_connect::{ConnectError, ConnectManager, Endpoint, StreamConfig, TransportKind};

fn fast_config() -> StreamConfig {
    StreamConfig {
        connect_timeout_ms: 1000,
        worker_ready_timeout_ms: 1000,
        poll_interval_ms: 2,
        io_timeout_ms: 10,
        read_buffer_len: 4096,
        flow_interval_ms: 1,
    }
}

/// Loopback adapter: accepts one connection and answers each received
/// command with the next canned response, split across two sends to
/// exercise the framing rule.
fn spawn_adapter(responses: Vec<Vec<u8>>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback");
    let address = listener.local_addr().expect("local addr").to_string();
    std::thread::spawn(move || {
        let Ok((mut socket, _)) = listener.accept() else {
            return;
        };
        let mut buf = [0u8; 512];
        for response in responses {
            let Ok(n) = socket.read(&mut buf) else { return };
            if n == 0 {
                return;
            }
            let split = response.len() / 2;
            let _ = socket.write_all(&response[..split]);
            std::thread::sleep(Duration::from_millis(15));
            let _ = socket.write_all(&response[split..]);
        }
        // Linger so the client side decides when to hang up.
        std::thread::sleep(Duration::from_millis(300));
    });
    address
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_command_response_session() {
    let address = spawn_adapter(vec![b"ELM327 v1.5\r>".to_vec(), b"41 00 BE 3F B8 11\r>".to_vec()]);

    let mut manager = ConnectManager::new();
    manager.init_tcp(fast_config());
    manager
        .connect(Endpoint::Name(address))
        .await
        .expect("connect");
    assert!(manager.is_open());
    assert_eq!(manager.kind(), Some(TransportKind::Tcp));

    manager
        .write(b"ATZ\r", Duration::from_millis(500))
        .await
        .expect("write ATZ");
    let reset = manager
        .read_string(Duration::from_millis(800))
        .await
        .expect("read ATZ response");
    assert_eq!(reset.as_deref(), Some("ELM327 v1.5\r>"));

    manager
        .write(b"0100\r", Duration::from_millis(500))
        .await
        .expect("write 0100");
    let pids = manager
        .read(Duration::from_millis(800))
        .await
        .expect("read 0100 response");
    assert_eq!(pids, b"41 00 BE 3F B8 11\r>".to_vec());

    // The hand-off cleared the buffer: an immediate re-read times out.
    assert_eq!(
        manager.read(Duration::from_millis(60)).await,
        Err(ConnectError::ReceiveTimeout)
    );

    manager.close();
    manager.close();
    assert!(!manager.is_open());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_empty_write_is_trivial_success() {
    let address = spawn_adapter(vec![b"OK>".to_vec()]);
    let mut manager = ConnectManager::new();
    manager.init_tcp(fast_config());
    manager
        .connect(Endpoint::Name(address))
        .await
        .expect("connect");
    manager
        .write(b"", Duration::from_millis(100))
        .await
        .expect("empty write");
    manager.close();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_malformed_endpoint_is_invalid_name() {
    let mut manager = ConnectManager::new();
    manager.init_tcp(fast_config());
    assert_eq!(
        manager.connect(Endpoint::Name("localhost".into())).await,
        Err(ConnectError::InvalidName)
    );
    assert_eq!(
        manager.connect(Endpoint::Name(":8080".into())).await,
        Err(ConnectError::InvalidName)
    );
    assert!(!manager.is_open());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_refused_connection_reports_failure() {
    let mut manager = ConnectManager::new();
    manager.init_tcp(fast_config());
    let result = manager
        .connect(Endpoint::Name("127.0.0.1:1".into()))
        .await;
    assert!(matches!(result, Err(ConnectError::ConnectionFailed(_))));
    assert!(!manager.is_open());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_peer_hangup_fires_disconnect_callback() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback");
    let address = listener.local_addr().expect("local addr").to_string();
    std::thread::spawn(move || {
        if let Ok((socket, _)) = listener.accept() {
            std::thread::sleep(Duration::from_millis(50));
            drop(socket);
        }
    });

    let mut manager = ConnectManager::new();
    manager.init_tcp(fast_config());
    manager
        .connect(Endpoint::Name(address))
        .await
        .expect("connect");

    let dropped = Arc::new(AtomicBool::new(false));
    let flag = dropped.clone();
    manager.set_on_device_disconnect(Box::new(move || flag.store(true, Ordering::SeqCst)));

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(dropped.load(Ordering::SeqCst), "disconnect callback expected");

    // An in-flight style read after the drop discovers it as a typed
    // error, not a panic.
    let result = manager.read(Duration::from_millis(50)).await;
    assert!(matches!(
        result,
        Err(ConnectError::NotConnected) | Err(ConnectError::ReceiveTimeout)
    ));
    manager.close();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_data_flow_streams_incoming_bytes() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback");
    let address = listener.local_addr().expect("local addr").to_string();
    std::thread::spawn(move || {
        if let Ok((mut socket, _)) = listener.accept() {
            for chunk in [&b"41 0C"[..], &b" 1A F8"[..], &b">"[..]] {
                let _ = socket.write_all(chunk);
                std::thread::sleep(Duration::from_millis(20));
            }
            std::thread::sleep(Duration::from_millis(200));
        }
    });

    let mut manager = ConnectManager::new();
    manager.init_tcp(fast_config());
    manager
        .connect(Endpoint::Name(address))
        .await
        .expect("connect");

    let mut flow = manager.receive_data_flow();
    let mut collected = Vec::new();
    while collected.len() < b"41 0C 1A F8>".len() {
        match tokio::time::timeout(Duration::from_millis(500), flow.recv()).await {
            Ok(Some(batch)) => collected.extend_from_slice(&batch),
            _ => break,
        }
    }
    assert_eq!(collected, b"41 0C 1A F8>".to_vec());
    manager.close();
}
