//! Self-contained integration tests for the line console
//!
//! Each test starts its own console server on an ephemeral port and talks
//! to it over real TCP connections.

use easyconnect_agent::config::ConfigStore;
use easyconnect_agent::console::{
    Broadcaster, ConsoleContext, ConsoleControl, ConsoleServer, ConsoleSettings, Dispatcher,
    ShutdownKind,
};
use easyconnect_agent::link::StaticLink;
use easyconnect_agent::monitoring::{FixedMemory, SystemMonitor};
use std::net::SocketAddr;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;

struct TestConsole {
    addr: SocketAddr,
    control: mpsc::UnboundedSender<ConsoleControl>,
    intents: mpsc::UnboundedReceiver<ShutdownKind>,
    server_task: JoinHandle<()>,
    _dir: TempDir,
}

async fn start_console(capacity: usize, idle_timeout: Duration) -> TestConsole {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let config = Arc::new(ConfigStore::new(dir.path().join("config.json")));
    let monitor = Arc::new(SystemMonitor::new(Box::<FixedMemory>::default()));
    let link = Arc::new(StaticLink::default());

    let (control_tx, control_rx) = mpsc::unbounded_channel();
    let (intent_tx, intent_rx) = mpsc::unbounded_channel();

    let server = ConsoleServer::bind(
        "127.0.0.1:0",
        ConsoleContext {
            dispatcher: Dispatcher::new(config.clone(), monitor.clone(), link.clone()),
            settings: ConsoleSettings {
                capacity,
                idle_timeout,
                poll_interval: Duration::from_millis(10),
            },
            control: control_rx,
            intents: intent_tx,
            active: Arc::new(AtomicUsize::new(0)),
            config,
            monitor,
            link,
        },
    )
    .await
    .expect("Failed to bind console");

    let addr = server.local_addr().expect("No local addr");
    let server_task = tokio::spawn(server.run());

    TestConsole {
        addr,
        control: control_tx,
        intents: intent_rx,
        server_task,
        _dir: dir,
    }
}

async fn connect(addr: SocketAddr) -> TcpStream {
    TcpStream::connect(addr).await.expect("Failed to connect")
}

/// Read until the output ends with the prompt marker
async fn read_until_prompt(stream: &mut TcpStream) -> String {
    let mut out = String::new();
    let mut buf = [0u8; 1024];
    loop {
        let n = timeout(Duration::from_secs(2), stream.read(&mut buf))
            .await
            .expect("Read timeout")
            .expect("Read failed");
        if n == 0 {
            break;
        }
        out.push_str(&String::from_utf8_lossy(&buf[..n]));
        if out.ends_with("> ") {
            break;
        }
    }
    out
}

/// Read until the peer closes the connection
async fn read_until_close(stream: &mut TcpStream) -> String {
    let mut out = String::new();
    let mut buf = [0u8; 1024];
    loop {
        let n = match timeout(Duration::from_secs(2), stream.read(&mut buf)).await {
            Ok(Ok(n)) => n,
            _ => break,
        };
        if n == 0 {
            break;
        }
        out.push_str(&String::from_utf8_lossy(&buf[..n]));
    }
    out
}

async fn send_line(stream: &mut TcpStream, line: &str) {
    stream
        .write_all(format!("{line}\r\n").as_bytes())
        .await
        .expect("Write failed");
    stream.flush().await.expect("Flush failed");
}

#[tokio::test]
async fn test_welcome_banner_and_capacity_rejection() {
    let mut console = start_console(3, Duration::from_secs(600)).await;

    let mut c1 = connect(console.addr).await;
    let banner = read_until_prompt(&mut c1).await;
    assert!(banner.contains("EasyConnect Console"));
    assert!(banner.contains("Connected clients: 1/3"));

    let mut c2 = connect(console.addr).await;
    read_until_prompt(&mut c2).await;
    let mut c3 = connect(console.addr).await;
    read_until_prompt(&mut c3).await;

    // Fourth connection is rejected with a message and closed
    let mut c4 = connect(console.addr).await;
    let rejection = read_until_close(&mut c4).await;
    assert!(rejection.contains("Maximum console clients reached (3)"));

    console.server_task.abort();
    console.intents.close();
}

#[tokio::test]
async fn test_status_command_round_trip() {
    let console = start_console(3, Duration::from_secs(600)).await;

    let mut client = connect(console.addr).await;
    read_until_prompt(&mut client).await;

    send_line(&mut client, "status").await;
    let reply = read_until_prompt(&mut client).await;
    assert!(reply.contains("Device Status:"));
    assert!(reply.contains("easyconnect-device"));
    assert!(reply.contains("Console clients: 1/3"));
    assert!(reply.ends_with("> "));

    console.server_task.abort();
}

#[tokio::test]
async fn test_dispatch_is_case_sensitive_over_the_wire() {
    let console = start_console(3, Duration::from_secs(600)).await;

    let mut client = connect(console.addr).await;
    read_until_prompt(&mut client).await;

    send_line(&mut client, "Status").await;
    let reply = read_until_prompt(&mut client).await;
    assert!(reply.contains("Unknown command"));

    console.server_task.abort();
}

#[tokio::test]
async fn test_empty_lines_produce_no_output() {
    let console = start_console(3, Duration::from_secs(600)).await;

    let mut client = connect(console.addr).await;
    read_until_prompt(&mut client).await;

    send_line(&mut client, "").await;
    send_line(&mut client, "   ").await;

    let mut buf = [0u8; 64];
    let result = timeout(Duration::from_millis(300), client.read(&mut buf)).await;
    assert!(result.is_err(), "empty lines must not be dispatched");

    console.server_task.abort();
}

#[tokio::test]
async fn test_disconnect_frees_exactly_one_slot() {
    let console = start_console(3, Duration::from_secs(600)).await;

    let mut c1 = connect(console.addr).await;
    read_until_prompt(&mut c1).await;
    let mut c2 = connect(console.addr).await;
    read_until_prompt(&mut c2).await;
    let mut c3 = connect(console.addr).await;
    read_until_prompt(&mut c3).await;

    send_line(&mut c2, "disconnect").await;
    let farewell = read_until_close(&mut c2).await;
    assert!(farewell.contains("Disconnecting"));

    // Freed slot is reusable; the others are untouched
    tokio::time::sleep(Duration::from_millis(50)).await;
    let mut c4 = connect(console.addr).await;
    let banner = read_until_prompt(&mut c4).await;
    assert!(banner.contains("Connected clients: 3/3"));

    send_line(&mut c1, "clients").await;
    let listing = read_until_prompt(&mut c1).await;
    assert!(listing.contains("1. "));
    assert!(listing.contains("2. "));
    assert!(listing.contains("3. "));

    console.server_task.abort();
}

#[tokio::test]
async fn test_restart_signals_intent_without_killing_server() {
    let mut console = start_console(3, Duration::from_secs(600)).await;

    let mut client = connect(console.addr).await;
    read_until_prompt(&mut client).await;

    send_line(&mut client, "restart").await;
    let intent = timeout(Duration::from_secs(2), console.intents.recv())
        .await
        .expect("Intent timeout")
        .expect("Intent channel closed");
    assert_eq!(intent, ShutdownKind::Restart);

    console.server_task.abort();
}

#[tokio::test]
async fn test_broadcast_reaches_all_connected_sessions() {
    let console = start_console(3, Duration::from_secs(600)).await;

    let mut c1 = connect(console.addr).await;
    read_until_prompt(&mut c1).await;
    let mut c2 = connect(console.addr).await;
    read_until_prompt(&mut c2).await;

    let broadcaster = Broadcaster::new(console.control.clone());
    broadcaster.broadcast("event: sensor=42\r\n");

    let mut buf = [0u8; 128];
    for client in [&mut c1, &mut c2] {
        let n = timeout(Duration::from_secs(2), client.read(&mut buf))
            .await
            .expect("Broadcast timeout")
            .expect("Read failed");
        assert_eq!(
            String::from_utf8_lossy(&buf[..n]),
            "event: sensor=42\r\n"
        );
    }

    console.server_task.abort();
}

#[tokio::test]
async fn test_idle_session_reclaimed_once() {
    let console = start_console(1, Duration::from_millis(200)).await;

    let mut client = connect(console.addr).await;
    read_until_prompt(&mut client).await;

    // No activity; the server reclaims the slot after the timeout
    let output = read_until_close(&mut client).await;
    assert!(output.contains("Connection timeout"));

    // The slot is free again
    let mut next = connect(console.addr).await;
    let banner = read_until_prompt(&mut next).await;
    assert!(banner.contains("Connected clients: 1/1"));

    console.server_task.abort();
}

#[tokio::test]
async fn test_disconnect_all_control_message() {
    let console = start_console(2, Duration::from_secs(600)).await;

    let mut c1 = connect(console.addr).await;
    read_until_prompt(&mut c1).await;

    console
        .control
        .send(ConsoleControl::DisconnectAll)
        .expect("Control channel closed");

    let output = read_until_close(&mut c1).await;
    assert!(output.contains("shutting down"));

    console.server_task.abort();
}
