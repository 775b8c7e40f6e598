//! Monitor channel client tests against a scripted local TCP listener.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use aviary_executor::{ChannelError, MonitorClient};

/// Bind a loopback listener that records one inbound line and replies
/// with `reply` before closing.
async fn scripted_listener(reply: &'static str) -> (String, tokio::task::JoinHandle<String>) {
    let listener = match TcpListener::bind("127.0.0.1:0").await {
        Ok(l) => l,
        Err(e) => panic!("bind: {e}"),
    };
    let addr = match listener.local_addr() {
        Ok(a) => a.to_string(),
        Err(e) => panic!("local_addr: {e}"),
    };

    let server = tokio::spawn(async move {
        let (mut stream, _) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => panic!("accept: {e}"),
        };
        let mut buf = vec![0u8; 256];
        let n = stream.read(&mut buf).await.unwrap_or(0);
        let received = String::from_utf8_lossy(&buf[..n]).into_owned();
        if let Err(e) = stream.write_all(reply.as_bytes()).await {
            panic!("reply write: {e}");
        }
        // Closing the stream ends the client's drain loop.
        drop(stream);
        received
    });

    (addr, server)
}

#[tokio::test]
async fn command_is_newline_terminated_on_the_wire() {
    let (addr, server) = scripted_listener("").await;
    let client = MonitorClient::new();

    let result = client
        .send(&addr, "system_powerdown", Duration::from_secs(2))
        .await;
    assert!(result.is_ok(), "send must succeed against a live listener: {result:?}");

    let received = match server.await {
        Ok(r) => r,
        Err(e) => panic!("server task: {e}"),
    };
    assert_eq!(
        received, "system_powerdown\n",
        "exactly one newline-terminated command must cross the wire"
    );
}

#[tokio::test]
async fn response_is_collected_until_peer_closes() {
    let (addr, server) = scripted_listener("QEMU 8.2 monitor\r\n(qemu) ").await;
    let client = MonitorClient::new();

    let response = match client.send(&addr, "sendkey ret", Duration::from_secs(2)).await {
        Ok(r) => r,
        Err(e) => panic!("send: {e}"),
    };
    assert!(
        response.contains("monitor"),
        "the inbound byte stream must be returned to the caller, got {response:?}"
    );
    let _ = server.await;
}

#[tokio::test]
async fn unreachable_monitor_surfaces_channel_error() {
    let client = MonitorClient::new();
    let result = client
        .send("127.0.0.1:1", "quit", Duration::from_millis(300))
        .await;
    assert!(
        matches!(
            result,
            Err(ChannelError::Connect { .. } | ChannelError::Timeout { .. })
        ),
        "connect failure must map to ChannelError, got {result:?}"
    );
}
