//! Monitor channel client.
//!
//! The hypervisor exposes a line-oriented ASCII control channel on a TCP
//! port (`sendkey <name>`, `system_powerdown`, `quit`). Each command uses
//! a transient connection: connect, write one newline-terminated line,
//! optionally drain whatever the peer sends until it closes or the
//! deadline fires, then drop the socket.
//!
//! No response format is parsed anywhere; presence or absence of bytes
//! and channel closure are the only signals callers rely on.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::ChannelError;

/// Stateless client for the hypervisor monitor channel.
#[derive(Debug, Clone, Default)]
pub struct MonitorClient;

impl MonitorClient {
    /// Create a client. The client holds no connections.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Send one command and collect any response bytes.
    ///
    /// The command is newline-terminated on the wire. The response is
    /// read until the peer closes or `timeout` elapses; a read deadline
    /// is not an error — whatever was collected by then is returned.
    ///
    /// # Errors
    /// Returns [`ChannelError`] if connecting or writing fails, or if the
    /// connect/write phase exceeds `timeout`.
    pub async fn send(
        &self,
        addr: &str,
        command: &str,
        timeout: Duration,
    ) -> Result<String, ChannelError> {
        let connect_write = async {
            let mut stream = TcpStream::connect(addr).await.map_err(|source| {
                ChannelError::Connect { addr: addr.to_owned(), source }
            })?;

            let mut line = command.to_owned();
            line.push('\n');
            stream
                .write_all(line.as_bytes())
                .await
                .map_err(|source| ChannelError::Write { addr: addr.to_owned(), source })?;
            stream
                .flush()
                .await
                .map_err(|source| ChannelError::Write { addr: addr.to_owned(), source })?;
            Ok::<TcpStream, ChannelError>(stream)
        };

        let mut stream = tokio::time::timeout(timeout, connect_write)
            .await
            .map_err(|_| ChannelError::Timeout {
                addr: addr.to_owned(),
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            })??;

        tracing::trace!(addr, command, "monitor command sent");

        // Drain the inbound stream until EOF or deadline. Read errors and
        // deadlines both end collection; the bytes seen so far stand.
        let mut collected = Vec::new();
        let drain = async {
            let mut buf = [0u8; 1024];
            loop {
                match stream.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => collected.extend_from_slice(&buf[..n]),
                }
            }
        };
        let _ = tokio::time::timeout(timeout, drain).await;

        Ok(String::from_utf8_lossy(&collected).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_failure_is_channel_error() {
        let client = MonitorClient::new();
        // Port 1 on loopback is essentially never listening.
        let result = client
            .send("127.0.0.1:1", "system_powerdown", Duration::from_millis(500))
            .await;
        assert!(
            matches!(
                result,
                Err(ChannelError::Connect { .. } | ChannelError::Timeout { .. })
            ),
            "an unreachable monitor must surface as a channel error"
        );
    }
}
