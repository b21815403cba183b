//! `DeviceLink`: a reconnectable TCP transport shared by the motor
//! controller, shaft encoder, and watchdog device links.
//!
//! Corresponds to `original_source/ConnectionInterface.py`'s socket-backed
//! implementation — connect/disconnect/send/receive, each guarded so only
//! one in-flight exchange can run at a time per link.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use turntable_common::error::TurntableError;

/// A single TCP connection to one piece of serial-over-TCP hardware.
///
/// `send_and_receive` takes the write/read lock for its whole duration, so
/// concurrent callers serialize rather than interleave requests on the
/// wire — mirroring the Python original's per-device `Lock`.
pub struct DeviceLink {
    name: &'static str,
    host: String,
    port: u16,
    timeout: Duration,
    stream: Mutex<Option<TcpStream>>,
}

impl DeviceLink {
    /// Create a link that is not yet connected.
    #[must_use]
    pub fn new(name: &'static str, host: impl Into<String>, port: u16, timeout: Duration) -> Self {
        Self {
            name,
            host: host.into(),
            port,
            timeout,
            stream: Mutex::new(None),
        }
    }

    /// `true` if a TCP connection is currently established.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.stream.lock().is_some()
    }

    /// Connect to `host:port`, replacing any existing connection.
    pub async fn connect(&self) -> Result<(), TurntableError> {
        info!(device = self.name, host = %self.host, port = self.port, "connecting");
        let stream = timeout(self.timeout, TcpStream::connect((self.host.as_str(), self.port)))
            .await
            .map_err(|_| TurntableError::Timeout(self.name))??;
        *self.stream.lock() = Some(stream);
        info!(device = self.name, "connected");
        Ok(())
    }

    /// Close the connection, if any. Idempotent.
    pub fn disconnect(&self) {
        if self.stream.lock().take().is_some() {
            info!(device = self.name, "disconnected");
        }
    }

    /// Write `command`, then read up to `reply_len` bytes, both bounded by
    /// this link's configured timeout. Any I/O failure or timeout
    /// disconnects the link before returning the error, matching the
    /// source's "abort attempt and turn off the device" behavior.
    pub async fn send_and_receive(
        &self,
        command: &[u8],
        reply_len: usize,
    ) -> Result<Vec<u8>, TurntableError> {
        let result = self.exchange(command, reply_len).await;
        if result.is_err() {
            self.disconnect();
        }
        result
    }

    async fn exchange(&self, command: &[u8], reply_len: usize) -> Result<Vec<u8>, TurntableError> {
        // The stream is taken out of the mutex for the duration of the I/O
        // so the `parking_lot::Mutex` guard is never held across an
        // `.await` point, then always put back.
        let mut stream = self
            .stream
            .lock()
            .take()
            .ok_or(TurntableError::Disconnected(self.name))?;

        let outcome = async {
            stream.write_all(command).await?;
            let mut buf = vec![0u8; reply_len];
            stream.read_exact(&mut buf).await?;
            Ok::<_, std::io::Error>(buf)
        };

        match timeout(self.timeout, outcome).await {
            Ok(Ok(bytes)) => {
                debug!(device = self.name, bytes = bytes.len(), "exchange complete");
                *self.stream.lock() = Some(stream);
                Ok(bytes)
            }
            Ok(Err(io_err)) => {
                warn!(device = self.name, error = %io_err, "exchange failed");
                Err(TurntableError::Io(io_err))
            }
            Err(_) => {
                warn!(device = self.name, "exchange timed out");
                Err(TurntableError::Timeout(self.name))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn connect_and_exchange_round_trips() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 3];
            socket.read_exact(&mut buf).await.unwrap();
            socket.write_all(b"ok!").await.unwrap();
        });

        let link = DeviceLink::new("test", addr.ip().to_string(), addr.port(), Duration::from_secs(1));
        link.connect().await.unwrap();
        assert!(link.is_connected());

        let reply = link.send_and_receive(b"cmd", 3).await.unwrap();
        assert_eq!(reply, b"ok!");
    }

    #[tokio::test]
    async fn exchange_without_connection_errors() {
        let link = DeviceLink::new("test", "127.0.0.1", 1, Duration::from_millis(100));
        let result = link.send_and_receive(b"x", 1).await;
        assert!(matches!(result, Err(TurntableError::Disconnected("test"))));
    }

    #[tokio::test]
    async fn failed_exchange_disconnects_the_link() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            drop(socket);
        });

        let link = DeviceLink::new("test", addr.ip().to_string(), addr.port(), Duration::from_secs(1));
        link.connect().await.unwrap();

        let result = link.send_and_receive(b"cmd", 10).await;
        assert!(result.is_err());
        assert!(!link.is_connected());
    }
}
