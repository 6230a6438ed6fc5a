//! TCP Transport
//!
//! Raw-socket backend for adapters reachable over WiFi. The endpoint is
//! a `host:port` descriptor; the connect itself happens on the worker
//! thread so the caller-facing `open` just polls for the outcome.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::info;

use crate::config::StreamConfig;
use crate::error::ConnectError;
use crate::port::{DisconnectCallback, Endpoint, LinkState, Port};
use crate::stream::{StreamCore, StreamPair};

pub struct TcpTransport {
    core: Arc<StreamCore>,
    /// Kept so close can shut the socket down and unblock the reader.
    socket: Arc<Mutex<Option<TcpStream>>>,
}

impl TcpTransport {
    pub fn new(config: StreamConfig) -> Self {
        Self {
            core: Arc::new(StreamCore::new(config)),
            socket: Arc::new(Mutex::new(None)),
        }
    }

    /// Split a `host:port` descriptor. The port must parse; the host
    /// must be non-empty.
    fn parse_endpoint(name: &str) -> Result<(String, u16), ConnectError> {
        let mut parts = name.splitn(2, ':');
        let host = parts.next().unwrap_or_default();
        let port = parts.next().ok_or(ConnectError::InvalidName)?;
        if host.is_empty() {
            return Err(ConnectError::InvalidName);
        }
        let port: u16 = port.parse().map_err(|_| ConnectError::InvalidName)?;
        Ok((host.to_string(), port))
    }

    fn connect_socket(host: &str, port: u16, config: &StreamConfig) -> std::io::Result<TcpStream> {
        let address = (host, port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, "host not resolved"))?;
        let stream =
            TcpStream::connect_timeout(&address, Duration::from_millis(config.connect_timeout_ms))?;
        stream.set_nodelay(true)?;
        // A short read timeout keeps the worker loop responsive to the
        // stop flag.
        stream.set_read_timeout(Some(Duration::from_millis(config.io_timeout_ms.max(1))))?;
        stream.set_write_timeout(Some(Duration::from_millis(config.io_timeout_ms.max(1))))?;
        Ok(stream)
    }
}

#[async_trait]
impl Port for TcpTransport {
    async fn open(&self, endpoint: &Endpoint) -> Result<(), ConnectError> {
        match self.core.state() {
            LinkState::Connected => return Ok(()),
            LinkState::Connecting => return Err(ConnectError::Connecting),
            LinkState::Disconnected => {}
        }
        let Endpoint::Name(name) = endpoint else {
            return Err(ConnectError::InvalidName);
        };
        let (host, port) = Self::parse_endpoint(name)?;

        self.core.begin_connect();
        let config = self.core.config().clone();
        let socket_slot = self.socket.clone();
        self.core.spawn_worker(move || {
            let stream = Self::connect_socket(&host, port, &config)?;
            let writer = stream.try_clone()?;
            *socket_slot.lock() = Some(stream.try_clone()?);
            Ok(StreamPair {
                reader: Box::new(stream),
                writer: Box::new(writer),
            })
        });

        if !self.core.wait_ready().await {
            self.core.abort_connect();
            return Err(ConnectError::ConnectionFailed(
                "stream worker did not start".into(),
            ));
        }
        if !self.core.wait_connected().await {
            let cause = self
                .core
                .last_error()
                .unwrap_or_else(|| "connection timed out".into());
            self.core.abort_connect();
            return Err(ConnectError::ConnectionFailed(cause));
        }
        info!("TCP connection to {name} established");
        Ok(())
    }

    async fn write(&self, data: &[u8], timeout: Duration) -> Result<(), ConnectError> {
        // Run the deadline loop off the async runtime.
        let core = self.core.clone();
        let payload = data.to_vec();
        tokio::task::spawn_blocking(move || core.blocking_write(&payload, timeout))
            .await
            .map_err(|e| ConnectError::SendFailed(e.to_string()))?
    }

    async fn read(&self, timeout: Duration) -> Result<Vec<u8>, ConnectError> {
        self.core.read(timeout).await
    }

    fn close(&self) {
        if let Some(socket) = self.socket.lock().take() {
            let _ = socket.shutdown(Shutdown::Both);
        }
        self.core.close();
    }

    fn receive_data_flow(&self) -> mpsc::UnboundedReceiver<Vec<u8>> {
        self.core.receive_data_flow()
    }

    fn set_on_device_disconnect(&self, callback: DisconnectCallback) {
        self.core.set_on_disconnect(callback);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_endpoint() {
        assert_eq!(
            TcpTransport::parse_endpoint("192.168.0.10:35000").unwrap(),
            ("192.168.0.10".into(), 35000)
        );
        assert_eq!(
            TcpTransport::parse_endpoint("192.168.0.10"),
            Err(ConnectError::InvalidName)
        );
        assert_eq!(
            TcpTransport::parse_endpoint(":35000"),
            Err(ConnectError::InvalidName)
        );
        assert_eq!(
            TcpTransport::parse_endpoint("host:notaport"),
            Err(ConnectError::InvalidName)
        );
    }

    #[tokio::test]
    async fn test_open_refused_port_reports_cause() {
        let transport = TcpTransport::new(StreamConfig {
            connect_timeout_ms: 300,
            poll_interval_ms: 2,
            ..Default::default()
        });
        // Port 1 on localhost is almost certainly closed.
        let result = transport
            .open(&Endpoint::Name("127.0.0.1:1".into()))
            .await;
        assert!(matches!(result, Err(ConnectError::ConnectionFailed(_))));
        assert_eq!(transport.core.state(), LinkState::Disconnected);
    }
}
