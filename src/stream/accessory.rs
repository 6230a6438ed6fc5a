//! Classic-Bluetooth Accessory Transport
//!
//! Classic Bluetooth adapters surface as accessory sessions managed by
//! the platform, not as sockets. The [`AccessoryProvider`] seam mirrors
//! that: it enumerates connected accessories with their protocol names
//! and opens a session's input/output stream pair. The endpoint
//! descriptor is a colon-delimited list of accepted protocol-name
//! prefixes; the first accessory advertising a matching protocol wins.

use async_trait::async_trait;
use std::io::{Read, Write};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::config::StreamConfig;
use crate::error::ConnectError;
use crate::port::{DisconnectCallback, Endpoint, LinkState, Port};
use crate::stream::{StreamCore, StreamPair};

/// One accessory the platform currently reports as connected.
#[derive(Debug, Clone)]
pub struct AccessoryInfo {
    pub id: String,
    pub name: String,
    /// Protocol names the accessory advertises.
    pub protocols: Vec<String>,
}

/// Input/output streams of an opened accessory session.
pub struct AccessoryStreams {
    pub input: Box<dyn Read + Send>,
    pub output: Box<dyn Write + Send>,
}

/// Platform seam for the external-accessory session layer.
pub trait AccessoryProvider: Send + Sync {
    fn connected_accessories(&self) -> Vec<AccessoryInfo>;

    /// Establish a session for the accessory on the given protocol. The
    /// session handshake happens here; returned streams are live.
    fn open_session(
        &self,
        accessory: &AccessoryInfo,
        protocol: &str,
    ) -> std::io::Result<AccessoryStreams>;
}

pub struct BluetoothTransport {
    provider: Arc<dyn AccessoryProvider>,
    core: Arc<StreamCore>,
}

impl BluetoothTransport {
    pub fn new(provider: Arc<dyn AccessoryProvider>, config: StreamConfig) -> Self {
        Self {
            provider,
            core: Arc::new(StreamCore::new(config)),
        }
    }

    /// Colon-delimited accepted protocol prefixes; empty segments are
    /// dropped.
    fn parse_prefixes(name: &str) -> Vec<String> {
        name.split(':')
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .collect()
    }

    /// First accessory advertising a protocol that starts with one of
    /// the accepted prefixes.
    fn match_accessory(
        &self,
        prefixes: &[String],
    ) -> Result<(AccessoryInfo, String), ConnectError> {
        for accessory in self.provider.connected_accessories() {
            for protocol in &accessory.protocols {
                if prefixes.iter().any(|p| protocol.starts_with(p.as_str())) {
                    return Ok((accessory.clone(), protocol.clone()));
                }
            }
        }
        Err(ConnectError::NoCompatibleDevice)
    }
}

#[async_trait]
impl Port for BluetoothTransport {
    async fn open(&self, endpoint: &Endpoint) -> Result<(), ConnectError> {
        match self.core.state() {
            LinkState::Connected => return Ok(()),
            LinkState::Connecting => return Err(ConnectError::Connecting),
            LinkState::Disconnected => {}
        }
        let Endpoint::Name(name) = endpoint else {
            return Err(ConnectError::InvalidName);
        };
        let prefixes = Self::parse_prefixes(name);
        if prefixes.is_empty() {
            return Err(ConnectError::InvalidData);
        }

        let (accessory, protocol) = self.match_accessory(&prefixes)?;
        debug!(
            "Matched accessory {} on protocol {protocol}",
            accessory.name
        );

        self.core.begin_connect();
        let provider = self.provider.clone();
        let worker_protocol = protocol.clone();
        self.core.spawn_worker(move || {
            let streams = provider.open_session(&accessory, &worker_protocol)?;
            Ok(StreamPair {
                reader: streams.input,
                writer: streams.output,
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
                .unwrap_or_else(|| "accessory session did not open".into());
            self.core.abort_connect();
            return Err(ConnectError::ConnectionFailed(cause));
        }
        info!("Accessory session established on {protocol}");
        Ok(())
    }

    async fn write(&self, data: &[u8], timeout: Duration) -> Result<(), ConnectError> {
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
        self.core.close();
    }

    fn receive_data_flow(&self) -> mpsc::UnboundedReceiver<Vec<u8>> {
        self.core.receive_data_flow()
    }

    fn set_on_device_disconnect(&self, callback: DisconnectCallback) {
        self.core.set_on_disconnect(callback);
    }
}
