//! Connection Manager
//!
//! Holds the single active transport and routes every call to it. Only
//! one connection exists at a time by design; requesting a different
//! transport kind closes and discards the previous one. The manager is
//! an explicit object the application owns, with no ambient global
//! state, which keeps it straightforward to test.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::ble::device_info::BleDeviceInfo;
use crate::ble::radio::WriteMode;
use crate::ble::subscription::SubscriptionKind;
use crate::config::StreamConfig;
use crate::error::ConnectError;
use crate::port::{
    DisconnectCallback, Endpoint, Port, RadioUnavailableCallback, RssiCallback, ScanCallback,
    TransportKind,
};
use crate::protocol;
use crate::stream::TcpTransport;

/// The one connection context: transport kind, the endpoint it was
/// opened against, whether it is open, and the active port.
pub struct ConnectContext {
    pub kind: TransportKind,
    pub name: Option<String>,
    pub is_open: bool,
    port: Arc<dyn Port>,
}

/// Routes caller operations to the active transport.
#[derive(Default)]
pub struct ConnectManager {
    context: Option<ConnectContext>,
}

impl ConnectManager {
    pub fn new() -> Self {
        Self { context: None }
    }

    /// Install a transport of the given kind. An open context of the
    /// same kind is reused (the factory is not invoked); anything else
    /// is closed first and replaced.
    pub fn init_manager<F>(&mut self, kind: TransportKind, make_port: F)
    where
        F: FnOnce() -> Arc<dyn Port>,
    {
        if let Some(context) = &self.context {
            if context.kind == kind && context.is_open {
                debug!("Reusing open {kind:?} context");
                return;
            }
            self.close();
        }
        info!("Initializing {kind:?} transport");
        self.context = Some(ConnectContext {
            kind,
            name: None,
            is_open: false,
            port: make_port(),
        });
    }

    /// Convenience: install a TCP transport with the given settings.
    pub fn init_tcp(&mut self, config: StreamConfig) {
        self.init_manager(TransportKind::Tcp, || Arc::new(TcpTransport::new(config)));
    }

    pub fn kind(&self) -> Option<TransportKind> {
        self.context.as_ref().map(|c| c.kind)
    }

    pub fn is_open(&self) -> bool {
        self.context.as_ref().map(|c| c.is_open).unwrap_or(false)
    }

    fn port(&self) -> Result<Arc<dyn Port>, ConnectError> {
        self.context
            .as_ref()
            .map(|c| c.port.clone())
            .ok_or_else(|| ConnectError::ConnectionFailed("no active transport".into()))
    }

    /// Open the active transport against the endpoint.
    pub async fn connect(&mut self, endpoint: Endpoint) -> Result<(), ConnectError> {
        let port = self.port()?;
        let result = port.open(&endpoint).await;
        if let Some(context) = &mut self.context {
            context.is_open = result.is_ok();
            if result.is_ok() {
                context.name = Some(endpoint.describe());
            }
        }
        result
    }

    pub async fn write(&self, data: &[u8], timeout: Duration) -> Result<(), ConnectError> {
        self.port()
            .map_err(|_| ConnectError::SendFailed("no active transport".into()))?
            .write(data, timeout)
            .await
    }

    pub async fn read(&self, timeout: Duration) -> Result<Vec<u8>, ConnectError> {
        self.port()
            .map_err(|_| ConnectError::ReceiveFailed("no active transport".into()))?
            .read(timeout)
            .await
    }

    /// Best-effort convenience decode: the response bytes as a trimmed
    /// string, degrading to `None` ("no data") instead of propagating
    /// decode errors.
    pub async fn read_string(&self, timeout: Duration) -> Result<Option<String>, ConnectError> {
        let bytes = self.read(timeout).await?;
        Ok(protocol::decode_response(&bytes))
    }

    /// Continuous receive mode on the active transport. Returns a closed
    /// channel when no transport is installed.
    pub fn receive_data_flow(&self) -> mpsc::UnboundedReceiver<Vec<u8>> {
        match self.port() {
            Ok(port) => port.receive_data_flow(),
            Err(_) => mpsc::unbounded_channel().1,
        }
    }

    pub async fn start_scan(&self) -> Result<(), ConnectError> {
        self.port()?.start_scan().await
    }

    pub fn stop_scan(&self) {
        if let Ok(port) = self.port() {
            port.stop_scan();
        }
    }

    pub fn set_scan_callback(&self, callback: ScanCallback) {
        if let Ok(port) = self.port() {
            port.set_scan_callback(callback);
        }
    }

    pub fn set_on_device_disconnect(&self, callback: DisconnectCallback) {
        if let Ok(port) = self.port() {
            port.set_on_device_disconnect(callback);
        }
    }

    pub fn set_on_radio_unavailable(&self, callback: RadioUnavailableCallback) {
        if let Ok(port) = self.port() {
            port.set_on_radio_unavailable(callback);
        }
    }

    pub fn set_on_rssi_update(&self, callback: RssiCallback) {
        if let Ok(port) = self.port() {
            port.set_on_rssi_update(callback);
        }
    }

    /// Re-establish the previous connection (BLE only; other backends
    /// report `Unsupported`).
    pub async fn reconnect(&mut self) -> Result<(), ConnectError> {
        let port = self.port()?;
        let result = port.reconnect().await;
        if let Some(context) = &mut self.context {
            context.is_open = result.is_ok();
        }
        result
    }

    pub async fn device_info(&self) -> Option<BleDeviceInfo> {
        self.port().ok()?.device_info().await
    }

    pub fn change_write_role(&self, characteristic_uuid: &str, mode: WriteMode, active: bool) {
        if let Ok(port) = self.port() {
            port.change_write_role(characteristic_uuid, mode, active);
        }
    }

    pub fn change_subscription(
        &self,
        characteristic_uuid: &str,
        kind: SubscriptionKind,
        active: bool,
    ) {
        if let Ok(port) = self.port() {
            port.change_subscription(characteristic_uuid, kind, active);
        }
    }

    /// Close and discard the active context. Safe to call at any time.
    pub fn close(&mut self) {
        if let Some(context) = self.context.take() {
            context.port.close();
            info!("Closed {:?} context", context.kind);
        }
    }
}
