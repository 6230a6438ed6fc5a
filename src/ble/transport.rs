//! BLE Transport
//!
//! The richest backend: central-role scanning, connection lifecycle,
//! characteristic role selection, MTU-aware chunked writes, notification
//! driven receive, RSSI polling, reconnection with backoff and
//! best-effort metadata collection.
//!
//! The transport owns an event channel; the platform binding translates
//! native radio callbacks into [`RadioEvent`] messages, and the pump
//! task here consumes them, mutating the shared state that the blocking
//! style public operations poll.

use async_trait::async_trait;
use bytes::BytesMut;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::ble::device_info::{
    self, BleDeviceInfo, BleServiceInfo, BroadcastData, DeviceDetails,
    DEVICE_INFO_CHARACTERISTICS, DEVICE_INFO_SERVICE_UUID,
};
use crate::ble::radio::{
    CharacteristicId, CharacteristicInfo, DeviceId, RadioEvent, RadioLink, WriteMode,
};
use crate::ble::roles::{self, SelectedRoles};
use crate::ble::scan::{self, ScannedDevice};
use crate::ble::subscription::{SubscriptionCache, SubscriptionKind};
use crate::config::BleConfig;
use crate::error::ConnectError;
use crate::port::{
    DisconnectCallback, Endpoint, LinkState, Port, RadioUnavailableCallback, RssiCallback,
    ScanCallback,
};
use crate::protocol;
use crate::wait::wait_for;

type SharedCallback = Arc<dyn Fn() + Send + Sync>;
type SharedRssiCallback = Arc<dyn Fn(i16) + Send + Sync>;
type SharedScanCallback = Arc<dyn Fn(Vec<ScannedDevice>) + Send + Sync>;

/// Mutable state of one BLE transport instance. Every access goes
/// through the owning mutex; no guard is held across an await.
struct BleShared {
    state: LinkState,
    /// Remembered target of the last connect request, kept for
    /// reconnection.
    target: Option<DeviceId>,
    /// The peripheral currently being connected or connected.
    device: Option<DeviceId>,
    /// Link-established notification seen for `device`.
    link_up: bool,
    characteristics: Vec<CharacteristicInfo>,
    roles: SelectedRoles,
    write_mode: WriteMode,
    subscriptions: SubscriptionCache,
    mtu: usize,
    /// Accumulates notification bytes until the response terminator.
    response: BytesMut,
    /// Separate accumulator drained by the continuous data flow.
    flow_queue: BytesMut,
    flow_epoch: u64,
    flow_tx: Option<mpsc::UnboundedSender<Vec<u8>>>,
    scan: Vec<ScannedDevice>,
    /// Latest reported value per characteristic (notification or read).
    char_values: HashMap<CharacteristicId, Vec<u8>>,
    broadcast: Option<BroadcastData>,
    details: Option<DeviceDetails>,
    services: Vec<BleServiceInfo>,
    on_disconnect: Option<SharedCallback>,
    on_radio_unavailable: Option<SharedCallback>,
    on_rssi: Option<SharedRssiCallback>,
    scan_callback: Option<SharedScanCallback>,
    rssi_task: Option<JoinHandle<()>>,
    rssi_in_flight: bool,
}

impl BleShared {
    fn new(mtu: usize) -> Self {
        Self {
            state: LinkState::Disconnected,
            target: None,
            device: None,
            link_up: false,
            characteristics: Vec::new(),
            roles: SelectedRoles::default(),
            write_mode: WriteMode::default(),
            subscriptions: SubscriptionCache::default(),
            mtu,
            response: BytesMut::new(),
            flow_queue: BytesMut::new(),
            flow_epoch: 0,
            flow_tx: None,
            scan: Vec::new(),
            char_values: HashMap::new(),
            broadcast: None,
            details: None,
            services: Vec::new(),
            on_disconnect: None,
            on_radio_unavailable: None,
            on_rssi: None,
            scan_callback: None,
            rssi_task: None,
            rssi_in_flight: false,
        }
    }

    /// Endpoint usable for traffic: a write or notify role is selected.
    fn endpoint_ready(&self) -> bool {
        self.roles.write.is_some() || self.roles.notify.is_some()
    }

    /// Normal teardown after a confirmed link dropped: cancel the data
    /// flow, forget roles and subscriptions, stop RSSI polling.
    fn teardown(&mut self) {
        self.state = LinkState::Disconnected;
        self.link_up = false;
        self.device = None;
        self.roles.clear();
        self.subscriptions.clear();
        self.flow_epoch += 1;
        self.flow_tx = None;
        if let Some(task) = self.rssi_task.take() {
            task.abort();
        }
        self.rssi_in_flight = false;
    }
}

/// BLE backend of the transport contract.
pub struct BleTransport {
    radio: Arc<dyn RadioLink>,
    shared: Arc<Mutex<BleShared>>,
    config: BleConfig,
}

impl BleTransport {
    /// Create the transport and start its event pump. `events` is the
    /// channel the platform binding pushes [`RadioEvent`]s onto.
    pub fn new(
        radio: Arc<dyn RadioLink>,
        events: mpsc::UnboundedReceiver<RadioEvent>,
        config: BleConfig,
    ) -> Arc<Self> {
        let shared = Arc::new(Mutex::new(BleShared::new(config.default_mtu)));
        tokio::spawn(pump_events(radio.clone(), shared.clone(), events));
        Arc::new(Self {
            radio,
            shared,
            config,
        })
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.config.poll_interval_ms.max(1))
    }

    async fn wait_radio_usable(&self) -> bool {
        let radio = self.radio.clone();
        wait_for(
            move || radio.state().is_usable(),
            Duration::from_millis(self.config.radio_ready_timeout_ms),
            self.poll_interval(),
        )
        .await
    }

    /// Failed connect: a link was never confirmed, so clear references
    /// without the normal teardown; the disconnect callback must not
    /// fire for a connection that never existed.
    fn abort_connect(&self) {
        let mut sh = self.shared.lock();
        sh.state = LinkState::Disconnected;
        sh.link_up = false;
        sh.device = None;
        sh.roles.clear();
    }

    async fn open_device(&self, device: &DeviceId) -> Result<(), ConnectError> {
        match self.shared.lock().state {
            LinkState::Connected => return Ok(()),
            LinkState::Connecting => return Err(ConnectError::Connecting),
            LinkState::Disconnected => {}
        }

        if !self.wait_radio_usable().await {
            self.shared.lock().state = LinkState::Disconnected;
            return Err(ConnectError::RadioUnavailable);
        }

        {
            let mut sh = self.shared.lock();
            match sh.state {
                LinkState::Connected => return Ok(()),
                LinkState::Connecting => return Err(ConnectError::Connecting),
                LinkState::Disconnected => {}
            }
            sh.state = LinkState::Connecting;
            sh.link_up = false;
            sh.device = Some(device.clone());
            sh.target = Some(device.clone());
        }
        info!("Connecting to {device}");
        self.radio.connect(device);

        let poll = self.poll_interval();

        let shared = self.shared.clone();
        let linked = wait_for(
            move || shared.lock().link_up,
            Duration::from_millis(self.config.link_timeout_ms),
            poll,
        )
        .await;
        if !linked {
            self.abort_connect();
            return Err(ConnectError::ConnectionFailed(
                "no link-established notification received".into(),
            ));
        }

        let shared = self.shared.clone();
        let resolved = wait_for(
            move || shared.lock().endpoint_ready(),
            Duration::from_millis(self.config.characteristic_timeout_ms),
            poll,
        )
        .await;
        if !resolved {
            self.abort_connect();
            return Err(ConnectError::ConnectionFailed(
                "no usable characteristics found".into(),
            ));
        }

        let radio = self.radio.clone();
        let target = device.clone();
        let physical = wait_for(
            move || radio.link_connected(&target),
            Duration::from_millis(self.config.physical_state_timeout_ms),
            poll,
        )
        .await;
        if !physical {
            self.abort_connect();
            return Err(ConnectError::ConnectionFailed(
                "peripheral did not reach connected state".into(),
            ));
        }

        let mode = self.shared.lock().write_mode;
        let mtu = self.radio.max_write_len(device, mode).max(1);
        {
            let mut sh = self.shared.lock();
            sh.mtu = mtu;
            sh.state = LinkState::Connected;
            sh.target = Some(device.clone());
        }
        info!("Connected to {device}, write chunk size {mtu}");

        self.start_rssi_polling(device.clone());

        // Metadata collection must not block the connect result.
        let radio = self.radio.clone();
        let shared = self.shared.clone();
        let config = self.config.clone();
        tokio::spawn(async move {
            collect_device_info(radio, shared, config).await;
        });

        Ok(())
    }

    async fn write_bytes(&self, data: &[u8], timeout: Duration) -> Result<(), ConnectError> {
        let (device, write_char, mtu, mode) = {
            let sh = self.shared.lock();
            if sh.state != LinkState::Connected {
                return Err(ConnectError::NotConnected);
            }
            match (sh.device.clone(), sh.roles.write.clone()) {
                (Some(device), Some(write_char)) => (device, write_char, sh.mtu, sh.write_mode),
                _ => return Err(ConnectError::NotConnected),
            }
        };
        if !self.radio.state().is_usable() {
            return Err(ConnectError::NotConnected);
        }
        if !self.radio.link_connected(&device) {
            // The platform dropped the link without telling us yet.
            let mut sh = self.shared.lock();
            sh.state = LinkState::Disconnected;
            sh.link_up = false;
            sh.device = None;
            sh.roles.clear();
            return Err(ConnectError::NotConnected);
        }
        if data.is_empty() {
            return Ok(());
        }
        if data.len() <= mtu {
            self.radio.write(&device, &write_char.id, data, mode);
            return Ok(());
        }

        // Chunked send, paced so the link buffer is not overrun. The
        // pacing is a heuristic, not flow control.
        let deadline = Instant::now() + timeout;
        let chunks = protocol::chunk_payload(data, mtu);
        let count = chunks.len();
        debug!("Splitting {} bytes into {count} chunks of {mtu}", data.len());
        for (index, chunk) in chunks.into_iter().enumerate() {
            if Instant::now() >= deadline {
                return Err(ConnectError::SendTimeout);
            }
            self.radio.write(&device, &write_char.id, chunk, mode);
            if index + 1 < count {
                tokio::time::sleep(Duration::from_millis(self.config.chunk_delay_ms)).await;
            }
        }
        Ok(())
    }

    async fn read_response(&self, timeout: Duration) -> Result<Vec<u8>, ConnectError> {
        let ready = {
            let sh = self.shared.lock();
            sh.state == LinkState::Connected && sh.endpoint_ready()
        };
        if !ready || !self.radio.state().is_usable() {
            self.clear_receive_buffers();
            return Err(ConnectError::NotConnected);
        }

        let shared = self.shared.clone();
        let complete = wait_for(
            move || protocol::is_response_complete(&shared.lock().response),
            timeout,
            self.poll_interval(),
        )
        .await;
        if !complete {
            self.clear_receive_buffers();
            return Err(ConnectError::ReceiveTimeout);
        }
        let mut sh = self.shared.lock();
        let response = sh.response.split().to_vec();
        sh.flow_queue.clear();
        Ok(response)
    }

    fn clear_receive_buffers(&self) {
        let mut sh = self.shared.lock();
        sh.response.clear();
        sh.flow_queue.clear();
    }

    fn start_data_flow(&self) -> mpsc::UnboundedReceiver<Vec<u8>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let epoch = {
            let mut sh = self.shared.lock();
            // Starting a new flow cancels the previous one.
            sh.flow_epoch += 1;
            if sh.state != LinkState::Connected {
                sh.flow_tx = None;
                return rx;
            }
            sh.flow_tx = Some(tx.clone());
            sh.flow_epoch
        };

        let shared = self.shared.clone();
        let interval = Duration::from_millis(self.config.flow_interval_ms.max(1));
        tokio::spawn(async move {
            loop {
                let batch = {
                    let mut sh = shared.lock();
                    if sh.flow_epoch != epoch || sh.state != LinkState::Connected {
                        sh.flow_queue.clear();
                        break;
                    }
                    if sh.flow_queue.is_empty() {
                        None
                    } else {
                        Some(sh.flow_queue.split().to_vec())
                    }
                };
                if let Some(batch) = batch {
                    if tx.send(batch).is_err() {
                        break;
                    }
                }
                tokio::time::sleep(interval).await;
            }
        });
        rx
    }

    fn start_rssi_polling(&self, device: DeviceId) {
        let radio = self.radio.clone();
        let shared = self.shared.clone();
        let interval = Duration::from_millis(self.config.rssi_interval_ms.max(1));
        let handle = tokio::spawn(async move {
            loop {
                let proceed = {
                    let mut sh = shared.lock();
                    if sh.state != LinkState::Connected {
                        break;
                    }
                    // Skip this tick while a previous read is pending.
                    if sh.rssi_in_flight {
                        false
                    } else {
                        sh.rssi_in_flight = true;
                        true
                    }
                };
                if proceed {
                    if radio.link_connected(&device) {
                        radio.read_rssi(&device);
                    } else {
                        shared.lock().rssi_in_flight = false;
                    }
                }
                tokio::time::sleep(interval).await;
            }
        });
        let mut sh = self.shared.lock();
        if let Some(previous) = sh.rssi_task.replace(handle) {
            previous.abort();
        }
    }

    async fn reconnect_device(&self) -> Result<(), ConnectError> {
        match self.shared.lock().state {
            LinkState::Connected => return Ok(()),
            LinkState::Connecting => return Err(ConnectError::Connecting),
            LinkState::Disconnected => {}
        }
        if !self.wait_radio_usable().await {
            return Err(ConnectError::RadioUnavailable);
        }
        let Some(target) = self.shared.lock().target.clone() else {
            return Err(ConnectError::ConnectionFailed(
                "no target device for reconnection".into(),
            ));
        };
        self.shared.lock().subscriptions.clear();

        let max_attempts = self.config.max_reconnect_attempts.max(1);
        let base = Duration::from_millis(self.config.reconnect_base_delay_ms);
        let mut attempt = 0u32;
        loop {
            if attempt >= max_attempts {
                self.shared.lock().state = LinkState::Disconnected;
                return Err(ConnectError::ConnectionFailed(
                    "max reconnection attempts reached".into(),
                ));
            }
            attempt += 1;
            debug!("Reconnect attempt {attempt}/{max_attempts}");
            match self.open_device(&target).await {
                Ok(()) => {
                    // The connect sequence succeeded structurally; make
                    // sure the connection is actually usable before
                    // declaring victory.
                    if self.validate_connection(&target) {
                        return Ok(());
                    }
                    self.shared.lock().state = LinkState::Disconnected;
                    return Err(ConnectError::ConnectionFailed(
                        "connection validation failed".into(),
                    ));
                }
                Err(e) => {
                    warn!("Reconnect attempt {attempt} failed: {e}");
                    if attempt < max_attempts {
                        // 1s, 2s, 4s, ...
                        let delay = base * 2u32.saturating_pow(attempt - 1);
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
    }

    fn validate_connection(&self, device: &DeviceId) -> bool {
        if !self.radio.link_connected(device) {
            return false;
        }
        let sh = self.shared.lock();
        sh.endpoint_ready() && sh.state == LinkState::Connected
    }

    async fn begin_scan(&self) -> Result<(), ConnectError> {
        if !self.wait_radio_usable().await {
            return Err(ConnectError::RadioUnavailable);
        }
        self.shared.lock().scan.clear();
        // Restart so duplicates keep flowing for the fresh table.
        self.radio.stop_scan();
        self.radio.start_scan();
        Ok(())
    }

    fn find_characteristic(&self, uuid_text: &str) -> Option<CharacteristicInfo> {
        let uuid = Uuid::parse_str(uuid_text).ok()?;
        let sh = self.shared.lock();
        sh.characteristics.iter().find(|c| c.id.uuid == uuid).cloned()
    }
}

#[async_trait]
impl Port for BleTransport {
    async fn open(&self, endpoint: &Endpoint) -> Result<(), ConnectError> {
        match endpoint {
            Endpoint::Device(device) => self.open_device(device).await,
            // BLE connects to a peripheral discovered by a scan, not to
            // a textual descriptor.
            Endpoint::Name(_) => Err(ConnectError::InvalidData),
        }
    }

    async fn write(&self, data: &[u8], timeout: Duration) -> Result<(), ConnectError> {
        self.write_bytes(data, timeout).await
    }

    async fn read(&self, timeout: Duration) -> Result<Vec<u8>, ConnectError> {
        self.read_response(timeout).await
    }

    fn close(&self) {
        let device = {
            let mut sh = self.shared.lock();
            sh.flow_epoch += 1;
            sh.flow_tx = None;
            if let Some(task) = sh.rssi_task.take() {
                task.abort();
            }
            sh.rssi_in_flight = false;
            let device = sh.device.take();
            sh.target = None;
            sh.link_up = false;
            sh.state = LinkState::Disconnected;
            sh.roles.clear();
            sh.subscriptions.clear();
            sh.characteristics.clear();
            sh.char_values.clear();
            sh.response.clear();
            sh.flow_queue.clear();
            sh.mtu = self.config.default_mtu;
            sh.broadcast = None;
            sh.details = None;
            sh.services.clear();
            device
        };
        if let Some(device) = device {
            self.radio.disconnect(&device);
        }
    }

    fn receive_data_flow(&self) -> mpsc::UnboundedReceiver<Vec<u8>> {
        self.start_data_flow()
    }

    fn set_on_device_disconnect(&self, callback: DisconnectCallback) {
        self.shared.lock().on_disconnect = Some(Arc::from(callback));
    }

    async fn start_scan(&self) -> Result<(), ConnectError> {
        self.begin_scan().await
    }

    fn stop_scan(&self) {
        self.radio.stop_scan();
        self.shared.lock().scan_callback = None;
    }

    fn set_scan_callback(&self, callback: ScanCallback) {
        self.shared.lock().scan_callback = Some(Arc::from(callback));
    }

    async fn reconnect(&self) -> Result<(), ConnectError> {
        self.reconnect_device().await
    }

    fn set_on_radio_unavailable(&self, callback: RadioUnavailableCallback) {
        self.shared.lock().on_radio_unavailable = Some(Arc::from(callback));
    }

    fn set_on_rssi_update(&self, callback: RssiCallback) {
        self.shared.lock().on_rssi = Some(Arc::from(callback));
    }

    async fn device_info(&self) -> Option<BleDeviceInfo> {
        Some(
            collect_device_info(self.radio.clone(), self.shared.clone(), self.config.clone())
                .await,
        )
    }

    fn change_write_role(&self, characteristic_uuid: &str, mode: WriteMode, active: bool) {
        let Some(found) = self.find_characteristic(characteristic_uuid) else {
            return;
        };
        let mut sh = self.shared.lock();
        let connected = sh
            .device
            .as_ref()
            .map(|d| self.radio.link_connected(d))
            .unwrap_or(false);
        if !connected {
            return;
        }
        sh.write_mode = mode;
        sh.roles.write = if active { Some(found) } else { None };
    }

    fn change_subscription(&self, characteristic_uuid: &str, kind: SubscriptionKind, active: bool) {
        let Some(found) = self.find_characteristic(characteristic_uuid) else {
            return;
        };
        let request = {
            let mut sh = self.shared.lock();
            let device = match sh.device.clone() {
                Some(d) if self.radio.link_connected(&d) => d,
                _ => return,
            };
            // Cache reflects caller intent immediately; the pump
            // reconciles it when the platform acknowledges.
            sh.subscriptions.apply(&found.id, kind, active);
            (device, found.id)
        };
        self.radio.set_subscribed(&request.0, &request.1, active);
    }
}

/// Consume radio events, mutating shared state and firing registered
/// callbacks. Runs until the platform binding drops its sender.
async fn pump_events(
    radio: Arc<dyn RadioLink>,
    shared: Arc<Mutex<BleShared>>,
    mut events: mpsc::UnboundedReceiver<RadioEvent>,
) {
    while let Some(event) = events.recv().await {
        match event {
            RadioEvent::StateChanged(state) => {
                if state.is_usable() {
                    continue;
                }
                let callback = {
                    let mut sh = shared.lock();
                    sh.state = LinkState::Disconnected;
                    sh.device = None;
                    sh.link_up = false;
                    sh.roles.clear();
                    sh.on_radio_unavailable.clone()
                };
                warn!("Radio became unusable: {state:?}");
                if let Some(callback) = callback {
                    callback();
                }
            }
            RadioEvent::Advertisement { device, rssi, data } => {
                let delivery = {
                    let mut sh = shared.lock();
                    if scan::apply_advertisement(&mut sh.scan, device, rssi, data, Instant::now())
                    {
                        sh.scan_callback.clone().map(|cb| (cb, sh.scan.clone()))
                    } else {
                        None
                    }
                };
                if let Some((callback, list)) = delivery {
                    callback(list);
                }
            }
            RadioEvent::LinkEstablished(device) => {
                let ours = {
                    let mut sh = shared.lock();
                    if sh.device.as_ref() == Some(&device) {
                        sh.link_up = true;
                        true
                    } else {
                        false
                    }
                };
                if ours {
                    debug!("Link established to {device}, discovering services");
                    radio.discover_services(&device);
                }
            }
            RadioEvent::LinkLost(device) => {
                let callback = {
                    let mut sh = shared.lock();
                    if sh.device.as_ref() != Some(&device) {
                        None
                    } else {
                        sh.teardown();
                        sh.on_disconnect.clone()
                    }
                };
                if let Some(callback) = callback {
                    info!("Device {device} disconnected");
                    callback();
                }
            }
            RadioEvent::CharacteristicsDiscovered {
                service,
                characteristics,
            } => {
                handle_discovery(&radio, &shared, service, characteristics);
            }
            RadioEvent::ValueUpdated {
                characteristic,
                value,
            } => {
                let mut sh = shared.lock();
                // Only subscribed characteristics feed the response
                // stream; unrelated churn cannot corrupt it.
                if sh.subscriptions.is_subscribed(&characteristic) {
                    sh.response.extend_from_slice(&value);
                    sh.flow_queue.extend_from_slice(&value);
                }
                sh.char_values.insert(characteristic, value);
            }
            RadioEvent::SubscriptionChanged {
                characteristic,
                active,
            } => {
                let mut sh = shared.lock();
                let kind = sh
                    .characteristics
                    .iter()
                    .find(|c| c.id == characteristic)
                    .map(|c| c.props.subscription_kind())
                    .unwrap_or(SubscriptionKind::Notify);
                sh.subscriptions.reconcile(&characteristic, kind, active);
            }
            RadioEvent::RssiRead(value) => {
                let callback = {
                    let mut sh = shared.lock();
                    sh.rssi_in_flight = false;
                    sh.on_rssi.clone()
                };
                if let Some(callback) = callback {
                    callback(value);
                }
            }
        }
    }
}

/// One service finished characteristic discovery: refresh what we know,
/// re-derive roles and bring the notify subscription in line.
fn handle_discovery(
    radio: &Arc<dyn RadioLink>,
    shared: &Arc<Mutex<BleShared>>,
    service: Uuid,
    characteristics: Vec<CharacteristicInfo>,
) {
    let subscribe = {
        let mut sh = shared.lock();
        sh.characteristics.retain(|c| c.id.service != service);
        sh.characteristics.extend(characteristics.iter().cloned());

        let previous = sh.roles.clone();
        sh.roles = roles::select_roles(&characteristics, &previous);

        match (sh.roles.notify.clone(), sh.device.clone()) {
            (Some(notify), Some(device)) => {
                let kind = notify.props.subscription_kind();
                if sh.subscriptions.contains(&notify.id, kind) {
                    None
                } else {
                    sh.subscriptions.insert(&notify.id, kind);
                    Some((device, notify.id))
                }
            }
            _ => None,
        }
    };
    if let Some((device, characteristic)) = subscribe {
        debug!("Enabling notifications on {characteristic}");
        radio.set_subscribed(&device, &characteristic, true);
    }
}

/// Three-stage best-effort metadata collection. Stages one and two are
/// skipped once populated; the service list is rebuilt so property
/// status stays live. Never fails: missing data degrades to absent
/// fields.
async fn collect_device_info(
    radio: Arc<dyn RadioLink>,
    shared: Arc<Mutex<BleShared>>,
    config: BleConfig,
) -> BleDeviceInfo {
    collect_broadcast_data(&shared);
    collect_device_details(&radio, &shared, &config).await;
    collect_service_list(&shared);
    let sh = shared.lock();
    BleDeviceInfo {
        broadcast: sh.broadcast.clone(),
        details: sh.details.clone(),
        services: sh.services.clone(),
    }
}

fn collect_broadcast_data(shared: &Arc<Mutex<BleShared>>) {
    let mut sh = shared.lock();
    if sh.broadcast.is_some() {
        return;
    }
    let Some(target) = sh.target.clone() else {
        return;
    };
    let record = sh.scan.iter().find(|d| d.id == target).cloned();
    sh.broadcast = Some(match record {
        Some(record) => BroadcastData {
            device_name: record.name.clone().unwrap_or_else(|| "Unknown".into()),
            tx_power_level: record
                .advertisement
                .tx_power
                .map(i32::from)
                .unwrap_or_else(|| i32::from(record.rssi)),
            service_uuids: record
                .advertisement
                .service_uuids
                .iter()
                .map(|u| u.to_string())
                .collect(),
            manufacturer_data: record.advertisement.manufacturer_data.clone(),
            advertised: true,
        },
        None => BroadcastData {
            device_name: "Unknown".into(),
            tx_power_level: -1,
            advertised: false,
            ..Default::default()
        },
    });
}

async fn collect_device_details(
    radio: &Arc<dyn RadioLink>,
    shared: &Arc<Mutex<BleShared>>,
    config: &BleConfig,
) {
    let (device, dis_characteristics) = {
        let sh = shared.lock();
        if sh.details.is_some() {
            return;
        }
        let Some(device) = sh.device.clone() else {
            return;
        };
        let characteristics: Vec<CharacteristicInfo> = sh
            .characteristics
            .iter()
            .filter(|c| {
                c.id.service == DEVICE_INFO_SERVICE_UUID
                    && DEVICE_INFO_CHARACTERISTICS.contains(&c.id.uuid)
            })
            .cloned()
            .collect();
        (device, characteristics)
    };

    let mut details = DeviceDetails::default();
    if dis_characteristics.is_empty() {
        // No standard device-information service: synthesize the basics
        // from the peripheral identity.
        let sh = shared.lock();
        details.model_number = Some(
            sh.broadcast
                .as_ref()
                .map(|b| b.device_name.clone())
                .unwrap_or_else(|| "Unknown Model".into()),
        );
        details.serial_number = Some(format!("ID: {device}"));
    } else {
        let poll = Duration::from_millis(config.poll_interval_ms.max(1));
        // Serial reads bound the number of concurrent GATT operations.
        for characteristic in dis_characteristics {
            if !characteristic.props.read {
                continue;
            }
            let id = characteristic.id;
            let cached = shared.lock().char_values.get(&id).cloned();
            if cached.as_ref().map_or(true, |v| v.is_empty()) {
                radio.read_characteristic(&device, &id);
                let probe = shared.clone();
                let arrived = wait_for(
                    move || probe.lock().char_values.get(&id).is_some_and(|v| !v.is_empty()),
                    Duration::from_millis(config.info_read_timeout_ms),
                    poll,
                )
                .await;
                if !arrived {
                    // One extended wait before giving up on this field.
                    let probe = shared.clone();
                    wait_for(
                        move || probe.lock().char_values.get(&id).is_some_and(|v| !v.is_empty()),
                        Duration::from_millis(config.info_retry_timeout_ms),
                        poll,
                    )
                    .await;
                }
            }
            if let Some(value) = shared.lock().char_values.get(&id).cloned() {
                if !value.is_empty() {
                    device_info::apply_device_info_value(
                        &mut details,
                        id.uuid,
                        device_info::parse_characteristic_value(id.uuid, &value),
                    );
                }
            }
        }
    }
    if details.manufacturer_name.is_none() {
        details.manufacturer_name = Some("Unknown Manufacturer".into());
    }
    shared.lock().details = Some(details);
}

fn collect_service_list(shared: &Arc<Mutex<BleShared>>) {
    let mut sh = shared.lock();
    if sh.device.is_none() {
        return;
    }
    let services = device_info::build_service_list(
        &sh.characteristics,
        &sh.char_values,
        &sh.roles,
        sh.write_mode,
        &sh.subscriptions,
    );
    sh.services = services;
}
