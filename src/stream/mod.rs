//! Stream Transports
//!
//! The classic-Bluetooth accessory and TCP backends share one pattern: a
//! dedicated worker thread drives the byte streams (connect, continuous
//! read, disconnect detection) while the caller-facing operations poll
//! the shared state. Writes run a deadline loop over the output stream;
//! reads wait for the shared terminator framing rule.

pub mod accessory;
pub mod tcp;

pub use accessory::{AccessoryInfo, AccessoryProvider, AccessoryStreams, BluetoothTransport};
pub use tcp::TcpTransport;

use bytes::BytesMut;
use parking_lot::Mutex;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::StreamConfig;
use crate::error::ConnectError;
use crate::port::{DisconnectCallback, LinkState};
use crate::protocol;
use crate::wait::wait_for;

/// The two half-duplex byte streams of one connection.
pub(crate) struct StreamPair {
    pub reader: Box<dyn Read + Send>,
    pub writer: Box<dyn Write + Send>,
}

struct StreamShared {
    state: LinkState,
    worker_ready: bool,
    buffer: BytesMut,
    flow_queue: BytesMut,
    flow_epoch: u64,
    last_error: Option<String>,
    on_disconnect: Option<Arc<dyn Fn() + Send + Sync>>,
}

impl StreamShared {
    fn new() -> Self {
        Self {
            state: LinkState::Disconnected,
            worker_ready: false,
            buffer: BytesMut::new(),
            flow_queue: BytesMut::new(),
            flow_epoch: 0,
            last_error: None,
            on_disconnect: None,
        }
    }
}

/// Machinery shared by both stream backends. One instance per transport;
/// the mutex is the transport's serial synchronization domain.
pub(crate) struct StreamCore {
    shared: Arc<Mutex<StreamShared>>,
    writer: Arc<Mutex<Option<Box<dyn Write + Send>>>>,
    stop: Mutex<Option<Arc<AtomicBool>>>,
    config: StreamConfig,
}

impl StreamCore {
    pub fn new(config: StreamConfig) -> Self {
        Self {
            shared: Arc::new(Mutex::new(StreamShared::new())),
            writer: Arc::new(Mutex::new(None)),
            stop: Mutex::new(None),
            config,
        }
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn state(&self) -> LinkState {
        self.shared.lock().state
    }

    pub fn last_error(&self) -> Option<String> {
        self.shared.lock().last_error.clone()
    }

    pub fn set_on_disconnect(&self, callback: DisconnectCallback) {
        self.shared.lock().on_disconnect = Some(Arc::from(callback));
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.config.poll_interval_ms.max(1))
    }

    /// Prime the state machine for a fresh connect attempt.
    pub fn begin_connect(&self) {
        let mut sh = self.shared.lock();
        sh.state = LinkState::Connecting;
        sh.worker_ready = false;
        sh.last_error = None;
        sh.buffer.clear();
        sh.flow_queue.clear();
    }

    /// Spawn the dedicated worker thread: resolve the stream pair, flip
    /// to connected once both streams are live, then run the continuous
    /// read loop until the stream ends, errors, or the stop flag is set.
    pub fn spawn_worker<C>(&self, connect: C)
    where
        C: FnOnce() -> std::io::Result<StreamPair> + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        if let Some(previous) = self.stop.lock().replace(stop.clone()) {
            previous.store(true, Ordering::Relaxed);
        }

        let shared = self.shared.clone();
        let writer_slot = self.writer.clone();
        let buffer_len = self.config.read_buffer_len.max(1);
        let spawned = std::thread::Builder::new()
            .name("obd-connect-stream".into())
            .spawn(move || {
                shared.lock().worker_ready = true;

                let pair = match connect() {
                    Ok(pair) => pair,
                    Err(e) => {
                        let mut sh = shared.lock();
                        sh.last_error = Some(e.to_string());
                        sh.state = LinkState::Disconnected;
                        return;
                    }
                };
                if stop.load(Ordering::Relaxed) {
                    // The open was abandoned while we were connecting.
                    shared.lock().state = LinkState::Disconnected;
                    return;
                }
                *writer_slot.lock() = Some(pair.writer);
                shared.lock().state = LinkState::Connected;
                debug!("Stream worker connected");

                let mut reader = pair.reader;
                let mut buf = vec![0u8; buffer_len];
                loop {
                    if stop.load(Ordering::Relaxed) {
                        break;
                    }
                    match reader.read(&mut buf) {
                        Ok(0) => {
                            stream_down(&shared, &stop, "stream ended");
                            break;
                        }
                        Ok(n) => {
                            let mut sh = shared.lock();
                            sh.buffer.extend_from_slice(&buf[..n]);
                            sh.flow_queue.extend_from_slice(&buf[..n]);
                        }
                        Err(e)
                            if matches!(
                                e.kind(),
                                std::io::ErrorKind::TimedOut
                                    | std::io::ErrorKind::WouldBlock
                                    | std::io::ErrorKind::Interrupted
                            ) =>
                        {
                            continue;
                        }
                        Err(e) => {
                            stream_down(&shared, &stop, &e.to_string());
                            break;
                        }
                    }
                }
            });
        if let Err(e) = spawned {
            let mut sh = self.shared.lock();
            sh.worker_ready = true;
            sh.last_error = Some(e.to_string());
            sh.state = LinkState::Disconnected;
        }
    }

    /// Wait for the worker thread to report itself running.
    pub async fn wait_ready(&self) -> bool {
        let shared = self.shared.clone();
        wait_for(
            move || shared.lock().worker_ready,
            Duration::from_millis(self.config.worker_ready_timeout_ms),
            self.poll_interval(),
        )
        .await
    }

    /// Wait for the connect attempt to resolve either way; true when the
    /// transport ended up connected.
    pub async fn wait_connected(&self) -> bool {
        let shared = self.shared.clone();
        let settled = wait_for(
            move || shared.lock().state != LinkState::Connecting,
            Duration::from_millis(self.config.connect_timeout_ms),
            self.poll_interval(),
        )
        .await;
        settled && self.state() == LinkState::Connected
    }

    /// Abandon an in-flight connect attempt.
    pub fn abort_connect(&self) {
        if let Some(stop) = self.stop.lock().take() {
            stop.store(true, Ordering::Relaxed);
        }
        *self.writer.lock() = None;
        self.shared.lock().state = LinkState::Disconnected;
    }

    /// Deadline write loop, run on a blocking thread: while bytes remain
    /// and the deadline has not elapsed, write a slice of the remaining
    /// payload. A zero-length write means the stream rejected more data
    /// (send failure); running out of time is a send timeout.
    pub fn blocking_write(&self, data: &[u8], timeout: Duration) -> Result<(), ConnectError> {
        if self.state() != LinkState::Connected {
            return Err(ConnectError::NotConnected);
        }
        if data.is_empty() {
            return Ok(());
        }
        let mut guard = self.writer.lock();
        let Some(writer) = guard.as_mut() else {
            return Err(ConnectError::NotConnected);
        };
        let deadline = Instant::now() + timeout;
        let mut sent = 0usize;
        while sent < data.len() {
            if Instant::now() >= deadline {
                return Err(ConnectError::SendTimeout);
            }
            match writer.write(&data[sent..]) {
                Ok(0) => {
                    return Err(ConnectError::SendFailed(
                        "stream refused additional bytes".into(),
                    ))
                }
                Ok(n) => sent += n,
                Err(e)
                    if matches!(
                        e.kind(),
                        std::io::ErrorKind::TimedOut
                            | std::io::ErrorKind::WouldBlock
                            | std::io::ErrorKind::Interrupted
                    ) =>
                {
                    continue;
                }
                Err(e) => return Err(ConnectError::SendFailed(e.to_string())),
            }
        }
        let _ = writer.flush();
        Ok(())
    }

    /// Wait for one terminator-framed response; the buffer is cleared on
    /// hand-off and on the timeout path.
    pub async fn read(&self, timeout: Duration) -> Result<Vec<u8>, ConnectError> {
        if self.state() != LinkState::Connected {
            self.clear_buffer();
            return Err(ConnectError::NotConnected);
        }
        let shared = self.shared.clone();
        let complete = wait_for(
            move || protocol::is_response_complete(&shared.lock().buffer),
            timeout,
            self.poll_interval(),
        )
        .await;
        if !complete {
            self.clear_buffer();
            return Err(ConnectError::ReceiveTimeout);
        }
        let mut sh = self.shared.lock();
        let response = sh.buffer.split().to_vec();
        sh.flow_queue.clear();
        Ok(response)
    }

    pub fn clear_buffer(&self) {
        let mut sh = self.shared.lock();
        sh.buffer.clear();
        sh.flow_queue.clear();
    }

    /// Continuous receive mode; mirrors the BLE data flow.
    pub fn receive_data_flow(&self) -> mpsc::UnboundedReceiver<Vec<u8>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let epoch = {
            let mut sh = self.shared.lock();
            sh.flow_epoch += 1;
            if sh.state != LinkState::Connected {
                return rx;
            }
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

    /// Stop the worker, drop the writer and reset all state. Idempotent;
    /// an explicit close never fires the disconnect callback.
    pub fn close(&self) {
        if let Some(stop) = self.stop.lock().take() {
            stop.store(true, Ordering::Relaxed);
        }
        *self.writer.lock() = None;
        let mut sh = self.shared.lock();
        sh.state = LinkState::Disconnected;
        sh.worker_ready = false;
        sh.buffer.clear();
        sh.flow_queue.clear();
        sh.flow_epoch += 1;
        sh.last_error = None;
    }
}

/// Stream error or end: force disconnected and fire the callback, unless
/// the stop flag shows this was an explicit close.
fn stream_down(shared: &Arc<Mutex<StreamShared>>, stop: &Arc<AtomicBool>, reason: &str) {
    if stop.load(Ordering::Relaxed) {
        return;
    }
    let callback = {
        let mut sh = shared.lock();
        if sh.state == LinkState::Disconnected {
            return;
        }
        sh.state = LinkState::Disconnected;
        sh.last_error = Some(reason.to_string());
        sh.on_disconnect.clone()
    };
    warn!("Stream connection lost: {reason}");
    if let Some(callback) = callback {
        callback();
    }
}
