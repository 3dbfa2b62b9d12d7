//! Outbound connection management.
//!
//! A [`ConnectionManager`] owns at most one live TCP connection to the
//! receiver. A named connector thread establishes it, waits out failures with
//! a fixed backoff and reconnects when the live connection breaks. Socket I/O
//! runs on cloned handles outside the bookkeeping lock, so a stalled write
//! never blocks state queries or [`close`](ConnectionManager::close).

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bytes::Bytes;
use depthlink_frame::{read_exact_bytes, write_all_bytes};
use depthlink_transport::{Endpoint, KeepaliveConfig, TcpConnection, TcpTransport};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{PeerError, Result};
use crate::transmitter::FrameLink;

/// Connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Idle,
    Connecting,
    Ready,
    Failed,
    Cancelled,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Ready => "ready",
            ConnectionState::Failed => "failed",
            ConnectionState::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A state transition, as observed by the manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connecting { endpoint: Endpoint, attempt: u64 },
    Ready { endpoint: Endpoint, generation: u64 },
    Failed { endpoint: Endpoint, reason: String },
    Cancelled,
}

impl ConnectionEvent {
    /// The state this event moved the connection into.
    pub fn state(&self) -> ConnectionState {
        match self {
            ConnectionEvent::Connecting { .. } => ConnectionState::Connecting,
            ConnectionEvent::Ready { .. } => ConnectionState::Ready,
            ConnectionEvent::Failed { .. } => ConnectionState::Failed,
            ConnectionEvent::Cancelled => ConnectionState::Cancelled,
        }
    }
}

/// Which candidate the connector tries after a failed attempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryPolicy {
    /// Always go back to the first candidate.
    #[default]
    Head,
    /// Move on to the next candidate, wrapping at the end of the list.
    RoundRobin,
}

impl RetryPolicy {
    /// Index of the candidate to try after `current` failed.
    pub fn next_index(self, current: usize, len: usize) -> usize {
        match self {
            RetryPolicy::Head => 0,
            RetryPolicy::RoundRobin if len == 0 => 0,
            RetryPolicy::RoundRobin => (current + 1) % len,
        }
    }
}

/// Connector and socket settings.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub connect_timeout: Duration,
    /// Applied as both read and write timeout on the live connection.
    pub io_timeout: Duration,
    pub backoff: Duration,
    pub retry_policy: RetryPolicy,
    pub keepalive: Option<KeepaliveConfig>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            io_timeout: Duration::from_secs(10),
            backoff: Duration::from_secs(3),
            retry_policy: RetryPolicy::Head,
            keepalive: Some(KeepaliveConfig::default()),
        }
    }
}

struct Bookkeeping {
    state: ConnectionState,
    stream: Option<TcpConnection>,
    endpoint: Option<Endpoint>,
    generation: u64,
    in_flight: bool,
    cancelled: bool,
    subscribers: Vec<Sender<ConnectionEvent>>,
}

impl Bookkeeping {
    fn transition(&mut self, event: ConnectionEvent) {
        self.state = event.state();
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

struct Shared {
    book: Mutex<Bookkeeping>,
    changed: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Bookkeeping> {
        // The bookkeeping stays consistent even if a holder panicked.
        self.book.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Owns the outbound connection and its retry loop.
pub struct ConnectionManager {
    shared: Arc<Shared>,
    connector: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
    /// Start connecting to `candidates` in the background.
    pub fn connect(candidates: Vec<Endpoint>, config: ConnectionConfig) -> Result<Self> {
        Self::spawn(candidates, config, Vec::new())
    }

    /// Like [`connect`](Self::connect), with `subscribers` attached before the
    /// connector starts so they see the first transition.
    pub(crate) fn spawn(
        candidates: Vec<Endpoint>,
        config: ConnectionConfig,
        subscribers: Vec<Sender<ConnectionEvent>>,
    ) -> Result<Self> {
        if candidates.is_empty() {
            return Err(PeerError::InvalidConfig("no endpoint candidates".into()));
        }
        if config.backoff.is_zero() {
            return Err(PeerError::InvalidConfig("backoff must be non-zero".into()));
        }

        let shared = Arc::new(Shared {
            book: Mutex::new(Bookkeeping {
                state: ConnectionState::Idle,
                stream: None,
                endpoint: None,
                generation: 0,
                in_flight: false,
                cancelled: false,
                subscribers,
            }),
            changed: Condvar::new(),
        });

        let worker_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("depthlink-connector".into())
            .spawn(move || run_connector(&worker_shared, &candidates, &config))
            .map_err(depthlink_transport::TransportError::Io)?;

        Ok(Self {
            shared,
            connector: Mutex::new(Some(handle)),
        })
    }

    /// Receive every subsequent state transition, in order.
    pub fn subscribe(&self) -> Receiver<ConnectionEvent> {
        let (tx, rx) = mpsc::channel();
        self.shared.lock().subscribers.push(tx);
        rx
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.lock().state
    }

    pub fn is_ready(&self) -> bool {
        self.state() == ConnectionState::Ready
    }

    /// Endpoint of the live connection, if any.
    pub fn endpoint(&self) -> Option<Endpoint> {
        let book = self.shared.lock();
        if book.state == ConnectionState::Ready {
            book.endpoint.clone()
        } else {
            None
        }
    }

    /// Whether a frame currently holds the connection.
    pub fn is_in_flight(&self) -> bool {
        self.shared.lock().in_flight
    }

    /// Block until the connection is ready, cancelled or `timeout` passes.
    pub fn wait_ready(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut book = self.shared.lock();
        loop {
            match book.state {
                ConnectionState::Ready => return true,
                ConnectionState::Cancelled => return false,
                _ => {}
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            book = self
                .shared
                .changed
                .wait_timeout(book, deadline - now)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner().0);
        }
    }

    /// Write all of `bytes` to the live connection.
    pub fn send(&self, bytes: &[u8]) -> Result<()> {
        let (mut stream, generation) = self.live_stream()?;
        write_all_bytes(&mut stream, bytes).map_err(|err| {
            self.mark_failed(generation, &err.to_string());
            PeerError::from(err)
        })
    }

    /// Read exactly `len` bytes from the live connection.
    pub fn receive_exact(&self, len: usize) -> Result<Bytes> {
        let (mut stream, generation) = self.live_stream()?;
        read_exact_bytes(&mut stream, len).map_err(|err| {
            self.mark_failed(generation, &err.to_string());
            PeerError::from(err)
        })
    }

    /// Stop connecting and tear down the live connection.
    ///
    /// Idempotent. Blocked reads and writes on the connection fail.
    pub fn close(&self) {
        {
            let mut book = self.shared.lock();
            if book.cancelled {
                return;
            }
            book.cancelled = true;
            book.in_flight = false;
            if let Some(stream) = book.stream.take() {
                stream.shutdown();
            }
            book.transition(ConnectionEvent::Cancelled);
        }
        self.shared.changed.notify_all();
        info!("connection manager closed");

        let handle = self
            .connector
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        // A connector stuck in connect() exits on its own once that returns.
        if let Some(handle) = handle.filter(|h| h.is_finished()) {
            let _ = handle.join();
        }
    }

    fn live_stream(&self) -> Result<(TcpConnection, u64)> {
        let (cloned, generation) = {
            let book = self.shared.lock();
            if book.cancelled {
                return Err(PeerError::Closed);
            }
            match (&book.stream, book.state) {
                (Some(stream), ConnectionState::Ready) => (stream.try_clone(), book.generation),
                _ => return Err(PeerError::NotReady),
            }
        };
        match cloned {
            Ok(stream) => Ok((stream, generation)),
            Err(err) => {
                self.mark_failed(generation, &err.to_string());
                Err(err.into())
            }
        }
    }

    /// Fail the connection of `generation`. Stale generations are ignored.
    fn mark_failed(&self, generation: u64, reason: &str) {
        {
            let mut book = self.shared.lock();
            if book.generation != generation || book.state != ConnectionState::Ready {
                debug!(generation, "ignoring failure of stale connection");
                return;
            }
            if let Some(stream) = book.stream.take() {
                stream.shutdown();
            }
            let endpoint = book
                .endpoint
                .clone()
                .unwrap_or_else(|| Endpoint::new("unknown", 0));
            warn!(%endpoint, generation, reason, "connection lost");
            book.transition(ConnectionEvent::Failed {
                endpoint,
                reason: reason.to_string(),
            });
        }
        self.shared.changed.notify_all();
    }
}

impl FrameLink for ConnectionManager {
    fn try_claim(&self) -> Result<u64> {
        let mut book = self.shared.lock();
        if book.cancelled {
            return Err(PeerError::Closed);
        }
        if book.state != ConnectionState::Ready {
            return Err(PeerError::NotReady);
        }
        if book.in_flight {
            return Err(PeerError::Busy);
        }
        book.in_flight = true;
        Ok(book.generation)
    }

    fn release(&self, generation: u64) {
        let mut book = self.shared.lock();
        if book.generation == generation {
            book.in_flight = false;
        }
    }

    fn send(&self, bytes: &[u8]) -> Result<()> {
        ConnectionManager::send(self, bytes)
    }

    fn receive_exact(&self, len: usize) -> Result<Bytes> {
        ConnectionManager::receive_exact(self, len)
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let book = self.shared.lock();
        f.debug_struct("ConnectionManager")
            .field("state", &book.state)
            .field("endpoint", &book.endpoint)
            .field("generation", &book.generation)
            .field("in_flight", &book.in_flight)
            .finish()
    }
}

fn open(endpoint: &Endpoint, config: &ConnectionConfig) -> Result<TcpConnection> {
    let stream = TcpTransport::connect(endpoint, config.connect_timeout)?;
    stream.set_nodelay(true)?;
    stream.set_read_timeout(Some(config.io_timeout))?;
    stream.set_write_timeout(Some(config.io_timeout))?;
    if let Some(keepalive) = &config.keepalive {
        stream.set_keepalive(keepalive)?;
    }
    Ok(stream)
}

fn run_connector(shared: &Shared, candidates: &[Endpoint], config: &ConnectionConfig) {
    let mut index = 0usize;
    let mut attempt = 0u64;

    loop {
        {
            let mut book = shared.lock();
            while book.state == ConnectionState::Ready && !book.cancelled {
                book = shared
                    .changed
                    .wait(book)
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
            }
            if book.cancelled {
                return;
            }

            if book.state == ConnectionState::Failed {
                let deadline = Instant::now() + config.backoff;
                debug!(backoff_ms = config.backoff.as_millis() as u64, "waiting before reconnect");
                loop {
                    let now = Instant::now();
                    if book.cancelled || now >= deadline {
                        break;
                    }
                    book = shared
                        .changed
                        .wait_timeout(book, deadline - now)
                        .map(|(guard, _)| guard)
                        .unwrap_or_else(|poisoned| poisoned.into_inner().0);
                }
                if book.cancelled {
                    return;
                }
            }

            attempt += 1;
            book.transition(ConnectionEvent::Connecting {
                endpoint: candidates[index].clone(),
                attempt,
            });
        }
        shared.changed.notify_all();

        let endpoint = &candidates[index];
        info!(%endpoint, attempt, "connecting");
        let result = open(endpoint, config);

        let mut book = shared.lock();
        if book.cancelled {
            if let Ok(stream) = result {
                stream.shutdown();
            }
            return;
        }
        match result {
            Ok(stream) => {
                book.generation += 1;
                book.stream = Some(stream);
                book.endpoint = Some(endpoint.clone());
                book.in_flight = false;
                let generation = book.generation;
                info!(%endpoint, generation, "connection ready");
                book.transition(ConnectionEvent::Ready {
                    endpoint: endpoint.clone(),
                    generation,
                });
            }
            Err(err) => {
                warn!(%endpoint, attempt, error = %err, "connect failed");
                book.transition(ConnectionEvent::Failed {
                    endpoint: endpoint.clone(),
                    reason: err.to_string(),
                });
                index = config.retry_policy.next_index(index, candidates.len());
            }
        }
        drop(book);
        shared.changed.notify_all();
    }
}
