//! Sender pipeline: rate governor, normalizer, connection and transmitter
//! owned by one session object.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use depthlink_capture::{
    color_preview, depth_buffer_preview, ColorBuffer, DepthBuffer, Normalizer, RateGovernor,
    SensorCapabilities,
};
use depthlink_frame::{COLOR_HEIGHT, COLOR_WIDTH};
use image::{GrayImage, RgbaImage};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::config::SessionConfig;
use crate::connection::{ConnectionEvent, ConnectionManager, ConnectionState};
use crate::error::{PeerError, Result};
use crate::transmitter::{FrameOutcome, FrameTransmitter, Submission, TransmitStats};

/// What happened to a captured frame handed to [`StreamingSession::submit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameDisposition {
    /// Arrived sooner than the minimum interval after the last admitted frame.
    Throttled,
    /// No ready connection.
    NotReady,
    /// The previous frame is still being transmitted.
    Busy,
    /// The buffers could not be turned into payloads.
    BufferError,
    /// Handed to the transmitter under this sequence number.
    Submitted(u64),
}

/// Session-level counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub admitted: u64,
    pub throttled: u64,
    pub buffer_errors: u64,
    pub transmit: TransmitStats,
}

/// A running sender.
pub struct StreamingSession {
    config: SessionConfig,
    governor: Mutex<RateGovernor>,
    normalizer: Normalizer,
    connection: Arc<ConnectionManager>,
    transmitter: FrameTransmitter<ConnectionManager>,
    buffer_errors: AtomicU64,
}

impl StreamingSession {
    /// Validate `config`, check the device and start connecting.
    pub fn start(config: SessionConfig, capabilities: SensorCapabilities) -> Result<Self> {
        Self::launch(config, capabilities, Vec::new())
    }

    /// Start a session together with a connection event stream that begins
    /// at the first `Connecting` transition.
    pub fn start_observed(
        config: SessionConfig,
        capabilities: SensorCapabilities,
    ) -> Result<(Self, Receiver<ConnectionEvent>)> {
        let (tx, rx) = mpsc::channel();
        let session = Self::launch(config, capabilities, vec![tx])?;
        Ok((session, rx))
    }

    fn launch(
        config: SessionConfig,
        capabilities: SensorCapabilities,
        subscribers: Vec<Sender<ConnectionEvent>>,
    ) -> Result<Self> {
        if !capabilities.scene_depth {
            error!("device does not provide scene depth; streaming unavailable");
            return Err(PeerError::DepthUnsupported);
        }
        config.validate()?;

        let candidates = config.candidates()?;
        info!(
            candidates = candidates.len(),
            first = %candidates[0],
            retry_policy = ?config.retry_policy,
            "starting streaming session"
        );
        let connection = Arc::new(ConnectionManager::spawn(
            candidates,
            config.connection_config(),
            subscribers,
        )?);
        let transmitter = FrameTransmitter::new(Arc::clone(&connection))?;

        Ok(Self {
            governor: Mutex::new(RateGovernor::new(config.min_interval)),
            normalizer: Normalizer::default(),
            connection,
            transmitter,
            buffer_errors: AtomicU64::new(0),
            config,
        })
    }

    /// Offer a captured frame.
    ///
    /// Returns immediately. Frames admitted by the governor are dropped, not
    /// queued, when the connection is unavailable or busy.
    pub fn submit(
        &self,
        timestamp: Duration,
        color: &ColorBuffer<'_>,
        depth: &DepthBuffer<'_>,
    ) -> FrameDisposition {
        let admitted = self
            .governor
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .admit(timestamp);
        if !admitted {
            return FrameDisposition::Throttled;
        }

        // Cheap pre-checks so a frame nobody can send is never copied.
        if !self.connection.is_ready() {
            return FrameDisposition::NotReady;
        }
        if self.connection.is_in_flight() {
            return FrameDisposition::Busy;
        }

        let frame = match self.normalizer.normalize_frame(color, depth) {
            Ok(frame) => frame,
            Err(err) => {
                self.buffer_errors.fetch_add(1, Ordering::Relaxed);
                warn!(error = %err, "skipping frame");
                return FrameDisposition::BufferError;
            }
        };

        match self.transmitter.send_frame(frame.color, frame.depth) {
            Submission::Accepted(sequence) => FrameDisposition::Submitted(sequence),
            Submission::NotReady => FrameDisposition::NotReady,
            Submission::Busy => FrameDisposition::Busy,
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Block until connected, closed or `timeout` elapses.
    pub fn wait_ready(&self, timeout: Duration) -> bool {
        self.connection.wait_ready(timeout)
    }

    pub fn subscribe(&self) -> Receiver<ConnectionEvent> {
        self.connection.subscribe()
    }

    pub fn outcomes(&self) -> Receiver<FrameOutcome> {
        self.transmitter.outcomes()
    }

    pub fn stats(&self) -> SessionStats {
        let governor = self
            .governor
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        SessionStats {
            admitted: governor.admitted(),
            throttled: governor.throttled(),
            buffer_errors: self.buffer_errors.load(Ordering::Relaxed),
            transmit: self.transmitter.stats(),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Stop streaming. Idempotent.
    pub fn close(&self) {
        self.connection.close();
    }

    /// The color frame as it will be sent, for on-device display.
    pub fn color_preview(&self, color: &ColorBuffer<'_>) -> Result<RgbaImage> {
        let payload = self.normalizer.normalize_color(color)?;
        Ok(color_preview(&payload, COLOR_WIDTH, COLOR_HEIGHT)?)
    }

    /// The depth frame as min/max-scaled grayscale.
    pub fn depth_preview(&self, depth: &DepthBuffer<'_>) -> Result<GrayImage> {
        Ok(depth_buffer_preview(depth)?)
    }
}

impl Drop for StreamingSession {
    fn drop(&mut self) {
        // Unblocks the transmit worker before the transmitter joins it.
        self.close();
    }
}

impl std::fmt::Debug for StreamingSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingSession")
            .field("connection", &self.connection)
            .field("min_interval", &self.config.min_interval)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::net::TcpListener;

    use depthlink_capture::PixelFormat;

    use super::*;
    use crate::connection::RetryPolicy;

    fn session_for(listener: &TcpListener) -> StreamingSession {
        let config = SessionConfig {
            hosts: vec![listener.local_addr().expect("local addr").to_string()],
            backoff: Duration::from_millis(50),
            connect_timeout: Duration::from_secs(1),
            io_timeout: Duration::from_secs(2),
            retry_policy: RetryPolicy::Head,
            keepalive: false,
            ..SessionConfig::default()
        };
        StreamingSession::start(config, SensorCapabilities::with_depth()).expect("session starts")
    }

    #[test]
    fn refuses_devices_without_depth() {
        let err = StreamingSession::start(SessionConfig::default(), SensorCapabilities::without_depth())
            .expect_err("start must fail");
        assert!(matches!(err, PeerError::DepthUnsupported));
    }

    #[test]
    fn frames_before_connection_are_not_ready() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("local addr");
        drop(listener);
        let config = SessionConfig {
            hosts: vec![addr.to_string()],
            backoff: Duration::from_secs(30),
            ..SessionConfig::default()
        };
        let session =
            StreamingSession::start(config, SensorCapabilities::with_depth()).expect("session");

        let color = vec![0u8; 4 * 4 * 4];
        let depth = vec![1.0f32; 4];
        let color = ColorBuffer::packed(&color, 4, 4, PixelFormat::Bgra8).expect("color");
        let depth = DepthBuffer::from_samples(&depth, 2, 2).expect("depth");

        assert_eq!(
            session.submit(Duration::ZERO, &color, &depth),
            FrameDisposition::NotReady
        );
        assert_eq!(
            session.submit(Duration::from_millis(10), &color, &depth),
            FrameDisposition::Throttled
        );
        assert_eq!(session.stats().throttled, 1);
    }

    #[test]
    fn streams_one_frame_end_to_end() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let session = session_for(&listener);
        let outcomes = session.outcomes();
        assert!(session.wait_ready(Duration::from_secs(5)));
        let (mut peer, _) = listener.accept().expect("accept");

        let color = vec![0x10u8; 640 * 480 * 4];
        let depth = vec![0.75f32; 8 * 6];
        let color = ColorBuffer::packed(&color, 640, 480, PixelFormat::Bgra8).expect("color");
        let depth = DepthBuffer::from_samples(&depth, 8, 6).expect("depth");

        let receiver = std::thread::spawn(move || {
            let mut lengths = Vec::new();
            for _ in 0..2 {
                let mut len = [0u8; 4];
                peer.read_exact(&mut len).expect("length");
                let len = u32::from_le_bytes(len) as usize;
                let mut payload = vec![0u8; len];
                peer.read_exact(&mut payload).expect("payload");
                peer.write_all(&1u32.to_le_bytes()).expect("ack");
                lengths.push(len);
            }
            lengths
        });

        assert_eq!(
            session.submit(Duration::ZERO, &color, &depth),
            FrameDisposition::Submitted(1)
        );
        let outcome = outcomes
            .recv_timeout(Duration::from_secs(5))
            .expect("outcome");
        assert!(outcome.result.is_ok());
        assert_eq!(
            receiver.join().expect("receiver thread"),
            vec![640 * 480 * 4, 8 * 6 * 4]
        );
        assert_eq!(session.stats().transmit.delivered, 1);
    }

    fn read_payload(peer: &mut std::net::TcpStream) -> usize {
        let mut len = [0u8; 4];
        peer.read_exact(&mut len).expect("length");
        let len = u32::from_le_bytes(len) as usize;
        let mut payload = vec![0u8; len];
        peer.read_exact(&mut payload).expect("payload");
        len
    }

    #[test]
    fn dropped_peer_fails_frame_then_reconnects() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let session = session_for(&listener);
        let events = session.subscribe();
        let outcomes = session.outcomes();
        assert!(session.wait_ready(Duration::from_secs(5)));

        let peer = std::thread::spawn(move || {
            // First connection: take the color payload, then hang up before acking.
            let (mut first, _) = listener.accept().expect("accept");
            read_payload(&mut first);
            drop(first);

            let (mut second, _) = listener.accept().expect("second accept");
            let mut lengths = Vec::new();
            for _ in 0..2 {
                lengths.push(read_payload(&mut second));
                second.write_all(&1u32.to_le_bytes()).expect("ack");
            }
            lengths
        });

        let color = vec![0x10u8; 640 * 480 * 4];
        let depth = vec![0.75f32; 4 * 4];
        let color = ColorBuffer::packed(&color, 640, 480, PixelFormat::Bgra8).expect("color");
        let depth = DepthBuffer::from_samples(&depth, 4, 4).expect("depth");

        assert_eq!(
            session.submit(Duration::ZERO, &color, &depth),
            FrameDisposition::Submitted(1)
        );
        let first = outcomes
            .recv_timeout(Duration::from_secs(5))
            .expect("first outcome");
        let failure = first.result.expect_err("peer hung up mid-frame");
        assert_eq!(failure.stage, crate::transmitter::FrameStage::ColorAck);
        assert!(!failure.is_rejection());

        let failed = std::iter::from_fn(|| events.recv_timeout(Duration::from_secs(5)).ok())
            .any(|e| matches!(e, ConnectionEvent::Failed { .. }));
        assert!(failed, "connection must leave ready");

        assert!(session.wait_ready(Duration::from_secs(5)));
        assert_eq!(
            session.submit(Duration::from_millis(200), &color, &depth),
            FrameDisposition::Submitted(2)
        );
        let second = outcomes
            .recv_timeout(Duration::from_secs(5))
            .expect("second outcome");
        assert!(second.result.is_ok());
        assert_eq!(
            peer.join().expect("peer thread"),
            vec![640 * 480 * 4, 4 * 4 * 4]
        );

        let stats = session.stats();
        assert_eq!(stats.transmit.failed, 1);
        assert_eq!(stats.transmit.delivered, 1);
    }

    #[test]
    fn previews_have_display_geometry() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let session = session_for(&listener);

        let color = vec![0x20u8; 320 * 240 * 4];
        let color = ColorBuffer::packed(&color, 320, 240, PixelFormat::Bgra8).expect("color");
        let img = session.color_preview(&color).expect("color preview");
        assert_eq!(img.dimensions(), (640, 480));

        let depth = vec![1.0f32, 2.0, 3.0, 4.0];
        let depth = DepthBuffer::from_samples(&depth, 2, 2).expect("depth");
        let img = session.depth_preview(&depth).expect("depth preview");
        assert_eq!(img.dimensions(), (2, 2));
    }

    #[test]
    fn observed_start_sees_first_transition() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let config = SessionConfig {
            hosts: vec![addr.to_string()],
            keepalive: false,
            ..SessionConfig::default()
        };
        let (session, events) =
            StreamingSession::start_observed(config, SensorCapabilities::with_depth())
                .expect("session");

        let first = events.recv_timeout(Duration::from_secs(5)).expect("event");
        assert!(matches!(first, ConnectionEvent::Connecting { attempt: 1, .. }));
        let second = events.recv_timeout(Duration::from_secs(5)).expect("event");
        assert!(matches!(second, ConnectionEvent::Ready { generation: 1, .. }));
        session.close();
    }

    #[test]
    fn close_reports_cancelled() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let session = session_for(&listener);
        session.close();
        session.close();
        assert_eq!(session.connection_state(), ConnectionState::Cancelled);
    }
}
