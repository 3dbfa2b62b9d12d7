//! Receiving end of a depthlink stream.
//!
//! Each frame is read as a color payload and a depth payload, each answered
//! with a success acknowledgment once it has been read completely. A payload
//! that fails to arrive is never acknowledged.

use std::net::SocketAddr;
use std::ops::ControlFlow;
use std::time::{Duration, Instant};

use bytes::Bytes;
use depthlink_capture::{color_preview, DepthMap};
use depthlink_frame::{
    color_payload_len, Ack, FrameConfig, FrameError, PayloadReader, PayloadWriter, COLOR_HEIGHT,
    COLOR_WIDTH, DEFAULT_MAX_PAYLOAD,
};
use depthlink_transport::{KeepaliveConfig, TcpConnection, TcpTransport};
use image::RgbaImage;
use tracing::{debug, info, warn};

use crate::error::{PeerError, Result};

/// Receiver settings.
#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    /// Largest payload length accepted. Larger announcements are refused
    /// before any payload byte is read.
    pub max_payload_size: usize,
    /// Per-read/per-write deadline. `None` blocks indefinitely.
    pub io_timeout: Option<Duration>,
    /// Consecutive failed frames tolerated before [`ReceiverSession::run`] gives up.
    pub max_consecutive_errors: u32,
    pub keepalive: Option<KeepaliveConfig>,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            io_timeout: Some(Duration::from_secs(10)),
            max_consecutive_errors: 5,
            keepalive: Some(KeepaliveConfig::default()),
        }
    }
}

impl ReceiverConfig {
    fn frame_config(&self) -> FrameConfig {
        FrameConfig {
            max_payload_size: self.max_payload_size,
            read_timeout: self.io_timeout,
            write_timeout: self.io_timeout,
        }
    }
}

/// One frame as it came off the wire.
#[derive(Debug, Clone)]
pub struct ReceivedFrame {
    pub sequence: u64,
    /// Tightly packed 640×480 BGRA.
    pub color: Bytes,
    /// Raw float32 samples at the sender's depth resolution.
    pub depth: Bytes,
    pub elapsed: Duration,
}

impl ReceivedFrame {
    /// Whether the color payload has canonical size.
    pub fn has_canonical_color(&self) -> bool {
        self.color.len() == color_payload_len()
    }

    /// Decode the color payload as an RGBA image.
    pub fn color_image(&self) -> Result<RgbaImage> {
        Ok(color_preview(&self.color, COLOR_WIDTH, COLOR_HEIGHT)?)
    }

    /// Interpret the depth payload as a `width`×`height` grid.
    pub fn depth_map(&self, width: usize, height: usize) -> Result<DepthMap> {
        Ok(DepthMap::from_payload(&self.depth, width, height)?)
    }

    /// Number of float32 samples in the depth payload.
    pub fn depth_samples(&self) -> usize {
        self.depth.len() / 4
    }
}

/// Listens for a sender.
pub struct FrameReceiver {
    transport: TcpTransport,
    config: ReceiverConfig,
}

impl FrameReceiver {
    /// Bind to `addr`, e.g. `0.0.0.0:9999`.
    pub fn bind(addr: &str, config: ReceiverConfig) -> Result<Self> {
        let transport = TcpTransport::bind(addr)?;
        Ok(Self { transport, config })
    }

    /// Accept the next sender.
    pub fn accept(&self) -> Result<ReceiverSession> {
        let (stream, peer) = self.transport.accept()?;
        if let Some(keepalive) = &self.config.keepalive {
            stream.set_keepalive(keepalive)?;
        }
        stream.set_nodelay(true)?;
        info!(%peer, "sender connected");
        ReceiverSession::new(stream, peer, self.config.clone())
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.transport.local_addr()
    }

    pub fn config(&self) -> &ReceiverConfig {
        &self.config
    }
}

/// A connected sender.
pub struct ReceiverSession {
    reader: PayloadReader<TcpConnection>,
    writer: PayloadWriter<TcpConnection>,
    peer: SocketAddr,
    config: ReceiverConfig,
    frames: u64,
}

impl ReceiverSession {
    fn new(stream: TcpConnection, peer: SocketAddr, config: ReceiverConfig) -> Result<Self> {
        let frame_config = config.frame_config();
        let reader = PayloadReader::with_config_tcp(stream.try_clone()?, frame_config.clone())?;
        let writer = PayloadWriter::with_config_tcp(stream, frame_config)?;
        Ok(Self {
            reader,
            writer,
            peer,
            config,
            frames: 0,
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Frames received so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Receive one frame: color, ack, depth, ack.
    pub fn recv_frame(&mut self) -> Result<ReceivedFrame> {
        let color = self.reader.read_payload()?;
        let started = Instant::now();
        self.writer.send_ack(Ack::Success)?;
        debug!(len = color.len(), "color payload received");

        let depth = self.reader.read_payload()?;
        self.writer.send_ack(Ack::Success)?;
        debug!(len = depth.len(), "depth payload received");

        self.frames += 1;
        Ok(ReceivedFrame {
            sequence: self.frames,
            color,
            depth,
            elapsed: started.elapsed(),
        })
    }

    /// Receive frames until the sender disconnects, `handler` breaks, or too
    /// many frames in a row fail. Returns the number of frames handled.
    pub fn run<F>(&mut self, mut handler: F) -> Result<u64>
    where
        F: FnMut(ReceivedFrame) -> ControlFlow<()>,
    {
        let mut handled = 0u64;
        let mut consecutive_errors = 0u32;

        loop {
            match self.recv_frame() {
                Ok(frame) => {
                    consecutive_errors = 0;
                    handled += 1;
                    if handler(frame).is_break() {
                        return Ok(handled);
                    }
                }
                Err(PeerError::Frame(FrameError::ConnectionClosed)) => {
                    info!(peer = %self.peer, frames = handled, "sender disconnected");
                    return Ok(handled);
                }
                Err(err) => {
                    consecutive_errors += 1;
                    warn!(
                        peer = %self.peer,
                        error = %err,
                        consecutive_errors,
                        "frame receive failed"
                    );
                    if consecutive_errors >= self.config.max_consecutive_errors {
                        return Err(PeerError::TooManyErrors(consecutive_errors));
                    }
                }
            }
        }
    }

    /// Close both directions of the connection.
    pub fn shutdown(&self) {
        self.writer.get_ref().shutdown();
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use bytes::BytesMut;
    use depthlink_frame::{decode_ack, encode_payload};
    use depthlink_transport::Endpoint;

    use super::*;

    fn loopback(config: ReceiverConfig) -> (FrameReceiver, Endpoint) {
        let receiver = FrameReceiver::bind("127.0.0.1:0", config).expect("receiver should bind");
        let endpoint = Endpoint::from(receiver.local_addr());
        (receiver, endpoint)
    }

    fn connect(endpoint: &Endpoint) -> TcpConnection {
        TcpTransport::connect(endpoint, Duration::from_secs(2)).expect("sender should connect")
    }

    fn send_payload(stream: &mut TcpConnection, payload: &[u8]) {
        let mut wire = BytesMut::new();
        encode_payload(payload, &mut wire).expect("encode");
        std::io::Write::write_all(stream, &wire).expect("write payload");
    }

    fn read_ack(stream: &mut TcpConnection) -> Ack {
        let mut raw = [0u8; 4];
        std::io::Read::read_exact(stream, &mut raw).expect("read ack");
        decode_ack(&raw).expect("decode ack")
    }

    #[test]
    fn receives_and_acks_each_payload() {
        let (receiver, endpoint) = loopback(ReceiverConfig::default());
        let server = thread::spawn(move || {
            let mut session = receiver.accept().expect("accept");
            session.recv_frame().expect("frame")
        });

        let mut sender = connect(&endpoint);
        let depth: Vec<u8> = [1.5f32, 2.5].iter().flat_map(|v| v.to_le_bytes()).collect();
        send_payload(&mut sender, b"color");
        assert_eq!(read_ack(&mut sender), Ack::Success);
        send_payload(&mut sender, &depth);
        assert_eq!(read_ack(&mut sender), Ack::Success);

        let frame = server.join().expect("server thread");
        assert_eq!(frame.sequence, 1);
        assert_eq!(frame.color.as_ref(), b"color");
        assert!(!frame.has_canonical_color());
        let map = frame.depth_map(2, 1).expect("depth map");
        assert_eq!(map.sample(1, 0), Some(2.5));
    }

    #[test]
    fn oversized_announcement_is_not_acked() {
        let config = ReceiverConfig {
            max_payload_size: 8,
            max_consecutive_errors: 1,
            ..ReceiverConfig::default()
        };
        let (receiver, endpoint) = loopback(config);
        let server = thread::spawn(move || {
            let mut session = receiver.accept().expect("accept");
            session.run(|_| ControlFlow::Continue(()))
        });

        let mut sender = connect(&endpoint);
        std::io::Write::write_all(&mut sender, &1024u32.to_le_bytes()).expect("write length");

        let result = server.join().expect("server thread");
        assert!(matches!(result, Err(PeerError::TooManyErrors(1))));
    }

    #[test]
    fn run_stops_cleanly_when_sender_leaves() {
        let (receiver, endpoint) = loopback(ReceiverConfig::default());
        let server = thread::spawn(move || {
            let mut session = receiver.accept().expect("accept");
            let mut sizes = Vec::new();
            let handled = session
                .run(|frame| {
                    sizes.push((frame.color.len(), frame.depth.len()));
                    ControlFlow::Continue(())
                })
                .expect("run");
            (handled, sizes)
        });

        let mut sender = connect(&endpoint);
        for _ in 0..3 {
            send_payload(&mut sender, &[0u8; 16]);
            assert_eq!(read_ack(&mut sender), Ack::Success);
            send_payload(&mut sender, &[0u8; 8]);
            assert_eq!(read_ack(&mut sender), Ack::Success);
        }
        drop(sender);

        let (handled, sizes) = server.join().expect("server thread");
        assert_eq!(handled, 3);
        assert_eq!(sizes, vec![(16, 8); 3]);
    }

    #[test]
    fn handler_can_stop_the_loop() {
        let (receiver, endpoint) = loopback(ReceiverConfig::default());
        let server = thread::spawn(move || {
            let mut session = receiver.accept().expect("accept");
            session.run(|_| ControlFlow::Break(())).expect("run")
        });

        let mut sender = connect(&endpoint);
        send_payload(&mut sender, b"c");
        read_ack(&mut sender);
        send_payload(&mut sender, b"d");
        read_ack(&mut sender);

        assert_eq!(server.join().expect("server thread"), 1);
    }

    #[test]
    fn timeouts_count_against_error_budget() {
        let config = ReceiverConfig {
            io_timeout: Some(Duration::from_millis(30)),
            max_consecutive_errors: 3,
            ..ReceiverConfig::default()
        };
        let (receiver, endpoint) = loopback(config);
        let server = thread::spawn(move || {
            let mut session = receiver.accept().expect("accept");
            session.run(|_| ControlFlow::Continue(()))
        });

        let _idle_sender = connect(&endpoint);
        let result = server.join().expect("server thread");
        assert!(matches!(result, Err(PeerError::TooManyErrors(3))));
    }
}
