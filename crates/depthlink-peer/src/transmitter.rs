//! The per-frame send protocol.
//!
//! One frame is six strictly ordered steps: color length, color bytes, color
//! ack, depth length, depth bytes, depth ack. A step starts only after the
//! previous one succeeded. The first failure ends the frame; nothing is
//! retried. At most one frame holds the link at a time.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bytes::Bytes;
use depthlink_frame::{decode_ack, encode_length_prefix, Ack, PayloadKind, ACK_SIZE};
use serde::Serialize;
use tracing::{debug, trace, warn};

use crate::error::{PeerError, Result};

/// A byte link a frame can be transmitted over.
///
/// Claiming marks the link busy until the claim is released. Claims carry the
/// connection generation they were taken on so a release after a reconnect
/// does not clear a newer claim.
pub trait FrameLink: Send + Sync {
    /// Claim the link for one frame.
    ///
    /// Fails with [`PeerError::NotReady`], [`PeerError::Busy`] or
    /// [`PeerError::Closed`].
    fn try_claim(&self) -> Result<u64>;

    /// Release a claim taken on `generation`.
    fn release(&self, generation: u64);

    fn send(&self, bytes: &[u8]) -> Result<()>;

    fn receive_exact(&self, len: usize) -> Result<Bytes>;
}

/// One step of the frame protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameStage {
    ColorLength,
    ColorPayload,
    ColorAck,
    DepthLength,
    DepthPayload,
    DepthAck,
}

impl FrameStage {
    pub const ORDER: [FrameStage; 6] = [
        FrameStage::ColorLength,
        FrameStage::ColorPayload,
        FrameStage::ColorAck,
        FrameStage::DepthLength,
        FrameStage::DepthPayload,
        FrameStage::DepthAck,
    ];

    pub fn payload(self) -> PayloadKind {
        match self {
            FrameStage::ColorLength | FrameStage::ColorPayload | FrameStage::ColorAck => {
                PayloadKind::Color
            }
            FrameStage::DepthLength | FrameStage::DepthPayload | FrameStage::DepthAck => {
                PayloadKind::Depth
            }
        }
    }

    pub fn next(self) -> Option<FrameStage> {
        match self {
            FrameStage::ColorLength => Some(FrameStage::ColorPayload),
            FrameStage::ColorPayload => Some(FrameStage::ColorAck),
            FrameStage::ColorAck => Some(FrameStage::DepthLength),
            FrameStage::DepthLength => Some(FrameStage::DepthPayload),
            FrameStage::DepthPayload => Some(FrameStage::DepthAck),
            FrameStage::DepthAck => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            FrameStage::ColorLength => "color_length",
            FrameStage::ColorPayload => "color_payload",
            FrameStage::ColorAck => "color_ack",
            FrameStage::DepthLength => "depth_length",
            FrameStage::DepthPayload => "depth_payload",
            FrameStage::DepthAck => "depth_ack",
        }
    }
}

impl fmt::Display for FrameStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Why a frame stopped.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FailureReason {
    /// The peer read the payload and answered with a failure ack.
    #[error("peer rejected payload (ack {0})")]
    Rejected(u32),
    /// The link failed; the connection is no longer usable.
    #[error("{0}")]
    Link(String),
}

/// A frame that did not complete, and where it stopped.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("frame failed at {stage}: {reason}")]
pub struct FrameFailure {
    pub stage: FrameStage,
    pub reason: FailureReason,
}

impl FrameFailure {
    fn new(stage: FrameStage, err: PeerError) -> Self {
        let reason = match err {
            PeerError::Rejected(value) => FailureReason::Rejected(value),
            other => FailureReason::Link(other.to_string()),
        };
        Self { stage, reason }
    }

    pub fn is_rejection(&self) -> bool {
        matches!(self.reason, FailureReason::Rejected(_))
    }
}

/// A delivered frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameReport {
    pub color_bytes: usize,
    pub depth_bytes: usize,
    pub elapsed: Duration,
}

/// Terminal result of one accepted frame.
#[derive(Debug, Clone)]
pub struct FrameOutcome {
    pub sequence: u64,
    pub result: std::result::Result<FrameReport, FrameFailure>,
}

/// Answer to [`FrameTransmitter::send_frame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    /// Handed to the transmit worker under this sequence number.
    Accepted(u64),
    /// No ready connection.
    NotReady,
    /// Another frame is still in flight.
    Busy,
}

/// Transmitter counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TransmitStats {
    pub submitted: u64,
    pub delivered: u64,
    pub failed: u64,
    pub rejected_busy: u64,
    pub rejected_not_ready: u64,
}

#[derive(Default)]
struct Counters {
    submitted: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
    rejected_busy: AtomicU64,
    rejected_not_ready: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> TransmitStats {
        TransmitStats {
            submitted: self.submitted.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            rejected_busy: self.rejected_busy.load(Ordering::Relaxed),
            rejected_not_ready: self.rejected_not_ready.load(Ordering::Relaxed),
        }
    }
}

/// Run the six-step protocol for one frame over `link`.
pub fn transmit_frame<L: FrameLink + ?Sized>(
    link: &L,
    color: &[u8],
    depth: &[u8],
) -> std::result::Result<FrameReport, FrameFailure> {
    let started = Instant::now();
    let mut stage = FrameStage::ColorLength;

    loop {
        let payload = match stage.payload() {
            PayloadKind::Color => color,
            PayloadKind::Depth => depth,
        };
        trace!(%stage, len = payload.len(), "frame step");

        let step = match stage {
            FrameStage::ColorLength | FrameStage::DepthLength => encode_length_prefix(payload.len())
                .map_err(PeerError::from)
                .and_then(|prefix| link.send(&prefix)),
            FrameStage::ColorPayload | FrameStage::DepthPayload => link.send(payload),
            FrameStage::ColorAck | FrameStage::DepthAck => receive_ack(link),
        };
        if let Err(err) = step {
            return Err(FrameFailure::new(stage, err));
        }

        match stage.next() {
            Some(next) => stage = next,
            None => break,
        }
    }

    Ok(FrameReport {
        color_bytes: color.len(),
        depth_bytes: depth.len(),
        elapsed: started.elapsed(),
    })
}

fn receive_ack<L: FrameLink + ?Sized>(link: &L) -> Result<()> {
    let raw = link.receive_exact(ACK_SIZE)?;
    match decode_ack(&raw)? {
        Ack::Success => Ok(()),
        Ack::Rejected(value) => Err(PeerError::Rejected(value)),
    }
}

/// Releases a link claim when dropped.
struct Claim<L: FrameLink + ?Sized> {
    link: Arc<L>,
    generation: u64,
}

impl<L: FrameLink + ?Sized> Drop for Claim<L> {
    fn drop(&mut self) {
        self.link.release(self.generation);
    }
}

struct Job<L: FrameLink + ?Sized> {
    sequence: u64,
    color: Bytes,
    depth: Bytes,
    claim: Claim<L>,
}

type Subscribers = Arc<Mutex<Vec<Sender<FrameOutcome>>>>;

/// Hands frames to a dedicated worker thread that runs the protocol.
pub struct FrameTransmitter<L: FrameLink + ?Sized + 'static> {
    link: Arc<L>,
    jobs: Option<SyncSender<Job<L>>>,
    worker: Option<JoinHandle<()>>,
    subscribers: Subscribers,
    counters: Arc<Counters>,
    next_sequence: AtomicU64,
}

impl<L: FrameLink + ?Sized + 'static> FrameTransmitter<L> {
    pub fn new(link: Arc<L>) -> Result<Self> {
        let (tx, rx) = mpsc::sync_channel::<Job<L>>(1);
        let subscribers: Subscribers = Arc::default();
        let counters = Arc::new(Counters::default());

        let worker_subscribers = Arc::clone(&subscribers);
        let worker_counters = Arc::clone(&counters);
        let worker = thread::Builder::new()
            .name("depthlink-transmit".into())
            .spawn(move || {
                for job in rx {
                    run_job(job, &worker_counters, &worker_subscribers);
                }
            })
            .map_err(depthlink_transport::TransportError::Io)?;

        Ok(Self {
            link,
            jobs: Some(tx),
            worker: Some(worker),
            subscribers,
            counters,
            next_sequence: AtomicU64::new(1),
        })
    }

    /// Submit a frame without waiting for it to be transmitted.
    ///
    /// The readiness check and the in-flight claim happen atomically. The
    /// terminal result arrives on every [`outcomes`](Self::outcomes) receiver.
    pub fn send_frame(&self, color: Bytes, depth: Bytes) -> Submission {
        let generation = match self.link.try_claim() {
            Ok(generation) => generation,
            Err(PeerError::Busy) => {
                self.counters.rejected_busy.fetch_add(1, Ordering::Relaxed);
                return Submission::Busy;
            }
            Err(_) => {
                self.counters
                    .rejected_not_ready
                    .fetch_add(1, Ordering::Relaxed);
                return Submission::NotReady;
            }
        };
        let claim = Claim {
            link: Arc::clone(&self.link),
            generation,
        };

        let Some(jobs) = &self.jobs else {
            self.counters
                .rejected_not_ready
                .fetch_add(1, Ordering::Relaxed);
            return Submission::NotReady;
        };

        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
        let job = Job {
            sequence,
            color,
            depth,
            claim,
        };
        match jobs.try_send(job) {
            Ok(()) => {
                self.counters.submitted.fetch_add(1, Ordering::Relaxed);
                debug!(sequence, "frame accepted");
                Submission::Accepted(sequence)
            }
            Err(TrySendError::Full(_)) => {
                self.counters.rejected_busy.fetch_add(1, Ordering::Relaxed);
                Submission::Busy
            }
            Err(TrySendError::Disconnected(_)) => {
                self.counters
                    .rejected_not_ready
                    .fetch_add(1, Ordering::Relaxed);
                Submission::NotReady
            }
        }
    }

    /// Receive the outcome of every frame accepted from now on.
    pub fn outcomes(&self) -> Receiver<FrameOutcome> {
        let (tx, rx) = mpsc::channel();
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(tx);
        rx
    }

    pub fn stats(&self) -> TransmitStats {
        self.counters.snapshot()
    }

    pub fn link(&self) -> &Arc<L> {
        &self.link
    }
}

impl<L: FrameLink + ?Sized + 'static> Drop for FrameTransmitter<L> {
    fn drop(&mut self) {
        self.jobs.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("transmit worker panicked");
            }
        }
    }
}

fn run_job<L: FrameLink + ?Sized>(job: Job<L>, counters: &Counters, subscribers: &Subscribers) {
    let Job {
        sequence,
        color,
        depth,
        claim,
    } = job;

    let result = transmit_frame(claim.link.as_ref(), &color, &depth);
    // Clear the in-flight flag before anyone hears about the outcome.
    drop(claim);

    match &result {
        Ok(report) => {
            counters.delivered.fetch_add(1, Ordering::Relaxed);
            debug!(
                sequence,
                elapsed_ms = report.elapsed.as_millis() as u64,
                "frame delivered"
            );
        }
        Err(failure) => {
            counters.failed.fetch_add(1, Ordering::Relaxed);
            warn!(sequence, stage = %failure.stage, reason = %failure.reason, "frame dropped");
        }
    }

    let outcome = FrameOutcome { sequence, result };
    subscribers
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .retain(|tx| tx.send(outcome.clone()).is_ok());
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::sync::Condvar;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Op {
        Send(Vec<u8>),
        Receive(usize),
    }

    /// Records link traffic and answers reads from a script.
    #[derive(Default)]
    struct ScriptedLink {
        ops: Mutex<Vec<Op>>,
        replies: Mutex<VecDeque<Result<Bytes>>>,
        ready: AtomicBool,
        in_flight: AtomicBool,
        gate: Option<(Mutex<bool>, Condvar)>,
        /// Zero-based index of the send that fails with a broken pipe.
        fail_send: Option<usize>,
        sends: AtomicUsize,
    }

    impl ScriptedLink {
        fn ready_with(replies: Vec<Result<Bytes>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                ready: AtomicBool::new(true),
                ..Self::default()
            }
        }

        fn gated(replies: Vec<Result<Bytes>>) -> Self {
            Self {
                gate: Some((Mutex::new(false), Condvar::new())),
                ..Self::ready_with(replies)
            }
        }

        fn failing_send(n: usize, replies: Vec<Result<Bytes>>) -> Self {
            Self {
                fail_send: Some(n),
                ..Self::ready_with(replies)
            }
        }

        fn open_gate(&self) {
            if let Some((open, cv)) = &self.gate {
                *open.lock().unwrap() = true;
                cv.notify_all();
            }
        }

        fn ops(&self) -> Vec<Op> {
            self.ops.lock().unwrap().clone()
        }
    }

    impl FrameLink for ScriptedLink {
        fn try_claim(&self) -> Result<u64> {
            if !self.ready.load(Ordering::SeqCst) {
                return Err(PeerError::NotReady);
            }
            if self.in_flight.swap(true, Ordering::SeqCst) {
                return Err(PeerError::Busy);
            }
            Ok(1)
        }

        fn release(&self, _generation: u64) {
            self.in_flight.store(false, Ordering::SeqCst);
        }

        fn send(&self, bytes: &[u8]) -> Result<()> {
            if let Some((open, cv)) = &self.gate {
                let mut open = open.lock().unwrap();
                while !*open {
                    open = cv.wait(open).unwrap();
                }
            }
            let n = self.sends.fetch_add(1, Ordering::SeqCst);
            if self.fail_send == Some(n) {
                let err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "peer went away");
                return Err(depthlink_transport::TransportError::Io(err).into());
            }
            self.ops.lock().unwrap().push(Op::Send(bytes.to_vec()));
            Ok(())
        }

        fn receive_exact(&self, len: usize) -> Result<Bytes> {
            self.ops.lock().unwrap().push(Op::Receive(len));
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(PeerError::NotReady))
        }
    }

    fn ack(value: u32) -> Result<Bytes> {
        Ok(Bytes::copy_from_slice(&value.to_le_bytes()))
    }

    fn outcome(rx: &Receiver<FrameOutcome>) -> FrameOutcome {
        rx.recv_timeout(Duration::from_secs(5))
            .expect("outcome should arrive")
    }

    #[test]
    fn stages_run_in_wire_order() {
        let mut stage = FrameStage::ColorLength;
        let mut seen = vec![stage];
        while let Some(next) = stage.next() {
            seen.push(next);
            stage = next;
        }
        assert_eq!(seen, FrameStage::ORDER);
        assert_eq!(FrameStage::ColorAck.payload(), PayloadKind::Color);
        assert_eq!(FrameStage::DepthLength.payload(), PayloadKind::Depth);
    }

    #[test]
    fn color_goes_before_depth() {
        let link = ScriptedLink::ready_with(vec![ack(1), ack(1)]);
        let report = transmit_frame(&link, b"colorbytes", b"dep").expect("frame delivered");
        assert_eq!(report.color_bytes, 10);
        assert_eq!(report.depth_bytes, 3);

        assert_eq!(
            link.ops(),
            vec![
                Op::Send(vec![10, 0, 0, 0]),
                Op::Send(b"colorbytes".to_vec()),
                Op::Receive(4),
                Op::Send(vec![3, 0, 0, 0]),
                Op::Send(b"dep".to_vec()),
                Op::Receive(4),
            ]
        );
    }

    #[test]
    fn bad_color_ack_stops_before_depth() {
        let link = ScriptedLink::ready_with(vec![ack(0)]);
        let failure = transmit_frame(&link, b"c", b"d").expect_err("frame must fail");

        assert_eq!(failure.stage, FrameStage::ColorAck);
        assert_eq!(failure.reason, FailureReason::Rejected(0));
        assert!(failure.is_rejection());
        assert!(!link.ops().iter().any(|op| *op == Op::Send(b"d".to_vec())));
        assert_eq!(link.ops().len(), 3);
    }

    #[test]
    fn bad_depth_ack_fails_frame() {
        let link = ScriptedLink::ready_with(vec![ack(1), ack(7)]);
        let failure = transmit_frame(&link, b"c", b"d").expect_err("frame must fail");
        assert_eq!(failure.stage, FrameStage::DepthAck);
        assert_eq!(failure.reason, FailureReason::Rejected(7));
    }

    #[test]
    fn short_ack_is_link_failure() {
        let link = ScriptedLink::ready_with(vec![Ok(Bytes::from_static(&[1, 0]))]);
        let failure = transmit_frame(&link, b"c", b"d").expect_err("frame must fail");
        assert_eq!(failure.stage, FrameStage::ColorAck);
        assert!(!failure.is_rejection());
    }

    #[test]
    fn send_failure_aborts_remaining_steps() {
        let cases = [
            (0, FrameStage::ColorLength, 0),
            (1, FrameStage::ColorPayload, 1),
            (2, FrameStage::DepthLength, 3),
            (3, FrameStage::DepthPayload, 4),
        ];
        for (fail_at, stage, ops_before) in cases {
            let link = ScriptedLink::failing_send(fail_at, vec![ack(1), ack(1)]);
            let failure = transmit_frame(&link, b"c", b"d").expect_err("frame must fail");

            assert_eq!(failure.stage, stage);
            assert!(matches!(failure.reason, FailureReason::Link(_)));
            assert!(!failure.is_rejection());
            assert_eq!(link.ops().len(), ops_before, "no steps after {stage}");
        }
    }

    #[test]
    fn send_failure_releases_claim_and_reports_stage() {
        let link = Arc::new(ScriptedLink::failing_send(1, vec![ack(1), ack(1)]));
        let tx = FrameTransmitter::new(Arc::clone(&link)).expect("transmitter");
        let outcomes = tx.outcomes();

        assert_eq!(
            tx.send_frame(Bytes::from_static(b"c"), Bytes::from_static(b"d")),
            Submission::Accepted(1)
        );
        let failed = outcome(&outcomes);
        let failure = failed.result.expect_err("frame must fail");
        assert_eq!(failure.stage, FrameStage::ColorPayload);
        assert!(!link.in_flight.load(Ordering::SeqCst));
        assert!(!link.ops().iter().any(|op| matches!(op, Op::Receive(_))));

        // The link is usable for the next frame once the claim is gone.
        assert_eq!(
            tx.send_frame(Bytes::from_static(b"c"), Bytes::from_static(b"d")),
            Submission::Accepted(2)
        );
        assert!(outcome(&outcomes).result.is_ok());
        assert_eq!(tx.stats().failed, 1);
        assert_eq!(tx.stats().delivered, 1);
    }

    #[test]
    fn in_flight_cleared_after_each_outcome() {
        let link = Arc::new(ScriptedLink::ready_with(vec![ack(1), ack(1), ack(0)]));
        let tx = FrameTransmitter::new(Arc::clone(&link)).expect("transmitter");
        let outcomes = tx.outcomes();
        assert!(!link.in_flight.load(Ordering::SeqCst));

        assert_eq!(
            tx.send_frame(Bytes::from_static(b"c"), Bytes::from_static(b"d")),
            Submission::Accepted(1)
        );
        let first = outcome(&outcomes);
        assert!(first.result.is_ok());
        assert!(!link.in_flight.load(Ordering::SeqCst));

        assert_eq!(
            tx.send_frame(Bytes::from_static(b"c"), Bytes::from_static(b"d")),
            Submission::Accepted(2)
        );
        let second = outcome(&outcomes);
        assert_eq!(second.sequence, 2);
        assert!(second.result.is_err());
        assert!(!link.in_flight.load(Ordering::SeqCst));

        let stats = tx.stats();
        assert_eq!(stats.submitted, 2);
        assert_eq!(stats.delivered, 1);
        assert_eq!(stats.failed, 1);
    }

    #[test]
    fn second_frame_rejected_while_first_in_flight() {
        let link = Arc::new(ScriptedLink::gated(vec![ack(1), ack(1)]));
        let tx = FrameTransmitter::new(Arc::clone(&link)).expect("transmitter");
        let outcomes = tx.outcomes();

        assert!(matches!(
            tx.send_frame(Bytes::from_static(b"a"), Bytes::from_static(b"b")),
            Submission::Accepted(_)
        ));
        assert_eq!(
            tx.send_frame(Bytes::from_static(b"x"), Bytes::from_static(b"y")),
            Submission::Busy
        );

        link.open_gate();
        assert!(outcome(&outcomes).result.is_ok());
        assert_eq!(tx.stats().rejected_busy, 1);
        assert!(!link.ops().contains(&Op::Send(b"x".to_vec())));
    }

    #[test]
    fn not_ready_link_rejects_without_io() {
        let link = Arc::new(ScriptedLink::default());
        let tx = FrameTransmitter::new(Arc::clone(&link)).expect("transmitter");

        assert_eq!(
            tx.send_frame(Bytes::from_static(b"c"), Bytes::from_static(b"d")),
            Submission::NotReady
        );
        assert!(link.ops().is_empty());
        assert_eq!(tx.stats().rejected_not_ready, 1);
    }
}
