use std::ffi::c_void;
use std::os::raw::c_char;
use std::sync::mpsc::Receiver;
use std::sync::Mutex;

use depthlink_peer::{
    ConnectionEvent, ConnectionState, FailureReason, FrameOutcome, FrameStage, StreamingSession,
};

#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DlResult {
    Ok = 0,
    InvalidArgument = 1,
    TransportError = 2,
    FrameError = 3,
    BufferError = 4,
    NotReady = 5,
    Busy = 6,
    Throttled = 7,
    DepthUnsupported = 8,
    Closed = 9,
    Rejected = 10,
    /// Nothing queued; not an error.
    Empty = 11,
    Internal = 99,
}

#[allow(dead_code)]
pub const DL_OK: DlResult = DlResult::Ok;
#[allow(dead_code)]
pub const DL_ERR_INVALID_ARGUMENT: DlResult = DlResult::InvalidArgument;
#[allow(dead_code)]
pub const DL_ERR_TRANSPORT: DlResult = DlResult::TransportError;
#[allow(dead_code)]
pub const DL_ERR_FRAME: DlResult = DlResult::FrameError;
#[allow(dead_code)]
pub const DL_ERR_BUFFER: DlResult = DlResult::BufferError;
#[allow(dead_code)]
pub const DL_ERR_NOT_READY: DlResult = DlResult::NotReady;
#[allow(dead_code)]
pub const DL_ERR_BUSY: DlResult = DlResult::Busy;
#[allow(dead_code)]
pub const DL_ERR_THROTTLED: DlResult = DlResult::Throttled;
#[allow(dead_code)]
pub const DL_ERR_DEPTH_UNSUPPORTED: DlResult = DlResult::DepthUnsupported;
#[allow(dead_code)]
pub const DL_ERR_CLOSED: DlResult = DlResult::Closed;
#[allow(dead_code)]
pub const DL_ERR_REJECTED: DlResult = DlResult::Rejected;
#[allow(dead_code)]
pub const DL_EMPTY: DlResult = DlResult::Empty;
#[allow(dead_code)]
pub const DL_ERR_INTERNAL: DlResult = DlResult::Internal;

#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DlConnectionState {
    Idle = 0,
    Connecting = 1,
    Ready = 2,
    Failed = 3,
    Cancelled = 4,
}

impl From<ConnectionState> for DlConnectionState {
    fn from(state: ConnectionState) -> Self {
        match state {
            ConnectionState::Idle => DlConnectionState::Idle,
            ConnectionState::Connecting => DlConnectionState::Connecting,
            ConnectionState::Ready => DlConnectionState::Ready,
            ConnectionState::Failed => DlConnectionState::Failed,
            ConnectionState::Cancelled => DlConnectionState::Cancelled,
        }
    }
}

/// Capacity of the inline text fields, including the NUL terminator.
pub const DL_TEXT_LEN: usize = 128;

/// Copy `text` into a fixed C buffer, truncated on a character boundary and
/// always NUL-terminated.
pub(crate) fn copy_text(dst: &mut [c_char], text: &str) {
    let mut end = text.len().min(dst.len().saturating_sub(1));
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    for (slot, byte) in dst.iter_mut().zip(text[..end].bytes()) {
        *slot = byte as c_char;
    }
    if let Some(slot) = dst.get_mut(end) {
        *slot = 0;
    }
}

/// One connection state transition.
///
/// `attempt` is set for `Connecting`, `generation` for `Ready` and `reason`
/// for `Failed`. `endpoint` is empty for `Cancelled`.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct DlConnectionEvent {
    pub state: DlConnectionState,
    pub attempt: u64,
    pub generation: u64,
    pub endpoint: [c_char; DL_TEXT_LEN],
    pub reason: [c_char; DL_TEXT_LEN],
}

impl Default for DlConnectionEvent {
    fn default() -> Self {
        Self {
            state: DlConnectionState::Idle,
            attempt: 0,
            generation: 0,
            endpoint: [0; DL_TEXT_LEN],
            reason: [0; DL_TEXT_LEN],
        }
    }
}

impl From<&ConnectionEvent> for DlConnectionEvent {
    fn from(event: &ConnectionEvent) -> Self {
        let mut out = Self {
            state: event.state().into(),
            ..Self::default()
        };
        match event {
            ConnectionEvent::Connecting { endpoint, attempt } => {
                out.attempt = *attempt;
                copy_text(&mut out.endpoint, &endpoint.to_string());
            }
            ConnectionEvent::Ready {
                endpoint,
                generation,
            } => {
                out.generation = *generation;
                copy_text(&mut out.endpoint, &endpoint.to_string());
            }
            ConnectionEvent::Failed { endpoint, reason } => {
                copy_text(&mut out.endpoint, &endpoint.to_string());
                copy_text(&mut out.reason, reason);
            }
            ConnectionEvent::Cancelled => {}
        }
        out
    }
}

#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DlFrameStage {
    None = 0,
    ColorLength = 1,
    ColorPayload = 2,
    ColorAck = 3,
    DepthLength = 4,
    DepthPayload = 5,
    DepthAck = 6,
}

impl From<FrameStage> for DlFrameStage {
    fn from(stage: FrameStage) -> Self {
        match stage {
            FrameStage::ColorLength => DlFrameStage::ColorLength,
            FrameStage::ColorPayload => DlFrameStage::ColorPayload,
            FrameStage::ColorAck => DlFrameStage::ColorAck,
            FrameStage::DepthLength => DlFrameStage::DepthLength,
            FrameStage::DepthPayload => DlFrameStage::DepthPayload,
            FrameStage::DepthAck => DlFrameStage::DepthAck,
        }
    }
}

/// Terminal result of one submitted frame.
///
/// A delivered frame has `failed_stage == None` and its byte counts set. A
/// failed one names the stage it stopped at; `rejected` and `ack` describe a
/// failure acknowledgment, otherwise `reason` holds the link error.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct DlFrameOutcome {
    pub sequence: u64,
    pub delivered: bool,
    pub failed_stage: DlFrameStage,
    pub rejected: bool,
    pub ack: u32,
    pub color_bytes: u64,
    pub depth_bytes: u64,
    pub elapsed_us: u64,
    pub reason: [c_char; DL_TEXT_LEN],
}

impl Default for DlFrameOutcome {
    fn default() -> Self {
        Self {
            sequence: 0,
            delivered: false,
            failed_stage: DlFrameStage::None,
            rejected: false,
            ack: 0,
            color_bytes: 0,
            depth_bytes: 0,
            elapsed_us: 0,
            reason: [0; DL_TEXT_LEN],
        }
    }
}

impl From<&FrameOutcome> for DlFrameOutcome {
    fn from(outcome: &FrameOutcome) -> Self {
        let mut out = Self {
            sequence: outcome.sequence,
            ..Self::default()
        };
        match &outcome.result {
            Ok(report) => {
                out.delivered = true;
                out.color_bytes = report.color_bytes as u64;
                out.depth_bytes = report.depth_bytes as u64;
                out.elapsed_us = u64::try_from(report.elapsed.as_micros()).unwrap_or(u64::MAX);
            }
            Err(failure) => {
                out.failed_stage = failure.stage.into();
                if let FailureReason::Rejected(value) = failure.reason {
                    out.rejected = true;
                    out.ack = value;
                }
                copy_text(&mut out.reason, &failure.reason.to_string());
            }
        }
        out
    }
}

/// A locked host color buffer. `pixel_format` is the platform FourCC.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct DlColorBuffer {
    pub data: *const u8,
    pub len: usize,
    pub width: u32,
    pub height: u32,
    pub bytes_per_row: u32,
    pub pixel_format: u32,
}

/// A locked host depth buffer of float32 samples.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct DlDepthBuffer {
    pub data: *const u8,
    pub len: usize,
    pub width: u32,
    pub height: u32,
    pub bytes_per_row: u32,
}

/// An image allocated by this library. Release with `dl_image_free`.
#[repr(C)]
#[derive(Debug)]
pub struct DlImage {
    pub data: *mut u8,
    pub len: usize,
    pub width: u32,
    pub height: u32,
    pub channels: u32,
}

impl Default for DlImage {
    fn default() -> Self {
        Self {
            data: std::ptr::null_mut(),
            len: 0,
            width: 0,
            height: 0,
            channels: 0,
        }
    }
}

pub type DlSessionHandle = *mut c_void;

pub(crate) struct SessionHandle {
    pub(crate) session: StreamingSession,
    pub(crate) events: Mutex<Receiver<ConnectionEvent>>,
    pub(crate) outcomes: Mutex<Receiver<FrameOutcome>>,
}
