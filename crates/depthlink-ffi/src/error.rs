use std::cell::RefCell;
use std::ffi::CString;
use std::os::raw::c_char;

use depthlink_capture::CaptureError;
use depthlink_peer::PeerError;

use crate::types::DlResult;

thread_local! {
    static LAST_ERROR: RefCell<CString> = RefCell::new(CString::default());
}

pub(crate) fn clear_error_state() {
    LAST_ERROR.with(|state| {
        *state.borrow_mut() = CString::default();
    });
}

pub(crate) fn set_error_message(message: impl Into<String>) {
    let sanitized = message.into().replace('\0', "?");
    LAST_ERROR.with(|state| {
        *state.borrow_mut() = CString::new(sanitized).unwrap_or_default();
    });
}

pub(crate) fn set_invalid_argument(message: impl Into<String>) -> DlResult {
    set_error_message(message);
    DlResult::InvalidArgument
}

pub(crate) fn set_panic_error() {
    set_error_message("panic across FFI boundary");
}

pub(crate) fn map_peer_error(err: &PeerError) -> DlResult {
    set_error_message(err.to_string());
    match err {
        PeerError::Transport(_) | PeerError::Timeout(_) => DlResult::TransportError,
        PeerError::Frame(_) | PeerError::TooManyErrors(_) => DlResult::FrameError,
        PeerError::Capture(_) => DlResult::BufferError,
        PeerError::NotReady => DlResult::NotReady,
        PeerError::Busy => DlResult::Busy,
        PeerError::Closed => DlResult::Closed,
        PeerError::Rejected(_) => DlResult::Rejected,
        PeerError::DepthUnsupported => DlResult::DepthUnsupported,
        PeerError::InvalidConfig(_) | PeerError::Json(_) => DlResult::InvalidArgument,
    }
}

pub(crate) fn map_capture_error(err: &CaptureError) -> DlResult {
    set_error_message(err.to_string());
    DlResult::BufferError
}

pub(crate) fn last_error_ptr() -> *const c_char {
    LAST_ERROR.with(|state| state.borrow().as_ptr())
}
