//! depthlink-ffi: C-ABI exports for capture hosts.
//!
//! The host creates a session with `dl_session_start`, then calls
//! `dl_session_submit` from its sensor callback with descriptors over its
//! locked pixel buffers. Buffers are copied before the call returns.
//! Connection transitions and per-frame results are queued on the session and
//! drained with `dl_session_poll_event` and `dl_session_poll_outcome`.

mod args;
mod error;
mod logging;
mod preview;
mod session;
mod types;

use std::os::raw::c_char;
use std::panic::AssertUnwindSafe;

pub use preview::{dl_depth_preview, dl_image_free};
pub use session::{
    dl_session_free, dl_session_poll_event, dl_session_poll_outcome, dl_session_start,
    dl_session_state, dl_session_submit,
};
pub use types::{
    DlColorBuffer, DlConnectionEvent, DlConnectionState, DlDepthBuffer, DlFrameOutcome,
    DlFrameStage, DlImage, DlResult, DlSessionHandle, DL_EMPTY, DL_ERR_BUFFER, DL_ERR_BUSY,
    DL_ERR_CLOSED, DL_ERR_DEPTH_UNSUPPORTED, DL_ERR_FRAME, DL_ERR_INTERNAL,
    DL_ERR_INVALID_ARGUMENT, DL_ERR_NOT_READY, DL_ERR_REJECTED, DL_ERR_THROTTLED,
    DL_ERR_TRANSPORT, DL_OK, DL_TEXT_LEN,
};

fn ffi_boundary<T>(on_panic: T, f: impl FnOnce() -> T) -> T {
    match std::panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => value,
        Err(_) => {
            error::set_panic_error();
            on_panic
        }
    }
}

/// Prepare the library for use.
///
/// `log_level` is null to leave logging alone, or one of `off`, `error`,
/// `warn`, `info`, `debug`, `trace` to send library logs to stderr. A host
/// that already installed a `tracing` subscriber keeps it.
///
/// # Safety
/// `log_level` must be null or a valid UTF-8, NUL-terminated C string.
#[no_mangle]
pub unsafe extern "C" fn dl_init(log_level: *const c_char) -> DlResult {
    ffi_boundary(DlResult::Internal, || {
        error::clear_error_state();

        // SAFETY: Validity of `log_level` is guaranteed by the caller.
        let level = match unsafe { args::optional_str_arg(log_level, "log_level") } {
            Some(level) => level,
            None => return DlResult::InvalidArgument,
        };
        let Some(level) = level else {
            return DlResult::Ok;
        };
        let Some(filter) = logging::parse_level(level) else {
            return error::set_invalid_argument(format!("unknown log level `{level}`"));
        };
        if !logging::install(filter) {
            tracing::debug!("tracing subscriber already installed; keeping it");
        }
        DlResult::Ok
    })
}

#[no_mangle]
pub extern "C" fn dl_cleanup() {
    ffi_boundary((), || {
        error::clear_error_state();
    });
}

#[no_mangle]
pub extern "C" fn dl_last_error() -> *const c_char {
    ffi_boundary(std::ptr::null(), error::last_error_ptr)
}
