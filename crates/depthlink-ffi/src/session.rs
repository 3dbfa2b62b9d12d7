use std::os::raw::c_char;
use std::sync::mpsc::{Receiver, TryRecvError};
use std::sync::Mutex;
use std::time::Duration;

use depthlink_capture::SensorCapabilities;
use depthlink_peer::{FrameDisposition, SessionConfig, StreamingSession};

use crate::args;
use crate::error;
use crate::types::{
    DlColorBuffer, DlConnectionEvent, DlConnectionState, DlDepthBuffer, DlFrameOutcome, DlResult,
    DlSessionHandle, SessionHandle,
};

fn with_session<T>(handle: DlSessionHandle, on_error: T, f: impl FnOnce(&SessionHandle) -> T) -> T {
    if handle.is_null() {
        let _ = error::set_invalid_argument("session handle cannot be null");
        return on_error;
    }

    let session_handle = {
        // SAFETY: Pointer validity is guaranteed by the caller.
        unsafe { &*(handle as *const SessionHandle) }
    };

    f(session_handle)
}

/// Start a streaming session.
///
/// `config_json` may be null for defaults. `depth_supported` reports whether
/// the device delivers scene depth. Returns null on failure; see
/// `dl_last_error`.
///
/// # Safety
/// `config_json` must be null or a valid UTF-8, NUL-terminated C string.
#[no_mangle]
pub unsafe extern "C" fn dl_session_start(
    config_json: *const c_char,
    depth_supported: bool,
) -> DlSessionHandle {
    crate::ffi_boundary(std::ptr::null_mut(), || {
        error::clear_error_state();

        let json = {
            // SAFETY: We validate null and UTF-8 in helper.
            match unsafe { args::optional_str_arg(config_json, "config_json") } {
                Some(v) => v,
                None => return std::ptr::null_mut(),
            }
        };

        let config = match json {
            Some(json) => match SessionConfig::from_json(json) {
                Ok(config) => config,
                Err(err) => {
                    let _ = error::map_peer_error(&err);
                    return std::ptr::null_mut();
                }
            },
            None => SessionConfig::default(),
        };

        let capabilities = SensorCapabilities {
            scene_depth: depth_supported,
        };
        match StreamingSession::start_observed(config, capabilities) {
            Ok((session, events)) => {
                let outcomes = session.outcomes();
                let handle = SessionHandle {
                    session,
                    events: Mutex::new(events),
                    outcomes: Mutex::new(outcomes),
                };
                Box::into_raw(Box::new(handle)) as DlSessionHandle
            }
            Err(err) => {
                let _ = error::map_peer_error(&err);
                std::ptr::null_mut()
            }
        }
    })
}

/// Offer a captured frame. Never blocks on the network.
///
/// `timestamp_ns` is the capture time on a monotonic clock. Returns `Ok` and
/// writes the frame sequence number to `out_sequence` (if non-null) when the
/// frame was handed to the transmitter; otherwise `Throttled`, `NotReady`,
/// `Busy` or `BufferError`. Null descriptors are `InvalidArgument`. The
/// frame's result arrives later through `dl_session_poll_outcome`.
///
/// # Safety
/// `session` must be a valid session handle. `color` and `depth` must point to
/// valid descriptors whose data stays readable for the duration of the call.
/// `out_sequence` must be null or writable.
#[no_mangle]
pub unsafe extern "C" fn dl_session_submit(
    session: DlSessionHandle,
    timestamp_ns: u64,
    color: *const DlColorBuffer,
    depth: *const DlDepthBuffer,
    out_sequence: *mut u64,
) -> DlResult {
    crate::ffi_boundary(DlResult::Internal, || {
        error::clear_error_state();

        // SAFETY: Descriptor validity is guaranteed by the caller.
        let color = match unsafe { args::color_arg(color) } {
            Ok(color) => color,
            Err(code) => return code,
        };
        // SAFETY: Descriptor validity is guaranteed by the caller.
        let depth = match unsafe { args::depth_arg(depth) } {
            Ok(depth) => depth,
            Err(code) => return code,
        };

        with_session(session, DlResult::InvalidArgument, |handle| {
            let timestamp = Duration::from_nanos(timestamp_ns);
            match handle.session.submit(timestamp, &color, &depth) {
                FrameDisposition::Submitted(sequence) => {
                    if !out_sequence.is_null() {
                        // SAFETY: Pointer was checked for null above.
                        unsafe {
                            *out_sequence = sequence;
                        }
                    }
                    DlResult::Ok
                }
                FrameDisposition::Throttled => DlResult::Throttled,
                FrameDisposition::NotReady => DlResult::NotReady,
                FrameDisposition::Busy => DlResult::Busy,
                FrameDisposition::BufferError => {
                    error::set_error_message("frame buffers could not be normalized");
                    DlResult::BufferError
                }
            }
        })
    })
}

/// Current connection state.
///
/// # Safety
/// `session` must be a valid session handle and `out_state` a writable pointer.
#[no_mangle]
pub unsafe extern "C" fn dl_session_state(
    session: DlSessionHandle,
    out_state: *mut DlConnectionState,
) -> DlResult {
    crate::ffi_boundary(DlResult::Internal, || {
        error::clear_error_state();

        if out_state.is_null() {
            return error::set_invalid_argument("out_state cannot be null");
        }

        with_session(session, DlResult::InvalidArgument, |handle| {
            let state = DlConnectionState::from(handle.session.connection_state());
            // SAFETY: Pointer was checked for null above.
            unsafe {
                *out_state = state;
            }
            DlResult::Ok
        })
    })
}

fn poll_queue<T, C>(
    queue: &Mutex<Receiver<T>>,
    out: *mut C,
    convert: impl FnOnce(&T) -> C,
) -> DlResult {
    let queue = queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    match queue.try_recv() {
        Ok(item) => {
            // SAFETY: Callers check `out` for null before polling.
            unsafe {
                *out = convert(&item);
            }
            DlResult::Ok
        }
        Err(TryRecvError::Empty) => DlResult::Empty,
        Err(TryRecvError::Disconnected) => DlResult::Closed,
    }
}

/// Take the oldest queued connection state transition.
///
/// Transitions are queued from session start, in the order they happened,
/// until polled. Returns `Empty` when none is waiting.
///
/// # Safety
/// `session` must be a valid session handle and `out_event` a writable pointer.
#[no_mangle]
pub unsafe extern "C" fn dl_session_poll_event(
    session: DlSessionHandle,
    out_event: *mut DlConnectionEvent,
) -> DlResult {
    crate::ffi_boundary(DlResult::Internal, || {
        error::clear_error_state();

        if out_event.is_null() {
            return error::set_invalid_argument("out_event cannot be null");
        }

        with_session(session, DlResult::InvalidArgument, |handle| {
            poll_queue(&handle.events, out_event, |event| DlConnectionEvent::from(event))
        })
    })
}

/// Take the oldest queued frame outcome. Every frame that `dl_session_submit`
/// accepted produces exactly one. Returns `Empty` when none is waiting.
///
/// # Safety
/// `session` must be a valid session handle and `out_outcome` a writable pointer.
#[no_mangle]
pub unsafe extern "C" fn dl_session_poll_outcome(
    session: DlSessionHandle,
    out_outcome: *mut DlFrameOutcome,
) -> DlResult {
    crate::ffi_boundary(DlResult::Internal, || {
        error::clear_error_state();

        if out_outcome.is_null() {
            return error::set_invalid_argument("out_outcome cannot be null");
        }

        with_session(session, DlResult::InvalidArgument, |handle| {
            poll_queue(&handle.outcomes, out_outcome, |outcome| DlFrameOutcome::from(outcome))
        })
    })
}

/// Stop streaming and free the session.
///
/// # Safety
/// `session` must be null or a handle returned by `dl_session_start`.
#[no_mangle]
pub unsafe extern "C" fn dl_session_free(session: DlSessionHandle) {
    crate::ffi_boundary((), || {
        if session.is_null() {
            return;
        }

        // SAFETY: Caller guarantees this handle was allocated by dl_session_start.
        unsafe {
            drop(Box::from_raw(session as *mut SessionHandle));
        }
    });
}

#[cfg(test)]
mod tests {
    use std::ffi::{CStr, CString};
    use std::io::{Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::time::Instant;

    use super::*;
    use crate::types::{DlFrameStage, DL_TEXT_LEN};

    fn text(buf: &[c_char; DL_TEXT_LEN]) -> String {
        // SAFETY: Inline text fields are always NUL-terminated.
        unsafe { CStr::from_ptr(buf.as_ptr()) }
            .to_string_lossy()
            .into_owned()
    }

    fn start_for(listener: &TcpListener) -> DlSessionHandle {
        let addr = listener.local_addr().expect("local addr");
        let json = format!(r#"{{"hosts": ["{addr}"], "backoff": "50ms", "keepalive": false}}"#);
        let json = CString::new(json).unwrap();
        // SAFETY: `json` is a valid C string.
        let handle = unsafe { dl_session_start(json.as_ptr(), true) };
        assert!(!handle.is_null());
        handle
    }

    /// Poll until something other than `Empty` comes back.
    fn poll_until<T: Default>(
        handle: DlSessionHandle,
        poll: unsafe extern "C" fn(DlSessionHandle, *mut T) -> DlResult,
    ) -> T {
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut out = T::default();
        loop {
            // SAFETY: `handle` is live and `out` is writable.
            match unsafe { poll(handle, &mut out) } {
                DlResult::Ok => return out,
                DlResult::Empty if Instant::now() < deadline => {
                    std::thread::sleep(Duration::from_millis(10));
                }
                other => panic!("poll returned {other:?}"),
            }
        }
    }

    /// 2x2 BGRA and depth descriptors over caller-owned bytes.
    fn descriptors(color: &[u8], depth: &[u8]) -> (DlColorBuffer, DlDepthBuffer) {
        let color_desc = DlColorBuffer {
            data: color.as_ptr(),
            len: color.len(),
            width: 2,
            height: 2,
            bytes_per_row: 8,
            pixel_format: u32::from_be_bytes(*b"BGRA"),
        };
        let depth_desc = DlDepthBuffer {
            data: depth.as_ptr(),
            len: depth.len(),
            width: 2,
            height: 2,
            bytes_per_row: 8,
        };
        (color_desc, depth_desc)
    }

    fn read_payload(peer: &mut TcpStream) {
        let mut len = [0u8; 4];
        peer.read_exact(&mut len).expect("length");
        let mut payload = vec![0u8; u32::from_le_bytes(len) as usize];
        peer.read_exact(&mut payload).expect("payload");
    }

    #[test]
    fn start_without_depth_fails() {
        // SAFETY: Null config is allowed.
        let handle = unsafe { dl_session_start(std::ptr::null(), false) };
        assert!(handle.is_null());

        // SAFETY: dl_last_error returns a pointer to a thread-local CString.
        let message = unsafe { std::ffi::CStr::from_ptr(crate::dl_last_error()) };
        assert!(message.to_str().unwrap().contains("depth"));
    }

    #[test]
    fn invalid_json_is_invalid_argument() {
        let json = CString::new("{not json").unwrap();
        // SAFETY: `json` is a valid C string.
        let handle = unsafe { dl_session_start(json.as_ptr(), true) };
        assert!(handle.is_null());
    }

    #[test]
    fn submit_before_connect_is_not_ready() {
        let json = CString::new(r#"{"hosts": ["127.0.0.1:1"], "backoff": "30s"}"#).unwrap();
        // SAFETY: `json` is a valid C string.
        let handle = unsafe { dl_session_start(json.as_ptr(), true) };
        assert!(!handle.is_null());

        let color = vec![0u8; 2 * 2 * 4];
        let depth = vec![0u8; 2 * 2 * 4];
        let (color_desc, depth_desc) = descriptors(&color, &depth);

        let mut sequence = 0u64;
        // SAFETY: All pointers reference live locals.
        let result =
            unsafe { dl_session_submit(handle, 0, &color_desc, &depth_desc, &mut sequence) };
        assert_eq!(result, DlResult::NotReady);
        // SAFETY: Same as above.
        let result =
            unsafe { dl_session_submit(handle, 1_000, &color_desc, &depth_desc, &mut sequence) };
        assert_eq!(result, DlResult::Throttled);

        let mut state = DlConnectionState::Ready;
        // SAFETY: `handle` is live and `state` is writable.
        assert_eq!(unsafe { dl_session_state(handle, &mut state) }, DlResult::Ok);
        assert_ne!(state, DlConnectionState::Ready);

        // SAFETY: `handle` came from dl_session_start.
        unsafe { dl_session_free(handle) };
    }

    #[test]
    fn events_report_every_transition_in_order() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("local addr").to_string();
        let handle = start_for(&listener);

        let connecting = poll_until(handle, dl_session_poll_event);
        assert_eq!(connecting.state, DlConnectionState::Connecting);
        assert_eq!(connecting.attempt, 1);
        assert_eq!(text(&connecting.endpoint), addr);

        let ready = poll_until(handle, dl_session_poll_event);
        assert_eq!(ready.state, DlConnectionState::Ready);
        assert_eq!(ready.generation, 1);

        // Drop the peer; the failure and the reconnect are both queued.
        let (peer, _) = listener.accept().expect("accept");
        drop(peer);
        let color = vec![0u8; 2 * 2 * 4];
        let depth = vec![0u8; 2 * 2 * 4];
        let (color_desc, depth_desc) = descriptors(&color, &depth);
        // SAFETY: All pointers reference live locals.
        let result = unsafe {
            dl_session_submit(handle, 0, &color_desc, &depth_desc, std::ptr::null_mut())
        };
        assert_eq!(result, DlResult::Ok);

        let failed = poll_until(handle, dl_session_poll_event);
        assert_eq!(failed.state, DlConnectionState::Failed);
        assert!(!text(&failed.reason).is_empty());
        let reconnecting = poll_until(handle, dl_session_poll_event);
        assert_eq!(reconnecting.state, DlConnectionState::Connecting);
        assert_eq!(reconnecting.attempt, 2);
        let ready = poll_until(handle, dl_session_poll_event);
        assert_eq!(ready.state, DlConnectionState::Ready);
        assert_eq!(ready.generation, 2);

        let mut event = DlConnectionEvent::default();
        // SAFETY: `handle` is live and `event` is writable.
        assert_eq!(unsafe { dl_session_poll_event(handle, &mut event) }, DlResult::Empty);

        // SAFETY: `handle` came from dl_session_start.
        unsafe { dl_session_free(handle) };
    }

    #[test]
    fn outcomes_name_the_failed_stage() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let handle = start_for(&listener);
        let _ = poll_until(handle, dl_session_poll_event);
        assert_eq!(poll_until(handle, dl_session_poll_event).state, DlConnectionState::Ready);

        let mut outcome = DlFrameOutcome::default();
        // SAFETY: `handle` is live and `outcome` is writable.
        assert_eq!(unsafe { dl_session_poll_outcome(handle, &mut outcome) }, DlResult::Empty);

        let peer = std::thread::spawn(move || {
            let (mut peer, _) = listener.accept().expect("accept");
            // First frame: refuse the color payload.
            read_payload(&mut peer);
            peer.write_all(&0u32.to_le_bytes()).expect("nak");
            // Second frame: accept both payloads.
            for _ in 0..2 {
                read_payload(&mut peer);
                peer.write_all(&1u32.to_le_bytes()).expect("ack");
            }
        });

        let color = vec![0u8; 2 * 2 * 4];
        let depth = vec![0u8; 2 * 2 * 4];
        let (color_desc, depth_desc) = descriptors(&color, &depth);
        let mut sequence = 0u64;

        // SAFETY: All pointers reference live locals.
        let result = unsafe { dl_session_submit(handle, 0, &color_desc, &depth_desc, &mut sequence) };
        assert_eq!(result, DlResult::Ok);
        let rejected = poll_until(handle, dl_session_poll_outcome);
        assert_eq!(rejected.sequence, sequence);
        assert!(!rejected.delivered);
        assert_eq!(rejected.failed_stage, DlFrameStage::ColorAck);
        assert!(rejected.rejected);
        assert_eq!(rejected.ack, 0);

        // SAFETY: As above.
        let result = unsafe {
            dl_session_submit(handle, 200_000_000, &color_desc, &depth_desc, &mut sequence)
        };
        assert_eq!(result, DlResult::Ok);
        let delivered = poll_until(handle, dl_session_poll_outcome);
        assert_eq!(delivered.sequence, sequence);
        assert!(delivered.delivered);
        assert_eq!(delivered.failed_stage, DlFrameStage::None);
        assert_eq!(delivered.color_bytes, 640 * 480 * 4);
        assert!(delivered.depth_bytes > 0);

        peer.join().expect("peer thread");
        // SAFETY: `handle` came from dl_session_start.
        unsafe { dl_session_free(handle) };
    }

    #[test]
    fn poll_rejects_null_output() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let handle = start_for(&listener);
        // SAFETY: Null output is rejected before the session is touched.
        unsafe {
            assert_eq!(
                dl_session_poll_event(handle, std::ptr::null_mut()),
                DlResult::InvalidArgument
            );
            assert_eq!(
                dl_session_poll_outcome(handle, std::ptr::null_mut()),
                DlResult::InvalidArgument
            );
            dl_session_free(handle);
        }
    }

    #[test]
    fn null_descriptor_is_invalid_argument() {
        let depth = vec![0u8; 4];
        let (_, depth_desc) = descriptors(&[], &depth);
        // SAFETY: The null color descriptor is rejected before anything else.
        let result = unsafe {
            dl_session_submit(
                std::ptr::null_mut(),
                0,
                std::ptr::null(),
                &depth_desc,
                std::ptr::null_mut(),
            )
        };
        assert_eq!(result, DlResult::InvalidArgument);

        // SAFETY: dl_last_error returns a pointer to a thread-local CString.
        let message = unsafe { CStr::from_ptr(crate::dl_last_error()) };
        assert!(message.to_str().unwrap().contains("color"));
    }

    #[test]
    fn bad_descriptor_is_buffer_error() {
        let color = [0u8; 4];
        let color_desc = DlColorBuffer {
            data: color.as_ptr(),
            len: color.len(),
            width: 4,
            height: 4,
            bytes_per_row: 16,
            pixel_format: 0,
        };
        let depth_desc = DlDepthBuffer {
            data: std::ptr::null(),
            len: 0,
            width: 1,
            height: 1,
            bytes_per_row: 4,
        };

        // SAFETY: Descriptors reference live locals; the null session is rejected.
        let result = unsafe {
            dl_session_submit(
                std::ptr::null_mut(),
                0,
                &color_desc,
                &depth_desc,
                std::ptr::null_mut(),
            )
        };
        assert_eq!(result, DlResult::BufferError);
    }
}
