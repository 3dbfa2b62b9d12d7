use std::ffi::CStr;
use std::os::raw::c_char;

use depthlink_capture::{ColorBuffer, DepthBuffer, PixelFormat};

use crate::error;
use crate::types::{DlColorBuffer, DlDepthBuffer, DlResult};

/// Convert an optional C string argument into UTF-8 `&str`.
///
/// Returns `Some(None)` for null.
///
/// # Safety
/// `value` must be null or point to a valid NUL-terminated C string.
pub(crate) unsafe fn optional_str_arg<'a>(
    value: *const c_char,
    name: &str,
) -> Option<Option<&'a str>> {
    if value.is_null() {
        return Some(None);
    }

    let as_cstr = {
        // SAFETY: The caller guarantees `value` points to a valid NUL-terminated C string.
        unsafe { CStr::from_ptr(value) }
    };

    match as_cstr.to_str() {
        Ok(v) => Some(Some(v)),
        Err(_) => {
            let _ = error::set_invalid_argument(format!("{name} must be valid UTF-8"));
            None
        }
    }
}

/// Convert a byte pointer + length into a slice.
///
/// # Safety
/// If `len > 0`, `data` must be non-null and readable for `len` bytes.
unsafe fn bytes_arg<'a>(data: *const u8, len: usize, name: &str) -> Option<&'a [u8]> {
    if len == 0 {
        return Some(&[]);
    }
    if data.is_null() {
        let _ = error::set_invalid_argument(format!("{name} cannot be null when len > 0"));
        return None;
    }

    // SAFETY: Pointer and length are validated above and owned by caller for the call duration.
    Some(unsafe { std::slice::from_raw_parts(data, len) })
}

/// Borrow a host color buffer.
///
/// A null descriptor or data pointer is `InvalidArgument`; a descriptor whose
/// geometry does not fit its data is `BufferError`.
///
/// # Safety
/// `buffer` must be null or point to a valid `DlColorBuffer` whose `data` is
/// readable for `len` bytes for the duration of the call.
pub(crate) unsafe fn color_arg<'a>(
    buffer: *const DlColorBuffer,
) -> Result<ColorBuffer<'a>, DlResult> {
    if buffer.is_null() {
        return Err(error::set_invalid_argument("color buffer cannot be null"));
    }
    // SAFETY: Checked for null above; the caller guarantees validity.
    let desc = unsafe { &*buffer };
    // SAFETY: Pointer/length pairing comes from the caller's descriptor.
    let data = unsafe { bytes_arg(desc.data, desc.len, "color data") }
        .ok_or(DlResult::InvalidArgument)?;

    ColorBuffer::new(
        data,
        desc.width as usize,
        desc.height as usize,
        desc.bytes_per_row as usize,
        PixelFormat::from_fourcc(desc.pixel_format),
    )
    .map_err(|err| error::map_capture_error(&err))
}

/// Borrow a host depth buffer. Errors as for [`color_arg`].
///
/// # Safety
/// `buffer` must be null or point to a valid `DlDepthBuffer` whose `data` is
/// readable for `len` bytes for the duration of the call.
pub(crate) unsafe fn depth_arg<'a>(
    buffer: *const DlDepthBuffer,
) -> Result<DepthBuffer<'a>, DlResult> {
    if buffer.is_null() {
        return Err(error::set_invalid_argument("depth buffer cannot be null"));
    }
    // SAFETY: Checked for null above; the caller guarantees validity.
    let desc = unsafe { &*buffer };
    // SAFETY: Pointer/length pairing comes from the caller's descriptor.
    let data = unsafe { bytes_arg(desc.data, desc.len, "depth data") }
        .ok_or(DlResult::InvalidArgument)?;

    DepthBuffer::new(
        data,
        desc.width as usize,
        desc.height as usize,
        desc.bytes_per_row as usize,
    )
    .map_err(|err| error::map_capture_error(&err))
}
