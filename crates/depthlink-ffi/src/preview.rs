use depthlink_capture::depth_buffer_preview;

use crate::args;
use crate::error;
use crate::types::{DlDepthBuffer, DlImage, DlResult};

fn free_image_data(image: &mut DlImage) {
    if !image.data.is_null() {
        let slice_ptr = std::ptr::slice_from_raw_parts_mut(image.data, image.len);
        // SAFETY: Non-null image data is always allocated by this library.
        unsafe {
            drop(Box::from_raw(slice_ptr));
        }
    }
    *image = DlImage::default();
}

/// Render a depth buffer as 8-bit grayscale scaled between its min and max.
///
/// # Safety
/// `depth` must point to a valid descriptor and `out_image` to a writable
/// `DlImage`. Image data already held by `out_image` is freed first.
#[no_mangle]
pub unsafe extern "C" fn dl_depth_preview(
    depth: *const DlDepthBuffer,
    out_image: *mut DlImage,
) -> DlResult {
    crate::ffi_boundary(DlResult::Internal, || {
        error::clear_error_state();

        if out_image.is_null() {
            return error::set_invalid_argument("out_image cannot be null");
        }
        // SAFETY: Descriptor validity is guaranteed by the caller.
        let depth = match unsafe { args::depth_arg(depth) } {
            Ok(depth) => depth,
            Err(code) => return code,
        };

        let gray = match depth_buffer_preview(&depth) {
            Ok(gray) => gray,
            Err(err) => return error::map_capture_error(&err),
        };

        // SAFETY: Checked for null above.
        let image = unsafe { &mut *out_image };
        free_image_data(image);

        let (width, height) = (gray.width(), gray.height());
        let pixels: Box<[u8]> = gray.into_raw().into_boxed_slice();
        let len = pixels.len();
        image.data = Box::into_raw(pixels) as *mut u8;
        image.len = len;
        image.width = width;
        image.height = height;
        image.channels = 1;
        DlResult::Ok
    })
}

/// Free pixel memory held by a `DlImage` filled by this library.
///
/// # Safety
/// `image` must be null or a valid pointer whose data, if non-null, came from
/// this library.
#[no_mangle]
pub unsafe extern "C" fn dl_image_free(image: *mut DlImage) {
    crate::ffi_boundary((), || {
        if image.is_null() {
            return;
        }
        // SAFETY: Checked for null above.
        free_image_data(unsafe { &mut *image });
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_preview_fills_image() {
        let samples = [0.5f32, 1.0, 1.5, 2.0];
        let bytes: Vec<u8> = samples.iter().flat_map(|v| v.to_ne_bytes()).collect();
        let desc = DlDepthBuffer {
            data: bytes.as_ptr(),
            len: bytes.len(),
            width: 2,
            height: 2,
            bytes_per_row: 8,
        };
        let mut image = DlImage::default();

        // SAFETY: Descriptor and output reference live locals.
        assert_eq!(unsafe { dl_depth_preview(&desc, &mut image) }, DlResult::Ok);
        assert_eq!((image.width, image.height, image.channels), (2, 2, 1));
        assert_eq!(image.len, 4);
        // SAFETY: The image was just filled by dl_depth_preview.
        let pixels = unsafe { std::slice::from_raw_parts(image.data, image.len) };
        assert_eq!((pixels[0], pixels[3]), (0, 255));
        assert!(pixels[1] < pixels[2]);

        // Refilling releases the previous allocation.
        // SAFETY: As above.
        assert_eq!(unsafe { dl_depth_preview(&desc, &mut image) }, DlResult::Ok);

        // SAFETY: `image` was filled by this library.
        unsafe { dl_image_free(&mut image) };
        assert!(image.data.is_null());
    }

    #[test]
    fn null_output_rejected() {
        let desc = DlDepthBuffer {
            data: std::ptr::null(),
            len: 0,
            width: 1,
            height: 1,
            bytes_per_row: 4,
        };
        // SAFETY: Null output is rejected before any dereference.
        let result = unsafe { dl_depth_preview(&desc, std::ptr::null_mut()) };
        assert_eq!(result, DlResult::InvalidArgument);
    }

    #[test]
    fn null_depth_is_invalid_argument() {
        let mut image = DlImage::default();
        // SAFETY: Null input is rejected before any dereference.
        let result = unsafe { dl_depth_preview(std::ptr::null(), &mut image) };
        assert_eq!(result, DlResult::InvalidArgument);
        assert!(image.data.is_null());
    }
}
