//! External video track source entry points.

use super::types::*;
use super::{add_ref, guard, raw_handle, remove_ref, resolve, write_out};
use crate::factory::GlobalFactory;
use crate::media::external_source::{ExternalFrameFormat, ExternalVideoSource};
use crate::media::frame::{copy_stride, Argb32Frame, I420AFrame, VideoFrame};
use crate::result::{Error, MrsResult, Result};
use std::ffi::c_void;
use std::sync::Arc;

unsafe fn create_source(
    format: ExternalFrameFormat,
    callback: Option<RequestExternalVideoFrameCallback>,
    user_data: *mut c_void,
    source_handle_out: *mut ExternalVideoTrackSourceHandle,
) -> Result<()> {
    if source_handle_out.is_null() {
        return Err(Error::InvalidParameter("null source handle out-pointer".into()));
    }
    *source_handle_out = std::ptr::null_mut();
    let callback = callback.ok_or_else(|| Error::InvalidParameter("null frame request callback".into()))?;
    let factory = GlobalFactory::instance()?;
    factory.ensure_running()?;

    let source = ExternalVideoSource::new(format, callback, user_data);
    let handle = factory
        .registry()
        .register(source.clone(), 1, |source: Arc<ExternalVideoSource>| source.shutdown());
    source.set_handle(handle);
    log::info!("external {:?} video source #{} created", format, handle);
    write_out(source_handle_out, raw_handle(handle))
}

/// Copy one host plane into a tightly packed buffer.
unsafe fn copy_plane(data: *const c_void, stride: i32, row_bytes: usize, rows: usize) -> Result<Vec<u8>> {
    if data.is_null() {
        return Err(Error::InvalidParameter("null plane".into()));
    }
    let stride = usize::try_from(stride).map_err(|_| Error::InvalidParameter("negative stride".into()))?;
    if stride < row_bytes {
        return Err(Error::InvalidParameter("stride smaller than row".into()));
    }
    let mut plane = vec![0u8; row_bytes * rows];
    if rows == 0 || row_bytes == 0 {
        return Ok(plane);
    }
    let src = std::slice::from_raw_parts(data as *const u8, (rows - 1) * stride + row_bytes);
    copy_stride(&mut plane, row_bytes, src, stride, row_bytes, rows)?;
    Ok(plane)
}

unsafe fn i420a_from_view(view: &I420AVideoFrame) -> Result<I420AFrame> {
    let (w, h) = (view.width as usize, view.height as usize);
    let (cw, ch) = I420AFrame::chroma_size(view.width, view.height);
    let (cw, ch) = (cw as usize, ch as usize);
    let a = if view.adata.is_null() {
        None
    } else {
        Some(copy_plane(view.adata, view.astride, w, h)?)
    };
    Ok(I420AFrame {
        width: view.width,
        height: view.height,
        y: copy_plane(view.ydata, view.ystride, w, h)?,
        u: copy_plane(view.udata, view.ustride, cw, ch)?,
        v: copy_plane(view.vdata, view.vstride, cw, ch)?,
        stride_a: if a.is_some() { w } else { 0 },
        a,
        stride_y: w,
        stride_u: cw,
        stride_v: cw,
    })
}

unsafe fn argb_from_view(view: &Argb32VideoFrame) -> Result<Argb32Frame> {
    let row = view.width as usize * 4;
    Ok(Argb32Frame {
        width: view.width,
        height: view.height,
        stride: row,
        data: copy_plane(view.argb32_data, view.stride, row, view.height as usize)?,
    })
}

// ============================================================================
// Creation and Lifetime
// ============================================================================

/// Create a source producing I420A frames on request.
///
/// # Arguments
/// * `callback` - Frame request callback (must not be null)
/// * `user_data` - Passed back to `callback`
/// * `source_handle_out` - Receives the source handle, owning one reference
#[no_mangle]
pub unsafe extern "system" fn mrsExternalVideoTrackSourceCreateFromI420ACallback(
    callback: Option<RequestExternalVideoFrameCallback>,
    user_data: *mut c_void,
    source_handle_out: *mut ExternalVideoTrackSourceHandle,
) -> MrsResult {
    guard("mrsExternalVideoTrackSourceCreateFromI420ACallback", || {
        create_source(ExternalFrameFormat::I420A, callback, user_data, source_handle_out)
    })
}

/// Create a source producing ARGB32 frames on request.
#[no_mangle]
pub unsafe extern "system" fn mrsExternalVideoTrackSourceCreateFromArgb32Callback(
    callback: Option<RequestExternalVideoFrameCallback>,
    user_data: *mut c_void,
    source_handle_out: *mut ExternalVideoTrackSourceHandle,
) -> MrsResult {
    guard("mrsExternalVideoTrackSourceCreateFromArgb32Callback", || {
        create_source(ExternalFrameFormat::Argb32, callback, user_data, source_handle_out)
    })
}

#[no_mangle]
pub unsafe extern "system" fn mrsExternalVideoTrackSourceAddRef(source: ExternalVideoTrackSourceHandle) -> MrsResult {
    guard("mrsExternalVideoTrackSourceAddRef", || add_ref(source))
}

#[no_mangle]
pub unsafe extern "system" fn mrsExternalVideoTrackSourceRemoveRef(
    source: ExternalVideoTrackSourceHandle,
) -> MrsResult {
    guard("mrsExternalVideoTrackSourceRemoveRef", || remove_ref(source))
}

/// Stop issuing frame requests. Tracks built on the source stop receiving
/// frames but stay attached.
#[no_mangle]
pub unsafe extern "system" fn mrsExternalVideoTrackSourceShutdown(source: ExternalVideoTrackSourceHandle) -> MrsResult {
    guard("mrsExternalVideoTrackSourceShutdown", || {
        let (_, source) = resolve::<ExternalVideoSource>(source)?;
        source.shutdown();
        Ok(())
    })
}

// ============================================================================
// Frame Requests
// ============================================================================

/// Answer a frame request with an I420A frame. The frame is copied.
#[no_mangle]
pub unsafe extern "system" fn mrsExternalVideoTrackSourceCompleteI420AVideoFrameRequest(
    source: ExternalVideoTrackSourceHandle,
    request_id: u32,
    frame: *const I420AVideoFrame,
) -> MrsResult {
    guard("mrsExternalVideoTrackSourceCompleteI420AVideoFrameRequest", || {
        if frame.is_null() {
            return Err(Error::InvalidParameter("null frame".into()));
        }
        let (_, source) = resolve::<ExternalVideoSource>(source)?;
        let frame = i420a_from_view(&*frame)?;
        source.complete_request(request_id, VideoFrame::I420A(frame))
    })
}

/// Answer a frame request with an ARGB32 frame. The frame is copied.
#[no_mangle]
pub unsafe extern "system" fn mrsExternalVideoTrackSourceCompleteArgb32VideoFrameRequest(
    source: ExternalVideoTrackSourceHandle,
    request_id: u32,
    frame: *const Argb32VideoFrame,
) -> MrsResult {
    guard("mrsExternalVideoTrackSourceCompleteArgb32VideoFrameRequest", || {
        if frame.is_null() {
            return Err(Error::InvalidParameter("null frame".into()));
        }
        let (_, source) = resolve::<ExternalVideoSource>(source)?;
        let frame = argb_from_view(&*frame)?;
        source.complete_request(request_id, VideoFrame::Argb32(frame))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_plane_repacks_rows() {
        let src: Vec<u8> = (0..16).collect();
        let plane = unsafe { copy_plane(src.as_ptr() as *const c_void, 8, 3, 2) }.unwrap();
        assert_eq!(plane, vec![0, 1, 2, 8, 9, 10]);
        assert!(unsafe { copy_plane(src.as_ptr() as *const c_void, 2, 3, 2) }.is_err());
        assert!(unsafe { copy_plane(std::ptr::null(), 8, 3, 2) }.is_err());
    }

    #[test]
    fn test_i420a_view_roundtrip() {
        let original = I420AFrame::black(5, 3);
        let view = I420AVideoFrame::from_frame(&original);
        let copied = unsafe { i420a_from_view(&view) }.unwrap();
        assert_eq!(copied, original);
    }

    #[test]
    fn test_argb_view_with_padding() {
        // 2x2 frame with 4 bytes of row padding
        let data: Vec<u8> = (0..24).collect();
        let view = Argb32VideoFrame {
            width: 2,
            height: 2,
            argb32_data: data.as_ptr() as *const c_void,
            stride: 12,
        };
        let frame = unsafe { argb_from_view(&view) }.unwrap();
        assert_eq!(frame.stride, 8);
        assert_eq!(&frame.data[..8], &data[..8]);
        assert_eq!(&frame.data[8..], &data[12..20]);
    }
}
