//! Process-level entry points: factory lifecycle, utilities, SDP helpers and
//! capture enumeration.

use super::types::*;
use super::{cstr, cstr_non_empty, guard, write_to_buffer};
use crate::callback::UserData;
use crate::capture::{
    enumerate_video_capture_devices, enumerate_video_capture_formats, VideoCaptureBackend, VideoCaptureDevice,
    VideoCaptureFormat,
};
use crate::factory::GlobalFactory;
use crate::media::frame::copy_stride;
use crate::result::{Error, MrsResult, Result};
use crate::sdp::{force_codecs, is_valid_token, parse_params, CodecFilter};
use std::ffi::{c_char, c_void, CString};

// ============================================================================
// Factory
// ============================================================================

/// Log every live object of the process factory.
///
/// # Returns
/// Number of live objects (0 when no factory exists)
#[no_mangle]
pub unsafe extern "system" fn mrsReportLiveObjects() -> u32 {
    match GlobalFactory::try_get() {
        Some(factory) => factory.report_live_objects() as u32,
        None => 0,
    }
}

/// Shut down the process factory.
///
/// # Returns
/// `InvalidOperation` while any peer connection is still alive
#[no_mangle]
pub unsafe extern "system" fn mrsGlobalFactoryShutdown() -> MrsResult {
    guard("mrsGlobalFactoryShutdown", GlobalFactory::shutdown)
}

// ============================================================================
// Memory Utilities
// ============================================================================

#[no_mangle]
pub unsafe extern "system" fn mrsMemCpy(dst: *mut c_void, src: *const c_void, size: u64) {
    debug_assert!(!dst.is_null() && !src.is_null());
    if dst.is_null() || src.is_null() || size == 0 {
        return;
    }
    std::ptr::copy_nonoverlapping(src as *const u8, dst as *mut u8, size as usize);
}

/// Copy `elem_count` rows of `elem_size` bytes between strided buffers.
#[no_mangle]
pub unsafe extern "system" fn mrsMemCpyStride(
    dst: *mut c_void,
    dst_stride: i32,
    src: *const c_void,
    src_stride: i32,
    elem_size: i32,
    elem_count: i32,
) -> MrsResult {
    guard("mrsMemCpyStride", || {
        if dst.is_null() || src.is_null() {
            return Err(Error::InvalidParameter("null buffer".into()));
        }
        let (dst_stride, src_stride, row, rows) = match (
            usize::try_from(dst_stride),
            usize::try_from(src_stride),
            usize::try_from(elem_size),
            usize::try_from(elem_count),
        ) {
            (Ok(d), Ok(s), Ok(r), Ok(n)) => (d, s, r, n),
            _ => return Err(Error::InvalidParameter("negative stride or size".into())),
        };
        if rows == 0 || row == 0 {
            return Ok(());
        }
        if dst_stride < row || src_stride < row {
            return Err(Error::InvalidParameter("stride smaller than element size".into()));
        }
        let dst = std::slice::from_raw_parts_mut(dst as *mut u8, (rows - 1) * dst_stride + row);
        let src = std::slice::from_raw_parts(src as *const u8, (rows - 1) * src_stride + row);
        copy_stride(dst, dst_stride, src, src_stride, row, rows)
    })
}

// ============================================================================
// SDP Utilities
// ============================================================================

/// Check whether a string is a valid SDP token (usable as a track name).
#[no_mangle]
pub unsafe extern "system" fn mrsSdpIsValidToken(token: *const c_char) -> mrsBool {
    match cstr(token) {
        Some(t) if is_valid_token(t) => MRS_TRUE,
        _ => MRS_FALSE,
    }
}

unsafe fn codec_filter(filter: &SdpFilter) -> Result<CodecFilter> {
    let Some(name) = cstr_non_empty(filter.codec_name) else {
        return Ok(CodecFilter::none());
    };
    let params = match cstr(filter.params) {
        Some(p) => parse_params(p)?,
        None => Default::default(),
    };
    Ok(CodecFilter::codec(name).with_params(params))
}

/// Restrict the audio and video codecs of an SDP message.
///
/// # Arguments
/// * `message` - SDP to rewrite
/// * `audio_filter` / `video_filter` - Codec to keep per media kind
/// * `buffer` - Output buffer for the rewritten SDP
/// * `buffer_size` - Capacity in, required size (with terminator) out
///
/// # Returns
/// `InvalidParameter` without writing anything when the buffer is too small
#[no_mangle]
pub unsafe extern "system" fn mrsSdpForceCodecs(
    message: *const c_char,
    audio_filter: SdpFilter,
    video_filter: SdpFilter,
    buffer: *mut c_char,
    buffer_size: *mut u64,
) -> MrsResult {
    guard("mrsSdpForceCodecs", || {
        let sdp = cstr(message).ok_or_else(|| Error::InvalidParameter("null SDP message".into()))?;
        let audio = codec_filter(&audio_filter)?;
        let video = codec_filter(&video_filter)?;
        let rewritten = force_codecs(sdp, &audio, &video);
        write_to_buffer(&rewritten, buffer, buffer_size)
    })
}

// ============================================================================
// Video Capture Enumeration
// ============================================================================

/// Enumerate video capture devices. The completion callback fires exactly
/// once, possibly on another thread.
#[no_mangle]
pub unsafe extern "system" fn mrsEnumVideoCaptureDevicesAsync(
    enum_callback: Option<VideoCaptureDeviceEnumCallback>,
    enum_user_data: *mut c_void,
    completed_callback: Option<EnumCompletedCallback>,
    completed_user_data: *mut c_void,
) -> MrsResult {
    let on_done = completion(completed_callback, completed_user_data);
    let factory = match GlobalFactory::instance() {
        Ok(f) => f,
        Err(e) => {
            on_done(e.code());
            return e.code();
        }
    };
    enum_devices(
        factory.backends().capture.as_ref(),
        enum_callback,
        UserData(enum_user_data),
        on_done,
    )
}

/// Enumerate the capture formats of one device. Formats with an unknown
/// FOURCC are not reported.
#[no_mangle]
pub unsafe extern "system" fn mrsEnumVideoCaptureFormatsAsync(
    device_id: *const c_char,
    enum_callback: Option<VideoCaptureFormatEnumCallback>,
    enum_user_data: *mut c_void,
    completed_callback: Option<EnumCompletedCallback>,
    completed_user_data: *mut c_void,
) -> MrsResult {
    let on_done = completion(completed_callback, completed_user_data);
    let factory = match GlobalFactory::instance() {
        Ok(f) => f,
        Err(e) => {
            on_done(e.code());
            return e.code();
        }
    };
    enum_formats(
        factory.backends().capture.as_ref(),
        cstr(device_id).unwrap_or_default(),
        enum_callback,
        UserData(enum_user_data),
        on_done,
    )
}

fn completion(callback: Option<EnumCompletedCallback>, user: *mut c_void) -> impl Fn(MrsResult) + Send + Copy + 'static {
    let user = UserData(user);
    move |code: MrsResult| {
        if let Some(cb) = callback {
            unsafe { cb(code as u32, user.as_ptr()) };
        }
    }
}

/// A backend panic drops the enumeration sink, which completes with
/// `Unknown`.
fn enum_devices(
    backend: &dyn VideoCaptureBackend,
    enum_callback: Option<VideoCaptureDeviceEnumCallback>,
    item_user: UserData,
    on_done: impl Fn(MrsResult) + Send + 'static,
) -> MrsResult {
    guard("mrsEnumVideoCaptureDevicesAsync", move || {
        let on_item = move |device: VideoCaptureDevice| {
            let (Some(cb), Ok(id), Ok(name)) = (enum_callback, CString::new(device.id), CString::new(device.name))
            else {
                return;
            };
            unsafe { cb(id.as_ptr(), name.as_ptr(), item_user.as_ptr()) };
        };
        enumerate_video_capture_devices(backend, on_item, on_done);
        Ok(())
    })
}

fn enum_formats(
    backend: &dyn VideoCaptureBackend,
    device_id: &str,
    enum_callback: Option<VideoCaptureFormatEnumCallback>,
    item_user: UserData,
    on_done: impl Fn(MrsResult) + Send + 'static,
) -> MrsResult {
    guard("mrsEnumVideoCaptureFormatsAsync", move || {
        let on_item = move |format: VideoCaptureFormat| {
            if let Some(cb) = enum_callback {
                unsafe { cb(format.width, format.height, format.framerate, format.fourcc, item_user.as_ptr()) };
            }
        };
        enumerate_video_capture_formats(backend, device_id, on_item, on_done)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CStr;

    const OFFER: &str = "v=0\r\n\
o=- 1 2 IN IP4 127.0.0.1\r\n\
s=-\r\n\
t=0 0\r\n\
m=audio 9 UDP/TLS/RTP/SAVPF 111 0\r\n\
a=rtpmap:111 opus/48000/2\r\n\
a=fmtp:111 minptime=10\r\n\
a=rtpmap:0 PCMU/8000\r\n";

    #[test]
    fn test_mem_cpy_stride() {
        let src: Vec<u8> = (0..12).collect();
        let mut dst = vec![0u8; 8];
        let code = unsafe {
            mrsMemCpyStride(dst.as_mut_ptr() as *mut c_void, 4, src.as_ptr() as *const c_void, 6, 4, 2)
        };
        assert_eq!(code, MrsResult::Success);
        assert_eq!(dst, vec![0, 1, 2, 3, 6, 7, 8, 9]);

        let code = unsafe {
            mrsMemCpyStride(dst.as_mut_ptr() as *mut c_void, 2, src.as_ptr() as *const c_void, 6, 4, 2)
        };
        assert_eq!(code, MrsResult::InvalidParameter);
    }

    #[test]
    fn test_valid_token() {
        let good = CString::new("local_video-1").unwrap();
        let bad = CString::new("has space").unwrap();
        unsafe {
            assert_eq!(mrsSdpIsValidToken(good.as_ptr()), MRS_TRUE);
            assert_eq!(mrsSdpIsValidToken(bad.as_ptr()), MRS_FALSE);
            assert_eq!(mrsSdpIsValidToken(std::ptr::null()), MRS_FALSE);
        }
    }

    #[test]
    fn test_force_codecs_buffer_retry() {
        let sdp = CString::new(OFFER).unwrap();
        let opus = CString::new("opus").unwrap();
        let params = CString::new("stereo=1").unwrap();
        let audio = || SdpFilter {
            codec_name: opus.as_ptr(),
            params: params.as_ptr(),
        };
        let video = || SdpFilter {
            codec_name: std::ptr::null(),
            params: std::ptr::null(),
        };

        let mut size = 0u64;
        let code = unsafe { mrsSdpForceCodecs(sdp.as_ptr(), audio(), video(), std::ptr::null_mut(), &mut size) };
        assert_eq!(code, MrsResult::InvalidParameter);
        let required = size;

        let mut buf = vec![0 as c_char; required as usize - 1];
        size = buf.len() as u64;
        let code = unsafe { mrsSdpForceCodecs(sdp.as_ptr(), audio(), video(), buf.as_mut_ptr(), &mut size) };
        assert_eq!(code, MrsResult::InvalidParameter);
        assert_eq!(size, required);

        buf.resize(required as usize, 0);
        let code = unsafe { mrsSdpForceCodecs(sdp.as_ptr(), audio(), video(), buf.as_mut_ptr(), &mut size) };
        assert_eq!(code, MrsResult::Success);
        let out = unsafe { CStr::from_ptr(buf.as_ptr()) }.to_str().unwrap();
        assert!(out.contains("m=audio 9 UDP/TLS/RTP/SAVPF 111\r\n"));
        assert!(out.contains("a=fmtp:111 minptime=10;stereo=1\r\n"));
        assert!(!out.contains("PCMU"));
    }

    #[test]
    fn test_force_codecs_rejects_bad_params() {
        let sdp = CString::new(OFFER).unwrap();
        let opus = CString::new("opus").unwrap();
        let params = CString::new("=1").unwrap();
        let mut buf = vec![0 as c_char; 1024];
        let mut size = buf.len() as u64;
        let code = unsafe {
            mrsSdpForceCodecs(
                sdp.as_ptr(),
                SdpFilter { codec_name: opus.as_ptr(), params: params.as_ptr() },
                SdpFilter { codec_name: std::ptr::null(), params: std::ptr::null() },
                buf.as_mut_ptr(),
                &mut size,
            )
        };
        assert_eq!(code, MrsResult::InvalidParameter);
    }

    struct PanickingBackend;

    impl VideoCaptureBackend for PanickingBackend {
        fn enumerate_devices(&self, _sink: crate::capture::EnumerationSink<VideoCaptureDevice>) {
            panic!("device query failed");
        }
        fn enumerate_formats(&self, _device_id: &str, _sink: crate::capture::EnumerationSink<VideoCaptureFormat>) {
            panic!("format query failed");
        }
        fn open(
            &self,
            _device: &VideoCaptureDevice,
            _constraints: &crate::capture::VideoCaptureConstraints,
        ) -> Result<Box<dyn crate::media::source::VideoFrameSource>> {
            Err(Error::Unknown("unsupported".into()))
        }
    }

    unsafe extern "C" fn record_completion(result: u32, user: *mut c_void) {
        (*(user as *const std::sync::Mutex<Vec<u32>>)).lock().unwrap().push(result);
    }

    #[test]
    fn test_enumeration_panic_stays_inside() {
        let completions = std::sync::Mutex::new(Vec::<u32>::new());
        let user = &completions as *const _ as *mut c_void;

        let code = enum_devices(&PanickingBackend, None, UserData(std::ptr::null_mut()), completion(Some(record_completion), user));
        assert_eq!(code, MrsResult::Unknown);

        let code = enum_formats(
            &PanickingBackend,
            "cam0",
            None,
            UserData(std::ptr::null_mut()),
            completion(Some(record_completion), user),
        );
        assert_eq!(code, MrsResult::Unknown);

        // the dropped sink still completes each enumeration once
        assert_eq!(
            *completions.lock().unwrap(),
            vec![MrsResult::Unknown as u32, MrsResult::Unknown as u32]
        );
    }

    unsafe extern "C" fn count_format(_w: u32, _h: u32, _fps: f64, _fourcc: u32, user: *mut c_void) {
        (*(user as *const std::sync::atomic::AtomicUsize)).fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    }

    #[test]
    fn test_format_enumeration_through_guard() {
        let backend = crate::capture::tests::FakeCaptureBackend::with_devices(&["cam0"]);
        let formats = std::sync::atomic::AtomicUsize::new(0);
        let completions = std::sync::Mutex::new(Vec::<u32>::new());
        let user = &completions as *const _ as *mut c_void;
        let code = enum_formats(
            &backend,
            "cam0",
            Some(count_format),
            UserData(&formats as *const _ as *mut c_void),
            completion(Some(record_completion), user),
        );
        assert_eq!(code, MrsResult::Success);
        // the FOURCC_ANY format is filtered out
        assert_eq!(formats.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(*completions.lock().unwrap(), vec![MrsResult::Success as u32]);
    }
}
