//! C-compatible types shared by the exported entry points.

use crate::media::frame::{Argb32Frame, AudioFrame, I420AFrame, VideoFrame};
use std::ffi::{c_char, c_void};

/// Opaque handle as exchanged with the host.
pub type mrsHandle = *mut c_void;
pub type PeerConnectionHandle = mrsHandle;
pub type LocalVideoTrackHandle = mrsHandle;
pub type DataChannelHandle = mrsHandle;
pub type ExternalVideoTrackSourceHandle = mrsHandle;

/// Host-side wrapper object associated with a native object.
pub type InteropHandle = *mut c_void;

/// Boolean as exchanged with the host: zero is false.
pub type mrsBool = i32;
pub const MRS_TRUE: mrsBool = 1;
pub const MRS_FALSE: mrsBool = 0;

// ============================================================================
// Configuration Structures
// ============================================================================

/// Session configuration.
#[repr(C)]
pub struct PeerConnectionConfiguration {
    /// ICE servers encoded as described in `ice::decode_ice_servers`
    pub encoded_ice_servers: *const c_char,
    /// See `IceTransportType`
    pub ice_transport_type: i32,
    /// See `BundlePolicy`
    pub bundle_policy: i32,
    /// See `SdpSemantic`
    pub sdp_semantic: i32,
}

impl Default for PeerConnectionConfiguration {
    fn default() -> Self {
        Self {
            encoded_ice_servers: std::ptr::null(),
            ice_transport_type: 3,
            bundle_policy: 0,
            sdp_semantic: 0,
        }
    }
}

/// Capture device request for a local video track.
#[repr(C)]
pub struct LocalVideoTrackConfig {
    /// Device id, or null/empty for the first available device
    pub video_device_id: *const c_char,
    /// Exact capture width, or 0 for any
    pub width: u32,
    /// Exact capture height, or 0 for any
    pub height: u32,
    /// Exact capture framerate, or 0 for any
    pub framerate: f64,
}

impl Default for LocalVideoTrackConfig {
    fn default() -> Self {
        Self {
            video_device_id: std::ptr::null(),
            width: 0,
            height: 0,
            framerate: 0.0,
        }
    }
}

pub const DATA_CHANNEL_FLAG_ORDERED: u32 = 0x1;
pub const DATA_CHANNEL_FLAG_RELIABLE: u32 = 0x2;

/// Data channel creation parameters.
#[repr(C)]
pub struct DataChannelConfig {
    /// Explicit id in `[0, 65534]`, or -1 to let the engine assign one
    pub id: i32,
    /// `DATA_CHANNEL_FLAG_*` bits
    pub flags: u32,
    /// Optional label (may be null)
    pub label: *const c_char,
}

impl Default for DataChannelConfig {
    fn default() -> Self {
        Self {
            id: -1,
            flags: DATA_CHANNEL_FLAG_ORDERED | DATA_CHANNEL_FLAG_RELIABLE,
            label: std::ptr::null(),
        }
    }
}

/// Per-media-kind codec restriction for `mrsSdpForceCodecs`.
#[repr(C)]
pub struct SdpFilter {
    /// Codec name, or null/empty to leave the media kind untouched
    pub codec_name: *const c_char,
    /// Extra parameters as `key=value;key2=value2` (may be null)
    pub params: *const c_char,
}

// ============================================================================
// Frame Views
// ============================================================================

/// Borrowed view of an I420A frame.
#[repr(C)]
pub struct I420AVideoFrame {
    pub width: u32,
    pub height: u32,
    pub ydata: *const c_void,
    pub udata: *const c_void,
    pub vdata: *const c_void,
    /// Optional alpha plane (may be null)
    pub adata: *const c_void,
    pub ystride: i32,
    pub ustride: i32,
    pub vstride: i32,
    pub astride: i32,
}

impl I420AVideoFrame {
    pub fn from_frame(f: &I420AFrame) -> Self {
        Self {
            width: f.width,
            height: f.height,
            ydata: f.y.as_ptr() as *const c_void,
            udata: f.u.as_ptr() as *const c_void,
            vdata: f.v.as_ptr() as *const c_void,
            adata: f
                .a
                .as_ref()
                .map_or(std::ptr::null(), |a| a.as_ptr() as *const c_void),
            ystride: f.stride_y as i32,
            ustride: f.stride_u as i32,
            vstride: f.stride_v as i32,
            astride: f.stride_a as i32,
        }
    }
}

/// Borrowed view of an ARGB32 frame.
#[repr(C)]
pub struct Argb32VideoFrame {
    pub width: u32,
    pub height: u32,
    pub argb32_data: *const c_void,
    pub stride: i32,
}

impl Argb32VideoFrame {
    pub fn from_frame(f: &Argb32Frame) -> Self {
        Self {
            width: f.width,
            height: f.height,
            argb32_data: f.data.as_ptr() as *const c_void,
            stride: f.stride as i32,
        }
    }
}

/// Borrowed view of an interleaved PCM frame.
#[repr(C)]
pub struct AudioFrameView {
    pub data: *const c_void,
    pub bits_per_sample: u32,
    pub sampling_rate_hz: u32,
    pub channel_count: u32,
    pub sample_count: u32,
}

impl AudioFrameView {
    pub fn from_frame(f: &AudioFrame) -> Self {
        Self {
            data: f.data.as_ptr() as *const c_void,
            bits_per_sample: AudioFrame::BITS_PER_SAMPLE,
            sampling_rate_hz: f.sample_rate,
            channel_count: f.channels,
            sample_count: f.frames,
        }
    }
}

// ============================================================================
// Callback Types
// ============================================================================

pub type PeerConnectionConnectedCallback = unsafe extern "C" fn(user: *mut c_void);

/// `sdp_type` is "offer" or "answer".
pub type PeerConnectionLocalSdpReadytoSendCallback =
    unsafe extern "C" fn(sdp_type: *const c_char, sdp: *const c_char, user: *mut c_void);

pub type PeerConnectionIceCandidateReadytoSendCallback = unsafe extern "C" fn(
    candidate: *const c_char,
    sdp_mline_index: i32,
    sdp_mid: *const c_char,
    user: *mut c_void,
);

/// `state` is an `IceConnectionState` value.
pub type PeerConnectionIceStateChangedCallback = unsafe extern "C" fn(state: i32, user: *mut c_void);

pub type PeerConnectionRenegotiationNeededCallback = unsafe extern "C" fn(user: *mut c_void);

/// `kind` is a `TrackKind` value.
pub type PeerConnectionTrackAddedCallback = unsafe extern "C" fn(kind: i32, user: *mut c_void);
pub type PeerConnectionTrackRemovedCallback = unsafe extern "C" fn(kind: i32, user: *mut c_void);

pub type PeerConnectionDataChannelAddedCallback =
    unsafe extern "C" fn(interop: InteropHandle, handle: DataChannelHandle, user: *mut c_void);
pub type PeerConnectionDataChannelRemovedCallback =
    unsafe extern "C" fn(interop: InteropHandle, handle: DataChannelHandle, user: *mut c_void);

pub type I420AVideoFrameCallback = unsafe extern "C" fn(frame: *const I420AVideoFrame, user: *mut c_void);
pub type Argb32VideoFrameCallback = unsafe extern "C" fn(frame: *const Argb32VideoFrame, user: *mut c_void);
pub type AudioFrameCallback = unsafe extern "C" fn(frame: *const AudioFrameView, user: *mut c_void);

pub type DataChannelMessageCallback = unsafe extern "C" fn(data: *const c_void, size: u64, user: *mut c_void);

pub type DataChannelBufferingCallback =
    unsafe extern "C" fn(previous: u64, current: u64, limit: u64, user: *mut c_void);

/// `state` is a `DataChannelState` value, `id` the channel id.
pub type DataChannelStateCallback = unsafe extern "C" fn(state: i32, id: i32, user: *mut c_void);

/// Asks the host to create the wrapper of a channel opened by the remote peer.
/// Returns the wrapper's interop handle.
pub type DataChannelCreateObjectCallback =
    unsafe extern "C" fn(parent: InteropHandle, config: DataChannelConfig, callbacks: *mut DataChannelCallbacks) -> InteropHandle;

pub type VideoCaptureDeviceEnumCallback =
    unsafe extern "C" fn(id: *const c_char, name: *const c_char, user: *mut c_void);
pub type VideoCaptureFormatEnumCallback =
    unsafe extern "C" fn(width: u32, height: u32, framerate: f64, fourcc: u32, user: *mut c_void);
pub type EnumCompletedCallback = unsafe extern "C" fn(result: u32, user: *mut c_void);

/// Frame request issued by an external video source.
pub type RequestExternalVideoFrameCallback = unsafe extern "C" fn(
    user: *mut c_void,
    source: ExternalVideoTrackSourceHandle,
    request_id: u32,
    timestamp_ms: i64,
);

/// Callbacks attached to a data channel at creation.
#[repr(C)]
pub struct DataChannelCallbacks {
    pub message_callback: Option<DataChannelMessageCallback>,
    pub message_user_data: *mut c_void,
    pub buffering_callback: Option<DataChannelBufferingCallback>,
    pub buffering_user_data: *mut c_void,
    pub state_callback: Option<DataChannelStateCallback>,
    pub state_user_data: *mut c_void,
}

impl Default for DataChannelCallbacks {
    fn default() -> Self {
        Self {
            message_callback: None,
            message_user_data: std::ptr::null_mut(),
            buffering_callback: None,
            buffering_user_data: std::ptr::null_mut(),
            state_callback: None,
            state_user_data: std::ptr::null_mut(),
        }
    }
}

/// Host factory callbacks for objects created on the native side.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct PeerConnectionInteropCallbacks {
    pub data_channel_create_object: Option<DataChannelCreateObjectCallback>,
}

impl Default for PeerConnectionInteropCallbacks {
    fn default() -> Self {
        Self {
            data_channel_create_object: None,
        }
    }
}

/// Convert an owned frame to the matching view and call `f` with it.
pub(crate) fn with_video_view(
    frame: &VideoFrame,
    on_i420a: impl FnOnce(&I420AVideoFrame),
    on_argb: impl FnOnce(&Argb32VideoFrame),
) {
    match frame {
        VideoFrame::I420A(f) => on_i420a(&I420AVideoFrame::from_frame(f)),
        VideoFrame::Argb32(f) => on_argb(&Argb32VideoFrame::from_frame(f)),
    }
}
