//! Session events and their host callback slots.

use crate::callback::{CallbackSlot, UserData};
use crate::handle::HandleId;
use crate::interop::types::*;
use crate::media::frame::{AudioFrame, VideoFrame};
use std::ffi::{c_void, CString};
use std::sync::atomic::{AtomicBool, Ordering};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;

/// Kind of a media track, as reported to the host.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Unknown = 0,
    Audio = 1,
    Video = 2,
}

impl TrackKind {
    pub fn from_engine(kind: webrtc::rtp_transceiver::rtp_codec::RTPCodecType) -> Self {
        use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
        match kind {
            RTPCodecType::Audio => TrackKind::Audio,
            RTPCodecType::Video => TrackKind::Video,
            _ => TrackKind::Unknown,
        }
    }
}

/// ICE connection state as reported to the host.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IceConnectionState {
    New = 0,
    Checking = 1,
    Connected = 2,
    Completed = 3,
    Failed = 4,
    Disconnected = 5,
    Closed = 6,
}

impl IceConnectionState {
    pub fn from_engine(state: RTCIceConnectionState) -> Self {
        match state {
            RTCIceConnectionState::Checking => Self::Checking,
            RTCIceConnectionState::Connected => Self::Connected,
            RTCIceConnectionState::Completed => Self::Completed,
            RTCIceConnectionState::Failed => Self::Failed,
            RTCIceConnectionState::Disconnected => Self::Disconnected,
            RTCIceConnectionState::Closed => Self::Closed,
            _ => Self::New,
        }
    }
}

/// One event raised by a session towards the host.
#[derive(Debug)]
pub enum PeerEvent<'a> {
    Connected,
    LocalSdpReady { sdp_type: &'a str, sdp: &'a str },
    IceCandidateReady { candidate: &'a str, mline_index: i32, mid: &'a str },
    IceStateChanged(IceConnectionState),
    RenegotiationNeeded,
    TrackAdded(TrackKind),
    TrackRemoved(TrackKind),
    DataChannelAdded { interop: UserData, handle: HandleId },
    DataChannelRemoved { interop: UserData, handle: HandleId },
    RemoteVideoFrame(&'a VideoFrame),
    LocalAudioFrame(&'a AudioFrame),
    RemoteAudioFrame(&'a AudioFrame),
}

/// Per-session callback registrations, one slot per event kind.
pub struct PeerCallbacks {
    pub connected: CallbackSlot<PeerConnectionConnectedCallback>,
    pub local_sdp_ready: CallbackSlot<PeerConnectionLocalSdpReadytoSendCallback>,
    pub ice_candidate_ready: CallbackSlot<PeerConnectionIceCandidateReadytoSendCallback>,
    pub ice_state_changed: CallbackSlot<PeerConnectionIceStateChangedCallback>,
    pub renegotiation_needed: CallbackSlot<PeerConnectionRenegotiationNeededCallback>,
    pub track_added: CallbackSlot<PeerConnectionTrackAddedCallback>,
    pub track_removed: CallbackSlot<PeerConnectionTrackRemovedCallback>,
    pub data_channel_added: CallbackSlot<PeerConnectionDataChannelAddedCallback>,
    pub data_channel_removed: CallbackSlot<PeerConnectionDataChannelRemovedCallback>,
    pub remote_i420a_frame: CallbackSlot<I420AVideoFrameCallback>,
    pub remote_argb_frame: CallbackSlot<Argb32VideoFrameCallback>,
    pub local_audio_frame: CallbackSlot<AudioFrameCallback>,
    pub remote_audio_frame: CallbackSlot<AudioFrameCallback>,
    /// Connected fires once per session.
    connected_fired: AtomicBool,
}

impl Default for PeerCallbacks {
    fn default() -> Self {
        Self {
            connected: CallbackSlot::new("connected"),
            local_sdp_ready: CallbackSlot::new("local SDP ready"),
            ice_candidate_ready: CallbackSlot::new("ICE candidate ready"),
            ice_state_changed: CallbackSlot::ordered("ICE state changed"),
            renegotiation_needed: CallbackSlot::new("renegotiation needed"),
            track_added: CallbackSlot::new("track added"),
            track_removed: CallbackSlot::new("track removed"),
            data_channel_added: CallbackSlot::new("data channel added"),
            data_channel_removed: CallbackSlot::new("data channel removed"),
            remote_i420a_frame: CallbackSlot::new("remote I420A frame"),
            remote_argb_frame: CallbackSlot::new("remote ARGB frame"),
            local_audio_frame: CallbackSlot::new("local audio frame"),
            remote_audio_frame: CallbackSlot::new("remote audio frame"),
            connected_fired: AtomicBool::new(false),
        }
    }
}

impl PeerCallbacks {
    /// Deliver an event to its slot. Unregistered events are dropped.
    pub fn dispatch(&self, event: PeerEvent<'_>) {
        match event {
            PeerEvent::Connected => {
                if self
                    .connected_fired
                    .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
                {
                    self.connected.invoke(|cb, user| unsafe { cb(user) });
                }
            }
            PeerEvent::LocalSdpReady { sdp_type, sdp } => {
                if let (Ok(t), Ok(s)) = (CString::new(sdp_type), CString::new(sdp)) {
                    self.local_sdp_ready
                        .invoke(|cb, user| unsafe { cb(t.as_ptr(), s.as_ptr(), user) });
                }
            }
            PeerEvent::IceCandidateReady { candidate, mline_index, mid } => {
                if let (Ok(c), Ok(m)) = (CString::new(candidate), CString::new(mid)) {
                    self.ice_candidate_ready
                        .invoke(|cb, user| unsafe { cb(c.as_ptr(), mline_index, m.as_ptr(), user) });
                }
            }
            PeerEvent::IceStateChanged(state) => {
                self.ice_state_changed
                    .invoke(|cb, user| unsafe { cb(state as i32, user) });
            }
            PeerEvent::RenegotiationNeeded => {
                self.renegotiation_needed.invoke(|cb, user| unsafe { cb(user) });
            }
            PeerEvent::TrackAdded(kind) => {
                self.track_added.invoke(|cb, user| unsafe { cb(kind as i32, user) });
            }
            PeerEvent::TrackRemoved(kind) => {
                self.track_removed.invoke(|cb, user| unsafe { cb(kind as i32, user) });
            }
            PeerEvent::DataChannelAdded { interop, handle } => {
                self.data_channel_added
                    .invoke(|cb, user| unsafe { cb(interop.as_ptr(), handle as *mut c_void, user) });
            }
            PeerEvent::DataChannelRemoved { interop, handle } => {
                self.data_channel_removed
                    .invoke(|cb, user| unsafe { cb(interop.as_ptr(), handle as *mut c_void, user) });
            }
            PeerEvent::RemoteVideoFrame(frame) => with_video_view(
                frame,
                |view| {
                    self.remote_i420a_frame.invoke(|cb, user| unsafe { cb(view, user) });
                },
                |view| {
                    self.remote_argb_frame.invoke(|cb, user| unsafe { cb(view, user) });
                },
            ),
            PeerEvent::LocalAudioFrame(frame) => {
                let view = AudioFrameView::from_frame(frame);
                self.local_audio_frame.invoke(|cb, user| unsafe { cb(&view, user) });
            }
            PeerEvent::RemoteAudioFrame(frame) => {
                let view = AudioFrameView::from_frame(frame);
                self.remote_audio_frame.invoke(|cb, user| unsafe { cb(&view, user) });
            }
        }
    }

    /// Drop every registration. Used when the session closes.
    pub fn clear_all(&self) {
        self.connected.clear();
        self.local_sdp_ready.clear();
        self.ice_candidate_ready.clear();
        self.ice_state_changed.clear();
        self.renegotiation_needed.clear();
        self.track_added.clear();
        self.track_removed.clear();
        self.data_channel_added.clear();
        self.data_channel_removed.clear();
        self.remote_i420a_frame.clear();
        self.remote_argb_frame.clear();
        self.local_audio_frame.clear();
        self.remote_audio_frame.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    unsafe extern "C" fn on_connected(user: *mut c_void) {
        let r = &*(user as *const Recorder);
        r.events.lock().push("connected".into());
    }

    unsafe extern "C" fn on_sdp(t: *const std::ffi::c_char, s: *const std::ffi::c_char, user: *mut c_void) {
        let r = &*(user as *const Recorder);
        let t = std::ffi::CStr::from_ptr(t).to_string_lossy();
        let s = std::ffi::CStr::from_ptr(s).to_string_lossy();
        r.events.lock().push(format!("{}:{}", t, s));
    }

    unsafe extern "C" fn on_ice_state(state: i32, user: *mut c_void) {
        let r = &*(user as *const Recorder);
        r.events.lock().push(format!("ice:{}", state));
    }

    #[test]
    fn test_connected_fires_once() {
        let rec = Recorder::default();
        let cbs = PeerCallbacks::default();
        cbs.connected
            .register(Some(on_connected), &rec as *const _ as *mut c_void);
        cbs.dispatch(PeerEvent::Connected);
        cbs.dispatch(PeerEvent::Connected);
        assert_eq!(rec.events.lock().as_slice(), ["connected"]);
    }

    #[test]
    fn test_dispatch_routes_by_kind() {
        let rec = Recorder::default();
        let user = &rec as *const _ as *mut c_void;
        let cbs = PeerCallbacks::default();
        cbs.local_sdp_ready.register(Some(on_sdp), user);
        cbs.ice_state_changed.register(Some(on_ice_state), user);

        cbs.dispatch(PeerEvent::LocalSdpReady { sdp_type: "offer", sdp: "v=0" });
        cbs.dispatch(PeerEvent::IceStateChanged(IceConnectionState::from_engine(
            RTCIceConnectionState::Checking,
        )));
        cbs.dispatch(PeerEvent::RenegotiationNeeded);

        assert_eq!(rec.events.lock().as_slice(), ["offer:v=0", "ice:1"]);
    }

    #[test]
    fn test_clear_all_silences_events() {
        let rec = Recorder::default();
        let cbs = PeerCallbacks::default();
        cbs.ice_state_changed
            .register(Some(on_ice_state), &rec as *const _ as *mut c_void);
        cbs.clear_all();
        cbs.dispatch(PeerEvent::IceStateChanged(IceConnectionState::Failed));
        assert!(rec.events.lock().is_empty());
    }

    #[test]
    fn test_ice_state_mapping() {
        assert_eq!(IceConnectionState::from_engine(RTCIceConnectionState::New), IceConnectionState::New);
        assert_eq!(
            IceConnectionState::from_engine(RTCIceConnectionState::Disconnected) as i32,
            5
        );
        assert_eq!(IceConnectionState::from_engine(RTCIceConnectionState::Closed) as i32, 6);
    }
}
