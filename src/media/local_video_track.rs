//! Local video track attached to a session.

use super::frame::VideoFrame;
use super::pump::PumpControl;
use crate::callback::CallbackSlot;
use crate::handle::HandleId;
use crate::interop::types::{with_video_view, Argb32VideoFrameCallback, I420AVideoFrameCallback};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

/// Host callbacks receiving the frames a local track sends.
pub struct LocalFrameCallbacks {
    pub i420a: CallbackSlot<I420AVideoFrameCallback>,
    pub argb: CallbackSlot<Argb32VideoFrameCallback>,
}

impl Default for LocalFrameCallbacks {
    fn default() -> Self {
        Self {
            i420a: CallbackSlot::new("local I420A frame"),
            argb: CallbackSlot::new("local ARGB frame"),
        }
    }
}

impl LocalFrameCallbacks {
    pub fn deliver(&self, frame: &VideoFrame) {
        with_video_view(
            frame,
            |view| {
                self.i420a.invoke(|cb, user| unsafe { cb(view, user) });
            },
            |view| {
                self.argb.invoke(|cb, user| unsafe { cb(view, user) });
            },
        );
    }
}

/// Engine-side attachment of a track: its sender and its pump task.
pub(crate) struct Attachment {
    pub sender: Arc<RTCRtpSender>,
    pub pump: Option<JoinHandle<()>>,
}

impl Attachment {
    /// Stop the pump. The sender is removed by the caller.
    pub fn stop(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}

pub struct LocalVideoTrack {
    name: String,
    track: Arc<TrackLocalStaticSample>,
    control: Arc<PumpControl>,
    frame_callbacks: Arc<LocalFrameCallbacks>,
    attachment: Mutex<Option<Attachment>>,
    handle: AtomicU64,
    /// External source this track holds a reference on, if any.
    external_source: Option<HandleId>,
}

impl LocalVideoTrack {
    pub(crate) fn new(
        name: &str,
        track: Arc<TrackLocalStaticSample>,
        control: Arc<PumpControl>,
        frame_callbacks: Arc<LocalFrameCallbacks>,
        attachment: Attachment,
        external_source: Option<HandleId>,
    ) -> Self {
        Self {
            name: name.to_string(),
            track,
            control,
            frame_callbacks,
            attachment: Mutex::new(Some(attachment)),
            handle: AtomicU64::new(0),
            external_source,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn engine_track(&self) -> &Arc<TrackLocalStaticSample> {
        &self.track
    }

    pub fn frame_callbacks(&self) -> &LocalFrameCallbacks {
        &self.frame_callbacks
    }

    pub fn is_enabled(&self) -> bool {
        self.control.is_enabled()
    }

    /// Soft mute. Only changes what the pump sends, never the negotiated stream.
    pub fn set_enabled(&self, enabled: bool) {
        self.control.enabled.store(enabled, Ordering::SeqCst);
        log::debug!("local video track '{}' enabled: {}", self.name, enabled);
    }

    pub fn handle(&self) -> HandleId {
        self.handle.load(Ordering::SeqCst)
    }

    pub(crate) fn set_handle(&self, handle: HandleId) {
        self.handle.store(handle, Ordering::SeqCst);
    }

    pub fn external_source(&self) -> Option<HandleId> {
        self.external_source
    }

    pub fn is_attached(&self) -> bool {
        self.attachment.lock().is_some()
    }

    /// Stop the pump and hand back the sender to remove from the engine.
    pub(crate) fn take_attachment(&self) -> Option<Attachment> {
        let mut attachment = self.attachment.lock().take()?;
        attachment.stop();
        Some(attachment)
    }
}
