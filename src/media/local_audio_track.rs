//! Local audio track attached to a session.

use super::local_video_track::Attachment;
use super::pump::PumpControl;
use parking_lot::Mutex;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

/// Label of every local audio track.
pub const LOCAL_AUDIO_TRACK_LABEL: &str = "local_audio";

pub struct LocalAudioTrack {
    track: Arc<TrackLocalStaticSample>,
    control: Arc<PumpControl>,
    attachment: Mutex<Option<Attachment>>,
}

impl LocalAudioTrack {
    pub(crate) fn new(track: Arc<TrackLocalStaticSample>, control: Arc<PumpControl>, attachment: Attachment) -> Self {
        Self {
            track,
            control,
            attachment: Mutex::new(Some(attachment)),
        }
    }

    pub fn engine_track(&self) -> &Arc<TrackLocalStaticSample> {
        &self.track
    }

    pub fn is_enabled(&self) -> bool {
        self.control.is_enabled()
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.control.enabled.store(enabled, Ordering::SeqCst);
    }

    pub(crate) fn take_attachment(&self) -> Option<Attachment> {
        let mut attachment = self.attachment.lock().take()?;
        attachment.stop();
        Some(attachment)
    }
}
