//! Reader tasks for tracks received from the remote peer.

use super::events::{PeerCallbacks, PeerEvent, TrackKind};
use crate::codec::{AudioFormat, CodecBackend};
use std::sync::Arc;
use webrtc::track::track_remote::TrackRemote;

/// Consecutive read errors tolerated before a reader gives up.
const MAX_READ_ERRORS: u32 = 100;

/// A track the remote peer is sending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTrack {
    pub id: String,
    pub kind: TrackKind,
    pub mime_type: String,
}

impl RemoteTrack {
    pub fn from_engine(track: &TrackRemote) -> Self {
        Self {
            id: track.id(),
            kind: TrackKind::from_engine(track.kind()),
            mime_type: track.codec().capability.mime_type,
        }
    }
}

/// Read RTP from a remote track until it ends, decoding payloads into frame
/// events when the codec backend provides a decoder.
pub async fn run_track_reader(
    track: Arc<TrackRemote>,
    kind: TrackKind,
    callbacks: Arc<PeerCallbacks>,
    codecs: Arc<dyn CodecBackend>,
) {
    let codec = track.codec();
    let mime_type = codec.capability.mime_type.clone();
    let format = AudioFormat::new(codec.capability.clock_rate, codec.capability.channels as u32);

    let mut video_decoder = match kind {
        TrackKind::Video => codecs.video_decoder(&mime_type),
        _ => None,
    };
    let mut audio_decoder = match kind {
        TrackKind::Audio => codecs.audio_decoder(&mime_type, format),
        _ => None,
    };
    if video_decoder.is_none() && audio_decoder.is_none() {
        log::debug!("no decoder for remote {} track, frames will not be delivered", mime_type);
    }

    let mut consecutive_errors = 0u32;
    loop {
        match track.read_rtp().await {
            Ok((packet, _attributes)) => {
                consecutive_errors = 0;
                let payload = packet.payload.as_ref();
                if payload.is_empty() {
                    continue;
                }
                if let Some(decoder) = video_decoder.as_mut() {
                    match decoder.decode(payload, packet.header.marker) {
                        Ok(Some(frame)) => callbacks.dispatch(PeerEvent::RemoteVideoFrame(&frame)),
                        Ok(None) => {}
                        Err(e) => log::debug!("remote video decode failed: {}", e),
                    }
                } else if let Some(decoder) = audio_decoder.as_mut() {
                    match decoder.decode(payload) {
                        Ok(Some(frame)) => callbacks.dispatch(PeerEvent::RemoteAudioFrame(&frame)),
                        Ok(None) => {}
                        Err(e) => log::debug!("remote audio decode failed: {}", e),
                    }
                }
            }
            Err(e) => {
                let err_str = e.to_string().to_lowercase();
                consecutive_errors += 1;
                if err_str.contains("eof") || err_str.contains("closed") || consecutive_errors > MAX_READ_ERRORS {
                    break;
                }
                log::debug!("remote track RTP read error: {}", e);
            }
        }
    }
}
