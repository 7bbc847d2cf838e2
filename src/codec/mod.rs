//! Codec collaborator interface.
//!
//! Encoding and decoding are provided by the embedding application through
//! [`CodecBackend`]. Local tracks ask it for an encoder when they attach;
//! remote tracks ask it for a decoder by MIME type when they arrive.

use crate::media::frame::{AudioFrame, VideoFrame};
use bytes::Bytes;
use thiserror::Error;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;

/// Common codec error type
#[derive(Error, Debug)]
pub enum CodecError {
    /// Invalid input data
    #[error("Invalid input data")]
    InvalidInput,
    /// Decode error with message
    #[error("Decode error: {0}")]
    DecodeError(String),
    /// Encode error with message
    #[error("Encode error: {0}")]
    EncodeError(String),
    /// Other error with message
    #[error("{0}")]
    Other(String),
}

/// Audio format parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    /// Sample rate in Hz (e.g., 48000)
    pub sample_rate: u32,
    /// Number of channels (1 = mono, 2 = stereo)
    pub channels: u32,
}

impl AudioFormat {
    pub fn new(sample_rate: u32, channels: u32) -> Self {
        Self { sample_rate, channels }
    }

    /// Standard format: 48kHz stereo
    pub fn standard() -> Self {
        Self::new(48000, 2)
    }

    /// Samples per channel per frame for given duration
    pub fn samples_per_channel(&self, duration_ms: u32) -> u32 {
        self.sample_rate / 1000 * duration_ms
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self::standard()
    }
}

/// Capability advertised by local audio tracks that have no encoder.
pub fn default_audio_capability() -> RTCRtpCodecCapability {
    RTCRtpCodecCapability {
        mime_type: MIME_TYPE_OPUS.to_owned(),
        clock_rate: 48000,
        channels: 2,
        sdp_fmtp_line: "minptime=10;useinbandfec=1".to_owned(),
        rtcp_feedback: vec![],
    }
}

/// Capability advertised by local video tracks that have no encoder.
pub fn default_video_capability() -> RTCRtpCodecCapability {
    RTCRtpCodecCapability {
        mime_type: MIME_TYPE_VP8.to_owned(),
        clock_rate: 90000,
        channels: 0,
        sdp_fmtp_line: String::new(),
        rtcp_feedback: vec![],
    }
}

pub trait VideoEncoder: Send {
    /// Codec this encoder produces.
    fn capability(&self) -> RTCRtpCodecCapability;
    fn encode(&mut self, frame: &VideoFrame) -> Result<Bytes, CodecError>;
}

pub trait AudioEncoder: Send {
    fn capability(&self) -> RTCRtpCodecCapability;
    fn encode(&mut self, frame: &AudioFrame) -> Result<Bytes, CodecError>;
}

/// Turns RTP payloads into frames. May buffer several packets per frame.
pub trait VideoDecoder: Send {
    fn decode(&mut self, payload: &[u8], marker: bool) -> Result<Option<VideoFrame>, CodecError>;
}

pub trait AudioDecoder: Send {
    fn decode(&mut self, payload: &[u8]) -> Result<Option<AudioFrame>, CodecError>;
}

/// Source of encoders and decoders.
pub trait CodecBackend: Send + Sync {
    fn video_encoder(&self) -> Option<Box<dyn VideoEncoder>>;
    fn audio_encoder(&self, format: AudioFormat) -> Option<Box<dyn AudioEncoder>>;
    fn video_decoder(&self, mime_type: &str) -> Option<Box<dyn VideoDecoder>>;
    fn audio_decoder(&self, mime_type: &str, format: AudioFormat) -> Option<Box<dyn AudioDecoder>>;
}

/// Backend with no codecs. Tracks attach and negotiate but carry no media.
#[derive(Debug, Default)]
pub struct NullCodecBackend;

impl CodecBackend for NullCodecBackend {
    fn video_encoder(&self) -> Option<Box<dyn VideoEncoder>> {
        None
    }

    fn audio_encoder(&self, _format: AudioFormat) -> Option<Box<dyn AudioEncoder>> {
        None
    }

    fn video_decoder(&self, _mime_type: &str) -> Option<Box<dyn VideoDecoder>> {
        None
    }

    fn audio_decoder(&self, _mime_type: &str, _format: AudioFormat) -> Option<Box<dyn AudioDecoder>> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_format() {
        let f = AudioFormat::standard();
        assert_eq!(f.samples_per_channel(10), 480);
        assert_eq!(AudioFormat::default(), f);
    }

    #[test]
    fn test_default_capabilities() {
        let audio = default_audio_capability();
        assert_eq!(audio.mime_type, MIME_TYPE_OPUS);
        assert_eq!(audio.channels, 2);
        assert_eq!(default_video_capability().clock_rate, 90000);
    }

    #[test]
    fn test_null_backend_has_no_codecs() {
        let b = NullCodecBackend;
        assert!(b.video_encoder().is_none());
        assert!(b.audio_decoder(MIME_TYPE_OPUS, AudioFormat::standard()).is_none());
    }
}
