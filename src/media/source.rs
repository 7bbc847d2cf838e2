//! Frame producers feeding local tracks.

use super::frame::{AudioFrame, VideoFrame};
use crate::codec::AudioFormat;
use std::time::Duration;

/// Pull-based video producer. Polled once per frame interval by the track pump.
pub trait VideoFrameSource: Send {
    fn frame_interval(&self) -> Duration;

    /// Next frame, or `None` when no frame is ready yet.
    fn next_frame(&mut self) -> Option<VideoFrame>;
}

/// Pull-based audio producer, typically 10 ms per frame.
pub trait AudioFrameSource: Send {
    fn format(&self) -> AudioFormat;

    fn frame_interval(&self) -> Duration {
        Duration::from_millis(10)
    }

    fn next_frame(&mut self) -> Option<AudioFrame>;
}
