//! Local media: frames, producers, and the tracks that send them.

pub mod external_source;
pub mod frame;
pub mod local_audio_track;
pub mod local_video_track;
pub mod pump;
pub mod source;

pub use external_source::{ExternalFrameFormat, ExternalVideoSource};
pub use frame::{copy_stride, Argb32Frame, AudioFrame, I420AFrame, VideoFrame};
pub use local_audio_track::LocalAudioTrack;
pub use local_video_track::LocalVideoTrack;
pub use source::{AudioFrameSource, VideoFrameSource};
