//! Per-track tasks that pull frames from a source and feed the engine track.

use super::frame::{AudioFrame, VideoFrame};
use super::source::{AudioFrameSource, VideoFrameSource};
use crate::codec::{AudioEncoder, CodecError, VideoEncoder};
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use webrtc::media::Sample;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

/// Shared state read by a pump on every tick.
pub struct PumpControl {
    pub enabled: AtomicBool,
}

impl Default for PumpControl {
    fn default() -> Self {
        Self {
            enabled: AtomicBool::new(true),
        }
    }
}

impl PumpControl {
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }
}

/// Spawn the video pump of one local track.
///
/// Disabled tracks keep producing frames: each one is replaced by a black
/// frame of the same size, so the negotiated stream never changes.
pub fn spawn_video_pump(
    runtime: &Handle,
    mut source: Box<dyn VideoFrameSource>,
    mut encoder: Option<Box<dyn VideoEncoder>>,
    track: Arc<TrackLocalStaticSample>,
    control: Arc<PumpControl>,
    on_frame: impl Fn(&VideoFrame) + Send + 'static,
) -> JoinHandle<()> {
    let interval = clamp_interval(source.frame_interval());
    runtime.spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let Some(mut frame) = source.next_frame() else {
                continue;
            };
            if !control.is_enabled() {
                frame = frame.black_like();
            }
            on_frame(&frame);

            if let Some(encoder) = encoder.as_mut() {
                write_encoded(&track, encoder.encode(&frame), interval, "video").await;
            }
        }
    })
}

/// Spawn the audio pump of one local track. Disabled tracks send silence.
pub fn spawn_audio_pump(
    runtime: &Handle,
    mut source: Box<dyn AudioFrameSource>,
    mut encoder: Option<Box<dyn AudioEncoder>>,
    track: Arc<TrackLocalStaticSample>,
    control: Arc<PumpControl>,
    on_frame: impl Fn(&AudioFrame) + Send + 'static,
) -> JoinHandle<()> {
    let interval = clamp_interval(source.frame_interval());
    runtime.spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let Some(mut frame) = source.next_frame() else {
                continue;
            };
            if !control.is_enabled() {
                frame = frame.silence_like();
            }
            on_frame(&frame);

            if let Some(encoder) = encoder.as_mut() {
                write_encoded(&track, encoder.encode(&frame), interval, "audio").await;
            }
        }
    })
}

async fn write_encoded(
    track: &TrackLocalStaticSample,
    encoded: Result<Bytes, CodecError>,
    duration: Duration,
    kind: &str,
) {
    match encoded {
        Ok(data) if !data.is_empty() => {
            let sample = Sample {
                data,
                duration,
                ..Default::default()
            };
            if let Err(e) = track.write_sample(&sample).await {
                log::debug!("{} sample write failed: {}", kind, e);
            }
        }
        Ok(_) => {}
        Err(e) => log::debug!("{} encode failed: {}", kind, e),
    }
}

fn clamp_interval(interval: Duration) -> Duration {
    interval.max(Duration::from_millis(1))
}
