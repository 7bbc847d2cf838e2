//! Video source fed by the host on request.
//!
//! The source asks the host for frames by invoking its request callback with
//! an increasing request id. The host answers by completing that request with
//! a frame, which the next pull from any attached track then picks up.

use super::frame::VideoFrame;
use super::source::VideoFrameSource;
use crate::callback::CallbackSlot;
use crate::handle::HandleId;
use crate::interop::types::RequestExternalVideoFrameCallback;
use crate::result::{Error, Result};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::ffi::c_void;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Frame layout the host produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalFrameFormat {
    I420A,
    Argb32,
}

/// Outstanding requests kept before the oldest ones expire.
const MAX_PENDING_REQUESTS: usize = 8;

#[derive(Default)]
struct FrameState {
    pending: VecDeque<u32>,
    latest: Option<(u64, VideoFrame)>,
}

pub struct ExternalVideoSource {
    format: ExternalFrameFormat,
    request: CallbackSlot<RequestExternalVideoFrameCallback>,
    handle: AtomicU64,
    next_request_id: AtomicU32,
    frame_seq: AtomicU64,
    state: Mutex<FrameState>,
    shut_down: AtomicBool,
    frame_interval: Duration,
    started: Instant,
}

impl ExternalVideoSource {
    pub fn new(
        format: ExternalFrameFormat,
        callback: RequestExternalVideoFrameCallback,
        user: *mut c_void,
    ) -> Arc<Self> {
        let request = CallbackSlot::new("external frame request");
        request.register(Some(callback), user);
        Arc::new(Self {
            format,
            request,
            handle: AtomicU64::new(0),
            next_request_id: AtomicU32::new(0),
            frame_seq: AtomicU64::new(0),
            state: Mutex::new(FrameState::default()),
            shut_down: AtomicBool::new(false),
            frame_interval: Duration::from_millis(33),
            started: Instant::now(),
        })
    }

    pub fn format(&self) -> ExternalFrameFormat {
        self.format
    }

    pub(crate) fn set_handle(&self, handle: HandleId) {
        self.handle.store(handle, Ordering::SeqCst);
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Ask the host for a new frame.
    fn request_frame(&self) {
        if self.is_shut_down() {
            return;
        }
        let id = self.next_request_id.fetch_add(1, Ordering::SeqCst);
        {
            let mut state = self.state.lock();
            if state.pending.len() == MAX_PENDING_REQUESTS {
                state.pending.pop_front();
            }
            state.pending.push_back(id);
        }
        let handle = self.handle.load(Ordering::SeqCst) as *mut c_void;
        let timestamp_ms = self.started.elapsed().as_millis() as i64;
        self.request
            .invoke(|cb, user| unsafe { cb(user, handle, id, timestamp_ms) });
    }

    /// Complete an outstanding request with a frame.
    pub fn complete_request(&self, request_id: u32, frame: VideoFrame) -> Result<()> {
        if self.is_shut_down() {
            return Err(Error::InvalidOperation("external video source is shut down".into()));
        }
        let matches_format = matches!(
            (&frame, self.format),
            (VideoFrame::I420A(_), ExternalFrameFormat::I420A) | (VideoFrame::Argb32(_), ExternalFrameFormat::Argb32)
        );
        if !matches_format {
            return Err(Error::InvalidParameter(format!(
                "frame format does not match source format {:?}",
                self.format
            )));
        }

        let mut state = self.state.lock();
        let Some(pos) = state.pending.iter().position(|&id| id == request_id) else {
            return Err(Error::InvalidParameter(format!("unknown frame request {}", request_id)));
        };
        // Older requests are superseded by this frame.
        state.pending.drain(..=pos);
        let seq = self.frame_seq.fetch_add(1, Ordering::SeqCst) + 1;
        state.latest = Some((seq, frame));
        Ok(())
    }

    /// Stop producing frames. Irreversible.
    pub fn shutdown(&self) {
        if !self.shut_down.swap(true, Ordering::SeqCst) {
            self.request.clear();
            let mut state = self.state.lock();
            state.pending.clear();
            state.latest = None;
            log::info!("external video source #{} shut down", self.handle.load(Ordering::SeqCst));
        }
    }

    /// Frame producer for one track built on this source.
    pub fn frame_source(self: &Arc<Self>) -> Box<dyn VideoFrameSource> {
        Box::new(ExternalFrameReader {
            source: self.clone(),
            last_seq: 0,
        })
    }
}

struct ExternalFrameReader {
    source: Arc<ExternalVideoSource>,
    last_seq: u64,
}

impl VideoFrameSource for ExternalFrameReader {
    fn frame_interval(&self) -> Duration {
        self.source.frame_interval
    }

    fn next_frame(&mut self) -> Option<VideoFrame> {
        if self.source.is_shut_down() {
            return None;
        }
        let frame = {
            let state = self.source.state.lock();
            match &state.latest {
                Some((seq, frame)) if *seq > self.last_seq => {
                    self.last_seq = *seq;
                    Some(frame.clone())
                }
                _ => None,
            }
        };
        self.source.request_frame();
        frame
    }
}
