//! Video capture collaborator.
//!
//! Device and format enumeration are asynchronous: a backend reports items
//! through an [`EnumerationSink`] from any thread and finishes with exactly one
//! completion. Opening a device is synchronous and consumed by track creation.

use crate::media::source::{AudioFrameSource, VideoFrameSource};
use crate::result::{Error, MrsResult, Result};
use parking_lot::Mutex;
use std::sync::{mpsc, Arc};

/// FOURCC reported for formats whose pixel layout is unknown.
pub const FOURCC_ANY: u32 = 0xFFFF_FFFF;

/// A capture device as listed by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoCaptureDevice {
    pub id: String,
    pub name: String,
}

/// One capture format supported by a device.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoCaptureFormat {
    pub width: u32,
    pub height: u32,
    pub framerate: f64,
    pub fourcc: u32,
}

/// Hard constraints applied when opening a device. Each bound is inclusive.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct VideoCaptureConstraints {
    pub width: Option<(u32, u32)>,
    pub height: Option<(u32, u32)>,
    pub framerate: Option<(f64, f64)>,
}

impl VideoCaptureConstraints {
    /// Exact-match constraints from a host request. Zero means unconstrained.
    pub fn exact(width: u32, height: u32, framerate: f64) -> Self {
        Self {
            width: (width > 0).then_some((width, width)),
            height: (height > 0).then_some((height, height)),
            framerate: (framerate > 0.0).then(|| (framerate.floor(), framerate.ceil())),
        }
    }

    pub fn accepts(&self, format: &VideoCaptureFormat) -> bool {
        let within = |bounds: Option<(u32, u32)>, v: u32| bounds.map_or(true, |(lo, hi)| lo <= v && v <= hi);
        within(self.width, format.width)
            && within(self.height, format.height)
            && self
                .framerate
                .map_or(true, |(lo, hi)| lo <= format.framerate && format.framerate <= hi)
    }
}

type ItemFn<T> = Box<dyn FnMut(T) + Send>;
type DoneFn = Box<dyn FnOnce(MrsResult) + Send>;

/// Receiver side of an asynchronous enumeration.
///
/// Completes exactly once: explicitly through [`EnumerationSink::complete`],
/// or with `Unknown` when dropped without completing.
pub struct EnumerationSink<T> {
    on_item: ItemFn<T>,
    on_done: Option<DoneFn>,
    filter: Option<fn(&T) -> bool>,
    reported: usize,
}

impl<T> EnumerationSink<T> {
    pub fn new(
        on_item: impl FnMut(T) + Send + 'static,
        on_done: impl FnOnce(MrsResult) + Send + 'static,
    ) -> Self {
        Self {
            on_item: Box::new(on_item),
            on_done: Some(Box::new(on_done)),
            filter: None,
            reported: 0,
        }
    }

    /// Drop items for which `keep` returns false.
    pub fn with_filter(mut self, keep: fn(&T) -> bool) -> Self {
        self.filter = Some(keep);
        self
    }

    pub fn push(&mut self, item: T) {
        if self.filter.map_or(true, |keep| keep(&item)) {
            self.reported += 1;
            (self.on_item)(item);
        }
    }

    pub fn reported(&self) -> usize {
        self.reported
    }

    /// Finish the enumeration. A successful run with no items is `NotFound`.
    pub fn complete(mut self, result: Result<()>) {
        let code = match result {
            Ok(()) if self.reported > 0 => MrsResult::Success,
            Ok(()) => MrsResult::NotFound,
            Err(e) => e.code(),
        };
        self.finish(code);
    }

    fn finish(&mut self, code: MrsResult) {
        if let Some(done) = self.on_done.take() {
            done(code);
        }
    }
}

impl<T> Drop for EnumerationSink<T> {
    fn drop(&mut self) {
        if self.on_done.is_some() {
            log::warn!("enumeration dropped without completion");
            self.finish(MrsResult::Unknown);
        }
    }
}

/// Platform capture backend.
pub trait VideoCaptureBackend: Send + Sync {
    fn enumerate_devices(&self, sink: EnumerationSink<VideoCaptureDevice>);

    fn enumerate_formats(&self, device_id: &str, sink: EnumerationSink<VideoCaptureFormat>);

    fn open(
        &self,
        device: &VideoCaptureDevice,
        constraints: &VideoCaptureConstraints,
    ) -> Result<Box<dyn VideoFrameSource>>;

    /// Whether the calling thread is a UI dispatcher that must not block.
    fn is_dispatcher_thread(&self) -> bool {
        false
    }

    fn open_microphone(&self) -> Option<Box<dyn AudioFrameSource>> {
        None
    }
}

/// Backend for hosts without capture hardware.
#[derive(Debug, Default)]
pub struct NullCaptureBackend;

impl VideoCaptureBackend for NullCaptureBackend {
    fn enumerate_devices(&self, sink: EnumerationSink<VideoCaptureDevice>) {
        sink.complete(Ok(()));
    }

    fn enumerate_formats(&self, _device_id: &str, sink: EnumerationSink<VideoCaptureFormat>) {
        sink.complete(Ok(()));
    }

    fn open(
        &self,
        device: &VideoCaptureDevice,
        _constraints: &VideoCaptureConstraints,
    ) -> Result<Box<dyn VideoFrameSource>> {
        Err(Error::NotFound(device.id.clone()))
    }
}

/// Start device enumeration. Items and the completion may arrive on any thread.
pub fn enumerate_video_capture_devices(
    backend: &dyn VideoCaptureBackend,
    on_item: impl FnMut(VideoCaptureDevice) + Send + 'static,
    on_done: impl FnOnce(MrsResult) + Send + 'static,
) {
    backend.enumerate_devices(EnumerationSink::new(on_item, on_done));
}

/// Start format enumeration for one device.
///
/// Argument errors are returned and also delivered through `on_done`.
/// Formats with an unknown FOURCC are skipped.
pub fn enumerate_video_capture_formats(
    backend: &dyn VideoCaptureBackend,
    device_id: &str,
    on_item: impl FnMut(VideoCaptureFormat) + Send + 'static,
    on_done: impl FnOnce(MrsResult) + Send + 'static,
) -> Result<()> {
    let sink = EnumerationSink::new(on_item, on_done).with_filter(|f| f.fourcc != FOURCC_ANY);
    if device_id.is_empty() {
        let err = Error::InvalidParameter("empty device id".into());
        sink.complete(Err(Error::InvalidParameter("empty device id".into())));
        return Err(err);
    }
    backend.enumerate_formats(device_id, sink);
    Ok(())
}

/// List devices and wait for the enumeration to complete.
pub fn list_devices_blocking(backend: &dyn VideoCaptureBackend) -> (Vec<VideoCaptureDevice>, MrsResult) {
    let devices = Arc::new(Mutex::new(Vec::new()));
    let (tx, rx) = mpsc::channel();
    let sink_devices = devices.clone();
    backend.enumerate_devices(EnumerationSink::new(
        move |d| sink_devices.lock().push(d),
        move |code| {
            let _ = tx.send(code);
        },
    ));
    let code = rx.recv().unwrap_or(MrsResult::Unknown);
    let list = std::mem::take(&mut *devices.lock());
    (list, code)
}

/// Open a capture device by id, or the first one that opens if `device_id`
/// is `None`.
///
/// # Returns
/// * `WrongThread` when called from a UI dispatcher thread
/// * `NotFound` when a requested id does not exist
/// * `InvalidOperation` when no device exists at all
/// * `Unknown` when every candidate failed to open
pub fn open_video_capture_device(
    backend: &dyn VideoCaptureBackend,
    device_id: Option<&str>,
    constraints: &VideoCaptureConstraints,
) -> Result<(VideoCaptureDevice, Box<dyn VideoFrameSource>)> {
    if backend.is_dispatcher_thread() {
        return Err(Error::WrongThread);
    }

    let (devices, code) = list_devices_blocking(backend);
    if devices.is_empty() {
        return Err(match device_id {
            Some(id) => Error::NotFound(format!("video capture device '{}'", id)),
            None if code == MrsResult::NotFound || code == MrsResult::Success => {
                Error::InvalidOperation("no video capture device available".into())
            }
            None => Error::Unknown(format!("device enumeration failed ({:?})", code)),
        });
    }

    if let Some(id) = device_id {
        let device = devices
            .into_iter()
            .find(|d| d.id == id)
            .ok_or_else(|| Error::NotFound(format!("video capture device '{}'", id)))?;
        return match backend.open(&device, constraints) {
            Ok(source) => Ok((device, source)),
            Err(e) => Err(Error::Unknown(format!("failed to open '{}': {}", device.id, e))),
        };
    }

    for device in devices {
        match backend.open(&device, constraints) {
            Ok(source) => return Ok((device, source)),
            Err(e) => log::debug!("capture device '{}' failed to open: {}", device.id, e),
        }
    }
    Err(Error::Unknown("no video capture device could be opened".into()))
}
