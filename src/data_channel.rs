//! Data channels multiplexed over a session.

use crate::callback::{CallbackSlot, UserData};
use crate::factory::Factory;
use crate::handle::HandleId;
use crate::interop::types::*;
use crate::result::{Error, Result};
use bytes::Bytes;
use std::ffi::c_void;
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::sync::Arc;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;

/// Send buffer limit reported to the buffering callback (16 MiB).
pub const MAX_BUFFERED_AMOUNT: u64 = 0x100_0000;

/// Largest explicit channel id.
pub const MAX_DATA_CHANNEL_ID: i32 = 65534;

/// Retransmit limit of unreliable channels. The engine reads a zero limit
/// with a zero lifetime as a fully reliable channel.
pub const UNRELIABLE_MAX_RETRANSMITS: u16 = 1;

/// Whether engine reliability parameters describe a reliable channel.
///
/// Zero for both means no limit; any non-zero value selects partial
/// reliability.
pub fn is_reliable(max_retransmits: u16, max_packet_lifetime: u16) -> bool {
    max_retransmits == 0 && max_packet_lifetime == 0
}

/// Data channel state as reported to the host.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataChannelState {
    Connecting = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

impl DataChannelState {
    fn from_engine(state: RTCDataChannelState) -> Self {
        match state {
            RTCDataChannelState::Open => Self::Open,
            RTCDataChannelState::Closing => Self::Closing,
            RTCDataChannelState::Closed => Self::Closed,
            _ => Self::Connecting,
        }
    }

    fn from_raw(raw: i32) -> Self {
        match raw {
            1 => Self::Open,
            2 => Self::Closing,
            3 => Self::Closed,
            _ => Self::Connecting,
        }
    }
}

/// Validated creation parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataChannelOptions {
    /// `None` lets the engine assign the id
    pub id: Option<u16>,
    pub label: String,
    pub ordered: bool,
    pub reliable: bool,
}

impl DataChannelOptions {
    pub fn from_raw(id: i32, flags: u32, label: Option<&str>) -> Result<Self> {
        let id = match id {
            -1 => None,
            0..=MAX_DATA_CHANNEL_ID => Some(id as u16),
            other => {
                return Err(Error::InvalidParameter(format!("invalid data channel id {}", other)));
            }
        };
        Ok(Self {
            id,
            label: label.unwrap_or_default().to_string(),
            ordered: flags & DATA_CHANNEL_FLAG_ORDERED != 0,
            reliable: flags & DATA_CHANNEL_FLAG_RELIABLE != 0,
        })
    }

    /// Options describing a channel announced by the remote peer.
    pub fn from_engine(dc: &RTCDataChannel) -> Self {
        Self {
            id: Some(dc.id()),
            label: dc.label().to_string(),
            ordered: dc.ordered(),
            reliable: is_reliable(dc.max_retransmits(), dc.max_packet_lifetime()),
        }
    }

    /// Host flag bits for these options.
    pub fn flags(&self) -> u32 {
        let mut flags = 0;
        if self.ordered {
            flags |= DATA_CHANNEL_FLAG_ORDERED;
        }
        if self.reliable {
            flags |= DATA_CHANNEL_FLAG_RELIABLE;
        }
        flags
    }

    pub fn to_init(&self) -> RTCDataChannelInit {
        RTCDataChannelInit {
            ordered: Some(self.ordered),
            max_retransmits: (!self.reliable).then_some(UNRELIABLE_MAX_RETRANSMITS),
            negotiated: self.id,
            ..Default::default()
        }
    }
}

/// Host callbacks of one channel.
pub struct DataChannelCallbackSlots {
    pub message: CallbackSlot<DataChannelMessageCallback>,
    pub buffering: CallbackSlot<DataChannelBufferingCallback>,
    pub state: CallbackSlot<DataChannelStateCallback>,
}

impl Default for DataChannelCallbackSlots {
    fn default() -> Self {
        Self {
            message: CallbackSlot::new("data channel message"),
            buffering: CallbackSlot::new("data channel buffering"),
            state: CallbackSlot::ordered("data channel state"),
        }
    }
}

impl DataChannelCallbackSlots {
    pub fn register_all(&self, callbacks: &DataChannelCallbacks) {
        self.message
            .register(callbacks.message_callback, callbacks.message_user_data);
        self.buffering
            .register(callbacks.buffering_callback, callbacks.buffering_user_data);
        self.state
            .register(callbacks.state_callback, callbacks.state_user_data);
    }

    fn clear(&self) {
        self.message.clear();
        self.buffering.clear();
        self.state.clear();
    }
}

pub struct DataChannel {
    dc: Arc<RTCDataChannel>,
    label: String,
    ordered: bool,
    reliable: bool,
    interop: UserData,
    callbacks: DataChannelCallbackSlots,
    state: AtomicI32,
    buffered: AtomicU64,
    handle: AtomicU64,
}

impl DataChannel {
    /// Wrap an engine channel and route its events to the host callbacks.
    pub(crate) fn new(factory: &Factory, dc: Arc<RTCDataChannel>, interop: UserData, options: &DataChannelOptions) -> Arc<Self> {
        let channel = Arc::new(Self {
            label: dc.label().to_string(),
            ordered: options.ordered,
            reliable: options.reliable,
            interop,
            callbacks: DataChannelCallbackSlots::default(),
            state: AtomicI32::new(DataChannelState::from_engine(dc.ready_state()) as i32),
            buffered: AtomicU64::new(0),
            handle: AtomicU64::new(0),
            dc,
        });
        channel.install_handlers(factory);
        channel
    }

    fn install_handlers(self: &Arc<Self>, factory: &Factory) {
        let weak = Arc::downgrade(self);
        self.dc.on_open(Box::new(move || {
            if let Some(channel) = weak.upgrade() {
                log::info!("data channel '{}' open", channel.label);
                channel.set_state(DataChannelState::Open);
            }
            Box::pin(async {})
        }));

        let weak = Arc::downgrade(self);
        self.dc.on_close(Box::new(move || {
            if let Some(channel) = weak.upgrade() {
                channel.set_state(DataChannelState::Closed);
            }
            Box::pin(async {})
        }));

        let weak = Arc::downgrade(self);
        self.dc.on_message(Box::new(move |msg: DataChannelMessage| {
            if let Some(channel) = weak.upgrade() {
                let data = msg.data;
                channel.callbacks.message.invoke(|cb, user| unsafe {
                    cb(data.as_ptr() as *const c_void, data.len() as u64, user)
                });
            }
            Box::pin(async {})
        }));

        let weak = Arc::downgrade(self);
        let dc = self.dc.clone();
        factory.runtime().spawn(async move {
            dc.set_buffered_amount_low_threshold(MAX_BUFFERED_AMOUNT as usize / 2).await;
            dc.on_buffered_amount_low(Box::new(move || {
                let weak = weak.clone();
                Box::pin(async move {
                    if let Some(channel) = weak.upgrade() {
                        let current = channel.dc.buffered_amount().await as u64;
                        channel.report_buffered(current);
                    }
                })
            }))
            .await;
        });
    }

    pub fn id(&self) -> i32 {
        self.dc.id() as i32
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn ordered(&self) -> bool {
        self.ordered
    }

    pub fn reliable(&self) -> bool {
        self.reliable
    }

    pub fn interop(&self) -> UserData {
        self.interop
    }

    pub fn callbacks(&self) -> &DataChannelCallbackSlots {
        &self.callbacks
    }

    pub fn state(&self) -> DataChannelState {
        DataChannelState::from_raw(self.state.load(Ordering::SeqCst))
    }

    pub fn handle(&self) -> HandleId {
        self.handle.load(Ordering::SeqCst)
    }

    pub(crate) fn set_handle(&self, handle: HandleId) {
        self.handle.store(handle, Ordering::SeqCst);
    }

    /// Record a state transition and notify the host if it changed.
    fn set_state(&self, state: DataChannelState) {
        let previous = self.state.swap(state as i32, Ordering::SeqCst);
        if previous != state as i32 {
            let id = self.id();
            self.callbacks
                .state
                .invoke(|cb, user| unsafe { cb(state as i32, id, user) });
        }
    }

    fn report_buffered(&self, current: u64) {
        let previous = self.buffered.swap(current, Ordering::SeqCst);
        if previous != current {
            self.callbacks
                .buffering
                .invoke(|cb, user| unsafe { cb(previous, current, MAX_BUFFERED_AMOUNT, user) });
        }
    }

    /// Queue a message for transmission.
    ///
    /// Succeeds once the engine accepted the buffer; delivery is not awaited.
    /// Backpressure is reported through the buffering callback.
    pub fn send(&self, factory: &Factory, data: &[u8]) -> Result<()> {
        if self.state() != DataChannelState::Open {
            return Err(Error::InvalidOperation(format!(
                "data channel '{}' is not open",
                self.label
            )));
        }
        let buffered = self.buffered.load(Ordering::SeqCst);
        if buffered + data.len() as u64 > MAX_BUFFERED_AMOUNT {
            return Err(Error::InvalidOperation(format!(
                "data channel '{}' send buffer full",
                self.label
            )));
        }
        let payload = Bytes::copy_from_slice(data);
        let current = factory.block_on(async {
            self.dc.send(&payload).await?;
            Ok::<_, webrtc::Error>(self.dc.buffered_amount().await as u64)
        })?;
        self.report_buffered(current);
        Ok(())
    }

    /// Close the channel, reporting closing then closed.
    pub(crate) fn close(&self, factory: &Factory) {
        if self.state() == DataChannelState::Closed {
            return;
        }
        self.set_state(DataChannelState::Closing);
        if let Err(e) = factory.block_on(self.dc.close()) {
            log::warn!("data channel '{}' close failed: {}", self.label, e);
        }
        self.set_state(DataChannelState::Closed);
        self.callbacks.clear();
    }
}
