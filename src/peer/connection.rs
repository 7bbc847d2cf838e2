//! Session (peer connection) state machine.
//!
//! A [`PeerConnection`] owns one engine `RTCPeerConnection`, sequences the
//! offer/answer calls that drive it, buffers remote ICE candidates until a
//! remote description exists, and owns the local tracks and data channels
//! attached to it. Engine events are relayed to the host through
//! [`PeerCallbacks`]; this layer never renegotiates on its own.

use std::collections::HashSet;
use std::ffi::{c_void, CString};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::signaling_state::RTCSignalingState;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use super::config::SessionConfig;
use super::events::{IceConnectionState, PeerCallbacks, PeerEvent};
use super::remote_track::{run_track_reader, RemoteTrack};
use crate::callback::UserData;
use crate::capture::{open_video_capture_device, VideoCaptureConstraints};
use crate::codec::{default_audio_capability, default_video_capability, AudioFormat, CodecBackend};
use crate::data_channel::{DataChannel, DataChannelOptions};
use crate::factory::Factory;
use crate::handle::HandleId;
use crate::interop::types::{DataChannelCallbacks, DataChannelConfig, PeerConnectionInteropCallbacks};
use crate::media::external_source::ExternalVideoSource;
use crate::media::local_audio_track::{LocalAudioTrack, LOCAL_AUDIO_TRACK_LABEL};
use crate::media::local_video_track::{Attachment, LocalFrameCallbacks, LocalVideoTrack};
use crate::media::pump::{spawn_audio_pump, spawn_video_pump, PumpControl};
use crate::media::source::VideoFrameSource;
use crate::result::{Error, Result};
use crate::sdp::is_valid_token;

/// Media stream id shared by all local tracks of a session.
const LOCAL_STREAM_ID: &str = "local_av_stream";

/// Negotiation state as sequenced by this layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Negotiating,
    Stable,
    Closed,
}

/// Remote ICE candidate as received from the signaling channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IceCandidate {
    pub candidate: String,
    pub sdp_mid: String,
    /// Negative when unknown
    pub sdp_mline_index: i32,
}

impl IceCandidate {
    fn to_init(&self) -> RTCIceCandidateInit {
        RTCIceCandidateInit {
            candidate: self.candidate.clone(),
            sdp_mid: (!self.sdp_mid.is_empty()).then(|| self.sdp_mid.clone()),
            sdp_mline_index: u16::try_from(self.sdp_mline_index).ok(),
            username_fragment: None,
        }
    }
}

/// Remote-description state and the candidates waiting for it.
#[derive(Default)]
struct SignalingState {
    has_remote_description: bool,
    pending_candidates: Vec<RTCIceCandidateInit>,
}

/// Request for a capture-device backed video track.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VideoDeviceRequest {
    /// `None` opens the first device that works
    pub device_id: Option<String>,
    pub width: u32,
    pub height: u32,
    pub framerate: f64,
}

pub struct PeerConnection {
    pc: Arc<RTCPeerConnection>,
    config: SessionConfig,
    interop: UserData,
    callbacks: Arc<PeerCallbacks>,
    interop_callbacks: Mutex<PeerConnectionInteropCallbacks>,
    state: Mutex<SessionState>,
    signaling: Mutex<SignalingState>,
    video_tracks: Mutex<Vec<Arc<LocalVideoTrack>>>,
    audio_tracks: Mutex<Vec<Arc<LocalAudioTrack>>>,
    data_channels: Mutex<Vec<Arc<DataChannel>>>,
    /// Explicit data channel ids in use
    reserved_channel_ids: Mutex<HashSet<u16>>,
    remote_tracks: Mutex<Vec<RemoteTrack>>,
    handle: AtomicU64,
    closed: AtomicBool,
}

impl PeerConnection {
    /// Create a session and register it with the factory.
    ///
    /// The returned handle carries two references: one held by the factory's
    /// live-session set (released by [`PeerConnection::close`]) and one owned
    /// by the caller.
    ///
    /// # Arguments
    /// * `factory` - Owning factory
    /// * `config` - Validated session configuration
    /// * `interop` - Host wrapper object, passed back in data channel events
    pub fn create(factory: &Arc<Factory>, config: SessionConfig, interop: *mut c_void) -> Result<(HandleId, Arc<Self>)> {
        factory.ensure_running()?;
        if interop.is_null() {
            return Err(Error::InvalidParameter("null interop handle".into()));
        }
        config.validate()?;

        let pc = factory
            .block_on(factory.api().new_peer_connection(config.to_rtc_configuration()))
            .map_err(|e| Error::Unknown(format!("failed to create peer connection: {}", e)))?;

        let session = Arc::new(Self {
            pc: Arc::new(pc),
            config,
            interop: UserData(interop),
            callbacks: Arc::new(PeerCallbacks::default()),
            interop_callbacks: Mutex::new(PeerConnectionInteropCallbacks::default()),
            state: Mutex::new(SessionState::Created),
            signaling: Mutex::new(SignalingState::default()),
            video_tracks: Mutex::new(Vec::new()),
            audio_tracks: Mutex::new(Vec::new()),
            data_channels: Mutex::new(Vec::new()),
            reserved_channel_ids: Mutex::new(HashSet::new()),
            remote_tracks: Mutex::new(Vec::new()),
            handle: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        });
        session.install_handlers(factory);

        let weak_factory = Arc::downgrade(factory);
        let handle = factory.registry().register(session.clone(), 2, move |session: Arc<PeerConnection>| {
            if !session.is_closed() {
                log::warn!("peer connection #{} released without close", session.handle());
                if let Some(factory) = weak_factory.upgrade() {
                    session.shut_down(&factory);
                }
            }
            log::info!("peer connection #{} destroyed", session.handle());
        });
        session.handle.store(handle, Ordering::SeqCst);
        factory.add_session(handle);
        log::info!("peer connection #{} created", handle);
        Ok((handle, session))
    }

    fn install_handlers(self: &Arc<Self>, factory: &Arc<Factory>) {
        let callbacks = self.callbacks.clone();
        self.pc.on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
            log::debug!("peer connection state: {}", s);
            if s == RTCPeerConnectionState::Connected {
                callbacks.dispatch(PeerEvent::Connected);
            }
            Box::pin(async {})
        }));

        let callbacks = self.callbacks.clone();
        self.pc.on_ice_connection_state_change(Box::new(move |s: RTCIceConnectionState| {
            callbacks.dispatch(PeerEvent::IceStateChanged(IceConnectionState::from_engine(s)));
            Box::pin(async {})
        }));

        let callbacks = self.callbacks.clone();
        self.pc.on_negotiation_needed(Box::new(move || {
            log::debug!("renegotiation needed");
            callbacks.dispatch(PeerEvent::RenegotiationNeeded);
            Box::pin(async {})
        }));

        let callbacks = self.callbacks.clone();
        self.pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            if let Some(init) = candidate.and_then(|c| c.to_json().ok()) {
                callbacks.dispatch(PeerEvent::IceCandidateReady {
                    candidate: &init.candidate,
                    mline_index: init.sdp_mline_index.map_or(-1, i32::from),
                    mid: init.sdp_mid.as_deref().unwrap_or_default(),
                });
            }
            Box::pin(async {})
        }));

        let weak: Weak<Self> = Arc::downgrade(self);
        self.pc.on_signaling_state_change(Box::new(move |s: RTCSignalingState| {
            if let Some(session) = weak.upgrade() {
                session.on_signaling_state(s);
            }
            Box::pin(async {})
        }));

        let weak: Weak<Self> = Arc::downgrade(self);
        let codecs = factory.backends().codecs.clone();
        let runtime = factory.runtime().clone();
        self.pc.on_track(Box::new(
            move |track: Arc<TrackRemote>, _receiver: Arc<RTCRtpReceiver>, _transceiver: Arc<RTCRtpTransceiver>| {
                if let Some(session) = weak.upgrade() {
                    session.on_remote_track(&runtime, track, codecs.clone());
                }
                Box::pin(async {})
            },
        ));

        let weak: Weak<Self> = Arc::downgrade(self);
        let weak_factory = Arc::downgrade(factory);
        self.pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
            if let (Some(session), Some(factory)) = (weak.upgrade(), weak_factory.upgrade()) {
                session.on_remote_data_channel(&factory, dc);
            }
            Box::pin(async {})
        }));
    }

    fn on_signaling_state(&self, s: RTCSignalingState) {
        let mut state = self.state.lock();
        if *state == SessionState::Closed {
            return;
        }
        *state = match s {
            RTCSignalingState::Stable => SessionState::Stable,
            RTCSignalingState::Closed => SessionState::Closed,
            _ => SessionState::Negotiating,
        };
    }

    fn on_remote_track(
        self: &Arc<Self>,
        runtime: &tokio::runtime::Handle,
        track: Arc<TrackRemote>,
        codecs: Arc<dyn CodecBackend>,
    ) {
        if self.is_closed() {
            return;
        }
        let remote = RemoteTrack::from_engine(&track);
        log::info!("remote {:?} track '{}' ({}) added", remote.kind, remote.id, remote.mime_type);
        self.remote_tracks.lock().push(remote.clone());
        self.callbacks.dispatch(PeerEvent::TrackAdded(remote.kind));

        let weak = Arc::downgrade(self);
        let callbacks = self.callbacks.clone();
        runtime.spawn(async move {
            run_track_reader(track, remote.kind, callbacks.clone(), codecs).await;
            if let Some(session) = weak.upgrade() {
                session.remote_tracks.lock().retain(|t| t.id != remote.id);
            }
            log::info!("remote {:?} track '{}' removed", remote.kind, remote.id);
            callbacks.dispatch(PeerEvent::TrackRemoved(remote.kind));
        });
    }

    fn on_remote_data_channel(&self, factory: &Arc<Factory>, dc: Arc<RTCDataChannel>) {
        if self.is_closed() {
            return;
        }
        let options = DataChannelOptions::from_engine(&dc);

        let mut callbacks = DataChannelCallbacks::default();
        let create_object = self.interop_callbacks.lock().data_channel_create_object;
        let interop = match (create_object, CString::new(options.label.clone())) {
            (Some(create), Ok(label)) => {
                let config = DataChannelConfig {
                    id: dc.id() as i32,
                    flags: options.flags(),
                    label: label.as_ptr(),
                };
                unsafe { create(self.interop.as_ptr(), config, &mut callbacks) }
            }
            _ => {
                log::warn!("no interop factory registered for remote data channel '{}'", options.label);
                std::ptr::null_mut()
            }
        };

        let channel = DataChannel::new(factory, dc, UserData(interop), &options);
        channel.callbacks().register_all(&callbacks);
        let handle = self.register_channel(factory, &channel);
        log::info!("remote data channel '{}' added (#{})", channel.label(), handle);
        self.callbacks.dispatch(PeerEvent::DataChannelAdded {
            interop: channel.interop(),
            handle,
        });
    }

    fn register_channel(&self, factory: &Factory, channel: &Arc<DataChannel>) -> HandleId {
        let handle = factory.registry().register(channel.clone(), 1, |channel: Arc<DataChannel>| {
            log::debug!("data channel '{}' destroyed", channel.label());
        });
        channel.set_handle(handle);
        self.data_channels.lock().push(channel.clone());
        handle
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn handle(&self) -> HandleId {
        self.handle.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn callbacks(&self) -> &Arc<PeerCallbacks> {
        &self.callbacks
    }

    pub fn engine(&self) -> &Arc<RTCPeerConnection> {
        &self.pc
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::InvalidOperation("peer connection is closed".into()));
        }
        Ok(())
    }

    fn begin_negotiation(&self) {
        let mut state = self.state.lock();
        if *state != SessionState::Closed {
            *state = SessionState::Negotiating;
        }
    }

    pub fn register_interop_callbacks(&self, callbacks: PeerConnectionInteropCallbacks) {
        *self.interop_callbacks.lock() = callbacks;
    }

    pub fn remote_tracks(&self) -> Vec<RemoteTrack> {
        self.remote_tracks.lock().clone()
    }

    pub fn pending_candidate_count(&self) -> usize {
        self.signaling.lock().pending_candidates.len()
    }

    pub fn has_remote_description(&self) -> bool {
        self.signaling.lock().has_remote_description
    }

    // ========================================================================
    // Negotiation
    // ========================================================================

    /// Start creating an offer. The result arrives through the local SDP
    /// ready callback. A failure is logged and raises no callback.
    pub fn create_offer(&self, factory: &Factory) -> Result<()> {
        self.ensure_open()?;
        self.begin_negotiation();
        let pc = self.pc.clone();
        let callbacks = self.callbacks.clone();
        factory.runtime().spawn(async move {
            let result = async {
                let offer = pc.create_offer(None).await?;
                pc.set_local_description(offer.clone()).await?;
                Ok::<_, webrtc::Error>(offer)
            }
            .await;
            match result {
                Ok(offer) => callbacks.dispatch(PeerEvent::LocalSdpReady {
                    sdp_type: "offer",
                    sdp: &offer.sdp,
                }),
                Err(e) => log::error!("failed to create offer: {}", e),
            }
        });
        Ok(())
    }

    /// Start creating an answer to the applied remote offer. A failure is
    /// logged and raises no callback.
    pub fn create_answer(&self, factory: &Factory) -> Result<()> {
        self.ensure_open()?;
        self.begin_negotiation();
        let pc = self.pc.clone();
        let callbacks = self.callbacks.clone();
        factory.runtime().spawn(async move {
            let result = async {
                let answer = pc.create_answer(None).await?;
                pc.set_local_description(answer.clone()).await?;
                Ok::<_, webrtc::Error>(answer)
            }
            .await;
            match result {
                Ok(answer) => callbacks.dispatch(PeerEvent::LocalSdpReady {
                    sdp_type: "answer",
                    sdp: &answer.sdp,
                }),
                Err(e) => log::error!("failed to create answer: {}", e),
            }
        });
        Ok(())
    }

    /// Apply a remote offer or answer.
    ///
    /// Candidates queued before this call are replayed on success and
    /// discarded on failure.
    pub fn set_remote_description(&self, factory: &Factory, sdp_type: &str, sdp: &str) -> Result<()> {
        self.ensure_open()?;
        let parsed = match sdp_type {
            "offer" => RTCSessionDescription::offer(sdp.to_owned()),
            "answer" => RTCSessionDescription::answer(sdp.to_owned()),
            "pranswer" => RTCSessionDescription::pranswer(sdp.to_owned()),
            other => return Err(Error::InvalidParameter(format!("unknown SDP type '{}'", other))),
        };
        let desc = parsed.map_err(|e| Error::InvalidParameter(format!("malformed {} SDP: {}", sdp_type, e)))?;

        self.begin_negotiation();
        if let Err(e) = factory.block_on(self.pc.set_remote_description(desc)) {
            let dropped = std::mem::take(&mut self.signaling.lock().pending_candidates);
            if !dropped.is_empty() {
                log::warn!(
                    "discarding {} queued ICE candidate(s) after failed remote description",
                    dropped.len()
                );
            }
            return Err(e.into());
        }

        let pending = {
            let mut signaling = self.signaling.lock();
            signaling.has_remote_description = true;
            std::mem::take(&mut signaling.pending_candidates)
        };
        for candidate in pending {
            if let Err(e) = factory.block_on(self.pc.add_ice_candidate(candidate)) {
                log::warn!("failed to apply queued ICE candidate: {}", e);
            }
        }
        Ok(())
    }

    /// Add a remote ICE candidate, queueing it until a remote description
    /// has been applied.
    pub fn add_ice_candidate(&self, factory: &Factory, candidate: &IceCandidate) -> Result<()> {
        self.ensure_open()?;
        if candidate.candidate.is_empty() {
            return Err(Error::InvalidParameter("empty ICE candidate".into()));
        }
        let init = candidate.to_init();
        {
            let mut signaling = self.signaling.lock();
            if !signaling.has_remote_description {
                log::debug!("queueing ICE candidate until remote description is set");
                signaling.pending_candidates.push(init);
                return Ok(());
            }
        }
        factory.block_on(self.pc.add_ice_candidate(init))?;
        Ok(())
    }

    // ========================================================================
    // Local video
    // ========================================================================

    /// Add a video track fed by a capture device.
    pub fn add_local_video_track_from_device(
        self: &Arc<Self>,
        factory: &Arc<Factory>,
        name: &str,
        request: &VideoDeviceRequest,
    ) -> Result<HandleId> {
        self.ensure_open()?;
        validate_track_name(name)?;
        let constraints = VideoCaptureConstraints::exact(request.width, request.height, request.framerate);
        let (device, source) = open_video_capture_device(
            factory.backends().capture.as_ref(),
            request.device_id.as_deref(),
            &constraints,
        )?;
        log::info!("opened capture device '{}' ({})", device.id, device.name);
        self.add_local_video_track(factory, name, source, None)
    }

    /// Add a video track fed by a host-driven external source. The track
    /// holds a reference on the source until it is destroyed.
    pub fn add_local_video_track_from_external_source(
        self: &Arc<Self>,
        factory: &Arc<Factory>,
        name: &str,
        source_handle: HandleId,
    ) -> Result<HandleId> {
        self.ensure_open()?;
        validate_track_name(name)?;
        let source = factory.registry().get::<ExternalVideoSource>(source_handle)?;
        if source.is_shut_down() {
            return Err(Error::InvalidOperation("external video source is shut down".into()));
        }
        factory.registry().add_ref(source_handle)?;
        let result = self.add_local_video_track(factory, name, source.frame_source(), Some(source_handle));
        if result.is_err() {
            let _ = factory.registry().remove_ref(source_handle);
        }
        result
    }

    fn add_local_video_track(
        self: &Arc<Self>,
        factory: &Arc<Factory>,
        name: &str,
        source: Box<dyn VideoFrameSource>,
        external_source: Option<HandleId>,
    ) -> Result<HandleId> {
        let encoder = factory.backends().codecs.video_encoder();
        let capability = encoder
            .as_ref()
            .map(|e| e.capability())
            .unwrap_or_else(default_video_capability);
        let track = Arc::new(TrackLocalStaticSample::new(
            capability,
            name.to_owned(),
            LOCAL_STREAM_ID.to_owned(),
        ));
        let sender = self.attach_engine_track(factory, &track)?;

        let control = Arc::new(PumpControl::default());
        let frame_callbacks = Arc::new(LocalFrameCallbacks::default());
        let delivered = frame_callbacks.clone();
        let pump = spawn_video_pump(
            factory.runtime(),
            source,
            encoder,
            track.clone(),
            control.clone(),
            move |frame| delivered.deliver(frame),
        );

        let local = Arc::new(LocalVideoTrack::new(
            name,
            track,
            control,
            frame_callbacks,
            Attachment {
                sender,
                pump: Some(pump),
            },
            external_source,
        ));

        let weak_factory = Arc::downgrade(factory);
        let handle = factory.registry().register(local.clone(), 2, move |track: Arc<LocalVideoTrack>| {
            if let Some(attachment) = track.take_attachment() {
                log::warn!("local video track '{}' destroyed while attached", track.name());
                drop(attachment);
            }
            if let (Some(source), Some(factory)) = (track.external_source(), weak_factory.upgrade()) {
                let _ = factory.registry().remove_ref(source);
            }
            log::debug!("local video track '{}' destroyed", track.name());
        });
        local.set_handle(handle);
        self.video_tracks.lock().push(local);
        log::info!("local video track '{}' attached (#{})", name, handle);
        Ok(handle)
    }

    fn attach_engine_track(&self, factory: &Factory, track: &Arc<TrackLocalStaticSample>) -> Result<Arc<RTCRtpSender>> {
        let sender = factory.block_on(
            self.pc
                .add_track(track.clone() as Arc<dyn TrackLocal + Send + Sync>),
        )?;

        // Drain RTCP so the interceptors keep running.
        let rtcp_sender = sender.clone();
        factory.runtime().spawn(async move {
            let mut rtcp_buf = vec![0u8; 1500];
            while rtcp_sender.read(&mut rtcp_buf).await.is_ok() {}
        });
        Ok(sender)
    }

    fn detach_engine_sender(&self, factory: &Factory, attachment: Option<Attachment>) {
        let Some(attachment) = attachment else {
            return;
        };
        if let Err(e) = factory.block_on(self.pc.remove_track(&attachment.sender)) {
            log::warn!("failed to remove track sender: {}", e);
        }
    }

    /// Detach a local video track. Renegotiation is signalled separately by
    /// the engine.
    pub fn remove_local_video_track(&self, factory: &Factory, track_handle: HandleId) -> Result<()> {
        self.ensure_open()?;
        let track = {
            let mut tracks = self.video_tracks.lock();
            let pos = tracks
                .iter()
                .position(|t| t.handle() == track_handle)
                .ok_or_else(|| Error::InvalidParameter("track is not attached to this peer connection".into()))?;
            tracks.remove(pos)
        };
        self.detach_video_track(factory, &track);
        Ok(())
    }

    /// Detach every local video track built on an external source.
    /// Returns how many were removed.
    pub fn remove_local_video_tracks_from_source(&self, factory: &Factory, source_handle: HandleId) -> Result<usize> {
        self.ensure_open()?;
        let removed: Vec<_> = {
            let mut tracks = self.video_tracks.lock();
            let (from_source, keep): (Vec<_>, Vec<_>) = std::mem::take(&mut *tracks)
                .into_iter()
                .partition(|t| t.external_source() == Some(source_handle));
            *tracks = keep;
            from_source
        };
        for track in &removed {
            self.detach_video_track(factory, track);
        }
        Ok(removed.len())
    }

    fn detach_video_track(&self, factory: &Factory, track: &Arc<LocalVideoTrack>) {
        self.detach_engine_sender(factory, track.take_attachment());
        log::info!("local video track '{}' detached", track.name());
        let _ = factory.registry().remove_ref(track.handle());
    }

    pub fn local_video_track_count(&self) -> usize {
        self.video_tracks.lock().len()
    }

    // ========================================================================
    // Local audio
    // ========================================================================

    /// Attach a microphone-fed audio track. Each call attaches another track.
    pub fn add_local_audio_track(&self, factory: &Factory) -> Result<()> {
        self.ensure_open()?;
        let microphone = factory.backends().capture.open_microphone();
        let format = microphone
            .as_ref()
            .map(|m| m.format())
            .unwrap_or_else(AudioFormat::standard);
        let encoder = factory.backends().codecs.audio_encoder(format);
        let capability = encoder
            .as_ref()
            .map(|e| e.capability())
            .unwrap_or_else(default_audio_capability);
        let track = Arc::new(TrackLocalStaticSample::new(
            capability,
            LOCAL_AUDIO_TRACK_LABEL.to_owned(),
            LOCAL_STREAM_ID.to_owned(),
        ));
        let sender = self.attach_engine_track(factory, &track)?;

        let control = Arc::new(PumpControl::default());
        let pump = microphone.map(|mic| {
            let callbacks = self.callbacks.clone();
            spawn_audio_pump(factory.runtime(), mic, encoder, track.clone(), control.clone(), move |frame| {
                callbacks.dispatch(PeerEvent::LocalAudioFrame(frame))
            })
        });

        self.audio_tracks
            .lock()
            .push(Arc::new(LocalAudioTrack::new(track, control, Attachment { sender, pump })));
        log::info!("local audio track attached");
        Ok(())
    }

    /// Detach the most recently added local audio track, if any.
    pub fn remove_local_audio_track(&self, factory: &Factory) -> Result<()> {
        self.ensure_open()?;
        let Some(track) = self.audio_tracks.lock().pop() else {
            log::debug!("no local audio track to remove");
            return Ok(());
        };
        self.detach_engine_sender(factory, track.take_attachment());
        log::info!("local audio track detached");
        Ok(())
    }

    /// Soft-mute every local audio track.
    pub fn set_local_audio_track_enabled(&self, enabled: bool) -> Result<()> {
        self.ensure_open()?;
        for track in self.audio_tracks.lock().iter() {
            track.set_enabled(enabled);
        }
        Ok(())
    }

    /// Enabled flag of the most recent local audio track; false if none.
    pub fn is_local_audio_track_enabled(&self) -> bool {
        self.audio_tracks
            .lock()
            .last()
            .map_or(false, |t| t.is_enabled())
    }

    pub fn local_audio_track_count(&self) -> usize {
        self.audio_tracks.lock().len()
    }

    // ========================================================================
    // Data channels
    // ========================================================================

    /// Create a data channel. The returned handle's single reference belongs
    /// to the session and is released when the channel is removed.
    pub fn add_data_channel(
        &self,
        factory: &Factory,
        interop: *mut c_void,
        options: &DataChannelOptions,
        callbacks: &DataChannelCallbacks,
    ) -> Result<HandleId> {
        self.ensure_open()?;
        if interop.is_null() {
            return Err(Error::InvalidParameter("null data channel interop handle".into()));
        }
        if let Some(id) = options.id {
            if !self.reserved_channel_ids.lock().insert(id) {
                return Err(Error::InvalidParameter(format!("data channel id {} already in use", id)));
            }
        }

        let created = factory.block_on(self.pc.create_data_channel(&options.label, Some(options.to_init())));
        let dc = match created {
            Ok(dc) => dc,
            Err(e) => {
                if let Some(id) = options.id {
                    self.reserved_channel_ids.lock().remove(&id);
                }
                return Err(e.into());
            }
        };

        let channel = DataChannel::new(factory, dc, UserData(interop), options);
        channel.callbacks().register_all(callbacks);
        let handle = self.register_channel(factory, &channel);
        log::info!("data channel '{}' added (#{})", options.label, handle);
        Ok(handle)
    }

    /// Close and detach a data channel.
    pub fn remove_data_channel(&self, factory: &Factory, channel_handle: HandleId) -> Result<()> {
        self.ensure_open()?;
        let channel = {
            let mut channels = self.data_channels.lock();
            let pos = channels
                .iter()
                .position(|c| c.handle() == channel_handle)
                .ok_or_else(|| Error::InvalidParameter("data channel is not owned by this peer connection".into()))?;
            channels.remove(pos)
        };
        self.detach_data_channel(factory, &channel);
        Ok(())
    }

    fn detach_data_channel(&self, factory: &Factory, channel: &Arc<DataChannel>) {
        channel.close(factory);
        if let Ok(id) = u16::try_from(channel.id()) {
            self.reserved_channel_ids.lock().remove(&id);
        }
        let handle = channel.handle();
        self.callbacks.dispatch(PeerEvent::DataChannelRemoved {
            interop: channel.interop(),
            handle,
        });
        log::info!("data channel '{}' removed", channel.label());
        let _ = factory.registry().remove_ref(handle);
    }

    pub fn data_channel_count(&self) -> usize {
        self.data_channels.lock().len()
    }

    // ========================================================================
    // Close
    // ========================================================================

    /// Close the session. Idempotent.
    ///
    /// Detaches every local track and data channel, closes the engine
    /// connection and releases the factory's reference on the session.
    pub fn close(&self, factory: &Factory) -> Result<()> {
        if self.shut_down(factory) {
            let _ = factory.registry().remove_ref(self.handle());
        }
        Ok(())
    }

    /// Run the close cascade once. Returns false if it already ran.
    fn shut_down(&self, factory: &Factory) -> bool {
        if self
            .closed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }
        *self.state.lock() = SessionState::Closed;

        let videos = std::mem::take(&mut *self.video_tracks.lock());
        for track in &videos {
            self.detach_video_track(factory, track);
        }
        let audios = std::mem::take(&mut *self.audio_tracks.lock());
        for track in &audios {
            self.detach_engine_sender(factory, track.take_attachment());
        }
        let channels = std::mem::take(&mut *self.data_channels.lock());
        for channel in &channels {
            self.detach_data_channel(factory, channel);
        }

        if let Err(e) = factory.block_on(self.pc.close()) {
            log::warn!("error while closing peer connection: {}", e);
        }
        self.signaling.lock().pending_candidates.clear();
        self.callbacks.clear_all();

        let handle = self.handle();
        factory.remove_session(handle);
        log::info!("peer connection #{} closed", handle);
        true
    }
}

fn validate_track_name(name: &str) -> Result<()> {
    if !is_valid_token(name) {
        return Err(Error::InvalidParameter(format!(
            "track name '{}' is not a valid SDP token",
            name
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::tests::FakeCaptureBackend;
    use crate::codec::NullCodecBackend;
    use crate::data_channel::DataChannelState;
    use crate::factory::Backends;
    use crate::interop::types::{DATA_CHANNEL_FLAG_ORDERED, DATA_CHANNEL_FLAG_RELIABLE};
    use crate::media::external_source::ExternalFrameFormat;
    use std::ffi::{c_char, CStr};
    use std::ptr::NonNull;
    use std::sync::atomic::AtomicUsize;
    use std::time::{Duration, Instant};

    fn interop() -> *mut c_void {
        NonNull::<c_void>::dangling().as_ptr()
    }

    fn factory_with_devices(ids: &[&str]) -> Arc<Factory> {
        let _ = env_logger::builder().is_test(true).try_init();
        Factory::new(Backends {
            capture: Arc::new(FakeCaptureBackend::with_devices(ids)),
            codecs: Arc::new(NullCodecBackend),
        })
        .unwrap()
    }

    fn new_session(factory: &Arc<Factory>) -> (HandleId, Arc<PeerConnection>) {
        PeerConnection::create(factory, SessionConfig::default(), interop()).unwrap()
    }

    unsafe extern "C" fn count_renegotiation(user: *mut c_void) {
        (*(user as *const AtomicUsize)).fetch_add(1, Ordering::SeqCst);
    }

    #[test]
    fn test_create_rejects_null_interop() {
        let factory = factory_with_devices(&[]);
        let result = PeerConnection::create(&factory, SessionConfig::default(), std::ptr::null_mut());
        assert!(matches!(result, Err(Error::InvalidParameter(_))));
        assert_eq!(factory.live_session_count(), 0);
    }

    #[test]
    fn test_create_registers_session() {
        let factory = factory_with_devices(&[]);
        let (handle, session) = new_session(&factory);
        assert_ne!(handle, 0);
        assert_eq!(session.handle(), handle);
        assert_eq!(session.state(), SessionState::Created);
        assert_eq!(factory.registry().ref_count(handle), Some(2));
        assert_eq!(factory.live_session_count(), 1);
        session.close(&factory).unwrap();
        assert_eq!(factory.live_session_count(), 0);
    }

    #[test]
    fn test_audio_track_enable_toggle() {
        let factory = factory_with_devices(&[]);
        let (_, session) = new_session(&factory);
        assert!(!session.is_local_audio_track_enabled());

        session.add_local_audio_track(&factory).unwrap();
        assert!(session.is_local_audio_track_enabled());

        session.set_local_audio_track_enabled(false).unwrap();
        for _ in 0..3 {
            assert!(!session.is_local_audio_track_enabled());
        }
        session.set_local_audio_track_enabled(true).unwrap();
        assert!(session.is_local_audio_track_enabled());

        session.remove_local_audio_track(&factory).unwrap();
        assert_eq!(session.local_audio_track_count(), 0);
        // nothing left to remove
        session.remove_local_audio_track(&factory).unwrap();
        session.close(&factory).unwrap();
    }

    #[test]
    fn test_video_track_from_device() {
        let factory = factory_with_devices(&["cam0"]);
        let (_, session) = new_session(&factory);

        let missing = VideoDeviceRequest {
            device_id: Some("no-such-camera".into()),
            ..Default::default()
        };
        assert!(matches!(
            session.add_local_video_track_from_device(&factory, "video", &missing),
            Err(Error::NotFound(_))
        ));

        let any = VideoDeviceRequest::default();
        let track = session
            .add_local_video_track_from_device(&factory, "video", &any)
            .unwrap();
        assert_ne!(track, 0);
        assert_eq!(session.local_video_track_count(), 1);
        let local = factory.registry().get::<LocalVideoTrack>(track).unwrap();
        assert!(local.is_attached());

        session.remove_local_video_track(&factory, track).unwrap();
        assert!(!local.is_attached());
        assert!(matches!(
            session.remove_local_video_track(&factory, track),
            Err(Error::InvalidParameter(_))
        ));
        session.close(&factory).unwrap();
    }

    #[test]
    fn test_video_track_name_must_be_token() {
        let factory = factory_with_devices(&["cam0"]);
        let (_, session) = new_session(&factory);
        let result = session.add_local_video_track_from_device(&factory, "bad name", &VideoDeviceRequest::default());
        assert!(matches!(result, Err(Error::InvalidParameter(_))));
        session.close(&factory).unwrap();
    }

    #[test]
    fn test_duplicate_data_channel_id() {
        let factory = factory_with_devices(&[]);
        let (_, session) = new_session(&factory);
        let options = DataChannelOptions::from_raw(5, DATA_CHANNEL_FLAG_ORDERED | DATA_CHANNEL_FLAG_RELIABLE, Some("ctrl"))
            .unwrap();
        let callbacks = DataChannelCallbacks::default();

        let first = session.add_data_channel(&factory, interop(), &options, &callbacks).unwrap();
        assert!(matches!(
            session.add_data_channel(&factory, interop(), &options, &callbacks),
            Err(Error::InvalidParameter(_))
        ));
        assert_eq!(session.data_channel_count(), 1);

        // the id is free again once the channel is gone
        session.remove_data_channel(&factory, first).unwrap();
        assert!(!factory.registry().is_live(first));
        session.add_data_channel(&factory, interop(), &options, &callbacks).unwrap();
        session.close(&factory).unwrap();
    }

    #[test]
    fn test_track_enable_does_not_renegotiate() {
        let factory = factory_with_devices(&["cam0"]);
        let (_, session) = new_session(&factory);
        let renegotiations = AtomicUsize::new(0);
        session.callbacks().renegotiation_needed.register(
            Some(count_renegotiation),
            &renegotiations as *const _ as *mut c_void,
        );

        let track = session
            .add_local_video_track_from_device(&factory, "video", &VideoDeviceRequest::default())
            .unwrap();
        session.add_local_audio_track(&factory).unwrap();
        std::thread::sleep(Duration::from_millis(500));
        renegotiations.store(0, Ordering::SeqCst);

        let local = factory.registry().get::<LocalVideoTrack>(track).unwrap();
        local.set_enabled(false);
        session.set_local_audio_track_enabled(false).unwrap();
        local.set_enabled(true);
        session.set_local_audio_track_enabled(true).unwrap();
        std::thread::sleep(Duration::from_millis(200));

        assert_eq!(renegotiations.load(Ordering::SeqCst), 0);
        session.close(&factory).unwrap();
    }

    #[test]
    fn test_candidates_queued_until_remote_description() {
        let factory = factory_with_devices(&[]);
        let (_, offerer) = new_session(&factory);
        let (_, answerer) = new_session(&factory);

        let candidate = IceCandidate {
            candidate: "candidate:1 1 udp 2130706431 192.168.1.2 50000 typ host".into(),
            sdp_mid: "0".into(),
            sdp_mline_index: 0,
        };
        answerer.add_ice_candidate(&factory, &candidate).unwrap();
        answerer.add_ice_candidate(&factory, &candidate).unwrap();
        assert_eq!(answerer.pending_candidate_count(), 2);
        assert!(!answerer.has_remote_description());

        offerer.add_local_audio_track(&factory).unwrap();
        let offer = factory.block_on(offerer.engine().create_offer(None)).unwrap();
        answerer
            .set_remote_description(&factory, "offer", &offer.sdp)
            .unwrap();
        assert!(answerer.has_remote_description());
        assert_eq!(answerer.pending_candidate_count(), 0);

        offerer.close(&factory).unwrap();
        answerer.close(&factory).unwrap();
    }

    #[test]
    fn test_remote_description_validation() {
        let factory = factory_with_devices(&[]);
        let (_, session) = new_session(&factory);
        assert!(matches!(
            session.set_remote_description(&factory, "rollback", "v=0"),
            Err(Error::InvalidParameter(_))
        ));
        assert!(matches!(
            session.set_remote_description(&factory, "offer", "not an sdp"),
            Err(Error::InvalidParameter(_))
        ));
        assert!(matches!(
            session.add_ice_candidate(&factory, &IceCandidate {
                candidate: String::new(),
                sdp_mid: String::new(),
                sdp_mline_index: -1,
            }),
            Err(Error::InvalidParameter(_))
        ));
        session.close(&factory).unwrap();
    }

    #[test]
    fn test_operations_after_close() {
        let factory = factory_with_devices(&["cam0"]);
        let (handle, session) = new_session(&factory);
        let track = session
            .add_local_video_track_from_device(&factory, "video", &VideoDeviceRequest::default())
            .unwrap();
        let options = DataChannelOptions::from_raw(-1, DATA_CHANNEL_FLAG_ORDERED, Some("chat")).unwrap();
        let channel = session
            .add_data_channel(&factory, interop(), &options, &DataChannelCallbacks::default())
            .unwrap();

        session.close(&factory).unwrap();
        session.close(&factory).unwrap();
        assert_eq!(session.state(), SessionState::Closed);
        assert!(!factory.registry().is_live(channel));
        // the caller still owns its reference on the track
        assert!(!factory.registry().get::<LocalVideoTrack>(track).unwrap().is_attached());

        assert!(matches!(session.create_offer(&factory), Err(Error::InvalidOperation(_))));
        assert!(matches!(session.add_local_audio_track(&factory), Err(Error::InvalidOperation(_))));
        assert!(matches!(
            session.add_data_channel(&factory, interop(), &options, &DataChannelCallbacks::default()),
            Err(Error::InvalidOperation(_))
        ));

        assert_eq!(factory.registry().remove_ref(handle).unwrap(), 0);
        assert!(matches!(
            factory.registry().get::<PeerConnection>(handle),
            Err(Error::InvalidHandle)
        ));
        assert_eq!(factory.registry().remove_ref(track).unwrap(), 0);
        assert_eq!(factory.live_object_count(), 0);
    }

    #[test]
    fn test_release_without_close_cascades() {
        let factory = factory_with_devices(&["cam0"]);
        let (handle, session) = new_session(&factory);
        let options = DataChannelOptions::from_raw(-1, DATA_CHANNEL_FLAG_ORDERED, Some("chat")).unwrap();
        let channel = session
            .add_data_channel(&factory, interop(), &options, &DataChannelCallbacks::default())
            .unwrap();
        let track = session
            .add_local_video_track_from_device(&factory, "video", &VideoDeviceRequest::default())
            .unwrap();

        assert_eq!(factory.registry().remove_ref(handle).unwrap(), 1);
        assert!(!session.is_closed());
        assert_eq!(factory.registry().remove_ref(handle).unwrap(), 0);

        assert!(session.is_closed());
        assert_eq!(session.state(), SessionState::Closed);
        assert!(!factory.registry().is_live(channel));
        assert!(!factory.registry().get::<LocalVideoTrack>(track).unwrap().is_attached());
        assert_eq!(factory.live_session_count(), 0);

        assert_eq!(factory.registry().remove_ref(track).unwrap(), 0);
        assert_eq!(factory.live_object_count(), 0);
        factory.shutdown().unwrap();
    }

    unsafe extern "C" fn ignore_frame_request(_user: *mut c_void, _source: *mut c_void, _request_id: u32, _ts: i64) {}

    #[test]
    fn test_external_source_track_holds_source_reference() {
        let factory = factory_with_devices(&[]);
        let (_, session) = new_session(&factory);
        let source = ExternalVideoSource::new(ExternalFrameFormat::I420A, ignore_frame_request, std::ptr::null_mut());
        let source_handle = factory
            .registry()
            .register(source.clone(), 1, |source: Arc<ExternalVideoSource>| source.shutdown());
        source.set_handle(source_handle);

        let track = session
            .add_local_video_track_from_external_source(&factory, "ext", source_handle)
            .unwrap();
        assert_eq!(factory.registry().ref_count(source_handle), Some(2));
        // a rejected track takes no reference
        assert!(session
            .add_local_video_track_from_external_source(&factory, "bad name", source_handle)
            .is_err());
        assert_eq!(factory.registry().ref_count(source_handle), Some(2));

        // the track keeps the source alive after the host lets go
        assert_eq!(factory.registry().remove_ref(source_handle).unwrap(), 1);
        assert!(!source.is_shut_down());

        session.remove_local_video_track(&factory, track).unwrap();
        assert_eq!(factory.registry().ref_count(source_handle), Some(1));
        assert_eq!(factory.registry().remove_ref(track).unwrap(), 0);
        assert!(!factory.registry().is_live(source_handle));
        assert!(source.is_shut_down());

        assert!(matches!(
            session.add_local_video_track_from_external_source(&factory, "ext", source_handle),
            Err(Error::InvalidHandle)
        ));
        session.close(&factory).unwrap();
    }

    #[test]
    fn test_remove_tracks_by_source() {
        let factory = factory_with_devices(&[]);
        let (_, session) = new_session(&factory);
        let source = ExternalVideoSource::new(ExternalFrameFormat::Argb32, ignore_frame_request, std::ptr::null_mut());
        let source_handle = factory
            .registry()
            .register(source.clone(), 1, |source: Arc<ExternalVideoSource>| source.shutdown());
        source.set_handle(source_handle);

        let a = session.add_local_video_track_from_external_source(&factory, "a", source_handle).unwrap();
        let b = session.add_local_video_track_from_external_source(&factory, "b", source_handle).unwrap();
        assert_eq!(factory.registry().ref_count(source_handle), Some(3));

        assert_eq!(session.remove_local_video_tracks_from_source(&factory, source_handle).unwrap(), 2);
        assert_eq!(session.local_video_track_count(), 0);
        factory.registry().remove_ref(a).unwrap();
        factory.registry().remove_ref(b).unwrap();
        assert_eq!(factory.registry().ref_count(source_handle), Some(1));

        session.close(&factory).unwrap();
        factory.registry().remove_ref(source_handle).unwrap();
    }

    /// Host state behind one session of a loopback pair.
    #[derive(Default)]
    struct HostSide {
        remote: Mutex<Option<(Arc<Factory>, Arc<PeerConnection>)>>,
        sdp_types: Mutex<Vec<String>>,
        connected: AtomicBool,
        created: Mutex<Vec<(String, u32)>>,
        added: AtomicUsize,
        removed: AtomicUsize,
        messages: Mutex<Vec<Vec<u8>>>,
        states: Mutex<Vec<i32>>,
    }

    fn host_ptr(side: &'static HostSide) -> *mut c_void {
        side as *const HostSide as *mut c_void
    }

    unsafe fn host<'a>(user: *mut c_void) -> &'a HostSide {
        &*(user as *const HostSide)
    }

    unsafe extern "C" fn forward_sdp(sdp_type: *const c_char, sdp: *const c_char, user: *mut c_void) {
        let side = host(user);
        let sdp_type = CStr::from_ptr(sdp_type).to_string_lossy().into_owned();
        let sdp = CStr::from_ptr(sdp).to_string_lossy().into_owned();
        side.sdp_types.lock().push(sdp_type.clone());
        let Some((factory, remote)) = side.remote.lock().clone() else {
            return;
        };
        if let Err(e) = remote.set_remote_description(&factory, &sdp_type, &sdp) {
            log::error!("remote description rejected: {}", e);
            return;
        }
        if sdp_type == "offer" {
            if let Err(e) = remote.create_answer(&factory) {
                log::error!("answer failed: {}", e);
            }
        }
    }

    unsafe extern "C" fn forward_candidate(candidate: *const c_char, mline: i32, mid: *const c_char, user: *mut c_void) {
        let side = host(user);
        let Some((factory, remote)) = side.remote.lock().clone() else {
            return;
        };
        let candidate = IceCandidate {
            candidate: CStr::from_ptr(candidate).to_string_lossy().into_owned(),
            sdp_mid: CStr::from_ptr(mid).to_string_lossy().into_owned(),
            sdp_mline_index: mline,
        };
        if let Err(e) = remote.add_ice_candidate(&factory, &candidate) {
            log::warn!("candidate rejected: {}", e);
        }
    }

    unsafe extern "C" fn mark_connected(user: *mut c_void) {
        host(user).connected.store(true, Ordering::SeqCst);
    }

    unsafe extern "C" fn count_added(_interop: *mut c_void, _handle: *mut c_void, user: *mut c_void) {
        host(user).added.fetch_add(1, Ordering::SeqCst);
    }

    unsafe extern "C" fn count_removed(_interop: *mut c_void, _handle: *mut c_void, user: *mut c_void) {
        host(user).removed.fetch_add(1, Ordering::SeqCst);
    }

    unsafe extern "C" fn record_message(data: *const c_void, size: u64, user: *mut c_void) {
        let bytes = std::slice::from_raw_parts(data as *const u8, size as usize);
        host(user).messages.lock().push(bytes.to_vec());
    }

    unsafe extern "C" fn record_state(state: i32, _id: i32, user: *mut c_void) {
        host(user).states.lock().push(state);
    }

    unsafe extern "C" fn create_channel_object(
        parent: *mut c_void,
        config: DataChannelConfig,
        callbacks: *mut DataChannelCallbacks,
    ) -> *mut c_void {
        let side = host(parent);
        let label = CStr::from_ptr(config.label).to_string_lossy().into_owned();
        side.created.lock().push((label, config.flags));
        (*callbacks).message_callback = Some(record_message);
        (*callbacks).message_user_data = parent;
        parent
    }

    fn wait_until(mut done: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(10);
        while Instant::now() < deadline {
            if done() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        done()
    }

    #[test]
    fn test_loopback_session_pair() {
        let factory = factory_with_devices(&[]);
        let offer_side: &'static HostSide = Box::leak(Box::default());
        let answer_side: &'static HostSide = Box::leak(Box::default());
        let (offer_handle, offerer) =
            PeerConnection::create(&factory, SessionConfig::default(), host_ptr(offer_side)).unwrap();
        let (answer_handle, answerer) =
            PeerConnection::create(&factory, SessionConfig::default(), host_ptr(answer_side)).unwrap();
        *offer_side.remote.lock() = Some((factory.clone(), answerer.clone()));
        *answer_side.remote.lock() = Some((factory.clone(), offerer.clone()));

        for (peer, side) in [(&offerer, offer_side), (&answerer, answer_side)] {
            let user = host_ptr(side);
            peer.callbacks().local_sdp_ready.register(Some(forward_sdp), user);
            peer.callbacks().ice_candidate_ready.register(Some(forward_candidate), user);
            peer.callbacks().connected.register(Some(mark_connected), user);
            peer.callbacks().data_channel_added.register(Some(count_added), user);
            peer.callbacks().data_channel_removed.register(Some(count_removed), user);
            peer.register_interop_callbacks(PeerConnectionInteropCallbacks {
                data_channel_create_object: Some(create_channel_object),
            });
        }

        let chat = DataChannelOptions::from_raw(-1, DATA_CHANNEL_FLAG_ORDERED | DATA_CHANNEL_FLAG_RELIABLE, Some("chat"))
            .unwrap();
        let lossy = DataChannelOptions::from_raw(-1, 0, Some("lossy")).unwrap();
        let state_callbacks = DataChannelCallbacks {
            state_callback: Some(record_state),
            state_user_data: host_ptr(offer_side),
            ..Default::default()
        };
        let chat_handle = offerer
            .add_data_channel(&factory, host_ptr(offer_side), &chat, &state_callbacks)
            .unwrap();
        offerer
            .add_data_channel(&factory, host_ptr(offer_side), &lossy, &DataChannelCallbacks::default())
            .unwrap();
        let local = factory.registry().get::<DataChannel>(chat_handle).unwrap();
        assert_eq!(local.state(), DataChannelState::Connecting);
        assert!(matches!(local.send(&factory, b"early"), Err(Error::InvalidOperation(_))));

        offerer.create_offer(&factory).unwrap();
        assert!(wait_until(|| local.state() == DataChannelState::Open));
        assert!(wait_until(|| answer_side.added.load(Ordering::SeqCst) == 2));
        assert!(wait_until(|| offer_side.connected.load(Ordering::SeqCst)
            && answer_side.connected.load(Ordering::SeqCst)));
        assert_eq!(*offer_side.sdp_types.lock(), vec!["offer"]);
        assert_eq!(*answer_side.sdp_types.lock(), vec!["answer"]);
        // only channels opened by the remote peer raise the added event
        assert_eq!(offer_side.added.load(Ordering::SeqCst), 0);
        assert_eq!(answerer.data_channel_count(), 2);

        let mut created = answer_side.created.lock().clone();
        created.sort();
        assert_eq!(
            created,
            vec![
                ("chat".to_string(), DATA_CHANNEL_FLAG_ORDERED | DATA_CHANNEL_FLAG_RELIABLE),
                ("lossy".to_string(), 0),
            ]
        );

        local.send(&factory, b"hello").unwrap();
        local.send(&factory, b"world").unwrap();
        assert!(wait_until(|| answer_side.messages.lock().len() == 2));
        assert_eq!(*answer_side.messages.lock(), vec![b"hello".to_vec(), b"world".to_vec()]);

        offerer.close(&factory).unwrap();
        assert_eq!(
            *offer_side.states.lock(),
            vec![
                DataChannelState::Open as i32,
                DataChannelState::Closing as i32,
                DataChannelState::Closed as i32,
            ]
        );
        assert_eq!(offer_side.removed.load(Ordering::SeqCst), 2);
        assert!(!factory.registry().is_live(chat_handle));

        answerer.close(&factory).unwrap();
        assert_eq!(answer_side.removed.load(Ordering::SeqCst), 2);

        factory.registry().remove_ref(offer_handle).unwrap();
        factory.registry().remove_ref(answer_handle).unwrap();
        assert_eq!(factory.live_object_count(), 0);
    }
}
