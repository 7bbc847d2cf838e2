//! Peer connection entry points.

use super::types::*;
use super::{add_ref, cstr, cstr_non_empty, guard, handle_id, raw_handle, remove_ref, resolve, write_out};
use crate::data_channel::DataChannelOptions;
use crate::factory::GlobalFactory;
use crate::peer::{IceCandidate, PeerConnection, SessionConfig, VideoDeviceRequest};
use crate::result::{Error, MrsResult};
use std::ffi::{c_char, c_void};

// ============================================================================
// Lifetime
// ============================================================================

/// Create a peer connection.
///
/// # Arguments
/// * `config` - Session configuration
/// * `interop_handle` - Host wrapper object (must not be null)
/// * `peer_handle_out` - Receives the new handle, owning one reference
///
/// # Returns
/// `InvalidParameter` for a null interop handle or an unsupported configuration
#[no_mangle]
pub unsafe extern "system" fn mrsPeerConnectionCreate(
    config: PeerConnectionConfiguration,
    interop_handle: InteropHandle,
    peer_handle_out: *mut PeerConnectionHandle,
) -> MrsResult {
    guard("mrsPeerConnectionCreate", || {
        if peer_handle_out.is_null() {
            return Err(Error::InvalidParameter("null peer handle out-pointer".into()));
        }
        *peer_handle_out = std::ptr::null_mut();
        let session_config = SessionConfig::from_raw(&config, cstr(config.encoded_ice_servers))?;
        let factory = GlobalFactory::instance()?;
        let (handle, _) = PeerConnection::create(&factory, session_config, interop_handle)?;
        write_out(peer_handle_out, raw_handle(handle))
    })
}

#[no_mangle]
pub unsafe extern "system" fn mrsPeerConnectionAddRef(peer: PeerConnectionHandle) -> MrsResult {
    guard("mrsPeerConnectionAddRef", || add_ref(peer))
}

/// Release one reference. The session itself stays alive until it has
/// also been closed.
#[no_mangle]
pub unsafe extern "system" fn mrsPeerConnectionRemoveRef(peer: PeerConnectionHandle) -> MrsResult {
    guard("mrsPeerConnectionRemoveRef", || remove_ref(peer))
}

/// Close the connection, detaching every track and data channel. Idempotent.
#[no_mangle]
pub unsafe extern "system" fn mrsPeerConnectionClose(peer: PeerConnectionHandle) -> MrsResult {
    guard("mrsPeerConnectionClose", || {
        let (factory, session) = resolve::<PeerConnection>(peer)?;
        session.close(&factory)
    })
}

#[no_mangle]
pub unsafe extern "system" fn mrsPeerConnectionRegisterInteropCallbacks(
    peer: PeerConnectionHandle,
    callbacks: *const PeerConnectionInteropCallbacks,
) -> MrsResult {
    guard("mrsPeerConnectionRegisterInteropCallbacks", || {
        if callbacks.is_null() {
            return Err(Error::InvalidParameter("null interop callbacks".into()));
        }
        let (_, session) = resolve::<PeerConnection>(peer)?;
        session.register_interop_callbacks(*callbacks);
        Ok(())
    })
}

// ============================================================================
// Event Callbacks
// ============================================================================

#[no_mangle]
pub unsafe extern "system" fn mrsPeerConnectionRegisterConnectedCallback(
    peer: PeerConnectionHandle,
    callback: Option<PeerConnectionConnectedCallback>,
    user_data: *mut c_void,
) -> MrsResult {
    guard("mrsPeerConnectionRegisterConnectedCallback", || {
        let (_, session) = resolve::<PeerConnection>(peer)?;
        session.callbacks().connected.register(callback, user_data);
        Ok(())
    })
}

#[no_mangle]
pub unsafe extern "system" fn mrsPeerConnectionRegisterLocalSdpReadytoSendCallback(
    peer: PeerConnectionHandle,
    callback: Option<PeerConnectionLocalSdpReadytoSendCallback>,
    user_data: *mut c_void,
) -> MrsResult {
    guard("mrsPeerConnectionRegisterLocalSdpReadytoSendCallback", || {
        let (_, session) = resolve::<PeerConnection>(peer)?;
        session.callbacks().local_sdp_ready.register(callback, user_data);
        Ok(())
    })
}

#[no_mangle]
pub unsafe extern "system" fn mrsPeerConnectionRegisterIceCandidateReadytoSendCallback(
    peer: PeerConnectionHandle,
    callback: Option<PeerConnectionIceCandidateReadytoSendCallback>,
    user_data: *mut c_void,
) -> MrsResult {
    guard("mrsPeerConnectionRegisterIceCandidateReadytoSendCallback", || {
        let (_, session) = resolve::<PeerConnection>(peer)?;
        session.callbacks().ice_candidate_ready.register(callback, user_data);
        Ok(())
    })
}

#[no_mangle]
pub unsafe extern "system" fn mrsPeerConnectionRegisterIceStateChangedCallback(
    peer: PeerConnectionHandle,
    callback: Option<PeerConnectionIceStateChangedCallback>,
    user_data: *mut c_void,
) -> MrsResult {
    guard("mrsPeerConnectionRegisterIceStateChangedCallback", || {
        let (_, session) = resolve::<PeerConnection>(peer)?;
        session.callbacks().ice_state_changed.register(callback, user_data);
        Ok(())
    })
}

#[no_mangle]
pub unsafe extern "system" fn mrsPeerConnectionRegisterRenegotiationNeededCallback(
    peer: PeerConnectionHandle,
    callback: Option<PeerConnectionRenegotiationNeededCallback>,
    user_data: *mut c_void,
) -> MrsResult {
    guard("mrsPeerConnectionRegisterRenegotiationNeededCallback", || {
        let (_, session) = resolve::<PeerConnection>(peer)?;
        session.callbacks().renegotiation_needed.register(callback, user_data);
        Ok(())
    })
}

#[no_mangle]
pub unsafe extern "system" fn mrsPeerConnectionRegisterTrackAddedCallback(
    peer: PeerConnectionHandle,
    callback: Option<PeerConnectionTrackAddedCallback>,
    user_data: *mut c_void,
) -> MrsResult {
    guard("mrsPeerConnectionRegisterTrackAddedCallback", || {
        let (_, session) = resolve::<PeerConnection>(peer)?;
        session.callbacks().track_added.register(callback, user_data);
        Ok(())
    })
}

#[no_mangle]
pub unsafe extern "system" fn mrsPeerConnectionRegisterTrackRemovedCallback(
    peer: PeerConnectionHandle,
    callback: Option<PeerConnectionTrackRemovedCallback>,
    user_data: *mut c_void,
) -> MrsResult {
    guard("mrsPeerConnectionRegisterTrackRemovedCallback", || {
        let (_, session) = resolve::<PeerConnection>(peer)?;
        session.callbacks().track_removed.register(callback, user_data);
        Ok(())
    })
}

#[no_mangle]
pub unsafe extern "system" fn mrsPeerConnectionRegisterDataChannelAddedCallback(
    peer: PeerConnectionHandle,
    callback: Option<PeerConnectionDataChannelAddedCallback>,
    user_data: *mut c_void,
) -> MrsResult {
    guard("mrsPeerConnectionRegisterDataChannelAddedCallback", || {
        let (_, session) = resolve::<PeerConnection>(peer)?;
        session.callbacks().data_channel_added.register(callback, user_data);
        Ok(())
    })
}

#[no_mangle]
pub unsafe extern "system" fn mrsPeerConnectionRegisterDataChannelRemovedCallback(
    peer: PeerConnectionHandle,
    callback: Option<PeerConnectionDataChannelRemovedCallback>,
    user_data: *mut c_void,
) -> MrsResult {
    guard("mrsPeerConnectionRegisterDataChannelRemovedCallback", || {
        let (_, session) = resolve::<PeerConnection>(peer)?;
        session.callbacks().data_channel_removed.register(callback, user_data);
        Ok(())
    })
}

#[no_mangle]
pub unsafe extern "system" fn mrsPeerConnectionRegisterI420ARemoteVideoFrameCallback(
    peer: PeerConnectionHandle,
    callback: Option<I420AVideoFrameCallback>,
    user_data: *mut c_void,
) -> MrsResult {
    guard("mrsPeerConnectionRegisterI420ARemoteVideoFrameCallback", || {
        let (_, session) = resolve::<PeerConnection>(peer)?;
        session.callbacks().remote_i420a_frame.register(callback, user_data);
        Ok(())
    })
}

#[no_mangle]
pub unsafe extern "system" fn mrsPeerConnectionRegisterArgb32RemoteVideoFrameCallback(
    peer: PeerConnectionHandle,
    callback: Option<Argb32VideoFrameCallback>,
    user_data: *mut c_void,
) -> MrsResult {
    guard("mrsPeerConnectionRegisterArgb32RemoteVideoFrameCallback", || {
        let (_, session) = resolve::<PeerConnection>(peer)?;
        session.callbacks().remote_argb_frame.register(callback, user_data);
        Ok(())
    })
}

#[no_mangle]
pub unsafe extern "system" fn mrsPeerConnectionRegisterLocalAudioFrameCallback(
    peer: PeerConnectionHandle,
    callback: Option<AudioFrameCallback>,
    user_data: *mut c_void,
) -> MrsResult {
    guard("mrsPeerConnectionRegisterLocalAudioFrameCallback", || {
        let (_, session) = resolve::<PeerConnection>(peer)?;
        session.callbacks().local_audio_frame.register(callback, user_data);
        Ok(())
    })
}

#[no_mangle]
pub unsafe extern "system" fn mrsPeerConnectionRegisterRemoteAudioFrameCallback(
    peer: PeerConnectionHandle,
    callback: Option<AudioFrameCallback>,
    user_data: *mut c_void,
) -> MrsResult {
    guard("mrsPeerConnectionRegisterRemoteAudioFrameCallback", || {
        let (_, session) = resolve::<PeerConnection>(peer)?;
        session.callbacks().remote_audio_frame.register(callback, user_data);
        Ok(())
    })
}

// ============================================================================
// Local Tracks
// ============================================================================

/// Add a local video track fed by a capture device.
///
/// # Arguments
/// * `peer` - Peer connection
/// * `track_name` - SDP token naming the track
/// * `config` - Device id and exact capture constraints
/// * `track_handle_out` - Receives the track handle, owning one reference
///
/// # Returns
/// `NotFound` for an unknown device id, `WrongThread` from a UI dispatcher
#[no_mangle]
pub unsafe extern "system" fn mrsPeerConnectionAddLocalVideoTrack(
    peer: PeerConnectionHandle,
    track_name: *const c_char,
    config: LocalVideoTrackConfig,
    track_handle_out: *mut LocalVideoTrackHandle,
) -> MrsResult {
    guard("mrsPeerConnectionAddLocalVideoTrack", || {
        if track_handle_out.is_null() {
            return Err(Error::InvalidParameter("null track handle out-pointer".into()));
        }
        *track_handle_out = std::ptr::null_mut();
        let name = cstr_non_empty(track_name).ok_or_else(|| Error::InvalidParameter("missing track name".into()))?;
        let (factory, session) = resolve::<PeerConnection>(peer)?;
        let request = VideoDeviceRequest {
            device_id: cstr_non_empty(config.video_device_id).map(str::to_owned),
            width: config.width,
            height: config.height,
            framerate: config.framerate,
        };
        let handle = session.add_local_video_track_from_device(&factory, name, &request)?;
        write_out(track_handle_out, raw_handle(handle))
    })
}

/// Add a local video track fed by an external video source.
#[no_mangle]
pub unsafe extern "system" fn mrsPeerConnectionAddLocalVideoTrackFromExternalSource(
    peer: PeerConnectionHandle,
    track_name: *const c_char,
    source: ExternalVideoTrackSourceHandle,
    track_handle_out: *mut LocalVideoTrackHandle,
) -> MrsResult {
    guard("mrsPeerConnectionAddLocalVideoTrackFromExternalSource", || {
        if track_handle_out.is_null() {
            return Err(Error::InvalidParameter("null track handle out-pointer".into()));
        }
        *track_handle_out = std::ptr::null_mut();
        let name = cstr_non_empty(track_name).ok_or_else(|| Error::InvalidParameter("missing track name".into()))?;
        if source.is_null() {
            return Err(Error::InvalidHandle);
        }
        let (factory, session) = resolve::<PeerConnection>(peer)?;
        let handle = session.add_local_video_track_from_external_source(&factory, name, handle_id(source))?;
        write_out(track_handle_out, raw_handle(handle))
    })
}

#[no_mangle]
pub unsafe extern "system" fn mrsPeerConnectionRemoveLocalVideoTrack(
    peer: PeerConnectionHandle,
    track: LocalVideoTrackHandle,
) -> MrsResult {
    guard("mrsPeerConnectionRemoveLocalVideoTrack", || {
        if track.is_null() {
            return Err(Error::InvalidHandle);
        }
        let (factory, session) = resolve::<PeerConnection>(peer)?;
        session.remove_local_video_track(&factory, handle_id(track))
    })
}

/// Remove every local video track built on an external source.
#[no_mangle]
pub unsafe extern "system" fn mrsPeerConnectionRemoveLocalVideoTracksFromSource(
    peer: PeerConnectionHandle,
    source: ExternalVideoTrackSourceHandle,
) -> MrsResult {
    guard("mrsPeerConnectionRemoveLocalVideoTracksFromSource", || {
        if source.is_null() {
            return Err(Error::InvalidHandle);
        }
        let (factory, session) = resolve::<PeerConnection>(peer)?;
        let removed = session.remove_local_video_tracks_from_source(&factory, handle_id(source))?;
        log::debug!("removed {} track(s) of source {:?}", removed, source);
        Ok(())
    })
}

#[no_mangle]
pub unsafe extern "system" fn mrsPeerConnectionAddLocalAudioTrack(peer: PeerConnectionHandle) -> MrsResult {
    guard("mrsPeerConnectionAddLocalAudioTrack", || {
        let (factory, session) = resolve::<PeerConnection>(peer)?;
        session.add_local_audio_track(&factory)
    })
}

#[no_mangle]
pub unsafe extern "system" fn mrsPeerConnectionRemoveLocalAudioTrack(peer: PeerConnectionHandle) -> MrsResult {
    guard("mrsPeerConnectionRemoveLocalAudioTrack", || {
        let (factory, session) = resolve::<PeerConnection>(peer)?;
        session.remove_local_audio_track(&factory)
    })
}

/// Mute or unmute local audio without renegotiating.
#[no_mangle]
pub unsafe extern "system" fn mrsPeerConnectionSetLocalAudioTrackEnabled(
    peer: PeerConnectionHandle,
    enabled: mrsBool,
) -> MrsResult {
    guard("mrsPeerConnectionSetLocalAudioTrackEnabled", || {
        let (_, session) = resolve::<PeerConnection>(peer)?;
        session.set_local_audio_track_enabled(enabled != MRS_FALSE)
    })
}

#[no_mangle]
pub unsafe extern "system" fn mrsPeerConnectionIsLocalAudioTrackEnabled(peer: PeerConnectionHandle) -> mrsBool {
    match resolve::<PeerConnection>(peer) {
        Ok((_, session)) if session.is_local_audio_track_enabled() => MRS_TRUE,
        _ => MRS_FALSE,
    }
}

// ============================================================================
// Data Channels
// ============================================================================

/// Create a data channel.
///
/// # Arguments
/// * `peer` - Peer connection
/// * `interop_handle` - Host wrapper of the channel
/// * `config` - Id (-1 for engine-assigned), flags and label
/// * `callbacks` - Initial message, buffering and state callbacks
/// * `channel_handle_out` - Receives the channel handle
///
/// # Returns
/// `InvalidParameter` for a null interop handle or an out-of-range or
/// duplicate id
#[no_mangle]
pub unsafe extern "system" fn mrsPeerConnectionAddDataChannel(
    peer: PeerConnectionHandle,
    interop_handle: InteropHandle,
    config: DataChannelConfig,
    callbacks: DataChannelCallbacks,
    channel_handle_out: *mut DataChannelHandle,
) -> MrsResult {
    guard("mrsPeerConnectionAddDataChannel", || {
        if channel_handle_out.is_null() {
            return Err(Error::InvalidParameter("null data channel handle out-pointer".into()));
        }
        *channel_handle_out = std::ptr::null_mut();
        if interop_handle.is_null() {
            return Err(Error::InvalidParameter("null data channel interop handle".into()));
        }
        let options = DataChannelOptions::from_raw(config.id, config.flags, cstr(config.label))?;
        let (factory, session) = resolve::<PeerConnection>(peer)?;
        let handle = session.add_data_channel(&factory, interop_handle, &options, &callbacks)?;
        write_out(channel_handle_out, raw_handle(handle))
    })
}

#[no_mangle]
pub unsafe extern "system" fn mrsPeerConnectionRemoveDataChannel(
    peer: PeerConnectionHandle,
    channel: DataChannelHandle,
) -> MrsResult {
    guard("mrsPeerConnectionRemoveDataChannel", || {
        if channel.is_null() {
            return Err(Error::InvalidHandle);
        }
        let (factory, session) = resolve::<PeerConnection>(peer)?;
        session.remove_data_channel(&factory, handle_id(channel))
    })
}

// ============================================================================
// Signaling
// ============================================================================

/// Add a remote ICE candidate. Candidates arriving before the remote
/// description are queued.
#[no_mangle]
pub unsafe extern "system" fn mrsPeerConnectionAddIceCandidate(
    peer: PeerConnectionHandle,
    sdp_mid: *const c_char,
    sdp_mline_index: i32,
    candidate: *const c_char,
) -> MrsResult {
    guard("mrsPeerConnectionAddIceCandidate", || {
        let candidate = cstr(candidate).ok_or_else(|| Error::InvalidParameter("null ICE candidate".into()))?;
        let (factory, session) = resolve::<PeerConnection>(peer)?;
        let candidate = IceCandidate {
            candidate: candidate.to_owned(),
            sdp_mid: cstr(sdp_mid).unwrap_or_default().to_owned(),
            sdp_mline_index,
        };
        session.add_ice_candidate(&factory, &candidate)
    })
}

/// Start creating an offer. The SDP arrives through the local SDP callback.
///
/// A failure after this call returns is only logged: the host receives no
/// local SDP callback and no other signal for it.
#[no_mangle]
pub unsafe extern "system" fn mrsPeerConnectionCreateOffer(peer: PeerConnectionHandle) -> MrsResult {
    guard("mrsPeerConnectionCreateOffer", || {
        let (factory, session) = resolve::<PeerConnection>(peer)?;
        session.create_offer(&factory)
    })
}

/// Start creating an answer. The SDP arrives through the local SDP callback.
///
/// A failure after this call returns is only logged: the host receives no
/// local SDP callback and no other signal for it.
#[no_mangle]
pub unsafe extern "system" fn mrsPeerConnectionCreateAnswer(peer: PeerConnectionHandle) -> MrsResult {
    guard("mrsPeerConnectionCreateAnswer", || {
        let (factory, session) = resolve::<PeerConnection>(peer)?;
        session.create_answer(&factory)
    })
}

/// Apply a remote description.
///
/// # Arguments
/// * `peer` - Peer connection
/// * `sdp_type` - "offer", "answer" or "pranswer"
/// * `sdp` - Session description
#[no_mangle]
pub unsafe extern "system" fn mrsPeerConnectionSetRemoteDescription(
    peer: PeerConnectionHandle,
    sdp_type: *const c_char,
    sdp: *const c_char,
) -> MrsResult {
    guard("mrsPeerConnectionSetRemoteDescription", || {
        let sdp_type = cstr_non_empty(sdp_type).ok_or_else(|| Error::InvalidParameter("missing SDP type".into()))?;
        let sdp = cstr(sdp).ok_or_else(|| Error::InvalidParameter("null SDP".into()))?;
        let (factory, session) = resolve::<PeerConnection>(peer)?;
        session.set_remote_description(&factory, sdp_type, sdp)
    })
}
