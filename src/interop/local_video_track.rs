//! Local video track entry points.

use super::types::*;
use super::{add_ref, guard, remove_ref, resolve};
use crate::media::local_video_track::LocalVideoTrack;
use crate::result::MrsResult;
use std::ffi::c_void;

#[no_mangle]
pub unsafe extern "system" fn mrsLocalVideoTrackAddRef(track: LocalVideoTrackHandle) -> MrsResult {
    guard("mrsLocalVideoTrackAddRef", || add_ref(track))
}

/// Release one reference. A track still attached to a peer connection is
/// kept alive by that attachment.
#[no_mangle]
pub unsafe extern "system" fn mrsLocalVideoTrackRemoveRef(track: LocalVideoTrackHandle) -> MrsResult {
    guard("mrsLocalVideoTrackRemoveRef", || remove_ref(track))
}

/// Receive the I420A frames the track sends.
#[no_mangle]
pub unsafe extern "system" fn mrsLocalVideoTrackRegisterI420AFrameCallback(
    track: LocalVideoTrackHandle,
    callback: Option<I420AVideoFrameCallback>,
    user_data: *mut c_void,
) -> MrsResult {
    guard("mrsLocalVideoTrackRegisterI420AFrameCallback", || {
        let (_, track) = resolve::<LocalVideoTrack>(track)?;
        track.frame_callbacks().i420a.register(callback, user_data);
        Ok(())
    })
}

/// Receive the ARGB frames the track sends.
#[no_mangle]
pub unsafe extern "system" fn mrsLocalVideoTrackRegisterArgb32FrameCallback(
    track: LocalVideoTrackHandle,
    callback: Option<Argb32VideoFrameCallback>,
    user_data: *mut c_void,
) -> MrsResult {
    guard("mrsLocalVideoTrackRegisterArgb32FrameCallback", || {
        let (_, track) = resolve::<LocalVideoTrack>(track)?;
        track.frame_callbacks().argb.register(callback, user_data);
        Ok(())
    })
}

#[no_mangle]
pub unsafe extern "system" fn mrsLocalVideoTrackIsEnabled(track: LocalVideoTrackHandle) -> mrsBool {
    match resolve::<LocalVideoTrack>(track) {
        Ok((_, track)) if track.is_enabled() => MRS_TRUE,
        _ => MRS_FALSE,
    }
}

/// Enable or disable the track. A disabled track sends black frames and
/// never triggers renegotiation.
#[no_mangle]
pub unsafe extern "system" fn mrsLocalVideoTrackSetEnabled(track: LocalVideoTrackHandle, enabled: mrsBool) -> MrsResult {
    guard("mrsLocalVideoTrackSetEnabled", || {
        let (_, track) = resolve::<LocalVideoTrack>(track)?;
        track.set_enabled(enabled != MRS_FALSE);
        Ok(())
    })
}
