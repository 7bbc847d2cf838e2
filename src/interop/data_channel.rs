//! Data channel entry points.

use super::types::*;
use super::{add_ref, guard, remove_ref, resolve};
use crate::data_channel::DataChannel;
use crate::result::{Error, MrsResult};
use std::ffi::c_void;

#[no_mangle]
pub unsafe extern "system" fn mrsDataChannelAddRef(channel: DataChannelHandle) -> MrsResult {
    guard("mrsDataChannelAddRef", || add_ref(channel))
}

#[no_mangle]
pub unsafe extern "system" fn mrsDataChannelRemoveRef(channel: DataChannelHandle) -> MrsResult {
    guard("mrsDataChannelRemoveRef", || remove_ref(channel))
}

#[no_mangle]
pub unsafe extern "system" fn mrsDataChannelRegisterMessageCallback(
    channel: DataChannelHandle,
    callback: Option<DataChannelMessageCallback>,
    user_data: *mut c_void,
) -> MrsResult {
    guard("mrsDataChannelRegisterMessageCallback", || {
        let (_, channel) = resolve::<DataChannel>(channel)?;
        channel.callbacks().message.register(callback, user_data);
        Ok(())
    })
}

#[no_mangle]
pub unsafe extern "system" fn mrsDataChannelRegisterBufferingCallback(
    channel: DataChannelHandle,
    callback: Option<DataChannelBufferingCallback>,
    user_data: *mut c_void,
) -> MrsResult {
    guard("mrsDataChannelRegisterBufferingCallback", || {
        let (_, channel) = resolve::<DataChannel>(channel)?;
        channel.callbacks().buffering.register(callback, user_data);
        Ok(())
    })
}

#[no_mangle]
pub unsafe extern "system" fn mrsDataChannelRegisterStateCallback(
    channel: DataChannelHandle,
    callback: Option<DataChannelStateCallback>,
    user_data: *mut c_void,
) -> MrsResult {
    guard("mrsDataChannelRegisterStateCallback", || {
        let (_, channel) = resolve::<DataChannel>(channel)?;
        channel.callbacks().state.register(callback, user_data);
        Ok(())
    })
}

/// Queue a message for sending.
///
/// # Arguments
/// * `channel` - Open data channel
/// * `data` - Message bytes
/// * `size` - Message length in bytes
///
/// # Returns
/// `InvalidOperation` when the channel is not open or its buffer is full
#[no_mangle]
pub unsafe extern "system" fn mrsDataChannelSendMessage(
    channel: DataChannelHandle,
    data: *const c_void,
    size: u64,
) -> MrsResult {
    guard("mrsDataChannelSendMessage", || {
        if data.is_null() && size > 0 {
            return Err(Error::InvalidParameter("null message buffer".into()));
        }
        let (factory, channel) = resolve::<DataChannel>(channel)?;
        let payload = if size == 0 {
            &[][..]
        } else {
            std::slice::from_raw_parts(data as *const u8, size as usize)
        };
        channel.send(&factory, payload)
    })
}
