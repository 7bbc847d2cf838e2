//! rtc-interop: C ABI boundary layer over a WebRTC engine.
//!
//! Exposes peer connections, local media tracks and data channels to a host
//! written in another language through opaque reference-counted handles and
//! host-registered callbacks.
//!
//! ## Features
//!
//! - **Handles**: non-zero, never reused, explicit AddRef/RemoveRef
//! - **Callbacks**: one replaceable slot per event kind, invoked outside locks
//! - **Sessions**: offer/answer sequencing with ICE candidate queueing
//! - **Media**: local video (capture device or host-fed source) and audio
//!   tracks with soft mute that never renegotiates
//! - **Data channels**: explicit or engine-assigned ids, buffering reports
//! - **SDP**: codec filtering with format parameter merging

#![allow(non_snake_case)]
#![allow(non_camel_case_types)]

use lazy_static::lazy_static;
use tokio::runtime::Runtime;

pub mod callback;
pub mod capture;
pub mod codec;
pub mod data_channel;
pub mod factory;
pub mod handle;
pub mod ice;
pub mod interop;
pub mod media;
pub mod peer;
pub mod result;
pub mod sdp;

pub use factory::{Backends, Factory, GlobalFactory};
pub use handle::{HandleId, HandleRegistry};
pub use peer::{PeerConnection, SessionConfig};
pub use result::{Error, MrsResult, Result};

// ============================================================================
// Tokio Runtime (shared)
// ============================================================================

lazy_static! {
    /// Shared tokio runtime driving the engine and the media pumps
    pub(crate) static ref RUNTIME: Runtime = Runtime::new().expect("Failed to create tokio runtime");
}

// ============================================================================
// DLL Entry Point (Windows)
// ============================================================================

#[cfg(windows)]
#[no_mangle]
pub extern "system" fn DllMain(_hinst: *mut std::ffi::c_void, reason: u32, _reserved: *mut std::ffi::c_void) -> i32 {
    const DLL_PROCESS_ATTACH: u32 = 1;
    const DLL_PROCESS_DETACH: u32 = 0;

    match reason {
        DLL_PROCESS_ATTACH => {}
        DLL_PROCESS_DETACH => {
            // Sessions the host leaked keep the factory alive; nothing to
            // tear down safely from the loader lock.
            if let Some(factory) = GlobalFactory::try_get() {
                let live = factory.live_object_count();
                if live > 0 {
                    log::warn!("unloading with {} live object(s)", live);
                }
            }
        }
        _ => {}
    }
    1 // TRUE
}
