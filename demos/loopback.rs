//! In-process loopback demo.
//!
//! Connects two peer connections inside one process, wiring each side's
//! local SDP and ICE candidates straight into the other, then exchanges a few
//! messages over a pre-negotiated data channel.
//!
//! Usage:
//!   cargo run --example loopback

use std::ffi::{c_char, c_void, CStr};
use std::ptr::NonNull;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use rtc_interop::data_channel::{DataChannel, DataChannelOptions, DataChannelState};
use rtc_interop::interop::types::{DataChannelCallbacks, DATA_CHANNEL_FLAG_ORDERED, DATA_CHANNEL_FLAG_RELIABLE};
use rtc_interop::peer::IceCandidate;
use rtc_interop::{Backends, Factory, PeerConnection, SessionConfig};

/// Where one side forwards its signaling output.
struct Remote {
    factory: Arc<Factory>,
    peer: Arc<PeerConnection>,
    name: &'static str,
}

unsafe extern "C" fn on_local_sdp(sdp_type: *const c_char, sdp: *const c_char, user: *mut c_void) {
    let remote = &*(user as *const Remote);
    let sdp_type = CStr::from_ptr(sdp_type).to_string_lossy();
    let sdp = CStr::from_ptr(sdp).to_string_lossy();
    println!("-> {} receives {} ({} bytes)", remote.name, sdp_type, sdp.len());

    if let Err(e) = remote.peer.set_remote_description(&remote.factory, &sdp_type, &sdp) {
        eprintln!("set_remote_description failed: {}", e);
        return;
    }
    if sdp_type == "offer" {
        if let Err(e) = remote.peer.create_answer(&remote.factory) {
            eprintln!("create_answer failed: {}", e);
        }
    }
}

unsafe extern "C" fn on_ice_candidate(candidate: *const c_char, mline: i32, mid: *const c_char, user: *mut c_void) {
    let remote = &*(user as *const Remote);
    let candidate = IceCandidate {
        candidate: CStr::from_ptr(candidate).to_string_lossy().into_owned(),
        sdp_mid: CStr::from_ptr(mid).to_string_lossy().into_owned(),
        sdp_mline_index: mline,
    };
    if let Err(e) = remote.peer.add_ice_candidate(&remote.factory, &candidate) {
        eprintln!("add_ice_candidate failed: {}", e);
    }
}

unsafe extern "C" fn on_connected(user: *mut c_void) {
    let name = &*(user as *const &str);
    println!("{} connected", name);
}

unsafe extern "C" fn on_message(data: *const c_void, size: u64, user: *mut c_void) {
    let name = &*(user as *const &str);
    let bytes = std::slice::from_raw_parts(data as *const u8, size as usize);
    println!("{} got message: {}", name, String::from_utf8_lossy(bytes));
}

fn open_channel(factory: &Factory, peer: &PeerConnection, user: *mut c_void) -> Arc<DataChannel> {
    let options = DataChannelOptions::from_raw(
        0,
        DATA_CHANNEL_FLAG_ORDERED | DATA_CHANNEL_FLAG_RELIABLE,
        Some("chat"),
    )
    .expect("valid options");
    let callbacks = DataChannelCallbacks {
        message_callback: Some(on_message),
        message_user_data: user,
        ..Default::default()
    };
    let interop = NonNull::<c_void>::dangling().as_ptr();
    let handle = peer
        .add_data_channel(factory, interop, &options, &callbacks)
        .expect("add data channel");
    factory.registry().get::<DataChannel>(handle).expect("live channel")
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let factory = Factory::new(Backends::default()).expect("factory");
    let interop = NonNull::<c_void>::dangling().as_ptr();
    let (offer_handle, offerer) = PeerConnection::create(&factory, SessionConfig::default(), interop).expect("offerer");
    let (answer_handle, answerer) =
        PeerConnection::create(&factory, SessionConfig::default(), interop).expect("answerer");

    let to_answerer = Box::new(Remote {
        factory: factory.clone(),
        peer: answerer.clone(),
        name: "answerer",
    });
    let to_offerer = Box::new(Remote {
        factory: factory.clone(),
        peer: offerer.clone(),
        name: "offerer",
    });
    let to_answerer = &*to_answerer as *const Remote as *mut c_void;
    let to_offerer = &*to_offerer as *const Remote as *mut c_void;

    static OFFERER: &str = "offerer";
    static ANSWERER: &str = "answerer";
    let offerer_name = &OFFERER as *const &str as *mut c_void;
    let answerer_name = &ANSWERER as *const &str as *mut c_void;

    offerer.callbacks().local_sdp_ready.register(Some(on_local_sdp), to_answerer);
    offerer.callbacks().ice_candidate_ready.register(Some(on_ice_candidate), to_answerer);
    offerer.callbacks().connected.register(Some(on_connected), offerer_name);
    answerer.callbacks().local_sdp_ready.register(Some(on_local_sdp), to_offerer);
    answerer.callbacks().ice_candidate_ready.register(Some(on_ice_candidate), to_offerer);
    answerer.callbacks().connected.register(Some(on_connected), answerer_name);

    let local = open_channel(&factory, &offerer, offerer_name);
    let _remote = open_channel(&factory, &answerer, answerer_name);

    offerer.create_offer(&factory).expect("create offer");

    let deadline = Instant::now() + Duration::from_secs(10);
    while local.state() != DataChannelState::Open {
        if Instant::now() > deadline {
            eprintln!("data channel did not open in time");
            break;
        }
        thread::sleep(Duration::from_millis(50));
    }

    if local.state() == DataChannelState::Open {
        for i in 0..3 {
            let text = format!("hello #{}", i);
            if let Err(e) = local.send(&factory, text.as_bytes()) {
                eprintln!("send failed: {}", e);
            }
        }
        thread::sleep(Duration::from_millis(500));
    }

    offerer.close(&factory).expect("close offerer");
    answerer.close(&factory).expect("close answerer");
    let _ = factory.registry().remove_ref(offer_handle);
    let _ = factory.registry().remove_ref(answer_handle);
    println!("live objects after teardown: {}", factory.report_live_objects());
}
