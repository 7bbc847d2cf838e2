//! Sessions and the events they raise.

pub mod config;
pub mod connection;
pub mod events;
pub mod remote_track;

pub use config::{BundlePolicy, IceTransportType, SdpSemantic, SessionConfig};
pub use connection::{IceCandidate, PeerConnection, SessionState, VideoDeviceRequest};
pub use events::{IceConnectionState, PeerCallbacks, PeerEvent, TrackKind};
pub use remote_track::RemoteTrack;
