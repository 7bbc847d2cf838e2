//! Result codes and the crate-wide error type.
//!
//! Every synchronous entry point reports an [`MrsResult`]; asynchronous
//! completions report the same codes through their completion callback.

use thiserror::Error;

/// Result code returned across the C boundary.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MrsResult {
    Success = 0,
    /// Opaque lower-layer failure not otherwise classified
    Unknown = 0x8000_0000,
    /// Null/empty required argument, or malformed enum value
    InvalidParameter = 0x8000_0001,
    /// Operation not valid in the current state
    InvalidOperation = 0x8000_0002,
    /// Call made from a thread that must not block (UI dispatcher)
    WrongThread = 0x8000_0003,
    /// Requested device or resource does not exist
    NotFound = 0x8000_0004,
    /// Handle is null or no longer denotes a live object
    InvalidNativeHandle = 0x8000_0005,
}

impl MrsResult {
    pub fn is_success(self) -> bool {
        self == MrsResult::Success
    }
}

/// Error taxonomy kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidParameter,
    InvalidOperation,
    InvalidHandle,
    NotFound,
    Unknown,
}

/// Crate-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error("call not allowed from the UI dispatcher thread")]
    WrongThread,

    #[error("invalid or released handle")]
    InvalidHandle,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("engine error: {0}")]
    Engine(#[from] webrtc::Error),

    #[error("{0}")]
    Unknown(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Taxonomy kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidParameter(_) => ErrorKind::InvalidParameter,
            Error::InvalidOperation(_) | Error::WrongThread => ErrorKind::InvalidOperation,
            Error::InvalidHandle => ErrorKind::InvalidHandle,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Engine(e) => engine_error_kind(e),
            Error::Unknown(_) => ErrorKind::Unknown,
        }
    }

    /// Result code reported to the host.
    pub fn code(&self) -> MrsResult {
        match self {
            Error::WrongThread => MrsResult::WrongThread,
            _ => match self.kind() {
                ErrorKind::InvalidParameter => MrsResult::InvalidParameter,
                ErrorKind::InvalidOperation => MrsResult::InvalidOperation,
                ErrorKind::InvalidHandle => MrsResult::InvalidNativeHandle,
                ErrorKind::NotFound => MrsResult::NotFound,
                ErrorKind::Unknown => MrsResult::Unknown,
            },
        }
    }
}

/// Classify an engine error so the real cause survives translation.
fn engine_error_kind(err: &webrtc::Error) -> ErrorKind {
    use webrtc::Error as E;
    match err {
        E::ErrPeerConnSDPTypeInvalidValue
        | E::ErrProtocolTooLarge
        | E::ErrRetransmitsOrPacketLifeTime
        | E::ErrSDPDoesNotMatchOffer
        | E::ErrSDPDoesNotMatchAnswer => ErrorKind::InvalidParameter,
        E::ErrConnectionClosed | E::ErrNoRemoteDescription | E::ErrIncorrectSignalingState => {
            ErrorKind::InvalidOperation
        }
        _ => ErrorKind::Unknown,
    }
}

impl From<Result<()>> for MrsResult {
    fn from(res: Result<()>) -> Self {
        match res {
            Ok(()) => MrsResult::Success,
            Err(e) => e.code(),
        }
    }
}
