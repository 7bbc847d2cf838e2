//! Session configuration and its validation.

use crate::ice::{decode_ice_servers, IceServerConfig};
use crate::interop::types::PeerConnectionConfiguration;
use crate::result::{Error, Result};
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::ice_transport_policy::RTCIceTransportPolicy;

/// ICE candidate types the session may use.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IceTransportType {
    None = 0,
    Relay = 1,
    NoHost = 2,
    All = 3,
}

impl TryFrom<i32> for IceTransportType {
    type Error = Error;

    fn try_from(value: i32) -> Result<Self> {
        match value {
            0 => Ok(Self::None),
            1 => Ok(Self::Relay),
            2 => Ok(Self::NoHost),
            3 => Ok(Self::All),
            v => Err(Error::InvalidParameter(format!("unknown ICE transport type {}", v))),
        }
    }
}

#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BundlePolicy {
    Balanced = 0,
    MaxBundle = 1,
    MaxCompat = 2,
}

impl TryFrom<i32> for BundlePolicy {
    type Error = Error;

    fn try_from(value: i32) -> Result<Self> {
        match value {
            0 => Ok(Self::Balanced),
            1 => Ok(Self::MaxBundle),
            2 => Ok(Self::MaxCompat),
            v => Err(Error::InvalidParameter(format!("unknown bundle policy {}", v))),
        }
    }
}

#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdpSemantic {
    UnifiedPlan = 0,
    PlanB = 1,
}

impl TryFrom<i32> for SdpSemantic {
    type Error = Error;

    fn try_from(value: i32) -> Result<Self> {
        match value {
            0 => Ok(Self::UnifiedPlan),
            1 => Ok(Self::PlanB),
            v => Err(Error::InvalidParameter(format!("unknown SDP semantic {}", v))),
        }
    }
}

/// Validated session configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub ice_servers: Vec<IceServerConfig>,
    pub ice_transport_type: IceTransportType,
    pub bundle_policy: BundlePolicy,
    pub sdp_semantic: SdpSemantic,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ice_servers: Vec::new(),
            ice_transport_type: IceTransportType::All,
            bundle_policy: BundlePolicy::Balanced,
            sdp_semantic: SdpSemantic::UnifiedPlan,
        }
    }
}

impl SessionConfig {
    /// Decode and validate a host configuration.
    ///
    /// # Arguments
    /// * `config` - Raw configuration from the host
    /// * `encoded_ice_servers` - Already-decoded C string for the ICE server list
    pub fn from_raw(config: &PeerConnectionConfiguration, encoded_ice_servers: Option<&str>) -> Result<Self> {
        let session = Self {
            ice_servers: encoded_ice_servers.map(decode_ice_servers).unwrap_or_default(),
            ice_transport_type: IceTransportType::try_from(config.ice_transport_type)?,
            bundle_policy: BundlePolicy::try_from(config.bundle_policy)?,
            sdp_semantic: SdpSemantic::try_from(config.sdp_semantic)?,
        };
        session.validate()?;
        Ok(session)
    }

    /// Reject variants the engine does not support.
    pub fn validate(&self) -> Result<()> {
        match self.ice_transport_type {
            IceTransportType::Relay | IceTransportType::All => {}
            other => {
                return Err(Error::InvalidParameter(format!(
                    "ICE transport type {:?} is not supported",
                    other
                )))
            }
        }
        if self.sdp_semantic != SdpSemantic::UnifiedPlan {
            return Err(Error::InvalidParameter("only unified plan SDP is supported".into()));
        }
        Ok(())
    }

    /// Build the engine configuration.
    pub fn to_rtc_configuration(&self) -> RTCConfiguration {
        RTCConfiguration {
            ice_servers: self.ice_servers.iter().map(|s| s.to_rtc_ice_server()).collect(),
            ice_transport_policy: match self.ice_transport_type {
                IceTransportType::Relay => RTCIceTransportPolicy::Relay,
                _ => RTCIceTransportPolicy::All,
            },
            bundle_policy: match self.bundle_policy {
                BundlePolicy::Balanced => RTCBundlePolicy::Balanced,
                BundlePolicy::MaxBundle => RTCBundlePolicy::MaxBundle,
                BundlePolicy::MaxCompat => RTCBundlePolicy::MaxCompat,
            },
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(transport: i32, bundle: i32, semantic: i32) -> PeerConnectionConfiguration {
        PeerConnectionConfiguration {
            ice_transport_type: transport,
            bundle_policy: bundle,
            sdp_semantic: semantic,
            ..Default::default()
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        let cfg = SessionConfig::from_raw(&PeerConnectionConfiguration::default(), None).unwrap();
        assert_eq!(cfg, SessionConfig::default());
    }

    #[test]
    fn test_unsupported_transport_types() {
        for t in [0, 2, 9] {
            let err = SessionConfig::from_raw(&raw(t, 0, 0), None).unwrap_err();
            assert!(matches!(err, Error::InvalidParameter(_)), "transport {}", t);
        }
        assert!(SessionConfig::from_raw(&raw(1, 0, 0), None).is_ok());
    }

    #[test]
    fn test_bundle_and_semantic_validation() {
        assert!(SessionConfig::from_raw(&raw(3, 2, 0), None).is_ok());
        assert!(SessionConfig::from_raw(&raw(3, 3, 0), None).is_err());
        assert!(SessionConfig::from_raw(&raw(3, 0, 1), None).is_err());
    }

    #[test]
    fn test_rtc_configuration_mapping() {
        let cfg = SessionConfig::from_raw(
            &raw(1, 1, 0),
            Some("stun:stun.example.org\n\nturn:turn.example.org\nusername:u\npassword:p"),
        )
        .unwrap();
        let rtc = cfg.to_rtc_configuration();
        assert_eq!(rtc.ice_servers.len(), 2);
        assert_eq!(rtc.ice_transport_policy, RTCIceTransportPolicy::Relay);
        assert_eq!(rtc.bundle_policy, RTCBundlePolicy::MaxBundle);
    }
}
