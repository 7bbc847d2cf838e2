//! ICE server configuration.
//!
//! The host passes its STUN/TURN list as one delimiter-encoded string:
//! servers are separated by an empty line, and each line of a server is a
//! URL, `username:<value>` or `password:<value>`.

use webrtc::ice_transport::ice_server::RTCIceServer;

/// One STUN or TURN server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IceServerConfig {
    pub urls: Vec<String>,
    pub username: Option<String>,
    pub credential: Option<String>,
}

impl IceServerConfig {
    /// Create a STUN-only server config
    pub fn stun(url: &str) -> Self {
        Self {
            urls: vec![url.to_string()],
            username: None,
            credential: None,
        }
    }

    /// Create a TURN server config with credentials
    pub fn turn(url: &str, username: &str, credential: &str) -> Self {
        Self {
            urls: vec![url.to_string()],
            username: Some(username.to_string()),
            credential: Some(credential.to_string()),
        }
    }

    /// Convert to webrtc-rs RTCIceServer
    pub fn to_rtc_ice_server(&self) -> RTCIceServer {
        RTCIceServer {
            urls: self.urls.clone(),
            username: self.username.clone().unwrap_or_default(),
            credential: self.credential.clone().unwrap_or_default(),
            ..Default::default()
        }
    }
}

/// Decode the host's encoded ICE server list.
///
/// Servers without any URL are dropped with a warning.
pub fn decode_ice_servers(encoded: &str) -> Vec<IceServerConfig> {
    let normalized = encoded.replace("\r\n", "\n");
    let mut servers = Vec::new();
    for block in normalized.split("\n\n") {
        let mut server = IceServerConfig::default();
        for line in block.lines().map(str::trim).filter(|l| !l.is_empty()) {
            if let Some(user) = line.strip_prefix("username:") {
                server.username = Some(user.to_string());
            } else if let Some(pass) = line.strip_prefix("password:") {
                server.credential = Some(pass.to_string());
            } else {
                server.urls.push(line.to_string());
            }
        }
        if server.urls.is_empty() {
            if server.username.is_some() || server.credential.is_some() {
                log::warn!("ignoring ICE server entry with credentials but no URL");
            }
            continue;
        }
        servers.push(server);
    }
    servers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_empty() {
        assert!(decode_ice_servers("").is_empty());
        assert!(decode_ice_servers("\n\n\n").is_empty());
    }

    #[test]
    fn test_decode_stun_and_turn() {
        let encoded = "stun:stun.l.google.com:19302\n\n\
turn:turn.example.com:3478\nturns:turn.example.com:5349\nusername:alice\npassword:s3cret";
        let servers = decode_ice_servers(encoded);
        assert_eq!(servers.len(), 2);
        assert_eq!(servers[0], IceServerConfig::stun("stun:stun.l.google.com:19302"));
        assert_eq!(
            servers[1].urls,
            vec!["turn:turn.example.com:3478", "turns:turn.example.com:5349"]
        );
        assert_eq!(servers[1].username.as_deref(), Some("alice"));
        assert_eq!(servers[1].credential.as_deref(), Some("s3cret"));
    }

    #[test]
    fn test_decode_crlf_and_orphan_credentials() {
        let servers = decode_ice_servers("username:bob\r\n\r\nstun:a.example.org");
        assert_eq!(servers, vec![IceServerConfig::stun("stun:a.example.org")]);
    }

    #[test]
    fn test_to_rtc_ice_server() {
        let rtc = IceServerConfig::turn("turn:t.example", "u", "p").to_rtc_ice_server();
        assert_eq!(rtc.urls, vec!["turn:t.example".to_string()]);
        assert_eq!(rtc.username, "u");
        assert_eq!(rtc.credential, "p");
    }
}
