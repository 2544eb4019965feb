//! Discovery datagrams.
//!
//! ```text
//! Client ──[{"type":"discover"}]──(broadcast UDP)──► Server
//! Server ──[{"type":"server_info", …}]──(unicast)──► Client
//! ```

use serde::{Deserialize, Serialize};

use crate::config::ServerIdentity;
use crate::error::RemoteError;

/// Service tag clients match on.
pub const SERVICE_NAME: &str = "screen_remote";

#[derive(Debug, Deserialize)]
struct Probe {
    #[serde(rename = "type")]
    kind: String,
}

/// Returns `true` if `datagram` is a well-formed discovery request.
///
/// Anything else (invalid JSON, other `type`, missing `type`) is
/// `false`; the caller drops it.
pub fn is_discover_request(datagram: &[u8]) -> bool {
    serde_json::from_slice::<Probe>(datagram)
        .map(|p| p.kind == "discover")
        .unwrap_or(false)
}

/// Server identity announced in reply to a discovery request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerInfo {
    #[serde(rename = "type")]
    pub kind: String,
    pub service: String,
    pub ip: String,
    pub hostname: String,
    pub port: u16,
    pub version: String,
    pub capabilities: Vec<String>,
}

impl ServerInfo {
    pub fn new(identity: &ServerIdentity, ip: String, hostname: String, port: u16) -> Self {
        Self {
            kind: "server_info".into(),
            service: SERVICE_NAME.into(),
            ip,
            hostname,
            port,
            version: identity.version.clone(),
            capabilities: identity.capabilities.clone(),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, RemoteError> {
        serde_json::to_vec(self).map_err(|e| RemoteError::Encoding(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, RemoteError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
