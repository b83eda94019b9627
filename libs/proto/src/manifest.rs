//! Route descriptors and the manifest codec.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A single observed route: one host rule pointing at one backend service.
///
/// The JSON field names are the wire contract shared with the agent; the
/// logical identity for exposure decisions is `(host, servicePort)`, while
/// `serviceName` groups descriptors for router and service rendering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteDescriptor {
    /// Host-match rule source (e.g. `app.example.com`).
    pub host: String,

    /// Backend service name; doubles as router and service key.
    pub service_name: String,

    /// Backend service port.
    pub service_port: u16,
}

impl RouteDescriptor {
    /// Identity key for exposure decisions.
    pub fn exposure_key(&self) -> String {
        format!("{}:{}", self.host, self.service_port)
    }
}

/// Malformed manifest payload.
#[derive(Debug, Error)]
#[error("malformed manifest payload: {0}")]
pub struct DecodeError(#[from] serde_json::Error);

/// Encode an ordered batch of route descriptors into a transfer payload.
pub fn encode_manifest(routes: &[RouteDescriptor]) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec_pretty(routes)
}

/// Decode a transfer payload back into route descriptors.
pub fn decode_manifest(raw: &[u8]) -> Result<Vec<RouteDescriptor>, DecodeError> {
    Ok(serde_json::from_slice(raw)?)
}
