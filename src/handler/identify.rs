//! IDENTIFY request body and response.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::protocol::OK;

/// Client capabilities sent as the IDENTIFY body.
///
/// Unset fields are left out of the JSON so the broker applies its own
/// defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentifyOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    pub user_agent: String,
    /// Ask for a JSON answer instead of a bare `OK`.
    pub feature_negotiation: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heartbeat_interval: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_buffer_size: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_buffer_timeout: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls_v1: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snappy: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deflate: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deflate_level: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub msg_timeout: Option<u64>,
}

impl Default for IdentifyOptions {
    fn default() -> Self {
        Self {
            client_id: None,
            hostname: None,
            user_agent: concat!("queuewire-client/", env!("CARGO_PKG_VERSION")).to_string(),
            feature_negotiation: true,
            heartbeat_interval: None,
            output_buffer_size: None,
            output_buffer_timeout: None,
            tls_v1: None,
            snappy: None,
            deflate: None,
            deflate_level: None,
            sample_rate: None,
            msg_timeout: None,
        }
    }
}

impl IdentifyOptions {
    /// Identifier the broker shows for this client.
    pub fn client_id(mut self, id: impl Into<String>) -> Self {
        self.client_id = Some(id.into());
        self
    }

    /// Host name reported to the broker.
    pub fn hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    /// Heartbeat interval in milliseconds; -1 disables heartbeats.
    pub fn heartbeat_interval(mut self, ms: i64) -> Self {
        self.heartbeat_interval = Some(ms);
        self
    }

    /// Offer a TLS upgrade.
    pub fn tls(mut self, enabled: bool) -> Self {
        self.tls_v1 = Some(enabled);
        self
    }

    /// Offer snappy compression.
    pub fn snappy(mut self, enabled: bool) -> Self {
        self.snappy = Some(enabled);
        self
    }

    /// Offer deflate compression at `level`.
    pub fn deflate(mut self, level: u32) -> Self {
        self.deflate = Some(true);
        self.deflate_level = Some(level);
        self
    }

    /// Percentage of messages the broker should deliver (0 = all).
    pub fn sample_rate(mut self, percent: u32) -> Self {
        self.sample_rate = Some(percent);
        self
    }

    /// Serialize to the IDENTIFY body.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// The broker's answer to IDENTIFY.
///
/// A bare `OK` (feature negotiation off) parses to the default value with
/// `negotiated == false`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct IdentifyResponse {
    pub max_rdy_count: Option<u64>,
    pub version: Option<String>,
    pub max_msg_timeout: Option<u64>,
    pub msg_timeout: Option<u64>,
    pub tls_v1: bool,
    pub deflate: bool,
    pub deflate_level: Option<u32>,
    pub max_deflate_level: Option<u32>,
    pub snappy: bool,
    pub sample_rate: Option<u32>,
    pub auth_required: bool,
    pub output_buffer_size: Option<i64>,
    pub output_buffer_timeout: Option<i64>,
    /// Fields this client does not model.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
    /// False when the broker answered with a bare `OK`.
    #[serde(skip)]
    pub negotiated: bool,
}

impl IdentifyResponse {
    /// Parse an IDENTIFY RESPONSE payload.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        if payload == OK {
            return Ok(Self::default());
        }
        let mut response: Self = serde_json::from_slice(payload)?;
        response.negotiated = true;
        Ok(response)
    }
}

/// The broker's answer to AUTH.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AuthResponse {
    pub identity: String,
    pub identity_url: Option<String>,
    pub permission_count: u64,
}
