//! The stock IDENTIFY negotiator.

use async_trait::async_trait;

use super::identify::{AuthResponse, IdentifyOptions, IdentifyResponse};
use super::IdentifyNegotiator;
use crate::connection::{Compression, ConnectionHandle, Handshake};
use crate::error::{QueuewireError, Result};
use crate::filter::MAX_DEFLATE_LEVEL;
use crate::protocol::Command;

/// Deflate level used when the broker does not name one.
const DEFAULT_DEFLATE_LEVEL: u32 = 6;

/// Sends [`IdentifyOptions`], then honours what the broker enabled:
/// TLS first, then snappy or deflate, then AUTH once the loops run.
#[derive(Debug, Clone, Default)]
pub struct FeatureNegotiator {
    options: IdentifyOptions,
    auth_secret: Option<String>,
}

impl FeatureNegotiator {
    pub fn new(options: IdentifyOptions) -> Self {
        Self {
            options,
            auth_secret: None,
        }
    }

    /// Secret sent with AUTH when the broker requires it.
    pub fn auth_secret(mut self, secret: impl Into<String>) -> Self {
        self.auth_secret = Some(secret.into());
        self
    }

    pub fn options(&self) -> &IdentifyOptions {
        &self.options
    }
}

#[async_trait]
impl IdentifyNegotiator for FeatureNegotiator {
    fn identify(&self) -> Result<Command> {
        Ok(Command::identify(self.options.to_json()?))
    }

    async fn negotiate(&self, handshake: &mut Handshake, response: &IdentifyResponse) -> Result<()> {
        if !response.negotiated {
            tracing::debug!("Broker did not negotiate features");
            return Ok(());
        }

        if response.auth_required && self.auth_secret.is_none() {
            return Err(QueuewireError::Config(
                "Broker requires AUTH but no secret is configured".to_string(),
            ));
        }

        if response.tls_v1 {
            handshake.activate_tls().await?;
        }

        if response.snappy {
            handshake.activate_compression(Compression::Snappy).await?;
        } else if response.deflate {
            let level = response
                .deflate_level
                .unwrap_or(DEFAULT_DEFLATE_LEVEL)
                .min(MAX_DEFLATE_LEVEL);
            handshake
                .activate_compression(Compression::Deflate { level })
                .await?;
        }

        Ok(())
    }

    fn needs_follow_up(&self, response: &IdentifyResponse) -> bool {
        response.auth_required
    }

    async fn follow_up(&self, connection: ConnectionHandle, _response: IdentifyResponse) -> Result<()> {
        let secret = self.auth_secret.as_deref().ok_or_else(|| {
            QueuewireError::Config("Broker requires AUTH but no secret is configured".to_string())
        })?;

        let payload = connection.request(Command::auth(secret.to_string())).await?;
        let auth: AuthResponse = serde_json::from_slice(&payload)?;
        tracing::info!(
            "Authenticated as {:?} ({} permissions)",
            auth.identity,
            auth.permission_count
        );
        Ok(())
    }
}
