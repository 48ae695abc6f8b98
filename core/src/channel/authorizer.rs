/// Per-channel authorization against the broadcast auth endpoint
use crate::error::{RealtimeError, Result};
use crate::session::SessionProvider;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Signature the server hands back for one `(socket_id, channel)` pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelAuth {
    pub auth: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_data: Option<String>,
}

#[async_trait]
pub trait ChannelAuthorizer: Send + Sync {
    async fn authorize(&self, socket_id: &str, channel_name: &str) -> Result<ChannelAuth>;
}

#[derive(Serialize)]
struct AuthRequest<'a> {
    socket_id: &'a str,
    channel_name: &'a str,
}

#[derive(Deserialize)]
struct AuthErrorBody {
    message: Option<String>,
}

/// Authorizer that posts to the auth endpoint with the session's current bearer token
pub struct HttpAuthorizer {
    http: reqwest::Client,
    auth_url: String,
    session: Arc<dyn SessionProvider>,
}

impl HttpAuthorizer {
    pub fn new(auth_url: impl Into<String>, session: Arc<dyn SessionProvider>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| RealtimeError::Http(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            http,
            auth_url: auth_url.into(),
            session,
        })
    }
}

#[async_trait]
impl ChannelAuthorizer for HttpAuthorizer {
    async fn authorize(&self, socket_id: &str, channel_name: &str) -> Result<ChannelAuth> {
        // Read the token now: it may have been refreshed since the socket opened
        let token = self.session.bearer_token().ok_or_else(|| {
            RealtimeError::SessionUnavailable("no bearer token for channel auth".to_string())
        })?;

        let auth_failure = |status: u16, message: String| RealtimeError::ChannelAuth {
            channel: channel_name.to_string(),
            status,
            message,
        };

        let response = self
            .http
            .post(&self.auth_url)
            .bearer_auth(token)
            .header("Accept", "application/json")
            .json(&AuthRequest {
                socket_id,
                channel_name,
            })
            .send()
            .await
            .map_err(|e| auth_failure(0, e.to_string()))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| auth_failure(status.as_u16(), e.to_string()))?;

        if !status.is_success() {
            let message = serde_json::from_slice::<AuthErrorBody>(&body)
                .ok()
                .and_then(|b| b.message)
                .unwrap_or_else(|| format!("auth endpoint returned {}", status.as_u16()));
            warn!("Channel auth rejected for {}: {}", channel_name, message);
            return Err(auth_failure(status.as_u16(), message));
        }

        let auth = serde_json::from_slice::<ChannelAuth>(&body).map_err(|e| {
            auth_failure(status.as_u16(), format!("invalid auth payload: {}", e))
        })?;
        debug!("Authorized {} for socket {}", channel_name, socket_id);
        Ok(auth)
    }
}
