/// REST collaborator: a request wrapper that reports failures as values, never as errors
use crate::conversations::Conversation;
use crate::error::{RealtimeError, Result};
use crate::session::SessionProvider;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

/// API request
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub endpoint: String,
    pub method: Method,
    pub data: Option<serde_json::Value>,
}

impl ApiRequest {
    pub fn get(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            method: Method::Get,
            data: None,
        }
    }

    pub fn post(endpoint: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            endpoint: endpoint.into(),
            method: Method::Post,
            data: Some(data),
        }
    }
}

/// API response: either `result` or a human-readable `error`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field_errors: Option<HashMap<String, Vec<String>>>,
}

impl ApiResponse {
    pub fn success(data: serde_json::Value) -> Self {
        Self {
            result: Some(data),
            ..Default::default()
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            error: Some(msg.into()),
            ..Default::default()
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

#[async_trait]
pub trait ApiClient: Send + Sync {
    async fn request(&self, request: ApiRequest) -> ApiResponse;
}

/// Laravel-style failure body
#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
    errors: Option<HashMap<String, Vec<String>>>,
}

/// `ApiClient` over HTTP, authenticated with the current session token
pub struct HttpApiClient {
    http: reqwest::Client,
    base_url: String,
    session: Arc<dyn SessionProvider>,
}

impl HttpApiClient {
    pub fn new(base_url: impl Into<String>, session: Arc<dyn SessionProvider>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| RealtimeError::Http(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            session,
        })
    }

    fn url(&self, endpoint: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            endpoint.trim_start_matches('/')
        )
    }
}

#[async_trait]
impl ApiClient for HttpApiClient {
    async fn request(&self, request: ApiRequest) -> ApiResponse {
        let url = self.url(&request.endpoint);
        let mut builder = match request.method {
            Method::Get => self.http.get(&url),
            Method::Post => self.http.post(&url),
            Method::Put => self.http.put(&url),
            Method::Delete => self.http.delete(&url),
        };
        builder = builder.header("Accept", "application/json");
        if let Some(token) = self.session.bearer_token() {
            builder = builder.bearer_auth(token);
        }
        if let Some(data) = &request.data {
            builder = match request.method {
                Method::Get => builder.query(data),
                _ => builder.json(data),
            };
        }

        debug!("{:?} {}", request.method, url);
        let response = match builder.send().await {
            Ok(r) => r,
            Err(e) => {
                warn!("Request to {} failed: {}", url, e);
                return ApiResponse::error(format!("Network error: {}", e));
            }
        };

        let status = response.status();
        let body = match response.bytes().await {
            Ok(b) => b,
            Err(e) => return ApiResponse::error(format!("Failed to read response: {}", e)),
        };

        if status.is_success() {
            if body.is_empty() {
                return ApiResponse::success(serde_json::Value::Null);
            }
            return match serde_json::from_slice(&body) {
                Ok(value) => ApiResponse::success(value),
                Err(e) => ApiResponse::error(format!("Invalid response body: {}", e)),
            };
        }

        let parsed = serde_json::from_slice::<ErrorBody>(&body).ok();
        let message = parsed
            .as_ref()
            .and_then(|b| b.message.clone())
            .unwrap_or_else(|| format!("Request failed with status {}", status.as_u16()));
        ApiResponse {
            result: None,
            error: Some(message),
            field_errors: parsed.and_then(|b| b.errors),
        }
    }
}

/// Fetch the signed-in user's conversations (`GET conversations`)
pub async fn fetch_conversations(client: &dyn ApiClient) -> Result<Vec<Conversation>> {
    let response = client.request(ApiRequest::get("conversations")).await;
    if let Some(error) = response.error {
        return Err(RealtimeError::Http(error));
    }
    let value = response.result.unwrap_or(serde_json::Value::Null);
    // Accept both a bare array and a `{ "data": [...] }` envelope
    let list = match value {
        serde_json::Value::Object(mut map) => map.remove("data").unwrap_or_default(),
        other => other,
    };
    if list.is_null() {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_value(list)?)
}
