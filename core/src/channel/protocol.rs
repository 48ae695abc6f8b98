/// Wire format of the broadcast socket (Pusher-compatible JSON frames)
use crate::conversations::Conversation;
use crate::error::{RealtimeError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const CONNECTION_ESTABLISHED: &str = "pusher:connection_established";
pub const SUBSCRIBE: &str = "pusher:subscribe";
pub const UNSUBSCRIBE: &str = "pusher:unsubscribe";
pub const SUBSCRIPTION_SUCCEEDED: &str = "pusher_internal:subscription_succeeded";
pub const SUBSCRIPTION_ERROR: &str = "pusher:subscription_error";
pub const PING: &str = "pusher:ping";
pub const PONG: &str = "pusher:pong";
pub const ERROR: &str = "pusher:error";

/// Prefix the server expects on channels that need authorization
pub const PRIVATE_PREFIX: &str = "private-";

/// Namespace of the per-user conversation list channel
pub const CONVERSATION_LIST_NAMESPACE: &str = "conversation-list.user";

/// Listener name for conversation updates (leading dot: no event namespace)
pub const CONVERSATION_UPDATED: &str = ".conversation.updated";

/// Default namespace applied to listener names without a leading dot
pub const EVENT_NAMESPACE: &str = "App.Events";

/// One socket frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub data: serde_json::Value,
}

impl Frame {
    pub fn new(event: &str, channel: Option<&str>, data: serde_json::Value) -> Self {
        Self {
            event: event.to_string(),
            channel: channel.map(str::to_string),
            data,
        }
    }

    pub fn subscribe(channel: &str, auth: Option<&str>, channel_data: Option<&str>) -> Self {
        let mut data = serde_json::json!({ "channel": channel });
        if let Some(auth) = auth {
            data["auth"] = serde_json::Value::String(auth.to_string());
        }
        if let Some(channel_data) = channel_data {
            data["channel_data"] = serde_json::Value::String(channel_data.to_string());
        }
        Self::new(SUBSCRIBE, None, data)
    }

    pub fn unsubscribe(channel: &str) -> Self {
        Self::new(UNSUBSCRIBE, None, serde_json::json!({ "channel": channel }))
    }

    pub fn ping() -> Self {
        Self::new(PING, None, serde_json::json!({}))
    }

    pub fn pong() -> Self {
        Self::new(PONG, None, serde_json::json!({}))
    }

    pub fn to_text(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_text(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|e| RealtimeError::Protocol(format!("Invalid frame: {}", e)))
    }

    /// Payload with the server's string-encoded JSON unwrapped
    pub fn payload(&self) -> serde_json::Value {
        match &self.data {
            serde_json::Value::String(s) => {
                serde_json::from_str(s).unwrap_or_else(|_| self.data.clone())
            }
            other => other.clone(),
        }
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.channel {
            Some(channel) => write!(f, "{}@{}", self.event, channel),
            None => write!(f, "{}", self.event),
        }
    }
}

/// Handshake payload announced by the server right after connect
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionEstablished {
    pub socket_id: String,
    #[serde(default)]
    pub activity_timeout: Option<u64>,
}

impl ConnectionEstablished {
    pub fn from_frame(frame: &Frame) -> Result<Self> {
        if frame.event != CONNECTION_ESTABLISHED {
            return Err(RealtimeError::Protocol(format!(
                "Expected {}, got {}",
                CONNECTION_ESTABLISHED, frame.event
            )));
        }
        serde_json::from_value(frame.payload())
            .map_err(|e| RealtimeError::Protocol(format!("Invalid handshake payload: {}", e)))
    }
}

/// Channel name for an owner id: `<namespace>.<id>`
pub fn channel_name(namespace: &str, id: impl fmt::Display) -> String {
    format!("{}.{}", namespace, id)
}

/// Name a private channel carries on the wire
pub fn private_channel(name: &str) -> String {
    if name.starts_with(PRIVATE_PREFIX) {
        name.to_string()
    } else {
        format!("{}{}", PRIVATE_PREFIX, name)
    }
}

/// Map a listener name to the event name the server broadcasts.
///
/// `.conversation.updated` → `conversation.updated`;
/// `MessageSent` → `App\Events\MessageSent`.
pub fn wire_event_name(listener: &str) -> String {
    if let Some(stripped) = listener.strip_prefix('.').or_else(|| listener.strip_prefix('\\')) {
        return stripped.to_string();
    }
    format!("{}.{}", EVENT_NAMESPACE, listener).replace('.', "\\")
}

/// Typed view of an application event received on a channel
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    ConversationUpdated { conversation: Conversation },
    Other {
        event: String,
        payload: serde_json::Value,
    },
}

impl ChannelEvent {
    /// Convert a wire event into its typed form
    pub fn decode(event: &str, payload: serde_json::Value) -> Result<Self> {
        if event == wire_event_name(CONVERSATION_UPDATED) {
            // Either the bare record or `{ "conversation": {...} }`
            let record = match payload {
                serde_json::Value::Object(mut map) if map.contains_key("conversation") => {
                    map.remove("conversation").unwrap_or_default()
                }
                other => other,
            };
            let conversation = serde_json::from_value(record).map_err(|e| {
                RealtimeError::Protocol(format!("Invalid conversation payload: {}", e))
            })?;
            return Ok(ChannelEvent::ConversationUpdated { conversation });
        }
        Ok(ChannelEvent::Other {
            event: event.to_string(),
            payload,
        })
    }
}
