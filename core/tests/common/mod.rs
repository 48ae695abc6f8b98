#![allow(dead_code)]
/// Shared test doubles: in-memory broadcast server, scripted authorizer, fake session
use async_trait::async_trait;
use estate_realtime::channel::protocol::{
    Frame, CONNECTION_ESTABLISHED, PING, PONG, SUBSCRIBE, SUBSCRIPTION_ERROR,
    SUBSCRIPTION_SUCCEEDED, UNSUBSCRIBE,
};
use estate_realtime::channel::{ChannelAuth, ChannelAuthorizer, ConnectionManager, SocketPipe, Transport};
use estate_realtime::session::SessionProvider;
use estate_realtime::{Config, RealtimeError, Result, UserId};
use serde_json::json;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::sleep;

/// What the fake server saw from the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Wire {
    Join(String),
    Leave(String),
    Pong,
}

#[derive(Clone, Default)]
pub struct ServerScript {
    /// Delay before confirming a subscribe
    pub join_delay: Duration,
    /// Wire channel names the server rejects
    pub reject: HashSet<String>,
    /// Delay inside `open`, to widen connect races
    pub open_delay: Duration,
}

/// In-memory broadcast server speaking the socket protocol
pub struct MemoryTransport {
    opens: AtomicUsize,
    script: ServerScript,
    log: Arc<Mutex<Vec<Wire>>>,
    to_client: Arc<Mutex<Option<mpsc::Sender<String>>>>,
}

impl MemoryTransport {
    pub fn new() -> Arc<Self> {
        Self::with_script(ServerScript::default())
    }

    pub fn with_script(script: ServerScript) -> Arc<Self> {
        Arc::new(Self {
            opens: AtomicUsize::new(0),
            script,
            log: Arc::new(Mutex::new(Vec::new())),
            to_client: Arc::new(Mutex::new(None)),
        })
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn log(&self) -> Vec<Wire> {
        self.log.lock().unwrap().clone()
    }

    pub fn joins(&self, channel: &str) -> usize {
        self.log()
            .iter()
            .filter(|w| **w == Wire::Join(channel.to_string()))
            .count()
    }

    pub fn leaves(&self, channel: &str) -> usize {
        self.log()
            .iter()
            .filter(|w| **w == Wire::Leave(channel.to_string()))
            .count()
    }

    /// Broadcast an application event to the most recent connection
    pub async fn push(&self, channel: Option<&str>, event: &str, data: serde_json::Value) {
        let sender = self.to_client.lock().unwrap().clone().expect("no open connection");
        let frame = Frame::new(event, channel, serde_json::Value::String(data.to_string()));
        sender.send(frame.to_text().unwrap()).await.unwrap();
    }
}

async fn reply(tx: &mpsc::Sender<String>, event: &str, channel: Option<&str>, data: serde_json::Value) {
    let frame = Frame::new(event, channel, serde_json::Value::String(data.to_string()));
    let _ = tx.send(frame.to_text().unwrap()).await;
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn open(&self, _url: &str) -> Result<SocketPipe> {
        let n = self.opens.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.script.open_delay.is_zero() {
            sleep(self.script.open_delay).await;
        }

        let (client_out_tx, mut server_rx) = mpsc::channel::<String>(64);
        let (client_in_tx, client_in_rx) = mpsc::channel::<String>(64);

        reply(
            &client_in_tx,
            CONNECTION_ESTABLISHED,
            None,
            json!({ "socket_id": format!("{}.{}", n, 1000 + n), "activity_timeout": 30 }),
        )
        .await;
        *self.to_client.lock().unwrap() = Some(client_in_tx.clone());

        let log = self.log.clone();
        let script = self.script.clone();
        tokio::spawn(async move {
            while let Some(text) = server_rx.recv().await {
                let frame = Frame::from_text(&text).unwrap();
                let channel = frame.data["channel"].as_str().unwrap_or_default().to_string();
                match frame.event.as_str() {
                    SUBSCRIBE => {
                        log.lock().unwrap().push(Wire::Join(channel.clone()));
                        let tx = client_in_tx.clone();
                        let script = script.clone();
                        tokio::spawn(async move {
                            if !script.join_delay.is_zero() {
                                sleep(script.join_delay).await;
                            }
                            if script.reject.contains(&channel) {
                                reply(&tx, SUBSCRIPTION_ERROR, Some(&channel), json!({ "type": "AuthError", "status": 403 })).await;
                            } else {
                                reply(&tx, SUBSCRIPTION_SUCCEEDED, Some(&channel), json!({})).await;
                            }
                        });
                    }
                    UNSUBSCRIBE => log.lock().unwrap().push(Wire::Leave(channel)),
                    PING => reply(&client_in_tx, PONG, None, json!({})).await,
                    PONG => log.lock().unwrap().push(Wire::Pong),
                    _ => {}
                }
            }
        });

        Ok(SocketPipe {
            outbound: client_out_tx,
            inbound: client_in_rx,
        })
    }
}

/// Authorizer that signs everything except the listed channels
#[derive(Default)]
pub struct ScriptedAuthorizer {
    pub deny: HashSet<String>,
    pub delay: Duration,
    calls: AtomicUsize,
}

impl ScriptedAuthorizer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn denying(channels: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            deny: channels.iter().map(|c| c.to_string()).collect(),
            ..Default::default()
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChannelAuthorizer for ScriptedAuthorizer {
    async fn authorize(&self, socket_id: &str, channel_name: &str) -> Result<ChannelAuth> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            sleep(self.delay).await;
        }
        if self.deny.contains(channel_name) {
            return Err(RealtimeError::ChannelAuth {
                channel: channel_name.to_string(),
                status: 403,
                message: "Forbidden".to_string(),
            });
        }
        Ok(ChannelAuth {
            auth: format!("app-key:{}:{}", socket_id, channel_name),
            channel_data: None,
        })
    }
}

/// Session whose user and token can be swapped mid-test
#[derive(Default)]
pub struct FakeSession {
    inner: Mutex<Option<(UserId, String)>>,
}

impl FakeSession {
    pub fn signed_in(user: u64, token: &str) -> Arc<Self> {
        let session = Self::default();
        session.sign_in(user, token);
        Arc::new(session)
    }

    pub fn signed_out() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn sign_in(&self, user: u64, token: &str) {
        *self.inner.lock().unwrap() = Some((UserId(user), token.to_string()));
    }

    pub fn sign_out(&self) {
        *self.inner.lock().unwrap() = None;
    }
}

impl SessionProvider for FakeSession {
    fn current_user_id(&self) -> Option<UserId> {
        self.inner.lock().unwrap().as_ref().map(|(id, _)| *id)
    }

    fn bearer_token(&self) -> Option<String> {
        self.inner.lock().unwrap().as_ref().map(|(_, t)| t.clone())
    }
}

pub fn test_config() -> Config {
    Config {
        connect_timeout: Duration::from_secs(2),
        subscribe_timeout: Duration::from_secs(2),
        ..Default::default()
    }
}

pub fn manager(transport: Arc<MemoryTransport>, authorizer: Arc<ScriptedAuthorizer>) -> Arc<ConnectionManager> {
    Arc::new(ConnectionManager::new(test_config(), transport, authorizer))
}

/// Poll `check` until it holds or a second passes
pub async fn eventually<F: Fn() -> bool>(check: F) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        sleep(Duration::from_millis(10)).await;
    }
    check()
}
