/// The shared broadcast connection and the channels joined on it
use crate::channel::authorizer::ChannelAuthorizer;
use crate::channel::protocol::{
    private_channel, wire_event_name, ChannelEvent, ConnectionEstablished, Frame, ERROR, PING,
    PONG, SUBSCRIPTION_ERROR, SUBSCRIPTION_SUCCEEDED,
};
use crate::channel::transport::Transport;
use crate::config::Config;
use crate::error::{RealtimeError, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, error, info, warn};

pub type EventHandler = Arc<dyn Fn(ChannelEvent) + Send + Sync>;

/// Named callbacks registered on a channel, keyed by wire event name
#[derive(Clone, Default)]
pub struct EventHandlers {
    handlers: HashMap<String, EventHandler>,
}

impl EventHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback under a listener name such as `.conversation.updated`
    pub fn on<F>(mut self, listener: &str, handler: F) -> Self
    where
        F: Fn(ChannelEvent) + Send + Sync + 'static,
    {
        self.handlers
            .insert(wire_event_name(listener), Arc::new(handler));
        self
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    fn get(&self, wire_event: &str) -> Option<EventHandler> {
        self.handlers.get(wire_event).cloned()
    }
}

impl std::fmt::Debug for EventHandlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.handlers.keys()).finish()
    }
}

struct ChannelEntry {
    token: u64,
    handlers: EventHandlers,
    /// Present until the server confirms or rejects the subscription
    pending: Option<oneshot::Sender<Result<()>>>,
}

type ChannelMap = Arc<RwLock<HashMap<String, ChannelEntry>>>;
type Outbound = Arc<StdMutex<Option<mpsc::Sender<String>>>>;

/// One live socket to the broadcast server, shared by every subscription
pub struct ChannelConnection {
    socket_id: String,
    outbound: Outbound,
    authorizer: Arc<dyn ChannelAuthorizer>,
    channels: ChannelMap,
    next_token: AtomicU64,
    subscribe_timeout: Duration,
    closed: Arc<AtomicBool>,
    tasks: StdMutex<Vec<JoinHandle<()>>>,
}

impl ChannelConnection {
    /// Open the socket and wait for the server's handshake
    pub async fn connect(
        config: &Config,
        transport: &dyn Transport,
        authorizer: Arc<dyn ChannelAuthorizer>,
    ) -> Result<Arc<Self>> {
        let url = config.broadcast.socket_url();
        info!("Connecting to broadcast server {}", url);

        let mut pipe = timeout(config.connect_timeout, transport.open(&url))
            .await
            .map_err(|_| RealtimeError::Timeout("broadcast connect timeout".to_string()))??;

        let first = timeout(config.connect_timeout, pipe.inbound.recv())
            .await
            .map_err(|_| RealtimeError::Timeout("broadcast handshake timeout".to_string()))?
            .ok_or_else(|| {
                RealtimeError::Connection("socket closed before handshake".to_string())
            })?;
        let frame = Frame::from_text(&first)?;
        if frame.event == ERROR {
            return Err(RealtimeError::Connection(format!(
                "server refused connection: {}",
                frame.payload()
            )));
        }
        let established = ConnectionEstablished::from_frame(&frame)?;
        info!("Broadcast connection established (socket {})", established.socket_id);

        let ping_every = established
            .activity_timeout
            .map(Duration::from_secs)
            .filter(|d| !d.is_zero())
            .unwrap_or(config.activity_timeout);

        let connection = Arc::new(Self {
            socket_id: established.socket_id,
            outbound: Arc::new(StdMutex::new(Some(pipe.outbound))),
            authorizer,
            channels: Arc::new(RwLock::new(HashMap::new())),
            next_token: AtomicU64::new(1),
            subscribe_timeout: config.subscribe_timeout,
            closed: Arc::new(AtomicBool::new(false)),
            tasks: StdMutex::new(Vec::new()),
        });

        let reader = tokio::spawn(run_reader(
            pipe.inbound,
            connection.channels.clone(),
            connection.outbound.clone(),
            connection.closed.clone(),
        ));
        let keepalive = tokio::spawn(run_keepalive(
            ping_every,
            connection.outbound.clone(),
            connection.closed.clone(),
        ));
        if let Ok(mut tasks) = connection.tasks.lock() {
            tasks.push(reader);
            tasks.push(keepalive);
        }

        Ok(connection)
    }

    pub fn socket_id(&self) -> &str {
        &self.socket_id
    }

    pub fn is_connected(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }

    /// Wire names of channels joined or being joined
    pub async fn channels(&self) -> Vec<String> {
        let channels = self.channels.read().await;
        channels.keys().cloned().collect()
    }

    /// Join the private channel `name` and route its events to `handlers`.
    ///
    /// Fails with `DuplicateSubscription` while the channel is already live on
    /// this connection. An auth failure only affects this channel.
    pub async fn join(self: &Arc<Self>, name: &str, handlers: EventHandlers) -> Result<ChannelHandle> {
        if !self.is_connected() {
            return Err(RealtimeError::Connection("connection is closed".to_string()));
        }
        let channel = private_channel(name);
        let token = self.next_token.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();

        {
            let mut channels = self.channels.write().await;
            if channels.contains_key(&channel) {
                return Err(RealtimeError::DuplicateSubscription(channel));
            }
            channels.insert(
                channel.clone(),
                ChannelEntry {
                    token,
                    handlers,
                    pending: Some(tx),
                },
            );
        }

        let mut pending = PendingJoin {
            connection: self.clone(),
            channel: channel.clone(),
            token,
            subscribe_sent: false,
            armed: true,
        };

        let auth = match self.authorizer.authorize(&self.socket_id, &channel).await {
            Ok(auth) => auth,
            Err(e) => {
                pending.abandon().await;
                return Err(e);
            }
        };

        let frame = Frame::subscribe(&channel, Some(&auth.auth), auth.channel_data.as_deref());
        if let Err(e) = self.send(&frame).await {
            pending.abandon().await;
            return Err(e);
        }
        pending.subscribe_sent = true;
        debug!("Subscribe sent for {}", channel);

        match timeout(self.subscribe_timeout, rx).await {
            Ok(Ok(Ok(()))) => {
                pending.armed = false;
                info!("Joined channel {}", channel);
                Ok(ChannelHandle {
                    connection: self.clone(),
                    name: name.to_string(),
                    channel,
                    token,
                    released: false,
                })
            }
            Ok(Ok(Err(e))) => {
                pending.abandon().await;
                Err(e)
            }
            Ok(Err(_)) => {
                pending.abandon().await;
                Err(RealtimeError::Connection(format!(
                    "connection dropped while joining {}",
                    channel
                )))
            }
            Err(_) => {
                pending.abandon().await;
                Err(RealtimeError::Timeout(format!("no answer to subscribe for {}", channel)))
            }
        }
    }

    /// Leave a channel joined through `token`; a no-op for anything else
    async fn leave(&self, channel: &str, token: u64) -> bool {
        if !self.forget(channel, token).await {
            debug!("Ignoring stale leave for {}", channel);
            return false;
        }
        if self.is_connected() {
            if let Err(e) = self.send(&Frame::unsubscribe(channel)).await {
                warn!("Failed to send unsubscribe for {}: {}", channel, e);
            }
        }
        info!("Left channel {}", channel);
        true
    }

    async fn forget(&self, channel: &str, token: u64) -> bool {
        let mut channels = self.channels.write().await;
        match channels.get(channel) {
            Some(entry) if entry.token == token => {
                channels.remove(channel);
                true
            }
            _ => false,
        }
    }

    async fn send(&self, frame: &Frame) -> Result<()> {
        send_frame(&self.outbound, frame).await
    }

    /// Close the socket; pending joins fail and every channel is dropped
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Ok(mut tasks) = self.tasks.lock() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }
        if let Ok(mut outbound) = self.outbound.lock() {
            outbound.take();
        }
        fail_all(&self.channels, "connection closed").await;
        info!("Broadcast connection {} closed", self.socket_id);
    }
}

/// Proof of one successful join, consumed by `leave`
pub struct ChannelHandle {
    connection: Arc<ChannelConnection>,
    name: String,
    channel: String,
    token: u64,
    released: bool,
}

impl ChannelHandle {
    /// Channel name without the private prefix
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Channel name as sent on the wire
    pub fn wire_name(&self) -> &str {
        &self.channel
    }

    pub fn connection(&self) -> &Arc<ChannelConnection> {
        &self.connection
    }

    pub async fn leave(mut self) -> bool {
        let left = self.connection.leave(&self.channel, self.token).await;
        self.released = true;
        left
    }
}

impl Drop for ChannelHandle {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let connection = self.connection.clone();
        let channel = std::mem::take(&mut self.channel);
        let token = self.token;
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    connection.leave(&channel, token).await;
                });
            }
            Err(_) => warn!("Handle for {} dropped outside a runtime, not left", channel),
        }
    }
}

/// A join that has not produced a handle yet.
///
/// Dropped while armed (the joining future was cancelled), it releases the
/// channel entry and unsubscribes if the subscribe already went out.
struct PendingJoin {
    connection: Arc<ChannelConnection>,
    channel: String,
    token: u64,
    subscribe_sent: bool,
    armed: bool,
}

impl PendingJoin {
    async fn abandon(mut self) {
        release_pending(&self.connection, &self.channel, self.token, self.subscribe_sent).await;
        self.armed = false;
    }
}

impl Drop for PendingJoin {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let connection = self.connection.clone();
        let channel = std::mem::take(&mut self.channel);
        let (token, subscribe_sent) = (self.token, self.subscribe_sent);
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                debug!("Join of {} cancelled, releasing", channel);
                runtime.spawn(async move {
                    release_pending(&connection, &channel, token, subscribe_sent).await;
                });
            }
            Err(_) => warn!("Join of {} cancelled outside a runtime", channel),
        }
    }
}

async fn release_pending(connection: &ChannelConnection, channel: &str, token: u64, subscribe_sent: bool) {
    if connection.forget(channel, token).await && subscribe_sent && connection.is_connected() {
        let _ = connection.send(&Frame::unsubscribe(channel)).await;
    }
}

impl std::fmt::Debug for ChannelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelHandle")
            .field("channel", &self.channel)
            .field("socket_id", &self.connection.socket_id)
            .field("token", &self.token)
            .finish()
    }
}

async fn send_frame(outbound: &Outbound, frame: &Frame) -> Result<()> {
    let sender = outbound
        .lock()
        .ok()
        .and_then(|guard| guard.clone())
        .ok_or_else(|| RealtimeError::Connection("connection is closed".to_string()))?;
    sender
        .send(frame.to_text()?)
        .await
        .map_err(|_| RealtimeError::Connection("socket writer stopped".to_string()))
}

async fn fail_all(channels: &ChannelMap, reason: &str) {
    let mut channels = channels.write().await;
    for (name, mut entry) in channels.drain() {
        if let Some(pending) = entry.pending.take() {
            let _ = pending.send(Err(RealtimeError::Connection(format!(
                "{} while joining {}",
                reason, name
            ))));
        }
    }
}

/// Route inbound frames until the socket goes away
async fn run_reader(
    mut inbound: mpsc::Receiver<String>,
    channels: ChannelMap,
    outbound: Outbound,
    closed: Arc<AtomicBool>,
) {
    while let Some(text) = inbound.recv().await {
        let frame = match Frame::from_text(&text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Dropping unreadable frame: {}", e);
                continue;
            }
        };
        debug!("Frame received: {}", frame);

        match frame.event.as_str() {
            PING => {
                if let Err(e) = send_frame(&outbound, &Frame::pong()).await {
                    warn!("Failed to answer ping: {}", e);
                }
            }
            PONG => {}
            SUBSCRIPTION_SUCCEEDED => {
                let Some(channel) = frame.channel.as_deref() else { continue };
                let mut channels = channels.write().await;
                if let Some(pending) = channels.get_mut(channel).and_then(|e| e.pending.take()) {
                    let _ = pending.send(Ok(()));
                }
            }
            SUBSCRIPTION_ERROR => {
                let Some(channel) = frame.channel.as_deref() else { continue };
                let message = frame.payload().to_string();
                warn!("Subscription to {} rejected: {}", channel, message);
                let mut channels = channels.write().await;
                if let Some(mut entry) = channels.remove(channel) {
                    if let Some(pending) = entry.pending.take() {
                        let _ = pending.send(Err(RealtimeError::Subscription {
                            channel: channel.to_string(),
                            message,
                        }));
                    }
                }
            }
            ERROR => {
                warn!("Broadcast server error: {}", frame.payload());
            }
            event => {
                let Some(channel) = frame.channel.as_deref() else {
                    debug!("Unhandled connection event {}", event);
                    continue;
                };
                let handler = {
                    let channels = channels.read().await;
                    channels
                        .get(channel)
                        .filter(|e| e.pending.is_none())
                        .and_then(|e| e.handlers.get(event))
                };
                let Some(handler) = handler else {
                    debug!("No handler for {} on {}", event, channel);
                    continue;
                };
                match ChannelEvent::decode(event, frame.payload()) {
                    Ok(typed) => handler(typed),
                    Err(e) => warn!("Dropping {} on {}: {}", event, channel, e),
                }
            }
        }
    }

    if !closed.swap(true, Ordering::SeqCst) {
        error!("Broadcast connection lost");
    }
    if let Ok(mut outbound) = outbound.lock() {
        outbound.take();
    }
    fail_all(&channels, "connection lost").await;
}

/// Ping the server whenever the activity window elapses
async fn run_keepalive(every: Duration, outbound: Outbound, closed: Arc<AtomicBool>) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker.tick().await;

    loop {
        ticker.tick().await;
        if closed.load(Ordering::SeqCst) {
            break;
        }
        if let Err(e) = send_frame(&outbound, &Frame::ping()).await {
            debug!("Keepalive stopped: {}", e);
            break;
        }
    }
}
