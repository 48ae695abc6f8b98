/// Ties one channel subscription to the active period of one screen instance
use crate::channel::connection::{ChannelHandle, EventHandlers};
use crate::channel::manager::ConnectionManager;
use crate::channel::protocol::channel_name;
use crate::conversations::{ConversationId, UserId};
use crate::error::{RealtimeError, Result};
use crate::session::SessionProvider;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

/// Subscription state of a screen instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubscriptionState {
    /// No subscription and none in flight
    Idle,
    /// Resolving the owner id or joining the channel
    Resolving,
    /// Joined; the only state holding a channel handle
    Subscribed,
    /// The last activation failed; treated like `Idle` by the next transition
    Failed,
}

/// When navigation events (re)open the subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivationPolicy {
    /// List screens: subscribe on every focus, leave on every blur
    EveryFocus,
    /// Detail screens: subscribe once on mount, leave on unmount
    OnceOnMount,
}

/// Whose id the channel name is derived from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Owner {
    CurrentUser,
    Conversation(ConversationId),
}

struct Inner {
    state: SubscriptionState,
    /// Bumped by every activation and every cancellation
    epoch: u64,
    owner: Owner,
    handle: Option<ChannelHandle>,
    last_error: Option<String>,
}

impl Inner {
    /// The held handle, unless its connection has gone away
    fn live_handle(&self) -> Option<&ChannelHandle> {
        self.handle
            .as_ref()
            .filter(|h| h.connection().is_connected())
    }

    fn is_stale(&self) -> bool {
        self.state == SubscriptionState::Subscribed && self.live_handle().is_none()
    }

    /// `Subscribed` over a dead connection reads as `Idle`
    fn live_state(&self) -> SubscriptionState {
        if self.is_stale() {
            SubscriptionState::Idle
        } else {
            self.state
        }
    }
}

/// Puts a cancelled activation back to `Idle`
struct ResolvingGuard<'a> {
    inner: &'a Mutex<Inner>,
    epoch: u64,
    armed: bool,
}

impl Drop for ResolvingGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut inner = lock(self.inner);
        if inner.epoch == self.epoch && inner.state == SubscriptionState::Resolving {
            inner.state = SubscriptionState::Idle;
            debug!("Activation cancelled before the join completed");
        }
    }
}

/// Per-screen subscription controller.
///
/// Activations and leaves are serialised on `transition`, so a new activation
/// starts only after the previous leave went out. A deactivation that lands
/// while a join is still in flight bumps the epoch; when that join completes
/// it notices and leaves the channel instead of keeping the handle.
pub struct SubscriptionController {
    manager: Arc<ConnectionManager>,
    session: Arc<dyn SessionProvider>,
    namespace: String,
    handlers: EventHandlers,
    policy: ActivationPolicy,
    inner: Mutex<Inner>,
    transition: AsyncMutex<()>,
}

impl SubscriptionController {
    pub fn new(
        manager: Arc<ConnectionManager>,
        session: Arc<dyn SessionProvider>,
        namespace: impl Into<String>,
        owner: Owner,
        policy: ActivationPolicy,
        handlers: EventHandlers,
    ) -> Self {
        Self {
            manager,
            session,
            namespace: namespace.into(),
            handlers,
            policy,
            inner: Mutex::new(Inner {
                state: SubscriptionState::Idle,
                epoch: 0,
                owner,
                handle: None,
                last_error: None,
            }),
            transition: AsyncMutex::new(()),
        }
    }

    pub async fn state(&self) -> SubscriptionState {
        lock(&self.inner).live_state()
    }

    pub async fn last_error(&self) -> Option<String> {
        lock(&self.inner).last_error.clone()
    }

    /// Channel name held while `Subscribed` on a live connection
    pub async fn channel_name(&self) -> Option<String> {
        let inner = lock(&self.inner);
        inner.live_handle().map(|h| h.name().to_string())
    }

    pub fn policy(&self) -> ActivationPolicy {
        self.policy
    }

    pub async fn on_mount(&self) -> SubscriptionState {
        match self.policy {
            ActivationPolicy::OnceOnMount => self.activate().await,
            ActivationPolicy::EveryFocus => self.state().await,
        }
    }

    pub async fn on_focus(&self) -> SubscriptionState {
        match self.policy {
            ActivationPolicy::EveryFocus => self.activate().await,
            ActivationPolicy::OnceOnMount => {
                // Only rejoin a mounted screen whose connection dropped
                let stale = lock(&self.inner).is_stale();
                if stale {
                    self.activate().await
                } else {
                    self.state().await
                }
            }
        }
    }

    pub async fn on_blur(&self) {
        if self.policy == ActivationPolicy::EveryFocus {
            self.deactivate().await;
        }
    }

    pub async fn on_unmount(&self) {
        self.deactivate().await;
    }

    /// Switch to a different owner id, moving a live subscription along with it
    pub async fn change_owner(&self, owner: Owner) -> SubscriptionState {
        let was_active = {
            let mut inner = lock(&self.inner);
            if inner.owner == owner {
                return inner.live_state();
            }
            inner.owner = owner;
            matches!(
                inner.state,
                SubscriptionState::Subscribed | SubscriptionState::Resolving
            )
        };
        self.deactivate().await;
        if was_active {
            self.activate().await
        } else {
            self.state().await
        }
    }

    /// Open the subscription if none is live or in flight.
    ///
    /// Never fails: a missing session leaves the controller `Idle`, a
    /// connection or auth error leaves it `Failed`. A handle whose connection
    /// was lost is discarded and the channel joined again.
    pub async fn activate(&self) -> SubscriptionState {
        let _transition = self.transition.lock().await;

        let (epoch, owner, stale) = {
            let mut inner = lock(&self.inner);
            match inner.state {
                SubscriptionState::Subscribed if !inner.is_stale() => {
                    debug!("Subscription already active, not joining again");
                    return inner.state;
                }
                SubscriptionState::Resolving => {
                    debug!("Subscription already in flight, not joining again");
                    return inner.state;
                }
                _ => {}
            }
            let stale = inner.handle.take();
            inner.epoch += 1;
            inner.state = SubscriptionState::Resolving;
            inner.last_error = None;
            (inner.epoch, inner.owner, stale)
        };
        let mut guard = ResolvingGuard {
            inner: &self.inner,
            epoch,
            armed: true,
        };

        if let Some(stale) = stale {
            info!("Connection behind {} was lost, joining again", stale.wire_name());
            stale.leave().await;
        }

        let Some(id) = self.resolve_owner(owner) else {
            debug!("No session; live updates unavailable");
            guard.armed = false;
            let mut inner = lock(&self.inner);
            if inner.epoch == epoch {
                inner.state = SubscriptionState::Idle;
            }
            return inner.state;
        };

        let channel = channel_name(&self.namespace, id);
        let joined = self.join(&channel).await;
        guard.armed = false;

        let late = {
            let mut inner = lock(&self.inner);
            let current = inner.epoch == epoch && inner.state == SubscriptionState::Resolving;
            match joined {
                Ok(handle) if current => {
                    info!("Subscribed to {}", channel);
                    inner.handle = Some(handle);
                    inner.state = SubscriptionState::Subscribed;
                    return inner.state;
                }
                Ok(handle) => handle,
                Err(e) => {
                    if e.is_degradation() {
                        warn!("Live updates unavailable for {}: {}", channel, e);
                    } else {
                        warn!("Failed to subscribe to {}: {}", channel, e);
                    }
                    if current {
                        inner.state = SubscriptionState::Failed;
                        inner.last_error = Some(e.to_string());
                    }
                    return inner.live_state();
                }
            }
        };

        info!("Screen deactivated while joining {}, leaving", channel);
        late.leave().await;
        self.state().await
    }

    /// Close the subscription this instance opened; a no-op when there is none
    pub async fn deactivate(&self) {
        {
            let mut inner = lock(&self.inner);
            match inner.state {
                SubscriptionState::Idle => return,
                SubscriptionState::Failed => {
                    inner.state = SubscriptionState::Idle;
                    return;
                }
                SubscriptionState::Resolving => {
                    // The in-flight activation leaves once its join lands
                    inner.epoch += 1;
                    inner.state = SubscriptionState::Idle;
                    debug!("Cancelled in-flight subscription");
                    return;
                }
                SubscriptionState::Subscribed => {}
            }
        }

        let _transition = self.transition.lock().await;
        let handle = {
            let mut inner = lock(&self.inner);
            if inner.state != SubscriptionState::Subscribed {
                return;
            }
            inner.epoch += 1;
            inner.state = SubscriptionState::Idle;
            inner.handle.take()
        };
        if let Some(handle) = handle {
            handle.leave().await;
        }
    }

    fn resolve_owner(&self, owner: Owner) -> Option<u64> {
        let user = self.session.current_user_id()?;
        Some(match owner {
            Owner::CurrentUser => user.0,
            Owner::Conversation(id) => id.0,
        })
    }

    async fn join(&self, channel: &str) -> Result<ChannelHandle> {
        let connection = self.manager.get_connection().await?;
        connection.join(channel, self.handlers.clone()).await
    }
}

fn lock(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Resolve the signed-in user or report why live updates are off
pub fn require_user(session: &dyn SessionProvider) -> Result<UserId> {
    session
        .current_user_id()
        .ok_or_else(|| RealtimeError::SessionUnavailable("no signed-in user".to_string()))
}
