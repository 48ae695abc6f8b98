/// Conversation list screen: initial fetch + live updates feeding one ordered list
use crate::api::{fetch_conversations, ApiClient};
use crate::channel::connection::EventHandlers;
use crate::channel::manager::ConnectionManager;
use crate::channel::protocol::{ChannelEvent, CONVERSATION_LIST_NAMESPACE, CONVERSATION_UPDATED};
use crate::conversations::{Conversation, ConversationId, ConversationList, UpdateOutcome};
use crate::lifecycle::{require_user, ActivationPolicy, Owner, SubscriptionController, SubscriptionState};
use crate::session::SessionProvider;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

const EVENT_CAPACITY: usize = 256;

/// Change notifications for whoever renders the list
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboxEvent {
    /// The list was replaced by a fresh fetch
    Loaded { count: usize },
    /// A live update was merged
    Updated {
        conversation_id: ConversationId,
        inserted: bool,
    },
    /// The initial fetch failed; the previous list is kept
    LoadFailed { error: String },
}

pub struct ConversationInbox {
    list: Arc<Mutex<ConversationList>>,
    api: Arc<dyn ApiClient>,
    session: Arc<dyn SessionProvider>,
    controller: SubscriptionController,
    events: broadcast::Sender<InboxEvent>,
}

impl ConversationInbox {
    pub fn new(
        manager: Arc<ConnectionManager>,
        session: Arc<dyn SessionProvider>,
        api: Arc<dyn ApiClient>,
    ) -> Self {
        let list = Arc::new(Mutex::new(ConversationList::new()));
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let handlers = {
            let list = list.clone();
            let events = events.clone();
            EventHandlers::new().on(CONVERSATION_UPDATED, move |event| {
                if let ChannelEvent::ConversationUpdated { conversation } = event {
                    let id = conversation.id;
                    let outcome = lock(&list).apply_update(conversation);
                    debug!("Conversation {} {:?}", id, outcome);
                    let _ = events.send(InboxEvent::Updated {
                        conversation_id: id,
                        inserted: outcome == UpdateOutcome::Inserted,
                    });
                }
            })
        };

        let controller = SubscriptionController::new(
            manager,
            session.clone(),
            CONVERSATION_LIST_NAMESPACE,
            Owner::CurrentUser,
            ActivationPolicy::EveryFocus,
            handlers,
        );

        Self {
            list,
            api,
            session,
            controller,
            events,
        }
    }

    /// Screen gained focus: reload the list, then resubscribe
    pub async fn on_focus(&self) -> SubscriptionState {
        self.refresh().await;
        self.controller.on_focus().await
    }

    pub async fn on_blur(&self) {
        self.controller.on_blur().await;
    }

    pub async fn on_unmount(&self) {
        self.controller.on_unmount().await;
    }

    /// Replace the list with the server's current view
    pub async fn refresh(&self) {
        if let Err(e) = require_user(self.session.as_ref()) {
            debug!("Skipping conversation fetch: {}", e);
            return;
        }
        match fetch_conversations(self.api.as_ref()).await {
            Ok(conversations) => {
                let count = {
                    let mut list = lock(&self.list);
                    list.load_initial(conversations);
                    list.len()
                };
                info!("Loaded {} conversations", count);
                let _ = self.events.send(InboxEvent::Loaded { count });
            }
            Err(e) => {
                warn!("Failed to load conversations: {}", e);
                let _ = self.events.send(InboxEvent::LoadFailed {
                    error: e.to_string(),
                });
            }
        }
    }

    pub fn mark_read(&self, id: ConversationId) -> bool {
        lock(&self.list).mark_read(id)
    }

    pub fn snapshot(&self) -> Vec<Conversation> {
        lock(&self.list).items().to_vec()
    }

    pub fn total_unread(&self) -> u64 {
        lock(&self.list).total_unread()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<InboxEvent> {
        self.events.subscribe()
    }

    pub fn controller(&self) -> &SubscriptionController {
        &self.controller
    }
}

fn lock(list: &Mutex<ConversationList>) -> MutexGuard<'_, ConversationList> {
    list.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
