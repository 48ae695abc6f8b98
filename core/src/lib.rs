/// Estate Realtime - live conversation updates for the marketplace client
///
/// Keeps one shared broadcast connection per process, binds per-screen channel
/// subscriptions to navigation lifecycle, and reconciles incoming conversation
/// updates into a single recency-ordered list.

pub mod api;
pub mod channel;
pub mod config;
pub mod conversations;
pub mod error;
pub mod inbox;
pub mod lifecycle;
pub mod session;

pub use config::Config;
pub use conversations::{Conversation, ConversationId, ConversationList, UserId};
pub use error::{RealtimeError, Result};
pub use lifecycle::{ActivationPolicy, Owner, SubscriptionController, SubscriptionState};
