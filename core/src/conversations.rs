/// Conversation records and the ordered, de-duplicated list the inbox renders
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Server-assigned conversation id
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(pub u64);

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Server-assigned user id
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub u64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Preview of the newest message in a thread
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastMessage {
    #[serde(default)]
    pub body: String,
    #[serde(default, alias = "createdAt", with = "timestamp")]
    pub created_at: Option<DateTime<Utc>>,
}

/// One conversation thread, as the server broadcasts it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    /// Participant id used to derive channel names
    #[serde(
        default,
        alias = "userId",
        alias = "participant_user_id",
        alias = "participantUserId"
    )]
    pub user_id: Option<UserId>,
    #[serde(default, alias = "lastMessage")]
    pub last_message: Option<LastMessage>,
    #[serde(default, alias = "updatedAt", with = "timestamp")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, alias = "unreadCount")]
    pub unread_count: u32,
}

impl Conversation {
    /// `last_message.created_at`, else `updated_at`, else the epoch
    pub fn activity_time(&self) -> DateTime<Utc> {
        self.last_message
            .as_ref()
            .and_then(|m| m.created_at)
            .or(self.updated_at)
            .unwrap_or_default()
    }
}

/// What `apply_update` did with the incoming record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Inserted,
    Replaced,
}

/// Working set of conversations, newest activity first.
///
/// Equal activity times fall back to the higher conversation id first, so the
/// order never depends on the order records happened to arrive in.
#[derive(Debug, Clone, Default)]
pub struct ConversationList {
    items: Vec<Conversation>,
}

impl ConversationList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the working set with a freshly fetched list.
    ///
    /// Repeated ids keep the last record seen.
    pub fn load_initial(&mut self, list: Vec<Conversation>) {
        let mut index: HashMap<ConversationId, usize> = HashMap::with_capacity(list.len());
        let mut items: Vec<Conversation> = Vec::with_capacity(list.len());
        for conversation in list {
            match index.get(&conversation.id) {
                Some(&pos) => items[pos] = conversation,
                None => {
                    index.insert(conversation.id, items.len());
                    items.push(conversation);
                }
            }
        }
        self.items = items;
        self.sort();
    }

    /// Merge one authoritative record: replace by id or prepend, then re-sort
    pub fn apply_update(&mut self, conversation: Conversation) -> UpdateOutcome {
        let outcome = match self.items.iter_mut().find(|c| c.id == conversation.id) {
            Some(existing) => {
                *existing = conversation;
                UpdateOutcome::Replaced
            }
            None => {
                self.items.insert(0, conversation);
                UpdateOutcome::Inserted
            }
        };
        self.sort();
        outcome
    }

    /// Reset the unread badge locally after the thread was opened
    pub fn mark_read(&mut self, id: ConversationId) -> bool {
        match self.items.iter_mut().find(|c| c.id == id) {
            Some(conversation) => {
                conversation.unread_count = 0;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: ConversationId) -> Option<&Conversation> {
        self.items.iter().find(|c| c.id == id)
    }

    pub fn items(&self) -> &[Conversation] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn total_unread(&self) -> u64 {
        self.items.iter().map(|c| u64::from(c.unread_count)).sum()
    }

    fn sort(&mut self) {
        self.items.sort_by(|a, b| {
            b.activity_time()
                .cmp(&a.activity_time())
                .then_with(|| b.id.cmp(&a.id))
        });
    }
}

/// Lenient timestamp parsing: RFC3339, `YYYY-MM-DD HH:MM:SS` (UTC) or a bare date
mod timestamp {
    use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};
    use tracing::warn;

    pub fn parse(raw: &str) -> Option<DateTime<Utc>> {
        let raw = raw.trim();
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Some(dt.with_timezone(&Utc));
        }
        for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
            if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
                return Some(naive.and_utc());
            }
        }
        NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|naive| naive.and_utc())
    }

    pub fn serialize<S>(value: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(dt) => serializer.serialize_str(&dt.to_rfc3339()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<String>::deserialize(deserializer)? {
            None => Ok(None),
            Some(raw) if raw.trim().is_empty() => Ok(None),
            Some(raw) => {
                let parsed = parse(&raw);
                if parsed.is_none() {
                    warn!("Unreadable timestamp {:?}, treating as unknown", raw);
                }
                Ok(parsed)
            }
        }
    }
}
