use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Public view of an identity. `name` is derived from first/last name
/// so clients never re-implement the capitalization rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub name: String,
    pub thumbnail: Option<String>,
}

impl Profile {
    pub fn new(
        username: impl Into<String>,
        first_name: impl Into<String>,
        last_name: impl Into<String>,
        thumbnail: Option<String>,
    ) -> Self {
        let first_name = first_name.into();
        let last_name = last_name.into();
        let name = display_name(&first_name, &last_name);
        Self {
            username: username.into(),
            first_name,
            last_name,
            name,
            thumbnail,
        }
    }
}

/// Capitalize each word of "first last".
fn display_name(first_name: &str, last_name: &str) -> String {
    format!("{} {}", first_name, last_name)
        .split_whitespace()
        .map(capitalize)
        .collect::<Vec<_>>()
        .join(" ")
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// A friend-request edge between two identities. Sent to both parties
/// on `request.connect` and to the approver on `request.accept`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connection {
    pub id: Uuid,
    pub sender: Profile,
    pub receiver: Profile,
    pub approved: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One entry of a chat list: an approved connection seen from one
/// side, annotated with the latest-message preview. `updated_at` is
/// the effective timestamp that drives recency ordering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Friend {
    pub id: Uuid,
    pub friend: Profile,
    pub preview: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub connection_id: Uuid,
    pub sender: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

/// One page of a thread, newest first. `next` is the index to request
/// for older messages, absent when the thread is exhausted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagePage {
    pub messages: Vec<ChatMessage>,
    pub next: Option<u32>,
}

/// How `other` relates to the searching identity. Exactly one status
/// holds for any pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RelationshipStatus {
    PendingOutgoing,
    PendingIncoming,
    Connected,
    None,
}

/// A search hit: the matched profile plus its computed relationship
/// status from the searcher's perspective.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    #[serde(flatten)]
    pub profile: Profile,
    pub status: RelationshipStatus,
}
