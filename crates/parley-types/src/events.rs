use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{ChatMessage, Connection, Friend, MessagePage, Profile, SearchResult};

/// Events sent FROM client TO server over the chat socket.
///
/// The `source` field selects the handler. Frames with an unknown
/// `source` (or an otherwise undecodable body) fail deserialization
/// and are dropped by the session loop without closing the session.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "source")]
pub enum ClientEvent {
    /// Prefix-search identities by first/last/username.
    #[serde(rename = "search")]
    Search { query: String },

    /// Send a friend request to `username`.
    #[serde(rename = "request.connect")]
    RequestConnect { username: String },

    /// List pending requests addressed to the caller.
    #[serde(rename = "request.list")]
    RequestList,

    /// Approve a pending request by connection id.
    #[serde(rename = "request.accept")]
    RequestAccept { id: Uuid },

    /// List the caller's approved connections, newest activity first.
    #[serde(rename = "friend.list")]
    FriendList,

    /// Append a message to a connection's thread.
    #[serde(rename = "message.send")]
    MessageSend {
        #[serde(rename = "connectionId")]
        connection_id: Uuid,
        #[serde(rename = "messageText")]
        message_text: String,
    },

    /// Fetch one page of a thread's history.
    #[serde(rename = "message.list")]
    MessageList {
        #[serde(rename = "connectionId")]
        connection_id: Uuid,
        page: u32,
    },

    /// Relay a typing indicator to `username`.
    #[serde(rename = "message.type")]
    MessageType { username: String },

    /// Alternate typing indicator carrying the friend as an object.
    #[serde(rename = "typing.on")]
    TypingOn { friend: TypingTarget },

    /// Update (or, with an empty payload, delete) the caller's
    /// thumbnail.
    #[serde(rename = "thumbnail")]
    Thumbnail {
        #[serde(default)]
        base64: Option<String>,
        #[serde(default)]
        filename: Option<String>,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct TypingTarget {
    pub username: String,
}

/// Events sent FROM server TO client, serialized as `{source, data}`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "source", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "search")]
    Search(Vec<SearchResult>),

    #[serde(rename = "request.connect")]
    RequestConnect(Connection),

    #[serde(rename = "request.list")]
    RequestList(Vec<Connection>),

    #[serde(rename = "request.accept")]
    RequestAccept(Connection),

    #[serde(rename = "friend.list")]
    FriendList(Vec<Friend>),

    /// Delivered to the original sender when the other side approves.
    #[serde(rename = "friend.new")]
    FriendNew(Friend),

    #[serde(rename = "message.send")]
    MessageSend(ChatMessage),

    #[serde(rename = "message.list")]
    MessageList(MessagePage),

    #[serde(rename = "message.type")]
    MessageType { username: String },

    #[serde(rename = "typing.on")]
    TypingOn { friend_username: String },

    #[serde(rename = "thumbnail")]
    Thumbnail(Profile),
}
