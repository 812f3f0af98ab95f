use anyhow::Result;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use chrono::{DateTime, Utc};
use tracing::warn;
use uuid::Uuid;

use parley_db::models::{ConnectionRow, FriendRow, MessageRow, SearchRow};
use parley_db::{Database, RepoError};
use parley_types::events::{ClientEvent, ServerEvent};
use parley_types::models::{
    ChatMessage, Connection, Friend, MessagePage, Profile, RelationshipStatus, SearchResult,
};

use crate::AppState;

/// Preview shown for an approved connection with no messages yet.
const EMPTY_THREAD_PREVIEW: &str = "New connection";

/// Dispatch one inbound event for `username`'s session.
///
/// Failures are local and non-fatal: they are logged and no frame is
/// emitted to the caller — the client observes "nothing happened".
pub async fn dispatch(state: &AppState, username: &str, event: ClientEvent) {
    let result = match event {
        ClientEvent::Search { query } => search(state, username, query).await,
        ClientEvent::RequestConnect { username: target } => {
            request_connect(state, username, target).await
        }
        ClientEvent::RequestList => request_list(state, username).await,
        ClientEvent::RequestAccept { id } => request_accept(state, username, id).await,
        ClientEvent::FriendList => friend_list(state, username).await,
        ClientEvent::MessageSend {
            connection_id,
            message_text,
        } => message_send(state, username, connection_id, message_text).await,
        ClientEvent::MessageList {
            connection_id,
            page,
        } => message_list(state, username, connection_id, page).await,
        ClientEvent::MessageType { username: target } => {
            state
                .dispatcher
                .send_to(
                    &target,
                    ServerEvent::MessageType {
                        username: username.to_string(),
                    },
                )
                .await;
            Ok(())
        }
        ClientEvent::TypingOn { friend } => {
            state
                .dispatcher
                .send_to(
                    &friend.username,
                    ServerEvent::TypingOn {
                        friend_username: username.to_string(),
                    },
                )
                .await;
            Ok(())
        }
        ClientEvent::Thumbnail { base64, filename } => {
            thumbnail(state, username, base64, filename).await
        }
    };

    if let Err(err) = result {
        match err.downcast_ref::<RepoError>() {
            Some(RepoError::UserNotFound(_) | RepoError::ConnectionNotFound(_)) => {
                warn!("{}: {}", username, err)
            }
            _ => warn!("{}: event handler failed: {:#}", username, err),
        }
    }
}

/// Run a repository closure on the blocking pool — SQLite calls must
/// not run on the async runtime (same rule the REST handlers follow).
async fn with_db<T, F>(state: &AppState, f: F) -> Result<T>
where
    F: FnOnce(&Database) -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    let state = state.clone();
    tokio::task::spawn_blocking(move || f(&state.db)).await?
}

async fn search(state: &AppState, username: &str, query: String) -> Result<()> {
    let viewer = username.to_string();
    let results = with_db(state, move |db| {
        let rows = db.search_users(&viewer, &query)?;
        Ok(rows.into_iter().map(search_payload).collect::<Vec<_>>())
    })
    .await?;

    state
        .dispatcher
        .send_to(username, ServerEvent::Search(results))
        .await;
    Ok(())
}

async fn request_connect(state: &AppState, username: &str, target: String) -> Result<()> {
    let sender = username.to_string();
    let payload = with_db(state, move |db| {
        let row = db.get_or_create_connection(&sender, &target)?;
        connection_payload(db, &row)
    })
    .await?;

    // Both ends learn about the edge, whether it is new or repeated.
    state
        .dispatcher
        .send_to(
            &payload.sender.username,
            ServerEvent::RequestConnect(payload.clone()),
        )
        .await;
    let receiver = payload.receiver.username.clone();
    state
        .dispatcher
        .send_to(&receiver, ServerEvent::RequestConnect(payload))
        .await;
    Ok(())
}

async fn request_list(state: &AppState, username: &str) -> Result<()> {
    let receiver = username.to_string();
    let pending = with_db(state, move |db| pending_payloads(db, &receiver)).await?;

    state
        .dispatcher
        .send_to(username, ServerEvent::RequestList(pending))
        .await;
    Ok(())
}

async fn request_accept(state: &AppState, username: &str, id: Uuid) -> Result<()> {
    let approver = username.to_string();
    let (original_sender, accepted, pending, friends, sender_view) =
        with_db(state, move |db| {
            let row = db.approve_connection(id)?;
            let accepted = connection_payload(db, &row)?;
            let pending = pending_payloads(db, &approver)?;
            let friends = friend_payloads(db, &approver)?;
            // The original sender sees the new friendship from their
            // own side of the edge.
            let sender_view = friend_payload(db.friend_view(id, &row.sender)?)?;
            Ok((row.sender, accepted, pending, friends, sender_view))
        })
        .await?;

    state
        .dispatcher
        .send_to(username, ServerEvent::RequestAccept(accepted))
        .await;
    state
        .dispatcher
        .send_to(username, ServerEvent::RequestList(pending))
        .await;
    state
        .dispatcher
        .send_to(username, ServerEvent::FriendList(friends))
        .await;
    state
        .dispatcher
        .send_to(&original_sender, ServerEvent::FriendNew(sender_view))
        .await;
    Ok(())
}

async fn friend_list(state: &AppState, username: &str) -> Result<()> {
    let viewer = username.to_string();
    let friends = with_db(state, move |db| friend_payloads(db, &viewer)).await?;

    state
        .dispatcher
        .send_to(username, ServerEvent::FriendList(friends))
        .await;
    Ok(())
}

async fn message_send(
    state: &AppState,
    username: &str,
    connection_id: Uuid,
    message_text: String,
) -> Result<()> {
    let sender = username.to_string();
    let (edge, message) = with_db(state, move |db| {
        let row = db.insert_message(connection_id, &sender, &message_text)?;
        let edge = db.get_connection(connection_id)?;
        Ok((edge, message_payload(row)?))
    })
    .await?;

    // Exactly two sends — one per party — regardless of which side the
    // author is on or who is currently online.
    state
        .dispatcher
        .send_to(&edge.sender, ServerEvent::MessageSend(message.clone()))
        .await;
    state
        .dispatcher
        .send_to(&edge.receiver, ServerEvent::MessageSend(message))
        .await;
    Ok(())
}

async fn message_list(
    state: &AppState,
    username: &str,
    connection_id: Uuid,
    page: u32,
) -> Result<()> {
    let page_data = with_db(state, move |db| {
        let (rows, next) = db.message_page(connection_id, page)?;
        let messages = rows
            .into_iter()
            .map(message_payload)
            .collect::<Result<Vec<_>>>()?;
        Ok(MessagePage { messages, next })
    })
    .await?;

    state
        .dispatcher
        .send_to(username, ServerEvent::MessageList(page_data))
        .await;
    Ok(())
}

async fn thumbnail(
    state: &AppState,
    username: &str,
    base64: Option<String>,
    filename: Option<String>,
) -> Result<()> {
    let owner = username.to_string();
    let current = with_db(state, move |db| {
        let user = db
            .get_user(&owner)?
            .ok_or_else(|| RepoError::UserNotFound(owner.clone()))?;
        Ok(user.thumbnail)
    })
    .await?;

    // A replaced thumbnail may change extension, so the old blob is
    // removed explicitly in both branches.
    let stored = match base64.as_deref().filter(|encoded| !encoded.is_empty()) {
        Some(encoded) => {
            let bytes = B64.decode(encoded)?;
            if let Some(old) = &current {
                state.media.delete(old).await?;
            }
            let filename = filename.unwrap_or_default();
            Some(state.media.save_thumbnail(username, &filename, &bytes).await?)
        }
        None => {
            if let Some(old) = &current {
                state.media.delete(old).await?;
            }
            None
        }
    };

    let owner = username.to_string();
    let profile = with_db(state, move |db| {
        db.set_thumbnail(&owner, stored.as_deref())?;
        load_profile(db, &owner)
    })
    .await?;

    // Profile refresh goes to the caller only.
    state
        .dispatcher
        .send_to(username, ServerEvent::Thumbnail(profile))
        .await;
    Ok(())
}

// -- Payload builders --

fn load_profile(db: &Database, username: &str) -> Result<Profile> {
    let row = db
        .get_user(username)?
        .ok_or_else(|| RepoError::UserNotFound(username.to_string()))?;
    Ok(Profile::new(
        row.username,
        row.first_name,
        row.last_name,
        row.thumbnail,
    ))
}

fn connection_payload(db: &Database, row: &ConnectionRow) -> Result<Connection> {
    Ok(Connection {
        id: row.id.parse()?,
        sender: load_profile(db, &row.sender)?,
        receiver: load_profile(db, &row.receiver)?,
        approved: row.approved,
        created_at: parse_time(&row.created_at)?,
        updated_at: parse_time(&row.updated_at)?,
    })
}

fn pending_payloads(db: &Database, receiver: &str) -> Result<Vec<Connection>> {
    db.pending_for(receiver)?
        .iter()
        .map(|row| connection_payload(db, row))
        .collect()
}

fn friend_payloads(db: &Database, viewer: &str) -> Result<Vec<Friend>> {
    db.friends_for(viewer)?
        .into_iter()
        .map(friend_payload)
        .collect()
}

fn friend_payload(row: FriendRow) -> Result<Friend> {
    // Effective recency: the latest message if any, else the edge's
    // own update time.
    let updated_at = parse_time(row.latest_created.as_deref().unwrap_or(&row.updated_at))?;
    Ok(Friend {
        id: row.connection_id.parse()?,
        friend: Profile::new(
            row.friend_username,
            row.friend_first_name,
            row.friend_last_name,
            row.friend_thumbnail,
        ),
        preview: row
            .latest_text
            .unwrap_or_else(|| EMPTY_THREAD_PREVIEW.to_string()),
        updated_at,
    })
}

fn message_payload(row: MessageRow) -> Result<ChatMessage> {
    Ok(ChatMessage {
        id: row.id.parse()?,
        connection_id: row.connection_id.parse()?,
        sender: row.sender,
        text: row.text,
        created_at: parse_time(&row.created_at)?,
    })
}

fn search_payload(row: SearchRow) -> SearchResult {
    // At most one flag is set (enforced by the idempotent edge
    // creation); precedence here mirrors their definition order.
    let status = match (row.pending_them, row.pending_me, row.connected) {
        (true, _, _) => RelationshipStatus::PendingOutgoing,
        (_, true, _) => RelationshipStatus::PendingIncoming,
        (_, _, true) => RelationshipStatus::Connected,
        _ => RelationshipStatus::None,
    };
    SearchResult {
        profile: Profile::new(row.username, row.first_name, row.last_name, row.thumbnail),
        status,
    }
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)?.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::Dispatcher;
    use crate::media::MediaStore;
    use crate::AppStateInner;
    use parley_types::events::TypingTarget;
    use std::sync::Arc;
    use tokio::sync::mpsc::UnboundedReceiver;
    use tokio::sync::mpsc::error::TryRecvError;

    async fn test_state() -> AppState {
        let db = Database::open_in_memory().unwrap();
        for (username, first, last) in [
            ("alice", "Alice", "Anders"),
            ("bob", "Bob", "Baker"),
            ("carol", "Carol", "Clark"),
        ] {
            db.create_user(username, first, last, "hash").unwrap();
        }
        let media = MediaStore::new(
            std::env::temp_dir().join(format!("parley-handlers-{}", Uuid::new_v4())),
        )
        .await
        .unwrap();
        Arc::new(AppStateInner {
            db,
            dispatcher: Dispatcher::new(),
            media,
            jwt_secret: "test-secret".into(),
        })
    }

    async fn open_session(state: &AppState, username: &str) -> UnboundedReceiver<ServerEvent> {
        state.dispatcher.register(username).await.1
    }

    fn next_event(rx: &mut UnboundedReceiver<ServerEvent>) -> ServerEvent {
        rx.try_recv().expect("expected a delivered frame")
    }

    fn assert_drained(rx: &mut UnboundedReceiver<ServerEvent>) {
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    /// Drive a request.connect and return the edge id.
    async fn connect_alice_to_bob(state: &AppState) -> Uuid {
        let mut rx = open_session(state, "alice").await;
        dispatch(
            state,
            "alice",
            ClientEvent::RequestConnect {
                username: "bob".into(),
            },
        )
        .await;
        match next_event(&mut rx) {
            ServerEvent::RequestConnect(connection) => connection.id,
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn connect_request_reaches_both_parties() {
        let state = test_state().await;
        let mut alice_rx = open_session(&state, "alice").await;
        let mut bob_rx = open_session(&state, "bob").await;

        dispatch(
            &state,
            "alice",
            ClientEvent::RequestConnect {
                username: "bob".into(),
            },
        )
        .await;

        let to_alice = match next_event(&mut alice_rx) {
            ServerEvent::RequestConnect(c) => c,
            other => panic!("unexpected event: {other:?}"),
        };
        let to_bob = match next_event(&mut bob_rx) {
            ServerEvent::RequestConnect(c) => c,
            other => panic!("unexpected event: {other:?}"),
        };

        assert_eq!(to_alice.id, to_bob.id);
        assert!(!to_alice.approved);
        assert_eq!(to_alice.sender.username, "alice");
        assert_eq!(to_alice.receiver.username, "bob");
        assert_drained(&mut alice_rx);
        assert_drained(&mut bob_rx);
    }

    #[tokio::test]
    async fn connect_to_unknown_user_emits_nothing() {
        let state = test_state().await;
        let mut alice_rx = open_session(&state, "alice").await;

        dispatch(
            &state,
            "alice",
            ClientEvent::RequestConnect {
                username: "nobody".into(),
            },
        )
        .await;

        assert_drained(&mut alice_rx);
    }

    #[tokio::test]
    async fn accept_notifies_approver_and_original_sender() {
        let state = test_state().await;
        let id = connect_alice_to_bob(&state).await;

        let mut alice_rx = open_session(&state, "alice").await;
        let mut bob_rx = open_session(&state, "bob").await;

        dispatch(&state, "bob", ClientEvent::RequestAccept { id }).await;

        // Approver: accepted edge, refreshed pending list, refreshed
        // friend list — in that order.
        match next_event(&mut bob_rx) {
            ServerEvent::RequestAccept(c) => {
                assert_eq!(c.id, id);
                assert!(c.approved);
            }
            other => panic!("unexpected event: {other:?}"),
        }
        match next_event(&mut bob_rx) {
            ServerEvent::RequestList(pending) => assert!(pending.is_empty()),
            other => panic!("unexpected event: {other:?}"),
        }
        match next_event(&mut bob_rx) {
            ServerEvent::FriendList(friends) => {
                assert_eq!(friends.len(), 1);
                assert_eq!(friends[0].id, id);
                assert_eq!(friends[0].friend.username, "alice");
                assert_eq!(friends[0].preview, "New connection");
            }
            other => panic!("unexpected event: {other:?}"),
        }

        // Original sender: the new friendship from their own side.
        match next_event(&mut alice_rx) {
            ServerEvent::FriendNew(friend) => {
                assert_eq!(friend.id, id);
                assert_eq!(friend.friend.username, "bob");
            }
            other => panic!("unexpected event: {other:?}"),
        }

        assert_drained(&mut alice_rx);
        assert_drained(&mut bob_rx);
    }

    #[tokio::test]
    async fn accept_of_unknown_id_emits_nothing() {
        let state = test_state().await;
        let mut bob_rx = open_session(&state, "bob").await;

        dispatch(
            &state,
            "bob",
            ClientEvent::RequestAccept { id: Uuid::new_v4() },
        )
        .await;

        assert_drained(&mut bob_rx);
    }

    #[tokio::test]
    async fn message_fans_out_to_exactly_both_parties() {
        let state = test_state().await;
        let id = connect_alice_to_bob(&state).await;
        dispatch(&state, "bob", ClientEvent::RequestAccept { id }).await;

        let mut alice_rx = open_session(&state, "alice").await;
        let mut bob_rx = open_session(&state, "bob").await;
        let mut carol_rx = open_session(&state, "carol").await;

        // The author is the edge's *receiver* side; fan-out must not
        // depend on which party sends.
        dispatch(
            &state,
            "bob",
            ClientEvent::MessageSend {
                connection_id: id,
                message_text: "hi alice".into(),
            },
        )
        .await;

        for rx in [&mut alice_rx, &mut bob_rx] {
            match next_event(rx) {
                ServerEvent::MessageSend(message) => {
                    assert_eq!(message.connection_id, id);
                    assert_eq!(message.sender, "bob");
                    assert_eq!(message.text, "hi alice");
                }
                other => panic!("unexpected event: {other:?}"),
            }
            assert_drained(rx);
        }
        assert_drained(&mut carol_rx);
    }

    #[tokio::test]
    async fn message_to_offline_party_is_dropped_silently() {
        let state = test_state().await;
        let id = connect_alice_to_bob(&state).await;
        dispatch(&state, "bob", ClientEvent::RequestAccept { id }).await;

        // Only bob is online now.
        let mut bob_rx = open_session(&state, "bob").await;
        dispatch(
            &state,
            "bob",
            ClientEvent::MessageSend {
                connection_id: id,
                message_text: "anyone there?".into(),
            },
        )
        .await;

        // The author still gets their copy; alice's copy vanishes.
        assert!(matches!(
            next_event(&mut bob_rx),
            ServerEvent::MessageSend(_)
        ));
        assert_drained(&mut bob_rx);
    }

    #[tokio::test]
    async fn message_list_pages_newest_first() {
        let state = test_state().await;
        let id = connect_alice_to_bob(&state).await;
        dispatch(&state, "bob", ClientEvent::RequestAccept { id }).await;

        for i in 0..15 {
            dispatch(
                &state,
                "alice",
                ClientEvent::MessageSend {
                    connection_id: id,
                    message_text: format!("msg {i}"),
                },
            )
            .await;
        }

        let mut alice_rx = open_session(&state, "alice").await;
        dispatch(
            &state,
            "alice",
            ClientEvent::MessageList {
                connection_id: id,
                page: 0,
            },
        )
        .await;

        match next_event(&mut alice_rx) {
            ServerEvent::MessageList(page) => {
                assert_eq!(page.messages.len(), 12);
                assert_eq!(page.messages[0].text, "msg 14");
                assert_eq!(page.next, Some(1));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn typing_indicators_relay_to_target_only() {
        let state = test_state().await;
        let mut alice_rx = open_session(&state, "alice").await;
        let mut bob_rx = open_session(&state, "bob").await;

        dispatch(
            &state,
            "alice",
            ClientEvent::TypingOn {
                friend: TypingTarget {
                    username: "bob".into(),
                },
            },
        )
        .await;
        match next_event(&mut bob_rx) {
            ServerEvent::TypingOn { friend_username } => assert_eq!(friend_username, "alice"),
            other => panic!("unexpected event: {other:?}"),
        }

        dispatch(
            &state,
            "bob",
            ClientEvent::MessageType {
                username: "alice".into(),
            },
        )
        .await;
        match next_event(&mut alice_rx) {
            ServerEvent::MessageType { username } => assert_eq!(username, "bob"),
            other => panic!("unexpected event: {other:?}"),
        }

        assert_drained(&mut alice_rx);
        assert_drained(&mut bob_rx);
    }

    #[tokio::test]
    async fn search_results_carry_relationship_status() {
        let state = test_state().await;
        connect_alice_to_bob(&state).await;

        let mut alice_rx = open_session(&state, "alice").await;
        dispatch(
            &state,
            "alice",
            ClientEvent::Search {
                query: "b".into(),
            },
        )
        .await;
        match next_event(&mut alice_rx) {
            ServerEvent::Search(results) => {
                let bob = results
                    .iter()
                    .find(|r| r.profile.username == "bob")
                    .expect("bob should match");
                assert_eq!(bob.status, RelationshipStatus::PendingOutgoing);
            }
            other => panic!("unexpected event: {other:?}"),
        }

        let mut bob_rx = open_session(&state, "bob").await;
        dispatch(
            &state,
            "bob",
            ClientEvent::Search {
                query: "alice".into(),
            },
        )
        .await;
        match next_event(&mut bob_rx) {
            ServerEvent::Search(results) => {
                assert_eq!(results.len(), 1);
                assert_eq!(results[0].status, RelationshipStatus::PendingIncoming);
                assert_eq!(results[0].profile.name, "Alice Anders");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn thumbnail_update_and_delete_refresh_the_caller_profile() {
        let state = test_state().await;
        let mut alice_rx = open_session(&state, "alice").await;

        dispatch(
            &state,
            "alice",
            ClientEvent::Thumbnail {
                base64: Some(B64.encode(b"fake image bytes")),
                filename: Some("me.png".into()),
            },
        )
        .await;
        match next_event(&mut alice_rx) {
            ServerEvent::Thumbnail(profile) => {
                assert_eq!(profile.thumbnail.as_deref(), Some("thumbnails/alice.png"));
            }
            other => panic!("unexpected event: {other:?}"),
        }

        // Empty base64 means delete.
        dispatch(
            &state,
            "alice",
            ClientEvent::Thumbnail {
                base64: Some(String::new()),
                filename: None,
            },
        )
        .await;
        match next_event(&mut alice_rx) {
            ServerEvent::Thumbnail(profile) => assert_eq!(profile.thumbnail, None),
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
