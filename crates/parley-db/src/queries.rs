use chrono::{SecondsFormat, Utc};
use rusqlite::OptionalExtension;
use uuid::Uuid;

use crate::models::{ConnectionRow, FriendRow, MessageRow, SearchRow, UserRow};
use crate::{Database, DbResult, RepoError};

/// Thread history page size.
pub const MESSAGE_PAGE_SIZE: u32 = 12;

impl Database {
    // -- Users --

    pub fn create_user(
        &self,
        username: &str,
        first_name: &str,
        last_name: &str,
        password_hash: &str,
    ) -> DbResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (username, first_name, last_name, password, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                (username, first_name, last_name, password_hash, now()),
            )?;
            Ok(())
        })
    }

    pub fn get_user(&self, username: &str) -> DbResult<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, username))
    }

    pub fn set_thumbnail(&self, username: &str, thumbnail: Option<&str>) -> DbResult<()> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users SET thumbnail = ?2 WHERE username = ?1",
                (username, thumbnail),
            )?;
            if changed == 0 {
                return Err(RepoError::UserNotFound(username.to_string()));
            }
            Ok(())
        })
    }

    /// Case-insensitive prefix search over first/last/username,
    /// excluding the viewer, with the relationship EXISTS flags
    /// computed in the same statement.
    pub fn search_users(&self, viewer: &str, query: &str) -> DbResult<Vec<SearchRow>> {
        let pattern = like_prefix(query);
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT u.username, u.first_name, u.last_name, u.thumbnail,
                        EXISTS(SELECT 1 FROM connections c
                               WHERE c.sender = ?1 AND c.receiver = u.username
                                 AND c.approved = 0) AS pending_them,
                        EXISTS(SELECT 1 FROM connections c
                               WHERE c.sender = u.username AND c.receiver = ?1
                                 AND c.approved = 0) AS pending_me,
                        EXISTS(SELECT 1 FROM connections c
                               WHERE c.approved = 1
                                 AND ((c.sender = ?1 AND c.receiver = u.username)
                                   OR (c.sender = u.username AND c.receiver = ?1))) AS connected
                 FROM users u
                 WHERE u.username <> ?1
                   AND (u.username LIKE ?2 ESCAPE '\\'
                     OR u.first_name LIKE ?2 ESCAPE '\\'
                     OR u.last_name LIKE ?2 ESCAPE '\\')
                 ORDER BY u.username",
            )?;

            let rows = stmt
                .query_map((viewer, &pattern), |row| {
                    Ok(SearchRow {
                        username: row.get(0)?,
                        first_name: row.get(1)?,
                        last_name: row.get(2)?,
                        thumbnail: row.get(3)?,
                        pending_them: row.get(4)?,
                        pending_me: row.get(5)?,
                        connected: row.get(6)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    // -- Connections --

    /// Atomic get-or-create keyed on the ordered (sender, receiver)
    /// pair. An existing edge is returned unchanged — in particular
    /// its approval state is never reset.
    pub fn get_or_create_connection(
        &self,
        sender: &str,
        receiver: &str,
    ) -> DbResult<ConnectionRow> {
        self.with_conn(|conn| {
            let exists: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM users WHERE username = ?1)",
                [receiver],
                |row| row.get(0),
            )?;
            if !exists {
                return Err(RepoError::UserNotFound(receiver.to_string()));
            }

            let tx = conn.unchecked_transaction()?;
            let stamp = now();
            tx.execute(
                "INSERT OR IGNORE INTO connections
                     (id, sender, receiver, approved, created_at, updated_at)
                 VALUES (?1, ?2, ?3, 0, ?4, ?4)",
                (Uuid::new_v4().to_string(), sender, receiver, &stamp),
            )?;
            let row = tx.query_row(
                "SELECT id, sender, receiver, approved, created_at, updated_at
                 FROM connections WHERE sender = ?1 AND receiver = ?2",
                (sender, receiver),
                map_connection,
            )?;
            tx.commit()?;

            Ok(row)
        })
    }

    pub fn get_connection(&self, id: Uuid) -> DbResult<ConnectionRow> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, sender, receiver, approved, created_at, updated_at
                 FROM connections WHERE id = ?1",
                [id.to_string()],
                map_connection,
            )
            .optional()?
            .ok_or(RepoError::ConnectionNotFound(id))
        })
    }

    /// Pending requests addressed to `username`, newest first.
    pub fn pending_for(&self, username: &str) -> DbResult<Vec<ConnectionRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, sender, receiver, approved, created_at, updated_at
                 FROM connections
                 WHERE receiver = ?1 AND approved = 0
                 ORDER BY created_at DESC, rowid DESC",
            )?;
            let rows = stmt
                .query_map([username], map_connection)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Set `approved = 1` and bump `updated_at`. The transition is
    /// monotonic — no query ever writes `approved = 0` after creation.
    pub fn approve_connection(&self, id: Uuid) -> DbResult<ConnectionRow> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE connections SET approved = 1, updated_at = ?2 WHERE id = ?1",
                (id.to_string(), now()),
            )?;
            if changed == 0 {
                return Err(RepoError::ConnectionNotFound(id));
            }
            conn.query_row(
                "SELECT id, sender, receiver, approved, created_at, updated_at
                 FROM connections WHERE id = ?1",
                [id.to_string()],
                map_connection,
            )
            .map_err(RepoError::from)
        })
    }

    /// Approved connections touching `viewer`, each joined with the
    /// counterpart profile and the thread's latest message, ordered by
    /// effective recency (latest message time, else edge update time).
    pub fn friends_for(&self, viewer: &str) -> DbResult<Vec<FriendRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{FRIEND_SELECT}
                 WHERE c.approved = 1 AND (c.sender = ?1 OR c.receiver = ?1)
                 ORDER BY COALESCE(latest_created, c.updated_at) DESC, c.rowid DESC"
            ))?;
            let rows = stmt
                .query_map([viewer], map_friend)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// One connection seen from `viewer`'s side, in friend-list shape.
    pub fn friend_view(&self, id: Uuid, viewer: &str) -> DbResult<FriendRow> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("{FRIEND_SELECT} WHERE c.id = ?2"),
                (viewer, id.to_string()),
                map_friend,
            )
            .optional()?
            .ok_or(RepoError::ConnectionNotFound(id))
        })
    }

    // -- Messages --

    pub fn insert_message(
        &self,
        connection_id: Uuid,
        sender: &str,
        text: &str,
    ) -> DbResult<MessageRow> {
        self.with_conn(|conn| {
            let exists: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM connections WHERE id = ?1)",
                [connection_id.to_string()],
                |row| row.get(0),
            )?;
            if !exists {
                return Err(RepoError::ConnectionNotFound(connection_id));
            }

            let row = MessageRow {
                id: Uuid::new_v4().to_string(),
                connection_id: connection_id.to_string(),
                sender: sender.to_string(),
                text: text.to_string(),
                created_at: now(),
            };
            conn.execute(
                "INSERT INTO messages (id, connection_id, sender, text, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                (&row.id, &row.connection_id, &row.sender, &row.text, &row.created_at),
            )?;
            Ok(row)
        })
    }

    /// One page of a thread, newest first, ties broken by insertion
    /// order. `next` is present iff `total > page * MESSAGE_PAGE_SIZE`.
    pub fn message_page(
        &self,
        connection_id: Uuid,
        page: u32,
    ) -> DbResult<(Vec<MessageRow>, Option<u32>)> {
        self.with_conn(|conn| {
            let exists: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM connections WHERE id = ?1)",
                [connection_id.to_string()],
                |row| row.get(0),
            )?;
            if !exists {
                return Err(RepoError::ConnectionNotFound(connection_id));
            }

            let total: u32 = conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE connection_id = ?1",
                [connection_id.to_string()],
                |row| row.get(0),
            )?;

            let mut stmt = conn.prepare(
                "SELECT id, connection_id, sender, text, created_at
                 FROM messages
                 WHERE connection_id = ?1
                 ORDER BY created_at DESC, rowid DESC
                 LIMIT ?2 OFFSET ?3",
            )?;
            let rows = stmt
                .query_map(
                    (
                        connection_id.to_string(),
                        MESSAGE_PAGE_SIZE,
                        page * MESSAGE_PAGE_SIZE,
                    ),
                    |row| {
                        Ok(MessageRow {
                            id: row.get(0)?,
                            connection_id: row.get(1)?,
                            sender: row.get(2)?,
                            text: row.get(3)?,
                            created_at: row.get(4)?,
                        })
                    },
                )?
                .collect::<Result<Vec<_>, _>>()?;

            let next = if total > page * MESSAGE_PAGE_SIZE {
                Some(page + 1)
            } else {
                None
            };

            Ok((rows, next))
        })
    }
}

/// Shared SELECT for friend-list shapes: the edge, the counterpart
/// profile relative to ?1, and the latest message of the thread.
const FRIEND_SELECT: &str = "
    SELECT c.id,
           u.username, u.first_name, u.last_name, u.thumbnail,
           c.updated_at,
           (SELECT m.text FROM messages m WHERE m.connection_id = c.id
            ORDER BY m.created_at DESC, m.rowid DESC LIMIT 1) AS latest_text,
           (SELECT m.created_at FROM messages m WHERE m.connection_id = c.id
            ORDER BY m.created_at DESC, m.rowid DESC LIMIT 1) AS latest_created
    FROM connections c
    JOIN users u
      ON u.username = CASE WHEN c.sender = ?1 THEN c.receiver ELSE c.sender END";

fn query_user(conn: &rusqlite::Connection, username: &str) -> DbResult<Option<UserRow>> {
    let row = conn
        .query_row(
            "SELECT username, first_name, last_name, password, thumbnail, created_at
             FROM users WHERE username = ?1",
            [username],
            |row| {
                Ok(UserRow {
                    username: row.get(0)?,
                    first_name: row.get(1)?,
                    last_name: row.get(2)?,
                    password: row.get(3)?,
                    thumbnail: row.get(4)?,
                    created_at: row.get(5)?,
                })
            },
        )
        .optional()?;
    Ok(row)
}

fn map_connection(row: &rusqlite::Row<'_>) -> Result<ConnectionRow, rusqlite::Error> {
    Ok(ConnectionRow {
        id: row.get(0)?,
        sender: row.get(1)?,
        receiver: row.get(2)?,
        approved: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

fn map_friend(row: &rusqlite::Row<'_>) -> Result<FriendRow, rusqlite::Error> {
    Ok(FriendRow {
        connection_id: row.get(0)?,
        friend_username: row.get(1)?,
        friend_first_name: row.get(2)?,
        friend_last_name: row.get(3)?,
        friend_thumbnail: row.get(4)?,
        updated_at: row.get(5)?,
        latest_text: row.get(6)?,
        latest_created: row.get(7)?,
    })
}

/// RFC 3339 with microseconds — lexicographic order matches time
/// order, which the DESC indexes rely on.
fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Escape LIKE metacharacters in user input and append the prefix
/// wildcard.
fn like_prefix(query: &str) -> String {
    let mut pattern = String::with_capacity(query.len() + 1);
    for ch in query.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(ch);
    }
    pattern.push('%');
    pattern
}
