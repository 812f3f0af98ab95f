/// Database row types — these map directly to SQLite rows.
/// Distinct from parley-types wire models to keep the DB layer
/// independent.

pub struct UserRow {
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub password: String,
    pub thumbnail: Option<String>,
    pub created_at: String,
}

#[derive(Debug)]
pub struct ConnectionRow {
    pub id: String,
    pub sender: String,
    pub receiver: String,
    pub approved: bool,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug)]
pub struct MessageRow {
    pub id: String,
    pub connection_id: String,
    pub sender: String,
    pub text: String,
    pub created_at: String,
}

/// A search hit with the three EXISTS flags the relationship status
/// is derived from. At most one flag is set for any row.
pub struct SearchRow {
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub thumbnail: Option<String>,
    pub pending_them: bool,
    pub pending_me: bool,
    pub connected: bool,
}

/// One approved connection seen from a viewer's side, joined with the
/// counterpart profile and the latest message of the thread.
pub struct FriendRow {
    pub connection_id: String,
    pub friend_username: String,
    pub friend_first_name: String,
    pub friend_last_name: String,
    pub friend_thumbnail: Option<String>,
    pub updated_at: String,
    pub latest_text: Option<String>,
    pub latest_created: Option<String>,
}
