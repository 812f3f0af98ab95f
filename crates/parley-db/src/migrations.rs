use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            username    TEXT PRIMARY KEY,
            first_name  TEXT NOT NULL,
            last_name   TEXT NOT NULL,
            password    TEXT NOT NULL,
            thumbnail   TEXT,
            created_at  TEXT NOT NULL
        );

        -- Friend edges are keyed on the ordered (sender, receiver)
        -- pair: a mirror-image request from the other side is a
        -- distinct row.
        CREATE TABLE IF NOT EXISTS connections (
            id          TEXT PRIMARY KEY,
            sender      TEXT NOT NULL REFERENCES users(username),
            receiver    TEXT NOT NULL REFERENCES users(username),
            approved    INTEGER NOT NULL DEFAULT 0,
            created_at  TEXT NOT NULL,
            updated_at  TEXT NOT NULL,
            UNIQUE(sender, receiver)
        );

        CREATE INDEX IF NOT EXISTS idx_connections_receiver
            ON connections(receiver, approved);

        CREATE TABLE IF NOT EXISTS messages (
            id              TEXT PRIMARY KEY,
            connection_id   TEXT NOT NULL REFERENCES connections(id),
            sender          TEXT NOT NULL REFERENCES users(username),
            text            TEXT NOT NULL,
            created_at      TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_connection
            ON messages(connection_id, created_at);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
