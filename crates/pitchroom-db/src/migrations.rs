use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |r| r.get(0),
    )?;

    if version < 1 {
        info!("DB: running migration v1 (initial schema)");
        conn.execute_batch(
            "
            CREATE TABLE users (
                id          TEXT PRIMARY KEY,
                name        TEXT NOT NULL,
                email       TEXT NOT NULL UNIQUE COLLATE NOCASE,
                password    TEXT NOT NULL,
                role        TEXT NOT NULL CHECK (role IN ('giver', 'investor')),
                plan        TEXT CHECK (plan IN ('single', 'unlimited', 'investor')),
                is_entitled INTEGER NOT NULL DEFAULT 0,
                expires_at  TEXT,
                created_at  TEXT NOT NULL
            );

            CREATE TABLE ideas (
                id          TEXT PRIMARY KEY,
                user_id     TEXT NOT NULL REFERENCES users(id),
                title       TEXT NOT NULL,
                description TEXT NOT NULL,
                video_url   TEXT NOT NULL,
                created_at  TEXT NOT NULL
            );

            CREATE INDEX idx_ideas_created ON ideas(created_at);

            CREATE TABLE messages (
                id          TEXT PRIMARY KEY,
                sender_id   TEXT NOT NULL REFERENCES users(id),
                receiver_id TEXT NOT NULL REFERENCES users(id),
                content     TEXT NOT NULL,
                created_at  TEXT NOT NULL
            );

            CREATE INDEX idx_messages_pair
                ON messages(sender_id, receiver_id, created_at);

            -- The unordered participant pair, normalized so low_id < high_id.
            -- The primary key is the atomic guard that makes thread creation
            -- at-most-once under concurrent invocation.
            CREATE TABLE conversations (
                low_id      TEXT NOT NULL REFERENCES users(id),
                high_id     TEXT NOT NULL REFERENCES users(id),
                created_at  TEXT NOT NULL,
                PRIMARY KEY (low_id, high_id)
            );

            -- Sale-id replay bookkeeping: a webhook notification carrying a
            -- known sale_id is acknowledged without re-applying its grant.
            CREATE TABLE processed_sales (
                sale_id      TEXT PRIMARY KEY,
                user_id      TEXT NOT NULL REFERENCES users(id),
                plan         TEXT NOT NULL,
                processed_at TEXT NOT NULL
            );

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
