use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);"
    )?;

    let version: i64 = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))?;

    if version < 1 {
        info!("Running migration v1 (users, refresh tokens, feeds)");
        conn.execute_batch(
            "
            CREATE TABLE users (
                id          TEXT PRIMARY KEY,
                name        TEXT NOT NULL,
                email       TEXT NOT NULL UNIQUE,
                password    TEXT NOT NULL,
                avatar      TEXT,
                created_at  TEXT NOT NULL,
                updated_at  TEXT NOT NULL
            );

            -- token holds the SHA-256 hex digest of the opaque refresh token
            CREATE TABLE refresh_tokens (
                token       TEXT PRIMARY KEY,
                user_id     TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                expires_at  INTEGER NOT NULL
            );

            CREATE INDEX idx_refresh_tokens_expiry
                ON refresh_tokens(expires_at);

            -- user_name / user_avatar are denormalized from the user service
            CREATE TABLE feeds (
                id           TEXT PRIMARY KEY,
                caption      TEXT NOT NULL,
                image_url    TEXT NOT NULL,
                user_id      TEXT NOT NULL,
                user_name    TEXT NOT NULL,
                user_avatar  TEXT,
                created_at   TEXT NOT NULL,
                updated_at   TEXT NOT NULL
            );

            CREATE INDEX idx_feeds_created
                ON feeds(created_at);

            CREATE INDEX idx_feeds_user
                ON feeds(user_id);

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    if version < 2 {
        info!("Running migration v2 (avatar object keys)");
        conn.execute_batch(
            "
            -- set only for avatars uploaded through this service
            ALTER TABLE users ADD COLUMN avatar_key TEXT;

            INSERT INTO schema_version (version) VALUES (2);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
