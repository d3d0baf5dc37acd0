use crate::models::{FeedRow, RefreshTokenRow, UserRow};
use crate::Database;
use anyhow::Result;
use rusqlite::{Connection, Row};

const USER_COLUMNS: &str =
    "id, name, email, password, avatar, avatar_key, created_at, updated_at";
const FEED_COLUMNS: &str =
    "id, caption, image_url, user_id, user_name, user_avatar, created_at, updated_at";

impl Database {
    // -- Users --

    pub fn create_user(&self, user: &UserRow) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, name, email, password, avatar, avatar_key, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![
                    user.id,
                    user.name,
                    user.email,
                    user.password,
                    user.avatar,
                    user.avatar_key,
                    user.created_at,
                    user.updated_at,
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "email", email))
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id", id))
    }

    /// Overwrite name, avatar URL and avatar object key. Returns the updated
    /// row, or `None` if the user does not exist.
    pub fn update_user_profile(
        &self,
        id: &str,
        name: &str,
        avatar: Option<&str>,
        avatar_key: Option<&str>,
        updated_at: &str,
    ) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users SET name = ?2, avatar = ?3, avatar_key = ?4, updated_at = ?5
                 WHERE id = ?1",
                rusqlite::params![id, name, avatar, avatar_key, updated_at],
            )?;
            if changed == 0 {
                return Ok(None);
            }
            query_user(conn, "id", id)
        })
    }

    // -- Refresh tokens --

    pub fn insert_refresh_token(&self, row: &RefreshTokenRow) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO refresh_tokens (token, user_id, expires_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![row.token, row.user_id, row.expires_at],
            )?;
            Ok(())
        })
    }

    pub fn get_refresh_token(&self, token: &str) -> Result<Option<RefreshTokenRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT token, user_id, expires_at FROM refresh_tokens WHERE token = ?1",
                [token],
                map_refresh_token,
            )
            .optional()
        })
    }

    /// Delete a refresh token and return it if it was still valid at `now`
    /// (epoch seconds). Expired tokens are deleted too but never returned,
    /// so a token can be used at most once.
    pub fn consume_refresh_token(&self, token: &str, now: i64) -> Result<Option<RefreshTokenRow>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let row = tx
                .query_row(
                    "SELECT token, user_id, expires_at FROM refresh_tokens WHERE token = ?1",
                    [token],
                    map_refresh_token,
                )
                .optional()?;
            if row.is_some() {
                tx.execute("DELETE FROM refresh_tokens WHERE token = ?1", [token])?;
            }
            tx.commit()?;
            Ok(row.filter(|r| r.expires_at > now))
        })
    }

    /// Returns true if a row was removed.
    pub fn delete_refresh_token(&self, token: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let n = conn.execute("DELETE FROM refresh_tokens WHERE token = ?1", [token])?;
            Ok(n > 0)
        })
    }

    pub fn delete_expired_refresh_tokens(&self, now: i64) -> Result<usize> {
        self.with_conn(|conn| {
            let n = conn.execute("DELETE FROM refresh_tokens WHERE expires_at <= ?1", [now])?;
            Ok(n)
        })
    }

    // -- Feeds --

    pub fn insert_feed(&self, feed: &FeedRow) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO feeds (id, caption, image_url, user_id, user_name, user_avatar, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![
                    feed.id,
                    feed.caption,
                    feed.image_url,
                    feed.user_id,
                    feed.user_name,
                    feed.user_avatar,
                    feed.created_at,
                    feed.updated_at,
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_feed(&self, id: &str) -> Result<Option<FeedRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {FEED_COLUMNS} FROM feeds WHERE id = ?1");
            conn.query_row(&sql, [id], map_feed).optional()
        })
    }

    /// Newest first. `before` is an exclusive `created_at` cursor.
    /// Newest first, ordered by `(created_at, id)`. `before` is the
    /// `(created_at, id)` of the last row of the previous page.
    pub fn list_feeds(&self, limit: u32, before: Option<(&str, &str)>) -> Result<Vec<FeedRow>> {
        let (before_time, before_id) = before.unzip();
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {FEED_COLUMNS} FROM feeds
                 WHERE (?1 IS NULL OR created_at < ?1 OR (created_at = ?1 AND id < ?2))
                 ORDER BY created_at DESC, id DESC
                 LIMIT ?3"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params![before_time, before_id, limit], map_feed)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn delete_feed(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let n = conn.execute("DELETE FROM feeds WHERE id = ?1", [id])?;
            Ok(n > 0)
        })
    }

    /// Overwrite the denormalized author fields on every feed of `user_id`.
    /// Returns the number of rows touched.
    pub fn update_feed_user_info(
        &self,
        user_id: &str,
        user_name: &str,
        user_avatar: Option<&str>,
        updated_at: &str,
    ) -> Result<usize> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "UPDATE feeds SET user_name = ?2, user_avatar = ?3, updated_at = ?4 WHERE user_id = ?1",
                rusqlite::params![user_id, user_name, user_avatar, updated_at],
            )?;
            Ok(n)
        })
    }
}

fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<UserRow>> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE {column} = ?1");
    let mut stmt = conn.prepare(&sql)?;
    stmt.query_row([value], map_user).optional()
}

fn map_user(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        password: row.get(3)?,
        avatar: row.get(4)?,
        avatar_key: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

fn map_refresh_token(row: &Row<'_>) -> rusqlite::Result<RefreshTokenRow> {
    Ok(RefreshTokenRow {
        token: row.get(0)?,
        user_id: row.get(1)?,
        expires_at: row.get(2)?,
    })
}

fn map_feed(row: &Row<'_>) -> rusqlite::Result<FeedRow> {
    Ok(FeedRow {
        id: row.get(0)?,
        caption: row.get(1)?,
        image_url: row.get(2)?,
        user_id: row.get(3)?,
        user_name: row.get(4)?,
        user_avatar: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
