use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use rusqlite::Connection;
use tracing::{info, warn};
use uuid::Uuid;

use udagram_types::events::Notification;

use crate::{BusError, QueueClient, ReceivedMessage, TopicPublisher};

#[derive(Debug, Clone)]
pub struct BusConfig {
    /// How long a received message stays hidden before it is redelivered.
    pub visibility_timeout: Duration,
    /// Messages received this many times without being deleted are moved
    /// to the dead-letter table.
    pub max_receive_count: u32,
    /// Sleep between checks while a receive call is long-polling.
    pub poll_interval: Duration,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            visibility_timeout: Duration::from_secs(30),
            max_receive_count: 5,
            poll_interval: Duration::from_millis(250),
        }
    }
}

/// Topic/queue transport on a shared SQLite file. Every service process opens
/// the same file; a topic publish writes one row per subscribed queue.
#[derive(Clone)]
pub struct SqliteBus {
    inner: Arc<BusInner>,
}

struct BusInner {
    conn: Mutex<Connection>,
    config: BusConfig,
}

impl SqliteBus {
    pub fn open(path: &Path, config: BusConfig) -> anyhow::Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.busy_timeout(Duration::from_secs(5))?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS subscriptions (
                topic   TEXT NOT NULL,
                queue   TEXT NOT NULL,
                PRIMARY KEY (topic, queue)
            );

            CREATE TABLE IF NOT EXISTS messages (
                seq            INTEGER PRIMARY KEY AUTOINCREMENT,
                id             TEXT NOT NULL UNIQUE,
                queue          TEXT NOT NULL,
                body           TEXT NOT NULL,
                receive_count  INTEGER NOT NULL DEFAULT 0,
                visible_at     INTEGER NOT NULL,
                receipt        TEXT,
                created_at     INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_messages_queue
                ON messages(queue, visible_at);

            CREATE TABLE IF NOT EXISTS dead_letters (
                id             TEXT PRIMARY KEY,
                queue          TEXT NOT NULL,
                body           TEXT NOT NULL,
                receive_count  INTEGER NOT NULL,
                dead_at        INTEGER NOT NULL
            );
            ",
        )?;

        info!("Event bus opened at {}", path.display());
        Ok(Self {
            inner: Arc::new(BusInner {
                conn: Mutex::new(conn),
                config,
            }),
        })
    }

    /// Route future publishes on `topic` to `queue`. Idempotent.
    pub async fn subscribe(&self, topic: &str, queue: &str) -> Result<(), BusError> {
        let (topic, queue) = (topic.to_string(), queue.to_string());
        self.blocking(move |inner| {
            let conn = inner.lock()?;
            conn.execute(
                "INSERT OR IGNORE INTO subscriptions (topic, queue) VALUES (?1, ?2)",
                (&topic, &queue),
            )?;
            info!("Queue {} subscribed to topic {}", queue, topic);
            Ok(())
        })
        .await
    }

    /// Number of messages parked in the dead-letter table for `queue`.
    pub async fn dead_letter_count(&self, queue: &str) -> Result<usize, BusError> {
        let queue = queue.to_string();
        self.blocking(move |inner| {
            let conn = inner.lock()?;
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM dead_letters WHERE queue = ?1",
                [&queue],
                |r| r.get(0),
            )?;
            Ok(n as usize)
        })
        .await
    }

    async fn blocking<F, T>(&self, f: F) -> Result<T, BusError>
    where
        F: FnOnce(&BusInner) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || f(&inner))
            .await
            .map_err(|e| anyhow!("spawn_blocking join error: {}", e))?
            .map_err(BusError::Transport)
    }
}

impl BusInner {
    fn lock(&self) -> anyhow::Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| anyhow!("Bus lock poisoned: {}", e))
    }

    /// One non-blocking receive attempt: redrive exhausted messages, then
    /// claim up to `max` visible ones.
    fn try_receive(&self, queue: &str, max: usize) -> anyhow::Result<Vec<ReceivedMessage>> {
        let now = now_millis();
        let visible_at = now + self.config.visibility_timeout.as_millis() as i64;
        let max_receives = self.config.max_receive_count as i64;

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let moved = tx.execute(
            "INSERT INTO dead_letters (id, queue, body, receive_count, dead_at)
             SELECT id, queue, body, receive_count, ?3 FROM messages
             WHERE queue = ?1 AND visible_at <= ?3 AND receive_count >= ?2",
            rusqlite::params![queue, max_receives, now],
        )?;
        if moved > 0 {
            tx.execute(
                "DELETE FROM messages WHERE queue = ?1 AND visible_at <= ?3 AND receive_count >= ?2",
                rusqlite::params![queue, max_receives, now],
            )?;
            warn!("Moved {} message(s) from {} to the dead-letter table", moved, queue);
        }

        let candidates: Vec<(i64, String, String, i64)> = {
            let mut stmt = tx.prepare(
                "SELECT seq, id, body, receive_count FROM messages
                 WHERE queue = ?1 AND visible_at <= ?2
                 ORDER BY seq
                 LIMIT ?3",
            )?;
            stmt.query_map(rusqlite::params![queue, now, max as i64], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
            })?
            .collect::<Result<Vec<_>, _>>()?
        };

        let mut received = Vec::with_capacity(candidates.len());
        for (seq, id, body, count) in candidates {
            let receipt = Uuid::new_v4().to_string();
            tx.execute(
                "UPDATE messages SET receive_count = receive_count + 1, visible_at = ?2, receipt = ?3
                 WHERE seq = ?1",
                rusqlite::params![seq, visible_at, receipt],
            )?;
            received.push(ReceivedMessage {
                message_id: id,
                receipt_handle: receipt,
                body,
                receive_count: (count + 1) as u32,
            });
        }

        tx.commit()?;
        Ok(received)
    }
}

#[async_trait]
impl TopicPublisher for SqliteBus {
    async fn publish(&self, topic: &str, message: String) -> Result<String, BusError> {
        let envelope = Notification::wrap(topic, message);
        let message_id = envelope.message_id.to_string();
        let body = serde_json::to_string(&envelope)?;
        let topic = topic.to_string();
        let id = message_id.clone();

        self.blocking(move |inner| {
            let mut conn = inner.lock()?;
            let tx = conn.transaction()?;
            let queues: Vec<String> = {
                let mut stmt = tx.prepare("SELECT queue FROM subscriptions WHERE topic = ?1")?;
                stmt.query_map([&topic], |row| row.get(0))?
                    .collect::<Result<Vec<_>, _>>()?
            };
            if queues.is_empty() {
                warn!("Topic {} has no subscribers, message {} dropped", topic, id);
            }

            let now = now_millis();
            for queue in &queues {
                tx.execute(
                    "INSERT INTO messages (id, queue, body, visible_at, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?4)",
                    rusqlite::params![format!("{}:{}", id, queue), queue, body, now],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
        .await?;

        Ok(message_id)
    }
}

#[async_trait]
impl QueueClient for SqliteBus {
    async fn receive(
        &self,
        queue: &str,
        max_messages: usize,
        wait: Duration,
    ) -> Result<Vec<ReceivedMessage>, BusError> {
        let deadline = tokio::time::Instant::now() + wait;
        let poll_interval = self.inner.config.poll_interval;

        loop {
            let q = queue.to_string();
            let batch = self
                .blocking(move |inner| inner.try_receive(&q, max_messages))
                .await?;

            let now = tokio::time::Instant::now();
            if !batch.is_empty() || now >= deadline {
                return Ok(batch);
            }
            tokio::time::sleep(poll_interval.min(deadline - now)).await;
        }
    }

    async fn delete(&self, queue: &str, receipt_handle: &str) -> Result<(), BusError> {
        let (queue, receipt) = (queue.to_string(), receipt_handle.to_string());
        self.blocking(move |inner| {
            let conn = inner.lock()?;
            let n = conn.execute(
                "DELETE FROM messages WHERE queue = ?1 AND receipt = ?2",
                (&queue, &receipt),
            )?;
            if n == 0 {
                // Receipt went stale: the message was redelivered elsewhere.
                warn!("Delete on {} matched no message for receipt {}", queue, receipt);
            }
            Ok(())
        })
        .await
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bus(config: BusConfig) -> SqliteBus {
        let path = std::env::temp_dir().join(format!("udagram_bus_test_{}.db", Uuid::new_v4()));
        SqliteBus::open(&path, config).unwrap()
    }

    fn fast_config() -> BusConfig {
        BusConfig {
            visibility_timeout: Duration::from_millis(100),
            max_receive_count: 2,
            poll_interval: Duration::from_millis(20),
        }
    }

    #[tokio::test]
    async fn publish_fans_out_to_subscribed_queues() {
        let bus = bus(BusConfig::default());
        bus.subscribe("users", "feed-q").await.unwrap();
        bus.subscribe("users", "audit-q").await.unwrap();
        bus.subscribe("users", "feed-q").await.unwrap();

        bus.publish("users", "hello".into()).await.unwrap();

        for queue in ["feed-q", "audit-q"] {
            let msgs = bus.receive(queue, 10, Duration::ZERO).await.unwrap();
            assert_eq!(msgs.len(), 1);
            let envelope: Notification = serde_json::from_str(&msgs[0].body).unwrap();
            assert_eq!(envelope.message, "hello");
            assert_eq!(envelope.topic_arn, "users");
        }
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_dropped() {
        let bus = bus(BusConfig::default());
        bus.publish("nobody", "x".into()).await.unwrap();
        bus.subscribe("nobody", "late-q").await.unwrap();
        assert!(bus.receive("late-q", 10, Duration::ZERO).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn received_messages_are_hidden_until_deleted_or_timed_out() {
        let bus = bus(fast_config());
        bus.subscribe("t", "q").await.unwrap();
        bus.publish("t", "one".into()).await.unwrap();

        let first = bus.receive("q", 10, Duration::ZERO).await.unwrap();
        assert_eq!(first.len(), 1);
        assert!(bus.receive("q", 10, Duration::ZERO).await.unwrap().is_empty());

        tokio::time::sleep(Duration::from_millis(150)).await;
        let again = bus.receive("q", 10, Duration::ZERO).await.unwrap();
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].receive_count, 2);

        bus.delete("q", &again[0].receipt_handle).await.unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(bus.receive("q", 10, Duration::ZERO).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn stale_receipt_does_not_delete_redelivered_message() {
        let bus = bus(fast_config());
        bus.subscribe("t", "q").await.unwrap();
        bus.publish("t", "one".into()).await.unwrap();

        let first = bus.receive("q", 10, Duration::ZERO).await.unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        let second = bus.receive("q", 10, Duration::ZERO).await.unwrap();
        assert_eq!(second.len(), 1);

        bus.delete("q", &first[0].receipt_handle).await.unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(bus.receive("q", 10, Duration::ZERO).await.unwrap().len(), 0);
        assert_eq!(bus.dead_letter_count("q").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn exhausted_messages_move_to_dead_letters() {
        let bus = bus(fast_config());
        bus.subscribe("t", "q").await.unwrap();
        bus.publish("t", "poison".into()).await.unwrap();

        for _ in 0..2 {
            assert_eq!(bus.receive("q", 10, Duration::ZERO).await.unwrap().len(), 1);
            tokio::time::sleep(Duration::from_millis(150)).await;
        }

        assert!(bus.receive("q", 10, Duration::ZERO).await.unwrap().is_empty());
        assert_eq!(bus.dead_letter_count("q").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn receive_respects_batch_limit_and_order() {
        let bus = bus(BusConfig::default());
        bus.subscribe("t", "q").await.unwrap();
        for i in 0..12 {
            bus.publish("t", format!("m{}", i)).await.unwrap();
        }

        let batch = bus.receive("q", 10, Duration::ZERO).await.unwrap();
        assert_eq!(batch.len(), 10);
        let first: Notification = serde_json::from_str(&batch[0].body).unwrap();
        assert_eq!(first.message, "m0");

        let rest = bus.receive("q", 10, Duration::ZERO).await.unwrap();
        assert_eq!(rest.len(), 2);
    }

    #[tokio::test]
    async fn long_poll_wakes_up_when_a_message_arrives() {
        let bus = bus(BusConfig {
            poll_interval: Duration::from_millis(20),
            ..BusConfig::default()
        });
        bus.subscribe("t", "q").await.unwrap();

        let publisher = bus.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            publisher.publish("t", "late".into()).await.unwrap();
        });

        let started = std::time::Instant::now();
        let msgs = bus.receive("q", 10, Duration::from_secs(5)).await.unwrap();
        assert_eq!(msgs.len(), 1);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn long_poll_returns_empty_after_wait() {
        let bus = bus(fast_config());
        let started = std::time::Instant::now();
        let msgs = bus.receive("empty", 10, Duration::from_millis(100)).await.unwrap();
        assert!(msgs.is_empty());
        assert!(started.elapsed() >= Duration::from_millis(100));
    }
}
