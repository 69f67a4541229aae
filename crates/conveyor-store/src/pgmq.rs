//! PGMQ-backed queue store.
//!
//! Thin bindings over the PGMQ extension's SQL API. Durability, visibility
//! timeouts, and redelivery counting all happen server-side; this module
//! only moves parameters and rows.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;
use tracing::{debug, error, info, warn};

use conveyor_core::defaults;
use conveyor_core::{Error, Job, MessageId, Result, StoreMetrics};

use crate::pool::{create_pool, create_pool_with_config, PoolConfig};
use crate::store::QueueStore;

/// SQLSTATE raised by PGMQ versions that predate `read_with_poll`.
const UNDEFINED_FUNCTION: &str = "42883";

/// SQLSTATE raised when the queue's backing table does not exist.
const UNDEFINED_TABLE: &str = "42P01";

/// Queue store backed by the PGMQ Postgres extension.
///
/// Cheap to clone; all clones share one connection pool.
#[derive(Clone)]
pub struct PgmqStore {
    pool: PgPool,
}

impl PgmqStore {
    /// Wrap an existing connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect with default pool configuration.
    pub async fn connect(database_url: &str) -> Result<Self> {
        Ok(Self::new(create_pool(database_url).await?))
    }

    /// Connect with custom pool configuration.
    pub async fn connect_with(database_url: &str, config: PoolConfig) -> Result<Self> {
        Ok(Self::new(create_pool_with_config(database_url, config).await?))
    }

    /// Connect using the `DATABASE_URL` environment variable.
    pub async fn from_env() -> Result<Self> {
        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| Error::Config("DATABASE_URL not set".to_string()))?;
        Self::connect(&database_url).await
    }

    /// Access the underlying pool (for embedders sharing connections).
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Extract the SQLSTATE code, if the error carries one.
    fn sqlstate(e: &sqlx::Error) -> Option<String> {
        match e {
            sqlx::Error::Database(db) => db.code().map(|c| c.to_string()),
            _ => None,
        }
    }

    /// Map a missing queue table to [`Error::QueueNotFound`].
    fn map_queue_err(e: sqlx::Error, queue: &str) -> Error {
        if Self::sqlstate(&e).as_deref() == Some(UNDEFINED_TABLE) {
            Error::QueueNotFound(queue.to_string())
        } else {
            Error::Database(e)
        }
    }

    /// Parse a PGMQ message row into a Job.
    fn parse_message_row(row: PgRow) -> Job {
        Job {
            id: MessageId(row.get("msg_id")),
            payload: row.get("message"),
            read_count: row.get("read_ct"),
            enqueued_at: row.get("enqueued_at"),
        }
    }

    /// Non-blocking read via `pgmq.read`.
    async fn read_now(&self, queue: &str, vt_secs: i32, max_messages: i32) -> Result<Vec<Job>> {
        let rows = sqlx::query("SELECT * FROM pgmq.read($1, $2, $3)")
            .bind(queue)
            .bind(vt_secs)
            .bind(max_messages)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Self::map_queue_err(e, queue))?;

        Ok(rows.into_iter().map(Self::parse_message_row).collect())
    }

    /// Long-poll read via `pgmq.read_with_poll`, with fallback to a plain
    /// read on installations that lack the poll function.
    async fn read_poll(
        &self,
        queue: &str,
        vt_secs: i32,
        max_messages: i32,
        wait: Duration,
    ) -> Result<Vec<Job>> {
        let result = sqlx::query("SELECT * FROM pgmq.read_with_poll($1, $2, $3, $4, $5)")
            .bind(queue)
            .bind(vt_secs)
            .bind(max_messages)
            .bind(wait.as_secs().max(1) as i32)
            .bind(defaults::LONG_POLL_INTERVAL_MS as i32)
            .fetch_all(&self.pool)
            .await;

        match result {
            Ok(rows) => Ok(rows.into_iter().map(Self::parse_message_row).collect()),
            Err(e) if Self::sqlstate(&e).as_deref() == Some(UNDEFINED_FUNCTION) => {
                warn!(
                    queue = %queue,
                    "pgmq.read_with_poll not available, falling back to plain read"
                );
                self.read_now(queue, vt_secs, max_messages).await
            }
            Err(e) => Err(Self::map_queue_err(e, queue)),
        }
    }
}

#[async_trait]
impl QueueStore for PgmqStore {
    async fn send(
        &self,
        queue: &str,
        payload: JsonValue,
        delay: Option<Duration>,
    ) -> Result<MessageId> {
        let delay_secs = delay.map(|d| d.as_secs() as i32).unwrap_or(0);

        let msg_id: i64 = sqlx::query_scalar("SELECT pgmq.send($1, $2, $3)")
            .bind(queue)
            .bind(&payload)
            .bind(delay_secs)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| Self::map_queue_err(e, queue))?;

        info!(
            queue = %queue,
            msg_id,
            delay_secs,
            "Message sent to queue"
        );
        Ok(MessageId(msg_id))
    }

    async fn send_batch(
        &self,
        queue: &str,
        payloads: Vec<JsonValue>,
        delay: Option<Duration>,
    ) -> Result<Vec<MessageId>> {
        let delay_secs = delay.map(|d| d.as_secs() as i32).unwrap_or(0);

        // PGMQ takes jsonb[]; serialized strings with an array cast avoid
        // ambiguity over the element type.
        let payloads_json = payloads
            .iter()
            .map(serde_json::to_string)
            .collect::<std::result::Result<Vec<String>, _>>()?;

        let rows = sqlx::query("SELECT * FROM pgmq.send_batch($1, $2::jsonb[], $3)")
            .bind(queue)
            .bind(&payloads_json)
            .bind(delay_secs)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Self::map_queue_err(e, queue))?;

        let msg_ids: Vec<MessageId> = rows
            .iter()
            .map(|row| MessageId(row.get::<i64, _>(0)))
            .collect();

        info!(
            queue = %queue,
            message_count = msg_ids.len(),
            "Batch sent to queue"
        );
        Ok(msg_ids)
    }

    async fn read(
        &self,
        queue: &str,
        visibility_timeout: Duration,
        max_messages: i32,
        wait: Option<Duration>,
    ) -> Result<Vec<Job>> {
        let vt_secs = visibility_timeout.as_secs() as i32;

        let messages = match wait {
            Some(wait) => self.read_poll(queue, vt_secs, max_messages, wait).await?,
            None => self.read_now(queue, vt_secs, max_messages).await?,
        };

        if !messages.is_empty() {
            debug!(
                queue = %queue,
                message_count = messages.len(),
                "Messages read from queue"
            );
        }
        Ok(messages)
    }

    async fn delete(&self, queue: &str, id: MessageId) -> Result<bool> {
        let deleted: Option<bool> = sqlx::query_scalar("SELECT pgmq.delete($1, $2)")
            .bind(queue)
            .bind(id.as_i64())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| Self::map_queue_err(e, queue))?;

        let deleted = deleted.unwrap_or(false);
        debug!(queue = %queue, msg_id = %id, success = deleted, "Message deleted");
        Ok(deleted)
    }

    async fn archive(&self, queue: &str, id: MessageId) -> Result<bool> {
        // Explicit BIGINT cast; pgmq.archive is overloaded and the bare
        // parameter has resolved to the wrong signature in the field.
        let archived: Option<bool> = sqlx::query_scalar("SELECT pgmq.archive($1, $2::BIGINT)")
            .bind(queue)
            .bind(id.as_i64())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| Self::map_queue_err(e, queue))?;

        let archived = archived.unwrap_or(false);
        info!(queue = %queue, msg_id = %id, success = archived, "Message archived");
        Ok(archived)
    }

    async fn metrics(&self, queue: &str) -> Result<StoreMetrics> {
        // pgmq.metrics is a set-returning function, not a view; it raises
        // undefined_table for queues that were never created.
        let row = sqlx::query(
            "SELECT queue_name, queue_length, oldest_msg_age_sec, newest_msg_age_sec, \
             total_messages FROM pgmq.metrics($1)",
        )
        .bind(queue)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| Self::map_queue_err(e, queue))?;

        Ok(StoreMetrics {
            queue: row.get("queue_name"),
            queue_length: row.get("queue_length"),
            oldest_msg_age_sec: row.get::<Option<i32>, _>("oldest_msg_age_sec").map(i64::from),
            newest_msg_age_sec: row.get::<Option<i32>, _>("newest_msg_age_sec").map(i64::from),
            total_messages: row.get("total_messages"),
        })
    }

    async fn ensure_queue(&self, queue: &str) -> Result<()> {
        sqlx::query("SELECT pgmq.create($1)")
            .bind(queue)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;

        info!(queue = %queue, "Queue ensured");
        Ok(())
    }

    async fn health_check(&self) -> bool {
        match sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await
        {
            Ok(1) => true,
            Ok(_) => false,
            Err(e) => {
                error!(error = %e, "Queue store health check failed");
                false
            }
        }
    }
}
