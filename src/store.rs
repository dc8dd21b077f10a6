use crate::{
    chat::{Sender, Turn},
    kv::KeyValueStore,
    lead::Lead,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    ConnectOptions, Row, SqlitePool,
};
use std::{path::Path, str::FromStr};

#[derive(Clone, Debug)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Create a new Store instance.
    /// This will automatically create the database file if it doesn't exist.
    pub async fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();

        // Ensure the parent directory exists
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).context("Failed to create database directory")?;
            }
        }

        let db_url = format!("sqlite://{}", db_path.to_string_lossy());

        let options = SqliteConnectOptions::from_str(&db_url)?
            .create_if_missing(true)
            .log_statements(tracing::log::LevelFilter::Trace);

        let pool = SqlitePool::connect_with(options)
            .await
            .context("Failed to connect to SQLite database")?;

        Ok(Self { pool })
    }

    /// A private in-memory database. Everything is lost when the store is dropped.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;

        // Every connection to `:memory:` is its own database, so pin the pool to one.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .context("Failed to open in-memory SQLite database")?;

        Ok(Self { pool })
    }

    /// Initialize the database schema.
    pub async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL,
                sender TEXT NOT NULL,
                content TEXT NOT NULL,
                timestamp DATETIME NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_messages_session_timestamp ON messages(session_id, timestamp DESC);

            CREATE TABLE IF NOT EXISTS leads (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                email TEXT NOT NULL,
                site TEXT NOT NULL,
                telegram TEXT,
                keyword TEXT,
                created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to initialize database schema")?;

        Ok(())
    }

    /// Save a conversation turn to the store.
    pub async fn save_turn(&self, turn: &Turn) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO messages (id, session_id, sender, content, timestamp)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&turn.id)
        .bind(&turn.session_id)
        .bind(turn.sender.as_str())
        .bind(&turn.content)
        .bind(turn.timestamp)
        .execute(&self.pool)
        .await
        .context("Failed to save message")?;

        Ok(())
    }

    /// Retrieve the most recent turns of a session.
    /// Returns turns ordered by timestamp ascending (oldest to newest).
    pub async fn session_history(&self, session_id: &str, limit: i64) -> Result<Vec<Turn>> {
        let rows = sqlx::query(
            r#"
            SELECT id, session_id, sender, content, timestamp
            FROM messages
            WHERE session_id = ?
            ORDER BY timestamp DESC, rowid DESC
            LIMIT ?
            "#,
        )
        .bind(session_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch chat history")?;

        let mut turns = Vec::with_capacity(rows.len());

        for row in rows {
            let sender: String = row.try_get("sender")?;

            turns.push(Turn {
                id: row.try_get("id")?,
                session_id: row.try_get("session_id")?,
                sender: sender.parse::<Sender>()?,
                content: row.try_get("content")?,
                timestamp: row.try_get("timestamp")?,
            });
        }

        // Return in chronological order (oldest -> newest)
        turns.reverse();

        Ok(turns)
    }

    /// Record a submitted lead.
    pub async fn save_lead(&self, session_id: &str, lead: &Lead) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO leads (session_id, email, site, telegram, keyword)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(session_id)
        .bind(lead.email.trim())
        .bind(lead.site.trim())
        .bind(&lead.telegram)
        .bind(&lead.keyword)
        .execute(&self.pool)
        .await
        .context("Failed to save lead")?;

        Ok(())
    }

    pub async fn lead_count(&self, session_id: &str) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM leads WHERE session_id = ?")
            .bind(session_id)
            .fetch_one(&self.pool)
            .await
            .context("Failed to count leads")?;

        Ok(row.try_get("n")?)
    }
}

#[async_trait]
impl KeyValueStore for Store {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM kv WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("Failed to read key {}", key))?;

        match row {
            Some(row) => Ok(Some(row.try_get("value")?)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO kv (key, value)
            VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to write key {}", key))?;

        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM kv WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to remove key {}", key))?;

        Ok(())
    }
}
