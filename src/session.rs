//! Session identifier, submission lock and collapse flag.
//!
//! All three live in the widget's keyed storage under the keys the page
//! script has always used, so an existing browser profile keeps working.

use crate::{clock::Clock, error::Result, kv::KeyValueStore};
use rand::Rng;
use std::sync::Arc;
use tracing::{debug, info};

pub const SESSION_ID_KEY: &str = "chat_session_id";
pub const SUBMITTED_AT_KEY: &str = "formSubmittedTimestamp";
pub const COLLAPSED_KEY: &str = "chatCollapsed";

/// How long the lead form stays suppressed after a successful submission.
pub const SUBMISSION_LOCK_MS: i64 = 30 * 60 * 1000;

#[derive(Clone)]
pub struct SessionManager {
    kv: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
}

impl SessionManager {
    pub fn new(kv: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        Self { kv, clock }
    }

    /// Returns the persisted session id, creating one on first use.
    pub async fn get_or_create_session_id(&self) -> Result<String> {
        if let Some(existing) = self.kv.get(SESSION_ID_KEY).await? {
            if !existing.is_empty() {
                return Ok(existing);
            }
        }

        let suffix: u32 = rand::thread_rng().gen_range(0..10_000);
        let session_id = format!("sess-{}-{}", self.clock.now_ms(), suffix);
        self.kv.set(SESSION_ID_KEY, &session_id).await?;
        info!("Created session id {}", session_id);

        Ok(session_id)
    }

    /// Whether the lead form is still suppressed by a recent submission.
    ///
    /// An expired (or unreadable) timestamp is removed the first time it is seen.
    pub async fn is_submission_locked(&self) -> Result<bool> {
        let Some(raw) = self.kv.get(SUBMITTED_AT_KEY).await? else {
            return Ok(false);
        };

        if let Ok(submitted_at) = raw.trim().parse::<i64>() {
            // A timestamp in the future or far enough back to overflow counts as expired.
            let age = self.clock.now_ms().checked_sub(submitted_at);
            if matches!(age, Some(age) if (0..SUBMISSION_LOCK_MS).contains(&age)) {
                return Ok(true);
            }
        }

        debug!("Submission lock expired, clearing {}", SUBMITTED_AT_KEY);
        self.kv.remove(SUBMITTED_AT_KEY).await?;
        Ok(false)
    }

    pub async fn mark_submitted(&self) -> Result<()> {
        let now = self.clock.now_ms();
        self.kv.set(SUBMITTED_AT_KEY, &now.to_string()).await?;
        Ok(())
    }

    pub async fn collapsed(&self) -> Result<bool> {
        Ok(self.kv.get(COLLAPSED_KEY).await?.as_deref() == Some("true"))
    }

    pub async fn set_collapsed(&self, collapsed: bool) -> Result<()> {
        let value = if collapsed { "true" } else { "false" };
        self.kv.set(COLLAPSED_KEY, value).await?;
        Ok(())
    }
}
