//! Work started in the background once a lead has been accepted.
//!
//! The handler answers the visitor right away; a [`LeadJob`] then kicks off the
//! sample-link build somewhere else and reports how it went in the log.

use crate::lead::Lead;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tracing::info;

/// Keyword used for the sample build when the visitor left the field empty.
pub const DEFAULT_KEYWORD: &str = "SampleKeyword";

#[async_trait]
pub trait LeadJob: Send + Sync {
    async fn run(&self, session_id: &str, lead: &Lead) -> Result<()>;
}

/// The keyword a build should target for `lead`.
pub fn build_keyword(lead: &Lead) -> &str {
    lead.keyword
        .as_deref()
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .unwrap_or(DEFAULT_KEYWORD)
}

/// Only records the request. Used when no build pipeline is configured.
pub struct LoggingLeadJob;

#[async_trait]
impl LeadJob for LoggingLeadJob {
    async fn run(&self, session_id: &str, lead: &Lead) -> Result<()> {
        info!(
            session_id,
            site = lead.site.trim(),
            keyword = build_keyword(lead),
            "Sample link requested for {}",
            lead.email.trim()
        );
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct BuildRequest<'a> {
    session_id: &'a str,
    email: &'a str,
    site: &'a str,
    keyword: &'a str,
    telegram: Option<&'a str>,
}

/// Hands the build to an external pipeline by posting the lead to a webhook.
pub struct WebhookLeadJob {
    client: reqwest::Client,
    url: String,
}

impl WebhookLeadJob {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to build webhook client")?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl LeadJob for WebhookLeadJob {
    async fn run(&self, session_id: &str, lead: &Lead) -> Result<()> {
        let request = BuildRequest {
            session_id,
            email: lead.email.trim(),
            site: lead.site.trim(),
            keyword: build_keyword(lead),
            telegram: lead.telegram.as_deref(),
        };

        self.client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .context("Failed to reach the build webhook")?
            .error_for_status()
            .context("Build webhook refused the lead")?;

        info!("Sample link build queued for session {}", session_id);
        Ok(())
    }
}
