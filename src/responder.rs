//! Answer providers for the `/chat` endpoint.

use crate::chat::{Sender, Turn};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const SYSTEM_PROMPT: &str = "You are a consultant for search engine ranking and backlink \
building. The visitor has just requested a sample backlink for their site. Answer in concise \
markdown, using the conversation so far for context.";

#[async_trait]
pub trait Responder: Send + Sync {
    /// Produces the agent's markdown answer given the session's prior turns.
    async fn answer(&self, question: &str, history: &[Turn]) -> Result<String>;
}

/// Answers without a model. Used when no API key is configured.
pub struct EchoResponder;

#[async_trait]
impl Responder for EchoResponder {
    async fn answer(&self, question: &str, history: &[Turn]) -> Result<String> {
        Ok(format!(
            "You asked: *{}*\n\n({} earlier message(s) in this conversation)",
            question.trim(),
            history.len()
        ))
    }
}

/// OpenAI-compatible `/chat/completions` client.
pub struct OpenAiResponder {
    client: reqwest::Client,
    chat_url: String,
    api_key: String,
    model: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    temperature: f64,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiResponder {
    pub fn new(base_url: &str, api_key: impl Into<String>, model: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            chat_url: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            api_key: api_key.into(),
            model: model.into(),
        })
    }
}

#[async_trait]
impl Responder for OpenAiResponder {
    async fn answer(&self, question: &str, history: &[Turn]) -> Result<String> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(Message {
            role: "system",
            content: SYSTEM_PROMPT,
        });
        messages.extend(history.iter().map(|turn| Message {
            role: match turn.sender {
                Sender::User => "user",
                Sender::Agent => "assistant",
            },
            content: &turn.content,
        }));
        messages.push(Message {
            role: "user",
            content: question,
        });

        let request = ChatRequest {
            model: &self.model,
            messages,
            temperature: 0.0,
            max_tokens: 1000,
        };

        let response = self
            .client
            .post(&self.chat_url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .context("Chat completion request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Chat completion returned {}: {}", status, body);
        }

        let body: ChatResponse = response
            .json()
            .await
            .context("Failed to decode chat completion")?;

        let answer = body
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default();

        Ok(answer.trim().to_string())
    }
}
