use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};

pub const SESSION_HEADER: &str = "X-Session-Id";

/// Shown when the backend rejects a form without saying why.
pub const SUBMIT_FALLBACK_MESSAGE: &str = "Failed to send the form.";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl SubmitResponse {
    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AskRequest {
    pub question: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AskResponse {
    pub answer: String,
}

/// Talks to the lead/chat backend on behalf of one session.
#[derive(Clone, Debug)]
pub struct BackendClient {
    http: reqwest::Client,
    base_url: String,
    session_id: String,
}

impl BackendClient {
    pub fn new(base_url: impl Into<String>, session_id: impl Into<String>) -> Result<Self> {
        // Cookies set by the backend ride along on later requests, as with
        // `credentials: "include"` in a browser.
        let http = reqwest::Client::builder()
            .cookie_store(true)
            .timeout(Duration::from_secs(130))
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            session_id: session_id.into(),
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Posts the lead form. Returns the server's message on success.
    pub async fn submit_lead(&self, fields: &BTreeMap<String, String>) -> Result<Option<String>> {
        let url = format!("{}/lead/submit", self.base_url);
        debug!("POST {} ({} field(s))", url, fields.len());

        let response = self
            .http
            .post(&url)
            .header(SESSION_HEADER, &self.session_id)
            .json(fields)
            .send()
            .await?;

        let status = response.status();
        let body: SubmitResponse = match response.json().await {
            Ok(body) => body,
            Err(e) if !status.is_success() => {
                warn!("Lead submission failed with {}: {}", status, e);
                return Err(Error::Backend(SUBMIT_FALLBACK_MESSAGE.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        if !body.is_ok() {
            let message = body
                .message
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| SUBMIT_FALLBACK_MESSAGE.to_string());
            return Err(Error::Backend(message));
        }

        Ok(body.message)
    }

    /// Sends one chat question and returns the agent's markdown answer.
    pub async fn ask(&self, question: &str) -> Result<String> {
        let url = format!("{}/chat", self.base_url);
        debug!("POST {}", url);

        let response = self
            .http
            .post(&url)
            .header(SESSION_HEADER, &self.session_id)
            .json(&AskRequest {
                question: question.to_string(),
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(Error::Backend(format!("chat returned {}: {}", status, detail)));
        }

        let body: AskResponse = response.json().await?;
        Ok(body.answer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fields() -> BTreeMap<String, String> {
        BTreeMap::from([
            ("email".to_string(), "a@example.com".to_string()),
            ("site".to_string(), "example.com".to_string()),
        ])
    }

    #[tokio::test]
    async fn submit_sends_session_header_and_fields() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/lead/submit"))
            .and(header("x-session-id", "sess-1-2"))
            .and(body_json(serde_json::json!({
                "email": "a@example.com",
                "site": "example.com"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "ok",
                "message": "received"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = BackendClient::new(server.uri(), "sess-1-2").unwrap();
        let message = client.submit_lead(&fields()).await.unwrap();
        assert_eq!(message.as_deref(), Some("received"));
    }

    #[tokio::test]
    async fn non_ok_status_is_a_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/lead/submit"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "error",
                "message": "mail server down"
            })))
            .mount(&server)
            .await;

        let client = BackendClient::new(server.uri(), "s").unwrap();
        match client.submit_lead(&fields()).await {
            Err(Error::Backend(message)) => assert_eq!(message, "mail server down"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn rejection_without_message_uses_fallback() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/lead/submit"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let client = BackendClient::new(server.uri(), "s").unwrap();
        match client.submit_lead(&fields()).await {
            Err(Error::Backend(message)) => assert_eq!(message, SUBMIT_FALLBACK_MESSAGE),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn ask_returns_answer() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat"))
            .and(header("x-session-id", "s"))
            .and(body_json(serde_json::json!({ "question": "how long?" })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "answer": "About **5** minutes." })),
            )
            .mount(&server)
            .await;

        let client = BackendClient::new(format!("{}/", server.uri()), "s").unwrap();
        assert_eq!(client.ask("how long?").await.unwrap(), "About **5** minutes.");
    }

    #[tokio::test]
    async fn ask_surfaces_server_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat"))
            .respond_with(
                ResponseTemplate::new(500).set_body_json(serde_json::json!({ "detail": "llm down" })),
            )
            .mount(&server)
            .await;

        let client = BackendClient::new(server.uri(), "s").unwrap();
        assert!(matches!(client.ask("hi").await, Err(Error::Backend(_))));
    }
}
