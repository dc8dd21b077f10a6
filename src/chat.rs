use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Agent,
}

impl Sender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sender::User => "user",
            Sender::Agent => "agent",
        }
    }

    /// Label shown in front of a message bubble.
    pub fn label(&self) -> &'static str {
        match self {
            Sender::User => "You",
            Sender::Agent => "Agent",
        }
    }
}

impl fmt::Display for Sender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Sender {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Sender::User),
            "agent" => Ok(Sender::Agent),
            other => Err(anyhow::anyhow!("unknown sender: {}", other)),
        }
    }
}

/// One entry of the widget's local history.
///
/// `content` is plain text for the user and markdown source for the agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Milliseconds since the Unix epoch.
    pub time: i64,
    pub sender: Sender,
    pub content: String,
}

impl ChatMessage {
    pub fn new(time: i64, sender: Sender, content: impl Into<String>) -> Self {
        Self {
            time,
            sender,
            content: content.into(),
        }
    }
}

/// A conversation turn remembered by the backend for one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub id: String,
    pub session_id: String,
    pub sender: Sender,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    pub fn new(session_id: impl Into<String>, sender: Sender, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            sender,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_wire_format() {
        let msg = ChatMessage::new(42, Sender::Agent, "**hi**");
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(json, r#"{"time":42,"sender":"agent","content":"**hi**"}"#);
    }

    #[test]
    fn sender_parses_its_own_text() {
        assert_eq!("user".parse::<Sender>().unwrap(), Sender::User);
        assert_eq!(Sender::Agent.to_string().parse::<Sender>().unwrap(), Sender::Agent);
        assert!("bot".parse::<Sender>().is_err());
    }
}
