use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One finding produced by analysing a captured frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisLog {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub content: String,
}

impl AnalysisLog {
    pub fn new(content: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            content,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChatRole {
    User,
    System,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatRole::User => "user",
            ChatRole::System => "system",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: Uuid,
    pub role: ChatRole,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self::with_role(ChatRole::User, text.into())
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::with_role(ChatRole::System, text.into())
    }

    fn with_role(role: ChatRole, text: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            text,
            timestamp: Utc::now(),
        }
    }
}
