//! 对话轮次
//!
//! Message 即一条 ConversationTurn；序列按时间顺序排列，转发给模型时原样保留顺序。
//! 序列化时角色为小写（"system" / "user" / "assistant"），与 HTTP 请求体一致。

use serde::{Deserialize, Serialize};

/// 消息角色（与 LLM API 一致）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

/// 单条消息
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

/// 将历史与最新问题拼成一段文本（每行 `role: content`，末行 `User: {query}`），用于检索嵌入
pub fn transcript_with_query(history: &[Message], query: &str) -> String {
    let formatted = history
        .iter()
        .map(|m| format!("{}: {}", m.role.as_str(), m.content))
        .collect::<Vec<_>>()
        .join("\n");
    if formatted.is_empty() {
        format!("User: {}", query)
    } else {
        format!("{}\nUser: {}", formatted, query)
    }
}
