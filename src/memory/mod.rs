//! 记忆层：对话轮次（ConversationTurn）

pub mod conversation;

pub use conversation::{transcript_with_query, Message, Role};
