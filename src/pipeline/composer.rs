//! 回答生成：固定系统指令 + 完整历史 + 一条 `Context / Question` 用户消息，输出 Markdown

use std::sync::Arc;

use crate::core::AnswerError;
use crate::llm::{CompletionOptions, LlmClient, LlmError};
use crate::memory::Message;

const SYSTEM_PROMPT: &str = "You are an expert software engineer who builds APIs and documentation. \
Answer questions based on the provided context, and ensure the whole response is in Markdown format.";

pub struct AnswerComposer {
    llm: Arc<dyn LlmClient>,
}

impl AnswerComposer {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    pub async fn compose(
        &self,
        context: &str,
        history: &[Message],
        query: &str,
    ) -> Result<String, AnswerError> {
        let messages = compose_messages(context, history, query);
        let reply = self
            .llm
            .complete(&messages, CompletionOptions::free_text())
            .await?;
        let answer = reply.trim();
        if answer.is_empty() {
            return Err(LlmError::EmptyCompletion.into());
        }
        Ok(answer.to_string())
    }
}

fn compose_messages(context: &str, history: &[Message], query: &str) -> Vec<Message> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(Message::system(SYSTEM_PROMPT));
    messages.extend(history.iter().cloned());
    messages.push(Message::user(format!(
        "Context:\n{}\n\nQuestion: {}",
        context, query
    )));
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedLlmClient;
    use crate::memory::Role;

    #[tokio::test]
    async fn test_message_layout() {
        let llm = Arc::new(ScriptedLlmClient::with_replies(["  **answer**\n"]));
        let composer = AnswerComposer::new(llm.clone());
        let history = vec![Message::user("a"), Message::assistant("b")];

        let answer = composer.compose("ctx", &history, "why?").await.unwrap();
        assert_eq!(answer, "**answer**");

        let call = &llm.calls()[0];
        assert_eq!(call.options, CompletionOptions::free_text());
        assert_eq!(call.messages.len(), 4);
        assert_eq!(call.messages[0].role, Role::System);
        assert_eq!(&call.messages[1..3], &history[..]);
        assert_eq!(call.messages[3].content, "Context:\nctx\n\nQuestion: why?");
    }

    #[tokio::test]
    async fn test_faults_propagate() {
        let composer = AnswerComposer::new(Arc::new(ScriptedLlmClient::always_failing()));
        let err = composer.compose("ctx", &[], "q").await.unwrap_err();
        assert_eq!(err.code(), "llm_failed");

        let composer = AnswerComposer::new(Arc::new(ScriptedLlmClient::with_replies(["   "])));
        assert!(composer.compose("ctx", &[], "q").await.is_err());
    }
}
