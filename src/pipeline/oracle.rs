//! 判定器：这条问题是否需要现场生成并执行函数
//!
//! 只有模型回复在 trim + 小写后恰为 "true" 才返回 true；其它任何内容或调用失败都按 false 处理，
//! 失败记一条 warn，不向上传播。

use std::sync::Arc;

use crate::llm::{CompletionOptions, LlmClient};
use crate::memory::Message;

const SYSTEM_PROMPT: &str = "You answer yes/no questions with true or false.";

pub struct DecisionOracle {
    llm: Arc<dyn LlmClient>,
}

impl DecisionOracle {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    pub async fn decide(&self, history: &[Message], query: &str) -> bool {
        let messages = decision_messages(history, query);
        match self
            .llm
            .complete(&messages, CompletionOptions::deterministic())
            .await
        {
            Ok(reply) => {
                let normalized = reply.trim().to_lowercase();
                tracing::debug!(reply = %normalized, "decision");
                normalized == "true"
            }
            Err(e) => {
                tracing::warn!(error = %e, "decision fault, defaulting to retrieval");
                false
            }
        }
    }
}

fn decision_messages(history: &[Message], query: &str) -> Vec<Message> {
    let prompt = format!(
        "Decide whether answering the latest user query requires generating and executing a \
         dynamic JavaScript function (for example to call an API or compute something), \
         considering the conversation so far.\n\
         Respond with only \"true\" or \"false\", no additional text.\n\n\
         Latest User Query: \"{}\"",
        query
    );
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(Message::system(SYSTEM_PROMPT));
    messages.extend(history.iter().cloned());
    messages.push(Message::user(prompt));
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmError, ScriptedLlmClient};
    use crate::memory::Role;

    async fn decide_with(reply: Result<&str, LlmError>) -> bool {
        let llm = Arc::new(ScriptedLlmClient::new(vec![reply.map(String::from)]));
        DecisionOracle::new(llm).decide(&[], "search people at Acme").await
    }

    #[tokio::test]
    async fn test_normalized_true() {
        assert!(decide_with(Ok("true")).await);
        assert!(decide_with(Ok("  TRUE\n")).await);
    }

    #[tokio::test]
    async fn test_anything_else_is_false() {
        assert!(!decide_with(Ok("false")).await);
        assert!(!decide_with(Ok("yes")).await);
        assert!(!decide_with(Ok("true.")).await);
        assert!(!decide_with(Ok("")).await);
    }

    #[tokio::test]
    async fn test_fault_defaults_to_false() {
        assert!(!decide_with(Err(LlmError::Api("503".into()))).await);

        let llm = Arc::new(ScriptedLlmClient::always_failing());
        let oracle = DecisionOracle::new(llm.clone());
        for _ in 0..3 {
            assert!(!oracle.decide(&[Message::user("hi")], "q").await);
        }
        assert_eq!(llm.call_count(), 3);
    }

    #[tokio::test]
    async fn test_history_forwarded_in_order() {
        let llm = Arc::new(ScriptedLlmClient::with_replies(["false"]));
        let oracle = DecisionOracle::new(llm.clone());
        let history = vec![
            Message::user("first"),
            Message::assistant("second"),
            Message::user("third"),
        ];
        oracle.decide(&history, "fourth").await;

        let call = &llm.calls()[0];
        assert!(call.options.deterministic);
        assert!(!call.options.structured_output);
        assert_eq!(call.messages[0].role, Role::System);
        assert_eq!(&call.messages[1..4], &history[..]);
        assert!(call.messages[4].content.contains("\"fourth\""));
    }
}
