//! 函数生成器：让模型按结构化输出给出 {code, params, functionName}
//!
//! 模型输出视为不可信边界：去掉可选的 ```json 围栏后必须是 JSON 对象，三个字段类型正确且非空，
//! 否则返回 SynthesisError；这里不做 JavaScript 语法校验，那是执行器 load 阶段的事。

use std::sync::Arc;

use serde_json::{Map, Value};
use thiserror::Error;

use crate::llm::{CompletionOptions, LlmClient, LlmError};
use crate::memory::Message;
use crate::sandbox::{routine_schema_json, GeneratedRoutine};

const SYSTEM_PROMPT: &str = "You answer requests with structured JSON responses.";

#[derive(Error, Debug, Clone)]
pub enum SynthesisError {
    #[error("model call failed: {0}")]
    Llm(#[from] LlmError),

    #[error("model output is not a JSON object: {0}")]
    Parse(String),

    #[error("model output is missing '{0}'")]
    MissingField(&'static str),

    #[error("model output field '{field}' is invalid: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

pub struct RoutineSynthesizer {
    llm: Arc<dyn LlmClient>,
}

impl RoutineSynthesizer {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    pub async fn synthesize(
        &self,
        query: &str,
        retrieved_context: &str,
    ) -> Result<GeneratedRoutine, SynthesisError> {
        let messages = vec![
            Message::system(SYSTEM_PROMPT),
            Message::user(synthesis_prompt(query, retrieved_context)),
        ];
        let raw = self
            .llm
            .complete(&messages, CompletionOptions::structured())
            .await?;
        let routine = parse_routine(&raw)?;
        tracing::info!(
            function = %routine.function_name,
            params = routine.arguments.len(),
            code_len = routine.source_code.len(),
            "routine synthesized"
        );
        Ok(routine)
    }
}

fn synthesis_prompt(query: &str, context: &str) -> String {
    format!(
        "Based on the following context and user query, write one JavaScript function for Node.js \
         that helps answer the query, and the arguments to call it with.\n\
         The code must define a single top-level function and may only require Node.js built-in \
         modules (url, https, crypto, ...). Do not use packages that need installing.\n\n\
         Context: {context}\n\
         User Query: {query}\n\n\
         Respond with one JSON object with the keys \"code\" (the full function source including \
         require statements), \"params\" (array of arguments, in order) and \"functionName\".\n\
         JSON Schema:\n{schema}\n\n\
         Example:\n\
         {{\"code\": \"function add(a, b) {{ return a + b; }}\", \"params\": [5, 3], \"functionName\": \"add\"}}",
        context = context,
        query = query,
        schema = routine_schema_json(),
    )
}

/// 去掉 ```json ... ``` 围栏（若有）
fn strip_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = match rest.find('\n') {
        Some(i) => &rest[i + 1..],
        None => rest,
    };
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

fn non_empty_string(obj: &Map<String, Value>, field: &'static str) -> Result<String, SynthesisError> {
    match obj.get(field) {
        None | Some(Value::Null) => Err(SynthesisError::MissingField(field)),
        Some(Value::String(s)) if s.trim().is_empty() => Err(SynthesisError::InvalidField {
            field,
            reason: "empty string".to_string(),
        }),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => Err(SynthesisError::InvalidField {
            field,
            reason: format!("expected string, got {}", type_name(other)),
        }),
    }
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// 校验并构造 GeneratedRoutine
pub fn parse_routine(raw: &str) -> Result<GeneratedRoutine, SynthesisError> {
    let value: Value =
        serde_json::from_str(strip_fence(raw)).map_err(|e| SynthesisError::Parse(e.to_string()))?;
    let Value::Object(obj) = value else {
        return Err(SynthesisError::Parse(format!(
            "expected object, got {}",
            type_name(&value)
        )));
    };

    let source_code = non_empty_string(&obj, "code")?;
    let function_name = non_empty_string(&obj, "functionName")?;
    let arguments = match obj.get("params") {
        None | Some(Value::Null) => return Err(SynthesisError::MissingField("params")),
        Some(Value::Array(items)) => items.clone(),
        Some(other) => {
            return Err(SynthesisError::InvalidField {
                field: "params",
                reason: format!("expected array, got {}", type_name(other)),
            })
        }
    };

    Ok(GeneratedRoutine::new(source_code, function_name.trim(), arguments))
}
