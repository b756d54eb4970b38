//! 生成的函数：源码、函数名与按位置传入的参数
//!
//! 字段在模型输出中的名字为 code / functionName / params；每次查询都重新生成，执行一次后即丢弃。

use schemars::{schema_for, JsonSchema};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct GeneratedRoutine {
    /// 完整可执行的 JavaScript 源码（含所需 require），只定义一个顶层函数
    #[serde(rename = "code")]
    pub source_code: String,
    /// 按顺序绑定到函数形参的参数
    #[serde(rename = "params")]
    pub arguments: Vec<Value>,
    /// 顶层函数名，必须与源码中的定义一致
    #[serde(rename = "functionName")]
    pub function_name: String,
}

impl GeneratedRoutine {
    pub fn new(
        source_code: impl Into<String>,
        function_name: impl Into<String>,
        arguments: Vec<Value>,
    ) -> Self {
        Self {
            source_code: source_code.into(),
            function_name: function_name.into(),
            arguments,
        }
    }
}

/// 返回 GeneratedRoutine 的 JSON Schema 字符串，可拼入生成提示
pub fn routine_schema_json() -> String {
    let schema = schema_for!(GeneratedRoutine);
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}
