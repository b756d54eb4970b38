//! 调用表达式构造：校验函数名并把参数逐个无损序列化为 JSON 字面量

use serde_json::Value;

const RESERVED: &[&str] = &[
    "await", "break", "case", "catch", "class", "const", "continue", "debugger", "default",
    "delete", "do", "else", "enum", "export", "extends", "false", "finally", "for", "function",
    "if", "implements", "import", "in", "instanceof", "interface", "let", "new", "null",
    "package", "private", "protected", "public", "return", "static", "super", "switch", "this",
    "throw", "true", "try", "typeof", "var", "void", "while", "with", "yield",
];

/// 是否为合法的 JavaScript 标识符（仅 ASCII 子集，且不是保留字）
pub fn is_js_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    if !(first.is_ascii_alphabetic() || first == '_' || first == '$') {
        return false;
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$') {
        return false;
    }
    !RESERVED.contains(&name)
}

/// 构造 `name(arg1, arg2, ...)`；每个参数都是 JSON 字面量，结构化值原样往返
pub fn invocation_expression(function_name: &str, arguments: &[Value]) -> String {
    let args = arguments
        .iter()
        .map(|a| a.to_string())
        .collect::<Vec<_>>()
        .join(", ");
    format!("{}({})", function_name, args)
}
