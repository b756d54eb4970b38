//! 外部入口：HTTP 问答接口与 Slack 机器人（需对应 feature）

#[cfg(feature = "web")]
pub mod http;

#[cfg(feature = "slack")]
pub mod slack;

#[cfg(feature = "slack")]
pub mod signature;
