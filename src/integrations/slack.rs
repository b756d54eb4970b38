//! Slack 集成
//!
//! - 事件订阅 Webhook（`POST /slack/events`）：URL 校验；`app_mention` 在所在线程回复；
//!   父消息 @ 过 Bot 的线程里的后续消息，带上整个线程作为历史回复。
//!   Slack 要求 3 秒内返回 200，处理一律放到后台任务；重复的 event_id 直接忽略。
//!   配置了 signing secret 时，先按 `X-Slack-Signature` 校验原始请求体，失败返回 401。
//! - 轮询入库：按游标分页拉取频道的新线程；游标只推进到已成功写入向量索引的位置。

use std::collections::HashSet;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::http::{HeaderMap, StatusCode};
use axum::{extract::State, routing::post, Json, Router};
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::ingest::{resume_cursor, ts_value, ChatMessage, ChatThread, CursorStore, ThreadIngestor};
use crate::integrations::signature::{SignatureVerifier, SIGNATURE_HEADER, TIMESTAMP_HEADER};
use crate::memory::Message;
use crate::pipeline::Orchestrator;

const SLACK_API_BASE: &str = "https://slack.com/api";
const MAX_TEXT_CHUNK_CHARS: usize = 3900;
const HISTORY_PAGE_LIMIT: u32 = 100;
/// 单次拉取的分页上限；超过则报错，不推进游标
const MAX_PAGES: usize = 50;

/// 用到的 Slack Web API 子集
#[async_trait]
pub trait SlackApi: Send + Sync {
    async fn post_message(&self, channel: &str, thread_ts: Option<&str>, text: &str) -> anyhow::Result<()>;

    /// 频道内 ts 晚于 oldest 的顶层消息
    async fn history(&self, channel: &str, oldest: &str) -> anyhow::Result<Vec<ChatMessage>>;

    /// 线程内全部消息（含父消息）
    async fn replies(&self, channel: &str, thread_ts: &str) -> anyhow::Result<Vec<ChatMessage>>;
}

pub struct SlackClient {
    client: reqwest::Client,
    token: String,
    base_url: String,
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    messages: Vec<ChatMessage>,
    #[serde(default)]
    response_metadata: Option<ResponseMetadata>,
}

#[derive(Deserialize)]
struct ResponseMetadata {
    #[serde(default)]
    next_cursor: String,
}

impl MessagesResponse {
    fn next_cursor(&self) -> Option<&str> {
        self.response_metadata
            .as_ref()
            .map(|m| m.next_cursor.as_str())
            .filter(|c| !c.is_empty())
    }
}

impl SlackClient {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            token: token.into(),
            base_url: SLACK_API_BASE.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Slack 以 200 + `ok: false` 表示业务错误
    fn check_ok(method: &str, resp: Value) -> anyhow::Result<Value> {
        if resp.get("ok").and_then(Value::as_bool) != Some(true) {
            let err = resp.get("error").and_then(Value::as_str).unwrap_or("unknown");
            anyhow::bail!("{} error: {}", method, err);
        }
        Ok(resp)
    }

    async fn get(&self, method: &str, query: &[(&str, String)]) -> anyhow::Result<Value> {
        let resp: Value = self
            .client
            .get(format!("{}/{}", self.base_url, method))
            .bearer_auth(&self.token)
            .query(query)
            .send()
            .await?
            .json()
            .await?;
        Self::check_ok(method, resp)
    }

    /// 跟随 `response_metadata.next_cursor` 取完所有分页
    async fn get_messages(&self, method: &str, query: &[(&str, String)]) -> anyhow::Result<Vec<ChatMessage>> {
        let mut messages = Vec::new();
        let mut cursor: Option<String> = None;
        for _ in 0..MAX_PAGES {
            let mut page_query = query.to_vec();
            if let Some(c) = &cursor {
                page_query.push(("cursor", c.clone()));
            }
            let page: MessagesResponse = serde_json::from_value(self.get(method, &page_query).await?)?;
            cursor = page.next_cursor().map(String::from);
            messages.extend(page.messages);
            if cursor.is_none() {
                return Ok(messages);
            }
        }
        anyhow::bail!("{}: more than {} pages, giving up", method, MAX_PAGES)
    }

    async fn post_json(&self, method: &str, payload: &Value) -> anyhow::Result<Value> {
        let resp: Value = self
            .client
            .post(format!("{}/{}", self.base_url, method))
            .bearer_auth(&self.token)
            .json(payload)
            .send()
            .await?
            .json()
            .await?;
        Self::check_ok(method, resp)
    }

    /// Bot 自己的用户 ID
    pub async fn auth_test(&self) -> anyhow::Result<String> {
        let resp = self.post_json("auth.test", &json!({})).await?;
        resp.get("user_id")
            .and_then(Value::as_str)
            .map(String::from)
            .ok_or_else(|| anyhow::anyhow!("auth.test: no user_id"))
    }
}

#[async_trait]
impl SlackApi for SlackClient {
    async fn post_message(&self, channel: &str, thread_ts: Option<&str>, text: &str) -> anyhow::Result<()> {
        for chunk in split_text_chunks(text, MAX_TEXT_CHUNK_CHARS) {
            let mut payload = json!({ "channel": channel, "text": chunk });
            if let Some(ts) = thread_ts {
                payload["thread_ts"] = Value::String(ts.to_string());
            }
            self.post_json("chat.postMessage", &payload).await?;
        }
        Ok(())
    }

    async fn history(&self, channel: &str, oldest: &str) -> anyhow::Result<Vec<ChatMessage>> {
        self.get_messages(
            "conversations.history",
            &[
                ("channel", channel.to_string()),
                ("oldest", oldest.to_string()),
                ("limit", HISTORY_PAGE_LIMIT.to_string()),
            ],
        )
        .await
    }

    async fn replies(&self, channel: &str, thread_ts: &str) -> anyhow::Result<Vec<ChatMessage>> {
        self.get_messages(
            "conversations.replies",
            &[
                ("channel", channel.to_string()),
                ("ts", thread_ts.to_string()),
                ("limit", HISTORY_PAGE_LIMIT.to_string()),
            ],
        )
        .await
    }
}

/// 按字符数切分长消息
pub fn split_text_chunks(text: &str, max_chars: usize) -> Vec<String> {
    if max_chars == 0 || text.chars().count() <= max_chars {
        return vec![text.to_string()];
    }
    text.chars()
        .collect::<Vec<_>>()
        .chunks(max_chars)
        .map(|c| c.iter().collect())
        .collect()
}

static MENTION_RE: OnceLock<Regex> = OnceLock::new();

/// 去掉 `<@U123>` / `<@U123|name>` 形式的提及
pub fn strip_mentions(text: &str) -> String {
    let re = MENTION_RE.get_or_init(|| Regex::new(r"<@[A-Z0-9]+(\|[^>]*)?>\s*").unwrap());
    re.replace_all(text, "").trim().to_string()
}

pub fn mentions_bot(text: &str, bot_user_id: &str) -> bool {
    !bot_user_id.is_empty()
        && (text.contains(&format!("<@{}>", bot_user_id))
            || text.contains(&format!("<@{}|", bot_user_id)))
}

/// 线程消息 → 对话历史：Bot 发的是 assistant，其余是 user；不含 before_ts 及之后的消息
pub fn thread_history(messages: &[ChatMessage], bot_user_id: &str, before_ts: &str) -> Vec<Message> {
    let cutoff = ts_value(before_ts);
    let mut sorted: Vec<&ChatMessage> = messages
        .iter()
        .filter(|m| ts_value(&m.ts) < cutoff)
        .collect();
    sorted.sort_by(|a, b| {
        ts_value(&a.ts)
            .partial_cmp(&ts_value(&b.ts))
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    sorted
        .into_iter()
        .filter_map(|m| {
            let text = strip_mentions(&m.text);
            if text.is_empty() {
                return None;
            }
            if m.user.as_deref() == Some(bot_user_id) {
                Some(Message::assistant(text))
            } else {
                Some(Message::user(text))
            }
        })
        .collect()
}

/// 已处理事件 ID（Slack 重试时去重）
pub type ProcessedEvents = Arc<RwLock<HashSet<String>>>;

pub struct SlackState {
    pub orchestrator: Arc<Orchestrator>,
    pub api: Arc<dyn SlackApi>,
    pub bot_user_id: String,
    pub processed_events: ProcessedEvents,
    /// 为 None 时不校验签名（仅用于本地调试）
    pub verifier: Option<SignatureVerifier>,
}

impl SlackState {
    pub fn new(orchestrator: Arc<Orchestrator>, api: Arc<dyn SlackApi>, bot_user_id: impl Into<String>) -> Self {
        Self {
            orchestrator,
            api,
            bot_user_id: bot_user_id.into(),
            processed_events: Arc::new(RwLock::new(HashSet::new())),
            verifier: None,
        }
    }

    pub fn with_signing_secret(mut self, secret: impl Into<String>) -> Self {
        self.verifier = Some(SignatureVerifier::new(secret));
        self
    }
}

#[derive(Debug, Deserialize)]
pub struct EventPayload {
    #[serde(rename = "type")]
    pub type_: Option<String>,
    pub challenge: Option<String>,
    pub event_id: Option<String>,
    pub event: Option<SlackEvent>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SlackEvent {
    #[serde(rename = "type")]
    pub type_: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub bot_id: Option<String>,
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub text: String,
    pub ts: String,
    #[serde(default)]
    pub thread_ts: Option<String>,
    pub channel: String,
}

impl SlackEvent {
    fn in_thread(&self) -> bool {
        self.thread_ts.as_deref().is_some_and(|t| t != self.ts)
    }
}

pub fn create_router(state: Arc<SlackState>) -> Router {
    Router::new()
        .route("/slack/events", post(events_handler))
        .route("/health", axum::routing::get(|| async { "OK" }))
        .with_state(state)
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

async fn events_handler(
    State(state): State<Arc<SlackState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, StatusCode> {
    if let Some(verifier) = &state.verifier {
        let now = chrono::Utc::now().timestamp();
        if let Err(e) = verifier.verify(
            header(&headers, TIMESTAMP_HEADER),
            header(&headers, SIGNATURE_HEADER),
            &body,
            now,
        ) {
            tracing::warn!("Slack webhook rejected: {}", e);
            return Err(StatusCode::UNAUTHORIZED);
        }
    }

    let payload: EventPayload = serde_json::from_slice(&body).map_err(|e| {
        tracing::warn!("Slack webhook: bad payload: {}", e);
        StatusCode::BAD_REQUEST
    })?;

    if payload.type_.as_deref() == Some("url_verification") {
        return match payload.challenge {
            Some(challenge) => Ok(Json(json!({ "challenge": challenge }))),
            None => Err(StatusCode::BAD_REQUEST),
        };
    }

    let Some(event) = payload.event else {
        tracing::debug!("Slack webhook: no event in payload, ignoring");
        return Ok(Json(json!({})));
    };

    // Bot 自己的消息、编辑 / 删除等子类型一律忽略
    if event.bot_id.is_some()
        || event.subtype.is_some()
        || event.user.as_deref() == Some(state.bot_user_id.as_str())
    {
        return Ok(Json(json!({})));
    }

    let is_mention = event.type_ == "app_mention";
    // 提及 Bot 的消息同时会以 message 事件送达，只按 app_mention 处理一次
    let is_follow_up = event.type_ == "message"
        && event.in_thread()
        && !mentions_bot(&event.text, &state.bot_user_id);
    if !is_mention && !is_follow_up {
        return Ok(Json(json!({})));
    }

    if let Some(event_id) = payload.event_id.filter(|id| !id.is_empty()) {
        let mut processed = state.processed_events.write().await;
        if !processed.insert(event_id.clone()) {
            tracing::debug!("Duplicate event ignored: {}", event_id);
            return Ok(Json(json!({})));
        }
        if processed.len() > 10_000 {
            processed.clear();
            processed.insert(event_id);
        }
    }

    tracing::info!(
        kind = %event.type_,
        channel = %event.channel,
        ts = %event.ts,
        "Slack event accepted, spawning background task"
    );
    let state = Arc::clone(&state);
    tokio::spawn(async move {
        let result = if is_mention {
            handle_mention(&state, &event).await
        } else {
            handle_follow_up(&state, &event).await
        };
        if let Err(e) = result {
            tracing::error!("Slack background process error: {}", e);
        }
    });

    Ok(Json(json!({})))
}

async fn handle_mention(state: &SlackState, event: &SlackEvent) -> anyhow::Result<()> {
    let query = strip_mentions(&event.text);
    let history = match event.thread_ts.as_deref().filter(|_| event.in_thread()) {
        Some(thread_ts) => {
            let messages = state.api.replies(&event.channel, thread_ts).await?;
            thread_history(&messages, &state.bot_user_id, &event.ts)
        }
        None => Vec::new(),
    };
    let reply_ts = event.thread_ts.as_deref().unwrap_or(&event.ts);
    answer_and_reply(state, &event.channel, reply_ts, &history, &query).await
}

async fn handle_follow_up(state: &SlackState, event: &SlackEvent) -> anyhow::Result<()> {
    let Some(thread_ts) = event.thread_ts.as_deref() else {
        return Ok(());
    };
    let messages = state.api.replies(&event.channel, thread_ts).await?;
    let Some(parent) = messages.iter().find(|m| m.ts == thread_ts) else {
        return Ok(());
    };
    if !mentions_bot(&parent.text, &state.bot_user_id) {
        return Ok(());
    }
    let history = thread_history(&messages, &state.bot_user_id, &event.ts);
    answer_and_reply(state, &event.channel, thread_ts, &history, &strip_mentions(&event.text)).await
}

async fn answer_and_reply(
    state: &SlackState,
    channel: &str,
    thread_ts: &str,
    history: &[Message],
    query: &str,
) -> anyhow::Result<()> {
    let reply = match state.orchestrator.answer(history, query).await {
        Ok(answer) => answer,
        Err(e) => {
            tracing::warn!(code = e.code(), "Slack answer failed: {}", e);
            format!("Sorry, I couldn't answer that: {}", e)
        }
    };
    state.api.post_message(channel, Some(thread_ts), &reply).await
}

/// 频道线程轮询入库
pub struct ThreadPoller {
    api: Arc<dyn SlackApi>,
    ingestor: Arc<ThreadIngestor>,
    cursor: Arc<dyn CursorStore>,
    channel: String,
    interval: Duration,
}

impl ThreadPoller {
    pub fn new(
        api: Arc<dyn SlackApi>,
        ingestor: Arc<ThreadIngestor>,
        cursor: Arc<dyn CursorStore>,
        channel: impl Into<String>,
        interval: Duration,
    ) -> Self {
        Self {
            api,
            ingestor,
            cursor,
            channel: channel.into(),
            interval,
        }
    }

    /// 拉取一次；返回推进后的游标
    pub async fn poll_once(&self) -> anyhow::Result<String> {
        let since = self.cursor.load().await?;
        let parents = self.api.history(&self.channel, &since).await?;
        tracing::info!(channel = %self.channel, since = %since, parents = parents.len(), "polled channel");

        let mut threads = Vec::with_capacity(parents.len());
        for parent in parents {
            let replies = if parent.reply_count.unwrap_or(0) > 0 {
                self.api.replies(&self.channel, &parent.ts).await?
            } else {
                Vec::new()
            };
            threads.push(ChatThread::assemble(self.channel.clone(), parent, replies));
        }
        if threads.is_empty() {
            return Ok(since);
        }

        let report = self.ingestor.ingest(&threads).await?;
        if !report.failed_parents.is_empty() {
            tracing::warn!(
                failed = ?report.failed_parents,
                "some threads were not indexed; cursor held before the oldest failure"
            );
        }
        let next = resume_cursor(&since, &threads, &report.failed_parents);
        if next != since {
            self.cursor.save(&next).await?;
        }
        Ok(next)
    }

    /// 按间隔轮询直到 token 取消；单次失败只记日志
    pub async fn run(self, token: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    tracing::info!("Slack poller stopped");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.poll_once().await {
                        tracing::warn!("Slack poll failed: {}", e);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::build_services_with;
    use crate::config::AppConfig;
    use crate::ingest::FileCursorStore;
    use crate::llm::{EmbeddingProvider, LlmError, ScriptedLlmClient};
    use crate::retrieval::{InMemoryIndex, RetrievalError, VectorMatch, VectorRecord, VectorStore};
    use axum::body::Body;
    use axum::http::Request;
    use std::sync::Mutex;
    use tower::ServiceExt;

    #[derive(Default)]
    struct FakeSlack {
        posts: Mutex<Vec<(String, Option<String>, String)>>,
        history: Vec<ChatMessage>,
        replies: Vec<ChatMessage>,
    }

    #[async_trait]
    impl SlackApi for FakeSlack {
        async fn post_message(&self, channel: &str, thread_ts: Option<&str>, text: &str) -> anyhow::Result<()> {
            self.posts.lock().unwrap().push((
                channel.to_string(),
                thread_ts.map(String::from),
                text.to_string(),
            ));
            Ok(())
        }

        async fn history(&self, _channel: &str, oldest: &str) -> anyhow::Result<Vec<ChatMessage>> {
            Ok(self
                .history
                .iter()
                .filter(|m| ts_value(&m.ts) > ts_value(oldest))
                .cloned()
                .collect())
        }

        async fn replies(&self, _channel: &str, thread_ts: &str) -> anyhow::Result<Vec<ChatMessage>> {
            Ok(self
                .replies
                .iter()
                .filter(|m| m.ts == thread_ts || m.thread_ts.as_deref() == Some(thread_ts))
                .cloned()
                .collect())
        }
    }

    struct ConstEmbedder;

    #[async_trait]
    impl EmbeddingProvider for ConstEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, LlmError> {
            Ok(vec![1.0])
        }
    }

    struct DownStore;

    #[async_trait]
    impl VectorStore for DownStore {
        async fn query(&self, _v: &[f32], _k: usize) -> Result<Vec<VectorMatch>, RetrievalError> {
            Ok(vec![])
        }

        async fn upsert(&self, _r: Vec<VectorRecord>) -> Result<usize, RetrievalError> {
            Err(RetrievalError::Store("unavailable".into()))
        }
    }

    fn msg(ts: &str, user: &str, text: &str, thread_ts: Option<&str>) -> ChatMessage {
        ChatMessage {
            ts: ts.into(),
            user: Some(user.into()),
            text: text.into(),
            thread_ts: thread_ts.map(String::from),
            reply_count: None,
        }
    }

    async fn seeded_state(replies: &[&str], slack: FakeSlack) -> (Arc<SlackState>, Arc<FakeSlack>, Arc<ScriptedLlmClient>) {
        let llm = Arc::new(ScriptedLlmClient::with_replies(replies.iter().copied()));
        let index = Arc::new(InMemoryIndex::default());
        let services = build_services_with(&AppConfig::default(), llm.clone(), Some(Arc::new(ConstEmbedder)), index);
        services
            .ingestor
            .as_ref()
            .unwrap()
            .ingest(&[ChatThread::assemble("C1", msg("1.0", "U1", "deploy with make ship", None), vec![])])
            .await
            .unwrap();
        let slack = Arc::new(slack);
        let state = Arc::new(SlackState::new(services.orchestrator, slack.clone(), "UBOT"));
        (state, slack, llm)
    }

    async fn send(state: Arc<SlackState>, body: Value) -> (StatusCode, Value) {
        send_with_headers(state, body, &[]).await
    }

    async fn send_with_headers(state: Arc<SlackState>, body: Value, headers: &[(&str, String)]) -> (StatusCode, Value) {
        let mut req = Request::builder()
            .method("POST")
            .uri("/slack/events")
            .header("content-type", "application/json");
        for (name, value) in headers {
            req = req.header(*name, value.as_str());
        }
        let resp = create_router(state)
            .oneshot(req.body(Body::from(body.to_string())).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    async fn wait_for_posts(slack: &FakeSlack, n: usize) {
        for _ in 0..100 {
            if slack.posts.lock().unwrap().len() >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[test]
    fn test_strip_and_detect_mentions() {
        assert_eq!(strip_mentions("<@UBOT> how do I deploy?"), "how do I deploy?");
        assert_eq!(strip_mentions("hey <@UBOT|forager> there"), "hey there");
        assert!(mentions_bot("<@UBOT> hi", "UBOT"));
        assert!(mentions_bot("<@UBOT|forager> hi", "UBOT"));
        assert!(!mentions_bot("<@UOTHER> hi", "UBOT"));
        assert!(!mentions_bot("hi", ""));
    }

    #[test]
    fn test_split_text_chunks() {
        assert_eq!(split_text_chunks("short", 10), vec!["short"]);
        let chunks = split_text_chunks(&"é".repeat(25), 10);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[2].chars().count(), 5);
    }

    #[test]
    fn test_thread_history_roles_and_cutoff() {
        let messages = vec![
            msg("3.0", "U1", "and staging?", Some("1.0")),
            msg("1.0", "U1", "<@UBOT> how to deploy", Some("1.0")),
            msg("2.0", "UBOT", "use make ship", Some("1.0")),
            msg("4.0", "U1", "current", Some("1.0")),
        ];
        let history = thread_history(&messages, "UBOT", "4.0");
        assert_eq!(
            history,
            vec![
                Message::user("how to deploy"),
                Message::assistant("use make ship"),
                Message::user("and staging?"),
            ]
        );
    }

    #[tokio::test]
    async fn test_url_verification() {
        let (state, _, _) = seeded_state(&[], FakeSlack::default()).await;
        let (status, body) = send(state, json!({"type": "url_verification", "challenge": "abc"})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["challenge"], "abc");
    }

    #[tokio::test]
    async fn test_mention_answered_in_thread_once() {
        let (state, slack, _) = seeded_state(&["false", "Run `make ship`."], FakeSlack::default()).await;
        let event = json!({
            "type": "event_callback",
            "event_id": "Ev1",
            "event": {"type": "app_mention", "user": "U1", "text": "<@UBOT> how do I deploy?", "ts": "10.0", "channel": "C1"}
        });

        let (status, _) = send(state.clone(), event.clone()).await;
        assert_eq!(status, StatusCode::OK);
        send(state, event).await;
        wait_for_posts(&slack, 1).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let posts = slack.posts.lock().unwrap().clone();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0], ("C1".to_string(), Some("10.0".to_string()), "Run `make ship`.".to_string()));
    }

    #[tokio::test]
    async fn test_follow_up_in_mentioned_thread_uses_history() {
        let slack = FakeSlack {
            replies: vec![
                msg("10.0", "U1", "<@UBOT> how do I deploy?", None),
                msg("11.0", "UBOT", "Run make ship.", Some("10.0")),
                msg("12.0", "U1", "what about staging?", Some("10.0")),
            ],
            ..Default::default()
        };
        let (state, slack, llm) = seeded_state(&["false", "Same command."], slack).await;
        send(
            state,
            json!({
                "type": "event_callback",
                "event_id": "Ev2",
                "event": {"type": "message", "user": "U1", "text": "what about staging?", "ts": "12.0", "thread_ts": "10.0", "channel": "C1"}
            }),
        )
        .await;
        wait_for_posts(&slack, 1).await;

        let posts = slack.posts.lock().unwrap().clone();
        assert_eq!(posts[0].1.as_deref(), Some("10.0"));
        let compose = &llm.calls()[1];
        assert_eq!(compose.messages[1], Message::user("how do I deploy?"));
        assert_eq!(compose.messages[2], Message::assistant("Run make ship."));
    }

    #[tokio::test]
    async fn test_bot_messages_and_unrelated_threads_ignored() {
        let slack = FakeSlack {
            replies: vec![msg("20.0", "U1", "no mention here", None)],
            ..Default::default()
        };
        let (state, slack, llm) = seeded_state(&["false", "x"], slack).await;
        send(
            state.clone(),
            json!({"type": "event_callback", "event_id": "Ev3",
                   "event": {"type": "message", "user": "UBOT", "text": "hi", "ts": "21.0", "thread_ts": "20.0", "channel": "C1"}}),
        )
        .await;
        send(
            state,
            json!({"type": "event_callback", "event_id": "Ev4",
                   "event": {"type": "message", "user": "U2", "text": "reply", "ts": "22.0", "thread_ts": "20.0", "channel": "C1"}}),
        )
        .await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(slack.posts.lock().unwrap().is_empty());
        assert_eq!(llm.call_count(), 0);
    }

    fn poll_fixture() -> FakeSlack {
        FakeSlack {
            history: vec![
                ChatMessage {
                    reply_count: Some(1),
                    ..msg("100.0", "U1", "how to reset password", None)
                },
                msg("105.0", "U3", "standalone note", None),
            ],
            replies: vec![
                msg("100.0", "U1", "how to reset password", Some("100.0")),
                msg("107.5", "U2", "use the sso portal", Some("100.0")),
            ],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_poll_ingests_and_advances_cursor() {
        let dir = tempfile::tempdir().unwrap();
        let cursor = Arc::new(FileCursorStore::new(dir.path().join("cursor.json")));
        let index = Arc::new(InMemoryIndex::default());
        let poller = ThreadPoller::new(
            Arc::new(poll_fixture()),
            Arc::new(ThreadIngestor::new(Arc::new(ConstEmbedder), index.clone())),
            cursor.clone(),
            "C1",
            Duration::from_secs(60),
        );

        assert_eq!(poller.poll_once().await.unwrap(), "107.5");
        assert_eq!(cursor.load().await.unwrap(), "107.5");
        assert_eq!(index.len().await, 2);

        // 游标之后没有新消息
        assert_eq!(poller.poll_once().await.unwrap(), "107.5");
    }

    #[tokio::test]
    async fn test_failed_upsert_keeps_cursor() {
        let dir = tempfile::tempdir().unwrap();
        let cursor = Arc::new(FileCursorStore::new(dir.path().join("cursor.json")));
        let poller = ThreadPoller::new(
            Arc::new(poll_fixture()),
            Arc::new(ThreadIngestor::new(Arc::new(ConstEmbedder), Arc::new(DownStore))),
            cursor.clone(),
            "C1",
            Duration::from_secs(60),
        );
        assert!(poller.poll_once().await.is_err());
        assert_eq!(cursor.load().await.unwrap(), "0");
    }

    #[tokio::test]
    async fn test_poller_stops_on_cancel() {
        let dir = tempfile::tempdir().unwrap();
        let poller = ThreadPoller::new(
            Arc::new(FakeSlack::default()),
            Arc::new(ThreadIngestor::new(Arc::new(ConstEmbedder), Arc::new(InMemoryIndex::default()))),
            Arc::new(FileCursorStore::new(dir.path().join("cursor.json"))),
            "C1",
            Duration::from_millis(10),
        );
        let token = CancellationToken::new();
        let handle = tokio::spawn(poller.run(token.clone()));
        tokio::time::sleep(Duration::from_millis(30)).await;
        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }

    fn signed_headers(secret: &str, body: &Value, sent_at: i64) -> Vec<(&'static str, String)> {
        let ts = sent_at.to_string();
        let sig = SignatureVerifier::new(secret).sign(&ts, body.to_string().as_bytes());
        vec![(TIMESTAMP_HEADER, ts), (SIGNATURE_HEADER, sig)]
    }

    #[tokio::test]
    async fn test_signed_request_accepted() {
        let (state, _, _) = seeded_state(&[], FakeSlack::default()).await;
        let state = Arc::new(
            Arc::try_unwrap(state).ok().unwrap().with_signing_secret("s3cret"),
        );
        let body = json!({"type": "url_verification", "challenge": "abc"});
        let headers = signed_headers("s3cret", &body, chrono::Utc::now().timestamp());
        let (status, resp) = send_with_headers(state, body, &headers).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(resp["challenge"], "abc");
    }

    #[tokio::test]
    async fn test_bad_or_missing_signature_rejected_before_processing() {
        let (state, slack, llm) = seeded_state(&["false", "x"], FakeSlack::default()).await;
        let state = Arc::new(
            Arc::try_unwrap(state).ok().unwrap().with_signing_secret("s3cret"),
        );
        let body = json!({
            "type": "event_callback",
            "event_id": "EvSig",
            "event": {"type": "app_mention", "user": "U1", "text": "<@UBOT> hi", "ts": "30.0", "channel": "C1"}
        });
        let now = chrono::Utc::now().timestamp();

        let forged = signed_headers("wrong-secret", &body, now);
        assert_eq!(send_with_headers(state.clone(), body.clone(), &forged).await.0, StatusCode::UNAUTHORIZED);

        let stale = signed_headers("s3cret", &body, now - 600);
        assert_eq!(send_with_headers(state.clone(), body.clone(), &stale).await.0, StatusCode::UNAUTHORIZED);

        assert_eq!(send(state.clone(), body).await.0, StatusCode::UNAUTHORIZED);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(slack.posts.lock().unwrap().is_empty());
        assert_eq!(llm.call_count(), 0);
        assert!(state.processed_events.read().await.is_empty());
    }

    /// 正文含 "standalone" 的线程嵌入失败
    struct PickyEmbedder;

    #[async_trait]
    impl EmbeddingProvider for PickyEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
            if text.contains("standalone") {
                Err(LlmError::Api("rate limited".into()))
            } else {
                Ok(vec![1.0])
            }
        }
    }

    struct FailingEmbedder;

    #[async_trait]
    impl EmbeddingProvider for FailingEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, LlmError> {
            Err(LlmError::Api("rate limited".into()))
        }
    }

    #[tokio::test]
    async fn test_embedding_failures_hold_cursor() {
        let dir = tempfile::tempdir().unwrap();
        let cursor = Arc::new(FileCursorStore::new(dir.path().join("cursor.json")));
        let index = Arc::new(InMemoryIndex::default());
        let slack = Arc::new(poll_fixture());

        let none_indexed = ThreadPoller::new(
            slack.clone(),
            Arc::new(ThreadIngestor::new(Arc::new(FailingEmbedder), index.clone())),
            cursor.clone(),
            "C1",
            Duration::from_secs(60),
        );
        assert_eq!(none_indexed.poll_once().await.unwrap(), "0");
        assert_eq!(cursor.load().await.unwrap(), "0");
        assert!(index.is_empty().await);

        // 100.0 写入成功，105.0 失败：游标停在 100.0，下次从 105.0 重新拉取
        let partial = ThreadPoller::new(
            slack.clone(),
            Arc::new(ThreadIngestor::new(Arc::new(PickyEmbedder), index.clone())),
            cursor.clone(),
            "C1",
            Duration::from_secs(60),
        );
        assert_eq!(partial.poll_once().await.unwrap(), "100.0");
        assert_eq!(cursor.load().await.unwrap(), "100.0");
        assert_eq!(index.len().await, 1);

        let healthy = ThreadPoller::new(
            slack,
            Arc::new(ThreadIngestor::new(Arc::new(ConstEmbedder), index.clone())),
            cursor.clone(),
            "C1",
            Duration::from_secs(60),
        );
        assert_eq!(healthy.poll_once().await.unwrap(), "105.0");
        assert_eq!(index.len().await, 2);
    }

    #[tokio::test]
    async fn test_client_follows_history_pages() {
        use axum::extract::Query;
        use std::collections::HashMap;

        async fn history(Query(q): Query<HashMap<String, String>>) -> Json<Value> {
            match q.get("cursor").map(String::as_str) {
                None => Json(json!({
                    "ok": true,
                    "messages": [{"ts": "3.0", "text": "c"}, {"ts": "2.0", "text": "b"}],
                    "has_more": true,
                    "response_metadata": {"next_cursor": "page2"}
                })),
                Some("page2") => Json(json!({
                    "ok": true,
                    "messages": [{"ts": "1.0", "text": "a"}],
                    "has_more": false,
                    "response_metadata": {"next_cursor": ""}
                })),
                Some(_) => Json(json!({"ok": false, "error": "invalid_cursor"})),
            }
        }

        let app = Router::new().route("/conversations.history", axum::routing::get(history));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await });

        let client = SlackClient::new("xoxb-test").with_base_url(format!("http://{}", addr));
        let messages = client.history("C1", "0").await.unwrap();
        let ts: Vec<&str> = messages.iter().map(|m| m.ts.as_str()).collect();
        assert_eq!(ts, vec!["3.0", "2.0", "1.0"]);
    }
}
