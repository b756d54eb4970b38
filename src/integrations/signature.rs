//! Slack 请求签名校验
//!
//! `X-Slack-Signature` = `v0=` + hex(HMAC-SHA256(signing_secret, `v0:{timestamp}:{raw body}`))，
//! `X-Slack-Request-Timestamp` 与当前时间相差超过 5 分钟的请求视为重放。

use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

pub const TIMESTAMP_HEADER: &str = "x-slack-request-timestamp";
pub const SIGNATURE_HEADER: &str = "x-slack-signature";
pub const MAX_CLOCK_SKEW_SECS: i64 = 60 * 5;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignatureError {
    #[error("missing or malformed signature headers")]
    MissingHeaders,

    #[error("request timestamp outside the allowed window")]
    Stale,

    #[error("signature mismatch")]
    Mismatch,
}

#[derive(Clone)]
pub struct SignatureVerifier {
    secret: String,
}

impl SignatureVerifier {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// 计算 `v0=<hex>` 形式的签名
    pub fn sign(&self, timestamp: &str, body: &[u8]) -> String {
        format!("v0={}", hex::encode(self.mac(timestamp, body).finalize().into_bytes()))
    }

    /// 校验签名；`now` 为当前 Unix 秒
    pub fn verify(
        &self,
        timestamp: Option<&str>,
        signature: Option<&str>,
        body: &[u8],
        now: i64,
    ) -> Result<(), SignatureError> {
        let (Some(timestamp), Some(signature)) = (timestamp, signature) else {
            return Err(SignatureError::MissingHeaders);
        };
        let sent_at: i64 = timestamp
            .trim()
            .parse()
            .map_err(|_| SignatureError::MissingHeaders)?;
        if (now - sent_at).abs() > MAX_CLOCK_SKEW_SECS {
            return Err(SignatureError::Stale);
        }
        let expected = signature
            .strip_prefix("v0=")
            .and_then(|h| hex::decode(h).ok())
            .ok_or(SignatureError::Mismatch)?;
        self.mac(timestamp, body)
            .verify_slice(&expected)
            .map_err(|_| SignatureError::Mismatch)
    }

    fn mac(&self, timestamp: &str, body: &[u8]) -> HmacSha256 {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(self.secret.as_bytes())
            .unwrap_or_else(|_| unreachable!("hmac accepts keys of any length"));
        mac.update(b"v0:");
        mac.update(timestamp.as_bytes());
        mac.update(b":");
        mac.update(body);
        mac
    }
}
