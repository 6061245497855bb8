//! Classification of raw wire messages into the canonical [`Message`].

use serde::{Deserialize, Serialize};
use std::time::UNIX_EPOCH;

use crate::network::{RawContent, RawMessage};

pub const TEXT_CONTENT_TYPE: &str = "xmtp.org/text:1.0";
pub const REPLY_CONTENT_TYPE: &str = "xmtp.org/reply:1.0";
pub const WALLET_SEND_CALLS_CONTENT_TYPE: &str = "xmtp.org/walletSendCalls:1.0";

/// Display text for a transaction request without call descriptions.
pub const TRANSACTION_PLACEHOLDER: &str = "Transaction request";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    TransactionRequest,
}

/// Where `sent_at_ms` came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimestampSource {
    Date,
    Millis,
    Nanos,
    /// Stamped locally when the message was sent from this device.
    Local,
    /// No usable timestamp; wall-clock time at normalization.
    Fallback,
}

/// Canonical display message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub content: String,
    pub sender_inbox_id: String,
    pub sent_at_ms: u64,
    pub timestamp_source: TimestampSource,
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction: Option<TransactionPayload>,
}

impl Message {
    /// Optimistic copy of a message this device just sent.
    pub fn outbound(
        id: impl Into<String>,
        content: impl Into<String>,
        sender_inbox_id: impl Into<String>,
        sent_at_ms: u64,
    ) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            sender_inbox_id: sender_inbox_id.into(),
            sent_at_ms,
            timestamp_source: TimestampSource::Local,
            kind: MessageKind::Text,
            transaction: None,
        }
    }
}

/// A `walletSendCalls` request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionPayload {
    #[serde(default)]
    pub version: String,
    /// Hex chain id, e.g. `0x2105`.
    #[serde(default)]
    pub chain_id: String,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub calls: Vec<TransactionCall>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionCall {
    #[serde(default)]
    pub to: Option<String>,
    /// Hex wei.
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

impl TransactionCall {
    pub fn description(&self) -> Option<&str> {
        self.metadata
            .as_ref()?
            .get("description")?
            .as_str()
            .filter(|d| !d.trim().is_empty())
    }
}

impl TransactionPayload {
    pub fn chain_id_u64(&self) -> Option<u64> {
        let digits = self
            .chain_id
            .strip_prefix("0x")
            .or_else(|| self.chain_id.strip_prefix("0X"))?;
        u64::from_str_radix(digits, 16).ok()
    }

    /// Joined call descriptions, or the fixed placeholder.
    pub fn summary(&self) -> String {
        let descriptions: Vec<&str> = self.calls.iter().filter_map(|c| c.description()).collect();
        if descriptions.is_empty() {
            TRANSACTION_PLACEHOLDER.to_string()
        } else {
            descriptions.join("; ")
        }
    }
}

/// Payload after shape resolution.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Text(String),
    Reply {
        text: String,
        reference: Option<String>,
    },
    TransactionRequest(TransactionPayload),
    Unsupported,
}

/// The type name of a content type id: `xmtp.org/reply:1.0` -> `reply`.
fn type_name(content_type: &str) -> &str {
    let without_version = content_type
        .rsplit_once(':')
        .map_or(content_type, |(name, _)| name);
    without_version
        .rsplit_once('/')
        .map_or(without_version, |(_, name)| name)
}

fn looks_like_send_calls(value: &serde_json::Value) -> bool {
    value.get("calls").is_some_and(|c| c.is_array())
}

fn parse_transaction(content: &RawContent) -> Option<TransactionPayload> {
    let value = match content {
        RawContent::Json(value) => value.clone(),
        RawContent::Text(text) => serde_json::from_str(text).ok()?,
        RawContent::Bytes(bytes) => serde_json::from_slice(bytes).ok()?,
        RawContent::Empty => return None,
    };
    match serde_json::from_value(value) {
        Ok(payload) => Some(payload),
        Err(e) => {
            tracing::warn!(error = %e, "malformed transaction request payload");
            None
        }
    }
}

fn reply_parts(raw: &RawMessage) -> Option<(String, Option<String>)> {
    let (inner, reference) = match &raw.content {
        RawContent::Text(text) => (Some(text.clone()), None),
        RawContent::Json(value) => {
            let inner = match value.get("content") {
                Some(serde_json::Value::String(s)) => Some(s.clone()),
                Some(obj) => obj.get("text").and_then(|t| t.as_str()).map(str::to_string),
                None => None,
            };
            let reference = value
                .get("reference")
                .and_then(|r| r.as_str())
                .map(str::to_string);
            (inner, reference)
        }
        RawContent::Bytes(_) | RawContent::Empty => (None, None),
    };
    let text = inner
        .filter(|t| !t.is_empty())
        .or_else(|| raw.fallback.clone().filter(|f| !f.is_empty()))?;
    Some((text, reference))
}

/// Resolve the payload shape: transaction request, then reply, then plain
/// text. Everything else is unsupported.
pub fn classify(raw: &RawMessage) -> Payload {
    let name = type_name(&raw.content_type);
    let json_send_calls = matches!(&raw.content, RawContent::Json(v) if looks_like_send_calls(v));
    if name == "walletSendCalls" || json_send_calls {
        return match parse_transaction(&raw.content) {
            Some(payload) => Payload::TransactionRequest(payload),
            None => Payload::Unsupported,
        };
    }

    if name == "reply" {
        return match reply_parts(raw) {
            Some((text, reference)) => Payload::Reply { text, reference },
            None => Payload::Unsupported,
        };
    }

    match &raw.content {
        RawContent::Text(text) => Payload::Text(text.clone()),
        _ => Payload::Unsupported,
    }
}

/// Pick the first usable timestamp: date, then milliseconds, then
/// nanoseconds. Falls back to the current time.
pub fn resolve_timestamp(raw: &RawMessage) -> (u64, TimestampSource) {
    if let Some(ms) = raw
        .sent
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as u64)
    {
        return (ms, TimestampSource::Date);
    }
    if let Some(ms) = raw.sent_ms.and_then(|ms| u64::try_from(ms).ok()) {
        return (ms, TimestampSource::Millis);
    }
    if let Some(ms) = raw
        .sent_ns
        .and_then(|ns| u64::try_from(ns / 1_000_000).ok())
    {
        return (ms, TimestampSource::Nanos);
    }
    tracing::warn!(
        message_id = %raw.id,
        "message has no usable timestamp, using wall-clock time"
    );
    (crate::time::now_ms(), TimestampSource::Fallback)
}

/// Convert a raw wire message into a display [`Message`], or `None` when the
/// content kind has no display contract.
pub fn normalize(raw: &RawMessage) -> Option<Message> {
    let (content, kind, transaction) = match classify(raw) {
        Payload::TransactionRequest(payload) => (
            payload.summary(),
            MessageKind::TransactionRequest,
            Some(payload),
        ),
        Payload::Reply { text, .. } => (text, MessageKind::Text, None),
        Payload::Text(text) => (text, MessageKind::Text, None),
        Payload::Unsupported => {
            tracing::debug!(
                message_id = %raw.id,
                content_type = %raw.content_type,
                "dropping unsupported message"
            );
            return None;
        }
    };
    let (sent_at_ms, timestamp_source) = resolve_timestamp(raw);
    Some(Message {
        id: raw.id.clone(),
        content,
        sender_inbox_id: raw.sender_inbox_id.clone(),
        sent_at_ms,
        timestamp_source,
        kind,
        transaction,
    })
}
