use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cursor::Cursor;
use crate::utils::serialize_username;

/// Raw `{id, payload, error?}` wrapper around every indexer response. The
/// payload is kept untyped until `error` has been checked, so error bodies
/// with a different payload shape still surface as indexer errors.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiResponse {
    #[serde(default)]
    pub id: serde_json::Value,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<serde_json::Value>,
}

impl ApiResponse {
    /// Returns the reported error when the `error` field is truthy.
    pub fn reported_error(&self) -> Option<String> {
        let error = self.error.as_ref()?;
        if !is_truthy(error) {
            return None;
        }
        Some(match error {
            serde_json::Value::String(message) => message.clone(),
            other => other.to_string(),
        })
    }
}

fn is_truthy(value: &serde_json::Value) -> bool {
    use serde_json::Value;
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(num) => num.as_f64().is_some_and(|n| n != 0.0 && !n.is_nan()),
        Value::String(text) => !text.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// `{items, next}` page as sent by the indexer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pageable<T> {
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
    #[serde(default)]
    pub next: Option<i64>,
}

/// A page after wire normalisation.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next: Cursor,
}

impl<T> Page<T> {
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            next: Cursor::Exhausted,
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            next: self.next,
        }
    }
}

impl<T> From<Pageable<T>> for Page<T> {
    fn from(raw: Pageable<T>) -> Self {
        Self {
            items: raw.items,
            next: Cursor::from_wire(raw.next),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModerationSetting {
    #[serde(rename = "SETTINGS__FOLLOWS_ONLY")]
    FollowsOnly,
    #[serde(rename = "SETTINGS__NO_BLOCKS")]
    NoBlocks,
    #[serde(other)]
    Unrecognized,
}

/// Epoch seconds or an RFC 3339 string; both forms appear in the wild.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireTimestamp {
    Seconds(i64),
    Text(String),
}

impl WireTimestamp {
    fn to_datetime(&self) -> DateTime<Utc> {
        match self {
            WireTimestamp::Seconds(secs) => DateTime::from_timestamp(*secs, 0).unwrap_or_default(),
            WireTimestamp::Text(raw) => DateTime::parse_from_rfc3339(raw)
                .map(|parsed| parsed.with_timezone(&Utc))
                .unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostEnvelope {
    pub refhash: String,
    #[serde(default)]
    pub created_at: Option<WireTimestamp>,
    #[serde(default)]
    pub subdomain: Option<String>,
    #[serde(default)]
    pub tld: String,
    pub message: PostMessage,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostMessage {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub reply_count: u64,
    #[serde(default)]
    pub like_count: u64,
    #[serde(default)]
    pub pin_count: u64,
    #[serde(default)]
    pub moderation_setting: Option<ModerationSetting>,
}

/// Follow/block edge as listed under `/users/:name/<kind>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionEntry {
    #[serde(default)]
    pub subdomain: Option<String>,
    pub tld: String,
}

impl ConnectionEntry {
    pub fn username(&self) -> String {
        serialize_username(self.subdomain.as_deref(), &self.tld)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostMeta {
    pub reply_count: u64,
    pub like_count: u64,
    pub pin_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub hash: String,
    pub creator: String,
    pub parent: Option<String>,
    pub topic: String,
    pub title: String,
    pub content: String,
    pub tags: Vec<String>,
    pub kind: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub meta: PostMeta,
    pub moderation_setting: Option<ModerationSetting>,
}

impl Post {
    pub fn is_reply(&self) -> bool {
        self.parent.is_some()
    }

    /// Topics starting with `.` carry profile metadata, not user content.
    pub fn has_hidden_topic(&self) -> bool {
        self.topic.starts_with('.')
    }
}

impl From<PostEnvelope> for Post {
    fn from(env: PostEnvelope) -> Self {
        let message = env.message;
        Self {
            hash: env.refhash,
            creator: serialize_username(env.subdomain.as_deref(), &env.tld),
            parent: message.reference.filter(|parent| !parent.is_empty()),
            topic: message.topic.unwrap_or_default(),
            title: message.title.unwrap_or_default(),
            content: message.body.unwrap_or_default(),
            tags: message.tags,
            kind: message.kind,
            timestamp: env
                .created_at
                .as_ref()
                .map(WireTimestamp::to_datetime)
                .unwrap_or_default(),
            meta: PostMeta {
                reply_count: message.reply_count,
                like_count: message.like_count,
                pin_count: message.pin_count,
            },
            moderation_setting: message
                .moderation_setting
                .filter(|setting| *setting != ModerationSetting::Unrecognized),
        }
    }
}
