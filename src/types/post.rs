//! Post types and the strict record decoder.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::ids::{PostId, UserId};
use super::user::User;
use crate::error::TimelineError;

/// Stored shape of `posts/{id}` and `postReplies/{root}/{id}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostRecord {
    /// Author id.
    pub uid: UserId,
    /// Body text.
    pub text: String,
    /// Like counter; absent means zero.
    #[serde(default)]
    pub likes: u64,
    /// Repost counter; absent means zero.
    #[serde(default, alias = "retweets")]
    pub reposts: u64,
    /// Creation time in unix seconds.
    #[serde(deserialize_with = "unix_seconds")]
    pub timestamp: i64,
    /// Handle of the author being replied to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replying_to: Option<String>,
    /// Handle of the author being reposted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reposting_from: Option<String>,
}

/// Accept integral or floating unix seconds.
fn unix_seconds<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    let value = serde_json::Number::deserialize(deserializer)?;
    value
        .as_i64()
        .or_else(|| value.as_f64().map(|secs| secs.trunc() as i64))
        .ok_or_else(|| serde::de::Error::custom("timestamp out of range"))
}

impl PostRecord {
    /// Decode a raw store value.
    ///
    /// A missing `uid` is reported as [`TimelineError::MissingAuthorReference`]
    /// so callers can tell a dangling record from a malformed one.
    pub fn decode(value: &Value, post_id: &PostId, path: &str) -> Result<Self, TimelineError> {
        let object = value.as_object().ok_or_else(|| TimelineError::MalformedRecord {
            path: path.to_string(),
            reason: "expected an object".to_string(),
        })?;

        match object.get("uid") {
            Some(Value::String(uid)) if !uid.is_empty() => {}
            _ => {
                return Err(TimelineError::MissingAuthorReference { post_id: post_id.clone() });
            }
        }

        serde_json::from_value(value.clone()).map_err(|e| TimelineError::MalformedRecord {
            path: path.to_string(),
            reason: e.to_string(),
        })
    }

    /// Serialize for a store write.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// What a post is relative to other posts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PostKind {
    /// Top-level post.
    Original,
    /// Reply to another post.
    Reply,
    /// Repost of another post.
    Repost,
}

/// Fully hydrated post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    /// Post identity.
    pub id: PostId,
    /// Hydrated author.
    pub author: User,
    /// Body text.
    pub text: String,
    /// Creation time, never mutated.
    pub created_at: DateTime<Utc>,
    /// Like counter.
    pub likes: u64,
    /// Repost counter.
    pub reposts: u64,
    /// Handle of the replied-to or reposted author.
    pub replying_to: Option<String>,
    /// Original, reply or repost.
    pub kind: PostKind,
    /// Whether the viewer liked this post, when known.
    pub did_liked: bool,
}

impl Post {
    /// Join a decoded record with its author.
    pub fn from_record(id: PostId, record: PostRecord, author: User) -> Result<Self, TimelineError> {
        let created_at = Utc.timestamp_opt(record.timestamp, 0).single().ok_or_else(|| {
            TimelineError::MalformedRecord {
                path: id.to_string(),
                reason: format!("invalid timestamp {}", record.timestamp),
            }
        })?;

        let (kind, replying_to) = match (record.replying_to, record.reposting_from) {
            (Some(handle), _) => (PostKind::Reply, Some(handle)),
            (None, Some(handle)) => (PostKind::Repost, Some(handle)),
            (None, None) => (PostKind::Original, None),
        };

        Ok(Self {
            id,
            author,
            text: record.text,
            created_at,
            likes: record.likes,
            reposts: record.reposts,
            replying_to,
            kind,
            did_liked: false,
        })
    }

    /// Whether this post replies to or reposts another.
    pub fn is_reply(&self) -> bool {
        self.replying_to.is_some()
    }

    /// Author id.
    pub fn author_id(&self) -> &UserId {
        &self.author.id
    }
}
