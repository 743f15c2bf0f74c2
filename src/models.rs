//! The normalized data model (§3): the types every protocol adapter
//! projects onto, and that the operation layer returns to callers.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

/// A fediverse account as described by an ActivityPub actor document,
/// normalized across Mastodon-API, ActivityPub, Misskey, and Lemmy shapes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Actor {
    /// Canonical `acct:user@host` form.
    pub acct: String,
    /// The ActivityPub actor document URL (its `id`).
    pub url: Url,
    pub preferred_username: String,
    pub display_name: Option<String>,
    pub summary_html: Option<String>,
    pub summary_text: Option<String>,
    pub avatar_url: Option<Url>,
    pub inbox: Url,
    pub outbox: Url,
    pub followers: Option<Url>,
    pub following: Option<Url>,
    pub shared_inbox: Option<Url>,
    pub public_key_pem: Option<String>,
}

/// A WebFinger JSON Resource Descriptor, per RFC 7033.
///
/// Field layout mirrors the canonical federation-library shape: `subject`,
/// `links`, `aliases`, `properties`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Webfinger {
    pub subject: String,
    #[serde(default)]
    pub links: Vec<WebfingerLink>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<Url>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub properties: HashMap<String, Option<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebfingerLink {
    pub rel: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub href: Option<Url>,
    pub template: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub properties: HashMap<String, Option<String>>,
}

/// Post visibility, normalized across adapters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Public,
    Unlisted,
    FollowersOnly,
    Direct,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaAttachment {
    pub kind: String,
    pub url: Url,
    pub alt_text: Option<String>,
    /// `(x, y)` focal point, each in `[-1, 1]`.
    pub focus: Option<(f32, f32)>,
}

/// A successfully uploaded media attachment, not yet attached to a post.
/// Valid for `CACHE_TTL_MEDIA` (default 1h) on the origin instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaUpload {
    pub id: String,
    pub url: Option<Url>,
}

/// A status queued for future publication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledPost {
    pub id: String,
    pub scheduled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollOption {
    pub title: String,
    pub votes_count: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Poll {
    pub id: String,
    pub options: Vec<PollOption>,
    pub expires_at: Option<DateTime<Utc>>,
    pub multiple: bool,
    pub voted: Option<bool>,
}

/// A unit of content (Note/Status), normalized across adapters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    /// Server-assigned id, unique within `url`'s host.
    pub id: String,
    pub url: Url,
    pub author: Actor,
    pub content_html: String,
    pub content_text: String,
    pub spoiler_text: String,
    pub visibility: Visibility,
    pub published: DateTime<Utc>,
    pub in_reply_to: Option<Url>,
    pub replies_count: u64,
    pub reblogs_count: u64,
    pub favourites_count: u64,
    pub media_attachments: Vec<MediaAttachment>,
    pub poll: Option<Poll>,
    pub language: Option<String>,
}

/// An opaque handle representing "where to resume paging." Its contents are
/// private to [`crate::pagination`]; callers treat it as a bytestring.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Cursor(pub(crate) String);

impl Cursor {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A finite-or-paginated sequence of items.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<Cursor>,
    pub prev_cursor: Option<Cursor>,
    pub total_items: Option<u64>,
    pub has_more: bool,
}

impl<T> Page<T> {
    pub fn empty() -> Self {
        Page {
            items: Vec::new(),
            next_cursor: None,
            prev_cursor: None,
            total_items: Some(0),
            has_more: false,
        }
    }
}

/// Known fediverse server software families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Software {
    Mastodon,
    Pleroma,
    Akkoma,
    Pixelfed,
    Misskey,
    Lemmy,
    PeerTube,
    Other,
}

/// A fediverse host's normalized instance metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instance {
    pub domain: String,
    pub software: Software,
    pub version: Option<String>,
    pub description: Option<String>,
    pub user_count: Option<u64>,
    pub post_count: Option<u64>,
    pub domain_count: Option<u64>,
    pub languages: Vec<String>,
    pub registration_open: Option<bool>,
    pub contact_account: Option<String>,
}

/// An operator-owned credential bundle for authenticated write operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub instance: String,
    #[serde(skip_serializing)]
    pub token: String,
    pub username: Option<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
}

/// Why an instance was placed on the blocklist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockReason {
    Policy,
    User,
    Safety,
    Spam,
    Federation,
    Custom,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceBlock {
    /// Exact host, or `*.suffix` wildcard.
    pub pattern: String,
    pub reason: BlockReason,
    pub description: Option<String>,
    pub added_at: DateTime<Utc>,
    pub added_by: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl InstanceBlock {
    /// Whether this entry is currently in effect: no expiry, or expiry in
    /// the future.
    pub fn is_in_effect(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(exp) => exp > now,
            None => true,
        }
    }
}

/// The last observed rate-limit window for one instance, and a derived
/// recommended backoff delay.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitState {
    pub limit: u64,
    pub remaining: u64,
    pub reset: DateTime<Utc>,
    pub observed_at: DateTime<Utc>,
}

impl RateLimitState {
    /// `remaining == 0` and the reset time has not yet passed.
    pub fn is_rate_limited(&self, now: DateTime<Utc>) -> bool {
        self.remaining == 0 && now < self.reset
    }

    /// Recommended delay before the next call: zero unless remaining is
    /// under 10% of the limit, in which case it's spread evenly across the
    /// remaining budget until reset.
    pub fn recommended_delay(&self, now: DateTime<Utc>) -> Duration {
        if self.limit == 0 {
            return Duration::ZERO;
        }
        let low_water = self.limit / 10;
        if self.remaining > low_water {
            return Duration::ZERO;
        }
        let until_reset = (self.reset - now).num_milliseconds().max(0) as u64;
        let denom = self.remaining.max(1);
        Duration::from_millis(until_reset / denom)
    }
}

/// The kind of event recorded in the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventKind {
    ToolInvocation,
    ResourceAccess,
    RateLimitExceeded,
    BlockedInstance,
    SsrfBlocked,
    Error,
}

/// A single audit-trail entry, redacted before storage, chained by BLAKE3
/// hash to its predecessor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: uuid::Uuid,
    pub timestamp: DateTime<Utc>,
    pub kind: AuditEventKind,
    pub principal: String,
    pub subject: String,
    pub outcome: String,
    pub duration: Option<Duration>,
    pub parameters: serde_json::Value,
    /// Hex-encoded BLAKE3 hash of this record's redacted content chained
    /// with `previous_hash`.
    pub hash: String,
    pub previous_hash: Option<String>,
    pub sequence: u64,
}

/// One completed operation's timing and outcome, for the rolling histogram.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestPerf {
    pub id: uuid::Uuid,
    pub operation: String,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    pub success: bool,
    pub error_message: Option<String>,
    pub tags: HashMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[test]
    fn instance_block_expiry() {
        let now = Utc::now();
        let expired = InstanceBlock {
            pattern: "bad.example".into(),
            reason: BlockReason::Policy,
            description: None,
            added_at: now - ChronoDuration::days(2),
            added_by: None,
            expires_at: Some(now - ChronoDuration::days(1)),
        };
        assert!(!expired.is_in_effect(now));

        let permanent = InstanceBlock {
            expires_at: None,
            ..expired.clone()
        };
        assert!(permanent.is_in_effect(now));
    }

    #[test]
    fn rate_limit_state_backoff_only_when_low() {
        let now = Utc::now();
        let plenty = RateLimitState {
            limit: 100,
            remaining: 50,
            reset: now + ChronoDuration::seconds(60),
            observed_at: now,
        };
        assert_eq!(plenty.recommended_delay(now), Duration::ZERO);

        let scarce = RateLimitState {
            limit: 100,
            remaining: 2,
            reset: now + ChronoDuration::seconds(10),
            observed_at: now,
        };
        assert!(scarce.recommended_delay(now) > Duration::ZERO);
    }

    #[test]
    fn rate_limit_state_is_rate_limited_when_exhausted() {
        let now = Utc::now();
        let exhausted = RateLimitState {
            limit: 100,
            remaining: 0,
            reset: now + ChronoDuration::seconds(5),
            observed_at: now,
        };
        assert!(exhausted.is_rate_limited(now));
        assert!(!exhausted.is_rate_limited(now + ChronoDuration::seconds(6)));
    }
}
