//! L5: Actor Resolver. WebFinger discovery and acct: <-> actor URL
//! translation, with a dual cache (JRD + Actor) and a short negative cache
//! for not-found/unreachable identifiers.
//!
//! Grounded directly on the federation-library WebFinger implementation:
//! the `acct:` regex, the `self`/`application/*` link filter, and the
//! `WrongFormat`/`WrongDomain`/`NoValidLink` error split all mirror that
//! crate's `fetch::webfinger` module.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use http::HeaderValue;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Url;

use crate::clock::Context;
use crate::error::{Error, Result};
use crate::models::{Actor, Webfinger};
use crate::safety::SafetyGuard;

pub static WEBFINGER_CONTENT_TYPE: HeaderValue = HeaderValue::from_static("application/jrd+json");
const ACTIVITY_JSON: &str = "application/activity+json";
const AS_LD_JSON: &str = "application/ld+json";

static ACCT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^@?([\p{L}0-9_\.\-]+)@(.+)$").expect("compile acct regex"));

/// A normalized `acct:user@host` identifier. Username case is preserved
/// exactly as supplied; only the host is lowercased (Open Question
/// decision, DESIGN.md).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcctId {
    pub user: String,
    pub host: String,
}

impl AcctId {
    pub fn parse(identifier: &str) -> Result<AcctId> {
        let captures = ACCT_RE
            .captures(identifier)
            .ok_or_else(|| Error::WebfingerWrongFormat {
                identifier: identifier.to_string(),
            })?;
        let user = captures[1].to_string();
        let host = captures[2].to_lowercase();
        Ok(AcctId { user, host })
    }

    pub fn resource(&self) -> String {
        format!("acct:{}@{}", self.user, self.host)
    }
}

impl std::fmt::Display for AcctId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.user, self.host)
    }
}

struct CacheEntry<T> {
    value: T,
    expires_at: tokio::time::Instant,
}

struct NegativeEntry {
    error_kind: &'static str,
    expires_at: tokio::time::Instant,
}

/// L5: resolves identifiers to normalized actors.
pub struct ActorResolver {
    safety: Arc<SafetyGuard>,
    jrd_cache: DashMap<String, CacheEntry<Webfinger>>,
    actor_cache: DashMap<String, CacheEntry<Actor>>,
    negative_cache: DashMap<String, NegativeEntry>,
    cache_ttl: Duration,
    negative_ttl: Duration,
}

impl ActorResolver {
    pub fn new(safety: Arc<SafetyGuard>, cache_ttl: Duration, negative_ttl: Duration) -> Self {
        ActorResolver {
            safety,
            jrd_cache: DashMap::new(),
            actor_cache: DashMap::new(),
            negative_cache: DashMap::new(),
            cache_ttl,
            negative_ttl,
        }
    }

    /// Resolve `identifier` (either `user@host`/`@user@host` or an absolute
    /// ActivityPub actor URL) to a normalized [`Actor`].
    pub async fn resolve(&self, identifier: &str, principal: &str, ctx: &Context) -> Result<Actor> {
        if identifier.starts_with("https://") {
            return self.resolve_url(identifier, principal, ctx).await;
        }

        let acct = AcctId::parse(identifier)?;
        let cache_key = acct.to_string();

        if let Some(cached) = self.actor_cache.get(&cache_key) {
            if cached.expires_at > tokio::time::Instant::now() {
                return Ok(cached.value.clone());
            }
        }
        if let Some(neg) = self.negative_cache.get(&cache_key) {
            if neg.expires_at > tokio::time::Instant::now() {
                return Err(self.rehydrate_negative(identifier, neg.error_kind));
            }
        }

        match self.resolve_uncached(&acct, principal, ctx).await {
            Ok(actor) => {
                self.actor_cache.insert(
                    cache_key,
                    CacheEntry {
                        value: actor.clone(),
                        expires_at: tokio::time::Instant::now() + self.cache_ttl,
                    },
                );
                Ok(actor)
            }
            Err(err) => {
                if let Some(kind) = negative_cacheable_kind(&err) {
                    self.negative_cache.insert(
                        cache_key,
                        NegativeEntry {
                            error_kind: kind,
                            expires_at: tokio::time::Instant::now() + self.negative_ttl,
                        },
                    );
                }
                Err(err)
            }
        }
    }

    async fn resolve_uncached(&self, acct: &AcctId, principal: &str, ctx: &Context) -> Result<Actor> {
        let jrd = self.fetch_jrd(acct, principal, ctx).await?;
        let actor_url = extract_actor_link(&jrd).ok_or_else(|| Error::ActorNotDiscoverable {
            identifier: acct.to_string(),
        })?;
        self.fetch_actor(&actor_url, &acct.to_string(), principal, ctx).await
    }

    async fn fetch_jrd(&self, acct: &AcctId, principal: &str, ctx: &Context) -> Result<Webfinger> {
        if let Some(cached) = self.jrd_cache.get(&acct.to_string()) {
            if cached.expires_at > tokio::time::Instant::now() {
                return Ok(cached.value.clone());
            }
        }

        let url = Url::parse(&format!(
            "https://{}/.well-known/webfinger?resource={}",
            acct.host,
            acct.resource()
        ))?;

        let response = self
            .safety
            .get(&url, &WEBFINGER_CONTENT_TYPE, principal, ctx)
            .await
            .map_err(|e| classify_webfinger_error(e, &acct.to_string()))?;

        if response.is_client_error() {
            return Err(if response.status == 404 {
                Error::ActorNotFound {
                    identifier: acct.to_string(),
                }
            } else {
                Error::ActorUnavailable {
                    identifier: acct.to_string(),
                    status: response.status,
                }
            });
        }
        if !response.is_success() {
            return Err(Error::ActorUnavailable {
                identifier: acct.to_string(),
                status: response.status,
            });
        }

        let jrd: Webfinger = response.json().map_err(|_| Error::ActorMalformed {
            identifier: acct.to_string(),
            message: "invalid JRD document".to_string(),
        })?;

        if jrd.subject.is_empty() {
            return Err(Error::ActorMalformed {
                identifier: acct.to_string(),
                message: "JRD missing subject".to_string(),
            });
        }

        self.jrd_cache.insert(
            acct.to_string(),
            CacheEntry {
                value: jrd.clone(),
                expires_at: tokio::time::Instant::now() + self.cache_ttl,
            },
        );
        Ok(jrd)
    }

    async fn fetch_actor(
        &self,
        actor_url: &Url,
        identifier: &str,
        principal: &str,
        ctx: &Context,
    ) -> Result<Actor> {
        let accept = HeaderValue::from_static(ACTIVITY_JSON);
        let response = self
            .safety
            .get(actor_url, &accept, principal, ctx)
            .await
            .map_err(|e| classify_webfinger_error(e, identifier))?;

        if response.is_client_error() {
            return Err(Error::ActorUnavailable {
                identifier: identifier.to_string(),
                status: response.status,
            });
        }
        if !response.is_success() {
            return Err(Error::ActorUnavailable {
                identifier: identifier.to_string(),
                status: response.status,
            });
        }

        let doc: serde_json::Value = response.json().map_err(|_| Error::ActorMalformed {
            identifier: identifier.to_string(),
            message: "invalid actor document".to_string(),
        })?;
        parse_actor_document(&doc, identifier)
    }

    async fn resolve_url(&self, url: &str, principal: &str, ctx: &Context) -> Result<Actor> {
        let parsed = Url::parse(url)?;
        if let Some(cached) = self.actor_cache.get(url) {
            if cached.expires_at > tokio::time::Instant::now() {
                return Ok(cached.value.clone());
            }
        }
        let actor = self.fetch_actor(&parsed, url, principal, ctx).await?;
        self.actor_cache.insert(
            url.to_string(),
            CacheEntry {
                value: actor.clone(),
                expires_at: tokio::time::Instant::now() + self.cache_ttl,
            },
        );
        Ok(actor)
    }

    fn rehydrate_negative(&self, identifier: &str, kind: &'static str) -> Error {
        match kind {
            "not_found" => Error::ActorNotFound {
                identifier: identifier.to_string(),
            },
            _ => Error::ActorUnreachable {
                identifier: identifier.to_string(),
            },
        }
    }
}

fn negative_cacheable_kind(err: &Error) -> Option<&'static str> {
    match err {
        Error::ActorNotFound { .. } => Some("not_found"),
        Error::ActorUnreachable { .. } | Error::Timeout { .. } | Error::NetworkError { .. } => {
            Some("unreachable")
        }
        _ => None,
    }
}

fn classify_webfinger_error(err: Error, identifier: &str) -> Error {
    match err {
        Error::Timeout { .. } | Error::NetworkError { .. } => Error::ActorUnreachable {
            identifier: identifier.to_string(),
        },
        other => other,
    }
}

/// First link where `rel == "self"` and `type` is `activity+json` or
/// AS-profile `ld+json`, mirroring the federation library's filter.
fn extract_actor_link(jrd: &Webfinger) -> Option<Url> {
    jrd.links
        .iter()
        .find(|link| {
            link.rel.as_deref() == Some("self")
                && link
                    .kind
                    .as_deref()
                    .map(|k| k.starts_with(ACTIVITY_JSON) || k.starts_with(AS_LD_JSON))
                    .unwrap_or(false)
        })
        .and_then(|link| link.href.clone())
}

fn parse_actor_document(doc: &serde_json::Value, identifier: &str) -> Result<Actor> {
    let malformed = |message: &str| Error::ActorMalformed {
        identifier: identifier.to_string(),
        message: message.to_string(),
    };

    let id = doc
        .get("id")
        .and_then(|v| v.as_str())
        .ok_or_else(|| malformed("missing id"))?;
    let url = Url::parse(id)?;
    let inbox = doc
        .get("inbox")
        .and_then(|v| v.as_str())
        .ok_or_else(|| malformed("missing inbox"))?;
    let outbox = doc
        .get("outbox")
        .and_then(|v| v.as_str())
        .ok_or_else(|| malformed("missing outbox"))?;
    let preferred_username = doc
        .get("preferredUsername")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();
    let host = url.host_str().unwrap_or("").to_string();
    let summary_html = doc
        .get("summary")
        .and_then(|v| v.as_str())
        .map(str::to_string);
    let summary_text = summary_html.as_deref().map(crate::html::strip);

    Ok(Actor {
        acct: format!("{preferred_username}@{host}"),
        url,
        preferred_username,
        display_name: doc.get("name").and_then(|v| v.as_str()).map(str::to_string),
        summary_html,
        summary_text,
        avatar_url: doc
            .get("icon")
            .and_then(|v| v.get("url"))
            .and_then(|v| v.as_str())
            .and_then(|s| Url::parse(s).ok()),
        inbox: Url::parse(inbox)?,
        outbox: Url::parse(outbox)?,
        followers: doc
            .get("followers")
            .and_then(|v| v.as_str())
            .and_then(|s| Url::parse(s).ok()),
        following: doc
            .get("following")
            .and_then(|v| v.as_str())
            .and_then(|s| Url::parse(s).ok()),
        shared_inbox: doc
            .get("endpoints")
            .and_then(|v| v.get("sharedInbox"))
            .and_then(|v| v.as_str())
            .and_then(|s| Url::parse(s).ok()),
        public_key_pem: doc
            .get("publicKey")
            .and_then(|v| v.get("publicKeyPem"))
            .and_then(|v| v.as_str())
            .map(str::to_string),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::WebfingerLink;

    #[test]
    fn acct_id_strips_leading_at_and_lowercases_host_only() {
        let acct = AcctId::parse("@Gargron@Mastodon.Social").unwrap();
        assert_eq!(acct.user, "Gargron");
        assert_eq!(acct.host, "mastodon.social");
    }

    #[test]
    fn acct_id_without_leading_at() {
        let acct = AcctId::parse("alice@example.com").unwrap();
        assert_eq!(acct.user, "alice");
        assert_eq!(acct.host, "example.com");
    }

    #[test]
    fn acct_id_rejects_malformed_identifier() {
        assert!(AcctId::parse("not-an-acct").is_err());
    }

    #[test]
    fn acct_id_supports_unicode_usernames() {
        let acct = AcctId::parse("Владимир@example.com").unwrap();
        assert_eq!(acct.user, "Владимир");
    }

    #[test]
    fn extract_actor_link_requires_self_and_activity_type() {
        let jrd = Webfinger {
            subject: "acct:a@b".into(),
            links: vec![
                WebfingerLink {
                    rel: Some("http://webfinger.net/rel/profile-page".into()),
                    kind: Some("text/html".into()),
                    href: Url::parse("https://b/@a").ok(),
                    ..Default::default()
                },
                WebfingerLink {
                    rel: Some("self".into()),
                    kind: Some("application/activity+json".into()),
                    href: Url::parse("https://b/users/a").ok(),
                    ..Default::default()
                },
            ],
            aliases: vec![],
            properties: Default::default(),
        };
        let link = extract_actor_link(&jrd).unwrap();
        assert_eq!(link.as_str(), "https://b/users/a");
    }

    #[test]
    fn extract_actor_link_none_when_absent() {
        let jrd = Webfinger::default();
        assert!(extract_actor_link(&jrd).is_none());
    }

    #[test]
    fn parse_actor_document_requires_inbox_and_outbox() {
        let doc = serde_json::json!({ "id": "https://b/users/a", "preferredUsername": "a" });
        let err = parse_actor_document(&doc, "a@b").unwrap_err();
        assert!(matches!(err, Error::ActorMalformed { .. }));
    }

    #[test]
    fn parse_actor_document_happy_path() {
        let doc = serde_json::json!({
            "id": "https://b.test/users/a",
            "preferredUsername": "a",
            "inbox": "https://b.test/users/a/inbox",
            "outbox": "https://b.test/users/a/outbox",
        });
        let actor = parse_actor_document(&doc, "a@b.test").unwrap();
        assert_eq!(actor.preferred_username, "a");
        assert_eq!(actor.acct, "a@b.test");
    }
}
