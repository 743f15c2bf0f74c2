//! L3: safety middleware wrapping the HTTP Fetcher. Enforces, in order,
//! scheme check, host extraction, blocklist match, SSRF guard, and always
//! emits an audit record.

use std::net::IpAddr;
use std::sync::Arc;

use dashmap::DashMap;
use http::HeaderValue;
use reqwest::Url;

use crate::audit::AuditLog;
use crate::clock::Context;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::http_fetcher::{FetchResponse, HttpFetcher};
use crate::models::{AuditEventKind, BlockReason, InstanceBlock};
use crate::rate_limit::InstanceLimiter;

/// The blocklist: exact-host and `*.suffix` wildcard entries, keyed by
/// pattern for O(1) exact-match lookup with a linear wildcard scan.
#[derive(Default)]
pub struct Blocklist {
    entries: DashMap<String, InstanceBlock>,
}

impl Blocklist {
    pub fn new(initial: Vec<InstanceBlock>) -> Self {
        let entries = DashMap::new();
        for entry in initial {
            entries.insert(normalize_host(&entry.pattern), entry);
        }
        Blocklist { entries }
    }

    pub fn add(&self, entry: InstanceBlock) {
        self.entries.insert(normalize_host(&entry.pattern), entry);
    }

    pub fn remove(&self, pattern: &str) {
        self.entries.remove(&normalize_host(pattern));
    }

    pub fn list(&self) -> Vec<InstanceBlock> {
        self.entries.iter().map(|e| e.value().clone()).collect()
    }

    /// Returns the first in-effect entry matching `host`, exact or
    /// wildcard-suffix.
    pub fn matching(&self, host: &str) -> Option<InstanceBlock> {
        let host = normalize_host(host);
        let now = chrono::Utc::now();
        if let Some(entry) = self.entries.get(&host) {
            if entry.is_in_effect(now) {
                return Some(entry.clone());
            }
        }
        self.entries
            .iter()
            .filter(|e| e.is_in_effect(now))
            .find(|e| {
                e.pattern
                    .strip_prefix("*.")
                    .map(|suffix| host == suffix || host.ends_with(&format!(".{suffix}")))
                    .unwrap_or(false)
            })
            .map(|e| e.value().clone())
    }
}

fn normalize_host(host: &str) -> String {
    host.trim().to_lowercase()
}

/// L3: wraps [`HttpFetcher`] with blocklist, SSRF, and audit enforcement.
pub struct SafetyGuard {
    fetcher: HttpFetcher,
    blocklist: Arc<Blocklist>,
    audit: Arc<AuditLog>,
    instance_limiter: Arc<InstanceLimiter>,
    instance_blocking_enabled: bool,
    allow_private_network_targets: bool,
}

impl SafetyGuard {
    pub fn new(
        fetcher: HttpFetcher,
        config: &Config,
        audit: Arc<AuditLog>,
        instance_limiter: Arc<InstanceLimiter>,
    ) -> Self {
        SafetyGuard {
            fetcher,
            blocklist: Arc::new(Blocklist::new(config.blocked_instances.clone())),
            audit,
            instance_limiter,
            instance_blocking_enabled: config.instance_blocking_enabled,
            allow_private_network_targets: config.allow_private_network_targets,
        }
    }

    pub fn blocklist(&self) -> Arc<Blocklist> {
        self.blocklist.clone()
    }

    /// Run the full safety pipeline (§4.2) and, if the call is allowed,
    /// perform the GET through the HTTP Fetcher.
    pub async fn get(
        &self,
        url: &Url,
        accept: &HeaderValue,
        principal: &str,
        ctx: &Context,
    ) -> Result<FetchResponse> {
        self.check(url, principal)?;
        let started = std::time::Instant::now();
        let result = self.fetcher.get(url, accept, ctx).await;
        self.emit_audit(url, principal, &result, started.elapsed());
        result
    }

    pub async fn post_json(
        &self,
        url: &Url,
        accept: &HeaderValue,
        body: serde_json::Value,
        principal: &str,
        ctx: &Context,
    ) -> Result<FetchResponse> {
        self.check(url, principal)?;
        let started = std::time::Instant::now();
        let result = self.fetcher.post_json(url, accept, body, ctx).await;
        self.emit_audit(url, principal, &result, started.elapsed());
        result
    }

    /// As [`Self::get`], but attaches `authorization` to the outbound
    /// request. The header is never passed to `emit_audit`/the audit log.
    pub async fn get_authed(
        &self,
        url: &Url,
        accept: &HeaderValue,
        authorization: HeaderValue,
        principal: &str,
        ctx: &Context,
    ) -> Result<FetchResponse> {
        self.check(url, principal)?;
        let started = std::time::Instant::now();
        let result = self.fetcher.get_authed(url, accept, authorization, ctx).await;
        self.emit_audit(url, principal, &result, started.elapsed());
        result
    }

    /// As [`Self::get_authed`], but sends a multipart body (media upload).
    pub async fn post_multipart_authed(
        &self,
        url: &Url,
        accept: &HeaderValue,
        form: reqwest::multipart::Form,
        authorization: HeaderValue,
        principal: &str,
        ctx: &Context,
    ) -> Result<FetchResponse> {
        self.check(url, principal)?;
        let started = std::time::Instant::now();
        let result = self.fetcher.post_multipart_authed(url, accept, form, authorization, ctx).await;
        self.emit_audit(url, principal, &result, started.elapsed());
        result
    }

    /// As [`Self::post_json`], but attaches `authorization` to the outbound
    /// request.
    pub async fn post_json_authed(
        &self,
        url: &Url,
        accept: &HeaderValue,
        body: serde_json::Value,
        authorization: HeaderValue,
        principal: &str,
        ctx: &Context,
    ) -> Result<FetchResponse> {
        self.check(url, principal)?;
        let started = std::time::Instant::now();
        let result = self
            .fetcher
            .post_json_authed(url, accept, body, authorization, ctx)
            .await;
        self.emit_audit(url, principal, &result, started.elapsed());
        result
    }

    /// Scheme check, host extraction, blocklist, SSRF — steps 1-4 of §4.2.
    /// Emits its own audit record on rejection since no fetch is attempted.
    fn check(&self, url: &Url, principal: &str) -> Result<()> {
        if url.scheme() != "https" {
            let host = url.host_str().unwrap_or("").to_string();
            return Err(Error::SchemeRejected { host });
        }
        let host = url
            .host_str()
            .ok_or_else(|| Error::InvalidInput {
                field: "url".into(),
                message: "URL has no host".into(),
            })?
            .to_string();

        if self.instance_blocking_enabled {
            if let Some(block) = self.blocklist.matching(&host) {
                self.audit.record(
                    AuditEventKind::BlockedInstance,
                    principal,
                    &host,
                    "blocked",
                    None,
                    serde_json::json!({ "reason": format!("{:?}", block.reason) }),
                );
                return Err(Error::InstanceBlocked {
                    host,
                    reason: format!("{:?}", block.reason),
                });
            }
        }

        if !self.allow_private_network_targets && is_unsafe_target(&host) {
            self.audit.record(
                AuditEventKind::SsrfBlocked,
                principal,
                &host,
                "blocked",
                None,
                serde_json::json!({}),
            );
            return Err(Error::SsrfBlocked { host });
        }

        Ok(())
    }

    fn emit_audit(
        &self,
        url: &Url,
        principal: &str,
        result: &Result<FetchResponse>,
        duration: std::time::Duration,
    ) {
        let host = url.host_str().unwrap_or("").to_string();
        let outcome = match result {
            Ok(resp) => {
                self.instance_limiter.observe(&host, &resp.rate_limit);
                if let Some(retry_after) = resp.retry_after {
                    self.instance_limiter.observe_retry_after(&host, retry_after);
                }
                format!("http_{}", resp.status)
            }
            Err(e) => format!("error:{e}"),
        };
        self.audit.record(
            AuditEventKind::ResourceAccess,
            principal,
            &host,
            &outcome,
            Some(duration),
            serde_json::json!({ "url": url.as_str() }),
        );
    }
}

/// SSRF guard: reject hosts that are literal IPs in loopback, link-local,
/// unique-local, or multicast ranges. Literal IP hosts in the public range
/// are allowed (the point of the guard is to block internal targets, not
/// all literal IPs), but the config escape hatch governs both classes.
fn is_unsafe_target(host: &str) -> bool {
    match host.parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => {
            v4.is_loopback()
                || v4.is_link_local()
                || v4.is_private()
                || v4.is_multicast()
                || v4.is_unspecified()
                || v4.is_broadcast()
        }
        Ok(IpAddr::V6(v6)) => {
            v6.is_loopback()
                || v6.is_multicast()
                || v6.is_unspecified()
                || is_unique_local_v6(&v6)
                || is_unicast_link_local_v6(&v6)
        }
        Err(_) => {
            let lower = host.to_lowercase();
            lower == "localhost" || lower.ends_with(".localhost") || lower == "metadata.google.internal"
        }
    }
}

fn is_unique_local_v6(addr: &std::net::Ipv6Addr) -> bool {
    (addr.segments()[0] & 0xfe00) == 0xfc00
}

fn is_unicast_link_local_v6(addr: &std::net::Ipv6Addr) -> bool {
    (addr.segments()[0] & 0xffc0) == 0xfe80
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(pattern: &str) -> InstanceBlock {
        InstanceBlock {
            pattern: pattern.to_string(),
            reason: BlockReason::Policy,
            description: None,
            added_at: chrono::Utc::now(),
            added_by: None,
            expires_at: None,
        }
    }

    #[test]
    fn exact_blocklist_match() {
        let list = Blocklist::new(vec![block("bad.example")]);
        assert!(list.matching("bad.example").is_some());
        assert!(list.matching("notbad.example").is_none());
    }

    #[test]
    fn wildcard_blocklist_match() {
        let list = Blocklist::new(vec![block("*.spam.example")]);
        assert!(list.matching("sub.spam.example").is_some());
        assert!(list.matching("spam.example").is_some());
        assert!(list.matching("notspam.example").is_none());
    }

    #[test]
    fn blocklist_is_case_insensitive() {
        let list = Blocklist::new(vec![block("Bad.Example")]);
        assert!(list.matching("bad.example").is_some());
    }

    #[test]
    fn add_then_remove_clears_block() {
        let list = Blocklist::new(vec![]);
        list.add(block("temp.example"));
        assert!(list.matching("temp.example").is_some());
        list.remove("temp.example");
        assert!(list.matching("temp.example").is_none());
    }

    #[test]
    fn expired_block_is_not_in_effect() {
        let mut entry = block("expired.example");
        entry.expires_at = Some(chrono::Utc::now() - chrono::Duration::days(1));
        let list = Blocklist::new(vec![entry]);
        assert!(list.matching("expired.example").is_none());
    }

    #[test]
    fn ssrf_guard_blocks_loopback_and_private() {
        assert!(is_unsafe_target("127.0.0.1"));
        assert!(is_unsafe_target("localhost"));
        assert!(is_unsafe_target("10.0.0.5"));
        assert!(is_unsafe_target("169.254.1.1"));
        assert!(is_unsafe_target("::1"));
        assert!(!is_unsafe_target("mastodon.social"));
        assert!(!is_unsafe_target("93.184.216.34"));
    }
}
