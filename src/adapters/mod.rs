//! L6: protocol adapters. Each adapter speaks one wire protocol family and
//! projects its responses onto the normalized model (§3). Adapters are
//! modeled as a capability set: the Operation Layer never downcasts to a
//! concrete adapter type, it calls a method and an unsupported adapter
//! answers `NotSupported` via this trait's default implementations.

pub mod activitypub;
pub mod lemmy;
pub mod mastodon;
pub mod misskey;
pub mod nodeinfo;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::accounts::Account;
use crate::clock::Context;
use crate::error::{Error, Result};
use crate::models::{Actor, Instance, Page, Post};
use crate::pagination::Bounds;
use crate::safety::SafetyGuard;

/// The capability set every protocol adapter implements. Operations the
/// adapter's protocol family does not support keep the default body, which
/// returns `NotSupported`.
#[async_trait]
pub trait ProtocolAdapter: Send + Sync {
    fn name(&self) -> &'static str;

    async fn instance_info(&self, _host: &str, _principal: &str, _ctx: &Context) -> Result<Instance> {
        Err(Error::NotSupported {
            operation: "instance_info".to_string(),
        })
    }

    async fn public_timeline(
        &self,
        _host: &str,
        _local_only: bool,
        _bounds: Bounds,
        _principal: &str,
        _ctx: &Context,
    ) -> Result<Page<Post>> {
        Err(Error::NotSupported {
            operation: "public_timeline".to_string(),
        })
    }

    async fn account_statuses(
        &self,
        _host: &str,
        _actor: &Actor,
        _bounds: Bounds,
        _principal: &str,
        _ctx: &Context,
    ) -> Result<Page<Post>> {
        Err(Error::NotSupported {
            operation: "account_statuses".to_string(),
        })
    }

    async fn search(
        &self,
        _host: &str,
        _query: &str,
        _principal: &str,
        _ctx: &Context,
    ) -> Result<Vec<Actor>> {
        Err(Error::NotSupported {
            operation: "search".to_string(),
        })
    }

    async fn post_status(
        &self,
        _host: &str,
        _account: &Account,
        _content: &str,
        _ctx: &Context,
    ) -> Result<Post> {
        Err(Error::NotSupported {
            operation: "post_status".to_string(),
        })
    }

    async fn verify_credentials(
        &self,
        _host: &str,
        _account: &Account,
        _ctx: &Context,
    ) -> Result<Actor> {
        Err(Error::NotSupported {
            operation: "verify_credentials".to_string(),
        })
    }
}

struct NegativeEntry {
    expires_at: tokio::time::Instant,
}

/// Selects the right adapter for a host by probing NodeInfo first (an
/// authoritative, vendor-supplied `software.name`), then Mastodon-API
/// version-substring matching, then Misskey, then Lemmy — an explicit
/// resolution of the adapter-selection Open Question (DESIGN.md).
pub struct AdapterSelector {
    safety: Arc<SafetyGuard>,
    nodeinfo: nodeinfo::NodeInfoAdapter,
    mastodon: mastodon::MastodonAdapter,
    misskey: misskey::MisskeyAdapter,
    lemmy: lemmy::LemmyAdapter,
    negative_cache: DashMap<String, NegativeEntry>,
    negative_ttl: Duration,
}

impl AdapterSelector {
    pub fn new(safety: Arc<SafetyGuard>, negative_ttl: Duration) -> Self {
        AdapterSelector {
            nodeinfo: nodeinfo::NodeInfoAdapter::new(safety.clone()),
            mastodon: mastodon::MastodonAdapter::new(safety.clone()),
            misskey: misskey::MisskeyAdapter::new(safety.clone()),
            lemmy: lemmy::LemmyAdapter::new(safety.clone()),
            safety,
            negative_cache: DashMap::new(),
            negative_ttl,
        }
    }

    /// Fetch normalized instance info, trying adapters in probe order and
    /// returning the first success. Applies a short negative cache so a
    /// dead host is not re-probed across all four adapters on every call.
    pub async fn instance_info(&self, host: &str, principal: &str, ctx: &Context) -> Result<Instance> {
        if let Some(entry) = self.negative_cache.get(host) {
            if entry.expires_at > tokio::time::Instant::now() {
                return Err(Error::ActorUnreachable {
                    identifier: host.to_string(),
                });
            }
        }

        for adapter in self.probe_order() {
            if let Ok(info) = adapter.instance_info(host, principal, ctx).await {
                return Ok(info);
            }
        }

        self.negative_cache.insert(
            host.to_string(),
            NegativeEntry {
                expires_at: tokio::time::Instant::now() + self.negative_ttl,
            },
        );
        Err(Error::ActorUnreachable {
            identifier: host.to_string(),
        })
    }

    fn probe_order(&self) -> Vec<&dyn ProtocolAdapter> {
        vec![&self.nodeinfo, &self.mastodon, &self.misskey, &self.lemmy]
    }

    pub fn mastodon(&self) -> &mastodon::MastodonAdapter {
        &self.mastodon
    }

    pub fn activitypub(&self) -> activitypub::ActivityPubAdapter {
        activitypub::ActivityPubAdapter::new(self.safety.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubAdapter;

    #[async_trait]
    impl ProtocolAdapter for StubAdapter {
        fn name(&self) -> &'static str {
            "stub"
        }
    }

    #[tokio::test]
    async fn unimplemented_operation_reports_not_supported() {
        let stub = StubAdapter;
        let ctx = Context::new(Duration::from_secs(1));
        let err = stub
            .instance_info("example.test", "caller", &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotSupported { .. }));
    }
}
