//! L9: the public operation surface. Each operation is a thin orchestrator
//! over L2-L8: resolve, paginate, normalize. Write operations additionally
//! consult the Account Registry and inject the bearer token at the adapter
//! layer.

pub mod batch;
pub mod export;

use std::time::Instant;

use crate::adapters::ProtocolAdapter;
use crate::clock::Context;
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::models::{Actor, AuditEventKind, Instance, MediaUpload, Page, Poll, Post, RequestPerf, ScheduledPost};
use crate::pagination::Bounds;

impl Engine {
    /// `discover-actor`: resolve an identifier to a normalized actor.
    pub async fn discover_actor(&self, identifier: &str, caller: &str, ctx: &Context) -> Result<Actor> {
        self.timed("discover-actor", caller, async {
            let host = target_host(identifier)?;
            self.governor.admit(caller, &host).await?;
            self.resolver.resolve(identifier, caller, ctx).await
        })
        .await
    }

    /// `fetch-timeline`: an actor's own posts, paginated.
    pub async fn fetch_timeline(
        &self,
        identifier: &str,
        bounds: Bounds,
        caller: &str,
        ctx: &Context,
    ) -> Result<Page<Post>> {
        self.timed("fetch-timeline", caller, async {
            let actor = self.discover_actor(identifier, caller, ctx).await?;
            let host = actor.url.host_str().unwrap_or("").to_string();
            self.governor.admit(caller, &host).await?;
            match self
                .adapters
                .mastodon()
                .account_statuses(&host, &actor, bounds.clone(), caller, ctx)
                .await
            {
                Ok(page) => Ok(page),
                Err(Error::NotSupported { .. }) | Err(Error::ClientError { .. }) => {
                    self.adapters
                        .activitypub()
                        .account_statuses(&host, &actor, bounds, caller, ctx)
                        .await
                }
                Err(other) => Err(other),
            }
        })
        .await
    }

    /// `public-timeline` / `local-timeline`: the instance's shared feed.
    pub async fn public_timeline(
        &self,
        host: &str,
        local_only: bool,
        bounds: Bounds,
        caller: &str,
        ctx: &Context,
    ) -> Result<Page<Post>> {
        self.timed("public-timeline", caller, async {
            self.governor.admit(caller, host).await?;
            self.adapters
                .mastodon()
                .public_timeline(host, local_only, bounds, caller, ctx)
                .await
        })
        .await
    }

    /// `search`: account search against an instance.
    pub async fn search(&self, host: &str, query: &str, caller: &str, ctx: &Context) -> Result<Vec<Actor>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        self.timed("search", caller, async {
            self.governor.admit(caller, host).await?;
            self.adapters.mastodon().search(host, query, caller, ctx).await
        })
        .await
    }

    /// `get-instance-info`: normalized instance metadata via the
    /// adapter-selection probe (§4.6.6).
    pub async fn get_instance_info(&self, host: &str, caller: &str, ctx: &Context) -> Result<Instance> {
        self.timed("get-instance-info", caller, async {
            self.governor.admit(caller, host).await?;
            self.adapters.instance_info(host, caller, ctx).await
        })
        .await
    }

    /// `post-status`: publish a status on behalf of `account_id` (or the
    /// active account).
    pub async fn post_status(
        &self,
        content: &str,
        account_id: Option<&str>,
        caller: &str,
        ctx: &Context,
    ) -> Result<Post> {
        if content.is_empty() || content.chars().count() > 5000 {
            return Err(Error::InvalidInput {
                field: "content".to_string(),
                message: "status content must be 1-5000 characters".to_string(),
            });
        }
        self.timed("post-status", caller, async {
            let account = self.accounts.resolve_for_write(account_id)?;
            self.governor.admit(caller, &account.instance).await?;
            self.adapters
                .mastodon()
                .post_status(&account.instance, &account, content, ctx)
                .await
        })
        .await
    }

    /// `vote-on-poll`: cast votes on a poll hosted at `host`.
    pub async fn vote_on_poll(
        &self,
        host: &str,
        poll_id: &str,
        choices: Vec<u32>,
        account_id: Option<&str>,
        caller: &str,
        ctx: &Context,
    ) -> Result<Poll> {
        self.timed("vote-on-poll", caller, async {
            let account = self.accounts.resolve_for_write(account_id)?;
            self.governor.admit(caller, host).await?;
            self.adapters
                .mastodon()
                .vote_poll(host, &account, poll_id, choices, caller, ctx)
                .await
        })
        .await
    }

    /// `follow`: follow or unfollow a remote account (identified by its
    /// server-local id on `host`) on behalf of `account_id`.
    pub async fn follow_account(
        &self,
        host: &str,
        target_account_id: &str,
        unfollow: bool,
        account_id: Option<&str>,
        caller: &str,
        ctx: &Context,
    ) -> Result<()> {
        self.timed("follow", caller, async {
            let account = self.accounts.resolve_for_write(account_id)?;
            self.governor.admit(caller, host).await?;
            self.adapters
                .mastodon()
                .follow_account(host, &account, target_account_id, unfollow, caller, ctx)
                .await
        })
        .await
    }

    /// `upload-media`: multipart upload, returning an id usable on a
    /// subsequent `post-status`/`schedule` call.
    #[allow(clippy::too_many_arguments)]
    pub async fn upload_media(
        &self,
        host: &str,
        file_bytes: Vec<u8>,
        filename: &str,
        content_type: &str,
        description: Option<&str>,
        focus: Option<(f32, f32)>,
        account_id: Option<&str>,
        caller: &str,
        ctx: &Context,
    ) -> Result<MediaUpload> {
        if file_bytes.is_empty() {
            return Err(Error::InvalidInput {
                field: "file_bytes".to_string(),
                message: "upload must not be empty".to_string(),
            });
        }
        if let Some((x, y)) = focus {
            if !(-1.0..=1.0).contains(&x) || !(-1.0..=1.0).contains(&y) {
                return Err(Error::InvalidInput {
                    field: "focus".to_string(),
                    message: "focus coordinates must be in [-1, 1]".to_string(),
                });
            }
        }
        self.timed("upload-media", caller, async {
            let account = self.accounts.resolve_for_write(account_id)?;
            self.governor.admit(caller, host).await?;
            self.adapters
                .mastodon()
                .upload_media(host, &account, file_bytes, filename, content_type, description, focus, caller, ctx)
                .await
        })
        .await
    }

    /// `schedule`: queue a status for future publication.
    pub async fn schedule_post(
        &self,
        content: &str,
        scheduled_at: chrono::DateTime<chrono::Utc>,
        account_id: Option<&str>,
        caller: &str,
        ctx: &Context,
    ) -> Result<ScheduledPost> {
        if content.is_empty() || content.chars().count() > 5000 {
            return Err(Error::InvalidInput {
                field: "content".to_string(),
                message: "status content must be 1-5000 characters".to_string(),
            });
        }
        if scheduled_at <= chrono::Utc::now() {
            return Err(Error::InvalidInput {
                field: "scheduled_at".to_string(),
                message: "scheduled_at must be in the future".to_string(),
            });
        }
        self.timed("schedule", caller, async {
            let account = self.accounts.resolve_for_write(account_id)?;
            self.governor.admit(caller, &account.instance).await?;
            self.adapters
                .mastodon()
                .schedule_post(&account.instance, &account, content, scheduled_at, caller, ctx)
                .await
        })
        .await
    }

    /// `verify-account`: confirm an account's stored token is still valid.
    pub async fn verify_account(&self, account_id: &str, caller: &str, ctx: &Context) -> Result<Actor> {
        self.timed("verify-account", caller, async {
            let account = self
                .accounts
                .get(account_id)
                .ok_or_else(|| Error::UnknownAccount {
                    account_id: account_id.to_string(),
                })?;
            self.governor.admit(caller, &account.instance).await?;
            self.adapters
                .mastodon()
                .verify_credentials(&account.instance, &account, ctx)
                .await
        })
        .await
    }

    /// Wrap `fut` with timing and audit recording for the rolling
    /// histogram (§4.9) shared across every public operation.
    pub(crate) async fn timed<F, T>(&self, operation: &str, caller: &str, fut: F) -> Result<T>
    where
        F: std::future::Future<Output = Result<T>>,
    {
        let started_at = chrono::Utc::now();
        let start = Instant::now();
        let result = fut.await;
        let duration = start.elapsed();

        self.health.record(RequestPerf {
            id: uuid::Uuid::new_v4(),
            operation: operation.to_string(),
            started_at,
            duration,
            success: result.is_ok(),
            error_message: result.as_ref().err().map(|e| e.to_string()),
            tags: Default::default(),
        });

        self.audit.record(
            AuditEventKind::ToolInvocation,
            caller,
            operation,
            if result.is_ok() { "ok" } else { "error" },
            Some(duration),
            serde_json::json!({}),
        );

        result
    }
}

/// Best-effort host extraction from an identifier for early governor
/// admission, before the resolver has had a chance to parse it properly.
fn target_host(identifier: &str) -> Result<String> {
    if let Some(rest) = identifier.strip_prefix("https://") {
        let host = rest.split('/').next().unwrap_or("");
        return Ok(host.to_string());
    }
    let trimmed = identifier.trim_start_matches('@');
    trimmed
        .rsplit('@')
        .next()
        .filter(|h| !h.is_empty())
        .map(|h| h.to_lowercase())
        .ok_or_else(|| Error::InvalidInput {
            field: "identifier".to_string(),
            message: "could not determine target host".to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_host_from_acct() {
        assert_eq!(target_host("alice@example.com").unwrap(), "example.com");
        assert_eq!(target_host("@alice@Example.com").unwrap(), "example.com");
    }

    #[test]
    fn target_host_from_url() {
        assert_eq!(target_host("https://example.com/users/alice").unwrap(), "example.com");
    }

    #[test]
    fn target_host_rejects_malformed() {
        assert!(target_host("not-an-identifier").is_err());
    }

    #[tokio::test]
    async fn upload_media_rejects_empty_bytes() {
        let engine = crate::engine::EngineBuilder::default()
            .with_config(crate::config::Config::for_tests())
            .build()
            .unwrap();
        let ctx = Context::new(std::time::Duration::from_secs(5));
        let result = engine
            .upload_media("example.test", Vec::new(), "a.png", "image/png", None, None, None, "caller", &ctx)
            .await;
        assert!(matches!(result, Err(Error::InvalidInput { field, .. }) if field == "file_bytes"));
    }

    #[tokio::test]
    async fn upload_media_rejects_out_of_range_focus() {
        let engine = crate::engine::EngineBuilder::default()
            .with_config(crate::config::Config::for_tests())
            .build()
            .unwrap();
        let ctx = Context::new(std::time::Duration::from_secs(5));
        let result = engine
            .upload_media(
                "example.test",
                vec![1, 2, 3],
                "a.png",
                "image/png",
                None,
                Some((2.0, 0.0)),
                None,
                "caller",
                &ctx,
            )
            .await;
        assert!(matches!(result, Err(Error::InvalidInput { field, .. }) if field == "focus"));
    }

    #[tokio::test]
    async fn schedule_post_rejects_past_timestamp() {
        let engine = crate::engine::EngineBuilder::default()
            .with_config(crate::config::Config::for_tests())
            .build()
            .unwrap();
        let ctx = Context::new(std::time::Duration::from_secs(5));
        let past = chrono::Utc::now() - chrono::Duration::days(1);
        let result = engine.schedule_post("hello", past, None, "caller", &ctx).await;
        assert!(matches!(result, Err(Error::InvalidInput { field, .. }) if field == "scheduled_at"));
    }
}
