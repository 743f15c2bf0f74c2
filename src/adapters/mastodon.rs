//! Mastodon-API adapter: covers Mastodon, Pleroma, Akkoma, and Pixelfed,
//! which all speak the same `/api/v1`+`/api/v2` surface with minor
//! version-string differences.

use std::sync::Arc;

use async_trait::async_trait;
use http::HeaderValue;
use reqwest::Url;

use super::ProtocolAdapter;
use crate::accounts::{Account, AccountRegistry};
use crate::clock::Context;
use crate::error::{Error, Result};
use crate::models::{
    Actor, Instance, MediaAttachment, MediaUpload, Page, Poll, PollOption, Post, ScheduledPost, Software, Visibility,
};
use crate::pagination::{self, Bounds};
use crate::safety::SafetyGuard;

const ACCEPT_JSON: &str = "application/json";

pub struct MastodonAdapter {
    safety: Arc<SafetyGuard>,
}

impl MastodonAdapter {
    pub fn new(safety: Arc<SafetyGuard>) -> Self {
        MastodonAdapter { safety }
    }

    fn base_url(host: &str, path: &str) -> Result<Url> {
        Url::parse(&format!("https://{host}{path}")).map_err(Error::from)
    }

    async fn get_json(&self, url: &Url, principal: &str, ctx: &Context) -> Result<(serde_json::Value, crate::http_fetcher::FetchResponse)> {
        let accept = HeaderValue::from_static(ACCEPT_JSON);
        let response = self.safety.get(url, &accept, principal, ctx).await?;
        if response.is_client_error() {
            return Err(Error::ClientError {
                host: url.host_str().unwrap_or("").to_string(),
                status: response.status,
            });
        }
        if response.is_server_error() {
            return Err(Error::ServerError {
                host: url.host_str().unwrap_or("").to_string(),
                status: response.status,
            });
        }
        let doc: serde_json::Value = response.json()?;
        Ok((doc, response))
    }

    async fn post_json_authed(
        &self,
        url: &Url,
        account: &Account,
        body: serde_json::Value,
        principal: &str,
        ctx: &Context,
    ) -> Result<serde_json::Value> {
        let accept = HeaderValue::from_static(ACCEPT_JSON);
        let authorization = AccountRegistry::bearer_header(account);
        let response = self
            .safety
            .post_json_authed(url, &accept, body, authorization, principal, ctx)
            .await?;
        if !response.is_success() {
            return Err(Error::ClientError {
                host: url.host_str().unwrap_or("").to_string(),
                status: response.status,
            });
        }
        response.json()
    }

    fn normalize_instance(&self, host: &str, doc: &serde_json::Value) -> Instance {
        let version = doc.get("version").and_then(|v| v.as_str()).unwrap_or("");
        let software = if version.contains("Pleroma") {
            Software::Pleroma
        } else if version.contains("Akkoma") {
            Software::Akkoma
        } else {
            Software::Mastodon
        };
        Instance {
            domain: host.to_string(),
            software,
            version: Some(version.to_string()),
            description: doc
                .get("description")
                .or_else(|| doc.get("short_description"))
                .and_then(|v| v.as_str())
                .map(str::to_string),
            user_count: doc
                .get("stats")
                .and_then(|v| v.get("user_count"))
                .or_else(|| doc.get("usage").and_then(|v| v.get("users")).and_then(|v| v.get("active_month")))
                .and_then(|v| v.as_u64()),
            post_count: doc
                .get("stats")
                .and_then(|v| v.get("status_count"))
                .and_then(|v| v.as_u64()),
            domain_count: doc
                .get("stats")
                .and_then(|v| v.get("domain_count"))
                .and_then(|v| v.as_u64()),
            languages: doc
                .get("languages")
                .and_then(|v| v.as_array())
                .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
                .unwrap_or_default(),
            registration_open: doc
                .get("registrations")
                .and_then(|v| v.as_bool())
                .or_else(|| doc.get("registrations").and_then(|v| v.get("enabled")).and_then(|v| v.as_bool())),
            contact_account: doc
                .get("contact_account")
                .and_then(|v| v.get("acct"))
                .and_then(|v| v.as_str())
                .map(str::to_string),
        }
    }

    fn normalize_status(&self, doc: &serde_json::Value) -> Result<Post> {
        let malformed = |m: &str| Error::ActorMalformed {
            identifier: "status".to_string(),
            message: m.to_string(),
        };
        let id = doc
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| malformed("status missing id"))?
            .to_string();
        let url = doc
            .get("url")
            .or_else(|| doc.get("uri"))
            .and_then(|v| v.as_str())
            .ok_or_else(|| malformed("status missing url"))?;
        let author_doc = doc
            .get("account")
            .ok_or_else(|| malformed("status missing account"))?;
        let author = normalize_account(author_doc)?;
        let content_html = doc.get("content").and_then(|v| v.as_str()).unwrap_or("").to_string();
        let visibility = match doc.get("visibility").and_then(|v| v.as_str()) {
            Some("public") => Visibility::Public,
            Some("unlisted") => Visibility::Unlisted,
            Some("private") => Visibility::FollowersOnly,
            Some("direct") => Visibility::Direct,
            _ => Visibility::Public,
        };
        let published = doc
            .get("created_at")
            .and_then(|v| v.as_str())
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&chrono::Utc))
            .unwrap_or_else(chrono::Utc::now);

        let media_attachments = doc
            .get("media_attachments")
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| {
                        let url = item.get("url").and_then(|v| v.as_str())?;
                        Some(MediaAttachment {
                            kind: item.get("type").and_then(|v| v.as_str()).unwrap_or("").to_string(),
                            url: Url::parse(url).ok()?,
                            alt_text: item.get("description").and_then(|v| v.as_str()).map(str::to_string),
                            focus: None,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        let poll = doc.get("poll").filter(|v| !v.is_null()).map(|p| Poll {
            id: p.get("id").and_then(|v| v.as_str()).unwrap_or("").to_string(),
            options: p
                .get("options")
                .and_then(|v| v.as_array())
                .map(|arr| {
                    arr.iter()
                        .map(|o| PollOption {
                            title: o.get("title").and_then(|v| v.as_str()).unwrap_or("").to_string(),
                            votes_count: o.get("votes_count").and_then(|v| v.as_u64()),
                        })
                        .collect()
                })
                .unwrap_or_default(),
            expires_at: p
                .get("expires_at")
                .and_then(|v| v.as_str())
                .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.with_timezone(&chrono::Utc)),
            multiple: p.get("multiple").and_then(|v| v.as_bool()).unwrap_or(false),
            voted: p.get("voted").and_then(|v| v.as_bool()),
        });

        Ok(Post {
            content_text: crate::html::strip(&content_html),
            id,
            url: Url::parse(url)?,
            author,
            content_html,
            spoiler_text: doc.get("spoiler_text").and_then(|v| v.as_str()).unwrap_or("").to_string(),
            visibility,
            published,
            in_reply_to: doc
                .get("in_reply_to_id")
                .and_then(|v| v.as_str())
                .and_then(|s| Url::parse(s).ok()),
            replies_count: doc.get("replies_count").and_then(|v| v.as_u64()).unwrap_or(0),
            reblogs_count: doc.get("reblogs_count").and_then(|v| v.as_u64()).unwrap_or(0),
            favourites_count: doc.get("favourites_count").and_then(|v| v.as_u64()).unwrap_or(0),
            media_attachments,
            poll,
            language: doc.get("language").and_then(|v| v.as_str()).map(str::to_string),
        })
    }

    /// `GET /api/v2/search?q=&type=&limit=`.
    pub async fn search_accounts(&self, host: &str, query: &str, limit: u32, principal: &str, ctx: &Context) -> Result<Vec<Actor>> {
        let mut url = Self::base_url(host, "/api/v2/search")?;
        url.query_pairs_mut()
            .append_pair("q", query)
            .append_pair("type", "accounts")
            .append_pair("limit", &limit.to_string());
        let (doc, _) = self.get_json(&url, principal, ctx).await?;
        let accounts = doc
            .get("accounts")
            .and_then(|v| v.as_array())
            .map(|arr| arr.iter().filter_map(|a| normalize_account(a).ok()).collect())
            .unwrap_or_default();
        Ok(accounts)
    }

    /// `POST /api/v1/polls/{id}/votes`.
    pub async fn vote_poll(&self, host: &str, account: &Account, poll_id: &str, choices: Vec<u32>, principal: &str, ctx: &Context) -> Result<Poll> {
        let url = Self::base_url(host, &format!("/api/v1/polls/{poll_id}/votes"))?;
        let body = serde_json::json!({ "choices": choices });
        let doc = self.post_json_authed(&url, account, body, principal, ctx).await?;
        Ok(Poll {
            id: doc.get("id").and_then(|v| v.as_str()).unwrap_or(poll_id).to_string(),
            options: doc
                .get("options")
                .and_then(|v| v.as_array())
                .map(|arr| {
                    arr.iter()
                        .map(|o| PollOption {
                            title: o.get("title").and_then(|v| v.as_str()).unwrap_or("").to_string(),
                            votes_count: o.get("votes_count").and_then(|v| v.as_u64()),
                        })
                        .collect()
                })
                .unwrap_or_default(),
            expires_at: None,
            multiple: doc.get("multiple").and_then(|v| v.as_bool()).unwrap_or(false),
            voted: doc.get("voted").and_then(|v| v.as_bool()),
        })
    }

    /// `POST /api/v1/accounts/{id}/{follow|unfollow}`.
    pub async fn follow_account(
        &self,
        host: &str,
        account: &Account,
        target_account_id: &str,
        unfollow: bool,
        principal: &str,
        ctx: &Context,
    ) -> Result<()> {
        let action = if unfollow { "unfollow" } else { "follow" };
        let url = Self::base_url(host, &format!("/api/v1/accounts/{target_account_id}/{action}"))?;
        self.post_json_authed(&url, account, serde_json::json!({}), principal, ctx).await?;
        Ok(())
    }

    /// `POST /api/v1/media`, multipart, field `file` plus optional
    /// `description` and `focus` (`"x,y"`, each in `[-1, 1]`).
    pub async fn upload_media(
        &self,
        host: &str,
        account: &Account,
        file_bytes: Vec<u8>,
        filename: &str,
        content_type: &str,
        description: Option<&str>,
        focus: Option<(f32, f32)>,
        principal: &str,
        ctx: &Context,
    ) -> Result<MediaUpload> {
        let url = Self::base_url(host, "/api/v1/media")?;
        let mut part = reqwest::multipart::Part::bytes(file_bytes).file_name(filename.to_string());
        part = part
            .mime_str(content_type)
            .map_err(|e| Error::InvalidInput {
                field: "content_type".to_string(),
                message: e.to_string(),
            })?;
        let mut form = reqwest::multipart::Form::new().part("file", part);
        if let Some(description) = description {
            form = form.text("description", description.to_string());
        }
        if let Some((x, y)) = focus {
            form = form.text("focus", format!("{x},{y}"));
        }

        let accept = HeaderValue::from_static(ACCEPT_JSON);
        let authorization = AccountRegistry::bearer_header(account);
        let response = self
            .safety
            .post_multipart_authed(&url, &accept, form, authorization, principal, ctx)
            .await?;
        if !response.is_success() {
            return Err(Error::ClientError {
                host: host.to_string(),
                status: response.status,
            });
        }
        let doc: serde_json::Value = response.json()?;
        let id = doc
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::ActorMalformed {
                identifier: "media".to_string(),
                message: "upload response missing id".to_string(),
            })?
            .to_string();
        let url = doc.get("url").and_then(|v| v.as_str()).and_then(|s| Url::parse(s).ok());
        Ok(MediaUpload { id, url })
    }

    /// `POST /api/v1/statuses` with `scheduled_at` set.
    pub async fn schedule_post(
        &self,
        host: &str,
        account: &Account,
        content: &str,
        scheduled_at: chrono::DateTime<chrono::Utc>,
        principal: &str,
        ctx: &Context,
    ) -> Result<ScheduledPost> {
        let url = Self::base_url(host, "/api/v1/statuses")?;
        let body = serde_json::json!({
            "status": content,
            "scheduled_at": scheduled_at.to_rfc3339(),
        });
        let doc = self.post_json_authed(&url, account, body, principal, ctx).await?;
        let id = doc
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::ActorMalformed {
                identifier: "scheduled_status".to_string(),
                message: "schedule response missing id".to_string(),
            })?
            .to_string();
        let scheduled_at = doc
            .get("scheduled_at")
            .and_then(|v| v.as_str())
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&chrono::Utc))
            .unwrap_or(scheduled_at);
        Ok(ScheduledPost { id, scheduled_at })
    }
}

fn normalize_account(doc: &serde_json::Value) -> Result<Actor> {
    let malformed = |m: &str| Error::ActorMalformed {
        identifier: "account".to_string(),
        message: m.to_string(),
    };
    let url = doc
        .get("url")
        .and_then(|v| v.as_str())
        .ok_or_else(|| malformed("account missing url"))?;
    let url = Url::parse(url)?;
    let acct = doc
        .get("acct")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();
    let preferred_username = doc
        .get("username")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();
    let summary_html = doc.get("note").and_then(|v| v.as_str()).map(str::to_string);
    Ok(Actor {
        acct: if acct.contains('@') {
            acct
        } else {
            format!("{}@{}", acct, url.host_str().unwrap_or(""))
        },
        inbox: Url::parse(&format!("{}://{}/users/{}/inbox", url.scheme(), url.host_str().unwrap_or(""), preferred_username))?,
        outbox: Url::parse(&format!("{}://{}/users/{}/outbox", url.scheme(), url.host_str().unwrap_or(""), preferred_username))?,
        summary_text: summary_html.as_deref().map(crate::html::strip),
        display_name: doc.get("display_name").and_then(|v| v.as_str()).map(str::to_string),
        avatar_url: doc.get("avatar").and_then(|v| v.as_str()).and_then(|s| Url::parse(s).ok()),
        followers: None,
        following: None,
        shared_inbox: None,
        public_key_pem: None,
        url,
        preferred_username,
        summary_html,
    })
}

#[async_trait]
impl ProtocolAdapter for MastodonAdapter {
    fn name(&self) -> &'static str {
        "mastodon"
    }

    async fn instance_info(&self, host: &str, principal: &str, ctx: &Context) -> Result<Instance> {
        let url = Self::base_url(host, "/api/v1/instance")?;
        let (doc, _) = self.get_json(&url, principal, ctx).await?;
        if doc.get("version").is_none() {
            return Err(Error::NotSupported {
                operation: "instance_info".to_string(),
            });
        }
        Ok(self.normalize_instance(host, &doc))
    }

    async fn public_timeline(
        &self,
        host: &str,
        local_only: bool,
        bounds: Bounds,
        principal: &str,
        ctx: &Context,
    ) -> Result<Page<Post>> {
        let mut url = Self::base_url(host, "/api/v1/timelines/public")?;
        if local_only {
            url.query_pairs_mut().append_pair("local", "true");
        }
        bounds.apply_to(&mut url);
        let (doc, response) = self.get_json(&url, principal, ctx).await?;
        let items = doc.as_array().cloned().unwrap_or_default();
        let ids: Vec<String> = items
            .iter()
            .filter_map(|i| i.get("id").and_then(|v| v.as_str()).map(str::to_string))
            .collect();
        let posts: Vec<Post> = items.iter().filter_map(|i| self.normalize_status(i).ok()).collect();
        let (link_next, link_prev) = pagination::cursors_from_link_header(&response);
        let next_cursor = link_next.or_else(|| pagination::next_cursor_from_mastodon_ids(&ids));
        let prev_cursor = link_prev.or_else(|| pagination::prev_cursor_from_mastodon_ids(&ids));
        Ok(Page {
            has_more: next_cursor.is_some(),
            items: posts,
            next_cursor,
            prev_cursor,
            total_items: None,
        })
    }

    async fn account_statuses(
        &self,
        host: &str,
        actor: &Actor,
        bounds: Bounds,
        principal: &str,
        ctx: &Context,
    ) -> Result<Page<Post>> {
        let mut url = Self::base_url(host, &format!("/api/v1/accounts/{}/statuses", actor.preferred_username))?;
        bounds.apply_to(&mut url);
        let (doc, response) = self.get_json(&url, principal, ctx).await?;
        let items = doc.as_array().cloned().unwrap_or_default();
        let ids: Vec<String> = items
            .iter()
            .filter_map(|i| i.get("id").and_then(|v| v.as_str()).map(str::to_string))
            .collect();
        let posts: Vec<Post> = items.iter().filter_map(|i| self.normalize_status(i).ok()).collect();
        let (link_next, link_prev) = pagination::cursors_from_link_header(&response);
        let next_cursor = link_next.or_else(|| pagination::next_cursor_from_mastodon_ids(&ids));
        let prev_cursor = link_prev.or_else(|| pagination::prev_cursor_from_mastodon_ids(&ids));
        Ok(Page {
            has_more: next_cursor.is_some(),
            items: posts,
            next_cursor,
            prev_cursor,
            total_items: None,
        })
    }

    async fn search(&self, host: &str, query: &str, principal: &str, ctx: &Context) -> Result<Vec<Actor>> {
        self.search_accounts(host, query, 20, principal, ctx).await
    }

    async fn post_status(&self, host: &str, account: &Account, content: &str, ctx: &Context) -> Result<Post> {
        let url = Self::base_url(host, "/api/v1/statuses")?;
        let body = serde_json::json!({ "status": content });
        let doc = self.post_json_authed(&url, account, body, "account", ctx).await?;
        self.normalize_status(&doc)
    }

    async fn verify_credentials(&self, host: &str, account: &Account, ctx: &Context) -> Result<Actor> {
        let url = Self::base_url(host, "/api/v1/accounts/verify_credentials")?;
        let accept = HeaderValue::from_static(ACCEPT_JSON);
        let authorization = AccountRegistry::bearer_header(account);
        let response = self
            .safety
            .get_authed(&url, &accept, authorization, "account", ctx)
            .await?;
        if response.status == 401 {
            return Err(Error::InvalidCredentials {
                account_id: account.id.clone(),
            });
        }
        if !response.is_success() {
            return Err(Error::VerifyFailed {
                account_id: account.id.clone(),
                message: format!("HTTP {}", response.status),
            });
        }
        let doc: serde_json::Value = response.json()?;
        normalize_account(&doc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_account_builds_acct_when_missing_host() {
        let doc = serde_json::json!({
            "acct": "gargron",
            "username": "gargron",
            "url": "https://mastodon.social/@Gargron",
        });
        let actor = normalize_account(&doc).unwrap();
        assert_eq!(actor.acct, "gargron@mastodon.social");
    }

    #[test]
    fn normalize_account_keeps_existing_remote_acct() {
        let doc = serde_json::json!({
            "acct": "gargron@mastodon.social",
            "username": "gargron",
            "url": "https://mastodon.social/@Gargron",
        });
        let actor = normalize_account(&doc).unwrap();
        assert_eq!(actor.acct, "gargron@mastodon.social");
    }

    #[test]
    fn normalize_instance_detects_pleroma_by_version_substring() {
        let adapter = MastodonAdapter::new(Arc::new(make_test_safety()));
        let doc = serde_json::json!({ "version": "2.7.2 (compatible; Pleroma 2.5.2)" });
        let instance = adapter.normalize_instance("p.example", &doc);
        assert_eq!(instance.software, Software::Pleroma);
    }

    fn make_test_safety() -> SafetyGuard {
        let cfg = crate::config::Config::for_tests();
        let fetcher = crate::http_fetcher::HttpFetcher::new("test-agent").unwrap();
        let audit = Arc::new(crate::audit::AuditLog::new(false, 10));
        let instance_limiter = Arc::new(crate::rate_limit::InstanceLimiter::new(std::time::Duration::from_secs(5)));
        SafetyGuard::new(fetcher, &cfg, audit, instance_limiter)
    }
}
