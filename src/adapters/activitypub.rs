//! ActivityPub/ActivityStreams adapter. The fallback for cross-family
//! operations and the authority for actor and Collection fetches.

use std::sync::Arc;

use async_trait::async_trait;
use http::HeaderValue;
use reqwest::Url;

use super::ProtocolAdapter;
use crate::clock::Context;
use crate::error::{Error, Result};
use crate::models::{Actor, MediaAttachment, Page, Post, Visibility};
use crate::pagination::{self, Bounds};
use crate::safety::SafetyGuard;

const ACCEPT: &str = "application/activity+json, application/ld+json; profile=\"https://www.w3.org/ns/activitystreams\"";

pub struct ActivityPubAdapter {
    safety: Arc<SafetyGuard>,
}

impl ActivityPubAdapter {
    pub fn new(safety: Arc<SafetyGuard>) -> Self {
        ActivityPubAdapter { safety }
    }

    /// Fetch and normalize one page of an outbox/followers/following
    /// Collection or CollectionPage, recognizing the ActivityPub-next
    /// pagination scheme (§4.5).
    pub async fn fetch_collection_page(
        &self,
        url: &Url,
        principal: &str,
        ctx: &Context,
    ) -> Result<Page<serde_json::Value>> {
        let accept = HeaderValue::from_static(ACCEPT);
        let response = self.safety.get(url, &accept, principal, ctx).await?;

        if !response.is_success() {
            return Err(Error::ClientError {
                host: url.host_str().unwrap_or("").to_string(),
                status: response.status,
            });
        }

        let doc: serde_json::Value = response.json()?;
        let items = doc
            .get("orderedItems")
            .or_else(|| doc.get("items"))
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();
        let next_cursor = pagination::cursor_from_activitypub_next(&doc);

        Ok(Page {
            items,
            next_cursor,
            prev_cursor: None,
            total_items: doc.get("totalItems").and_then(|v| v.as_u64()),
            has_more: doc.get("next").is_some(),
        })
    }

    /// Normalize a single ActivityPub Note/Article object into a [`Post`].
    pub fn normalize_note(&self, doc: &serde_json::Value, author: Actor) -> Result<Post> {
        let malformed = |m: &str| Error::ActorMalformed {
            identifier: author.acct.clone(),
            message: m.to_string(),
        };
        let id = doc
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| malformed("note missing id"))?;
        let url = Url::parse(id)?;
        let content_html = doc
            .get("content")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();
        let content_text = crate::html::strip(&content_html);
        let published = doc
            .get("published")
            .and_then(|v| v.as_str())
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&chrono::Utc))
            .unwrap_or_else(chrono::Utc::now);

        let media_attachments = doc
            .get("attachment")
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| {
                        let url = item.get("url").and_then(|v| v.as_str())?;
                        Some(MediaAttachment {
                            kind: item
                                .get("mediaType")
                                .and_then(|v| v.as_str())
                                .unwrap_or("")
                                .to_string(),
                            url: Url::parse(url).ok()?,
                            alt_text: item.get("name").and_then(|v| v.as_str()).map(str::to_string),
                            focus: None,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(Post {
            id: id.to_string(),
            url,
            author,
            content_html,
            content_text,
            spoiler_text: doc
                .get("summary")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string(),
            visibility: infer_visibility(doc),
            published,
            in_reply_to: doc
                .get("inReplyTo")
                .and_then(|v| v.as_str())
                .and_then(|s| Url::parse(s).ok()),
            replies_count: 0,
            reblogs_count: 0,
            favourites_count: 0,
            media_attachments,
            poll: None,
            language: None,
        })
    }
}

fn infer_visibility(doc: &serde_json::Value) -> Visibility {
    const PUBLIC: &str = "https://www.w3.org/ns/activitystreams#Public";
    let contains_public = |field: &str| {
        doc.get(field)
            .and_then(|v| v.as_array())
            .map(|arr| arr.iter().any(|v| v.as_str() == Some(PUBLIC)))
            .unwrap_or(false)
    };
    if contains_public("to") {
        Visibility::Public
    } else if contains_public("cc") {
        Visibility::Unlisted
    } else {
        Visibility::Direct
    }
}

#[async_trait]
impl ProtocolAdapter for ActivityPubAdapter {
    fn name(&self) -> &'static str {
        "activitypub"
    }

    async fn account_statuses(
        &self,
        _host: &str,
        actor: &crate::models::Actor,
        bounds: Bounds,
        principal: &str,
        ctx: &Context,
    ) -> Result<Page<Post>> {
        let mut url = actor.outbox.clone();
        bounds.apply_to(&mut url);
        let raw_page = self.fetch_collection_page(&url, principal, ctx).await?;
        let items = raw_page
            .items
            .into_iter()
            .filter_map(|item| self.normalize_note(&item, actor.clone()).ok())
            .collect();
        Ok(Page {
            items,
            next_cursor: raw_page.next_cursor,
            prev_cursor: raw_page.prev_cursor,
            total_items: raw_page.total_items,
            has_more: raw_page.has_more,
        })
    }
}
