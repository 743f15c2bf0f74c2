//! L2: the sole outbound-call primitive. One shared `reqwest::Client` for
//! the process lifetime; every call applies a deadline, carries the
//! configured User-Agent, and classifies the response without retrying.

use std::str::FromStr;
use std::time::Duration;

use http::HeaderValue;
use reqwest::{Method, Url};

use crate::clock::Context;
use crate::error::{Error, Result};

/// Rate-limit headers observed on a response, if present.
#[derive(Debug, Clone, Default)]
pub struct RateLimitHeaders {
    pub limit: Option<u64>,
    pub remaining: Option<u64>,
    pub reset: Option<chrono::DateTime<chrono::Utc>>,
}

/// Pagination `Link` header targets, if present.
#[derive(Debug, Clone, Default)]
pub struct LinkHeaders {
    pub next: Option<String>,
    pub prev: Option<String>,
}

/// The outcome of one HTTP call, classified but not yet interpreted by the
/// caller.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: u16,
    pub headers: http::HeaderMap,
    pub body: bytes::Bytes,
    pub wall_duration: Duration,
    pub rate_limit: RateLimitHeaders,
    pub links: LinkHeaders,
    pub retry_after: Option<Duration>,
}

impl FetchResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_redirect(&self) -> bool {
        (300..400).contains(&self.status)
    }

    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status)
    }

    pub fn is_server_error(&self) -> bool {
        (500..600).contains(&self.status)
    }

    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(Error::from)
    }
}

/// A single, process-wide HTTP client wrapper.
#[derive(Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    user_agent: String,
}

impl HttpFetcher {
    pub fn new(user_agent: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::Internal(format!("failed to build HTTP client: {e}")))?;
        Ok(HttpFetcher {
            client,
            user_agent: user_agent.into(),
        })
    }

    /// Issue a GET with the given Accept header, enforcing `ctx`'s deadline
    /// and cancellation.
    pub async fn get(&self, url: &Url, accept: &HeaderValue, ctx: &Context) -> Result<FetchResponse> {
        self.request(Method::GET, url, accept, None, None, ctx).await
    }

    /// Issue a GET carrying an `Authorization` header, for authenticated
    /// reads (e.g. verify_credentials, home timeline).
    pub async fn get_authed(
        &self,
        url: &Url,
        accept: &HeaderValue,
        authorization: HeaderValue,
        ctx: &Context,
    ) -> Result<FetchResponse> {
        self.request(Method::GET, url, accept, None, Some(authorization), ctx)
            .await
    }

    /// Issue a POST with a JSON body, enforcing `ctx`'s deadline and
    /// cancellation.
    pub async fn post_json(
        &self,
        url: &Url,
        accept: &HeaderValue,
        body: serde_json::Value,
        ctx: &Context,
    ) -> Result<FetchResponse> {
        self.request(Method::POST, url, accept, Some(body), None, ctx).await
    }

    /// Issue a POST with a JSON body and an `Authorization` header, for
    /// authenticated write operations (post-status, vote, follow, ...).
    pub async fn post_json_authed(
        &self,
        url: &Url,
        accept: &HeaderValue,
        body: serde_json::Value,
        authorization: HeaderValue,
        ctx: &Context,
    ) -> Result<FetchResponse> {
        self.request(Method::POST, url, accept, Some(body), Some(authorization), ctx)
            .await
    }

    /// Issue a multipart POST carrying an `Authorization` header, for media
    /// upload. `form` is caller-assembled since field composition (file
    /// bytes, filename, content type) is a per-call concern.
    pub async fn post_multipart_authed(
        &self,
        url: &Url,
        accept: &HeaderValue,
        form: reqwest::multipart::Form,
        authorization: HeaderValue,
        ctx: &Context,
    ) -> Result<FetchResponse> {
        let host = url.host_str().unwrap_or("").to_string();
        if url.scheme() != "https" {
            return Err(Error::SchemeRejected { host });
        }

        let builder = self
            .client
            .post(url.clone())
            .header(http::header::USER_AGENT, &self.user_agent)
            .header(http::header::ACCEPT, accept.clone())
            .header(http::header::AUTHORIZATION, authorization)
            .multipart(form);

        let host_for_err = host.clone();
        let started = tokio::time::Instant::now();
        let response = ctx
            .run(&host, builder.send())
            .await?
            .map_err(|e| Error::from_reqwest(host_for_err, e))?;
        Self::classify(&host, response, started).await
    }

    async fn request(
        &self,
        method: Method,
        url: &Url,
        accept: &HeaderValue,
        body: Option<serde_json::Value>,
        authorization: Option<HeaderValue>,
        ctx: &Context,
    ) -> Result<FetchResponse> {
        let host = url.host_str().unwrap_or("").to_string();
        if url.scheme() != "https" {
            return Err(Error::SchemeRejected { host });
        }

        let mut builder = self
            .client
            .request(method, url.clone())
            .header(http::header::USER_AGENT, &self.user_agent)
            .header(http::header::ACCEPT, accept.clone());
        if let Some(authorization) = authorization {
            builder = builder.header(http::header::AUTHORIZATION, authorization);
        }
        if let Some(body) = body {
            builder = builder.json(&body);
        }

        let host_for_err = host.clone();
        let started = tokio::time::Instant::now();
        let send_fut = builder.send();
        let response = ctx
            .run(&host, send_fut)
            .await?
            .map_err(|e| Error::from_reqwest(host_for_err, e))?;
        Self::classify(&host, response, started).await
    }

    async fn classify(host: &str, response: reqwest::Response, started: tokio::time::Instant) -> Result<FetchResponse> {
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let rate_limit = parse_rate_limit_headers(&headers);
        let links = parse_link_header(&headers);
        let retry_after = parse_retry_after(&headers);

        let body = response
            .bytes()
            .await
            .map_err(|e| Error::from_reqwest(host.to_string(), e))?;
        let wall_duration = started.elapsed();

        Ok(FetchResponse {
            status,
            headers,
            body,
            wall_duration,
            rate_limit,
            links,
            retry_after,
        })
    }
}

fn parse_rate_limit_headers(headers: &http::HeaderMap) -> RateLimitHeaders {
    let limit = header_u64(headers, "x-ratelimit-limit");
    let remaining = header_u64(headers, "x-ratelimit-remaining");
    let reset = headers
        .get("x-ratelimit-reset")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&chrono::Utc));
    RateLimitHeaders {
        limit,
        remaining,
        reset,
    }
}

fn header_u64(headers: &http::HeaderMap, name: &str) -> Option<u64> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| u64::from_str(s).ok())
}

/// Parse a `Link: <url>; rel="next", <url>; rel="prev"` header.
fn parse_link_header(headers: &http::HeaderMap) -> LinkHeaders {
    let mut out = LinkHeaders::default();
    let Some(raw) = headers.get(http::header::LINK).and_then(|v| v.to_str().ok()) else {
        return out;
    };
    for part in raw.split(',') {
        let mut segments = part.split(';');
        let Some(url_segment) = segments.next() else {
            continue;
        };
        let url = url_segment.trim().trim_start_matches('<').trim_end_matches('>');
        for attr in segments {
            let attr = attr.trim();
            if let Some(rel) = attr.strip_prefix("rel=") {
                let rel = rel.trim_matches('"');
                match rel {
                    "next" => out.next = Some(url.to_string()),
                    "prev" | "previous" => out.prev = Some(url.to_string()),
                    _ => {}
                }
            }
        }
    }
    out
}

fn parse_retry_after(headers: &http::HeaderMap) -> Option<Duration> {
    headers
        .get(http::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{HeaderMap, HeaderValue as HV};

    #[test]
    fn parses_link_header_next_and_prev() {
        let mut headers = HeaderMap::new();
        headers.insert(
            http::header::LINK,
            HV::from_static(
                "<https://example.test/a?max_id=5>; rel=\"next\", <https://example.test/a?min_id=10>; rel=\"prev\"",
            ),
        );
        let links = parse_link_header(&headers);
        assert_eq!(links.next.as_deref(), Some("https://example.test/a?max_id=5"));
        assert_eq!(links.prev.as_deref(), Some("https://example.test/a?min_id=10"));
    }

    #[test]
    fn missing_link_header_yields_empty() {
        let headers = HeaderMap::new();
        let links = parse_link_header(&headers);
        assert!(links.next.is_none() && links.prev.is_none());
    }

    #[test]
    fn parses_rate_limit_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("x-ratelimit-limit", HV::from_static("300"));
        headers.insert("x-ratelimit-remaining", HV::from_static("0"));
        headers.insert("x-ratelimit-reset", HV::from_static("2024-01-01T00:00:00Z"));
        let parsed = parse_rate_limit_headers(&headers);
        assert_eq!(parsed.limit, Some(300));
        assert_eq!(parsed.remaining, Some(0));
        assert!(parsed.reset.is_some());
    }

    #[test]
    fn parses_retry_after() {
        let mut headers = HeaderMap::new();
        headers.insert(http::header::RETRY_AFTER, HV::from_static("7"));
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(7)));
    }

    #[tokio::test]
    async fn rejects_non_https_scheme() {
        let fetcher = HttpFetcher::new("test-agent/1.0").unwrap();
        let url = Url::parse("http://example.test/foo").unwrap();
        let ctx = Context::new(Duration::from_secs(5));
        let accept = HeaderValue::from_static("application/json");
        let result = fetcher.get(&url, &accept, &ctx).await;
        assert!(matches!(result, Err(Error::SchemeRejected { .. })));
    }
}
