//! Export operations: render a page of posts into JSON, Markdown, or CSV.
//! The core renders in memory over whatever page the caller already holds;
//! a caller that wants a whole feed drives [`crate::engine::Engine`]'s
//! pagination itself, page by page, and appends each page's rendering.

use std::fmt::Write as _;

use crate::error::{Error, Result};
use crate::models::Post;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Markdown,
    Csv,
}

impl ExportFormat {
    pub fn parse(name: &str) -> Result<ExportFormat> {
        match name.to_ascii_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "markdown" | "md" => Ok(ExportFormat::Markdown),
            "csv" => Ok(ExportFormat::Csv),
            other => Err(Error::InvalidInput {
                field: "format".to_string(),
                message: format!("unsupported export format: {other}"),
            }),
        }
    }
}

/// Render `posts` into the requested format.
pub fn render(posts: &[Post], format: ExportFormat) -> Result<String> {
    match format {
        ExportFormat::Json => render_json(posts),
        ExportFormat::Markdown => Ok(render_markdown(posts)),
        ExportFormat::Csv => Ok(render_csv(posts)),
    }
}

fn render_json(posts: &[Post]) -> Result<String> {
    serde_json::to_string_pretty(posts).map_err(Error::from)
}

fn render_markdown(posts: &[Post]) -> String {
    let mut out = String::new();
    for post in posts {
        let _ = writeln!(out, "### {} ({})", post.author.acct, post.published.to_rfc3339());
        let _ = writeln!(out);
        let _ = writeln!(out, "{}", post.content_text);
        let _ = writeln!(out);
        let _ = writeln!(out, "<{}>", post.url);
        let _ = writeln!(out);
    }
    out
}

fn csv_field(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn render_csv(posts: &[Post]) -> String {
    let mut out = String::from("id,published,author,visibility,content_text,url\n");
    for post in posts {
        let visibility = match post.visibility {
            crate::models::Visibility::Public => "public",
            crate::models::Visibility::Unlisted => "unlisted",
            crate::models::Visibility::FollowersOnly => "followers_only",
            crate::models::Visibility::Direct => "direct",
        };
        let _ = writeln!(
            out,
            "{},{},{},{},{},{}",
            csv_field(&post.id),
            csv_field(&post.published.to_rfc3339()),
            csv_field(&post.author.acct),
            csv_field(visibility),
            csv_field(&post.content_text),
            csv_field(post.url.as_str()),
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Actor, Visibility};
    use chrono::Utc;
    use url::Url;

    fn sample_post() -> Post {
        Post {
            id: "1".to_string(),
            url: Url::parse("https://example.test/posts/1").unwrap(),
            author: Actor {
                acct: "alice@example.test".to_string(),
                url: Url::parse("https://example.test/users/alice").unwrap(),
                preferred_username: "alice".to_string(),
                display_name: None,
                summary_html: None,
                summary_text: None,
                avatar_url: None,
                inbox: Url::parse("https://example.test/users/alice/inbox").unwrap(),
                outbox: Url::parse("https://example.test/users/alice/outbox").unwrap(),
                followers: None,
                following: None,
                shared_inbox: None,
                public_key_pem: None,
            },
            content_html: "<p>hello, world</p>".to_string(),
            content_text: "hello, world".to_string(),
            spoiler_text: String::new(),
            visibility: Visibility::Public,
            published: Utc::now(),
            in_reply_to: None,
            replies_count: 0,
            reblogs_count: 0,
            favourites_count: 0,
            media_attachments: vec![],
            poll: None,
            language: None,
        }
    }

    #[test]
    fn json_export_is_a_top_level_array() {
        let rendered = render(&[sample_post()], ExportFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&rendered).unwrap();
        assert!(value.is_array());
    }

    #[test]
    fn markdown_export_uses_level_three_heading() {
        let rendered = render(&[sample_post()], ExportFormat::Markdown).unwrap();
        assert!(rendered.starts_with("### alice@example.test"));
    }

    #[test]
    fn csv_export_has_expected_columns() {
        let rendered = render(&[sample_post()], ExportFormat::Csv).unwrap();
        let header = rendered.lines().next().unwrap();
        assert_eq!(header, "id,published,author,visibility,content_text,url");
    }

    #[test]
    fn csv_export_quotes_fields_with_commas() {
        let mut post = sample_post();
        post.content_text = "hello, world".to_string();
        let rendered = render(&[post], ExportFormat::Csv).unwrap();
        assert!(rendered.contains("\"hello, world\""));
    }

    #[test]
    fn parse_rejects_unknown_format() {
        assert!(ExportFormat::parse("yaml").is_err());
    }
}
