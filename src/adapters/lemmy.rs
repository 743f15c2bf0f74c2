//! Lemmy adapter: instance metadata via `GET /api/v3/site`.

use std::sync::Arc;

use async_trait::async_trait;
use http::HeaderValue;
use reqwest::Url;

use super::ProtocolAdapter;
use crate::clock::Context;
use crate::error::{Error, Result};
use crate::models::{Instance, Software};
use crate::safety::SafetyGuard;

const ACCEPT_JSON: &str = "application/json";

pub struct LemmyAdapter {
    safety: Arc<SafetyGuard>,
}

impl LemmyAdapter {
    pub fn new(safety: Arc<SafetyGuard>) -> Self {
        LemmyAdapter { safety }
    }
}

#[async_trait]
impl ProtocolAdapter for LemmyAdapter {
    fn name(&self) -> &'static str {
        "lemmy"
    }

    async fn instance_info(&self, host: &str, principal: &str, ctx: &Context) -> Result<Instance> {
        let url = Url::parse(&format!("https://{host}/api/v3/site"))?;
        let accept = HeaderValue::from_static(ACCEPT_JSON);
        let response = self.safety.get(&url, &accept, principal, ctx).await?;
        if !response.is_success() {
            return Err(Error::NotSupported {
                operation: "instance_info".to_string(),
            });
        }
        let doc: serde_json::Value = response.json()?;
        let site_view = doc
            .get("site_view")
            .ok_or_else(|| Error::NotSupported {
                operation: "instance_info".to_string(),
            })?;
        let site = site_view.get("site").ok_or_else(|| Error::NotSupported {
            operation: "instance_info".to_string(),
        })?;
        let counts = site_view.get("counts");

        Ok(Instance {
            domain: host.to_string(),
            software: Software::Lemmy,
            version: doc.get("version").and_then(|v| v.as_str()).map(str::to_string),
            description: site.get("description").and_then(|v| v.as_str()).map(str::to_string),
            user_count: counts
                .and_then(|c| c.get("users"))
                .and_then(|v| v.as_u64()),
            post_count: counts
                .and_then(|c| c.get("posts"))
                .and_then(|v| v.as_u64()),
            domain_count: None,
            languages: Vec::new(),
            registration_open: site_view
                .get("local_site")
                .and_then(|v| v.get("registration_mode"))
                .and_then(|v| v.as_str())
                .map(|mode| mode != "closed"),
            contact_account: None,
        })
    }
}
