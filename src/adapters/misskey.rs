//! Misskey adapter: instance metadata via `POST /api/meta` — note the
//! `POST` quirk, unlike every other adapter's `GET`-based instance probe.

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

pub struct MisskeyAdapter {
    safety: Arc<SafetyGuard>,
}

impl MisskeyAdapter {
    pub fn new(safety: Arc<SafetyGuard>) -> Self {
        MisskeyAdapter { safety }
    }
}

#[async_trait]
impl ProtocolAdapter for MisskeyAdapter {
    fn name(&self) -> &'static str {
        "misskey"
    }

    async fn instance_info(&self, host: &str, principal: &str, ctx: &Context) -> Result<Instance> {
        let url = Url::parse(&format!("https://{host}/api/meta"))?;
        let accept = HeaderValue::from_static(ACCEPT_JSON);
        let response = self
            .safety
            .post_json(&url, &accept, serde_json::json!({}), principal, ctx)
            .await?;
        if !response.is_success() {
            return Err(Error::NotSupported {
                operation: "instance_info".to_string(),
            });
        }
        let doc: serde_json::Value = response.json()?;
        // Misskey's /api/meta has no discriminating field in common with
        // unrelated JSON APIs other than this set together; require at
        // least one Misskey-specific key to avoid false-positive matches.
        if doc.get("maintainerName").is_none() && doc.get("features").is_none() {
            return Err(Error::NotSupported {
                operation: "instance_info".to_string(),
            });
        }
        Ok(Instance {
            domain: host.to_string(),
            software: Software::Misskey,
            version: doc.get("version").and_then(|v| v.as_str()).map(str::to_string),
            description: doc.get("description").and_then(|v| v.as_str()).map(str::to_string),
            user_count: None,
            post_count: None,
            domain_count: None,
            languages: Vec::new(),
            registration_open: doc
                .get("disableRegistration")
                .and_then(|v| v.as_bool())
                .map(|disabled| !disabled),
            contact_account: doc
                .get("maintainerName")
                .and_then(|v| v.as_str())
                .map(str::to_string),
        })
    }
}
