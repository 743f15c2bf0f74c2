//! NodeInfo adapter: cross-server metadata discoverable at
//! `/.well-known/nodeinfo`, consulted first in the adapter-selection probe
//! (§4.6.6) because `software.name` is a structured, vendor-supplied field.

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

pub struct NodeInfoAdapter {
    safety: Arc<SafetyGuard>,
}

impl NodeInfoAdapter {
    pub fn new(safety: Arc<SafetyGuard>) -> Self {
        NodeInfoAdapter { safety }
    }

    async fn discover_document_url(&self, host: &str, principal: &str, ctx: &Context) -> Result<Url> {
        let discovery_url = Url::parse(&format!("https://{host}/.well-known/nodeinfo"))?;
        let accept = HeaderValue::from_static(ACCEPT_JSON);
        let response = self.safety.get(&discovery_url, &accept, principal, ctx).await?;
        if !response.is_success() {
            return Err(Error::NotSupported {
                operation: "instance_info".to_string(),
            });
        }
        let doc: serde_json::Value = response.json()?;
        let href = doc
            .get("links")
            .and_then(|v| v.as_array())
            .and_then(|links| links.last())
            .and_then(|link| link.get("href"))
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::NotSupported {
                operation: "instance_info".to_string(),
            })?;
        Url::parse(href).map_err(Error::from)
    }
}

fn software_from_name(name: &str) -> Software {
    match name.to_lowercase().as_str() {
        "mastodon" => Software::Mastodon,
        "pleroma" => Software::Pleroma,
        "akkoma" => Software::Akkoma,
        "pixelfed" => Software::Pixelfed,
        "misskey" => Software::Misskey,
        "lemmy" => Software::Lemmy,
        "peertube" => Software::PeerTube,
        _ => Software::Other,
    }
}

#[async_trait]
impl ProtocolAdapter for NodeInfoAdapter {
    fn name(&self) -> &'static str {
        "nodeinfo"
    }

    async fn instance_info(&self, host: &str, principal: &str, ctx: &Context) -> Result<Instance> {
        let document_url = self.discover_document_url(host, principal, ctx).await?;
        let accept = HeaderValue::from_static(ACCEPT_JSON);
        let response = self.safety.get(&document_url, &accept, principal, ctx).await?;
        if !response.is_success() {
            return Err(Error::NotSupported {
                operation: "instance_info".to_string(),
            });
        }
        let doc: serde_json::Value = response.json()?;
        let software_name = doc
            .get("software")
            .and_then(|v| v.get("name"))
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::NotSupported {
                operation: "instance_info".to_string(),
            })?;

        Ok(Instance {
            domain: host.to_string(),
            software: software_from_name(software_name),
            version: doc
                .get("software")
                .and_then(|v| v.get("version"))
                .and_then(|v| v.as_str())
                .map(str::to_string),
            description: doc
                .get("metadata")
                .and_then(|v| v.get("nodeDescription"))
                .and_then(|v| v.as_str())
                .map(str::to_string),
            user_count: doc
                .get("usage")
                .and_then(|v| v.get("users"))
                .and_then(|v| v.get("total"))
                .and_then(|v| v.as_u64()),
            post_count: doc
                .get("usage")
                .and_then(|v| v.get("localPosts"))
                .and_then(|v| v.as_u64()),
            domain_count: None,
            languages: Vec::new(),
            registration_open: doc.get("openRegistrations").and_then(|v| v.as_bool()),
            contact_account: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn software_from_name_known_families() {
        assert_eq!(software_from_name("Mastodon"), Software::Mastodon);
        assert_eq!(software_from_name("lemmy"), Software::Lemmy);
        assert_eq!(software_from_name("made-up"), Software::Other);
    }
}
