//! L0: typed configuration loaded once from the environment at process
//! start. Immutable thereafter — components that need different settings
//! construct a new [`Config`] and a new `Engine`.

use std::time::Duration;

use figment::providers::Env;
use figment::Figment;
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::models::{Account, BlockReason, InstanceBlock};

fn default_server_name() -> String {
    "activitypub-mcp".to_string()
}
fn default_server_version() -> String {
    "1.1.0".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_false() -> bool {
    false
}
fn default_true() -> bool {
    true
}
fn default_rate_limit_max() -> u64 {
    100
}
fn default_rate_limit_window_ms() -> u64 {
    900_000
}
fn default_request_timeout_ms() -> u64 {
    10_000
}
fn default_user_agent() -> String {
    "ActivityPub-MCP-Client/1.x".to_string()
}
fn default_audit_log_max_entries() -> usize {
    10_000
}
fn default_dynamic_instance_cache_ttl_ms() -> u64 {
    3_600_000
}
fn default_cache_ttl_actor_ms() -> u64 {
    300_000
}
fn default_max_concurrent_requests() -> usize {
    16
}
fn default_max_concurrent_per_instance() -> usize {
    4
}
fn default_instance_rate_limit_backoff_ceiling_ms() -> u64 {
    5_000
}
fn default_negative_cache_ttl_ms() -> u64 {
    60_000
}

/// Raw environment shape, deserialized by figment before validation and
/// parsing into [`Config`].
#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default = "default_server_name")]
    server_name: String,
    #[serde(default = "default_server_version")]
    server_version: String,
    #[serde(default = "default_log_level")]
    log_level: String,
    #[serde(default = "default_false")]
    rate_limit_enabled: bool,
    #[serde(default = "default_rate_limit_max")]
    rate_limit_max: u64,
    #[serde(default = "default_rate_limit_window_ms")]
    rate_limit_window_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    request_timeout_ms: u64,
    #[serde(default = "default_user_agent")]
    user_agent: String,
    #[serde(default)]
    blocked_instances: String,
    #[serde(default = "default_true")]
    instance_blocking_enabled: bool,
    #[serde(default = "default_true")]
    audit_log_enabled: bool,
    #[serde(default = "default_audit_log_max_entries")]
    audit_log_max_entries: usize,
    #[serde(default = "default_true")]
    respect_content_warnings: bool,
    #[serde(default)]
    activitypub_default_instance: Option<String>,
    #[serde(default)]
    activitypub_default_token: Option<String>,
    #[serde(default)]
    activitypub_default_username: Option<String>,
    #[serde(default)]
    activitypub_accounts: String,
    #[serde(default = "default_dynamic_instance_cache_ttl_ms")]
    dynamic_instance_cache_ttl_ms: u64,
    #[serde(default = "default_cache_ttl_actor_ms")]
    cache_ttl_actor_ms: u64,
    #[serde(default = "default_max_concurrent_requests")]
    max_concurrent_requests: usize,
    #[serde(default = "default_max_concurrent_per_instance")]
    max_concurrent_per_instance: usize,
    #[serde(default = "default_instance_rate_limit_backoff_ceiling_ms")]
    instance_rate_limit_backoff_ceiling_ms: u64,
    #[serde(default = "default_false")]
    allow_private_network_targets: bool,
    #[serde(default = "default_negative_cache_ttl_ms")]
    negative_cache_ttl_ms: u64,
}

/// Fully validated, immutable process configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub server_name: String,
    pub server_version: String,
    pub log_level: String,
    pub rate_limit_enabled: bool,
    pub rate_limit_max: u64,
    pub rate_limit_window: Duration,
    pub request_timeout: Duration,
    pub user_agent: String,
    pub blocked_instances: Vec<InstanceBlock>,
    pub instance_blocking_enabled: bool,
    pub audit_log_enabled: bool,
    pub audit_log_max_entries: usize,
    pub respect_content_warnings: bool,
    pub accounts: Vec<Account>,
    pub active_account_id: Option<String>,
    pub dynamic_instance_cache_ttl: Duration,
    pub cache_ttl_actor: Duration,
    pub max_concurrent_requests: usize,
    pub max_concurrent_per_instance: usize,
    pub instance_rate_limit_backoff_ceiling: Duration,
    pub allow_private_network_targets: bool,
    pub negative_cache_ttl: Duration,
}

impl Config {
    /// Load configuration from the process environment, applying defaults
    /// for every unset key, then validate.
    pub fn load() -> Result<Config> {
        let raw: RawConfig = Figment::new()
            .merge(Env::raw())
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;
        Config::from_raw(raw)
    }

    fn from_raw(raw: RawConfig) -> Result<Config> {
        let blocked_instances = parse_blocklist(&raw.blocked_instances)?;
        let (accounts, active_account_id) = parse_accounts(&raw)?;

        if raw.rate_limit_window_ms == 0 {
            return Err(Error::Config(
                "RATE_LIMIT_WINDOW_MS must be greater than zero".into(),
            ));
        }
        if raw.request_timeout_ms == 0 {
            return Err(Error::Config(
                "REQUEST_TIMEOUT_MS must be greater than zero".into(),
            ));
        }

        Ok(Config {
            server_name: raw.server_name,
            server_version: raw.server_version,
            log_level: raw.log_level,
            rate_limit_enabled: raw.rate_limit_enabled,
            rate_limit_max: raw.rate_limit_max,
            rate_limit_window: Duration::from_millis(raw.rate_limit_window_ms),
            request_timeout: Duration::from_millis(raw.request_timeout_ms),
            user_agent: raw.user_agent,
            blocked_instances,
            instance_blocking_enabled: raw.instance_blocking_enabled,
            audit_log_enabled: raw.audit_log_enabled,
            audit_log_max_entries: raw.audit_log_max_entries,
            respect_content_warnings: raw.respect_content_warnings,
            accounts,
            active_account_id,
            dynamic_instance_cache_ttl: Duration::from_millis(raw.dynamic_instance_cache_ttl_ms),
            cache_ttl_actor: Duration::from_millis(raw.cache_ttl_actor_ms),
            max_concurrent_requests: raw.max_concurrent_requests,
            max_concurrent_per_instance: raw.max_concurrent_per_instance,
            instance_rate_limit_backoff_ceiling: Duration::from_millis(
                raw.instance_rate_limit_backoff_ceiling_ms,
            ),
            allow_private_network_targets: raw.allow_private_network_targets,
            negative_cache_ttl: Duration::from_millis(raw.negative_cache_ttl_ms),
        })
    }

    #[cfg(test)]
    pub fn for_tests() -> Config {
        Config::from_raw(RawConfig {
            server_name: default_server_name(),
            server_version: default_server_version(),
            log_level: default_log_level(),
            rate_limit_enabled: false,
            rate_limit_max: default_rate_limit_max(),
            rate_limit_window_ms: default_rate_limit_window_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            user_agent: default_user_agent(),
            blocked_instances: String::new(),
            instance_blocking_enabled: true,
            audit_log_enabled: true,
            audit_log_max_entries: default_audit_log_max_entries(),
            respect_content_warnings: true,
            activitypub_default_instance: None,
            activitypub_default_token: None,
            activitypub_default_username: None,
            activitypub_accounts: String::new(),
            dynamic_instance_cache_ttl_ms: default_dynamic_instance_cache_ttl_ms(),
            cache_ttl_actor_ms: default_cache_ttl_actor_ms(),
            max_concurrent_requests: default_max_concurrent_requests(),
            max_concurrent_per_instance: default_max_concurrent_per_instance(),
            instance_rate_limit_backoff_ceiling_ms:
                default_instance_rate_limit_backoff_ceiling_ms(),
            allow_private_network_targets: false,
            negative_cache_ttl_ms: default_negative_cache_ttl_ms(),
        })
        .expect("default config must validate")
    }
}

/// Parse `BLOCKED_INSTANCES` as a comma-separated list of exact hosts or
/// `*.suffix` wildcards, each becoming a permanent `Policy` block entry.
fn parse_blocklist(raw: &str) -> Result<Vec<InstanceBlock>> {
    let now = chrono::Utc::now();
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|pattern| {
            if pattern.contains(' ') || pattern.is_empty() {
                return Err(Error::Config(format!(
                    "invalid blocklist pattern: {pattern:?}"
                )));
            }
            Ok(InstanceBlock {
                pattern: pattern.to_lowercase(),
                reason: BlockReason::Policy,
                description: None,
                added_at: now,
                added_by: Some("config".to_string()),
                expires_at: None,
            })
        })
        .collect()
}

/// Parse `ACTIVITYPUB_ACCOUNTS` (`id:instance:token:username,...`) plus the
/// single-account `ACTIVITYPUB_DEFAULT_*` triplet, merging both sources.
/// The single-account triplet, if present, becomes the active account.
fn parse_accounts(raw: &RawConfig) -> Result<(Vec<Account>, Option<String>)> {
    let mut accounts = Vec::new();
    let mut active = None;

    if let Some(instance) = &raw.activitypub_default_instance {
        let token = raw.activitypub_default_token.clone().ok_or_else(|| {
            Error::Config(
                "ACTIVITYPUB_DEFAULT_TOKEN is required when ACTIVITYPUB_DEFAULT_INSTANCE is set"
                    .into(),
            )
        })?;
        let id = "default".to_string();
        active = Some(id.clone());
        accounts.push(Account {
            id,
            instance: instance.clone(),
            token,
            username: raw.activitypub_default_username.clone(),
            scopes: Vec::new(),
        });
    }

    for record in raw.activitypub_accounts.split(',').map(str::trim) {
        if record.is_empty() {
            continue;
        }
        let fields: Vec<&str> = record.split(':').collect();
        let (id, instance, token, username) = match fields.as_slice() {
            [id, instance, token] => (*id, *instance, *token, None),
            [id, instance, token, username] => (*id, *instance, *token, Some(*username)),
            _ => {
                return Err(Error::Config(format!(
                    "invalid ACTIVITYPUB_ACCOUNTS record (expected id:instance:token[:username]): {record:?}"
                )))
            }
        };
        accounts.push(Account {
            id: id.to_string(),
            instance: instance.to_string(),
            token: token.to_string(),
            username: username.map(str::to_string),
            scopes: Vec::new(),
        });
        if active.is_none() {
            active = Some(id.to_string());
        }
    }

    Ok((accounts, active))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_loads_with_no_accounts() {
        let cfg = Config::for_tests();
        assert!(cfg.accounts.is_empty());
        assert!(cfg.active_account_id.is_none());
        assert_eq!(cfg.request_timeout, Duration::from_secs(10));
    }

    #[test]
    fn parse_blocklist_handles_exact_and_wildcard() {
        let entries = parse_blocklist("bad.example, *.spam.example").unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].pattern, "bad.example");
        assert_eq!(entries[1].pattern, "*.spam.example");
    }

    #[test]
    fn parse_blocklist_empty_is_empty() {
        assert!(parse_blocklist("").unwrap().is_empty());
    }

    #[test]
    fn parse_accounts_multi_account_string() {
        let raw = RawConfig {
            activitypub_accounts: "a:a.test:T1:alice,b:b.test:T2".to_string(),
            ..RawConfig {
                server_name: default_server_name(),
                server_version: default_server_version(),
                log_level: default_log_level(),
                rate_limit_enabled: false,
                rate_limit_max: default_rate_limit_max(),
                rate_limit_window_ms: default_rate_limit_window_ms(),
                request_timeout_ms: default_request_timeout_ms(),
                user_agent: default_user_agent(),
                blocked_instances: String::new(),
                instance_blocking_enabled: true,
                audit_log_enabled: true,
                audit_log_max_entries: default_audit_log_max_entries(),
                respect_content_warnings: true,
                activitypub_default_instance: None,
                activitypub_default_token: None,
                activitypub_default_username: None,
                activitypub_accounts: String::new(),
                dynamic_instance_cache_ttl_ms: default_dynamic_instance_cache_ttl_ms(),
                cache_ttl_actor_ms: default_cache_ttl_actor_ms(),
                max_concurrent_requests: default_max_concurrent_requests(),
                max_concurrent_per_instance: default_max_concurrent_per_instance(),
                instance_rate_limit_backoff_ceiling_ms:
                    default_instance_rate_limit_backoff_ceiling_ms(),
                allow_private_network_targets: false,
                negative_cache_ttl_ms: default_negative_cache_ttl_ms(),
            }
        };
        let (accounts, active) = parse_accounts(&raw).unwrap();
        assert_eq!(accounts.len(), 2);
        assert_eq!(active.as_deref(), Some("a"));
        assert_eq!(accounts[1].username, None);
    }

    #[test]
    fn parse_accounts_rejects_malformed_record() {
        let mut raw_base = RawConfig {
            server_name: default_server_name(),
            server_version: default_server_version(),
            log_level: default_log_level(),
            rate_limit_enabled: false,
            rate_limit_max: default_rate_limit_max(),
            rate_limit_window_ms: default_rate_limit_window_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            user_agent: default_user_agent(),
            blocked_instances: String::new(),
            instance_blocking_enabled: true,
            audit_log_enabled: true,
            audit_log_max_entries: default_audit_log_max_entries(),
            respect_content_warnings: true,
            activitypub_default_instance: None,
            activitypub_default_token: None,
            activitypub_default_username: None,
            activitypub_accounts: String::new(),
            dynamic_instance_cache_ttl_ms: default_dynamic_instance_cache_ttl_ms(),
            cache_ttl_actor_ms: default_cache_ttl_actor_ms(),
            max_concurrent_requests: default_max_concurrent_requests(),
            max_concurrent_per_instance: default_max_concurrent_per_instance(),
            instance_rate_limit_backoff_ceiling_ms:
                default_instance_rate_limit_backoff_ceiling_ms(),
            allow_private_network_targets: false,
            negative_cache_ttl_ms: default_negative_cache_ttl_ms(),
        };
        raw_base.activitypub_accounts = "justanid".to_string();
        assert!(parse_accounts(&raw_base).is_err());
    }
}
