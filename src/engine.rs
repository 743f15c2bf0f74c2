//! The composition root: `Engine` owns every L2-L10 component behind an
//! `Arc`, built once via `EngineBuilder`. Modeled on the teacher's
//! `AppState`/`AppStateBuilder` pattern: an `Arc`-wrapped config plus
//! lazily-assembled shared resources, constructed once at startup.

use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::accounts::AccountRegistry;
use crate::adapters::AdapterSelector;
use crate::audit::AuditLog;
use crate::config::Config;
use crate::error::Result;
use crate::health::HealthMonitor;
use crate::http_fetcher::HttpFetcher;
use crate::rate_limit::RateLimitGovernor;
use crate::resolver::ActorResolver;
use crate::safety::SafetyGuard;

/// Owns the fully wired pipeline. Cheap to clone (every field is an `Arc`).
#[derive(Clone)]
pub struct Engine {
    pub(crate) config: Arc<Config>,
    pub(crate) safety: Arc<SafetyGuard>,
    pub(crate) governor: Arc<RateLimitGovernor>,
    pub(crate) resolver: Arc<ActorResolver>,
    pub(crate) adapters: Arc<AdapterSelector>,
    pub(crate) accounts: Arc<AccountRegistry>,
    pub(crate) audit: Arc<AuditLog>,
    pub(crate) health: Arc<HealthMonitor>,
    pub(crate) global_concurrency: Arc<Semaphore>,
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    /// Build an `Engine` from environment-loaded configuration — the usual
    /// entry point for a deployed process.
    pub fn from_env() -> Result<Engine> {
        let config = Config::load()?;
        EngineBuilder::default().with_config(config).build()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    pub fn health(&self) -> &HealthMonitor {
        &self.health
    }

    pub fn accounts(&self) -> &AccountRegistry {
        &self.accounts
    }
}

/// Builder for [`Engine`], mirroring the teacher's `AppStateBuilder`
/// type-state-free builder style.
#[derive(Default)]
pub struct EngineBuilder {
    config: Option<Config>,
}

impl EngineBuilder {
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    pub fn build(self) -> Result<Engine> {
        let config = match self.config {
            Some(config) => config,
            None => Config::load()?,
        };
        let config = Arc::new(config);

        let fetcher = HttpFetcher::new(config.user_agent.clone())?;
        let audit = Arc::new(AuditLog::new(config.audit_log_enabled, config.audit_log_max_entries));
        let governor = Arc::new(RateLimitGovernor::new(
            config.rate_limit_enabled,
            config.rate_limit_max,
            config.rate_limit_window,
            config.instance_rate_limit_backoff_ceiling,
        ));
        let safety = Arc::new(SafetyGuard::new(
            fetcher,
            &config,
            audit.clone(),
            governor.instance.clone(),
        ));
        let resolver = Arc::new(ActorResolver::new(
            safety.clone(),
            config.cache_ttl_actor,
            config.negative_cache_ttl,
        ));
        let adapters = Arc::new(AdapterSelector::new(safety.clone(), config.negative_cache_ttl));
        let accounts = Arc::new(AccountRegistry::new(
            config.accounts.clone(),
            config.active_account_id.clone(),
        ));
        let health = Arc::new(HealthMonitor::new(1000));
        let global_concurrency = Arc::new(Semaphore::new(config.max_concurrent_requests));

        Ok(Engine {
            config,
            safety,
            governor,
            resolver,
            adapters,
            accounts,
            audit,
            health,
            global_concurrency,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_with_test_config_succeeds() {
        let engine = EngineBuilder::default()
            .with_config(Config::for_tests())
            .build()
            .unwrap();
        assert!(engine.accounts().list_accounts().is_empty());
        assert_eq!(engine.health().get_metrics().total_requests, 0);
    }
}
