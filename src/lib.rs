//! # activitypub-gateway-core
//!
//! A federation client engine for the fediverse: WebFinger/ActivityPub actor
//! resolution, NodeInfo/Mastodon-API/Misskey/Lemmy instance discovery,
//! cursor-based pagination normalization, SSRF-safe outbound fetching, and
//! adaptive per-instance rate limiting, behind one typed operation surface.
//!
//! This crate speaks *to* the fediverse as a client; it does not implement
//! a federated server, outbound delivery, or HTTP message signatures (see
//! the design notes for the full non-goal list).
//!
//! ## Example
//!
//! ```rust,no_run
//! use activitypub_gateway_core::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let engine = Engine::from_env()?;
//!     let ctx = Context::new(std::time::Duration::from_secs(10));
//!     let actor = engine.discover_actor("gargron@mastodon.social", "cli", &ctx).await?;
//!     println!("{}", actor.acct);
//!     Ok(())
//! }
//! ```

pub mod accounts;
pub mod adapters;
pub mod audit;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod health;
pub mod html;
pub mod http_fetcher;
pub mod models;
pub mod observability;
pub mod operations;
pub mod pagination;
pub mod rate_limit;
pub mod resolver;
pub mod safety;

/// Convenient re-exports for the common case: build an [`engine::Engine`]
/// and call its operations.
pub mod prelude {
    pub use crate::accounts::AccountRegistry;
    pub use crate::clock::{Context, Deadline};
    pub use crate::config::Config;
    pub use crate::engine::{Engine, EngineBuilder};
    pub use crate::error::{Error, Result};
    pub use crate::health::{HealthMonitor, HealthReport, Metrics, OverallStatus};
    pub use crate::models::{
        Account, Actor, AuditRecord, Cursor, Instance, MediaUpload, Page, Poll, Post, ScheduledPost, Software,
        Visibility,
    };
    pub use crate::observability::init_tracing;
    pub use crate::operations::batch::{BatchError, BatchResult};
    pub use crate::operations::export::{render as render_export, ExportFormat};
    pub use crate::pagination::Bounds;

    pub use tracing::{debug, error, info, warn};
}
