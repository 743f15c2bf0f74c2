//! Bounded-concurrency batch operations (`batch-fetch-actors`,
//! `batch-fetch-posts`). Every item is isolated: one failure never aborts
//! the batch, and the orchestration itself only fails if the request is
//! malformed (empty or oversized) or the deadline is cancelled up front.

use futures::stream::{self, StreamExt};
use serde::Serialize;

use crate::clock::Context;
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::models::{Actor, Post};
use crate::pagination::Bounds;

const DEFAULT_CONCURRENCY: usize = 5;
const MAX_BATCH_SIZE: usize = 20;

/// One item's outcome in a batch result.
#[derive(Debug, Clone, Serialize)]
pub struct BatchError {
    pub id: String,
    pub kind: String,
}

/// The `{ok[], err[]}` shape every batch operation returns (E6).
#[derive(Debug, Clone, Serialize)]
pub struct BatchResult<T> {
    pub ok: Vec<T>,
    pub err: Vec<BatchError>,
}

fn error_kind(error: &Error) -> String {
    match error {
        Error::ActorNotFound { .. } => "ActorNotFound".to_string(),
        Error::ActorNotDiscoverable { .. } => "ActorNotDiscoverable".to_string(),
        Error::ActorUnavailable { .. } => "ActorUnavailable".to_string(),
        Error::ActorMalformed { .. } => "ActorMalformed".to_string(),
        Error::ActorUnreachable { .. } => "ActorUnreachable".to_string(),
        Error::Cancelled => "cancelled".to_string(),
        other => other.to_string(),
    }
}

fn check_batch_size(items: &[String]) -> Result<()> {
    if items.is_empty() {
        return Err(Error::InvalidInput {
            field: "identifiers".to_string(),
            message: "batch must contain at least one item".to_string(),
        });
    }
    if items.len() > MAX_BATCH_SIZE {
        return Err(Error::InvalidInput {
            field: "identifiers".to_string(),
            message: format!("batch of {} exceeds the maximum of {MAX_BATCH_SIZE}", items.len()),
        });
    }
    Ok(())
}

impl Engine {
    /// `batch-fetch-actors`: resolve up to 20 identifiers with bounded
    /// fan-out, isolating per-item failures.
    pub async fn batch_fetch_actors(
        &self,
        identifiers: Vec<String>,
        caller: &str,
        ctx: &Context,
    ) -> Result<BatchResult<Actor>> {
        check_batch_size(&identifiers)?;

        let results: Vec<(String, Result<Actor>)> = stream::iter(identifiers)
            .map(|identifier| async move {
                if ctx.is_cancelled() {
                    return (identifier, Err(Error::Cancelled));
                }
                let result = self.discover_actor(&identifier, caller, ctx).await;
                (identifier, result)
            })
            .buffer_unordered(DEFAULT_CONCURRENCY)
            .collect()
            .await;

        let mut ok = Vec::new();
        let mut err = Vec::new();
        for (identifier, result) in results {
            match result {
                Ok(actor) => ok.push(actor),
                Err(e) => err.push(BatchError {
                    id: identifier,
                    kind: error_kind(&e),
                }),
            }
        }
        Ok(BatchResult { ok, err })
    }

    /// `batch-fetch-posts`: fetch each actor's timeline, isolating per-item
    /// failures the same way as `batch-fetch-actors`.
    pub async fn batch_fetch_posts(
        &self,
        identifiers: Vec<String>,
        caller: &str,
        ctx: &Context,
    ) -> Result<BatchResult<Vec<Post>>> {
        check_batch_size(&identifiers)?;

        let results: Vec<(String, Result<Vec<Post>>)> = stream::iter(identifiers)
            .map(|identifier| async move {
                if ctx.is_cancelled() {
                    return (identifier, Err(Error::Cancelled));
                }
                let result = self
                    .fetch_timeline(&identifier, Bounds::default(), caller, ctx)
                    .await
                    .map(|page| page.items);
                (identifier, result)
            })
            .buffer_unordered(DEFAULT_CONCURRENCY)
            .collect()
            .await;

        let mut ok = Vec::new();
        let mut err = Vec::new();
        for (identifier, result) in results {
            match result {
                Ok(posts) => ok.push(posts),
                Err(e) => err.push(BatchError {
                    id: identifier,
                    kind: error_kind(&e),
                }),
            }
        }
        Ok(BatchResult { ok, err })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_batch() {
        assert!(check_batch_size(&[]).is_err());
    }

    #[test]
    fn rejects_oversized_batch() {
        let items: Vec<String> = (0..21).map(|i| format!("user{i}@example.test")).collect();
        assert!(check_batch_size(&items).is_err());
    }

    #[test]
    fn accepts_max_size_batch() {
        let items: Vec<String> = (0..20).map(|i| format!("user{i}@example.test")).collect();
        assert!(check_batch_size(&items).is_ok());
    }
}
