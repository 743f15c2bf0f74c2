//! Bounded, tamper-evident audit trail. Every outbound call emits exactly
//! one record, redacted before storage and chained by BLAKE3 hash to its
//! predecessor so a later verifier can detect truncation or in-place edits.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::models::{AuditEventKind, AuditRecord};

static REDACT_KEY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)password|token|secret|key|auth|credential").unwrap()
});

/// Replace the value of any object key matching the redaction pattern with
/// `"<redacted>"`, recursively over nested structures.
pub fn redact(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                if REDACT_KEY_RE.is_match(k) {
                    out.insert(k.clone(), Value::String("<redacted>".to_string()));
                } else {
                    out.insert(k.clone(), redact(v));
                }
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(redact).collect()),
        other => other.clone(),
    }
}

/// A bounded ring buffer of [`AuditRecord`]s with BLAKE3 hash chaining.
pub struct AuditLog {
    enabled: bool,
    max_entries: usize,
    records: Mutex<VecDeque<AuditRecord>>,
    sequence: AtomicU64,
    last_hash: Mutex<Option<String>>,
}

impl AuditLog {
    pub fn new(enabled: bool, max_entries: usize) -> Self {
        AuditLog {
            enabled,
            max_entries,
            records: Mutex::new(VecDeque::with_capacity(max_entries.min(1024))),
            sequence: AtomicU64::new(0),
            last_hash: Mutex::new(None),
        }
    }

    /// Append one audit record. No-op when auditing is disabled, except the
    /// caller-observable side effects (e.g. rejecting a request) still
    /// happen upstream regardless of whether the record is stored.
    pub fn record(
        &self,
        kind: AuditEventKind,
        principal: &str,
        subject: &str,
        outcome: &str,
        duration: Option<Duration>,
        parameters: Value,
    ) {
        if !self.enabled {
            return;
        }
        let redacted_params = redact(&parameters);
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        let id = uuid::Uuid::new_v4();
        let timestamp = chrono::Utc::now();

        let mut previous_hash_guard = self.last_hash.lock().unwrap();
        let previous_hash = previous_hash_guard.clone();

        let hash = compute_hash(
            &id,
            &timestamp,
            kind,
            principal,
            subject,
            outcome,
            &redacted_params,
            sequence,
            previous_hash.as_deref(),
        );
        *previous_hash_guard = Some(hash.clone());
        drop(previous_hash_guard);

        let record = AuditRecord {
            id,
            timestamp,
            kind,
            principal: principal.to_string(),
            subject: subject.to_string(),
            outcome: outcome.to_string(),
            duration,
            parameters: redacted_params,
            hash,
            previous_hash,
            sequence,
        };

        let mut records = self.records.lock().unwrap();
        if records.len() >= self.max_entries {
            records.pop_front();
        }
        records.push_back(record);
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> Vec<AuditRecord> {
        self.records.lock().unwrap().iter().cloned().collect()
    }

    /// Recompute the hash chain over the current snapshot and verify it
    /// matches the stored hashes, detecting truncation or tampering of
    /// entries still resident in the ring buffer.
    pub fn verify_chain(&self) -> bool {
        let records = self.snapshot();
        let mut expected_previous: Option<String> = None;
        for record in &records {
            if record.previous_hash != expected_previous {
                return false;
            }
            let recomputed = compute_hash(
                &record.id,
                &record.timestamp,
                record.kind,
                &record.principal,
                &record.subject,
                &record.outcome,
                &record.parameters,
                record.sequence,
                record.previous_hash.as_deref(),
            );
            if recomputed != record.hash {
                return false;
            }
            expected_previous = Some(record.hash.clone());
        }
        true
    }
}

#[allow(clippy::too_many_arguments)]
fn compute_hash(
    id: &uuid::Uuid,
    timestamp: &chrono::DateTime<chrono::Utc>,
    kind: AuditEventKind,
    principal: &str,
    subject: &str,
    outcome: &str,
    parameters: &Value,
    sequence: u64,
    previous_hash: Option<&str>,
) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(id.as_bytes());
    hasher.update(timestamp.to_rfc3339().as_bytes());
    hasher.update(format!("{kind:?}").as_bytes());
    hasher.update(principal.as_bytes());
    hasher.update(subject.as_bytes());
    hasher.update(outcome.as_bytes());
    hasher.update(parameters.to_string().as_bytes());
    hasher.update(&sequence.to_le_bytes());
    hasher.update(previous_hash.unwrap_or("").as_bytes());
    hasher.finalize().to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_matching_keys_recursively() {
        let input = serde_json::json!({
            "username": "alice",
            "password": "hunter2",
            "nested": { "api_key": "abc", "ok": "fine" },
            "list": [{ "token": "xyz" }],
        });
        let redacted = redact(&input);
        assert_eq!(redacted["username"], "alice");
        assert_eq!(redacted["password"], "<redacted>");
        assert_eq!(redacted["nested"]["api_key"], "<redacted>");
        assert_eq!(redacted["nested"]["ok"], "fine");
        assert_eq!(redacted["list"][0]["token"], "<redacted>");
    }

    #[test]
    fn redacted_value_never_appears_in_buffer() {
        let log = AuditLog::new(true, 10);
        log.record(
            AuditEventKind::ToolInvocation,
            "caller",
            "example.test",
            "ok",
            None,
            serde_json::json!({ "auth_token": "super-secret-value" }),
        );
        let snapshot = log.snapshot();
        let serialized = serde_json::to_string(&snapshot).unwrap();
        assert!(!serialized.contains("super-secret-value"));
    }

    #[test]
    fn ring_buffer_evicts_oldest() {
        let log = AuditLog::new(true, 2);
        for i in 0..5 {
            log.record(
                AuditEventKind::ResourceAccess,
                "caller",
                &format!("host{i}"),
                "ok",
                None,
                serde_json::json!({}),
            );
        }
        assert_eq!(log.len(), 2);
        let snapshot = log.snapshot();
        assert_eq!(snapshot[0].subject, "host3");
        assert_eq!(snapshot[1].subject, "host4");
    }

    #[test]
    fn disabled_log_stores_nothing() {
        let log = AuditLog::new(false, 10);
        log.record(
            AuditEventKind::Error,
            "caller",
            "host",
            "ok",
            None,
            serde_json::json!({}),
        );
        assert!(log.is_empty());
    }

    #[test]
    fn hash_chain_verifies_intact_log() {
        let log = AuditLog::new(true, 10);
        for i in 0..4 {
            log.record(
                AuditEventKind::ResourceAccess,
                "caller",
                &format!("host{i}"),
                "ok",
                None,
                serde_json::json!({}),
            );
        }
        assert!(log.verify_chain());
    }

    #[test]
    fn hash_chain_detects_tampering() {
        let log = AuditLog::new(true, 10);
        log.record(
            AuditEventKind::ResourceAccess,
            "caller",
            "host0",
            "ok",
            None,
            serde_json::json!({}),
        );
        log.record(
            AuditEventKind::ResourceAccess,
            "caller",
            "host1",
            "ok",
            None,
            serde_json::json!({}),
        );
        {
            let mut records = log.records.lock().unwrap();
            records[0].outcome = "tampered".to_string();
        }
        assert!(!log.verify_chain());
    }
}
