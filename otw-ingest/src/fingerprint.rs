//! Snapshot fingerprinting and coarse change detection
//!
//! The whole canonical snapshot is hashed; any single incident change
//! invalidates the batch. There is no per-incident diff path.

use crate::db::meta;
use otw_common::{CanonicalEvent, Result};
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use std::fmt;
use tracing::{debug, info, warn};

/// Hex SHA-256 digest over a deterministically serialized snapshot
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct SnapshotFingerprint(String);

impl SnapshotFingerprint {
    /// Fingerprint a snapshot
    ///
    /// Records are encoded with object keys sorted by name, then ordered by
    /// `id` (ties broken by the encoded record), so permutations of the same
    /// snapshot hash identically.
    pub fn compute(events: &[CanonicalEvent]) -> Result<Self> {
        let mut encoded = Vec::with_capacity(events.len());
        for event in events {
            let value = serde_json::to_value(event)?;
            let mut text = String::new();
            write_canonical(&value, &mut text);
            encoded.push((event.id.as_str(), text));
        }
        encoded.sort();

        let mut hasher = Sha256::new();
        hasher.update(b"[");
        for (index, (_, text)) in encoded.iter().enumerate() {
            if index > 0 {
                hasher.update(b",");
            }
            hasher.update(text.as_bytes());
        }
        hasher.update(b"]");

        Ok(Self(format!("{:x}", hasher.finalize())))
    }

    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SnapshotFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// JSON encoding with object keys in sorted order, no whitespace
fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (index, key) in keys.into_iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (index, item) in items.iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Outcome of comparing a snapshot against the persisted fingerprint
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeDecision {
    Unchanged(SnapshotFingerprint),
    Changed {
        current: SnapshotFingerprint,
        previous: Option<SnapshotFingerprint>,
    },
}

impl ChangeDecision {
    pub fn is_changed(&self) -> bool {
        matches!(self, ChangeDecision::Changed { .. })
    }

    pub fn fingerprint(&self) -> &SnapshotFingerprint {
        match self {
            ChangeDecision::Unchanged(fp) => fp,
            ChangeDecision::Changed { current, .. } => current,
        }
    }
}

/// Compares snapshots against the singleton fingerprint row
#[derive(Clone)]
pub struct ChangeDetector {
    pool: SqlitePool,
}

impl ChangeDetector {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Fingerprint the snapshot and compare with the last persisted one
    ///
    /// A failed read of the stored fingerprint is treated as "no previous
    /// fingerprint": the cycle proceeds, and every downstream write is
    /// idempotent.
    pub async fn detect(&self, events: &[CanonicalEvent]) -> Result<ChangeDecision> {
        let current = SnapshotFingerprint::compute(events)?;

        let previous = match meta::load_fingerprint(&self.pool).await {
            Ok(previous) => previous,
            Err(e) => {
                warn!(error = %e, "Could not read stored fingerprint, treating snapshot as changed");
                None
            }
        };

        debug!(
            current = %current,
            previous = previous.as_ref().map(|p| p.as_str()).unwrap_or("<none>"),
            "Fingerprint check"
        );

        if previous.as_ref() == Some(&current) {
            return Ok(ChangeDecision::Unchanged(current));
        }

        Ok(ChangeDecision::Changed { current, previous })
    }

    /// Persist the fingerprint of a snapshot that has been applied
    pub async fn commit(&self, fingerprint: &SnapshotFingerprint) -> Result<()> {
        meta::save_fingerprint(&self.pool, fingerprint).await?;
        info!(fingerprint = %fingerprint, "Stored snapshot fingerprint");
        Ok(())
    }
}
