//! Content-addressed cache of remote ids.
//!
//! One entry per `(scope, logical key)`: the fingerprint of the payload last
//! written and the remote id it produced. A lookup only hits when the stored
//! fingerprint equals the current one; [`ContentCache::known_id`] ignores the
//! fingerprint and serves as the update target for a miss.
//!
//! ## File format (`_course_metadata/cache.json`)
//!
//! ```json
//! {
//!   "version": 1,
//!   "updated_at": "2026-01-01T00:00:00Z",
//!   "scopes": {
//!     "1234": {
//!       "page:welcome": { "fingerprint": "ab12…", "remote_id": "77", "recorded_at": "…" }
//!     }
//!   }
//! }
//! ```
//!
//! The older flat layout `{"<scope>:<key>:<fingerprint>": <remote id>}` is
//! accepted on load and rewritten in the current layout on the next save.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use lectern_core::types::{normalize_name, ContentKind};

use crate::error::{io_err, json_err, SyncError};
use crate::remote::RemoteId;

const CACHE_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// Keys
// ---------------------------------------------------------------------------

/// `<kind>:<name>` for content items.
pub fn content_key(kind: ContentKind, name: &str) -> String {
    format!("{}:{}", kind.suffix(), normalize_name(name))
}

pub fn bank_key(name: &str) -> String {
    format!("bank:{}", normalize_name(name))
}

pub fn outcome_key(code: &str) -> String {
    format!("outcome:{}", code.trim())
}

pub fn rubric_key(assignment: &str) -> String {
    format!("rubric:{}", normalize_name(assignment))
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub fingerprint: String,
    pub remote_id: RemoteId,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheFile {
    version: u32,
    updated_at: DateTime<Utc>,
    scopes: BTreeMap<String, BTreeMap<String, CacheEntry>>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CacheCompat {
    Structured(CacheFile),
    Legacy(BTreeMap<String, Value>),
}

/// In-memory cache for one or more remote course scopes.
#[derive(Debug, Clone, Default)]
pub struct ContentCache {
    scopes: BTreeMap<String, BTreeMap<String, CacheEntry>>,
    dirty: bool,
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

impl ContentCache {
    /// Load from `path`. A missing or empty file yields an empty cache.
    pub fn load_at(path: &Path) -> Result<Self, SyncError> {
        if !path.exists() {
            return Ok(ContentCache::default());
        }
        let raw = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
        if raw.trim().is_empty() {
            return Ok(ContentCache::default());
        }
        let parsed: CacheCompat = serde_json::from_str(&raw).map_err(|e| json_err(path, e))?;
        Ok(match parsed {
            CacheCompat::Structured(file) => ContentCache {
                scopes: file.scopes,
                dirty: false,
            },
            CacheCompat::Legacy(map) => {
                let cache = migrate_legacy(map);
                tracing::info!(
                    "migrated {} legacy cache entries from {}",
                    cache.len(),
                    path.display()
                );
                cache
            }
        })
    }

    /// Write atomically (`.json.tmp` then rename) when anything changed.
    pub fn save_at(&mut self, path: &Path) -> Result<(), SyncError> {
        if !self.dirty && path.exists() {
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
        }
        let file = CacheFile {
            version: CACHE_VERSION,
            updated_at: Utc::now(),
            scopes: self.scopes.clone(),
        };
        let json = serde_json::to_string_pretty(&file).map_err(|e| json_err(path, e))?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(|e| io_err(&tmp, e))?;
        std::fs::rename(&tmp, path).map_err(|e| io_err(path, e))?;
        self.dirty = false;
        Ok(())
    }
}

fn migrate_legacy(map: BTreeMap<String, Value>) -> ContentCache {
    let now = Utc::now();
    let mut cache = ContentCache::default();
    for (composite, value) in map {
        let remote_id = match value {
            Value::String(s) => s,
            Value::Number(n) => n.to_string(),
            other => {
                tracing::warn!("skipping legacy cache entry '{composite}': id {other}");
                continue;
            }
        };
        let parsed = composite.split_once(':').and_then(|(scope, rest)| {
            rest.rsplit_once(':').map(|(key, fp)| (scope, key, fp))
        });
        match parsed {
            Some((scope, key, fingerprint)) if !key.is_empty() => {
                cache.scopes.entry(scope.to_string()).or_default().insert(
                    key.to_string(),
                    CacheEntry {
                        fingerprint: fingerprint.to_string(),
                        remote_id: RemoteId(remote_id),
                        recorded_at: now,
                    },
                );
            }
            _ => tracing::warn!("skipping malformed legacy cache key '{composite}'"),
        }
    }
    cache.dirty = true;
    cache
}

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

impl ContentCache {
    /// Remote id for `key` if its stored fingerprint equals `fingerprint`.
    pub fn lookup(&self, scope: &str, key: &str, fingerprint: &str) -> Option<&RemoteId> {
        self.entry(scope, key)
            .filter(|e| e.fingerprint == fingerprint)
            .map(|e| &e.remote_id)
    }

    /// Remote id for `key` regardless of fingerprint.
    pub fn known_id(&self, scope: &str, key: &str) -> Option<&RemoteId> {
        self.entry(scope, key).map(|e| &e.remote_id)
    }

    pub fn entry(&self, scope: &str, key: &str) -> Option<&CacheEntry> {
        self.scopes.get(scope).and_then(|s| s.get(key))
    }

    /// Store the result of a confirmed remote write, replacing any previous
    /// fingerprint for `key`.
    pub fn record(&mut self, scope: &str, key: &str, fingerprint: &str, id: RemoteId) {
        self.scopes.entry(scope.to_string()).or_default().insert(
            key.to_string(),
            CacheEntry {
                fingerprint: fingerprint.to_string(),
                remote_id: id,
                recorded_at: Utc::now(),
            },
        );
        self.dirty = true;
    }

    pub fn forget(&mut self, scope: &str, key: &str) -> Option<CacheEntry> {
        let removed = self.scopes.get_mut(scope).and_then(|s| s.remove(key));
        if removed.is_some() {
            self.dirty = true;
        }
        removed
    }

    /// Drop every entry in `scope` pointing at `id`. Returns how many went.
    pub fn forget_remote(&mut self, scope: &str, id: &RemoteId) -> usize {
        let Some(entries) = self.scopes.get_mut(scope) else {
            return 0;
        };
        let before = entries.len();
        entries.retain(|_, e| &e.remote_id != id);
        let removed = before - entries.len();
        if removed > 0 {
            self.dirty = true;
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.scopes.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn scope_len(&self, scope: &str) -> usize {
        self.scopes.get(scope).map_or(0, BTreeMap::len)
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
