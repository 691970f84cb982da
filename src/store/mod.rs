//! Disk-backed cache store.
//!
//! Persists JSON documents (and one raw-text class for the XML airings
//! record) under the cache directory, each wrapped with a computed expiry.
//! File presence is authoritative: a missing file is a miss even if a
//! previously remembered expiry would still be valid, so an operator can
//! always force a refetch by deleting the file.
//!
//! Concurrent writers for the same key are not serialized; each write is
//! atomic (temp file + rename) and the last write wins.

pub mod expiry;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// A cached value with its computed expiry. `expiry: None` means the entry
/// never expires.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub value: T,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub expiry: Option<DateTime<Utc>>,
}

impl<T> CacheEntry<T> {
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        match self.expiry {
            Some(expiry) => now < expiry,
            None => true,
        }
    }
}

/// Sidecar metadata for raw-text entries.
#[derive(Debug, Serialize, Deserialize)]
struct RawMeta {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    expiry: Option<DateTime<Utc>>,
}

/// Key/value persistence with per-entry expiry.
pub struct DiskStore {
    cache_dir: PathBuf,
}

impl DiskStore {
    /// Open (creating if needed) a store rooted at `cache_dir`.
    pub fn open(cache_dir: impl Into<PathBuf>) -> Result<Self> {
        let cache_dir = cache_dir.into();
        fs::create_dir_all(&cache_dir)?;
        Ok(Self { cache_dir })
    }

    /// Map a cache key to its backing file. Keys use `:` separators which
    /// become `-` on disk; anything else unusual is flattened to `_`.
    fn path_for(&self, key: &str, ext: &str) -> PathBuf {
        let name: String = key
            .chars()
            .map(|c| match c {
                ':' => '-',
                c if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' => c,
                _ => '_',
            })
            .collect();
        self.cache_dir.join(format!("{}.{}", name, ext))
    }

    /// Fetch a JSON entry, honoring its expiry. Unparsable files are treated
    /// as misses so a refetch self-heals the cache.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let path = self.path_for(key, "json");
        let body = fs::read_to_string(&path).ok()?;
        let entry: CacheEntry<T> = match serde_json::from_str(&body) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("Discarding unparsable cache file {:?}: {}", path, e);
                return None;
            }
        };
        if entry.is_valid(Utc::now()) {
            Some(entry.value)
        } else {
            None
        }
    }

    /// Store a JSON entry with the given computed expiry.
    pub fn put<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        expiry: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let entry = CacheEntry {
            value,
            expiry,
        };
        let body = serde_json::to_vec_pretty(&entry)?;
        self.write_atomic(&self.path_for(key, "json"), &body)
    }

    /// Fetch a raw-text entry (used for the XML airings record).
    pub fn get_raw(&self, key: &str, ext: &str) -> Option<String> {
        let path = self.path_for(key, ext);
        let body = fs::read_to_string(&path).ok()?;

        let meta_path = self.path_for(key, "meta.json");
        let meta: RawMeta = fs::read_to_string(&meta_path)
            .ok()
            .and_then(|m| serde_json::from_str(&m).ok())
            .unwrap_or(RawMeta { expiry: None });

        match meta.expiry {
            Some(expiry) if Utc::now() >= expiry => None,
            _ => Some(body),
        }
    }

    /// Store a raw-text entry with an expiry sidecar.
    pub fn put_raw(
        &self,
        key: &str,
        ext: &str,
        body: &str,
        expiry: Option<DateTime<Utc>>,
    ) -> Result<()> {
        self.write_atomic(&self.path_for(key, ext), body.as_bytes())?;
        let meta = serde_json::to_vec(&RawMeta { expiry })?;
        self.write_atomic(&self.path_for(key, "meta.json"), &meta)
    }

    /// Remove an entry (both JSON and raw forms).
    pub fn remove(&self, key: &str) {
        for ext in ["json", "xml", "meta.json"] {
            let _ = fs::remove_file(self.path_for(key, ext));
        }
    }

    fn write_atomic(&self, path: &Path, body: &[u8]) -> Result<()> {
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, body)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;
    use tempfile::TempDir;

    fn store() -> (TempDir, DiskStore) {
        let dir = TempDir::new().unwrap();
        let store = DiskStore::open(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn test_put_get_roundtrip() {
        let (_dir, store) = store();
        let value = json!({"games": [1, 2, 3]});

        store
            .put("day:2026-08-26", &value, Some(Utc::now() + Duration::hours(1)))
            .unwrap();

        let loaded: serde_json::Value = store.get("day:2026-08-26").unwrap();
        assert_eq!(loaded, value);
    }

    #[test]
    fn test_expired_entry_is_miss() {
        let (_dir, store) = store();
        store
            .put("day:2026-08-25", &json!(1), Some(Utc::now() - Duration::seconds(1)))
            .unwrap();
        assert_eq!(store.get::<serde_json::Value>("day:2026-08-25"), None);
    }

    #[test]
    fn test_permanent_entry() {
        let (_dir, store) = store();
        store.put("week", &json!("schedule"), None).unwrap();
        assert_eq!(store.get::<serde_json::Value>("week"), Some(json!("schedule")));
    }

    #[test]
    fn test_file_presence_is_authoritative() {
        let (dir, store) = store();
        store
            .put("day:2026-08-26", &json!(1), Some(Utc::now() + Duration::hours(1)))
            .unwrap();

        // Deleting the backing file must produce a miss even though the
        // expiry would still be valid.
        std::fs::remove_file(dir.path().join("day-2026-08-26.json")).unwrap();
        assert_eq!(store.get::<serde_json::Value>("day:2026-08-26"), None);
    }

    #[test]
    fn test_raw_roundtrip_with_expiry() {
        let (_dir, store) = store();
        let xml = "<broadcast contentId=\"c1\"/>";
        store
            .put_raw("airings:c1", "xml", xml, Some(Utc::now() + Duration::hours(1)))
            .unwrap();
        assert_eq!(store.get_raw("airings:c1", "xml").unwrap(), xml);

        store
            .put_raw("airings:c2", "xml", xml, Some(Utc::now() - Duration::seconds(1)))
            .unwrap();
        assert_eq!(store.get_raw("airings:c2", "xml"), None);
    }

    #[test]
    fn test_unparsable_file_is_miss() {
        let (dir, store) = store();
        std::fs::write(dir.path().join("day-bad.json"), "not json").unwrap();
        assert_eq!(store.get::<serde_json::Value>("day:bad"), None);
    }

    #[test]
    fn test_remove() {
        let (_dir, store) = store();
        store.put("day:x", &json!(1), None).unwrap();
        store.remove("day:x");
        assert_eq!(store.get::<serde_json::Value>("day:x"), None);
    }
}
