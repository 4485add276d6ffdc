//! Versioned on-disk cache of per-frame derived data.
//!
//! Entries live at `<dir>/<kind>/<key>.json` wrapped in an envelope carrying
//! a format version. Writes go through a temp file and an atomic rename, so
//! concurrent writers of one key leave exactly one complete entry. Unreadable
//! or stale entries are removed and reported as a miss.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::EmbeddingResult;

/// Bumped whenever a cached payload changes shape.
pub const CACHE_FORMAT_VERSION: u32 = 1;

/// What a cache entry holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKind {
    /// Image embedding of a frame
    ImageEmbedding,
    /// Aesthetic score of a frame
    Aesthetic,
    /// Motion scores of a frame batch
    Motion,
}

impl CacheKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheKind::ImageEmbedding => "embedding",
            CacheKind::Aesthetic => "aesthetic",
            CacheKind::Motion => "motion",
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope<T> {
    version: u32,
    kind: String,
    key: String,
    value: T,
}

/// Outcome of reading one entry.
#[derive(Debug)]
enum CacheLookup<T> {
    Hit(T),
    Miss,
    Corrupt(String),
}

/// Disk cache keyed by `(kind, key)`.
#[derive(Debug, Clone)]
pub struct DiskCache {
    dir: PathBuf,
    enabled: bool,
}

impl DiskCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            enabled: true,
        }
    }

    /// A cache that never hits and never writes.
    pub fn disabled() -> Self {
        Self {
            dir: PathBuf::new(),
            enabled: false,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File backing `(kind, key)`.
    pub fn path_for(&self, kind: CacheKind, key: &str) -> PathBuf {
        self.dir
            .join(kind.as_str())
            .join(format!("{}.json", sanitize_key(key)))
    }

    /// Cached value, or `None` on miss, corruption or a disabled cache.
    pub fn get<T: DeserializeOwned>(&self, kind: CacheKind, key: &str) -> Option<T> {
        if !self.enabled {
            return None;
        }

        match self.lookup(kind, key) {
            CacheLookup::Hit(value) => {
                metrics::counter!("bestshot_cache_hits_total", "kind" => kind.as_str()).increment(1);
                Some(value)
            }
            CacheLookup::Miss => {
                metrics::counter!("bestshot_cache_misses_total", "kind" => kind.as_str())
                    .increment(1);
                None
            }
            CacheLookup::Corrupt(reason) => {
                let path = self.path_for(kind, key);
                warn!(
                    kind = kind.as_str(),
                    key,
                    "Discarding corrupt cache entry {}: {}",
                    path.display(),
                    reason
                );
                metrics::counter!("bestshot_cache_corruptions_total", "kind" => kind.as_str())
                    .increment(1);
                if let Err(e) = fs::remove_file(&path) {
                    debug!("Could not remove {}: {}", path.display(), e);
                }
                None
            }
        }
    }

    fn lookup<T: DeserializeOwned>(&self, kind: CacheKind, key: &str) -> CacheLookup<T> {
        let path = self.path_for(kind, key);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return CacheLookup::Miss,
            Err(e) => return CacheLookup::Corrupt(e.to_string()),
        };

        let envelope: Envelope<T> = match serde_json::from_slice(&bytes) {
            Ok(envelope) => envelope,
            Err(e) => return CacheLookup::Corrupt(e.to_string()),
        };

        if envelope.version != CACHE_FORMAT_VERSION {
            return CacheLookup::Corrupt(format!("format version {}", envelope.version));
        }
        if envelope.kind != kind.as_str() || envelope.key != key {
            return CacheLookup::Corrupt("entry belongs to another key".to_string());
        }
        CacheLookup::Hit(envelope.value)
    }

    /// Store `value` under `(kind, key)`, replacing any previous entry.
    pub fn put<T: Serialize>(&self, kind: CacheKind, key: &str, value: &T) -> EmbeddingResult<()> {
        if !self.enabled {
            return Ok(());
        }

        let path = self.path_for(kind, key);
        let parent = path.parent().unwrap_or(&self.dir);
        fs::create_dir_all(parent)?;

        let envelope = Envelope {
            version: CACHE_FORMAT_VERSION,
            kind: kind.as_str().to_string(),
            key: key.to_string(),
            value,
        };

        let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
        serde_json::to_writer(&mut tmp, &envelope)?;
        tmp.flush()?;
        tmp.persist(&path).map_err(|e| e.error)?;
        Ok(())
    }

    /// Remove every cached entry.
    pub fn clear(&self) -> EmbeddingResult<()> {
        if self.enabled && self.dir.exists() {
            fs::remove_dir_all(&self.dir)?;
        }
        Ok(())
    }
}

/// Keep keys to characters safe in a file name.
fn sanitize_key(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_then_get() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskCache::new(dir.path());

        cache
            .put(CacheKind::Aesthetic, "tour_frame_000001", &0.75f64)
            .unwrap();
        let value: Option<f64> = cache.get(CacheKind::Aesthetic, "tour_frame_000001");
        assert_eq!(value, Some(0.75));

        let other: Option<f64> = cache.get(CacheKind::Aesthetic, "tour_frame_000002");
        assert_eq!(other, None);
    }

    #[test]
    fn test_kinds_do_not_collide() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskCache::new(dir.path());

        cache.put(CacheKind::Aesthetic, "k", &0.5f64).unwrap();
        let embedding: Option<Vec<f32>> = cache.get(CacheKind::ImageEmbedding, "k");
        assert!(embedding.is_none());
    }

    #[test]
    fn test_corrupt_entry_is_a_miss_and_removed() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskCache::new(dir.path());
        let path = cache.path_for(CacheKind::ImageEmbedding, "kitchen_frame_000010");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"\x80\x04not json").unwrap();

        let value: Option<Vec<f32>> = cache.get(CacheKind::ImageEmbedding, "kitchen_frame_000010");
        assert!(value.is_none());
        assert!(!path.exists());

        cache
            .put(CacheKind::ImageEmbedding, "kitchen_frame_000010", &vec![1.0f32])
            .unwrap();
        let value: Option<Vec<f32>> = cache.get(CacheKind::ImageEmbedding, "kitchen_frame_000010");
        assert_eq!(value, Some(vec![1.0]));
    }

    #[test]
    fn test_stale_version_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskCache::new(dir.path());
        let path = cache.path_for(CacheKind::Aesthetic, "k");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(
            &path,
            br#"{"version": 0, "kind": "aesthetic", "key": "k", "value": 0.5}"#,
        )
        .unwrap();

        let value: Option<f64> = cache.get(CacheKind::Aesthetic, "k");
        assert!(value.is_none());
    }

    #[test]
    fn test_disabled_cache() {
        let cache = DiskCache::disabled();
        cache.put(CacheKind::Aesthetic, "k", &1.0f64).unwrap();
        let value: Option<f64> = cache.get(CacheKind::Aesthetic, "k");
        assert!(value.is_none());
    }

    #[test]
    fn test_key_sanitized() {
        let cache = DiskCache::new("cache");
        let path = cache.path_for(CacheKind::Motion, "a/b c");
        assert_eq!(path, PathBuf::from("cache/motion/a_b_c.json"));
    }
}
