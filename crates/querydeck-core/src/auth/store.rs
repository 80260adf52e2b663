use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::warn;

use super::tokens::TokenPair;
use crate::utils::write_atomic;

/// Token store file name in cache directory
const TOKENS_FILE: &str = "tokens.json";

/// Keys of the three independent entries.
pub const ACCESS_TOKEN_KEY: &str = "access_token";
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";
pub const EXPIRES_AT_KEY: &str = "expires_at";

/// Durable home for the credential pair. Pure get/set/clear; the content is
/// opaque apart from the expiry timestamp.
pub trait TokenStore: Send + Sync {
    fn save(&self, pair: &TokenPair) -> Result<()>;

    /// `None` unless a complete pair is stored.
    fn load(&self) -> Result<Option<TokenPair>>;

    fn clear(&self) -> Result<()>;
}

/// Assemble a pair from the three entries, or `None` if any is missing or
/// the expiry does not parse.
pub(crate) fn pair_from_entries(
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_at: Option<String>,
) -> Option<TokenPair> {
    let (access_token, refresh_token, expires_at) = (access_token?, refresh_token?, expires_at?);
    let expires_at = match DateTime::parse_from_rfc3339(&expires_at) {
        Ok(ts) => ts.with_timezone(&Utc),
        Err(e) => {
            warn!(error = %e, "Stored token expiry is unreadable, ignoring stored tokens");
            return None;
        }
    };
    Some(TokenPair {
        access_token,
        refresh_token,
        expires_at,
    })
}

/// File-backed store: a small JSON key-value file holding one entry per key.
pub struct FileTokenStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileTokenStore {
    pub fn new(cache_dir: &Path) -> Self {
        Self {
            path: cache_dir.join(TOKENS_FILE),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_entries(&self) -> Result<BTreeMap<String, String>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let contents =
            std::fs::read_to_string(&self.path).context("Failed to read token store")?;
        serde_json::from_str(&contents).context("Failed to parse token store")
    }

    /// Replace the store file in one rename, so a reader sees either the old
    /// file or the new one.
    fn write_entries(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        let contents = serde_json::to_string_pretty(entries)?;
        write_atomic(&self.path, &contents).context("Failed to write token store")
    }
}

impl TokenStore for FileTokenStore {
    fn save(&self, pair: &TokenPair) -> Result<()> {
        let _guard = self.lock.lock();
        let mut entries = BTreeMap::new();
        entries.insert(ACCESS_TOKEN_KEY.to_string(), pair.access_token.clone());
        entries.insert(REFRESH_TOKEN_KEY.to_string(), pair.refresh_token.clone());
        entries.insert(EXPIRES_AT_KEY.to_string(), pair.expires_at.to_rfc3339());
        self.write_entries(&entries)
    }

    fn load(&self) -> Result<Option<TokenPair>> {
        let _guard = self.lock.lock();
        let mut entries = self.read_entries()?;
        Ok(pair_from_entries(
            entries.remove(ACCESS_TOKEN_KEY),
            entries.remove(REFRESH_TOKEN_KEY),
            entries.remove(EXPIRES_AT_KEY),
        ))
    }

    fn clear(&self) -> Result<()> {
        let _guard = self.lock.lock();
        if self.path.exists() {
            std::fs::remove_file(&self.path).context("Failed to remove token store")?;
        }
        Ok(())
    }
}

/// Process-local store for tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryTokenStore {
    pair: Mutex<Option<TokenPair>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TokenStore for MemoryTokenStore {
    fn save(&self, pair: &TokenPair) -> Result<()> {
        *self.pair.lock() = Some(pair.clone());
        Ok(())
    }

    fn load(&self) -> Result<Option<TokenPair>> {
        Ok(self.pair.lock().clone())
    }

    fn clear(&self) -> Result<()> {
        *self.pair.lock() = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, SubsecRound};

    fn pair() -> TokenPair {
        TokenPair {
            access_token: "access-1".to_string(),
            refresh_token: "refresh-1".to_string(),
            expires_at: (Utc::now() + Duration::minutes(15)).trunc_subsecs(0),
        }
    }

    #[test]
    fn test_file_store_round_trip_and_clear() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = FileTokenStore::new(dir.path());

        assert_eq!(store.load().expect("load"), None);

        let saved = pair();
        store.save(&saved).expect("save");
        assert_eq!(store.load().expect("load"), Some(saved));

        store.clear().expect("clear");
        assert_eq!(store.load().expect("load"), None);
        assert!(!store.path().exists());
    }

    #[test]
    fn test_file_store_keeps_three_independent_entries() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = FileTokenStore::new(dir.path());
        store.save(&pair()).expect("save");

        let raw = std::fs::read_to_string(store.path()).expect("store file");
        let entries: BTreeMap<String, String> = serde_json::from_str(&raw).expect("json map");
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[ACCESS_TOKEN_KEY], "access-1");
        assert_eq!(entries[REFRESH_TOKEN_KEY], "refresh-1");
        assert!(entries.contains_key(EXPIRES_AT_KEY));
    }

    #[test]
    fn test_file_store_partial_entries_load_as_none() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = FileTokenStore::new(dir.path());
        std::fs::write(store.path(), r#"{"access_token":"a","refresh_token":"r"}"#)
            .expect("write partial store");
        assert_eq!(store.load().expect("load"), None);
    }

    #[test]
    fn test_file_store_bad_expiry_loads_as_none() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = FileTokenStore::new(dir.path());
        std::fs::write(
            store.path(),
            r#"{"access_token":"a","refresh_token":"r","expires_at":"tomorrow"}"#,
        )
        .expect("write store");
        assert_eq!(store.load().expect("load"), None);
    }

    #[test]
    fn test_file_store_save_leaves_no_temp_files() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = FileTokenStore::new(dir.path());
        store.save(&pair()).expect("first save");
        store.save(&pair()).expect("second save");
        let names: Vec<_> = std::fs::read_dir(dir.path())
            .expect("read dir")
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec![TOKENS_FILE.to_string()]);
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryTokenStore::new();
        let saved = pair();
        store.save(&saved).expect("save");
        assert_eq!(store.load().expect("load"), Some(saved));
        store.clear().expect("clear");
        assert_eq!(store.load().expect("load"), None);
    }
}
