use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::debug;

use crate::auth::{Company, User};
use crate::utils::write_atomic;

const PROFILE_CACHE: &str = "profile";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedData<T> {
    pub data: T,
    pub cached_at: DateTime<Utc>,
}

impl<T> CachedData<T> {
    pub fn new(data: T) -> Self {
        Self {
            data,
            cached_at: Utc::now(),
        }
    }

    pub fn age_minutes(&self) -> i64 {
        (Utc::now() - self.cached_at).num_minutes()
    }

    pub fn age_display(&self) -> String {
        let minutes = self.age_minutes();
        if minutes < 1 {
            // Also covers clock skew
            "just now".to_string()
        } else if minutes < 60 {
            format!("{}m ago", minutes)
        } else if minutes < 1440 {
            format!("{}h ago", minutes / 60)
        } else {
            format!("{}d ago", minutes / 1440)
        }
    }
}

/// Last known identity of an authoritative session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedProfile {
    pub user: User,
    pub company: Option<Company>,
}

/// Small JSON cache used to rebuild a degraded session when the backend
/// cannot be reached at startup.
pub struct ProfileCache {
    cache_dir: PathBuf,
}

impl ProfileCache {
    pub fn new(cache_dir: PathBuf) -> Self {
        Self { cache_dir }
    }

    fn cache_path(&self, name: &str) -> PathBuf {
        self.cache_dir.join(format!("{}.json", name))
    }

    fn load<T: DeserializeOwned>(&self, name: &str) -> Result<Option<CachedData<T>>> {
        let path = self.cache_path(name);
        if !path.exists() {
            return Ok(None);
        }

        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read cache file: {}", name))?;

        let cached: CachedData<T> = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse cache file: {}", name))?;

        Ok(Some(cached))
    }

    fn save<T: Serialize>(&self, name: &str, data: &T) -> Result<()> {
        let cached = CachedData::new(data);
        let contents = serde_json::to_string_pretty(&cached)?;
        write_atomic(&self.cache_path(name), &contents)
            .with_context(|| format!("Failed to write cache file: {}", name))
    }

    pub fn load_profile(&self) -> Result<Option<CachedData<CachedProfile>>> {
        self.load(PROFILE_CACHE)
    }

    pub fn save_profile(&self, user: &User, company: Option<&Company>) -> Result<()> {
        let profile = CachedProfile {
            user: user.clone(),
            company: company.cloned(),
        };
        debug!(user_id = %user.id, "Caching profile");
        self.save(PROFILE_CACHE, &profile)
    }

    pub fn clear(&self) -> Result<()> {
        let path = self.cache_path(PROFILE_CACHE);
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn user() -> User {
        User {
            id: "u-7".to_string(),
            email: "li@acme.test".to_string(),
            first_name: "Li".to_string(),
            last_name: "Wei".to_string(),
            role: "admin".to_string(),
        }
    }

    #[test]
    fn test_cached_data_age_display() {
        let mut cached = CachedData::new(1);
        assert_eq!(cached.age_display(), "just now");

        cached.cached_at = Utc::now() - Duration::minutes(5);
        assert_eq!(cached.age_display(), "5m ago");

        cached.cached_at = Utc::now() - Duration::minutes(125);
        assert_eq!(cached.age_display(), "2h ago");

        cached.cached_at = Utc::now() - Duration::days(3);
        assert_eq!(cached.age_display(), "3d ago");

        cached.cached_at = Utc::now() + Duration::minutes(10);
        assert_eq!(cached.age_display(), "just now");
    }

    #[test]
    fn test_profile_round_trip_and_clear() {
        let dir = tempfile::tempdir().expect("temp dir");
        let cache = ProfileCache::new(dir.path().join("nested"));
        assert!(cache.load_profile().expect("load").is_none());

        let company = Company {
            id: "c-1".to_string(),
            name: "Acme".to_string(),
            slug: "acme".to_string(),
        };
        cache.save_profile(&user(), Some(&company)).expect("save");

        let loaded = cache.load_profile().expect("load").expect("cached profile");
        assert_eq!(loaded.data.user, user());
        assert_eq!(loaded.data.company, Some(company));

        cache.clear().expect("clear");
        assert!(cache.load_profile().expect("load").is_none());
    }

    #[test]
    fn test_save_replaces_corrupt_profile_without_temp_leftovers() {
        let dir = tempfile::tempdir().expect("temp dir");
        let cache = ProfileCache::new(dir.path().to_path_buf());
        std::fs::write(dir.path().join("profile.json"), "{not json").expect("write");

        cache.save_profile(&user(), None).expect("save over corrupt file");
        let loaded = cache.load_profile().expect("load").expect("cached profile");
        assert_eq!(loaded.data.user, user());

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .expect("read dir")
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["profile.json".to_string()]);
    }

    #[test]
    fn test_corrupt_profile_is_an_error() {
        let dir = tempfile::tempdir().expect("temp dir");
        let cache = ProfileCache::new(dir.path().to_path_buf());
        std::fs::write(dir.path().join("profile.json"), "{not json").expect("write");
        assert!(cache.load_profile().is_err());
    }
}
