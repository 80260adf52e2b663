use anyhow::{Context, Result};
use keyring::Entry;

use super::store::{
    pair_from_entries, TokenStore, ACCESS_TOKEN_KEY, EXPIRES_AT_KEY, REFRESH_TOKEN_KEY,
};
use super::tokens::TokenPair;

const SERVICE_NAME: &str = "querydeck";

/// Token store backed by the OS keychain, one entry per key.
pub struct KeyringTokenStore {
    service: String,
}

impl KeyringTokenStore {
    pub fn new() -> Self {
        Self {
            service: SERVICE_NAME.to_string(),
        }
    }

    fn entry(&self, key: &str) -> Result<Entry> {
        Entry::new(&self.service, key).context("Failed to create keyring entry")
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        match self.entry(key)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e).context("Failed to retrieve token from keychain"),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entry(key)?
            .set_password(value)
            .context("Failed to store token in keychain")
    }

    fn delete(&self, key: &str) -> Result<()> {
        match self.entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e).context("Failed to delete token from keychain"),
        }
    }
}

impl Default for KeyringTokenStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenStore for KeyringTokenStore {
    fn save(&self, pair: &TokenPair) -> Result<()> {
        // Expiry goes last: a pair missing it loads as absent.
        self.delete(EXPIRES_AT_KEY)?;
        self.set(ACCESS_TOKEN_KEY, &pair.access_token)?;
        self.set(REFRESH_TOKEN_KEY, &pair.refresh_token)?;
        self.set(EXPIRES_AT_KEY, &pair.expires_at.to_rfc3339())
    }

    fn load(&self) -> Result<Option<TokenPair>> {
        Ok(pair_from_entries(
            self.get(ACCESS_TOKEN_KEY)?,
            self.get(REFRESH_TOKEN_KEY)?,
            self.get(EXPIRES_AT_KEY)?,
        ))
    }

    fn clear(&self) -> Result<()> {
        self.delete(EXPIRES_AT_KEY)?;
        self.delete(ACCESS_TOKEN_KEY)?;
        self.delete(REFRESH_TOKEN_KEY)
    }
}
