//! Key-value persistence consumed by the client
//!
//! The client owns neither the auth token nor the last-success timestamp;
//! both live in a [`KeyValueStore`] supplied by the application.

use dashmap::DashMap;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// Key holding the bearer token
pub const AUTH_TOKEN_KEY: &str = "auth_token";

/// Key holding the RFC 3339 timestamp of the last successful request
pub const LAST_SUCCESS_KEY: &str = "last_successful_request";

/// String key-value storage
pub trait KeyValueStore: Send + Sync + std::fmt::Debug {
    /// Reads a value
    fn get(&self, key: &str) -> Option<String>;

    /// Writes a value
    fn set(&self, key: &str, value: &str);

    /// Deletes a value
    fn remove(&self, key: &str);
}

/// In-memory store
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, String>,
}

impl MemoryStore {
    /// Creates an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared handle to a fresh store
    pub fn shared() -> Arc<dyn KeyValueStore> {
        Arc::new(Self::new())
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).map(|v| v.clone())
    }

    fn set(&self, key: &str, value: &str) {
        self.entries.insert(key.to_string(), value.to_string());
    }

    fn remove(&self, key: &str) {
        self.entries.remove(key);
    }
}

/// Store persisted as a JSON object on disk, rewritten on every change
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl FileStore {
    /// Opens the store, starting empty if the file is missing or unreadable
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = std::fs::read_to_string(&path)
            .ok()
            .and_then(|text| serde_json::from_str(&text).ok())
            .unwrap_or_default();
        Self {
            path,
            entries: Mutex::new(entries),
        }
    }

    fn persist(&self, entries: &BTreeMap<String, String>) {
        let result = serde_json::to_string_pretty(entries)
            .map_err(std::io::Error::other)
            .and_then(|json| {
                if let Some(dir) = self.path.parent() {
                    std::fs::create_dir_all(dir)?;
                }
                std::fs::write(&self.path, json)
            });
        if let Err(e) = result {
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to persist store");
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, String>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        let mut entries = self.lock();
        entries.insert(key.to_string(), value.to_string());
        self.persist(&entries);
    }

    fn remove(&self, key: &str) {
        let mut entries = self.lock();
        if entries.remove(key).is_some() {
            self.persist(&entries);
        }
    }
}

/// Read/write access to the auth token
#[derive(Debug, Clone)]
pub struct TokenStore {
    store: Arc<dyn KeyValueStore>,
}

impl TokenStore {
    /// Wraps a key-value store
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Current token, if any
    pub fn token(&self) -> Option<String> {
        self.store.get(AUTH_TOKEN_KEY).filter(|t| !t.is_empty())
    }

    /// Stores a token
    pub fn set_token(&self, token: &str) {
        self.store.set(AUTH_TOKEN_KEY, token);
    }

    /// Forgets the token
    pub fn clear(&self) {
        self.store.remove(AUTH_TOKEN_KEY);
    }

    /// `Authorization` header value for the current token
    pub fn bearer(&self) -> Option<String> {
        self.token().map(|t| format!("Bearer {t}"))
    }
}
