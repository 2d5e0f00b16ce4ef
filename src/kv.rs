//! Key-value persistence backing the credential store
//!
//! The engine treats persistence as an abstract string-keyed store with
//! `get` / `set` / `delete` / `list_keys` (prefix scan). Hosts embedding the
//! library provide their own implementation; this module ships two:
//! [`MemoryKv`] for tests and single-process embedding, and [`SledKv`], the
//! standalone binary's default, backed by an embedded sled database.

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use directories::ProjectDirs;
use tokio::sync::RwLock;

use crate::error::{ResauthError, Result};

// ---------------------------------------------------------------------------
// KvStore trait
// ---------------------------------------------------------------------------

/// Abstract string-keyed store consumed by the engine.
///
/// Implementations must be safe to share across tasks; the engine performs
/// read-modify-write upserts with last-write-wins semantics and never holds
/// a key locked across calls.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Returns the value stored under `key`, or `None` when absent.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Stores `value` under `key`, replacing any existing value.
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Removes `key`. Removing an absent key is a no-op.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Returns all keys beginning with `prefix`, in ascending order.
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>>;
}

// ---------------------------------------------------------------------------
// MemoryKv
// ---------------------------------------------------------------------------

/// In-memory [`KvStore`] over a sorted map.
///
/// Used by the test suite and by hosts that keep credentials in their own
/// storage layer and only need the engine for protocol work.
#[derive(Default)]
pub struct MemoryKv {
    entries: RwLock<BTreeMap<String, String>>,
}

impl MemoryKv {
    /// Creates an empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>> {
        let entries = self.entries.read().await;
        Ok(entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }
}

// ---------------------------------------------------------------------------
// SledKv
// ---------------------------------------------------------------------------

/// sled-backed [`KvStore`] used by the standalone binary.
///
/// Writes are flushed before returning so a crash immediately after a
/// credential upsert cannot lose the grant the user just completed.
pub struct SledKv {
    db: sled::Db,
}

impl SledKv {
    /// Opens the store at the default application data directory.
    ///
    /// The path can be overridden with the `RESAUTH_KV_PATH` environment
    /// variable, which makes it easy to point the binary at a test database
    /// without touching the user's data dir.
    ///
    /// # Errors
    ///
    /// Returns [`ResauthError::Store`] when no data directory can be
    /// determined, or [`ResauthError::Kv`] when sled fails to open the tree.
    pub fn new() -> Result<Self> {
        if let Ok(override_path) = std::env::var("RESAUTH_KV_PATH") {
            return Self::new_with_path(override_path);
        }

        let proj_dirs = ProjectDirs::from("com", "resauth", "resauth")
            .ok_or_else(|| ResauthError::Store("Could not determine data directory".into()))?;

        let data_dir = proj_dirs.data_dir();
        std::fs::create_dir_all(data_dir)?;

        Self::new_with_path(data_dir.join("credentials.sled"))
    }

    /// Opens the store at the given path, creating it when absent.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use resauth::kv::SledKv;
    ///
    /// let kv = SledKv::new_with_path("/tmp/resauth-test.sled").unwrap();
    /// ```
    pub fn new_with_path<P: Into<PathBuf>>(path: P) -> Result<Self> {
        let db = sled::open(path.into())?;
        Ok(Self { db })
    }
}

#[async_trait]
impl KvStore for SledKv {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        match self.db.get(key)? {
            Some(bytes) => {
                let value = String::from_utf8(bytes.to_vec())
                    .map_err(|e| ResauthError::Store(format!("non-UTF-8 value at {key}: {e}")))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.db.insert(key, value.as_bytes())?;
        self.db.flush_async().await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.db.remove(key)?;
        self.db.flush_async().await?;
        Ok(())
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        for item in self.db.scan_prefix(prefix) {
            let (key, _) = item?;
            let key = String::from_utf8(key.to_vec())
                .map_err(|e| ResauthError::Store(format!("non-UTF-8 key: {e}")))?;
            keys.push(key);
        }
        Ok(keys)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
