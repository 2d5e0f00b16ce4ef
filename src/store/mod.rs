//! Multi-tenant credential persistence
//!
//! This module stores one [`CredentialRecord`] per
//! `(user, profile, resource kind, url)` tuple in the key-value store,
//! plus a per-user registry of profile names. Records are JSON values under
//! deterministic keys:
//!
//! ```text
//! cred:{kind}:{user}:{profile}:{url}     (each segment form-urlencoded)
//! profiles:{user}
//! ```
//!
//! Malformed persisted records fail fast with [`ResauthError::Store`] rather
//! than propagating partial data. Writes are read-modify-write upserts with
//! last-write-wins semantics; the original `created_at` survives every
//! upsert.

use std::sync::Arc;

use chrono::Utc;
use url::Url;

use crate::error::{ResauthError, Result};
use crate::kv::KvStore;

pub mod types;
pub use types::{CredentialRecord, ResourceKind, ResourceMetadataInfo, UpsertOptions};

/// Profile used when the caller does not name one.
pub const DEFAULT_PROFILE: &str = "default";

/// Hard cap on profile names per user; registration past this is rejected.
pub const MAX_PROFILES_PER_USER: usize = 64;

// ---------------------------------------------------------------------------
// Key construction
// ---------------------------------------------------------------------------

/// Form-urlencodes one key segment so free-form values (profile names,
/// URLs) cannot forge the `:` separators.
fn encode_segment(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

fn credential_key(kind: ResourceKind, user: &str, profile: &str, url: &str) -> String {
    format!(
        "cred:{}:{}:{}:{}",
        kind.as_str(),
        encode_segment(user),
        encode_segment(profile),
        encode_segment(url)
    )
}

fn credential_prefix(kind: ResourceKind, user: &str) -> String {
    format!("cred:{}:{}:", kind.as_str(), encode_segment(user))
}

fn profiles_key(user: &str) -> String {
    format!("profiles:{}", encode_segment(user))
}

// ---------------------------------------------------------------------------
// URL normalization
// ---------------------------------------------------------------------------

/// Normalizes a resource URL into the canonical string form used as the
/// storage key: scheme, host, non-default port, and path with no trailing
/// slash, query, or fragment. `https://a.com/` and `https://a.com` collapse
/// to the same record.
///
/// # Errors
///
/// Returns [`ResauthError::InvalidUrl`] for unparseable URLs or non-HTTP
/// schemes.
pub fn normalize_resource_url(url: &str) -> Result<String> {
    let parsed =
        Url::parse(url).map_err(|e| ResauthError::InvalidUrl(format!("{url}: {e}")))?;

    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(ResauthError::InvalidUrl(format!(
            "{url}: unsupported scheme {}",
            parsed.scheme()
        )));
    }

    let host = parsed
        .host_str()
        .ok_or_else(|| ResauthError::InvalidUrl(format!("{url}: missing host")))?;

    let mut normalized = format!("{}://{}", parsed.scheme(), host);
    if let Some(port) = parsed.port() {
        normalized.push_str(&format!(":{port}"));
    }

    let path = parsed.path().trim_end_matches('/');
    if !path.is_empty() {
        normalized.push_str(path);
    }

    Ok(normalized)
}

/// Builds lookup candidates from the full path down to the bare origin, so
/// a credential registered for a narrower sub-path wins over one registered
/// for the origin.
///
/// `https://a.com/v1/widgets` yields `["https://a.com/v1/widgets",
/// "https://a.com/v1", "https://a.com"]`.
pub fn prefix_candidates(normalized_url: &str) -> Vec<String> {
    let mut candidates = vec![normalized_url.to_string()];
    let mut current = normalized_url;

    // The scheme's "//" must not count as a path separator.
    let authority_end = current.find("://").map(|i| i + 3).unwrap_or(0);
    while let Some(slash) = current[authority_end..].rfind('/') {
        current = &current[..authority_end + slash];
        candidates.push(current.to_string());
    }

    candidates
}

// ---------------------------------------------------------------------------
// CredentialStore
// ---------------------------------------------------------------------------

/// Credential persistence over an abstract [`KvStore`].
///
/// Cheap to clone; all clones share the same backing store.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use resauth::kv::MemoryKv;
/// use resauth::store::{CredentialStore, ResourceKind, UpsertOptions};
///
/// # async fn example() -> resauth::error::Result<()> {
/// let store = CredentialStore::new(Arc::new(MemoryKv::new()));
/// store
///     .upsert(
///         ResourceKind::Mcp,
///         "alice",
///         "default",
///         "https://mcp.example.com/tools",
///         "example tools",
///         UpsertOptions::default(),
///     )
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct CredentialStore {
    kv: Arc<dyn KvStore>,
}

impl CredentialStore {
    /// Creates a store over the given key-value backend.
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    /// Loads the record for an exact `(kind, user, profile, url)` tuple.
    ///
    /// The URL is normalized before lookup. Returns `Ok(None)` when no
    /// record exists.
    ///
    /// # Errors
    ///
    /// Returns [`ResauthError::Store`] when a persisted record fails to
    /// deserialize, and [`ResauthError::InvalidUrl`] for malformed URLs.
    pub async fn get(
        &self,
        kind: ResourceKind,
        user: &str,
        profile: &str,
        url: &str,
    ) -> Result<Option<CredentialRecord>> {
        let normalized = normalize_resource_url(url)?;
        let key = credential_key(kind, user, profile, &normalized);
        self.load(&key).await
    }

    /// Creates or merges a record for the tuple, preserving `created_at`.
    ///
    /// `name` always overwrites the stored label; `options` fields merge as
    /// described on [`UpsertOptions`]. The profile is registered
    /// idempotently as a side effect.
    ///
    /// # Errors
    ///
    /// Propagates store errors, URL normalization failures, and the profile
    /// cap from [`Self::register_profile`].
    pub async fn upsert(
        &self,
        kind: ResourceKind,
        user: &str,
        profile: &str,
        url: &str,
        name: &str,
        options: UpsertOptions,
    ) -> Result<CredentialRecord> {
        let normalized = normalize_resource_url(url)?;
        let key = credential_key(kind, user, profile, &normalized);
        let now = Utc::now();

        let mut record = match self.load(&key).await? {
            Some(existing) => existing,
            None => CredentialRecord::new(profile, &normalized, name, now),
        };
        record.name = name.to_string();
        record.apply(options, now);

        self.register_profile(user, profile).await?;

        let json = serde_json::to_string(&record)?;
        self.kv.set(&key, &json).await?;

        tracing::debug!(
            kind = %kind,
            user = %user,
            profile = %profile,
            url = %normalized,
            public = record.public,
            "stored credential record"
        );
        Ok(record)
    }

    /// Deletes the record for the tuple. Deleting an absent record is a
    /// no-op.
    pub async fn remove(
        &self,
        kind: ResourceKind,
        user: &str,
        profile: &str,
        url: &str,
    ) -> Result<()> {
        let normalized = normalize_resource_url(url)?;
        let key = credential_key(kind, user, profile, &normalized);
        self.kv.delete(&key).await
    }

    /// Lists every record of the given kind for the user, across all
    /// profiles.
    pub async fn list_all(&self, kind: ResourceKind, user: &str) -> Result<Vec<CredentialRecord>> {
        let prefix = credential_prefix(kind, user);
        let keys = self.kv.list_keys(&prefix).await?;

        let mut records = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(record) = self.load(&key).await? {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// Lists records of the given kind whose URL matches one of `urls`,
    /// across all profiles.
    pub async fn list_by_urls(
        &self,
        kind: ResourceKind,
        user: &str,
        urls: &[String],
    ) -> Result<Vec<CredentialRecord>> {
        let mut wanted = Vec::with_capacity(urls.len());
        for url in urls {
            wanted.push(normalize_resource_url(url)?);
        }

        let all = self.list_all(kind, user).await?;
        Ok(all
            .into_iter()
            .filter(|record| wanted.iter().any(|w| w == &record.url))
            .collect())
    }

    /// Longest-prefix-first lookup: probes the full path, then each parent
    /// path, down to the bare origin, returning the most specific record.
    ///
    /// A single authorization registered at `https://api.example.com`
    /// satisfies requests to `https://api.example.com/v1/x`, while a more
    /// specific grant for `/v1` still wins when present.
    pub async fn lookup_prefix(
        &self,
        kind: ResourceKind,
        user: &str,
        profile: &str,
        url: &str,
    ) -> Result<Option<CredentialRecord>> {
        let normalized = normalize_resource_url(url)?;
        for candidate in prefix_candidates(&normalized) {
            let key = credential_key(kind, user, profile, &candidate);
            if let Some(record) = self.load(&key).await? {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }

    /// Adds `name` to the user's profile registry. Idempotent; rejects new
    /// names past [`MAX_PROFILES_PER_USER`].
    ///
    /// # Errors
    ///
    /// Returns [`ResauthError::Store`] for empty names or when the cap is
    /// reached.
    pub async fn register_profile(&self, user: &str, name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(ResauthError::Store("profile name must not be empty".into()));
        }

        let key = profiles_key(user);
        let mut profiles: Vec<String> = match self.kv.get(&key).await? {
            Some(json) => serde_json::from_str(&json)
                .map_err(|e| ResauthError::Store(format!("malformed profile registry: {e}")))?,
            None => Vec::new(),
        };

        if profiles.iter().any(|p| p == name) {
            return Ok(());
        }
        if profiles.len() >= MAX_PROFILES_PER_USER {
            return Err(ResauthError::Store(format!(
                "profile limit reached ({MAX_PROFILES_PER_USER})"
            )));
        }

        profiles.push(name.to_string());
        let json = serde_json::to_string(&profiles)?;
        self.kv.set(&key, &json).await
    }

    /// Returns the user's registered profile names, in registration order.
    pub async fn list_profiles(&self, user: &str) -> Result<Vec<String>> {
        let key = profiles_key(user);
        match self.kv.get(&key).await? {
            Some(json) => serde_json::from_str(&json)
                .map_err(|e| ResauthError::Store(format!("malformed profile registry: {e}"))),
            None => Ok(Vec::new()),
        }
    }

    /// Persists an already-merged record back under its own tuple. Used by
    /// the refresh path, which mutates a loaded record in place.
    pub async fn persist(
        &self,
        kind: ResourceKind,
        user: &str,
        record: &CredentialRecord,
    ) -> Result<()> {
        let key = credential_key(kind, user, &record.profile, &record.url);
        let json = serde_json::to_string(record)?;
        self.kv.set(&key, &json).await
    }

    async fn load(&self, key: &str) -> Result<Option<CredentialRecord>> {
        match self.kv.get(key).await? {
            Some(json) => {
                let record: CredentialRecord = serde_json::from_str(&json).map_err(|e| {
                    ResauthError::Store(format!("malformed credential record at {key}: {e}"))
                })?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
