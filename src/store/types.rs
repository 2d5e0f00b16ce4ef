use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The two kinds of protected resource the engine authorizes against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    /// A remote MCP tool server.
    Mcp,
    /// A remote context/document endpoint.
    Context,
}

impl ResourceKind {
    /// Returns the lowercase wire/key representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Mcp => "mcp",
            ResourceKind::Context => "context",
        }
    }

    /// Parses the lowercase representation; `None` for anything else.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "mcp" => Some(ResourceKind::Mcp),
            "context" => Some(ResourceKind::Context),
            _ => None,
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Advisory cosmetic metadata discovered about a resource.
///
/// Populated best-effort from the MCP `initialize` response and icon
/// scraping; never required for authorization to work.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceMetadataInfo {
    /// Icon URL for UI display.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    /// Short description the resource reports about itself.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Version string the resource reports.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Website URL the resource reports.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    /// Anything else the resource reported that is worth keeping.
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl ResourceMetadataInfo {
    /// True when no field carries a value.
    pub fn is_empty(&self) -> bool {
        self.icon.is_none()
            && self.description.is_none()
            && self.version.is_none()
            && self.website.is_none()
            && self.extra.is_empty()
    }
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

/// One stored credential, keyed by `(user, profile, kind, url)`.
///
/// Persisted as JSON in the key-value store. Timestamps are RFC 3339
/// strings; `updated_at` is the anchor for the refresh-expiry calculation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialRecord {
    /// Free-form namespace the user groups credentials under. A partition
    /// key, not a security boundary.
    pub profile: String,

    /// Canonical resource URL this credential authorizes.
    pub url: String,

    /// Human-readable label, best-effort discovered.
    pub name: String,

    /// This application's OAuth client identity at the resource's
    /// authorization server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    /// Client secret, when the server issued one. Public clients are common.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// Token endpoint remembered so refresh does not need rediscovery.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_endpoint: Option<String>,

    /// Token type, typically `"Bearer"`.
    #[serde(default = "default_token_type")]
    pub token_type: String,

    /// Access-token lifetime in seconds, relative to `updated_at`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<i64>,

    /// Space-separated scopes granted by the authorization server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,

    /// When this record was first created. Preserved across upserts.
    pub created_at: DateTime<Utc>,

    /// When this record was last written. The refresh anchor.
    pub updated_at: DateTime<Utc>,

    /// True when a probe determined the resource needs no authorization.
    /// Public records carry no tokens.
    #[serde(default)]
    pub public: bool,

    /// Advisory cosmetic metadata (icon, description, version, website).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ResourceMetadataInfo>,
}

impl CredentialRecord {
    /// Creates a fresh record with both timestamps set to `now` and no
    /// client identity or tokens.
    pub fn new(profile: &str, url: &str, name: &str, now: DateTime<Utc>) -> Self {
        Self {
            profile: profile.to_string(),
            url: url.to_string(),
            name: name.to_string(),
            client_id: None,
            client_secret: None,
            access_token: None,
            refresh_token: None,
            token_endpoint: None,
            token_type: default_token_type(),
            expires_in: None,
            scope: None,
            created_at: now,
            updated_at: now,
            public: false,
            metadata: None,
        }
    }

    /// Renders the `Authorization` header value, `"{token_type} {token}"`,
    /// when an access token is stored. Even a stale token yields a header;
    /// the resource server is the authority on whether it still works.
    pub fn authorization_header(&self) -> Option<String> {
        self.access_token
            .as_ref()
            .map(|token| format!("{} {}", self.token_type, token))
    }
}

/// Field-by-field merge applied by `CredentialStore::upsert`.
///
/// `Some` values overwrite the stored record; `None` leaves the existing
/// value untouched, so a refresh that returns no new refresh token keeps
/// the old one.
#[derive(Debug, Clone, Default)]
pub struct UpsertOptions {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub token_endpoint: Option<String>,
    pub token_type: Option<String>,
    pub expires_in: Option<i64>,
    pub scope: Option<String>,
    pub public: Option<bool>,
    pub metadata: Option<ResourceMetadataInfo>,
}

impl CredentialRecord {
    /// Applies `options` onto this record and bumps `updated_at`.
    pub fn apply(&mut self, options: UpsertOptions, now: DateTime<Utc>) {
        if let Some(v) = options.client_id {
            self.client_id = Some(v);
        }
        if let Some(v) = options.client_secret {
            self.client_secret = Some(v);
        }
        if let Some(v) = options.access_token {
            self.access_token = Some(v);
        }
        if let Some(v) = options.refresh_token {
            self.refresh_token = Some(v);
        }
        if let Some(v) = options.token_endpoint {
            self.token_endpoint = Some(v);
        }
        if let Some(v) = options.token_type {
            self.token_type = v;
        }
        if let Some(v) = options.expires_in {
            self.expires_in = Some(v);
        }
        if let Some(v) = options.scope {
            self.scope = Some(v);
        }
        if let Some(v) = options.public {
            self.public = v;
        }
        if let Some(v) = options.metadata {
            self.metadata = Some(v);
        }
        self.updated_at = now;
    }
}
