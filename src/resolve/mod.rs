//! Resolution API
//!
//! The read side of the engine: given stored credentials, produce
//! `Authorization` headers for resources, resolve batches of MCP servers,
//! and fetch context URLs out of free text. Refreshes expiring tokens
//! in-line and swallows refresh failures, degrading to the stored token;
//! the resource server is the authority on whether a stale token still
//! works.
//!
//! # Module Layout
//!
//! - [`naming`] -- best-effort display names and icons for stored records

pub mod naming;

use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use regex::Regex;
use url::Url;

use crate::error::Result;
use crate::oauth::refresh::{needs_refresh, refresh};
use crate::store::{
    normalize_resource_url, CredentialRecord, CredentialStore, ResourceKind, DEFAULT_PROFILE,
};

/// Cap on bytes kept from any single fetched context document.
pub const DEFAULT_MAX_FETCH_BYTES: usize = 512 * 1024;

// ---------------------------------------------------------------------------
// Result types
// ---------------------------------------------------------------------------

/// How a resource should be authorized, or what to do about it.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedAuth {
    /// Send this `Authorization` header value.
    Header(String),

    /// The resource is known to need no credentials.
    Public,

    /// No usable credential; the user must visit `login_url`.
    LoginRequired { login_url: String },
}

/// Per-server outcome of [`Resolver::resolve_many_mcp_servers`].
#[derive(Debug, Clone, PartialEq)]
pub struct ServerResolution {
    /// The server URL as requested.
    pub url: String,

    /// 200 when usable (header present or public), 401 when a record
    /// exists but carries no usable token, 404 when no record exists.
    pub status: u16,

    /// `Authorization` header value for status 200 non-public records.
    pub authorization: Option<String>,
}

/// One fetched context document.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedDocument {
    pub url: String,
    pub status: u16,

    /// Response `Content-Type` header, when the server sent one.
    pub content_type: Option<String>,

    pub content: String,

    /// Body exceeded the fetch cap and was cut off.
    pub truncated: bool,
}

/// Outcome of [`Resolver::extract_and_fetch`]. A single unauthorized URL
/// aborts the whole batch so the caller knows the context is incomplete.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchBatch {
    /// Every extracted URL was fetched.
    Complete(Vec<FetchedDocument>),

    /// `url` answered 401 and no stored credential could satisfy it; the
    /// user must visit `login_url` before the batch can succeed.
    Unauthorized { url: String, login_url: String },
}

enum FetchOutcome {
    Document(FetchedDocument),
    NeedsLogin { url: String, login_url: String },
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

/// Answers "how do I call this resource" questions against the credential
/// store, refreshing tokens as needed.
#[derive(Clone)]
pub struct Resolver {
    http: Arc<reqwest::Client>,
    store: CredentialStore,
    base_url: String,
    path_prefix: String,
    max_fetch_bytes: usize,
}

impl Resolver {
    pub fn new(
        http: Arc<reqwest::Client>,
        store: CredentialStore,
        base_url: &str,
        path_prefix: &str,
        max_fetch_bytes: usize,
    ) -> Self {
        Self {
            http,
            store,
            base_url: base_url.trim_end_matches('/').to_string(),
            path_prefix: path_prefix.to_string(),
            max_fetch_bytes,
        }
    }

    /// Resolves the `Authorization` header for one resource.
    ///
    /// Looks the resource up by prefix, refreshes the token first when it
    /// is within the expiry window, and returns whatever token is stored
    /// even if refresh failed; a stale token the resource may still accept
    /// beats failing outright. With no usable record the caller gets a
    /// login URL instead.
    pub async fn authorization_for(
        &self,
        kind: ResourceKind,
        user: &str,
        profile: &str,
        url: &str,
    ) -> Result<ResolvedAuth> {
        let Some(record) = self.store.lookup_prefix(kind, user, profile, url).await? else {
            return Ok(ResolvedAuth::LoginRequired {
                login_url: self.login_url(kind, url, profile),
            });
        };

        let record = self.refreshed(kind, user, record).await;

        if let Some(header) = record.authorization_header() {
            return Ok(ResolvedAuth::Header(header));
        }
        if record.public {
            return Ok(ResolvedAuth::Public);
        }
        Ok(ResolvedAuth::LoginRequired {
            login_url: self.login_url(kind, url, profile),
        })
    }

    /// Resolves a batch of MCP server URLs in parallel.
    ///
    /// Status per server: 200 with the header for authorized servers, 200
    /// without one for public servers, 401 when a record exists but holds
    /// no usable token, 404 when the server is entirely unknown.
    pub async fn resolve_many_mcp_servers(
        &self,
        servers: &[String],
        user: &str,
        profile: &str,
    ) -> Result<Vec<ServerResolution>> {
        let lookups = servers.iter().map(|url| async move {
            let record = self
                .store
                .lookup_prefix(ResourceKind::Mcp, user, profile, url)
                .await?;

            let resolution = match record {
                None => ServerResolution {
                    url: url.clone(),
                    status: 404,
                    authorization: None,
                },
                Some(record) => {
                    let record = self.refreshed(ResourceKind::Mcp, user, record).await;
                    match record.authorization_header() {
                        Some(header) => ServerResolution {
                            url: url.clone(),
                            status: 200,
                            authorization: Some(header),
                        },
                        None if record.public => ServerResolution {
                            url: url.clone(),
                            status: 200,
                            authorization: None,
                        },
                        None => ServerResolution {
                            url: url.clone(),
                            status: 401,
                            authorization: None,
                        },
                    }
                }
            };
            Ok(resolution)
        });

        join_all(lookups).await.into_iter().collect()
    }

    /// Extracts URLs from free text and fetches them all in parallel.
    ///
    /// Each URL is fetched unauthenticated first. A 401 triggers resource
    /// discovery to find the canonical resource URL, a credential lookup
    /// under that URL, an in-line refresh when due, and one authorized
    /// retry. Any URL that still cannot be fetched with authorization
    /// aborts the batch with [`FetchBatch::Unauthorized`]; partial context
    /// silently missing a document is worse than no context.
    ///
    /// # Errors
    ///
    /// Transport failures (unreachable hosts, timeouts) propagate as
    /// errors; they indicate the batch could not be attempted, not that
    /// authorization is missing.
    pub async fn extract_and_fetch(
        &self,
        text: &str,
        user: &str,
        profile: &str,
    ) -> Result<FetchBatch> {
        let urls = extract_urls(text);

        let fetches = urls
            .iter()
            .map(|url| self.fetch_one(user, profile, url.clone()));
        let outcomes: Vec<Result<FetchOutcome>> = join_all(fetches).await;

        let mut documents = Vec::with_capacity(urls.len());
        for outcome in outcomes {
            match outcome? {
                FetchOutcome::Document(doc) => documents.push(doc),
                FetchOutcome::NeedsLogin { url, login_url } => {
                    return Ok(FetchBatch::Unauthorized { url, login_url });
                }
            }
        }
        Ok(FetchBatch::Complete(documents))
    }

    // -----------------------------------------------------------------------
    // Private helpers
    // -----------------------------------------------------------------------

    /// Refreshes `record` when due. Refresh failures degrade to the stored
    /// record rather than propagating.
    async fn refreshed(
        &self,
        kind: ResourceKind,
        user: &str,
        record: CredentialRecord,
    ) -> CredentialRecord {
        if !needs_refresh(&record, Utc::now()) {
            return record;
        }
        match refresh(&self.http, &self.store, kind, user, &record).await {
            Ok(updated) => updated,
            Err(e) => {
                tracing::warn!(
                    kind = %kind,
                    user = %user,
                    url = %record.url,
                    error = %e,
                    "token refresh failed, using stored token"
                );
                record
            }
        }
    }

    async fn fetch_one(&self, user: &str, profile: &str, url: String) -> Result<FetchOutcome> {
        let resp = self.http.get(&url).send().await?;

        if resp.status().as_u16() != 401 {
            return Ok(FetchOutcome::Document(self.read_document(url, resp).await?));
        }

        let www_authenticate = resp
            .headers()
            .get("www-authenticate")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        // The literal URL from the text may canonicalize to a different
        // resource (e.g. a sub-path canonicalizing to its API root). Fall
        // back to the literal URL when the resource publishes no metadata.
        let requested = Url::parse(&url)
            .map_err(|e| crate::error::ResauthError::InvalidUrl(format!("{url}: {e}")))?;
        let canonical = match crate::oauth::discovery::discover_resource_metadata(
            &self.http,
            &requested,
            www_authenticate.as_deref(),
        )
        .await
        {
            Ok(meta) => meta.resource,
            Err(_) => normalize_resource_url(&url)?,
        };

        let login_url = self.login_url(ResourceKind::Context, &canonical, profile);

        let Some(record) = self
            .store
            .lookup_prefix(ResourceKind::Context, user, profile, &canonical)
            .await?
        else {
            return Ok(FetchOutcome::NeedsLogin { url, login_url });
        };

        let record = self.refreshed(ResourceKind::Context, user, record).await;
        let Some(header) = record.authorization_header() else {
            return Ok(FetchOutcome::NeedsLogin { url, login_url });
        };

        let retry = self
            .http
            .get(&url)
            .header(reqwest::header::AUTHORIZATION, header)
            .send()
            .await?;
        if retry.status().as_u16() == 401 {
            return Ok(FetchOutcome::NeedsLogin { url, login_url });
        }
        Ok(FetchOutcome::Document(self.read_document(url, retry).await?))
    }

    /// Reads a response body, cutting it off at the fetch cap.
    async fn read_document(&self, url: String, resp: reqwest::Response) -> Result<FetchedDocument> {
        let status = resp.status().as_u16();
        let content_type = resp
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = resp.bytes().await?;

        let mut truncated = false;
        let slice = if bytes.len() > self.max_fetch_bytes {
            truncated = true;
            &bytes[..self.max_fetch_bytes]
        } else {
            &bytes[..]
        };

        Ok(FetchedDocument {
            url,
            status,
            content_type,
            content: String::from_utf8_lossy(slice).to_string(),
            truncated,
        })
    }

    /// Login URL a user can visit to authorize `url`.
    fn login_url(&self, kind: ResourceKind, url: &str, profile: &str) -> String {
        let mut login = format!(
            "{}{}/login/{}?url={}",
            self.base_url,
            self.path_prefix,
            kind.as_str(),
            encode_query_value(url)
        );
        if profile != DEFAULT_PROFILE {
            login.push_str("&profile=");
            login.push_str(&encode_query_value(profile));
        }
        login
    }
}

fn encode_query_value(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

// ---------------------------------------------------------------------------
// URL extraction
// ---------------------------------------------------------------------------

/// Pulls `http(s)` URLs out of free text: markdown link targets first,
/// then bare URLs. Deduplicated in order of first appearance; candidates
/// that do not parse are dropped.
pub fn extract_urls(text: &str) -> Vec<String> {
    let mut urls: Vec<String> = Vec::new();

    let mut push = |candidate: &str| {
        let trimmed = candidate.trim_end_matches(['.', ',', ';', ':', '!', '?']);
        if Url::parse(trimmed).is_ok() && !urls.iter().any(|u| u == trimmed) {
            urls.push(trimmed.to_string());
        }
    };

    if let Ok(markdown) = Regex::new(r"\[[^\]]*\]\((https?://[^)\s]+)\)") {
        for captures in markdown.captures_iter(text) {
            push(&captures[1]);
        }
    }
    if let Ok(bare) = Regex::new(r#"https?://[^\s<>"')\]]+"#) {
        for m in bare.find_iter(text) {
            push(m.as_str());
        }
    }

    urls
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
