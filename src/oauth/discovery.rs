//! OAuth 2.1 / OIDC metadata discovery
//!
//! This module implements RFC 9728 Protected Resource Metadata discovery and
//! RFC 8414 / OpenID Connect Discovery to locate authorization server
//! endpoints before running the authorization code flow.
//!
//! # Discovery sequence
//!
//! 1. The engine issues an unauthenticated request to the resource server.
//! 2. The server responds with `401 Unauthorized` and a `WWW-Authenticate`
//!    header that may contain a `resource_metadata` attribute pointing to the
//!    protected resource metadata document.
//! 3. [`discover_resource_metadata`] tries that URL first, then the RFC 9728
//!    path-scoped well-known URI, then the root well-known URI, recording
//!    each failed candidate.
//! 4. The document lists one or more authorization server issuers;
//!    [`discover_authorization_server`] walks them in order.
//! 5. For each issuer, up to five well-known endpoint orderings defined by
//!    RFC 8414 and OpenID Connect Discovery 1.0 are tried.
//!
//! Every failed candidate is collected into [`DiscoveryAttempt`] records so
//! an exhausted discovery reports the full list of URLs it probed.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{DiscoveryAttempt, ResauthError, Result};

// ---------------------------------------------------------------------------
// Protected Resource Metadata (RFC 9728)
// ---------------------------------------------------------------------------

/// Metadata document describing a protected OAuth 2.1 resource.
///
/// Retrieved from the well-known URI
/// `/.well-known/oauth-protected-resource<path>` or from the URL embedded in
/// a `WWW-Authenticate: Bearer resource_metadata=<url>` challenge header.
///
/// # References
///
/// - RFC 9728 <https://www.rfc-editor.org/rfc/rfc9728>
///
/// # Examples
///
/// ```
/// use resauth::oauth::discovery::ProtectedResourceMetadata;
///
/// let json = r#"{
///     "resource": "https://api.example.com",
///     "authorization_servers": ["https://auth.example.com"]
/// }"#;
///
/// let meta: ProtectedResourceMetadata = serde_json::from_str(json).unwrap();
/// assert_eq!(meta.resource, "https://api.example.com");
/// assert_eq!(meta.authorization_servers.len(), 1);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ProtectedResourceMetadata {
    /// The URI of the protected resource itself. Used as the canonical
    /// resource identifier in stored credentials and `resource` parameters.
    pub resource: String,

    /// List of authorization server issuer URIs that protect this resource.
    pub authorization_servers: Vec<String>,

    /// OAuth scopes supported by this resource, if advertised.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scopes_supported: Option<Vec<String>>,

    /// Supported methods for presenting bearer tokens (e.g. `"header"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bearer_methods_supported: Option<Vec<String>>,

    /// Human-readable name of the resource, if advertised.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_name: Option<String>,
}

// ---------------------------------------------------------------------------
// Authorization Server Metadata (RFC 8414 / OIDC Discovery)
// ---------------------------------------------------------------------------

/// Metadata document describing an OAuth 2.1 / OIDC authorization server.
///
/// Retrieved from one of several well-known URIs tried in order by
/// [`discover_authorization_server`]. Only the issuer, authorization
/// endpoint, and token endpoint are required; everything else degrades to
/// `None`.
///
/// # References
///
/// - RFC 8414 <https://www.rfc-editor.org/rfc/rfc8414>
/// - OpenID Connect Discovery 1.0 <https://openid.net/specs/openid-connect-discovery-1_0.html>
///
/// # Examples
///
/// ```
/// use resauth::oauth::discovery::AuthorizationServerMetadata;
///
/// let json = r#"{
///     "issuer": "https://auth.example.com",
///     "authorization_endpoint": "https://auth.example.com/authorize",
///     "token_endpoint": "https://auth.example.com/token"
/// }"#;
///
/// let meta: AuthorizationServerMetadata = serde_json::from_str(json).unwrap();
/// assert_eq!(meta.issuer, "https://auth.example.com");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AuthorizationServerMetadata {
    /// The issuer identifier URI for this authorization server.
    pub issuer: String,

    /// The URL of the authorization endpoint (RFC 6749 section 3.1).
    pub authorization_endpoint: String,

    /// The URL of the token endpoint (RFC 6749 section 3.2).
    pub token_endpoint: String,

    /// Optional URL of the Dynamic Client Registration endpoint (RFC 7591).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registration_endpoint: Option<String>,

    /// List of OAuth scopes the server supports.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scopes_supported: Option<Vec<String>>,

    /// List of `response_type` values the server supports (e.g. `["code"]`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_types_supported: Option<Vec<String>>,

    /// List of `grant_type` values the server supports.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grant_types_supported: Option<Vec<String>>,

    /// PKCE challenge methods the server supports (e.g. `["S256"]`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_challenge_methods_supported: Option<Vec<String>>,

    /// Whether the server accepts a client metadata document URL directly as
    /// the `client_id` value, making dynamic registration unnecessary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id_metadata_document_supported: Option<bool>,

    /// Additional server metadata fields not explicitly modelled above.
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

// ---------------------------------------------------------------------------
// WWW-Authenticate parsing
// ---------------------------------------------------------------------------

/// Parses the `resource_metadata` attribute value from a `WWW-Authenticate`
/// header string.
///
/// Returns `Some(url_string)` when the attribute is present, `None`
/// otherwise. Both quoted and unquoted attribute forms are accepted.
pub fn parse_resource_metadata_url(www_authenticate: &str) -> Option<String> {
    // Look for resource_metadata="<url>" or resource_metadata=<url>
    let key = "resource_metadata=";
    let pos = www_authenticate.find(key)?;
    let rest = &www_authenticate[pos + key.len()..];

    if let Some(inner) = rest.strip_prefix('"') {
        // Quoted string -- extract up to the closing quote.
        let end = inner.find('"')?;
        Some(inner[..end].to_string())
    } else {
        // Unquoted -- extract up to the next whitespace or comma.
        let end = rest
            .find(|c: char| c.is_whitespace() || c == ',')
            .unwrap_or(rest.len());
        Some(rest[..end].to_string())
    }
}

// ---------------------------------------------------------------------------
// Protected resource discovery
// ---------------------------------------------------------------------------

/// Builds the ordered candidate URLs for protected resource metadata.
///
/// 1. The URL from the `WWW-Authenticate` header, when one was provided.
/// 2. The path-scoped well-known URI
///    `https://<host>/.well-known/oauth-protected-resource<path>`, only when
///    the resource URL has a non-root path.
/// 3. The root well-known URI
///    `https://<host>/.well-known/oauth-protected-resource`.
fn build_resource_candidate_urls(resource_url: &Url, www_authenticate: Option<&str>) -> Vec<Url> {
    let mut candidates: Vec<Url> = Vec::with_capacity(3);

    if let Some(header) = www_authenticate {
        if let Some(meta_url_str) = parse_resource_metadata_url(header) {
            if let Ok(meta_url) = Url::parse(&meta_url_str) {
                candidates.push(meta_url);
            }
        }
    }

    let path = resource_url.path().trim_end_matches('/');
    let mut push_well_known = |well_known_path: String, candidates: &mut Vec<Url>| {
        let mut url = resource_url.clone();
        url.set_path(&well_known_path);
        url.set_query(None);
        url.set_fragment(None);
        if !candidates.contains(&url) {
            candidates.push(url);
        }
    };

    if !path.is_empty() {
        push_well_known(
            format!("/.well-known/oauth-protected-resource{path}"),
            &mut candidates,
        );
    }
    push_well_known(
        "/.well-known/oauth-protected-resource".to_string(),
        &mut candidates,
    );

    candidates
}

/// Fetches the RFC 9728 Protected Resource Metadata document for a resource.
///
/// Candidates are tried in the order built by the header-first chain above;
/// the first document that parses and lists at least one authorization
/// server wins. HTTP failures, non-2xx statuses, parse failures, and empty
/// issuer lists are all recorded per candidate.
///
/// # Arguments
///
/// * `http` - Shared [`reqwest::Client`] used to issue the discovery requests.
/// * `resource_url` - The URL of the protected resource.
/// * `www_authenticate` - Optional value of the `WWW-Authenticate` response
///   header returned by the resource server on a `401` response.
///
/// # Errors
///
/// Returns [`ResauthError::Discovery`] listing every candidate tried and the
/// per-candidate failure reason when all candidates are exhausted.
///
/// # Examples
///
/// ```no_run
/// use url::Url;
/// use resauth::oauth::discovery::discover_resource_metadata;
///
/// # async fn example() -> resauth::error::Result<()> {
/// let http = reqwest::Client::new();
/// let resource = Url::parse("https://api.example.com/mcp")?;
/// let meta = discover_resource_metadata(&http, &resource, None).await?;
/// println!("auth server: {}", meta.authorization_servers[0]);
/// # Ok(())
/// # }
/// ```
pub async fn discover_resource_metadata(
    http: &reqwest::Client,
    resource_url: &Url,
    www_authenticate: Option<&str>,
) -> Result<ProtectedResourceMetadata> {
    let candidates = build_resource_candidate_urls(resource_url, www_authenticate);
    let mut attempts: Vec<DiscoveryAttempt> = Vec::with_capacity(candidates.len());

    for candidate in candidates {
        match try_fetch_metadata::<ProtectedResourceMetadata>(http, &candidate).await {
            Ok(meta) => {
                if meta.authorization_servers.is_empty() {
                    attempts.push(DiscoveryAttempt {
                        url: candidate.to_string(),
                        reason: "no authorization servers listed".to_string(),
                    });
                    continue;
                }
                tracing::debug!(
                    resource = %resource_url,
                    metadata_url = %candidate,
                    "protected resource metadata found"
                );
                return Ok(meta);
            }
            Err(reason) => attempts.push(DiscoveryAttempt {
                url: candidate.to_string(),
                reason,
            }),
        }
    }

    Err(ResauthError::Discovery {
        subject: resource_url.to_string(),
        attempts,
    })
}

// ---------------------------------------------------------------------------
// Authorization server discovery
// ---------------------------------------------------------------------------

/// Constructs the candidate well-known URLs for authorization server
/// metadata discovery.
///
/// For issuers with a non-root path, five orderings are tried:
///
/// 1. `/.well-known/oauth-authorization-server/<path>` (path insertion)
/// 2. `/.well-known/openid-configuration/<path>` (path insertion)
/// 3. `<issuer>/.well-known/openid-configuration` (path appending)
/// 4. `/.well-known/oauth-authorization-server` (root)
/// 5. `/.well-known/openid-configuration` (root)
///
/// For issuers without a path only the two root forms apply. Duplicate
/// candidates are dropped.
fn build_as_candidate_urls(issuer: &Url) -> Vec<Url> {
    let path = issuer.path().trim_end_matches('/').to_string();
    let mut candidates: Vec<Url> = Vec::with_capacity(5);

    let mut push = |s: String, candidates: &mut Vec<Url>| {
        if let Ok(url) = Url::parse(&s) {
            if !candidates.contains(&url) {
                candidates.push(url);
            }
        }
    };

    let mut origin = format!(
        "{}://{}",
        issuer.scheme(),
        issuer.host_str().unwrap_or_default()
    );
    if let Some(port) = issuer.port() {
        origin.push_str(&format!(":{port}"));
    }

    if !path.is_empty() {
        // 1. Path-inserted oauth-authorization-server
        push(
            format!("{origin}/.well-known/oauth-authorization-server{path}"),
            &mut candidates,
        );
        // 2. Path-inserted openid-configuration
        push(
            format!("{origin}/.well-known/openid-configuration{path}"),
            &mut candidates,
        );
        // 3. Path-appended openid-configuration
        push(
            format!("{origin}{path}/.well-known/openid-configuration"),
            &mut candidates,
        );
    }

    // 4. Root oauth-authorization-server
    push(
        format!("{origin}/.well-known/oauth-authorization-server"),
        &mut candidates,
    );
    // 5. Root openid-configuration
    push(
        format!("{origin}/.well-known/openid-configuration"),
        &mut candidates,
    );

    candidates
}

/// Fetches authorization server metadata for the first reachable issuer.
///
/// Iterates the issuer list in order; within each issuer the candidate
/// well-known URLs from [RFC 8414] and OIDC Discovery are tried in order,
/// and the first document that parses with an issuer, authorization
/// endpoint, and token endpoint wins.
///
/// [RFC 8414]: https://www.rfc-editor.org/rfc/rfc8414
///
/// # Arguments
///
/// * `http` - Shared [`reqwest::Client`].
/// * `issuers` - Issuer URIs from the protected resource metadata, in
///   preference order.
///
/// # Errors
///
/// Returns [`ResauthError::Discovery`] with every candidate tried across
/// all issuers when none yields usable metadata. Unparseable issuer URLs
/// are recorded as attempts too.
pub async fn discover_authorization_server(
    http: &reqwest::Client,
    issuers: &[String],
) -> Result<AuthorizationServerMetadata> {
    let mut attempts: Vec<DiscoveryAttempt> = Vec::new();

    for issuer_str in issuers {
        let issuer = match Url::parse(issuer_str) {
            Ok(url) => url,
            Err(e) => {
                attempts.push(DiscoveryAttempt {
                    url: issuer_str.clone(),
                    reason: format!("invalid issuer URL: {e}"),
                });
                continue;
            }
        };

        for candidate in build_as_candidate_urls(&issuer) {
            match try_fetch_metadata::<AuthorizationServerMetadata>(http, &candidate).await {
                Ok(meta) => {
                    tracing::debug!(
                        issuer = %issuer_str,
                        metadata_url = %candidate,
                        "authorization server metadata found"
                    );
                    return Ok(meta);
                }
                Err(reason) => attempts.push(DiscoveryAttempt {
                    url: candidate.to_string(),
                    reason,
                }),
            }
        }
    }

    Err(ResauthError::Discovery {
        subject: issuers.join(", "),
        attempts,
    })
}

/// GETs a metadata document and deserializes it, mapping each failure mode
/// to a human-readable reason for attempt recording.
async fn try_fetch_metadata<T: serde::de::DeserializeOwned>(
    http: &reqwest::Client,
    url: &Url,
) -> std::result::Result<T, String> {
    let resp = http
        .get(url.clone())
        .send()
        .await
        .map_err(|e| format!("request failed: {e}"))?;

    let status = resp.status();
    if !status.is_success() {
        return Err(format!("HTTP {}", status.as_u16()));
    }

    resp.json::<T>()
        .await
        .map_err(|e| format!("invalid metadata: {e}"))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
