//! OAuth 2.1 authorization code flow with PKCE
//!
//! This module drives the browser-based authorization code flow with PKCE
//! (RFC 7636) and resource indicators (RFC 8707) for one login attempt at a
//! time, from the initial login request through the redirect callback and
//! code-for-token exchange.
//!
//! # Flow overview
//!
//! 1. Probe the resource unauthenticated; a 2xx means no authorization is
//!    needed and a public credential record is stored immediately.
//! 2. Otherwise run protected-resource discovery, seeded with the probe
//!    rejection's `WWW-Authenticate` challenge when one was sent, then
//!    authorization-server discovery over the advertised issuers.
//! 3. Verify the authorization server supports PKCE S256 (hard requirement).
//! 4. Obtain a `client_id` (client metadata document or dynamic
//!    registration).
//! 5. Generate a PKCE challenge and a random `state` value, persist the
//!    pending flow server-side keyed by `state`, and redirect the browser.
//!    The browser carries only the opaque `state` in a short-lived cookie;
//!    the PKCE verifier never leaves the server.
//! 6. On callback, require the cookie, consume the pending flow exactly
//!    once, reject on any `state` mismatch, and exchange the code.
//! 7. Store the resulting tokens as a credential record.
//!
//! # References
//!
//! - OAuth 2.1 draft <https://datatracker.ietf.org/doc/draft-ietf-oauth-v2-1/>
//! - RFC 7636 PKCE <https://www.rfc-editor.org/rfc/rfc7636>
//! - RFC 8707 Resource Indicators <https://www.rfc-editor.org/rfc/rfc8707>

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{ResauthError, Result};
use crate::kv::KvStore;
use crate::oauth::discovery::{
    self, AuthorizationServerMetadata, ProtectedResourceMetadata,
};
use crate::oauth::pkce;
use crate::oauth::registration::ClientRegistrar;
use crate::resolve::naming::{self, ResourceIdentity};
use crate::store::{normalize_resource_url, CredentialRecord, CredentialStore, ResourceKind, UpsertOptions};

/// How long a pending login may sit between redirect and callback.
pub const FLOW_TTL_SECS: i64 = 600;

/// Cap on concurrently pending logins per user; the oldest are evicted.
pub const MAX_PENDING_FLOWS_PER_USER: usize = 16;

// ---------------------------------------------------------------------------
// AuthorizationFlowState
// ---------------------------------------------------------------------------

/// One in-flight login, created at redirect time and consumed exactly once
/// at callback time.
///
/// Persisted server-side keyed by `state`; the browser only ever sees the
/// opaque `state` value. The `code_verifier` is a secret and must never
/// appear in URLs, cookies, logs, or error messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationFlowState {
    /// User this login belongs to.
    pub user: String,

    /// Profile the resulting credential will be stored under.
    pub profile: String,

    /// Canonical resource URL from discovery; sent as the RFC 8707
    /// `resource` parameter and used as the stored record's key.
    pub resource_url: String,

    /// Which kind of resource is being authorized.
    pub resource_kind: ResourceKind,

    /// Host of the requested resource; scopes the callback route and the
    /// state cookie.
    pub hostname: String,

    /// Scope requested at the authorization endpoint, when one was resolved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,

    /// PKCE code verifier. Secret.
    pub code_verifier: String,

    /// CSRF token bound to this flow.
    pub state: String,

    /// Token endpoint to exchange the code at.
    pub token_endpoint: String,

    /// Client identity obtained for this authorization server.
    pub client_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,

    /// Redirect URI used at the authorization endpoint; the token exchange
    /// must repeat it byte-for-byte.
    pub redirect_uri: String,

    /// Human-readable resource name from discovery metadata, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_name: Option<String>,

    /// When this flow was created; flows expire after [`FLOW_TTL_SECS`].
    pub created_at: DateTime<Utc>,
}

/// Name of the state cookie for one `(kind, hostname)` flow.
///
/// Characters outside the RFC 6265 cookie-name alphabet (e.g. the brackets
/// of an IPv6 host) are replaced with underscores.
pub fn cookie_name(kind: ResourceKind, hostname: &str) -> String {
    let safe: String = hostname
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("oauth_auth_{}_{}", kind.as_str(), safe)
}

// ---------------------------------------------------------------------------
// FlowStore
// ---------------------------------------------------------------------------

/// Server-side store for pending logins, keyed by `state`.
///
/// Holding flows server-side keeps the PKCE verifier out of the browser
/// entirely; the cookie carries only the random `state`. Records expire
/// after [`FLOW_TTL_SECS`] and each user is capped at
/// [`MAX_PENDING_FLOWS_PER_USER`] pending flows, oldest evicted first.
#[derive(Clone)]
pub struct FlowStore {
    kv: Arc<dyn KvStore>,
}

impl FlowStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    // `state` is base64url, so it cannot collide with the key separator.
    fn key(state: &str) -> String {
        format!("flow:{state}")
    }

    /// Persists a pending flow, pruning expired flows and enforcing the
    /// per-user cap as a side effect.
    pub async fn put(&self, flow: &AuthorizationFlowState) -> Result<()> {
        let now = Utc::now();
        let mut user_flows: Vec<(String, DateTime<Utc>)> = Vec::new();

        for key in self.kv.list_keys("flow:").await? {
            let Some(json) = self.kv.get(&key).await? else {
                continue;
            };
            match serde_json::from_str::<AuthorizationFlowState>(&json) {
                Ok(existing) => {
                    if now - existing.created_at > Duration::seconds(FLOW_TTL_SECS) {
                        self.kv.delete(&key).await?;
                    } else if existing.user == flow.user {
                        user_flows.push((key, existing.created_at));
                    }
                }
                // Unreadable pending flows are useless; discard them.
                Err(_) => self.kv.delete(&key).await?,
            }
        }

        if user_flows.len() >= MAX_PENDING_FLOWS_PER_USER {
            user_flows.sort_by_key(|(_, created)| *created);
            let excess = user_flows.len() + 1 - MAX_PENDING_FLOWS_PER_USER;
            for (key, _) in user_flows.into_iter().take(excess) {
                self.kv.delete(&key).await?;
            }
        }

        let json = serde_json::to_string(flow)?;
        self.kv.set(&Self::key(&flow.state), &json).await
    }

    /// Removes and returns the pending flow for `state`.
    ///
    /// Returns `Ok(None)` when no flow exists, when the stored record does
    /// not parse, or when the flow has expired. In every case the record is
    /// gone afterwards; a flow is consumable exactly once.
    pub async fn take(&self, state: &str) -> Result<Option<AuthorizationFlowState>> {
        let key = Self::key(state);
        let Some(json) = self.kv.get(&key).await? else {
            return Ok(None);
        };
        self.kv.delete(&key).await?;

        let Ok(flow) = serde_json::from_str::<AuthorizationFlowState>(&json) else {
            return Ok(None);
        };
        if Utc::now() - flow.created_at > Duration::seconds(FLOW_TTL_SECS) {
            return Ok(None);
        }
        Ok(Some(flow))
    }
}

// ---------------------------------------------------------------------------
// Token endpoint response (raw deserialization)
// ---------------------------------------------------------------------------

/// Raw JSON response from an OAuth token endpoint, shared by the code
/// exchange and the refresh grant.
#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

// ---------------------------------------------------------------------------
// LoginOutcome
// ---------------------------------------------------------------------------

/// Result of a login request: either the browser must be redirected to the
/// authorization server, or the resource turned out to be public and was
/// stored immediately.
#[derive(Debug)]
pub enum LoginOutcome {
    /// Redirect the browser to `authorization_url`, setting a cookie named
    /// `cookie_name` with value `state`, path-scoped to `callback_path`.
    Redirect {
        authorization_url: String,
        cookie_name: String,
        state: String,
        callback_path: String,
    },

    /// The resource answered an unauthenticated probe; a public credential
    /// record was stored and no redirect is needed.
    Public(CredentialRecord),
}

/// What the unauthenticated probe learned about a resource.
enum ProbeOutcome {
    /// Answered 2xx; no authorization is required.
    Public,

    /// Rejected the request. A 401's `WWW-Authenticate` challenge, when
    /// present, names the resource metadata URL (RFC 9728 section 5.1).
    Protected { www_authenticate: Option<String> },
}

// ---------------------------------------------------------------------------
// FlowEngine
// ---------------------------------------------------------------------------

/// Orchestrates login requests and callbacks for both resource kinds.
#[derive(Clone)]
pub struct FlowEngine {
    http: Arc<reqwest::Client>,
    store: CredentialStore,
    flows: FlowStore,
    registrar: ClientRegistrar,
    base_url: String,
    path_prefix: String,
}

impl FlowEngine {
    /// Creates a flow engine.
    ///
    /// # Arguments
    ///
    /// * `http` - Shared HTTP client for discovery, registration, and token
    ///   requests.
    /// * `store` - Credential persistence.
    /// * `flows` - Pending-flow persistence.
    /// * `registrar` - Client identity acquisition.
    /// * `base_url` - Public base URL of this engine, used to build redirect
    ///   URIs. Trailing slashes are stripped.
    /// * `path_prefix` - Route prefix the engine is mounted under, e.g.
    ///   `/oauth`.
    pub fn new(
        http: Arc<reqwest::Client>,
        store: CredentialStore,
        flows: FlowStore,
        registrar: ClientRegistrar,
        base_url: &str,
        path_prefix: &str,
    ) -> Self {
        Self {
            http,
            store,
            flows,
            registrar,
            base_url: base_url.trim_end_matches('/').to_string(),
            path_prefix: path_prefix.to_string(),
        }
    }

    /// Handles `GET {prefix}/login/{kind}?url=...`.
    ///
    /// Probes the resource first; public resources are stored without any
    /// redirect. Otherwise runs the discovery chain, starting from the
    /// probe rejection's `WWW-Authenticate` challenge when one was sent,
    /// obtains a client identity, persists the pending flow, and returns
    /// the authorization URL to redirect to.
    ///
    /// # Errors
    ///
    /// Propagates [`ResauthError::InvalidUrl`], [`ResauthError::Discovery`],
    /// [`ResauthError::PkceUnsupported`], and [`ResauthError::Registration`]
    /// to the caller; these indicate a misconfigured or incompatible remote
    /// and are surfaced to the user who initiated the login.
    pub async fn begin_login(
        &self,
        kind: ResourceKind,
        user: &str,
        profile: &str,
        url: &str,
        scope: Option<&str>,
    ) -> Result<LoginOutcome> {
        let normalized = normalize_resource_url(url)?;
        let requested = Url::parse(&normalized)?;
        let hostname = requested
            .host_str()
            .ok_or_else(|| ResauthError::InvalidUrl(format!("{url}: missing host")))?
            .to_string();

        // Short path: the resource answers without credentials.
        let www_authenticate = match self.probe_resource(&requested).await {
            ProbeOutcome::Public => {
                let identity =
                    naming::resolve_identity(&self.http, kind, &normalized, None).await;
                let name = record_name(&identity, None, &hostname);
                let record = self
                    .store
                    .upsert(
                        kind,
                        user,
                        profile,
                        &normalized,
                        &name,
                        UpsertOptions {
                            public: Some(true),
                            metadata: (!identity.metadata.is_empty())
                                .then_some(identity.metadata),
                            ..Default::default()
                        },
                    )
                    .await?;
                tracing::info!(kind = %kind, user = %user, url = %normalized, "resource is public, stored without tokens");
                return Ok(LoginOutcome::Public(record));
            }
            ProbeOutcome::Protected { www_authenticate } => www_authenticate,
        };

        // Discovery chain, seeded with the probe's challenge when the
        // resource sent one.
        let resource_meta = discovery::discover_resource_metadata(
            &self.http,
            &requested,
            www_authenticate.as_deref(),
        )
        .await?;
        let server_meta =
            discovery::discover_authorization_server(&self.http, &resource_meta.authorization_servers)
                .await?;

        pkce::verify_s256_support(&server_meta)?;

        let redirect_uri = format!(
            "{}{}/callback/{}/{}",
            self.base_url,
            self.path_prefix,
            kind.as_str(),
            hostname
        );
        let client = self.registrar.obtain(&server_meta, &redirect_uri).await?;

        let challenge = pkce::generate()?;
        let state = generate_state();
        let resolved_scope = resolve_scope(scope, &resource_meta, &server_meta);

        let authorization_url = build_authorization_url(
            &server_meta.authorization_endpoint,
            &client.client_id,
            &redirect_uri,
            resolved_scope.as_deref(),
            &state,
            &challenge.challenge,
            &resource_meta.resource,
        )?;

        let flow = AuthorizationFlowState {
            user: user.to_string(),
            profile: profile.to_string(),
            resource_url: resource_meta.resource.clone(),
            resource_kind: kind,
            hostname: hostname.clone(),
            scope: resolved_scope,
            code_verifier: challenge.verifier,
            state: state.clone(),
            token_endpoint: server_meta.token_endpoint.clone(),
            client_id: client.client_id,
            client_secret: client.client_secret,
            redirect_uri,
            resource_name: resource_meta.resource_name.clone(),
            created_at: Utc::now(),
        };
        self.flows.put(&flow).await?;

        tracing::info!(
            kind = %kind,
            user = %user,
            url = %normalized,
            issuer = %server_meta.issuer,
            "redirecting to authorization server"
        );

        Ok(LoginOutcome::Redirect {
            authorization_url,
            cookie_name: cookie_name(kind, &hostname),
            state,
            callback_path: format!(
                "{}/callback/{}/{}",
                self.path_prefix,
                kind.as_str(),
                hostname
            ),
        })
    }

    /// Handles `GET {prefix}/callback/{kind}/{hostname}?code&state`.
    ///
    /// The cookie value selects the pending flow; the flow is consumed
    /// before anything else happens, so a replayed callback finds nothing.
    /// The query `state` must exactly match the flow's `state`, and the
    /// flow must belong to this `(kind, hostname)` route.
    ///
    /// # Errors
    ///
    /// Returns [`ResauthError::StateMismatch`] for a missing, expired, or
    /// mismatched flow, and [`ResauthError::TokenExchange`] when the token
    /// endpoint rejects the code.
    pub async fn complete_login(
        &self,
        kind: ResourceKind,
        hostname: &str,
        code: &str,
        state: &str,
        cookie_state: &str,
    ) -> Result<CredentialRecord> {
        let flow = self
            .flows
            .take(cookie_state)
            .await?
            .ok_or(ResauthError::StateMismatch)?;

        if flow.state != state || flow.resource_kind != kind || flow.hostname != hostname {
            return Err(ResauthError::StateMismatch);
        }

        let token = self.exchange_code(&flow, code).await?;

        // Cosmetic name/icon resolution; failures must never undo a
        // successful token exchange.
        let identity =
            naming::resolve_identity(&self.http, kind, &flow.resource_url, Some(&token.access_token))
                .await;
        let name = record_name(&identity, flow.resource_name.as_deref(), &flow.hostname);

        let options = UpsertOptions {
            client_id: Some(flow.client_id.clone()),
            client_secret: flow.client_secret.clone(),
            access_token: Some(token.access_token),
            refresh_token: token.refresh_token,
            token_endpoint: Some(flow.token_endpoint.clone()),
            token_type: Some(token.token_type),
            expires_in: token.expires_in,
            scope: token.scope.or_else(|| flow.scope.clone()),
            public: Some(false),
            metadata: (!identity.metadata.is_empty()).then_some(identity.metadata),
        };

        let record = self
            .store
            .upsert(kind, &flow.user, &flow.profile, &flow.resource_url, &name, options)
            .await?;

        tracing::info!(
            kind = %kind,
            user = %flow.user,
            url = %flow.resource_url,
            "authorization flow completed"
        );
        Ok(record)
    }

    /// Discards the pending flow selected by the cookie, if any. Called when
    /// the authorization server reports a denial, so the state cannot be
    /// presented again later.
    pub async fn abandon_login(&self, cookie_state: &str) -> Result<()> {
        if self.flows.take(cookie_state).await?.is_some() {
            tracing::debug!("pending authorization flow discarded after upstream denial");
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Private helpers
    // -----------------------------------------------------------------------

    /// Unauthenticated probe. A 2xx means no authorization is required.
    /// Servers that reject HEAD outright get one GET attempt; any other
    /// failure is treated as "authorization required", the safer answer.
    /// A rejection's `WWW-Authenticate` challenge is kept for discovery.
    async fn probe_resource(&self, url: &Url) -> ProbeOutcome {
        match self.http.head(url.clone()).send().await {
            Ok(resp) => {
                let status = resp.status();
                if status.is_success() {
                    return ProbeOutcome::Public;
                }
                if status.as_u16() == 405 || status.as_u16() == 501 {
                    return match self.http.get(url.clone()).send().await {
                        Ok(get_resp) if get_resp.status().is_success() => ProbeOutcome::Public,
                        Ok(get_resp) => ProbeOutcome::Protected {
                            www_authenticate: challenge_header(&get_resp),
                        },
                        Err(_) => ProbeOutcome::Protected {
                            www_authenticate: None,
                        },
                    };
                }
                ProbeOutcome::Protected {
                    www_authenticate: challenge_header(&resp),
                }
            }
            Err(_) => ProbeOutcome::Protected {
                www_authenticate: None,
            },
        }
    }

    /// Exchanges an authorization code for tokens at the flow's token
    /// endpoint.
    async fn exchange_code(
        &self,
        flow: &AuthorizationFlowState,
        code: &str,
    ) -> Result<TokenResponse> {
        let mut params: HashMap<&str, &str> = HashMap::new();
        params.insert("grant_type", "authorization_code");
        params.insert("code", code);
        params.insert("redirect_uri", &flow.redirect_uri);
        params.insert("client_id", &flow.client_id);
        params.insert("code_verifier", &flow.code_verifier);
        params.insert("resource", &flow.resource_url);
        if let Some(ref secret) = flow.client_secret {
            params.insert("client_secret", secret);
        }

        let resp = self
            .http
            .post(&flow.token_endpoint)
            .form(&params)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ResauthError::TokenExchange {
                status: status.as_u16(),
                body,
            });
        }

        resp.json::<TokenResponse>()
            .await
            .map_err(|e| ResauthError::TokenExchange {
                status: status.as_u16(),
                body: format!("invalid token response: {e}"),
            })
    }
}

// ---------------------------------------------------------------------------
// Free helpers
// ---------------------------------------------------------------------------

/// Generates a cryptographically random state nonce: 16 random bytes
/// encoded as base64url without padding.
pub fn generate_state() -> String {
    pkce::random_urlsafe(16)
}

/// `WWW-Authenticate` value of a rejection response, when present.
fn challenge_header(resp: &reqwest::Response) -> Option<String> {
    resp.headers()
        .get("www-authenticate")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Resolves the scope for an authorization request.
///
/// Priority: the caller's explicit scope parameter, then the resource
/// metadata's advertised scopes, then the authorization server's advertised
/// scopes. Advertised lists are space-joined.
fn resolve_scope(
    requested: Option<&str>,
    resource: &ProtectedResourceMetadata,
    server: &AuthorizationServerMetadata,
) -> Option<String> {
    if let Some(s) = requested {
        if !s.is_empty() {
            return Some(s.to_string());
        }
    }
    let join = |list: &Option<Vec<String>>| {
        list.as_ref()
            .filter(|v| !v.is_empty())
            .map(|v| v.join(" "))
    };
    join(&resource.scopes_supported).or_else(|| join(&server.scopes_supported))
}

/// Builds the authorization URL with all required query parameters,
/// including `resource` (RFC 8707), `code_challenge`, and
/// `code_challenge_method`.
fn build_authorization_url(
    authorization_endpoint: &str,
    client_id: &str,
    redirect_uri: &str,
    scope: Option<&str>,
    state: &str,
    code_challenge: &str,
    resource: &str,
) -> Result<String> {
    let mut url = Url::parse(authorization_endpoint)
        .map_err(|e| ResauthError::InvalidUrl(format!("authorization endpoint: {e}")))?;

    {
        let mut query = url.query_pairs_mut();
        query.append_pair("response_type", "code");
        query.append_pair("client_id", client_id);
        query.append_pair("redirect_uri", redirect_uri);
        if let Some(s) = scope {
            query.append_pair("scope", s);
        }
        query.append_pair("state", state);
        query.append_pair("code_challenge", code_challenge);
        query.append_pair("code_challenge_method", "S256");
        query.append_pair("resource", resource);
    }

    Ok(url.to_string())
}

/// Picks the stored record's display name: the discovery metadata's
/// advertised name, then the name the resource reports about itself, then
/// the bare hostname.
fn record_name(
    identity: &ResourceIdentity,
    resource_name: Option<&str>,
    hostname: &str,
) -> String {
    resource_name
        .map(str::to_string)
        .or_else(|| identity.name.clone())
        .unwrap_or_else(|| hostname.to_string())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
