//! OAuth client identity acquisition
//!
//! Before redirecting a user to an authorization server, the engine needs a
//! `client_id` valid at that server. Two mechanisms are supported, chosen by
//! the server's advertised capabilities:
//!
//! 1. **Client ID metadata document** (CIMD): when the server advertises
//!    `client_id_metadata_document_supported` and this deployment has a
//!    public application URI, the `client_id` is simply the URL of the
//!    self-hosted metadata document. No round trip to the authorization
//!    server is needed.
//! 2. **Dynamic Client Registration** (RFC 7591): POST the client metadata
//!    to the server's `registration_endpoint` and use the issued
//!    `client_id` (and `client_secret`, when one is returned).
//!
//! When neither capability is advertised the login attempt fails; there is
//! no third fallback.
//!
//! # References
//!
//! - RFC 7591 <https://www.rfc-editor.org/rfc/rfc7591>

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{ResauthError, Result};
use crate::oauth::discovery::AuthorizationServerMetadata;

// ---------------------------------------------------------------------------
// ClientIdentity
// ---------------------------------------------------------------------------

/// The OAuth client identity obtained for one authorization server.
///
/// Persisted onto the credential record so token refresh can authenticate
/// without re-registering.
#[derive(Debug, Clone)]
pub struct ClientIdentity {
    /// The `client_id` to present in authorization and token requests.
    pub client_id: String,

    /// Optional `client_secret` issued by dynamic registration. Public
    /// clients (the common case) have none.
    pub client_secret: Option<String>,
}

// ---------------------------------------------------------------------------
// Client metadata document
// ---------------------------------------------------------------------------

/// The self-describing client metadata document this engine hosts at
/// `{app_uri}{path_prefix}/client-metadata.json`.
///
/// Authorization servers that support CIMD fetch this document from the
/// `client_id` URL instead of requiring registration. The same shape is sent
/// as the body of a dynamic registration request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientMetadataDocument {
    /// The client identifier: the URL at which this document is hosted.
    pub client_id: String,

    /// Human-readable name for this application.
    pub client_name: String,

    /// URI of the application's homepage, if configured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_uri: Option<String>,

    /// URI of the application's logo, if configured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logo_uri: Option<String>,

    /// Redirect URI prefixes under which flow callbacks are served.
    pub redirect_uris: Vec<String>,

    /// Grant types this client uses.
    pub grant_types: Vec<String>,

    /// Response types this client uses.
    pub response_types: Vec<String>,

    /// Token endpoint authentication method; always `"none"` (public client).
    pub token_endpoint_auth_method: String,
}

/// The URL at which the client metadata document is hosted.
pub fn document_url(app_uri: &str, path_prefix: &str) -> String {
    format!(
        "{}{}/client-metadata.json",
        app_uri.trim_end_matches('/'),
        path_prefix
    )
}

/// Builds the hosted client metadata document for this deployment.
///
/// The `redirect_uris` list the per-kind callback roots; the concrete
/// callback URL for a flow appends the resource hostname to one of them.
pub fn build_document(
    app_uri: &str,
    base_url: &str,
    path_prefix: &str,
    client_name: &str,
    logo_uri: Option<&str>,
) -> ClientMetadataDocument {
    let base = base_url.trim_end_matches('/');
    ClientMetadataDocument {
        client_id: document_url(app_uri, path_prefix),
        client_name: client_name.to_string(),
        client_uri: Some(app_uri.to_string()),
        logo_uri: logo_uri.map(str::to_string),
        redirect_uris: vec![
            format!("{base}{path_prefix}/callback/mcp"),
            format!("{base}{path_prefix}/callback/context"),
        ],
        grant_types: vec![
            "authorization_code".to_string(),
            "refresh_token".to_string(),
        ],
        response_types: vec!["code".to_string()],
        token_endpoint_auth_method: "none".to_string(),
    }
}

// ---------------------------------------------------------------------------
// Dynamic Client Registration response
// ---------------------------------------------------------------------------

/// Minimal Dynamic Client Registration response (RFC 7591).
#[derive(Debug, Deserialize)]
struct DcrResponse {
    client_id: String,
    #[serde(default)]
    client_secret: Option<String>,
}

// ---------------------------------------------------------------------------
// ClientRegistrar
// ---------------------------------------------------------------------------

/// Obtains a client identity for a discovered authorization server.
#[derive(Clone)]
pub struct ClientRegistrar {
    http: Arc<reqwest::Client>,
    client_name: String,
    app_uri: Option<String>,
    logo_uri: Option<String>,
    path_prefix: String,
}

impl ClientRegistrar {
    /// Creates a registrar.
    ///
    /// # Arguments
    ///
    /// * `http` - Shared HTTP client for registration requests.
    /// * `client_name` - Name presented to authorization servers.
    /// * `app_uri` - Public application URI; enables CIMD when set.
    /// * `logo_uri` - Optional logo URI included in registration documents.
    /// * `path_prefix` - Route prefix under which the engine is mounted.
    pub fn new(
        http: Arc<reqwest::Client>,
        client_name: String,
        app_uri: Option<String>,
        logo_uri: Option<String>,
        path_prefix: String,
    ) -> Self {
        Self {
            http,
            client_name,
            app_uri,
            logo_uri,
            path_prefix,
        }
    }

    /// Obtains a client identity for the given authorization server.
    ///
    /// Prefers CIMD when the server advertises support and a public
    /// application URI is configured; otherwise performs dynamic
    /// registration against the server's `registration_endpoint`.
    ///
    /// # Arguments
    ///
    /// * `server_metadata` - Metadata of the discovered authorization server.
    /// * `redirect_uri` - The exact redirect URI this flow will use.
    ///
    /// # Errors
    ///
    /// Returns [`ResauthError::Registration`] when the registration endpoint
    /// rejects the request, returns an unparseable response, or the server
    /// advertises no registration mechanism at all.
    pub async fn obtain(
        &self,
        server_metadata: &AuthorizationServerMetadata,
        redirect_uri: &str,
    ) -> Result<ClientIdentity> {
        // Strategy 1: client ID metadata document.
        if server_metadata.client_id_metadata_document_supported == Some(true) {
            if let Some(ref app_uri) = self.app_uri {
                let client_id = document_url(app_uri, &self.path_prefix);
                tracing::debug!(
                    issuer = %server_metadata.issuer,
                    client_id = %client_id,
                    "using client metadata document as client_id"
                );
                return Ok(ClientIdentity {
                    client_id,
                    client_secret: None,
                });
            }
        }

        // Strategy 2: Dynamic Client Registration.
        if let Some(ref registration_endpoint) = server_metadata.registration_endpoint {
            return self.register(registration_endpoint, redirect_uri).await;
        }

        Err(ResauthError::Registration(format!(
            "{} advertises neither client metadata documents nor dynamic registration",
            server_metadata.issuer
        )))
    }

    /// Performs Dynamic Client Registration (RFC 7591).
    async fn register(
        &self,
        registration_endpoint: &str,
        redirect_uri: &str,
    ) -> Result<ClientIdentity> {
        let body = self.registration_body(redirect_uri);

        let resp = self
            .http
            .post(registration_endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| ResauthError::Registration(format!("registration request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(ResauthError::Registration(format!(
                "registration endpoint returned {status}: {text}"
            )));
        }

        let dcr: DcrResponse = resp.json().await.map_err(|e| {
            ResauthError::Registration(format!("invalid registration response: {e}"))
        })?;

        tracing::debug!(
            endpoint = %registration_endpoint,
            client_id = %dcr.client_id,
            confidential = dcr.client_secret.is_some(),
            "dynamic client registration succeeded"
        );

        Ok(ClientIdentity {
            client_id: dcr.client_id,
            client_secret: dcr.client_secret,
        })
    }

    /// Builds the RFC 7591 registration request body for one flow's
    /// redirect URI.
    fn registration_body(&self, redirect_uri: &str) -> serde_json::Value {
        let mut body = serde_json::json!({
            "client_name": self.client_name,
            "redirect_uris": [redirect_uri],
            "grant_types": ["authorization_code"],
            "response_types": ["code"],
            "token_endpoint_auth_method": "none",
        });

        if let Some(ref app_uri) = self.app_uri {
            body["client_uri"] = serde_json::Value::String(app_uri.clone());
        }
        if let Some(ref logo_uri) = self.logo_uri {
            body["logo_uri"] = serde_json::Value::String(logo_uri.clone());
        }

        body
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
