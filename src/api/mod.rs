//! HTTP surface for the authorization engine.
//!
//! Three browser-facing routes served under the configured path prefix
//! (default `/oauth`):
//!
//! 1. `GET {prefix}/login/:kind?url=...` -- starts a flow; 302 to the
//!    authorization server, or a success page when the resource needs no
//!    credentials
//! 2. `GET {prefix}/callback/:kind/:hostname?code&state` -- completes a
//!    flow; 200 HTML success page, 400 on missing or mismatching params
//! 3. `GET {prefix}/client-metadata.json` -- this engine's own OAuth client
//!    metadata document, used as a URL-shaped `client_id`
//!
//! The resolution API ([`crate::resolve`]) is a library interface for the
//! host system, not an HTTP route.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{Html, IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::ResauthError;
use crate::oauth::flow::{cookie_name, FlowEngine, LoginOutcome, FLOW_TTL_SECS};
use crate::oauth::registration::{build_document, ClientMetadataDocument};
use crate::store::{ResourceKind, DEFAULT_PROFILE};

/// Request header a fronting proxy can set to select the acting user.
pub const USER_HEADER: &str = "x-resauth-user";

// ---------------------------------------------------------------------------
// State and router
// ---------------------------------------------------------------------------

/// Shared state for the HTTP routes.
#[derive(Clone)]
pub struct AppState {
    pub engine: FlowEngine,
    pub client_name: String,
    pub app_uri: Option<String>,
    pub logo_uri: Option<String>,
    pub base_url: String,
    pub path_prefix: String,
    pub default_user: String,
    /// Mark cookies `Secure`; derived from the base URL scheme so local
    /// plain-HTTP development still works.
    pub secure_cookies: bool,
}

/// Builds the router, nested under the configured path prefix.
pub fn router(state: AppState) -> Router {
    let prefix = state.path_prefix.clone();
    let routes = Router::new()
        .route("/login/:kind", get(login))
        .route("/callback/:kind/:hostname", get(callback))
        .route("/client-metadata.json", get(client_metadata))
        .with_state(Arc::new(state));

    if prefix.is_empty() {
        routes
    } else {
        Router::new().nest(&prefix, routes)
    }
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// Route-level error with an HTTP status, rendered as JSON.
enum ApiError {
    BadRequest(String),
    NotFound(String),
    BadGateway(String),
    ServerError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg),
            ApiError::ServerError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(ErrorResponse { error })).into_response()
    }
}

/// Maps engine errors onto HTTP statuses. Caller mistakes are 400s,
/// misbehaving remotes are 502s, everything else is a 500. Error Display
/// strings never carry verifiers, secrets, or tokens.
fn map_engine_error(e: ResauthError) -> ApiError {
    match e {
        ResauthError::InvalidUrl(_) | ResauthError::Config(_) => {
            ApiError::BadRequest(e.to_string())
        }
        ResauthError::StateMismatch => {
            warn!("authorization callback rejected: state mismatch");
            ApiError::BadRequest(e.to_string())
        }
        ResauthError::Discovery { .. }
        | ResauthError::PkceUnsupported { .. }
        | ResauthError::Registration(_)
        | ResauthError::TokenExchange { .. }
        | ResauthError::TokenRefresh { .. }
        | ResauthError::Http(_) => {
            warn!(error = %e, "upstream failure during authorization flow");
            ApiError::BadGateway(e.to_string())
        }
        other => {
            tracing::error!(error = %other, "internal error during authorization flow");
            ApiError::ServerError(other.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct LoginParams {
    url: Option<String>,
    scope: Option<String>,
    profile: Option<String>,
}

/// `GET {prefix}/login/:kind?url=...[&scope=][&profile=]`
async fn login(
    State(state): State<Arc<AppState>>,
    Path(kind): Path<String>,
    headers: HeaderMap,
    Query(params): Query<LoginParams>,
) -> Result<Response, ApiError> {
    let kind = parse_kind(&kind)?;
    let url = params
        .url
        .as_deref()
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .ok_or_else(|| ApiError::BadRequest("missing 'url' parameter".to_string()))?;
    let profile = params.profile.as_deref().unwrap_or(DEFAULT_PROFILE);
    let user = acting_user(&headers, &state.default_user);

    let outcome = state
        .engine
        .begin_login(kind, &user, profile, url, params.scope.as_deref())
        .await
        .map_err(map_engine_error)?;

    match outcome {
        LoginOutcome::Redirect {
            authorization_url,
            cookie_name,
            state: flow_state,
            callback_path,
        } => {
            let cookie = set_cookie(
                &cookie_name,
                &flow_state,
                &callback_path,
                FLOW_TTL_SECS,
                state.secure_cookies,
            );
            Ok((
                StatusCode::FOUND,
                [
                    (header::LOCATION, authorization_url),
                    (header::SET_COOKIE, cookie),
                ],
            )
                .into_response())
        }
        LoginOutcome::Public(record) => Ok(Html(success_page(&record.name)).into_response()),
    }
}

#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

/// `GET {prefix}/callback/:kind/:hostname?code&state`
async fn callback(
    State(state): State<Arc<AppState>>,
    Path((kind, hostname)): Path<(String, String)>,
    headers: HeaderMap,
    Query(params): Query<CallbackParams>,
) -> Result<Response, ApiError> {
    let kind = parse_kind(&kind)?;
    let cookie = cookie_name(kind, &hostname);
    let clear = set_cookie(&cookie, "", &callback_path(&state.path_prefix, kind, &hostname), 0, state.secure_cookies);

    // The authorization server reported a denial; discard the pending flow
    // so its state cannot be presented again.
    if let Some(error) = params.error {
        let description = params.error_description.unwrap_or_default();
        warn!(kind = %kind, hostname = %hostname, error = %error, "authorization denied upstream");
        if let Some(cookie_state) = cookie_value(&headers, &cookie) {
            state.engine.abandon_login(&cookie_state).await.ok();
        }
        return Ok((
            StatusCode::BAD_REQUEST,
            [(header::SET_COOKIE, clear)],
            Html(denied_page(&error, &description)),
        )
            .into_response());
    }

    let code = params
        .code
        .ok_or_else(|| ApiError::BadRequest("missing 'code' parameter".to_string()))?;
    let state_param = params
        .state
        .ok_or_else(|| ApiError::BadRequest("missing 'state' parameter".to_string()))?;
    let cookie_state = cookie_value(&headers, &cookie)
        .ok_or_else(|| ApiError::BadRequest("missing authorization cookie".to_string()))?;

    let record = state
        .engine
        .complete_login(kind, &hostname, &code, &state_param, &cookie_state)
        .await
        .map_err(map_engine_error)?;

    info!(kind = %kind, hostname = %hostname, "authorization callback completed");
    Ok((
        StatusCode::OK,
        [(header::SET_COOKIE, clear)],
        Html(success_page(&record.name)),
    )
        .into_response())
}

/// `GET {prefix}/client-metadata.json`
async fn client_metadata(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ClientMetadataDocument>, ApiError> {
    let Some(ref app_uri) = state.app_uri else {
        return Err(ApiError::NotFound(
            "no public application URI configured".to_string(),
        ));
    };
    Ok(Json(build_document(
        app_uri,
        &state.base_url,
        &state.path_prefix,
        &state.client_name,
        state.logo_uri.as_deref(),
    )))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_kind(kind: &str) -> Result<ResourceKind, ApiError> {
    ResourceKind::parse(kind)
        .ok_or_else(|| ApiError::BadRequest(format!("unknown resource kind '{kind}'")))
}

fn callback_path(prefix: &str, kind: ResourceKind, hostname: &str) -> String {
    format!("{prefix}/callback/{}/{hostname}", kind.as_str())
}

/// The acting user: a fronting proxy's `x-resauth-user` header when
/// present, otherwise the configured default.
fn acting_user(headers: &HeaderMap, default_user: &str) -> String {
    headers
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| default_user.to_string())
}

/// Formats a `Set-Cookie` value. `max_age` of zero clears the cookie.
fn set_cookie(name: &str, value: &str, path: &str, max_age: i64, secure: bool) -> String {
    let secure_flag = if secure { "; Secure" } else { "" };
    format!("{name}={value}; HttpOnly{secure_flag}; Path={path}; SameSite=Lax; Max-Age={max_age}")
}

/// Extracts one cookie value from a `Cookie` request header.
fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    let raw = headers.get(header::COOKIE)?.to_str().ok()?;
    for pair in raw.split(';') {
        if let Some((k, v)) = pair.trim().split_once('=') {
            if k == name {
                return Some(v.to_string());
            }
        }
    }
    None
}

/// Minimal HTML escaping for text interpolated into response pages. Names
/// and error strings originate from remote servers and are untrusted.
fn escape_html(value: &str) -> String {
    value
        .chars()
        .map(|c| match c {
            '&' => "&amp;".to_string(),
            '<' => "&lt;".to_string(),
            '>' => "&gt;".to_string(),
            '"' => "&quot;".to_string(),
            '\'' => "&#39;".to_string(),
            other => other.to_string(),
        })
        .collect()
}

/// Success page; closes itself when opened as a popup.
fn success_page(name: &str) -> String {
    format!(
        "<!doctype html>\n<html>\n<head><meta charset=\"utf-8\"><title>Authorization complete</title></head>\n<body>\n<p>Authorization for <strong>{}</strong> is complete. You can close this window.</p>\n<script>window.close();</script>\n</body>\n</html>\n",
        escape_html(name)
    )
}

fn denied_page(error: &str, description: &str) -> String {
    format!(
        "<!doctype html>\n<html>\n<head><meta charset=\"utf-8\"><title>Authorization failed</title></head>\n<body>\n<p>The authorization server reported <strong>{}</strong>: {}</p>\n<p>You can close this window and try again.</p>\n</body>\n</html>\n",
        escape_html(error),
        escape_html(description)
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
