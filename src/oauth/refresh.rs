//! Access token refresh
//!
//! Decides when a stored credential is close enough to expiry to be worth
//! refreshing, and performs the `refresh_token` grant against the token
//! endpoint recorded alongside the credential.
//!
//! A record is refreshable only when it carries all three of a refresh
//! token, a token endpoint, and a known lifetime. Records without an
//! `expires_in` are treated as non-expiring and never refreshed eagerly;
//! if the resource starts rejecting them the user logs in again.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

use crate::error::{ResauthError, Result};
use crate::oauth::flow::TokenResponse;
use crate::store::{CredentialRecord, CredentialStore, ResourceKind, UpsertOptions};

/// Refresh this many seconds before the recorded expiry.
pub const REFRESH_SKEW_SECS: i64 = 300;

/// Returns `true` when `record` should be refreshed before use.
///
/// Expiry is measured from `updated_at` (the last time tokens were written)
/// plus `expires_in`, minus a skew window of [`REFRESH_SKEW_SECS`] so a
/// token is renewed before it actually lapses. Lifetimes too large to
/// place on the timeline are treated like a missing `expires_in`:
/// non-expiring, never refreshed eagerly.
pub fn needs_refresh(record: &CredentialRecord, now: DateTime<Utc>) -> bool {
    let (Some(_), Some(_), Some(expires_in)) = (
        record.refresh_token.as_ref(),
        record.token_endpoint.as_ref(),
        record.expires_in,
    ) else {
        return false;
    };

    // `expires_in` is stored verbatim from the remote token response, so
    // the arithmetic must hold up under any i64 the endpoint sent.
    let Some(window) = expires_in
        .checked_sub(REFRESH_SKEW_SECS)
        .and_then(Duration::try_seconds)
    else {
        return false;
    };
    match record.updated_at.checked_add_signed(window) {
        Some(deadline) => now >= deadline,
        None => false,
    }
}

/// Performs the `refresh_token` grant and persists the updated record.
///
/// Per OAuth 2.1 the server may rotate the refresh token; when the response
/// omits one the stored refresh token is kept. The updated record is
/// re-persisted under the same key and returned.
///
/// # Errors
///
/// Returns [`ResauthError::TokenRefresh`] when the token endpoint rejects
/// the grant or returns an unparseable body. Transport failures surface as
/// [`ResauthError::Http`].
pub async fn refresh(
    http: &reqwest::Client,
    store: &CredentialStore,
    kind: ResourceKind,
    user: &str,
    record: &CredentialRecord,
) -> Result<CredentialRecord> {
    let refresh_token = record
        .refresh_token
        .clone()
        .ok_or_else(|| ResauthError::Store("record has no refresh token".to_string()))?;
    let token_endpoint = record
        .token_endpoint
        .clone()
        .ok_or_else(|| ResauthError::Store("record has no token endpoint".to_string()))?;

    let mut params: HashMap<&str, &str> = HashMap::new();
    params.insert("grant_type", "refresh_token");
    params.insert("refresh_token", &refresh_token);
    params.insert("resource", &record.url);
    if let Some(ref client_id) = record.client_id {
        params.insert("client_id", client_id);
    }
    if let Some(ref secret) = record.client_secret {
        params.insert("client_secret", secret);
    }

    let resp = http.post(&token_endpoint).form(&params).send().await?;

    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(ResauthError::TokenRefresh {
            status: status.as_u16(),
            body,
        });
    }

    let token = resp
        .json::<TokenResponse>()
        .await
        .map_err(|e| ResauthError::TokenRefresh {
            status: status.as_u16(),
            body: format!("invalid token response: {e}"),
        })?;

    let mut updated = record.clone();
    updated.apply(
        UpsertOptions {
            access_token: Some(token.access_token),
            // None keeps the existing refresh token (no rotation).
            refresh_token: token.refresh_token,
            expires_in: token.expires_in,
            token_type: Some(token.token_type),
            scope: token.scope,
            ..Default::default()
        },
        Utc::now(),
    );

    store.persist(kind, user, &updated).await?;
    tracing::debug!(kind = %kind, user = %user, url = %record.url, "access token refreshed");
    Ok(updated)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
