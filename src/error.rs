//! Error types for resauth
//!
//! This module defines all error types used throughout the engine, using
//! `thiserror` for ergonomic error handling. HTTP-facing callers match on
//! the variants to pick response codes (state mismatch is a 400, an upstream
//! token-endpoint rejection is a 502), so the crate-wide [`Result`] alias is
//! concrete rather than `anyhow`-erased; the binary entry point still uses
//! `anyhow` for top-level context.

use thiserror::Error;

/// One endpoint tried during metadata discovery, with the reason it was
/// rejected. Collected so a failed discovery can report everything it
/// attempted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryAttempt {
    /// The endpoint URL that was tried.
    pub url: String,
    /// Why this endpoint did not yield usable metadata.
    pub reason: String,
}

fn format_attempts(attempts: &[DiscoveryAttempt]) -> String {
    attempts
        .iter()
        .map(|a| format!("{} ({})", a.url, a.reason))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Main error type for resauth operations
///
/// This enum encompasses all possible errors that can occur during metadata
/// discovery, client registration, the authorization code flow, token
/// refresh, and credential persistence.
#[derive(Error, Debug)]
pub enum ResauthError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Metadata discovery exhausted every candidate endpoint.
    ///
    /// Carries each attempted endpoint and its failure reason so operators
    /// can see exactly which well-known URIs were probed.
    #[error("Discovery failed for {subject}: tried {}", format_attempts(.attempts))]
    Discovery {
        /// What was being discovered (the resource or issuer URL).
        subject: String,
        /// Every endpoint tried, in order, with per-endpoint reasons.
        attempts: Vec<DiscoveryAttempt>,
    },

    /// Dynamic client registration was rejected, or the authorization server
    /// advertises no registration mechanism at all
    #[error("Client registration failed: {0}")]
    Registration(String),

    /// The authorization server does not support the PKCE S256 challenge
    /// method; the flow is aborted rather than downgraded
    #[error("Authorization server {issuer} does not support PKCE S256")]
    PkceUnsupported {
        /// Issuer URL of the offending authorization server.
        issuer: String,
    },

    /// The callback `state` did not match the in-flight flow (CSRF defense).
    /// The raw state values are deliberately not part of the message.
    #[error("Authorization callback state mismatch")]
    StateMismatch,

    /// The token endpoint rejected the authorization-code exchange
    #[error("Token exchange failed with {status}: {body}")]
    TokenExchange {
        /// Upstream HTTP status code.
        status: u16,
        /// Upstream response body, verbatim.
        body: String,
    },

    /// The token endpoint rejected the refresh-token exchange
    #[error("Token refresh failed with {status}: {body}")]
    TokenRefresh {
        /// Upstream HTTP status code.
        status: u16,
        /// Upstream response body, verbatim.
        body: String,
    },

    /// No credential record exists for the resource. A "need to log in"
    /// signal, not a failure
    #[error("No credential found")]
    NotFound,

    /// Credential store errors (malformed records, key encoding)
    #[error("Store error: {0}")]
    Store(String),

    /// A URL was missing or could not be interpreted
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// URL parsing errors
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    /// Embedded key-value store errors
    #[error("KV store error: {0}")]
    Kv(#[from] sled::Error),
}

/// Result type alias for resauth operations
pub type Result<T> = std::result::Result<T, ResauthError>;
