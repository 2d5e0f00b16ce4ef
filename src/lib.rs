//! resauth - OAuth resource authorization engine library
//!
//! This library lets a backend service obtain and maintain bearer
//! credentials for third-party protected resources (remote MCP tool
//! servers and remote context endpoints) on behalf of its users, using
//! the OAuth 2.1 authorization code flow with PKCE, RFC 9728 / RFC 8414
//! discovery, and RFC 7591 dynamic client registration.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `store`: Credential records, prefix lookup, and profile registry
//! - `oauth`: Discovery, registration, PKCE, the authorization code flow,
//!   and token refresh
//! - `resolve`: The resolution API handed to the host system
//! - `api`: Browser-facing HTTP routes (login, callback, client metadata)
//! - `kv`: Key-value persistence backends
//! - `config`: Configuration management and validation
//! - `error`: Error types and result aliases
//! - `cli`: Command-line interface definition
//!
//! # Example
//!
//! ```no_run
//! use resauth::{Config, CredentialStore, Resolver};
//! use resauth::kv::SledKv;
//! use resauth::store::ResourceKind;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.yaml", &Default::default())?;
//!     config.validate()?;
//!
//!     let kv = Arc::new(SledKv::new()?);
//!     let store = CredentialStore::new(kv);
//!     let resolver = Resolver::new(
//!         Arc::new(reqwest::Client::new()),
//!         store,
//!         &config.server.base_url,
//!         &config.server.path_prefix,
//!         config.limits.max_fetch_bytes,
//!     );
//!
//!     let auth = resolver
//!         .authorization_for(ResourceKind::Mcp, "user", "default", "https://mcp.example.com")
//!         .await?;
//!     println!("{auth:?}");
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod kv;
pub mod oauth;
pub mod resolve;
pub mod store;

// Re-export commonly used types
pub use config::Config;
pub use error::{ResauthError, Result};
pub use oauth::flow::{FlowEngine, LoginOutcome};
pub use resolve::{FetchBatch, ResolvedAuth, Resolver};
pub use store::{CredentialRecord, CredentialStore, ResourceKind};
