/*!
Command handlers for the CLI

This module provides command handlers invoked by the CLI entrypoint.

It exposes three top-level command modules:

- `serve`       — Run the authorization engine HTTP server
- `credentials` — List and remove stored credentials
- `profiles`    — Manage credential profiles

These handlers are intentionally small and use the library components:
the credential store, the flow engine, and the HTTP surface.
*/

use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::error::{ResauthError, Result};
use crate::kv::{KvStore, SledKv};
use crate::store::{CredentialStore, ResourceKind};

/// Opens the configured credential store backend.
fn open_kv(config: &Config) -> Result<Arc<dyn KvStore>> {
    let kv = match config.storage.path {
        Some(ref path) => SledKv::new_with_path(path.clone())?,
        None => SledKv::new()?,
    };
    Ok(Arc::new(kv))
}

/// Builds the shared outbound HTTP client with the configured timeout.
fn shared_http_client(config: &Config) -> Result<Arc<reqwest::Client>> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.http.timeout_seconds))
        .build()
        .map_err(ResauthError::Http)?;
    Ok(Arc::new(client))
}

fn parse_kind(kind: &str) -> Result<ResourceKind> {
    ResourceKind::parse(kind)
        .ok_or_else(|| ResauthError::Config(format!("unknown resource kind '{kind}'")))
}

// Server command handler
pub mod serve {
    //! HTTP server handler.
    //!
    //! Assembles the credential store, flow engine, and router, then
    //! serves until interrupted.

    use super::*;
    use crate::api::{router, AppState};
    use crate::oauth::flow::{FlowEngine, FlowStore};
    use crate::oauth::registration::ClientRegistrar;

    /// Run the authorization engine HTTP server
    ///
    /// # Arguments
    ///
    /// * `config` - Validated engine configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be opened, the listen address
    /// cannot be bound, or the server exits abnormally.
    pub async fn run(config: Config) -> Result<()> {
        let kv = open_kv(&config)?;
        let store = CredentialStore::new(Arc::clone(&kv));
        let flows = FlowStore::new(kv);
        let http = shared_http_client(&config)?;

        let registrar = ClientRegistrar::new(
            Arc::clone(&http),
            config.oauth.client_name.clone(),
            config.oauth.app_uri.clone(),
            config.oauth.logo_uri.clone(),
            config.server.path_prefix.clone(),
        );
        let engine = FlowEngine::new(
            http,
            store,
            flows,
            registrar,
            &config.server.base_url,
            &config.server.path_prefix,
        );

        let state = AppState {
            engine,
            client_name: config.oauth.client_name.clone(),
            app_uri: config.oauth.app_uri.clone(),
            logo_uri: config.oauth.logo_uri.clone(),
            base_url: config.server.base_url.trim_end_matches('/').to_string(),
            path_prefix: config.server.path_prefix.clone(),
            default_user: config.server.default_user.clone(),
            secure_cookies: config.server.base_url.starts_with("https://"),
        };
        let app = router(state);

        let listener = tokio::net::TcpListener::bind(&config.server.listen_addr)
            .await
            .map_err(ResauthError::Io)?;
        tracing::info!(
            listen_addr = %config.server.listen_addr,
            base_url = %config.server.base_url,
            path_prefix = %config.server.path_prefix,
            "authorization engine listening"
        );

        axum::serve(listener, app).await.map_err(ResauthError::Io)?;
        Ok(())
    }
}

// Credential management command handlers
pub mod credentials {
    //! Credential listing and removal handlers.

    use super::*;

    /// List stored credentials for a user
    ///
    /// Prints one line per record: kind, profile, URL, name, and whether a
    /// usable token or public marker is present. Tokens themselves are
    /// never printed.
    pub async fn list(config: Config, user: Option<String>, kind: Option<String>) -> Result<()> {
        let kv = open_kv(&config)?;
        let store = CredentialStore::new(kv);
        let user = user.unwrap_or_else(|| config.server.default_user.clone());

        let kinds: Vec<ResourceKind> = match kind {
            Some(ref k) => vec![parse_kind(k)?],
            None => vec![ResourceKind::Mcp, ResourceKind::Context],
        };

        let mut total = 0;
        for kind in kinds {
            let records = store.list_all(kind, &user).await?;
            for record in records {
                let status = if record.access_token.is_some() {
                    "authorized"
                } else if record.public {
                    "public"
                } else {
                    "login required"
                };
                println!(
                    "{:<8} {:<12} {:<50} {:<30} {}",
                    kind, record.profile, record.url, record.name, status
                );
                total += 1;
            }
        }

        if total == 0 {
            println!("No credentials stored for user '{}'", user);
        }
        Ok(())
    }

    /// Remove one stored credential
    pub async fn remove(
        config: Config,
        url: String,
        kind: String,
        user: Option<String>,
        profile: Option<String>,
    ) -> Result<()> {
        let kv = open_kv(&config)?;
        let store = CredentialStore::new(kv);
        let user = user.unwrap_or_else(|| config.server.default_user.clone());
        let profile = profile.unwrap_or_else(|| crate::store::DEFAULT_PROFILE.to_string());
        let kind = parse_kind(&kind)?;

        store.remove(kind, &user, &profile, &url).await?;
        println!("Removed {} credential for {}", kind, url);
        Ok(())
    }
}

// Profile management command handlers
pub mod profiles {
    //! Profile registry handlers.

    use super::*;

    /// List a user's profiles
    pub async fn list(config: Config, user: Option<String>) -> Result<()> {
        let kv = open_kv(&config)?;
        let store = CredentialStore::new(kv);
        let user = user.unwrap_or_else(|| config.server.default_user.clone());

        let profiles = store.list_profiles(&user).await?;
        if profiles.is_empty() {
            println!("No profiles registered for user '{}'", user);
        } else {
            for profile in profiles {
                println!("{}", profile);
            }
        }
        Ok(())
    }

    /// Register a new profile
    pub async fn add(config: Config, name: String, user: Option<String>) -> Result<()> {
        let kv = open_kv(&config)?;
        let store = CredentialStore::new(kv);
        let user = user.unwrap_or_else(|| config.server.default_user.clone());

        store.register_profile(&user, &name).await?;
        println!("Registered profile '{}' for user '{}'", name, user);
        Ok(())
    }
}
