//! Command-line interface definition for resauth
//!
//! This module defines the CLI structure using clap's derive API,
//! providing the server command and credential management commands.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// resauth - OAuth resource authorization engine
///
/// Obtains and maintains bearer credentials for remote MCP servers and
/// context endpoints on behalf of users, via the OAuth 2.1 authorization
/// code flow with PKCE.
#[derive(Parser, Debug, Clone)]
#[command(name = "resauth")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/config.yaml")]
    pub config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Override the listen address from config
    #[arg(short, long)]
    pub listen: Option<String>,

    /// Override the credential store path from config
    #[arg(long)]
    pub kv_path: Option<PathBuf>,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for resauth
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run the authorization engine HTTP server
    Serve,

    /// List stored credentials
    List {
        /// User whose credentials to list (config default when omitted)
        #[arg(short, long)]
        user: Option<String>,

        /// Resource kind to list (mcp, context); both when omitted
        #[arg(short, long)]
        kind: Option<String>,
    },

    /// Remove one stored credential
    Remove {
        /// Resource URL the credential was stored under
        url: String,

        /// Resource kind (mcp, context)
        #[arg(short, long)]
        kind: String,

        /// User the credential belongs to (config default when omitted)
        #[arg(short, long)]
        user: Option<String>,

        /// Profile the credential is stored under
        #[arg(short, long)]
        profile: Option<String>,
    },

    /// Manage credential profiles
    Profiles {
        /// Profile management subcommand
        #[command(subcommand)]
        command: ProfileCommand,
    },
}

/// Profile management subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum ProfileCommand {
    /// List a user's profiles
    List {
        /// User whose profiles to list (config default when omitted)
        #[arg(short, long)]
        user: Option<String>,
    },

    /// Register a new profile
    Add {
        /// Profile name
        name: String,

        /// User to register the profile for (config default when omitted)
        #[arg(short, long)]
        user: Option<String>,
    },
}

impl Cli {
    /// Parse command line arguments
    ///
    /// # Returns
    ///
    /// Returns the parsed CLI structure
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

impl Default for Cli {
    fn default() -> Self {
        Self {
            config: Some("config/config.yaml".to_string()),
            verbose: false,
            listen: None,
            kv_path: None,
            command: Commands::Serve,
        }
    }
}
