//! OAuth 2.1 client plumbing
//!
//! Everything needed to obtain and maintain bearer credentials for a
//! protected resource: metadata discovery, client registration, the
//! PKCE-protected authorization code flow, and token refresh.
//!
//! # Module Layout
//!
//! - [`discovery`]    -- RFC 9728 protected resource metadata and RFC 8414 /
//!   OIDC authorization server metadata
//! - [`flow`]         -- OAuth 2.1 authorization code flow with PKCE
//! - [`pkce`]         -- PKCE `S256` challenge generation and verification
//! - [`refresh`]      -- expiry tracking and the `refresh_token` grant
//! - [`registration`] -- client identity via metadata documents or RFC 7591
//!   dynamic registration

pub mod discovery;
pub mod flow;
pub mod pkce;
pub mod refresh;
pub mod registration;

pub use discovery::{
    discover_authorization_server, discover_resource_metadata, AuthorizationServerMetadata,
    ProtectedResourceMetadata,
};
pub use flow::{cookie_name, AuthorizationFlowState, FlowEngine, FlowStore, LoginOutcome};
pub use pkce::PkceChallenge;
pub use refresh::{needs_refresh, refresh};
pub use registration::{ClientIdentity, ClientRegistrar};
