//! End-to-end authorization flow tests using wiremock
//!
//! Drives `FlowEngine` against a mock resource server that doubles as the
//! authorization server:
//!
//! - A full login round-trip: probe 401 → resource discovery → auth server
//!   discovery → dynamic registration → redirect → callback → code exchange
//!   → stored credential record.
//! - The `code_verifier` sent to the token endpoint hashes to the
//!   `code_challenge` sent to the authorization endpoint.
//! - A tampered or replayed `state` aborts the callback before the token
//!   endpoint is ever contacted.
//! - Resources that answer an unauthenticated probe are stored as `public`
//!   records without any redirect.
//! - A probe rejection's `WWW-Authenticate` challenge supplies the metadata
//!   URL when no well-known location publishes it.
//! - Servers without S256 support or without any registration mechanism
//!   fail the login attempt with the matching error.

use std::sync::Arc;

use base64::Engine as _;
use sha2::{Digest, Sha256};
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use resauth::error::ResauthError;
use resauth::kv::{KvStore, MemoryKv};
use resauth::oauth::flow::{FlowEngine, FlowStore, LoginOutcome};
use resauth::oauth::registration::ClientRegistrar;
use resauth::store::{CredentialStore, ResourceKind, DEFAULT_PROFILE};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Builds an engine over an in-memory store, returning the store too so
/// tests can inspect what was persisted.
fn test_engine(base_url: &str, app_uri: Option<&str>) -> (FlowEngine, CredentialStore) {
    let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
    let http = Arc::new(reqwest::Client::new());
    let store = CredentialStore::new(kv.clone());
    let flows = FlowStore::new(kv);
    let registrar = ClientRegistrar::new(
        http.clone(),
        "resauth-tests".to_string(),
        app_uri.map(str::to_string),
        None,
        "/oauth".to_string(),
    );
    let engine = FlowEngine::new(http, store.clone(), flows, registrar, base_url, "/oauth");
    (engine, store)
}

/// RFC 9728 metadata for the resource at `{base_url}/mcp`, pointing back at
/// the same host as its authorization server.
fn resource_metadata_body(base_url: &str) -> serde_json::Value {
    serde_json::json!({
        "resource": format!("{base_url}/mcp"),
        "authorization_servers": [base_url]
    })
}

/// RFC 8414 metadata advertising S256 and a registration endpoint.
fn server_metadata_body(base_url: &str) -> serde_json::Value {
    serde_json::json!({
        "issuer": base_url,
        "authorization_endpoint": format!("{base_url}/authorize"),
        "token_endpoint": format!("{base_url}/token"),
        "registration_endpoint": format!("{base_url}/register"),
        "response_types_supported": ["code"],
        "code_challenge_methods_supported": ["S256"]
    })
}

fn token_response_body() -> serde_json::Value {
    serde_json::json!({
        "access_token": "tok1",
        "token_type": "Bearer",
        "expires_in": 3600,
        "refresh_token": "rt9"
    })
}

/// JSON-RPC `initialize` result naming the server, so identity resolution
/// stays on the mock server instead of probing anything else.
fn initialize_response_body(name: &str) -> serde_json::Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": 1,
        "result": {
            "protocolVersion": "2025-11-25",
            "capabilities": {},
            "serverInfo": {
                "name": name,
                "icons": [{"src": "/icon.png"}]
            }
        }
    })
}

/// Mounts the discovery chain for the protected resource at `/mcp`: the
/// unauthenticated probe is rejected, then resource and authorization
/// server metadata resolve on the same host.
async fn mount_protected_discovery(server: &MockServer, server_metadata: serde_json::Value) {
    let base_url = server.uri();

    Mock::given(method("HEAD"))
        .and(path("/mcp"))
        .respond_with(ResponseTemplate::new(401))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/.well-known/oauth-protected-resource/mcp"))
        .respond_with(ResponseTemplate::new(200).set_body_json(resource_metadata_body(&base_url)))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/.well-known/oauth-authorization-server"))
        .respond_with(ResponseTemplate::new(200).set_body_json(server_metadata))
        .mount(server)
        .await;
}

/// Extracts one query parameter from a URL string.
fn query_param(url: &str, name: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    parsed
        .query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.to_string())
}

// ---------------------------------------------------------------------------
// Full round-trip
// ---------------------------------------------------------------------------

/// The complete happy path: discovery, dynamic registration issuing
/// `client_id=abc123`, a redirect URL carrying every required parameter,
/// then a callback whose code exchange stores a non-public record with the
/// issued tokens.
#[tokio::test]
async fn test_full_authorization_flow_stores_token_record() {
    let server = MockServer::start().await;
    let base_url = server.uri();
    let resource_url = format!("{base_url}/mcp");

    mount_protected_discovery(&server, server_metadata_body(&base_url)).await;

    Mock::given(method("POST"))
        .and(path("/register"))
        .and(body_string_contains("authorization_code"))
        .respond_with(
            ResponseTemplate::new(201).set_body_json(serde_json::json!({"client_id": "abc123"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let encoded_resource: String =
        url::form_urlencoded::byte_serialize(resource_url.as_bytes()).collect();
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains("code=authcode123"))
        .and(body_string_contains("client_id=abc123"))
        .and(body_string_contains("code_verifier="))
        .and(body_string_contains(format!("resource={encoded_resource}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_response_body()))
        .expect(1)
        .mount(&server)
        .await;

    // Identity probe after the exchange must carry the fresh token.
    Mock::given(method("POST"))
        .and(path("/mcp"))
        .and(header("authorization", "Bearer tok1"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(initialize_response_body("Example Tools")),
        )
        .mount(&server)
        .await;

    let (engine, store) = test_engine("http://127.0.0.1:8765", None);

    let outcome = engine
        .begin_login(ResourceKind::Mcp, "alice", DEFAULT_PROFILE, &resource_url, None)
        .await
        .expect("login must reach the redirect stage");

    let LoginOutcome::Redirect {
        authorization_url,
        cookie_name,
        state,
        callback_path,
    } = outcome
    else {
        panic!("expected a Redirect outcome for a protected resource");
    };

    assert!(
        authorization_url.starts_with(&format!("{base_url}/authorize?")),
        "redirect must target the discovered authorization endpoint: {authorization_url}"
    );
    assert!(authorization_url.contains("response_type=code"));
    assert!(
        authorization_url.contains("client_id=abc123"),
        "registered client_id must appear in the redirect: {authorization_url}"
    );
    assert!(authorization_url.contains("code_challenge="));
    assert!(authorization_url.contains("code_challenge_method=S256"));
    assert!(authorization_url.contains(&format!("state={state}")));
    assert!(
        authorization_url.contains(&format!("resource={encoded_resource}")),
        "RFC 8707 resource must name the canonical resource URL: {authorization_url}"
    );
    assert_eq!(cookie_name, "oauth_auth_mcp_127.0.0.1");
    assert_eq!(callback_path, "/oauth/callback/mcp/127.0.0.1");

    let record = engine
        .complete_login(ResourceKind::Mcp, "127.0.0.1", "authcode123", &state, &state)
        .await
        .expect("callback with matching state must complete");

    assert!(!record.public, "token-bearing records are not public");
    assert_eq!(record.access_token.as_deref(), Some("tok1"));
    assert_eq!(record.refresh_token.as_deref(), Some("rt9"));
    assert_eq!(record.expires_in, Some(3600));
    assert_eq!(record.client_id.as_deref(), Some("abc123"));
    assert_eq!(
        record.token_endpoint.as_deref(),
        Some(format!("{base_url}/token").as_str()),
        "token endpoint must be remembered for refresh"
    );
    assert_eq!(record.name, "Example Tools");

    // The record is retrievable under the canonical resource URL.
    let stored = store
        .get(ResourceKind::Mcp, "alice", DEFAULT_PROFILE, &resource_url)
        .await
        .expect("store lookup must not error")
        .expect("record must be persisted after the callback");
    assert_eq!(stored.access_token.as_deref(), Some("tok1"));

    server.verify().await;
}

/// The verifier presented at the token endpoint must hash (S256) to the
/// challenge presented at the authorization endpoint.
#[tokio::test]
async fn test_token_exchange_verifier_matches_challenge() {
    let server = MockServer::start().await;
    let base_url = server.uri();
    let resource_url = format!("{base_url}/mcp");

    mount_protected_discovery(&server, server_metadata_body(&base_url)).await;
    Mock::given(method("POST"))
        .and(path("/register"))
        .respond_with(
            ResponseTemplate::new(201).set_body_json(serde_json::json!({"client_id": "abc123"})),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_response_body()))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/mcp"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(initialize_response_body("Example Tools")),
        )
        .mount(&server)
        .await;

    let (engine, _store) = test_engine("http://127.0.0.1:8765", None);

    let outcome = engine
        .begin_login(ResourceKind::Mcp, "alice", DEFAULT_PROFILE, &resource_url, None)
        .await
        .unwrap();
    let LoginOutcome::Redirect {
        authorization_url,
        state,
        ..
    } = outcome
    else {
        panic!("expected a Redirect outcome");
    };

    let challenge =
        query_param(&authorization_url, "code_challenge").expect("redirect carries a challenge");

    engine
        .complete_login(ResourceKind::Mcp, "127.0.0.1", "authcode123", &state, &state)
        .await
        .unwrap();

    // Recompute the challenge from the verifier the token endpoint received.
    let requests = server
        .received_requests()
        .await
        .expect("request recording is enabled");
    let token_request = requests
        .iter()
        .find(|r| r.url.path() == "/token")
        .expect("token endpoint must have been called");
    let body = String::from_utf8(token_request.body.clone()).expect("form body is UTF-8");
    let verifier = url::form_urlencoded::parse(body.as_bytes())
        .find(|(k, _)| k == "code_verifier")
        .map(|(_, v)| v.to_string())
        .expect("exchange must carry code_verifier");

    let digest = Sha256::digest(verifier.as_bytes());
    let recomputed = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(digest.as_slice());
    assert_eq!(
        recomputed, challenge,
        "code_verifier must hash to the code_challenge from the redirect"
    );
}

/// A confidential client identity from registration is carried through the
/// exchange and onto the stored record.
#[tokio::test]
async fn test_client_secret_from_registration_reaches_exchange_and_record() {
    let server = MockServer::start().await;
    let base_url = server.uri();
    let resource_url = format!("{base_url}/mcp");

    mount_protected_discovery(&server, server_metadata_body(&base_url)).await;
    Mock::given(method("POST"))
        .and(path("/register"))
        .respond_with(ResponseTemplate::new(201).set_body_json(
            serde_json::json!({"client_id": "abc123", "client_secret": "s3cr3t"}),
        ))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("client_secret=s3cr3t"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_response_body()))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/mcp"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(initialize_response_body("Example Tools")),
        )
        .mount(&server)
        .await;

    let (engine, _store) = test_engine("http://127.0.0.1:8765", None);
    let outcome = engine
        .begin_login(ResourceKind::Mcp, "alice", DEFAULT_PROFILE, &resource_url, None)
        .await
        .unwrap();
    let LoginOutcome::Redirect { state, .. } = outcome else {
        panic!("expected a Redirect outcome");
    };

    let record = engine
        .complete_login(ResourceKind::Mcp, "127.0.0.1", "authcode123", &state, &state)
        .await
        .unwrap();

    assert_eq!(record.client_secret.as_deref(), Some("s3cr3t"));
    server.verify().await;
}

// ---------------------------------------------------------------------------
// State binding
// ---------------------------------------------------------------------------

/// A callback whose query `state` differs from the pending flow's must be
/// rejected, and the token endpoint must never be contacted.
#[tokio::test]
async fn test_tampered_state_never_reaches_token_endpoint() {
    let server = MockServer::start().await;
    let base_url = server.uri();
    let resource_url = format!("{base_url}/mcp");

    mount_protected_discovery(&server, server_metadata_body(&base_url)).await;
    Mock::given(method("POST"))
        .and(path("/register"))
        .respond_with(
            ResponseTemplate::new(201).set_body_json(serde_json::json!({"client_id": "abc123"})),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_response_body()))
        .expect(0)
        .mount(&server)
        .await;

    let (engine, _store) = test_engine("http://127.0.0.1:8765", None);
    let outcome = engine
        .begin_login(ResourceKind::Mcp, "alice", DEFAULT_PROFILE, &resource_url, None)
        .await
        .unwrap();
    let LoginOutcome::Redirect { state, .. } = outcome else {
        panic!("expected a Redirect outcome");
    };

    let err = engine
        .complete_login(
            ResourceKind::Mcp,
            "127.0.0.1",
            "authcode123",
            "tampered-state",
            &state,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, ResauthError::StateMismatch));
    server.verify().await;
}

/// A callback without a matching pending flow (unknown cookie state) is a
/// state mismatch.
#[tokio::test]
async fn test_callback_with_unknown_cookie_state_is_rejected() {
    let (engine, _store) = test_engine("http://127.0.0.1:8765", None);

    let err = engine
        .complete_login(
            ResourceKind::Mcp,
            "mcp.example.com",
            "authcode123",
            "some-state",
            "never-issued",
        )
        .await
        .unwrap_err();

    assert!(matches!(err, ResauthError::StateMismatch));
}

/// A pending flow is bound to its `(kind, hostname)` route; completing it
/// on a different route is rejected.
#[tokio::test]
async fn test_callback_on_wrong_route_is_rejected() {
    let server = MockServer::start().await;
    let base_url = server.uri();
    let resource_url = format!("{base_url}/mcp");

    mount_protected_discovery(&server, server_metadata_body(&base_url)).await;
    Mock::given(method("POST"))
        .and(path("/register"))
        .respond_with(
            ResponseTemplate::new(201).set_body_json(serde_json::json!({"client_id": "abc123"})),
        )
        .mount(&server)
        .await;

    let (engine, _store) = test_engine("http://127.0.0.1:8765", None);
    let outcome = engine
        .begin_login(ResourceKind::Mcp, "alice", DEFAULT_PROFILE, &resource_url, None)
        .await
        .unwrap();
    let LoginOutcome::Redirect { state, .. } = outcome else {
        panic!("expected a Redirect outcome");
    };

    // Same state, wrong kind.
    let err = engine
        .complete_login(
            ResourceKind::Context,
            "127.0.0.1",
            "authcode123",
            &state,
            &state,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ResauthError::StateMismatch));
}

/// A flow is consumable exactly once; replaying the callback after a
/// successful exchange finds nothing.
#[tokio::test]
async fn test_replayed_callback_is_rejected() {
    let server = MockServer::start().await;
    let base_url = server.uri();
    let resource_url = format!("{base_url}/mcp");

    mount_protected_discovery(&server, server_metadata_body(&base_url)).await;
    Mock::given(method("POST"))
        .and(path("/register"))
        .respond_with(
            ResponseTemplate::new(201).set_body_json(serde_json::json!({"client_id": "abc123"})),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_response_body()))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/mcp"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(initialize_response_body("Example Tools")),
        )
        .mount(&server)
        .await;

    let (engine, _store) = test_engine("http://127.0.0.1:8765", None);
    let outcome = engine
        .begin_login(ResourceKind::Mcp, "alice", DEFAULT_PROFILE, &resource_url, None)
        .await
        .unwrap();
    let LoginOutcome::Redirect { state, .. } = outcome else {
        panic!("expected a Redirect outcome");
    };

    engine
        .complete_login(ResourceKind::Mcp, "127.0.0.1", "authcode123", &state, &state)
        .await
        .expect("first callback must succeed");

    let err = engine
        .complete_login(ResourceKind::Mcp, "127.0.0.1", "authcode123", &state, &state)
        .await
        .unwrap_err();
    assert!(
        matches!(err, ResauthError::StateMismatch),
        "replay must fail as a state mismatch, got: {err}"
    );

    server.verify().await;
}

// ---------------------------------------------------------------------------
// Public resources
// ---------------------------------------------------------------------------

/// A resource answering the unauthenticated HEAD probe is stored as a
/// `public` record immediately, skipping discovery and redirect entirely.
#[tokio::test]
async fn test_public_resource_stores_record_without_redirect() {
    let server = MockServer::start().await;
    let base_url = server.uri();
    let resource_url = format!("{base_url}/public");

    Mock::given(method("HEAD"))
        .and(path("/public"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/public"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(initialize_response_body("Public Tools")),
        )
        .mount(&server)
        .await;

    let (engine, store) = test_engine("http://127.0.0.1:8765", None);
    let outcome = engine
        .begin_login(ResourceKind::Mcp, "alice", DEFAULT_PROFILE, &resource_url, None)
        .await
        .unwrap();

    let LoginOutcome::Public(record) = outcome else {
        panic!("expected a Public outcome for an unprotected resource");
    };
    assert!(record.public);
    assert!(record.access_token.is_none(), "public records carry no tokens");
    assert_eq!(record.name, "Public Tools");

    let stored = store
        .get(ResourceKind::Mcp, "alice", DEFAULT_PROFILE, &resource_url)
        .await
        .unwrap()
        .expect("public record must be persisted");
    assert!(stored.public);
}

/// Servers that reject HEAD with 405 get one GET probe before the resource
/// is treated as protected.
#[tokio::test]
async fn test_probe_falls_back_to_get_on_405() {
    let server = MockServer::start().await;
    let base_url = server.uri();
    let resource_url = format!("{base_url}/head-hostile");

    Mock::given(method("HEAD"))
        .and(path("/head-hostile"))
        .respond_with(ResponseTemplate::new(405))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/head-hostile"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/head-hostile"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(initialize_response_body("Head Hostile")),
        )
        .mount(&server)
        .await;

    let (engine, _store) = test_engine("http://127.0.0.1:8765", None);
    let outcome = engine
        .begin_login(ResourceKind::Mcp, "alice", DEFAULT_PROFILE, &resource_url, None)
        .await
        .unwrap();

    assert!(
        matches!(outcome, LoginOutcome::Public(_)),
        "GET fallback answering 200 means the resource is public"
    );
    server.verify().await;
}

// ---------------------------------------------------------------------------
// Capability rejections
// ---------------------------------------------------------------------------

/// An authorization server that does not advertise S256 fails the login;
/// there is no downgrade to `plain`.
#[tokio::test]
async fn test_login_rejects_server_without_s256() {
    let server = MockServer::start().await;
    let base_url = server.uri();
    let resource_url = format!("{base_url}/mcp");

    let mut metadata = server_metadata_body(&base_url);
    metadata["code_challenge_methods_supported"] = serde_json::json!(["plain"]);
    mount_protected_discovery(&server, metadata).await;

    let (engine, _store) = test_engine("http://127.0.0.1:8765", None);
    let err = engine
        .begin_login(ResourceKind::Mcp, "alice", DEFAULT_PROFILE, &resource_url, None)
        .await
        .unwrap_err();

    match err {
        ResauthError::PkceUnsupported { issuer } => assert_eq!(issuer, base_url),
        other => panic!("expected PkceUnsupported, got: {other}"),
    }
}

/// With neither CIMD support nor a registration endpoint, no client
/// identity can be obtained and the login fails.
#[tokio::test]
async fn test_login_fails_without_any_registration_mechanism() {
    let server = MockServer::start().await;
    let base_url = server.uri();
    let resource_url = format!("{base_url}/mcp");

    let mut metadata = server_metadata_body(&base_url);
    metadata.as_object_mut().unwrap().remove("registration_endpoint");
    mount_protected_discovery(&server, metadata).await;

    let (engine, _store) = test_engine("http://127.0.0.1:8765", None);
    let err = engine
        .begin_login(ResourceKind::Mcp, "alice", DEFAULT_PROFILE, &resource_url, None)
        .await
        .unwrap_err();

    assert!(
        matches!(err, ResauthError::Registration(_)),
        "expected Registration error, got: {err}"
    );
}

/// When the server supports client ID metadata documents and a public
/// application URI is configured, the document URL becomes the `client_id`
/// and dynamic registration is skipped.
#[tokio::test]
async fn test_cimd_client_id_skips_dynamic_registration() {
    let server = MockServer::start().await;
    let base_url = server.uri();
    let resource_url = format!("{base_url}/mcp");

    let mut metadata = server_metadata_body(&base_url);
    metadata["client_id_metadata_document_supported"] = serde_json::json!(true);
    mount_protected_discovery(&server, metadata).await;

    Mock::given(method("POST"))
        .and(path("/register"))
        .respond_with(
            ResponseTemplate::new(201).set_body_json(serde_json::json!({"client_id": "abc123"})),
        )
        .expect(0)
        .mount(&server)
        .await;

    let (engine, _store) = test_engine("http://127.0.0.1:8765", Some("https://app.example.com"));
    let outcome = engine
        .begin_login(ResourceKind::Mcp, "alice", DEFAULT_PROFILE, &resource_url, None)
        .await
        .unwrap();

    let LoginOutcome::Redirect {
        authorization_url, ..
    } = outcome
    else {
        panic!("expected a Redirect outcome");
    };
    let client_id = query_param(&authorization_url, "client_id").expect("client_id present");
    assert_eq!(
        client_id,
        "https://app.example.com/oauth/client-metadata.json"
    );

    server.verify().await;
}

/// When the discovery chain finds nothing at all, the login error lists
/// every candidate URL that was tried.
#[tokio::test]
async fn test_login_discovery_failure_records_attempts() {
    let server = MockServer::start().await;
    let base_url = server.uri();
    let resource_url = format!("{base_url}/mcp");

    Mock::given(method("HEAD"))
        .and(path("/mcp"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    // No metadata mounted anywhere: both well-known candidates 404.

    let (engine, _store) = test_engine("http://127.0.0.1:8765", None);
    let err = engine
        .begin_login(ResourceKind::Mcp, "alice", DEFAULT_PROFILE, &resource_url, None)
        .await
        .unwrap_err();

    match err {
        ResauthError::Discovery { subject, attempts } => {
            assert!(subject.contains("/mcp"));
            assert_eq!(attempts.len(), 2, "path-scoped and root candidates");
            assert!(attempts[0]
                .url
                .contains("/.well-known/oauth-protected-resource/mcp"));
            assert!(attempts
                .iter()
                .all(|a| a.reason.contains("404")), "candidates failed with 404");
        }
        other => panic!("expected Discovery error, got: {other}"),
    }
}

/// A resource that advertises its metadata URL only in the probe
/// rejection's `WWW-Authenticate` challenge (RFC 9728 section 5.1) is
/// still discoverable; the challenge URL is tried before any well-known
/// location.
#[tokio::test]
async fn test_login_discovers_metadata_from_challenge_header() {
    let server = MockServer::start().await;
    let base_url = server.uri();
    let resource_url = format!("{base_url}/mcp");

    Mock::given(method("HEAD"))
        .and(path("/mcp"))
        .respond_with(ResponseTemplate::new(401).insert_header(
            "www-authenticate",
            format!(r#"Bearer resource_metadata="{base_url}/metadata/prm""#).as_str(),
        ))
        .mount(&server)
        .await;
    // Metadata lives only at the challenge-advertised URL; both well-known
    // candidates answer 404.
    Mock::given(method("GET"))
        .and(path("/metadata/prm"))
        .respond_with(ResponseTemplate::new(200).set_body_json(resource_metadata_body(&base_url)))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/.well-known/oauth-authorization-server"))
        .respond_with(ResponseTemplate::new(200).set_body_json(server_metadata_body(&base_url)))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/register"))
        .respond_with(
            ResponseTemplate::new(201).set_body_json(serde_json::json!({"client_id": "abc123"})),
        )
        .mount(&server)
        .await;

    let (engine, _store) = test_engine("http://127.0.0.1:8765", None);
    let outcome = engine
        .begin_login(ResourceKind::Mcp, "alice", DEFAULT_PROFILE, &resource_url, None)
        .await
        .expect("challenge-advertised metadata must satisfy discovery");

    let LoginOutcome::Redirect {
        authorization_url, ..
    } = outcome
    else {
        panic!("expected a Redirect outcome");
    };
    let encoded_resource: String =
        url::form_urlencoded::byte_serialize(resource_url.as_bytes()).collect();
    assert!(
        authorization_url.contains(&format!("resource={encoded_resource}")),
        "canonical resource must come from the challenge-advertised metadata: {authorization_url}"
    );

    server.verify().await;
}
