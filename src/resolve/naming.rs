//! Best-effort resource naming and icon resolution
//!
//! Cosmetic metadata for stored credentials: a display name, an icon URL,
//! and whatever else the resource reports about itself. MCP servers are
//! asked directly via a one-shot JSON-RPC `initialize` call; anything else
//! falls back to scraping the apex domain's home page for an icon link.
//!
//! Nothing in this module is allowed to fail an authorization flow. Every
//! network or parse error degrades to "no metadata".

use regex::Regex;
use serde::Deserialize;
use url::Url;

use crate::store::{ResourceKind, ResourceMetadataInfo};

/// MCP protocol revision sent in the `initialize` probe.
const MCP_PROTOCOL_VERSION: &str = "2025-11-25";

/// Cap on how much of a scraped home page is inspected for icon links.
const MAX_SCRAPE_BYTES: usize = 256 * 1024;

/// What a resource reports about itself, as far as we could find out.
#[derive(Debug, Clone, Default)]
pub struct ResourceIdentity {
    /// Display name, when the resource advertises one.
    pub name: Option<String>,
    /// Icon, description, version, website.
    pub metadata: ResourceMetadataInfo,
}

/// Resolves a display name and metadata for `url`.
///
/// MCP resources get a JSON-RPC `initialize` probe (authorized with
/// `access_token` when one is available) whose `serverInfo` supplies name,
/// version, description, website, and icons. When no icon comes out of
/// that, or for non-MCP resources, the apex domain's home page is scraped
/// for a `<link rel="icon">`-style tag, falling back to
/// `{apex}/favicon.ico`.
pub async fn resolve_identity(
    http: &reqwest::Client,
    kind: ResourceKind,
    url: &str,
    access_token: Option<&str>,
) -> ResourceIdentity {
    let mut identity = ResourceIdentity::default();

    if kind == ResourceKind::Mcp {
        if let Some(info) = initialize_probe(http, url, access_token).await {
            identity.name = non_empty(info.title).or_else(|| non_empty(info.name));
            identity.metadata.version = non_empty(info.version);
            identity.metadata.description = non_empty(info.description);
            identity.metadata.website = non_empty(info.website_url);
            identity.metadata.icon = info
                .icons
                .into_iter()
                .next()
                .and_then(|icon| absolutize(url, &icon.src));
        }
    }

    if identity.metadata.icon.is_none() {
        identity.metadata.icon = discover_icon(http, url).await;
    }

    identity
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Resolves a possibly-relative icon `src` against the resource URL.
fn absolutize(base: &str, href: &str) -> Option<String> {
    let base = Url::parse(base).ok()?;
    base.join(href).ok().map(|u| u.to_string())
}

// ---------------------------------------------------------------------------
// MCP initialize probe
// ---------------------------------------------------------------------------

/// `serverInfo` as reported by an MCP server. Every field is optional so a
/// minimal or older server still parses.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ServerInfo {
    name: Option<String>,
    title: Option<String>,
    version: Option<String>,
    description: Option<String>,
    website_url: Option<String>,
    icons: Vec<ServerIcon>,
}

#[derive(Debug, Deserialize)]
struct ServerIcon {
    src: String,
}

/// One-shot JSON-RPC `initialize` POST. Returns `None` on any failure;
/// this is a courtesy call, not a session handshake.
async fn initialize_probe(
    http: &reqwest::Client,
    url: &str,
    access_token: Option<&str>,
) -> Option<ServerInfo> {
    let body = serde_json::json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "initialize",
        "params": {
            "protocolVersion": MCP_PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
            },
        },
    });

    let mut req = http
        .post(url)
        .header("Accept", "application/json, text/event-stream")
        .header("MCP-Protocol-Version", MCP_PROTOCOL_VERSION)
        .json(&body);
    if let Some(token) = access_token {
        req = req.bearer_auth(token);
    }

    let resp = req.send().await.ok()?;
    if !resp.status().is_success() {
        return None;
    }
    let content_type = resp
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    let text = resp.text().await.ok()?;
    parse_initialize_payload(&content_type, &text)
}

/// Extracts `result.serverInfo` from an initialize response body, which is
/// either plain JSON or an SSE frame whose first `data:` line carries the
/// JSON-RPC response.
fn parse_initialize_payload(content_type: &str, body: &str) -> Option<ServerInfo> {
    let payload = if content_type.contains("text/event-stream") {
        first_sse_data(body)?
    } else {
        body.to_string()
    };
    let value: serde_json::Value = serde_json::from_str(&payload).ok()?;
    let info = value.get("result")?.get("serverInfo")?;
    serde_json::from_value::<ServerInfo>(info.clone()).ok()
}

/// First non-empty `data:` value in an SSE body.
fn first_sse_data(body: &str) -> Option<String> {
    for line in body.lines() {
        if let Some(value) = line.strip_prefix("data:") {
            let value = value.trim();
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Icon discovery
// ---------------------------------------------------------------------------

/// Finds an icon for the resource's apex domain: a `<link rel>` tag on the
/// home page if one can be scraped, else the conventional `/favicon.ico`.
async fn discover_icon(http: &reqwest::Client, resource_url: &str) -> Option<String> {
    let homepage = apex_homepage(resource_url)?;

    if let Ok(resp) = http.get(homepage.clone()).send().await {
        if resp.status().is_success() {
            if let Ok(bytes) = resp.bytes().await {
                let cap = bytes.len().min(MAX_SCRAPE_BYTES);
                let html = String::from_utf8_lossy(&bytes[..cap]);
                if let Some(href) = find_icon_href(&homepage, &html) {
                    return Some(href);
                }
            }
        }
    }

    homepage.join("favicon.ico").ok().map(|u| u.to_string())
}

/// Home page URL of the resource's apex domain.
///
/// The apex is taken as the last two DNS labels of the host; IP literals
/// and single-label hosts are used as-is. Ports are dropped.
fn apex_homepage(resource_url: &str) -> Option<Url> {
    let url = Url::parse(resource_url).ok()?;
    let host = url.host_str()?;

    let apex = if host.starts_with('[') || host.parse::<std::net::Ipv4Addr>().is_ok() {
        host.to_string()
    } else {
        let labels: Vec<&str> = host.split('.').collect();
        if labels.len() <= 2 {
            host.to_string()
        } else {
            labels[labels.len() - 2..].join(".")
        }
    };

    Url::parse(&format!("{}://{}/", url.scheme(), apex)).ok()
}

/// Scans HTML for the first icon `<link>` tag and resolves its `href`
/// against the page URL.
fn find_icon_href(page: &Url, html: &str) -> Option<String> {
    let link_re = Regex::new(
        r#"(?i)<link[^>]*rel\s*=\s*["'](?:shortcut icon|icon|apple-touch-icon)["'][^>]*>"#,
    )
    .ok()?;
    let href_re = Regex::new(r#"(?i)href\s*=\s*["']([^"']+)["']"#).ok()?;

    for tag in link_re.find_iter(html) {
        if let Some(captures) = href_re.captures(tag.as_str()) {
            if let Ok(absolute) = page.join(&captures[1]) {
                return Some(absolute.to_string());
            }
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
