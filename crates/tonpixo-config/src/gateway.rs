//! Discovery of a locally running capability service.
//!
//! When the base URL or bearer token is not configured, a sibling checkout
//! of the service is consulted:
//!
//! ```text
//! <repo_dir>/runtime/{profile}.env   MCP_BEARER_TOKEN
//! <repo_dir>/runtime/caddy.env       MCP_DEV_DOMAIN | MCP_MAIN_DOMAIN
//! ```
//!
//! Without a domain, the local port is `8082` (dev) or `8081` (main) when the
//! profile env file exists, else `TONPIXO_MCP_LOCAL_PORT` (default `8080`).

use std::path::{Path, PathBuf};

use crate::profile::{gateway_profile, read_env_key};

/// Service checkout name looked for next to the working directory.
const DEFAULT_REPO_NAME: &str = "tonpixo-mcp";

/// Settings found in a sibling service checkout.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveredGateway {
    pub profile: &'static str,
    pub repo_dir: PathBuf,
    pub base_url: String,
    /// Where `base_url` came from, for logging.
    pub base_url_source: String,
    pub bearer_token: Option<String>,
}

fn resolve_repo_dir(lookup: &dyn Fn(&str) -> Option<String>, cwd: &Path) -> Option<PathBuf> {
    let explicit = ["TONPIXO_MCP_DIR", "MCP_PROJECT_DIR"]
        .iter()
        .filter_map(|k| lookup(*k))
        .map(|v| v.trim().to_string())
        .find(|v| !v.is_empty());

    match explicit {
        Some(dir) => {
            let path = expand_home(&dir);
            Some(if path.is_absolute() { path } else { cwd.join(path) })
        }
        None => cwd.parent().map(|p| p.join(DEFAULT_REPO_NAME)),
    }
}

fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path)),
        None => PathBuf::from(path),
    }
}

fn with_scheme(domain: &str) -> String {
    let domain = domain.trim().trim_end_matches('/');
    if domain.starts_with("http://") || domain.starts_with("https://") {
        domain.to_string()
    } else {
        format!("https://{domain}")
    }
}

/// Look for a sibling service checkout relative to `cwd`.
///
/// Returns `None` inside AWS Lambda or when no checkout exists.
pub fn discover_gateway(
    lookup: &dyn Fn(&str) -> Option<String>,
    cwd: &Path,
) -> Option<DiscoveredGateway> {
    if lookup("AWS_LAMBDA_FUNCTION_NAME").is_some_and(|v| !v.trim().is_empty()) {
        return None;
    }

    let repo_dir = resolve_repo_dir(lookup, cwd)?;
    if !repo_dir.is_dir() {
        return None;
    }

    let profile = gateway_profile(lookup, cwd);
    let runtime = repo_dir.join("runtime");
    let profile_env = runtime.join(format!("{profile}.env"));
    let caddy_env = runtime.join("caddy.env");

    let bearer_token = read_env_key(&profile_env, "MCP_BEARER_TOKEN");

    let domain_key = if profile == "dev" {
        "MCP_DEV_DOMAIN"
    } else {
        "MCP_MAIN_DOMAIN"
    };

    let (base_url, base_url_source) = if let Some(domain) = read_env_key(&caddy_env, domain_key) {
        (with_scheme(&domain), format!("caddy.env:{domain_key}"))
    } else if profile_env.is_file() {
        let port = if profile == "dev" { 8082 } else { 8081 };
        (format!("http://127.0.0.1:{port}"), format!("{profile}.env"))
    } else {
        let port = lookup("TONPIXO_MCP_LOCAL_PORT")
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| "8080".to_string());
        (
            format!("http://127.0.0.1:{port}"),
            "default_local_port".to_string(),
        )
    };

    Some(DiscoveredGateway {
        profile,
        repo_dir,
        base_url,
        base_url_source,
        bearer_token,
    })
}
