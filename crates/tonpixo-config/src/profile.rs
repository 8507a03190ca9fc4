//! Deployment profile detection and `.env` loading.
//!
//! The profile selects which `.env.{profile}` file is loaded and which
//! gateway runtime files are consulted during discovery. It comes from an
//! explicit variable or, failing that, from the current git branch.

use std::path::{Path, PathBuf};

use crate::error::{ConfigError, Result};

/// Variables that name the `.env` profile, in priority order.
const ENV_PROFILE_VARS: &[&str] = &["TONPIXO_ENV", "APP_ENV"];

/// Variables that name the gateway profile, in priority order.
const GATEWAY_PROFILE_VARS: &[&str] = &["MCP_PROFILE", "TONPIXO_ENV", "APP_ENV", "DEPLOYMENT_PROFILE"];

/// Map a branch or profile name onto `dev` / `main`.
pub fn normalize_profile(value: &str) -> Option<&'static str> {
    match value.trim().to_ascii_lowercase().as_str() {
        "dev" | "development" => Some("dev"),
        "main" | "master" | "prod" | "production" => Some("main"),
        _ => None,
    }
}

/// Branch checked out in the git repository at `repo_root`, if any.
///
/// Detached heads and missing repositories yield `None`.
pub fn detect_git_branch(repo_root: &Path) -> Option<String> {
    let head = std::fs::read_to_string(repo_root.join(".git").join("HEAD")).ok()?;
    let reference = head.trim().strip_prefix("ref: ")?.trim();
    reference
        .strip_prefix("refs/heads/")
        .map(ToString::to_string)
}

fn first_set(lookup: &dyn Fn(&str) -> Option<String>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| lookup(*k))
        .map(|v| v.trim().to_ascii_lowercase())
        .find(|v| !v.is_empty())
}

/// Profile used to pick `.env.{profile}`.
///
/// An explicit `TONPIXO_ENV`/`APP_ENV` is used verbatim (lowercased);
/// otherwise a `dev`/`development`/`main`/`master` branch selects a profile.
pub fn env_file_profile(
    lookup: &dyn Fn(&str) -> Option<String>,
    repo_root: &Path,
) -> Option<String> {
    if let Some(explicit) = first_set(lookup, ENV_PROFILE_VARS) {
        return Some(explicit);
    }

    let branch = detect_git_branch(repo_root)?;
    match branch.trim().to_ascii_lowercase().as_str() {
        "dev" | "development" => Some("dev".to_string()),
        "main" | "master" => Some("main".to_string()),
        _ => None,
    }
}

/// Profile used for gateway discovery. Defaults to `dev`.
pub fn gateway_profile(lookup: &dyn Fn(&str) -> Option<String>, repo_root: &Path) -> &'static str {
    first_set(lookup, GATEWAY_PROFILE_VARS)
        .and_then(|p| normalize_profile(&p))
        .or_else(|| detect_git_branch(repo_root).and_then(|b| normalize_profile(&b)))
        .unwrap_or("dev")
}

/// Load `.env.{profile}`, `.env.local` and `.env` from `dir`, in that order.
///
/// Variables already present in the process environment are never
/// overridden. Returns the files that were loaded.
pub fn load_env_files(dir: &Path, profile: Option<&str>) -> Result<Vec<PathBuf>> {
    let mut candidates = Vec::new();
    if let Some(profile) = profile {
        candidates.push(format!(".env.{profile}"));
    }
    for name in [".env.local", ".env"] {
        if !candidates.iter().any(|c| c == name) {
            candidates.push(name.to_string());
        }
    }

    let mut loaded = Vec::new();
    for name in candidates {
        let path = dir.join(&name);
        if !path.is_file() {
            continue;
        }
        dotenvy::from_path(&path).map_err(|e| ConfigError::EnvFile {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        loaded.push(path);
    }
    Ok(loaded)
}

/// Read a single key from an env-style file without touching the process environment.
pub fn read_env_key(path: &Path, key: &str) -> Option<String> {
    let iter = dotenvy::from_path_iter(path).ok()?;
    iter.filter_map(|item| item.ok())
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
