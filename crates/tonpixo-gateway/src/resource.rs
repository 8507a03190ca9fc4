//! Resource naming and focused retrieval.
//!
//! Callers (mostly the model) refer to resources in several historical shapes:
//!
//! ```text
//! resource://tonpixo/schema/transactions   ─┐
//! /v1/resources/schema/transactions         ├─► schema/transactions
//! resources/schema/transactions             │
//! schema/transactions                      ─┘
//! system_prompt                             ──► tonpixo_system_prompt
//! ```
//!
//! Everything is normalized to a canonical `category/item` name before a
//! request path is built. Unknown shapes are rejected rather than guessed.

use crate::error::{GatewayError, Result};

/// Canonical name of the system prompt template resource.
pub const SYSTEM_PROMPT_RESOURCE: &str = "tonpixo_system_prompt";

/// Accepted resource categories.
pub const RESOURCE_CATEGORIES: &[&str] = &["schema/", "rules/", "tool_description/"];

const URI_PREFIX: &str = "resource://tonpixo/";

/// Lower bound applied to any requested character budget.
pub const MIN_RESOURCE_CHARS: usize = 500;
/// Upper bound applied to any requested character budget.
pub const MAX_RESOURCE_CHARS: usize = 30_000;

/// Maximum number of focus matches that contribute a context window.
const FOCUS_MAX_MATCHES: usize = 6;
/// Lines of context kept before a match.
const FOCUS_BEFORE: usize = 4;
/// Lines of context kept after a match (inclusive of the match line).
const FOCUS_AFTER: usize = 5;

fn strip_prefix_trimmed<'a>(name: &'a str, prefix: &str) -> &'a str {
    match name.strip_prefix(prefix) {
        Some(rest) => rest.trim_matches('/'),
        None => name,
    }
}

/// Normalize a caller-supplied resource name to its canonical form.
pub fn resolve_resource_name(raw: &str) -> Result<String> {
    let mut name = raw.trim().trim_matches('/');
    if name.is_empty() {
        return Err(GatewayError::MissingResourceName);
    }

    name = strip_prefix_trimmed(name, URI_PREFIX);
    if name == "system_prompt" {
        return Ok(SYSTEM_PROMPT_RESOURCE.to_string());
    }
    name = strip_prefix_trimmed(name, "v1/resources/");
    name = strip_prefix_trimmed(name, "resources/");

    if name == SYSTEM_PROMPT_RESOURCE || RESOURCE_CATEGORIES.iter().any(|c| name.starts_with(c)) {
        Ok(name.to_string())
    } else {
        Err(GatewayError::UnsupportedResource(raw.to_string()))
    }
}

/// Build the request path for a canonical resource name.
pub fn resource_path(resolved: &str) -> Result<String> {
    if resolved == SYSTEM_PROMPT_RESOURCE {
        return Ok(format!("/v1/resources/{}", SYSTEM_PROMPT_RESOURCE));
    }

    match resolved.split_once('/') {
        Some((category, item)) if !item.is_empty() => {
            Ok(format!("/v1/resources/{}/{}", category, item))
        }
        _ => Err(GatewayError::UnsupportedResource(resolved.to_string())),
    }
}

/// Returns true if the name refers to a `schema/*` resource.
///
/// Side-effect free; unparseable names are simply not schema resources.
pub fn is_schema_resource(raw: &str) -> bool {
    let mut name = raw.trim().trim_matches('/');
    if name.is_empty() {
        return false;
    }
    name = strip_prefix_trimmed(name, URI_PREFIX);
    name = strip_prefix_trimmed(name, "v1/resources/");
    name = strip_prefix_trimmed(name, "resources/");
    name.starts_with("schema/")
}

/// Clamp a requested character budget to the safe range.
pub fn clamp_max_chars(requested: usize) -> usize {
    requested.clamp(MIN_RESOURCE_CHARS, MAX_RESOURCE_CHARS)
}

/// Keep the lines around the first few case-insensitive matches of `focus`.
///
/// Windows that overlap are merged; original line order is preserved. Returns
/// `None` when the focus is blank, nothing matches, or the result is blank.
pub fn focus_lines(content: &str, focus: &str) -> Option<String> {
    let needle = focus.trim().to_lowercase();
    if needle.is_empty() {
        return None;
    }

    let lines: Vec<&str> = content.lines().collect();
    let matches: Vec<usize> = lines
        .iter()
        .enumerate()
        .filter(|(_, line)| line.to_lowercase().contains(&needle))
        .map(|(i, _)| i)
        .take(FOCUS_MAX_MATCHES)
        .collect();
    if matches.is_empty() {
        return None;
    }

    let mut included = vec![false; lines.len()];
    let mut kept = Vec::new();
    for index in matches {
        let start = index.saturating_sub(FOCUS_BEFORE);
        let end = (index + FOCUS_AFTER).min(lines.len());
        for i in start..end {
            if !included[i] {
                included[i] = true;
                kept.push(lines[i]);
            }
        }
    }

    let focused = kept.join("\n").trim().to_string();
    (!focused.is_empty()).then_some(focused)
}

/// Truncate to `max_chars` characters, appending a visible marker.
pub fn truncate_with_marker(content: &str, max_chars: usize) -> String {
    match content.char_indices().nth(max_chars) {
        Some((cut, _)) => format!(
            "{}\n...[truncated at {} chars]",
            &content[..cut],
            max_chars
        ),
        None => content.to_string(),
    }
}

/// Apply focus filtering, then truncation to a clamped budget.
pub fn focus_and_truncate(content: &str, max_chars: usize, focus: Option<&str>) -> String {
    let focused = focus.and_then(|f| focus_lines(content, f));
    let body = focused.as_deref().unwrap_or(content);
    truncate_with_marker(body, clamp_max_chars(max_chars))
}
