//! Client for the Tonpixo resource/tool capability service.
//!
//! The service exposes a system prompt template, a tool inventory, named text
//! resources (`schema/*`, `rules/*`, `tool_description/*`), and two tools
//! (`sql_query`, `generate_chart_data`).
//!
//! ```text
//!   agent tools ──► ResourceGateway (trait)
//!                        │
//!                        ▼
//!                  GatewayClient ──► TtlCache (prompt, tools, resources, contents)
//!                        │
//!                        ├──► request(): retries, linear backoff, timeouts
//!                        └──► GatewayObserver: http / http_exception / cache_hit
//! ```
//!
//! Resource names are normalized by [`resolve_resource_name`]; focused,
//! size-bounded retrieval is layered on top via
//! [`ResourceGateway::get_resource_limited`].

pub mod api;
pub mod cache;
pub mod client;
pub mod error;
pub mod observer;
pub mod resource;
pub mod types;

pub use api::{ResourceGateway, SharedGateway};
pub use client::{
    ClientBuilder, DEFAULT_CACHE_TTL, DEFAULT_RETRY_MAX, DEFAULT_TIMEOUT, GatewayClient,
    normalize_base_url,
};
pub use error::{GatewayError, Result};
pub use observer::{GatewayEvent, GatewayObserver, SharedObserver};
pub use resource::{
    MAX_RESOURCE_CHARS, MIN_RESOURCE_CHARS, SYSTEM_PROMPT_RESOURCE, focus_and_truncate,
    is_schema_resource, resolve_resource_name, resource_path,
};
pub use types::{ChartRequest, ChartType};
