//! HTTP client for the capability service.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Method;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde_json::Value;

use crate::api::ResourceGateway;
use crate::cache::TtlCache;
use crate::error::{GatewayError, Result};
use crate::observer::{GatewayEvent, SharedObserver, notify};
use crate::resource::{SYSTEM_PROMPT_RESOURCE, resolve_resource_name, resource_path};
use crate::types::{ChartRequest, SqlQueryRequest};

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(20_000);

/// Default number of retries after the first attempt.
pub const DEFAULT_RETRY_MAX: u32 = 2;

/// Default cache TTL.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(900);

/// Base delay for linear backoff: attempt `n` (0-based) sleeps `base * (n + 1)`.
const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(250);

/// Upstream bodies are logged at debug level, capped to this many characters.
const LOGGED_BODY_CHARS: usize = 2000;

const TOOLS_CACHE_KEY: &str = "tools";
const RESOURCES_CACHE_KEY: &str = "resources";

/// Client for the resource/tool capability service.
///
/// Cloning is cheap; clones share the HTTP connection pool and all caches.
/// [`GatewayClient::observed`] produces a clone that reports to a different
/// observer, which is how a single invocation captures its own telemetry.
///
/// # Example
///
/// ```no_run
/// use tonpixo_gateway::{GatewayClient, ResourceGateway};
///
/// # async fn example() -> tonpixo_gateway::Result<()> {
/// let client = GatewayClient::builder()
///     .base_url("mcp.example.com")
///     .bearer_token("secret")
///     .build()?;
///
/// let schema = client.get_resource("schema/transactions", None).await?;
/// println!("{schema}");
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct GatewayClient {
    inner: Arc<ClientInner>,
    observer: Option<SharedObserver>,
}

struct ClientInner {
    http: reqwest::Client,
    base_url: String,
    timeout: Duration,
    retry_max: u32,
    retry_backoff: Duration,
    cache_ttl: Duration,
    prompt: TtlCache<String>,
    tools: TtlCache<Vec<String>>,
    resources: TtlCache<Vec<String>>,
    contents: TtlCache<String>,
    last_upstream_error: Mutex<Option<String>>,
}

/// Normalize a configured base URL: default to https and drop trailing slashes.
pub fn normalize_base_url(value: &str) -> String {
    let value = value.trim();
    if value.is_empty() {
        return String::new();
    }
    let with_scheme = if value.starts_with("http://") || value.starts_with("https://") {
        value.to_string()
    } else {
        format!("https://{}", value)
    };
    with_scheme.trim_end_matches('/').to_string()
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn truncate_for_log(body: &str) -> &str {
    match body.char_indices().nth(LOGGED_BODY_CHARS) {
        Some((cut, _)) => &body[..cut],
        None => body,
    }
}

impl GatewayClient {
    /// Create a new client builder.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// The normalized base URL (empty when unconfigured).
    pub fn base_url(&self) -> &str {
        &self.inner.base_url
    }

    /// A clone sharing caches and connections but reporting to `observer`.
    pub fn observed(&self, observer: SharedObserver) -> Self {
        Self {
            inner: self.inner.clone(),
            observer: Some(observer),
        }
    }

    /// Details of the most recent failed upstream response, for debugging.
    pub fn last_upstream_error(&self) -> Option<String> {
        self.inner.last_upstream_error.lock().clone()
    }

    /// Build the full URL, collapsing a doubled `/v1` segment.
    pub(crate) fn url(&self, path: &str) -> Result<String> {
        let base = &self.inner.base_url;
        if base.is_empty() {
            return Err(GatewayError::NotConfigured);
        }
        if base.ends_with("/v1") && path.starts_with("/v1/") {
            Ok(format!("{}{}", base, &path[3..]))
        } else {
            Ok(format!("{}{}", base, path))
        }
    }

    fn ttl(&self, ttl: Option<Duration>) -> Duration {
        ttl.unwrap_or(self.inner.cache_ttl)
    }

    fn observe(&self, event: GatewayEvent) {
        notify(self.observer.as_ref(), event);
    }

    fn cache_hit(&self, resource: &str, ttl: Duration) {
        self.observe(GatewayEvent::CacheHit {
            resource: resource.to_string(),
            ttl_seconds: ttl.as_secs(),
        });
    }

    fn record_upstream_error(&self, detail: String) {
        *self.inner.last_upstream_error.lock() = Some(detail);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Request primitive
    // ─────────────────────────────────────────────────────────────────────────

    /// Issue a request with retries and return the JSON body.
    ///
    /// 5xx responses are retried with linear backoff while attempts remain;
    /// any other failure (status, non-JSON body, transport) also consumes an
    /// attempt. Every attempt is observed.
    async fn request(&self, method: Method, path: &str, payload: Option<&Value>) -> Result<Value> {
        let url = self.url(path)?;
        let payload_keys: Vec<String> = match payload {
            Some(Value::Object(map)) => {
                let mut keys: Vec<String> = map.keys().cloned().collect();
                keys.sort();
                keys
            }
            _ => Vec::new(),
        };
        let retry_max = self.inner.retry_max;
        let max_attempts = retry_max + 1;
        let method_name = method.as_str().to_uppercase();
        let mut last_error = None;

        for attempt in 0..max_attempts {
            let started = Instant::now();
            let mut builder = self
                .inner
                .http
                .request(method.clone(), &url)
                .timeout(self.inner.timeout);
            if let Some(body) = payload {
                builder = builder.json(body);
            }

            let outcome = match builder.send().await {
                Ok(response) => {
                    let status = response.status();
                    let body = response.text().await;
                    self.observe(GatewayEvent::Http {
                        method: method_name.clone(),
                        path: path.to_string(),
                        status_code: status.as_u16(),
                        ok: status.is_success(),
                        attempt: attempt + 1,
                        max_attempts,
                        duration_ms: started.elapsed().as_millis() as u64,
                        payload_keys: payload_keys.clone(),
                    });

                    match body {
                        Ok(body) if status.is_server_error() && attempt < retry_max => {
                            self.record_upstream_error(format!(
                                "path={} status={} body={}",
                                path,
                                status.as_u16(),
                                truncate_for_log(&body)
                            ));
                            tracing::warn!(
                                status = status.as_u16(),
                                path,
                                attempt = attempt + 1,
                                max_attempts,
                                "Transient upstream error, retrying"
                            );
                            tracing::debug!(path, body = truncate_for_log(&body), "Upstream body");
                            self.backoff(attempt).await;
                            continue;
                        }
                        Ok(body) => self.interpret(status.as_u16(), status.is_success(), &body, path),
                        Err(source) => Err(GatewayError::Exhausted {
                            path: path.to_string(),
                            source,
                        }),
                    }
                }
                Err(source) => Err(GatewayError::Exhausted {
                    path: path.to_string(),
                    source,
                }),
            };

            match outcome {
                Ok(value) => return Ok(value),
                Err(e) => {
                    self.observe(GatewayEvent::HttpException {
                        method: method_name.clone(),
                        path: path.to_string(),
                        attempt: attempt + 1,
                        max_attempts,
                        payload_keys: payload_keys.clone(),
                        error_type: e.kind().to_string(),
                    });
                    tracing::warn!(
                        path,
                        attempt = attempt + 1,
                        max_attempts,
                        error_type = e.kind(),
                        "Gateway request attempt failed"
                    );
                    last_error = Some(e);
                    if attempt < retry_max {
                        self.backoff(attempt).await;
                    }
                }
            }
        }

        let error = last_error.unwrap_or(GatewayError::NotConfigured);
        tracing::error!(path, error_type = error.kind(), "Gateway request exhausted retries");
        Err(error)
    }

    fn interpret(&self, status: u16, ok: bool, body: &str, path: &str) -> Result<Value> {
        if !ok {
            self.record_upstream_error(format!(
                "path={} status={} body={}",
                path,
                status,
                truncate_for_log(body)
            ));
            tracing::debug!(path, status, body = truncate_for_log(body), "Upstream error body");
            return Err(GatewayError::Api {
                status,
                path: path.to_string(),
            });
        }

        serde_json::from_str(body).map_err(|_| {
            self.record_upstream_error(format!(
                "path={} status={} non_json_body={}",
                path,
                status,
                truncate_for_log(body)
            ));
            tracing::debug!(path, status, body = truncate_for_log(body), "Non-JSON upstream body");
            GatewayError::NonJson {
                status,
                path: path.to_string(),
            }
        })
    }

    async fn backoff(&self, attempt: u32) {
        tokio::time::sleep(self.inner.retry_backoff * (attempt + 1)).await;
    }

    fn string_list(body: &Value, field: &str, what: &str) -> Result<Vec<String>> {
        match body.get(field) {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::Array(items)) => Ok(items
                .iter()
                .map(|v| stringify(v).trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()),
            Some(_) => Err(GatewayError::invalid_response(format!(
                "MCP {} list response is invalid.",
                what
            ))),
        }
    }

    fn result_field(body: &Value, tool: &str) -> Result<String> {
        body.get("result")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                GatewayError::invalid_response(format!("MCP {} response is invalid.", tool))
            })
    }

    fn content_field(body: &Value) -> Option<String> {
        body.get("content")
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .map(str::to_string)
    }
}

#[async_trait]
impl ResourceGateway for GatewayClient {
    async fn system_prompt_template(&self, ttl: Option<Duration>) -> Result<String> {
        let ttl = self.ttl(ttl);
        if let Some(hit) = self.inner.prompt.get(SYSTEM_PROMPT_RESOURCE, ttl) {
            self.cache_hit(SYSTEM_PROMPT_RESOURCE, ttl);
            return Ok(hit);
        }

        let path = resource_path(SYSTEM_PROMPT_RESOURCE)?;
        let body = self.request(Method::GET, &path, None).await?;
        let content = Self::content_field(&body).ok_or(GatewayError::EmptySystemPrompt)?;
        self.inner.prompt.insert(SYSTEM_PROMPT_RESOURCE, content.clone());
        Ok(content)
    }

    async fn list_tools(&self, ttl: Option<Duration>) -> Result<Vec<String>> {
        let ttl = self.ttl(ttl);
        if let Some(hit) = self.inner.tools.get(TOOLS_CACHE_KEY, ttl) {
            self.cache_hit(TOOLS_CACHE_KEY, ttl);
            return Ok(hit);
        }

        let body = self.request(Method::GET, "/v1/tools", None).await?;
        let tools = Self::string_list(&body, "tools", "tools")?;
        self.inner.tools.insert(TOOLS_CACHE_KEY, tools.clone());
        Ok(tools)
    }

    async fn list_resources(&self, ttl: Option<Duration>) -> Result<Vec<String>> {
        let ttl = self.ttl(ttl);
        if let Some(hit) = self.inner.resources.get(RESOURCES_CACHE_KEY, ttl) {
            self.cache_hit(RESOURCES_CACHE_KEY, ttl);
            return Ok(hit);
        }

        let body = self.request(Method::GET, "/v1/resources", None).await?;
        let resources = Self::string_list(&body, "resources", "resources")?;
        self.inner
            .resources
            .insert(RESOURCES_CACHE_KEY, resources.clone());
        Ok(resources)
    }

    async fn get_resource(&self, name: &str, ttl: Option<Duration>) -> Result<String> {
        let ttl = self.ttl(ttl);
        let resolved = resolve_resource_name(name)?;
        if let Some(hit) = self.inner.contents.get(&resolved, ttl) {
            self.cache_hit(&resolved, ttl);
            return Ok(hit);
        }

        let path = resource_path(&resolved)?;
        let body = self.request(Method::GET, &path, None).await?;
        let content = Self::content_field(&body)
            .ok_or_else(|| GatewayError::EmptyResource(resolved.clone()))?;
        self.inner.contents.insert(resolved, content.clone());
        Ok(content)
    }

    async fn sql_query(&self, query: &str, job_id: &str) -> Result<String> {
        let payload = serde_json::to_value(SqlQueryRequest { query, job_id })
            .map_err(|e| GatewayError::invalid_response(e.to_string()))?;
        let body = self
            .request(Method::POST, "/v1/tools/sql_query", Some(&payload))
            .await?;
        Self::result_field(&body, "sql_query")
    }

    async fn generate_chart(&self, request: &ChartRequest) -> Result<String> {
        let payload = serde_json::to_value(request)
            .map_err(|e| GatewayError::invalid_response(e.to_string()))?;
        let body = self
            .request(Method::POST, "/v1/tools/generate_chart_data", Some(&payload))
            .await?;
        Self::result_field(&body, "generate_chart_data")
    }

    fn with_observer(&self, observer: SharedObserver) -> Arc<dyn ResourceGateway> {
        Arc::new(self.observed(observer))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Builder
// ─────────────────────────────────────────────────────────────────────────────

/// Builder for creating a [`GatewayClient`].
pub struct ClientBuilder {
    base_url: String,
    bearer_token: Option<String>,
    timeout: Duration,
    retry_max: u32,
    retry_backoff: Duration,
    cache_ttl: Duration,
    observer: Option<SharedObserver>,
    user_agent: Option<String>,
}

impl ClientBuilder {
    /// Create a new builder with defaults.
    pub fn new() -> Self {
        Self {
            base_url: String::new(),
            bearer_token: None,
            timeout: DEFAULT_TIMEOUT,
            retry_max: DEFAULT_RETRY_MAX,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            cache_ttl: DEFAULT_CACHE_TTL,
            observer: None,
            user_agent: None,
        }
    }

    /// Set the service base URL. A missing scheme defaults to https.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Set the bearer token. Blank tokens are ignored.
    pub fn bearer_token(mut self, token: impl Into<String>) -> Self {
        let token = token.into();
        self.bearer_token = (!token.trim().is_empty()).then_some(token);
        self
    }

    /// Set the per-request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the number of retries after the first attempt.
    pub fn retry_max(mut self, retry_max: u32) -> Self {
        self.retry_max = retry_max;
        self
    }

    /// Set the base delay for linear retry backoff.
    pub fn retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Set the default cache TTL. Zero disables caching.
    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Set a default observer.
    pub fn observer(mut self, observer: SharedObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Set a custom user agent.
    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    /// Build the client.
    ///
    /// An empty base URL is accepted here; requests then fail with
    /// [`GatewayError::NotConfigured`].
    pub fn build(self) -> Result<GatewayClient> {
        let base_url = normalize_base_url(&self.base_url);
        if !base_url.is_empty() {
            url::Url::parse(&base_url)?;
        }

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(token) = &self.bearer_token {
            let value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|_| GatewayError::Config("Invalid bearer token".to_string()))?;
            headers.insert(AUTHORIZATION, value);
        }

        let user_agent = self
            .user_agent
            .unwrap_or_else(|| format!("tonpixo-gateway/{}", env!("CARGO_PKG_VERSION")));

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent(user_agent)
            .build()?;

        Ok(GatewayClient {
            inner: Arc::new(ClientInner {
                http,
                base_url,
                timeout: self.timeout,
                retry_max: self.retry_max,
                retry_backoff: self.retry_backoff,
                cache_ttl: self.cache_ttl,
                prompt: TtlCache::new(),
                tools: TtlCache::new(),
                resources: TtlCache::new(),
                contents: TtlCache::new(),
                last_upstream_error: Mutex::new(None),
            }),
            observer: self.observer,
        })
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
