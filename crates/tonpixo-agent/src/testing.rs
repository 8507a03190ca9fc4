//! In-memory gateway and backend doubles for unit tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tonpixo_gateway::{
    ChartRequest, GatewayError, GatewayEvent, ResourceGateway, Result, SharedObserver,
    resolve_resource_name,
};
use tonpixo_llm::{
    BlockStart, CompletionRequest, CompletionResponse, ContentDelta, LlmBackend, LlmError,
    ResponseStream, StreamEvent,
};

#[derive(Default)]
struct FakeState {
    system_prompt: Option<String>,
    resources: BTreeMap<String, String>,
    service_tools: Option<Vec<String>>,
    sql_result: Option<String>,
    chart_result: Option<String>,
    failing_listing: bool,
    calls: Mutex<HashMap<&'static str, usize>>,
    sql_queries: Mutex<Vec<(String, String)>>,
    chart_requests: Mutex<Vec<ChartRequest>>,
}

/// A [`ResourceGateway`] answering from fixed data.
///
/// Every call reports a synthetic `http` event to the attached observer.
#[derive(Clone, Default)]
pub struct FakeGateway {
    state: Arc<FakeState>,
    observer: Option<SharedObserver>,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self::default()
    }

    fn state_mut(&mut self) -> &mut FakeState {
        Arc::get_mut(&mut self.state).expect("configure FakeGateway before sharing it")
    }

    pub fn with_system_prompt(mut self, template: &str) -> Self {
        self.state_mut().system_prompt = Some(template.to_string());
        self
    }

    pub fn with_resource(mut self, name: &str, content: &str) -> Self {
        self.state_mut()
            .resources
            .insert(name.to_string(), content.to_string());
        self
    }

    pub fn with_service_tools(mut self, tools: &[&str]) -> Self {
        self.state_mut().service_tools = Some(tools.iter().map(|t| t.to_string()).collect());
        self
    }

    pub fn with_sql_result(mut self, result: &str) -> Self {
        self.state_mut().sql_result = Some(result.to_string());
        self
    }

    pub fn with_chart_result(mut self, result: &str) -> Self {
        self.state_mut().chart_result = Some(result.to_string());
        self
    }

    pub fn failing_listing(mut self) -> Self {
        self.state_mut().failing_listing = true;
        self
    }

    pub fn calls(&self, op: &str) -> usize {
        self.state.calls.lock().get(op).copied().unwrap_or(0)
    }

    pub fn sql_queries(&self) -> Vec<(String, String)> {
        self.state.sql_queries.lock().clone()
    }

    pub fn chart_requests(&self) -> Vec<ChartRequest> {
        self.state.chart_requests.lock().clone()
    }

    fn record(&self, op: &'static str, method: &str, path: &str, status_code: u16) {
        *self.state.calls.lock().entry(op).or_default() += 1;
        if let Some(observer) = &self.observer {
            observer.observe(&GatewayEvent::Http {
                method: method.to_string(),
                path: path.to_string(),
                status_code,
                ok: status_code < 400,
                attempt: 1,
                max_attempts: 1,
                duration_ms: 1,
                payload_keys: Vec::new(),
            });
        }
    }

    fn not_found(path: &str) -> GatewayError {
        GatewayError::Api {
            status: 404,
            path: path.to_string(),
        }
    }
}

#[async_trait]
impl ResourceGateway for FakeGateway {
    async fn system_prompt_template(&self, _ttl: Option<Duration>) -> Result<String> {
        let path = "/v1/resources/tonpixo_system_prompt";
        match &self.state.system_prompt {
            Some(template) => {
                self.record("system_prompt", "GET", path, 200);
                Ok(template.clone())
            }
            None => {
                self.record("system_prompt", "GET", path, 404);
                Err(Self::not_found(path))
            }
        }
    }

    async fn list_tools(&self, _ttl: Option<Duration>) -> Result<Vec<String>> {
        self.record("list_tools", "GET", "/v1/tools", 200);
        Ok(self.state.service_tools.clone().unwrap_or_else(|| {
            vec!["sql_query".to_string(), "generate_chart_data".to_string()]
        }))
    }

    async fn list_resources(&self, _ttl: Option<Duration>) -> Result<Vec<String>> {
        if self.state.failing_listing {
            self.record("list_resources", "GET", "/v1/resources", 503);
            return Err(GatewayError::Api {
                status: 503,
                path: "/v1/resources".to_string(),
            });
        }
        self.record("list_resources", "GET", "/v1/resources", 200);
        Ok(self.state.resources.keys().cloned().collect())
    }

    async fn get_resource(&self, name: &str, _ttl: Option<Duration>) -> Result<String> {
        let resolved = resolve_resource_name(name)?;
        let path = format!("/v1/resources/{}", resolved);
        match self.state.resources.get(&resolved) {
            Some(content) => {
                self.record("get_resource", "GET", &path, 200);
                Ok(content.clone())
            }
            None => {
                self.record("get_resource", "GET", &path, 404);
                Err(Self::not_found(&path))
            }
        }
    }

    async fn sql_query(&self, query: &str, job_id: &str) -> Result<String> {
        let path = "/v1/tools/sql_query";
        self.state
            .sql_queries
            .lock()
            .push((query.to_string(), job_id.to_string()));
        match &self.state.sql_result {
            Some(result) => {
                self.record("sql_query", "POST", path, 200);
                Ok(result.clone())
            }
            None => {
                self.record("sql_query", "POST", path, 500);
                Err(GatewayError::Api {
                    status: 500,
                    path: path.to_string(),
                })
            }
        }
    }

    async fn generate_chart(&self, request: &ChartRequest) -> Result<String> {
        let path = "/v1/tools/generate_chart_data";
        self.state.chart_requests.lock().push(request.clone());
        match &self.state.chart_result {
            Some(result) => {
                self.record("generate_chart", "POST", path, 200);
                Ok(result.clone())
            }
            None => {
                self.record("generate_chart", "POST", path, 500);
                Err(GatewayError::Api {
                    status: 500,
                    path: path.to_string(),
                })
            }
        }
    }

    fn with_observer(&self, observer: SharedObserver) -> Arc<dyn ResourceGateway> {
        Arc::new(Self {
            state: self.state.clone(),
            observer: Some(observer),
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Cut-off backend
// ─────────────────────────────────────────────────────────────────────────────

/// Streams part of a text answer, then ends without `MessageStop` as a
/// dropped connection would.
pub struct CutOffBackend {
    partial: String,
}

impl CutOffBackend {
    pub fn new(partial: &str) -> Self {
        Self {
            partial: partial.to_string(),
        }
    }
}

#[async_trait]
impl LlmBackend for CutOffBackend {
    async fn complete(&self, _request: CompletionRequest) -> tonpixo_llm::Result<CompletionResponse> {
        Err(LlmError::Backend("streaming only".to_string()))
    }

    async fn complete_stream(&self, _request: CompletionRequest) -> tonpixo_llm::Result<ResponseStream> {
        let events = vec![
            Ok(StreamEvent::MessageStart {
                id: "msg_cut".to_string(),
                model: "test-model".to_string(),
            }),
            Ok(StreamEvent::ContentBlockStart {
                index: 0,
                block: BlockStart::Text,
            }),
            Ok(StreamEvent::ContentBlockDelta {
                index: 0,
                delta: ContentDelta::TextDelta(self.partial.clone()),
            }),
        ];
        Ok(Box::pin(futures::stream::iter(events)))
    }

    fn name(&self) -> &str {
        "cut-off"
    }
}
