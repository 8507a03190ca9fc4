//! Chart payload generation.

use async_trait::async_trait;
use serde_json::{Value, json};
use tonpixo_gateway::{ChartRequest, ChartType, SharedGateway};

use crate::error::Result;
use crate::tool::{ParamExt, ParamResult, ParameterValidationError, Tool, ToolContext, ToolResult};

pub(super) const NAME: &str = "generate_chart_data";

/// Produces chart JSON for the client to render.
pub struct ChartTool {
    gateway: SharedGateway,
}

impl ChartTool {
    pub fn new(gateway: SharedGateway) -> Self {
        Self { gateway }
    }
}

fn parse_request(params: &Value) -> ParamResult<ChartRequest> {
    let title = params.required_str("title", "provide a chart title")?;

    let chart_type = params
        .required_str("type", "one of bar, line, area, pie")?
        .parse::<ChartType>()
        .map_err(|msg| ParameterValidationError::invalid_value("type", msg))?;

    let data = params
        .required_array("data", "provide the rows to plot as a list of objects")?
        .iter()
        .map(|row| match row {
            Value::Object(map) => Ok(map.clone()),
            other => Err(ParameterValidationError::invalid_type("data", "list of objects", other)),
        })
        .collect::<ParamResult<Vec<_>>>()?;

    let x_axis_key = params.required_str("xAxisKey", "name the field used for the x axis")?;

    let data_keys = params
        .required_array("dataKeys", "list the fields to plot")?
        .iter()
        .map(|key| {
            key.as_str()
                .map(String::from)
                .ok_or_else(|| ParameterValidationError::invalid_type("dataKeys", "list of strings", key))
        })
        .collect::<ParamResult<Vec<_>>>()?;

    Ok(ChartRequest {
        title: title.to_string(),
        chart_type,
        data,
        x_axis_key: x_axis_key.to_string(),
        data_keys,
    })
}

#[async_trait]
impl Tool for ChartTool {
    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> &str {
        "Generate chart payload JSON via remote MCP tool server."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "title": {"type": "string"},
                "type": {"type": "string", "enum": ["bar", "line", "area", "pie"]},
                "data": {"type": "array", "items": {"type": "object"}},
                "xAxisKey": {"type": "string"},
                "dataKeys": {"type": "array", "items": {"type": "string"}}
            },
            "required": ["title", "type", "data", "xAxisKey", "dataKeys"]
        })
    }

    async fn execute(&self, params: Value, _ctx: &ToolContext) -> Result<ToolResult> {
        let request = match parse_request(&params) {
            Ok(request) => request,
            Err(e) => return Ok(ToolResult::text(format!("Error generating chart via MCP: {}", e))),
        };

        match self.gateway.generate_chart(&request).await {
            Ok(payload) => Ok(ToolResult::text(payload)),
            Err(e) => {
                tracing::warn!(error = %e, "Chart generation failed");
                Ok(ToolResult::text(format!("Error generating chart via MCP: {}", e)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeGateway;
    use std::sync::Arc;

    fn valid_params() -> Value {
        json!({
            "title": "Monthly volume",
            "type": "bar",
            "data": [{"month": "2025-01", "ton": 12.5}],
            "xAxisKey": "month",
            "dataKeys": ["ton"]
        })
    }

    #[tokio::test]
    async fn test_passes_request_through() {
        let gateway = Arc::new(FakeGateway::new().with_chart_result(r#"{"type":"bar"}"#));
        let tool = ChartTool::new(gateway.clone());

        let result = tool.execute(valid_params(), &ToolContext::new("J1")).await.unwrap();
        assert_eq!(result.to_llm_content(), r#"{"type":"bar"}"#);

        let sent = gateway.chart_requests();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].chart_type, ChartType::Bar);
        assert_eq!(sent[0].x_axis_key, "month");
        assert_eq!(sent[0].data_keys, vec!["ton"]);
    }

    #[tokio::test]
    async fn test_invalid_type_reported_with_prefix() {
        let tool = ChartTool::new(Arc::new(FakeGateway::new()));
        let mut params = valid_params();
        params["type"] = json!("scatter");

        let result = tool.execute(params, &ToolContext::new("J1")).await.unwrap();
        let text = result.to_llm_content();
        assert!(text.starts_with("Error generating chart via MCP: "));
        assert!(text.contains("scatter"));
    }

    #[tokio::test]
    async fn test_non_object_rows_rejected() {
        let tool = ChartTool::new(Arc::new(FakeGateway::new()));
        let mut params = valid_params();
        params["data"] = json!([1, 2]);

        let text = tool
            .execute(params, &ToolContext::new("J1"))
            .await
            .unwrap()
            .to_llm_content();
        assert!(text.contains("list of objects"));
    }

    #[tokio::test]
    async fn test_gateway_error_reported_with_prefix() {
        let tool = ChartTool::new(Arc::new(FakeGateway::new()));
        let text = tool
            .execute(valid_params(), &ToolContext::new("J1"))
            .await
            .unwrap()
            .to_llm_content();
        assert!(text.starts_with("Error generating chart via MCP: "));
    }
}
