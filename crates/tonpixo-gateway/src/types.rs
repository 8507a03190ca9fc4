//! Request and response bodies for the capability service.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Chart kinds the chart tool can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartType {
    Bar,
    Line,
    Area,
    Pie,
}

impl ChartType {
    pub const ALL: [ChartType; 4] = [ChartType::Bar, ChartType::Line, ChartType::Area, ChartType::Pie];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChartType::Bar => "bar",
            ChartType::Line => "line",
            ChartType::Area => "area",
            ChartType::Pie => "pie",
        }
    }
}

impl fmt::Display for ChartType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChartType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ChartType::ALL
            .into_iter()
            .find(|t| t.as_str() == s.trim())
            .ok_or_else(|| format!("type must be one of bar, line, area, pie (got '{}')", s))
    }
}

/// Body of `POST /v1/tools/sql_query`.
#[derive(Debug, Clone, Serialize)]
pub struct SqlQueryRequest<'a> {
    pub query: &'a str,
    pub job_id: &'a str,
}

/// Body of `POST /v1/tools/generate_chart_data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartRequest {
    pub title: String,
    #[serde(rename = "type")]
    pub chart_type: ChartType,
    pub data: Vec<serde_json::Map<String, serde_json::Value>>,
    #[serde(rename = "xAxisKey")]
    pub x_axis_key: String,
    #[serde(rename = "dataKeys")]
    pub data_keys: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chart_type_parse() {
        assert_eq!("pie".parse::<ChartType>().unwrap(), ChartType::Pie);
        assert_eq!(" line ".parse::<ChartType>().unwrap(), ChartType::Line);
        assert!("scatter".parse::<ChartType>().is_err());
    }

    #[test]
    fn test_chart_request_wire_names() {
        let request = ChartRequest {
            title: "Volume".into(),
            chart_type: ChartType::Bar,
            data: vec![],
            x_axis_key: "day".into(),
            data_keys: vec!["ton".into()],
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["type"], "bar");
        assert_eq!(json["xAxisKey"], "day");
        assert_eq!(json["dataKeys"][0], "ton");
    }
}
