// Metrics backend client (Prometheus instant-query HTTP API).
// "No data" and "zero" are deliberately indistinguishable here: an absent or empty result is 0.0.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, instrument};

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("{0}")]
    BackendUnavailable(String),
    #[error("{0}")]
    MalformedResponse(String),
}

/// Translates a backend query expression into a single number.
#[async_trait]
pub trait MetricsSource: Send + Sync {
    async fn query(&self, expr: &str) -> Result<f64, MetricsError>;
}

/// The two error-rate signals every collect run needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalQueries {
    pub errors_last_hour: String,
    pub errors_last_3_days: String,
}

impl Default for SignalQueries {
    fn default() -> Self {
        Self {
            errors_last_hour: "rate(log_errors[1h])".to_string(),
            errors_last_3_days: "rate(log_errors[3d])".to_string(),
        }
    }
}

/// Prometheus HTTP client. Timeouts are enforced by the underlying reqwest client.
pub struct PrometheusSource {
    client: reqwest::Client,
    base_url: String,
}

impl PrometheusSource {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl MetricsSource for PrometheusSource {
    #[instrument(skip(self), fields(source = "prometheus", operation = "query"))]
    async fn query(&self, expr: &str) -> Result<f64, MetricsError> {
        let url = format!("{}/api/v1/query", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("query", expr)])
            .send()
            .await
            .map_err(|e| MetricsError::BackendUnavailable(format!("GET {}: {}", url, e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| MetricsError::BackendUnavailable(format!("reading body: {}", e)))?;

        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(MetricsError::BackendUnavailable(format!(
                "backend returned {}",
                status
            )));
        }
        if !status.is_success() {
            return Err(MetricsError::MalformedResponse(format!(
                "backend rejected query with {}: {}",
                status,
                body.chars().take(200).collect::<String>()
            )));
        }

        let value = parse_query_response(&body)?;
        debug!(value, "query result");
        Ok(value)
    }
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    data: Option<QueryData>,
}

#[derive(Debug, Deserialize)]
struct QueryData {
    #[serde(default, rename = "resultType")]
    result_type: Option<String>,
    #[serde(default)]
    result: Option<Value>,
}

/// Extracts the first numeric value of an instant-query response body.
///
/// Missing `data`, missing `result`, an empty vector, or a first series without `value`
/// all yield 0.0. A present value of the wrong shape is `MalformedResponse`.
pub fn parse_query_response(body: &str) -> Result<f64, MetricsError> {
    let response: QueryResponse = serde_json::from_str(body)
        .map_err(|e| MetricsError::MalformedResponse(format!("invalid JSON: {}", e)))?;

    if response.status.as_deref() == Some("error") {
        return Err(MetricsError::MalformedResponse(format!(
            "query failed: {}",
            response.error.unwrap_or_default()
        )));
    }

    let Some(data) = response.data else {
        return Ok(0.0);
    };
    let result = match data.result {
        None | Some(Value::Null) => return Ok(0.0),
        Some(r) => r,
    };

    match data.result_type.as_deref() {
        Some("scalar") | Some("string") => sample_value(&result),
        _ => match result {
            Value::Array(series) => match series.first() {
                None => Ok(0.0),
                Some(Value::Object(first)) => match first.get("value") {
                    None | Some(Value::Null) => Ok(0.0),
                    Some(pair) => sample_value(pair),
                },
                Some(other) => Err(MetricsError::MalformedResponse(format!(
                    "unexpected series entry: {}",
                    other
                ))),
            },
            other => Err(MetricsError::MalformedResponse(format!(
                "unexpected result shape: {}",
                other
            ))),
        },
    }
}

/// `[<unix ts>, "<number>"]` -> number.
fn sample_value(pair: &Value) -> Result<f64, MetricsError> {
    let raw = pair
        .as_array()
        .filter(|p| p.len() == 2)
        .and_then(|p| p[1].as_str())
        .ok_or_else(|| MetricsError::MalformedResponse(format!("unexpected sample: {}", pair)))?;
    let value: f64 = raw
        .parse()
        .map_err(|_| MetricsError::MalformedResponse(format!("not a number: {:?}", raw)))?;
    if !value.is_finite() {
        return Err(MetricsError::MalformedResponse(format!(
            "non-finite value: {}",
            raw
        )));
    }
    Ok(value)
}
