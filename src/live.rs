//! Live handlers that reach the real network when no mock matches.
//!
//! Only compiled with the `live-io` feature, and only consulted when live fallback
//! is enabled on the engine.

use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::Method;
use serde_json::{json, Value};
use tracing::debug;

use crate::core::mocks::{LiveLlm, LiveWeb, WebRequest, WebResponse};
use crate::error::{Result, SimError};

fn live_err(err: impl std::fmt::Display) -> SimError {
    SimError::Live(err.to_string())
}

/// Plain HTTP client.
#[derive(Debug, Clone, Default)]
pub struct HttpWeb {
    client: Client,
}

impl HttpWeb {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LiveWeb for HttpWeb {
    fn fetch(&self, request: &WebRequest, timeout: Duration) -> Result<WebResponse> {
        let method = Method::from_bytes(request.method.as_bytes()).map_err(live_err)?;
        let mut builder = self.client.request(method, &request.url).timeout(timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }
        let response = builder.send().map_err(live_err)?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
            .collect();
        let body = response.text().map_err(live_err)?;
        debug!(url = %request.url, status, "live web response");
        Ok(WebResponse { status, headers, body })
    }
}

/// OpenAI-compatible chat completions endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiLlm {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl OpenAiLlm {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }
}

impl LiveLlm for OpenAiLlm {
    fn prompt(&self, prompt: &str, timeout: Duration) -> Result<Value> {
        let payload = json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt}],
        });
        let response: Value = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .timeout(timeout)
            .json(&payload)
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(live_err)?
            .json()
            .map_err(live_err)?;
        response
            .pointer("/choices/0/message/content")
            .cloned()
            .ok_or_else(|| SimError::Live("response has no message content".to_string()))
    }
}
