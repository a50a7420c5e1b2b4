//! LLM client (4.F).
//!
//! A thin wrapper over an OpenAI-compatible chat-completions endpoint.
//! Trusts the transport-level `response_format` schema for structure;
//! everything about the content is revalidated downstream (§4.E, §9).

use serde_json::{json, Value};

use crate::error::{OrganizerError, Result};

const DEFAULT_TEMPERATURE: f64 = 0.3;

pub struct CompletionRequest<'a> {
    pub system: &'a str,
    pub user: &'a str,
    pub schema_name: &'a str,
    pub schema: Value,
    pub temperature: Option<f64>,
    pub max_tokens: u32,
}

#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub content: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub cost: f64,
    pub model: String,
}

pub struct LlmClient {
    http: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
    input_price_per_1m: f64,
    output_price_per_1m: f64,
}

impl LlmClient {
    pub fn new(
        api_base: String,
        api_key: String,
        model: String,
        input_price_per_1m: f64,
        output_price_per_1m: f64,
        timeout: std::time::Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            api_base,
            api_key,
            model,
            input_price_per_1m,
            output_price_per_1m,
        })
    }

    /// Send a single chat-completions request and return normalized usage
    /// and cost alongside the raw content string.
    pub async fn complete(&self, request: CompletionRequest<'_>) -> Result<CompletionResponse> {
        let body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": request.system},
                {"role": "user", "content": request.user},
            ],
            "max_tokens": request.max_tokens,
            "temperature": request.temperature.unwrap_or(DEFAULT_TEMPERATURE),
            "response_format": {
                "type": "json_schema",
                "json_schema": {
                    "name": request.schema_name,
                    "schema": request.schema,
                    "strict": true,
                },
            },
        });

        let response = self
            .http
            .post(format!("{}/chat/completions", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|err| OrganizerError::LlmTransient(err.to_string()))?;

        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS
            || status == reqwest::StatusCode::SERVICE_UNAVAILABLE
        {
            return Err(OrganizerError::LlmTransient(format!(
                "provider returned {status}"
            )));
        }

        if status.is_client_error() {
            return Err(OrganizerError::LlmPermanent(format!(
                "provider returned {status}"
            )));
        }

        if !status.is_success() {
            return Err(OrganizerError::LlmTransient(format!(
                "provider returned {status}"
            )));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|err| OrganizerError::LlmMalformed(err.to_string()))?;

        let choices = payload
            .get("choices")
            .and_then(Value::as_array)
            .filter(|choices| !choices.is_empty())
            .ok_or_else(|| OrganizerError::LlmMalformed("response had no choices".to_string()))?;

        let content = choices[0]
            .get("message")
            .and_then(|m| m.get("content"))
            .and_then(Value::as_str)
            .ok_or_else(|| OrganizerError::LlmMalformed("choice had no message content".to_string()))?
            .to_string();

        let usage = payload.get("usage");
        let prompt_tokens = usage
            .and_then(|u| u.get("prompt_tokens"))
            .and_then(Value::as_u64)
            .unwrap_or(0);
        let completion_tokens = usage
            .and_then(|u| u.get("completion_tokens"))
            .and_then(Value::as_u64)
            .unwrap_or(0);
        let total_tokens = usage
            .and_then(|u| u.get("total_tokens"))
            .and_then(Value::as_u64)
            .unwrap_or(prompt_tokens + completion_tokens);

        let cost = (prompt_tokens as f64 / 1_000_000.0) * self.input_price_per_1m
            + (completion_tokens as f64 / 1_000_000.0) * self.output_price_per_1m;

        let model = payload
            .get("model")
            .and_then(Value::as_str)
            .unwrap_or(&self.model)
            .to_string();

        Ok(CompletionResponse {
            content,
            prompt_tokens,
            completion_tokens,
            total_tokens,
            cost,
            model,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cost_formula_matches_contract() {
        let prompt_tokens = 2_000_000u64;
        let completion_tokens = 500_000u64;
        let input_price = 0.15;
        let output_price = 0.60;
        let cost = (prompt_tokens as f64 / 1_000_000.0) * input_price
            + (completion_tokens as f64 / 1_000_000.0) * output_price;
        assert!((cost - (0.30 + 0.30)).abs() < 1e-9);
    }
}
