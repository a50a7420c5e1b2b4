//! Process configuration, loaded once from the environment at startup.
//!
//! Follows the same layered-default / clamped-range idiom this codebase
//! already uses for runtime flags: every knob has a sane default, env vars
//! override it, and numeric knobs are clamped to a safe range rather than
//! rejected outright.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    /// Upper bound on input+output tokens per LLM request (§6).
    pub max_tokens: u32,
    /// Fraction of `max_tokens` reserved for the prompt (§6).
    pub token_budget_percentage: f64,
    /// Model identifier passed through to the LLM provider.
    pub model_name: String,
    /// Per-item processing retries before an item is marked `error` (§4.J).
    pub max_retries_per_item: u32,
    /// Callback delivery retries before a batch force-completes (§4.J).
    pub max_callback_retries: u32,
    /// Scheduler re-entry delay.
    pub alarm_interval: Duration,

    /// Base URL of the OpenAI-compatible chat-completions endpoint.
    pub llm_api_base: String,
    /// Bearer token for the LLM provider.
    pub llm_api_key: String,
    /// USD per 1M prompt tokens, for cost accounting (4.F).
    pub llm_input_price_per_1m: f64,
    /// USD per 1M completion tokens, for cost accounting (4.F).
    pub llm_output_price_per_1m: f64,
    /// Per-request timeout for the LLM provider.
    pub llm_request_timeout: Duration,

    /// Base URL of the entity store.
    pub entity_store_base: String,
    /// Per-request timeout for the entity store.
    pub entity_store_request_timeout: Duration,

    /// Base URL of the upstream orchestrator that receives callbacks.
    pub orchestrator_callback_base: String,

    /// Path to the SQLite database file backing `BatchState`/`ItemState`.
    pub database_path: String,

    /// Address the HTTP surface (§6) binds to.
    pub http_bind_addr: String,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            max_tokens: env_u32("MAX_TOKENS", 128_000, 1_000, 2_000_000),
            token_budget_percentage: env_f64("TOKEN_BUDGET_PERCENTAGE", 0.7, 0.01, 1.0),
            model_name: env_string("MODEL_NAME", "gpt-4o-mini"),
            max_retries_per_item: env_u32("MAX_RETRIES_PER_ITEM", 3, 0, 20),
            max_callback_retries: env_u32("MAX_CALLBACK_RETRIES", 3, 0, 20),
            alarm_interval: Duration::from_millis(u64::from(env_u32(
                "ALARM_INTERVAL_MS",
                100,
                10,
                60_000,
            ))),

            llm_api_base: env_string("LLM_API_BASE", "https://api.openai.com/v1"),
            llm_api_key: std::env::var("LLM_API_KEY").unwrap_or_default(),
            llm_input_price_per_1m: env_f64("LLM_INPUT_PRICE_PER_1M", 0.15, 0.0, 1_000.0),
            llm_output_price_per_1m: env_f64("LLM_OUTPUT_PRICE_PER_1M", 0.60, 0.0, 1_000.0),
            llm_request_timeout: Duration::from_secs(u64::from(env_u32(
                "LLM_REQUEST_TIMEOUT_SECS",
                60,
                1,
                600,
            ))),

            entity_store_base: env_string("ENTITY_STORE_BASE", "http://localhost:8081"),
            entity_store_request_timeout: Duration::from_secs(u64::from(env_u32(
                "ENTITY_STORE_TIMEOUT_SECS",
                30,
                1,
                600,
            ))),

            orchestrator_callback_base: env_string(
                "ORCHESTRATOR_CALLBACK_BASE",
                "http://localhost:8082",
            ),

            database_path: env_string("DATABASE_PATH", "organizer.sqlite3"),
            http_bind_addr: env_string("HTTP_BIND_ADDR", "0.0.0.0:8080"),
        }
    }
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_u32(key: &str, default: u32, min: u32, max: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u32>().ok())
        .map(|value| value.clamp(min, max))
        .unwrap_or(default)
}

fn env_f64(key: &str, default: f64, min: f64, max: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<f64>().ok())
        .map(|value| value.clamp(min, max))
        .unwrap_or(default)
}
