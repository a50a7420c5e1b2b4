//! Organize service (4.G): single-request orchestration, D → F → E.
//!
//! `organize` is the synchronous path behind `POST /organize` and is also
//! what the batch processor's PROCESSING phase calls per item (§4.J).

use serde_json::json;
use tracing::warn;

use crate::config::Config;
use crate::error::{OrganizerError, Result};
use crate::llm_client::{CompletionRequest, LlmClient};
use crate::model::{FileInput, OrganizePlan};
use crate::prompt;
use crate::retry::backoff_delay;
use crate::validator::{self, RawPlan};

const SCHEMA_NAME: &str = "organize_plan";
const MAX_LLM_ATTEMPTS: u32 = 4;

fn response_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "additionalProperties": false,
        "required": ["groups", "ungrouped_files", "reorganization_description"],
        "properties": {
            "groups": {
                "type": "array",
                "items": {
                    "type": "object",
                    "additionalProperties": false,
                    "required": ["group_name", "description", "files"],
                    "properties": {
                        "group_name": {"type": "string"},
                        "description": {"type": "string"},
                        "files": {"type": "array", "items": {"type": "string"}},
                    },
                },
            },
            "ungrouped_files": {"type": "array", "items": {"type": "string"}},
            "reorganization_description": {"type": "string"},
        },
    })
}

pub struct OrganizeOutcome {
    pub plan: OrganizePlan,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub cost: f64,
    pub model: String,
}

/// Validate the request shape invariants from §3 that apply regardless of
/// transport (the HTTP layer additionally enforces the 10 MiB wire-size
/// cap before this is ever called).
pub fn validate_request(directory_path: &str, files: &[FileInput]) -> Result<()> {
    if files.is_empty() {
        return Err(OrganizerError::Validation(
            "files must be non-empty".to_string(),
        ));
    }
    if directory_path.trim().is_empty() {
        return Err(OrganizerError::Validation(
            "directory_path must not be empty".to_string(),
        ));
    }
    let mut seen = std::collections::HashSet::with_capacity(files.len());
    for file in files {
        if !seen.insert(file.name.as_str()) {
            return Err(OrganizerError::Validation(format!(
                "duplicate file name `{}`",
                file.name
            )));
        }
    }
    Ok(())
}

/// Run the full organize pipeline for one directory's worth of files:
/// build prompts (4.D), call the LLM with retry on transient failure
/// (4.G step 3), parse, and sanitize the response (4.E).
pub async fn organize(
    config: &Config,
    llm: &LlmClient,
    directory_path: &str,
    files: &[FileInput],
    custom_prompt: Option<&str>,
    strategy_guidance: Option<&str>,
) -> Result<OrganizeOutcome> {
    validate_request(directory_path, files)?;

    let built = prompt::build(
        directory_path,
        files,
        config.max_tokens,
        config.token_budget_percentage,
        custom_prompt,
        strategy_guidance,
    );

    let prompt_tokens_estimate =
        crate::estimator::estimate(&built.system_prompt) + crate::estimator::estimate(&built.user_prompt);
    let completion_max_tokens = config
        .max_tokens
        .saturating_sub(prompt_tokens_estimate.min(u64::from(u32::MAX)) as u32)
        .max(1_024);

    let mut attempt = 0u32;
    let completion = loop {
        let request = CompletionRequest {
            system: &built.system_prompt,
            user: &built.user_prompt,
            schema_name: SCHEMA_NAME,
            schema: response_schema(),
            temperature: None,
            max_tokens: completion_max_tokens,
        };

        match llm.complete(request).await {
            Ok(response) => break response,
            Err(err) if err.is_transient() && attempt + 1 < MAX_LLM_ATTEMPTS => {
                attempt += 1;
                warn!(attempt, error = %err, "LLM call failed transiently, retrying");
                tokio::time::sleep(backoff_delay(attempt)).await;
            }
            Err(err) => return Err(err),
        }
    };

    let raw: RawPlan = serde_json::from_str(&completion.content)
        .map_err(|err| OrganizerError::BadResponse(format!("invalid JSON content: {err}")))?;

    let input_names: Vec<String> = files.iter().map(|f| f.name.clone()).collect();
    let sanitize_result = validator::sanitize(raw, &input_names)?;

    let mut plan = sanitize_result.sanitized;
    plan.truncation = Some(built.truncation);

    Ok(OrganizeOutcome {
        plan,
        prompt_tokens: completion.prompt_tokens,
        completion_tokens: completion.completion_tokens,
        cost: completion.cost,
        model: completion.model,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FileKind;

    #[test]
    fn rejects_empty_file_list() {
        let err = validate_request("/dir/", &[]).unwrap_err();
        assert!(matches!(err, OrganizerError::Validation(_)));
    }

    #[test]
    fn rejects_duplicate_names() {
        let files = vec![
            FileInput {
                name: "a.txt".to_string(),
                kind: FileKind::Text,
                content: "one".to_string(),
                original_name: None,
                mime: None,
                size: None,
            },
            FileInput {
                name: "a.txt".to_string(),
                kind: FileKind::Text,
                content: "two".to_string(),
                original_name: None,
                mime: None,
                size: None,
            },
        ];
        let err = validate_request("/dir/", &files).unwrap_err();
        assert!(matches!(err, OrganizerError::Validation(_)));
    }
}
