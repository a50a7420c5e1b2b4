//! Callback payload and delivery (§6, §4.J CALLBACK phase).
//!
//! Builds the single aggregated payload summarizing every item in a batch
//! and POSTs it to the orchestrator, retrying transient failures with
//! backoff before the batch processor force-completes (§7
//! CallbackDeliveryFailure).

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{OrganizerError, Result};
use crate::model::{BatchState, GroupCreated, ItemState, ItemStatus};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemResult {
    pub id: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_tip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_version: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub groups_created: Option<Vec<GroupCreated>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    pub ocr: bool,
    pub reorganize: bool,
    pub pinax: bool,
}

impl Default for ProcessingConfig {
    /// A freshly organized group is a leaf the caller should not recurse
    /// into: no re-OCR, no further reorganization, but indexable (pinax).
    fn default() -> Self {
        Self {
            ocr: false,
            reorganize: false,
            pinax: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPi {
    pub id: String,
    pub parent_id: String,
    pub children: Vec<String>,
    pub processing_config: ProcessingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Summary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub processing_time_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackPayload {
    pub batch_id: String,
    pub chunk_id: String,
    pub status: String,
    pub results: Vec<ItemResult>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub new_pis: Vec<NewPi>,
    pub summary: Summary,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Build the aggregated payload from final item states. §7: all succeed ->
/// `success`, all fail -> `error`, mixed -> `partial`.
pub fn build_payload(batch: &BatchState, now_ms: i64) -> CallbackPayload {
    let succeeded = batch
        .items
        .iter()
        .filter(|item| item.status == ItemStatus::Done)
        .count();
    let failed = batch
        .items
        .iter()
        .filter(|item| item.status == ItemStatus::Error)
        .count();
    let total = batch.items.len();

    let status = if failed == 0 {
        "success"
    } else if succeeded == 0 {
        "error"
    } else {
        "partial"
    };

    let results: Vec<ItemResult> = batch.items.iter().map(item_result).collect();

    let new_pis: Vec<NewPi> = batch
        .items
        .iter()
        .flat_map(|item| {
            item.groups_created.iter().flatten().map(move |group| NewPi {
                id: group.id.clone(),
                parent_id: item.id.clone(),
                children: Vec::new(),
                processing_config: ProcessingConfig::default(),
            })
        })
        .collect();

    let processing_time_ms = (now_ms - batch.started_at).max(0);

    CallbackPayload {
        batch_id: batch.batch_id.clone(),
        chunk_id: batch.chunk_id.clone(),
        status: status.to_string(),
        results,
        new_pis,
        summary: Summary {
            total,
            succeeded,
            failed,
            processing_time_ms,
        },
        error: batch.global_error.clone(),
    }
}

fn item_result(item: &ItemState) -> ItemResult {
    let status = if item.status == ItemStatus::Error {
        "error"
    } else {
        "success"
    };
    ItemResult {
        id: item.id.clone(),
        status: status.to_string(),
        new_tip: item.new_parent_tip.clone(),
        new_version: item.new_parent_version,
        error: item.error.clone(),
        groups_created: item.groups_created.clone(),
    }
}

pub struct CallbackClient {
    http: reqwest::Client,
    base: String,
}

impl CallbackClient {
    pub fn new(base: String) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;
        Ok(Self { http, base })
    }

    /// POST the payload to `{orchestrator}/callback/organizer/{batch_id}`.
    /// Non-2xx and network errors both surface as `Err`, leaving the retry
    /// policy to the caller (§4.J CALLBACK phase).
    pub async fn send(&self, payload: &CallbackPayload) -> Result<()> {
        let url = format!("{}/callback/organizer/{}", self.base, payload.batch_id);
        let response = self
            .http
            .post(&url)
            .json(payload)
            .send()
            .await
            .map_err(|err| OrganizerError::StoreTransient(err.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            warn!(batch_id = %payload.batch_id, %status, "callback delivery failed");
            return Err(OrganizerError::StoreTransient(format!(
                "callback POST {url} returned {status}"
            )));
        }
        Ok(())
    }
}
