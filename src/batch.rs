//! Batch processor (4.J): the per-batch state machine.
//!
//! `PENDING -> PROCESSING -> PUBLISHING -> CALLBACK -> {DONE|ERROR}`,
//! driven by a single-writer scheduler re-entering on a fixed interval
//! (§5 "alarm"). Items within `PROCESSING` run in parallel (LLM calls are
//! the bottleneck); `PUBLISHING` runs one item at a time to avoid bursting
//! the entity store's CAS.

use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use sqlx::SqlitePool;
use tracing::{error, info, warn};

use crate::callback::{self, CallbackClient};
use crate::config::Config;
use crate::context_fetcher;
use crate::db::batches;
use crate::entity_store::EntityStoreClient;
use crate::error::Result;
use crate::llm_client::LlmClient;
use crate::model::{BatchPhase, BatchState, ItemState, ItemStatus, StatusCounts};
use crate::organize;
use crate::publisher;

/// Minimum files worth organizing; fewer and the item is trivially `done`
/// with nothing published (§4.J PROCESSING step 2).
const MIN_FILES_TO_ORGANIZE: usize = 3;

#[derive(Clone)]
pub struct BatchRuntime {
    pub pool: SqlitePool,
    pub config: Arc<Config>,
    pub entity_store: Arc<EntityStoreClient>,
    pub llm: Arc<LlmClient>,
    pub callback_client: Arc<CallbackClient>,
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum SubmitOutcome {
    Accepted { total: usize },
    AlreadyProcessing,
}

/// §4.J entry point. Persists a fresh `BatchState` unless one already
/// exists for `(batch_id, chunk_id)` in a non-terminal phase.
pub async fn submit(
    runtime: &BatchRuntime,
    batch_id: &str,
    chunk_id: &str,
    ids: &[String],
    custom_prompt: Option<String>,
) -> Result<SubmitOutcome> {
    if let Some(existing) = batches::get(&runtime.pool, batch_id, chunk_id).await? {
        if !existing.phase.is_terminal() {
            return Ok(SubmitOutcome::AlreadyProcessing);
        }
        // A terminal batch under the same key is stale bookkeeping that the
        // scheduler hasn't swept yet; clear it so the new submission can land.
        batches::delete(&runtime.pool, batch_id, chunk_id).await?;
    }

    let items: Vec<ItemState> = ids.iter().map(|id| ItemState::new(id.clone())).collect();

    let batch = BatchState {
        batch_id: batch_id.to_string(),
        chunk_id: chunk_id.to_string(),
        phase: BatchPhase::Pending,
        started_at: Utc::now().timestamp_millis(),
        completed_at: None,
        callback_retry_count: 0,
        items,
        global_error: None,
        custom_prompt,
    };

    let inserted = batches::try_insert(&runtime.pool, &batch).await?;
    if !inserted {
        return Ok(SubmitOutcome::AlreadyProcessing);
    }

    info!(batch_id, chunk_id, total = ids.len(), "batch accepted");
    Ok(SubmitOutcome::Accepted { total: ids.len() })
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub struct StatusResponse {
    pub status: String,
    pub phase: String,
    pub progress: StatusCounts,
}

/// §4.J status query: idempotent, never mutates state.
pub async fn status(
    runtime: &BatchRuntime,
    batch_id: &str,
    chunk_id: &str,
) -> Result<Option<StatusResponse>> {
    let Some(batch) = batches::get(&runtime.pool, batch_id, chunk_id).await? else {
        return Ok(None);
    };
    Ok(Some(StatusResponse {
        status: "found".to_string(),
        phase: batch.phase.as_str().to_string(),
        progress: StatusCounts::from_items(&batch.items),
    }))
}

/// One alarm tick: advance every active batch by as much as it can make
/// progress in a single pass. Batches run independently and without
/// cross-batch coordination (§5).
pub async fn run_alarm_tick(runtime: &BatchRuntime) -> Result<()> {
    let active = batches::list_active(&runtime.pool).await?;
    for batch in active {
        if let Err(err) = advance_batch(runtime, batch).await {
            error!(error = %err, "batch advance failed unexpectedly");
        }
    }
    Ok(())
}

async fn advance_batch(runtime: &BatchRuntime, mut batch: BatchState) -> Result<()> {
    match batch.phase {
        BatchPhase::Pending => batch.phase = BatchPhase::Processing,
        BatchPhase::Processing => run_processing_phase(runtime, &mut batch).await,
        BatchPhase::Publishing => run_publishing_phase(runtime, &mut batch).await,
        BatchPhase::Callback => run_callback_phase(runtime, &mut batch).await,
        BatchPhase::Done | BatchPhase::Error => {}
    }

    // `list_active` only ever hands us non-terminal batches, so a phase that
    // just went terminal this tick (only CALLBACK does) must be swept
    // immediately — otherwise it sits in the table forever with nothing left
    // to advance it past a phase `list_active` already excludes.
    if batch.phase.is_terminal() {
        batches::delete(&runtime.pool, &batch.batch_id, &batch.chunk_id).await?;
    } else {
        batches::save(&runtime.pool, &batch).await?;
    }
    Ok(())
}

/// §4.J PROCESSING: fetch + organize every pending/fetching item in
/// parallel, then transition once none remain in a non-terminal-for-this-
/// phase status.
async fn run_processing_phase(runtime: &BatchRuntime, batch: &mut BatchState) {
    let in_flight: Vec<usize> = batch
        .items
        .iter()
        .enumerate()
        .filter(|(_, item)| matches!(item.status, ItemStatus::Pending | ItemStatus::Fetching))
        .map(|(idx, _)| idx)
        .collect();

    let custom_prompt = batch.custom_prompt.as_deref();
    let futures = in_flight
        .iter()
        .map(|&idx| process_one_item(runtime, batch.items[idx].clone(), custom_prompt));
    let results = join_all(futures).await;

    for (idx, updated) in in_flight.into_iter().zip(results) {
        batch.items[idx] = updated;
    }

    let still_active = batch.items.iter().any(|item| {
        matches!(
            item.status,
            ItemStatus::Pending | ItemStatus::Fetching | ItemStatus::Processing
        )
    });

    if !still_active {
        batch.phase = BatchPhase::Publishing;
    }
}

async fn process_one_item(
    runtime: &BatchRuntime,
    mut item: ItemState,
    custom_prompt: Option<&str>,
) -> ItemState {
    item.status = ItemStatus::Fetching;

    let fetch_result = context_fetcher::fetch_context(&runtime.entity_store, &item.id).await;
    let fetched = match fetch_result {
        Ok(fetched) => fetched,
        Err(err) => return fail_or_retry(item, &runtime.config, err.to_string()),
    };

    for warning in &fetched.warnings {
        warn!(item_id = %item.id, warning = %warning, "context fetch warning");
    }

    item.tip = Some(fetched.tip);
    item.directory_path = Some(fetched.directory_path.clone());
    item.components = Some(fetched.components.clone());

    if fetched.files.len() < MIN_FILES_TO_ORGANIZE {
        item.status = ItemStatus::Done;
        item.files = None;
        return item;
    }

    item.status = ItemStatus::Processing;

    let organize_result = organize::organize(
        &runtime.config,
        &runtime.llm,
        &fetched.directory_path,
        &fetched.files,
        custom_prompt,
        None,
    )
    .await;

    match organize_result {
        Ok(outcome) => {
            item.plan = Some(outcome.plan.clone());
            item.ungrouped = Some(outcome.plan.ungrouped.clone());
            item.files = None;
            item.status = ItemStatus::Publishing;
            item.retry_count = 0;
            item
        }
        Err(err) => fail_or_retry(item, &runtime.config, err.to_string()),
    }
}

fn fail_or_retry(mut item: ItemState, config: &Config, reason: String) -> ItemState {
    item.retry_count += 1;
    if item.retry_count >= config.max_retries_per_item {
        item.status = ItemStatus::Error;
        item.error = Some(reason);
    } else {
        warn!(item_id = %item.id, retry_count = item.retry_count, reason = %reason, "item processing failed, will retry");
        item.status = ItemStatus::Pending;
    }
    item
}

/// §4.J PUBLISHING: one item at a time, to bound load on the entity store.
async fn run_publishing_phase(runtime: &BatchRuntime, batch: &mut BatchState) {
    for item in &mut batch.items {
        if item.status != ItemStatus::Publishing || item.new_parent_tip.is_some() {
            continue;
        }

        let Some(components) = item.components.clone() else {
            item.status = ItemStatus::Error;
            item.error = Some("publishing reached with no fetched components".to_string());
            continue;
        };
        let Some(plan) = item.plan.clone() else {
            item.status = ItemStatus::Error;
            item.error = Some("publishing reached with no organize plan".to_string());
            continue;
        };

        match publisher::publish(&runtime.entity_store, &item.id, &components, &plan).await {
            Ok(outcome) => {
                item.new_parent_tip = Some(outcome.new_tip);
                item.new_parent_version = Some(outcome.new_version);
                item.groups_created = Some(outcome.groups_created);
                item.status = ItemStatus::Done;
                item.components = None;
                item.plan = None;
            }
            Err(err) => {
                item.status = ItemStatus::Error;
                item.error = Some(err.to_string());
            }
        }
    }

    let none_left = batch
        .items
        .iter()
        .all(|item| item.status != ItemStatus::Publishing);
    if none_left {
        batch.phase = BatchPhase::Callback;
    }
}

/// §4.J CALLBACK: one aggregated payload, retried with backoff, then
/// force-completed regardless of delivery outcome (§7
/// CallbackDeliveryFailure).
async fn run_callback_phase(runtime: &BatchRuntime, batch: &mut BatchState) {
    let now_ms = Utc::now().timestamp_millis();
    let payload = callback::build_payload(batch, now_ms);

    match runtime.callback_client.send(&payload).await {
        Ok(()) => {
            batch.phase = BatchPhase::Done;
            batch.completed_at = Some(now_ms);
        }
        Err(err) => {
            batch.callback_retry_count += 1;
            warn!(batch_id = %batch.batch_id, attempt = batch.callback_retry_count, error = %err, "callback delivery failed");
            if batch.callback_retry_count >= runtime.config.max_callback_retries {
                error!(batch_id = %batch.batch_id, "callback delivery exhausted, force-completing");
                batch.phase = BatchPhase::Done;
                batch.completed_at = Some(now_ms);
                batch.global_error = Some(format!("callback delivery failed: {err}"));
            }
            // Otherwise stay in CALLBACK; the next alarm tick retries. The
            // scheduler interval itself provides the backoff spacing.
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_counts_reflect_item_states() {
        let mut items = vec![ItemState::new("a".to_string()), ItemState::new("b".to_string())];
        items[0].status = ItemStatus::Done;
        items[1].status = ItemStatus::Error;
        let counts = StatusCounts::from_items(&items);
        assert_eq!(counts.done, 1);
        assert_eq!(counts.failed, 1);
        assert_eq!(counts.total, 2);
    }
}
