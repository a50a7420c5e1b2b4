//! Persistence for `BatchState` (§3), the batch processor's only
//! persisted state. Follows the teacher's repository conventions (trim &
//! validate identifiers, `Utc::now().timestamp()` for wall-clock columns,
//! `rows_affected()` existence checks) while storing the `items` array as
//! a JSON TEXT blob, the same pattern the teacher uses for nested lists it
//! doesn't need to query by field (`mutation_revision`'s file-path list).

use chrono::Utc;
use sqlx::{Row, SqlitePool};

use crate::error::{OrganizerError, Result};
use crate::model::{BatchPhase, BatchState, ItemState};

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS batch_states (
            batch_id TEXT NOT NULL,
            chunk_id TEXT NOT NULL,
            phase TEXT NOT NULL,
            started_at INTEGER NOT NULL,
            completed_at INTEGER,
            callback_retry_count INTEGER NOT NULL DEFAULT 0,
            items_json TEXT NOT NULL,
            global_error TEXT,
            custom_prompt TEXT,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (batch_id, chunk_id)
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

/// Insert a brand-new `BatchState` in `PENDING`. Returns `Ok(false)`
/// without writing anything if a row for `(batch_id, chunk_id)` already
/// exists, letting the caller decide whether that's `already_processing`
/// (§4.J entry contract).
pub async fn try_insert(pool: &SqlitePool, batch: &BatchState) -> Result<bool> {
    let items_json = serde_json::to_string(&batch.items)
        .map_err(|err| OrganizerError::Validation(format!("failed to serialize items: {err}")))?;
    let now = Utc::now().timestamp();

    let result = sqlx::query(
        r#"
        INSERT INTO batch_states
            (batch_id, chunk_id, phase, started_at, completed_at, callback_retry_count, items_json, global_error, custom_prompt, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT (batch_id, chunk_id) DO NOTHING
        "#,
    )
    .bind(&batch.batch_id)
    .bind(&batch.chunk_id)
    .bind(batch.phase.as_str())
    .bind(batch.started_at)
    .bind(batch.completed_at)
    .bind(batch.callback_retry_count)
    .bind(items_json)
    .bind(&batch.global_error)
    .bind(&batch.custom_prompt)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn get(pool: &SqlitePool, batch_id: &str, chunk_id: &str) -> Result<Option<BatchState>> {
    let row = sqlx::query(
        "SELECT batch_id, chunk_id, phase, started_at, completed_at, callback_retry_count, items_json, global_error, custom_prompt \
         FROM batch_states WHERE batch_id = ? AND chunk_id = ?",
    )
    .bind(batch_id)
    .bind(chunk_id)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else { return Ok(None) };
    Ok(Some(row_to_batch(&row)?))
}

/// All batches not in a terminal phase, for the scheduler's alarm sweep.
pub async fn list_active(pool: &SqlitePool) -> Result<Vec<BatchState>> {
    let rows = sqlx::query(
        "SELECT batch_id, chunk_id, phase, started_at, completed_at, callback_retry_count, items_json, global_error, custom_prompt \
         FROM batch_states WHERE phase NOT IN ('done', 'error')",
    )
    .fetch_all(pool)
    .await?;

    rows.iter().map(row_to_batch).collect()
}

fn row_to_batch(row: &sqlx::sqlite::SqliteRow) -> Result<BatchState> {
    let phase_str: String = row.try_get("phase")?;
    let phase = BatchPhase::from_str(&phase_str)
        .ok_or_else(|| OrganizerError::Validation(format!("unknown batch phase `{phase_str}`")))?;
    let items_json: String = row.try_get("items_json")?;
    let items: Vec<ItemState> = serde_json::from_str(&items_json)
        .map_err(|err| OrganizerError::Validation(format!("failed to parse items_json: {err}")))?;

    Ok(BatchState {
        batch_id: row.try_get("batch_id")?,
        chunk_id: row.try_get("chunk_id")?,
        phase,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
        callback_retry_count: row.try_get::<i64, _>("callback_retry_count")? as u32,
        items,
        global_error: row.try_get("global_error")?,
        custom_prompt: row.try_get("custom_prompt")?,
    })
}

/// Persist the full current state of `batch`, including its items. The
/// batch processor is the sole writer per (batch_id, chunk_id) (§5), so
/// this is a plain upsert, not a compare-and-swap.
pub async fn save(pool: &SqlitePool, batch: &BatchState) -> Result<()> {
    let items_json = serde_json::to_string(&batch.items)
        .map_err(|err| OrganizerError::Validation(format!("failed to serialize items: {err}")))?;
    let now = Utc::now().timestamp();

    sqlx::query(
        r#"
        UPDATE batch_states
        SET phase = ?, completed_at = ?, callback_retry_count = ?, items_json = ?, global_error = ?, custom_prompt = ?, updated_at = ?
        WHERE batch_id = ? AND chunk_id = ?
        "#,
    )
    .bind(batch.phase.as_str())
    .bind(batch.completed_at)
    .bind(batch.callback_retry_count)
    .bind(items_json)
    .bind(&batch.global_error)
    .bind(&batch.custom_prompt)
    .bind(now)
    .bind(&batch.batch_id)
    .bind(&batch.chunk_id)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn delete(pool: &SqlitePool, batch_id: &str, chunk_id: &str) -> Result<()> {
    sqlx::query("DELETE FROM batch_states WHERE batch_id = ? AND chunk_id = ?")
        .bind(batch_id)
        .bind(chunk_id)
        .execute(pool)
        .await?;
    Ok(())
}
