//! End-to-end batch processing (§8 scenario 6): submit a chunk of two
//! entity ids against stub collaborators, drive the scheduler by hand, and
//! assert the orchestrator receives one aggregated success callback.

mod helpers;

use std::sync::Arc;
use std::time::Duration;

use helpers::{CallbackHarness, EntityStoreHarness, LlmHarness};
use organizer_core::batch::{self, BatchRuntime, SubmitOutcome};
use organizer_core::callback::CallbackClient;
use organizer_core::config::Config;
use organizer_core::db;
use organizer_core::entity_store::EntityStoreClient;
use organizer_core::llm_client::LlmClient;
use serde_json::json;

fn test_config(entity_store_base: String, llm_api_base: String, callback_base: String, database_path: String) -> Config {
    Config {
        max_tokens: 128_000,
        token_budget_percentage: 0.7,
        model_name: "stub-model".to_string(),
        max_retries_per_item: 3,
        max_callback_retries: 3,
        alarm_interval: Duration::from_millis(50),
        llm_api_base,
        llm_api_key: "test-key".to_string(),
        llm_input_price_per_1m: 0.15,
        llm_output_price_per_1m: 0.60,
        llm_request_timeout: Duration::from_secs(10),
        entity_store_base,
        entity_store_request_timeout: Duration::from_secs(10),
        orchestrator_callback_base: callback_base,
        database_path,
        http_bind_addr: "127.0.0.1:0".to_string(),
    }
}

async fn advance_until_done(runtime: &BatchRuntime, batch_id: &str, chunk_id: &str, max_ticks: usize) {
    for _ in 0..max_ticks {
        batch::run_alarm_tick(runtime).await.unwrap();
        if batch::status(runtime, batch_id, chunk_id).await.unwrap().is_none() {
            // Batch rows are deleted once DONE/ERROR is swept; that's our signal.
            return;
        }
    }
    panic!("batch did not reach a terminal phase within {max_ticks} ticks");
}

#[tokio::test]
async fn batch_of_two_items_reports_success_to_callback() {
    let entity_store = EntityStoreHarness::start().await;
    entity_store.seed_root(
        "entity-a",
        &[("one.txt", "first file"), ("two.txt", "second file"), ("three.txt", "third file")],
    );
    entity_store.seed_root(
        "entity-b",
        &[("alpha.txt", "alpha content"), ("beta.txt", "beta content"), ("gamma.txt", "gamma content")],
    );

    let plan = json!({
        "groups": [{
            "group_name": "misc",
            "description": "grouped everything together",
            "files": ["one.txt", "two.txt", "three.txt", "alpha.txt", "beta.txt", "gamma.txt"],
        }],
        "ungrouped_files": [],
        "reorganization_description": "one tidy group",
    });
    let llm = LlmHarness::start(plan).await;
    let callback = CallbackHarness::start().await;

    let db_dir = tempfile::tempdir().unwrap();
    let db_path = db_dir.path().join("organizer-test.sqlite3");

    let config = Arc::new(test_config(
        entity_store.base_url.clone(),
        llm.base_url.clone(),
        callback.base_url.clone(),
        db_path.to_string_lossy().to_string(),
    ));

    let pool = db::connect_pool(&db_path).await.unwrap();
    db::run_migrations(&pool).await.unwrap();

    let runtime = BatchRuntime {
        pool,
        config: config.clone(),
        entity_store: Arc::new(EntityStoreClient::new(config.entity_store_base.clone(), config.entity_store_request_timeout).unwrap()),
        llm: Arc::new(
            LlmClient::new(
                config.llm_api_base.clone(),
                config.llm_api_key.clone(),
                config.model_name.clone(),
                config.llm_input_price_per_1m,
                config.llm_output_price_per_1m,
                config.llm_request_timeout,
            )
            .unwrap(),
        ),
        callback_client: Arc::new(CallbackClient::new(config.orchestrator_callback_base.clone()).unwrap()),
    };

    let outcome = batch::submit(
        &runtime,
        "batch-1",
        "chunk-1",
        &["entity-a".to_string(), "entity-b".to_string()],
        None,
    )
    .await
    .unwrap();
    assert!(matches!(outcome, SubmitOutcome::Accepted { total: 2 }));

    // Resubmitting the same key while it's in flight must be rejected.
    let resubmit = batch::submit(&runtime, "batch-1", "chunk-1", &["entity-a".to_string()], None)
        .await
        .unwrap();
    assert!(matches!(resubmit, SubmitOutcome::AlreadyProcessing));

    advance_until_done(&runtime, "batch-1", "chunk-1", 20).await;

    let payloads = callback.payloads();
    assert_eq!(payloads.len(), 1, "expected exactly one callback delivery");
    let payload = &payloads[0];
    assert_eq!(payload.batch_id, "batch-1");
    assert_eq!(payload.status, "success");
    assert_eq!(payload.summary.total, 2);
    assert_eq!(payload.summary.succeeded, 2);
    assert_eq!(payload.summary.failed, 0);
    assert_eq!(payload.new_pis.len(), 2, "one group published per entity");
    for new_pi in &payload.new_pis {
        assert!(!new_pi.processing_config.reorganize);
        assert!(!new_pi.processing_config.ocr);
        assert!(new_pi.processing_config.pinax);
    }
}

#[tokio::test]
async fn item_with_too_few_files_is_marked_done_without_publishing() {
    let entity_store = EntityStoreHarness::start().await;
    entity_store.seed_root("entity-small", &[("only.txt", "not enough files here")]);

    let llm = LlmHarness::start(json!({
        "groups": [],
        "ungrouped_files": [],
        "reorganization_description": "unused",
    }))
    .await;
    let callback = CallbackHarness::start().await;

    let db_dir = tempfile::tempdir().unwrap();
    let db_path = db_dir.path().join("organizer-test-2.sqlite3");
    let config = Arc::new(test_config(
        entity_store.base_url.clone(),
        llm.base_url.clone(),
        callback.base_url.clone(),
        db_path.to_string_lossy().to_string(),
    ));

    let pool = db::connect_pool(&db_path).await.unwrap();
    db::run_migrations(&pool).await.unwrap();

    let runtime = BatchRuntime {
        pool,
        config: config.clone(),
        entity_store: Arc::new(EntityStoreClient::new(config.entity_store_base.clone(), config.entity_store_request_timeout).unwrap()),
        llm: Arc::new(
            LlmClient::new(
                config.llm_api_base.clone(),
                config.llm_api_key.clone(),
                config.model_name.clone(),
                config.llm_input_price_per_1m,
                config.llm_output_price_per_1m,
                config.llm_request_timeout,
            )
            .unwrap(),
        ),
        callback_client: Arc::new(CallbackClient::new(config.orchestrator_callback_base.clone()).unwrap()),
    };

    batch::submit(&runtime, "batch-2", "chunk-1", &["entity-small".to_string()], None)
        .await
        .unwrap();

    advance_until_done(&runtime, "batch-2", "chunk-1", 20).await;

    let payloads = callback.payloads();
    assert_eq!(payloads.len(), 1);
    assert_eq!(payloads[0].status, "success");
    assert!(payloads[0].new_pis.is_empty(), "too few files to organize means nothing published");
}
