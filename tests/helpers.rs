//! Test harness for batch-processor integration tests.
//!
//! Stands in the entity store, the LLM provider, and the orchestrator
//! callback receiver with three minimal axum servers bound to ephemeral
//! ports, the same no-subprocess-no-mocking-library approach the retrieval
//! pack's own integration harness uses, adapted to this crate's HTTP
//! collaborators instead of an in-process dispatch call.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use axum::extract::{Path as AxumPath, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use organizer_core::callback::CallbackPayload;
use serde_json::{json, Value};
use tokio::net::TcpListener;

#[derive(Default)]
struct EntityStoreState {
    entities: Mutex<BTreeMap<String, Value>>,
    blobs: Mutex<BTreeMap<String, Vec<u8>>>,
    next_child_id: Mutex<u64>,
}

/// Spawns a stub entity store seeded with one root entity whose components
/// are uploaded first via `seed_text_components`.
pub struct EntityStoreHarness {
    pub base_url: String,
    state: Arc<EntityStoreState>,
}

impl EntityStoreHarness {
    pub async fn start() -> Self {
        let state = Arc::new(EntityStoreState::default());
        let app = Router::new()
            .route("/entities/{id}", get(get_entity))
            .route("/entities", post(create_entity))
            .route("/entities/{id}/versions", post(append_version))
            .route("/cat/{cid}", get(cat))
            .route("/upload", post(upload))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{addr}"),
            state,
        }
    }

    /// Seed a root entity `id` whose components map `name -> content`; every
    /// value is uploaded as its own blob first so `cat` resolves it.
    pub fn seed_root(&self, id: &str, files: &[(&str, &str)]) {
        let mut blobs = self.state.blobs.lock().unwrap();
        let mut components = serde_json::Map::new();
        for (name, content) in files {
            let cid = format!("cid-{name}");
            blobs.insert(cid.clone(), content.as_bytes().to_vec());
            components.insert((*name).to_string(), json!(cid));
        }
        drop(blobs);

        let entity = json!({
            "id": id,
            "tip": "tip-0",
            "ver": 0,
            "components": components,
            "parent": null,
            "children": [],
        });
        self.state.entities.lock().unwrap().insert(id.to_string(), entity);
    }
}

async fn get_entity(State(state): State<Arc<EntityStoreState>>, AxumPath(id): AxumPath<String>) -> Json<Value> {
    let entities = state.entities.lock().unwrap();
    Json(entities.get(&id).cloned().unwrap_or(Value::Null))
}

async fn cat(State(state): State<Arc<EntityStoreState>>, AxumPath(cid): AxumPath<String>) -> Vec<u8> {
    state.blobs.lock().unwrap().get(&cid).cloned().unwrap_or_default()
}

async fn upload(State(state): State<Arc<EntityStoreState>>, mut multipart: axum::extract::Multipart) -> Json<Value> {
    let mut cids = Vec::new();
    while let Some(field) = multipart.next_field().await.unwrap() {
        let bytes = field.bytes().await.unwrap().to_vec();
        let cid = format!("cid-upload-{}", bytes.len());
        state.blobs.lock().unwrap().insert(cid.clone(), bytes);
        cids.push(json!({"cid": cid}));
    }
    Json(Value::Array(cids))
}

async fn create_entity(State(state): State<Arc<EntityStoreState>>, Json(body): Json<Value>) -> Json<Value> {
    let mut next_id = state.next_child_id.lock().unwrap();
    *next_id += 1;
    let id = format!("child-{next_id}");
    drop(next_id);

    let entity = json!({
        "id": id,
        "tip": format!("tip-{id}"),
        "ver": 1,
        "components": body.get("components").cloned().unwrap_or(json!({})),
        "parent": body.get("parent").cloned(),
        "children": [],
    });
    state.entities.lock().unwrap().insert(id, entity.clone());
    Json(entity)
}

async fn append_version(
    State(state): State<Arc<EntityStoreState>>,
    AxumPath(id): AxumPath<String>,
    Json(_body): Json<Value>,
) -> Json<Value> {
    let mut entities = state.entities.lock().unwrap();
    let entity = entities.get_mut(&id).expect("entity must exist for append_version");
    let ver = entity.get("ver").and_then(Value::as_u64).unwrap_or(0) + 1;
    entity["ver"] = json!(ver);
    entity["tip"] = json!(format!("tip-{id}-v{ver}"));
    Json(entity.clone())
}

/// A stub OpenAI-compatible chat-completions endpoint that always returns
/// the same canned plan JSON as the model's message content.
pub struct LlmHarness {
    pub base_url: String,
}

impl LlmHarness {
    pub async fn start(plan_json: Value) -> Self {
        let content = plan_json.to_string();
        let app = Router::new()
            .route("/chat/completions", post(move |Json(_body): Json<Value>| {
                let content = content.clone();
                async move {
                    Json(json!({
                        "model": "stub-model",
                        "choices": [{"message": {"content": content}}],
                        "usage": {"prompt_tokens": 100, "completion_tokens": 50, "total_tokens": 150},
                    }))
                }
            }));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{addr}"),
        }
    }
}

/// Captures every payload POSTed to the stub orchestrator callback endpoint.
pub struct CallbackHarness {
    pub base_url: String,
    received: Arc<Mutex<Vec<CallbackPayload>>>,
}

impl CallbackHarness {
    pub async fn start() -> Self {
        let received = Arc::new(Mutex::new(Vec::new()));
        let state = received.clone();
        let app = Router::new()
            .route(
                "/callback/organizer/{batch_id}",
                post(move |AxumPath(_batch_id): AxumPath<String>, Json(payload): Json<CallbackPayload>| {
                    let state = state.clone();
                    async move {
                        state.lock().unwrap().push(payload);
                        Json(json!({"ok": true}))
                    }
                }),
            );

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{addr}"),
            received,
        }
    }

    pub fn payloads(&self) -> Vec<CallbackPayload> {
        self.received.lock().unwrap().clone()
    }
}
