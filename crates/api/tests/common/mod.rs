#![allow(dead_code)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use sqlx::PgPool;
use tower::ServiceExt;

use storyframe_api::config::{BlobConfig, GenerationConfig, ServerConfig};
use storyframe_api::router::build_app_router;
use storyframe_api::state::AppState;
use storyframe_core::asset::AssetType;
use storyframe_core::types::DbId;
use storyframe_db::models::asset::CreateAsset;
use storyframe_db::repositories::AssetRepo;
use storyframe_generation::{DispatchOutcome, GenerationClient, GenerationRequest};
use storyframe_pipeline::batch::BatchOptions;
use storyframe_pipeline::PipelineConfig;
use storyframe_storage::{
    BlobStore, BlobStoreError, FetchError, FetchedImage, ImageFetcher, PersistConfig, StoredBlob,
};

/// Models with this prefix are queued and only finish on a callback.
pub const QUEUED_PREFIX: &str = "queued-";

/// Models with this prefix are refused at dispatch.
pub const REJECTED_PREFIX: &str = "broken-";

// ---------------------------------------------------------------------------
// External service doubles
// ---------------------------------------------------------------------------

/// Generation Service stand-in. Behaviour is chosen by the model name.
struct FakeGenerator;

#[async_trait]
impl GenerationClient for FakeGenerator {
    async fn dispatch(&self, request: &GenerationRequest) -> DispatchOutcome {
        if request.model.starts_with(REJECTED_PREFIX) {
            return DispatchOutcome::Rejected {
                error: "model unavailable".to_string(),
            };
        }
        if request.model.starts_with(QUEUED_PREFIX) {
            return DispatchOutcome::Accepted {
                job_id: job_id_for(request.variant_id),
            };
        }
        DispatchOutcome::Completed {
            job_id: Some(format!("sync-{}", request.variant_id)),
            image_url: format!("https://gen.test/{}.png", request.variant_id),
        }
    }
}

/// Job handle the fake generator assigns to a queued variant.
pub fn job_id_for(variant_id: DbId) -> String {
    format!("job-{variant_id}")
}

/// Answers every download with a PNG-sized payload.
struct FakeFetcher;

#[async_trait]
impl ImageFetcher for FakeFetcher {
    async fn fetch(&self, _url: &str, _timeout: Duration) -> Result<FetchedImage, FetchError> {
        Ok(FetchedImage {
            bytes: vec![0x89; 4096],
            content_type: Some("image/png".to_string()),
        })
    }
}

#[derive(Default)]
struct MemoryBlobStore {
    objects: Mutex<HashMap<String, usize>>,
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        _content_type: &str,
    ) -> Result<StoredBlob, BlobStoreError> {
        let object = format!("{bucket}/{path}");
        self.objects
            .lock()
            .unwrap()
            .insert(object.clone(), bytes.len());
        Ok(StoredBlob {
            url: format!("https://blobs.test/{object}"),
            path: path.to_string(),
        })
    }

    async fn delete(&self, bucket: &str, path: &str) -> Result<(), BlobStoreError> {
        self.objects
            .lock()
            .unwrap()
            .remove(&format!("{bucket}/{path}"));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// App construction
// ---------------------------------------------------------------------------

/// Build a test `ServerConfig` with safe defaults.
///
/// Persistence retries and project batches run without delay so `wait`
/// requests and background runs settle fast.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 30,
        stuck_sweep_interval_secs: 60,
        pipeline: PipelineConfig {
            fanout_task_timeout: Duration::from_secs(5),
            project_batch: BatchOptions {
                max_concurrent: 2,
                per_task_timeout: Some(Duration::from_secs(10)),
                cooldown: Duration::ZERO,
            },
            callback_url: Some("http://127.0.0.1/api/v1/webhooks/generation".to_string()),
            persist: PersistConfig {
                retry_initial_delay: Duration::ZERO,
                retry_backoff_base: Duration::from_millis(1),
                ..PersistConfig::default()
            },
            ..PipelineConfig::default()
        },
        generation: GenerationConfig {
            api_url: "http://127.0.0.1:9".to_string(),
            api_key: None,
        },
        blob: BlobConfig::Local {
            root: PathBuf::from("/tmp/storyframe-test-blobs"),
            public_base_url: "https://blobs.test".to_string(),
        },
    }
}

/// Build the full application router over the given pool, with the
/// Generation Service, downloads and blob store replaced by doubles.
///
/// Uses the same [`build_app_router`] as `main.rs` so integration tests
/// exercise the production middleware stack.
pub fn build_test_app(pool: PgPool) -> Router {
    let config = test_config();
    let state = AppState::new(
        pool,
        config.clone(),
        Arc::new(FakeGenerator),
        Arc::new(MemoryBlobStore::default()),
        Arc::new(FakeFetcher),
    );
    build_app_router(state, &config)
}

/// Router over a pool that never connects, for requests that are answered
/// before any query runs (routing, middleware, payload validation).
pub fn build_offline_app() -> Router {
    let pool = PgPool::connect_lazy("postgres://localhost/storyframe_unused").unwrap();
    build_test_app(pool)
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

pub const PROJECT_ID: DbId = 1;

/// Insert an asset directly and return its ID.
pub async fn create_asset(pool: &PgPool, asset_type: AssetType, name: &str) -> DbId {
    AssetRepo::create(
        pool,
        &CreateAsset {
            project_id: PROJECT_ID,
            asset_type,
            name: name.to_string(),
            visual_description: Some(format!("{name}, weathered coat")),
        },
    )
    .await
    .unwrap()
    .id
}

/// Generate ready variants for a character's portrait slot and return
/// their IDs.
pub async fn ready_variants(pool: &PgPool, character_id: DbId, models: &[&str]) -> Vec<DbId> {
    let response = post_json(
        build_test_app(pool.clone()),
        &format!("/api/v1/assets/character/{character_id}/variants/generate"),
        serde_json::json!({
            "sub_type": "portrait",
            "models": models,
            "wait": true,
        }),
    )
    .await;
    assert_eq!(response.status(), axum::http::StatusCode::OK);
    let json = body_json(response).await;
    json["data"]["variants"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| {
            assert_eq!(v["status"], "ready");
            v["id"].as_i64().unwrap()
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Request helpers
// ---------------------------------------------------------------------------

pub async fn send(app: Router, request: Request<Body>) -> Response<Body> {
    app.oneshot(request).await.unwrap()
}

pub async fn get(app: Router, uri: &str) -> Response<Body> {
    let request = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    send(app, request).await
}

pub async fn post(app: Router, uri: &str) -> Response<Body> {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    send(app, request).await
}

pub async fn post_json(app: Router, uri: &str, body: serde_json::Value) -> Response<Body> {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    send(app, request).await
}

pub async fn delete(app: Router, uri: &str) -> Response<Body> {
    let request = Request::builder()
        .method(Method::DELETE)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    send(app, request).await
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

/// Poll a variant until it leaves `generating`.
pub async fn wait_resolved(pool: &PgPool, variant_id: DbId) -> serde_json::Value {
    for _ in 0..100 {
        let response = get(
            build_test_app(pool.clone()),
            &format!("/api/v1/variants/{variant_id}"),
        )
        .await;
        let json = body_json(response).await;
        if json["data"]["status"] != "generating" {
            return json["data"].clone();
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("variant {variant_id} never left generating");
}
