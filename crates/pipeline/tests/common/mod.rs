//! Shared harness for pipeline integration tests.
//!
//! In-memory stores and scripted external services, wired into the same
//! services the API builds over PostgreSQL.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Notify;
use storyframe_core::asset::{AssetKey, AssetType};
use storyframe_core::status::{AssetStatus, VariantStatus};
use storyframe_core::types::{DbId, Timestamp};
use storyframe_db::models::asset::{ApprovedImage, Asset, AssetImage};
use storyframe_db::models::variant::{CreateVariant, Variant};
use storyframe_generation::{DispatchOutcome, GenerationClient, GenerationRequest};
use storyframe_pipeline::batch::BatchOptions;
use storyframe_pipeline::store::{AssetStore, StoreResult, VariantStore};
use storyframe_pipeline::{
    FanOutOrchestrator, PipelineConfig, ProjectGenerator, RefinementManager, SelectionService,
    StuckJobRecovery, VariantResolver,
};
use storyframe_storage::{
    BlobPersister, BlobStore, BlobStoreError, FetchError, FetchedImage, ImageFetcher,
    PersistConfig, StoredBlob,
};

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

/// Strictly increasing timestamps so `updated_at` ordering is deterministic.
#[derive(Default)]
struct Clock {
    ticks: i64,
}

impl Clock {
    fn now(&mut self) -> Timestamp {
        self.ticks += 1;
        Utc::now() + chrono::Duration::microseconds(self.ticks)
    }
}

// ---------------------------------------------------------------------------
// Variant store
// ---------------------------------------------------------------------------

#[derive(Default)]
struct VariantState {
    rows: Vec<Variant>,
    next_id: DbId,
    clock: Clock,
}

/// [`VariantStore`] over a `Vec`. Uses the trait's default two-step
/// `select_exclusive`, so selection races are possible and repaired.
#[derive(Default)]
pub struct MemoryVariantStore {
    state: Mutex<VariantState>,
    gate: Mutex<Option<ListGate>>,
}

/// Holds one `list_selected` call until released.
#[derive(Clone, Default)]
pub struct ListGate {
    pub reached: Arc<Notify>,
    pub release: Arc<Notify>,
}

impl MemoryVariantStore {
    /// Pause the next `list_selected` call until `release` is notified.
    pub fn pause_next_list_selected(&self) -> ListGate {
        let gate = ListGate::default();
        *self.gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn get(&self, id: DbId) -> Variant {
        self.state
            .lock()
            .unwrap()
            .rows
            .iter()
            .find(|v| v.id == id)
            .cloned()
            .expect("variant exists")
    }

    pub fn all(&self) -> Vec<Variant> {
        self.state.lock().unwrap().rows.clone()
    }

    /// Shift a variant's creation time into the past.
    pub fn backdate(&self, id: DbId, minutes: i64) {
        let mut state = self.state.lock().unwrap();
        let row = state.rows.iter_mut().find(|v| v.id == id).unwrap();
        row.created_at -= chrono::Duration::minutes(minutes);
    }

    /// Write a row directly, bypassing every transition check.
    pub fn put(&self, variant: Variant) {
        let mut state = self.state.lock().unwrap();
        let now = state.clock.now();
        if let Some(row) = state.rows.iter_mut().find(|v| v.id == variant.id) {
            *row = Variant {
                updated_at: now,
                ..variant
            };
        }
    }

    fn update<F>(&self, id: DbId, apply: F) -> Option<Variant>
    where
        F: FnOnce(&mut Variant) -> bool,
    {
        let mut state = self.state.lock().unwrap();
        let now = state.clock.now();
        let row = state.rows.iter_mut().find(|v| v.id == id)?;
        if !apply(row) {
            return None;
        }
        row.updated_at = now;
        Some(row.clone())
    }
}

fn in_slot(v: &Variant, key: &AssetKey) -> bool {
    v.asset_type == key.asset_type && v.asset_id == key.asset_id && v.sub_type == key.sub_type
}

#[async_trait]
impl VariantStore for MemoryVariantStore {
    async fn create(&self, input: &CreateVariant) -> StoreResult<Variant> {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let now = state.clock.now();
        let variant = Variant {
            id: state.next_id,
            asset_type: input.asset_type,
            asset_id: input.asset_id,
            sub_type: input.sub_type.clone(),
            model: input.model.clone(),
            prompt: input.prompt.clone(),
            image_url: String::new(),
            storage_path: String::new(),
            status: VariantStatus::Generating,
            is_selected: false,
            generation_order: input.generation_order,
            parent_variant_id: input.parent_variant_id,
            job_id: None,
            error_message: None,
            created_at: now,
            updated_at: now,
        };
        state.rows.push(variant.clone());
        Ok(variant)
    }

    async fn find(&self, id: DbId) -> StoreResult<Option<Variant>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .rows
            .iter()
            .find(|v| v.id == id)
            .cloned())
    }

    async fn find_by_job_id(&self, job_id: &str) -> StoreResult<Option<Variant>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .rows
            .iter()
            .find(|v| v.job_id.as_deref() == Some(job_id))
            .cloned())
    }

    async fn list_by_key(&self, key: &AssetKey) -> StoreResult<Vec<Variant>> {
        let mut rows: Vec<Variant> = self
            .state
            .lock()
            .unwrap()
            .rows
            .iter()
            .filter(|v| in_slot(v, key))
            .cloned()
            .collect();
        rows.sort_by_key(|v| (v.generation_order, v.id));
        Ok(rows)
    }

    async fn list_by_asset(
        &self,
        asset_type: AssetType,
        asset_id: DbId,
    ) -> StoreResult<Vec<Variant>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .rows
            .iter()
            .filter(|v| v.asset_type == asset_type && v.asset_id == asset_id)
            .cloned()
            .collect())
    }

    async fn list_selected(&self, key: &AssetKey) -> StoreResult<Vec<Variant>> {
        let gate = self.gate.lock().unwrap().take();
        if let Some(gate) = gate {
            gate.reached.notify_one();
            gate.release.notified().await;
        }
        let mut rows: Vec<Variant> = self
            .state
            .lock()
            .unwrap()
            .rows
            .iter()
            .filter(|v| in_slot(v, key) && v.is_selected)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(b.id.cmp(&a.id)));
        Ok(rows)
    }

    async fn max_generation_order(&self, key: &AssetKey) -> StoreResult<Option<i32>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .rows
            .iter()
            .filter(|v| in_slot(v, key))
            .map(|v| v.generation_order)
            .max())
    }

    async fn set_job_id(&self, id: DbId, job_id: &str) -> StoreResult<bool> {
        Ok(self
            .update(id, |v| {
                if v.status != VariantStatus::Generating {
                    return false;
                }
                v.job_id = Some(job_id.to_string());
                true
            })
            .is_some())
    }

    async fn mark_ready(
        &self,
        id: DbId,
        image_url: &str,
        storage_path: &str,
    ) -> StoreResult<Option<Variant>> {
        Ok(self.update(id, |v| {
            if v.status != VariantStatus::Generating {
                return false;
            }
            v.status = VariantStatus::Ready;
            v.image_url = image_url.to_string();
            v.storage_path = storage_path.to_string();
            v.error_message = None;
            true
        }))
    }

    async fn mark_failed(&self, id: DbId, error_message: &str) -> StoreResult<Option<Variant>> {
        Ok(self.update(id, |v| {
            if v.status != VariantStatus::Generating {
                return false;
            }
            v.status = VariantStatus::Failed;
            v.error_message = Some(error_message.to_string());
            true
        }))
    }

    async fn deselect_siblings(&self, key: &AssetKey, keep_id: DbId) -> StoreResult<u64> {
        let mut state = self.state.lock().unwrap();
        let now = state.clock.now();
        let mut count = 0;
        for v in state
            .rows
            .iter_mut()
            .filter(|v| in_slot(v, key) && v.is_selected && v.id != keep_id)
        {
            v.is_selected = false;
            v.status = VariantStatus::Ready;
            v.updated_at = now;
            count += 1;
        }
        Ok(count)
    }

    async fn mark_selected(&self, id: DbId) -> StoreResult<Option<Variant>> {
        Ok(self.update(id, |v| {
            if !v.status.is_selectable() {
                return false;
            }
            v.is_selected = true;
            v.status = VariantStatus::Selected;
            true
        }))
    }

    async fn revert_selection(&self, id: DbId) -> StoreResult<Option<Variant>> {
        Ok(self.update(id, |v| {
            if !v.is_selected {
                return false;
            }
            v.is_selected = false;
            v.status = VariantStatus::Ready;
            true
        }))
    }

    async fn delete(&self, id: DbId, force: bool) -> StoreResult<bool> {
        let mut state = self.state.lock().unwrap();
        let before = state.rows.len();
        state.rows.retain(|v| !(v.id == id && (force || !v.is_selected)));
        Ok(state.rows.len() < before)
    }

    async fn list_stuck(
        &self,
        scope: Option<&AssetKey>,
        cutoff: Timestamp,
    ) -> StoreResult<Vec<Variant>> {
        let mut rows: Vec<Variant> = self
            .state
            .lock()
            .unwrap()
            .rows
            .iter()
            .filter(|v| v.status == VariantStatus::Generating && v.created_at < cutoff)
            .filter(|v| scope.map_or(true, |key| in_slot(v, key)))
            .cloned()
            .collect();
        rows.sort_by_key(|v| v.created_at);
        Ok(rows)
    }

    async fn fail_if_stuck(
        &self,
        id: DbId,
        cutoff: Timestamp,
        error_message: &str,
    ) -> StoreResult<bool> {
        Ok(self
            .update(id, |v| {
                if v.status != VariantStatus::Generating || v.created_at >= cutoff {
                    return false;
                }
                v.status = VariantStatus::Failed;
                v.error_message = Some(error_message.to_string());
                true
            })
            .is_some())
    }

    async fn lineage(&self, id: DbId) -> StoreResult<Vec<Variant>> {
        let state = self.state.lock().unwrap();
        let mut chain = Vec::new();
        let mut next = Some(id);
        while let Some(current) = next {
            let Some(v) = state.rows.iter().find(|v| v.id == current) else {
                break;
            };
            chain.push(v.clone());
            next = v.parent_variant_id;
        }
        Ok(chain)
    }
}

// ---------------------------------------------------------------------------
// Asset store
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryAssetStore {
    assets: Mutex<Vec<Asset>>,
    images: Mutex<HashMap<AssetKey, AssetImage>>,
}

impl MemoryAssetStore {
    pub fn add(&self, project_id: DbId, asset_type: AssetType, name: &str) -> Asset {
        let mut assets = self.assets.lock().unwrap();
        let asset = Asset {
            id: assets.len() as DbId + 100,
            project_id,
            asset_type,
            name: name.to_string(),
            visual_description: Some(format!("{name}, detailed")),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assets.push(asset.clone());
        asset
    }

    pub fn image(&self, key: &AssetKey) -> Option<AssetImage> {
        self.images.lock().unwrap().get(key).cloned()
    }

    pub fn status(&self, key: &AssetKey) -> Option<AssetStatus> {
        self.image(key).map(|i| i.generation_status)
    }

    fn upsert<F: FnOnce(&mut AssetImage)>(&self, key: &AssetKey, apply: F) {
        let mut images = self.images.lock().unwrap();
        let image = images.entry(key.clone()).or_insert_with(|| AssetImage {
            id: key.asset_id,
            asset_id: key.asset_id,
            sub_type: key.sub_type.clone(),
            approved_image_url: None,
            approved_image_path: None,
            approved_at: None,
            generation_status: AssetStatus::Pending,
            selected_model: None,
            updated_at: Utc::now(),
        });
        apply(image);
        image.updated_at = Utc::now();
    }
}

#[async_trait]
impl AssetStore for MemoryAssetStore {
    async fn get_asset(&self, asset_type: AssetType, id: DbId) -> StoreResult<Option<Asset>> {
        Ok(self
            .assets
            .lock()
            .unwrap()
            .iter()
            .find(|a| a.id == id && a.asset_type == asset_type)
            .cloned())
    }

    async fn list_project_assets(&self, project_id: DbId) -> StoreResult<Vec<Asset>> {
        Ok(self
            .assets
            .lock()
            .unwrap()
            .iter()
            .filter(|a| a.project_id == project_id)
            .cloned()
            .collect())
    }

    async fn find_image(&self, key: &AssetKey) -> StoreResult<Option<AssetImage>> {
        Ok(self.image(key))
    }

    async fn set_approved(&self, key: &AssetKey, approved: &ApprovedImage) -> StoreResult<()> {
        self.upsert(key, |image| {
            image.approved_image_url = Some(approved.image_url.clone());
            image.approved_image_path = Some(approved.storage_path.clone());
            image.approved_at = Some(Utc::now());
            image.selected_model = Some(approved.model.clone());
            image.generation_status = AssetStatus::Approved;
        });
        Ok(())
    }

    async fn clear_approved(&self, key: &AssetKey) -> StoreResult<()> {
        self.upsert(key, |image| {
            image.approved_image_url = None;
            image.approved_image_path = None;
            image.approved_at = None;
            image.selected_model = None;
            image.generation_status = AssetStatus::Pending;
        });
        Ok(())
    }

    async fn set_generation_status(
        &self,
        key: &AssetKey,
        status: AssetStatus,
    ) -> StoreResult<()> {
        self.upsert(key, |image| {
            if image.generation_status != AssetStatus::Approved {
                image.generation_status = status;
            }
        });
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Generation Service
// ---------------------------------------------------------------------------

/// Scripted behaviour for one model.
#[derive(Debug, Clone)]
pub enum Script {
    /// Return the image synchronously.
    Sync { job_id: String, image_url: String },
    /// Accept the job; the image arrives on a callback.
    Async { job_id: String },
    /// Fail the dispatch.
    Reject(String),
    /// Lose the answer after the request was sent.
    Unconfirmed(String),
    /// Never answer within any test timeout.
    Hang,
}

#[derive(Default)]
pub struct ScriptedGenerator {
    scripts: Mutex<HashMap<String, Script>>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedGenerator {
    pub fn script(&self, model: &str, script: Script) {
        self.scripts
            .lock()
            .unwrap()
            .insert(model.to_string(), script);
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl GenerationClient for ScriptedGenerator {
    async fn dispatch(&self, request: &GenerationRequest) -> DispatchOutcome {
        self.requests.lock().unwrap().push(request.clone());
        let script = self
            .scripts
            .lock()
            .unwrap()
            .get(&request.model)
            .cloned()
            .unwrap_or(Script::Async {
                job_id: format!("job-{}", request.variant_id),
            });

        match script {
            Script::Sync { job_id, image_url } => DispatchOutcome::Completed {
                job_id: Some(job_id),
                image_url,
            },
            Script::Async { job_id } => DispatchOutcome::Accepted { job_id },
            Script::Reject(error) => DispatchOutcome::Rejected { error },
            Script::Unconfirmed(error) => DispatchOutcome::Unconfirmed { error },
            Script::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                DispatchOutcome::Rejected {
                    error: "unreachable".to_string(),
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Blob store and fetcher
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryBlobStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    uploads: Mutex<Vec<String>>,
    deletes: Mutex<Vec<String>>,
}

impl MemoryBlobStore {
    pub fn upload_count(&self) -> usize {
        self.uploads.lock().unwrap().len()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deletes.lock().unwrap().clone()
    }

    pub fn contains(&self, bucket: &str, path: &str) -> bool {
        self.objects
            .lock()
            .unwrap()
            .contains_key(&format!("{bucket}/{path}"))
    }
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
        self.objects.lock().unwrap().insert(object.clone(), bytes);
        self.uploads.lock().unwrap().push(object.clone());
        Ok(StoredBlob {
            url: format!("https://cdn.test/{object}"),
            path: path.to_string(),
        })
    }

    async fn delete(&self, bucket: &str, path: &str) -> Result<(), BlobStoreError> {
        let object = format!("{bucket}/{path}");
        self.objects.lock().unwrap().remove(&object);
        self.deletes.lock().unwrap().push(object);
        Ok(())
    }
}

/// Serves a valid PNG-sized payload for every URL except those marked broken.
#[derive(Default)]
pub struct StaticFetcher {
    broken: Mutex<HashMap<String, FetchError>>,
    calls: Mutex<Vec<String>>,
}

impl StaticFetcher {
    pub fn break_url(&self, url: &str, error: FetchError) {
        self.broken.lock().unwrap().insert(url.to_string(), error);
    }

    pub fn calls_for(&self, url: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|u| u.as_str() == url)
            .count()
    }
}

#[async_trait]
impl ImageFetcher for StaticFetcher {
    async fn fetch(&self, url: &str, _timeout: Duration) -> Result<FetchedImage, FetchError> {
        self.calls.lock().unwrap().push(url.to_string());
        if let Some(error) = self.broken.lock().unwrap().get(url) {
            return Err(error.clone());
        }
        Ok(FetchedImage {
            bytes: vec![0x89; 4096],
            content_type: Some("image/png".to_string()),
        })
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub const PROJECT_ID: DbId = 1;

pub struct Harness {
    pub variants: Arc<MemoryVariantStore>,
    pub assets: Arc<MemoryAssetStore>,
    pub generator: Arc<ScriptedGenerator>,
    pub blobs: Arc<MemoryBlobStore>,
    pub fetcher: Arc<StaticFetcher>,
    pub resolver: Arc<VariantResolver>,
    pub fanout: Arc<FanOutOrchestrator>,
    pub selection: Arc<SelectionService>,
    pub refinement: Arc<RefinementManager>,
    pub recovery: Arc<StuckJobRecovery>,
    pub project: Arc<ProjectGenerator>,
}

/// Config with zero persistence delays and short timeouts.
pub fn test_config() -> PipelineConfig {
    PipelineConfig {
        fanout_task_timeout: Duration::from_millis(200),
        project_batch: BatchOptions {
            max_concurrent: 2,
            per_task_timeout: Some(Duration::from_secs(5)),
            cooldown: Duration::ZERO,
        },
        callback_url: Some("https://api.test/api/v1/webhooks/generation".to_string()),
        persist: PersistConfig {
            retry_initial_delay: Duration::ZERO,
            retry_backoff_base: Duration::from_millis(1),
            ..PersistConfig::default()
        },
        ..PipelineConfig::default()
    }
}

pub fn harness() -> Harness {
    harness_with(test_config())
}

pub fn harness_with(config: PipelineConfig) -> Harness {
    let variants = Arc::new(MemoryVariantStore::default());
    let assets = Arc::new(MemoryAssetStore::default());
    let generator = Arc::new(ScriptedGenerator::default());
    let blobs = Arc::new(MemoryBlobStore::default());
    let fetcher = Arc::new(StaticFetcher::default());

    let variant_store: Arc<dyn VariantStore> = variants.clone();
    let asset_store: Arc<dyn AssetStore> = assets.clone();
    let persister = Arc::new(BlobPersister::new(
        fetcher.clone(),
        blobs.clone(),
        config.persist.clone(),
    ));

    let resolver = Arc::new(VariantResolver::new(
        variant_store.clone(),
        asset_store.clone(),
        persister.clone(),
    ));
    let fanout = Arc::new(FanOutOrchestrator::new(
        variant_store.clone(),
        asset_store.clone(),
        generator.clone(),
        resolver.clone(),
        &config,
    ));
    let selection = Arc::new(SelectionService::new(
        variant_store.clone(),
        asset_store.clone(),
        persister,
    ));
    let refinement = Arc::new(RefinementManager::new(
        variant_store.clone(),
        asset_store.clone(),
        fanout.clone(),
    ));
    let recovery = Arc::new(StuckJobRecovery::new(
        variant_store.clone(),
        asset_store.clone(),
        config.stuck_thresholds.clone(),
    ));
    let project = Arc::new(ProjectGenerator::new(
        variant_store,
        asset_store,
        fanout.clone(),
        &config,
    ));

    Harness {
        variants,
        assets,
        generator,
        blobs,
        fetcher,
        resolver,
        fanout,
        selection,
        refinement,
        recovery,
        project,
    }
}

pub fn models(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| n.to_string()).collect()
}

impl Harness {
    /// Add a character and return its portrait slot.
    pub fn character(&self, name: &str) -> AssetKey {
        let asset = self.assets.add(PROJECT_ID, AssetType::Character, name);
        AssetKey::new(AssetType::Character, asset.id, Some("portrait".to_string()))
    }

    /// Create `n` ready variants in `key` via synchronous dispatches.
    pub async fn ready_variants(&self, key: &AssetKey, n: usize) -> Vec<DbId> {
        let names: Vec<String> = (0..n).map(|i| format!("model-{i}")).collect();
        for (i, name) in names.iter().enumerate() {
            self.generator.script(
                name,
                Script::Sync {
                    job_id: format!("sync-{}-{i}", key.asset_id),
                    image_url: format!("https://tmp.test/{}/{i}.png", key.asset_id),
                },
            );
        }
        let ids = self
            .fanout
            .generate_variants(
                key,
                &names,
                &storyframe_core::prompt::FixedPrompt("a portrait".into()),
                &Default::default(),
                Default::default(),
            )
            .await
            .unwrap();
        for id in &ids {
            assert_eq!(self.variants.get(*id).status, VariantStatus::Ready);
        }
        ids
    }
}
