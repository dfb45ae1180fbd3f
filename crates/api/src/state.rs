use std::sync::Arc;

use storyframe_generation::GenerationClient;
use storyframe_pipeline::store::{AssetStore, PgAssetStore, PgVariantStore, VariantStore};
use storyframe_pipeline::{
    FanOutOrchestrator, ProjectGenerator, RefinementManager, SelectionService, StuckJobRecovery,
    VariantResolver,
};
use storyframe_storage::{BlobPersister, BlobStore, ImageFetcher};

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc` or is already `Clone`).
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub pool: storyframe_db::DbPool,
    pub config: Arc<ServerConfig>,
    pub variants: Arc<dyn VariantStore>,
    pub assets: Arc<dyn AssetStore>,
    pub fanout: Arc<FanOutOrchestrator>,
    pub selection: Arc<SelectionService>,
    pub refinement: Arc<RefinementManager>,
    pub recovery: Arc<StuckJobRecovery>,
    pub project: Arc<ProjectGenerator>,
}

impl AppState {
    /// Wire the pipeline services over PostgreSQL and the given external
    /// services.
    pub fn new(
        pool: storyframe_db::DbPool,
        config: ServerConfig,
        generator: Arc<dyn GenerationClient>,
        blobs: Arc<dyn BlobStore>,
        fetcher: Arc<dyn ImageFetcher>,
    ) -> Self {
        let pipeline = &config.pipeline;
        let variants: Arc<dyn VariantStore> = Arc::new(PgVariantStore::new(pool.clone()));
        let assets: Arc<dyn AssetStore> = Arc::new(PgAssetStore::new(pool.clone()));
        let persister = Arc::new(BlobPersister::new(fetcher, blobs, pipeline.persist.clone()));

        let resolver = Arc::new(VariantResolver::new(
            Arc::clone(&variants),
            Arc::clone(&assets),
            Arc::clone(&persister),
        ));
        let fanout = Arc::new(FanOutOrchestrator::new(
            Arc::clone(&variants),
            Arc::clone(&assets),
            generator,
            resolver,
            pipeline,
        ));
        let selection = Arc::new(SelectionService::new(
            Arc::clone(&variants),
            Arc::clone(&assets),
            persister,
        ));
        let refinement = Arc::new(RefinementManager::new(
            Arc::clone(&variants),
            Arc::clone(&assets),
            Arc::clone(&fanout),
        ));
        let recovery = Arc::new(StuckJobRecovery::new(
            Arc::clone(&variants),
            Arc::clone(&assets),
            pipeline.stuck_thresholds.clone(),
        ));
        let project = Arc::new(ProjectGenerator::new(
            Arc::clone(&variants),
            Arc::clone(&assets),
            Arc::clone(&fanout),
            pipeline,
        ));

        Self {
            pool,
            config: Arc::new(config),
            variants,
            assets,
            fanout,
            selection,
            refinement,
            recovery,
            project,
        }
    }
}
