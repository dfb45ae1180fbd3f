//! Variant generation and approval pipeline.
//!
//! Fan-out dispatch across models, dual-path result ingestion through a
//! single idempotent resolver, the selection state machine, refinement
//! chains, batched project runs and stuck-job recovery. All persistence
//! goes through the [`store`] seams so the pipeline runs against
//! PostgreSQL in production and in-memory stores in tests.

pub mod batch;
pub mod config;
pub mod error;
pub mod fanout;
pub mod project;
pub mod recovery;
pub mod refinement;
pub mod resolver;
pub mod selection;
pub mod store;

pub use config::PipelineConfig;
pub use error::{PipelineError, PipelineResult};
pub use fanout::FanOutOrchestrator;
pub use project::ProjectGenerator;
pub use recovery::StuckJobRecovery;
pub use refinement::RefinementManager;
pub use resolver::{ResolvePath, ResolveOutcome, VariantResolver};
pub use selection::SelectionService;
