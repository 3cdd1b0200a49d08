//! Classification of captured traffic through an external model.
//!
//! Calls are packed into token-bounded batches, submitted sequentially with
//! retry and cooperative cancellation, persisted per batch, then
//! consolidated by natural key and exported as CSV.

pub mod batch;
pub mod consolidate;
pub mod error;
pub mod export;
pub mod model;
pub mod records;
pub mod runner;
pub mod stores;

pub use batch::{build_batches, estimate_tokens, is_static_asset, Batch, BatchConfig, CallPayload, TRUNCATION_MARKER};
pub use consolidate::{consolidate_analytics, consolidate_session, consolidate_tech};
pub use error::{AnalysisError, Result};
pub use export::{export_analytics_csv, export_calls_csv, export_tech_csv};
pub use model::{ClassifierModel, OpenAiClassifier};
pub use records::{parse_model_response, AnalyticsEvent, BatchClassification, TechStackItem};
pub use runner::{AnalysisReport, AnalysisRunner, RunnerConfig};
pub use stores::{
    ClassificationStore, JsonlClassificationStore, MemoryClassificationStore, SessionClassifications,
};
