//! Sequential batch submission with retry, cancellation, and durable
//! per-batch persistence.
//!
//! Batches run one at a time: each batch's results must be stored before the
//! next begins, so a crash or cancellation keeps partial progress. One bad
//! batch never aborts the run.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use ai_client::AiError;
use crawler::{NetworkCall, SessionId};
use retrieval::HostClassifier;

use crate::batch::{build_batches, Batch, BatchConfig};
use crate::consolidate::consolidate_session;
use crate::error::{AnalysisError, Result};
use crate::model::ClassifierModel;
use crate::records::parse_model_response;
use crate::stores::ClassificationStore;

/// Retry tunables for model calls.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Attempts per batch before its error is terminal
    pub max_attempts: u32,
    /// Backoff base for API and parse failures
    pub base_backoff: Duration,
    /// Backoff base for network-class failures; longer because transport
    /// problems rarely clear instantly
    pub network_backoff: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_secs(1),
            network_backoff: Duration::from_secs(2),
        }
    }
}

/// How an analysis run ended.
#[derive(Debug, Clone, Default)]
pub struct AnalysisReport {
    pub batches_total: usize,
    pub batches_completed: usize,
    pub batches_failed: usize,
    pub cancelled: bool,
    pub tech_count: usize,
    pub analytics_count: usize,
}

/// Drives batches of captured calls through the classification model.
pub struct AnalysisRunner<M, S> {
    model: M,
    store: S,
    classifier: HostClassifier,
    batch_config: BatchConfig,
    config: RunnerConfig,
}

impl<M, S> AnalysisRunner<M, S>
where
    M: ClassifierModel,
    S: ClassificationStore,
{
    pub fn new(model: M, store: S) -> Self {
        Self {
            model,
            store,
            classifier: HostClassifier::default(),
            batch_config: BatchConfig::default(),
            config: RunnerConfig::default(),
        }
    }

    pub fn with_batch_config(mut self, batch_config: BatchConfig) -> Self {
        self.batch_config = batch_config;
        self
    }

    pub fn with_config(mut self, config: RunnerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    /// Classify `calls` and consolidate the session's records.
    ///
    /// Cancellation is cooperative and checked at batch boundaries only; a
    /// batch in flight always finishes and persists.
    pub async fn run(
        &self,
        session_id: SessionId,
        calls: &[NetworkCall],
        cancel: CancellationToken,
    ) -> Result<AnalysisReport> {
        if calls.is_empty() {
            return Err(AnalysisError::NoData);
        }

        let batches = build_batches(calls, &self.classifier, &self.batch_config);
        let mut report = AnalysisReport {
            batches_total: batches.len(),
            ..Default::default()
        };

        tracing::info!(
            session_id = %session_id,
            calls = calls.len(),
            batches = batches.len(),
            "Starting analysis run"
        );

        for (batch_index, batch) in batches.iter().enumerate() {
            if cancel.is_cancelled() {
                report.cancelled = true;
                tracing::info!(
                    session_id = %session_id,
                    completed = report.batches_completed,
                    total = report.batches_total,
                    "Analysis cancelled"
                );
                break;
            }

            match self.submit_with_retry(batch, batch_index).await {
                Ok(parsed) => {
                    self.store.append_batch(session_id, &parsed).await?;
                    report.batches_completed += 1;
                    tracing::debug!(
                        batch = batch_index,
                        tech = parsed.tech_stack.len(),
                        events = parsed.analytics_events.len(),
                        "Batch classified and persisted"
                    );
                }
                Err(e) => {
                    report.batches_failed += 1;
                    tracing::warn!(
                        batch = batch_index,
                        error = %e,
                        "Batch failed terminally, continuing with remaining batches"
                    );
                }
            }
        }

        let consolidated = consolidate_session(&self.store, session_id).await?;
        report.tech_count = consolidated.tech_stack.len();
        report.analytics_count = consolidated.analytics_events.len();

        Ok(report)
    }

    async fn submit_with_retry(
        &self,
        batch: &Batch,
        batch_index: usize,
    ) -> Result<crate::records::BatchClassification> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.model.classify(batch).await {
                Ok(response) => return parse_model_response(&response),
                Err(e) if attempt < self.config.max_attempts => {
                    let base = if e.is_network() {
                        self.config.network_backoff
                    } else {
                        self.config.base_backoff
                    };
                    let delay = base * 2u32.pow(attempt - 1);
                    tracing::warn!(
                        batch = batch_index,
                        attempt,
                        max_attempts = self.config.max_attempts,
                        delay_ms = delay.as_millis(),
                        error = %e,
                        "Model call failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    return Err(AnalysisError::Model {
                        batch: batch_index,
                        source: e,
                    })
                }
            }
        }
    }
}
