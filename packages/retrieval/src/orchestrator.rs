//! Multi-query semantic retrieval over a session's captured traffic.
//!
//! A fixed menu of topic queries runs concurrently against the similarity
//! index; surviving hits are bucketed by host category and deduplicated.
//! Indexing of new captures runs first, in bounded waves of concurrent
//! embedding calls.

use std::collections::HashSet;

use futures::future::join_all;

use crawler::{NetworkCall, SessionId};

use crate::embedder::{Embedder, EmbeddingBackend};
use crate::index::{IndexedRecord, SimilarityIndex};
use crate::patterns::{HostCategory, HostClassifier};
use crate::text::request_signature;

/// Flavor of a topic query; decides its retrieval depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryFlavor {
    Analytics,
    TechStack,
    General,
}

/// One natural-language retrieval topic.
#[derive(Debug, Clone, Copy)]
pub struct TopicQuery {
    pub label: &'static str,
    pub text: &'static str,
    pub flavor: QueryFlavor,
}

/// The fixed retrieval menu. Analytics topics get generous K because
/// analytics traffic dominates by volume and must not be under-sampled.
pub const TOPIC_QUERIES: &[TopicQuery] = &[
    TopicQuery {
        label: "analytics-events",
        text: "analytics tracking events user behavior telemetry page views",
        flavor: QueryFlavor::Analytics,
    },
    TopicQuery {
        label: "marketing-tags",
        text: "tag manager marketing pixels conversion tracking advertising beacons",
        flavor: QueryFlavor::Analytics,
    },
    TopicQuery {
        label: "tech-stack",
        text: "tech stack framework hosting platform infrastructure",
        flavor: QueryFlavor::TechStack,
    },
    TopicQuery {
        label: "cdn-hosting",
        text: "content delivery network static assets hosting provider",
        flavor: QueryFlavor::TechStack,
    },
    TopicQuery {
        label: "backend-api",
        text: "backend api endpoints json data requests services",
        flavor: QueryFlavor::General,
    },
    TopicQuery {
        label: "monitoring",
        text: "error monitoring performance instrumentation session replay",
        flavor: QueryFlavor::General,
    },
];

/// Body prefix length used in analytics dedup keys: batched events can share
/// host, path, and query while differing only in the body.
const DEDUP_BODY_PREFIX: usize = 100;

/// Retrieval tunables.
#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    /// Top-K for analytics-flavored queries
    pub analytics_top_k: usize,
    /// Top-K for everything else
    pub default_top_k: usize,
    /// Similarity floor for hits on analytics-classified hosts. Looser:
    /// analytics payloads are semantically diffuse.
    pub analytics_threshold: f32,
    /// Similarity floor for all other hits
    pub default_threshold: f32,
    /// Concurrent embedding calls per indexing wave
    pub wave_size: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            analytics_top_k: 100,
            default_top_k: 30,
            analytics_threshold: 0.25,
            default_threshold: 0.45,
            wave_size: 4,
        }
    }
}

/// Result of an indexing pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct IndexStats {
    pub indexed: usize,
    pub skipped: usize,
}

/// Retrieval output, bucketed by host category and deduplicated.
#[derive(Debug, Clone, Default)]
pub struct RetrievalBundle {
    pub analytics: Vec<NetworkCall>,
    pub tech_stack: Vec<NetworkCall>,
    pub all_relevant: Vec<NetworkCall>,
}

impl RetrievalBundle {
    /// Every bucketed call, deduplicated across buckets.
    pub fn union(&self) -> Vec<NetworkCall> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for call in self
            .analytics
            .iter()
            .chain(&self.tech_stack)
            .chain(&self.all_relevant)
        {
            if seen.insert(analytics_dedup_key(call)) {
                out.push(call.clone());
            }
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.analytics.is_empty() && self.tech_stack.is_empty() && self.all_relevant.is_empty()
    }
}

/// Dedup identity that distinguishes POST bodies (by prefix).
fn analytics_dedup_key(call: &NetworkCall) -> String {
    let query = serde_json::to_string(&call.query_params).unwrap_or_default();
    let body = call
        .post_data
        .as_deref()
        .map(|b| ai_client::truncate_to_char_boundary(b, DEDUP_BODY_PREFIX))
        .unwrap_or("");
    format!("{}|{}|{}|{}", call.host, call.pathname, query, body)
}

/// Dedup identity for tech-stack hits: host and path only.
fn tech_dedup_key(call: &NetworkCall) -> String {
    format!("{}|{}", call.host, call.pathname)
}

/// Runs the indexing and retrieval passes for a session.
pub struct RetrievalOrchestrator<B> {
    embedder: Embedder<B>,
    index: SimilarityIndex,
    classifier: HostClassifier,
    config: RetrievalConfig,
}

impl<B: EmbeddingBackend> RetrievalOrchestrator<B> {
    pub fn new(embedder: Embedder<B>, classifier: HostClassifier) -> Self {
        Self {
            embedder,
            index: SimilarityIndex::new(),
            classifier,
            config: RetrievalConfig::default(),
        }
    }

    pub fn with_config(mut self, config: RetrievalConfig) -> Self {
        self.config = config;
        self
    }

    pub fn index(&self) -> &SimilarityIndex {
        &self.index
    }

    /// Embed and index captures not yet present in the session's index.
    ///
    /// Signatures are checked before any embedding call is spent, and
    /// embedding runs in waves of `wave_size` concurrent requests.
    pub async fn index_session(&self, session_id: SessionId, calls: &[NetworkCall]) -> IndexStats {
        let mut stats = IndexStats::default();
        let mut pending = Vec::new();
        let mut queued: HashSet<String> = HashSet::new();

        for call in calls {
            let signature = request_signature(call);
            if self.index.contains_signature(session_id, &signature)
                || !queued.insert(signature.clone())
            {
                stats.skipped += 1;
                continue;
            }
            pending.push((signature, call));
        }

        for wave in pending.chunks(self.config.wave_size) {
            let embedded = join_all(wave.iter().map(|(signature, call)| async move {
                let vector = self.embedder.embed_request(call).await;
                (signature.clone(), vector, (*call).clone())
            }))
            .await;

            for (signature, vector, call) in embedded {
                if self.index.insert(
                    session_id,
                    IndexedRecord {
                        signature,
                        vector,
                        call,
                    },
                ) {
                    stats.indexed += 1;
                } else {
                    stats.skipped += 1;
                }
            }
        }

        tracing::info!(
            session_id = %session_id,
            indexed = stats.indexed,
            skipped = stats.skipped,
            total = self.index.len(session_id),
            "Indexing pass complete"
        );

        stats
    }

    /// Run every topic query concurrently and merge the surviving hits.
    pub async fn retrieve(&self, session_id: SessionId) -> RetrievalBundle {
        let results = join_all(TOPIC_QUERIES.iter().map(|query| async move {
            let query_vector = self.embedder.embed_query(query.text).await;
            let k = match query.flavor {
                QueryFlavor::Analytics => self.config.analytics_top_k,
                _ => self.config.default_top_k,
            };
            let hits = self.index.search(session_id, &query_vector, k);
            tracing::debug!(
                session_id = %session_id,
                query = query.label,
                hits = hits.len(),
                "Topic query complete"
            );
            hits
        }))
        .await;

        let mut bundle = RetrievalBundle::default();
        let mut seen_analytics = HashSet::new();
        let mut seen_tech = HashSet::new();
        let mut seen_relevant = HashSet::new();

        for hit in results.into_iter().flatten() {
            let call = hit.record.call;
            let category = self.classifier.classify(&call.host);

            let threshold = if category == HostCategory::Analytics {
                self.config.analytics_threshold
            } else {
                self.config.default_threshold
            };
            if hit.score < threshold {
                continue;
            }

            match category {
                HostCategory::Analytics => {
                    if seen_analytics.insert(analytics_dedup_key(&call)) {
                        bundle.analytics.push(call);
                    }
                }
                HostCategory::TechStack => {
                    if seen_tech.insert(tech_dedup_key(&call)) {
                        bundle.tech_stack.push(call);
                    }
                }
                HostCategory::Other => {
                    if seen_relevant.insert(analytics_dedup_key(&call)) {
                        bundle.all_relevant.push(call);
                    }
                }
            }
        }

        tracing::info!(
            session_id = %session_id,
            analytics = bundle.analytics.len(),
            tech_stack = bundle.tech_stack.len(),
            other = bundle.all_relevant.len(),
            "Retrieval complete"
        );

        bundle
    }
}
