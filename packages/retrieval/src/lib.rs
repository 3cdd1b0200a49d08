//! Semantic retrieval over captured network traffic.
//!
//! Captured requests are rendered to canonical text, embedded through a
//! two-tier cache, indexed per session, and retrieved concurrently against a
//! fixed menu of topic queries. Hits are bucketed by host-pattern tables
//! into analytics, tech-stack, and other relevant traffic.

pub mod embedder;
pub mod index;
pub mod orchestrator;
pub mod patterns;
pub mod text;

pub use embedder::{
    fallback_embedding, Embedder, EmbeddingBackend, OpenAiEmbeddings, VectorCache, EMBEDDING_DIM,
};
pub use index::{cosine_similarity, IndexedRecord, ScoredRecord, SimilarityIndex};
pub use orchestrator::{
    IndexStats, QueryFlavor, RetrievalBundle, RetrievalConfig, RetrievalOrchestrator, TopicQuery,
    TOPIC_QUERIES,
};
pub use patterns::{HostCategory, HostClassifier};
pub use text::{canonical_text, request_signature};
