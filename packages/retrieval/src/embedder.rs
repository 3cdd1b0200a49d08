//! Embedding generation with a two-tier cache and graceful fallback.
//!
//! Vectors are keyed by [`request_signature`], first through an in-memory
//! map, then a file-per-vector persistent cache. When the backend fails, a
//! deterministic pseudo-embedding derived from character codes keeps
//! retrieval working in degraded form instead of failing outright.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;

use crawler::NetworkCall;

use crate::patterns::HostClassifier;
use crate::text::{canonical_text, request_signature};

/// Dimensionality of all vectors in the system (text-embedding-3-small).
pub const EMBEDDING_DIM: usize = 1536;

const CACHE_MAGIC: &[u8; 4] = b"SV01";

/// Source of real embedding vectors.
///
/// Failures are recoverable: the embedder falls back to a local
/// pseudo-embedding, so implementations should not retry internally.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    async fn embed(
        &self,
        text: &str,
    ) -> Result<Vec<f32>, Box<dyn std::error::Error + Send + Sync>>;
}

/// OpenAI-backed embedding source.
pub struct OpenAiEmbeddings {
    client: ai_client::OpenAiClient,
    model: String,
}

impl OpenAiEmbeddings {
    pub fn new(client: ai_client::OpenAiClient) -> Self {
        Self {
            client,
            model: "text-embedding-3-small".to_string(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

#[async_trait]
impl EmbeddingBackend for OpenAiEmbeddings {
    async fn embed(
        &self,
        text: &str,
    ) -> Result<Vec<f32>, Box<dyn std::error::Error + Send + Sync>> {
        let vector = self.client.create_embedding(text, &self.model).await?;
        Ok(vector)
    }
}

/// File-per-vector persistent cache, sharded by the first hash bytes.
#[derive(Debug, Clone)]
pub struct VectorCache {
    base_dir: PathBuf,
}

impl VectorCache {
    pub fn new(base_dir: impl AsRef<Path>) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
        }
    }

    fn vector_path(&self, key: &str) -> PathBuf {
        let shard_a = key.get(0..2).unwrap_or("00");
        let shard_b = key.get(2..4).unwrap_or("00");
        self.base_dir
            .join(shard_a)
            .join(shard_b)
            .join(format!("{key}.bin"))
    }

    pub async fn get(&self, key: &str) -> Option<Vec<f32>> {
        let bytes = tokio::fs::read(self.vector_path(key)).await.ok()?;
        decode_vector(&bytes)
    }

    pub async fn put(&self, key: &str, vector: &[f32]) {
        let path = self.vector_path(key);
        if let Some(parent) = path.parent() {
            if tokio::fs::create_dir_all(parent).await.is_err() {
                return;
            }
        }
        let bytes = encode_vector(vector);
        let tmp = path.with_extension("bin.tmp");
        if tokio::fs::write(&tmp, &bytes).await.is_ok()
            && tokio::fs::rename(&tmp, &path).await.is_err()
        {
            let _ = tokio::fs::remove_file(&tmp).await;
        }
    }
}

fn encode_vector(vector: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + vector.len() * 4);
    out.extend_from_slice(CACHE_MAGIC);
    out.extend_from_slice(&(vector.len() as u32).to_le_bytes());
    for v in vector {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

fn decode_vector(bytes: &[u8]) -> Option<Vec<f32>> {
    if bytes.len() < 8 || &bytes[0..4] != CACHE_MAGIC {
        return None;
    }
    let dim = u32::from_le_bytes(bytes[4..8].try_into().ok()?) as usize;
    if dim != EMBEDDING_DIM || bytes.len() != 8 + dim * 4 {
        return None;
    }
    let mut vector = Vec::with_capacity(dim);
    for i in 0..dim {
        let start = 8 + i * 4;
        let val = f32::from_le_bytes(bytes[start..start + 4].try_into().ok()?);
        vector.push(val);
    }
    Some(vector)
}

/// Deterministic local stand-in for a failed embedding call.
///
/// Spreads character codes across the vector and unit-normalizes, so equal
/// texts stay equal and retrieval keeps returning ranked results.
pub fn fallback_embedding(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0f32; EMBEDDING_DIM];
    for (i, ch) in text.chars().enumerate() {
        let slot = (i + ch as usize) % EMBEDDING_DIM;
        vector[slot] += (ch as u32 % 255) as f32 / 255.0;
    }

    let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in &mut vector {
            *v /= norm;
        }
    } else {
        vector[0] = 1.0;
    }
    vector
}

/// Two-tier cached embedder over an [`EmbeddingBackend`].
pub struct Embedder<B> {
    backend: B,
    classifier: HostClassifier,
    memory: Mutex<HashMap<String, Vec<f32>>>,
    disk: Option<VectorCache>,
}

impl<B: EmbeddingBackend> Embedder<B> {
    pub fn new(backend: B, classifier: HostClassifier) -> Self {
        Self {
            backend,
            classifier,
            memory: Mutex::new(HashMap::new()),
            disk: None,
        }
    }

    /// Attach a persistent cache tier.
    pub fn with_disk_cache(mut self, cache: VectorCache) -> Self {
        self.disk = Some(cache);
        self
    }

    /// Embed a captured request. Infallible: backend errors degrade to the
    /// fallback vector.
    pub async fn embed_request(&self, call: &NetworkCall) -> Vec<f32> {
        let signature = request_signature(call);

        if let Some(vector) = self.memory.lock().unwrap().get(&signature).cloned() {
            return vector;
        }

        if let Some(disk) = &self.disk {
            if let Some(vector) = disk.get(&signature).await {
                self.memory
                    .lock()
                    .unwrap()
                    .insert(signature, vector.clone());
                return vector;
            }
        }

        let text = canonical_text(call, &self.classifier);
        self.embed_text_inner(&text, Some(&signature)).await
    }

    /// Embed free text (topic queries). Cached under the text's own hash.
    pub async fn embed_query(&self, text: &str) -> Vec<f32> {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        let key = hex::encode(hasher.finalize());

        if let Some(vector) = self.memory.lock().unwrap().get(&key).cloned() {
            return vector;
        }

        self.embed_text_inner(text, Some(&key)).await
    }

    async fn embed_text_inner(&self, text: &str, cache_key: Option<&str>) -> Vec<f32> {
        match self.backend.embed(text).await {
            Ok(vector) if vector.len() == EMBEDDING_DIM => {
                if let Some(key) = cache_key {
                    self.memory
                        .lock()
                        .unwrap()
                        .insert(key.to_string(), vector.clone());
                    if let Some(disk) = &self.disk {
                        disk.put(key, &vector).await;
                    }
                }
                vector
            }
            Ok(vector) => {
                tracing::warn!(
                    got = vector.len(),
                    expected = EMBEDDING_DIM,
                    "Embedding dimension mismatch, using fallback"
                );
                fallback_embedding(text)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Embedding call failed, using fallback");
                fallback_embedding(text)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use crawler::SessionId;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingBackend {
        calls: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl EmbeddingBackend for CountingBackend {
        async fn embed(
            &self,
            _text: &str,
        ) -> Result<Vec<f32>, Box<dyn std::error::Error + Send + Sync>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err("backend down".into());
            }
            Ok(vec![0.5; EMBEDDING_DIM])
        }
    }

    fn call(path: &str) -> NetworkCall {
        NetworkCall {
            session_id: SessionId::new(),
            page_url: "https://example.com/".to_string(),
            url: format!("https://api.example.com{path}"),
            method: "GET".to_string(),
            host: "api.example.com".to_string(),
            pathname: path.to_string(),
            query_params: BTreeMap::new(),
            headers: std::collections::HashMap::new(),
            post_data: None,
            request_id: "r".to_string(),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_memory_cache_prevents_repeat_calls() {
        let calls = Arc::new(AtomicUsize::new(0));
        let embedder = Embedder::new(
            CountingBackend {
                calls: calls.clone(),
                fail: false,
            },
            HostClassifier::default(),
        );

        let c = call("/v1/data");
        embedder.embed_request(&c).await;
        embedder.embed_request(&c).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fallback_on_backend_failure() {
        let embedder = Embedder::new(
            CountingBackend {
                calls: Arc::new(AtomicUsize::new(0)),
                fail: true,
            },
            HostClassifier::default(),
        );

        let vector = embedder.embed_request(&call("/v1/data")).await;
        assert_eq!(vector.len(), EMBEDDING_DIM);

        // Unit length
        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-3);
    }

    #[tokio::test]
    async fn test_fallback_deterministic() {
        let a = fallback_embedding("host: x\npath: /y");
        let b = fallback_embedding("host: x\npath: /y");
        let c = fallback_embedding("host: x\npath: /z");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[tokio::test]
    async fn test_disk_cache_survives_new_embedder() {
        let dir = tempfile::tempdir().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let c = call("/v1/data");

        {
            let embedder = Embedder::new(
                CountingBackend {
                    calls: calls.clone(),
                    fail: false,
                },
                HostClassifier::default(),
            )
            .with_disk_cache(VectorCache::new(dir.path()));
            embedder.embed_request(&c).await;
        }

        let embedder = Embedder::new(
            CountingBackend {
                calls: calls.clone(),
                fail: false,
            },
            HostClassifier::default(),
        )
        .with_disk_cache(VectorCache::new(dir.path()));
        embedder.embed_request(&c).await;

        // Second embedder hit the disk tier, not the backend
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_vector_encoding_roundtrip() {
        let vector = vec![0.25f32; EMBEDDING_DIM];
        let decoded = decode_vector(&encode_vector(&vector)).unwrap();
        assert_eq!(vector, decoded);
    }

    #[test]
    fn test_decode_rejects_bad_magic() {
        let mut bytes = encode_vector(&vec![0.25f32; EMBEDDING_DIM]);
        bytes[0] = b'X';
        assert!(decode_vector(&bytes).is_none());
    }
}
