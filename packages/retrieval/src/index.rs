//! Session-scoped similarity index.
//!
//! Vectors are appended per session and searched with cosine similarity.
//! Search streams the records in fixed-size chunks through a bounded
//! min-heap (capacity 2k) instead of sorting the full set, which keeps
//! top-K retrieval cheap at tens of thousands of vectors per session.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::RwLock;

use crawler::{NetworkCall, SessionId};

/// Records are scanned in chunks of this size during search.
const SEARCH_CHUNK: usize = 1000;

/// One indexed request: its identity, vector, and the raw call.
#[derive(Debug, Clone)]
pub struct IndexedRecord {
    pub signature: String,
    pub vector: Vec<f32>,
    pub call: NetworkCall,
}

/// A search hit with its similarity score.
#[derive(Debug, Clone)]
pub struct ScoredRecord {
    pub score: f32,
    pub record: IndexedRecord,
}

/// Min-heap entry ordered by score; ties broken by insertion order, which is
/// arbitrary and deliberately unspecified.
struct HeapEntry {
    score: f32,
    seq: usize,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.score == other.score && self.seq == other.seq
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed: BinaryHeap is a max-heap, we need the minimum on top
        other
            .score
            .total_cmp(&self.score)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Cosine similarity; 0.0 for mismatched lengths or zero-norm vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

#[derive(Default)]
struct SessionIndex {
    records: Vec<IndexedRecord>,
    signatures: HashSet<String>,
}

/// Append-only vector index keyed by session.
#[derive(Default)]
pub struct SimilarityIndex {
    sessions: RwLock<HashMap<SessionId, SessionIndex>>,
}

impl SimilarityIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a record. Returns false (and stores nothing) when the signature
    /// is already indexed for the session: at most one embedding per
    /// logical request per session.
    pub fn insert(&self, session_id: SessionId, record: IndexedRecord) -> bool {
        let mut sessions = self.sessions.write().unwrap();
        let index = sessions.entry(session_id).or_default();
        if !index.signatures.insert(record.signature.clone()) {
            return false;
        }
        index.records.push(record);
        true
    }

    /// Whether a signature is already indexed. Checked before spending an
    /// embedding call on a request.
    pub fn contains_signature(&self, session_id: SessionId, signature: &str) -> bool {
        self.sessions
            .read()
            .unwrap()
            .get(&session_id)
            .map(|index| index.signatures.contains(signature))
            .unwrap_or(false)
    }

    /// Top-k records by cosine similarity to `query`, best first.
    pub fn search(&self, session_id: SessionId, query: &[f32], k: usize) -> Vec<ScoredRecord> {
        if k == 0 {
            return Vec::new();
        }

        let sessions = self.sessions.read().unwrap();
        let Some(index) = sessions.get(&session_id) else {
            return Vec::new();
        };

        let capacity = k * 2;
        let mut heap: BinaryHeap<HeapEntry> = BinaryHeap::with_capacity(capacity + 1);

        for chunk_start in (0..index.records.len()).step_by(SEARCH_CHUNK) {
            let chunk_end = (chunk_start + SEARCH_CHUNK).min(index.records.len());
            for seq in chunk_start..chunk_end {
                let score = cosine_similarity(query, &index.records[seq].vector);
                heap.push(HeapEntry { score, seq });
                if heap.len() > capacity {
                    heap.pop();
                }
            }
        }

        let mut entries: Vec<HeapEntry> = heap.into_vec();
        entries.sort_by(|a, b| b.score.total_cmp(&a.score));
        entries
            .into_iter()
            .take(k)
            .map(|entry| ScoredRecord {
                score: entry.score,
                record: index.records[entry.seq].clone(),
            })
            .collect()
    }

    /// Wipe a session before re-indexing, so stale vectors never linger.
    pub fn clear(&self, session_id: SessionId) {
        self.sessions.write().unwrap().remove(&session_id);
    }

    pub fn len(&self, session_id: SessionId) -> usize {
        self.sessions
            .read()
            .unwrap()
            .get(&session_id)
            .map(|index| index.records.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self, session_id: SessionId) -> bool {
        self.len(session_id) == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::BTreeMap;

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

    fn record(signature: &str, vector: Vec<f32>) -> IndexedRecord {
        IndexedRecord {
            signature: signature.to_string(),
            vector,
            call: call(&format!("/{signature}")),
        }
    }

    #[test]
    fn test_cosine_similarity_basics() {
        let a = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &[1.0, 0.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&a, &[0.0, 1.0, 0.0]).abs() < 1e-6);
        assert!((cosine_similarity(&a, &[-1.0, 0.0, 0.0]) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_mismatched_lengths_is_zero() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0, 0.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[0.0, 0.0]), 0.0);
    }

    #[test]
    fn test_duplicate_signature_rejected() {
        let index = SimilarityIndex::new();
        let session = SessionId::new();

        assert!(index.insert(session, record("sig-a", vec![1.0, 0.0])));
        assert!(!index.insert(session, record("sig-a", vec![0.0, 1.0])));
        assert_eq!(index.len(session), 1);
    }

    #[test]
    fn test_same_signature_allowed_across_sessions() {
        let index = SimilarityIndex::new();
        assert!(index.insert(SessionId::new(), record("sig-a", vec![1.0])));
        assert!(index.insert(SessionId::new(), record("sig-a", vec![1.0])));
    }

    #[test]
    fn test_search_matches_brute_force() {
        let index = SimilarityIndex::new();
        let session = SessionId::new();

        // Deterministic synthetic vectors spread over a plane
        let mut vectors = Vec::new();
        for i in 0..257usize {
            let angle = (i as f32) * 0.021;
            let vector = vec![angle.cos(), angle.sin(), 0.1];
            vectors.push(vector.clone());
            index.insert(session, record(&format!("sig-{i}"), vector));
        }

        let query = vec![1.0, 0.2, 0.0];
        let k = 7;
        let hits = index.search(session, &query, k);
        assert_eq!(hits.len(), k);

        let mut brute: Vec<(usize, f32)> = vectors
            .iter()
            .enumerate()
            .map(|(i, v)| (i, cosine_similarity(&query, v)))
            .collect();
        brute.sort_by(|a, b| b.1.total_cmp(&a.1));

        for (hit, (_, expected_score)) in hits.iter().zip(brute.iter()) {
            assert!((hit.score - expected_score).abs() < 1e-6);
        }
    }

    #[test]
    fn test_search_scoped_to_session() {
        let index = SimilarityIndex::new();
        let a = SessionId::new();
        let b = SessionId::new();
        index.insert(a, record("sig-a", vec![1.0, 0.0]));
        index.insert(b, record("sig-b", vec![1.0, 0.0]));

        let hits = index.search(a, &[1.0, 0.0], 10);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record.signature, "sig-a");
    }

    #[test]
    fn test_search_k_larger_than_index() {
        let index = SimilarityIndex::new();
        let session = SessionId::new();
        index.insert(session, record("sig-a", vec![1.0, 0.0]));

        assert_eq!(index.search(session, &[1.0, 0.0], 50).len(), 1);
        assert!(index.search(session, &[1.0, 0.0], 0).is_empty());
    }

    #[test]
    fn test_clear_wipes_session() {
        let index = SimilarityIndex::new();
        let session = SessionId::new();
        index.insert(session, record("sig-a", vec![1.0]));

        index.clear(session);

        assert!(index.is_empty(session));
        // Signature is reusable after the wipe
        assert!(index.insert(session, record("sig-a", vec![1.0])));
    }
}
