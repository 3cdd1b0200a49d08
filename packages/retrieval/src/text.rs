//! Canonical text rendering and signatures for captured requests.
//!
//! The rendering is deterministic: the same logical request always produces
//! the same text, so its hash can serve as both an embedding cache key and a
//! per-session idempotency key.

use sha2::{Digest, Sha256};

use crawler::NetworkCall;

use crate::patterns::HostClassifier;

/// POST-body preview budget for analytics hosts. Analytics payloads batch
/// many events into one body, so they keep more context.
const ANALYTICS_BODY_PREVIEW: usize = 1000;

/// POST-body preview budget for everything else.
const DEFAULT_BODY_PREVIEW: usize = 250;

/// Body prefix length folded into the signature.
const SIGNATURE_BODY_PREFIX: usize = 200;

/// Headers worth embedding; the rest are noise.
const HEADER_WHITELIST: &[&str] = &["content-type", "referer", "origin", "x-requested-with"];

/// Render a request into the canonical text fed to the embedding model.
pub fn canonical_text(call: &NetworkCall, classifier: &HostClassifier) -> String {
    let budget = if classifier.is_analytics(&call.host) {
        ANALYTICS_BODY_PREVIEW
    } else {
        DEFAULT_BODY_PREVIEW
    };

    let query = serde_json::to_string(&call.query_params).unwrap_or_default();

    let mut text = format!(
        "host: {}\npath: {}\nmethod: {}\nquery: {}",
        call.host, call.pathname, call.method, query
    );

    if let Some(body) = &call.post_data {
        text.push_str("\nbody: ");
        text.push_str(truncate_chars(body, budget));
    }

    let mut headers: Vec<(&str, &str)> = call
        .headers
        .iter()
        .filter(|(k, _)| HEADER_WHITELIST.contains(&k.to_ascii_lowercase().as_str()))
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();
    headers.sort();
    for (key, value) in headers {
        text.push('\n');
        text.push_str(key);
        text.push_str(": ");
        text.push_str(value);
    }

    text
}

/// Stable identity of a logical request: sha256 over host, path, method,
/// canonical query, and a body prefix.
pub fn request_signature(call: &NetworkCall) -> String {
    let query = serde_json::to_string(&call.query_params).unwrap_or_default();
    let body_prefix = call
        .post_data
        .as_deref()
        .map(|b| truncate_chars(b, SIGNATURE_BODY_PREFIX))
        .unwrap_or("");

    let mut hasher = Sha256::new();
    hasher.update(call.host.as_bytes());
    hasher.update(b"|");
    hasher.update(call.pathname.as_bytes());
    hasher.update(b"|");
    hasher.update(call.method.as_bytes());
    hasher.update(b"|");
    hasher.update(query.as_bytes());
    hasher.update(b"|");
    hasher.update(body_prefix.as_bytes());
    hex::encode(hasher.finalize())
}

/// Truncate to at most `max_bytes`, respecting char boundaries.
fn truncate_chars(s: &str, max_bytes: usize) -> &str {
    ai_client::truncate_to_char_boundary(s, max_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use crawler::SessionId;
    use std::collections::{BTreeMap, HashMap};

    fn call(host: &str, path: &str, body: Option<&str>) -> NetworkCall {
        NetworkCall {
            session_id: SessionId::new(),
            page_url: "https://example.com/".to_string(),
            url: format!("https://{host}{path}"),
            method: "POST".to_string(),
            host: host.to_string(),
            pathname: path.to_string(),
            query_params: BTreeMap::new(),
            headers: HashMap::new(),
            post_data: body.map(String::from),
            request_id: "r".to_string(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_canonical_text_deterministic() {
        let classifier = HostClassifier::default();
        let a = call("api.example.com", "/v1/data", Some("payload"));
        let mut b = a.clone();
        b.session_id = SessionId::new();
        b.request_id = "other".to_string();

        assert_eq!(canonical_text(&a, &classifier), canonical_text(&b, &classifier));
    }

    #[test]
    fn test_analytics_hosts_keep_longer_bodies() {
        let classifier = HostClassifier::default();
        let long_body = "e".repeat(2000);

        let analytics = call("api.segment.io", "/v1/batch", Some(&long_body));
        let other = call("api.example.com", "/v1/batch", Some(&long_body));

        let analytics_text = canonical_text(&analytics, &classifier);
        let other_text = canonical_text(&other, &classifier);
        assert!(analytics_text.len() > other_text.len());
    }

    #[test]
    fn test_signature_ignores_request_identity() {
        let a = call("api.example.com", "/v1/data", Some("body"));
        let mut b = a.clone();
        b.session_id = SessionId::new();
        b.request_id = "different".to_string();
        b.page_url = "https://example.com/other".to_string();

        assert_eq!(request_signature(&a), request_signature(&b));
    }

    #[test]
    fn test_signature_distinguishes_bodies() {
        let a = call("api.example.com", "/v1/track", Some(r#"{"event":"a"}"#));
        let b = call("api.example.com", "/v1/track", Some(r#"{"event":"b"}"#));
        assert_ne!(request_signature(&a), request_signature(&b));
    }

    #[test]
    fn test_header_whitelist() {
        let classifier = HostClassifier::default();
        let mut c = call("api.example.com", "/v1/data", None);
        c.headers.insert("Content-Type".to_string(), "application/json".to_string());
        c.headers.insert("Cookie".to_string(), "secret=1".to_string());

        let text = canonical_text(&c, &classifier);
        assert!(text.contains("application/json"));
        assert!(!text.contains("secret=1"));
    }
}
