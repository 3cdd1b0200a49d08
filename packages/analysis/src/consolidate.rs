//! Post-run consolidation of classification records.
//!
//! Per-batch records accumulate duplicates ("process everything, dedupe
//! later"). This pass merges them by natural key and replaces the raw
//! records with the consolidated set.

use std::collections::HashMap;

use crawler::SessionId;

use crate::error::Result;
use crate::records::{AnalyticsEvent, TechStackItem};
use crate::stores::{ClassificationStore, SessionClassifications};

/// Merge tech items by name+category: max confidence, summed occurrences.
pub fn consolidate_tech(items: Vec<TechStackItem>) -> Vec<TechStackItem> {
    let mut merged: HashMap<String, TechStackItem> = HashMap::new();
    let mut order: Vec<String> = Vec::new();

    for item in items {
        let key = format!(
            "{}|{}",
            item.name.trim().to_lowercase(),
            item.category.trim().to_lowercase()
        );
        match merged.get_mut(&key) {
            Some(existing) => {
                existing.confidence = existing.confidence.max(item.confidence);
                existing.occurrences += item.occurrences;
                if existing.evidence.is_none() {
                    existing.evidence = item.evidence;
                }
            }
            None => {
                order.push(key.clone());
                merged.insert(key, item);
            }
        }
    }

    order.into_iter().filter_map(|key| merged.remove(&key)).collect()
}

/// Merge analytics events by provider+event+request URL: summed occurrences.
pub fn consolidate_analytics(events: Vec<AnalyticsEvent>) -> Vec<AnalyticsEvent> {
    let mut merged: HashMap<String, AnalyticsEvent> = HashMap::new();
    let mut order: Vec<String> = Vec::new();

    for event in events {
        let key = format!(
            "{}|{}|{}",
            event.provider.trim().to_lowercase(),
            event.event_name.trim().to_lowercase(),
            event.request_url
        );
        match merged.get_mut(&key) {
            Some(existing) => {
                existing.occurrences += event.occurrences;
                if existing.notes.is_none() {
                    existing.notes = event.notes;
                }
            }
            None => {
                order.push(key.clone());
                merged.insert(key, event);
            }
        }
    }

    order.into_iter().filter_map(|key| merged.remove(&key)).collect()
}

/// Consolidate everything persisted for a session, in place.
pub async fn consolidate_session<S: ClassificationStore>(
    store: &S,
    session_id: SessionId,
) -> Result<SessionClassifications> {
    let raw = store.list(session_id).await?;
    let before = (raw.tech_stack.len(), raw.analytics_events.len());

    let consolidated = SessionClassifications {
        tech_stack: consolidate_tech(raw.tech_stack),
        analytics_events: consolidate_analytics(raw.analytics_events),
    };

    tracing::info!(
        session_id = %session_id,
        tech_before = before.0,
        tech_after = consolidated.tech_stack.len(),
        events_before = before.1,
        events_after = consolidated.analytics_events.len(),
        "Consolidated classification records"
    );

    store.replace(session_id, consolidated.clone()).await?;
    Ok(consolidated)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tech(name: &str, category: &str, confidence: f32) -> TechStackItem {
        TechStackItem {
            name: name.to_string(),
            category: category.to_string(),
            confidence,
            evidence: None,
            occurrences: 1,
        }
    }

    fn event(provider: &str, name: &str, request_url: &str) -> AnalyticsEvent {
        AnalyticsEvent {
            provider: provider.to_string(),
            event_name: name.to_string(),
            page_url: "https://example.com/".to_string(),
            request_url: request_url.to_string(),
            notes: None,
            occurrences: 1,
        }
    }

    #[test]
    fn test_tech_merge_takes_max_confidence_and_sums() {
        let merged = consolidate_tech(vec![
            tech("Shopify", "ecommerce", 0.7),
            tech("shopify", "Ecommerce", 0.9),
            tech("Vercel", "hosting", 0.8),
        ]);

        assert_eq!(merged.len(), 2);
        let shopify = merged.iter().find(|t| t.name.eq_ignore_ascii_case("shopify")).unwrap();
        assert_eq!(shopify.confidence, 0.9);
        assert_eq!(shopify.occurrences, 2);
    }

    #[test]
    fn test_same_name_different_category_stays_distinct() {
        let merged = consolidate_tech(vec![
            tech("Cloudflare", "cdn", 0.8),
            tech("Cloudflare", "dns", 0.6),
        ]);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn test_analytics_merge_counts_occurrences() {
        let merged = consolidate_analytics(vec![
            event("GA4", "page_view", "https://www.google-analytics.com/collect"),
            event("GA4", "page_view", "https://www.google-analytics.com/collect"),
            event("GA4", "purchase", "https://www.google-analytics.com/collect"),
        ]);

        assert_eq!(merged.len(), 2);
        let page_view = merged.iter().find(|e| e.event_name == "page_view").unwrap();
        assert_eq!(page_view.occurrences, 2);
    }

    #[test]
    fn test_analytics_distinct_request_urls_stay_distinct() {
        let merged = consolidate_analytics(vec![
            event("Segment", "track", "https://api.segment.io/v1/t?b=1"),
            event("Segment", "track", "https://api.segment.io/v1/t?b=2"),
        ]);
        assert_eq!(merged.len(), 2);
    }

    #[tokio::test]
    async fn test_consolidate_session_replaces_store_contents() {
        use crate::records::BatchClassification;
        use crate::stores::MemoryClassificationStore;

        let store = MemoryClassificationStore::new();
        let session = SessionId::new();

        for _ in 0..3 {
            store
                .append_batch(
                    session,
                    &BatchClassification {
                        tech_stack: vec![tech("Vercel", "hosting", 0.8)],
                        analytics_events: vec![event(
                            "GA4",
                            "page_view",
                            "https://www.google-analytics.com/collect",
                        )],
                    },
                )
                .await
                .unwrap();
        }

        let consolidated = consolidate_session(&store, session).await.unwrap();
        assert_eq!(consolidated.tech_stack.len(), 1);
        assert_eq!(consolidated.tech_stack[0].occurrences, 3);

        let stored = store.list(session).await.unwrap();
        assert_eq!(stored.tech_stack.len(), 1);
        assert_eq!(stored.analytics_events[0].occurrences, 3);
    }
}
