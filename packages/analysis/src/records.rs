//! Classification records produced by the model, and the response parser.

use serde::{Deserialize, Serialize};

use crate::error::AnalysisError;

/// How much of an unparseable response to carry in the error for diagnosis.
const ERROR_EXCERPT_LEN: usize = 300;

fn default_occurrences() -> u32 {
    1
}

/// A detected technology (framework, host, CDN, platform, library).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TechStackItem {
    pub name: String,
    pub category: String,
    #[serde(default)]
    pub confidence: f32,
    #[serde(default)]
    pub evidence: Option<String>,
    #[serde(default = "default_occurrences")]
    pub occurrences: u32,
}

/// One analytics event observed in captured traffic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsEvent {
    pub provider: String,
    pub event_name: String,
    #[serde(default)]
    pub page_url: String,
    #[serde(default)]
    pub request_url: String,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default = "default_occurrences")]
    pub occurrences: u32,
}

/// What one model batch yields.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchClassification {
    #[serde(default)]
    pub tech_stack: Vec<TechStackItem>,
    #[serde(default)]
    pub analytics_events: Vec<AnalyticsEvent>,
}

impl BatchClassification {
    pub fn is_empty(&self) -> bool {
        self.tech_stack.is_empty() && self.analytics_events.is_empty()
    }
}

/// Parse a model response into classifications.
///
/// Markdown code fencing is stripped first. The top level must be a JSON
/// object; individually malformed array entries are skipped with a warning
/// rather than failing the batch, so one bad element never throws away the
/// rest. An unparseable top level is a batch-fatal error carrying an excerpt.
pub fn parse_model_response(response: &str) -> Result<BatchClassification, AnalysisError> {
    let cleaned = ai_client::strip_code_blocks(response);

    let value: serde_json::Value =
        serde_json::from_str(cleaned).map_err(|_| AnalysisError::MalformedResponse {
            excerpt: excerpt(cleaned),
        })?;

    let Some(object) = value.as_object() else {
        return Err(AnalysisError::MalformedResponse {
            excerpt: excerpt(cleaned),
        });
    };

    let mut result = BatchClassification::default();

    if let Some(items) = object.get("tech_stack").and_then(|v| v.as_array()) {
        for item in items {
            match serde_json::from_value::<TechStackItem>(item.clone()) {
                Ok(mut parsed) => {
                    parsed.confidence = parsed.confidence.clamp(0.0, 1.0);
                    result.tech_stack.push(parsed);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping malformed tech stack entry");
                }
            }
        }
    }

    if let Some(events) = object.get("analytics_events").and_then(|v| v.as_array()) {
        for event in events {
            match serde_json::from_value::<AnalyticsEvent>(event.clone()) {
                Ok(parsed) => result.analytics_events.push(parsed),
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping malformed analytics event entry");
                }
            }
        }
    }

    Ok(result)
}

fn excerpt(text: &str) -> String {
    ai_client::truncate_to_char_boundary(text, ERROR_EXCERPT_LEN).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_json() {
        let response = r#"{
            "tech_stack": [{"name": "Shopify", "category": "ecommerce", "confidence": 0.9}],
            "analytics_events": [{"provider": "GA4", "event_name": "page_view"}]
        }"#;

        let parsed = parse_model_response(response).unwrap();
        assert_eq!(parsed.tech_stack.len(), 1);
        assert_eq!(parsed.tech_stack[0].occurrences, 1);
        assert_eq!(parsed.analytics_events.len(), 1);
        assert_eq!(parsed.analytics_events[0].event_name, "page_view");
    }

    #[test]
    fn test_parse_strips_markdown_fencing() {
        let response = "```json\n{\"tech_stack\": [], \"analytics_events\": []}\n```";
        let parsed = parse_model_response(response).unwrap();
        assert!(parsed.is_empty());
    }

    #[test]
    fn test_parse_failure_carries_excerpt() {
        let err = parse_model_response("I could not classify this traffic.").unwrap_err();
        match err {
            AnalysisError::MalformedResponse { excerpt } => {
                assert!(excerpt.contains("could not classify"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_parse_skips_malformed_entries() {
        let response = r#"{
            "tech_stack": [
                {"name": "Shopify", "category": "ecommerce"},
                {"bogus": true},
                42
            ],
            "analytics_events": [
                {"provider": "GA4", "event_name": "purchase"},
                "not an object"
            ]
        }"#;

        let parsed = parse_model_response(response).unwrap();
        assert_eq!(parsed.tech_stack.len(), 1);
        assert_eq!(parsed.analytics_events.len(), 1);
    }

    #[test]
    fn test_parse_clamps_confidence() {
        let response = r#"{"tech_stack": [{"name": "X", "category": "y", "confidence": 7.5}]}"#;
        let parsed = parse_model_response(response).unwrap();
        assert_eq!(parsed.tech_stack[0].confidence, 1.0);
    }

    #[test]
    fn test_parse_rejects_non_object_top_level() {
        assert!(parse_model_response(r#"["a", "b"]"#).is_err());
    }
}
