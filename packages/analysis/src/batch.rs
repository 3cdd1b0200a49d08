//! Token-budget-aware batch construction.
//!
//! Converts an unbounded list of captured calls into bounded JSON payloads
//! safe to send to the model: static assets are dropped, POST bodies are
//! truncated per host class, and calls are packed greedily under a token
//! ceiling with a hard safety valve above it.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

use crawler::NetworkCall;
use retrieval::HostClassifier;

/// Marker appended to truncated bodies so the model can tell.
pub const TRUNCATION_MARKER: &str = "…[truncated]";

/// File extensions that never carry analytics or tech signal.
const STATIC_ASSET_PATTERN: &str = r"(?i)\.(png|jpe?g|gif|webp|avif|svg|ico|bmp|css|woff2?|ttf|otf|eot|js|mjs|map|mp3|mp4|webm|ogg|wav|avi|mov|zip|gz|tar|rar|7z|pdf)$";

fn static_asset_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(STATIC_ASSET_PATTERN).expect("static asset pattern compiles"))
}

/// Batch construction tunables.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Soft per-batch ceiling, prompt overhead included
    pub max_batch_tokens: usize,
    /// Fixed estimate for instructions around the payload
    pub prompt_overhead_tokens: usize,
    /// Absolute bound; a batch over this is re-trimmed before submission
    pub hard_ceiling_tokens: usize,
    /// Body budget applied during an emergency re-trim
    pub emergency_body_cap: usize,
    /// POST-body cap for analytics-classified hosts
    pub analytics_body_cap: usize,
    /// POST-body cap for everything else
    pub default_body_cap: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_batch_tokens: 12_000,
            prompt_overhead_tokens: 800,
            hard_ceiling_tokens: 40_000,
            emergency_body_cap: 100,
            analytics_body_cap: 1_800,
            default_body_cap: 400,
        }
    }
}

/// The slice of a call that goes to the model.
#[derive(Debug, Clone, Serialize)]
pub struct CallPayload {
    pub page_url: String,
    pub url: String,
    pub method: String,
    pub host: String,
    pub pathname: String,
    pub query: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_data: Option<String>,
}

/// One bounded group of payloads.
#[derive(Debug, Clone)]
pub struct Batch {
    pub payloads: Vec<CallPayload>,
    /// Estimate including prompt overhead
    pub estimated_tokens: usize,
}

impl Batch {
    /// JSON the model receives.
    pub fn serialize(&self) -> String {
        serde_json::to_string(&self.payloads).unwrap_or_else(|_| "[]".to_string())
    }
}

/// Rough token estimate: one token per four characters.
pub fn estimate_tokens(chars: usize) -> usize {
    chars.div_ceil(4)
}

/// Whether a call is static-asset noise to drop before batching.
pub fn is_static_asset(call: &NetworkCall) -> bool {
    static_asset_regex().is_match(&call.pathname)
}

fn truncate_body(body: &str, cap: usize) -> String {
    if body.len() <= cap {
        return body.to_string();
    }
    let mut truncated = ai_client::truncate_to_char_boundary(body, cap).to_string();
    truncated.push_str(TRUNCATION_MARKER);
    truncated
}

fn payload_for(call: &NetworkCall, classifier: &HostClassifier, config: &BatchConfig) -> CallPayload {
    let cap = if classifier.is_analytics(&call.host) {
        config.analytics_body_cap
    } else {
        config.default_body_cap
    };

    CallPayload {
        page_url: call.page_url.clone(),
        url: call.url.clone(),
        method: call.method.clone(),
        host: call.host.clone(),
        pathname: call.pathname.clone(),
        query: call.query_params.clone(),
        post_data: call.post_data.as_deref().map(|b| truncate_body(b, cap)),
    }
}

fn payload_tokens(payload: &CallPayload) -> usize {
    let serialized_len = serde_json::to_string(payload).map(|s| s.len()).unwrap_or(0);
    estimate_tokens(serialized_len)
}

/// Partition calls into batches under the configured token ceiling.
///
/// Greedy accumulation: a batch closes when the next call would push it past
/// the soft ceiling. A single call too large for any batch still gets its
/// own batch rather than being dropped, then the hard-ceiling valve re-trims
/// it aggressively.
pub fn build_batches(
    calls: &[NetworkCall],
    classifier: &HostClassifier,
    config: &BatchConfig,
) -> Vec<Batch> {
    let mut batches = Vec::new();
    let mut current: Vec<CallPayload> = Vec::new();
    let mut current_tokens = config.prompt_overhead_tokens;
    let mut dropped_assets = 0usize;

    for call in calls {
        if is_static_asset(call) {
            dropped_assets += 1;
            continue;
        }

        let payload = payload_for(call, classifier, config);
        let tokens = payload_tokens(&payload);

        if !current.is_empty() && current_tokens + tokens > config.max_batch_tokens {
            batches.push(close_batch(current, current_tokens, config));
            current = Vec::new();
            current_tokens = config.prompt_overhead_tokens;
        }

        current_tokens += tokens;
        current.push(payload);
    }

    if !current.is_empty() {
        batches.push(close_batch(current, current_tokens, config));
    }

    tracing::debug!(
        batches = batches.len(),
        dropped_assets,
        "Batch construction complete"
    );

    batches
}

/// Apply the hard-ceiling safety valve and seal the batch.
fn close_batch(mut payloads: Vec<CallPayload>, estimated_tokens: usize, config: &BatchConfig) -> Batch {
    let serialized_tokens =
        estimate_tokens(serde_json::to_string(&payloads).map(|s| s.len()).unwrap_or(0))
            + config.prompt_overhead_tokens;

    if serialized_tokens > config.hard_ceiling_tokens {
        tracing::warn!(
            estimated_tokens = serialized_tokens,
            hard_ceiling = config.hard_ceiling_tokens,
            "Batch exceeds hard ceiling, re-trimming bodies"
        );
        for payload in &mut payloads {
            if let Some(body) = &payload.post_data {
                payload.post_data = Some(truncate_body(body, config.emergency_body_cap));
            }
        }
        let retrimmed =
            estimate_tokens(serde_json::to_string(&payloads).map(|s| s.len()).unwrap_or(0))
                + config.prompt_overhead_tokens;
        return Batch {
            payloads,
            estimated_tokens: retrimmed,
        };
    }

    Batch {
        payloads,
        estimated_tokens,
    }
}
