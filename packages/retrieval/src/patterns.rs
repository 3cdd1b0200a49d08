//! Host classification pattern tables.
//!
//! Buckets a request host into analytics, tech-stack, or other traffic.
//! Kept as an ordered list of (category, pattern) pairs evaluated first
//! match wins, so deployments can extend the tables without code changes.

use regex::Regex;

/// Traffic category a host falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostCategory {
    /// Analytics, tag-management, and marketing pixels
    Analytics,
    /// Hosting, CDN, framework, and platform infrastructure
    TechStack,
    /// Everything else
    Other,
}

/// Ordered host-pattern table; first matching rule decides the category.
#[derive(Debug, Clone)]
pub struct HostClassifier {
    rules: Vec<(HostCategory, Regex)>,
}

impl HostClassifier {
    /// Build a classifier from (category, pattern) pairs.
    ///
    /// Patterns that fail to compile are dropped with a warning rather than
    /// failing construction.
    pub fn new(rules: Vec<(HostCategory, &str)>) -> Self {
        let rules = rules
            .into_iter()
            .filter_map(|(category, pattern)| match Regex::new(pattern) {
                Ok(regex) => Some((category, regex)),
                Err(e) => {
                    tracing::warn!(pattern, error = %e, "Dropping invalid host pattern");
                    None
                }
            })
            .collect();
        Self { rules }
    }

    /// Classify a host; unmatched hosts are `Other`.
    pub fn classify(&self, host: &str) -> HostCategory {
        for (category, regex) in &self.rules {
            if regex.is_match(host) {
                return *category;
            }
        }
        HostCategory::Other
    }

    pub fn is_analytics(&self, host: &str) -> bool {
        self.classify(host) == HostCategory::Analytics
    }
}

impl Default for HostClassifier {
    /// Practical default tables covering the major analytics providers and
    /// hosting/CDN platforms.
    fn default() -> Self {
        Self::new(vec![
            (
                HostCategory::Analytics,
                r"(?i)(google-analytics|googletagmanager|analytics\.google|doubleclick|segment\.(io|com)|mixpanel|amplitude|heap(analytics)?\.(io|com)|hotjar|fullstory|matomo|plausible\.io|snowplow|posthog|rudderstack|braze|klaviyo|customer\.io|intercom\.io|facebook\.(com|net)|connect\.facebook|bat\.bing|clarity\.ms|tiktok\.com|snapchat\.com|linkedin\.com/px|ads\.)",
            ),
            (
                HostCategory::TechStack,
                r"(?i)(cloudfront\.net|cloudflare|akamai|fastly|vercel\.(app|com)|netlify|herokuapp|amazonaws\.com|googleapis\.com|gstatic\.com|azureedge|shopify|wp\.com|wordpress|hubspot|jsdelivr|unpkg|cdnjs|typekit|fonts\.net|sentry\.io|newrelic|datadoghq)",
            ),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_classifies_analytics_hosts() {
        let classifier = HostClassifier::default();
        assert_eq!(
            classifier.classify("www.google-analytics.com"),
            HostCategory::Analytics
        );
        assert_eq!(classifier.classify("api.segment.io"), HostCategory::Analytics);
        assert_eq!(classifier.classify("cdn.mixpanel.com"), HostCategory::Analytics);
    }

    #[test]
    fn test_default_classifies_tech_hosts() {
        let classifier = HostClassifier::default();
        assert_eq!(
            classifier.classify("d1234.cloudfront.net"),
            HostCategory::TechStack
        );
        assert_eq!(classifier.classify("cdn.shopify.com"), HostCategory::TechStack);
    }

    #[test]
    fn test_unmatched_host_is_other() {
        let classifier = HostClassifier::default();
        assert_eq!(classifier.classify("api.example.com"), HostCategory::Other);
    }

    #[test]
    fn test_first_match_wins() {
        let classifier = HostClassifier::new(vec![
            (HostCategory::TechStack, r"special\.example\.com"),
            (HostCategory::Analytics, r"example\.com"),
        ]);
        assert_eq!(
            classifier.classify("special.example.com"),
            HostCategory::TechStack
        );
        assert_eq!(classifier.classify("www.example.com"), HostCategory::Analytics);
    }

    #[test]
    fn test_invalid_pattern_dropped() {
        let classifier = HostClassifier::new(vec![
            (HostCategory::Analytics, r"(unclosed"),
            (HostCategory::TechStack, r"cdn\."),
        ]);
        assert_eq!(classifier.classify("cdn.example.com"), HostCategory::TechStack);
    }
}
