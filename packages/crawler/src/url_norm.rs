//! URL normalization for crawl deduplication.
//!
//! Two URLs normalize equal iff they denote the same page for crawling
//! purposes: fragments are stripped and query parameters are rewritten in
//! lexicographic key order. The normalized string is the sole dedup identity
//! for the visited and discovered sets.

use url::Url;

/// Normalize a URL for deduplication.
///
/// Strips the fragment and sorts query pairs lexicographically by key
/// (ties broken by value), then rebuilds the query string.
pub fn normalize_url(url: &Url) -> String {
    let mut normalized = url.clone();
    normalized.set_fragment(None);

    let mut pairs: Vec<(String, String)> = normalized
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    if pairs.is_empty() {
        normalized.set_query(None);
    } else {
        pairs.sort();
        let mut rebuilt = normalized.clone();
        rebuilt.query_pairs_mut().clear().extend_pairs(&pairs);
        normalized = rebuilt;
    }

    normalized.to_string()
}

/// Whether two URLs share scheme, host, and port.
pub fn same_origin(a: &Url, b: &Url) -> bool {
    a.scheme() == b.scheme() && a.host_str() == b.host_str() && a.port_or_known_default() == b.port_or_known_default()
}

/// Whether a URL uses a crawlable scheme.
pub fn is_http(url: &Url) -> bool {
    matches!(url.scheme(), "http" | "https")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fragment_stripped() {
        let a = Url::parse("https://example.com/page#section").unwrap();
        let b = Url::parse("https://example.com/page").unwrap();
        assert_eq!(normalize_url(&a), normalize_url(&b));
    }

    #[test]
    fn test_query_order_irrelevant() {
        let a = Url::parse("https://example.com/p?b=2&a=1").unwrap();
        let b = Url::parse("https://example.com/p?a=1&b=2").unwrap();
        assert_eq!(normalize_url(&a), normalize_url(&b));
    }

    #[test]
    fn test_idempotent() {
        let urls = [
            "https://example.com/",
            "https://example.com/p?z=9&a=1#frag",
            "http://example.com:8080/x?q=hello%20world",
        ];
        for raw in urls {
            let url = Url::parse(raw).unwrap();
            let once = normalize_url(&url);
            let twice = normalize_url(&Url::parse(&once).unwrap());
            assert_eq!(once, twice, "normalization not idempotent for {}", raw);
        }
    }

    #[test]
    fn test_distinct_queries_stay_distinct() {
        let a = Url::parse("https://example.com/p?a=1").unwrap();
        let b = Url::parse("https://example.com/p?a=2").unwrap();
        assert_ne!(normalize_url(&a), normalize_url(&b));
    }

    #[test]
    fn test_same_origin() {
        let a = Url::parse("https://example.com/a").unwrap();
        let b = Url::parse("https://example.com/b?x=1").unwrap();
        let c = Url::parse("https://other.com/a").unwrap();
        let d = Url::parse("http://example.com/a").unwrap();

        assert!(same_origin(&a, &b));
        assert!(!same_origin(&a, &c));
        assert!(!same_origin(&a, &d));
    }

    #[test]
    fn test_is_http() {
        assert!(is_http(&Url::parse("https://example.com").unwrap()));
        assert!(is_http(&Url::parse("http://example.com").unwrap()));
        assert!(!is_http(&Url::parse("chrome://settings").unwrap()));
        assert!(!is_http(&Url::parse("file:///tmp/x").unwrap()));
    }
}
