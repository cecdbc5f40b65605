//! Cache key generation.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub value: String,
    pub method: Option<String>,
    pub path: Option<String>,
}

impl CacheKey {
    pub fn new(value: impl Into<String>) -> Self {
        Self { value: value.into(), method: None, path: None }
    }
    pub fn with_method(mut self, method: impl Into<String>) -> Self { self.method = Some(method.into()); self }
    pub fn with_path(mut self, path: impl Into<String>) -> Self { self.path = Some(path.into()); self }
    pub fn as_str(&self) -> &str { &self.value }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { write!(f, "{}", self.value) }
}

impl From<&str> for CacheKey { fn from(s: &str) -> Self { Self::new(s) } }
impl From<String> for CacheKey { fn from(s: String) -> Self { Self::new(s) } }

/// Derives cache keys from a request method and URL.
///
/// The URL is normalized first: the fragment is dropped and query parameters are
/// sorted, so `?b=2&a=1` and `?a=1&b=2` share a key.
pub struct CacheKeyGenerator {
    max_key_len: usize,
    salt: Option<String>,
}

impl CacheKeyGenerator {
    pub const DEFAULT_MAX_KEY_LEN: usize = 256;

    pub fn new() -> Self { Self { max_key_len: Self::DEFAULT_MAX_KEY_LEN, salt: None } }
    pub fn with_max_key_len(mut self, len: usize) -> Self { self.max_key_len = len; self }
    pub fn with_salt(mut self, salt: impl Into<String>) -> Self { self.salt = Some(salt.into()); self }

    pub fn generate(&self, method: &str, url: &str) -> CacheKey {
        let method = method.to_ascii_uppercase();
        let (path, normalized) = normalize_url(url);
        let mut value = match self.salt {
            Some(ref s) => format!("{}:{}:{}", s, method, normalized),
            None => format!("{}:{}", method, normalized),
        };
        if value.len() > self.max_key_len {
            let mut hasher = Sha256::new();
            hasher.update(value.as_bytes());
            let hash: String = hasher.finalize().iter().map(|b| format!("{:02x}", b)).collect();
            value = format!("{}:sha256:{}", method, hash);
        }
        CacheKey::new(value).with_method(method).with_path(path)
    }
}

impl Default for CacheKeyGenerator { fn default() -> Self { Self::new() } }

/// Returns `(path, path?sorted_query)`. Unparseable input is used verbatim.
fn normalize_url(raw: &str) -> (String, String) {
    let parsed = Url::parse(raw).or_else(|_| Url::parse("http://localhost").and_then(|base| base.join(raw)));
    let Ok(url) = parsed else {
        return (raw.to_string(), raw.to_string());
    };
    let path = url.path().to_string();
    let mut pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
    if pairs.is_empty() {
        return (path.clone(), path);
    }
    pairs.sort();
    let query = url::form_urlencoded::Serializer::new(String::new()).extend_pairs(pairs).finish();
    (path.clone(), format!("{}?{}", path, query))
}

/// Path component of a request URL, used as the metrics endpoint.
pub fn request_path(raw: &str) -> String {
    normalize_url(raw).0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_order_is_normalized() {
        let gen = CacheKeyGenerator::new();
        let a = gen.generate("get", "/api/portfolios?page=2&limit=10#top");
        let b = gen.generate("GET", "/api/portfolios?limit=10&page=2");
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "GET:/api/portfolios?limit=10&page=2");
        assert_eq!(a.path.as_deref(), Some("/api/portfolios"));
    }

    #[test]
    fn test_method_is_part_of_key() {
        let gen = CacheKeyGenerator::new();
        assert_ne!(gen.generate("GET", "/a"), gen.generate("HEAD", "/a"));
    }

    #[test]
    fn test_absolute_url_keeps_path_only() {
        let gen = CacheKeyGenerator::new();
        let key = gen.generate("GET", "https://example.com/api/items?b=1&a=2");
        assert_eq!(key.as_str(), "GET:/api/items?a=2&b=1");
    }

    #[test]
    fn test_long_keys_are_hashed() {
        let gen = CacheKeyGenerator::new().with_max_key_len(32);
        let url = format!("/search?q={}", "x".repeat(100));
        let key = gen.generate("GET", &url);
        assert!(key.as_str().starts_with("GET:sha256:"));
        assert_eq!(key.as_str().len(), "GET:sha256:".len() + 64);
        assert_eq!(key, gen.generate("GET", &url));
    }

    #[test]
    fn test_salt_prefixes_key() {
        let gen = CacheKeyGenerator::new().with_salt("v2");
        assert_eq!(gen.generate("GET", "/a").as_str(), "v2:GET:/a");
    }

    #[test]
    fn test_request_path() {
        assert_eq!(request_path("/api/users?id=1"), "/api/users");
        assert_eq!(request_path("https://example.com/x/y?z"), "/x/y");
    }
}
