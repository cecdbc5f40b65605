//! Framework-neutral request and response types.

use crate::cache::request_path;
use crate::Result;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
    Options,
    Other(String),
}

impl Method {
    pub fn as_str(&self) -> &str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
            Method::Options => "OPTIONS",
            Method::Other(m) => m,
        }
    }

    /// Only GET responses are cached.
    pub fn is_cacheable(&self) -> bool {
        matches!(self, Method::Get)
    }
}

impl FromStr for Method {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s.to_ascii_uppercase().as_str() {
            "GET" => Method::Get,
            "HEAD" => Method::Head,
            "POST" => Method::Post,
            "PUT" => Method::Put,
            "PATCH" => Method::Patch,
            "DELETE" => Method::Delete,
            "OPTIONS" => Method::Options,
            other => Method::Other(other.to_string()),
        })
    }
}

impl From<&str> for Method {
    fn from(s: &str) -> Self {
        match s.parse() {
            Ok(m) => m,
            Err(never) => match never {},
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Header map with case-insensitive names (stored lowercase).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Headers(BTreeMap<String, String>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn insert(&mut self, name: &str, value: impl Into<String>) {
        self.0.insert(name.to_ascii_lowercase(), value.into());
    }
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(&name.to_ascii_lowercase()).map(String::as_str)
    }
    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.0.remove(&name.to_ascii_lowercase())
    }
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(&name.to_ascii_lowercase())
    }
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
    pub fn len(&self) -> usize {
        self.0.len()
    }
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    /// Path and query, or an absolute URL.
    pub url: String,
    pub headers: Headers,
    /// Peer address as seen by the host server.
    pub remote_addr: Option<String>,
}

impl Request {
    pub fn new(method: impl Into<Method>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            headers: Headers::new(),
            remote_addr: None,
        }
    }
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::Get, url)
    }
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }
    pub fn with_remote_addr(mut self, addr: impl Into<String>) -> Self {
        self.remote_addr = Some(addr.into());
        self
    }
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }
    /// URL path without query string.
    pub fn path(&self) -> String {
        request_path(&self.url)
    }

    /// First value of query parameter `name`, percent-decoded.
    pub fn query_param(&self, name: &str) -> Option<String> {
        let url = Url::parse("http://localhost").ok()?.join(&self.url).ok()?;
        url.query_pairs()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
    }

    /// Best-effort caller address: forwarded-for chain, then real-ip, then peer.
    pub fn client_address(&self) -> Option<String> {
        self.header("x-forwarded-for")
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .or_else(|| self.header("x-real-ip").map(str::trim).filter(|v| !v.is_empty()))
            .map(str::to_string)
            .or_else(|| self.remote_addr.clone())
    }

    /// Whether the client advertised any content encoding besides identity.
    pub fn accepts_compression(&self) -> bool {
        self.header("accept-encoding").is_some_and(|v| {
            v.split(',')
                .map(|e| e.split(';').next().unwrap_or("").trim())
                .any(|e| !e.is_empty() && !e.eq_ignore_ascii_case("identity"))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub status: u16,
    pub headers: Headers,
    pub body: Bytes,
}

impl Response {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }
    pub fn ok(body: impl Into<Bytes>) -> Self {
        Self::new(200).with_body(body)
    }
    pub fn json<T: Serialize>(status: u16, value: &T) -> Result<Self> {
        let body = serde_json::to_vec(value)?;
        Ok(Self::new(status)
            .with_header("content-type", "application/json")
            .with_body(body))
    }
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
    pub fn body_json<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_parsing() {
        assert_eq!(Method::from("get"), Method::Get);
        assert_eq!(Method::from("PATCH"), Method::Patch);
        assert_eq!(Method::from("purge"), Method::Other("PURGE".into()));
        assert!(!Method::Head.is_cacheable());
        assert!(!Method::Post.is_cacheable());
        assert_eq!(Method::Delete.to_string(), "DELETE");
    }

    #[test]
    fn test_headers_case_insensitive() {
        let mut h = Headers::new();
        h.insert("X-Cache", "HIT");
        assert_eq!(h.get("x-cache"), Some("HIT"));
        assert!(h.contains("X-CACHE"));
        assert_eq!(h.remove("x-Cache").as_deref(), Some("HIT"));
        assert!(h.is_empty());
    }

    #[test]
    fn test_client_address_fallbacks() {
        let req = Request::get("/")
            .with_header("X-Forwarded-For", " 203.0.113.9 , 10.0.0.1")
            .with_remote_addr("10.0.0.2");
        assert_eq!(req.client_address().as_deref(), Some("203.0.113.9"));

        let req = Request::get("/").with_header("X-Real-IP", "198.51.100.4");
        assert_eq!(req.client_address().as_deref(), Some("198.51.100.4"));

        let req = Request::get("/").with_header("X-Forwarded-For", "").with_remote_addr("10.0.0.2");
        assert_eq!(req.client_address().as_deref(), Some("10.0.0.2"));

        assert_eq!(Request::get("/").client_address(), None);
    }

    #[test]
    fn test_accepts_compression() {
        assert!(Request::get("/").with_header("accept-encoding", "gzip, br;q=0.8").accepts_compression());
        assert!(!Request::get("/").with_header("accept-encoding", "identity").accepts_compression());
        assert!(!Request::get("/").accepts_compression());
    }

    #[test]
    fn test_response_json() {
        let resp = Response::json(201, &serde_json::json!({"id": 3})).unwrap();
        assert_eq!(resp.header("Content-Type"), Some("application/json"));
        assert!(resp.is_success());
        let v: serde_json::Value = resp.body_json().unwrap();
        assert_eq!(v["id"], 3);
        assert_eq!(Request::get("/api/x?y=1").path(), "/api/x");
        assert_eq!(
            Request::get("/admin?tag=port%20folios&tag=x").query_param("tag").as_deref(),
            Some("port folios")
        );
        assert_eq!(Request::get("https://h/a").query_param("tag"), None);
    }
}
