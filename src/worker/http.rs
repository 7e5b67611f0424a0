//! Request/response values seen by the worker, and the fetcher that produces them.

use async_trait::async_trait;
use reqwest::redirect::Policy;
use reqwest::Method;
use std::collections::BTreeMap;
use std::time::Duration;
use url::Url;

use crate::error::{Result, SyncError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub headers: BTreeMap<String, String>,
}

impl Request {
  pub fn new(method: Method, url: Url) -> Self {
    Self {
      method,
      url,
      headers: BTreeMap::new(),
    }
  }

  pub fn get(url: Url) -> Self {
    Self::new(Method::GET, url)
  }

  /// Identity used as the cache key: method plus full URL.
  pub fn cache_key(&self) -> String {
    use sha2::{Digest, Sha256};

    let mut hasher = Sha256::new();
    hasher.update(self.method.as_str().as_bytes());
    hasher.update(b" ");
    hasher.update(self.url.as_str().as_bytes());
    hex::encode(hasher.finalize())
  }
}

/// How a response relates to the page that asked for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseType {
  /// Same-origin response, fully readable.
  Basic,
  /// Cross-origin response.
  Cors,
}

impl ResponseType {
  pub fn as_str(&self) -> &'static str {
    match self {
      ResponseType::Basic => "basic",
      ResponseType::Cors => "cors",
    }
  }

  pub fn parse(s: &str) -> Option<Self> {
    match s {
      "basic" => Some(ResponseType::Basic),
      "cors" => Some(ResponseType::Cors),
      _ => None,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
  pub status: u16,
  pub kind: ResponseType,
  pub headers: BTreeMap<String, String>,
  pub body: Vec<u8>,
}

impl Response {
  pub fn new(status: u16, kind: ResponseType, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      kind,
      headers: BTreeMap::new(),
      body: body.into(),
    }
  }

  /// The only responses worth caching.
  pub fn is_cacheable(&self) -> bool {
    self.status == 200 && self.kind == ResponseType::Basic
  }
}

/// Performs network requests on behalf of the worker.
#[async_trait]
pub trait AssetFetcher: Send + Sync {
  /// `Err` only when no response arrived at all.
  async fn fetch(&self, request: Request) -> Result<Response>;
}

/// Fetcher backed by reqwest. Redirects are returned as-is, never followed.
pub struct HttpFetcher {
  client: reqwest::Client,
}

impl HttpFetcher {
  pub fn new(timeout: Duration) -> Result<Self> {
    let client = reqwest::Client::builder()
      .redirect(Policy::none())
      .timeout(timeout)
      .build()
      .map_err(|e| SyncError::Network(format!("Failed to create HTTP client: {}", e)))?;
    Ok(Self { client })
  }
}

#[async_trait]
impl AssetFetcher for HttpFetcher {
  async fn fetch(&self, request: Request) -> Result<Response> {
    let mut builder = self.client.request(request.method.clone(), request.url.clone());
    for (name, value) in &request.headers {
      builder = builder.header(name.as_str(), value.as_str());
    }
    let resp = builder
      .send()
      .await
      .map_err(|e| SyncError::Network(e.to_string()))?;

    let kind = if resp.url().origin() == request.url.origin() {
      ResponseType::Basic
    } else {
      ResponseType::Cors
    };
    let status = resp.status().as_u16();
    let headers = resp
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_string(), v.to_string()))
      })
      .collect();
    let body = resp
      .bytes()
      .await
      .map_err(|e| SyncError::Network(e.to_string()))?;

    Ok(Response {
      status,
      kind,
      headers,
      body: body.to_vec(),
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
  }

  #[test]
  fn test_cache_key_depends_on_method_and_url() {
    let get = Request::get(url("http://localhost:8080/app.css"));
    let post = Request::new(Method::POST, url("http://localhost:8080/app.css"));
    let other = Request::get(url("http://localhost:8080/app.js"));
    assert_eq!(get.cache_key(), get.clone().cache_key());
    assert_ne!(get.cache_key(), post.cache_key());
    assert_ne!(get.cache_key(), other.cache_key());
    assert_eq!(get.cache_key().len(), 64);
  }

  #[test]
  fn test_only_ok_basic_is_cacheable() {
    assert!(Response::new(200, ResponseType::Basic, "x").is_cacheable());
    assert!(!Response::new(200, ResponseType::Cors, "x").is_cacheable());
    assert!(!Response::new(304, ResponseType::Basic, "x").is_cacheable());
    assert!(!Response::new(302, ResponseType::Basic, "x").is_cacheable());
  }

  #[test]
  fn test_response_type_strings() {
    for kind in [ResponseType::Basic, ResponseType::Cors] {
      assert_eq!(ResponseType::parse(kind.as_str()), Some(kind));
    }
    assert_eq!(ResponseType::parse("opaque"), None);
  }
}
