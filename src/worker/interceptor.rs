//! Cache-first request handling for same-origin traffic.

use reqwest::Method;
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

use super::cache_storage::AssetCache;
use super::http::{AssetFetcher, Request, Response, ResponseType};
use crate::config::AppConfig;
use crate::error::{Result, SyncError};

/// What the worker does with an intercepted request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interception {
  /// Not ours: let the request go to the network untouched.
  Passthrough,
  Respond(Response),
}

pub struct Interceptor {
  cache: Arc<AssetCache>,
  fetcher: Arc<dyn AssetFetcher>,
  origin: Url,
  version: String,
  api_path_prefix: String,
  fallback: Url,
}

impl Interceptor {
  pub fn new(
    cache: Arc<AssetCache>,
    fetcher: Arc<dyn AssetFetcher>,
    app: &AppConfig,
    version: &str,
  ) -> Result<Self> {
    let origin = Url::parse(&app.origin)
      .map_err(|e| SyncError::Validation(format!("Invalid app origin '{}': {}", app.origin, e)))?;
    let fallback = origin.join(&app.fallback_document).map_err(|e| {
      SyncError::Validation(format!(
        "Invalid fallback document '{}': {}",
        app.fallback_document, e
      ))
    })?;
    Ok(Self {
      cache,
      fetcher,
      origin,
      version: version.to_string(),
      api_path_prefix: app.api_path_prefix.clone(),
      fallback,
    })
  }

  /// Answer a same-origin request cache-first. Cache storage errors are
  /// logged and never fail the request.
  pub async fn handle(&self, request: &Request) -> Interception {
    if request.url.origin() != self.origin.origin() {
      return Interception::Passthrough;
    }

    match self.cache.match_request(request) {
      Ok(Some(cached)) => {
        debug!(url = %request.url, "cache hit");
        return Interception::Respond(cached);
      }
      Ok(None) => debug!(url = %request.url, "cache miss"),
      Err(e) => warn!(url = %request.url, error = %e, "cache lookup failed, going to network"),
    }

    match self.fetcher.fetch(request.clone()).await {
      Ok(response) => {
        if self.should_store(request, &response) {
          match self.cache.put(&self.version, request, &response) {
            Ok(()) => debug!(url = %request.url, cache = %self.version, "stored response"),
            Err(e) => warn!(url = %request.url, error = %e, "could not store response"),
          }
        }
        Interception::Respond(response)
      }
      Err(e) => {
        warn!(url = %request.url, error = %e, "fetch failed, serving fallback");
        Interception::Respond(self.fallback_response())
      }
    }
  }

  fn should_store(&self, request: &Request, response: &Response) -> bool {
    response.is_cacheable()
      && request.method == Method::GET
      && !request.url.as_str().contains(&self.api_path_prefix)
  }

  fn fallback_response(&self) -> Response {
    match self.cache.match_request(&Request::get(self.fallback.clone())) {
      Ok(Some(cached)) => return cached,
      Ok(None) => {}
      Err(e) => warn!(error = %e, "fallback document lookup failed"),
    }
    let mut response = Response::new(503, ResponseType::Basic, "Offline");
    response
      .headers
      .insert("content-type".into(), "text/plain".into());
    response
  }
}
