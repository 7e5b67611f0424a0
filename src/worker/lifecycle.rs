//! Install and activate steps for the versioned app-shell cache.

use futures::future::try_join_all;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

use super::cache_storage::AssetCache;
use super::http::{AssetFetcher, Request};
use super::WorkerState;
use crate::config::AssetsConfig;
use crate::error::{Result, SyncError};

pub struct AssetCacheManager {
  cache: Arc<AssetCache>,
  fetcher: Arc<dyn AssetFetcher>,
  origin: Url,
  version: String,
  shell: Vec<String>,
}

impl AssetCacheManager {
  pub fn new(
    cache: Arc<AssetCache>,
    fetcher: Arc<dyn AssetFetcher>,
    origin: Url,
    assets: &AssetsConfig,
  ) -> Self {
    Self {
      cache,
      fetcher,
      origin,
      version: assets.version.clone(),
      shell: assets.shell.clone(),
    }
  }

  /// Name of the cache this build writes to.
  pub fn version(&self) -> &str {
    &self.version
  }

  /// Fetch every shell asset and store the set. All or nothing: a single
  /// failed or non-200 fetch leaves the cache untouched.
  pub async fn install(&self) -> Result<usize> {
    let requests = self
      .shell
      .iter()
      .map(|path| {
        self
          .origin
          .join(path)
          .map(Request::get)
          .map_err(|e| SyncError::Validation(format!("Invalid shell path '{}': {}", path, e)))
      })
      .collect::<Result<Vec<_>>>()?;

    let fetches = requests.into_iter().map(|request| {
      let fetcher = Arc::clone(&self.fetcher);
      async move {
        let response = fetcher.fetch(request.clone()).await?;
        if response.status != 200 {
          return Err(SyncError::Server {
            status: response.status,
            message: format!("Failed to fetch shell asset {}", request.url),
          });
        }
        debug!(url = %request.url, "fetched shell asset");
        Ok((request, response))
      }
    });

    let entries = match try_join_all(fetches).await {
      Ok(entries) => entries,
      Err(e) => {
        warn!(version = %self.version, error = %e, "install failed, nothing cached");
        return Err(e);
      }
    };

    self.cache.put_all(&self.version, &entries)?;
    info!(version = %self.version, assets = entries.len(), "app shell installed");
    Ok(entries.len())
  }

  /// Where a worker for this version resumes: a populated current cache means
  /// install already ran, and no other cache left means activation did too.
  pub fn restored_state(&self) -> Result<WorkerState> {
    if self.cache.entry_count(&self.version)? == 0 {
      return Ok(WorkerState::Parsed);
    }
    let names = self.cache.cache_names()?;
    if names.iter().all(|name| *name == self.version) {
      Ok(WorkerState::Active)
    } else {
      Ok(WorkerState::Installed)
    }
  }

  /// Delete every cache other than the current version. Returns the deleted names.
  pub fn activate(&self) -> Result<Vec<String>> {
    let mut deleted = Vec::new();
    for name in self.cache.cache_names()? {
      if name != self.version && self.cache.delete_cache(&name)? {
        info!(cache = %name, "deleted stale cache");
        deleted.push(name);
      }
    }
    Ok(deleted)
  }
}

#[cfg(test)]
pub(crate) mod testing {
  use async_trait::async_trait;
  use std::collections::{HashMap, HashSet};
  use std::sync::Mutex;

  use super::super::http::{AssetFetcher, Request, Response, ResponseType};
  use crate::error::{Result, SyncError};

  /// Fetcher answering from a fixed path table. Unknown paths are 404.
  #[derive(Default)]
  pub struct ScriptedFetcher {
    routes: Mutex<HashMap<String, Response>>,
    unreachable: Mutex<HashSet<String>>,
    offline: Mutex<bool>,
    calls: Mutex<Vec<Request>>,
  }

  impl ScriptedFetcher {
    pub fn route(self, path: &str, response: Response) -> Self {
      self.routes.lock().unwrap().insert(path.to_string(), response);
      self
    }

    pub fn serve(self, paths: &[&str]) -> Self {
      paths.iter().fold(self, |fetcher, path| {
        fetcher.route(path, Response::new(200, ResponseType::Basic, format!("asset {}", path)))
      })
    }

    pub fn fail_path(&self, path: &str) {
      self.unreachable.lock().unwrap().insert(path.to_string());
    }

    pub fn set_offline(&self, offline: bool) {
      *self.offline.lock().unwrap() = offline;
    }

    pub fn calls(&self) -> usize {
      self.calls.lock().unwrap().len()
    }
  }

  #[async_trait]
  impl AssetFetcher for ScriptedFetcher {
    async fn fetch(&self, request: Request) -> Result<Response> {
      self.calls.lock().unwrap().push(request.clone());
      let path = request.url.path().to_string();
      if *self.offline.lock().unwrap() || self.unreachable.lock().unwrap().contains(&path) {
        return Err(SyncError::Network("connection refused".into()));
      }
      Ok(
        self
          .routes
          .lock()
          .unwrap()
          .get(&path)
          .cloned()
          .unwrap_or_else(|| Response::new(404, ResponseType::Basic, "not found")),
      )
    }
  }
}
