//! Offline-first wrapper around the story service.
//!
//! Writes go to the network when possible and fall back to the local store
//! plus the sync queue. Reads prefer the network and fall back to the mirror.

use std::sync::Arc;
use tracing::{debug, info, warn};

use super::types::{LoginResult, StoryDraft, StoryRecord};
use super::RemoteApi;
use crate::db::LocalStore;
use crate::error::{Result, SyncError};
use crate::sync::{Operation, OutboundRequest, SyncCoordinator};

/// Where returned data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
  /// Fresh data from the network
  Network,
  /// Network unavailable or failed; serving the local mirror
  Local,
}

/// Read result together with its source.
#[derive(Debug, Clone)]
pub struct Fetched<T> {
  pub data: T,
  pub source: Source,
}

impl<T> Fetched<T> {
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: Source::Network,
    }
  }

  pub fn from_local(data: T) -> Self {
    Self {
      data,
      source: Source::Local,
    }
  }
}

/// Outcome of publishing a story.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOutcome {
  /// The server accepted it; this is the authoritative copy.
  Published(StoryRecord),
  /// Saved locally, pending sync.
  SavedLocally {
    record: StoryRecord,
    operation_id: i64,
  },
}

/// Steps of the write path. Each call moves through at most both, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteStep {
  Network,
  OfflineSave,
}

/// Client facade handed to the UI layer.
#[derive(Clone)]
pub struct OfflineClient {
  api: Arc<dyn RemoteApi>,
  sync: SyncCoordinator,
  author: String,
}

impl OfflineClient {
  pub fn new(api: Arc<dyn RemoteApi>, sync: SyncCoordinator, author: impl Into<String>) -> Self {
    Self {
      api,
      sync,
      author: author.into(),
    }
  }

  fn store(&self) -> &LocalStore {
    self.sync.store()
  }

  pub fn sync(&self) -> &SyncCoordinator {
    &self.sync
  }

  pub async fn register(&self, name: &str, email: &str, password: &str) -> Result<String> {
    self.api.register(name, email, password).await
  }

  pub async fn login(&self, email: &str, password: &str) -> Result<LoginResult> {
    self.api.login(email, password).await
  }

  /// Publish a story, or save it for later when the network is not there.
  ///
  /// Any gateway failure while online, other than a rejected request, falls
  /// back to the offline save once; the fallback never goes back to the
  /// network.
  pub async fn create_story(&self, token: &str, draft: StoryDraft) -> Result<WriteOutcome> {
    draft.validate()?;
    let request = OutboundRequest::create_story(token, draft);

    let mut step = if self.sync.connectivity().is_online() {
      WriteStep::Network
    } else {
      WriteStep::OfflineSave
    };

    loop {
      match step {
        WriteStep::Network => match self.api.submit_story(&request).await {
          Ok(story) => {
            let record = self.store().put(story.into())?;
            info!(id = %record.id, "story published");
            return Ok(WriteOutcome::Published(record));
          }
          Err(e) if e.allows_offline_save() => {
            warn!(error = %e, "publish failed, saving locally");
            step = WriteStep::OfflineSave;
          }
          Err(e) => return Err(e),
        },
        WriteStep::OfflineSave => return self.save_offline(request),
      }
    }
  }

  fn save_offline(&self, request: OutboundRequest) -> Result<WriteOutcome> {
    let record = self
      .store()
      .put(request.body.to_local_input(&self.author))?;
    let operation = Operation::CreateStory {
      local_id: record.id.clone(),
      request,
    };

    let operation_id = match self.sync.enqueue(&operation) {
      Ok(id) => id,
      Err(e) => {
        // A local record must always have its queued submission.
        if let Err(cleanup) = self.store().delete(&record.id) {
          warn!(id = %record.id, error = %cleanup, "could not roll back local record");
        }
        return Err(e);
      }
    };
    info!(id = %record.id, operation_id, "story saved locally, pending sync");
    Ok(WriteOutcome::SavedLocally {
      record,
      operation_id,
    })
  }

  /// List stories.
  ///
  /// Online, the network answer is reconciled into the mirror and returned.
  /// Any gateway failure falls back to the mirror, as does
  /// `force_refresh`, which re-reads the mirror without a round-trip. The
  /// only error surfaced is `NoData`, when the mirror is empty too.
  pub async fn list_stories(
    &self,
    token: &str,
    force_refresh: bool,
  ) -> Result<Fetched<Vec<StoryRecord>>> {
    if self.sync.connectivity().is_online() && !force_refresh {
      match self.api.list_stories(token).await {
        Ok(stories) => {
          let mut records = Vec::with_capacity(stories.len());
          for story in stories {
            let fallback = story.clone();
            match self.store().reconcile(story)? {
              Some(record) => records.push(record),
              None => records.push(StoryRecord::from_remote(
                fallback,
                crate::db::now_rfc3339(),
              )),
            }
          }
          debug!(count = records.len(), "reconciled stories");
          return Ok(Fetched::from_network(records));
        }
        Err(e) => {
          warn!(error = %e, "listing failed, serving local mirror");
        }
      }
    }

    let records = self.store().get_all()?;
    if records.is_empty() {
      return Err(SyncError::NoData);
    }
    Ok(Fetched::from_local(records))
  }

  /// Remove a story from the local mirror. Missing ids are not an error.
  ///
  /// A story still waiting for sync takes its queued submission with it.
  pub fn delete_local(&self, id: &str) -> Result<bool> {
    self.store().delete_story(id)
  }
}
