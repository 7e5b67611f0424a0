//! Replays queued operations against the remote service.

use chrono::{DateTime, SecondsFormat, Utc};
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use super::backoff::Backoff;
use super::connectivity::Connectivity;
use super::queue::{Operation, QueueEntry};
use crate::api::RemoteApi;
use crate::config::SyncConfig;
use crate::db::LocalStore;
use crate::error::Result;

/// What one traversal did with each entry it visited.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
  /// Entry ids in the order traversal visited them.
  pub visited: Vec<i64>,
  pub synced: Vec<i64>,
  pub failed: Vec<i64>,
  /// Not attempted: still backing off, or an attempt is already in flight.
  pub deferred: Vec<i64>,
}

impl SyncReport {
  fn merge(&mut self, other: SyncReport) {
    self.visited.extend(other.visited);
    self.synced.extend(other.synced);
    self.failed.extend(other.failed);
    self.deferred.extend(other.deferred);
  }
}

enum Attempt {
  Synced,
  Failed,
}

/// Drives queue replay on enqueue and on connectivity restore.
///
/// Cheap to clone; all clones share the same in-flight bookkeeping.
#[derive(Clone)]
pub struct SyncCoordinator {
  inner: Arc<Inner>,
}

struct Inner {
  store: Arc<LocalStore>,
  api: Arc<dyn RemoteApi>,
  connectivity: Connectivity,
  backoff: Backoff,
  max_in_flight: usize,
  in_flight: Mutex<HashSet<i64>>,
  passes: Mutex<JoinSet<SyncReport>>,
}

impl SyncCoordinator {
  pub fn new(
    store: Arc<LocalStore>,
    api: Arc<dyn RemoteApi>,
    connectivity: Connectivity,
    config: &SyncConfig,
  ) -> Self {
    Self {
      inner: Arc::new(Inner {
        store,
        api,
        connectivity,
        backoff: Backoff::from_config(config),
        max_in_flight: config.max_in_flight.max(1),
        in_flight: Mutex::new(HashSet::new()),
        passes: Mutex::new(JoinSet::new()),
      }),
    }
  }

  pub fn store(&self) -> &Arc<LocalStore> {
    &self.inner.store
  }

  pub fn connectivity(&self) -> &Connectivity {
    &self.inner.connectivity
  }

  /// Persist an operation and, if online right now, start a replay pass.
  pub fn enqueue(&self, operation: &Operation) -> Result<i64> {
    let id = self.inner.store.enqueue(operation)?;
    if self.inner.connectivity.is_online() {
      self.spawn_pass();
    }
    Ok(id)
  }

  fn spawn_pass(&self) {
    let this = self.clone();
    let Ok(mut passes) = self.inner.passes.lock() else {
      error!("replay pass registry poisoned");
      return;
    };
    while let Some(joined) = passes.try_join_next() {
      match joined {
        Ok(report) => debug!(
          synced = report.synced.len(),
          failed = report.failed.len(),
          deferred = report.deferred.len(),
          "reaped replay pass"
        ),
        Err(e) => warn!(error = %e, "replay pass panicked"),
      }
    }
    passes.spawn(async move {
      match this.replay_all().await {
        Ok(report) => report,
        Err(e) => {
          warn!(error = %e, "replay pass failed");
          SyncReport::default()
        }
      }
    });
  }

  /// Wait for every replay pass started by [`enqueue`](Self::enqueue).
  pub async fn drain(&self) -> Vec<SyncReport> {
    let mut passes = match self.inner.passes.lock() {
      Ok(mut guard) => std::mem::take(&mut *guard),
      Err(_) => return Vec::new(),
    };

    let mut reports = Vec::new();
    while let Some(joined) = passes.join_next().await {
      match joined {
        Ok(report) => reports.push(report),
        Err(e) => warn!(error = %e, "replay pass panicked"),
      }
    }
    reports
  }

  /// Replay after every offline-to-online transition, until the channel closes.
  pub fn listen(&self) -> JoinHandle<()> {
    let this = self.clone();
    let mut rx = self.inner.connectivity.subscribe();
    tokio::spawn(async move {
      let mut was_online = *rx.borrow_and_update();
      while rx.changed().await.is_ok() {
        let online = *rx.borrow_and_update();
        if online && !was_online {
          info!("back online, replaying queue");
          match this.replay_all().await {
            Ok(report) => info!(
              synced = report.synced.len(),
              failed = report.failed.len(),
              deferred = report.deferred.len(),
              "replay finished"
            ),
            Err(e) => warn!(error = %e, "replay pass failed"),
          }
        }
        was_online = online;
      }
    })
  }

  /// One pass over every operation type. Does nothing while offline.
  pub async fn replay_all(&self) -> Result<SyncReport> {
    let mut report = SyncReport::default();
    if !self.inner.connectivity.is_online() {
      debug!("offline, skipping replay");
      return Ok(report);
    }
    for op_type in Operation::TYPES {
      report.merge(self.replay_type(op_type).await?);
    }
    Ok(report)
  }

  /// Visit every entry of one type in id order.
  ///
  /// Due entries are dispatched concurrently, at most `max_in_flight` at a
  /// time. A failure never stops traversal.
  pub async fn replay_type(&self, op_type: &str) -> Result<SyncReport> {
    let entries = self.inner.store.operations_by_type(op_type)?;
    let now = Utc::now();
    let mut report = SyncReport::default();
    let mut due = Vec::new();

    for entry in entries {
      report.visited.push(entry.id);
      if !is_due(&entry, now) {
        debug!(id = entry.id, retry_count = entry.retry_count, "backing off");
        report.deferred.push(entry.id);
      } else if !self.claim(entry.id) {
        debug!(id = entry.id, "attempt already in flight");
        report.deferred.push(entry.id);
      } else {
        due.push(entry);
      }
    }

    let outcomes: Vec<(i64, Attempt)> = stream::iter(due)
      .map(|entry| async move {
        let id = entry.id;
        let outcome = self.attempt(entry).await;
        self.release(id);
        (id, outcome)
      })
      .buffer_unordered(self.inner.max_in_flight)
      .collect()
      .await;

    for (id, outcome) in outcomes {
      match outcome {
        Attempt::Synced => report.synced.push(id),
        Attempt::Failed => report.failed.push(id),
      }
    }
    report.synced.sort_unstable();
    report.failed.sort_unstable();
    Ok(report)
  }

  async fn attempt(&self, entry: QueueEntry) -> Attempt {
    let store = &self.inner.store;
    let result = match &entry.operation {
      Operation::CreateStory { local_id, request } => {
        match self.inner.api.submit_story(request).await {
          Ok(story) => {
            if let Err(e) = store.confirm_story(entry.id, local_id, story) {
              error!(id = entry.id, error = %e, "could not confirm synced story");
              self.forget(entry.id, local_id);
            }
            Ok(())
          }
          Err(e) if e.was_accepted() => {
            warn!(id = entry.id, error = %e, "story accepted without a usable reply");
            self.forget(entry.id, local_id);
            Ok(())
          }
          Err(e) => Err(e),
        }
      }
    };

    match result {
      Ok(()) => {
        info!(id = entry.id, op_type = %entry.op_type, "operation synced");
        Attempt::Synced
      }
      Err(e) => {
        let message = e.to_string();
        warn!(id = entry.id, retry_count = entry.retry_count + 1, error = %message, "operation failed");
        let next = self
          .inner
          .backoff
          .next_attempt_at(Utc::now(), entry.retry_count + 1)
          .map(|at| at.to_rfc3339_opts(SecondsFormat::Millis, true));
        if let Err(e) = store.record_failure(&entry, &message, next.as_deref()) {
          error!(id = entry.id, error = %e, "could not record failed attempt");
        }
        Attempt::Failed
      }
    }
  }

  /// Drop an entry the server already holds, with its local record, so no
  /// later pass submits it again. The server copy arrives with the next read.
  fn forget(&self, id: i64, local_id: &str) {
    if let Err(e) = self.inner.store.delete_story(local_id) {
      error!(id, error = %e, "could not drop accepted entry");
    }
  }

  fn claim(&self, id: i64) -> bool {
    match self.inner.in_flight.lock() {
      Ok(mut set) => set.insert(id),
      Err(_) => false,
    }
  }

  fn release(&self, id: i64) {
    if let Ok(mut set) = self.inner.in_flight.lock() {
      set.remove(&id);
    }
  }
}

fn is_due(entry: &QueueEntry, now: DateTime<Utc>) -> bool {
  match entry.next_attempt_at.as_deref() {
    None => true,
    Some(at) => match DateTime::parse_from_rfc3339(at) {
      Ok(at) => at.with_timezone(&Utc) <= now,
      Err(_) => true,
    },
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::testing::ScriptedApi;
  use crate::api::types::{Photo, StoryDraft};
  use crate::sync::queue::{OperationStatus, OutboundRequest, SYNC_STORIES};

  fn fast_config() -> SyncConfig {
    SyncConfig {
      base_delay_secs: 0,
      ..SyncConfig::default()
    }
  }

  fn queue_story(store: &LocalStore, description: &str) -> (String, Operation) {
    let draft = StoryDraft {
      description: description.to_string(),
      photo: Photo::from_bytes("p.jpg", vec![1, 2, 3]),
      lat: Some(1.0),
      lon: Some(2.0),
    };
    let record = store.put(draft.to_local_input("me")).unwrap();
    let op = Operation::CreateStory {
      local_id: record.id.clone(),
      request: OutboundRequest::create_story("tok", draft),
    };
    (record.id, op)
  }

  fn setup(api: Arc<ScriptedApi>, online: bool, config: &SyncConfig) -> SyncCoordinator {
    let store = Arc::new(LocalStore::open_in_memory().unwrap());
    SyncCoordinator::new(store, api, Connectivity::new(online), config)
  }

  #[tokio::test]
  async fn test_failure_does_not_block_traversal() {
    let api = Arc::new(ScriptedApi::default());
    api.fail_submissions_matching("second");
    let sync = setup(api.clone(), false, &fast_config());

    let mut ids = Vec::new();
    for name in ["first", "second", "third"] {
      let (_, op) = queue_story(sync.store(), name);
      ids.push(sync.enqueue(&op).unwrap());
    }

    sync.connectivity().set_online(true);
    let report = sync.replay_type(SYNC_STORIES).await.unwrap();

    assert_eq!(report.visited, ids);
    assert_eq!(report.synced, vec![ids[0], ids[2]]);
    assert_eq!(report.failed, vec![ids[1]]);

    let remaining = sync.store().all_operations().unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, ids[1]);
    assert_eq!(remaining[0].retry_count, 1);
    assert_eq!(remaining[0].status, OperationStatus::Failed);
    assert!(remaining[0].last_error.is_some());
    assert_eq!(api.submitted().len(), 3);
  }

  #[tokio::test]
  async fn test_offline_round_trip() {
    let api = Arc::new(ScriptedApi::default());
    let sync = setup(api.clone(), false, &fast_config());

    let (local_id, op) = queue_story(sync.store(), "made offline");
    sync.enqueue(&op).unwrap();
    assert!(sync.drain().await.is_empty());
    assert_eq!(sync.store().all_operations().unwrap().len(), 1);
    assert!(sync.store().get_by_id(&local_id).unwrap().unwrap().is_local);

    let listener = sync.listen();
    tokio::task::yield_now().await;
    sync.connectivity().set_online(true);

    // Wait for the listener to finish its pass.
    for _ in 0..100 {
      if sync.store().all_operations().unwrap().is_empty() {
        break;
      }
      tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    listener.abort();

    assert!(sync.store().all_operations().unwrap().is_empty());
    assert_eq!(sync.store().get_by_id(&local_id).unwrap(), None);
    let records = sync.store().get_all().unwrap();
    assert_eq!(records.len(), 1);
    assert!(!records[0].is_local);
    assert_eq!(records[0].description, "made offline");
  }

  #[tokio::test]
  async fn test_enqueue_while_online_triggers_replay() {
    let api = Arc::new(ScriptedApi::default());
    let sync = setup(api.clone(), true, &fast_config());

    let (_, op) = queue_story(sync.store(), "instant");
    sync.enqueue(&op).unwrap();
    let reports = sync.drain().await;

    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].synced.len(), 1);
    assert!(sync.store().all_operations().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_replay_all_is_noop_offline() {
    let api = Arc::new(ScriptedApi::default());
    let sync = setup(api.clone(), false, &fast_config());
    let (_, op) = queue_story(sync.store(), "waiting");
    sync.enqueue(&op).unwrap();

    let report = sync.replay_all().await.unwrap();
    assert_eq!(report, SyncReport::default());
    assert!(api.submitted().is_empty());
  }

  #[tokio::test]
  async fn test_failed_entry_is_retried_on_next_pass() {
    let api = Arc::new(ScriptedApi::default());
    api.fail_submissions_matching("flaky");
    let sync = setup(api.clone(), true, &fast_config());
    let (_, op) = queue_story(sync.store(), "flaky");
    sync.store().enqueue(&op).unwrap();

    sync.replay_all().await.unwrap();
    sync.replay_all().await.unwrap();
    let entry = &sync.store().all_operations().unwrap()[0];
    assert_eq!(entry.retry_count, 2);

    api.clear_failures();
    let report = sync.replay_all().await.unwrap();
    assert_eq!(report.synced.len(), 1);
    assert!(sync.store().all_operations().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_backoff_defers_recent_failures() {
    let api = Arc::new(ScriptedApi::default());
    api.fail_submissions_matching("slow");
    let config = SyncConfig {
      base_delay_secs: 60,
      ..SyncConfig::default()
    };
    let sync = setup(api.clone(), true, &config);
    let (_, op) = queue_story(sync.store(), "slow");
    let id = sync.store().enqueue(&op).unwrap();

    let first = sync.replay_all().await.unwrap();
    assert_eq!(first.failed, vec![id]);
    let second = sync.replay_all().await.unwrap();
    assert_eq!(second.visited, vec![id]);
    assert_eq!(second.deferred, vec![id]);
    assert_eq!(api.submitted().len(), 1);
  }

  #[tokio::test]
  async fn test_in_flight_entry_is_not_dispatched_twice() {
    let api = Arc::new(ScriptedApi::default());
    let sync = setup(api.clone(), true, &fast_config());
    let (_, op) = queue_story(sync.store(), "once");
    let id = sync.store().enqueue(&op).unwrap();

    assert!(sync.claim(id));
    let report = sync.replay_all().await.unwrap();
    assert_eq!(report.deferred, vec![id]);
    assert!(api.submitted().is_empty());
    sync.release(id);
  }

  #[tokio::test]
  async fn test_unconfirmed_submission_is_not_resubmitted() {
    let api = Arc::new(ScriptedApi::default());
    let sync = setup(api.clone(), true, &fast_config());
    let (local_id, op) = queue_story(sync.store(), "accepted");
    let id = sync.store().enqueue(&op).unwrap();
    sync
      .store()
      .execute_batch(
        "CREATE TRIGGER reject_records BEFORE INSERT ON records
         BEGIN SELECT RAISE(ABORT, 'disk full'); END;",
      )
      .unwrap();

    let first = sync.replay_all().await.unwrap();
    assert_eq!(first.synced, vec![id]);
    let second = sync.replay_all().await.unwrap();
    assert!(second.visited.is_empty());

    assert_eq!(api.submitted().len(), 1);
    assert!(sync.store().all_operations().unwrap().is_empty());
    assert_eq!(sync.store().get_by_id(&local_id).unwrap(), None);
  }

  #[tokio::test]
  async fn test_unreadable_acceptance_is_not_resubmitted() {
    let api = Arc::new(ScriptedApi::default());
    api.return_malformed_bodies();
    let sync = setup(api.clone(), true, &fast_config());
    let (local_id, op) = queue_story(sync.store(), "garbled");
    let id = sync.store().enqueue(&op).unwrap();

    assert_eq!(sync.replay_all().await.unwrap().synced, vec![id]);
    sync.replay_all().await.unwrap();

    assert_eq!(api.submitted().len(), 1);
    assert!(sync.store().all_operations().unwrap().is_empty());
    assert_eq!(sync.store().get_by_id(&local_id).unwrap(), None);
  }

  #[tokio::test]
  async fn test_finished_passes_are_reaped() {
    let api = Arc::new(ScriptedApi::default());
    let sync = setup(api.clone(), true, &fast_config());

    for name in ["one", "two", "three"] {
      let (_, op) = queue_story(sync.store(), name);
      sync.enqueue(&op).unwrap();
      for _ in 0..100 {
        if sync.store().all_operations().unwrap().is_empty() {
          break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
      }
      // let the pass return its report
      tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }

    assert_eq!(sync.inner.passes.lock().unwrap().len(), 1);
    assert_eq!(sync.drain().await.len(), 1);
    assert_eq!(api.submitted().len(), 3);
  }

  #[test]
  fn test_is_due() {
    let now = Utc::now();
    let mut entry = QueueEntry {
      id: 1,
      op_type: SYNC_STORIES.into(),
      operation: Operation::CreateStory {
        local_id: "local-1".into(),
        request: OutboundRequest::create_story(
          "tok",
          StoryDraft {
            description: "d".into(),
            photo: Photo::from_bytes("p.jpg", vec![1]),
            lat: Some(0.0),
            lon: Some(0.0),
          },
        ),
      },
      status: OperationStatus::Pending,
      retry_count: 0,
      last_error: None,
      created_at: "2024-01-01T00:00:00.000Z".into(),
      next_attempt_at: None,
    };
    assert!(is_due(&entry, now));
    entry.next_attempt_at = Some("2999-01-01T00:00:00.000Z".into());
    assert!(!is_due(&entry, now));
    entry.next_attempt_at = Some("2000-01-01T00:00:00.000Z".into());
    assert!(is_due(&entry, now));
  }
}
