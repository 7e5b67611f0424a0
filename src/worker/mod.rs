//! Background worker: owns the app-shell cache lifecycle, intercepts page
//! requests once active, and displays push notifications.
//!
//! The worker runs as a detached task. Callers talk to it through a
//! [`WorkerHandle`], which turns each call into a [`WorkerEvent`] on an
//! unbounded channel and awaits the reply.

pub mod cache_storage;
pub mod http;
pub mod interceptor;
pub mod lifecycle;
pub mod notification;

pub use cache_storage::AssetCache;
pub use http::{AssetFetcher, HttpFetcher, Request};
pub use interceptor::{Interception, Interceptor};
pub use lifecycle::AssetCacheManager;
pub use notification::{ConsoleNotifier, Notification, Notifier};

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{Result, SyncError};

/// Lifecycle position of the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
  /// Started, nothing installed yet.
  Parsed,
  /// Shell cached; ready to activate without waiting for clients.
  Installed,
  /// Old caches cleaned up and clients claimed; fetches are intercepted.
  Active,
}

/// Events delivered to the worker task.
#[derive(Debug)]
pub enum WorkerEvent {
  Install {
    reply: oneshot::Sender<Result<usize>>,
  },
  Activate {
    reply: oneshot::Sender<Result<Vec<String>>>,
  },
  Fetch {
    request: Request,
    reply: oneshot::Sender<Result<Interception>>,
  },
  Push {
    payload: Vec<u8>,
  },
  NotificationClick {
    action: Option<String>,
    url: String,
    reply: oneshot::Sender<Option<String>>,
  },
}

struct Worker {
  manager: AssetCacheManager,
  interceptor: Arc<Interceptor>,
  notifier: Arc<dyn Notifier>,
  state: watch::Sender<WorkerState>,
}

impl Worker {
  async fn run(self, mut rx: mpsc::UnboundedReceiver<WorkerEvent>) {
    while let Some(event) = rx.recv().await {
      match event {
        WorkerEvent::Install { reply } => {
          let result = self.manager.install().await;
          if result.is_ok() && *self.state.borrow() == WorkerState::Parsed {
            // skip waiting
            self.transition(WorkerState::Installed);
          }
          let _ = reply.send(result);
        }
        WorkerEvent::Activate { reply } => {
          let _ = reply.send(self.activate());
        }
        WorkerEvent::Fetch { request, reply } => {
          if *self.state.borrow() != WorkerState::Active {
            let _ = reply.send(Ok(Interception::Passthrough));
            continue;
          }
          let interceptor = Arc::clone(&self.interceptor);
          tokio::spawn(async move {
            let _ = reply.send(Ok(interceptor.handle(&request).await));
          });
        }
        WorkerEvent::Push { payload } => match Notification::from_push(&payload) {
          Ok(Some(notification)) => self.notifier.show(&notification),
          Ok(None) => debug!("empty push message ignored"),
          Err(e) => warn!(error = %e, "unreadable push message"),
        },
        WorkerEvent::NotificationClick { action, url, reply } => {
          let _ = reply.send(notification::click_target(action.as_deref(), &url));
        }
      }
    }
    debug!("worker channel closed");
  }

  fn activate(&self) -> Result<Vec<String>> {
    if *self.state.borrow() == WorkerState::Parsed {
      return Err(SyncError::Validation("worker is not installed".into()));
    }
    let deleted = self.manager.activate()?;
    // claim clients
    self.transition(WorkerState::Active);
    Ok(deleted)
  }

  fn transition(&self, next: WorkerState) {
    let changed = self.state.send_if_modified(|state| {
      if *state == next {
        return false;
      }
      *state = next;
      true
    });
    if changed {
      info!(state = ?next, version = %self.manager.version(), "worker state");
    }
  }
}

/// Client side of a running worker.
pub struct WorkerHandle {
  tx: mpsc::UnboundedSender<WorkerEvent>,
  state: watch::Receiver<WorkerState>,
  task: JoinHandle<()>,
}

impl WorkerHandle {
  /// Spawn the worker task, resuming from whatever the cache already holds
  /// for this version.
  pub fn spawn(
    manager: AssetCacheManager,
    interceptor: Interceptor,
    notifier: Arc<dyn Notifier>,
  ) -> Result<Self> {
    let initial = manager.restored_state()?;
    debug!(state = ?initial, version = %manager.version(), "worker starting");
    let (tx, rx) = mpsc::unbounded_channel();
    let (state_tx, state) = watch::channel(initial);
    let worker = Worker {
      manager,
      interceptor: Arc::new(interceptor),
      notifier,
      state: state_tx,
    };
    let task = tokio::spawn(worker.run(rx));
    Ok(Self { tx, state, task })
  }

  pub fn state(&self) -> WorkerState {
    *self.state.borrow()
  }

  pub async fn install(&self) -> Result<usize> {
    self.request(|reply| WorkerEvent::Install { reply }).await?
  }

  pub async fn activate(&self) -> Result<Vec<String>> {
    self.request(|reply| WorkerEvent::Activate { reply }).await?
  }

  pub async fn fetch(&self, request: Request) -> Result<Interception> {
    self
      .request(|reply| WorkerEvent::Fetch { request, reply })
      .await?
  }

  pub fn push(&self, payload: Vec<u8>) -> Result<()> {
    self
      .tx
      .send(WorkerEvent::Push { payload })
      .map_err(|_| SyncError::WorkerStopped)
  }

  pub async fn notification_click(&self, action: Option<String>, url: String) -> Result<Option<String>> {
    self
      .request(|reply| WorkerEvent::NotificationClick { action, url, reply })
      .await
  }

  /// Close the channel and wait for queued events to finish.
  pub async fn shutdown(self) {
    drop(self.tx);
    if let Err(e) = self.task.await {
      warn!(error = %e, "worker task ended abnormally");
    }
  }

  async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> WorkerEvent) -> Result<T> {
    let (reply, rx) = oneshot::channel();
    self
      .tx
      .send(make(reply))
      .map_err(|_| SyncError::WorkerStopped)?;
    rx.await.map_err(|_| SyncError::WorkerStopped)
  }
}
