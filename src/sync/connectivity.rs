//! Online/offline state and its transitions.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use url::Url;

/// Shared connectivity flag.
///
/// Backed by a watch channel: subscribers only ever see the latest value,
/// so a listener that is not waiting when a transition happens misses it.
#[derive(Clone)]
pub struct Connectivity {
  tx: Arc<watch::Sender<bool>>,
}

impl Connectivity {
  pub fn new(online: bool) -> Self {
    let (tx, _rx) = watch::channel(online);
    Self { tx: Arc::new(tx) }
  }

  pub fn is_online(&self) -> bool {
    *self.tx.borrow()
  }

  /// Update the flag. Returns true when this was an actual transition.
  pub fn set_online(&self, online: bool) -> bool {
    let changed = self.tx.send_if_modified(|current| {
      if *current == online {
        return false;
      }
      *current = online;
      true
    });
    if changed {
      info!(online, "connectivity changed");
    }
    changed
  }

  pub fn subscribe(&self) -> watch::Receiver<bool> {
    self.tx.subscribe()
  }
}

/// Periodically checks whether the API host answers and publishes transitions.
pub struct ConnectivityProbe {
  client: reqwest::Client,
  target: Url,
  interval: Duration,
}

impl ConnectivityProbe {
  pub fn new(target: Url, interval: Duration) -> Self {
    Self {
      client: reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()
        .unwrap_or_default(),
      target,
      interval,
    }
  }

  /// Any HTTP answer counts as reachable; only transport failures mean offline.
  pub async fn check(&self) -> bool {
    match self.client.head(self.target.clone()).send().await {
      Ok(resp) => {
        debug!(status = %resp.status(), "probe answered");
        true
      }
      Err(e) => {
        debug!(error = %e, "probe failed");
        false
      }
    }
  }

  pub fn spawn(self, connectivity: Connectivity) -> JoinHandle<()> {
    tokio::spawn(async move {
      let mut ticker = tokio::time::interval(self.interval);
      loop {
        ticker.tick().await;
        let online = self.check().await;
        connectivity.set_online(online);
      }
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_set_online_reports_transitions_only() {
    let c = Connectivity::new(false);
    assert!(!c.is_online());
    assert!(c.set_online(true));
    assert!(!c.set_online(true));
    assert!(c.is_online());
    assert!(c.set_online(false));
  }

  #[tokio::test]
  async fn test_subscribers_see_latest_value_only() {
    let c = Connectivity::new(false);
    let mut rx = c.subscribe();
    c.set_online(true);
    c.set_online(false);
    c.set_online(true);
    rx.changed().await.unwrap();
    assert!(*rx.borrow_and_update());
    // The intermediate transitions were coalesced into one notification.
    assert!(!rx.has_changed().unwrap());
  }
}
