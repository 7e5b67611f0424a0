//! Replay delay keyed by an entry's retry count.

use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::config::SyncConfig;

/// Exponential backoff: `base * 2^(retries - 1)`, capped at `max`.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
  base: Duration,
  max: Duration,
}

impl Backoff {
  pub fn new(base: Duration, max: Duration) -> Self {
    Self { base, max }
  }

  pub fn from_config(config: &SyncConfig) -> Self {
    Self::new(
      Duration::from_secs(config.base_delay_secs),
      Duration::from_secs(config.max_delay_secs),
    )
  }

  /// Delay before an entry that already failed `retry_count` times may run again.
  pub fn delay(&self, retry_count: u32) -> Duration {
    if retry_count == 0 {
      return Duration::ZERO;
    }
    let exp = (retry_count - 1).min(31);
    let delay = self.base.saturating_mul(1u32 << exp);
    delay.min(self.max)
  }

  /// Earliest instant the next attempt may start, or `None` when it may run immediately.
  pub fn next_attempt_at(&self, now: DateTime<Utc>, retry_count: u32) -> Option<DateTime<Utc>> {
    let delay = self.delay(retry_count);
    if delay.is_zero() {
      return None;
    }
    chrono::Duration::from_std(delay).ok().map(|d| now + d)
  }
}

impl Default for Backoff {
  fn default() -> Self {
    Self::from_config(&SyncConfig::default())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_delay_doubles() {
    let b = Backoff::new(Duration::from_secs(2), Duration::from_secs(300));
    assert_eq!(b.delay(0), Duration::ZERO);
    assert_eq!(b.delay(1), Duration::from_secs(2));
    assert_eq!(b.delay(2), Duration::from_secs(4));
    assert_eq!(b.delay(3), Duration::from_secs(8));
  }

  #[test]
  fn test_delay_capped_at_max() {
    let b = Backoff::new(Duration::from_secs(2), Duration::from_secs(60));
    assert_eq!(b.delay(10), Duration::from_secs(60));
    assert_eq!(b.delay(u32::MAX), Duration::from_secs(60));
  }

  #[test]
  fn test_zero_base_never_defers() {
    let b = Backoff::new(Duration::ZERO, Duration::from_secs(60));
    assert_eq!(b.next_attempt_at(Utc::now(), 5), None);
  }
}
