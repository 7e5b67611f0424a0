//! Error taxonomy shared by the store, the sync queue and the gateway.

use thiserror::Error;

pub type Result<T, E = SyncError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum SyncError {
  /// Transport failure: no response arrived at all.
  #[error("Network error: {0}")]
  Network(String),

  /// The server answered with a non-2xx status, or a 2xx body that could
  /// not be decoded.
  #[error("Server error ({status}): {message}")]
  Server { status: u16, message: String },

  /// A local store transaction failed.
  #[error("Storage error: {0}")]
  Storage(String),

  /// A required write field is missing or malformed.
  #[error("Validation error: {0}")]
  Validation(String),

  /// Read path found nothing on the network and nothing locally.
  #[error("No data available")]
  NoData,

  #[error("Serialization error: {0}")]
  Serialization(String),

  /// The background worker task is gone.
  #[error("Worker stopped")]
  WorkerStopped,
}

impl SyncError {
  /// Whether a failed publish may still be saved locally and queued.
  ///
  /// Anything the gateway reports counts, including a 2xx body that could not
  /// be decoded; only a request that could never be sent does not.
  pub fn allows_offline_save(&self) -> bool {
    !matches!(self, SyncError::Validation(_))
  }

  /// The server answered 2xx but its reply was unusable: the request landed.
  pub fn was_accepted(&self) -> bool {
    matches!(self, SyncError::Server { status, .. } if (200..300).contains(status))
  }
}

impl From<rusqlite::Error> for SyncError {
  fn from(e: rusqlite::Error) -> Self {
    SyncError::Storage(e.to_string())
  }
}

impl From<serde_json::Error> for SyncError {
  fn from(e: serde_json::Error) -> Self {
    SyncError::Serialization(e.to_string())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_offline_save_allowed_for_gateway_failures() {
    assert!(SyncError::Network("refused".into()).allows_offline_save());
    assert!(SyncError::Server {
      status: 500,
      message: "boom".into()
    }
    .allows_offline_save());
    assert!(SyncError::Serialization("expected value".into()).allows_offline_save());
    assert!(!SyncError::Validation("photo is required".into()).allows_offline_save());
  }

  #[test]
  fn test_unreadable_success_was_accepted() {
    let unreadable = SyncError::Server {
      status: 201,
      message: "Unreadable response body: expected value".into(),
    };
    assert!(unreadable.was_accepted());
    assert!(!SyncError::Server {
      status: 502,
      message: "Bad gateway".into()
    }
    .was_accepted());
    assert!(!SyncError::Network("refused".into()).was_accepted());
  }

  #[test]
  fn test_server_error_display_carries_message() {
    let err = SyncError::Server {
      status: 401,
      message: "Missing authentication".into(),
    };
    assert_eq!(err.to_string(), "Server error (401): Missing authentication");
  }
}
