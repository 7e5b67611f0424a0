//! Remote story service: the only network boundary of the client.

pub mod api_types;
pub mod client;
pub mod offline_client;
pub mod types;

use async_trait::async_trait;

use crate::error::Result;
use crate::sync::queue::OutboundRequest;
use types::{LoginResult, Story};

pub use client::HttpGateway;
pub use offline_client::{OfflineClient, Source, WriteOutcome};

/// Operations the remote service exposes.
#[async_trait]
pub trait RemoteApi: Send + Sync {
  /// Create an account; returns the server's confirmation message.
  async fn register(&self, name: &str, email: &str, password: &str) -> Result<String>;

  async fn login(&self, email: &str, password: &str) -> Result<LoginResult>;

  async fn list_stories(&self, token: &str) -> Result<Vec<Story>>;

  /// Send a captured story submission exactly as it was recorded.
  async fn submit_story(&self, request: &OutboundRequest) -> Result<Story>;
}

#[cfg(test)]
pub mod testing {
  //! Scripted in-memory stand-in for the remote service.

  use std::sync::Mutex;

  use super::*;
  use crate::error::SyncError;

  #[derive(Default)]
  pub struct ScriptedApi {
    stories: Mutex<Vec<Story>>,
    list_error: Mutex<Option<u16>>,
    malformed: Mutex<bool>,
    fail_matching: Mutex<Vec<String>>,
    submitted: Mutex<Vec<OutboundRequest>>,
  }

  impl ScriptedApi {
    pub fn with_stories(stories: Vec<Story>) -> Self {
      Self {
        stories: Mutex::new(stories),
        ..Default::default()
      }
    }

    /// Make `list_stories` fail: status 0 means a transport failure.
    pub fn fail_listing(&self, status: u16) {
      *self.list_error.lock().unwrap() = Some(status);
    }

    /// Submissions whose description contains `needle` fail with a network error.
    pub fn fail_submissions_matching(&self, needle: &str) {
      self.fail_matching.lock().unwrap().push(needle.to_string());
    }

    /// Every call answers 2xx with a body that does not decode.
    pub fn return_malformed_bodies(&self) {
      *self.malformed.lock().unwrap() = true;
    }

    pub fn clear_failures(&self) {
      self.fail_matching.lock().unwrap().clear();
      *self.list_error.lock().unwrap() = None;
      *self.malformed.lock().unwrap() = false;
    }

    fn malformed(&self) -> Result<()> {
      if *self.malformed.lock().unwrap() {
        return Err(SyncError::Server {
          status: 200,
          message: "Unreadable response body: expected value at line 1 column 1".into(),
        });
      }
      Ok(())
    }

    pub fn submitted(&self) -> Vec<OutboundRequest> {
      self.submitted.lock().unwrap().clone()
    }
  }

  #[async_trait]
  impl RemoteApi for ScriptedApi {
    async fn register(&self, _name: &str, email: &str, _password: &str) -> Result<String> {
      if email.contains("taken") {
        return Err(SyncError::Server {
          status: 400,
          message: "Email is already taken".into(),
        });
      }
      Ok("User created".into())
    }

    async fn login(&self, email: &str, _password: &str) -> Result<LoginResult> {
      Ok(LoginResult {
        user_id: "user-1".into(),
        name: email.to_string(),
        token: "token-1".into(),
      })
    }

    async fn list_stories(&self, _token: &str) -> Result<Vec<Story>> {
      self.malformed()?;
      match *self.list_error.lock().unwrap() {
        Some(0) => Err(SyncError::Network("connection refused".into())),
        Some(status) => Err(SyncError::Server {
          status,
          message: "list failed".into(),
        }),
        None => Ok(self.stories.lock().unwrap().clone()),
      }
    }

    async fn submit_story(&self, request: &OutboundRequest) -> Result<Story> {
      let n = {
        let mut submitted = self.submitted.lock().unwrap();
        submitted.push(request.clone());
        submitted.len()
      };
      let fail = self
        .fail_matching
        .lock()
        .unwrap()
        .iter()
        .any(|needle| request.body.description.contains(needle.as_str()));
      if fail {
        return Err(SyncError::Network("connection reset".into()));
      }
      self.malformed()?;
      Ok(Story {
        id: format!("story-{}", n),
        name: "me".into(),
        description: request.body.description.clone(),
        photo_url: Some(format!("https://example.com/photos/{}.jpg", n)),
        lat: request.body.lat,
        lon: request.body.lon,
        created_at: crate::db::now_rfc3339(),
      })
    }
  }
}
