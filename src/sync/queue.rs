//! Deferred outbound operations and their queue envelope.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::api::types::StoryDraft;
use crate::error::{Result, SyncError};

/// Queue discriminator for story submissions.
pub const SYNC_STORIES: &str = "sync-stories";

/// An HTTP intent captured for later replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundRequest {
  pub method: String,
  /// Path relative to the API base URL.
  pub target: String,
  pub headers: BTreeMap<String, String>,
  pub body: StoryDraft,
}

impl OutboundRequest {
  /// The request that publishes a new story.
  pub fn create_story(token: &str, draft: StoryDraft) -> Self {
    let mut headers = BTreeMap::new();
    headers.insert("Authorization".to_string(), format!("Bearer {}", token));
    Self {
      method: "POST".to_string(),
      target: "/stories".to_string(),
      headers,
      body: draft,
    }
  }
}

/// Every kind of write that may be deferred while offline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Operation {
  CreateStory {
    /// Id of the local record this submission will supersede.
    local_id: String,
    request: OutboundRequest,
  },
}

impl Operation {
  /// All queue types, in the order a replay pass visits them.
  pub const TYPES: &'static [&'static str] = &[SYNC_STORIES];

  pub fn op_type(&self) -> &'static str {
    match self {
      Operation::CreateStory { .. } => SYNC_STORIES,
    }
  }

  pub fn local_id(&self) -> &str {
    match self {
      Operation::CreateStory { local_id, .. } => local_id,
    }
  }

  /// Reject operations whose payload could never be replayed.
  pub fn validate(&self) -> Result<()> {
    match self {
      Operation::CreateStory { local_id, request } => {
        if local_id.is_empty() {
          return Err(SyncError::Validation("operation has no local record".into()));
        }
        if request.method != "POST" || request.target != "/stories" {
          return Err(SyncError::Validation(format!(
            "unsupported story request {} {}",
            request.method, request.target
          )));
        }
        request.body.validate()
      }
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationStatus {
  Pending,
  /// Last attempt failed; the entry stays queued for the next trigger.
  Failed,
}

impl OperationStatus {
  pub fn as_str(&self) -> &'static str {
    match self {
      OperationStatus::Pending => "pending",
      OperationStatus::Failed => "failed",
    }
  }

  pub fn parse(s: &str) -> Option<Self> {
    match s {
      "pending" => Some(OperationStatus::Pending),
      "failed" => Some(OperationStatus::Failed),
      _ => None,
    }
  }
}

/// A queued operation as persisted in the store.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueEntry {
  pub id: i64,
  pub op_type: String,
  pub operation: Operation,
  pub status: OperationStatus,
  pub retry_count: u32,
  pub last_error: Option<String>,
  pub created_at: String,
  /// Not eligible for replay before this instant (RFC 3339).
  pub next_attempt_at: Option<String>,
}
