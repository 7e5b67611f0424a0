use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};

/// A story as returned by the remote service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Story {
  pub id: String,
  pub name: String,
  pub description: String,
  pub photo_url: Option<String>,
  pub lat: Option<f64>,
  pub lon: Option<f64>,
  pub created_at: String,
}

/// Insert shape for the local store.
///
/// A missing `id` means the record was written locally and has no server
/// identity yet.
#[derive(Debug, Clone, Default)]
pub struct StoryInput {
  pub id: Option<String>,
  pub name: String,
  pub description: String,
  pub photo_url: Option<String>,
  pub lat: Option<f64>,
  pub lon: Option<f64>,
  pub created_at: Option<String>,
}

impl From<Story> for StoryInput {
  fn from(story: Story) -> Self {
    Self {
      id: Some(story.id),
      name: story.name,
      description: story.description,
      photo_url: story.photo_url,
      lat: story.lat,
      lon: story.lon,
      created_at: Some(story.created_at),
    }
  }
}

/// A story mirrored in the local store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoryRecord {
  pub id: String,
  pub name: String,
  pub description: String,
  pub photo_url: Option<String>,
  pub lat: Option<f64>,
  pub lon: Option<f64>,
  pub created_at: String,
  pub updated_at: String,
  /// True until the authoritative server copy replaces this record.
  pub is_local: bool,
}

impl StoryRecord {
  /// Authoritative copy of a server story.
  pub fn from_remote(story: Story, updated_at: String) -> Self {
    Self {
      id: story.id,
      name: story.name,
      description: story.description,
      photo_url: story.photo_url,
      lat: story.lat,
      lon: story.lon,
      created_at: story.created_at,
      updated_at,
      is_local: false,
    }
  }
}

/// Photo attached to a new story.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Photo {
  pub file_name: String,
  pub content_type: String,
  #[serde(with = "hex")]
  pub data: Vec<u8>,
}

impl Photo {
  /// Build a photo from a file name, guessing the content type from its extension.
  pub fn from_bytes(file_name: impl Into<String>, data: Vec<u8>) -> Self {
    let file_name = file_name.into();
    let ext = file_name
      .rsplit_once('.')
      .map(|(_, ext)| ext.to_lowercase())
      .unwrap_or_default();
    let content_type = match ext.as_str() {
      "png" => "image/png",
      "gif" => "image/gif",
      "webp" => "image/webp",
      _ => "image/jpeg",
    };
    Self {
      file_name,
      content_type: content_type.to_string(),
      data,
    }
  }
}

/// Content of a story the user wants to publish.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoryDraft {
  pub description: String,
  pub photo: Photo,
  pub lat: Option<f64>,
  pub lon: Option<f64>,
}

impl StoryDraft {
  /// Check that every field the server requires is present.
  pub fn validate(&self) -> Result<()> {
    if self.description.trim().is_empty() {
      return Err(SyncError::Validation("description is required".into()));
    }
    if self.photo.data.is_empty() {
      return Err(SyncError::Validation("photo is required".into()));
    }
    let (lat, lon) = match (self.lat, self.lon) {
      (Some(lat), Some(lon)) => (lat, lon),
      _ => return Err(SyncError::Validation("location is required".into())),
    };
    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
      return Err(SyncError::Validation(format!(
        "location out of range: {}, {}",
        lat, lon
      )));
    }
    Ok(())
  }

  /// Local mirror of this draft, shown until the server copy arrives.
  pub fn to_local_input(&self, author: &str) -> StoryInput {
    StoryInput {
      id: None,
      name: author.to_string(),
      description: self.description.clone(),
      photo_url: None,
      lat: self.lat,
      lon: self.lon,
      created_at: None,
    }
  }
}

/// Credentials handed back by a successful login.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResult {
  pub user_id: String,
  pub name: String,
  pub token: String,
}
