//! Serde-deserializable types matching the story service's responses.
//!
//! Every response carries `error` and `message`; the payload field depends
//! on the endpoint.

use serde::Deserialize;

use super::types::{LoginResult, Story};

/// Body of any non-2xx response.
#[derive(Debug, Deserialize)]
pub struct ApiMessage {
  #[serde(default)]
  pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct ApiRegisterResponse {
  #[serde(default)]
  pub message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiLoginResponse {
  pub login_result: LoginResult,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiListResponse {
  #[serde(default)]
  pub list_story: Vec<Story>,
}

#[derive(Debug, Deserialize)]
pub struct ApiCreateResponse {
  pub story: Story,
}
