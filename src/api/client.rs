use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use super::api_types::{
  ApiCreateResponse, ApiListResponse, ApiLoginResponse, ApiMessage, ApiRegisterResponse,
};
use super::types::{LoginResult, Story};
use super::RemoteApi;
use crate::config::ApiConfig;
use crate::error::{Result, SyncError};
use crate::sync::queue::OutboundRequest;

/// HTTP client for the story service.
#[derive(Clone)]
pub struct HttpGateway {
  client: reqwest::Client,
  base_url: String,
}

impl HttpGateway {
  pub fn new(config: &ApiConfig) -> Result<Self> {
    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(config.timeout_secs))
      .build()
      .map_err(|e| SyncError::Network(format!("Failed to create HTTP client: {}", e)))?;

    Ok(Self {
      client,
      base_url: config.base_url.trim_end_matches('/').to_string(),
    })
  }

  fn endpoint(&self, path: &str) -> String {
    format!("{}/{}", self.base_url, path.trim_start_matches('/'))
  }

  async fn send(&self, request: reqwest::RequestBuilder) -> Result<Response> {
    request
      .send()
      .await
      .map_err(|e| SyncError::Network(e.to_string()))
  }
}

/// Decode a response body, turning non-2xx statuses into `SyncError::Server`.
async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T> {
  let status = response.status();
  let body = response
    .bytes()
    .await
    .map_err(|e| SyncError::Network(format!("Failed to read response body: {}", e)))?;
  decode_body(status, &body)
}

fn decode_body<T: DeserializeOwned>(status: StatusCode, body: &[u8]) -> Result<T> {
  if !status.is_success() {
    let message = serde_json::from_slice::<ApiMessage>(body)
      .map(|m| m.message)
      .ok()
      .filter(|m| !m.is_empty())
      .unwrap_or_else(|| {
        status
          .canonical_reason()
          .unwrap_or("request failed")
          .to_string()
      });
    return Err(SyncError::Server {
      status: status.as_u16(),
      message,
    });
  }
  serde_json::from_slice(body).map_err(|e| SyncError::Server {
    status: status.as_u16(),
    message: format!("Unreadable response body: {}", e),
  })
}

fn story_form(request: &OutboundRequest) -> Result<Form> {
  let draft = &request.body;
  let photo = Part::bytes(draft.photo.data.clone())
    .file_name(draft.photo.file_name.clone())
    .mime_str(&draft.photo.content_type)
    .map_err(|e| SyncError::Validation(format!("Invalid photo content type: {}", e)))?;

  let mut form = Form::new()
    .text("description", draft.description.clone())
    .part("photo", photo);
  if let (Some(lat), Some(lon)) = (draft.lat, draft.lon) {
    form = form.text("lat", lat.to_string()).text("lon", lon.to_string());
  }
  Ok(form)
}

#[async_trait]
impl RemoteApi for HttpGateway {
  async fn register(&self, name: &str, email: &str, password: &str) -> Result<String> {
    let response = self
      .send(
        self
          .client
          .post(self.endpoint("/register"))
          .json(&json!({ "name": name, "email": email, "password": password })),
      )
      .await?;
    let body: ApiRegisterResponse = read_json(response).await?;
    Ok(body.message)
  }

  async fn login(&self, email: &str, password: &str) -> Result<LoginResult> {
    let response = self
      .send(
        self
          .client
          .post(self.endpoint("/login"))
          .json(&json!({ "email": email, "password": password })),
      )
      .await?;
    let body: ApiLoginResponse = read_json(response).await?;
    Ok(body.login_result)
  }

  async fn list_stories(&self, token: &str) -> Result<Vec<Story>> {
    let response = self
      .send(
        self
          .client
          .get(self.endpoint("/stories"))
          .bearer_auth(token),
      )
      .await?;
    let body: ApiListResponse = read_json(response).await?;
    debug!(count = body.list_story.len(), "fetched stories");
    Ok(body.list_story)
  }

  async fn submit_story(&self, request: &OutboundRequest) -> Result<Story> {
    let method = Method::from_bytes(request.method.as_bytes())
      .map_err(|_| SyncError::Validation(format!("Invalid method {}", request.method)))?;

    let mut builder = self
      .client
      .request(method, self.endpoint(&request.target))
      .multipart(story_form(request)?);
    for (name, value) in &request.headers {
      builder = builder.header(name.as_str(), value.as_str());
    }

    let response = self.send(builder).await?;
    let body: ApiCreateResponse = read_json(response).await?;
    debug!(id = %body.story.id, "story accepted");
    Ok(body.story)
  }
}
