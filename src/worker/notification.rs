//! Push payload parsing and local notification display.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::Result;

pub const DEFAULT_TITLE: &str = "New Update";
pub const DEFAULT_BODY: &str = "There is a new update available!";
const ICON: &str = "/images/logo.png";

pub const ACTION_VIEW_DETAILS: &str = "view-details";
pub const ACTION_DISMISS: &str = "dismiss";

#[derive(Debug, Default, Deserialize)]
struct PushPayload {
  title: Option<String>,
  message: Option<String>,
  url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationAction {
  pub action: String,
  pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
  pub title: String,
  pub body: String,
  pub icon: String,
  pub badge: String,
  pub url: String,
  pub actions: Vec<NotificationAction>,
}

impl Notification {
  /// Build a notification from a push message. An empty payload shows nothing.
  pub fn from_push(payload: &[u8]) -> Result<Option<Self>> {
    if payload.iter().all(u8::is_ascii_whitespace) {
      return Ok(None);
    }
    let data: PushPayload = serde_json::from_slice(payload)?;
    Ok(Some(Self {
      title: data
        .title
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| DEFAULT_TITLE.to_string()),
      body: data
        .message
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| DEFAULT_BODY.to_string()),
      icon: ICON.to_string(),
      badge: ICON.to_string(),
      url: data
        .url
        .filter(|u| !u.is_empty())
        .unwrap_or_else(|| "/".to_string()),
      actions: vec![
        NotificationAction {
          action: ACTION_VIEW_DETAILS.to_string(),
          title: "View Details".to_string(),
        },
        NotificationAction {
          action: ACTION_DISMISS.to_string(),
          title: "Dismiss".to_string(),
        },
      ],
    }))
  }
}

/// URL to open for a click on a notification. `action` is `None` for a click
/// on the notification body.
pub fn click_target(action: Option<&str>, url: &str) -> Option<String> {
  if url.is_empty() {
    return None;
  }
  match action {
    Some(ACTION_DISMISS) => None,
    _ => Some(url.to_string()),
  }
}

pub trait Notifier: Send + Sync {
  fn show(&self, notification: &Notification);
}

/// Prints notifications to the terminal.
pub struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
  fn show(&self, notification: &Notification) {
    info!(
      title = %notification.title,
      url = %notification.url,
      "showing notification"
    );
    println!("[{}] {}", notification.title, notification.body);
    let actions: Vec<&str> = notification.actions.iter().map(|a| a.title.as_str()).collect();
    println!("  {}  ({})", notification.url, actions.join(" | "));
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_defaults_fill_missing_fields() {
    let n = Notification::from_push(b"{}").unwrap().unwrap();
    assert_eq!(n.title, DEFAULT_TITLE);
    assert_eq!(n.body, DEFAULT_BODY);
    assert_eq!(n.url, "/");
    assert_eq!(n.icon, "/images/logo.png");
    let actions: Vec<_> = n.actions.iter().map(|a| a.action.as_str()).collect();
    assert_eq!(actions, vec!["view-details", "dismiss"]);
  }

  #[test]
  fn test_empty_strings_take_defaults() {
    let n = Notification::from_push(br#"{"title":"","message":"","url":""}"#)
      .unwrap()
      .unwrap();
    assert_eq!(n.title, DEFAULT_TITLE);
    assert_eq!(n.body, DEFAULT_BODY);
    assert_eq!(n.url, "/");
  }

  #[test]
  fn test_payload_fields_win() {
    let n = Notification::from_push(br#"{"title":"Story added","message":"hi","url":"/#/detail/1"}"#)
      .unwrap()
      .unwrap();
    assert_eq!(n.title, "Story added");
    assert_eq!(n.body, "hi");
    assert_eq!(n.url, "/#/detail/1");
  }

  #[test]
  fn test_empty_payload_shows_nothing() {
    assert_eq!(Notification::from_push(b"").unwrap(), None);
    assert!(Notification::from_push(b"not json").is_err());
  }

  #[test]
  fn test_click_targets() {
    assert_eq!(click_target(Some("view-details"), "/a"), Some("/a".to_string()));
    assert_eq!(click_target(None, "/a"), Some("/a".to_string()));
    assert_eq!(click_target(Some("dismiss"), "/a"), None);
    assert_eq!(click_target(None, ""), None);
  }
}
