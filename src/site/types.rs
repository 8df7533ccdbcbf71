use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a CMS document; numeric or string depending on the backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResourceId {
  Number(u64),
  Text(String),
}

impl fmt::Display for ResourceId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Number(n) => write!(f, "{}", n),
      Self::Text(s) => f.write_str(s),
    }
  }
}

/// A list response: either a bare array or wrapped in `data` / `hits` / `results`
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum Listing<T> {
  Bare(Vec<T>),
  Wrapped {
    #[serde(alias = "hits", alias = "results")]
    data: Vec<T>,
  },
}

impl<T> Listing<T> {
  pub fn into_vec(self) -> Vec<T> {
    match self {
      Self::Bare(items) | Self::Wrapped { data: items } => items,
    }
  }
}

/// Sermon summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sermon {
  pub id: ResourceId,
  pub title: String,
  #[serde(default)]
  pub speaker: Option<String>,
  /// Date as published by the CMS (usually YYYY-MM-DD)
  #[serde(default)]
  pub date: Option<String>,
  #[serde(default)]
  pub scripture: Option<String>,
  #[serde(default)]
  pub media_url: Option<String>,
}

/// Calendar event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChurchEvent {
  pub id: ResourceId,
  pub title: String,
  #[serde(default, alias = "start")]
  pub starts_at: Option<String>,
  #[serde(default, alias = "end")]
  pub ends_at: Option<String>,
  #[serde(default)]
  pub location: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ministry {
  pub slug: String,
  pub name: String,
  #[serde(default)]
  pub summary: Option<String>,
  #[serde(default)]
  pub leader: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
  pub title: String,
  pub url: String,
  #[serde(default)]
  pub excerpt: Option<String>,
  /// Content type, e.g. "sermon" or "page"
  #[serde(default, rename = "type")]
  pub kind: Option<String>,
}

/// Prayer request submitted from the prayer wall form
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrayerRequest {
  pub title: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub body: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub name: Option<String>,
  #[serde(default)]
  pub is_private: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactMessage {
  pub name: String,
  pub email: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub subject: Option<String>,
  pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsletterSignup {
  pub email: String,
}
