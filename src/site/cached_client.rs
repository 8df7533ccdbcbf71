//! Typed site API layered over the offline manager.

use std::sync::Arc;

use color_eyre::{eyre::eyre, Result};
use serde::{de::DeserializeOwned, Serialize};

use crate::cache::{OfflineManager, PostOutcome, RequestOptions};

use super::endpoints;
use super::types::{
  ChurchEvent, ContactMessage, Listing, Ministry, NewsletterSignup, PrayerRequest, SearchHit,
  Sermon,
};

/// Site client with offline support.
///
/// Reads are served through the response cache; submissions are queued when
/// they cannot be delivered.
#[derive(Clone)]
pub struct CachedSiteClient {
  manager: Arc<OfflineManager>,
}

impl CachedSiteClient {
  pub fn new(manager: Arc<OfflineManager>) -> Self {
    Self { manager }
  }

  pub async fn sermons(&self) -> Result<Vec<Sermon>> {
    self.list(endpoints::SERMONS).await
  }

  pub async fn events(&self) -> Result<Vec<ChurchEvent>> {
    self.list(endpoints::EVENTS).await
  }

  pub async fn ministries(&self) -> Result<Vec<Ministry>> {
    self.list(endpoints::MINISTRIES).await
  }

  pub async fn search(&self, query: &str) -> Result<Vec<SearchHit>> {
    self.list(&endpoints::search(query)).await
  }

  pub async fn submit_prayer_request(&self, request: &PrayerRequest) -> Result<PostOutcome> {
    self.submit(endpoints::PRAYER_REQUESTS, request).await
  }

  pub async fn send_contact_message(&self, message: &ContactMessage) -> Result<PostOutcome> {
    self.submit(endpoints::CONTACT, message).await
  }

  pub async fn subscribe_newsletter(&self, email: &str) -> Result<PostOutcome> {
    let signup = NewsletterSignup {
      email: email.trim().to_string(),
    };
    self.submit(endpoints::NEWSLETTER, &signup).await
  }

  async fn list<T: DeserializeOwned>(&self, target: &str) -> Result<Vec<T>> {
    let data = self
      .manager
      .fetch_with_cache(target, &RequestOptions::read())
      .await
      .map_err(|e| eyre!("Failed to load {}: {}", target, e))?;

    let listing: Listing<T> =
      serde_json::from_value(data).map_err(|e| eyre!("Failed to parse {}: {}", target, e))?;

    Ok(listing.into_vec())
  }

  async fn submit<T: Serialize>(&self, target: &str, body: &T) -> Result<PostOutcome> {
    let payload = serde_json::to_value(body)
      .map_err(|e| eyre!("Failed to serialize request for {}: {}", target, e))?;

    self
      .manager
      .post_with_sync(target, payload)
      .await
      .map_err(|e| eyre!("Failed to submit to {} (queued for retry): {}", target, e))
  }
}
