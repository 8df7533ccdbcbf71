//! Church website API.

mod cached_client;
mod client;
pub mod endpoints;
pub mod types;

pub use cached_client::CachedSiteClient;
pub use client::SiteClient;
