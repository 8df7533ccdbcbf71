//! API paths for the church site.

pub const SERMONS: &str = "/api/sermons";
pub const EVENTS: &str = "/api/events";
pub const MINISTRIES: &str = "/api/ministries";
pub const PRAYER_REQUESTS: &str = "/api/prayer";
pub const CONTACT: &str = "/api/contact";
pub const NEWSLETTER: &str = "/api/newsletter";

const SEARCH: &str = "/api/search";

/// Search target for `query`.
///
/// The query is normalized so differently-cased searches share a cache entry.
pub fn search(query: &str) -> String {
  let query = normalize_query(query);
  let params = url::form_urlencoded::Serializer::new(String::new())
    .append_pair("q", &query)
    .finish();
  format!("{}?{}", SEARCH, params)
}

/// Trims, collapses inner whitespace and lowercases.
fn normalize_query(query: &str) -> String {
  query
    .split_whitespace()
    .collect::<Vec<_>>()
    .join(" ")
    .to_lowercase()
}
