use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use url::Url;

use crate::anime::api_types::{ApiAnimeDetail, ApiAnimeDetailResponse, ApiTopAnimeResponse};
use crate::config::Config;

/// Failure kinds of the remote source
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
  #[error("network error: {0}")]
  Network(#[from] reqwest::Error),

  #[error("unexpected HTTP status {0}")]
  Status(StatusCode),

  #[error("rate limited by remote API")]
  RateLimited,

  #[error("malformed payload: {0}")]
  Decode(#[from] serde_json::Error),
}

/// Remote source of truth for anime data
#[async_trait]
pub trait AnimeSource: Send + Sync {
  /// Fetch one page of the top anime ranking.
  async fn fetch_top_list(&self, page: u32, limit: u32) -> Result<ApiTopAnimeResponse, SourceError>;

  /// Fetch the full record for a single anime.
  async fn fetch_detail(&self, id: i64) -> Result<ApiAnimeDetail, SourceError>;
}

/// Run `request`, retrying it exactly once after `backoff` if the remote
/// signals a rate limit.
pub async fn retry_on_rate_limit<T, F, Fut>(backoff: Duration, mut request: F) -> Result<T, SourceError>
where
  F: FnMut() -> Fut,
  Fut: Future<Output = Result<T, SourceError>>,
{
  match request().await {
    Err(SourceError::RateLimited) => {
      warn!(backoff_ms = backoff.as_millis() as u64, "Rate limited, retrying once");
      tokio::time::sleep(backoff).await;
      request().await
    }
    other => other,
  }
}

/// Jikan REST API client
#[derive(Clone)]
pub struct JikanClient {
  http: reqwest::Client,
  base_url: Url,
  rate_limit_backoff: Duration,
}

impl JikanClient {
  pub fn new(config: &Config) -> Result<Self> {
    let mut base_url = Url::parse(&config.api.base_url)
      .map_err(|e| eyre!("Invalid API base URL {}: {}", config.api.base_url, e))?;

    // Url::join drops the last path segment unless it ends with a slash
    if !base_url.path().ends_with('/') {
      let path = format!("{}/", base_url.path());
      base_url.set_path(&path);
    }

    let http = reqwest::Client::builder()
      .timeout(Duration::from_secs(config.api.timeout_secs))
      .user_agent(concat!("anicache/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      http,
      base_url,
      rate_limit_backoff: Duration::from_millis(config.api.rate_limit_backoff_ms),
    })
  }

  fn endpoint(&self, path: &str) -> Url {
    // base_url was validated in new(), so joining a relative path cannot fail
    self
      .base_url
      .join(path)
      .unwrap_or_else(|_| self.base_url.clone())
  }

  async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, SourceError> {
    debug!(%url, "GET");
    let response = self.http.get(url.clone()).send().await?;

    let status = response.status();
    if status == StatusCode::TOO_MANY_REQUESTS {
      return Err(SourceError::RateLimited);
    }
    if !status.is_success() {
      return Err(SourceError::Status(status));
    }

    let body = response.bytes().await?;
    Ok(serde_json::from_slice(&body)?)
  }
}

#[async_trait]
impl AnimeSource for JikanClient {
  async fn fetch_top_list(&self, page: u32, limit: u32) -> Result<ApiTopAnimeResponse, SourceError> {
    let mut url = self.endpoint("top/anime");
    url
      .query_pairs_mut()
      .append_pair("page", &page.to_string())
      .append_pair("limit", &limit.to_string());

    retry_on_rate_limit(self.rate_limit_backoff, || self.get_json(url.clone())).await
  }

  async fn fetch_detail(&self, id: i64) -> Result<ApiAnimeDetail, SourceError> {
    let url = self.endpoint(&format!("anime/{}", id));

    let response: ApiAnimeDetailResponse =
      retry_on_rate_limit(self.rate_limit_backoff, || self.get_json(url.clone())).await?;
    Ok(response.data)
  }
}
