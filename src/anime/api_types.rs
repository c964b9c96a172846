//! Serde-deserializable types matching Jikan API responses.
//!
//! These types are separate from the cache record so deserialization can
//! follow the wire format while the stored shape stays flat.

use chrono::Utc;
use serde::Deserialize;

use super::types::{encode_genres, CacheRecord, MISSING_SYNOPSIS, UNKNOWN_STATUS};

// ============================================================================
// Common nested field types
// ============================================================================

#[derive(Debug, Deserialize, Default)]
pub struct ApiJpgImages {
  pub image_url: Option<String>,
  pub small_image_url: Option<String>,
  pub large_image_url: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct ApiImages {
  #[serde(default)]
  pub jpg: ApiJpgImages,
}

impl ApiImages {
  /// Largest jpg variant the payload carries.
  pub fn best_url(&self) -> String {
    let jpg = &self.jpg;
    jpg
      .large_image_url
      .as_ref()
      .or(jpg.image_url.as_ref())
      .or(jpg.small_image_url.as_ref())
      .cloned()
      .unwrap_or_default()
  }
}

#[derive(Debug, Deserialize)]
pub struct ApiGenre {
  pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct ApiTrailer {
  pub youtube_id: Option<String>,
  pub embed_url: Option<String>,
}

impl ApiTrailer {
  pub fn embeddable_url(&self) -> Option<String> {
    self
      .embed_url
      .clone()
      .filter(|u| !u.is_empty())
      .or_else(|| {
        self
          .youtube_id
          .as_ref()
          .filter(|id| !id.is_empty())
          .map(|id| format!("https://www.youtube.com/embed/{}", id))
      })
  }
}

// ============================================================================
// Top list endpoint response
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiAnime {
  pub mal_id: i64,
  #[serde(default)]
  pub title: String,
  #[serde(default)]
  pub images: ApiImages,
  pub episodes: Option<i64>,
  pub score: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct ApiPagination {
  #[serde(default)]
  pub has_next_page: bool,
}

#[derive(Debug, Deserialize)]
pub struct ApiTopAnimeResponse {
  #[serde(default)]
  pub data: Vec<ApiAnime>,
  #[serde(default)]
  pub pagination: ApiPagination,
}

// ============================================================================
// Detail endpoint response
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiAnimeDetail {
  pub mal_id: i64,
  #[serde(default)]
  pub title: String,
  #[serde(default)]
  pub images: ApiImages,
  pub synopsis: Option<String>,
  #[serde(default)]
  pub genres: Vec<ApiGenre>,
  pub episodes: Option<i64>,
  pub score: Option<f64>,
  pub status: Option<String>,
  pub trailer: Option<ApiTrailer>,
}

#[derive(Debug, Deserialize)]
pub struct ApiAnimeDetailResponse {
  pub data: ApiAnimeDetail,
}

// ============================================================================
// Conversions to cache records
// ============================================================================

impl ApiAnime {
  pub fn into_record(self) -> CacheRecord {
    CacheRecord {
      id: self.mal_id,
      image_url: self.images.best_url(),
      title: self.title,
      episodes: self.episodes,
      score: self.score,
      synopsis: None,
      genres: None,
      status: None,
      trailer_url: None,
      last_updated: Utc::now().timestamp_millis(),
      detail_fetched: false,
    }
  }
}

impl ApiAnimeDetail {
  pub fn into_record(self) -> CacheRecord {
    let genres: Vec<String> = self.genres.into_iter().map(|g| g.name).collect();
    CacheRecord {
      id: self.mal_id,
      image_url: self.images.best_url(),
      title: self.title,
      episodes: self.episodes,
      score: self.score,
      synopsis: Some(
        self
          .synopsis
          .unwrap_or_else(|| MISSING_SYNOPSIS.to_string()),
      ),
      genres: Some(encode_genres(&genres)),
      status: Some(self.status.unwrap_or_else(|| UNKNOWN_STATUS.to_string())),
      trailer_url: self.trailer.as_ref().and_then(ApiTrailer::embeddable_url),
      last_updated: Utc::now().timestamp_millis(),
      detail_fetched: true,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const TOP_PAGE: &str = r#"{
    "data": [
      {
        "mal_id": 52991,
        "title": "Sousou no Frieren",
        "images": {
          "jpg": {
            "image_url": "https://cdn.example/52991.jpg",
            "small_image_url": "https://cdn.example/52991t.jpg",
            "large_image_url": "https://cdn.example/52991l.jpg"
          }
        },
        "episodes": 28,
        "score": 9.3,
        "rank": 1
      },
      {
        "mal_id": 1,
        "title": "Untitled",
        "images": { "jpg": { "image_url": "https://cdn.example/1.jpg" } },
        "episodes": null,
        "score": null
      }
    ],
    "pagination": { "last_visible_page": 1143, "has_next_page": true }
  }"#;

  const DETAIL: &str = r#"{
    "data": {
      "mal_id": 5114,
      "title": "Fullmetal Alchemist: Brotherhood",
      "images": { "jpg": { "large_image_url": "https://cdn.example/5114l.jpg" } },
      "synopsis": null,
      "genres": [
        { "mal_id": 1, "type": "anime", "name": "Action" },
        { "mal_id": 8, "type": "anime", "name": "Drama" }
      ],
      "episodes": 64,
      "score": 9.1,
      "status": "Finished Airing",
      "trailer": { "youtube_id": "--IcmZkvL0Q", "url": null, "embed_url": null }
    }
  }"#;

  #[test]
  fn test_list_item_maps_to_list_record() {
    let page: ApiTopAnimeResponse = serde_json::from_str(TOP_PAGE).unwrap();
    assert!(page.pagination.has_next_page);

    let records: Vec<CacheRecord> = page.data.into_iter().map(ApiAnime::into_record).collect();
    assert_eq!(records[0].id, 52991);
    assert_eq!(records[0].image_url, "https://cdn.example/52991l.jpg");
    assert_eq!(records[0].score, Some(9.3));
    assert!(!records[0].detail_fetched);
    assert!(records[0].synopsis.is_none());

    // Falls back to the regular image when no large one is present
    assert_eq!(records[1].image_url, "https://cdn.example/1.jpg");
    assert_eq!(records[1].episodes, None);
  }

  #[test]
  fn test_detail_maps_to_detailed_record() {
    let response: ApiAnimeDetailResponse = serde_json::from_str(DETAIL).unwrap();
    let record = response.data.into_record();

    assert!(record.detail_fetched);
    assert_eq!(record.synopsis.as_deref(), Some(MISSING_SYNOPSIS));
    assert_eq!(
      record.trailer_url.as_deref(),
      Some("https://www.youtube.com/embed/--IcmZkvL0Q")
    );

    let detail = record.to_detail().unwrap();
    assert_eq!(detail.genres, vec!["Action", "Drama"]);
    assert_eq!(detail.status, "Finished Airing");
  }

  #[test]
  fn test_null_status_falls_back_to_placeholder() {
    let json = r#"{
      "data": {
        "mal_id": 7,
        "title": "Quiet One",
        "synopsis": "Short.",
        "genres": [],
        "episodes": null,
        "score": null,
        "status": null,
        "trailer": null
      }
    }"#;

    let response: ApiAnimeDetailResponse = serde_json::from_str(json).unwrap();
    let detail = response.data.into_record().to_detail().unwrap();
    assert_eq!(detail.status, UNKNOWN_STATUS);
    assert_eq!(detail.synopsis, "Short.");
    assert!(detail.genres.is_empty());
  }
}
