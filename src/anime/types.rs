/// Placeholder stored when a detail payload carries no synopsis
pub const MISSING_SYNOPSIS: &str = "No synopsis available";

/// Placeholder stored when a detail payload carries no airing status
pub const UNKNOWN_STATUS: &str = "Unknown";

/// A row of the anime cache table.
///
/// Only list-level fields are populated until a detail fetch has succeeded,
/// at which point `detail_fetched` is set and `synopsis`/`status` are present.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheRecord {
  pub id: i64,
  pub title: String,
  pub image_url: String,
  pub episodes: Option<i64>,
  pub score: Option<f64>,
  pub synopsis: Option<String>,
  /// Genre names encoded with [`encode_genres`]
  pub genres: Option<String>,
  pub status: Option<String>,
  pub trailer_url: Option<String>,
  /// Milliseconds since the Unix epoch
  pub last_updated: i64,
  pub detail_fetched: bool,
}

impl CacheRecord {
  /// Project to the list view. Always defined.
  pub fn to_summary(&self) -> AnimeSummary {
    AnimeSummary {
      id: self.id,
      title: self.title.clone(),
      image_url: self.image_url.clone(),
      episodes: self.episodes,
      score: self.score,
    }
  }

  /// Project to the detail view.
  ///
  /// Returns `None` until the record has been populated by a detail fetch.
  pub fn to_detail(&self) -> Option<AnimeDetail> {
    if !self.detail_fetched {
      return None;
    }
    let synopsis = self.synopsis.clone()?;
    let status = self.status.clone()?;

    Some(AnimeDetail {
      id: self.id,
      title: self.title.clone(),
      image_url: self.image_url.clone(),
      synopsis,
      genres: self.genres.as_deref().map(decode_genres).unwrap_or_default(),
      episodes: self.episodes,
      score: self.score,
      status,
      trailer_url: self.trailer_url.clone(),
    })
  }
}

/// Anime as shown in the top list
#[derive(Debug, Clone, PartialEq)]
pub struct AnimeSummary {
  pub id: i64,
  pub title: String,
  pub image_url: String,
  pub episodes: Option<i64>,
  pub score: Option<f64>,
}

impl AnimeSummary {
  pub fn formatted_score(&self) -> String {
    self
      .score
      .map(|s| format!("{:.1}", s))
      .unwrap_or_else(|| "N/A".to_string())
  }

  pub fn formatted_episodes(&self) -> String {
    format_episodes(self.episodes)
  }
}

/// Full anime details
#[derive(Debug, Clone, PartialEq)]
pub struct AnimeDetail {
  pub id: i64,
  pub title: String,
  pub image_url: String,
  pub synopsis: String,
  pub genres: Vec<String>,
  pub episodes: Option<i64>,
  pub score: Option<f64>,
  pub status: String,
  pub trailer_url: Option<String>,
}

impl AnimeDetail {
  pub fn formatted_score(&self) -> String {
    self
      .score
      .map(|s| format!("{:.1}/10", s))
      .unwrap_or_else(|| "N/A".to_string())
  }

  pub fn formatted_episodes(&self) -> String {
    format_episodes(self.episodes)
  }

  pub fn genres_text(&self) -> String {
    self.genres.join(" • ")
  }

  pub fn has_trailer(&self) -> bool {
    self
      .trailer_url
      .as_deref()
      .is_some_and(|url| !url.trim().is_empty())
  }
}

fn format_episodes(episodes: Option<i64>) -> String {
  match episodes {
    Some(n) => format!("{} Episodes", n),
    None => "Unknown".to_string(),
  }
}

/// Encode a genre list for the single `genres` column.
///
/// Stored as a JSON array so names containing commas survive the round-trip.
pub fn encode_genres(genres: &[String]) -> String {
  serde_json::to_string(genres).unwrap_or_else(|_| genres.join(","))
}

/// Decode the `genres` column.
///
/// Falls back to the plain comma-joined form for rows not written as JSON.
pub fn decode_genres(stored: &str) -> Vec<String> {
  if let Ok(genres) = serde_json::from_str::<Vec<String>>(stored) {
    return genres.into_iter().map(|g| g.trim().to_string()).collect();
  }

  stored
    .split(',')
    .map(str::trim)
    .filter(|g| !g.is_empty())
    .map(String::from)
    .collect()
}
