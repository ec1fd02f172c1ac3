use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A show pulled from the user's Trakt list.
///
/// Immutable within one aggregation pass; its fields get denormalized onto
/// every episode it contributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Show {
    pub trakt_id: u64,
    pub title: String,
    pub year: Option<i32>,
    pub imdb_id: Option<String>,
    pub poster: Option<String>,
    pub fanart: Option<String>,
}

impl Show {
    /// Stable identity key for this show. Shows without an IMDb id fall back
    /// to a `trakt:{id}` key so lookups still work when the keep-policy is
    /// configured.
    pub fn key(&self) -> String {
        self.imdb_id
            .clone()
            .unwrap_or_else(|| format!("trakt:{}", self.trakt_id))
    }
}

/// Episode-level fields as fetched from upstream, before the owning show's
/// metadata is merged on.
#[derive(Debug, Clone, PartialEq)]
pub struct EpisodeInfo {
    pub season: u32,
    pub number: u32,
    pub title: Option<String>,
    pub overview: Option<String>,
    /// The episode's own IMDb id; many upstream episodes lack one.
    pub imdb_id: Option<String>,
    pub first_aired: Option<String>,
    pub runtime: Option<i32>,
}

/// A self-contained episode record: episode fields plus the owning show's
/// denormalized metadata.
///
/// Identity for lookup purposes is the triple (show key, season, number) -
/// never array position, which changes on every reshuffle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    pub season: u32,
    pub number: u32,
    pub title: Option<String>,
    pub overview: Option<String>,
    pub imdb_id: Option<String>,
    pub first_aired: Option<String>,
    pub runtime: Option<i32>,
    pub show_key: String,
    pub show_trakt_id: u64,
    pub show_title: String,
    pub show_year: Option<i32>,
    pub show_poster: Option<String>,
    pub show_fanart: Option<String>,
}

impl Episode {
    pub fn from_info(info: EpisodeInfo, show: &Show) -> Self {
        Self {
            season: info.season,
            number: info.number,
            title: info.title,
            overview: info.overview,
            imdb_id: info.imdb_id,
            first_aired: info.first_aired,
            runtime: info.runtime,
            show_key: show.key(),
            show_trakt_id: show.trakt_id,
            show_title: show.title.clone(),
            show_year: show.year,
            show_poster: show.poster.clone(),
            show_fanart: show.fanart.clone(),
        }
    }
}

/// How the aggregation pass orders the episode list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShufflePolicy {
    /// Uniformly random permutation of the whole episode list.
    Uniform,
    /// Round-robin interleave across shows so no show dominates a stretch.
    #[default]
    Fair,
}

/// One immutable, fully-ordered shuffled episode list produced by one
/// aggregation pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShuffledSnapshot {
    pub episodes: Vec<Episode>,
    pub created_at: DateTime<Utc>,
}

impl ShuffledSnapshot {
    pub fn new(episodes: Vec<Episode>) -> Self {
        Self {
            episodes,
            created_at: Utc::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.episodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.episodes.is_empty()
    }

    /// Page `[skip, skip+limit)` over the snapshot. A skip past the end
    /// clamps to an empty slice rather than erroring.
    pub fn page(&self, skip: usize, limit: usize) -> &[Episode] {
        if skip >= self.episodes.len() {
            return &[];
        }
        let end = skip.saturating_add(limit).min(self.episodes.len());
        &self.episodes[skip..end]
    }

    /// Look up a single episode by its identity triple. Returns the first
    /// match; duplicates would be a data-integrity violation upstream.
    pub fn find(&self, show_key: &str, season: u32, number: u32) -> Option<&Episode> {
        self.episodes
            .iter()
            .find(|ep| ep.show_key == show_key && ep.season == season && ep.number == number)
    }
}

/// Durable record mapping a fixed key to the location of the current
/// snapshot's serialized payload. Rewritten atomically on every publish.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CachePointer {
    pub key: String,
    pub blob_path: String,
    pub episode_count: i64,
    pub updated_at: String,
}
