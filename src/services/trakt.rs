// Trakt metadata provider service
// API Documentation: https://trakt.docs.apiary.io/

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sqlx::SqlitePool;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};

use crate::db;
use crate::models::{EpisodeInfo, Show};
use crate::services::expander::EpisodeSource;

const TRAKT_API_BASE: &str = "https://api.trakt.tv";
const METAHUB_IMAGE_BASE: &str = "https://images.metahub.space";

#[derive(Debug, Error)]
pub enum TraktError {
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error("Trakt returned {status} for {url}")]
    Status { status: StatusCode, url: String },

    #[error("authentication rejected after token refresh")]
    Unauthorized,

    #[error("token refresh failed with status {0}")]
    TokenRefresh(StatusCode),
}

/// Settings for building a [`TraktClient`], resolved from config/env.
#[derive(Debug, Clone)]
pub struct TraktOptions {
    pub api_base: Option<String>,
    pub client_id: String,
    pub client_secret: String,
    pub access_token: String,
    pub refresh_token: String,
    pub username: String,
    pub list_id: String,
    pub request_timeout: Duration,
    /// Keep season 0 (specials) episodes. Default policy drops them.
    pub include_specials: bool,
    /// Drop shows that have no IMDb id. When kept, such shows get a
    /// `trakt:{id}` identity key.
    pub require_imdb_ids: bool,
}

struct TokenPair {
    access: String,
    refresh: String,
}

/// Authenticated Trakt API client.
///
/// Holds the bearer credential pair; on a 401 it performs exactly one token
/// refresh and retries the failed request once. Rotated tokens are persisted
/// so a restart keeps the new credential.
pub struct TraktClient {
    client: Client,
    api_base: String,
    client_id: String,
    client_secret: String,
    username: String,
    list_id: String,
    include_specials: bool,
    require_imdb_ids: bool,
    tokens: RwLock<TokenPair>,
    refresh_guard: Mutex<()>,
    db: SqlitePool,
}

// ---- Raw Trakt response shapes --------------------------------------------
// Fields the upstream sometimes omits are Options; validation happens here
// at the boundary, not downstream.

#[derive(Debug, Deserialize)]
pub struct ListItem {
    pub show: Option<TraktShow>,
}

#[derive(Debug, Deserialize)]
pub struct TraktShow {
    pub title: String,
    pub year: Option<i32>,
    #[serde(default)]
    pub ids: TraktIds,
}

#[derive(Debug, Default, Deserialize)]
pub struct TraktIds {
    pub trakt: Option<u64>,
    pub slug: Option<String>,
    pub imdb: Option<String>,
    pub tvdb: Option<i64>,
    pub tmdb: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct SeasonNode {
    pub number: i64,
    pub episodes: Option<Vec<EpisodeNode>>,
}

#[derive(Debug, Deserialize)]
pub struct EpisodeNode {
    pub number: u32,
    pub title: Option<String>,
    pub overview: Option<String>,
    pub first_aired: Option<String>,
    pub runtime: Option<i32>,
    #[serde(default)]
    pub ids: TraktIds,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
}

impl TraktClient {
    pub fn new(options: TraktOptions, pool: SqlitePool) -> Result<Self> {
        let client = Client::builder()
            .timeout(options.request_timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            api_base: options
                .api_base
                .unwrap_or_else(|| TRAKT_API_BASE.to_string()),
            client_id: options.client_id,
            client_secret: options.client_secret,
            username: options.username,
            list_id: options.list_id,
            include_specials: options.include_specials,
            require_imdb_ids: options.require_imdb_ids,
            tokens: RwLock::new(TokenPair {
                access: options.access_token,
                refresh: options.refresh_token,
            }),
            refresh_guard: Mutex::new(()),
            db: pool,
        })
    }

    async fn send(&self, url: &str) -> Result<reqwest::Response, TraktError> {
        let access = self.tokens.read().await.access.clone();
        let response = self
            .client
            .get(url)
            .header("Content-Type", "application/json")
            .header("trakt-api-version", "2")
            .header("trakt-api-key", &self.client_id)
            .bearer_auth(access)
            .send()
            .await?;
        Ok(response)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, TraktError> {
        let url = format!("{}{}", self.api_base, path);
        let mut response = self.send(&url).await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            let stale = self.tokens.read().await.access.clone();
            self.refresh_access_token(&stale).await?;
            response = self.send(&url).await?;
            if response.status() == StatusCode::UNAUTHORIZED {
                return Err(TraktError::Unauthorized);
            }
        }

        if !response.status().is_success() {
            return Err(TraktError::Status {
                status: response.status(),
                url,
            });
        }

        Ok(response.json().await?)
    }

    /// Exchange the refresh token for a new credential pair. `stale` is the
    /// access token that was just rejected; if another request already
    /// rotated it while we waited on the guard, nothing is done.
    async fn refresh_access_token(&self, stale: &str) -> Result<(), TraktError> {
        let _guard = self.refresh_guard.lock().await;

        let refresh = {
            let tokens = self.tokens.read().await;
            if tokens.access != stale {
                return Ok(());
            }
            tokens.refresh.clone()
        };

        let body = serde_json::json!({
            "refresh_token": refresh,
            "client_id": self.client_id,
            "client_secret": self.client_secret,
            "redirect_uri": "urn:ietf:wg:oauth:2.0:oob",
            "grant_type": "refresh_token",
        });

        let response = self
            .client
            .post(format!("{}/oauth/token", self.api_base))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(TraktError::TokenRefresh(response.status()));
        }

        let fresh: TokenResponse = response.json().await?;
        {
            let mut tokens = self.tokens.write().await;
            tokens.access = fresh.access_token.clone();
            tokens.refresh = fresh.refresh_token.clone();
        }

        // Best effort: a failed write only costs us the rotation on restart.
        if let Err(e) = db::save_tokens(&self.db, &fresh.access_token, &fresh.refresh_token).await {
            tracing::warn!("Failed to persist rotated Trakt tokens: {:#}", e);
        }

        tracing::info!("Refreshed Trakt access token");
        Ok(())
    }
}

#[async_trait]
impl EpisodeSource for TraktClient {
    async fn fetch_show_list(&self) -> Result<Vec<Show>> {
        let path = format!("/users/{}/lists/{}/items/shows", self.username, self.list_id);
        let items: Vec<ListItem> = self
            .get_json(&path)
            .await
            .with_context(|| format!("Failed to fetch Trakt list '{}'", self.list_id))?;

        let shows = shows_from_list(items, self.require_imdb_ids);
        tracing::info!("Found {} shows in list '{}'", shows.len(), self.list_id);
        Ok(shows)
    }

    async fn fetch_episodes_for_show(&self, show: &Show) -> Result<Vec<EpisodeInfo>> {
        let path = format!("/shows/{}/seasons?extended=full,episodes", show.trakt_id);
        let seasons: Vec<SeasonNode> = self
            .get_json(&path)
            .await
            .with_context(|| format!("Failed to fetch seasons for '{}'", show.title))?;

        Ok(episodes_from_seasons(seasons, self.include_specials))
    }
}

/// Poster and fanart URLs derived from a show's IMDb id.
fn artwork_for(imdb_id: &str) -> (String, String) {
    (
        format!("{METAHUB_IMAGE_BASE}/poster/medium/{imdb_id}/img"),
        format!("{METAHUB_IMAGE_BASE}/background/medium/{imdb_id}/img"),
    )
}

/// Validate raw list items into [`Show`]s, applying the IMDb-id policy.
fn shows_from_list(items: Vec<ListItem>, require_imdb_ids: bool) -> Vec<Show> {
    items
        .into_iter()
        .filter_map(|item| item.show)
        .filter_map(|show| {
            let Some(trakt_id) = show.ids.trakt else {
                tracing::warn!("Skipping '{}': no Trakt id on list item", show.title);
                return None;
            };
            if require_imdb_ids && show.ids.imdb.is_none() {
                tracing::warn!("Skipping '{}': no IMDb id", show.title);
                return None;
            }

            let (poster, fanart) = match show.ids.imdb.as_deref() {
                Some(imdb) => {
                    let (poster, fanart) = artwork_for(imdb);
                    (Some(poster), Some(fanart))
                }
                None => (None, None),
            };

            Some(Show {
                trakt_id,
                title: show.title,
                year: show.year,
                imdb_id: show.ids.imdb,
                poster,
                fanart,
            })
        })
        .collect()
}

/// Flatten season trees into episode records, applying the specials policy.
fn episodes_from_seasons(seasons: Vec<SeasonNode>, include_specials: bool) -> Vec<EpisodeInfo> {
    let mut episodes = Vec::new();
    for season in seasons {
        if season.number <= 0 && !include_specials {
            continue;
        }
        let Ok(season_number) = u32::try_from(season.number) else {
            continue;
        };
        for episode in season.episodes.unwrap_or_default() {
            episodes.push(EpisodeInfo {
                season: season_number,
                number: episode.number,
                title: episode.title,
                overview: episode.overview,
                imdb_id: episode.ids.imdb,
                first_aired: episode.first_aired,
                runtime: episode.runtime,
            });
        }
    }
    episodes
}
