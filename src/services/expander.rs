// Episode expander - turns a show list into a flat, denormalized episode list
//
// Fetches run in fixed-size concurrent batches; each batch is joined before
// the next starts to keep upstream load predictable. A failed per-show fetch
// contributes zero episodes and is logged, never aborting the pass.

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{Episode, EpisodeInfo, Show};

/// Abstract upstream metadata provider. Implemented by the Trakt client and
/// by mocks in tests.
#[async_trait]
pub trait EpisodeSource: Send + Sync {
    /// Fetch the membership of the configured show list. A failure here is
    /// fatal to the whole aggregation pass.
    async fn fetch_show_list(&self) -> Result<Vec<Show>>;

    /// Fetch all episodes for one show. Failures are isolated to that show.
    async fn fetch_episodes_for_show(&self, show: &Show) -> Result<Vec<EpisodeInfo>>;
}

/// Expand a show list into episode records, merging each show's metadata
/// onto its episodes.
pub async fn expand(source: &dyn EpisodeSource, shows: &[Show], batch_size: usize) -> Vec<Episode> {
    let batch_size = batch_size.max(1);
    let mut episodes = Vec::new();

    for batch in shows.chunks(batch_size) {
        let fetches = batch
            .iter()
            .map(|show| async move { (show, source.fetch_episodes_for_show(show).await) });

        for (show, result) in futures::future::join_all(fetches).await {
            match result {
                Ok(infos) => {
                    tracing::debug!("{}: {} episodes", show.title, infos.len());
                    episodes.extend(infos.into_iter().map(|info| Episode::from_info(info, show)));
                }
                Err(e) => {
                    tracing::warn!("Skipping show '{}': {:#}", show.title, e);
                }
            }
        }
    }

    episodes
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn show(trakt_id: u64, imdb_id: &str, title: &str) -> Show {
        Show {
            trakt_id,
            title: title.to_string(),
            year: Some(2000),
            imdb_id: Some(imdb_id.to_string()),
            poster: Some(format!("https://images.metahub.space/poster/medium/{imdb_id}/img")),
            fanart: None,
        }
    }

    fn info(season: u32, number: u32) -> EpisodeInfo {
        EpisodeInfo {
            season,
            number,
            title: Some(format!("S{season}E{number}")),
            overview: Some("An episode".to_string()),
            imdb_id: None,
            first_aired: None,
            runtime: Some(22),
        }
    }

    struct MockSource {
        shows: Vec<Show>,
        episodes: HashMap<u64, Vec<EpisodeInfo>>,
        failing: Vec<u64>,
        fetches: AtomicUsize,
    }

    impl MockSource {
        fn new(shows: Vec<Show>, episodes: HashMap<u64, Vec<EpisodeInfo>>) -> Self {
            Self {
                shows,
                episodes,
                failing: Vec::new(),
                fetches: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl EpisodeSource for MockSource {
        async fn fetch_show_list(&self) -> Result<Vec<Show>> {
            Ok(self.shows.clone())
        }

        async fn fetch_episodes_for_show(&self, show: &Show) -> Result<Vec<EpisodeInfo>> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if self.failing.contains(&show.trakt_id) {
                bail!("upstream returned 500");
            }
            Ok(self.episodes.get(&show.trakt_id).cloned().unwrap_or_default())
        }
    }

    fn fixture() -> MockSource {
        let shows = vec![show(1, "tt1", "One"), show(2, "tt2", "Two"), show(3, "tt3", "Three")];
        let mut episodes = HashMap::new();
        for s in &shows {
            episodes.insert(s.trakt_id, vec![info(1, 1), info(1, 2), info(2, 1)]);
        }
        MockSource::new(shows, episodes)
    }

    #[tokio::test]
    async fn test_expand_denormalizes_show_fields() {
        let source = fixture();
        let shows = source.fetch_show_list().await.unwrap();

        let episodes = expand(&source, &shows, 2).await;
        assert_eq!(episodes.len(), 9);

        let ep = episodes.iter().find(|e| e.show_key == "tt2").unwrap();
        assert_eq!(ep.show_title, "Two");
        assert_eq!(ep.show_year, Some(2000));
        assert_eq!(
            ep.show_poster.as_deref(),
            Some("https://images.metahub.space/poster/medium/tt2/img")
        );
    }

    #[tokio::test]
    async fn test_expand_isolates_per_show_failure() {
        let mut source = fixture();
        source.failing.push(2);
        let shows = source.fetch_show_list().await.unwrap();

        let episodes = expand(&source, &shows, 2).await;

        // Exactly the failing show's episodes are missing, nothing else.
        assert_eq!(episodes.len(), 6);
        assert!(episodes.iter().all(|e| e.show_key != "tt2"));
        assert_eq!(episodes.iter().filter(|e| e.show_key == "tt1").count(), 3);
        assert_eq!(episodes.iter().filter(|e| e.show_key == "tt3").count(), 3);
    }

    #[tokio::test]
    async fn test_expand_fetches_every_show_once() {
        let source = fixture();
        let shows = source.fetch_show_list().await.unwrap();

        let _ = expand(&source, &shows, 1).await;
        assert_eq!(source.fetches.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_expand_empty_show_list() {
        let source = fixture();
        let episodes = expand(&source, &[], 5).await;
        assert!(episodes.is_empty());
    }

    #[tokio::test]
    async fn test_expand_zero_batch_size_still_progresses() {
        let source = fixture();
        let shows = source.fetch_show_list().await.unwrap();
        let episodes = expand(&source, &shows, 0).await;
        assert_eq!(episodes.len(), 9);
    }
}
