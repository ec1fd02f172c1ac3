// Snapshot cache - owns the published shuffled episode list
//
// All shared state lives behind this object: the in-memory snapshot is
// replaced wholesale under a write lock, and every recompute funnels through
// refresh(), which holds a single-flight lock. Readers never observe a
// partially built snapshot, and a failed refresh never erases good data.

use anyhow::{bail, Context, Result};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::db;
use crate::models::{ShufflePolicy, ShuffledSnapshot};
use crate::services::expander::{self, EpisodeSource};
use crate::services::shuffle::{shuffle_fair, shuffle_uniform};

/// Fixed pointer key; the service publishes exactly one list.
pub const SNAPSHOT_KEY: &str = "shuffled-episodes";

/// Tunables for the cache, resolved from config.
#[derive(Debug, Clone)]
pub struct CacheOptions {
    pub ttl: Duration,
    pub policy: ShufflePolicy,
    pub batch_size: usize,
    /// Serve a stale snapshot immediately and refresh in the background.
    /// When false, stale reads block on the refresh.
    pub serve_stale: bool,
    /// Publish a snapshot even when a non-empty show list yielded zero
    /// episodes. Off by default: an all-shows-failed pass should not
    /// overwrite a good catalog.
    pub publish_empty: bool,
    /// Directory for serialized snapshot blobs.
    pub blob_dir: PathBuf,
}

struct CacheState {
    snapshot: Arc<ShuffledSnapshot>,
    /// None for snapshots restored from disk - age unknown, treat as stale.
    fetched_at: Option<Instant>,
}

/// Reported cache lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheFreshness {
    Cold,
    Fresh,
    Stale,
}

impl CacheFreshness {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheFreshness::Cold => "cold",
            CacheFreshness::Fresh => "fresh",
            CacheFreshness::Stale => "stale",
        }
    }
}

pub struct SnapshotCache {
    state: RwLock<Option<CacheState>>,
    refresh_lock: Mutex<()>,
    source: Arc<dyn EpisodeSource>,
    options: CacheOptions,
    db: SqlitePool,
}

impl SnapshotCache {
    pub fn new(source: Arc<dyn EpisodeSource>, options: CacheOptions, pool: SqlitePool) -> Self {
        Self {
            state: RwLock::new(None),
            refresh_lock: Mutex::new(()),
            source,
            options,
            db: pool,
        }
    }

    /// The currently published snapshot, regardless of freshness.
    pub async fn current(&self) -> Option<Arc<ShuffledSnapshot>> {
        self.state.read().await.as_ref().map(|s| s.snapshot.clone())
    }

    pub async fn freshness(&self) -> CacheFreshness {
        match self.state.read().await.as_ref() {
            None => CacheFreshness::Cold,
            Some(state) if Self::is_fresh(state, self.options.ttl) => CacheFreshness::Fresh,
            Some(_) => CacheFreshness::Stale,
        }
    }

    fn is_fresh(state: &CacheState, ttl: Duration) -> bool {
        state
            .fetched_at
            .map(|at| at.elapsed() < ttl)
            .unwrap_or(false)
    }

    /// Snapshot for the read path, applying the freshness policy.
    ///
    /// Fresh: returned as-is with no upstream call. Stale with serve_stale:
    /// returned immediately while a background refresh runs. Stale without
    /// serve_stale: blocks on the refresh, falling back to the stale data if
    /// it fails. Cold: refreshes synchronously; an error here means there is
    /// nothing at all to serve yet.
    pub async fn snapshot(self: &Arc<Self>) -> Result<Arc<ShuffledSnapshot>> {
        let (current, fresh) = {
            let state = self.state.read().await;
            match state.as_ref() {
                Some(s) => (Some(s.snapshot.clone()), Self::is_fresh(s, self.options.ttl)),
                None => (None, false),
            }
        };

        if let Some(snapshot) = current.clone() {
            if fresh {
                return Ok(snapshot);
            }
            if self.options.serve_stale {
                let cache = Arc::clone(self);
                tokio::spawn(async move {
                    if let Err(e) = cache.refresh().await {
                        tracing::warn!("Background refresh failed: {:#}", e);
                    }
                });
                return Ok(snapshot);
            }
        }

        match self.refresh().await {
            Ok(snapshot) => Ok(snapshot),
            Err(e) => match current {
                Some(snapshot) => {
                    tracing::warn!("Refresh failed, serving stale snapshot: {:#}", e);
                    Ok(snapshot)
                }
                None => Err(e),
            },
        }
    }

    /// Run one aggregation pass and publish the result. Single-flight:
    /// concurrent callers queue on the lock and return the winner's snapshot
    /// via the post-acquire freshness check instead of recomputing.
    pub async fn refresh(&self) -> Result<Arc<ShuffledSnapshot>> {
        let _guard = self.refresh_lock.lock().await;

        {
            let state = self.state.read().await;
            if let Some(s) = state.as_ref() {
                if Self::is_fresh(s, self.options.ttl) {
                    return Ok(s.snapshot.clone());
                }
            }
        }

        let started = Instant::now();
        let shows = self
            .source
            .fetch_show_list()
            .await
            .context("Show list fetch failed")?;

        let episodes = expander::expand(self.source.as_ref(), &shows, self.options.batch_size).await;

        if episodes.is_empty() && !shows.is_empty() && !self.options.publish_empty {
            bail!(
                "aggregation produced no episodes from {} shows, keeping previous snapshot",
                shows.len()
            );
        }

        let ordered = {
            let mut rng = rand::thread_rng();
            match self.options.policy {
                ShufflePolicy::Uniform => shuffle_uniform(episodes, &mut rng),
                ShufflePolicy::Fair => shuffle_fair(episodes, &mut rng),
            }
        };

        let snapshot = Arc::new(ShuffledSnapshot::new(ordered));

        // Durable publish first, then the in-memory swap. A persistence
        // failure is logged but does not block serving the new snapshot.
        if let Err(e) = self.persist(&snapshot).await {
            tracing::error!("Failed to persist snapshot: {:#}", e);
        }

        *self.state.write().await = Some(CacheState {
            snapshot: snapshot.clone(),
            fetched_at: Some(Instant::now()),
        });

        tracing::info!(
            "Published snapshot: {} episodes from {} shows in {:?}",
            snapshot.len(),
            shows.len(),
            started.elapsed()
        );
        Ok(snapshot)
    }

    /// Load the last published snapshot from the pointer + blob, so reads
    /// survive a restart. The restored snapshot enters as Stale.
    pub async fn restore(&self) -> Result<bool> {
        let Some(pointer) = db::read_pointer(&self.db, SNAPSHOT_KEY).await? else {
            return Ok(false);
        };

        let bytes = tokio::fs::read(&pointer.blob_path)
            .await
            .with_context(|| format!("Failed to read snapshot blob {}", pointer.blob_path))?;
        let snapshot: ShuffledSnapshot =
            serde_json::from_slice(&bytes).context("Failed to parse snapshot blob")?;

        tracing::info!(
            "Restored snapshot: {} episodes from {}",
            snapshot.len(),
            pointer.blob_path
        );

        *self.state.write().await = Some(CacheState {
            snapshot: Arc::new(snapshot),
            fetched_at: None,
        });
        Ok(true)
    }

    /// Write the snapshot blob, rewrite the pointer, and drop the superseded
    /// blob. The pointer only moves after the new blob is fully on disk.
    async fn persist(&self, snapshot: &ShuffledSnapshot) -> Result<()> {
        tokio::fs::create_dir_all(&self.options.blob_dir)
            .await
            .context("Failed to create snapshot directory")?;

        let path = self
            .options
            .blob_dir
            .join(format!("snapshot-{}.json", Uuid::new_v4()));
        let bytes = serde_json::to_vec(snapshot).context("Failed to serialize snapshot")?;
        tokio::fs::write(&path, &bytes)
            .await
            .with_context(|| format!("Failed to write snapshot blob {}", path.display()))?;

        let path_str = path.to_string_lossy().to_string();
        let previous =
            db::write_pointer(&self.db, SNAPSHOT_KEY, &path_str, snapshot.len() as i64).await?;

        if let Some(old) = previous {
            if old != path_str {
                if let Err(e) = tokio::fs::remove_file(&old).await {
                    tracing::debug!("Could not remove superseded blob {}: {}", old, e);
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Episode, EpisodeInfo, Show};
    use anyhow::bail;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct MockSource {
        shows: Vec<Show>,
        episodes_per_show: Vec<EpisodeInfo>,
        fail_list: AtomicBool,
        fail_show: Option<u64>,
        list_fetches: AtomicUsize,
    }

    impl MockSource {
        fn new(show_count: u64, seasons: u32, per_season: u32) -> Self {
            let shows = (1..=show_count)
                .map(|id| Show {
                    trakt_id: id,
                    title: format!("Show {id}"),
                    year: Some(1990),
                    imdb_id: Some(format!("tt{id}")),
                    poster: None,
                    fanart: None,
                })
                .collect();
            let episodes_per_show = (1..=seasons)
                .flat_map(|season| {
                    (1..=per_season).map(move |number| EpisodeInfo {
                        season,
                        number,
                        title: None,
                        overview: None,
                        imdb_id: None,
                        first_aired: None,
                        runtime: None,
                    })
                })
                .collect();
            Self {
                shows,
                episodes_per_show,
                fail_list: AtomicBool::new(false),
                fail_show: None,
                list_fetches: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl EpisodeSource for MockSource {
        async fn fetch_show_list(&self) -> Result<Vec<Show>> {
            self.list_fetches.fetch_add(1, Ordering::SeqCst);
            if self.fail_list.load(Ordering::SeqCst) {
                bail!("list endpoint unavailable");
            }
            Ok(self.shows.clone())
        }

        async fn fetch_episodes_for_show(&self, show: &Show) -> Result<Vec<EpisodeInfo>> {
            if self.fail_show == Some(show.trakt_id) {
                bail!("seasons endpoint unavailable");
            }
            Ok(self.episodes_per_show.clone())
        }
    }

    struct Fixture {
        cache: Arc<SnapshotCache>,
        source: Arc<MockSource>,
        _blob_dir: TempDir,
    }

    async fn fixture_with(source: MockSource, ttl: Duration, serve_stale: bool) -> Fixture {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        db::migrate(&pool).await.unwrap();
        let blob_dir = TempDir::new().unwrap();
        let source = Arc::new(source);
        let cache = Arc::new(SnapshotCache::new(
            source.clone(),
            CacheOptions {
                ttl,
                policy: ShufflePolicy::Fair,
                batch_size: 2,
                serve_stale,
                publish_empty: false,
                blob_dir: blob_dir.path().to_path_buf(),
            },
            pool,
        ));
        Fixture {
            cache,
            source,
            _blob_dir: blob_dir,
        }
    }

    async fn fixture() -> Fixture {
        // 3 shows x 2 seasons x 3 episodes = 18.
        fixture_with(MockSource::new(3, 2, 3), Duration::from_secs(3600), false).await
    }

    fn triples(episodes: &[Episode]) -> std::collections::HashSet<(String, u32, u32)> {
        episodes
            .iter()
            .map(|ep| (ep.show_key.clone(), ep.season, ep.number))
            .collect()
    }

    #[tokio::test]
    async fn test_cold_start_refreshes_and_publishes() {
        let f = fixture().await;
        assert_eq!(f.cache.freshness().await, CacheFreshness::Cold);

        let snapshot = f.cache.snapshot().await.unwrap();
        assert_eq!(snapshot.len(), 18);
        assert_eq!(triples(&snapshot.episodes).len(), 18);
        assert_eq!(f.cache.freshness().await, CacheFreshness::Fresh);
    }

    #[tokio::test]
    async fn test_fresh_reads_are_idempotent() {
        let f = fixture().await;
        let first = f.cache.snapshot().await.unwrap();
        let second = f.cache.snapshot().await.unwrap();

        // Same object, same order, no second upstream pass.
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.episodes, second.episodes);
        assert_eq!(f.source.list_fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_refresh_single_flight_when_fresh() {
        let f = fixture().await;
        let first = f.cache.refresh().await.unwrap();
        let second = f.cache.refresh().await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(f.source.list_fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_previous_snapshot() {
        let f = fixture_with(MockSource::new(3, 2, 3), Duration::ZERO, false).await;

        let first = f.cache.refresh().await.unwrap();
        f.source.fail_list.store(true, Ordering::SeqCst);

        // TTL zero: the next read is stale and must attempt a refresh, which
        // fails fatally. The previous snapshot stays authoritative.
        let served = f.cache.snapshot().await.unwrap();
        assert_eq!(served.episodes, first.episodes);
        assert!(f.cache.refresh().await.is_err());
        assert_eq!(f.cache.current().await.unwrap().episodes, first.episodes);
    }

    #[tokio::test]
    async fn test_cold_start_with_failing_upstream_errors() {
        let f = fixture().await;
        f.source.fail_list.store(true, Ordering::SeqCst);
        assert!(f.cache.snapshot().await.is_err());
        assert!(f.cache.current().await.is_none());
    }

    #[tokio::test]
    async fn test_partial_failure_drops_only_that_show() {
        let mut source = MockSource::new(3, 2, 3);
        source.fail_show = Some(2);
        let f = fixture_with(source, Duration::from_secs(3600), false).await;

        let snapshot = f.cache.snapshot().await.unwrap();
        assert_eq!(snapshot.len(), 12);
        assert!(snapshot.episodes.iter().all(|e| e.show_key != "tt2"));
    }

    #[tokio::test]
    async fn test_empty_aggregation_aborts_publish() {
        let mut source = MockSource::new(2, 2, 3);
        source.episodes_per_show.clear();
        let f = fixture_with(source, Duration::from_secs(3600), false).await;

        let err = f.cache.refresh().await.unwrap_err();
        assert!(err.to_string().contains("no episodes"));
        assert!(f.cache.current().await.is_none());
    }

    #[tokio::test]
    async fn test_serve_stale_returns_immediately() {
        let f = fixture_with(MockSource::new(2, 1, 2), Duration::ZERO, true).await;
        let first = f.cache.refresh().await.unwrap();

        // Stale read with serve_stale: the pre-refresh data comes back.
        let served = f.cache.snapshot().await.unwrap();
        assert_eq!(served.episodes.len(), first.episodes.len());
    }

    #[tokio::test]
    async fn test_restore_roundtrip() {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        db::migrate(&pool).await.unwrap();
        let blob_dir = TempDir::new().unwrap();
        let options = CacheOptions {
            ttl: Duration::from_secs(3600),
            policy: ShufflePolicy::Uniform,
            batch_size: 2,
            serve_stale: false,
            publish_empty: false,
            blob_dir: blob_dir.path().to_path_buf(),
        };

        let writer = Arc::new(SnapshotCache::new(
            Arc::new(MockSource::new(3, 2, 3)),
            options.clone(),
            pool.clone(),
        ));
        let published = writer.refresh().await.unwrap();

        // A second cache over the same store picks up the published blob.
        let reader = SnapshotCache::new(Arc::new(MockSource::new(0, 0, 0)), options, pool);
        assert!(reader.restore().await.unwrap());
        assert_eq!(reader.freshness().await, CacheFreshness::Stale);

        let restored = reader.current().await.unwrap();
        assert_eq!(restored.episodes, published.episodes);
        assert_eq!(restored.created_at, published.created_at);
    }

    #[tokio::test]
    async fn test_restore_without_pointer_is_noop() {
        let f = fixture().await;
        assert!(!f.cache.restore().await.unwrap());
        assert_eq!(f.cache.freshness().await, CacheFreshness::Cold);
    }

    #[tokio::test]
    async fn test_persist_replaces_superseded_blob() {
        let f = fixture_with(MockSource::new(1, 1, 2), Duration::ZERO, false).await;
        f.cache.refresh().await.unwrap();
        f.cache.refresh().await.unwrap();

        // Only the current blob remains on disk.
        let mut entries = tokio::fs::read_dir(f._blob_dir.path()).await.unwrap();
        let mut count = 0;
        while let Some(entry) = entries.next_entry().await.unwrap() {
            if entry.file_type().await.unwrap().is_file() {
                count += 1;
            }
        }
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_find_roundtrip_over_published_snapshot() {
        let f = fixture().await;
        let snapshot = f.cache.snapshot().await.unwrap();
        for episode in &snapshot.episodes {
            let found = snapshot
                .find(&episode.show_key, episode.season, episode.number)
                .expect("published episode must be findable");
            assert_eq!(found, episode);
        }
    }
}
