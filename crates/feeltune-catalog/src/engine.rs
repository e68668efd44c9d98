//! Catalog query engine: emotion → playlist search → sampled tracks, with
//! the offline table as the last tier for every failure.

use crate::client::CatalogClient;
use crate::fallback::fallback_tracks;
use crate::phrases::search_phrase;
use crate::retry::{RetryPolicy, Sleeper, ThreadSleeper};
use crate::track::{FallbackReason, RecommendationSet, Track, TrackSource, MAX_RECOMMENDATIONS};
use feeltune_core::EmotionLabel;
use rand::seq::SliceRandom;
use std::sync::Arc;

/// Playlists requested per search; only the first is used.
const SEARCH_LIMIT: u32 = 1;

pub struct CatalogEngine {
    client: Option<Box<dyn CatalogClient>>,
    retry: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl CatalogEngine {
    /// Engine over an optional live client; `None` means offline-only.
    pub fn new(client: Option<Box<dyn CatalogClient>>) -> Self {
        Self {
            client,
            retry: RetryPolicy::default(),
            sleeper: Arc::new(ThreadSleeper),
        }
    }

    pub fn offline() -> Self {
        Self::new(None)
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn is_live(&self) -> bool {
        self.client.is_some()
    }

    /// Recommendations for a detected emotion.
    pub fn recommend(&self, label: EmotionLabel) -> RecommendationSet {
        self.recommend_for(Some(label))
    }

    /// Recommendations for free-form emotion text. Unrecognized text
    /// searches the default phrase and falls back to the neutral table.
    pub fn recommend_named(&self, name: &str) -> RecommendationSet {
        let label = name.parse::<EmotionLabel>().ok();
        if label.is_none() {
            tracing::warn!(name, "unrecognized emotion, using defaults");
        }
        self.recommend_for(label)
    }

    /// The offline table for an emotion. Never fails.
    pub fn fallback(&self, label: EmotionLabel) -> Vec<Track> {
        fallback_tracks(Some(label))
    }

    fn recommend_for(&self, label: Option<EmotionLabel>) -> RecommendationSet {
        let query = search_phrase(label);

        let Some(client) = self.client.as_deref() else {
            return offline(label, query, FallbackReason::Unconfigured);
        };

        tracing::info!(query, "searching catalog playlists");
        let sleeper = self.sleeper.as_ref();

        let playlist = match self
            .retry
            .run(sleeper, "playlist search", || client.search_playlist(query, SEARCH_LIMIT))
        {
            Ok(Some(playlist)) => playlist,
            Ok(None) => return offline(label, query, FallbackReason::NoPlaylist),
            Err(_) => return offline(label, query, FallbackReason::SearchFailed),
        };
        tracing::info!(id = %playlist.id, name = %playlist.name, "found playlist");

        let items = match self
            .retry
            .run(sleeper, "playlist tracks", || client.playlist_tracks(&playlist.id))
        {
            Ok(items) => items,
            Err(_) => return offline(label, query, FallbackReason::TracksFailed),
        };

        let (with_preview, without_preview) = partition_tracks(&items);
        tracing::debug!(
            total = items.len(),
            with_preview = with_preview.len(),
            without_preview = without_preview.len(),
            "playlist tracks partitioned"
        );

        let (pool, source) = if !with_preview.is_empty() {
            (with_preview, TrackSource::Live { playlist: playlist.name })
        } else if !without_preview.is_empty() {
            tracing::warn!("found tracks, but none have playable previews");
            (without_preview, TrackSource::LiveWithoutPreviews { playlist: playlist.name })
        } else {
            return offline(label, query, FallbackReason::NoUsableTracks);
        };

        RecommendationSet {
            query: query.to_string(),
            tracks: sample(&pool, MAX_RECOMMENDATIONS),
            source,
        }
    }
}

fn offline(label: Option<EmotionLabel>, query: &str, reason: FallbackReason) -> RecommendationSet {
    tracing::warn!(reason = reason.describe(), "using offline song recommendations");
    RecommendationSet {
        query: query.to_string(),
        tracks: fallback_tracks(label),
        source: TrackSource::Fallback { reason },
    }
}

/// Split raw playlist entries into (has preview, no preview), dropping
/// malformed entries.
fn partition_tracks(items: &[serde_json::Value]) -> (Vec<Track>, Vec<Track>) {
    let mut skipped = 0usize;
    let (with, without): (Vec<Track>, Vec<Track>) = items
        .iter()
        .filter_map(|item| {
            let track = Track::from_playlist_item(item);
            if track.is_none() {
                skipped += 1;
            }
            track
        })
        .partition(Track::has_preview);

    if skipped > 0 {
        tracing::debug!(skipped, "skipped malformed track entries");
    }
    (with, without)
}

/// Uniformly pick up to `n` distinct entries.
fn sample(pool: &[Track], n: usize) -> Vec<Track> {
    let mut rng = rand::thread_rng();
    pool.choose_multiple(&mut rng, n).cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{CatalogError, PlaylistRef};
    use crate::retry::testing::RecordingSleeper;
    use serde_json::{json, Value};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Replays scripted responses; an exhausted script answers HTTP 503.
    #[derive(Default)]
    struct ScriptedClient {
        searches: Mutex<VecDeque<Result<Option<PlaylistRef>, CatalogError>>>,
        tracks: Mutex<VecDeque<Result<Vec<Value>, CatalogError>>>,
        queries: Mutex<Vec<String>>,
        track_requests: Mutex<Vec<String>>,
    }

    fn unavailable() -> CatalogError {
        CatalogError::Status { status: 503, body: String::new() }
    }

    impl ScriptedClient {
        fn search(self, r: Result<Option<PlaylistRef>, CatalogError>) -> Self {
            self.searches.lock().unwrap().push_back(r);
            self
        }

        fn tracks(self, r: Result<Vec<Value>, CatalogError>) -> Self {
            self.tracks.lock().unwrap().push_back(r);
            self
        }
    }

    impl CatalogClient for Arc<ScriptedClient> {
        fn search_playlist(&self, query: &str, limit: u32) -> Result<Option<PlaylistRef>, CatalogError> {
            assert_eq!(limit, 1);
            self.queries.lock().unwrap().push(query.to_string());
            self.searches.lock().unwrap().pop_front().unwrap_or_else(|| Err(unavailable()))
        }

        fn playlist_tracks(&self, playlist_id: &str) -> Result<Vec<Value>, CatalogError> {
            self.track_requests.lock().unwrap().push(playlist_id.to_string());
            self.tracks.lock().unwrap().pop_front().unwrap_or_else(|| Err(unavailable()))
        }
    }

    fn playlist() -> Option<PlaylistRef> {
        Some(PlaylistRef { id: "pl1".into(), name: "Mood Mix".into() })
    }

    fn item(name: &str, preview: Option<&str>) -> Value {
        json!({
            "track": {
                "name": name,
                "artists": [{"name": "Artist"}],
                "album": {"name": "Album", "images": []},
                "preview_url": preview,
                "external_urls": {"spotify": format!("https://open.spotify.com/track/{name}")}
            }
        })
    }

    fn live(client: ScriptedClient) -> (CatalogEngine, Arc<ScriptedClient>, Arc<RecordingSleeper>) {
        let client = Arc::new(client);
        let sleeper = Arc::new(RecordingSleeper::default());
        let engine = CatalogEngine::new(Some(Box::new(client.clone())))
            .with_sleeper(sleeper.clone());
        (engine, client, sleeper)
    }

    #[test]
    fn test_offline_returns_table_for_every_label() {
        let engine = CatalogEngine::offline();
        assert!(!engine.is_live());
        for label in EmotionLabel::ALL {
            let set = engine.recommend(label);
            assert_eq!(set.tracks, engine.fallback(label));
            assert_eq!(set.tracks.len(), 3);
            assert_eq!(set.source, TrackSource::Fallback { reason: FallbackReason::Unconfigured });
        }
    }

    #[test]
    fn test_unknown_name_uses_defaults() {
        let set = CatalogEngine::offline().recommend_named("bored");
        assert_eq!(set.query, "lofi chill");
        assert_eq!(set.tracks, fallback_tracks(Some(EmotionLabel::Neutral)));
    }

    #[test]
    fn test_search_failing_three_times_falls_back() {
        let (engine, client, sleeper) = live(ScriptedClient::default());
        let set = engine.recommend(EmotionLabel::Happy);

        assert_eq!(*client.queries.lock().unwrap(), vec!["happy hits"; 3]);
        assert_eq!(sleeper.slept(), vec![Duration::from_secs(2), Duration::from_secs(4)]);
        assert_eq!(set.tracks, fallback_tracks(Some(EmotionLabel::Happy)));
        assert_eq!(set.source, TrackSource::Fallback { reason: FallbackReason::SearchFailed });
        assert!(client.track_requests.lock().unwrap().is_empty());
    }

    #[test]
    fn test_search_recovers_after_transient_failure() {
        let (engine, client, sleeper) = live(
            ScriptedClient::default()
                .search(Err(unavailable()))
                .search(Ok(playlist()))
                .tracks(Ok(vec![item("a", Some("https://p/a.mp3"))])),
        );
        let set = engine.recommend(EmotionLabel::Sad);

        assert_eq!(client.queries.lock().unwrap().len(), 2);
        assert_eq!(sleeper.slept(), vec![Duration::from_secs(2)]);
        assert_eq!(set.source, TrackSource::Live { playlist: "Mood Mix".into() });
        assert_eq!(set.tracks.len(), 1);
    }

    #[test]
    fn test_non_transient_search_error_skips_retries() {
        let (engine, client, sleeper) = live(
            ScriptedClient::default().search(Err(CatalogError::Unauthorized("bad".into()))),
        );
        let set = engine.recommend(EmotionLabel::Angry);

        assert_eq!(client.queries.lock().unwrap().len(), 1);
        assert!(sleeper.slept().is_empty());
        assert_eq!(set.tracks, fallback_tracks(Some(EmotionLabel::Angry)));
    }

    #[test]
    fn test_no_playlist_falls_back() {
        let (engine, _, _) = live(ScriptedClient::default().search(Ok(None)));
        let set = engine.recommend(EmotionLabel::Fear);
        assert_eq!(set.source, TrackSource::Fallback { reason: FallbackReason::NoPlaylist });
        assert_eq!(set.tracks, fallback_tracks(Some(EmotionLabel::Fear)));
    }

    #[test]
    fn test_track_fetch_exhaustion_restarts_backoff() {
        let (engine, client, sleeper) = live(ScriptedClient::default().search(Ok(playlist())));
        let set = engine.recommend(EmotionLabel::Surprise);

        assert_eq!(*client.track_requests.lock().unwrap(), vec!["pl1"; 3]);
        assert_eq!(sleeper.slept(), vec![Duration::from_secs(2), Duration::from_secs(4)]);
        assert_eq!(set.source, TrackSource::Fallback { reason: FallbackReason::TracksFailed });
    }

    #[test]
    fn test_tracks_without_previews_are_still_used() {
        let (engine, _, _) = live(
            ScriptedClient::default()
                .search(Ok(playlist()))
                .tracks(Ok(vec![item("one", None), item("two", None)])),
        );
        let set = engine.recommend(EmotionLabel::Happy);

        assert_eq!(set.source, TrackSource::LiveWithoutPreviews { playlist: "Mood Mix".into() });
        assert!(set.advisory().is_some());
        let mut titles: Vec<&str> = set.tracks.iter().map(|t| t.title.as_str()).collect();
        titles.sort();
        assert_eq!(titles, ["one", "two"]);
    }

    #[test]
    fn test_preview_bucket_preferred() {
        let mut items: Vec<Value> = (0..4).map(|i| item(&format!("plain{i}"), None)).collect();
        items.extend((0..3).map(|i| item(&format!("preview{i}"), Some("https://p/x.mp3"))));
        let (engine, _, _) = live(ScriptedClient::default().search(Ok(playlist())).tracks(Ok(items)));

        let set = engine.recommend(EmotionLabel::Neutral);
        assert_eq!(set.tracks.len(), 3);
        assert!(set.tracks.iter().all(|t| t.has_preview()));
        assert!(set.advisory().is_none());
    }

    #[test]
    fn test_sample_is_capped_and_distinct() {
        let items: Vec<Value> = (0..12)
            .map(|i| item(&format!("song{i}"), Some("https://p/x.mp3")))
            .collect();
        let (engine, _, _) = live(ScriptedClient::default().search(Ok(playlist())).tracks(Ok(items)));

        let set = engine.recommend(EmotionLabel::Happy);
        assert_eq!(set.tracks.len(), MAX_RECOMMENDATIONS);
        let mut titles: Vec<&str> = set.tracks.iter().map(|t| t.title.as_str()).collect();
        titles.sort();
        titles.dedup();
        assert_eq!(titles.len(), MAX_RECOMMENDATIONS);
        assert!(titles.iter().all(|t| t.starts_with("song")));
    }

    #[test]
    fn test_malformed_entries_skipped() {
        let items = vec![
            json!({"track": null}),
            json!({"track": {"artists": []}}),
            json!(17),
            item("good", None),
        ];
        let (engine, _, _) = live(ScriptedClient::default().search(Ok(playlist())).tracks(Ok(items)));

        let set = engine.recommend(EmotionLabel::Disgust);
        assert_eq!(set.tracks.len(), 1);
        assert_eq!(set.tracks[0].title, "good");
    }

    #[test]
    fn test_only_malformed_entries_fall_back() {
        let items = vec![json!({"track": null}), json!({"nope": true})];
        let (engine, _, _) = live(ScriptedClient::default().search(Ok(playlist())).tracks(Ok(items)));

        let set = engine.recommend(EmotionLabel::Happy);
        assert_eq!(set.source, TrackSource::Fallback { reason: FallbackReason::NoUsableTracks });
        assert_eq!(set.tracks, fallback_tracks(Some(EmotionLabel::Happy)));
    }

    #[test]
    fn test_empty_playlist_falls_back() {
        let (engine, _, _) = live(ScriptedClient::default().search(Ok(playlist())).tracks(Ok(vec![])));
        let set = engine.recommend(EmotionLabel::Sad);
        assert_eq!(set.source, TrackSource::Fallback { reason: FallbackReason::NoUsableTracks });
    }

    #[test]
    fn test_custom_retry_policy() {
        let client = Arc::new(ScriptedClient::default());
        let sleeper = Arc::new(RecordingSleeper::default());
        let engine = CatalogEngine::new(Some(Box::new(client.clone())))
            .with_retry(RetryPolicy { max_attempts: 2, initial_delay: Duration::from_millis(10) })
            .with_sleeper(sleeper.clone());

        engine.recommend(EmotionLabel::Happy);
        assert_eq!(client.queries.lock().unwrap().len(), 2);
        assert_eq!(sleeper.slept(), vec![Duration::from_millis(10)]);
    }
}
