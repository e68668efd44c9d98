use serde::{Deserialize, Serialize};

/// At most this many tracks are recommended per request.
pub const MAX_RECOMMENDATIONS: usize = 5;

const UNKNOWN_ARTIST: &str = "Unknown Artist";
const UNKNOWN_ALBUM: &str = "Unknown Album";

/// A recommended song. `title` and `artist` are never empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    pub title: String,
    pub artist: String,
    pub album: String,
    /// 30-second audio preview.
    pub preview_url: Option<String>,
    /// Album artwork.
    pub image_url: Option<String>,
    /// Link to the track on the catalog's own player.
    pub catalog_url: Option<String>,
}

impl Track {
    pub fn has_preview(&self) -> bool {
        self.preview_url.is_some()
    }

    /// Build a track from one raw playlist entry (`{"track": {...}}`).
    ///
    /// Returns `None` for entries without a track object or a title.
    pub fn from_playlist_item(item: &serde_json::Value) -> Option<Self> {
        let item = PlaylistItem::deserialize(item).ok()?;
        let raw = item.track?;

        let title = raw.name.filter(|n| !n.trim().is_empty())?;
        let artist = raw
            .artists
            .unwrap_or_default()
            .into_iter()
            .next()
            .and_then(|a| a.name)
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| UNKNOWN_ARTIST.to_string());

        let (album, image_url) = match raw.album {
            Some(album) => (
                album.name.unwrap_or_else(|| UNKNOWN_ALBUM.to_string()),
                album
                    .images
                    .unwrap_or_default()
                    .into_iter()
                    .next()
                    .and_then(|img| img.url),
            ),
            None => (UNKNOWN_ALBUM.to_string(), None),
        };

        Some(Self {
            title,
            artist,
            album,
            preview_url: raw.preview_url.filter(|u| !u.is_empty()),
            image_url,
            catalog_url: raw.external_urls.and_then(|u| u.spotify),
        })
    }
}

#[derive(Deserialize)]
struct PlaylistItem {
    track: Option<RawTrack>,
}

#[derive(Deserialize)]
struct RawTrack {
    name: Option<String>,
    artists: Option<Vec<RawArtist>>,
    album: Option<RawAlbum>,
    preview_url: Option<String>,
    external_urls: Option<ExternalUrls>,
}

#[derive(Deserialize)]
struct RawArtist {
    name: Option<String>,
}

#[derive(Deserialize)]
struct RawAlbum {
    name: Option<String>,
    images: Option<Vec<RawImage>>,
}

#[derive(Deserialize)]
struct RawImage {
    url: Option<String>,
}

#[derive(Deserialize)]
struct ExternalUrls {
    spotify: Option<String>,
}

/// Why a request ended on the offline table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    /// No catalog credentials are configured.
    Unconfigured,
    /// The playlist search kept failing.
    SearchFailed,
    /// The search matched no playlist.
    NoPlaylist,
    /// Fetching the playlist's tracks kept failing.
    TracksFailed,
    /// The playlist had no usable tracks.
    NoUsableTracks,
}

impl FallbackReason {
    pub fn describe(&self) -> &'static str {
        match self {
            FallbackReason::Unconfigured => "catalog client not configured",
            FallbackReason::SearchFailed => "could not reach the catalog",
            FallbackReason::NoPlaylist => "no playlists found for this emotion",
            FallbackReason::TracksFailed => "could not retrieve playlist tracks",
            FallbackReason::NoUsableTracks => "no usable tracks in the playlist",
        }
    }
}

/// Where the tracks of a [`RecommendationSet`] came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TrackSource {
    /// Sampled from tracks that have a preview.
    Live { playlist: String },
    /// Sampled from tracks without previews; none had one.
    LiveWithoutPreviews { playlist: String },
    /// The static offline table.
    Fallback { reason: FallbackReason },
}

/// Up to [`MAX_RECOMMENDATIONS`] tracks for one request.
#[derive(Debug, Clone, Serialize)]
pub struct RecommendationSet {
    /// Search phrase the emotion mapped to.
    pub query: String,
    pub tracks: Vec<Track>,
    pub source: TrackSource,
}

impl RecommendationSet {
    pub fn is_fallback(&self) -> bool {
        matches!(self.source, TrackSource::Fallback { .. })
    }

    /// Note for the user when the result is degraded in some way.
    pub fn advisory(&self) -> Option<String> {
        match &self.source {
            TrackSource::Live { .. } => None,
            TrackSource::LiveWithoutPreviews { .. } => {
                Some("Found tracks, but none have playable previews".to_string())
            }
            TrackSource::Fallback { reason } => Some(format!(
                "Using offline song recommendations ({})",
                reason.describe()
            )),
        }
    }
}
