//! feeltune-catalog — Music recommendations for an emotion.
//!
//! Searches a remote catalog (Spotify) for a playlist matching the emotion,
//! samples tracks from it, and falls back to a curated offline table
//! whenever the catalog is unconfigured, unreachable or empty.

pub mod client;
pub mod engine;
pub mod fallback;
pub mod phrases;
pub mod retry;
pub mod spotify;
pub mod track;

pub use client::{CatalogClient, CatalogError, PlaylistRef};
pub use engine::CatalogEngine;
pub use fallback::fallback_tracks;
pub use phrases::search_phrase;
pub use retry::{RetryPolicy, Sleeper, ThreadSleeper};
pub use spotify::{SpotifyClient, SpotifyCredentials};
pub use track::{FallbackReason, RecommendationSet, Track, TrackSource, MAX_RECOMMENDATIONS};
