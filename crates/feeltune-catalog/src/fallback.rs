//! Offline recommendation table.
//!
//! Three curated tracks per emotion, embedded at compile time from
//! `data/fallback.toml` and parsed once on first use.

use crate::track::Track;
use feeltune_core::EmotionLabel;
use std::collections::BTreeMap;
use std::sync::OnceLock;

const FALLBACK_TOML: &str = include_str!("../data/fallback.toml");

/// Emotion used for labels missing from the table.
pub const DEFAULT_BUCKET: EmotionLabel = EmotionLabel::Neutral;

static FALLBACK_TABLE: OnceLock<BTreeMap<EmotionLabel, Vec<Track>>> = OnceLock::new();

fn fallback_table() -> &'static BTreeMap<EmotionLabel, Vec<Track>> {
    FALLBACK_TABLE.get_or_init(|| match parse_table(FALLBACK_TOML) {
        Ok(table) => table,
        Err(e) => {
            tracing::error!(error = %e, "bad embedded fallback table");
            BTreeMap::new()
        }
    })
}

fn parse_table(src: &str) -> Result<BTreeMap<EmotionLabel, Vec<Track>>, String> {
    let raw: BTreeMap<String, Vec<Track>> = toml::from_str(src).map_err(|e| e.to_string())?;
    raw.into_iter()
        .map(|(name, tracks)| {
            let label = name.parse::<EmotionLabel>().map_err(|e| e.to_string())?;
            Ok((label, tracks))
        })
        .collect()
}

/// Offline tracks for `label`; `None` (an unrecognized label) gets the
/// neutral bucket.
pub fn fallback_tracks(label: Option<EmotionLabel>) -> Vec<Track> {
    let table = fallback_table();
    label
        .and_then(|l| table.get(&l))
        .or_else(|| table.get(&DEFAULT_BUCKET))
        .cloned()
        .unwrap_or_default()
}
