//! The catalog service seam.

use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),
    #[error("catalog returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("credentials rejected: {0}")]
    Unauthorized(String),
    #[error("malformed response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl CatalogError {
    /// Whether another attempt might succeed: transport failures, timeouts,
    /// rate limiting and server errors.
    pub fn is_transient(&self) -> bool {
        match self {
            CatalogError::Http(e) => !(e.is_decode() || e.is_builder()),
            CatalogError::Status { status, .. } => *status == 429 || *status >= 500,
            CatalogError::Unauthorized(_) | CatalogError::Decode(_) => false,
        }
    }
}

/// A playlist found by a search.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PlaylistRef {
    pub id: String,
    pub name: String,
}

/// A remote music catalog.
pub trait CatalogClient: Send + Sync {
    /// First `limit` playlists matching `query`; `None` when nothing matched.
    fn search_playlist(&self, query: &str, limit: u32) -> Result<Option<PlaylistRef>, CatalogError>;

    /// Raw track entries of a playlist, as the catalog returns them.
    fn playlist_tracks(&self, playlist_id: &str) -> Result<Vec<serde_json::Value>, CatalogError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(code: u16) -> CatalogError {
        CatalogError::Status { status: code, body: String::new() }
    }

    #[test]
    fn test_transient_statuses() {
        assert!(status(500).is_transient());
        assert!(status(503).is_transient());
        assert!(status(429).is_transient());
        assert!(!status(400).is_transient());
        assert!(!status(404).is_transient());
        assert!(!CatalogError::Unauthorized("nope".into()).is_transient());
    }

    #[test]
    fn test_decode_error_not_transient() {
        let err = serde_json::from_str::<PlaylistRef>("{").unwrap_err();
        assert!(!CatalogError::from(err).is_transient());
    }
}
