//! Spotify Web API client (client-credentials flow).
//!
//! Only the two read-only calls the recommender needs: playlist search and
//! playlist tracks. The app token is cached until shortly before it expires.

use crate::client::{CatalogClient, CatalogError, PlaylistRef};
use reqwest::blocking::{Client, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::fmt;
use std::sync::Mutex;
use std::time::{Duration, Instant};

pub const SPOTIFY_API_BASE: &str = "https://api.spotify.com/v1";
pub const SPOTIFY_ACCOUNTS_BASE: &str = "https://accounts.spotify.com";
/// Refresh the token this long before Spotify says it expires.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Application credentials. Both parts must be non-empty.
#[derive(Clone)]
pub struct SpotifyCredentials {
    client_id: String,
    client_secret: String,
}

impl SpotifyCredentials {
    /// `None` when either value is missing or blank.
    pub fn new(client_id: Option<String>, client_secret: Option<String>) -> Option<Self> {
        let client_id = client_id.filter(|v| !v.trim().is_empty())?;
        let client_secret = client_secret.filter(|v| !v.trim().is_empty())?;
        Some(Self {
            client_id,
            client_secret,
        })
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }
}

impl fmt::Debug for SpotifyCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpotifyCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Deserialize)]
struct SearchResponse {
    playlists: Option<PlaylistPage>,
}

#[derive(Deserialize)]
struct PlaylistPage {
    #[serde(default)]
    items: Vec<Option<PlaylistRef>>,
}

#[derive(Deserialize)]
struct TracksPage {
    #[serde(default)]
    items: Vec<serde_json::Value>,
}

pub struct SpotifyClient {
    http: Client,
    credentials: SpotifyCredentials,
    api_base: String,
    accounts_base: String,
    token: Mutex<Option<CachedToken>>,
}

impl SpotifyClient {
    pub fn new(credentials: SpotifyCredentials, timeout: Duration) -> Result<Self, CatalogError> {
        let http = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            http,
            credentials,
            api_base: SPOTIFY_API_BASE.to_string(),
            accounts_base: SPOTIFY_ACCOUNTS_BASE.to_string(),
            token: Mutex::new(None),
        })
    }

    /// Point the client at different API and accounts hosts.
    pub fn with_base_urls(mut self, api_base: &str, accounts_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self.accounts_base = accounts_base.trim_end_matches('/').to_string();
        self
    }

    fn access_token(&self) -> Result<String, CatalogError> {
        let mut cached = self
            .token
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.expires_at {
                return Ok(token.value.clone());
            }
        }

        let response = self
            .http
            .post(format!("{}/api/token", self.accounts_base))
            .basic_auth(&self.credentials.client_id, Some(&self.credentials.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()?;

        let status = response.status();
        if status.as_u16() == 400 || status.as_u16() == 401 {
            return Err(CatalogError::Unauthorized(response.text().unwrap_or_default()));
        }
        let body: TokenResponse = check_status(response)?.json()?;

        let lifetime = Duration::from_secs(body.expires_in).saturating_sub(TOKEN_EXPIRY_MARGIN);
        tracing::debug!(expires_in = body.expires_in, "obtained catalog access token");
        *cached = Some(CachedToken {
            value: body.access_token.clone(),
            expires_at: Instant::now() + lifetime,
        });
        Ok(body.access_token)
    }

    fn get_json<T: DeserializeOwned>(&self, url: &str, query: &[(&str, &str)]) -> Result<T, CatalogError> {
        let token = self.access_token()?;
        let response = self.http.get(url).bearer_auth(token).query(query).send()?;

        if response.status().as_u16() == 401 {
            // Token revoked or expired early; fetch a new one next time.
            *self
                .token
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()) = None;
        }
        Ok(check_status(response)?.json()?)
    }
}

fn check_status(response: Response) -> Result<Response, CatalogError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    Err(CatalogError::Status {
        status: status.as_u16(),
        body: response.text().unwrap_or_default(),
    })
}

impl CatalogClient for SpotifyClient {
    fn search_playlist(&self, query: &str, limit: u32) -> Result<Option<PlaylistRef>, CatalogError> {
        let limit = limit.to_string();
        let body: SearchResponse = self.get_json(
            &format!("{}/search", self.api_base),
            &[("q", query), ("type", "playlist"), ("limit", &limit)],
        )?;

        Ok(body
            .playlists
            .and_then(|page| page.items.into_iter().flatten().next()))
    }

    fn playlist_tracks(&self, playlist_id: &str) -> Result<Vec<serde_json::Value>, CatalogError> {
        let body: TracksPage = self.get_json(
            &format!("{}/playlists/{}/tracks", self.api_base, playlist_id),
            &[],
        )?;
        Ok(body.items)
    }
}
