use std::path::PathBuf;
use std::sync::Arc;

use axum::http::StatusCode;
use axum::Json;
use common::Track;
use library::Library;
use serde::{Deserialize, Serialize};

use crate::auth::{AuthStore, AuthUser};
use crate::config::ServerConfig;

#[derive(Clone)]
pub struct AppState {
    pub library: Library,
    pub auth: AuthStore,
    pub config: Arc<ServerConfig>,
    /// Uploads are staged here before the library copies them into place.
    pub staging_dir: PathBuf,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

#[derive(Serialize)]
pub struct ListResponse<T> {
    pub items: Vec<T>,
    pub total: usize,
}

/// Public representation of a track.
#[derive(Serialize, Clone)]
pub struct TrackView {
    pub id: u64,
    pub owner: Option<String>,
    pub slug: String,
    pub url: String,
    pub title: Option<String>,
    pub artist: Option<String>,
    pub genre: Option<String>,
    pub date: Option<String>,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub audio_url: String,
    pub mimetype: Option<String>,
    pub image_url: Option<String>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl TrackView {
    pub fn from_track(track: &Track) -> Self {
        Self {
            id: track.id,
            owner: track.owner.clone(),
            slug: track.slug.clone(),
            url: format!("{}{}", public_url_prefix(track.owner.as_deref()), track.slug),
            title: track.title.clone(),
            artist: track.artist.clone(),
            genre: track.genre.clone(),
            date: track.date.clone(),
            description: track.description.clone(),
            tags: track.tags.clone(),
            audio_url: media_url(&track.audio_file),
            mimetype: track.mimetype.clone(),
            image_url: track.image.as_deref().map(media_url),
            created_at: track.created_at,
            updated_at: track.updated_at,
        }
    }
}

/// What the owner sees when editing a track.
#[derive(Serialize)]
pub struct TrackEditView {
    pub track: TrackView,
    pub audio_filename: String,
    pub url_prefix: String,
}

#[derive(Serialize)]
pub struct DeletedResponse {
    pub id: u64,
    pub title: Option<String>,
}

#[derive(Serialize)]
pub struct StatsResponse {
    pub tracks: usize,
    pub owners: usize,
    pub multi_user: bool,
}

#[derive(Debug, Deserialize)]
pub struct LatestQuery {
    pub limit: Option<usize>,
}

#[derive(Clone)]
pub struct AuthContext {
    pub user: AuthUser,
}

impl AuthContext {
    pub fn owner(&self) -> &str {
        &self.user.username
    }
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub expires_at: u64,
    pub token_type: &'static str,
}

pub type JsonResult<T> = Result<Json<T>, (StatusCode, Json<ErrorResponse>)>;

pub fn public_url_prefix(owner: Option<&str>) -> String {
    match owner {
        Some(owner) => format!("/api/v1/users/{}/music/track/", owner),
        None => "/api/v1/music/track/".to_string(),
    }
}

pub fn media_url(relpath: &str) -> String {
    format!("/media/{}", relpath)
}
