use axum::{
    extract::{Path as AxumPath, Query, State},
    http::StatusCode,
    Json,
};

use crate::state::{
    AppState, JsonResult, LatestQuery, ListResponse, StatsResponse, TrackView,
};
use crate::utils::{join_error, json_error, library_error};

const DEFAULT_LATEST_LIMIT: usize = 20;
const MAX_LATEST_LIMIT: usize = 200;

pub async fn list_latest(
    State(state): State<AppState>,
    Query(params): Query<LatestQuery>,
) -> JsonResult<ListResponse<TrackView>> {
    let limit = params
        .limit
        .unwrap_or(DEFAULT_LATEST_LIMIT)
        .clamp(1, MAX_LATEST_LIMIT);
    let library = state.library.clone();
    let tracks = tokio::task::spawn_blocking(move || library.list_latest(limit))
        .await
        .map_err(join_error)?
        .map_err(library_error)?;

    let items: Vec<TrackView> = tracks.iter().map(TrackView::from_track).collect();
    let total = items.len();
    Ok(Json(ListResponse { items, total }))
}

pub async fn list_user_tracks(
    State(state): State<AppState>,
    AxumPath(username): AxumPath<String>,
) -> JsonResult<ListResponse<TrackView>> {
    let owner = canonical_owner(&state, &username)?;
    let library = state.library.clone();
    let tracks = tokio::task::spawn_blocking(move || library.list_owner_tracks(&owner))
        .await
        .map_err(join_error)?
        .map_err(library_error)?;

    let items: Vec<TrackView> = tracks.iter().map(TrackView::from_track).collect();
    let total = items.len();
    Ok(Json(ListResponse { items, total }))
}

/// Track detail behind a public URL. The username narrows the lookup only in
/// multi-user mode; a single-user install resolves slugs globally.
pub async fn get_user_track(
    State(state): State<AppState>,
    AxumPath((username, slug)): AxumPath<(String, String)>,
) -> JsonResult<TrackView> {
    let owner = canonical_owner(&state, &username)?;
    find_by_slug(&state, Some(owner), slug).await
}

pub async fn get_unowned_track(
    State(state): State<AppState>,
    AxumPath(slug): AxumPath<String>,
) -> JsonResult<TrackView> {
    find_by_slug(&state, None, slug).await
}

async fn find_by_slug(
    state: &AppState,
    owner: Option<String>,
    slug: String,
) -> JsonResult<TrackView> {
    let library = state.library.clone();
    let track = tokio::task::spawn_blocking(move || library.get_by_slug(owner.as_deref(), &slug))
        .await
        .map_err(join_error)?
        .map_err(library_error)?;
    Ok(Json(TrackView::from_track(&track)))
}

pub async fn get_stats(State(state): State<AppState>) -> JsonResult<StatsResponse> {
    let library = state.library.clone();
    let stats = tokio::task::spawn_blocking(move || library.stats())
        .await
        .map_err(join_error)?
        .map_err(library_error)?;
    Ok(Json(StatsResponse {
        tracks: stats.tracks,
        owners: stats.owners,
        multi_user: state.config.multi_user,
    }))
}

/// Registered users are matched case-insensitively; unknown names pass
/// through so imported owners stay reachable.
fn canonical_owner(
    state: &AppState,
    username: &str,
) -> Result<String, (StatusCode, Json<crate::state::ErrorResponse>)> {
    match state.auth.find_user(username) {
        Ok(Some(user)) => Ok(user.username),
        Ok(None) => Ok(username.to_string()),
        Err(err) => Err(json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("auth error: {}", err),
        )),
    }
}
