pub mod auth;
pub mod browse;
pub mod tracks;

use axum::{
    body::Body,
    extract::{DefaultBodyLimit, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};

use crate::state::{AppState, AuthContext, HealthResponse};
use crate::utils::{extract_token, json_error_response};

pub fn api_router(state: AppState) -> Router {
    let auth = Router::new()
        .route("/auth/signup", post(auth::auth_signup))
        .route("/auth/login", post(auth::auth_login))
        .route("/auth/logout", post(auth::auth_logout));

    let public = Router::new()
        .route("/health", get(health))
        .route("/stats", get(browse::get_stats))
        .route("/music", get(browse::list_latest))
        .route("/music/track/:slug", get(browse::get_unowned_track))
        .route("/users/:username/music", get(browse::list_user_tracks))
        .route(
            "/users/:username/music/track/:slug",
            get(browse::get_user_track),
        );

    let protected = Router::new()
        .route("/tracks", get(tracks::list_tracks).post(tracks::upload_track))
        .route(
            "/tracks/:track_id",
            get(tracks::get_track)
                .post(tracks::edit_track)
                .delete(tracks::delete_track),
        )
        .layer(DefaultBodyLimit::max(state.config.max_upload_bytes))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .merge(public)
        .merge(auth)
        .merge(protected)
        .with_state(state)
}

async fn require_auth(
    State(state): State<AppState>,
    mut req: axum::http::Request<Body>,
    next: Next,
) -> Response {
    let token = match extract_token(req.headers()) {
        Some(token) => token,
        None => return json_error_response(StatusCode::UNAUTHORIZED, "unauthorized"),
    };

    match state.auth.user_from_token(&token) {
        Ok(Some(user)) => {
            req.extensions_mut().insert(AuthContext { user });
            next.run(req).await
        }
        Ok(None) => json_error_response(StatusCode::UNAUTHORIZED, "unauthorized"),
        Err(err) => json_error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("auth error: {}", err),
        ),
    }
}

async fn health() -> impl IntoResponse {
    Json(HealthResponse { status: "ok" })
}
