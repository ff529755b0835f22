use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use tracing::info;

use crate::auth::AuthError;
use crate::state::{AppState, HealthResponse, JsonResult, LoginRequest, LoginResponse};
use crate::utils::{extract_token, json_error, json_error_response};

/// Open in multi-user mode. A single-user install only accepts its first
/// account.
pub async fn auth_signup(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> JsonResult<LoginResponse> {
    let has_users = state
        .auth
        .has_any_user()
        .map_err(|err| json_error(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()))?;
    if has_users && !state.config.multi_user {
        return Err(json_error(StatusCode::FORBIDDEN, "signup is closed"));
    }

    let user = match state.auth.create_user(&payload.username, &payload.password) {
        Ok(user) => user,
        Err(AuthError::DbError(message)) => {
            return Err(json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("auth error: {}", message),
            ))
        }
        Err(AuthError::UserExists) => {
            return Err(json_error(StatusCode::CONFLICT, "username already taken"))
        }
        Err(err) => {
            return Err(json_error(
                StatusCode::UNPROCESSABLE_ENTITY,
                err.to_string(),
            ))
        }
    };
    info!("Created user {}", user.username);

    start_session(&state, &user.id)
}

pub async fn auth_login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> JsonResult<LoginResponse> {
    let user = match state
        .auth
        .authenticate(&payload.username, &payload.password)
    {
        Ok(Some(user)) => user,
        Ok(None) => return Err(json_error(StatusCode::UNAUTHORIZED, "invalid credentials")),
        Err(err) => {
            return Err(json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("auth error: {}", err),
            ))
        }
    };

    start_session(&state, &user.id)
}

fn start_session(state: &AppState, user_id: &str) -> JsonResult<LoginResponse> {
    let session = state.auth.create_session(user_id).map_err(|err| {
        json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("auth error: {}", err),
        )
    })?;

    Ok(Json(LoginResponse {
        token: session.token,
        expires_at: session.expires_at,
        token_type: "Bearer",
    }))
}

pub async fn auth_logout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let token = match extract_token(&headers) {
        Some(token) => token,
        None => return json_error_response(StatusCode::BAD_REQUEST, "missing token"),
    };

    if let Err(err) = state.auth.revoke_session(&token) {
        return json_error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("auth error: {}", err),
        );
    }

    Json(HealthResponse { status: "ok" }).into_response()
}
