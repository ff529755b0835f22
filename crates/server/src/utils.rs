use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use library::LibraryError;
use tracing::error;

use crate::state::ErrorResponse;

pub fn json_error(
    status: StatusCode,
    message: impl Into<String>,
) -> (StatusCode, Json<ErrorResponse>) {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
            field: None,
        }),
    )
}

pub fn json_field_error(
    status: StatusCode,
    field: &str,
    message: impl Into<String>,
) -> (StatusCode, Json<ErrorResponse>) {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
            field: Some(field.to_string()),
        }),
    )
}

pub fn json_error_response(status: StatusCode, message: impl Into<String>) -> Response {
    json_error(status, message).into_response()
}

/// Maps a library failure onto the response the client sees. Form errors name
/// the offending field.
pub fn library_error(err: LibraryError) -> (StatusCode, Json<ErrorResponse>) {
    match err {
        LibraryError::InvalidSlug(_) | LibraryError::SlugConflict(_) => {
            json_field_error(StatusCode::UNPROCESSABLE_ENTITY, "slug", err.to_string())
        }
        LibraryError::SlugTaken(_) => json_field_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            "slug",
            "This URL is already taken.",
        ),
        LibraryError::NotFound => json_error(StatusCode::NOT_FOUND, "track not found"),
        LibraryError::OwnerRequired => json_error(StatusCode::FORBIDDEN, err.to_string()),
        other => {
            error!("Library operation failed: {}", other);
            json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("library error: {}", other),
            )
        }
    }
}

pub fn join_error(err: tokio::task::JoinError) -> (StatusCode, Json<ErrorResponse>) {
    error!("Blocking task failed: {}", err);
    json_error(StatusCode::INTERNAL_SERVER_ERROR, "task failed")
}

pub fn extract_token(headers: &HeaderMap) -> Option<String> {
    if let Some(value) = headers.get(header::AUTHORIZATION) {
        if let Ok(value) = value.to_str() {
            if let Some(token) = value.strip_prefix("Bearer ") {
                let token = token.trim();
                if !token.is_empty() {
                    return Some(token.to_string());
                }
            }
        }
    }
    let cookie = headers.get(header::COOKIE)?.to_str().ok()?;
    parse_cookie_value(cookie, "audiotracks_session")
}

fn parse_cookie_value(cookie: &str, name: &str) -> Option<String> {
    cookie.split(';').find_map(|part| {
        let (key, value) = part.trim().split_once('=')?;
        let value = value.trim();
        (key.trim() == name && !value.is_empty()).then(|| value.to_string())
    })
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    #[test]
    fn bearer_header_wins_over_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; audiotracks_session=xyz"),
        );
        assert_eq!(extract_token(&headers).as_deref(), Some("abc"));

        headers.remove(header::AUTHORIZATION);
        assert_eq!(extract_token(&headers).as_deref(), Some("xyz"));

        headers.insert(header::COOKIE, HeaderValue::from_static("audiotracks_session="));
        assert_eq!(extract_token(&headers), None);
    }

    #[test]
    fn slug_errors_are_field_errors() {
        let (status, Json(body)) = library_error(LibraryError::SlugConflict("intro".into()));
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body.field.as_deref(), Some("slug"));
        assert_eq!(body.error, "This URL is already taken.");

        let (status, Json(body)) = library_error(LibraryError::NotFound);
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body.field.is_none());

        let (status, _) = library_error(LibraryError::OwnerRequired);
        assert_eq!(status, StatusCode::FORBIDDEN);
    }
}
