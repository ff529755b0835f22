use std::io::{ErrorKind, SeekFrom};
use std::path::Path;

use axum::body::Body;
use axum::extract::{Path as AxumPath, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::Response;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;
use tracing::warn;

use crate::range::{parse_range_header, RangeError};
use crate::state::AppState;
use crate::utils::json_error_response;

const MEDIA_PREFIX: &str = "audiotracks/";

/// Serves a stored audio or image file by its media relpath. Honors a single
/// `Range` so players can seek.
pub async fn media_file(
    State(state): State<AppState>,
    AxumPath(relpath): AxumPath<String>,
    headers: HeaderMap,
) -> Response {
    if !relpath.starts_with(MEDIA_PREFIX) {
        return json_error_response(StatusCode::NOT_FOUND, "not found");
    }
    let path = match state.library.media().absolute(&relpath) {
        Ok(path) => path,
        Err(_) => return json_error_response(StatusCode::NOT_FOUND, "not found"),
    };

    let range = headers
        .get(header::RANGE)
        .and_then(|value| value.to_str().ok());
    match file_response(&path, &content_type_for(&relpath), range).await {
        Ok(response) => response,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            json_error_response(StatusCode::NOT_FOUND, "not found")
        }
        Err(err) => {
            warn!("Failed to read media file {:?}: {}", path, err);
            json_error_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to read file")
        }
    }
}

fn content_type_for(relpath: &str) -> String {
    mime_guess::from_path(relpath)
        .first_or_octet_stream()
        .to_string()
}

async fn file_response(
    path: &Path,
    mime: &str,
    range: Option<&str>,
) -> std::io::Result<Response> {
    let mut file = tokio::fs::File::open(path).await?;
    let size = file.metadata().await?.len();

    let range = match range.map(|value| parse_range_header(value, size)) {
        Some(Ok(range)) => Some(range),
        Some(Err(RangeError::Unsatisfiable)) => {
            let mut response = Response::new(Body::empty());
            *response.status_mut() = StatusCode::RANGE_NOT_SATISFIABLE;
            set_header(&mut response, header::CONTENT_RANGE, &format!("bytes */{}", size));
            return Ok(response);
        }
        Some(Err(RangeError::Invalid)) | None => None,
    };

    let mut response = match range {
        Some(range) => {
            file.seek(SeekFrom::Start(range.start)).await?;
            let body = Body::from_stream(ReaderStream::new(file.take(range.length())));
            let mut response = Response::new(body);
            *response.status_mut() = StatusCode::PARTIAL_CONTENT;
            set_header(&mut response, header::CONTENT_RANGE, &range.content_range(size));
            set_header(&mut response, header::CONTENT_LENGTH, &range.length().to_string());
            response
        }
        None => {
            let mut response = Response::new(Body::from_stream(ReaderStream::new(file)));
            set_header(&mut response, header::CONTENT_LENGTH, &size.to_string());
            response
        }
    };

    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(mime)
            .unwrap_or(HeaderValue::from_static("application/octet-stream")),
    );
    response
        .headers_mut()
        .insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("public, max-age=3600"),
    );
    Ok(response)
}

fn set_header(response: &mut Response, name: header::HeaderName, value: &str) {
    if let Ok(value) = HeaderValue::from_str(value) {
        response.headers_mut().insert(name, value);
    }
}
