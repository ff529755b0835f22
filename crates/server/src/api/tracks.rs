use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use axum::{
    extract::{multipart::Field, multipart::MultipartError, Multipart, Path as AxumPath, State},
    http::StatusCode,
    Extension, Json,
};
use common::{parse_tags, TagField};
use library::{TrackEdit, Upload};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::state::{
    public_url_prefix, AppState, AuthContext, DeletedResponse, ErrorResponse, JsonResult,
    ListResponse, TrackEditView, TrackView,
};
use crate::utils::{join_error, json_error, json_field_error, library_error};

type ApiError = (StatusCode, Json<ErrorResponse>);

/// A parsed upload or edit form. File parts are already staged on disk.
#[derive(Debug, Default)]
pub struct TrackForm {
    text: BTreeMap<String, String>,
    audio_file: Option<Upload>,
    image: Option<Upload>,
}

impl TrackForm {
    /// Submitted text fields become edits; fields left out of the form keep
    /// their stored values.
    pub fn into_edit(self) -> TrackEdit {
        let mut edit = TrackEdit::default();
        for field in TagField::ALL {
            if let Some(value) = self.text.get(field.name()) {
                edit.fields.insert(field, Some(value.clone()));
            }
        }
        edit.tags = self.text.get("tags").map(|value| parse_tags(value));
        edit.slug = self.text.get("slug").cloned();
        edit.delete_image = self
            .text
            .get("delete_image")
            .map(|value| is_checked(value))
            .unwrap_or(false);
        edit.audio_file = self.audio_file;
        edit.image = self.image;
        edit
    }

    fn staged_paths(&self) -> Vec<PathBuf> {
        self.audio_file
            .iter()
            .chain(self.image.iter())
            .map(|upload| upload.path.clone())
            .collect()
    }
}

pub async fn list_tracks(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
) -> JsonResult<ListResponse<TrackView>> {
    let library = state.library.clone();
    let owner = ctx.owner().to_string();
    let multi_user = state.config.multi_user;
    let tracks = tokio::task::spawn_blocking(move || {
        if multi_user {
            library.list_owner_tracks(&owner)
        } else {
            library.list_latest(usize::MAX)
        }
    })
    .await
    .map_err(join_error)?
    .map_err(library_error)?;

    let items: Vec<TrackView> = tracks.iter().map(TrackView::from_track).collect();
    let total = items.len();
    Ok(Json(ListResponse { items, total }))
}

pub async fn upload_track(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<TrackView>), ApiError> {
    let form = read_track_form(multipart, &state.staging_dir).await?;
    let staged = form.staged_paths();
    let upload = match form.audio_file {
        Some(upload) => upload,
        None => {
            discard_staged(&staged).await;
            return Err(json_field_error(
                StatusCode::UNPROCESSABLE_ENTITY,
                "audio_file",
                "an audio file is required",
            ));
        }
    };

    let library = state.library.clone();
    let owner = ctx.owner().to_string();
    let result =
        tokio::task::spawn_blocking(move || library.upload_track(Some(&owner), &upload)).await;
    discard_staged(&staged).await;

    let track = result.map_err(join_error)?.map_err(library_error)?;
    Ok((StatusCode::CREATED, Json(TrackView::from_track(&track))))
}

pub async fn get_track(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    AxumPath(track_id): AxumPath<u64>,
) -> JsonResult<TrackEditView> {
    let library = state.library.clone();
    let owner = ctx.owner().to_string();
    let track = tokio::task::spawn_blocking(move || library.get_track(Some(&owner), track_id))
        .await
        .map_err(join_error)?
        .map_err(library_error)?;

    Ok(Json(TrackEditView {
        audio_filename: track.audio_filename().to_string(),
        url_prefix: public_url_prefix(track.owner.as_deref()),
        track: TrackView::from_track(&track),
    }))
}

pub async fn edit_track(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    AxumPath(track_id): AxumPath<u64>,
    multipart: Multipart,
) -> JsonResult<TrackView> {
    let form = read_track_form(multipart, &state.staging_dir).await?;
    let staged = form.staged_paths();
    let edit = form.into_edit();

    let library = state.library.clone();
    let owner = ctx.owner().to_string();
    let result =
        tokio::task::spawn_blocking(move || library.edit_track(Some(&owner), track_id, edit))
            .await;
    discard_staged(&staged).await;

    let track = result.map_err(join_error)?.map_err(library_error)?;
    Ok(Json(TrackView::from_track(&track)))
}

pub async fn delete_track(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    AxumPath(track_id): AxumPath<u64>,
) -> JsonResult<DeletedResponse> {
    let library = state.library.clone();
    let owner = ctx.owner().to_string();
    let track = tokio::task::spawn_blocking(move || library.delete_track(Some(&owner), track_id))
        .await
        .map_err(join_error)?
        .map_err(library_error)?;

    Ok(Json(DeletedResponse {
        id: track.id,
        title: track.title,
    }))
}

async fn read_track_form(
    mut multipart: Multipart,
    staging_dir: &Path,
) -> Result<TrackForm, ApiError> {
    let mut form = TrackForm::default();
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(err) => {
                discard_staged(&form.staged_paths()).await;
                return Err(multipart_error(err));
            }
        };
        let name = field.name().unwrap_or("").to_string();
        let result = match name.as_str() {
            "audio_file" => stage_file(field, staging_dir)
                .await
                .map(|upload| replace_upload(&mut form.audio_file, upload)),
            "image" => stage_file(field, staging_dir)
                .await
                .map(|upload| replace_upload(&mut form.image, upload)),
            _ => match field.text().await {
                Ok(value) => {
                    form.text.insert(name, value);
                    Ok(None)
                }
                Err(err) => Err(multipart_error(err)),
            },
        };
        match result {
            Ok(Some(superseded)) => discard_staged(&[superseded]).await,
            Ok(None) => {}
            Err(err) => {
                discard_staged(&form.staged_paths()).await;
                return Err(err);
            }
        }
    }
    Ok(form)
}

/// Keeps the last submitted file for a field; returns the staged path it
/// displaced.
fn replace_upload(slot: &mut Option<Upload>, upload: Option<Upload>) -> Option<PathBuf> {
    match upload {
        Some(upload) => slot.replace(upload).map(|previous| previous.path),
        None => None,
    }
}

/// Streams a file part into the staging directory. Empty file inputs come
/// back as `None`.
async fn stage_file(mut field: Field<'_>, staging_dir: &Path) -> Result<Option<Upload>, ApiError> {
    let filename = match field.file_name().map(str::trim) {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => return Ok(None),
    };
    let content_type = field.content_type().map(str::to_string);

    tokio::fs::create_dir_all(staging_dir)
        .await
        .map_err(|err| json_error(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()))?;
    let path = staging_dir.join(staged_name(&filename));
    let mut file = tokio::fs::File::create(&path)
        .await
        .map_err(|err| json_error(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()))?;

    let mut written: u64 = 0;
    loop {
        let chunk = match field.chunk().await {
            Ok(Some(chunk)) => chunk,
            Ok(None) => break,
            Err(err) => {
                drop(file);
                discard_staged(&[path]).await;
                return Err(multipart_error(err));
            }
        };
        if let Err(err) = file.write_all(&chunk).await {
            drop(file);
            discard_staged(&[path]).await;
            return Err(json_error(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()));
        }
        written += chunk.len() as u64;
    }
    if let Err(err) = file.flush().await {
        drop(file);
        discard_staged(&[path]).await;
        return Err(json_error(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()));
    }
    drop(file);

    if written == 0 {
        discard_staged(&[path]).await;
        return Ok(None);
    }
    debug!("Staged {} ({} bytes) at {:?}", filename, written, path);
    Ok(Some(Upload {
        path,
        filename,
        content_type,
    }))
}

/// Random staging name that keeps the client's extension so tag readers can
/// still tell the container apart.
fn staged_name(filename: &str) -> String {
    let ext: String = Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            ext.chars()
                .filter(|ch| ch.is_ascii_alphanumeric())
                .take(8)
                .collect::<String>()
                .to_ascii_lowercase()
        })
        .unwrap_or_default();
    if ext.is_empty() {
        format!("{}.upload", Uuid::new_v4())
    } else {
        format!("{}.{}", Uuid::new_v4(), ext)
    }
}

async fn discard_staged(paths: &[PathBuf]) {
    for path in paths {
        if let Err(err) = tokio::fs::remove_file(path).await {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove staged upload {:?}: {}", path, err);
            }
        }
    }
}

fn multipart_error(err: MultipartError) -> ApiError {
    json_error(err.status(), err.body_text())
}

fn is_checked(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "on" | "true" | "1" | "yes"
    )
}
