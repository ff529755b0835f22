pub mod media;
pub mod slug;
pub mod store;
pub mod sync;

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use common::{label_for, ScopeMode, TagField, Track};
use redb::{CommitError, Database, DatabaseError, StorageError, TableError, TransactionError};
use tracing::{info, warn};

use media::{MediaKind, MediaStore};
use slug::{SlugAllocator, SlugCheck, SlugIndex};
use store::TrackStore;

pub use store::{LibraryStats, ReconcileReport, RenamedSlug};

/// How many times an upload re-probes after losing a slug race at commit.
const SLUG_RETRY_LIMIT: usize = 1;

/// An uploaded file already written to local disk.
#[derive(Debug, Clone)]
pub struct Upload {
    pub path: PathBuf,
    pub filename: String,
    pub content_type: Option<String>,
}

/// Changes submitted for an existing track. Fields absent from `fields` keep
/// their stored value; a present `None` (or blank) clears the field.
#[derive(Debug, Clone, Default)]
pub struct TrackEdit {
    pub fields: BTreeMap<TagField, Option<String>>,
    pub tags: Option<Vec<String>>,
    pub slug: Option<String>,
    pub audio_file: Option<Upload>,
    pub image: Option<Upload>,
    pub delete_image: bool,
}

#[derive(Clone)]
pub struct Library {
    media: MediaStore,
    store: TrackStore,
    allocator: SlugAllocator,
}

impl Library {
    pub fn open(media_root: PathBuf, db_path: &Path, mode: ScopeMode) -> Result<Self, LibraryError> {
        let db = Self::open_db(db_path)?;
        Self::open_with_db(media_root, db, mode)
    }

    /// Opens the library on an existing database. Refuses to start when the
    /// database was indexed under the other scope mode; see `reconcile_scope`.
    pub fn open_with_db(
        media_root: PathBuf,
        db: Arc<Database>,
        mode: ScopeMode,
    ) -> Result<Self, LibraryError> {
        let library = Self::open_for_reconcile(media_root, db, mode)?;
        match library.store.stored_mode()? {
            Some(stored) if stored != mode => Err(LibraryError::ScopeModeChanged {
                stored,
                configured: mode,
            }),
            _ => Ok(library),
        }
    }

    /// Opens without the scope mode precondition. Only the reconciliation
    /// tool should need this.
    pub fn open_for_reconcile(
        media_root: PathBuf,
        db: Arc<Database>,
        mode: ScopeMode,
    ) -> Result<Self, LibraryError> {
        let store = TrackStore::new(db, mode);
        store.init_tables()?;
        if let Some(version) = store.stored_version()? {
            info!("Opened track index (version {}, {} mode)", version, mode);
        }
        Ok(Self {
            media: MediaStore::new(media_root),
            store,
            allocator: SlugAllocator::new(mode),
        })
    }

    pub fn open_db(path: &Path) -> Result<Arc<Database>, LibraryError> {
        let db = open_or_create_db(path)?;
        Ok(Arc::new(db))
    }

    pub fn mode(&self) -> ScopeMode {
        self.allocator.mode()
    }

    pub fn media(&self) -> &MediaStore {
        &self.media
    }

    pub fn stats(&self) -> Result<LibraryStats, LibraryError> {
        self.store.stats()
    }

    pub fn audio_path(&self, track: &Track) -> Result<PathBuf, LibraryError> {
        self.media.absolute(&track.audio_file)
    }

    /// Creates a track from an uploaded audio file. Embedded tags fill the
    /// metadata fields; the slug comes from the title or the file name.
    pub fn upload_track(&self, owner: Option<&str>, upload: &Upload) -> Result<Track, LibraryError> {
        if self.mode().is_multi_user() && owner.is_none() {
            return Err(LibraryError::OwnerRequired);
        }

        let extracted = sync::extract_metadata(&upload.path);
        let relpath = self
            .media
            .store(MediaKind::Audio, owner, &upload.filename, &upload.path)?;

        let now = now_secs();
        let mut draft = Track {
            id: 0,
            owner: owner.map(str::to_string),
            created_at: now,
            updated_at: now,
            audio_file: relpath,
            mimetype: mimetype_for(upload),
            image: None,
            title: None,
            artist: None,
            genre: None,
            date: None,
            description: None,
            tags: Vec::new(),
            slug: String::new(),
        };
        sync::apply_extracted(&mut draft, &extracted);

        let label = label_for(draft.title.as_deref(), &upload.filename);
        match self.insert_with_slug(&self.store, draft.clone(), &label) {
            Ok(track) => {
                info!(
                    "Uploaded track {} ({}) as {}",
                    track.id, track.slug, track.audio_file
                );
                Ok(track)
            }
            Err(err) => {
                self.release_file(&draft.audio_file);
                Err(err)
            }
        }
    }

    /// Probes `index` for a free slug and inserts. The store's slug table is
    /// authoritative; a probe result it rejects is re-probed once.
    fn insert_with_slug<I: SlugIndex + ?Sized>(
        &self,
        index: &I,
        mut draft: Track,
        label: &str,
    ) -> Result<Track, LibraryError> {
        let scope = self.allocator.scope_for(draft.owner.as_deref());
        let mut retries = 0;
        loop {
            draft.slug = self.allocator.allocate_slug(index, label, &scope)?;
            match self.store.insert(draft.clone()) {
                Err(LibraryError::SlugTaken(slug)) if retries < SLUG_RETRY_LIMIT => {
                    retries += 1;
                    warn!("Slug {} was claimed concurrently; probing again", slug);
                }
                result => return result,
            }
        }
    }

    /// Looks a track up by id, as seen by `requester`. In multi-user mode
    /// another owner's track is reported exactly like a missing one.
    pub fn get_track(&self, requester: Option<&str>, track_id: u64) -> Result<Track, LibraryError> {
        match self.store.get(track_id)? {
            Some(track) if self.visible_to(&track, requester) => Ok(track),
            _ => Err(LibraryError::NotFound),
        }
    }

    /// Public lookup behind a track URL.
    pub fn get_by_slug(&self, owner: Option<&str>, slug: &str) -> Result<Track, LibraryError> {
        let scope = self.allocator.scope_for(owner);
        self.store
            .find_by_slug(&scope, slug)?
            .ok_or(LibraryError::NotFound)
    }

    /// Newest tracks first, across all owners.
    pub fn list_latest(&self, limit: usize) -> Result<Vec<Track>, LibraryError> {
        let mut tracks = self.store.list()?;
        sort_newest_first(&mut tracks);
        tracks.truncate(limit);
        Ok(tracks)
    }

    pub fn list_owner_tracks(&self, owner: &str) -> Result<Vec<Track>, LibraryError> {
        let mut tracks: Vec<Track> = self
            .store
            .list()?
            .into_iter()
            .filter(|track| track.owner.as_deref() == Some(owner))
            .collect();
        sort_newest_first(&mut tracks);
        Ok(tracks)
    }

    /// Applies an edit. A requested slug that is taken in scope rejects the
    /// whole edit before anything is written. Tag write-back into the audio
    /// file is best effort and never blocks the record update.
    pub fn edit_track(
        &self,
        requester: Option<&str>,
        track_id: u64,
        edit: TrackEdit,
    ) -> Result<Track, LibraryError> {
        let stored = self.get_track(requester, track_id)?;
        let original_slug = stored.slug.clone();
        let scope = self.store.scope_of(&stored);

        let mut updated = stored.clone();
        if let Some(proposed) = edit.slug.as_deref().map(str::trim) {
            let check = self.allocator.validate_slug_change(
                &self.store,
                &scope,
                stored.id,
                &original_slug,
                proposed,
            )?;
            if check == SlugCheck::Available {
                updated.slug = proposed.to_string();
            }
        }

        let mut created: Vec<String> = Vec::new();
        let mut released: Vec<String> = Vec::new();

        if let Some(upload) = &edit.audio_file {
            let relpath = self.media.store(
                MediaKind::Audio,
                stored.owner.as_deref(),
                &upload.filename,
                &upload.path,
            )?;
            created.push(relpath.clone());
            released.push(stored.audio_file.clone());
            updated.audio_file = relpath;
            updated.mimetype = mimetype_for(upload);

            let extracted = sync::extract_metadata(&upload.path);
            sync::apply_extracted(&mut updated, &extracted);
        }

        for (field, value) in &edit.fields {
            let value = value.clone().and_then(common::clean_text);
            if value.as_deref() != stored.field(*field) {
                updated.set_field(*field, value);
            }
        }
        if let Some(tags) = &edit.tags {
            updated.tags = tags.clone();
        }

        if let Some(upload) = &edit.image {
            let relpath = match self.media.store(
                MediaKind::Image,
                stored.owner.as_deref(),
                &upload.filename,
                &upload.path,
            ) {
                Ok(relpath) => relpath,
                Err(err) => {
                    self.release_files(&created);
                    return Err(err);
                }
            };
            created.push(relpath.clone());
            released.extend(stored.image.clone());
            updated.image = Some(relpath);
        } else if edit.delete_image {
            released.extend(stored.image.clone());
            updated.image = None;
        }

        updated.updated_at = now_secs();
        if let Err(err) = self.store.update(&updated, &original_slug) {
            self.release_files(&created);
            return Err(match err {
                LibraryError::SlugTaken(slug) => LibraryError::SlugConflict(slug),
                other => other,
            });
        }

        self.write_back(&updated);
        self.release_files(&released);
        info!("Updated track {} ({})", updated.id, updated.slug);
        Ok(updated)
    }

    fn write_back(&self, track: &Track) {
        let path = match self.audio_path(track) {
            Ok(path) => path,
            Err(err) => {
                warn!("Skipping tag sync for track {}: {}", track.id, err);
                return;
            }
        };
        if let Err(err) = sync::sync_metadata_to_file(track, &path) {
            warn!(
                "Could not write tags for track {} into {:?}: {}",
                track.id, path, err
            );
        }
    }

    /// Removes the record and the files it owns.
    pub fn delete_track(&self, requester: Option<&str>, track_id: u64) -> Result<Track, LibraryError> {
        self.get_track(requester, track_id)?;
        let track = self.store.remove(track_id)?.ok_or(LibraryError::NotFound)?;
        self.release_file(&track.audio_file);
        if let Some(image) = &track.image {
            self.release_file(image);
        }
        info!("Deleted track {} ({})", track.id, track.slug);
        Ok(track)
    }

    /// One-time pass after switching scope mode on an existing index.
    pub fn reconcile_scope(&self) -> Result<ReconcileReport, LibraryError> {
        let report = self.store.rebuild_slug_index()?;
        for renamed in &report.renamed {
            info!(
                "Track {} slug {} -> {}",
                renamed.track_id, renamed.from, renamed.to
            );
        }
        Ok(report)
    }

    fn visible_to(&self, track: &Track, requester: Option<&str>) -> bool {
        match self.mode() {
            ScopeMode::SingleUser => true,
            ScopeMode::MultiUser => {
                requester.is_some() && track.owner.as_deref() == requester
            }
        }
    }

    fn release_files(&self, relpaths: &[String]) {
        for relpath in relpaths {
            self.release_file(relpath);
        }
    }

    fn release_file(&self, relpath: &str) {
        if let Err(err) = self.media.delete(relpath) {
            warn!("Failed to remove stored file {}: {}", relpath, err);
        }
    }
}

fn mimetype_for(upload: &Upload) -> Option<String> {
    let declared = upload
        .content_type
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty() && *value != "application/octet-stream");
    match declared {
        Some(value) => Some(value.to_string()),
        None => mime_guess::from_path(&upload.filename)
            .first()
            .map(|mime| mime.essence_str().to_string()),
    }
}

fn sort_newest_first(tracks: &mut [Track]) {
    tracks.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
}

#[derive(Debug)]
pub enum LibraryError {
    Io(std::io::Error),
    Redb(redb::Error),
    Bincode(Box<bincode::ErrorKind>),
    InvalidPath(String),
    NotFound,
    OwnerRequired,
    InvalidSlug(String),
    SlugConflict(String),
    SlugTaken(String),
    ScopeModeChanged {
        stored: ScopeMode,
        configured: ScopeMode,
    },
}

impl LibraryError {
    /// Errors the user can fix by changing the submitted form.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            LibraryError::InvalidSlug(_) | LibraryError::SlugConflict(_)
        )
    }
}

impl std::fmt::Display for LibraryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LibraryError::Io(err) => write!(f, "io error: {}", err),
            LibraryError::Redb(err) => write!(f, "db error: {}", err),
            LibraryError::Bincode(err) => write!(f, "bincode error: {}", err),
            LibraryError::InvalidPath(value) => write!(f, "invalid media path: {}", value),
            LibraryError::NotFound => write!(f, "track not found"),
            LibraryError::OwnerRequired => write!(f, "an owner is required in multi-user mode"),
            LibraryError::InvalidSlug(value) => {
                write!(f, "\"{}\" is not a valid URL slug", value)
            }
            LibraryError::SlugConflict(_) => write!(f, "This URL is already taken."),
            LibraryError::SlugTaken(value) => write!(f, "slug already claimed: {}", value),
            LibraryError::ScopeModeChanged { stored, configured } => write!(
                f,
                "index was built in {} mode but {} mode is configured; run reconcile_slugs",
                stored, configured
            ),
        }
    }
}

impl std::error::Error for LibraryError {}

impl From<std::io::Error> for LibraryError {
    fn from(err: std::io::Error) -> Self {
        LibraryError::Io(err)
    }
}

impl From<redb::Error> for LibraryError {
    fn from(err: redb::Error) -> Self {
        LibraryError::Redb(err)
    }
}

impl From<DatabaseError> for LibraryError {
    fn from(err: DatabaseError) -> Self {
        LibraryError::Redb(err.into())
    }
}

impl From<TableError> for LibraryError {
    fn from(err: TableError) -> Self {
        LibraryError::Redb(err.into())
    }
}

impl From<TransactionError> for LibraryError {
    fn from(err: TransactionError) -> Self {
        LibraryError::Redb(err.into())
    }
}

impl From<StorageError> for LibraryError {
    fn from(err: StorageError) -> Self {
        LibraryError::Redb(err.into())
    }
}

impl From<CommitError> for LibraryError {
    fn from(err: CommitError) -> Self {
        LibraryError::Redb(err.into())
    }
}

impl From<Box<bincode::ErrorKind>> for LibraryError {
    fn from(err: Box<bincode::ErrorKind>) -> Self {
        LibraryError::Bincode(err)
    }
}

fn open_or_create_db(path: &Path) -> Result<Database, LibraryError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    if path.exists() {
        Ok(Database::open(path)?)
    } else {
        Ok(Database::create(path)?)
    }
}

pub(crate) fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0))
        .as_secs()
}
