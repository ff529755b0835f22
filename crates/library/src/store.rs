use std::sync::Arc;

use common::{ScopeMode, SlugScope, Track};
use redb::{Database, ReadableTable, TableDefinition, TableError, WriteTransaction};
use serde::{Deserialize, Serialize};

use crate::slug::{first_free, SlugIndex};
use crate::{now_secs, LibraryError};

const INDEX_VERSION: u32 = 1;
const KEY_SEP: char = '\x1f';

const META_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("meta");
const TRACKS_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("tracks");
/// `scope key + KEY_SEP + slug` -> track id. Holding a key is what makes a
/// slug taken; inserts of an existing key abort the transaction.
const TRACK_SLUGS_TABLE: TableDefinition<&str, u64> = TableDefinition::new("track_slugs");

const META_VERSION_KEY: &str = "version";
const META_NEXT_ID_KEY: &str = "next_track_id";
const META_SCOPE_MODE_KEY: &str = "scope_mode";

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LibraryStats {
    pub tracks: usize,
    pub owners: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenamedSlug {
    pub track_id: u64,
    pub from: String,
    pub to: String,
}

#[derive(Clone, Debug, Default)]
pub struct ReconcileReport {
    pub tracks: usize,
    pub renamed: Vec<RenamedSlug>,
}

#[derive(Clone)]
pub struct TrackStore {
    db: Arc<Database>,
    mode: ScopeMode,
}

impl TrackStore {
    pub fn new(db: Arc<Database>, mode: ScopeMode) -> Self {
        Self { db, mode }
    }

    pub fn mode(&self) -> ScopeMode {
        self.mode
    }

    /// Creates the tables, and records version and scope mode on a fresh
    /// database.
    pub fn init_tables(&self) -> Result<(), LibraryError> {
        let write_txn = self.db.begin_write()?;
        {
            let _ = write_txn.open_table(TRACKS_TABLE)?;
            let _ = write_txn.open_table(TRACK_SLUGS_TABLE)?;
            let mut meta = write_txn.open_table(META_TABLE)?;
            let has_version = meta.get(META_VERSION_KEY)?.is_some();
            if !has_version {
                let bytes = encode_value(&INDEX_VERSION)?;
                meta.insert(META_VERSION_KEY, bytes.as_slice())?;
            }
            let has_mode = meta.get(META_SCOPE_MODE_KEY)?.is_some();
            if !has_mode {
                let bytes = encode_value(&self.mode)?;
                meta.insert(META_SCOPE_MODE_KEY, bytes.as_slice())?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn stored_version(&self) -> Result<Option<u32>, LibraryError> {
        self.read_meta(META_VERSION_KEY)
    }

    pub fn stored_mode(&self) -> Result<Option<ScopeMode>, LibraryError> {
        self.read_meta(META_SCOPE_MODE_KEY)
    }

    fn read_meta<T: for<'de> Deserialize<'de>>(&self, key: &str) -> Result<Option<T>, LibraryError> {
        let read_txn = self.db.begin_read()?;
        let table = match read_txn.open_table(META_TABLE) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let value = match table.get(key)? {
            Some(value) => Some(decode_value(value.value())?),
            None => None,
        };
        Ok(value)
    }

    pub fn scope_of(&self, track: &Track) -> SlugScope {
        self.mode.scope_for(track.owner.as_deref())
    }

    pub fn get(&self, track_id: u64) -> Result<Option<Track>, LibraryError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(TRACKS_TABLE)?;
        let track = match table.get(track_id)? {
            Some(value) => Some(decode_value(value.value())?),
            None => None,
        };
        Ok(track)
    }

    pub fn find_by_slug(
        &self,
        scope: &SlugScope,
        slug: &str,
    ) -> Result<Option<Track>, LibraryError> {
        let read_txn = self.db.begin_read()?;
        let slugs = read_txn.open_table(TRACK_SLUGS_TABLE)?;
        let tracks = read_txn.open_table(TRACKS_TABLE)?;
        let key = slug_key(scope, slug);
        let track_id = match slugs.get(key.as_str())? {
            Some(value) => value.value(),
            None => return Ok(None),
        };
        let track = match tracks.get(track_id)? {
            Some(value) => Some(decode_value(value.value())?),
            None => None,
        };
        Ok(track)
    }

    /// All tracks in id (creation) order.
    pub fn list(&self) -> Result<Vec<Track>, LibraryError> {
        let read_txn = self.db.begin_read()?;
        let table = match read_txn.open_table(TRACKS_TABLE) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut items = Vec::new();
        for entry in table.iter()? {
            let entry = entry?;
            let track: Track = decode_value(entry.1.value())?;
            items.push(track);
        }
        Ok(items)
    }

    pub fn stats(&self) -> Result<LibraryStats, LibraryError> {
        let tracks = self.list()?;
        let mut owners: Vec<&str> = tracks
            .iter()
            .filter_map(|track| track.owner.as_deref())
            .collect();
        owners.sort_unstable();
        owners.dedup();
        Ok(LibraryStats {
            tracks: tracks.len(),
            owners: owners.len(),
        })
    }

    /// Assigns the next id and stores `track`. Fails with `SlugTaken` when the
    /// slug was claimed in the track's scope since it was probed.
    pub fn insert(&self, mut track: Track) -> Result<Track, LibraryError> {
        let key = slug_key(&self.scope_of(&track), &track.slug);
        let write_txn = self.db.begin_write()?;
        {
            let mut meta = write_txn.open_table(META_TABLE)?;
            let mut slugs = write_txn.open_table(TRACK_SLUGS_TABLE)?;
            let mut tracks = write_txn.open_table(TRACKS_TABLE)?;

            if slugs.get(key.as_str())?.is_some() {
                return Err(LibraryError::SlugTaken(track.slug));
            }

            let next_id: u64 = match meta.get(META_NEXT_ID_KEY)? {
                Some(value) => decode_value(value.value())?,
                None => 1,
            };
            let bytes = encode_value(&(next_id + 1))?;
            meta.insert(META_NEXT_ID_KEY, bytes.as_slice())?;

            track.id = next_id;
            let bytes = encode_value(&track)?;
            tracks.insert(track.id, bytes.as_slice())?;
            slugs.insert(key.as_str(), track.id)?;
        }
        write_txn.commit()?;
        Ok(track)
    }

    /// Persists an edited track. When the slug differs from `original_slug`
    /// the index entry is moved in the same transaction.
    pub fn update(&self, track: &Track, original_slug: &str) -> Result<(), LibraryError> {
        let scope = self.scope_of(track);
        let write_txn = self.db.begin_write()?;
        {
            let mut slugs = write_txn.open_table(TRACK_SLUGS_TABLE)?;
            let mut tracks = write_txn.open_table(TRACKS_TABLE)?;

            if tracks.get(track.id)?.is_none() {
                return Err(LibraryError::NotFound);
            }

            if track.slug != original_slug {
                let new_key = slug_key(&scope, &track.slug);
                let holder = slugs.get(new_key.as_str())?.map(|value| value.value());
                if matches!(holder, Some(id) if id != track.id) {
                    return Err(LibraryError::SlugTaken(track.slug.clone()));
                }
                let old_key = slug_key(&scope, original_slug);
                let old_holder = slugs.get(old_key.as_str())?.map(|value| value.value());
                if old_holder == Some(track.id) {
                    slugs.remove(old_key.as_str())?;
                }
                slugs.insert(new_key.as_str(), track.id)?;
            }

            let bytes = encode_value(track)?;
            tracks.insert(track.id, bytes.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn remove(&self, track_id: u64) -> Result<Option<Track>, LibraryError> {
        let write_txn = self.db.begin_write()?;
        let removed = {
            let mut slugs = write_txn.open_table(TRACK_SLUGS_TABLE)?;
            let mut tracks = write_txn.open_table(TRACKS_TABLE)?;
            let track: Track = match tracks.remove(track_id)? {
                Some(value) => decode_value(value.value())?,
                None => return Ok(None),
            };
            let key = slug_key(&self.scope_of(&track), &track.slug);
            let holder = slugs.get(key.as_str())?.map(|value| value.value());
            if holder == Some(track_id) {
                slugs.remove(key.as_str())?;
            }
            track
        };
        write_txn.commit()?;
        Ok(Some(removed))
    }

    /// Rebuilds the slug index for the configured mode. Tracks are visited in
    /// id order; a track whose slug is already held in its scope is moved to
    /// the lowest free suffix of that slug.
    pub fn rebuild_slug_index(&self) -> Result<ReconcileReport, LibraryError> {
        let tracks = self.list()?;
        let now = now_secs();
        let mut report = ReconcileReport {
            tracks: tracks.len(),
            renamed: Vec::new(),
        };

        let write_txn = self.db.begin_write()?;
        clear_table(&write_txn, TRACK_SLUGS_TABLE)?;
        {
            let mut slugs = write_txn.open_table(TRACK_SLUGS_TABLE)?;
            let mut table = write_txn.open_table(TRACKS_TABLE)?;
            let mut meta = write_txn.open_table(META_TABLE)?;

            for mut track in tracks {
                let scope = self.scope_of(&track);
                let slug = first_free(&track.slug, |candidate| {
                    let key = slug_key(&scope, candidate);
                    Ok(slugs.get(key.as_str())?.is_some())
                })?;
                if slug != track.slug {
                    report.renamed.push(RenamedSlug {
                        track_id: track.id,
                        from: track.slug.clone(),
                        to: slug.clone(),
                    });
                    track.slug = slug;
                    track.updated_at = now;
                    let bytes = encode_value(&track)?;
                    table.insert(track.id, bytes.as_slice())?;
                }
                let key = slug_key(&scope, &track.slug);
                slugs.insert(key.as_str(), track.id)?;
            }

            let bytes = encode_value(&self.mode)?;
            meta.insert(META_SCOPE_MODE_KEY, bytes.as_slice())?;
        }
        write_txn.commit()?;
        Ok(report)
    }
}

impl SlugIndex for TrackStore {
    fn slug_in_use(
        &self,
        scope: &SlugScope,
        slug: &str,
        exclude: Option<u64>,
    ) -> Result<bool, LibraryError> {
        let read_txn = self.db.begin_read()?;
        let slugs = match read_txn.open_table(TRACK_SLUGS_TABLE) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(false),
            Err(err) => return Err(err.into()),
        };
        let key = slug_key(scope, slug);
        let holder = slugs.get(key.as_str())?.map(|value| value.value());
        Ok(match holder {
            Some(id) => Some(id) != exclude,
            None => false,
        })
    }
}

fn slug_key(scope: &SlugScope, slug: &str) -> String {
    let mut out = String::new();
    out.push_str(scope.key());
    out.push(KEY_SEP);
    out.push_str(slug);
    out
}

fn clear_table(
    txn: &WriteTransaction,
    table: TableDefinition<&str, u64>,
) -> Result<(), LibraryError> {
    match txn.delete_table(table) {
        Ok(_) => Ok(()),
        Err(TableError::TableDoesNotExist(_)) => Ok(()),
        Err(err) => Err(err.into()),
    }
}

pub(crate) fn encode_value<T: Serialize>(value: &T) -> Result<Vec<u8>, LibraryError> {
    Ok(bincode::serialize(value)?)
}

pub(crate) fn decode_value<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T, LibraryError> {
    Ok(bincode::deserialize(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_store(dir: &std::path::Path, mode: ScopeMode) -> TrackStore {
        let db = Database::create(dir.join("tracks.redb")).unwrap();
        let store = TrackStore::new(Arc::new(db), mode);
        store.init_tables().unwrap();
        store
    }

    fn draft(owner: Option<&str>, slug: &str) -> Track {
        Track {
            id: 0,
            owner: owner.map(str::to_string),
            created_at: 1,
            updated_at: 1,
            audio_file: format!("audiotracks/audio_files/{}.ogg", slug),
            mimetype: None,
            image: None,
            title: None,
            artist: None,
            genre: None,
            date: None,
            description: None,
            tags: Vec::new(),
            slug: slug.to_string(),
        }
    }

    #[test]
    fn ids_increase_and_are_not_reused() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path(), ScopeMode::SingleUser);
        let first = store.insert(draft(None, "a")).unwrap();
        let second = store.insert(draft(None, "b")).unwrap();
        assert_eq!((first.id, second.id), (1, 2));

        store.remove(second.id).unwrap();
        let third = store.insert(draft(None, "c")).unwrap();
        assert_eq!(third.id, 3);
    }

    #[test]
    fn duplicate_slug_in_scope_is_rejected_at_commit() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path(), ScopeMode::MultiUser);
        store.insert(draft(Some("alice"), "intro")).unwrap();
        store.insert(draft(Some("bob"), "intro")).unwrap();

        let err = store.insert(draft(Some("alice"), "intro")).unwrap_err();
        assert!(matches!(err, LibraryError::SlugTaken(slug) if slug == "intro"));
        assert_eq!(store.list().unwrap().len(), 2);
    }

    #[test]
    fn update_moves_slug_entry() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path(), ScopeMode::SingleUser);
        let mut track = store.insert(draft(None, "old")).unwrap();
        track.slug = "new".to_string();
        store.update(&track, "old").unwrap();

        assert!(!store.slug_in_use(&SlugScope::Global, "old", None).unwrap());
        let found = store.find_by_slug(&SlugScope::Global, "new").unwrap().unwrap();
        assert_eq!(found.id, track.id);
    }

    #[test]
    fn remove_frees_slug() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path(), ScopeMode::SingleUser);
        let track = store.insert(draft(None, "gone")).unwrap();
        let removed = store.remove(track.id).unwrap();
        assert_eq!(removed.map(|t| t.id), Some(track.id));
        assert!(store.get(track.id).unwrap().is_none());
        assert!(!store.slug_in_use(&SlugScope::Global, "gone", None).unwrap());
        assert!(store.remove(track.id).unwrap().is_none());
    }

    #[test]
    fn rebuild_resolves_collisions_after_mode_switch() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = open_store(dir.path(), ScopeMode::MultiUser);
            store.insert(draft(Some("alice"), "intro")).unwrap();
            store.insert(draft(Some("bob"), "intro")).unwrap();
            store.insert(draft(Some("bob"), "outro")).unwrap();
        }

        let db = Database::open(dir.path().join("tracks.redb")).unwrap();
        let store = TrackStore::new(Arc::new(db), ScopeMode::SingleUser);
        assert_eq!(store.stored_mode().unwrap(), Some(ScopeMode::MultiUser));

        let report = store.rebuild_slug_index().unwrap();
        assert_eq!(report.tracks, 3);
        assert_eq!(
            report.renamed,
            vec![RenamedSlug {
                track_id: 2,
                from: "intro".to_string(),
                to: "intro-2".to_string(),
            }]
        );
        assert_eq!(store.stored_mode().unwrap(), Some(ScopeMode::SingleUser));
        let moved = store.find_by_slug(&SlugScope::Global, "intro-2").unwrap();
        assert_eq!(moved.map(|t| t.owner), Some(Some("bob".to_string())));
    }
}
