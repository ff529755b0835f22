use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use common::{join_relpath, relpath_from};
use tracing::debug;
use uuid::Uuid;

use crate::LibraryError;

const MEDIA_PREFIX: &str = "audiotracks";
const SHARED_OWNER_DIR: &str = "shared";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Audio,
    Image,
}

impl MediaKind {
    fn dir_name(self) -> &'static str {
        match self {
            MediaKind::Audio => "audio_files",
            MediaKind::Image => "images",
        }
    }
}

/// Stored blobs under the media root, addressed by slash separated relpaths.
#[derive(Debug, Clone)]
pub struct MediaStore {
    root: PathBuf,
}

impl MediaStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn absolute(&self, relpath: &str) -> Result<PathBuf, LibraryError> {
        join_relpath(&self.root, relpath)
            .ok_or_else(|| LibraryError::InvalidPath(relpath.to_string()))
    }

    /// Copies `source` into the owner's directory for `kind` and returns its
    /// relpath. An existing name is kept and the new file gets `_2`, `_3`, ...
    /// before its extension. The copy lands under a temporary name first and
    /// is renamed over a reserved final name.
    pub fn store(
        &self,
        kind: MediaKind,
        owner: Option<&str>,
        filename: &str,
        source: &Path,
    ) -> Result<String, LibraryError> {
        let dir = self
            .root
            .join(MEDIA_PREFIX)
            .join(kind.dir_name())
            .join(owner_dir(owner));
        fs::create_dir_all(&dir)?;

        let partial = dir.join(format!(".{}.part", Uuid::new_v4()));
        if let Err(err) = fs::copy(source, &partial) {
            let _ = fs::remove_file(&partial);
            return Err(err.into());
        }

        let name = sanitize_filename(filename);
        let target = match reserve_name(&dir, &name) {
            Ok(target) => target,
            Err(err) => {
                let _ = fs::remove_file(&partial);
                return Err(err);
            }
        };
        if let Err(err) = fs::rename(&partial, &target) {
            let _ = fs::remove_file(&partial);
            let _ = fs::remove_file(&target);
            return Err(err.into());
        }

        let relpath = relpath_from(&self.root, &target)
            .ok_or_else(|| LibraryError::InvalidPath(target.display().to_string()))?;
        debug!("Stored {:?} as {}", source, relpath);
        Ok(relpath)
    }

    /// Removes a stored file. Returns false when it was already gone.
    pub fn delete(&self, relpath: &str) -> Result<bool, LibraryError> {
        let path = self.absolute(relpath)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }
}

fn reserve_name(dir: &Path, name: &str) -> Result<PathBuf, LibraryError> {
    let (stem, ext) = split_extension(name);
    let mut counter: u32 = 1;
    loop {
        let candidate = if counter == 1 {
            name.to_string()
        } else {
            format!("{}_{}{}", stem, counter, ext)
        };
        let path = dir.join(&candidate);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(_) => return Ok(path),
            Err(err) if err.kind() == ErrorKind::AlreadyExists => counter += 1,
            Err(err) => return Err(err.into()),
        }
    }
}

fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(idx) if idx > 0 => (&name[..idx], &name[idx..]),
        _ => (name, ""),
    }
}

fn owner_dir(owner: Option<&str>) -> String {
    match owner
        .map(sanitize_component)
        .filter(|value| !value.chars().all(|ch| ch == '.'))
    {
        Some(value) => value,
        None => SHARED_OWNER_DIR.to_string(),
    }
}

fn sanitize_filename(filename: &str) -> String {
    let base = filename
        .rsplit(|c| c == '/' || c == '\\')
        .next()
        .unwrap_or(filename);
    let cleaned = sanitize_component(base);
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned.to_string()
    }
}

fn sanitize_component(value: &str) -> String {
    value
        .trim()
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-') {
                ch
            } else {
                '_'
            }
        })
        .collect()
}
