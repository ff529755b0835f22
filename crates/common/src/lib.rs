use deunicode::deunicode_with_tofu;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path, PathBuf};

pub const FALLBACK_SLUG: &str = "track";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    pub id: u64,
    pub owner: Option<String>,
    pub created_at: u64,
    pub updated_at: u64,
    pub audio_file: String,
    #[serde(default)]
    pub mimetype: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    pub title: Option<String>,
    pub artist: Option<String>,
    pub genre: Option<String>,
    pub date: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub slug: String,
}

impl Track {
    pub fn field(&self, field: TagField) -> Option<&str> {
        let value = match field {
            TagField::Title => &self.title,
            TagField::Artist => &self.artist,
            TagField::Genre => &self.genre,
            TagField::Description => &self.description,
            TagField::Date => &self.date,
        };
        value.as_deref()
    }

    pub fn set_field(&mut self, field: TagField, value: Option<String>) {
        let value = value.and_then(clean_text);
        match field {
            TagField::Title => self.title = value,
            TagField::Artist => self.artist = value,
            TagField::Genre => self.genre = value,
            TagField::Description => self.description = value,
            TagField::Date => self.date = value,
        }
    }

    pub fn audio_filename(&self) -> &str {
        self.audio_file
            .rsplit('/')
            .next()
            .unwrap_or(self.audio_file.as_str())
    }
}

/// Fields shared between the track record and the audio file's tag block.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagField {
    Title,
    Artist,
    Genre,
    Description,
    Date,
}

impl TagField {
    pub const ALL: [TagField; 5] = [
        TagField::Title,
        TagField::Artist,
        TagField::Genre,
        TagField::Description,
        TagField::Date,
    ];

    pub fn name(self) -> &'static str {
        match self {
            TagField::Title => "title",
            TagField::Artist => "artist",
            TagField::Genre => "genre",
            TagField::Description => "description",
            TagField::Date => "date",
        }
    }
}

impl fmt::Display for TagField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Deployment-wide choice of how slug uniqueness is scoped.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeMode {
    #[default]
    SingleUser,
    MultiUser,
}

impl ScopeMode {
    pub fn from_multi_user(multi_user: bool) -> Self {
        if multi_user {
            ScopeMode::MultiUser
        } else {
            ScopeMode::SingleUser
        }
    }

    pub fn is_multi_user(self) -> bool {
        matches!(self, ScopeMode::MultiUser)
    }

    /// Scope a track owned by `owner` is checked against. Single-user mode
    /// ignores the owner entirely.
    pub fn scope_for(self, owner: Option<&str>) -> SlugScope {
        match (self, owner) {
            (ScopeMode::MultiUser, Some(owner)) => SlugScope::Owner(owner.to_string()),
            (ScopeMode::MultiUser, None) => SlugScope::Unowned,
            (ScopeMode::SingleUser, _) => SlugScope::Global,
        }
    }
}

impl fmt::Display for ScopeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScopeMode::SingleUser => f.write_str("single-user"),
            ScopeMode::MultiUser => f.write_str("multi-user"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum SlugScope {
    Global,
    Owner(String),
    /// Tracks created without an owner while running multi-user (legacy rows).
    Unowned,
}

impl SlugScope {
    pub fn key(&self) -> &str {
        match self {
            SlugScope::Global => "*",
            SlugScope::Owner(owner) => owner.as_str(),
            SlugScope::Unowned => "",
        }
    }
}

/// Normalizes free text into a URL-safe slug: the label is transliterated to
/// ASCII, then lowercase letters and digits are joined by single hyphens.
/// Characters with no transliteration are dropped. May return an empty string.
pub fn slugify(label: &str) -> String {
    let ascii = deunicode_with_tofu(label, "");
    let mut out = String::with_capacity(ascii.len());
    let mut pending_sep = false;
    for ch in ascii.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_sep && !out.is_empty() {
                out.push('-');
            }
            pending_sep = false;
            out.push(ch.to_ascii_lowercase());
        } else {
            pending_sep = true;
        }
    }
    out
}

pub fn is_normalized_slug(value: &str) -> bool {
    !value.is_empty() && slugify(value) == value
}

/// Human label a slug is derived from: the title when present, otherwise the
/// audio file's base name without extension.
pub fn label_for(title: Option<&str>, audio_filename: &str) -> String {
    if let Some(title) = title.map(str::trim).filter(|t| !t.is_empty()) {
        return title.to_string();
    }
    file_stem(audio_filename)
}

pub fn file_stem(filename: &str) -> String {
    let base = filename
        .rsplit(|c| c == '/' || c == '\\')
        .next()
        .unwrap_or(filename);
    match base.rfind('.') {
        Some(idx) if idx > 0 => base[..idx].to_string(),
        _ => base.to_string(),
    }
}

pub fn clean_text(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else if trimmed.len() == value.len() {
        Some(value)
    } else {
        Some(trimmed.to_string())
    }
}

/// Splits a comma separated label list, dropping blanks and case-insensitive
/// duplicates while keeping the first spelling.
pub fn parse_tags(input: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for part in input.split(',') {
        let trimmed = part.trim();
        if trimmed.is_empty() {
            continue;
        }
        if out.iter().any(|tag| tag.eq_ignore_ascii_case(trimmed)) {
            continue;
        }
        out.push(trimmed.to_string());
    }
    out
}

pub fn relpath_from(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    Some(path_to_slash_string(rel))
}

/// Joins a slash separated relpath under `root`. Returns `None` for paths that
/// would escape the root.
pub fn join_relpath(root: &Path, relpath: &str) -> Option<PathBuf> {
    let mut out = PathBuf::from(root);
    for part in relpath.split('/') {
        if part.is_empty() || part == "." {
            continue;
        }
        let component = Path::new(part);
        match component.components().next() {
            Some(Component::Normal(_)) if component.components().count() == 1 => {
                out.push(part)
            }
            _ => return None,
        }
    }
    Some(out)
}

fn path_to_slash_string(path: &Path) -> String {
    let parts: Vec<String> = path
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect();
    parts.join("/")
}
