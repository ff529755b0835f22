use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use common::TagField;
use lofty::config::WriteOptions;
use lofty::error::LoftyError;
use lofty::prelude::{ItemKey, TagExt, TaggedFileExt};
use lofty::probe::Probe;
use lofty::tag::{Tag, TagType};

/// Recognized tag fields and their values, as found in (or destined for) a
/// file's tag block. An empty value list means "clear this field".
pub type FieldMap = BTreeMap<TagField, Vec<String>>;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WriteReport {
    pub written: Vec<TagField>,
    pub cleared: Vec<TagField>,
    pub skipped: Vec<TagField>,
}

#[derive(Debug)]
pub enum MetadataError {
    Io(std::io::Error),
    Lofty(LoftyError),
}

impl std::fmt::Display for MetadataError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetadataError::Io(err) => write!(f, "io error: {}", err),
            MetadataError::Lofty(err) => write!(f, "tag error: {}", err),
        }
    }
}

impl std::error::Error for MetadataError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MetadataError::Io(err) => Some(err),
            MetadataError::Lofty(err) => Some(err),
        }
    }
}

impl From<std::io::Error> for MetadataError {
    fn from(err: std::io::Error) -> Self {
        MetadataError::Io(err)
    }
}

impl From<LoftyError> for MetadataError {
    fn from(err: LoftyError) -> Self {
        MetadataError::Lofty(err)
    }
}

fn item_key(field: TagField) -> ItemKey {
    match field {
        TagField::Title => ItemKey::TrackTitle,
        TagField::Artist => ItemKey::TrackArtist,
        TagField::Genre => ItemKey::Genre,
        TagField::Description => ItemKey::Description,
        TagField::Date => ItemKey::RecordingDate,
    }
}

/// Reads the recognized fields from the file's primary tag (or its first tag
/// when the primary one is absent). A container without any tag block yields
/// an empty map.
pub fn read_fields(path: &Path) -> Result<FieldMap, MetadataError> {
    let tagged_file = Probe::open(path)?.guess_file_type()?.read()?;
    let mut fields = FieldMap::new();

    let tag = match tagged_file.primary_tag().or_else(|| tagged_file.first_tag()) {
        Some(tag) => tag,
        None => return Ok(fields),
    };

    for field in TagField::ALL {
        let values: Vec<String> = tag
            .get_strings(&item_key(field))
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
            .collect();
        if !values.is_empty() {
            fields.insert(field, values);
        }
    }

    Ok(fields)
}

/// Fields the given tag dialect has a slot for.
pub fn supported_fields_for(tag_type: TagType) -> BTreeSet<TagField> {
    TagField::ALL
        .into_iter()
        .filter(|field| item_key(*field).map_key(tag_type, false).is_some())
        .collect()
}

/// Fields that can be written into this file's primary tag.
pub fn supported_fields(path: &Path) -> Result<BTreeSet<TagField>, MetadataError> {
    let tagged_file = Probe::open(path)?.guess_file_type()?.read()?;
    Ok(supported_fields_for(tagged_file.primary_tag_type()))
}

/// Writes `fields` into the file's primary tag, creating the tag when the file
/// has none. Fields the container's tag dialect cannot hold are skipped.
pub fn write_fields(path: &Path, fields: &FieldMap) -> Result<WriteReport, MetadataError> {
    let mut tagged_file = Probe::open(path)?.guess_file_type()?.read()?;
    let tag_type = tagged_file.primary_tag_type();
    let supported = supported_fields_for(tag_type);

    let mut tag = match tagged_file.tag(tag_type) {
        Some(existing) => existing.clone(),
        None => Tag::new(tag_type),
    };

    let mut report = WriteReport::default();
    for (field, values) in fields {
        if !supported.contains(field) {
            report.skipped.push(*field);
            continue;
        }
        let key = item_key(*field);
        let value = values
            .iter()
            .map(|value| value.trim())
            .find(|value| !value.is_empty());
        match value {
            Some(value) => {
                if tag.insert_text(key, value.to_string()) {
                    report.written.push(*field);
                } else {
                    report.skipped.push(*field);
                }
            }
            None => {
                tag.remove_key(&key);
                report.cleared.push(*field);
            }
        }
    }

    tag.save_to_path(path, WriteOptions::default())?;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_silent_wav(path: &Path) {
        let sample_rate: u32 = 8000;
        let channels: u16 = 1;
        let bits: u16 = 16;
        let data_len: u32 = 1600;
        let block_align = channels * bits / 8;
        let byte_rate = sample_rate * u32::from(block_align);

        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"RIFF");
        bytes.extend_from_slice(&(36 + data_len).to_le_bytes());
        bytes.extend_from_slice(b"WAVE");
        bytes.extend_from_slice(b"fmt ");
        bytes.extend_from_slice(&16u32.to_le_bytes());
        bytes.extend_from_slice(&1u16.to_le_bytes());
        bytes.extend_from_slice(&channels.to_le_bytes());
        bytes.extend_from_slice(&sample_rate.to_le_bytes());
        bytes.extend_from_slice(&byte_rate.to_le_bytes());
        bytes.extend_from_slice(&block_align.to_le_bytes());
        bytes.extend_from_slice(&bits.to_le_bytes());
        bytes.extend_from_slice(b"data");
        bytes.extend_from_slice(&data_len.to_le_bytes());
        bytes.resize(bytes.len() + data_len as usize, 0);
        std::fs::write(path, bytes).unwrap();
    }

    fn fields(pairs: &[(TagField, &str)]) -> FieldMap {
        pairs
            .iter()
            .map(|(field, value)| (*field, vec![value.to_string()]))
            .collect()
    }

    #[test]
    fn untagged_wav_has_no_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audio_file.wav");
        write_silent_wav(&path);

        let read = read_fields(&path).unwrap();
        assert!(read.is_empty());
    }

    #[test]
    fn written_fields_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audio_file.wav");
        write_silent_wav(&path);

        let report = write_fields(
            &path,
            &fields(&[
                (TagField::Title, "audiotracks test file"),
                (TagField::Artist, "Alex"),
                (TagField::Genre, "Test Data"),
            ]),
        )
        .unwrap();
        assert!(report.written.contains(&TagField::Title));

        let read = read_fields(&path).unwrap();
        assert_eq!(
            read.get(&TagField::Title),
            Some(&vec!["audiotracks test file".to_string()])
        );
        assert_eq!(read.get(&TagField::Artist), Some(&vec!["Alex".to_string()]));
        assert_eq!(read.get(&TagField::Genre), Some(&vec!["Test Data".to_string()]));
    }

    #[test]
    fn empty_value_clears_field() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clear.wav");
        write_silent_wav(&path);
        write_fields(
            &path,
            &fields(&[(TagField::Title, "Old"), (TagField::Genre, "Keep")]),
        )
        .unwrap();

        let mut update = FieldMap::new();
        update.insert(TagField::Title, Vec::new());
        let report = write_fields(&path, &update).unwrap();
        assert_eq!(report.cleared, vec![TagField::Title]);

        let read = read_fields(&path).unwrap();
        assert!(read.get(&TagField::Title).is_none());
        assert_eq!(read.get(&TagField::Genre), Some(&vec!["Keep".to_string()]));
    }

    #[test]
    fn unsupported_fields_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("skip.wav");
        write_silent_wav(&path);

        let supported = supported_fields(&path).unwrap();
        assert!(supported.contains(&TagField::Title));

        let all: FieldMap = TagField::ALL
            .into_iter()
            .map(|field| (field, vec!["x".to_string()]))
            .collect();
        let report = write_fields(&path, &all).unwrap();
        for field in &report.skipped {
            assert!(!supported.contains(field));
        }
        assert_eq!(report.written.len() + report.skipped.len(), TagField::ALL.len());
    }

    #[test]
    fn vorbis_comments_hold_core_fields() {
        let supported = supported_fields_for(TagType::VorbisComments);
        assert!(supported.contains(&TagField::Title));
        assert!(supported.contains(&TagField::Genre));
        assert!(supported.contains(&TagField::Artist));
    }

    #[test]
    fn text_file_is_not_audio() {
        let mut file = tempfile::Builder::new().suffix(".txt").tempfile().unwrap();
        writeln!(file, "This is just some text, not music.").unwrap();
        assert!(read_fields(file.path()).is_err());
    }
}
