use std::path::Path;

use common::{TagField, Track};
use metadata::{read_fields, supported_fields, write_fields, FieldMap, MetadataError, WriteReport};
use tracing::{debug, warn};

/// Reads the recognized fields from a freshly written upload. Unreadable or
/// untagged files yield an empty map.
pub fn extract_metadata(path: &Path) -> FieldMap {
    match read_fields(path) {
        Ok(fields) => {
            if fields.is_empty() {
                debug!("No tag block in {:?}", path);
            }
            fields
        }
        Err(err) => {
            warn!("Could not read tags from {:?}: {}", path, err);
            FieldMap::new()
        }
    }
}

/// Copies the first non-blank value of every extracted field into `track`.
/// Fields the file does not carry are left untouched.
pub fn apply_extracted(track: &mut Track, fields: &FieldMap) {
    for (field, values) in fields {
        let first = values
            .iter()
            .map(|value| value.trim())
            .find(|value| !value.is_empty());
        if let Some(value) = first {
            track.set_field(*field, Some(value.to_string()));
        }
    }
}

/// The track's recognized fields as a tag update. Unset fields map to an
/// empty list so stale values are cleared from the file.
pub fn field_map_for(track: &Track) -> FieldMap {
    TagField::ALL
        .into_iter()
        .map(|field| {
            let values = track
                .field(field)
                .map(|value| vec![value.to_string()])
                .unwrap_or_default();
            (field, values)
        })
        .collect()
}

/// Writes the track's fields into the audio file's tag block. Only fields the
/// container's tag dialect supports are sent to the codec; the rest are
/// reported as skipped.
pub fn sync_metadata_to_file(track: &Track, path: &Path) -> Result<WriteReport, MetadataError> {
    let supported = supported_fields(path)?;
    let (writable, skipped): (FieldMap, FieldMap) = field_map_for(track)
        .into_iter()
        .partition(|(field, _)| supported.contains(field));

    let mut report = write_fields(path, &writable)?;
    report.skipped.extend(skipped.into_keys());
    debug!(
        "Synced tags for track {} into {:?}: {} written, {} cleared, {} skipped",
        track.id,
        path,
        report.written.len(),
        report.cleared.len(),
        report.skipped.len()
    );
    Ok(report)
}
