/// Inclusive byte span of a stored file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn length(&self) -> u64 {
        self.end - self.start + 1
    }

    pub fn content_range(&self, size: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, size)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeError {
    /// Malformed or multi-part; the whole file is served instead.
    Invalid,
    Unsatisfiable,
}

/// Parses a single `bytes=` range against a file of `size` bytes. An end past
/// the file is clamped to the last byte.
pub fn parse_range_header(value: &str, size: u64) -> Result<ByteRange, RangeError> {
    let spec = value
        .trim()
        .strip_prefix("bytes=")
        .ok_or(RangeError::Invalid)?;
    if spec.contains(',') {
        return Err(RangeError::Invalid);
    }
    let (first, last) = spec.split_once('-').ok_or(RangeError::Invalid)?;
    let (first, last) = (first.trim(), last.trim());

    if first.is_empty() {
        let suffix: u64 = last.parse().map_err(|_| RangeError::Invalid)?;
        if suffix == 0 || size == 0 {
            return Err(RangeError::Unsatisfiable);
        }
        return Ok(ByteRange {
            start: size.saturating_sub(suffix),
            end: size - 1,
        });
    }

    let start: u64 = first.parse().map_err(|_| RangeError::Invalid)?;
    let end = if last.is_empty() {
        None
    } else {
        let end: u64 = last.parse().map_err(|_| RangeError::Invalid)?;
        if end < start {
            return Err(RangeError::Invalid);
        }
        Some(end)
    };
    if start >= size {
        return Err(RangeError::Unsatisfiable);
    }

    Ok(ByteRange {
        start,
        end: end.map_or(size - 1, |end| end.min(size - 1)),
    })
}

#[cfg(test)]
mod tests {
    use super::{parse_range_header, ByteRange, RangeError};

    #[test]
    fn seek_from_offset_to_end() {
        let range = parse_range_header("bytes=1024-", 4096).unwrap();
        assert_eq!(range, ByteRange { start: 1024, end: 4095 });
        assert_eq!(range.length(), 3072);
        assert_eq!(range.content_range(4096), "bytes 1024-4095/4096");
    }

    #[test]
    fn closed_range_and_clamped_end() {
        assert_eq!(
            parse_range_header("bytes=0-1", 100).unwrap(),
            ByteRange { start: 0, end: 1 }
        );
        assert_eq!(
            parse_range_header("bytes=90-500", 100).unwrap(),
            ByteRange { start: 90, end: 99 }
        );
    }

    #[test]
    fn suffix_range_covers_tail() {
        assert_eq!(
            parse_range_header("bytes=-10", 100).unwrap(),
            ByteRange { start: 90, end: 99 }
        );
        assert_eq!(
            parse_range_header("bytes=-500", 100).unwrap(),
            ByteRange { start: 0, end: 99 }
        );
    }

    #[test]
    fn malformed_ranges_are_invalid() {
        for value in ["items=0-1", "bytes=0-1,4-5", "bytes=9-3", "bytes=a-", "bytes=5"] {
            assert_eq!(parse_range_header(value, 100), Err(RangeError::Invalid), "{}", value);
        }
    }

    #[test]
    fn ranges_past_the_file_are_unsatisfiable() {
        assert_eq!(parse_range_header("bytes=100-", 100), Err(RangeError::Unsatisfiable));
        assert_eq!(parse_range_header("bytes=0-", 0), Err(RangeError::Unsatisfiable));
        assert_eq!(parse_range_header("bytes=-0", 100), Err(RangeError::Unsatisfiable));
    }
}
