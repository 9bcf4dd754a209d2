use crate::model::{ImageTimestamp, PhotoFormat, TimestampSource};
use std::path::Path;

/// Determine the capture timestamp for one file, per `spec.md` §4.3: EXIF
/// `DateTimeOriginal` (with `SubSecTimeOriginal` if present) first, falling
/// back to filesystem mtime. Never panics — a decoder panic or unreadable
/// file yields a filesystem-sourced (or `None`) timestamp rather than
/// failing discovery.
pub fn extract_timestamp(path: &Path, format: PhotoFormat) -> ImageTimestamp {
    let exif = match std::panic::catch_unwind(|| extract_exif_datetime(path, format)) {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!("panic while reading EXIF timestamp for {:?}", path);
            None
        }
    };

    if let Some((timestamp, has_subsecond)) = exif {
        return ImageTimestamp {
            path: path.to_path_buf(),
            timestamp: Some(timestamp),
            has_subsecond_precision: has_subsecond,
            source: TimestampSource::Exif,
        };
    }

    let timestamp = filesystem_mtime(path);
    ImageTimestamp {
        path: path.to_path_buf(),
        timestamp,
        has_subsecond_precision: false,
        source: TimestampSource::Filesystem,
    }
}

fn extract_exif_datetime(
    path: &Path,
    format: PhotoFormat,
) -> Option<(chrono::DateTime<chrono::Utc>, bool)> {
    if format.is_raw() {
        return extract_raw_datetime(path);
    }
    let file = std::fs::File::open(path).ok()?;
    let mut reader = std::io::BufReader::new(file);
    let exif = exif::Reader::new().read_from_container(&mut reader).ok()?;
    let field = exif.get_field(exif::Tag::DateTimeOriginal, exif::In::PRIMARY)?;
    let raw = ascii_value(&field.value)?;
    let base = parse_exif_datetime(&raw)?;
    let subsec = exif
        .get_field(exif::Tag::SubSecTimeOriginal, exif::In::PRIMARY)
        .and_then(|f| ascii_value(&f.value))
        .and_then(|s| s.trim_end_matches('\0').parse::<u32>().ok());
    match subsec {
        Some(ms) if ms > 0 => {
            let nanos = ms.to_string();
            let padded = format!("{:0<9}", nanos);
            let nanos: u32 = padded.parse().unwrap_or(0);
            Some((base + chrono::Duration::nanoseconds(nanos as i64), true))
        }
        _ => Some((base, false)),
    }
}

fn extract_raw_datetime(path: &Path) -> Option<(chrono::DateTime<chrono::Utc>, bool)> {
    let raw = rawler::decode_file(path).ok()?;
    let time_str = raw.metadata.exif.date_time_original.as_ref()?;
    parse_exif_datetime(time_str).map(|t| (t, false))
}

fn ascii_value(value: &exif::Value) -> Option<String> {
    match value {
        exif::Value::Ascii(vecs) => vecs
            .first()
            .and_then(|v| std::str::from_utf8(v).ok())
            .map(|s| s.to_string()),
        _ => None,
    }
}

/// Parse EXIF's `"YYYY:MM:DD HH:MM:SS"` datetime format.
pub fn parse_exif_datetime(s: &str) -> Option<chrono::DateTime<chrono::Utc>> {
    use chrono::{NaiveDateTime, TimeZone};
    if s.len() < 19 {
        return None;
    }
    let date = s[..10].replace(':', "-");
    let normalized = format!("{} {}", date, &s[11..19]);
    let ndt = NaiveDateTime::parse_from_str(&normalized, "%Y-%m-%d %H:%M:%S").ok()?;
    Some(chrono::Utc.from_utc_datetime(&ndt))
}

fn filesystem_mtime(path: &Path) -> Option<chrono::DateTime<chrono::Utc>> {
    let meta = std::fs::metadata(path).ok()?;
    let modified = meta.modified().ok()?;
    Some(chrono::DateTime::<chrono::Utc>::from(modified))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_exif_datetime_valid() {
        let dt = parse_exif_datetime("2024:03:15 12:30:45").unwrap();
        assert_eq!(dt.to_string(), "2024-03-15 12:30:45 UTC");
    }

    #[test]
    fn test_parse_exif_datetime_too_short() {
        assert!(parse_exif_datetime("2024:03:15").is_none());
    }

    #[test]
    fn test_extract_timestamp_falls_back_to_filesystem() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("plain.jpg");
        std::fs::write(&path, b"not a real jpeg").unwrap();
        let ts = extract_timestamp(&path, PhotoFormat::Jpeg);
        assert_eq!(ts.source, TimestampSource::Filesystem);
        assert!(ts.timestamp.is_some());
    }

    #[test]
    fn test_extract_timestamp_never_panics_on_garbage_raw() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("broken.cr2");
        std::fs::write(&path, b"\x00\x01garbage").unwrap();
        let ts = extract_timestamp(&path, PhotoFormat::Raw);
        assert_eq!(ts.source, TimestampSource::Filesystem);
    }
}
