//! XMP sidecar writer (`spec.md` §4.5/§6). Used always for RAW inputs and as
//! the `exiftool` failure fallback for raster formats. Hand-built RDF/XML:
//! the dependency pack has no XML crate and the shape is small and fixed.

use super::{merge_description, merge_keywords};
use crate::config::KeywordMode;
use std::path::{Path, PathBuf};

/// `<original>.xmp`, including the original extension (`spec.md` §6).
pub fn sidecar_path(original: &Path) -> PathBuf {
    let mut name = original.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".xmp");
    original.with_file_name(name)
}

/// Creates or updates `<original>.xmp` (`spec.md` §4.5: "create/update an
/// XMP sidecar"). When a sidecar already exists, its keywords/description are
/// read back and merged with the new values per `keywords_mode`/
/// `description_mode`, exactly as the `exiftool` raster path merges against
/// the file's existing tags — append mode must never regress to clobbering
/// a prior sidecar's keywords.
pub fn write_sidecar(
    original: &Path,
    keywords: &[String],
    description: Option<&str>,
    keywords_mode: KeywordMode,
    description_mode: KeywordMode,
) -> std::io::Result<()> {
    let path = sidecar_path(original);
    let (existing_keywords, existing_description) = match std::fs::read_to_string(&path) {
        Ok(contents) => parse_sidecar(&contents),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => (Vec::new(), None),
        Err(e) => return Err(e),
    };

    let merged_keywords = merge_keywords(&existing_keywords, keywords, keywords_mode);
    let merged_description = merge_description(existing_description.as_deref(), description, description_mode);

    let xml = render(&merged_keywords, merged_description.as_deref());
    std::fs::write(path, xml)
}

fn render(keywords: &[String], description: Option<&str>) -> String {
    let subject_items: String = keywords
        .iter()
        .map(|k| format!("      <rdf:li>{}</rdf:li>\n", escape(k)))
        .collect();

    let description_block = match description {
        Some(d) if !d.is_empty() => format!(
            "    <dc:description>\n      <rdf:Alt>\n        <rdf:li xml:lang=\"x-default\">{}</rdf:li>\n      </rdf:Alt>\n    </dc:description>\n",
            escape(d)
        ),
        _ => String::new(),
    };

    format!(
        "<?xpacket begin=\"﻿\" id=\"W5M0MpCehiHzreSzNTczkc9d\"?>\n\
<x:xmpmeta xmlns:x=\"adobe:ns:meta/\">\n\
  <rdf:RDF xmlns:rdf=\"http://www.w3.org/1999/02/22-rdf-syntax-ns#\">\n\
    <rdf:Description rdf:about=\"\" xmlns:dc=\"http://purl.org/dc/elements/1.1/\">\n\
    <dc:subject>\n\
      <rdf:Seq>\n\
{subject_items}\
      </rdf:Seq>\n\
    </dc:subject>\n\
{description_block}\
    </rdf:Description>\n\
  </rdf:RDF>\n\
</x:xmpmeta>\n\
<?xpacket end=\"w\"?>\n"
    )
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

fn unescape(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Pulls keywords/description back out of a sidecar previously written by
/// `render`. Subject entries are plain `<rdf:li>...</rdf:li>` (no
/// attributes), which is what distinguishes them from the description's
/// `<rdf:li xml:lang="x-default">...</rdf:li>` — matching `render`'s exact
/// output shape rather than a general RDF/XML parse.
fn parse_sidecar(contents: &str) -> (Vec<String>, Option<String>) {
    let keywords = extract_all(contents, "<rdf:li>", "</rdf:li>")
        .into_iter()
        .map(|s| unescape(&s))
        .collect();

    let description = extract_between(contents, "<dc:description>", "</dc:description>")
        .and_then(|block| extract_between(&block, "xml:lang=\"x-default\">", "</rdf:li>"))
        .map(|s| unescape(&s));

    (keywords, description)
}

fn extract_between(haystack: &str, open: &str, close: &str) -> Option<String> {
    let start = haystack.find(open)? + open.len();
    let end = haystack[start..].find(close)?;
    Some(haystack[start..start + end].to_string())
}

fn extract_all(haystack: &str, open: &str, close: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut rest = haystack;
    while let Some(start) = rest.find(open) {
        let after_open = &rest[start + open.len()..];
        match after_open.find(close) {
            Some(end) => {
                out.push(after_open[..end].to_string());
                rest = &after_open[end + close.len()..];
            }
            None => break,
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sidecar_path_appends_xmp_keeping_original_extension() {
        let path = Path::new("/photos/IMG_0001.CR2");
        assert_eq!(sidecar_path(path), PathBuf::from("/photos/IMG_0001.CR2.xmp"));
    }

    #[test]
    fn test_write_sidecar_round_trip_contains_keywords_and_description() {
        let tmp = tempfile::tempdir().unwrap();
        let original = tmp.path().join("photo.jpg");
        std::fs::write(&original, b"fake").unwrap();
        write_sidecar(
            &original,
            &["41".to_string(), "Red Bull".to_string()],
            Some("pro driver"),
            KeywordMode::Append,
            KeywordMode::Append,
        )
        .unwrap();
        let contents = std::fs::read_to_string(sidecar_path(&original)).unwrap();
        assert!(contents.contains("41"));
        assert!(contents.contains("Red Bull"));
        assert!(contents.contains("pro driver"));
    }

    #[test]
    fn test_write_sidecar_escapes_xml_special_characters() {
        let tmp = tempfile::tempdir().unwrap();
        let original = tmp.path().join("photo.jpg");
        std::fs::write(&original, b"fake").unwrap();
        write_sidecar(
            &original,
            &["Team <A&B>".to_string()],
            None,
            KeywordMode::Append,
            KeywordMode::Append,
        )
        .unwrap();
        let contents = std::fs::read_to_string(sidecar_path(&original)).unwrap();
        assert!(contents.contains("&lt;A&amp;B&gt;"));
    }

    #[test]
    fn test_same_input_produces_byte_identical_sidecars() {
        let tmp = tempfile::tempdir().unwrap();
        let original = tmp.path().join("photo.jpg");
        std::fs::write(&original, b"fake").unwrap();
        write_sidecar(
            &original,
            &["41".to_string()],
            Some("desc"),
            KeywordMode::Append,
            KeywordMode::Append,
        )
        .unwrap();
        let first = std::fs::read(sidecar_path(&original)).unwrap();
        write_sidecar(
            &original,
            &["41".to_string()],
            Some("desc"),
            KeywordMode::Append,
            KeywordMode::Append,
        )
        .unwrap();
        let second = std::fs::read(sidecar_path(&original)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_write_sidecar_append_mode_merges_with_prior_sidecar_case_insensitively() {
        let tmp = tempfile::tempdir().unwrap();
        let original = tmp.path().join("photo.nef");
        std::fs::write(&original, b"fake raw").unwrap();

        write_sidecar(
            &original,
            &["41".to_string()],
            Some("pro driver"),
            KeywordMode::Append,
            KeywordMode::Append,
        )
        .unwrap();
        write_sidecar(
            &original,
            &["41".to_string(), "Rossi".to_string()],
            Some("ace"),
            KeywordMode::Append,
            KeywordMode::Append,
        )
        .unwrap();

        let contents = std::fs::read_to_string(sidecar_path(&original)).unwrap();
        let (keywords, description) = parse_sidecar(&contents);
        assert_eq!(keywords, vec!["41".to_string(), "Rossi".to_string()]);
        assert_eq!(description.as_deref(), Some("pro driver | ace"));
    }

    #[test]
    fn test_write_sidecar_overwrite_mode_replaces_prior_sidecar() {
        let tmp = tempfile::tempdir().unwrap();
        let original = tmp.path().join("photo.nef");
        std::fs::write(&original, b"fake raw").unwrap();

        write_sidecar(
            &original,
            &["41".to_string(), "Rossi".to_string()],
            Some("pro driver"),
            KeywordMode::Append,
            KeywordMode::Append,
        )
        .unwrap();
        write_sidecar(
            &original,
            &["7".to_string()],
            Some("ace"),
            KeywordMode::Overwrite,
            KeywordMode::Overwrite,
        )
        .unwrap();

        let contents = std::fs::read_to_string(sidecar_path(&original)).unwrap();
        let (keywords, description) = parse_sidecar(&contents);
        assert_eq!(keywords, vec!["7".to_string()]);
        assert_eq!(description.as_deref(), Some("ace"));
    }
}
