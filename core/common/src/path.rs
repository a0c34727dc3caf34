//! Remote path handling: name sanitization and percent-encoded joins.
//!
//! Every caller-supplied name (customer, order, file) passes through
//! [`sanitize`] before it becomes part of a [`RemotePath`]. Encoding happens
//! per segment, so a segment can never smuggle in an extra path level.

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Characters the remote drive rejects in item names.
pub const FORBIDDEN_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Replacement for forbidden characters.
pub const SUBSTITUTE_CHAR: char = '-';

/// Maximum length (in characters) of a sanitized name.
pub const MAX_NAME_LEN: usize = 200;

/// Everything except RFC 3986 unreserved characters gets encoded.
const SEGMENT_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Make a caller-supplied name safe to use as a remote item name.
///
/// Forbidden characters are replaced with [`SUBSTITUTE_CHAR`], surrounding
/// whitespace and trailing dots are stripped, and the result is capped at
/// [`MAX_NAME_LEN`] characters.
pub fn sanitize(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| {
            if FORBIDDEN_CHARS.contains(&c) {
                SUBSTITUTE_CHAR
            } else {
                c
            }
        })
        .collect();

    let truncated: String = trim_name(&replaced).chars().take(MAX_NAME_LEN).collect();
    // Truncation can expose a new trailing dot or space.
    trim_name(&truncated).to_string()
}

fn trim_name(name: &str) -> &str {
    name.trim()
        .trim_end_matches(|c: char| c == '.' || c.is_whitespace())
}

/// Percent-encode a single segment.
pub fn encode_segment(segment: &str) -> String {
    utf8_percent_encode(segment, SEGMENT_ENCODE_SET).to_string()
}

/// Encode each segment independently and join them with `/`.
///
/// Empty segments are skipped.
pub fn join<I, S>(segments: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    segments
        .into_iter()
        .filter(|s| !s.as_ref().is_empty())
        .map(|s| encode_segment(s.as_ref()))
        .collect::<Vec<_>>()
        .join("/")
}

/// A path on the remote drive, relative to the drive root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct RemotePath {
    segments: Vec<String>,
}

impl RemotePath {
    /// The drive root.
    pub fn root() -> Self {
        Self::default()
    }

    /// Build a path from a trusted, `/`-separated prefix (e.g. the configured
    /// root folder). Segments are kept verbatim apart from trimming.
    pub fn from_prefix(prefix: &str) -> Self {
        let segments = prefix
            .split('/')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();
        Self { segments }
    }

    /// Append an untrusted name, sanitizing it first.
    ///
    /// # Errors
    /// - The name is empty after sanitization
    pub fn child(&self, name: &str) -> crate::Result<Self> {
        let clean = sanitize(name);
        if clean.is_empty() {
            return Err(crate::Error::InvalidInput(format!(
                "Name {:?} is empty after sanitization",
                name
            )));
        }
        let mut segments = self.segments.clone();
        segments.push(clean);
        Ok(Self { segments })
    }

    /// Check if this is the drive root.
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Get the parent path, if any.
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            None
        } else {
            let mut segments = self.segments.clone();
            segments.pop();
            Some(Self { segments })
        }
    }

    /// Last segment.
    pub fn name(&self) -> Option<&str> {
        self.segments.last().map(|s| s.as_str())
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Percent-encoded form, without a leading slash.
    pub fn encoded(&self) -> String {
        join(&self.segments)
    }
}

impl fmt::Display for RemotePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.segments.join("/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_sanitize_replaces_forbidden_chars() {
        assert_eq!(sanitize("A/B:C*D"), "A-B-C-D");
        assert_eq!(sanitize(r#"a<b>c"d\e|f?g"#), "a-b-c-d-e-f-g");
    }

    #[test]
    fn test_sanitize_trims() {
        assert_eq!(sanitize("  Acme Corp.  "), "Acme Corp");
        assert_eq!(sanitize("report..."), "report");
        assert_eq!(sanitize("...hidden"), "...hidden");
        assert_eq!(sanitize("   "), "");
    }

    #[test]
    fn test_sanitize_truncates() {
        let long = "x".repeat(500);
        assert_eq!(sanitize(&long).chars().count(), MAX_NAME_LEN);

        // A dot landing on the cut boundary is trimmed as well.
        let mut dotted = "y".repeat(MAX_NAME_LEN - 1);
        dotted.push('.');
        dotted.push_str("tail");
        assert_eq!(sanitize(&dotted), "y".repeat(MAX_NAME_LEN - 1));
    }

    #[test]
    fn test_sanitize_multibyte() {
        let name = "ü".repeat(300);
        assert_eq!(sanitize(&name).chars().count(), MAX_NAME_LEN);
    }

    #[test]
    fn test_join_encodes_each_segment() {
        assert_eq!(join(["QC Photos", "Acme", "42.Acme"]), "QC%20Photos/Acme/42.Acme");
        assert_eq!(join(["a/b", "c"]), "a%2Fb/c");
        assert_eq!(join(["", "x", ""]), "x");
        assert_eq!(join(["Müller & Söhne"]), "M%C3%BCller%20%26%20S%C3%B6hne");
    }

    #[test]
    fn test_remote_path_prefix_and_child() {
        let root = RemotePath::from_prefix("/Shared Documents/QC/");
        assert_eq!(root.segments(), &["Shared Documents", "QC"]);

        let path = root.child("Acme/West").unwrap().child("7.Acme").unwrap();
        assert_eq!(path.to_string(), "/Shared Documents/QC/Acme-West/7.Acme");
        assert_eq!(path.encoded(), "Shared%20Documents/QC/Acme-West/7.Acme");
        assert_eq!(path.name(), Some("7.Acme"));
        assert_eq!(path.parent().unwrap().name(), Some("Acme-West"));
    }

    #[test]
    fn test_remote_path_rejects_empty_names() {
        assert!(RemotePath::root().child(" ... ").is_err());
        assert!(RemotePath::root().parent().is_none());
    }

    proptest! {
        #[test]
        fn prop_sanitized_names_are_safe(name in "\\PC{0,400}") {
            let clean = sanitize(&name);
            prop_assert!(clean.chars().count() <= MAX_NAME_LEN);
            prop_assert!(!clean.chars().any(|c| FORBIDDEN_CHARS.contains(&c)));
            prop_assert!(!clean.ends_with('.'));
            prop_assert_eq!(clean.trim(), clean.as_str());
        }

        #[test]
        fn prop_encoded_segment_has_no_separator(name in "\\PC{0,100}") {
            prop_assert!(!encode_segment(&name).contains('/'));
        }
    }
}
