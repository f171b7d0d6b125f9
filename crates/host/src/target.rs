//! Request-target decomposition against a configured mount root.
//!
//! A raw request target is split into three derived strings: path-base (the
//! mount root, or empty when the root is `/`), path (everything after the
//! root, percent-decoded exactly once) and query-string (everything after the
//! first literal `?`, never decoded). Decomposition also decides validity: a
//! target outside the mount root is rejected before any environment is built.
//!
//! The percent-decode step intentionally runs once and only once. An escaped
//! slash (`%2f`) inside the path is expanded by that step and can move what
//! looks like a segment boundary; this matches legacy behavior and must not
//! be "fixed".

use std::fmt;

/// The path prefix under which the host claims requests.
///
/// Always stored normalized: starts with `/` and never ends with `/` unless it
/// is exactly `/`. Root matching during decomposition is ASCII
/// case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountRoot(String);

impl MountRoot {
    pub fn new(raw: &str) -> Self {
        let trimmed = raw.trim();
        let mut root = String::with_capacity(trimmed.len() + 1);
        if !trimmed.starts_with('/') {
            root.push('/');
        }
        root.push_str(trimmed);
        while root.len() > 1 && root.ends_with('/') {
            root.pop();
        }
        Self(root)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }
}

impl Default for MountRoot {
    fn default() -> Self {
        Self("/".to_owned())
    }
}

impl fmt::Display for MountRoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MountRoot {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

/// The three derived substrings of a matched request target.
///
/// Computed once per request from the raw target and the current mount root;
/// immutable thereafter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestTarget {
    path_base: String,
    path: String,
    query_string: String,
}

impl RequestTarget {
    /// Decomposes `raw_target` against `root`, or returns `None` when the
    /// target falls outside the mount root.
    ///
    /// The split point is the first literal `?` byte; a percent-encoded `%3F`
    /// is not a split point and stays in the path through the decode step.
    /// The query string is returned exactly as sliced and may itself contain
    /// further `?` characters.
    pub fn decompose(raw_target: &str, root: &MountRoot) -> Option<Self> {
        let (candidate, query_string) = match raw_target.find('?') {
            Some(at) => (&raw_target[..at], &raw_target[at + 1..]),
            None => (raw_target, ""),
        };

        let decoded = percent_decode_once(candidate);
        let flattened = flatten_path(&decoded);

        if root.is_root() {
            return Some(Self {
                path_base: String::new(),
                path: flattened,
                query_string: query_string.to_owned(),
            });
        }

        let prefix = root.as_str().as_bytes();
        let path_bytes = flattened.as_bytes();
        let matched = path_bytes.len() >= prefix.len()
            && path_bytes[..prefix.len()].eq_ignore_ascii_case(prefix)
            && (path_bytes.len() == prefix.len() || path_bytes[prefix.len()] == b'/');
        if !matched {
            return None;
        }

        Some(Self {
            path_base: root.as_str().to_owned(),
            path: flattened[prefix.len()..].to_owned(),
            query_string: query_string.to_owned(),
        })
    }

    /// The mount root portion, or `""` when the root is `/`.
    pub fn path_base(&self) -> &str {
        &self.path_base
    }

    /// The remainder after the root, percent-decoded exactly once.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Everything after the first literal `?`, never decoded.
    pub fn query_string(&self) -> &str {
        &self.query_string
    }
}

/// Percent-decodes `raw` exactly once, never iteratively.
///
/// Invalid escape sequences are kept verbatim; decoded bytes that do not form
/// valid UTF-8 are replaced.
pub fn percent_decode_once(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut at = 0;

    while at < bytes.len() {
        if bytes[at] == b'%' && at + 2 < bytes.len() {
            if let (Some(hi), Some(lo)) = (hex_value(bytes[at + 1]), hex_value(bytes[at + 2])) {
                out.push(hi << 4 | lo);
                at += 3;
                continue;
            }
        }
        out.push(bytes[at]);
        at += 1;
    }

    String::from_utf8_lossy(&out).into_owned()
}

fn hex_value(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}

/// Normalizes backslashes to slashes and resolves `.` / `..` segments without
/// letting traversal escape above the path root.
fn flatten_path(decoded: &str) -> String {
    let normalized = if decoded.contains('\\') { decoded.replace('\\', "/") } else { decoded.to_owned() };

    let needs_dot_resolution = normalized.split('/').any(|segment| segment == "." || segment == "..");
    if !needs_dot_resolution {
        return normalized;
    }

    let trailing_slash = normalized.ends_with("/.") || normalized.ends_with("/..") || normalized.ends_with('/');
    let mut segments: Vec<&str> = Vec::new();
    for segment in normalized.split('/') {
        match segment {
            "." => {}
            ".." => {
                // never pop the leading empty segment that anchors the path
                if segments.len() > 1 {
                    segments.pop();
                }
            }
            other => segments.push(other),
        }
    }

    let mut flattened = segments.join("/");
    if flattened.is_empty() {
        flattened.push('/');
    }
    if trailing_slash && !flattened.ends_with('/') {
        flattened.push('/');
    }
    flattened
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_normalization() {
        assert_eq!(MountRoot::new("/").as_str(), "/");
        assert_eq!(MountRoot::new("").as_str(), "/");
        assert_eq!(MountRoot::new("app").as_str(), "/app");
        assert_eq!(MountRoot::new("/app/").as_str(), "/app");
        assert_eq!(MountRoot::new("/app//").as_str(), "/app");
        assert!(MountRoot::new("/").is_root());
        assert!(!MountRoot::new("/app").is_root());
    }

    #[test]
    fn everything_is_valid_under_the_bare_root() {
        let root = MountRoot::new("/");
        let target = RequestTarget::decompose("/anything/at/all", &root).unwrap();

        assert_eq!(target.path_base(), "");
        assert_eq!(target.path(), "/anything/at/all");
        assert_eq!(target.query_string(), "");
    }

    #[test]
    fn extra_character_after_root_is_not_a_match() {
        let root = MountRoot::new("/a");
        assert!(RequestTarget::decompose("/ab", &root).is_none());
        assert!(RequestTarget::decompose("/a/", &root).is_some());
        assert!(RequestTarget::decompose("/a", &root).is_some());
    }

    #[test]
    fn root_match_is_case_insensitive() {
        let root = MountRoot::new("/App");
        let target = RequestTarget::decompose("/app/index", &root).unwrap();

        assert_eq!(target.path_base(), "/App");
        assert_eq!(target.path(), "/index");
    }

    #[test]
    fn percent_encoded_root_still_matches() {
        let root = MountRoot::new("/a");
        let target = RequestTarget::decompose("/%61", &root).unwrap();

        assert_eq!(target.path_base(), "/a");
        assert_eq!(target.path(), "");
    }

    #[test]
    fn query_splits_on_first_literal_question_mark_only() {
        let root = MountRoot::new("/Root");
        let target = RequestTarget::decompose("/Root/a%3Fid=1?id=2?id=3", &root).unwrap();

        assert_eq!(target.path_base(), "/Root");
        assert_eq!(target.path(), "/a?id=1");
        assert_eq!(target.query_string(), "id=2?id=3");
    }

    #[test]
    fn query_string_is_never_decoded() {
        let root = MountRoot::new("/");
        let target = RequestTarget::decompose("/p?name=%20a", &root).unwrap();

        assert_eq!(target.query_string(), "name=%20a");
    }

    #[test]
    fn path_decodes_exactly_once() {
        assert_eq!(percent_decode_once("/%2561"), "/%61");
        assert_eq!(percent_decode_once("/a%2fb"), "/a/b");
        assert_eq!(percent_decode_once("/%zz"), "/%zz");
        assert_eq!(percent_decode_once("/%2"), "/%2");
    }

    #[test]
    fn escaped_slash_can_move_a_segment_boundary() {
        let root = MountRoot::new("/a");
        let target = RequestTarget::decompose("/a%2fb", &root).unwrap();

        assert_eq!(target.path(), "/b");
    }

    #[test]
    fn backslashes_flatten_to_slashes() {
        let root = MountRoot::new("/");
        let target = RequestTarget::decompose("/a\\b", &root).unwrap();

        assert_eq!(target.path(), "/a/b");
    }

    #[test]
    fn traversal_segments_are_resolved_without_escaping() {
        let root = MountRoot::new("/");
        assert_eq!(RequestTarget::decompose("/a/../b", &root).unwrap().path(), "/b");
        assert_eq!(RequestTarget::decompose("/a/./b", &root).unwrap().path(), "/a/b");
        assert_eq!(RequestTarget::decompose("/../../b", &root).unwrap().path(), "/b");
    }

    #[test]
    fn traversal_cannot_exit_the_mount_root() {
        let root = MountRoot::new("/app");
        assert!(RequestTarget::decompose("/app/../other", &root).is_none());
    }
}
