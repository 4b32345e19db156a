//! Working-directory normalization and prefix matching.
//!
//! Hook payloads and spawn requests carry paths from different sources
//! (shell `$PWD`, the Claude CLI, the host UI), so they are compared only in
//! normalized form: `\` unified to `/`, repeated separators collapsed and
//! trailing separators stripped.

use std::path::Path;

/// Normalizes a path string for comparison.
pub fn normalize_path(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut prev_sep = false;
    for ch in raw.trim().chars() {
        let ch = if ch == '\\' { '/' } else { ch };
        if ch == '/' {
            if prev_sep {
                continue;
            }
            prev_sep = true;
        } else {
            prev_sep = false;
        }
        out.push(ch);
    }
    while out.len() > 1 && out.ends_with('/') {
        out.pop();
    }
    out
}

/// Normalizes a filesystem path (lossy for non-UTF-8 components).
pub fn normalize(path: &Path) -> String {
    normalize_path(&path.to_string_lossy())
}

/// Returns true if `path` is `root` or lies beneath it.
///
/// Both arguments must already be normalized. `/home/u/p` does not contain
/// `/home/u/proj`: a separator must follow the root.
pub fn is_within(path: &str, root: &str) -> bool {
    if root.is_empty() {
        return false;
    }
    if root == "/" {
        return path.starts_with('/');
    }
    match path.strip_prefix(root) {
        Some("") => true,
        Some(rest) => rest.starts_with('/'),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_unifies_separators() {
        assert_eq!(normalize_path("C:\\Users\\u\\proj\\"), "C:/Users/u/proj");
        assert_eq!(normalize_path("/home//u///p/"), "/home/u/p");
        assert_eq!(normalize_path("/"), "/");
        assert_eq!(normalize_path("  /tmp/x  "), "/tmp/x");
    }

    #[test]
    fn test_within_requires_separator_boundary() {
        assert!(is_within("/home/u/p", "/home/u/p"));
        assert!(is_within("/home/u/p/sub/dir", "/home/u/p"));
        assert!(!is_within("/home/u/proj", "/home/u/p"));
        assert!(!is_within("/home/u", "/home/u/p"));
    }

    #[test]
    fn test_within_root_and_empty() {
        assert!(is_within("/anything", "/"));
        assert!(!is_within("/anything", ""));
    }
}
