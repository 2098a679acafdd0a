//! Path-traversal defenses for the static gateway.
//!
//! Rejection happens at two layers. The textual filter catches `..` in the
//! raw, once-decoded, and twice-decoded request path, so single- and
//! double-encoded `%2e` variants fail in any combination. The
//! canonicalization check then resolves the filesystem path and verifies it
//! is prefix-bounded by the resolved document root; a target that does not
//! exist yet is checked through its parent directory.

use std::path::{Path, PathBuf};

/// Decode `%XX` escapes once. Malformed escapes pass through verbatim.
fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = &input[i + 1..i + 3];
            if let Ok(value) = u8::from_str_radix(hex, 16) {
                out.push(value);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Textual filter: true when the request path contains `..` literally or
/// under one or two rounds of URL decoding.
#[must_use]
pub fn has_traversal_tokens(path: &str) -> bool {
    let once = percent_decode(path);
    let twice = percent_decode(&once);
    path.contains("..") || once.contains("..") || twice.contains("..")
}

/// Resolve the request path (already percent-decoded once for lookup)
/// against the document root.
#[must_use]
pub fn resolve_request_path(root: &Path, request_path: &str) -> PathBuf {
    let relative = request_path.trim_start_matches('/');
    root.join(relative)
}

/// Canonicalization check: the resolved candidate must lie under the
/// resolved root, by byte prefix terminated at end-of-string or a path
/// separator. A missing target is checked through its parent; when the
/// parent does not exist either, the check fails closed.
#[must_use]
pub fn is_path_within_root(root: &Path, candidate: &Path) -> bool {
    let Ok(root) = root.canonicalize() else {
        return false;
    };

    let resolved = match candidate.canonicalize() {
        Ok(path) => path,
        Err(_) => {
            let Some(parent) = candidate.parent() else {
                return false;
            };
            let Ok(parent) = parent.canonicalize() else {
                return false;
            };
            let Some(name) = candidate.file_name() else {
                return false;
            };
            parent.join(name)
        }
    };

    let root_bytes = root.as_os_str().as_encoded_bytes();
    let resolved_bytes = resolved.as_os_str().as_encoded_bytes();
    if !resolved_bytes.starts_with(root_bytes) {
        return false;
    }
    match resolved_bytes.get(root_bytes.len()) {
        None => true,
        Some(&b) => b == b'/',
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_literal_dotdot_rejected() {
        assert!(has_traversal_tokens("/../etc/passwd"));
        assert!(has_traversal_tokens("/a/../b"));
    }

    #[test]
    fn test_single_encoded_rejected() {
        assert!(has_traversal_tokens("/%2e%2e/etc/passwd"));
        assert!(has_traversal_tokens("/%2E%2E/etc/passwd"));
        assert!(has_traversal_tokens("/..%2fetc%2fpasswd"));
    }

    #[test]
    fn test_double_encoded_rejected() {
        assert!(has_traversal_tokens("/%252e%252e/etc/passwd"));
        assert!(has_traversal_tokens("/%252E%252e/etc/passwd"));
    }

    #[test]
    fn test_mixed_encodings_rejected() {
        assert!(has_traversal_tokens("/.%2e/secret"));
        assert!(has_traversal_tokens("/%2e%252e/secret"));
    }

    #[test]
    fn test_clean_paths_pass() {
        assert!(!has_traversal_tokens("/index.html"));
        assert!(!has_traversal_tokens("/css/site.css"));
        assert!(!has_traversal_tokens("/a.b/c.d"));
        // single dots are fine
        assert!(!has_traversal_tokens("/./x"));
    }

    #[test]
    fn test_canonical_containment() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("www");
        fs::create_dir_all(root.join("css")).unwrap();
        fs::write(root.join("index.html"), "hi").unwrap();
        fs::write(dir.path().join("secret.txt"), "no").unwrap();

        assert!(is_path_within_root(&root, &root.join("index.html")));
        assert!(is_path_within_root(&root, &root.join("css")));
        // missing file with existing parent is allowed by this layer
        assert!(is_path_within_root(&root, &root.join("missing.html")));
        // missing file with missing parent fails closed
        assert!(!is_path_within_root(&root, &root.join("nope/missing.html")));
        // escapes resolve outside
        assert!(!is_path_within_root(&root, &root.join("../secret.txt")));
        assert!(!is_path_within_root(&root, dir.path()));
    }

    #[test]
    fn test_prefix_requires_separator_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("www");
        let sibling = dir.path().join("wwwx");
        fs::create_dir_all(&root).unwrap();
        fs::create_dir_all(&sibling).unwrap();
        fs::write(sibling.join("f.txt"), "x").unwrap();

        // "/tmp/…/wwwx/f.txt" shares the byte prefix "/tmp/…/www" but is
        // not inside the root
        assert!(!is_path_within_root(&root, &sibling.join("f.txt")));
    }
}
