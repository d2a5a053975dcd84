//! Slash-separated remote path handling.
//!
//! Remote keys are always `/`-separated regardless of the local platform,
//! so these helpers work on strings instead of `std::path`.

/// Lexically normalises a slash-separated path.
///
/// Collapses repeated slashes, removes `.` segments and resolves `..`
/// against the preceding segment. A rooted path stays rooted and `..` never
/// climbs above the root. The empty path cleans to `.`.
pub fn clean(path: &str) -> String {
    let rooted = path.starts_with('/');
    let mut segments: Vec<&str> = Vec::new();

    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.last().is_some_and(|last| *last != "..") {
                    segments.pop();
                } else if !rooted {
                    segments.push("..");
                }
            }
            other => segments.push(other),
        }
    }

    let joined = segments.join("/");
    match (rooted, joined.is_empty()) {
        (true, _) => format!("/{}", joined),
        (false, true) => ".".to_string(),
        (false, false) => joined,
    }
}

/// Joins path elements with `/` and cleans the result.
///
/// Empty elements are ignored; joining nothing but empty elements yields
/// an empty string.
pub fn join_path(parts: &[&str]) -> String {
    let non_empty: Vec<&str> = parts.iter().copied().filter(|p| !p.is_empty()).collect();
    if non_empty.is_empty() {
        return String::new();
    }
    clean(&non_empty.join("/"))
}

/// Provider object key for `key` below the configured `prefix`.
///
/// Object stores have no root, so a leading slash is dropped.
pub fn object_key(prefix: &str, key: &str) -> String {
    let joined = join_path(&[prefix, key]);
    let trimmed = joined.trim_start_matches('/');
    if trimmed == "." {
        String::new()
    } else {
        trimmed.to_string()
    }
}

/// Listing prefix for a directory-like `dir`, ending in `/` unless empty.
pub fn list_prefix(dir: &str) -> String {
    if dir.is_empty() {
        String::new()
    } else {
        format!("{}/", dir.trim_end_matches('/'))
    }
}

/// Name of `full` relative to a listing prefix.
pub fn relative_name<'a>(full: &'a str, prefix: &str) -> &'a str {
    full.strip_prefix(prefix).unwrap_or(full)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean() {
        assert_eq!(clean(""), ".");
        assert_eq!(clean("a//b/./c/"), "a/b/c");
        assert_eq!(clean("a/b/../c"), "a/c");
        assert_eq!(clean("/../a"), "/a");
        assert_eq!(clean("../a"), "../a");
        assert_eq!(clean("/"), "/");
    }

    #[test]
    fn test_join_path() {
        assert_eq!(join_path(&["backups", "daily.tar"]), "backups/daily.tar");
        assert_eq!(join_path(&["backups/", "/daily.tar"]), "backups/daily.tar");
        assert_eq!(join_path(&["", "daily.tar"]), "daily.tar");
        assert_eq!(join_path(&["", ""]), "");
        assert_eq!(join_path(&["/root", "a/../b"]), "/root/b");
    }

    #[test]
    fn test_object_key() {
        assert_eq!(object_key("", "daily.tar"), "daily.tar");
        assert_eq!(object_key("/backups", "daily.tar"), "backups/daily.tar");
        assert_eq!(object_key("backups", ""), "backups");
        assert_eq!(object_key("", ""), "");
        assert_eq!(object_key("", "/"), "");
    }

    #[test]
    fn test_list_prefix() {
        assert_eq!(list_prefix(""), "");
        assert_eq!(list_prefix("a"), "a/");
        assert_eq!(list_prefix("a/"), "a/");
    }

    #[test]
    fn test_relative_name() {
        assert_eq!(relative_name("a/b/file1", "a/"), "b/file1");
        assert_eq!(relative_name("other", "a/"), "other");
    }
}
