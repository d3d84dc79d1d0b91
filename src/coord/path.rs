//! Node path helpers

use crate::error::CoordError;

/// Validate an absolute node path and strip any trailing `/`
pub fn normalize(path: &str) -> Result<String, CoordError> {
    if !path.starts_with('/') {
        return Err(CoordError::BadPath(path.to_string()));
    }

    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return Ok("/".to_string());
    }

    for segment in trimmed[1..].split('/') {
        if segment.is_empty() || segment == "." || segment == ".." {
            return Err(CoordError::BadPath(path.to_string()));
        }
    }

    Ok(trimmed.to_string())
}

/// Append a child name to a normalized parent path
pub fn join(parent: &str, child: &str) -> String {
    if parent == "/" {
        format!("/{}", child)
    } else {
        format!("{}/{}", parent, child)
    }
}

/// Last segment of a path
pub fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Parent of a normalized path, `None` for the root
pub fn parent(path: &str) -> Option<&str> {
    if path == "/" {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some("/"),
        Some(idx) => Some(&path[..idx]),
        None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("/election").unwrap(), "/election");
        assert_eq!(normalize("/election/").unwrap(), "/election");
        assert_eq!(normalize("/a/b/c").unwrap(), "/a/b/c");
        assert_eq!(normalize("/").unwrap(), "/");

        assert!(normalize("election").is_err());
        assert!(normalize("").is_err());
        assert!(normalize("/a//b").is_err());
        assert!(normalize("/a/../b").is_err());
        assert!(normalize("/a/./b").is_err());
    }

    #[test]
    fn test_join_and_split() {
        assert_eq!(join("/", "a"), "/a");
        assert_eq!(join("/a", "b-0000000001"), "/a/b-0000000001");

        assert_eq!(basename("/a/b-0000000001"), "b-0000000001");
        assert_eq!(basename("/a"), "a");

        assert_eq!(parent("/a/b"), Some("/a"));
        assert_eq!(parent("/a"), Some("/"));
        assert_eq!(parent("/"), None);
    }
}
