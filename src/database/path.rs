use crate::database::error::{invalid_argument, DatabaseResult};

const FORBIDDEN_CHARS: [char; 5] = ['.', '#', '$', '[', ']'];

/// Splits a slash-delimited database path into its segments.
///
/// Leading and trailing slashes are ignored, so `""` and `"/"` both address the root.
pub(crate) fn normalize_path(path: &str) -> DatabaseResult<Vec<String>> {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    let mut segments = Vec::new();
    for segment in trimmed.split('/') {
        if segment.is_empty() {
            return Err(invalid_argument(
                "Database path cannot contain empty segments",
            ));
        }
        if let Some(ch) = segment.chars().find(|ch| FORBIDDEN_CHARS.contains(ch)) {
            return Err(invalid_argument(format!(
                "Database path segment '{segment}' contains forbidden character '{ch}'"
            )));
        }
        segments.push(segment.to_string());
    }
    Ok(segments)
}

pub(crate) fn path_to_string(path: &[String]) -> String {
    if path.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", path.join("/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trims_slashes_and_splits() {
        assert_eq!(
            normalize_path("/users/alice/").unwrap(),
            vec!["users".to_string(), "alice".to_string()]
        );
        assert!(normalize_path("/").unwrap().is_empty());
    }

    #[test]
    fn rejects_empty_segments_and_forbidden_chars() {
        assert!(normalize_path("a//b").is_err());
        let err = normalize_path("users/a.b").unwrap_err();
        assert_eq!(err.code_str(), "database/invalid-argument");
    }

    #[test]
    fn renders_root_and_nested_paths() {
        assert_eq!(path_to_string(&[]), "/");
        assert_eq!(
            path_to_string(&["a".to_string(), "b".to_string()]),
            "/a/b"
        );
    }
}
