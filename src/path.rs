use crate::error::{Error, Result};

/// Normalize a store path to its canonical slash-separated form.
///
/// Backslashes are treated as separators, leading/trailing/repeated slashes
/// collapse, and `.` segments disappear. The empty string (and all-slash
/// inputs) normalize to `""`, the root.
///
/// # Errors
/// [`Error::InvalidPath`] for `..` segments or for inputs that collapse to
/// nothing without being pure slashes (e.g. `"."`).
pub fn normalize(path: &str) -> Result<String> {
    if path.is_empty() {
        return Ok(String::new());
    }

    let unified = path.replace('\\', "/");
    let mut segments: Vec<&str> = Vec::new();
    for segment in unified.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                return Err(Error::invalid_path(format!(
                    "'..' segment not allowed in {:?}",
                    path
                )))
            }
            other => segments.push(other),
        }
    }

    if segments.is_empty() {
        if unified.bytes().all(|b| b == b'/') {
            return Ok(String::new());
        }
        return Err(Error::invalid_path(format!(
            "path {:?} has no usable segments",
            path
        )));
    }

    Ok(segments.join("/"))
}

/// `true` when `path` names the root of the tree (empty or only slashes).
pub fn is_root(path: &str) -> bool {
    path.chars().all(|c| c == '/' || c == '\\')
}

/// Last segment of a normalized path.
pub fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Join a normalized prefix and a relative path, tolerating an empty prefix.
pub fn join(prefix: &str, rest: &str) -> String {
    if prefix.is_empty() {
        rest.to_string()
    } else if rest.is_empty() {
        prefix.to_string()
    } else {
        format!("{}/{}", prefix, rest)
    }
}

/// Validate a branch/tag short name.
///
/// Rejects empty names, control characters, the separator/metacharacters
/// git forbids (`:`, space, tab, newline, `\`, `~`, `^`, `[`), leading or
/// trailing dots, and `..`.
pub fn validate_ref_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::invalid_ref_name("name must not be empty"));
    }

    for ch in name.chars() {
        if ch <= '\u{1f}' || ch == '\u{7f}' {
            return Err(Error::invalid_ref_name(format!(
                "name contains control character {:?}",
                ch
            )));
        }
        if matches!(ch, ':' | ' ' | '\t' | '\n' | '\\' | '~' | '^' | '[') {
            return Err(Error::invalid_ref_name(format!(
                "name contains forbidden character {:?}",
                ch
            )));
        }
    }

    if name.starts_with('.') || name.ends_with('.') {
        return Err(Error::invalid_ref_name(
            "name must not start or end with '.'",
        ));
    }

    if name.contains("..") {
        return Err(Error::invalid_ref_name("name must not contain '..'"));
    }

    Ok(())
}
