//! Single-segment shell-style matching: `*`, `?`, and `[...]` classes.

/// Match one path segment against `pattern`.
///
/// Dotfiles are protected: a name starting with `.` only matches when the
/// pattern itself starts with `.`.
pub fn glob_match(pattern: &str, name: &str) -> bool {
    if name.starts_with('.') && !pattern.starts_with('.') {
        return false;
    }
    fnmatch(pattern.as_bytes(), name.as_bytes())
}

#[derive(Debug, Clone)]
enum Token {
    Literal(u8),
    Any,
    Star,
    /// Character class: inclusive ranges, plus the negation flag.
    Class(Vec<(u8, u8)>, bool),
}

fn tokenize(pat: &[u8]) -> Vec<Token> {
    let mut tokens = Vec::with_capacity(pat.len());
    let mut i = 0;
    while i < pat.len() {
        match pat[i] {
            b'*' => {
                // Runs of stars collapse to one.
                if !matches!(tokens.last(), Some(Token::Star)) {
                    tokens.push(Token::Star);
                }
                i += 1;
            }
            b'?' => {
                tokens.push(Token::Any);
                i += 1;
            }
            b'[' => match parse_class(&pat[i..]) {
                Some((token, consumed)) => {
                    tokens.push(token);
                    i += consumed;
                }
                // Unterminated class: treat '[' literally.
                None => {
                    tokens.push(Token::Literal(b'['));
                    i += 1;
                }
            },
            c => {
                tokens.push(Token::Literal(c));
                i += 1;
            }
        }
    }
    tokens
}

/// Parse a `[...]` class starting at `pat[0] == b'['`. Returns the token and
/// the number of bytes consumed, or `None` if the class never closes.
fn parse_class(pat: &[u8]) -> Option<(Token, usize)> {
    let mut i = 1;
    let negated = matches!(pat.get(i), Some(&b'!') | Some(&b'^'));
    if negated {
        i += 1;
    }

    let mut ranges: Vec<(u8, u8)> = Vec::new();
    let mut first = true;
    while i < pat.len() {
        let c = pat[i];
        if c == b']' && !first {
            return Some((Token::Class(ranges, negated), i + 1));
        }
        first = false;
        if pat.get(i + 1) == Some(&b'-') && pat.get(i + 2).is_some_and(|&n| n != b']') {
            ranges.push((c, pat[i + 2]));
            i += 3;
        } else {
            ranges.push((c, c));
            i += 1;
        }
    }
    None
}

fn class_matches(ranges: &[(u8, u8)], negated: bool, c: u8) -> bool {
    let hit = ranges.iter().any(|&(lo, hi)| lo <= c && c <= hi);
    hit != negated
}

/// fnmatch over raw bytes, without dotfile protection. Used directly by the
/// exclude filter, where `.gitignore` semantics want `*.pyc` to match
/// `.hidden.pyc`.
pub(crate) fn fnmatch(pat: &[u8], name: &[u8]) -> bool {
    let tokens = tokenize(pat);

    // Two-pointer match with star backtracking.
    let mut ti = 0;
    let mut ni = 0;
    let mut star_ti = usize::MAX;
    let mut star_ni = 0;

    while ni < name.len() {
        let consumed = match tokens.get(ti) {
            Some(Token::Literal(c)) => *c == name[ni],
            Some(Token::Any) => true,
            Some(Token::Class(ranges, negated)) => class_matches(ranges, *negated, name[ni]),
            Some(Token::Star) => {
                star_ti = ti;
                star_ni = ni;
                ti += 1;
                continue;
            }
            None => false,
        };

        if consumed {
            ti += 1;
            ni += 1;
        } else if star_ti != usize::MAX {
            // Give the last star one more character.
            ti = star_ti + 1;
            star_ni += 1;
            ni = star_ni;
        } else {
            return false;
        }
    }

    while matches!(tokens.get(ti), Some(Token::Star)) {
        ti += 1;
    }
    ti == tokens.len()
}

/// Expand `pattern` against the filesystem under `root`, returning matching
/// file paths relative to `root` (unordered, unique).
///
/// Same segment semantics as tree globbing: `*`/`?`/`[...]` stay within one
/// path segment and respect the dotfile rule, `**` spans zero or more
/// directory levels and skips dot-directories. Directories themselves are
/// not reported.
pub fn disk_iglob(root: &std::path::Path, pattern: &str) -> crate::Result<Vec<String>> {
    fn descend(
        dir: &std::path::Path,
        segments: &[&str],
        prefix: &str,
        seen: &mut std::collections::HashSet<String>,
        out: &mut Vec<String>,
    ) -> crate::Result<()> {
        let Some((&segment, rest)) = segments.split_first() else {
            return Ok(());
        };

        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(crate::Error::io_at(dir, e)),
        };

        if segment == "**" {
            descend(dir, rest, prefix, seen, out)?;
            for entry in entries {
                let entry = entry.map_err(|e| crate::Error::io_at(dir, e))?;
                let name = entry.file_name().to_string_lossy().into_owned();
                if name.starts_with('.') || !entry.path().is_dir() {
                    continue;
                }
                let full = crate::path::join(prefix, &name);
                descend(&entry.path(), segments, &full, seen, out)?;
            }
            return Ok(());
        }

        for entry in entries {
            let entry = entry.map_err(|e| crate::Error::io_at(dir, e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if !glob_match(segment, &name) {
                continue;
            }
            let full = crate::path::join(prefix, &name);
            let is_dir = entry.path().is_dir();

            if rest.is_empty() {
                if !is_dir && seen.insert(full.clone()) {
                    out.push(full);
                }
            } else if is_dir {
                descend(&entry.path(), rest, &full, seen, out)?;
            }
        }
        Ok(())
    }

    let segments: Vec<&str> = pattern.split('/').collect();
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    descend(root, &segments, "", &mut seen, &mut out)?;
    Ok(out)
}
