//! Gitignore-style exclude filter used by the copy/sync engine.

use std::fs;
use std::path::Path;

use crate::glob::fnmatch;
use crate::Result;

/// One parsed exclude rule.
#[derive(Debug, Clone)]
struct Rule {
    /// Pattern with `!` and trailing `/` stripped.
    pattern: String,
    /// `!`-prefixed rules re-include previously excluded paths.
    negated: bool,
    /// Trailing-`/` rules apply to directories only.
    dir_only: bool,
    /// Rules containing `/` anchor to the full relative path; the rest match
    /// the basename.
    anchored: bool,
}

/// Ordered gitignore-style rule list; the last matching rule wins.
///
/// Rules follow `.gitignore` conventions: blank lines and `#` comments are
/// skipped, `!` negates, a trailing `/` restricts to directories, and a `/`
/// anywhere else anchors the pattern to the full relative path. Matching
/// uses plain fnmatch without dotfile protection, so `*.pyc` excludes
/// `.hidden.pyc` too.
///
/// ```rust
/// use gitvault::ExcludeFilter;
///
/// let mut filter = ExcludeFilter::new();
/// filter.add_lines(&["*.log", "!keep.log"]);
///
/// assert!(filter.is_excluded("debug.log", false));
/// assert!(!filter.is_excluded("keep.log", false));
/// assert!(!filter.is_excluded("src/main.rs", false));
/// ```
#[derive(Debug, Clone, Default)]
pub struct ExcludeFilter {
    rules: Vec<Rule>,
}

impl ExcludeFilter {
    /// An empty filter; excludes nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a filter from inline patterns and/or a pattern file. A missing
    /// file is tolerated; an unreadable one is an error.
    pub fn with_sources(patterns: Option<&[&str]>, file: Option<&Path>) -> Result<Self> {
        let mut filter = Self::new();
        if let Some(lines) = patterns {
            filter.add_lines(lines);
        }
        if let Some(path) = file {
            filter.load_file(path)?;
        }
        Ok(filter)
    }

    /// Parse and append rules. Blank lines, comments, and patterns that are
    /// empty after stripping markers are skipped.
    pub fn add_lines(&mut self, lines: &[&str]) {
        for &raw in lines {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let (negated, rest) = match line.strip_prefix('!') {
                Some(rest) => (true, rest),
                None => (false, line),
            };
            let (dir_only, pattern) = match rest.strip_suffix('/') {
                Some(rest) => (true, rest),
                None => (false, rest),
            };
            if pattern.is_empty() {
                continue;
            }

            self.rules.push(Rule {
                pattern: pattern.to_string(),
                negated,
                dir_only,
                anchored: pattern.contains('/'),
            });
        }
    }

    /// Append rules read from a file, one per line. A nonexistent file is a
    /// no-op.
    pub fn load_file(&mut self, path: &Path) -> Result<()> {
        if !path.exists() {
            return Ok(());
        }
        let contents = fs::read_to_string(path)?;
        let lines: Vec<&str> = contents.lines().map(|l| l.trim_end()).collect();
        self.add_lines(&lines);
        Ok(())
    }

    /// Whether `rel_path` (forward-slash relative path) is excluded.
    /// `is_dir` enables trailing-`/` rules.
    pub fn is_excluded(&self, rel_path: &str, is_dir: bool) -> bool {
        let basename = rel_path.rsplit('/').next().unwrap_or(rel_path);
        let mut excluded = false;

        for rule in &self.rules {
            if rule.dir_only && !is_dir {
                continue;
            }
            let subject = if rule.anchored { rel_path } else { basename };
            if fnmatch(rule.pattern.as_bytes(), subject.as_bytes()) {
                excluded = !rule.negated;
            }
        }

        excluded
    }

    /// `true` once at least one rule is loaded. Callers can skip filtering
    /// entirely for inactive filters.
    pub fn active(&self) -> bool {
        !self.rules.is_empty()
    }
}
