//! Reflog reading.
//!
//! Reflog entries are written by libgit2 itself (the store enables
//! `core.logAllRefUpdates=always` and configures the committer identity at
//! open). This module only parses `logs/<refname>` back into entries.

use std::path::Path;

use crate::error::{Error, Result};
use crate::types::ReflogEntry;

/// The all-zeros SHA marking "no previous commit" at ref creation.
pub const ZERO_SHA: &str = "0000000000000000000000000000000000000000";

/// Read the reflog for `refname`, newest entry first.
///
/// A missing reflog file yields an empty list. Each on-disk line is
/// `<old> <new> <committer> <timestamp> <tz>\t<message>`, oldest first;
/// the result is reversed so callers can scan from the most recent update.
pub fn read_reflog(gitdir: &Path, refname: &str) -> Result<Vec<ReflogEntry>> {
    let log_path = gitdir.join("logs").join(refname);
    if !log_path.exists() {
        return Ok(Vec::new());
    }

    let content =
        std::fs::read_to_string(&log_path).map_err(|e| Error::io_at(&log_path, e))?;

    let mut entries: Vec<ReflogEntry> = content.lines().filter_map(parse_line).collect();
    entries.reverse();
    Ok(entries)
}

/// Parse one reflog line, tolerating committer names containing spaces by
/// scanning the timestamp and timezone from the right.
fn parse_line(line: &str) -> Option<ReflogEntry> {
    if line.is_empty() {
        return None;
    }

    let (head, message) = line.split_once('\t').unwrap_or((line, ""));

    let (old_sha, rest) = head.split_once(' ')?;
    let (new_sha, rest) = rest.split_once(' ')?;
    if old_sha.len() != 40 || new_sha.len() != 40 {
        return None;
    }

    // rest = "Name <email> <timestamp> <tz>"
    let tz_start = rest.rfind(' ')?;
    let ts_start = rest[..tz_start].rfind(' ')?;
    let timestamp = rest[ts_start + 1..tz_start].parse::<u64>().ok()?;

    Some(ReflogEntry {
        old_sha: old_sha.to_string(),
        new_sha: new_sha.to_string(),
        committer: rest[..ts_start].to_string(),
        timestamp,
        message: message.to_string(),
    })
}
