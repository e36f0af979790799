//! Mirror engine: ref-diffing backup/restore between repositories, and the
//! v2 bundle format for offline transport.
//!
//! Backup without a ref filter is a full mirror and deletes remote-only
//! refs; a filtered backup never deletes. Restore is always additive and
//! never touches `HEAD`.

use std::collections::{HashMap, HashSet};
use std::io::Write as _;
use std::path::Path;

use crate::error::{Error, Result};
use crate::types::{MirrorDiff, RefChange};

/// Progress callback: `(units_done, units_total)`.
pub type ProgressFn = fn(usize, usize);

/// Credential resolver: maps a URL to one carrying userinfo.
pub type CredentialFn = fn(&str) -> String;

/// Options for [`Vault::backup`](crate::Vault::backup).
#[derive(Debug, Clone, Default)]
pub struct BackupOptions {
    /// Compute the diff but push nothing.
    pub dry_run: bool,
    /// Restrict to these refs (short or full names). Filtered backups never
    /// delete.
    pub refs: Option<Vec<String>>,
    /// `"bundle"` forces bundle output; otherwise inferred from a
    /// `.bundle` extension.
    pub format: Option<String>,
    /// Byte-level progress during bundle writes.
    pub progress: Option<ProgressFn>,
    /// Applied to HTTPS URLs before transport.
    pub credentials: Option<CredentialFn>,
}

/// Options for [`Vault::restore`](crate::Vault::restore).
#[derive(Debug, Clone, Default)]
pub struct RestoreOptions {
    /// Compute the diff but fetch nothing.
    pub dry_run: bool,
    /// Restrict to these refs (short or full names).
    pub refs: Option<Vec<String>>,
    /// `"bundle"` forces bundle input; otherwise inferred from a
    /// `.bundle` extension.
    pub format: Option<String>,
    /// Byte-level progress during bundle reads.
    pub progress: Option<ProgressFn>,
    /// Applied to HTTPS URLs before transport.
    pub credentials: Option<CredentialFn>,
}

// ---------------------------------------------------------------------------
// URL helpers
// ---------------------------------------------------------------------------

fn is_local(url: &str) -> bool {
    !["http://", "https://", "git://", "ssh://"]
        .iter()
        .any(|scheme| url.starts_with(scheme))
}

fn as_local_path(url: &str) -> &str {
    url.strip_prefix("file://").unwrap_or(url)
}

/// scp-style `user@host:path` is ambiguous with local paths; demand the
/// explicit `ssh://` form instead.
fn reject_scp_url(url: &str) -> Result<()> {
    if !is_local(url) || url.starts_with("file://") {
        return Ok(());
    }

    let host_part = match url.split_once('@') {
        Some((_, rest)) => rest,
        None => url,
    };
    if let Some(colon) = host_part.find(':') {
        let prefix = &host_part[..colon];
        if colon > 1 && !prefix.contains('/') && !prefix.contains('\\') {
            return Err(Error::invalid_path(format!(
                "scp-style URL not supported: {:?} (use ssh:// instead)",
                url
            )));
        }
    }
    Ok(())
}

fn is_bundle(path: &str) -> bool {
    path.to_lowercase().ends_with(".bundle")
}

fn with_credentials(url: &str, resolver: Option<CredentialFn>) -> String {
    match resolver {
        Some(resolve) if url.starts_with("https://") => resolve(url),
        _ => url.to_string(),
    }
}

/// Initialize a bare repository at a local destination that does not exist
/// yet.
fn ensure_local_destination(url: &str) -> Result<()> {
    if !is_local(url) {
        return Ok(());
    }
    let path = Path::new(as_local_path(url));
    if path.exists() {
        return Ok(());
    }
    std::fs::create_dir_all(path).map_err(|e| Error::io_at(path, e))?;
    git2::Repository::init_bare(path).map_err(Error::store)?;
    log::debug!("created bare repository at {}", path.display());
    Ok(())
}

// ---------------------------------------------------------------------------
// Ref enumeration and name resolution
// ---------------------------------------------------------------------------

/// `{full_ref_name: hex_sha}` for a repository on disk, `HEAD` excluded.
fn refs_of_repo(path: &Path) -> Result<HashMap<String, String>> {
    let repo = git2::Repository::open_bare(path).map_err(Error::store)?;
    let mut out = HashMap::new();

    for reference in repo.references().map_err(Error::store)?.flatten() {
        let name = match reference.name() {
            Some("HEAD") | None => continue,
            Some(name) => name.to_string(),
        };
        let target = reference
            .target()
            .or_else(|| reference.resolve().ok().and_then(|r| r.target()));
        if let Some(oid) = target {
            out.insert(name, oid.to_string());
        }
    }
    Ok(out)
}

/// Refs of the remote at `url`: local paths open directly, everything else
/// goes through the ls-remote handshake. `HEAD` and `^{}` peel markers are
/// dropped. Unreachable remotes read as empty.
fn refs_of_remote(repo_path: &Path, url: &str) -> Result<HashMap<String, String>> {
    if is_local(url) {
        let path = Path::new(as_local_path(url));
        if !path.exists() {
            return Ok(HashMap::new());
        }
        return refs_of_repo(path);
    }

    let repo = git2::Repository::open_bare(repo_path).map_err(Error::store)?;
    let mut remote = match repo.remote_anonymous(url) {
        Ok(remote) => remote,
        Err(_) => return Ok(HashMap::new()),
    };
    if remote.connect(git2::Direction::Fetch).is_err() {
        return Ok(HashMap::new());
    }

    let mut out = HashMap::new();
    if let Ok(heads) = remote.list() {
        for head in heads {
            let name = head.name();
            if name == "HEAD" || name.ends_with("^{}") {
                continue;
            }
            out.insert(name.to_string(), head.oid().to_string());
        }
    }
    let _ = remote.disconnect();
    Ok(out)
}

/// Expand short ref names against the available set: `refs/...` passes
/// through, otherwise `refs/heads/`, `refs/tags/`, `refs/notes/` are tried
/// in order, defaulting to `refs/heads/` when nothing matches.
fn resolve_ref_names(
    names: &[String],
    available: &HashMap<String, String>,
) -> HashSet<String> {
    let mut out = HashSet::new();
    for name in names {
        if name.starts_with("refs/") {
            out.insert(name.clone());
            continue;
        }
        let found = ["refs/heads/", "refs/tags/", "refs/notes/"]
            .iter()
            .map(|prefix| format!("{}{}", prefix, name))
            .find(|candidate| available.contains_key(candidate));
        out.insert(found.unwrap_or_else(|| format!("refs/heads/{}", name)));
    }
    out
}

// ---------------------------------------------------------------------------
// Diff
// ---------------------------------------------------------------------------

/// Classify refs: only in `src` is an add, different targets are an
/// update, only in `dest` is a delete.
pub(crate) fn diff_refs(
    src: &HashMap<String, String>,
    dest: &HashMap<String, String>,
) -> MirrorDiff {
    let mut diff = MirrorDiff::new();

    for (name, sha) in src {
        match dest.get(name) {
            None => diff.add.push(RefChange {
                ref_name: name.clone(),
                old_target: None,
                new_target: Some(sha.clone()),
            }),
            Some(dest_sha) if dest_sha != sha => diff.update.push(RefChange {
                ref_name: name.clone(),
                old_target: Some(dest_sha.clone()),
                new_target: Some(sha.clone()),
            }),
            Some(_) => {}
        }
    }

    for (name, sha) in dest {
        if !src.contains_key(name) {
            diff.delete.push(RefChange {
                ref_name: name.clone(),
                old_target: Some(sha.clone()),
                new_target: None,
            });
        }
    }

    diff
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// Force-push every local ref and delete remote-only refs (mirror mode).
fn mirror_push(
    repo_path: &Path,
    url: &str,
    local: &HashMap<String, String>,
    remote_refs: &HashMap<String, String>,
) -> Result<()> {
    let repo = git2::Repository::open_bare(repo_path).map_err(Error::store)?;
    let mut remote = repo.remote_anonymous(url).map_err(Error::store)?;

    let mut refspecs: Vec<String> = local.keys().map(|r| format!("+{}:{}", r, r)).collect();
    for name in remote_refs.keys() {
        if !local.contains_key(name) {
            refspecs.push(format!(":{}", name));
        }
    }

    let specs: Vec<&str> = refspecs.iter().map(String::as_str).collect();
    remote.push(&specs, None).map_err(Error::store)?;
    log::debug!("mirror push of {} refspecs to {}", specs.len(), url);
    Ok(())
}

/// Force-push only the refs in `selection`; nothing is deleted.
fn selective_push(repo_path: &Path, url: &str, selection: &HashSet<String>) -> Result<()> {
    let repo = git2::Repository::open_bare(repo_path).map_err(Error::store)?;
    let mut remote = repo.remote_anonymous(url).map_err(Error::store)?;

    let refspecs: Vec<String> = selection.iter().map(|r| format!("+{}:{}", r, r)).collect();
    let specs: Vec<&str> = refspecs.iter().map(String::as_str).collect();
    remote.push(&specs, None).map_err(Error::store)
}

/// Fetch refs from `url` without deleting anything local.
fn additive_fetch(repo_path: &Path, url: &str, filter: Option<&[String]>) -> Result<()> {
    let available = refs_of_remote(repo_path, url)?;
    if available.is_empty() {
        return Ok(());
    }

    let selected: Vec<&String> = match filter {
        Some(names) => {
            let resolved = resolve_ref_names(names, &available);
            available
                .keys()
                .filter(|k| resolved.contains(k.as_str()))
                .collect()
        }
        None => available.keys().collect(),
    };
    if selected.is_empty() {
        return Ok(());
    }

    let repo = git2::Repository::open_bare(repo_path).map_err(Error::store)?;
    let mut remote = repo.remote_anonymous(url).map_err(Error::store)?;
    let refspecs: Vec<String> = selected.iter().map(|r| format!("+{}:{}", r, r)).collect();
    let specs: Vec<&str> = refspecs.iter().map(String::as_str).collect();
    remote.fetch(&specs, None, None).map_err(Error::store)
}

// ---------------------------------------------------------------------------
// Bundle v2
// ---------------------------------------------------------------------------

const BUNDLE_SIGNATURE: &[u8] = b"# v2 git bundle\n";

/// Parse a v2 bundle header: `(refs, byte offset of the packfile)`.
/// Prerequisite lines (`-<sha>`), `HEAD`, and `^{}` markers are skipped.
fn parse_bundle_header(data: &[u8]) -> Result<(HashMap<String, String>, usize)> {
    if data.len() < BUNDLE_SIGNATURE.len() || &data[..BUNDLE_SIGNATURE.len()] != BUNDLE_SIGNATURE {
        return Err(Error::store_msg("not a v2 git bundle"));
    }

    let header_end = data
        .windows(2)
        .position(|w| w == b"\n\n")
        .ok_or_else(|| Error::store_msg("bundle header missing blank-line separator"))?;

    let header = String::from_utf8_lossy(&data[BUNDLE_SIGNATURE.len()..header_end]);
    let mut refs = HashMap::new();

    for line in header.lines() {
        if line.is_empty() || line.starts_with('-') {
            continue;
        }
        let Some((sha, name)) = line.split_once(' ') else {
            continue;
        };
        if sha.is_empty() || name == "HEAD" || name.ends_with("^{}") {
            continue;
        }
        refs.insert(name.to_string(), sha.to_string());
    }

    Ok((refs, header_end + 2))
}

/// Write `[header][\n][pack]` to `path` for the selected refs. The pack
/// carries every object reachable from them.
pub(crate) fn bundle_export(
    repo_path: &Path,
    path: &str,
    filter: Option<&[String]>,
    progress: Option<ProgressFn>,
) -> Result<()> {
    let repo = git2::Repository::open_bare(repo_path).map_err(Error::store)?;
    let local = refs_of_repo(repo_path)?;

    let selected: HashMap<String, String> = match filter {
        Some(names) => {
            let resolved = resolve_ref_names(names, &local);
            local
                .into_iter()
                .filter(|(k, _)| resolved.contains(k))
                .collect()
        }
        None => local,
    };
    if selected.is_empty() {
        return Err(Error::store_msg("no refs to export"));
    }

    // Reachability walk: the packbuilder ingests every commit the revwalk
    // yields along with its trees and blobs.
    let mut builder = repo.packbuilder().map_err(Error::store)?;
    let mut walk = repo.revwalk().map_err(Error::store)?;
    for sha in selected.values() {
        let oid = git2::Oid::from_str(sha).map_err(Error::store)?;
        walk.push(oid).map_err(Error::store)?;
    }
    builder.insert_walk(&mut walk).map_err(Error::store)?;

    let mut pack = git2::Buf::new();
    builder.write_buf(&mut pack).map_err(Error::store)?;

    let mut header = String::from_utf8_lossy(BUNDLE_SIGNATURE).into_owned();
    let mut names: Vec<&String> = selected.keys().collect();
    names.sort();
    for name in names {
        header.push_str(&selected[name.as_str()]);
        header.push(' ');
        header.push_str(name);
        header.push('\n');
    }
    header.push('\n');

    let mut file =
        std::fs::File::create(path).map_err(|e| Error::io_at(Path::new(path), e))?;
    file.write_all(header.as_bytes())
        .map_err(|e| Error::io_at(Path::new(path), e))?;
    write_chunked(&mut file, &pack, path, progress)?;

    log::debug!("bundled {} bytes of pack data into {}", pack.len(), path);
    Ok(())
}

/// Import a bundle's pack into the object store and force-write its refs.
/// Additive: nothing local is deleted, and an identical pre-existing
/// packfile is tolerated (the indexer names packs by their checksum).
pub(crate) fn bundle_import(
    repo_path: &Path,
    path: &str,
    filter: Option<&[String]>,
    progress: Option<ProgressFn>,
) -> Result<()> {
    let data = std::fs::read(path).map_err(|e| Error::io_at(Path::new(path), e))?;
    let (all_refs, pack_offset) = parse_bundle_header(&data)?;

    let selected: HashMap<String, String> = match filter {
        Some(names) => {
            let resolved = resolve_ref_names(names, &all_refs);
            all_refs
                .into_iter()
                .filter(|(k, _)| resolved.contains(k))
                .collect()
        }
        None => all_refs,
    };
    if selected.is_empty() {
        return Ok(());
    }

    let pack = &data[pack_offset..];
    let pack_dir = repo_path.join("objects").join("pack");
    std::fs::create_dir_all(&pack_dir).map_err(|e| Error::io_at(&pack_dir, e))?;

    let mut indexer = git2::Indexer::new(None, &pack_dir, 0, false).map_err(Error::store)?;
    write_chunked(&mut indexer, pack, path, progress)?;
    indexer.commit().map_err(Error::store)?;

    let repo = git2::Repository::open_bare(repo_path).map_err(Error::store)?;
    for (name, sha) in &selected {
        let oid = git2::Oid::from_str(sha).map_err(Error::store)?;
        repo.reference(name, oid, true, "bundle import")
            .map_err(Error::store)?;
    }

    log::debug!("imported {} refs from {}", selected.len(), path);
    Ok(())
}

/// Copy `data` into `sink` in chunks, reporting byte progress.
fn write_chunked(
    sink: &mut dyn std::io::Write,
    data: &[u8],
    context: &str,
    progress: Option<ProgressFn>,
) -> Result<()> {
    const CHUNK: usize = 64 * 1024;
    let total = data.len();
    let mut done = 0;
    for chunk in data.chunks(CHUNK) {
        sink.write_all(chunk)
            .map_err(|e| Error::io_at(Path::new(context), e))?;
        done += chunk.len();
        if let Some(report) = progress {
            report(done, total);
        }
    }
    Ok(())
}

fn bundle_refs(path: &str) -> Result<HashMap<String, String>> {
    let data = std::fs::read(path).map_err(|e| Error::io_at(Path::new(path), e))?;
    Ok(parse_bundle_header(&data)?.0)
}

/// Exporting to a bundle reports every selected ref as an add.
fn diff_bundle_export(repo_path: &Path, filter: Option<&[String]>) -> Result<MirrorDiff> {
    let local = refs_of_repo(repo_path)?;
    let selected: HashMap<String, String> = match filter {
        Some(names) => {
            let resolved = resolve_ref_names(names, &local);
            local
                .into_iter()
                .filter(|(k, _)| resolved.contains(k))
                .collect()
        }
        None => local,
    };

    let mut diff = MirrorDiff::new();
    for (name, sha) in selected {
        diff.add.push(RefChange {
            ref_name: name,
            old_target: None,
            new_target: Some(sha),
        });
    }
    Ok(diff)
}

fn diff_bundle_import(
    repo_path: &Path,
    path: &str,
    filter: Option<&[String]>,
) -> Result<MirrorDiff> {
    let bundle = bundle_refs(path)?;
    let selected: HashMap<String, String> = match filter {
        Some(names) => {
            let resolved = resolve_ref_names(names, &bundle);
            bundle
                .into_iter()
                .filter(|(k, _)| resolved.contains(k))
                .collect()
        }
        None => bundle,
    };

    let local = refs_of_repo(repo_path)?;
    let mut diff = diff_refs(&selected, &local);
    diff.delete.clear(); // additive
    Ok(diff)
}

// ---------------------------------------------------------------------------
// Public entry points
// ---------------------------------------------------------------------------

/// Push refs from the repository at `repo_path` to `dest`.
pub(crate) fn backup(repo_path: &Path, dest: &str, opts: &BackupOptions) -> Result<MirrorDiff> {
    reject_scp_url(dest)?;

    if opts.format.as_deref() == Some("bundle") || is_bundle(dest) {
        let diff = diff_bundle_export(repo_path, opts.refs.as_deref())?;
        if !opts.dry_run {
            bundle_export(repo_path, dest, opts.refs.as_deref(), opts.progress)?;
        }
        return Ok(diff);
    }

    let url = with_credentials(dest, opts.credentials);
    ensure_local_destination(&url)?;

    let local = refs_of_repo(repo_path)?;
    let remote_refs = refs_of_remote(repo_path, &url)?;

    if let Some(ref names) = opts.refs {
        let selection = resolve_ref_names(names, &local);
        let mut diff = diff_refs(&local, &remote_refs);
        diff.add.retain(|r| selection.contains(&r.ref_name));
        diff.update.retain(|r| selection.contains(&r.ref_name));
        diff.delete.clear(); // filtered backups never delete

        if !opts.dry_run && !diff.in_sync() {
            selective_push(repo_path, &url, &selection)?;
        }
        return Ok(diff);
    }

    let diff = diff_refs(&local, &remote_refs);
    if !opts.dry_run && !diff.in_sync() {
        mirror_push(repo_path, &url, &local, &remote_refs)?;
    }
    Ok(diff)
}

/// Fetch refs into the repository at `repo_path` from `src`. Additive.
pub(crate) fn restore(repo_path: &Path, src: &str, opts: &RestoreOptions) -> Result<MirrorDiff> {
    reject_scp_url(src)?;

    if opts.format.as_deref() == Some("bundle") || is_bundle(src) {
        let diff = diff_bundle_import(repo_path, src, opts.refs.as_deref())?;
        if !opts.dry_run && !diff.in_sync() {
            bundle_import(repo_path, src, opts.refs.as_deref(), opts.progress)?;
        }
        return Ok(diff);
    }

    let url = with_credentials(src, opts.credentials);
    let local = refs_of_repo(repo_path)?;
    let remote_refs = refs_of_remote(repo_path, &url)?;

    // The remote is the source here, so the diff flips.
    let mut diff = diff_refs(&remote_refs, &local);
    if let Some(ref names) = opts.refs {
        let selection = resolve_ref_names(names, &remote_refs);
        diff.add.retain(|r| selection.contains(&r.ref_name));
        diff.update.retain(|r| selection.contains(&r.ref_name));
    }
    diff.delete.clear(); // restore never deletes

    if !opts.dry_run && !diff.in_sync() {
        additive_fetch(repo_path, &url, opts.refs.as_deref())?;
    }
    Ok(diff)
}
