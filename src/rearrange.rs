//! Moving files and folders without breaking links to or from them.
//!
//! Most callers want [`crate::api::Notedir::move_paths`] or
//! [`crate::api::Notedir::replace_path_hrefs`] instead of the functions here.
//!
//! [`plan`] turns a set of renames into an ordered list of [`FileEditCmd`]s:
//!
//! 1. `ReplaceRef` edits for every link that would break, grouped by referrer. Files that are
//!    themselves moving are edited at their old location, before they move.
//! 2. Moves that can happen directly, plus moves of paths that are about to be replaced (swaps
//!    and chains) to a temporary name in the same folder.
//! 3. Moves from those temporary names to their final destinations.
use std::{
    collections::{BTreeMap, BTreeSet},
    path::{Path, PathBuf},
};
use walkdir::WalkDir;

use crate::{
    commands::FileEditCmd,
    error::NotedirError,
    paths::{canonicalize, href_for, resolve_href},
    properties::{FileInfoReq, InfoField},
    repo::Repository,
};

/// A name next to `path` that nothing should be using, for staging a move.
fn staging_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();
    let staged = format!(".{name}.{}.notedir-tmp", uuid::Uuid::new_v4().simple());
    match path.parent() {
        Some(parent) => parent.join(staged),
        None => PathBuf::from(staged),
    }
}

/// Commands that rename a set of files and folders, given canonical paths.
///
/// A destination that is also a source and currently exists is first moved to a temporary name,
/// and from there to its own destination after every other move. Sources that do not exist are
/// skipped.
pub fn edits_for_raw_moves(renames: &BTreeMap<PathBuf, PathBuf>) -> Vec<FileEditCmd> {
    let dests = renames.values().collect::<BTreeSet<_>>();
    let mut phase1 = Vec::new();
    let mut phase2 = Vec::new();
    for dest in dests.iter() {
        if let Some(final_dest) = renames.get(*dest) {
            if dest.symlink_metadata().is_ok() {
                let staged = staging_path(dest);
                tracing::debug!("Staging {dest:?} through {staged:?}");
                phase1.push(FileEditCmd::move_to(*dest, &staged));
                phase2.push(FileEditCmd::move_to(staged, final_dest));
            }
        }
    }
    for (src, dest) in renames.iter() {
        if !dests.contains(src) && src.symlink_metadata().is_ok() {
            phase1.push(FileEditCmd::move_to(src, dest));
        }
    }
    phase1.extend(phase2);
    phase1
}

/// Commands that make `referrer` link to `replacement` instead of whatever each of `hrefs`
/// currently points at. The query and fragment of each href are kept.
pub fn edits_for_path_replacement(
    referrer: &Path,
    hrefs: &BTreeSet<String>,
    replacement: &Path,
) -> Result<Vec<FileEditCmd>, NotedirError> {
    let mut edits = Vec::new();
    for href in hrefs.iter() {
        let new_href = href_for(referrer, replacement, href)?;
        if new_href != *href {
            edits.push(FileEditCmd::replace_ref(referrer, href, new_href));
        }
    }
    Ok(edits)
}

/// Canonicalize every rename, drop no-op renames and refuse anything that would lose data.
fn check_renames(
    renames: &BTreeMap<PathBuf, PathBuf>,
) -> Result<BTreeMap<PathBuf, PathBuf>, NotedirError> {
    let to_move = renames
        .iter()
        .map(|(src, dest)| (canonicalize(src), canonicalize(dest)))
        .filter(|(src, dest)| src != dest)
        .collect::<BTreeMap<_, _>>();
    for (src, dest) in to_move.iter() {
        if src.symlink_metadata().is_err() {
            return Err(NotedirError::NotFound(format!(
                "Cannot move {src:?}: it does not exist"
            )));
        }
        if dest.symlink_metadata().is_ok() && !to_move.contains_key(dest) {
            return Err(NotedirError::Command(format!(
                "Cannot move {src:?} to {dest:?}: the destination already exists"
            )));
        }
    }
    Ok(to_move)
}

/// Every individual path affected by `to_move`: each source plus, for folders, everything below
/// it that the repository manages.
fn expand_moves<R: Repository>(
    repo: &R,
    to_move: &BTreeMap<PathBuf, PathBuf>,
) -> BTreeMap<PathBuf, PathBuf> {
    let mut all_moves = BTreeMap::new();
    for (src, dest) in to_move.iter() {
        all_moves.insert(src.clone(), dest.clone());
        if !src.is_dir() {
            continue;
        }
        let walker = WalkDir::new(src)
            .min_depth(1)
            .into_iter()
            .filter_entry(|entry| !repo.config().is_ignored(entry.path()));
        for entry in walker.filter_map(Result::ok) {
            if let Ok(relative) = entry.path().strip_prefix(src) {
                all_moves.insert(entry.path().to_path_buf(), dest.join(relative));
            }
        }
    }
    all_moves
}

/// Plan the edits that carry out `renames` (old path to new path, files or folders) while
/// keeping every link to and from the moved paths working.
///
/// Fails without planning anything if a source does not exist, or if a destination exists and is
/// not itself being moved away.
#[tracing::instrument(skip(repo))]
pub async fn plan<R: Repository>(
    repo: &R,
    renames: &BTreeMap<PathBuf, PathBuf>,
) -> Result<Vec<FileEditCmd>, NotedirError> {
    let to_move = check_renames(renames)?;
    let all_moves = expand_moves(repo, &to_move);
    let fields = FileInfoReq(InfoField::Path | InfoField::Refs | InfoField::Backlinks);

    // referrer -> original href -> replacement
    let mut rewrites: BTreeMap<PathBuf, BTreeMap<String, String>> = BTreeMap::new();
    for (src, dest) in all_moves.iter() {
        let info = repo.info(src, fields).await?;

        for link in info.links() {
            let Some(referent) = link.referent() else {
                continue;
            };
            let new_referent = all_moves.get(&referent).unwrap_or(&referent);
            if resolve_href(dest, &link.href).as_ref() == Some(new_referent) {
                continue;
            }
            let new_href = href_for(dest, new_referent, &link.href)?;
            if new_href != link.href {
                rewrites
                    .entry(src.clone())
                    .or_default()
                    .insert(link.href, new_href);
            }
        }

        for link in info.backlinks.iter() {
            if all_moves.contains_key(&link.referrer) {
                continue;
            }
            let hrefs = BTreeSet::from([link.href.clone()]);
            for edit in edits_for_path_replacement(&link.referrer, &hrefs, dest)? {
                if let FileEditCmd::ReplaceRef {
                    path,
                    original,
                    replacement,
                } = edit
                {
                    rewrites
                        .entry(path)
                        .or_default()
                        .insert(original, replacement);
                }
            }
        }
    }

    let mut edits = rewrites
        .into_iter()
        .flat_map(|(referrer, replacements)| {
            replacements
                .into_iter()
                .map(move |(original, replacement)| {
                    FileEditCmd::replace_ref(&referrer, original, replacement)
                })
        })
        .collect::<Vec<_>>();
    edits.extend(edits_for_raw_moves(&to_move));
    tracing::debug!(
        "Planned {} edits for {} moves ({} paths affected)",
        edits.len(),
        to_move.len(),
        all_moves.len()
    );
    Ok(edits)
}

/// `dest`, or if that name is taken, the first free `N-name` (counting from 2) in the same
/// folder.
///
/// A name is taken if it is in `unavailable`, or if anything in the folder starts with it, so
/// that companions such as `note.md.resources` are not clobbered either. Paths in `moving` are
/// about to be moved away and do not count.
pub fn find_available_name(
    dest: &Path,
    unavailable: &BTreeSet<PathBuf>,
    moving: &BTreeSet<PathBuf>,
) -> PathBuf {
    let Some(name) = dest.file_name().map(|name| name.to_string_lossy().to_string()) else {
        return dest.to_path_buf();
    };
    let parent = dest.parent().map(Path::to_path_buf).unwrap_or_default();
    let siblings = std::fs::read_dir(&parent)
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .filter(|entry| !moving.contains(&entry.path()))
                .map(|entry| entry.file_name().to_string_lossy().to_string())
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    let taken = |candidate: &str| {
        unavailable.contains(&parent.join(candidate))
            || siblings.iter().any(|sibling| sibling.starts_with(candidate))
    };
    if !taken(&name) {
        return dest.to_path_buf();
    }
    let mut counter = 2usize;
    loop {
        let candidate = format!("{counter}-{name}");
        if !taken(&candidate) {
            return parent.join(candidate);
        }
        counter += 1;
    }
}
