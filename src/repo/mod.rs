//! Query and mutation over a whole collection of notes.
//!
//! [`Repository`] is the contract shared by the full-rescan [`DirectRepo`] and the incrementally
//! cached [`CacheRepo`]. Both must answer every read identically for the same files on disk.
use std::{
    collections::BTreeMap,
    fs::{self, OpenOptions},
    future::Future,
    io::Write,
    path::{Path, PathBuf},
};

use crate::{
    codec::accessor_for,
    commands::FileEditCmd,
    error::NotedirError,
    paths::canonicalize,
    properties::{FileInfo, FileInfoReq, NaiveDateTime},
    query::FileQuery,
};

#[cfg(feature = "cache")]
pub mod cache;
pub mod direct;

#[cfg(feature = "cache")]
pub use cache::CacheRepo;
pub use direct::DirectRepo;

pub trait Repository: Sync {
    fn config(&self) -> &crate::config::RepoConfig;

    /// Everything requested about `path`. Always returns a value: for a missing, ignored or
    /// unparseable path only [FileInfo::path] (and backlinks, when requested) are filled in.
    fn info(
        &self,
        path: &Path,
        fields: FileInfoReq,
    ) -> impl Future<Output = Result<FileInfo, NotedirError>> + Send;

    /// Apply `edits` in order. Consecutive edits for the same path are handed to the path's
    /// accessor as a single batch.
    fn change(&self, edits: &[FileEditCmd])
        -> impl Future<Output = Result<(), NotedirError>> + Send;

    /// All managed files matching `query`, ordered by path and then by the query's sort keys.
    fn query(
        &self,
        query: &FileQuery,
        fields: FileInfoReq,
    ) -> impl Future<Output = Result<Vec<FileInfo>, NotedirError>> + Send;

    /// How many of the files matching `query` carry each tag.
    fn tag_counts(
        &self,
        query: &FileQuery,
    ) -> impl Future<Output = Result<BTreeMap<String, usize>, NotedirError>> + Send {
        async move {
            let mut fields = query.required_fields();
            fields.insert(crate::properties::InfoField::Tags);
            let mut counts = BTreeMap::new();
            for info in self.query(query, fields).await? {
                for tag in info.tags {
                    *counts.entry(tag).or_insert(0usize) += 1;
                }
            }
            Ok(counts)
        }
    }

    /// Request that any cached state be refreshed before the next read.
    fn invalidate(&self) {}

    /// Release held resources. The repository should not be used afterwards.
    fn close(&self) -> impl Future<Output = Result<(), NotedirError>> + Send {
        async { Ok(()) }
    }

    fn add_tag(
        &self,
        path: &Path,
        tag: &str,
    ) -> impl Future<Output = Result<(), NotedirError>> + Send {
        let edit = FileEditCmd::AddTag {
            path: path.to_path_buf(),
            value: tag.to_string(),
        };
        async move { self.change(&[edit]).await }
    }

    fn del_tag(
        &self,
        path: &Path,
        tag: &str,
    ) -> impl Future<Output = Result<(), NotedirError>> + Send {
        let edit = FileEditCmd::DelTag {
            path: path.to_path_buf(),
            value: tag.to_string(),
        };
        async move { self.change(&[edit]).await }
    }

    fn set_title(
        &self,
        path: &Path,
        title: Option<&str>,
    ) -> impl Future<Output = Result<(), NotedirError>> + Send {
        let edit = FileEditCmd::SetTitle {
            path: path.to_path_buf(),
            value: title.map(str::to_string),
        };
        async move { self.change(&[edit]).await }
    }

    fn set_created(
        &self,
        path: &Path,
        created: Option<NaiveDateTime>,
    ) -> impl Future<Output = Result<(), NotedirError>> + Send {
        let edit = FileEditCmd::SetCreated {
            path: path.to_path_buf(),
            value: created,
        };
        async move { self.change(&[edit]).await }
    }

    fn replace_ref(
        &self,
        path: &Path,
        original: &str,
        replacement: &str,
    ) -> impl Future<Output = Result<(), NotedirError>> + Send {
        let edit = FileEditCmd::replace_ref(path, original, replacement);
        async move { self.change(&[edit]).await }
    }
}

/// Split `edits` into runs of consecutive edits that share a target path. Filesystem operations
/// always form a run of their own.
pub fn group_edits(edits: &[FileEditCmd]) -> Vec<&[FileEditCmd]> {
    let mut groups = Vec::new();
    let mut start = 0;
    for idx in 1..=edits.len() {
        let split = idx == edits.len()
            || edits[idx].is_filesystem_op()
            || edits[idx - 1].is_filesystem_op()
            || edits[idx].path() != edits[idx - 1].path();
        if split {
            if start < idx {
                groups.push(&edits[start..idx]);
            }
            start = idx;
        }
    }
    groups
}

/// Carry out `edits` against the filesystem, in order. Stops at the first failure; earlier
/// batches are not rolled back. Folders in `roots` are never removed as empty parents.
pub fn apply_edits(edits: &[FileEditCmd], roots: &[PathBuf]) -> Result<(), NotedirError> {
    for group in group_edits(edits) {
        match group {
            [FileEditCmd::Move {
                path,
                dest,
                create_parents,
                delete_empty_parents,
            }] => {
                if *create_parents {
                    if let Some(parent) = dest.parent() {
                        fs::create_dir_all(parent)?;
                    }
                }
                tracing::debug!("Moving {path:?} to {dest:?}");
                fs::rename(path, dest)?;
                if *delete_empty_parents {
                    remove_empty_parents(path, roots)?;
                }
            }
            [FileEditCmd::Create { path, contents }] => {
                tracing::debug!("Creating {path:?}");
                let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
                file.write_all(contents.as_bytes())?;
            }
            batch => {
                let path = batch[0].path();
                let changed = accessor_for(path).apply(batch)?;
                tracing::debug!(
                    "Applied {} edit(s) to {path:?}, changed: {changed}",
                    batch.len()
                );
            }
        }
    }
    Ok(())
}

/// Remove the folders above `moved` that are empty, stopping at the first one that is not empty,
/// is the working directory, or is not strictly inside one of `roots`.
fn remove_empty_parents(moved: &Path, roots: &[PathBuf]) -> Result<(), NotedirError> {
    let cwd = std::env::current_dir().ok().map(|dir| canonicalize(&dir));
    let mut folder = moved.parent();
    while let Some(current) = folder {
        let inside_root = roots
            .iter()
            .any(|root| current.starts_with(root) && current != root.as_path());
        if !inside_root || cwd.as_deref() == Some(current) {
            break;
        }
        if fs::read_dir(current)?.next().is_some() {
            break;
        }
        tracing::debug!("Removing empty folder {current:?}");
        fs::remove_dir(current)?;
        folder = current.parent();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::tempdir;
    use test_log::test;

    #[test]
    fn test_group_edits() {
        let a = PathBuf::from("/notes/a.md");
        let b = PathBuf::from("/notes/b.md");
        let edits = vec![
            FileEditCmd::replace_ref(&a, "x", "y"),
            FileEditCmd::replace_ref(&a, "z", "w"),
            FileEditCmd::replace_ref(&b, "x", "y"),
            FileEditCmd::move_to(&b, "/notes/c.md"),
            FileEditCmd::move_to(&a, "/notes/d.md"),
            FileEditCmd::replace_ref(&a, "x", "y"),
        ];
        let sizes = group_edits(&edits)
            .iter()
            .map(|group| group.len())
            .collect::<Vec<_>>();
        assert_eq!(sizes, vec![2, 1, 1, 1, 1]);
        assert!(group_edits(&[]).is_empty());
    }

    #[test]
    fn test_apply_edits_filesystem_ops() {
        let dir = tempdir().unwrap();
        let note = dir.path().join("note.md");
        let edits = vec![
            FileEditCmd::Create {
                path: note.clone(),
                contents: "[other](other.md)".to_string(),
            },
            FileEditCmd::replace_ref(&note, "other.md", "sub/other.md"),
            FileEditCmd::move_to(&note, dir.path().join("new/folder/note.md")),
        ];
        apply_edits(&edits, &[]).unwrap();
        assert!(!note.exists());
        assert_eq!(
            fs::read_to_string(dir.path().join("new/folder/note.md")).unwrap(),
            "[other](sub/other.md)"
        );
    }

    #[test]
    fn test_move_parent_folders() {
        let dir = tempdir().unwrap();
        let root = canonicalize(dir.path());
        let note = root.join("a/b/note.md");
        fs::create_dir_all(root.join("a/b")).unwrap();
        fs::write(&note, "note").unwrap();

        let without_parents = FileEditCmd::Move {
            path: note.clone(),
            dest: root.join("missing/note.md"),
            create_parents: false,
            delete_empty_parents: false,
        };
        assert!(apply_edits(&[without_parents], &[root.clone()]).is_err());
        assert!(note.exists());

        let cleanup = FileEditCmd::Move {
            path: note.clone(),
            dest: root.join("note.md"),
            create_parents: false,
            delete_empty_parents: true,
        };
        apply_edits(&[cleanup], &[root.clone()]).unwrap();
        assert!(root.join("note.md").exists());
        assert!(!root.join("a").exists());
        assert!(root.exists());

        // Outside every root nothing is removed.
        fs::create_dir_all(root.join("c/d")).unwrap();
        fs::write(root.join("c/d/other.md"), "other").unwrap();
        let outside = FileEditCmd::Move {
            path: root.join("c/d/other.md"),
            dest: root.join("other.md"),
            create_parents: false,
            delete_empty_parents: true,
        };
        apply_edits(&[outside], &[root.join("elsewhere")]).unwrap();
        assert!(root.join("c/d").is_dir());
    }

    #[test]
    fn test_create_refuses_to_overwrite() {
        let dir = tempdir().unwrap();
        let note = dir.path().join("note.md");
        fs::write(&note, "original").unwrap();
        let result = apply_edits(&[FileEditCmd::Create {
            path: note.clone(),
            contents: "replacement".to_string(),
        }], &[]);
        assert!(result.is_err());
        assert_eq!(fs::read_to_string(&note).unwrap(), "original");
    }
}
