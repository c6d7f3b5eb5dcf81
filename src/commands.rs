use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Formatter},
    path::{Path, PathBuf},
};

use crate::properties::{NaiveDateTime, CREATED_FORMAT};

/// A request to change one file (or, for [FileEditCmd::Move], one file or folder).
///
/// Edits are grouped per target path before being handed to a document accessor, so a batch
/// given to an accessor always targets a single path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileEditCmd {
    /// Replace every exact occurrence of the href `original` with `replacement`.
    ReplaceRef {
        path: PathBuf,
        original: String,
        replacement: String,
    },
    /// Set the document title, or delete it with `None`.
    SetTitle {
        path: PathBuf,
        value: Option<String>,
    },
    /// Set the creation date stored in the document metadata (not the filesystem), or delete it
    /// with `None`.
    SetCreated {
        path: PathBuf,
        value: Option<NaiveDateTime>,
    },
    AddTag {
        path: PathBuf,
        value: String,
    },
    DelTag {
        path: PathBuf,
        value: String,
    },
    /// Rename a file or folder. Handled by the filesystem directly, never by an accessor.
    Move {
        path: PathBuf,
        dest: PathBuf,
        /// Create missing folders above `dest`.
        create_parents: bool,
        /// Afterwards, remove folders above `path` that the move left empty, up to but not
        /// including a repository root or the working directory.
        #[serde(default)]
        delete_empty_parents: bool,
    },
    /// Create a new file. Fails if something already exists at `path`.
    Create { path: PathBuf, contents: String },
}

impl FileEditCmd {
    /// The file this edit targets.
    pub fn path(&self) -> &Path {
        match self {
            FileEditCmd::ReplaceRef { path, .. }
            | FileEditCmd::SetTitle { path, .. }
            | FileEditCmd::SetCreated { path, .. }
            | FileEditCmd::AddTag { path, .. }
            | FileEditCmd::DelTag { path, .. }
            | FileEditCmd::Move { path, .. }
            | FileEditCmd::Create { path, .. } => path,
        }
    }

    /// Move and Create go straight to the filesystem.
    pub fn is_filesystem_op(&self) -> bool {
        matches!(self, FileEditCmd::Move { .. } | FileEditCmd::Create { .. })
    }

    pub fn replace_ref<P: Into<PathBuf>, S: Into<String>, R: Into<String>>(
        path: P,
        original: S,
        replacement: R,
    ) -> FileEditCmd {
        FileEditCmd::ReplaceRef {
            path: path.into(),
            original: original.into(),
            replacement: replacement.into(),
        }
    }

    /// A move that creates missing parent folders and leaves emptied folders in place.
    pub fn move_to<P: Into<PathBuf>, D: Into<PathBuf>>(path: P, dest: D) -> FileEditCmd {
        FileEditCmd::Move {
            path: path.into(),
            dest: dest.into(),
            create_parents: true,
            delete_empty_parents: false,
        }
    }
}

impl Display for FileEditCmd {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            FileEditCmd::ReplaceRef {
                path,
                original,
                replacement,
            } => write!(
                f,
                "ReplaceRef({}: {} -> {})",
                path.display(),
                original,
                replacement
            ),
            FileEditCmd::SetTitle { path, value } => write!(
                f,
                "SetTitle({}: {})",
                path.display(),
                value.as_deref().unwrap_or("<none>")
            ),
            FileEditCmd::SetCreated { path, value } => write!(
                f,
                "SetCreated({}: {})",
                path.display(),
                value
                    .map(|c| c.format(CREATED_FORMAT).to_string())
                    .unwrap_or_else(|| "<none>".to_string())
            ),
            FileEditCmd::AddTag { path, value } => {
                write!(f, "AddTag({}: {})", path.display(), value)
            }
            FileEditCmd::DelTag { path, value } => {
                write!(f, "DelTag({}: {})", path.display(), value)
            }
            FileEditCmd::Move { path, dest, .. } => {
                write!(f, "Move({} -> {})", path.display(), dest.display())
            }
            FileEditCmd::Create { path, contents } => {
                write!(f, "Create({}, {} bytes)", path.display(), contents.len())
            }
        }
    }
}
