//! The main entry point for working with a collection of notes programmatically.
use std::{
    collections::{BTreeMap, BTreeSet},
    path::{Path, PathBuf},
};

use crate::{
    commands::FileEditCmd,
    error::NotedirError,
    paths::canonicalize,
    properties::{FileInfo, FileInfoReq, InfoField, NaiveDateTime},
    query::FileQuery,
    rearrange::{edits_for_path_replacement, find_available_name, plan},
    repo::Repository,
};

/// How [Notedir::move_paths] treats destinations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MoveOptions {
    /// A destination that is an existing folder receives the source under its own file name.
    pub into_dirs: bool,
    /// Pick a free `N-name` instead of a destination that is already taken.
    pub check_exists: bool,
    /// Create missing folders on the way to each destination.
    pub create_parents: bool,
    /// Remove folders that the moves leave empty, up to but not including a root or the working
    /// directory.
    pub delete_empty_parents: bool,
}

impl Default for MoveOptions {
    fn default() -> Self {
        MoveOptions {
            into_dirs: true,
            check_exists: true,
            create_parents: true,
            delete_empty_parents: false,
        }
    }
}

impl MoveOptions {
    /// Carry these options over to every move in `edits`.
    fn apply_to(&self, edits: &mut [FileEditCmd]) {
        for edit in edits.iter_mut() {
            if let FileEditCmd::Move {
                create_parents,
                delete_empty_parents,
                ..
            } = edit
            {
                *create_parents = self.create_parents;
                *delete_empty_parents = self.delete_empty_parents;
            }
        }
    }
}

/// Metadata changes applied to every path passed to [Notedir::change].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataChange {
    pub add_tags: BTreeSet<String>,
    pub del_tags: BTreeSet<String>,
    pub title: Option<String>,
    pub created: Option<NaiveDateTime>,
}

impl MetadataChange {
    pub fn is_empty(&self) -> bool {
        self.add_tags.is_empty()
            && self.del_tags.is_empty()
            && self.title.is_none()
            && self.created.is_none()
    }

    fn edits_for(&self, path: &Path) -> Vec<FileEditCmd> {
        let mut edits = Vec::new();
        for tag in self.add_tags.iter() {
            edits.push(FileEditCmd::AddTag {
                path: path.to_path_buf(),
                value: tag.to_lowercase(),
            });
        }
        for tag in self.del_tags.iter() {
            edits.push(FileEditCmd::DelTag {
                path: path.to_path_buf(),
                value: tag.to_lowercase(),
            });
        }
        if let Some(title) = self.title.as_ref() {
            edits.push(FileEditCmd::SetTitle {
                path: path.to_path_buf(),
                value: Some(title.clone()),
            });
        }
        if let Some(created) = self.created {
            edits.push(FileEditCmd::SetCreated {
                path: path.to_path_buf(),
                value: Some(created),
            });
        }
        edits
    }
}

/// High-level operations on top of any [Repository].
///
/// ```rust,no_run
/// # use notedir::{api::Notedir, config::RepoConfig, repo::{DirectRepo, Repository}, properties::FileInfoReq};
/// # async fn run() -> Result<(), notedir::NotedirError> {
/// // Tag every journal entry as personal
/// let notedir = Notedir::new(DirectRepo::new(RepoConfig::new(["./notes"]))?);
/// let query = "tag:journal".parse()?;
/// let paths = notedir
///     .repo()
///     .query(&query, FileInfoReq::path_only())
///     .await?
///     .into_iter()
///     .map(|info| info.path)
///     .collect();
/// let change = notedir::api::MetadataChange {
///     add_tags: ["personal".to_string()].into(),
///     ..Default::default()
/// };
/// notedir.change(&paths, &change).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Notedir<R: Repository> {
    repo: R,
}

impl<R: Repository> Notedir<R> {
    pub fn new(repo: R) -> Notedir<R> {
        Notedir { repo }
    }

    pub fn repo(&self) -> &R {
        &self.repo
    }

    pub fn into_repo(self) -> R {
        self.repo
    }

    /// Point every link to `original` at `replacement` instead. Nothing is moved, and neither path
    /// has to exist. Links to paths below `original` are not touched. Returns the edits made.
    #[tracing::instrument(skip(self))]
    pub async fn replace_path_hrefs(
        &self,
        original: &Path,
        replacement: &Path,
    ) -> Result<Vec<FileEditCmd>, NotedirError> {
        let info = self
            .repo
            .info(original, FileInfoReq(InfoField::Path | InfoField::Backlinks))
            .await?;
        let mut by_referrer: BTreeMap<PathBuf, BTreeSet<String>> = BTreeMap::new();
        for link in info.backlinks {
            by_referrer.entry(link.referrer).or_default().insert(link.href);
        }
        let replacement = canonicalize(replacement);
        let mut edits = Vec::new();
        for (referrer, hrefs) in by_referrer.iter() {
            edits.extend(edits_for_path_replacement(referrer, hrefs, &replacement)?);
        }
        if !edits.is_empty() {
            self.repo.change(&edits).await?;
        }
        Ok(edits)
    }

    /// Move files and folders (keys) to new locations (values), updating links to and from them.
    ///
    /// Returns the final destination of each source, which may differ from the requested one
    /// depending on `options`. A path may be both a source and another source's destination, so
    /// `{a: b, b: a}` swaps two files.
    #[tracing::instrument(skip(self))]
    pub async fn move_paths(
        &self,
        moves: &BTreeMap<PathBuf, PathBuf>,
        options: MoveOptions,
    ) -> Result<BTreeMap<PathBuf, PathBuf>, NotedirError> {
        let moves = moves
            .iter()
            .map(|(src, dest)| (canonicalize(src), canonicalize(dest)))
            .filter(|(src, dest)| src != dest)
            .collect::<BTreeMap<_, _>>();
        if moves.is_empty() {
            return Ok(BTreeMap::new());
        }
        let moving = moves.keys().cloned().collect::<BTreeSet<_>>();

        let mut final_moves = BTreeMap::new();
        let mut unavailable = BTreeSet::new();
        for (src, dest) in moves.iter() {
            if src.symlink_metadata().is_err() {
                return Err(NotedirError::NotFound(format!(
                    "File does not exist: {src:?}"
                )));
            }
            let mut dest = dest.clone();
            if options.into_dirs && dest.is_dir() {
                if let Some(name) = src.file_name() {
                    dest = dest.join(name);
                }
            }
            if options.check_exists {
                dest = find_available_name(&dest, &unavailable, &moving);
            }
            unavailable.insert(dest.clone());
            final_moves.insert(src.clone(), dest);
        }

        let mut edits = plan(&self.repo, &final_moves).await?;
        options.apply_to(&mut edits);
        self.repo.change(&edits).await?;
        Ok(final_moves)
    }

    /// Move every file to wherever `organizer` says it belongs, updating links as
    /// [Notedir::move_paths] does. Folders are never passed to `organizer`; moving all of a
    /// folder's files elsewhere empties it, and emptied folders are removed.
    ///
    /// `organizer` receives the full [FileInfo] of each file. A destination that is taken gets a
    /// free `N-name` instead. Returns the moves made.
    #[tracing::instrument(skip(self, organizer))]
    pub async fn organize<F>(
        &self,
        organizer: F,
    ) -> Result<BTreeMap<PathBuf, PathBuf>, NotedirError>
    where
        F: Fn(&FileInfo) -> PathBuf,
    {
        let infos = self
            .repo
            .query(&FileQuery::default(), FileInfoReq::full())
            .await?;
        let mut moves = BTreeMap::new();
        let mut unavailable = BTreeSet::new();
        for info in infos.iter().filter(|info| info.path.is_file()) {
            let dest = canonicalize(organizer(info));
            if dest == info.path {
                continue;
            }
            let itself = BTreeSet::from([info.path.clone()]);
            let dest = find_available_name(&dest, &unavailable, &itself);
            unavailable.insert(dest.clone());
            moves.insert(info.path.clone(), dest);
        }
        if moves.is_empty() {
            return Ok(moves);
        }
        tracing::info!("Organizing {} file(s)", moves.len());

        let mut edits = plan(&self.repo, &moves).await?;
        let options = MoveOptions {
            create_parents: true,
            delete_empty_parents: true,
            ..Default::default()
        };
        options.apply_to(&mut edits);
        self.repo.change(&edits).await?;
        Ok(moves)
    }

    /// Move each of `sources` to `dest`, which is usually a folder. See [Notedir::move_paths].
    pub async fn move_into(
        &self,
        sources: &[PathBuf],
        dest: &Path,
        options: MoveOptions,
    ) -> Result<BTreeMap<PathBuf, PathBuf>, NotedirError> {
        let moves = sources
            .iter()
            .map(|src| (src.clone(), dest.to_path_buf()))
            .collect();
        self.move_paths(&moves, options).await
    }

    /// Apply the same metadata change to each of `paths`.
    #[tracing::instrument(skip(self))]
    pub async fn change(
        &self,
        paths: &BTreeSet<PathBuf>,
        change: &MetadataChange,
    ) -> Result<(), NotedirError> {
        let edits = paths
            .iter()
            .flat_map(|path| change.edits_for(path))
            .collect::<Vec<_>>();
        if edits.is_empty() {
            return Ok(());
        }
        self.repo.change(&edits).await
    }

    /// Release the repository's resources.
    pub async fn close(&self) -> Result<(), NotedirError> {
        self.repo.close().await
    }
}
