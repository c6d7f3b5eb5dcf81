use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};
use walkdir::WalkDir;

use crate::{
    codec::accessor_for,
    commands::FileEditCmd,
    config::RepoConfig,
    error::NotedirError,
    paths::{canonicalize, resolve_href},
    properties::{FileInfo, FileInfoReq, InfoField, LinkInfo},
    query::FileQuery,
    repo::{apply_edits, Repository},
};

/// Every managed file below `config`'s roots, in walk order. Ignored files and folders are
/// pruned from the walk.
pub fn walk_paths(config: &RepoConfig) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    for root in config.root_paths.iter() {
        let walker = WalkDir::new(root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| entry.path() == root || !config.is_ignored(entry.path()));
        for entry in walker {
            match entry {
                Ok(entry) if entry.path().is_file() => paths.push(entry.into_path()),
                Ok(_) => {}
                Err(e) => tracing::warn!("Skipping unreadable entry below {root:?}: {e}"),
            }
        }
    }
    paths
}

/// Parse `path` without backlinks. Never fails: problems are logged and produce an info with
/// only the path set.
pub(crate) fn parse_file(config: &RepoConfig, path: &Path) -> FileInfo {
    if !path.is_file() || config.is_ignored(path) || config.is_skip_parse(path) {
        return FileInfo::new(path);
    }
    match accessor_for(path).parse(path) {
        Ok(info) => info,
        Err(e) => {
            tracing::warn!("{e}");
            FileInfo::new(path)
        }
    }
}

/// Reads straight from the filesystem on every call. Simple and always fresh, but backlinks and
/// queries parse every file in the collection.
#[derive(Debug, Clone)]
pub struct DirectRepo {
    config: RepoConfig,
}

impl DirectRepo {
    pub fn new(config: RepoConfig) -> Result<DirectRepo, NotedirError> {
        Ok(DirectRepo {
            config: config.normalize()?,
        })
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        walk_paths(&self.config)
    }

    fn parse(&self, path: &Path) -> FileInfo {
        parse_file(&self.config, path)
    }

    /// All links in the collection, grouped by the path they resolve to.
    fn links_by_referent(&self) -> BTreeMap<PathBuf, Vec<LinkInfo>> {
        let mut by_referent: BTreeMap<PathBuf, Vec<LinkInfo>> = BTreeMap::new();
        for path in self.paths() {
            let info = self.parse(&path);
            for link in info.links() {
                if let Some(referent) = resolve_href(&link.referrer, &link.href) {
                    by_referent.entry(referent).or_default().push(link);
                }
            }
        }
        for links in by_referent.values_mut() {
            links.sort();
        }
        by_referent
    }

    fn load(&self, path: &Path, fields: &FileInfoReq) -> FileInfo {
        if fields.needs_parse() {
            self.parse(path)
        } else {
            FileInfo::new(path)
        }
    }
}

impl Repository for DirectRepo {
    fn config(&self) -> &RepoConfig {
        &self.config
    }

    #[tracing::instrument(skip(self))]
    async fn info(&self, path: &Path, fields: FileInfoReq) -> Result<FileInfo, NotedirError> {
        let path = canonicalize(path);
        let mut info = self.load(&path, &fields);
        if fields.contains(InfoField::Backlinks) {
            info.backlinks = self
                .links_by_referent()
                .remove(&path)
                .unwrap_or_default();
        }
        Ok(info.restrict(&fields))
    }

    #[tracing::instrument(skip_all, fields(edits = edits.len()))]
    async fn change(&self, edits: &[FileEditCmd]) -> Result<(), NotedirError> {
        apply_edits(edits, &self.config().root_paths)
    }

    #[tracing::instrument(skip(self))]
    async fn query(
        &self,
        query: &FileQuery,
        fields: FileInfoReq,
    ) -> Result<Vec<FileInfo>, NotedirError> {
        let load_fields = FileInfoReq(fields.0 | query.required_fields().0);
        let mut backlinks = if load_fields.contains(InfoField::Backlinks) {
            self.links_by_referent()
        } else {
            BTreeMap::new()
        };
        let mut paths = self.paths();
        paths.sort();
        let infos = paths.iter().map(|path| {
            let mut info = self.load(path, &load_fields);
            info.backlinks = backlinks.remove(path).unwrap_or_default();
            info
        });
        let filtered = query.apply_filtering(infos);
        Ok(query
            .apply_sorting(filtered)
            .into_iter()
            .map(|info| info.restrict(&fields))
            .collect())
    }
}
