use std::{
    collections::BTreeSet,
    fs,
    path::{Path, PathBuf},
    sync::atomic::{AtomicBool, Ordering},
};

use crate::{
    codec::accessor_for,
    commands::FileEditCmd,
    config::RepoConfig,
    db::{self, db_init, DbConnection, StatSignature},
    error::NotedirError,
    paths::canonicalize,
    properties::{FileInfo, FileInfoReq, InfoField},
    query::FileQuery,
    repo::{apply_edits, direct::parse_file, direct::walk_paths, Repository},
};

/// Name of the cache file used when the config does not set `cache_path`. Starts with a dot so
/// the default ignore rules keep it out of the collection.
pub const DEFAULT_CACHE_FILE: &str = ".notedir-cache.sqlite";

/// What a refresh pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshStats {
    pub unchanged: usize,
    pub parsed: usize,
    /// Files that disappeared but are still linked to.
    pub downgraded: usize,
    pub deleted: usize,
    /// Phantom records that lost their last inbound link.
    pub swept: u64,
}

/// A [Repository] backed by an SQLite index of every managed file's metadata, tags and links.
///
/// The index is refreshed on open, after every [Repository::change], and before the first read
/// following [Repository::invalidate]. A refresh only re-parses files whose stat signature
/// changed.
#[derive(Debug)]
pub struct CacheRepo {
    config: RepoConfig,
    db: DbConnection,
    needs_refresh: AtomicBool,
}

impl CacheRepo {
    /// Open (or create) the cache for `config` and bring it up to date. A cache that cannot be
    /// opened or migrated is deleted and rebuilt from scratch.
    #[tracing::instrument(skip_all)]
    pub async fn open(config: RepoConfig) -> Result<CacheRepo, NotedirError> {
        let mut config = config.normalize()?;
        let cache_path = match config.cache_path.clone() {
            Some(path) => path,
            None => {
                let path = config.root_paths[0].join(DEFAULT_CACHE_FILE);
                config.cache_path = Some(path.clone());
                path
            }
        };
        match CacheRepo::open_at(config.clone(), &cache_path).await {
            Ok(repo) => Ok(repo),
            Err(e) => {
                tracing::warn!("Rebuilding unusable cache at {cache_path:?}: {e}");
                remove_cache(&cache_path)?;
                CacheRepo::open_at(config, &cache_path).await
            }
        }
    }

    async fn open_at(config: RepoConfig, cache_path: &Path) -> Result<CacheRepo, NotedirError> {
        if let Some(parent) = cache_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let repo = CacheRepo {
            config,
            db: DbConnection(db_init(cache_path).await?),
            needs_refresh: AtomicBool::new(true),
        };
        if let Err(e) = repo.refresh().await {
            repo.db.0.close().await;
            return Err(e);
        }
        Ok(repo)
    }

    pub fn db(&self) -> &DbConnection {
        &self.db
    }

    /// Bring the index in line with the filesystem in a single transaction.
    #[tracing::instrument(skip(self))]
    pub async fn refresh(&self) -> Result<RefreshStats, NotedirError> {
        let mut stats = RefreshStats::default();
        let mut tx = self.db.0.begin().await?;
        let known = db::known_files(&mut tx).await?;
        let mut visited = BTreeSet::new();

        for path in walk_paths(&self.config) {
            let signature = match StatSignature::of(&path) {
                Ok(signature) => signature,
                Err(e) => {
                    tracing::warn!("Could not stat {path:?}, treating it as gone: {e}");
                    continue;
                }
            };
            let previous = known.get(&path);
            visited.insert(path.clone());
            if previous.is_some_and(|file| file.existent && file.signature == Some(signature)) {
                stats.unchanged += 1;
                continue;
            }
            let id = match previous {
                Some(file) => file.id,
                None => db::file_id(&mut tx, &path).await?,
            };
            let info = if self.config.is_skip_parse(&path) {
                None
            } else {
                match accessor_for(&path).parse(&path) {
                    Ok(info) => Some(info),
                    Err(e) => {
                        tracing::warn!("{e}");
                        None
                    }
                }
            };
            tracing::debug!("Indexing {path:?}");
            db::store_file(&mut tx, id, signature, info.as_ref()).await?;
            stats.parsed += 1;
        }

        for (path, file) in known.iter().filter(|(path, _)| !visited.contains(*path)) {
            if db::forget_file(&mut tx, file.id).await? {
                if file.existent {
                    tracing::debug!("{path:?} is gone but still linked to");
                    stats.downgraded += 1;
                }
            } else {
                tracing::debug!("Dropping {path:?} from the index");
                stats.deleted += 1;
            }
        }
        stats.swept = db::sweep_phantoms(&mut tx).await?;
        tx.commit().await?;
        self.needs_refresh.store(false, Ordering::SeqCst);
        tracing::info!(
            "Cache refreshed: {} unchanged, {} parsed, {} downgraded, {} deleted, {} swept",
            stats.unchanged,
            stats.parsed,
            stats.downgraded,
            stats.deleted,
            stats.swept
        );
        Ok(stats)
    }

    async fn ensure_fresh(&self) -> Result<(), NotedirError> {
        if self.needs_refresh.load(Ordering::SeqCst) {
            self.refresh().await?;
        }
        Ok(())
    }
}

/// Delete the cache database and any SQLite sidecar files.
fn remove_cache(cache_path: &Path) -> Result<(), NotedirError> {
    for suffix in ["", "-wal", "-shm", "-journal"] {
        let mut name = cache_path.as_os_str().to_owned();
        name.push(suffix);
        let path = PathBuf::from(name);
        if path.exists() {
            fs::remove_file(&path)?;
        }
    }
    Ok(())
}

impl Repository for CacheRepo {
    fn config(&self) -> &RepoConfig {
        &self.config
    }

    #[tracing::instrument(skip(self))]
    async fn info(&self, path: &Path, fields: FileInfoReq) -> Result<FileInfo, NotedirError> {
        self.ensure_fresh().await?;
        let path = canonicalize(path);
        let mut info = if !self.config.is_managed(&path) {
            if fields.needs_parse() {
                parse_file(&self.config, &path)
            } else {
                FileInfo::new(&path)
            }
        } else {
            match self.db.file_record(&path).await? {
                Some(record) => {
                    let mut info = record.to_info();
                    if fields.contains(InfoField::Tags) {
                        info.tags = self.db.tags_of(record.id).await?;
                    }
                    if fields.contains(InfoField::Refs) {
                        info.refs = self.db.refs_of(record.id).await?;
                    }
                    info
                }
                None => FileInfo::new(&path),
            }
        };
        if fields.contains(InfoField::Backlinks) {
            info.backlinks = self.db.backlinks_of(&path).await?;
        }
        Ok(info.restrict(&fields))
    }

    #[tracing::instrument(skip_all, fields(edits = edits.len()))]
    async fn change(&self, edits: &[FileEditCmd]) -> Result<(), NotedirError> {
        let result = apply_edits(edits, &self.config().root_paths);
        self.invalidate();
        self.refresh().await?;
        result
    }

    #[tracing::instrument(skip(self))]
    async fn query(
        &self,
        query: &FileQuery,
        fields: FileInfoReq,
    ) -> Result<Vec<FileInfo>, NotedirError> {
        self.ensure_fresh().await?;
        let load_fields = FileInfoReq(fields.0 | query.required_fields().0);
        let mut tags = if load_fields.contains(InfoField::Tags) {
            self.db.all_tags().await?
        } else {
            Default::default()
        };
        let mut refs = if load_fields.contains(InfoField::Refs) {
            self.db.all_refs().await?
        } else {
            Default::default()
        };
        let mut backlinks = if load_fields.contains(InfoField::Backlinks) {
            self.db.all_backlinks().await?
        } else {
            Default::default()
        };
        let mut infos = self
            .db
            .query_files(query)
            .await?
            .into_iter()
            .map(|record| {
                let mut info = record.to_info();
                info.tags = tags.remove(&record.id).unwrap_or_default();
                info.refs = refs.remove(&record.id).unwrap_or_default();
                info.backlinks = backlinks.remove(&record.id).unwrap_or_default();
                info
            })
            .collect::<Vec<_>>();
        infos.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(query
            .apply_sorting(infos)
            .into_iter()
            .map(|info| info.restrict(&fields))
            .collect())
    }

    fn invalidate(&self) {
        self.needs_refresh.store(true, Ordering::SeqCst);
    }

    async fn close(&self) -> Result<(), NotedirError> {
        self.db.0.close().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::helpers::{init_logging, write_notes};
    use tempfile::tempdir;
    use test_log::test;

    #[test(tokio::test)]
    async fn test_default_cache_location_is_ignored() {
        init_logging();
        let dir = tempdir().unwrap();
        write_notes(dir.path(), &[("a.md", "#one")]);
        let repo = CacheRepo::open(RepoConfig::new([dir.path()])).await.unwrap();
        let root = canonicalize(dir.path());
        assert_eq!(
            repo.config().cache_path.as_deref(),
            Some(root.join(DEFAULT_CACHE_FILE).as_path())
        );
        assert!(root.join(DEFAULT_CACHE_FILE).exists());

        let all = repo
            .query(&FileQuery::default(), FileInfoReq::path_only())
            .await
            .unwrap();
        assert_eq!(all, vec![FileInfo::new(root.join("a.md"))]);
        repo.close().await.unwrap();
    }

    #[test(tokio::test)]
    async fn test_refresh_skips_unchanged() {
        let dir = tempdir().unwrap();
        write_notes(dir.path(), &[("a.md", "[b](b.md)"), ("b.md", "#b")]);
        let repo = CacheRepo::open(RepoConfig::new([dir.path()])).await.unwrap();
        let stats = repo.refresh().await.unwrap();
        assert_eq!(stats.unchanged, 2);
        assert_eq!(stats.parsed, 0);
        repo.close().await.unwrap();
    }

    #[test(tokio::test)]
    async fn test_change_refreshes() {
        let dir = tempdir().unwrap();
        write_notes(dir.path(), &[("a.md", "plain")]);
        let root = canonicalize(dir.path());
        let repo = CacheRepo::open(RepoConfig::new([dir.path()])).await.unwrap();
        repo.add_tag(&root.join("a.md"), "Fresh").await.unwrap();
        let info = repo
            .info(&root.join("a.md"), FileInfoReq::internal())
            .await
            .unwrap();
        assert!(info.tags.contains("fresh"));
        repo.close().await.unwrap();
    }
}
