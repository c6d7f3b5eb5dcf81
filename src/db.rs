use futures_core::future::BoxFuture;
use sqlx::{
    error::BoxDynError,
    migrate::{MigrateDatabase, Migration as SqlxMigration, MigrationSource, Migrator},
    sqlite::{Sqlite, SqliteConnectOptions, SqliteConnection},
    ConnectOptions, Pool, QueryBuilder, Row,
};
use sqlx::{migrate::MigrationType, FromRow};
use std::{
    collections::{BTreeMap, BTreeSet},
    fs::{self, Metadata},
    path::{Path, PathBuf},
    result::Result,
    str::FromStr,
};

use crate::{
    error::NotedirError,
    paths::{os_path_to_string, resolve_href},
    properties::{FileInfo, LinkInfo, NaiveDateTime},
    query::FileQuery,
};

/// Storage format for created timestamps. Keeps sub-second precision.
const DB_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// The (ctime, mtime, size) triple used to decide whether a file must be parsed again. Times are
/// in nanoseconds since the epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatSignature {
    pub ctime: i64,
    pub mtime: i64,
    pub size: i64,
}

impl StatSignature {
    pub fn of(path: &Path) -> Result<StatSignature, NotedirError> {
        let metadata = fs::metadata(path)?;
        Ok(StatSignature::from_metadata(&metadata))
    }

    #[cfg(unix)]
    fn from_metadata(metadata: &Metadata) -> StatSignature {
        use std::os::unix::fs::MetadataExt;
        let nanos = |secs: i64, nsecs: i64| secs.saturating_mul(1_000_000_000).saturating_add(nsecs);
        StatSignature {
            ctime: nanos(metadata.ctime(), metadata.ctime_nsec()),
            mtime: nanos(metadata.mtime(), metadata.mtime_nsec()),
            size: metadata.size() as i64,
        }
    }

    #[cfg(not(unix))]
    fn from_metadata(metadata: &Metadata) -> StatSignature {
        let nanos = |time: std::io::Result<std::time::SystemTime>| {
            time.ok()
                .and_then(|t| t.duration_since(std::time::SystemTime::UNIX_EPOCH).ok())
                .map(|d| d.as_nanos() as i64)
                .unwrap_or_default()
        };
        let mtime = nanos(metadata.modified());
        StatSignature {
            ctime: nanos(metadata.created()).max(mtime),
            mtime,
            size: metadata.len() as i64,
        }
    }
}

/// What the cache remembers about a path between refreshes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnownFile {
    pub id: i64,
    pub existent: bool,
    pub signature: Option<StatSignature>,
}

#[derive(Debug, Clone, FromRow)]
pub struct FileRecord {
    pub id: i64,
    pub path: String,
    pub title: Option<String>,
    pub created: Option<String>,
}

impl FileRecord {
    /// The record as a [FileInfo] without tags, refs or backlinks.
    pub fn to_info(&self) -> FileInfo {
        let mut info = FileInfo::new(&self.path);
        info.title = self.title.clone();
        info.created = self.created.as_deref().and_then(|created| {
            NaiveDateTime::parse_from_str(created, DB_TIME_FORMAT)
                .map_err(|e| tracing::warn!("Bad created value {created:?} in cache: {e}"))
                .ok()
        });
        info
    }
}

/// Every path the cache knows, whether it exists or is only a link target.
pub async fn known_files(
    conn: &mut SqliteConnection,
) -> Result<BTreeMap<PathBuf, KnownFile>, NotedirError> {
    let rows = sqlx::query_as::<_, (i64, String, bool, Option<i64>, Option<i64>, Option<i64>)>(
        "SELECT id, path, existent, stat_ctime, stat_mtime, stat_size FROM files",
    )
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows
        .into_iter()
        .map(|(id, path, existent, ctime, mtime, size)| {
            let signature = match (ctime, mtime, size) {
                (Some(ctime), Some(mtime), Some(size)) => Some(StatSignature { ctime, mtime, size }),
                _ => None,
            };
            (
                PathBuf::from(path),
                KnownFile {
                    id,
                    existent,
                    signature,
                },
            )
        })
        .collect())
}

/// The id of the record for `path`, creating a phantom record if there is none yet.
pub async fn file_id(conn: &mut SqliteConnection, path: &Path) -> Result<i64, NotedirError> {
    let path = os_path_to_string(path);
    sqlx::query("INSERT INTO files (path, existent) VALUES (?, 0) ON CONFLICT(path) DO NOTHING")
        .bind(&path)
        .execute(&mut *conn)
        .await?;
    let row = sqlx::query("SELECT id FROM files WHERE path = ?")
        .bind(&path)
        .fetch_one(&mut *conn)
        .await?;
    Ok(row.try_get::<i64, usize>(0)?)
}

async fn clear_content(conn: &mut SqliteConnection, id: i64) -> Result<(), NotedirError> {
    sqlx::query("DELETE FROM file_tags WHERE file_id = ?")
        .bind(id)
        .execute(&mut *conn)
        .await?;
    sqlx::query("DELETE FROM file_links WHERE referrer_id = ?")
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Replace everything stored for the existing file `id`. `info` is `None` for files that are
/// listed but not parsed.
pub async fn store_file(
    conn: &mut SqliteConnection,
    id: i64,
    signature: StatSignature,
    info: Option<&FileInfo>,
) -> Result<(), NotedirError> {
    sqlx::query(
        "UPDATE files SET existent = 1, stat_ctime = ?, stat_mtime = ?, stat_size = ?, \
         title = ?, created = ? WHERE id = ?",
    )
    .bind(signature.ctime)
    .bind(signature.mtime)
    .bind(signature.size)
    .bind(info.and_then(|info| info.title.clone()))
    .bind(info.and_then(|info| info.created.map(|c| c.format(DB_TIME_FORMAT).to_string())))
    .bind(id)
    .execute(&mut *conn)
    .await?;
    clear_content(conn, id).await?;
    let Some(info) = info else {
        return Ok(());
    };
    for tag in info.tags.iter() {
        sqlx::query("INSERT OR IGNORE INTO file_tags (file_id, tag) VALUES (?, ?)")
            .bind(id)
            .bind(tag)
            .execute(&mut *conn)
            .await?;
    }
    for href in info.refs.iter() {
        let referent_id = match resolve_href(&info.path, href) {
            Some(target) => Some(file_id(conn, &target).await?),
            None => None,
        };
        sqlx::query("INSERT INTO file_links (referrer_id, referent_id, href) VALUES (?, ?, ?)")
            .bind(id)
            .bind(referent_id)
            .bind(href)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

/// The file `id` is gone. Its record survives as a phantom only while something links to it.
/// Returns true if the record was kept.
pub async fn forget_file(conn: &mut SqliteConnection, id: i64) -> Result<bool, NotedirError> {
    clear_content(conn, id).await?;
    let inbound = sqlx::query("SELECT COUNT(*) FROM file_links WHERE referent_id = ?")
        .bind(id)
        .fetch_one(&mut *conn)
        .await?
        .try_get::<i64, usize>(0)?;
    if inbound > 0 {
        sqlx::query(
            "UPDATE files SET existent = 0, stat_ctime = NULL, stat_mtime = NULL, \
             stat_size = NULL, title = NULL, created = NULL WHERE id = ?",
        )
        .bind(id)
        .execute(&mut *conn)
        .await?;
        Ok(true)
    } else {
        sqlx::query("DELETE FROM files WHERE id = ?")
            .bind(id)
            .execute(&mut *conn)
            .await?;
        Ok(false)
    }
}

/// Delete phantom records nothing links to anymore. Returns how many were deleted.
pub async fn sweep_phantoms(conn: &mut SqliteConnection) -> Result<u64, NotedirError> {
    let result = sqlx::query(
        "DELETE FROM files WHERE existent = 0 AND NOT EXISTS \
         (SELECT 1 FROM file_links WHERE file_links.referent_id = files.id)",
    )
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected())
}

#[derive(Debug, Clone)]
pub struct DbConnection(pub Pool<Sqlite>);

impl DbConnection {
    /// The record for an existing file at `path`.
    pub async fn file_record(&self, path: &Path) -> Result<Option<FileRecord>, NotedirError> {
        Ok(sqlx::query_as::<_, FileRecord>(
            "SELECT id, path, title, created FROM files WHERE existent = 1 AND path = ?",
        )
        .bind(os_path_to_string(path))
        .fetch_optional(&self.0)
        .await?)
    }

    /// Existing files carrying every included tag and none of the excluded ones, in no
    /// particular order.
    #[tracing::instrument(skip(self))]
    pub async fn query_files(&self, query: &FileQuery) -> Result<Vec<FileRecord>, NotedirError> {
        let mut qb = QueryBuilder::<Sqlite>::new(
            "SELECT id, path, title, created FROM files WHERE existent = 1",
        );
        if !query.include_tags.is_empty() {
            qb.push(
                " AND (SELECT COUNT(DISTINCT tag) FROM file_tags \
                 WHERE file_tags.file_id = files.id AND tag IN (",
            );
            let mut tags = qb.separated(", ");
            for tag in query.include_tags.iter() {
                tags.push_bind(tag.clone());
            }
            tags.push_unseparated(")) = ");
            qb.push_bind(query.include_tags.len() as i64);
        }
        if !query.exclude_tags.is_empty() {
            qb.push(
                " AND NOT EXISTS (SELECT 1 FROM file_tags \
                 WHERE file_tags.file_id = files.id AND tag IN (",
            );
            let mut tags = qb.separated(", ");
            for tag in query.exclude_tags.iter() {
                tags.push_bind(tag.clone());
            }
            tags.push_unseparated("))");
        }
        Ok(qb.build_query_as::<FileRecord>().fetch_all(&self.0).await?)
    }

    /// Tags keyed by file id.
    pub async fn all_tags(&self) -> Result<BTreeMap<i64, BTreeSet<String>>, NotedirError> {
        let rows = sqlx::query_as::<_, (i64, String)>("SELECT file_id, tag FROM file_tags")
            .fetch_all(&self.0)
            .await?;
        let mut tags: BTreeMap<i64, BTreeSet<String>> = BTreeMap::new();
        for (id, tag) in rows {
            tags.entry(id).or_default().insert(tag);
        }
        Ok(tags)
    }

    /// Raw hrefs keyed by referrer id.
    pub async fn all_refs(&self) -> Result<BTreeMap<i64, BTreeSet<String>>, NotedirError> {
        let rows = sqlx::query_as::<_, (i64, String)>("SELECT referrer_id, href FROM file_links")
            .fetch_all(&self.0)
            .await?;
        let mut refs: BTreeMap<i64, BTreeSet<String>> = BTreeMap::new();
        for (id, href) in rows {
            refs.entry(id).or_default().insert(href);
        }
        Ok(refs)
    }

    /// Links keyed by referent id, each list sorted by referrer and href.
    pub async fn all_backlinks(&self) -> Result<BTreeMap<i64, Vec<LinkInfo>>, NotedirError> {
        let rows = sqlx::query_as::<_, (i64, String, String)>(
            "SELECT file_links.referent_id, referrer.path, file_links.href FROM file_links \
             JOIN files AS referrer ON referrer.id = file_links.referrer_id \
             WHERE file_links.referent_id IS NOT NULL",
        )
        .fetch_all(&self.0)
        .await?;
        let mut backlinks: BTreeMap<i64, Vec<LinkInfo>> = BTreeMap::new();
        for (id, referrer, href) in rows {
            backlinks
                .entry(id)
                .or_default()
                .push(LinkInfo::new(referrer, href));
        }
        for links in backlinks.values_mut() {
            links.sort();
        }
        Ok(backlinks)
    }

    pub async fn tags_of(&self, id: i64) -> Result<BTreeSet<String>, NotedirError> {
        let rows = sqlx::query_as::<_, (String,)>("SELECT tag FROM file_tags WHERE file_id = ?")
            .bind(id)
            .fetch_all(&self.0)
            .await?;
        Ok(rows.into_iter().map(|(tag,)| tag).collect())
    }

    pub async fn refs_of(&self, id: i64) -> Result<BTreeSet<String>, NotedirError> {
        let rows =
            sqlx::query_as::<_, (String,)>("SELECT href FROM file_links WHERE referrer_id = ?")
                .bind(id)
                .fetch_all(&self.0)
                .await?;
        Ok(rows.into_iter().map(|(href,)| href).collect())
    }

    /// Links to `path`, which may be a phantom, sorted by referrer and href.
    pub async fn backlinks_of(&self, path: &Path) -> Result<Vec<LinkInfo>, NotedirError> {
        let rows = sqlx::query_as::<_, (String, String)>(
            "SELECT referrer.path, file_links.href FROM file_links \
             JOIN files AS referrer ON referrer.id = file_links.referrer_id \
             JOIN files AS referent ON referent.id = file_links.referent_id \
             WHERE referent.path = ?",
        )
        .bind(os_path_to_string(path))
        .fetch_all(&self.0)
        .await?;
        let mut links = rows
            .into_iter()
            .map(|(referrer, href)| LinkInfo::new(referrer, href))
            .collect::<Vec<_>>();
        links.sort();
        Ok(links)
    }

    /// Number of (existing, phantom) file records.
    pub async fn file_counts(&self) -> Result<(i64, i64), NotedirError> {
        let row = sqlx::query(
            "SELECT COALESCE(SUM(existent), 0), COALESCE(SUM(1 - existent), 0) FROM files",
        )
        .fetch_one(&self.0)
        .await?;
        Ok((row.try_get::<i64, usize>(0)?, row.try_get::<i64, usize>(1)?))
    }
}

/// A migration definition.
#[derive(Debug, Clone)]
pub struct Migration {
    pub version: i64,
    pub description: &'static str,
    pub sql: &'static str,
    pub kind: MigrationType,
}

#[derive(Debug, Clone)]
struct MigrationList(Vec<Migration>);

impl MigrationSource<'static> for MigrationList {
    fn resolve(self) -> BoxFuture<'static, Result<Vec<SqlxMigration>, BoxDynError>> {
        Box::pin(async move {
            let mut migrations = Vec::new();
            for migration in self.0 {
                if matches!(migration.kind, MigrationType::ReversibleUp) {
                    migrations.push(SqlxMigration::new(
                        migration.version,
                        migration.description.into(),
                        migration.kind,
                        migration.sql.into(),
                        false,
                    ));
                }
            }
            Ok(migrations)
        })
    }
}

fn migrations() -> MigrationList {
    MigrationList(vec![Migration {
        version: 1,
        description: "create_initial_tables",
        sql: "\
            CREATE TABLE files (id INTEGER PRIMARY KEY, path TEXT NOT NULL UNIQUE, existent INTEGER NOT NULL DEFAULT 0, \
                stat_ctime INTEGER, stat_mtime INTEGER, stat_size INTEGER, title TEXT, created TEXT); \
            CREATE TABLE file_tags (file_id INTEGER NOT NULL REFERENCES files(id) ON DELETE CASCADE, tag TEXT NOT NULL, \
                UNIQUE(file_id, tag)); \
            CREATE TABLE file_links (id INTEGER PRIMARY KEY, \
                referrer_id INTEGER NOT NULL REFERENCES files(id) ON DELETE CASCADE, \
                referent_id INTEGER REFERENCES files(id) ON DELETE SET NULL, href TEXT NOT NULL); \
            CREATE INDEX file_tags_tag ON file_tags(tag); \
            CREATE INDEX file_links_referrer ON file_links(referrer_id); \
            CREATE INDEX file_links_referent ON file_links(referent_id);",
        kind: MigrationType::ReversibleUp,
    }])
}

pub async fn db_init(db_path: &Path) -> Result<Pool<Sqlite>, sqlx::Error> {
    let fqdb = format!("sqlite:{}", os_path_to_string(db_path));
    tracing::debug!("Initializing cache db from file: {:?}", fqdb);
    if !Sqlite::database_exists(&fqdb).await.unwrap_or(false) {
        Sqlite::create_database(&fqdb).await?;
    }
    let options = SqliteConnectOptions::from_str(&fqdb)?
        .read_only(false)
        .foreign_keys(true)
        .disable_statement_logging()
        .create_if_missing(true);

    use sqlx::pool::PoolOptions;
    let pool = PoolOptions::<Sqlite>::new().connect_with(options).await?;

    let migrator = Migrator::new(migrations()).await?;
    migrator.run(&pool).await?;

    let file_res = sqlx::query("SELECT COUNT(*) FROM files;")
        .fetch_one(&pool)
        .await?;
    let link_res = sqlx::query("SELECT COUNT(*) FROM file_links;")
        .fetch_one(&pool)
        .await?;
    tracing::info!(
        "DB Connection initialized.\n \
         \tCached file count:\t{:?} \n \
         \tCached link count:\t{:?}",
        file_res.get::<i64, usize>(0),
        link_res.get::<i64, usize>(0)
    );

    Ok(pool)
}
