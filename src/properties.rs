//! [crate::properties] contains the data model shared by every layer: what a document says about
//! itself ([FileInfo]), the relations between documents ([LinkInfo]), and which of those fields a
//! caller wants ([FileInfoReq]).
pub use enumset::EnumSet;
use enumset::*;
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeSet,
    fmt::{Display, Formatter},
    ops::{Deref, DerefMut},
    path::PathBuf,
    str::FromStr,
};

pub use chrono::NaiveDateTime;

use crate::{error::NotedirError, paths::resolve_href};

/// Timestamp format used when writing `created` into document metadata.
pub const CREATED_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Parse a `created` value in any of the formats notes commonly carry.
pub fn parse_created(value: &str) -> Result<NaiveDateTime, NotedirError> {
    let value = value.trim();
    // Offsets are dropped; the wall-clock time as written is kept.
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(value) {
        return Ok(dt.naive_local());
    }
    for fmt in ["%Y-%m-%d %H:%M:%S %z", "%Y-%m-%d %H:%M:%S%:z", "%Y-%m-%d %H:%M:%S%z"] {
        if let Ok(dt) = chrono::DateTime::parse_from_str(value, fmt) {
            return Ok(dt.naive_local());
        }
    }
    for fmt in [
        CREATED_FORMAT,
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M",
    ] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, fmt) {
            return Ok(dt);
        }
    }
    let date = chrono::NaiveDate::parse_from_str(value, "%Y-%m-%d")?;
    Ok(date.and_hms_opt(0, 0, 0).unwrap_or_default())
}

/// A link from a file to some resource, as written in the referring file.
///
/// Not all links target local files. [LinkInfo::referent] determines which local path, if any,
/// the href targets.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LinkInfo {
    /// The file that contains the link. Canonical and absolute.
    pub referrer: PathBuf,
    /// The raw address, exactly as written.
    pub href: String,
}

impl LinkInfo {
    pub fn new<P: Into<PathBuf>, S: Into<String>>(referrer: P, href: S) -> LinkInfo {
        LinkInfo {
            referrer: referrer.into(),
            href: href.into(),
        }
    }

    /// The canonical absolute local path this link refers to, whether or not anything exists
    /// there. `None` for hrefs that are not local file references.
    pub fn referent(&self) -> Option<PathBuf> {
        resolve_href(&self.referrer, &self.href)
    }
}

impl Display for LinkInfo {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{} -> {}", self.referrer.display(), self.href)
    }
}

/// Everything that can be parsed or calculated about a file.
///
/// A FileInfo does not imply its path exists: instances are produced for missing, ignored or
/// unparseable paths with only [FileInfo::path] (and, when requested, [FileInfo::backlinks])
/// filled in. Which fields are populated otherwise depends on the [FileInfoReq] passed to the
/// repository and on what the file format supports.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    /// Canonical absolute path.
    pub path: PathBuf,
    /// Raw reference strings, exactly as they appear in the document.
    pub refs: BTreeSet<String>,
    /// Lowercase tags.
    pub tags: BTreeSet<String>,
    pub title: Option<String>,
    /// Creation date according to the document's own metadata (never the filesystem's).
    pub created: Option<NaiveDateTime>,
    /// Links from other files to this one, sorted by referrer then href.
    pub backlinks: Vec<LinkInfo>,
}

impl FileInfo {
    pub fn new<P: Into<PathBuf>>(path: P) -> FileInfo {
        FileInfo {
            path: path.into(),
            ..Default::default()
        }
    }

    /// The refs of this file as [LinkInfo]s, in href order.
    pub fn links(&self) -> Vec<LinkInfo> {
        self.refs
            .iter()
            .map(|href| LinkInfo::new(self.path.clone(), href.clone()))
            .collect()
    }

    /// [FileInfo::created] if the document has one, otherwise the file's birth time, falling back
    /// to its status change time where birth times are unavailable. `None` if the path does not
    /// exist. Filesystem times are in UTC.
    pub fn guess_created(&self) -> Option<NaiveDateTime> {
        if self.created.is_some() {
            return self.created;
        }
        let metadata = self.path.metadata().ok()?;
        if let Ok(born) = metadata.created() {
            return Some(chrono::DateTime::<chrono::Utc>::from(born).naive_utc());
        }
        #[cfg(unix)]
        {
            use std::os::unix::fs::MetadataExt;
            chrono::DateTime::from_timestamp(metadata.ctime(), metadata.ctime_nsec() as u32)
                .map(|changed| changed.naive_utc())
        }
        #[cfg(not(unix))]
        {
            metadata
                .modified()
                .ok()
                .map(|modified| chrono::DateTime::<chrono::Utc>::from(modified).naive_utc())
        }
    }

    /// The final component of the path, used for sorting by file name.
    pub fn filename(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default()
    }

    /// Clear every field that is not part of `fields`.
    pub fn restrict(mut self, fields: &FileInfoReq) -> FileInfo {
        if !fields.contains(InfoField::Path) {
            self.path = PathBuf::new();
        }
        if !fields.contains(InfoField::Refs) {
            self.refs.clear();
        }
        if !fields.contains(InfoField::Tags) {
            self.tags.clear();
        }
        if !fields.contains(InfoField::Title) {
            self.title = None;
        }
        if !fields.contains(InfoField::Created) {
            self.created = None;
        }
        if !fields.contains(InfoField::Backlinks) {
            self.backlinks.clear();
        }
        self
    }

    /// A JSON rendering with resolved referents alongside each link.
    pub fn as_json(&self) -> serde_json::Value {
        let link_json = |link: &LinkInfo| {
            serde_json::json!({
                "referrer": link.referrer,
                "href": link.href,
                "referent": link.referent(),
            })
        };
        serde_json::json!({
            "path": self.path,
            "title": self.title,
            "created": self.created.map(|c| c.format(CREATED_FORMAT).to_string()),
            "tags": self.tags,
            "links": self.links().iter().map(link_json).collect::<Vec<_>>(),
            "backlinks": self.backlinks.iter().map(link_json).collect::<Vec<_>>(),
        })
    }
}

/// The fields of a [FileInfo] a caller can request.
#[derive(Debug, Serialize, Deserialize, PartialOrd, Ord, Hash, EnumSetType)]
#[enumset(serialize_repr = "list")]
pub enum InfoField {
    Path,
    Refs,
    Tags,
    Title,
    Created,
    Backlinks,
}

impl Display for InfoField {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        let name = match self {
            InfoField::Path => "path",
            InfoField::Refs => "refs",
            InfoField::Tags => "tags",
            InfoField::Title => "title",
            InfoField::Created => "created",
            InfoField::Backlinks => "backlinks",
        };
        write!(f, "{name}")
    }
}

impl FromStr for InfoField {
    type Err = NotedirError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "path" => Ok(InfoField::Path),
            "refs" | "links" => Ok(InfoField::Refs),
            "tags" => Ok(InfoField::Tags),
            "title" => Ok(InfoField::Title),
            "created" => Ok(InfoField::Created),
            "backlinks" => Ok(InfoField::Backlinks),
            other => Err(NotedirError::Command(format!("Unknown field: {other}"))),
        }
    }
}

/// Which [FileInfo] fields to populate when loading or querying files.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileInfoReq(pub EnumSet<InfoField>);

impl FileInfoReq {
    /// Everything that can be determined by looking at a file in isolation, which is everything
    /// except backlinks.
    pub fn internal() -> FileInfoReq {
        FileInfoReq(EnumSet::all() - InfoField::Backlinks)
    }

    pub fn full() -> FileInfoReq {
        FileInfoReq(EnumSet::all())
    }

    pub fn path_only() -> FileInfoReq {
        FileInfoReq(EnumSet::only(InfoField::Path))
    }

    /// True if anything beyond path/backlinks is wanted, meaning the file must be parsed.
    pub fn needs_parse(&self) -> bool {
        !self
            .0
            .is_disjoint(InfoField::Refs | InfoField::Tags | InfoField::Title | InfoField::Created)
    }
}

impl Deref for FileInfoReq {
    type Target = EnumSet<InfoField>;
    fn deref(&self) -> &EnumSet<InfoField> {
        &self.0
    }
}

impl DerefMut for FileInfoReq {
    fn deref_mut(&mut self) -> &mut EnumSet<InfoField> {
        &mut self.0
    }
}

impl From<EnumSet<InfoField>> for FileInfoReq {
    fn from(fields: EnumSet<InfoField>) -> Self {
        FileInfoReq(fields)
    }
}

impl From<InfoField> for FileInfoReq {
    fn from(field: InfoField) -> Self {
        FileInfoReq(EnumSet::only(field))
    }
}

/// Parses comma-separated field names such as `"path,backlinks"`.
impl FromStr for FileInfoReq {
    type Err = NotedirError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut fields = EnumSet::new();
        for name in s.split(',').filter(|name| !name.trim().is_empty()) {
            fields |= name.parse::<InfoField>()?;
        }
        Ok(FileInfoReq(fields))
    }
}

impl Display for FileInfoReq {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        let names = self.0.iter().map(|field| field.to_string()).collect::<Vec<_>>();
        write!(f, "{}", names.join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn test_guess_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("note.md");
        assert_eq!(FileInfo::new(&path).guess_created(), None);

        std::fs::write(&path, "note").unwrap();
        let guessed = FileInfo::new(&path).guess_created().unwrap();
        let now = chrono::Utc::now().naive_utc();
        assert!((now - guessed).num_seconds().abs() < 60, "{guessed} vs {now}");

        let mut info = FileInfo::new(&path);
        info.created = parse_created("2001-02-03 04:05:06").ok();
        assert_eq!(info.guess_created(), info.created);
    }

    #[test]
    fn test_parse_info_req() {
        let expected = FileInfoReq(InfoField::Path | InfoField::Backlinks);
        assert_eq!("path,backlinks".parse::<FileInfoReq>().unwrap(), expected);
        assert_eq!(" backlinks , path,".parse::<FileInfoReq>().unwrap(), expected);
        assert_eq!(expected.to_string(), "path,backlinks");
        assert!("path,bogus".parse::<FileInfoReq>().is_err());
        assert_eq!(
            "links".parse::<FileInfoReq>().unwrap(),
            FileInfoReq::from(InfoField::Refs)
        );
    }

    #[test]
    fn test_info_req_presets() {
        assert!(!FileInfoReq::internal().contains(InfoField::Backlinks));
        assert!(FileInfoReq::full().contains(InfoField::Backlinks));
        assert!(FileInfoReq::internal().needs_parse());
        assert!(!FileInfoReq(InfoField::Path | InfoField::Backlinks).needs_parse());
    }

    #[test]
    fn test_restrict() {
        let info = FileInfo {
            path: PathBuf::from("/notes/one.md"),
            refs: BTreeSet::from(["two.md".to_string()]),
            tags: BTreeSet::from(["a".to_string()]),
            title: Some("One".to_string()),
            created: None,
            backlinks: vec![LinkInfo::new("/notes/two.md", "one.md")],
        };
        let restricted = info.clone().restrict(&FileInfoReq(InfoField::Path | InfoField::Title));
        assert_eq!(restricted.path, info.path);
        assert_eq!(restricted.title, info.title);
        assert!(restricted.refs.is_empty());
        assert!(restricted.tags.is_empty());
        assert!(restricted.backlinks.is_empty());
    }

    #[test]
    fn test_parse_created() {
        let expected = chrono::NaiveDate::from_ymd_opt(2020, 5, 17)
            .unwrap()
            .and_hms_opt(13, 4, 5)
            .unwrap();
        assert_eq!(parse_created("2020-05-17 13:04:05").unwrap(), expected);
        assert_eq!(parse_created("2020-05-17T13:04:05").unwrap(), expected);
        assert_eq!(parse_created("2020-05-17T13:04:05Z").unwrap(), expected);
        assert_eq!(parse_created("2020-05-17 13:04:05 -0800").unwrap(), expected);
        assert_eq!(parse_created("2020-05-17 13:04:05-08:00").unwrap(), expected);
        assert_eq!(
            parse_created("2020-05-17").unwrap(),
            expected.date().and_hms_opt(0, 0, 0).unwrap()
        );
        assert!(parse_created("yesterday").is_err());
    }

    #[test]
    fn test_links_and_referents() {
        let info = FileInfo {
            path: PathBuf::from("/nonexistent-root/notes/one.md"),
            refs: BTreeSet::from(["two.md".to_string(), "https://example.com".to_string()]),
            ..Default::default()
        };
        let links = info.links();
        assert_eq!(links.len(), 2);
        assert_eq!(links[0].referent(), None);
        assert_eq!(
            links[1].referent(),
            Some(PathBuf::from("/nonexistent-root/notes/two.md"))
        );
    }
}
