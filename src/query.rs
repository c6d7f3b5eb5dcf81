use serde::{Deserialize, Serialize};
use std::{
    cmp::Ordering,
    collections::BTreeSet,
    fmt::{self, Display, Formatter},
    str::FromStr,
};

use crate::{
    error::NotedirError,
    properties::{FileInfo, FileInfoReq, InfoField, NaiveDateTime},
};

/// Decode a query term the way form-encoded values are decoded: `+` is a space, then
/// percent-escapes are expanded.
fn unquote_plus(term: &str) -> String {
    let spaced = term.replace('+', " ");
    match urlencoding::decode(&spaced) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => spaced,
    }
}

/// What a [FileQuerySort] compares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SortField {
    Path,
    Filename,
    Title,
    Created,
    /// Number of tags.
    TagsCount,
    /// Number of backlinks.
    BacklinksCount,
}

impl SortField {
    /// The [FileInfo] field that must be loaded to sort by this.
    pub fn required_field(&self) -> InfoField {
        match self {
            SortField::Path | SortField::Filename => InfoField::Path,
            SortField::Title => InfoField::Title,
            SortField::Created => InfoField::Created,
            SortField::TagsCount => InfoField::Tags,
            SortField::BacklinksCount => InfoField::Backlinks,
        }
    }
}

impl FromStr for SortField {
    type Err = NotedirError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "path" => Ok(SortField::Path),
            "filename" => Ok(SortField::Filename),
            "title" => Ok(SortField::Title),
            "created" => Ok(SortField::Created),
            "tags" => Ok(SortField::TagsCount),
            "backlinks" => Ok(SortField::BacklinksCount),
            other => Err(NotedirError::Command(format!("Unknown sort field: {other}"))),
        }
    }
}

impl Display for SortField {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        let name = match self {
            SortField::Path => "path",
            SortField::Filename => "filename",
            SortField::Title => "title",
            SortField::Created => "created",
            SortField::TagsCount => "tags",
            SortField::BacklinksCount => "backlinks",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum SortValue {
    Text(String),
    Count(usize),
    Date(NaiveDateTime),
}

/// One key of a multi-key sort.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileQuerySort {
    pub field: SortField,
    /// Reverses the whole comparison for this key, including where missing values land.
    #[serde(default)]
    pub reverse: bool,
    /// Compare strings case-insensitively.
    #[serde(default = "default_true")]
    pub ignore_case: bool,
    /// Put files without a value for this field first instead of last.
    #[serde(default)]
    pub missing_first: bool,
}

fn default_true() -> bool {
    true
}

impl FileQuerySort {
    pub fn new(field: SortField) -> FileQuerySort {
        FileQuerySort {
            field,
            reverse: false,
            ignore_case: true,
            missing_first: false,
        }
    }

    pub fn reversed(mut self) -> FileQuerySort {
        self.reverse = true;
        self
    }

    fn text(&self, value: String) -> SortValue {
        if self.ignore_case {
            SortValue::Text(value.to_lowercase())
        } else {
            SortValue::Text(value)
        }
    }

    fn key(&self, info: &FileInfo) -> Option<SortValue> {
        match self.field {
            SortField::Path => Some(self.text(info.path.to_string_lossy().to_string())),
            SortField::Filename => Some(self.text(info.filename())),
            SortField::Title => info.title.clone().map(|title| self.text(title)),
            SortField::Created => info.created.map(SortValue::Date),
            SortField::TagsCount => Some(SortValue::Count(info.tags.len())),
            SortField::BacklinksCount => Some(SortValue::Count(info.backlinks.len())),
        }
    }

    pub fn compare(&self, a: &FileInfo, b: &FileInfo) -> Ordering {
        let ordering = match (self.key(a), self.key(b)) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) if self.missing_first => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) if self.missing_first => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (Some(ka), Some(kb)) => ka.cmp(&kb),
        };
        if self.reverse {
            ordering.reverse()
        } else {
            ordering
        }
    }
}

impl Display for FileQuerySort {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        if self.reverse {
            write!(f, "-")?;
        }
        write!(f, "{}", self.field)
    }
}

/// Criteria for searching notes. A file must satisfy all of them.
///
/// Parsed from space-separated terms:
///
/// - `tag:TAG1,TAG2` files must have all the listed tags
/// - `-tag:TAG1,TAG2` files must have none of the listed tags
/// - `sort:FIELD1,-FIELD2` sort by the listed fields in order, `-` reverses a field
///
/// For example `tag:journal,food -tag:personal sort:-created`. Tag names are lowercased and
/// decoded like form values (`+` for a space, `%xx` escapes).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileQuery {
    #[serde(default)]
    pub include_tags: BTreeSet<String>,
    #[serde(default)]
    pub exclude_tags: BTreeSet<String>,
    #[serde(default)]
    pub sort_by: Vec<FileQuerySort>,
}

impl FileQuery {
    pub fn is_empty(&self) -> bool {
        self.include_tags.is_empty() && self.exclude_tags.is_empty() && self.sort_by.is_empty()
    }

    /// Fields that must be loaded to filter and sort by this query.
    pub fn required_fields(&self) -> FileInfoReq {
        let mut fields = FileInfoReq::path_only();
        if !self.include_tags.is_empty() || !self.exclude_tags.is_empty() {
            fields.insert(InfoField::Tags);
        }
        for sort in self.sort_by.iter() {
            fields.insert(sort.field.required_field());
        }
        fields
    }

    pub fn matches(&self, info: &FileInfo) -> bool {
        self.include_tags.is_subset(&info.tags) && self.exclude_tags.is_disjoint(&info.tags)
    }

    pub fn apply_filtering<I: IntoIterator<Item = FileInfo>>(&self, infos: I) -> Vec<FileInfo> {
        infos.into_iter().filter(|info| self.matches(info)).collect()
    }

    /// Stable multi-key sort: ties on every key keep their incoming order.
    pub fn apply_sorting(&self, mut infos: Vec<FileInfo>) -> Vec<FileInfo> {
        if self.sort_by.is_empty() {
            return infos;
        }
        infos.sort_by(|a, b| {
            self.sort_by
                .iter()
                .map(|sort| sort.compare(a, b))
                .find(|ordering| ordering.is_ne())
                .unwrap_or(Ordering::Equal)
        });
        infos
    }
}

impl FromStr for FileQuery {
    type Err = NotedirError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut query = FileQuery::default();
        for term in s.split_whitespace() {
            let lower = term.to_lowercase();
            if let Some(tags) = lower.strip_prefix("tag:") {
                query.include_tags.extend(
                    tags.split(',')
                        .filter(|t| !t.is_empty())
                        .map(unquote_plus),
                );
            } else if let Some(tags) = lower.strip_prefix("-tag:") {
                query.exclude_tags.extend(
                    tags.split(',')
                        .filter(|t| !t.is_empty())
                        .map(unquote_plus),
                );
            } else if let Some(fields) = lower.strip_prefix("sort:") {
                for field in fields.split(',').filter(|f| !f.is_empty()) {
                    let sort = match field.strip_prefix('-') {
                        Some(name) => FileQuerySort::new(name.parse()?).reversed(),
                        None => FileQuerySort::new(field.parse()?),
                    };
                    query.sort_by.push(sort);
                }
            } else {
                tracing::debug!("Ignoring unrecognized query term {term:?}");
            }
        }
        Ok(query)
    }
}

impl Display for FileQuery {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        let encode = |tags: &BTreeSet<String>| {
            tags.iter()
                .map(|t| urlencoding::encode(t).into_owned())
                .collect::<Vec<_>>()
                .join(",")
        };
        let mut terms = Vec::new();
        if !self.include_tags.is_empty() {
            terms.push(format!("tag:{}", encode(&self.include_tags)));
        }
        if !self.exclude_tags.is_empty() {
            terms.push(format!("-tag:{}", encode(&self.exclude_tags)));
        }
        if !self.sort_by.is_empty() {
            let sorts = self.sort_by.iter().map(|s| s.to_string()).collect::<Vec<_>>();
            terms.push(format!("sort:{}", sorts.join(",")));
        }
        write!(f, "{}", terms.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::properties::LinkInfo;
    use chrono::NaiveDate;
    use std::path::PathBuf;
    use test_log::test;

    fn tags(values: &[&str]) -> BTreeSet<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    fn date(y: i32, m: u32, d: u32) -> Option<NaiveDateTime> {
        NaiveDate::from_ymd_opt(y, m, d).and_then(|d| d.and_hms_opt(0, 0, 0))
    }

    fn sample() -> Vec<FileInfo> {
        let backlink = LinkInfo::new("whatever", "whatever");
        vec![
            FileInfo {
                path: PathBuf::from("/a/one"),
                tags: tags(&["baz"]),
                backlinks: vec![backlink.clone()],
                ..Default::default()
            },
            FileInfo {
                path: PathBuf::from("/b/two"),
                title: Some("Beta".to_string()),
                created: date(2010, 1, 15),
                ..Default::default()
            },
            FileInfo {
                path: PathBuf::from("/c/Three"),
                title: Some("Gamma".to_string()),
                created: date(2012, 1, 9),
                backlinks: vec![backlink.clone(), backlink],
                ..Default::default()
            },
            FileInfo {
                path: PathBuf::from("/d/four"),
                title: Some("delta".to_string()),
                created: date(2012, 1, 9),
                tags: tags(&["foo", "bar"]),
                ..Default::default()
            },
        ]
    }

    fn sorted(query: &str, data: &[FileInfo]) -> Vec<PathBuf> {
        let query: FileQuery = query.parse().unwrap();
        paths(query.apply_sorting(data.to_vec()))
    }

    fn sorted_by(sort: FileQuerySort, data: &[FileInfo]) -> Vec<PathBuf> {
        let query = FileQuery {
            sort_by: vec![sort],
            ..Default::default()
        };
        paths(query.apply_sorting(data.to_vec()))
    }

    fn paths(infos: Vec<FileInfo>) -> Vec<PathBuf> {
        infos.into_iter().map(|i| i.path).collect()
    }

    fn pick(data: &[FileInfo], order: &[usize]) -> Vec<PathBuf> {
        order.iter().map(|i| data[*i].path.clone()).collect()
    }

    #[test]
    fn test_parse_query() {
        let query: FileQuery =
            "tag:first+tag,second -tag:third,fourth+tag tag:fifth sort:created,-backlinks"
                .parse()
                .unwrap();
        assert_eq!(query.include_tags, tags(&["first tag", "second", "fifth"]));
        assert_eq!(query.exclude_tags, tags(&["third", "fourth tag"]));
        assert_eq!(
            query.sort_by,
            vec![
                FileQuerySort::new(SortField::Created),
                FileQuerySort::new(SortField::BacklinksCount).reversed()
            ]
        );
    }

    #[test]
    fn test_parse_query_lowercases_and_decodes() {
        let query: FileQuery = "TAG:Hello%21,World".parse().unwrap();
        assert_eq!(query.include_tags, tags(&["hello!", "world"]));
        assert!("sort:bogus".parse::<FileQuery>().is_err());
        assert!("".parse::<FileQuery>().unwrap().is_empty());
    }

    #[test]
    fn test_query_display_round_trips() {
        let text = "tag:first%20tag,second -tag:third sort:created,-title";
        let query: FileQuery = text.parse().unwrap();
        assert_eq!(query.to_string().parse::<FileQuery>().unwrap(), query);
    }

    #[test]
    fn test_filtering() {
        let data = sample();
        let query: FileQuery = "tag:foo -tag:baz".parse().unwrap();
        assert_eq!(paths(query.apply_filtering(data.clone())), pick(&data, &[3]));
        let query: FileQuery = "-tag:foo".parse().unwrap();
        assert_eq!(paths(query.apply_filtering(data.clone())), pick(&data, &[0, 1, 2]));
        let query: FileQuery = "tag:foo,baz".parse().unwrap();
        assert!(query.apply_filtering(data).is_empty());
    }

    #[test]
    fn test_required_fields() {
        let query: FileQuery = "tag:a sort:-backlinks,title".parse().unwrap();
        let fields = query.required_fields();
        assert!(fields.contains(InfoField::Tags));
        assert!(fields.contains(InfoField::Backlinks));
        assert!(fields.contains(InfoField::Title));
        assert!(!fields.contains(InfoField::Created));
    }

    #[test]
    fn test_apply_sorting_paths_and_names() {
        let data = sample();
        assert_eq!(sorted("sort:path", &data), pick(&data, &[0, 1, 2, 3]));
        assert_eq!(sorted("sort:-path", &data), pick(&data, &[3, 2, 1, 0]));
        assert_eq!(sorted("sort:filename", &data), pick(&data, &[3, 0, 2, 1]));
        let mut case_sensitive = FileQuerySort::new(SortField::Filename);
        case_sensitive.ignore_case = false;
        assert_eq!(sorted_by(case_sensitive, &data), pick(&data, &[2, 3, 0, 1]));
    }

    #[test]
    fn test_apply_sorting_titles() {
        let data = sample();
        assert_eq!(sorted("sort:title", &data), pick(&data, &[1, 3, 2, 0]));

        let mut case_sensitive = FileQuerySort::new(SortField::Title);
        case_sensitive.ignore_case = false;
        assert_eq!(sorted_by(case_sensitive, &data), pick(&data, &[1, 2, 3, 0]));

        let mut missing_first = FileQuerySort::new(SortField::Title);
        missing_first.missing_first = true;
        assert_eq!(
            sorted_by(missing_first.clone(), &data),
            pick(&data, &[0, 1, 3, 2])
        );
        assert_eq!(
            sorted_by(missing_first.reversed(), &data),
            pick(&data, &[2, 3, 1, 0])
        );
    }

    #[test]
    fn test_apply_sorting_created_and_counts() {
        let data = sample();
        assert_eq!(sorted("sort:created", &data), pick(&data, &[1, 2, 3, 0]));
        // Ties keep their incoming order even when reversed.
        assert_eq!(sorted("sort:-created", &data), pick(&data, &[0, 2, 3, 1]));
        let mut missing_first = FileQuerySort::new(SortField::Created);
        missing_first.missing_first = true;
        assert_eq!(sorted_by(missing_first, &data), pick(&data, &[0, 1, 2, 3]));

        assert_eq!(sorted("sort:-tags", &data), pick(&data, &[3, 0, 1, 2]));
        assert_eq!(sorted("sort:-backlinks", &data), pick(&data, &[2, 0, 1, 3]));
    }

    #[test]
    fn test_apply_sorting_multiple_keys() {
        let data = sample();
        assert_eq!(sorted("sort:created,title", &data), pick(&data, &[1, 3, 2, 0]));
        assert_eq!(sorted("sort:created,-title", &data), pick(&data, &[1, 2, 3, 0]));
    }
}
