use once_cell::sync::Lazy;
use regex::Regex;
use std::{collections::BTreeSet, ops::Range, path::Path};

use crate::{
    codec::{splice_hrefs, Accessor},
    commands::FileEditCmd,
    error::NotedirError,
    properties::{parse_created, FileInfo, NaiveDateTime, CREATED_FORMAT},
};

static TITLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<title\b[^>]*>(.*?)</title\s*>").expect("title regex"));
static META_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<meta\b[^>]*>").expect("meta regex"));
static LINK_ELEMENT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<(a|img|video|audio|source)\b([^>]*)>").expect("link element regex")
});
static ATTRIBUTE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?s)([a-zA-Z_:][-a-zA-Z0-9_:.]*)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'=<>`]+))"#)
        .expect("attribute regex")
});
static HEAD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<head\b[^>]*>").expect("head regex"));
static HTML_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<html\b[^>]*>").expect("html regex"));

fn unescape(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// An attribute value inside an element, with its range in the document.
#[derive(Debug, Clone)]
struct Attribute {
    name: String,
    value: String,
    range: Range<usize>,
}

/// Attributes of the element text `element`, which starts at byte `offset` of the document.
fn attributes(element: &str, offset: usize) -> Vec<Attribute> {
    ATTRIBUTE_RE
        .captures_iter(element)
        .filter_map(|captures| {
            let name = captures.get(1)?.as_str().to_lowercase();
            let value = captures
                .get(2)
                .or_else(|| captures.get(3))
                .or_else(|| captures.get(4))?;
            Some(Attribute {
                name,
                value: value.as_str().to_string(),
                range: offset + value.start()..offset + value.end(),
            })
        })
        .collect()
}

/// A `<meta name=... content=...>` element.
#[derive(Debug, Clone)]
struct MetaElement {
    element: Range<usize>,
    content: Option<Attribute>,
}

fn find_meta(document: &str, name: &str) -> Option<MetaElement> {
    META_RE.find_iter(document).find_map(|m| {
        let attrs = attributes(m.as_str(), m.start());
        let is_named = attrs
            .iter()
            .any(|a| a.name == "name" && a.value.eq_ignore_ascii_case(name));
        is_named.then(|| MetaElement {
            element: m.range(),
            content: attrs.into_iter().find(|a| a.name == "content"),
        })
    })
}

/// Every `href` of an `a` element and `src` of a media element.
fn link_attributes(document: &str) -> Vec<Attribute> {
    LINK_ELEMENT_RE
        .captures_iter(document)
        .flat_map(|captures| {
            let element = captures.get(1).map(|m| m.as_str().to_lowercase()).unwrap_or_default();
            let wanted = if element == "a" { "href" } else { "src" };
            captures
                .get(2)
                .map(|attrs| attributes(attrs.as_str(), attrs.start()))
                .unwrap_or_default()
                .into_iter()
                .filter(move |a| a.name == wanted && !a.value.is_empty())
        })
        .collect()
}

/// Reads and edits HTML documents.
///
/// - The title is the `<title>` element.
/// - The creation date is the `content` of `<meta name="created">`.
/// - Tags are the comma-separated `content` of `<meta name="keywords">`.
/// - Links are `href` on `a` and `src` on `img`, `video`, `audio` and `source`.
///
/// Adding metadata to a document without an `<html>` element fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct HtmlAccessor;

impl HtmlAccessor {
    fn title(document: &str) -> Option<String> {
        TITLE_RE
            .captures(document)
            .and_then(|c| c.get(1))
            .map(|m| unescape(m.as_str().trim()))
    }

    fn created(path: &Path, document: &str) -> Option<NaiveDateTime> {
        let raw = unescape(&find_meta(document, "created")?.content?.value);
        match parse_created(&raw) {
            Ok(created) => Some(created),
            Err(e) => {
                tracing::debug!("Ignoring unparseable created value {raw:?} in {path:?}: {e}");
                None
            }
        }
    }

    fn tags(document: &str) -> BTreeSet<String> {
        find_meta(document, "keywords")
            .and_then(|meta| meta.content)
            .map(|content| {
                unescape(&content.value)
                    .to_lowercase()
                    .split(',')
                    .map(|t| t.trim().to_string())
                    .filter(|t| !t.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Insert `element` at the end of `<head>`, creating the head if needed.
    fn insert_in_head(
        path: &Path,
        document: &str,
        element: &str,
    ) -> Result<String, NotedirError> {
        if let Some(head) = HEAD_RE.find(document) {
            let close = document[head.end()..]
                .to_lowercase()
                .find("</head")
                .map(|i| head.end() + i)
                .unwrap_or(head.end());
            return Ok(format!("{}{}{}", &document[..close], element, &document[close..]));
        }
        match HTML_RE.find(document) {
            Some(html) => Ok(format!(
                "{}<head>{}</head>{}",
                &document[..html.end()],
                element,
                &document[html.end()..]
            )),
            None => Err(NotedirError::change(
                path,
                "File does not contain root <html> element",
            )),
        }
    }

    /// Set, add or remove the `content` of a named meta element.
    fn set_meta(
        path: &Path,
        document: &str,
        name: &str,
        content: Option<&str>,
    ) -> Result<String, NotedirError> {
        match (find_meta(document, name), content) {
            (Some(meta), None) => Ok(format!(
                "{}{}",
                &document[..meta.element.start],
                &document[meta.element.end..]
            )),
            (Some(meta), Some(value)) => match meta.content {
                Some(attr) => Ok(format!(
                    "{}{}{}",
                    &document[..attr.range.start],
                    escape(value),
                    &document[attr.range.end..]
                )),
                None => {
                    let element = &document[meta.element.clone()];
                    let insert_at = meta.element.start
                        + element.trim_end_matches('>').trim_end_matches('/').trim_end().len();
                    Ok(format!(
                        "{} content=\"{}\"{}",
                        &document[..insert_at],
                        escape(value),
                        &document[insert_at..]
                    ))
                }
            },
            (None, Some(value)) => Self::insert_in_head(
                path,
                document,
                &format!("<meta name=\"{name}\" content=\"{}\"/>", escape(value)),
            ),
            (None, None) => Ok(document.to_string()),
        }
    }

    fn set_title(
        path: &Path,
        document: &str,
        title: Option<&str>,
    ) -> Result<String, NotedirError> {
        if Self::title(document).as_deref() == title {
            return Ok(document.to_string());
        }
        match (TITLE_RE.captures(document), title) {
            (Some(captures), Some(title)) => {
                let inner = captures.get(1).map(|m| m.range()).unwrap_or(0..0);
                Ok(format!(
                    "{}{}{}",
                    &document[..inner.start],
                    escape(title),
                    &document[inner.end..]
                ))
            }
            (Some(captures), None) => {
                let whole = captures.get(0).map(|m| m.range()).unwrap_or(0..0);
                Ok(format!("{}{}", &document[..whole.start], &document[whole.end..]))
            }
            (None, Some(title)) => {
                Self::insert_in_head(path, document, &format!("<title>{}</title>", escape(title)))
            }
            (None, None) => Ok(document.to_string()),
        }
    }

    fn set_tags(
        path: &Path,
        document: &str,
        tags: &BTreeSet<String>,
    ) -> Result<String, NotedirError> {
        let joined = tags.iter().cloned().collect::<Vec<_>>().join(", ");
        Self::set_meta(path, document, "keywords", Some(&joined))
    }
}

impl Accessor for HtmlAccessor {
    fn parse_content(&self, path: &Path, content: &str) -> Result<FileInfo, NotedirError> {
        let mut info = FileInfo::new(path);
        info.title = Self::title(content);
        info.created = Self::created(path, content);
        info.tags = Self::tags(content);
        info.refs = link_attributes(content)
            .into_iter()
            .map(|a| unescape(&a.value))
            .collect();
        Ok(info)
    }

    fn replace_refs(
        &self,
        path: &Path,
        content: &str,
        replacements: &[(&str, &str)],
    ) -> Result<String, NotedirError> {
        let links = link_attributes(content);
        splice_hrefs(
            path,
            content,
            replacements,
            |original| {
                links
                    .iter()
                    .filter(|a| unescape(&a.value) == original)
                    .map(|a| a.range.clone())
                    .collect()
            },
            |replacement| escape(replacement).replace('\'', "&#39;"),
        )
    }

    fn edit_content(
        &self,
        path: &Path,
        content: &str,
        edit: &FileEditCmd,
    ) -> Result<String, NotedirError> {
        match edit {
            FileEditCmd::ReplaceRef {
                original,
                replacement,
                ..
            } => self.replace_refs(path, content, &[(original.as_str(), replacement.as_str())]),
            FileEditCmd::SetTitle { value, .. } => Self::set_title(path, content, value.as_deref()),
            FileEditCmd::SetCreated { value, .. } => {
                if value.is_some() && Self::created(path, content) == *value {
                    return Ok(content.to_string());
                }
                let formatted = value.map(|c| c.format(CREATED_FORMAT).to_string());
                Self::set_meta(path, content, "created", formatted.as_deref())
            }
            FileEditCmd::AddTag { value, .. } => {
                let mut tags = Self::tags(content);
                if !tags.insert(value.to_lowercase()) {
                    return Ok(content.to_string());
                }
                Self::set_tags(path, content, &tags)
            }
            FileEditCmd::DelTag { value, .. } => {
                let mut tags = Self::tags(content);
                if !tags.remove(&value.to_lowercase()) {
                    return Ok(content.to_string());
                }
                Self::set_tags(path, content, &tags)
            }
            FileEditCmd::Move { .. } | FileEditCmd::Create { .. } => {
                Err(NotedirError::UnsupportedChange(edit.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::path::PathBuf;
    use test_log::test;

    fn path() -> PathBuf {
        PathBuf::from("/fakenotes/test.html")
    }

    fn parse(doc: &str) -> FileInfo {
        HtmlAccessor.parse_content(&path(), doc).unwrap()
    }

    fn apply(doc: &str, edits: &[FileEditCmd]) -> Result<String, NotedirError> {
        edits.iter().try_fold(doc.to_string(), |doc, edit| {
            HtmlAccessor.edit_content(&path(), &doc, edit)
        })
    }

    fn set(values: &[&str]) -> BTreeSet<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_info_garbage() {
        assert_eq!(parse("<nonsense️"), FileInfo::new(path()));
    }

    #[test]
    fn test_info() {
        let doc = r##"<html>
    <head>
        <title>I Am A Strange Knot</title>
        <meta name="keywords" content="mind, Philosophy, cOnsciOusNess"/>
        <meta name="created" content="2019-10-03 23:31:14 -0800"/>
    </head>
    <body>
        No #extra tags in the body for now! And <a href="#nope">this will never be a tag.</a>
        Here's a <a href="../Another%20Note.md">link to another note</a>, and here's
        an image: <img src="me.html.resources/A%20Picture.png" />
    </body>
</html>"##;
        let info = parse(doc);
        assert_eq!(info.title.as_deref(), Some("I Am A Strange Knot"));
        assert_eq!(info.tags, set(&["mind", "philosophy", "consciousness"]));
        assert_eq!(
            info.created,
            NaiveDate::from_ymd_opt(2019, 10, 3).and_then(|d| d.and_hms_opt(23, 31, 14))
        );
        assert_eq!(
            info.refs,
            set(&["../Another%20Note.md", "me.html.resources/A%20Picture.png", "#nope"])
        );
    }

    #[test]
    fn test_change_from_missing_attributes() {
        let doc = "<html>\n    <body>Hi!</body>\n</html>";
        let created = NaiveDate::from_ymd_opt(2019, 6, 4).and_then(|d| d.and_hms_opt(10, 12, 13));
        let changed = apply(
            doc,
            &[
                FileEditCmd::SetTitle {
                    path: path(),
                    value: Some("A Delightful Note".to_string()),
                },
                FileEditCmd::SetCreated {
                    path: path(),
                    value: created,
                },
                FileEditCmd::AddTag {
                    path: path(),
                    value: "Fun".to_string(),
                },
            ],
        )
        .unwrap();
        assert_eq!(
            changed,
            "<html><head><title>A Delightful Note</title><meta name=\"created\" content=\"2019-06-04 10:12:13\"/><meta name=\"keywords\" content=\"fun\"/></head>\n    <body>Hi!</body>\n</html>"
        );
        let info = parse(&changed);
        assert_eq!(info.title.as_deref(), Some("A Delightful Note"));
        assert_eq!(info.created, created);
        assert_eq!(info.tags, set(&["fun"]));
    }

    #[test]
    fn test_change_without_html_element() {
        let err = apply(
            "<p>just a fragment</p>",
            &[FileEditCmd::SetTitle {
                path: path(),
                value: Some("Title".to_string()),
            }],
        )
        .unwrap_err();
        assert!(matches!(err, NotedirError::Change { .. }));
    }

    #[test]
    fn test_change() {
        let doc = r#"<html>
    <head>
        <title>fdsalkhflsdakjsdhfaslkjdhfalkj</title>
        <meta name="created" content="2001-01-01 02:02:02 +0000" />
        <meta name="keywords" content="one, two" />
    </head>
    <body>
        <p>Hi! Here's a <a href="../Mediocre%20Note.md">link</a> and a <img src="http://example.com/foo.png" title="picture"/>.</p>
        <video controls src="media/something.weird">a video element</video>
        <audio controls><source src='media/something.weird'>another audio element</audio>
        <p>Here's an <a href="../Mediocre%20Note.html">unaffected link</a>.</p>
    </body>
</html>"#;
        let expected = r#"<html>
    <head>
        <title>A Delightful Note</title>
        <meta name="created" content="2019-06-04 10:12:13" />
        <meta name="keywords" content="three, two" />
    </head>
    <body>
        <p>Hi! Here's a <a href="../archive/Mediocre%20Note.md">link</a> and a <img src="http://example.com/bar.png" title="picture"/>.</p>
        <video controls src="media/something-else.weird">a video element</video>
        <audio controls><source src='media/something-else.weird'>another audio element</audio>
        <p>Here's an <a href="../Mediocre%20Note.html">unaffected link</a>.</p>
    </body>
</html>"#;
        let changed = apply(
            doc,
            &[
                FileEditCmd::SetTitle {
                    path: path(),
                    value: Some("A Delightful Note".to_string()),
                },
                FileEditCmd::SetCreated {
                    path: path(),
                    value: NaiveDate::from_ymd_opt(2019, 6, 4).and_then(|d| d.and_hms_opt(10, 12, 13)),
                },
                FileEditCmd::replace_ref(
                    path(),
                    "../Mediocre%20Note.md",
                    "../archive/Mediocre%20Note.md",
                ),
                FileEditCmd::replace_ref(
                    path(),
                    "http://example.com/foo.png",
                    "http://example.com/bar.png",
                ),
                FileEditCmd::replace_ref(
                    path(),
                    "media/something.weird",
                    "media/something-else.weird",
                ),
                FileEditCmd::DelTag {
                    path: path(),
                    value: "ONE".to_string(),
                },
                FileEditCmd::AddTag {
                    path: path(),
                    value: "three".to_string(),
                },
            ],
        )
        .unwrap();
        assert_eq!(changed, expected);
    }

    #[test]
    fn test_replace_ref_with_entities() {
        let doc = "<html><a href='a&amp;b.md'>one</a> <img src=\"x.png\"></html>";
        assert_eq!(parse(doc).refs, set(&["a&b.md", "x.png"]));
        let changed = apply(
            doc,
            &[FileEditCmd::replace_ref(path(), "a&b.md", "Tom's & Jerry's.md")],
        )
        .unwrap();
        assert_eq!(
            changed,
            "<html><a href='Tom&#39;s &amp; Jerry&#39;s.md'>one</a> <img src=\"x.png\"></html>"
        );
        assert_eq!(parse(&changed).refs, set(&["Tom's & Jerry's.md", "x.png"]));

        let missing = apply(doc, &[FileEditCmd::replace_ref(path(), "b.md", "c.md")]);
        assert!(matches!(missing, Err(NotedirError::Change { .. })));
    }

    #[test]
    fn test_remove_metadata() {
        let doc = "<html><head><title>T</title><meta name=\"created\" content=\"2001-01-01 02:02:02\"></head></html>";
        let changed = apply(
            doc,
            &[
                FileEditCmd::SetTitle {
                    path: path(),
                    value: None,
                },
                FileEditCmd::SetCreated {
                    path: path(),
                    value: None,
                },
            ],
        )
        .unwrap();
        assert_eq!(changed, "<html><head></head></html>");
    }
}
