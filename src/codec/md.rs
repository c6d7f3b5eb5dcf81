use once_cell::sync::Lazy;
use pulldown_cmark::{
    Event as MdEvent, LinkType, Options, Parser as MdParser, Tag as MdTag, TagEnd as MdTagEnd,
};
use regex::Regex;
use serde_yaml::{Mapping, Value};
use std::{collections::BTreeSet, ops::Range, path::Path, result::Result};

use crate::{
    codec::{splice_hrefs, Accessor},
    commands::FileEditCmd,
    error::NotedirError,
    properties::{parse_created, FileInfo, CREATED_FORMAT},
};

pub use pulldown_cmark;

/// A YAML metadata block at the very top of the document, closed by `---` or `...`.
static FRONTMATTER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)\A---[ \t]*\r?\n(?:(.*?)\r?\n)?(?:---|\.\.\.)[ \t]*(?:\r?\n|\z)")
        .expect("frontmatter regex")
});

/// `#tag` preceded by whitespace or the start of a run of text. Tags start with a letter.
static HASHTAG_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:\s|^)#([a-zA-Z][a-zA-Z\-_0-9]*)\b").expect("hashtag regex")
});

pub fn notedir_md_options() -> Options {
    let mut md_options = Options::empty();
    // Frontmatter is split off before tokenizing, so metadata blocks stay disabled here.
    md_options.insert(Options::ENABLE_DEFINITION_LIST);
    md_options.insert(Options::ENABLE_FOOTNOTES);
    md_options.insert(Options::ENABLE_GFM);
    md_options.insert(Options::ENABLE_MATH);
    md_options.insert(Options::ENABLE_STRIKETHROUGH);
    md_options.insert(Options::ENABLE_TABLES);
    md_options.insert(Options::ENABLE_TASKLISTS);
    md_options
}

/// The frontmatter of a document, if it has one.
#[derive(Debug, Default)]
struct Frontmatter {
    meta: Mapping,
    /// Byte range of the whole block, fences included.
    block: Option<Range<usize>>,
    /// Byte range of the YAML between the fences.
    inner: Option<Range<usize>>,
}

impl Frontmatter {
    fn read(path: &Path, content: &str) -> Result<Frontmatter, NotedirError> {
        let Some(captures) = FRONTMATTER_RE.captures(content) else {
            return Ok(Frontmatter::default());
        };
        let block = captures.get(0).map(|m| m.range());
        let inner = captures.get(1).map(|m| m.range());
        let meta = match &inner {
            Some(range) => match serde_yaml::from_str::<Value>(&content[range.clone()]) {
                Ok(Value::Mapping(meta)) => meta,
                Ok(Value::Null) => Mapping::new(),
                Ok(_) => {
                    return Err(NotedirError::parse(
                        path,
                        "Frontmatter is not a YAML mapping",
                        None,
                    ))
                }
                Err(e) => {
                    return Err(NotedirError::parse(
                        path,
                        "Invalid YAML frontmatter",
                        Some(e.to_string()),
                    ))
                }
            },
            None => Mapping::new(),
        };
        Ok(Frontmatter { meta, block, inner })
    }

    fn body_start(&self) -> usize {
        self.block.as_ref().map(|range| range.end).unwrap_or(0)
    }

    fn title(&self) -> Option<String> {
        self.meta.get("title").and_then(yaml_string)
    }

    fn created(&self, path: &Path) -> Option<chrono::NaiveDateTime> {
        let raw = self.meta.get("created").and_then(yaml_string)?;
        match parse_created(&raw) {
            Ok(created) => Some(created),
            Err(e) => {
                tracing::debug!("Ignoring unparseable created value {raw:?} in {path:?}: {e}");
                None
            }
        }
    }

    fn keywords(&self) -> Vec<String> {
        match self.meta.get("keywords") {
            Some(Value::Sequence(values)) => values.iter().filter_map(yaml_string).collect(),
            Some(Value::String(joined)) => joined
                .split(',')
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty())
                .collect(),
            _ => Vec::new(),
        }
    }

    fn set(&mut self, key: &str, value: Option<Value>) {
        match value {
            Some(value) => {
                self.meta.insert(Value::from(key), value);
            }
            None => {
                self.meta.remove(key);
            }
        }
    }

    /// Render `content` with this frontmatter's current mapping in place of the old one.
    fn write(&self, content: &str) -> Result<String, NotedirError> {
        let body = &content[self.body_start()..];
        if self.meta.is_empty() {
            return Ok(body.to_string());
        }
        let yaml = serde_yaml::to_string(&self.meta)?;
        let yaml = yaml.trim_end();
        Ok(match &self.inner {
            Some(inner) => format!("{}{}{}", &content[..inner.start], yaml, &content[inner.end..]),
            None => format!("---\n{yaml}\n---\n{body}"),
        })
    }
}

fn yaml_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[derive(Debug, Clone)]
struct LinkSpan {
    link_type: LinkType,
    dest: String,
    span: Range<usize>,
}

/// What the tokenizer found in a document body. All ranges are relative to the full document.
#[derive(Debug, Default)]
struct BodyScan {
    links: Vec<LinkSpan>,
    /// Reference definitions like `[id]: dest "title"`, as (dest, span).
    definitions: Vec<(String, Range<usize>)>,
    /// Runs of plain text outside code, merged where the tokenizer split them.
    text: Vec<Range<usize>>,
}

impl BodyScan {
    fn new(content: &str, body_start: usize) -> BodyScan {
        let body = &content[body_start..];
        let parser = MdParser::new_ext(body, notedir_md_options());
        let definitions = parser
            .reference_definitions()
            .iter()
            .map(|(_, def)| {
                (
                    def.dest.to_string(),
                    def.span.start + body_start..def.span.end + body_start,
                )
            })
            .collect::<Vec<_>>();

        let mut scan = BodyScan {
            definitions,
            ..Default::default()
        };
        let mut code_depth = 0usize;
        for (event, range) in parser.into_offset_iter() {
            let range = range.start + body_start..range.end + body_start;
            match event {
                MdEvent::Start(MdTag::CodeBlock(_)) => code_depth += 1,
                MdEvent::End(MdTagEnd::CodeBlock) => code_depth = code_depth.saturating_sub(1),
                MdEvent::Start(MdTag::Link {
                    link_type,
                    dest_url,
                    ..
                })
                | MdEvent::Start(MdTag::Image {
                    link_type,
                    dest_url,
                    ..
                }) => {
                    // Email autolinks carry a bare address, not a reference.
                    if !matches!(link_type, LinkType::Email) && !dest_url.is_empty() {
                        scan.links.push(LinkSpan {
                            link_type,
                            dest: dest_url.to_string(),
                            span: range,
                        });
                    }
                }
                MdEvent::Text(_) if code_depth == 0 => match scan.text.last_mut() {
                    Some(last) if last.end == range.start => last.end = range.end,
                    _ => scan.text.push(range),
                },
                _ => {}
            }
        }
        scan
    }

    fn refs(&self) -> BTreeSet<String> {
        self.links
            .iter()
            .map(|link| link.dest.clone())
            .chain(
                self.definitions
                    .iter()
                    .filter(|(dest, _)| !dest.is_empty())
                    .map(|(dest, _)| dest.clone()),
            )
            .collect()
    }

    /// Lowercase hashtags, with the byte offset of each `#`.
    fn hashtags<'a>(&'a self, content: &'a str) -> impl Iterator<Item = (String, usize)> + 'a {
        self.text.iter().flat_map(move |span| {
            HASHTAG_RE
                .captures_iter(&content[span.clone()])
                .filter_map(move |captures| {
                    captures
                        .get(1)
                        .map(|tag| (tag.as_str().to_lowercase(), span.start + tag.start() - 1))
                })
        })
    }

    /// Byte ranges where the href `original` is written, across inline links, images, autolinks
    /// and reference definitions. Destinations are matched as the tokenizer decoded them, so
    /// escaped characters and entities in the source still match.
    fn href_ranges(&self, content: &str, original: &str) -> Vec<Range<usize>> {
        let mut ranges = BTreeSet::new();
        for link in self.links.iter().filter(|link| link.dest == original) {
            let found = match link.link_type {
                LinkType::Inline => inline_destination(content, &link.span),
                LinkType::Autolink => (link.span.len() > 2)
                    .then(|| link.span.start + 1..link.span.end - 1),
                // Reference-style links are rewritten through their definition.
                _ => None,
            };
            if let Some(found) = found {
                ranges.insert((found.start, found.end));
            }
        }
        for (_, span) in self.definitions.iter().filter(|(dest, _)| dest == original) {
            if let Some(found) = definition_destination(content, span) {
                ranges.insert((found.start, found.end));
            }
        }
        ranges.into_iter().map(|(start, end)| start..end).collect()
    }
}

/// The destination starting at byte `start` of `text`, without angle brackets.
fn destination_at(text: &str, start: usize) -> Option<Range<usize>> {
    let bytes = text.as_bytes();
    let mut i = start;
    if bytes.get(i) == Some(&b'<') {
        i += 1;
        while i < bytes.len() {
            match bytes[i] {
                b'\\' => i += 2,
                b'>' => return Some(start + 1..i),
                b'<' | b'\n' => return None,
                _ => i += 1,
            }
        }
        return None;
    }
    let mut depth = 0usize;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => {
                i += 2;
                continue;
            }
            b'(' => depth += 1,
            b')' if depth == 0 => break,
            b')' => depth -= 1,
            c if c.is_ascii_whitespace() || c.is_ascii_control() => break,
            _ => {}
        }
        i += 1;
    }
    let i = i.min(bytes.len());
    (i > start && depth == 0).then_some(start..i)
}

/// Whether `rest`, the text after a destination, is an optional title and the closing paren.
fn closes_inline_link(rest: &str) -> bool {
    let trimmed = rest.trim_start();
    if trimmed == ")" {
        return true;
    }
    if trimmed.len() == rest.len() {
        // A title must be separated from the destination.
        return false;
    }
    let close = match trimmed.chars().next() {
        Some('"') => '"',
        Some('\'') => '\'',
        Some('(') => ')',
        _ => return false,
    };
    let mut escaped = false;
    for (i, c) in trimmed.char_indices().skip(1) {
        match c {
            _ if escaped => escaped = false,
            '\\' => escaped = true,
            c if c == close => return trimmed[i + c.len_utf8()..].trim() == ")",
            _ => {}
        }
    }
    false
}

/// The destination of the inline link or image written at `span`: the first `](` whose
/// destination and title run exactly to the end of the span.
fn inline_destination(content: &str, span: &Range<usize>) -> Option<Range<usize>> {
    let text = &content[span.clone()];
    text.match_indices("](").find_map(|(open, _)| {
        let after = open + 2;
        let start = after + (text[after..].len() - text[after..].trim_start().len());
        let dest = destination_at(text, start)?;
        let dest_end = if text.as_bytes().get(start) == Some(&b'<') {
            dest.end + 1
        } else {
            dest.end
        };
        closes_inline_link(&text[dest_end..])
            .then(|| span.start + dest.start..span.start + dest.end)
    })
}

/// The destination of the reference definition `[label]: dest "title"` written at `span`.
fn definition_destination(content: &str, span: &Range<usize>) -> Option<Range<usize>> {
    let text = &content[span.clone()];
    let bytes = text.as_bytes();
    let mut i = text.find('[')? + 1;
    while i < bytes.len() && bytes[i] != b']' {
        i += if bytes[i] == b'\\' { 2 } else { 1 };
    }
    if bytes.get(i + 1) != Some(&b':') {
        return None;
    }
    let after = i + 2;
    let start = after + (text[after..].len() - text[after..].trim_start().len());
    destination_at(text, start).map(|dest| span.start + dest.start..span.start + dest.end)
}

/// Reads and edits Markdown documents.
///
/// - Title, creation date and `keywords` tags live in YAML frontmatter.
/// - Tags are also read from `#hashtags` in the text (never in code).
/// - Links are inline links, images, autolinks and reference definitions.
#[derive(Debug, Default, Clone, Copy)]
pub struct MdAccessor;

impl MdAccessor {
    fn add_tag(
        &self,
        path: &Path,
        content: &str,
        mut frontmatter: Frontmatter,
        tag: &str,
    ) -> Result<String, NotedirError> {
        let tag = tag.to_lowercase();
        let existing = self.parse_content(path, content)?.tags;
        if existing.contains(&tag) {
            return Ok(content.to_string());
        }
        let mut keywords = frontmatter.keywords();
        keywords.push(tag);
        frontmatter.set(
            "keywords",
            Some(Value::Sequence(keywords.into_iter().map(Value::from).collect())),
        );
        frontmatter.write(content)
    }

    fn del_tag(
        &self,
        content: &str,
        mut frontmatter: Frontmatter,
        tag: &str,
    ) -> Result<String, NotedirError> {
        let tag = tag.to_lowercase();
        let keywords = frontmatter.keywords();
        let mut changed = if keywords.iter().any(|k| k.to_lowercase() == tag) {
            let kept = keywords
                .into_iter()
                .filter(|k| k.to_lowercase() != tag)
                .map(Value::from)
                .collect::<Vec<_>>();
            frontmatter.set(
                "keywords",
                (!kept.is_empty()).then_some(Value::Sequence(kept)),
            );
            frontmatter.write(content)?
        } else {
            content.to_string()
        };

        // Turn inline `#tag` into plain `tag`.
        let body_start = FRONTMATTER_RE
            .find(&changed)
            .map(|m| m.end())
            .unwrap_or(0);
        let scan = BodyScan::new(&changed, body_start);
        let hashes = scan
            .hashtags(&changed)
            .filter(|(found, _)| *found == tag)
            .map(|(_, offset)| offset)
            .collect::<Vec<_>>();
        for offset in hashes.into_iter().rev() {
            changed.replace_range(offset..offset + 1, "");
        }
        Ok(changed)
    }
}

impl Accessor for MdAccessor {
    fn parse_content(&self, path: &Path, content: &str) -> Result<FileInfo, NotedirError> {
        let frontmatter = Frontmatter::read(path, content)?;
        let scan = BodyScan::new(content, frontmatter.body_start());

        let mut info = FileInfo::new(path);
        info.refs = scan.refs();
        info.tags = frontmatter
            .keywords()
            .iter()
            .map(|k| k.to_lowercase())
            .chain(scan.hashtags(content).map(|(tag, _)| tag))
            .collect();
        info.title = frontmatter.title();
        info.created = frontmatter.created(path);
        Ok(info)
    }

    fn replace_refs(
        &self,
        path: &Path,
        content: &str,
        replacements: &[(&str, &str)],
    ) -> Result<String, NotedirError> {
        let frontmatter = Frontmatter::read(path, content)?;
        let scan = BodyScan::new(content, frontmatter.body_start());
        splice_hrefs(
            path,
            content,
            replacements,
            |original| scan.href_ranges(content, original),
            str::to_string,
        )
    }

    fn edit_content(
        &self,
        path: &Path,
        content: &str,
        edit: &FileEditCmd,
    ) -> Result<String, NotedirError> {
        let mut frontmatter = Frontmatter::read(path, content)?;
        match edit {
            FileEditCmd::ReplaceRef {
                original,
                replacement,
                ..
            } => self.replace_refs(path, content, &[(original.as_str(), replacement.as_str())]),
            FileEditCmd::SetTitle { value, .. } => {
                if frontmatter.title() == *value {
                    return Ok(content.to_string());
                }
                frontmatter.set("title", value.clone().map(Value::from));
                frontmatter.write(content)
            }
            FileEditCmd::SetCreated { value, .. } => {
                if frontmatter.created(path) == *value && value.is_some() {
                    return Ok(content.to_string());
                }
                frontmatter.set(
                    "created",
                    value.map(|c| Value::from(c.format(CREATED_FORMAT).to_string())),
                );
                frontmatter.write(content)
            }
            FileEditCmd::AddTag { value, .. } => self.add_tag(path, content, frontmatter, value),
            FileEditCmd::DelTag { value, .. } => self.del_tag(content, frontmatter, value),
            FileEditCmd::Move { .. } | FileEditCmd::Create { .. } => {
                Err(NotedirError::UnsupportedChange(edit.to_string()))
            }
        }
    }
}
