//! Turning raw reference strings ("hrefs") found in documents into local paths, and back.
use std::{
    collections::{BTreeMap, BTreeSet},
    path::{Path, PathBuf},
};

use url::Url;

use crate::{
    error::NotedirError,
    paths::path::{canonicalize, href_path, os_path_to_string},
    properties::FileInfo,
};

/// Split an href into the part preceding its path (`scheme://host`, possibly empty), the raw
/// path, and the verbatim query/fragment suffix. Returns `None` if the href is not a reference to
/// a local file.
fn split_local_href(href: &str) -> Option<(&str, &str, &str)> {
    let path_start = match Url::parse(href) {
        Ok(url) => {
            if url.scheme() != "file" {
                return None;
            }
            match url.host_str() {
                None | Some("") | Some("localhost") => {}
                Some(_) => return None,
            }
            authority_end(href, url.scheme().len() + 1)
        }
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            // Relative references must still be valid as part of a URL.
            Url::parse("file:///").ok()?.join(href).ok()?;
            0
        }
        Err(_) => return None,
    };
    let rest = &href[path_start..];
    let path_end = rest.find(['?', '#']).unwrap_or(rest.len());
    Some((&href[..path_start], &rest[..path_end], &rest[path_end..]))
}

/// Byte offset where the path begins in a scheme'd href, skipping any `//authority`.
fn authority_end(href: &str, after_scheme: usize) -> usize {
    let rest = &href[after_scheme..];
    match rest.strip_prefix("//") {
        Some(authority) => {
            let len = authority.find(['/', '?', '#']).unwrap_or(authority.len());
            after_scheme + 2 + len
        }
        None => after_scheme,
    }
}

/// Resolve `href`, as written in the file at `referrer`, to the canonical absolute path it refers
/// to. The path is returned whether or not anything exists there.
///
/// Returns `None` for hrefs that cannot be parsed, that use a scheme other than `file`, that
/// name a non-local host, or that have no path at all (same-document references like `#intro`).
pub fn resolve_href<P: AsRef<Path>>(referrer: P, href: &str) -> Option<PathBuf> {
    let (_, raw_path, _) = split_local_href(href)?;
    if raw_path.is_empty() {
        return None;
    }
    let decoded = urlencoding::decode(raw_path).ok()?;
    let target = PathBuf::from(decoded.as_ref());
    if target.is_absolute() {
        Some(canonicalize(target))
    } else {
        Some(canonicalize(referrer.as_ref().join("..").join(target)))
    }
}

/// Percent-encode a filesystem path for use in an href. Separators are kept.
pub fn encode_path(path: &str) -> String {
    path.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Returns the string to use for referring to `path` in place of `original_href`.
///
/// The path is percent-encoded and takes the place of the original href's path: the original
/// scheme, host, query and fragment are all kept verbatim. If the original href has a scheme, the
/// new path must be absolute.
pub fn path_as_href(path: &str, original_href: &str) -> Result<String, NotedirError> {
    let encoded = encode_path(path);
    let (prefix, suffix) = match split_local_href(original_href) {
        Some((prefix, _, suffix)) => (prefix, suffix),
        None => {
            let end = original_href.find(['?', '#']).unwrap_or(original_href.len());
            ("", &original_href[end..])
        }
    };
    if !prefix.is_empty() && !path.starts_with('/') {
        return Err(NotedirError::Command(format!(
            "Cannot put a relative path [{path}] into a URL with scheme or host [{original_href}]"
        )));
    }
    Ok(format!("{prefix}{encoded}{suffix}"))
}

/// The href `referrer` should use to reach `target`, shaped like `original_href`.
pub fn href_for(referrer: &Path, target: &Path, original_href: &str) -> Result<String, NotedirError> {
    match split_local_href(original_href) {
        Some((prefix, _, _)) if !prefix.is_empty() => {
            path_as_href(&os_path_to_string(target), original_href)
        }
        _ => path_as_href(&href_path(referrer, target), original_href),
    }
}

/// Group the refs of `info` by the canonical path they resolve to. Refs that do not resolve to a
/// local path are omitted.
pub fn path_refs(info: &FileInfo) -> BTreeMap<PathBuf, BTreeSet<String>> {
    let mut grouped: BTreeMap<PathBuf, BTreeSet<String>> = BTreeMap::new();
    for href in info.refs.iter() {
        if let Some(target) = resolve_href(&info.path, href) {
            grouped.entry(target).or_default().insert(href.clone());
        }
    }
    grouped
}
