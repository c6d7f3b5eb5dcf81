use std::{
    borrow::Cow,
    fs,
    path::{Component, Path, PathBuf},
};

/// Utility function to replace separators and convert to unicode (via to_string_lossy) on os path.
pub fn os_path_to_string<P: AsRef<Path>>(os_path_ref: P) -> String {
    let path = os_path_ref.as_ref();
    if path.as_os_str().is_empty() {
        return String::new();
    }
    let res = path
        .components()
        .map(|c| match c {
            Component::RootDir => Cow::from("".to_string()),
            _ => c.as_os_str().to_string_lossy(),
        })
        .collect::<Vec<_>>()
        .join("/");
    if res.is_empty() {
        // The root directory on its own
        "/".to_string()
    } else {
        res
    }
}

/// Make a path absolute against the current working directory without touching the filesystem
/// beyond reading the working directory.
pub fn absolute<P: AsRef<Path>>(path: P) -> PathBuf {
    let path = path.as_ref();
    if path.is_absolute() {
        return path.to_path_buf();
    }
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Canonicalize a path the way references are compared: absolute, `.` and `..` collapsed, and
/// symlinks resolved for every prefix that exists on disk. Components past the first missing
/// one are appended literally, so paths of files that do not exist (yet) still canonicalize.
pub fn canonicalize<P: AsRef<Path>>(path: P) -> PathBuf {
    let path = absolute(path);
    let mut resolved = PathBuf::new();
    let mut exists = true;
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => resolved.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                resolved.pop();
                // Popping may land us back inside the existing portion of the tree.
                exists = resolved.exists();
            }
            Component::Normal(name) => {
                resolved.push(name);
                if exists {
                    match fs::canonicalize(&resolved) {
                        Ok(real) => resolved = real,
                        Err(_) => exists = false,
                    }
                }
            }
        }
    }
    resolved
}

/// Relative path from the directory `from_dir` to `to`. Both paths are expected to be canonical.
///
/// Returns `.` when the two are the same location.
pub fn relative_path(from_dir: &Path, to: &Path) -> PathBuf {
    let from_parts: Vec<Component> = from_dir.components().collect();
    let to_parts: Vec<Component> = to.components().collect();
    let common_len = from_parts
        .iter()
        .zip(to_parts.iter())
        .take_while(|(from, to)| from == to)
        .count();

    let mut result = PathBuf::new();
    for _ in common_len..from_parts.len() {
        result.push("..");
    }
    for part in &to_parts[common_len..] {
        result.push(part.as_os_str());
    }
    if result.as_os_str().is_empty() {
        PathBuf::from(".")
    } else {
        result
    }
}

/// Returns the path to use for a reference from file `src` to file `dest`: a relative path to
/// `dest` from the directory containing `src`, with forward slashes.
///
/// For example, for src `/foo/bar/baz.md` and dest `/foo/meh/blah.png`, returns
/// `../meh/blah.png`. Both paths are canonicalized first.
pub fn href_path<S: AsRef<Path>, D: AsRef<Path>>(src: S, dest: D) -> String {
    let src = canonicalize(src);
    let src_dir = src.parent().unwrap_or(&src);
    let dest = canonicalize(dest);
    os_path_to_string(relative_path(src_dir, &dest))
}

/// True if `path` equals `ancestor` or lies somewhere below it.
pub fn is_within(path: &Path, ancestor: &Path) -> bool {
    path.starts_with(ancestor)
}
