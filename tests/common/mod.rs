//! Shared test utilities for integration tests.
//!
//! Import from integration test files as:
//! ```ignore
//! mod common;
//! ```

use std::{fs, path::Path, path::PathBuf};
use tempfile::TempDir;

/// Initialize tracing for tests, respecting RUST_LOG env var.
///
/// Safe to call multiple times, later calls are no-ops.
#[allow(dead_code)]
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init()
        .ok();
}

/// Create a small notes collection:
///
/// - `one.md`: frontmatter with title, created and keywords, a hashtag and a link to `two.md`
/// - `two.md`: links back to `one.md` and to a missing `ghost.md`
/// - `sub/three.html`: title, keywords meta and a link to `../one.md`
/// - `sub/photo.png`: not parsed beyond its path
///
/// Returns the canonical path of the collection root.
#[allow(dead_code)]
pub fn create_test_notes(temp_dir: &TempDir) -> PathBuf {
    let root = notedir::paths::canonicalize(temp_dir.path().join("notes"));
    write_notes(
        &root,
        &[
            (
                "one.md",
                "---\ntitle: First\ncreated: 2001-02-03 04:05:06\nkeywords: [journal, food]\n---\n\
                 A #personal note linking to [two](two.md#part).\n",
            ),
            (
                "two.md",
                "# Second\nBack to [one](one.md) and off to [nowhere](ghost.md). #journal\n",
            ),
            (
                "sub/three.html",
                "<html><head><title>Third</title><meta name=\"keywords\" content=\"food, travel\">\
                 </head><body><a href=\"../one.md\">one</a></body></html>",
            ),
            ("sub/photo.png", "not really a png"),
        ],
    );
    root
}

/// Write each `(relative path, content)` pair below `root`, creating folders as needed.
#[allow(dead_code)]
pub fn write_notes(root: &Path, notes: &[(&str, &str)]) {
    for (relative, content) in notes.iter() {
        let path = root.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, content).unwrap();
    }
}

/// The content of `root/relative`, or `None` if it does not exist.
#[allow(dead_code)]
pub fn read_note(root: &Path, relative: &str) -> Option<String> {
    fs::read_to_string(root.join(relative)).ok()
}
