//! Shared test utilities for building note collections on disk

use std::{fs, path::Path};

/// Initialize logging for tests
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init()
        .ok();
}

/// Write each `(relative path, content)` pair below `root`, creating folders as needed.
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
pub fn read_note(root: &Path, relative: &str) -> Option<String> {
    fs::read_to_string(root.join(relative)).ok()
}
