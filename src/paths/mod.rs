pub mod href;
pub mod path;

pub use href::{encode_path, href_for, path_as_href, path_refs, resolve_href};
pub use path::{absolute, canonicalize, href_path, is_within, os_path_to_string, relative_path};
