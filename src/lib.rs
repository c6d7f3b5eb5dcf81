//! # notedir
//!
//! Link-preserving rearrangement and incremental metadata indexing for a directory of
//! interlinked notes.
//!
//! ## Overview
//!
//! A notes folder is a tree of Markdown, HTML and other files that reference each other through
//! relative or absolute links. notedir lets you move and rename those files without breaking any
//! reference, and answers metadata queries (tags, titles, creation dates, backlinks) from an
//! SQLite index that only re-reads files whose stat signature changed.
//!
//! ## Architecture
//!
//! - **[`codec`]**: per-format [`codec::Accessor`]s that extract a [`properties::FileInfo`] from a
//!   document and apply [`commands::FileEditCmd`]s to it. Selected by file extension.
//! - **[`paths`]**: href resolution (`href -> canonical path`) and the inverse, grafting a new path
//!   back into the shape of an original href.
//! - **[`rearrange`]**: plans the ordered list of edits that carries out a set of moves while
//!   keeping every inbound and outbound link valid, including swaps and cycles.
//! - **[`repo`]**: the [`repo::Repository`] contract, a full-rescan [`repo::DirectRepo`] and the
//!   incrementally cached [`repo::CacheRepo`] (feature `cache`).
//! - **[`api`]**: the [`api::Notedir`] façade with user-level operations such as moving files
//!   into folders and bulk metadata changes.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use notedir::{api::Notedir, config::RepoConfig, repo::{DirectRepo, Repository}, properties::FileInfoReq};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), notedir::NotedirError> {
//!     let repo = DirectRepo::new(RepoConfig::new(["./notes"]))?;
//!     let notedir = Notedir::new(repo);
//!
//!     let query = "tag:journal sort:-created".parse()?;
//!     for info in notedir.repo().query(&query, FileInfoReq::internal()).await? {
//!         println!("{:?}: {:?}", info.path, info.title);
//!     }
//!
//!     notedir
//!         .move_into(&["./notes/draft.md".into()], "./notes/archive".as_ref(), Default::default())
//!         .await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! - `cache` (default): the SQLite-backed [`repo::CacheRepo`].
//! - `bin`: the `notedir` command-line tool.

pub mod api;
pub mod codec;
pub mod commands;
pub mod config;
#[cfg(feature = "cache")]
pub mod db;
pub mod error;
pub mod paths;
pub mod properties;
pub mod query;
pub mod rearrange;
pub mod repo;
#[cfg(test)]
mod tests;

pub use error::*;
