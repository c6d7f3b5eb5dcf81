//! User-level operations on a notes collection.

mod common;

use common::{init_logging, read_note, write_notes};
use notedir::{
    api::{MetadataChange, MoveOptions, Notedir},
    config::RepoConfig,
    paths::canonicalize,
    properties::{parse_created, FileInfoReq},
    repo::{DirectRepo, Repository},
    NotedirError,
};
use std::{
    collections::{BTreeMap, BTreeSet},
    fs,
    path::{Path, PathBuf},
};
use tempfile::TempDir;
use test_log::test;

fn setup(temp_dir: &TempDir) -> (PathBuf, Notedir<DirectRepo>) {
    let root = canonicalize(temp_dir.path());
    let repo = DirectRepo::new(RepoConfig::new([&root])).unwrap();
    (root, Notedir::new(repo))
}

fn single(root: &Path, src: &str, dest: &str) -> BTreeMap<PathBuf, PathBuf> {
    BTreeMap::from([(root.join(src), root.join(dest))])
}

#[test(tokio::test)]
async fn test_replace_path_hrefs() {
    init_logging();
    let temp_dir = TempDir::new().unwrap();
    let (root, notedir) = setup(&temp_dir);
    write_notes(
        &root,
        &[
            ("one.md", "I link to [two](two.md) [twice](two.md#section)."),
            ("subdir/three.md", "I link to [two](../two.md) and [four](four.md)."),
        ],
    );
    let edits = notedir
        .replace_path_hrefs(&root.join("two.md"), &root.join("subdir/new.md"))
        .await
        .unwrap();
    assert_eq!(edits.len(), 3);
    assert_eq!(
        read_note(&root, "one.md").as_deref(),
        Some("I link to [two](subdir/new.md) [twice](subdir/new.md#section).")
    );
    assert_eq!(
        read_note(&root, "subdir/three.md").as_deref(),
        Some("I link to [two](new.md) and [four](four.md).")
    );
}

#[test(tokio::test)]
async fn test_move_into_folder() {
    let temp_dir = TempDir::new().unwrap();
    let (root, notedir) = setup(&temp_dir);
    write_notes(
        &root,
        &[
            ("cwd/subdir/old.md", ""),
            ("dir/referrer.md", "I have a [link](../cwd/subdir/old.md)."),
        ],
    );
    let moved = notedir
        .move_into(
            &[root.join("cwd/subdir/old.md")],
            &root.join("dir"),
            MoveOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(
        moved,
        single(&root, "cwd/subdir/old.md", "dir/old.md")
    );
    assert_eq!(
        read_note(&root, "dir/referrer.md").as_deref(),
        Some("I have a [link](old.md).")
    );
}

#[test(tokio::test)]
async fn test_move_picks_free_name() {
    let temp_dir = TempDir::new().unwrap();
    let (root, notedir) = setup(&temp_dir);
    write_notes(
        &root,
        &[
            ("cwd/referrer.md", "I have a [link](foo.md)."),
            ("cwd/foo.md", "foo"),
            ("dir/bar.md", "bar"),
            ("dir/2-bar.md", "baz"),
        ],
    );
    let moved = notedir
        .move_paths(
            &single(&root, "cwd/foo.md", "dir/bar.md"),
            MoveOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(moved, single(&root, "cwd/foo.md", "dir/3-bar.md"));
    assert_eq!(read_note(&root, "cwd/foo.md"), None);
    assert_eq!(read_note(&root, "dir/bar.md").as_deref(), Some("bar"));
    assert_eq!(read_note(&root, "dir/2-bar.md").as_deref(), Some("baz"));
    assert_eq!(read_note(&root, "dir/3-bar.md").as_deref(), Some("foo"));
    assert_eq!(
        read_note(&root, "cwd/referrer.md").as_deref(),
        Some("I have a [link](../dir/3-bar.md).")
    );
}

#[test(tokio::test)]
async fn test_move_avoids_companion_folders() {
    let temp_dir = TempDir::new().unwrap();
    let (root, notedir) = setup(&temp_dir);
    write_notes(&root, &[("cwd/foo.md", "")]);
    fs::create_dir_all(root.join("dir/foo.md.resources")).unwrap();
    let moved = notedir
        .move_into(&[root.join("cwd/foo.md")], &root.join("dir"), MoveOptions::default())
        .await
        .unwrap();
    assert_eq!(moved, single(&root, "cwd/foo.md", "dir/2-foo.md"));
    assert!(root.join("dir/2-foo.md").exists());
    assert!(root.join("dir/foo.md.resources").is_dir());
}

#[test(tokio::test)]
async fn test_move_file_with_its_folder() {
    let temp_dir = TempDir::new().unwrap();
    let (root, notedir) = setup(&temp_dir);
    write_notes(
        &root,
        &[
            ("cwd/foo.md", "I have an [attachment](foo.md.resources/blah.txt)."),
            ("cwd/foo.md.resources/blah.txt", "Yo"),
            ("cwd/bar.md", "This is a [bad idea](foo.md.resources/blah.txt)."),
            ("dir/foo.md", "I conflict!"),
        ],
    );
    let moved = notedir
        .move_into(
            &[root.join("cwd/foo.md"), root.join("cwd/foo.md.resources")],
            &root.join("dir"),
            MoveOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(
        moved,
        BTreeMap::from([
            (root.join("cwd/foo.md"), root.join("dir/2-foo.md")),
            (
                root.join("cwd/foo.md.resources"),
                root.join("dir/foo.md.resources")
            ),
        ])
    );
    assert_eq!(read_note(&root, "dir/foo.md").as_deref(), Some("I conflict!"));
    // Still correct relative to the new location.
    assert_eq!(
        read_note(&root, "dir/2-foo.md").as_deref(),
        Some("I have an [attachment](foo.md.resources/blah.txt).")
    );
    assert_eq!(
        read_note(&root, "dir/foo.md.resources/blah.txt").as_deref(),
        Some("Yo")
    );
    assert_eq!(
        read_note(&root, "cwd/bar.md").as_deref(),
        Some("This is a [bad idea](../dir/foo.md.resources/blah.txt).")
    );
}

#[test(tokio::test)]
async fn test_swap_with_name_checks() {
    let temp_dir = TempDir::new().unwrap();
    let (root, notedir) = setup(&temp_dir);
    write_notes(
        &root,
        &[
            ("one.md", "I link to [two](two.md)."),
            ("two.md", "I link to [one](one.md)."),
        ],
    );
    let moves = BTreeMap::from([
        (root.join("one.md"), root.join("two.md")),
        (root.join("two.md"), root.join("one.md")),
    ]);
    let moved = notedir
        .move_paths(&moves, MoveOptions::default())
        .await
        .unwrap();
    assert_eq!(moved, moves);
    assert_eq!(
        read_note(&root, "one.md").as_deref(),
        Some("I link to [one](two.md).")
    );
    assert_eq!(
        read_note(&root, "two.md").as_deref(),
        Some("I link to [two](one.md).")
    );
}

#[test(tokio::test)]
async fn test_move_without_name_checks_refuses_overwrite() {
    let temp_dir = TempDir::new().unwrap();
    let (root, notedir) = setup(&temp_dir);
    write_notes(&root, &[("a.md", "a"), ("b.md", "b")]);
    let options = MoveOptions {
        into_dirs: false,
        check_exists: false,
        ..Default::default()
    };
    let err = notedir
        .move_paths(&single(&root, "a.md", "b.md"), options)
        .await
        .unwrap_err();
    assert!(matches!(err, NotedirError::Command(_)), "{err:?}");
    assert_eq!(read_note(&root, "b.md").as_deref(), Some("b"));

    let err = notedir
        .move_paths(&single(&root, "missing.md", "c.md"), MoveOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, NotedirError::NotFound(_)), "{err:?}");
}

#[test(tokio::test)]
async fn test_change_metadata() {
    let temp_dir = TempDir::new().unwrap();
    let (root, notedir) = setup(&temp_dir);
    write_notes(
        &root,
        &[
            ("a.md", "#old text"),
            ("b.html", "<html><head></head><body></body></html>"),
        ],
    );
    let change = MetadataChange {
        add_tags: BTreeSet::from(["New".to_string()]),
        del_tags: BTreeSet::from(["old".to_string()]),
        title: Some("Renamed".to_string()),
        created: Some(parse_created("2020-01-02 03:04:05").unwrap()),
    };
    let paths = BTreeSet::from([root.join("a.md"), root.join("b.html")]);
    notedir.change(&paths, &change).await.unwrap();

    for path in paths.iter() {
        let info = notedir
            .repo()
            .info(path, FileInfoReq::internal())
            .await
            .unwrap();
        assert_eq!(info.title.as_deref(), Some("Renamed"), "{path:?}");
        assert_eq!(
            info.tags,
            BTreeSet::from(["new".to_string()]),
            "{path:?}"
        );
        assert_eq!(info.created, change.created, "{path:?}");
    }
}

#[test(tokio::test)]
async fn test_move_parent_folder_options() {
    let temp_dir = TempDir::new().unwrap();
    let (root, notedir) = setup(&temp_dir);
    write_notes(&root, &[("dir/sub/a.md", "[b](../../b.md)"), ("b.md", "b")]);

    let strict = MoveOptions {
        create_parents: false,
        ..Default::default()
    };
    assert!(notedir
        .move_paths(&single(&root, "dir/sub/a.md", "new/place/a.md"), strict)
        .await
        .is_err());
    assert!(root.join("dir/sub/a.md").exists());

    let tidy = MoveOptions {
        delete_empty_parents: true,
        ..Default::default()
    };
    notedir
        .move_paths(&single(&root, "dir/sub/a.md", "new/place/a.md"), tidy)
        .await
        .unwrap();
    assert_eq!(
        read_note(&root, "new/place/a.md").as_deref(),
        Some("[b](../../b.md)")
    );
    assert!(!root.join("dir").exists());
    assert!(root.is_dir());
}

#[test(tokio::test)]
async fn test_organize() {
    let temp_dir = TempDir::new().unwrap();
    let (root, notedir) = setup(&temp_dir);
    write_notes(
        &root,
        &[
            ("day.md", "#journal [see](old/night.md)"),
            ("old/night.md", "#journal"),
            ("misc.md", "[day](day.md) and [night](old/night.md)"),
        ],
    );
    let journal = root.join("journal");
    let organizer = |info: &notedir::properties::FileInfo| {
        if info.tags.contains("journal") {
            journal.join(info.filename())
        } else {
            info.path.clone()
        }
    };

    let moved = notedir.organize(organizer).await.unwrap();
    assert_eq!(
        moved,
        BTreeMap::from([
            (root.join("day.md"), root.join("journal/day.md")),
            (root.join("old/night.md"), root.join("journal/night.md")),
        ])
    );
    assert!(!root.join("old").exists());
    assert_eq!(
        read_note(&root, "journal/day.md").as_deref(),
        Some("#journal [see](night.md)")
    );
    assert_eq!(
        read_note(&root, "misc.md").as_deref(),
        Some("[day](journal/day.md) and [night](journal/night.md)")
    );

    assert!(notedir.organize(organizer).await.unwrap().is_empty());
}
