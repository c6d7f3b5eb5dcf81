//! notedir CLI tool
//!
//! Command-line interface for querying and rearranging a collection of notes.
//!
//! ## Commands
//!
//! - `info <path>`: Metadata, links and backlinks of one file
//! - `query [QUERY]`: Files matching a query such as `tag:journal -tag:draft sort:-created`
//! - `tags [QUERY]`: Tag counts over the files matching a query
//! - `mv <src>... <dest>`: Move files or folders, updating every link to and from them
//! - `relink <old> <new>`: Point links to one path at another without moving anything
//! - `change <path>...`: Add or remove tags, set titles or creation dates
//!
//! Results are printed to stdout as JSON. Logs go to stderr and are controlled by `RUST_LOG`.

use clap::{Parser, Subcommand};
use notedir::{
    api::{MetadataChange, MoveOptions, Notedir},
    config::{ConfigProvider, RepoConfig, TomlConfigProvider, DEFAULT_CONFIG_FILE},
    properties::{parse_created, FileInfoReq},
    query::FileQuery,
    repo::{CacheRepo, DirectRepo, Repository},
    NotedirError,
};
use std::{collections::BTreeSet, path::PathBuf};

#[derive(Parser)]
#[command(name = "notedir")]
#[command(author, version, about = "Query and rearrange a folder of interlinked notes", long_about = None)]
struct Cli {
    /// Configuration file (default: ~/.notedir.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Read the files directly instead of through the SQLite cache
    #[arg(long, global = true)]
    no_cache: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show everything known about a file
    Info {
        path: PathBuf,

        /// Comma-separated fields: path,refs,tags,title,created,backlinks
        #[arg(short, long, default_value = "path,refs,tags,title,created,backlinks")]
        fields: FileInfoReq,
    },

    /// List files matching a query
    Query {
        #[arg(default_value = "")]
        query: String,

        /// Comma-separated fields: path,refs,tags,title,created,backlinks
        #[arg(short, long, default_value = "path,tags,title,created")]
        fields: FileInfoReq,
    },

    /// Count tags over the files matching a query
    Tags {
        #[arg(default_value = "")]
        query: String,
    },

    /// Move files or folders and update links to and from them
    Mv {
        /// Paths to move
        #[arg(required = true)]
        sources: Vec<PathBuf>,

        /// New path, or an existing folder to move the sources into
        dest: PathBuf,

        /// Treat an existing folder destination as the new name instead of moving into it
        #[arg(long)]
        no_into_dirs: bool,

        /// Fail instead of picking a free name when the destination is taken
        #[arg(long)]
        no_check_exists: bool,

        /// Fail instead of creating missing folders on the way to the destination
        #[arg(long)]
        no_create_parents: bool,

        /// Remove folders left empty by the move
        #[arg(long)]
        delete_empty_parents: bool,
    },

    /// Replace links to one path with links to another, without moving any files
    Relink { original: PathBuf, replacement: PathBuf },

    /// Change metadata of one or more files
    Change {
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Comma-separated tags to add
        #[arg(long, value_delimiter = ',')]
        add_tags: Vec<String>,

        /// Comma-separated tags to remove
        #[arg(long, value_delimiter = ',')]
        del_tags: Vec<String>,

        #[arg(long)]
        title: Option<String>,

        /// Creation date, e.g. `2020-01-02 03:04:05`
        #[arg(long)]
        created: Option<String>,
    },
}

fn config_path(cli_path: Option<PathBuf>) -> Result<PathBuf, NotedirError> {
    match cli_path {
        Some(path) => Ok(path),
        None => std::env::var("HOME")
            .map(|home| PathBuf::from(home).join(DEFAULT_CONFIG_FILE))
            .map_err(|_| {
                NotedirError::Command(
                    "No --config given and HOME is not set, cannot find a config file".to_string(),
                )
            }),
    }
}

fn print_json(value: &serde_json::Value) -> Result<(), NotedirError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn clean_tags(tags: Vec<String>) -> BTreeSet<String> {
    tags.into_iter()
        .map(|tag| tag.trim().to_lowercase())
        .filter(|tag| !tag.is_empty())
        .collect()
}

async fn run<R: Repository>(notedir: &Notedir<R>, command: Commands) -> Result<(), NotedirError> {
    match command {
        Commands::Info { path, fields } => {
            let info = notedir.repo().info(&path, fields).await?;
            print_json(&info.as_json())
        }
        Commands::Query { query, fields } => {
            let query = query.parse::<FileQuery>()?;
            let infos = notedir.repo().query(&query, fields).await?;
            print_json(&serde_json::Value::Array(
                infos.iter().map(|info| info.as_json()).collect(),
            ))
        }
        Commands::Tags { query } => {
            let query = query.parse::<FileQuery>()?;
            let counts = notedir.repo().tag_counts(&query).await?;
            print_json(&serde_json::to_value(counts)?)
        }
        Commands::Mv {
            sources,
            dest,
            no_into_dirs,
            no_check_exists,
            no_create_parents,
            delete_empty_parents,
        } => {
            let options = MoveOptions {
                into_dirs: !no_into_dirs,
                check_exists: !no_check_exists,
                create_parents: !no_create_parents,
                delete_empty_parents,
            };
            let moved = notedir.move_into(&sources, &dest, options).await?;
            print_json(&serde_json::to_value(moved)?)
        }
        Commands::Relink {
            original,
            replacement,
        } => {
            let edits = notedir.replace_path_hrefs(&original, &replacement).await?;
            print_json(&serde_json::to_value(edits)?)
        }
        Commands::Change {
            paths,
            add_tags,
            del_tags,
            title,
            created,
        } => {
            let change = MetadataChange {
                add_tags: clean_tags(add_tags),
                del_tags: clean_tags(del_tags),
                title,
                created: created.as_deref().map(parse_created).transpose()?,
            };
            if change.is_empty() {
                return Err(NotedirError::Command(
                    "Nothing to change: pass --add-tags, --del-tags, --title or --created"
                        .to_string(),
                ));
            }
            let paths = paths.into_iter().collect::<BTreeSet<_>>();
            notedir.change(&paths, &change).await
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let provider = TomlConfigProvider::new(config_path(cli.config)?);
    let config: RepoConfig = provider.get_repo_config()?;
    tracing::debug!("Loaded config from {:?}", provider.path());

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async {
        if cli.no_cache {
            let notedir = Notedir::new(DirectRepo::new(config)?);
            run(&notedir, cli.command).await
        } else {
            let notedir = Notedir::new(CacheRepo::open(config).await?);
            let result = run(&notedir, cli.command).await;
            notedir.close().await?;
            result
        }
    })?;
    Ok(())
}
