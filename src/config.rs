use crate::error::NotedirError;
use regex::{escape as re_escape, Regex, RegexBuilder};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::{
    fmt,
    fs::{read_to_string, write},
    hash::{Hash, Hasher},
    ops::Deref,
    path::{Path, PathBuf},
};

/// Default name of the configuration file looked up by the command line tool.
pub const DEFAULT_CONFIG_FILE: &str = ".notedir.toml";

/// A [Regex] that (de)serializes as its pattern string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WrappedRegex(
    #[serde(serialize_with = "serialize_regex")]
    #[serde(deserialize_with = "deserialize_regex")]
    Regex,
);

fn serialize_regex<S>(re: &Regex, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(re.as_str())
}

struct ReVisitor;

impl<'de> de::Visitor<'de> for ReVisitor {
    type Value = Regex;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        write!(formatter, "A regex string, as validated by the Rust regex crate (https://docs.rs/regex/latest/regex/index.html)", )
    }

    fn visit_str<E>(self, s: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        Regex::new(s).map_err(|_e| E::invalid_value(de::Unexpected::Str(s), &self))
    }
}

fn deserialize_regex<'de, D>(deserializer: D) -> Result<Regex, D::Error>
where
    D: Deserializer<'de>,
{
    deserializer.deserialize_str(ReVisitor)
}

impl WrappedRegex {
    pub fn new(pattern: &str) -> Result<WrappedRegex, NotedirError> {
        Ok(WrappedRegex(Regex::new(pattern)?))
    }
}

impl Hash for WrappedRegex {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.as_str().hash(state);
    }
}

impl PartialEq for WrappedRegex {
    fn eq(&self, other: &Self) -> bool {
        self.0.as_str() == other.0.as_str()
    }
}

impl Eq for WrappedRegex {}

/// Lenient conversion: an invalid pattern is matched literally instead.
impl From<&str> for WrappedRegex {
    fn from(other: &str) -> WrappedRegex {
        WrappedRegex(
            RegexBuilder::new(other)
                .unicode(true)
                .build()
                .unwrap_or_else(|_| {
                    RegexBuilder::new(&re_escape(other))
                        .unicode(true)
                        .build()
                        .expect("An escaped string to always succeed as a regex")
                }),
        )
    }
}

impl Deref for WrappedRegex {
    type Target = Regex;
    fn deref(&self) -> &Regex {
        &self.0
    }
}

fn default_ignore() -> Vec<WrappedRegex> {
    vec![WrappedRegex::from(r"^\."), WrappedRegex::from(r"\.icloud$")]
}

/// How to find and index a collection of notes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoConfig {
    /// The folders (or single files) searched recursively when querying, finding backlinks, etc.
    /// Must not be empty.
    pub root_paths: Vec<PathBuf>,
    /// Where the SQLite cache lives. Created if missing; safe to delete while nothing is running.
    #[serde(default)]
    pub cache_path: Option<PathBuf>,
    /// Files or folders whose name matches any of these patterns are not processed at all: never
    /// parsed, never returned by queries, and never searched for backlinks. Defaults to names
    /// starting with `.` and `.icloud` placeholders.
    #[serde(default = "default_ignore")]
    pub ignore: Vec<WrappedRegex>,
    /// Files or folders whose name matches any of these patterns are listed and can be linked to,
    /// but are never parsed. Applies to everything below a matching folder too.
    #[serde(default)]
    pub skip_parse: Vec<WrappedRegex>,
}

impl Default for RepoConfig {
    fn default() -> Self {
        RepoConfig {
            root_paths: Vec::new(),
            cache_path: None,
            ignore: default_ignore(),
            skip_parse: Vec::new(),
        }
    }
}

impl RepoConfig {
    pub fn new<I, P>(root_paths: I) -> RepoConfig
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        RepoConfig {
            root_paths: root_paths.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn with_cache<P: Into<PathBuf>>(mut self, cache_path: P) -> RepoConfig {
        self.cache_path = Some(cache_path.into());
        self
    }

    /// Canonicalize the root paths. Fails if there are none.
    pub fn normalize(mut self) -> Result<RepoConfig, NotedirError> {
        if self.root_paths.is_empty() {
            return Err(NotedirError::Command(
                "`root_paths` must be non-empty in the repository config".to_string(),
            ));
        }
        self.root_paths = self
            .root_paths
            .iter()
            .map(crate::paths::canonicalize)
            .collect();
        self.cache_path = self.cache_path.map(crate::paths::absolute);
        Ok(self)
    }

    /// The root containing `path`, if any. Expects canonical paths.
    pub fn root_of(&self, path: &Path) -> Option<&Path> {
        self.root_paths
            .iter()
            .filter(|root| path.starts_with(root))
            .max_by_key(|root| root.components().count())
            .map(PathBuf::as_path)
    }

    fn any_component_matches(&self, path: &Path, patterns: &[WrappedRegex]) -> bool {
        if patterns.is_empty() {
            return false;
        }
        let relative = match self.root_of(path) {
            Some(root) => path.strip_prefix(root).unwrap_or(path),
            None => path,
        };
        relative.components().any(|component| {
            let name = component.as_os_str().to_string_lossy();
            patterns.iter().any(|re| re.is_match(&name))
        })
    }

    /// True if `path`, or any folder between its root and it, is ignored.
    pub fn is_ignored(&self, path: &Path) -> bool {
        self.any_component_matches(path, &self.ignore)
    }

    /// True if `path` should be listed but not parsed.
    pub fn is_skip_parse(&self, path: &Path) -> bool {
        self.any_component_matches(path, &self.skip_parse)
    }

    /// True if `path` lies under one of the roots and is not ignored.
    pub fn is_managed(&self, path: &Path) -> bool {
        self.root_of(path).is_some() && !self.is_ignored(path)
    }
}

/// Loads and stores a [RepoConfig].
pub trait ConfigProvider {
    fn get_repo_config(&self) -> Result<RepoConfig, NotedirError>;
    fn set_repo_config(&self, config: &RepoConfig) -> Result<(), NotedirError>;
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TomlConfigProvider {
    path: PathBuf,
}

impl TomlConfigProvider {
    pub fn new(path: PathBuf) -> Self {
        TomlConfigProvider { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigProvider for TomlConfigProvider {
    fn get_repo_config(&self) -> Result<RepoConfig, NotedirError> {
        tracing::debug!("Attempting to read repository config from: {:?}", &self.path);
        if !self.path.exists() {
            return Err(NotedirError::NotFound(format!(
                "config file {:?} does not exist",
                self.path
            )));
        }
        let content = read_to_string(&self.path)?;
        let mut config: RepoConfig = toml::from_str(&content)?;
        // Relative roots are relative to the config file, not the working directory.
        if let Some(base) = self.path.parent() {
            config.root_paths = config
                .root_paths
                .into_iter()
                .map(|p| if p.is_relative() { base.join(p) } else { p })
                .collect();
            config.cache_path = config
                .cache_path
                .map(|p| if p.is_relative() { base.join(p) } else { p });
        }
        Ok(config)
    }

    fn set_repo_config(&self, config: &RepoConfig) -> Result<(), NotedirError> {
        tracing::debug!("Attempting to write repository config to: {:?}", &self.path);
        let toml_string = toml::to_string(config)?;
        write(&self.path, toml_string)?;
        Ok(())
    }
}

pub fn get_content<P: AsRef<Path>>(path: P) -> Result<String, NotedirError> {
    tracing::debug!("Reading {:?}", path.as_ref());
    Ok(read_to_string(path)?)
}

pub fn set_content<P: AsRef<Path>>(path: P, text: &str) -> Result<(), NotedirError> {
    tracing::debug!("Writing {:?}", path.as_ref());
    Ok(write(path, text)?)
}
