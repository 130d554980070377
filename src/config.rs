//! YAML configuration.
//!
//! Searched in order: `./config.local.yaml`, `./config.yaml`,
//! `<home>/config.yaml`, `./config.example.yaml`. The first file that
//! exists wins; none at all means defaults. Values out of range are put back
//! to their defaults after loading.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{IndexError, Result};

pub const DEFAULT_PORT: u64 = 13134;
pub const DEFAULT_MAX_FILE_SIZE: u64 = 2 * 1024 * 1024;
pub const DEFAULT_MAX_RESULTS: usize = 5000;
pub const DEFAULT_MAX_RESULTS_PER_FILE: usize = 1000;
pub const DEFAULT_MAX_FILES_RESULTS: usize = 100;

/// Name of the per-user directory under the home directory.
pub const HOME_DIR_NAME: &str = ".haystack";

pub const DEFAULT_INCLUDE: &[&str] = &[
    "*.cc", "*.c", "*.hpp", "*.cpp", "*.h", "*.md", "*.js", "*.ts", "*.txt", "*.mm", "*.java",
    "*.cs", "*.py", "*.kt", "*.go", "*.rb", "*.php", "*.html", "*.css", "*.yaml", "*.yml",
    "*.toml", "*.xml", "*.sql", "*.sh", "Makefile", "*.bat", "*.ps1", "*.sln", "*.json",
    "*.vcxproj", "*.vcproj", "*.vcxproj.filters", "*.rs", "*.tsx", "*.jsx", "*.swift",
    "*.scala", "*.lua", "*.proto",
];

// ─── Schema ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExcludeFilters {
    /// Honour `.gitignore` files while scanning.
    pub use_git_ignore: bool,
    /// Extra glob excludes. Applied in addition to `.gitignore` rules.
    pub customized: Vec<String>,
}

impl Default for ExcludeFilters {
    fn default() -> Self {
        ExcludeFilters {
            use_git_ignore: true,
            customized: Vec::new(),
        }
    }
}

/// Include/exclude rules deciding which files of a workspace get indexed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Filters {
    pub exclude: ExcludeFilters,
    pub include: Vec<String>,
}

impl Default for Filters {
    fn default() -> Self {
        Filters {
            exclude: ExcludeFilters::default(),
            include: DEFAULT_INCLUDE.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    /// Holds `data/`, `server.lock` and the logs. Empty means
    /// `<home>/.haystack`.
    pub home_path: String,
    pub port: u64,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        GlobalConfig {
            home_path: String::new(),
            port: DEFAULT_PORT,
        }
    }
}

/// Server-side ceilings on result sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchLimit {
    pub max_results: usize,
    pub max_results_per_file: usize,
    pub max_files_results: usize,
}

impl Default for SearchLimit {
    fn default() -> Self {
        SearchLimit {
            max_results: DEFAULT_MAX_RESULTS,
            max_results_per_file: DEFAULT_MAX_RESULTS_PER_FILE,
            max_files_results: DEFAULT_MAX_FILES_RESULTS,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub limit: SearchLimit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub max_file_size: u64,
    /// Parser threads; clamped to `[1, NumCPU]`, 0 means NumCPU.
    pub index_workers: usize,
    pub filters: Filters,
    pub search: SearchConfig,
    /// Log to stdout instead of stderr.
    pub logging_stdout: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            index_workers: 4,
            filters: Filters::default(),
            search: SearchConfig::default(),
            logging_stdout: false,
        }
    }
}

/// Client-side defaults for requests the CLI sends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientLimit {
    pub max_results: Option<usize>,
    pub max_results_per_file: Option<usize>,
    pub max_files_results: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub default_workspace: Option<String>,
    pub default_limit: ClientLimit,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub global: GlobalConfig,
    pub server: ServerConfig,
    pub client: ClientConfig,
}

// ─── Loading ─────────────────────────────────────────────────────────

fn default_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(HOME_DIR_NAME)
}

/// Candidate config files, most specific first.
pub fn search_paths() -> Vec<PathBuf> {
    vec![
        PathBuf::from("./config.local.yaml"),
        PathBuf::from("./config.yaml"),
        default_home().join("config.yaml"),
        PathBuf::from("./config.example.yaml"),
    ]
}

impl Config {
    /// Load from the first existing file of [`search_paths`], or defaults.
    pub fn load() -> Result<Config> {
        let found = search_paths().into_iter().find(|p| p.is_file());
        Self::load_from(found.as_deref())
    }

    /// Load from `path`, or defaults when `path` is `None`.
    pub fn load_from(path: Option<&Path>) -> Result<Config> {
        match path {
            Some(path) => {
                debug!(path = %path.display(), "Loading configuration");
                let text = std::fs::read_to_string(path).map_err(|e| {
                    IndexError::Config(format!("cannot read {}: {}", path.display(), e))
                })?;
                Self::from_yaml(&text)
            }
            None => Ok(Self::default().normalized()),
        }
    }

    pub fn from_yaml(text: &str) -> Result<Config> {
        let config: Config = if text.trim().is_empty() {
            Config::default()
        } else {
            serde_yaml::from_str(text).map_err(|e| IndexError::Config(e.to_string()))?
        };
        Ok(config.normalized())
    }

    /// Fill in the home path and put out-of-range values back to defaults.
    pub fn normalized(mut self) -> Config {
        if self.global.home_path.trim().is_empty() {
            self.global.home_path = default_home().to_string_lossy().into_owned();
        }
        if self.global.port == 0 || self.global.port > 65535 {
            self.global.port = DEFAULT_PORT;
        }
        if self.server.max_file_size == 0 {
            self.server.max_file_size = DEFAULT_MAX_FILE_SIZE;
        }
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        if self.server.index_workers == 0 || self.server.index_workers > cpus {
            self.server.index_workers = cpus;
        }
        let limit = &mut self.server.search.limit;
        if limit.max_results == 0 || limit.max_results > DEFAULT_MAX_RESULTS {
            limit.max_results = DEFAULT_MAX_RESULTS;
        }
        if limit.max_results_per_file == 0 || limit.max_results_per_file > DEFAULT_MAX_RESULTS_PER_FILE {
            limit.max_results_per_file = DEFAULT_MAX_RESULTS_PER_FILE;
        }
        if limit.max_files_results == 0 {
            limit.max_files_results = DEFAULT_MAX_FILES_RESULTS;
        }
        self
    }

    pub fn home_path(&self) -> PathBuf {
        PathBuf::from(&self.global.home_path)
    }

    /// `<home>/data`, holding the store and its version file.
    pub fn data_dir(&self) -> PathBuf {
        self.home_path().join("data")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.home_path().join("server.lock")
    }

    pub fn port(&self) -> u16 {
        u16::try_from(self.global.port).unwrap_or(DEFAULT_PORT as u16)
    }

    pub fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}/api/v1", self.port())
    }
}
