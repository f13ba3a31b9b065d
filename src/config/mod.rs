use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::media::ResolverVersion;

pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:107.0) Gecko/20100101 Firefox/107.4";

/// HTTP settings shared by every network-facing component.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub user_agent: String,
    pub timeout_secs: u64,
    pub tmate_base: String,
    pub musicaldown_base: String,
    /// Where post pages live for metadata lookups.
    pub page_base: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout_secs: 60,
            tmate_base: "https://tmate.cc/".to_string(),
            musicaldown_base: "https://musicaldown.com/".to_string(),
            page_base: "https://www.tiktok.com/".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// "text" or "json"
    pub format: Option<String>,
}

/// On-disk TOML configuration. Every field is optional; CLI flags win.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub links: Option<PathBuf>,
    pub watermark: Option<bool>,
    pub workers: Option<usize>,
    pub api_version: Option<ResolverVersion>,
    pub save_metadata: Option<bool>,
    pub skip_existing: Option<bool>,
    pub flat: Option<bool>,
    pub output_dir: Option<PathBuf>,
    pub errors: Option<PathBuf>,
    pub logging: LoggingConfig,
    pub http: HttpConfig,
}

impl ConfigFile {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    pub fn logging_format(&self) -> &str {
        self.logging.format.as_deref().unwrap_or("text")
    }
}

/// Values given on the command line. `None`/`false` means "not given".
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub links: Option<PathBuf>,
    pub watermark: Option<bool>,
    pub workers: Option<usize>,
    pub api_version: Option<ResolverVersion>,
    pub save_metadata: bool,
    pub skip_existing: bool,
    pub flat: bool,
    pub output_dir: Option<PathBuf>,
    pub errors: Option<PathBuf>,
}

/// Where and how downloaded files land.
#[derive(Debug, Clone)]
pub struct DownloadOptions {
    pub output_dir: PathBuf,
    pub flat: bool,
    pub skip_existing: bool,
}

/// Fully merged run configuration, handed to each component at construction.
#[derive(Debug, Clone)]
pub struct Config {
    pub links: PathBuf,
    pub watermark: bool,
    pub workers: usize,
    pub api_version: ResolverVersion,
    pub save_metadata: bool,
    pub errors: PathBuf,
    pub download: DownloadOptions,
    pub http: HttpConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            links: PathBuf::from("links.txt"),
            watermark: false,
            workers: 3,
            api_version: ResolverVersion::default(),
            save_metadata: false,
            errors: PathBuf::from("errors.txt"),
            download: DownloadOptions {
                output_dir: PathBuf::from("."),
                flat: false,
                skip_existing: false,
            },
            http: HttpConfig::default(),
        }
    }
}

impl Config {
    pub fn from_sources(file: Option<ConfigFile>, cli: CliOverrides) -> Result<Self> {
        let file = file.unwrap_or_default();
        let defaults = Config::default();

        let workers = cli.workers.or(file.workers).unwrap_or(defaults.workers);
        if workers == 0 {
            bail!("workers must be a positive integer");
        }

        Ok(Self {
            links: cli.links.or(file.links).unwrap_or(defaults.links),
            watermark: cli.watermark.or(file.watermark).unwrap_or(defaults.watermark),
            workers,
            api_version: cli
                .api_version
                .or(file.api_version)
                .unwrap_or(defaults.api_version),
            save_metadata: cli.save_metadata || file.save_metadata.unwrap_or(false),
            errors: cli.errors.or(file.errors).unwrap_or(defaults.errors),
            download: DownloadOptions {
                output_dir: cli
                    .output_dir
                    .or(file.output_dir)
                    .unwrap_or(defaults.download.output_dir),
                flat: cli.flat || file.flat.unwrap_or(false),
                skip_existing: cli.skip_existing || file.skip_existing.unwrap_or(false),
            },
            http: file.http,
        })
    }
}
