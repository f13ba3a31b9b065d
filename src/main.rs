use anyhow::{Context, Result};
use clap::Parser;
use indicatif::MultiProgress;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::filter::{EnvFilter, LevelFilter};

mod config;
mod dispatch;
mod media;
mod utils;

use config::{CliOverrides, Config, ConfigFile};
use media::ResolverVersion;

#[derive(Parser, Debug)]
#[command(author, version, about = "Downloads short videos and photo posts from a list of share links", long_about = None)]
struct Args {
    /// Path to the file with one link per line
    #[arg(long)]
    links: Option<PathBuf>,

    /// Download videos without watermarks (default)
    #[arg(long, conflicts_with = "watermark")]
    no_watermark: bool,

    /// Download videos with watermarks
    #[arg(long)]
    watermark: bool,

    /// Number of concurrent downloads (default 3)
    #[arg(long)]
    workers: Option<NonZeroUsize>,

    /// Which resolution service to use
    #[arg(long, value_enum)]
    api_version: Option<ResolverVersion>,

    /// Save per-video metadata as JSON
    #[arg(long)]
    save_metadata: bool,

    /// Leave already downloaded files alone
    #[arg(long)]
    skip_existing: bool,

    /// Put every file in the output directory, prefixed with the owner
    #[arg(long)]
    flat: bool,

    /// Where downloads go (default: current directory)
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// File that collects failed links (default errors.txt)
    #[arg(long)]
    errors: Option<PathBuf>,

    /// Path to the config file
    #[arg(short, long)]
    config: Option<String>,

    /// More log output; repeat for debug
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Args {
    fn overrides(&self) -> CliOverrides {
        let watermark = if self.watermark {
            Some(true)
        } else if self.no_watermark {
            Some(false)
        } else {
            None
        };

        CliOverrides {
            links: self.links.clone(),
            watermark,
            workers: self.workers.map(NonZeroUsize::get),
            api_version: self.api_version,
            save_metadata: self.save_metadata,
            skip_existing: self.skip_existing,
            flat: self.flat,
            output_dir: self.output_dir.clone(),
            errors: self.errors.clone(),
        }
    }
}

fn get_config_path(args: &Args) -> Option<String> {
    if let Some(path) = &args.config {
        return Some(path.clone());
    }

    if let Ok(path) = std::env::var("TOKGRAB_CONFIG") {
        return Some(path);
    }

    if let Ok(xdg_config_home) = std::env::var("XDG_CONFIG_HOME") {
        let config_path = format!("{}/tokgrab/config.toml", xdg_config_home);
        if std::path::Path::new(&config_path).exists() {
            return Some(config_path);
        }
    }

    if let Some(home) = dirs::home_dir() {
        let config_path = format!("{}/.config/tokgrab/config.toml", home.display());
        if std::path::Path::new(&config_path).exists() {
            return Some(config_path);
        }
    }

    None
}

fn init_logging(format: &str, verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        _ => LevelFilter::DEBUG,
    };
    let env_filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    if format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_file = match get_config_path(&args) {
        Some(path) => Some(
            ConfigFile::from_file(&path)
                .with_context(|| format!("Failed to load config from {}", path))?,
        ),
        None => None,
    };

    let log_format = config_file
        .as_ref()
        .map(|file| file.logging_format().to_string())
        .unwrap_or_else(|| "text".to_string());
    init_logging(&log_format, args.verbose);

    let config = Config::from_sources(config_file, args.overrides())?;
    info!("Reading links from {}", config.links.display());
    let links = dispatch::read_links(&config.links)?;

    let progress = MultiProgress::new();
    let resolver = config.api_version.build(&config.http);
    let dispatcher = Arc::new(dispatch::Dispatcher::new(&config, resolver, progress)?);
    let summary = dispatcher.run(links).await;

    info!(
        "Finished {} links: {} ok, {} failed, {} duplicate, {} files written ({}), {} skipped",
        summary.links,
        summary.succeeded,
        summary.failed,
        summary.duplicates,
        summary.files_written,
        utils::format_bytes(summary.bytes_written),
        summary.files_skipped
    );
    if summary.failed > 0 {
        eprintln!(
            "{} of {} links failed, see {}",
            summary.failed,
            summary.links,
            config.errors.display()
        );
    }

    Ok(())
}
