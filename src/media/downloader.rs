use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use super::error::{MediaError, MediaResult};
use super::types::{ContentRef, DownloadOutcome, DownloadTask};
use crate::config::DownloadOptions;

const BAR_TEMPLATE: &str = "{percentage:>3}%|{bar:20.green}| {bytes}/{total_bytes} [{binary_bytes_per_sec}] {msg}";

impl DownloadOptions {
    /// `<out>/<owner>` normally, `<out>` in flat mode.
    pub fn owner_dir(&self, content: &ContentRef) -> PathBuf {
        if self.flat {
            self.output_dir.clone()
        } else {
            self.output_dir.join(content.owner_dir())
        }
    }

    fn scoped_name(&self, content: &ContentRef, base_name: &str) -> String {
        if self.flat {
            format!("{}_{}", content.owner_dir(), base_name)
        } else {
            base_name.to_string()
        }
    }

    pub fn media_path(&self, content: &ContentRef, base_name: &str, extension: &str) -> PathBuf {
        self.owner_dir(content)
            .join(format!("{}.{}", self.scoped_name(content, base_name), extension))
    }

    pub fn metadata_path(&self, content: &ContentRef) -> PathBuf {
        self.owner_dir(content).join("metadata").join(format!(
            "{}.json",
            self.scoped_name(content, &content.content_id)
        ))
    }
}

static PART_SEQ: AtomicU64 = AtomicU64::new(0);

/// Unique per transfer, so two tasks aimed at the same destination never
/// share a partial file.
fn part_path(destination: &Path) -> PathBuf {
    let seq = PART_SEQ.fetch_add(1, Ordering::Relaxed);
    let mut name = OsString::from(destination.as_os_str());
    name.push(format!(".{}-{}.part", std::process::id(), seq));
    PathBuf::from(name)
}

/// Idempotent; concurrent callers for the same owner are fine.
pub async fn ensure_dir(dir: &Path) -> std::io::Result<()> {
    if tokio::fs::try_exists(dir).await.unwrap_or(false) {
        return Ok(());
    }
    tokio::fs::create_dir_all(dir).await?;
    debug!("Created folder {}", dir.display());
    Ok(())
}

/// Streams direct media links to disk.
pub struct Downloader {
    client: reqwest::Client,
    options: DownloadOptions,
    progress: MultiProgress,
}

impl Downloader {
    pub fn new(client: reqwest::Client, options: DownloadOptions, progress: MultiProgress) -> Self {
        Self {
            client,
            options,
            progress,
        }
    }

    pub fn options(&self) -> &DownloadOptions {
        &self.options
    }

    /// Download one URL to its place in the output layout. Never returns an
    /// error: failures are reported in the outcome.
    pub async fn download(
        &self,
        content: &ContentRef,
        base_name: &str,
        source_url: &str,
        extension: &str,
    ) -> DownloadOutcome {
        let mut task = DownloadTask {
            destination: self.options.media_path(content, base_name, extension),
            source_url: source_url.to_string(),
            expected_size: None,
        };

        if self.options.skip_existing && tokio::fs::try_exists(&task.destination).await.unwrap_or(false) {
            debug!("Skipping existing file {}", task.destination.display());
            return DownloadOutcome::skipped();
        }

        if let Err(e) = ensure_dir(&self.options.owner_dir(content)).await {
            return DownloadOutcome::failed(format!("cannot create folder: {e}"));
        }

        let part = part_path(&task.destination);
        match self.transfer(&mut task, &part, base_name).await {
            Ok(bytes) => DownloadOutcome::written(bytes),
            Err(e) => {
                if let Err(cleanup) = tokio::fs::remove_file(&part).await {
                    if cleanup.kind() != std::io::ErrorKind::NotFound {
                        warn!("Could not remove partial file {}: {}", part.display(), cleanup);
                    }
                }
                DownloadOutcome::failed(e.to_string())
            }
        }
    }

    async fn transfer(&self, task: &mut DownloadTask, part: &Path, label: &str) -> MediaResult<u64> {
        let mut response = self
            .client
            .get(&task.source_url)
            .send()
            .await
            .map_err(|e| MediaError::Download(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(MediaError::Download(format!("HTTP {status}")));
        }
        task.expected_size = response.content_length();

        let bar = self.progress_bar(task.expected_size, label);
        let result: MediaResult<u64> = async {
            let mut file = tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(part)
                .await
                .map_err(|e| MediaError::Download(format!("{}: {e}", part.display())))?;

            let mut written: u64 = 0;
            while let Some(chunk) = response
                .chunk()
                .await
                .map_err(|e| MediaError::Download(e.to_string()))?
            {
                file.write_all(&chunk)
                    .await
                    .map_err(|e| MediaError::Download(e.to_string()))?;
                written += chunk.len() as u64;
                bar.inc(chunk.len() as u64);
            }
            file.flush()
                .await
                .map_err(|e| MediaError::Download(e.to_string()))?;
            drop(file);

            if let Some(expected) = task.expected_size {
                if expected != written {
                    return Err(MediaError::Download(format!(
                        "truncated transfer: {written} of {expected} bytes"
                    )));
                }
            }

            tokio::fs::rename(part, &task.destination)
                .await
                .map_err(|e| MediaError::Download(e.to_string()))?;
            Ok(written)
        }
        .await;

        match &result {
            Ok(_) => bar.finish(),
            Err(_) => bar.abandon(),
        }
        result
    }

    fn progress_bar(&self, total: Option<u64>, label: &str) -> ProgressBar {
        let bar = match total {
            Some(len) => ProgressBar::new(len),
            None => ProgressBar::no_length(),
        };
        let bar = self.progress.add(bar);
        bar.set_style(
            ProgressStyle::with_template(BAR_TEMPLATE)
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        bar.set_message(format!("[{label}]"));
        bar
    }
}
