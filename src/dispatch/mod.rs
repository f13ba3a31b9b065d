mod error_log;

pub use error_log::ErrorLog;

use std::collections::{HashSet, VecDeque};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use indicatif::MultiProgress;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::media::{
    shared_client, ContentKind, ContentRef, Downloader, LinkIdentifier, MediaError,
    MediaResult, MetadataFetcher, Resolver,
};

/// Totals for one run. Per-link failures only show up here and in the
/// error log, never as an error from [`Dispatcher::run`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub links: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub files_written: usize,
    pub files_skipped: usize,
    pub bytes_written: u64,
    /// Links naming content another link in the run already claimed.
    pub duplicates: usize,
}

impl RunSummary {
    fn merge(&mut self, other: RunSummary) {
        self.links += other.links;
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        self.files_written += other.files_written;
        self.files_skipped += other.files_skipped;
        self.bytes_written += other.bytes_written;
        self.duplicates += other.duplicates;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Severity {
    Warning,
    Error,
}

impl Severity {
    fn tag(self, colored: bool) -> &'static str {
        match (self, colored) {
            (Severity::Warning, true) => "\x1b[93mwarning\x1b[0m",
            (Severity::Error, true) => "\x1b[91merror\x1b[0m",
            (Severity::Warning, false) => "warning",
            (Severity::Error, false) => "error",
        }
    }
}

/// Prints a diagnostic above the progress bars. With no visible bars (stderr
/// is not a terminal) `println` would drop the line, so it goes to `fallback`.
fn print_diagnostic(
    progress: &MultiProgress,
    severity: Severity,
    text: &str,
    fallback: &mut impl Write,
) {
    if !progress.is_hidden() {
        match progress.println(format!("{}: {text}", severity.tag(true))) {
            Ok(()) => return,
            Err(e) => debug!("Progress output unavailable: {}", e),
        }
    }
    if let Err(e) = writeln!(fallback, "{}: {text}", severity.tag(false)) {
        debug!("Could not print diagnostic: {}", e);
    }
}

/// Reads the link list: one link per line, blank lines and `#` comments
/// ignored, duplicates dropped in favour of their first occurrence.
pub fn read_links(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read link list {}", path.display()))?;
    Ok(parse_links(&content))
}

pub fn parse_links(content: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter(|line| seen.insert(line.to_string()))
        .map(str::to_string)
        .collect()
}

/// Runs every link through identify → resolve → download → metadata on a
/// fixed pool of workers.
pub struct Dispatcher {
    identifier: LinkIdentifier,
    resolver: Arc<dyn Resolver>,
    downloader: Downloader,
    metadata: Option<MetadataFetcher>,
    /// (owner, content id) pairs already taken by a link in this run.
    claimed: Mutex<HashSet<(String, String)>>,
    errors: ErrorLog,
    progress: MultiProgress,
    want_watermark: bool,
    workers: usize,
}

impl Dispatcher {
    pub fn new(
        config: &Config,
        resolver: Arc<dyn Resolver>,
        progress: MultiProgress,
    ) -> Result<Self> {
        let client = shared_client(&config.http).context("Failed to create HTTP client")?;
        info!(
            "Using {} resolver with {} workers",
            resolver.name(),
            config.workers
        );

        Ok(Self {
            identifier: LinkIdentifier::new(client.clone()),
            resolver,
            downloader: Downloader::new(client.clone(), config.download.clone(), progress.clone()),
            metadata: config
                .save_metadata
                .then(|| MetadataFetcher::new(client, config.http.page_base.clone())),
            claimed: Mutex::new(HashSet::new()),
            errors: ErrorLog::new(&config.errors),
            progress,
            want_watermark: config.watermark,
            workers: config.workers.max(1),
        })
    }

    /// Processes every link to completion or failure. Completion order is
    /// unspecified.
    pub async fn run(self: Arc<Self>, links: Vec<String>) -> RunSummary {
        let total = links.len();
        let queue = Arc::new(Mutex::new(links.into_iter().collect::<VecDeque<_>>()));
        let mut workers = JoinSet::new();

        for worker in 0..self.workers.min(total) {
            let this = self.clone();
            let queue = queue.clone();
            workers.spawn(async move {
                let mut summary = RunSummary::default();
                loop {
                    let next = queue.lock().await.pop_front();
                    let Some(link) = next else {
                        break;
                    };
                    debug!("Worker {} took {}", worker, link);
                    summary.merge(this.process(&link).await);
                }
                summary
            });
        }

        let mut summary = RunSummary::default();
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(partial) => summary.merge(partial),
                Err(e) => error!("Worker task ended abnormally: {}", e),
            }
        }
        summary
    }

    /// Per-link isolation boundary: whatever fails here is reported and
    /// recorded, then the worker moves on.
    async fn process(&self, link: &str) -> RunSummary {
        let mut summary = RunSummary {
            links: 1,
            ..RunSummary::default()
        };

        match self.handle(link, &mut summary).await {
            Ok(()) => summary.succeeded = 1,
            Err(e) => {
                summary.failed = 1;
                self.report_failure(link, &e).await;
            }
        }
        summary
    }

    async fn handle(&self, link: &str, summary: &mut RunSummary) -> MediaResult<()> {
        let content = self.identifier.identify(link).await?;
        if !self.claim(&content).await {
            debug!(
                "{} names {} {} which another link already covers",
                link, content.owner, content.content_id
            );
            summary.duplicates += 1;
            return Ok(());
        }

        let media = self.resolver.resolve(&content, self.want_watermark).await?;
        debug!(
            "{} resolved {} {} to {} url(s), watermarked: {}",
            self.resolver.name(),
            content.kind,
            content.content_id,
            media.direct_urls.len(),
            media.watermarked
        );

        let extension = media.kind.extension();
        let mut failures = Vec::new();
        for (base_name, url) in media.tasks(&content) {
            let outcome = self
                .downloader
                .download(&content, &base_name, &url, extension)
                .await;
            if outcome.skipped {
                summary.files_skipped += 1;
            } else if outcome.success {
                summary.files_written += 1;
                summary.bytes_written += outcome.bytes_written;
            } else {
                failures.push(format!(
                    "{base_name}: {}",
                    outcome.error.unwrap_or_default()
                ));
            }
        }

        if !failures.is_empty() {
            return Err(MediaError::Download(failures.join("; ")));
        }

        self.save_metadata(&content).await;
        Ok(())
    }

    /// Only the first link for a piece of content downloads it, so no two
    /// workers write the same destination.
    async fn claim(&self, content: &ContentRef) -> bool {
        self.claimed
            .lock()
            .await
            .insert((content.owner.clone(), content.content_id.clone()))
    }

    /// Metadata is best effort: a failure here is reported but the link
    /// still counts as downloaded.
    async fn save_metadata(&self, content: &ContentRef) {
        let Some(fetcher) = &self.metadata else {
            return;
        };
        if content.kind != ContentKind::Video {
            return;
        }

        let options = self.downloader.options();
        let path = options.metadata_path(content);
        match fetcher.save(content, &path, options.skip_existing).await {
            Ok(true) => debug!("Metadata saved to {}", path.display()),
            Ok(false) => debug!("Metadata already present at {}", path.display()),
            Err(e) => {
                warn!("Metadata for {} failed: {}", content.content_id, e);
                self.diagnostic(
                    Severity::Warning,
                    &format!("{} ({})", content.canonical_url, e),
                );
            }
        }
    }

    async fn report_failure(&self, link: &str, e: &MediaError) {
        warn!(link, stage = ?e.stage(), error = %e, "Link failed");
        self.diagnostic(Severity::Error, &format!("{link} ({e})"));
        if let Err(write_err) = self.errors.record(link).await {
            error!(
                "Could not append to {}: {}",
                self.errors.path().display(),
                write_err
            );
        }
    }

    fn diagnostic(&self, severity: Severity, text: &str) {
        print_diagnostic(&self.progress, severity, text, &mut std::io::stderr());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DownloadOptions;
    use crate::media::{Discovered, ResolveStage};
    use async_trait::async_trait;
    use axum::{extract::State, routing::get, Router};
    use indicatif::ProgressDrawTarget;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    /// Answers from a local server; fails for any content id in `broken`.
    struct LocalResolver {
        base: String,
        broken: Vec<&'static str>,
    }

    #[async_trait]
    impl Resolver for LocalResolver {
        fn name(&self) -> &'static str {
            "local"
        }

        async fn discover(&self, content: &ContentRef) -> MediaResult<Discovered> {
            if self.broken.contains(&content.content_id.as_str()) {
                return Err(MediaError::resolution(
                    "local",
                    ResolveStage::TokenExtract,
                    "no token",
                ));
            }
            Ok(match content.kind {
                ContentKind::Video => Discovered::Video {
                    clean: format!("{}/media/clean", self.base),
                    watermarked: format!("{}/media/wm", self.base),
                },
                ContentKind::Photo => Discovered::Photo {
                    images: vec![
                        format!("{}/media/img0", self.base),
                        format!("{}/media/img1", self.base),
                    ],
                },
            })
        }
    }

    #[derive(Clone, Default)]
    struct Hits {
        media: Arc<AtomicUsize>,
        pages: Arc<AtomicUsize>,
    }

    async fn serve(hits: Hits) -> String {
        let app = Router::new()
            .route(
                "/media/:name",
                get(
                    |State(hits): State<Hits>,
                     axum::extract::Path(name): axum::extract::Path<String>| async move {
                        hits.media.fetch_add(1, Ordering::SeqCst);
                        format!("bytes of {name}")
                    },
                ),
            )
            .route(
                "/:owner/video/:id",
                get(|State(hits): State<Hits>| async move {
                    hits.pages.fetch_add(1, Ordering::SeqCst);
                    axum::response::Html(
                        r#"<script id="__UNIVERSAL_DATA_FOR_REHYDRATION__">{"__DEFAULT_SCOPE__":{"webapp.video-detail":{"itemInfo":{"itemStruct":{"id":"111","desc":"hi"}}}}}</script>"#,
                    )
                }),
            )
            .with_state(hits);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{addr}")
    }

    /// Serves a 4000-byte body slowly, whatever the path.
    async fn serve_slow(hits: Arc<AtomicUsize>) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let (mut socket, _) = listener.accept().await.unwrap();
                let hits = hits.clone();
                tokio::spawn(async move {
                    let mut request = [0u8; 1024];
                    let _ = socket.read(&mut request).await;
                    hits.fetch_add(1, Ordering::SeqCst);
                    let head = "HTTP/1.1 200 OK\r\nContent-Length: 4000\r\nConnection: close\r\n\r\n";
                    socket.write_all(head.as_bytes()).await.unwrap();
                    for _ in 0..4 {
                        if socket.write_all(&[7u8; 1000]).await.is_err() {
                            return;
                        }
                        tokio::time::sleep(Duration::from_millis(30)).await;
                    }
                    let _ = socket.shutdown().await;
                });
            }
        });
        format!("http://{addr}")
    }

    fn config(dir: &Path, workers: usize, base: &str) -> Config {
        let mut config = Config {
            workers,
            errors: dir.join("errors.txt"),
            download: DownloadOptions {
                output_dir: dir.join("out"),
                flat: false,
                skip_existing: false,
            },
            ..Config::default()
        };
        config.http.page_base = format!("{base}/");
        config
    }

    fn dispatcher(config: &Config, base: &str, broken: Vec<&'static str>) -> Arc<Dispatcher> {
        let progress = MultiProgress::with_draw_target(ProgressDrawTarget::hidden());
        let resolver = Arc::new(LocalResolver {
            base: base.to_string(),
            broken,
        });
        Arc::new(Dispatcher::new(config, resolver, progress).unwrap())
    }

    #[test]
    fn test_parse_links_filters_blanks_comments_and_duplicates() {
        let links = parse_links("a\n\n  b  \n# note\na\nc\n\n\n");
        assert_eq!(links, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_diagnostic_without_visible_bars_goes_to_fallback() {
        let progress = MultiProgress::with_draw_target(ProgressDrawTarget::hidden());
        let mut out = Vec::new();

        print_diagnostic(&progress, Severity::Error, "bad-link (malformed)", &mut out);
        print_diagnostic(&progress, Severity::Warning, "no metadata", &mut out);

        assert_eq!(
            String::from_utf8(out).unwrap(),
            "error: bad-link (malformed)\nwarning: no metadata\n"
        );
    }

    #[test]
    fn test_read_links_missing_file_is_fatal() {
        let dir = TempDir::new().unwrap();
        assert!(read_links(&dir.path().join("nope.txt")).is_err());
    }

    #[tokio::test]
    async fn test_mixed_run_isolates_failures() {
        let dir = TempDir::new().unwrap();
        let base = serve(Hits::default()).await;
        let config = config(dir.path(), 2, &base);

        let summary = dispatcher(&config, &base, vec![])
            .run(vec![
                "https://platform.com/@alice/video/111".to_string(),
                "bad-link".to_string(),
                "https://platform.com/@bob/photo/222".to_string(),
            ])
            .await;

        let out = dir.path().join("out");
        assert_eq!(
            std::fs::read_to_string(out.join("alice/111.mp4")).unwrap(),
            "bytes of clean"
        );
        assert_eq!(
            std::fs::read_to_string(out.join("bob/222_0.jpeg")).unwrap(),
            "bytes of img0"
        );
        assert_eq!(
            std::fs::read_to_string(out.join("bob/222_1.jpeg")).unwrap(),
            "bytes of img1"
        );
        assert_eq!(
            std::fs::read_to_string(dir.path().join("errors.txt")).unwrap(),
            "bad-link\n"
        );
        assert_eq!(summary.links, 3);
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.files_written, 3);
    }

    #[tokio::test]
    async fn test_resolution_failure_writes_nothing_and_continues() {
        let dir = TempDir::new().unwrap();
        let base = serve(Hits::default()).await;
        let config = config(dir.path(), 1, &base);

        let summary = dispatcher(&config, &base, vec!["111"])
            .run(vec![
                "https://platform.com/@alice/video/111".to_string(),
                "https://platform.com/@carol/video/333".to_string(),
            ])
            .await;

        let out = dir.path().join("out");
        assert!(!out.join("alice").exists());
        assert!(out.join("carol/333.mp4").exists());
        assert_eq!(
            std::fs::read_to_string(dir.path().join("errors.txt")).unwrap(),
            "https://platform.com/@alice/video/111\n"
        );
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.succeeded, 1);
    }

    #[tokio::test]
    async fn test_watermark_choice_reaches_download() {
        let dir = TempDir::new().unwrap();
        let base = serve(Hits::default()).await;
        let mut config = config(dir.path(), 1, &base);
        config.watermark = true;

        dispatcher(&config, &base, vec![])
            .run(vec!["https://platform.com/@alice/video/111".to_string()])
            .await;

        assert_eq!(
            std::fs::read_to_string(dir.path().join("out/alice/111.mp4")).unwrap(),
            "bytes of wm"
        );
    }

    #[tokio::test]
    async fn test_metadata_written_once_per_content_id() {
        let dir = TempDir::new().unwrap();
        let hits = Hits::default();
        let base = serve(hits.clone()).await;
        let mut config = config(dir.path(), 2, &base);
        config.save_metadata = true;

        let summary = dispatcher(&config, &base, vec![])
            .run(vec![
                "https://platform.com/@alice/video/111".to_string(),
                "https://platform.com/@alice/video/111?lang=en".to_string(),
                "https://platform.com/@bob/photo/222".to_string(),
            ])
            .await;

        assert_eq!(summary.succeeded, 3);
        assert_eq!(summary.duplicates, 1);
        assert_eq!(hits.pages.load(Ordering::SeqCst), 1);
        let doc = std::fs::read_to_string(dir.path().join("out/alice/metadata/111.json")).unwrap();
        assert!(doc.contains("\"desc\": \"hi\""));
        assert!(!dir.path().join("out/bob/metadata").exists());
    }

    #[tokio::test]
    async fn test_concurrent_links_for_same_content_download_once() {
        let dir = TempDir::new().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let base = serve_slow(hits.clone()).await;
        let config = config(dir.path(), 2, &base);

        let summary = dispatcher(&config, &base, vec![])
            .run(vec![
                "https://platform.com/@alice/video/111".to_string(),
                "https://platform.com/@alice/video/111?lang=en".to_string(),
            ])
            .await;

        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.failed, 0);
        assert_eq!(summary.duplicates, 1);
        assert_eq!(summary.files_written, 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(!dir.path().join("errors.txt").exists());
        let owner_dir = dir.path().join("out/alice");
        assert_eq!(std::fs::metadata(owner_dir.join("111.mp4")).unwrap().len(), 4000);
        assert_eq!(std::fs::read_dir(&owner_dir).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_skip_existing_run_makes_no_media_requests() {
        let dir = TempDir::new().unwrap();
        let hits = Hits::default();
        let base = serve(hits.clone()).await;
        let mut config = config(dir.path(), 1, &base);
        config.download.skip_existing = true;
        std::fs::create_dir_all(dir.path().join("out/alice")).unwrap();
        std::fs::write(dir.path().join("out/alice/111.mp4"), "kept").unwrap();

        let summary = dispatcher(&config, &base, vec![])
            .run(vec!["https://platform.com/@alice/video/111".to_string()])
            .await;

        assert_eq!(summary.files_skipped, 1);
        assert_eq!(hits.media.load(Ordering::SeqCst), 0);
        assert!(!dir.path().join("errors.txt").exists());
    }
}
