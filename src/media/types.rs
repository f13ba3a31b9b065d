use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentKind {
    Video,
    Photo,
}

impl ContentKind {
    pub fn extension(self) -> &'static str {
        match self {
            ContentKind::Video => "mp4",
            ContentKind::Photo => "jpeg",
        }
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContentKind::Video => f.write_str("video"),
            ContentKind::Photo => f.write_str("photo"),
        }
    }
}

/// Stable identity of one post, derived from a canonical link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentRef {
    /// Owner handle including the `@` sigil.
    pub owner: String,
    pub content_id: String,
    pub kind: ContentKind,
    /// The canonical link the identity was read from (after any redirect hop).
    pub canonical_url: String,
}

impl ContentRef {
    /// Owner handle without the sigil, used for folder names.
    pub fn owner_dir(&self) -> &str {
        self.owner.trim_start_matches('@')
    }
}

/// Everything a provider found for a post, before watermark selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Discovered {
    Video { clean: String, watermarked: String },
    Photo { images: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedMedia {
    pub kind: ContentKind,
    pub direct_urls: Vec<String>,
    pub watermarked: bool,
}

impl ResolvedMedia {
    /// Applies the watermark choice. Photos are never watermarked, so the
    /// flag only matters for videos.
    pub fn select(discovered: Discovered, want_watermark: bool) -> Self {
        match discovered {
            Discovered::Video { clean, watermarked } => {
                let url = if want_watermark { watermarked } else { clean };
                Self {
                    kind: ContentKind::Video,
                    direct_urls: vec![url],
                    watermarked: want_watermark,
                }
            }
            Discovered::Photo { images } => Self {
                kind: ContentKind::Photo,
                direct_urls: images,
                watermarked: false,
            },
        }
    }

    /// File base names paired with their source URL. Photos get a
    /// zero-based `_N` suffix per image.
    pub fn tasks(&self, content: &ContentRef) -> Vec<(String, String)> {
        match self.kind {
            ContentKind::Video => self
                .direct_urls
                .iter()
                .map(|url| (content.content_id.clone(), url.clone()))
                .collect(),
            ContentKind::Photo => self
                .direct_urls
                .iter()
                .enumerate()
                .map(|(index, url)| (format!("{}_{}", content.content_id, index), url.clone()))
                .collect(),
        }
    }
}

/// A single transfer, owned by the worker that created it.
#[derive(Debug, Clone)]
pub struct DownloadTask {
    pub destination: PathBuf,
    pub source_url: String,
    pub expected_size: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadOutcome {
    pub success: bool,
    pub bytes_written: u64,
    /// True when the file was already present and skip-existing applied.
    pub skipped: bool,
    pub error: Option<String>,
}

impl DownloadOutcome {
    pub fn written(bytes: u64) -> Self {
        Self {
            success: true,
            bytes_written: bytes,
            skipped: false,
            error: None,
        }
    }

    pub fn skipped() -> Self {
        Self {
            success: true,
            bytes_written: 0,
            skipped: true,
            error: None,
        }
    }

    pub fn failed(detail: impl Into<String>) -> Self {
        Self {
            success: false,
            bytes_written: 0,
            skipped: false,
            error: Some(detail.into()),
        }
    }
}
