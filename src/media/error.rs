use std::fmt;

use thiserror::Error;

/// Which step of a provider exchange failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveStage {
    /// Landing page could not be fetched (network error or non-2xx status).
    TokenFetch,
    /// Landing page arrived but the anti-forgery token was not in it.
    TokenExtract,
    /// Submitting the link to the exchange endpoint failed.
    Exchange,
    /// Exchange response arrived but no usable media link was in it.
    MediaExtract,
}

impl fmt::Display for ResolveStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResolveStage::TokenFetch => "token fetch",
            ResolveStage::TokenExtract => "token extract",
            ResolveStage::Exchange => "exchange",
            ResolveStage::MediaExtract => "media extract",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("malformed link: {0}")]
    MalformedLink(String),

    #[error("{provider} failed at {stage}: {detail}")]
    Resolution {
        provider: &'static str,
        stage: ResolveStage,
        detail: String,
    },

    #[error("download failed: {0}")]
    Download(String),

    #[error("metadata unavailable: {0}")]
    Metadata(String),
}

impl MediaError {
    pub fn resolution(
        provider: &'static str,
        stage: ResolveStage,
        detail: impl fmt::Display,
    ) -> Self {
        MediaError::Resolution {
            provider,
            stage,
            detail: detail.to_string(),
        }
    }

    /// Stage of a resolution failure, if this is one.
    pub fn stage(&self) -> Option<ResolveStage> {
        match self {
            MediaError::Resolution { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

pub type MediaResult<T> = std::result::Result<T, MediaError>;
