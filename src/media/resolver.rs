use std::sync::Arc;

use async_trait::async_trait;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use super::error::{MediaError, MediaResult, ResolveStage};
use super::musicaldown::MusicalDownResolver;
use super::tmate::TmateResolver;
use super::types::{ContentRef, Discovered, ResolvedMedia};
use crate::config::HttpConfig;

/// A third-party service that turns a post link into direct media links.
///
/// Each implementation owns the provider's token/exchange protocol and its
/// markup positions; nothing outside the implementation depends on them.
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Human-readable name of the provider
    fn name(&self) -> &'static str;

    /// Run the exchange and return every media link found, unselected
    async fn discover(&self, content: &ContentRef) -> MediaResult<Discovered>;

    /// Run the exchange and apply the watermark choice
    async fn resolve(
        &self,
        content: &ContentRef,
        want_watermark: bool,
    ) -> MediaResult<ResolvedMedia> {
        let discovered = self.discover(content).await?;
        Ok(ResolvedMedia::select(discovered, want_watermark))
    }
}

/// Selects which provider strategy resolves links.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolverVersion {
    /// tmate.cc exchange
    #[default]
    V1,
    /// musicaldown.com exchange
    V2,
}

impl ResolverVersion {
    pub fn build(self, http: &HttpConfig) -> Arc<dyn Resolver> {
        match self {
            ResolverVersion::V1 => Arc::new(TmateResolver::new(http.clone())),
            ResolverVersion::V2 => Arc::new(MusicalDownResolver::new(http.clone())),
        }
    }
}

/// Sends one provider request and reads the body, attributing any transport
/// or status failure to `stage`.
pub(crate) async fn send_for_text(
    request: reqwest::RequestBuilder,
    provider: &'static str,
    stage: ResolveStage,
) -> MediaResult<String> {
    let response = request
        .send()
        .await
        .map_err(|e| MediaError::resolution(provider, stage, e))?;

    let status = response.status();
    if !status.is_success() {
        return Err(MediaError::resolution(
            provider,
            stage,
            format!("HTTP {status}"),
        ));
    }

    response
        .text()
        .await
        .map_err(|e| MediaError::resolution(provider, stage, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::types::ContentKind;

    struct FixedResolver;

    #[async_trait]
    impl Resolver for FixedResolver {
        fn name(&self) -> &'static str {
            "fixed"
        }

        async fn discover(&self, content: &ContentRef) -> MediaResult<Discovered> {
            match content.kind {
                ContentKind::Video => Ok(Discovered::Video {
                    clean: "clean".into(),
                    watermarked: "wm".into(),
                }),
                ContentKind::Photo => Err(MediaError::Download("unused".into())),
            }
        }
    }

    #[tokio::test]
    async fn test_default_resolve_applies_selection() {
        let content = ContentRef {
            owner: "@a".into(),
            content_id: "1".into(),
            kind: ContentKind::Video,
            canonical_url: "https://www.tiktok.com/@a/video/1".into(),
        };
        let media = FixedResolver.resolve(&content, true).await.unwrap();
        assert_eq!(media.direct_urls, vec!["wm"]);
    }

    #[test]
    fn test_versions_build_named_providers() {
        let http = HttpConfig::default();
        assert_eq!(ResolverVersion::V1.build(&http).name(), "tmate");
        assert_eq!(ResolverVersion::V2.build(&http).name(), "musicaldown");
    }
}
