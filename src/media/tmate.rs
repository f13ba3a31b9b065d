use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use super::error::{MediaError, MediaResult, ResolveStage};
use super::resolver::{send_for_text, Resolver};
use super::types::{ContentKind, ContentRef, Discovered};
use super::utils::{endpoint, provider_session, select_attrs};
use crate::config::HttpConfig;

const NAME: &str = "tmate";

/// Anchors in the video result block. Position 0 is the clean MP4,
/// position 3 the watermarked one.
const VIDEO_LINKS: &str = ".downtmate-right.is-desktop-only.right a";
const CLEAN_INDEX: usize = 0;
const WATERMARK_INDEX: usize = 3;

const PHOTO_IMAGES: &str = ".card-img-top";

/// tmate.cc: token from `input[name=token]`, POST to `/action`, reply is
/// `{"data": "<html>"}`.
pub struct TmateResolver {
    http: HttpConfig,
    base: String,
}

#[derive(Debug, Deserialize)]
struct ExchangeReply {
    data: Option<String>,
}

impl TmateResolver {
    pub fn new(http: HttpConfig) -> Self {
        let base = http.tmate_base.clone();
        Self { http, base }
    }

    fn stage_err(stage: ResolveStage, detail: impl std::fmt::Display) -> MediaError {
        MediaError::resolution(NAME, stage, detail)
    }

    fn extract_token(page: &str) -> MediaResult<String> {
        select_attrs(page, r#"input[name="token"]"#, "value")
            .map_err(|e| Self::stage_err(ResolveStage::TokenExtract, e))?
            .into_iter()
            .next()
            .ok_or_else(|| Self::stage_err(ResolveStage::TokenExtract, "no token input on page"))
    }

    fn extract_media(fragment: &str, kind: ContentKind) -> MediaResult<Discovered> {
        match kind {
            ContentKind::Video => {
                let links = select_attrs(fragment, VIDEO_LINKS, "href")
                    .map_err(|e| Self::stage_err(ResolveStage::MediaExtract, e))?;
                if links.len() <= WATERMARK_INDEX {
                    return Err(Self::stage_err(
                        ResolveStage::MediaExtract,
                        format!("expected {} video links, found {}", WATERMARK_INDEX + 1, links.len()),
                    ));
                }
                Ok(Discovered::Video {
                    clean: links[CLEAN_INDEX].clone(),
                    watermarked: links[WATERMARK_INDEX].clone(),
                })
            }
            ContentKind::Photo => {
                let images = select_attrs(fragment, PHOTO_IMAGES, "src")
                    .map_err(|e| Self::stage_err(ResolveStage::MediaExtract, e))?;
                if images.is_empty() {
                    return Err(Self::stage_err(ResolveStage::MediaExtract, "no images in reply"));
                }
                Ok(Discovered::Photo { images })
            }
        }
    }
}

#[async_trait]
impl Resolver for TmateResolver {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn discover(&self, content: &ContentRef) -> MediaResult<Discovered> {
        let base = Url::parse(&self.base)
            .map_err(|e| Self::stage_err(ResolveStage::TokenFetch, format!("{}: {e}", self.base)))?;
        let action = endpoint(&base, "/action")
            .map_err(|e| Self::stage_err(ResolveStage::Exchange, e))?;
        let session = provider_session(&self.http, &base)
            .map_err(|e| Self::stage_err(ResolveStage::TokenFetch, e))?;

        let landing = send_for_text(session.get(base.clone()), NAME, ResolveStage::TokenFetch).await?;
        let token = Self::extract_token(&landing)?;
        debug!("{} token acquired for {}", NAME, content.content_id);

        let form = [("url", content.canonical_url.as_str()), ("token", token.as_str())];
        let body = send_for_text(session.post(action).form(&form), NAME, ResolveStage::Exchange).await?;

        let reply: ExchangeReply = serde_json::from_str(&body)
            .map_err(|e| Self::stage_err(ResolveStage::Exchange, format!("reply is not JSON: {e}")))?;
        let fragment = reply
            .data
            .ok_or_else(|| Self::stage_err(ResolveStage::MediaExtract, "reply has no data field"))?;

        Self::extract_media(&fragment, content.kind)
    }
}
