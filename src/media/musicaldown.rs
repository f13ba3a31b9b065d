use async_trait::async_trait;
use tracing::debug;
use url::Url;

use super::error::{MediaError, MediaResult, ResolveStage};
use super::resolver::{send_for_text, Resolver};
use super::types::{ContentKind, ContentRef, Discovered};
use super::utils::{endpoint, provider_session, select_attrs, select_inputs};
use crate::config::HttpConfig;

const NAME: &str = "musicaldown";

const LINK_FIELD: &str = r#"form#submit-form input[type="text"]"#;
const TOKEN_FIELDS: &str = r#"form#submit-form input[type="hidden"]"#;

/// Download buttons on the result page: 0 = MP4, 1 = MP4 HD, 2 = MP4 with
/// watermark. Only 0 and 2 are used.
const VIDEO_LINKS: &str = "a.download";
const CLEAN_INDEX: usize = 0;
const WATERMARK_INDEX: usize = 2;

const PHOTO_IMAGES: &str = ".card-image img";

/// The submit form on `/en` names its link field randomly and carries the
/// tokens as hidden inputs; all of them are echoed back to `/download`.
pub struct MusicalDownResolver {
    http: HttpConfig,
    base: String,
}

#[derive(Debug, PartialEq, Eq)]
struct SubmitForm {
    link_field: String,
    tokens: Vec<(String, String)>,
}

impl MusicalDownResolver {
    pub fn new(http: HttpConfig) -> Self {
        let base = http.musicaldown_base.clone();
        Self { http, base }
    }

    fn stage_err(stage: ResolveStage, detail: impl std::fmt::Display) -> MediaError {
        MediaError::resolution(NAME, stage, detail)
    }

    fn extract_form(page: &str) -> MediaResult<SubmitForm> {
        let link_field = select_inputs(page, LINK_FIELD)
            .map_err(|e| Self::stage_err(ResolveStage::TokenExtract, e))?
            .into_iter()
            .next()
            .map(|(name, _)| name)
            .ok_or_else(|| Self::stage_err(ResolveStage::TokenExtract, "no link field in form"))?;

        let tokens = select_inputs(page, TOKEN_FIELDS)
            .map_err(|e| Self::stage_err(ResolveStage::TokenExtract, e))?;
        if tokens.is_empty() {
            return Err(Self::stage_err(
                ResolveStage::TokenExtract,
                "no hidden token fields in form",
            ));
        }

        Ok(SubmitForm { link_field, tokens })
    }

    fn extract_media(page: &str, kind: ContentKind) -> MediaResult<Discovered> {
        match kind {
            ContentKind::Video => {
                let links = select_attrs(page, VIDEO_LINKS, "href")
                    .map_err(|e| Self::stage_err(ResolveStage::MediaExtract, e))?;
                match (links.get(CLEAN_INDEX), links.get(WATERMARK_INDEX)) {
                    (Some(clean), Some(watermarked)) => Ok(Discovered::Video {
                        clean: clean.clone(),
                        watermarked: watermarked.clone(),
                    }),
                    _ => Err(Self::stage_err(
                        ResolveStage::MediaExtract,
                        format!("expected {} download buttons, found {}", WATERMARK_INDEX + 1, links.len()),
                    )),
                }
            }
            ContentKind::Photo => {
                let images = select_attrs(page, PHOTO_IMAGES, "src")
                    .map_err(|e| Self::stage_err(ResolveStage::MediaExtract, e))?;
                if images.is_empty() {
                    return Err(Self::stage_err(ResolveStage::MediaExtract, "no images on result page"));
                }
                Ok(Discovered::Photo { images })
            }
        }
    }
}

#[async_trait]
impl Resolver for MusicalDownResolver {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn discover(&self, content: &ContentRef) -> MediaResult<Discovered> {
        let base = Url::parse(&self.base)
            .map_err(|e| Self::stage_err(ResolveStage::TokenFetch, format!("{}: {e}", self.base)))?;
        let landing_url = endpoint(&base, "/en")
            .map_err(|e| Self::stage_err(ResolveStage::TokenFetch, e))?;
        let download_url = endpoint(&base, "/download")
            .map_err(|e| Self::stage_err(ResolveStage::Exchange, e))?;
        let session = provider_session(&self.http, &base)
            .map_err(|e| Self::stage_err(ResolveStage::TokenFetch, e))?;

        let landing = send_for_text(session.get(landing_url), NAME, ResolveStage::TokenFetch).await?;
        let SubmitForm { link_field, tokens } = Self::extract_form(&landing)?;
        debug!(
            "{} form has {} token fields for {}",
            NAME,
            tokens.len(),
            content.content_id
        );

        let mut form = Vec::with_capacity(tokens.len() + 1);
        form.push((link_field, content.canonical_url.clone()));
        form.extend(tokens);

        let page = send_for_text(
            session.post(download_url).form(&form),
            NAME,
            ResolveStage::Exchange,
        )
        .await?;

        Self::extract_media(&page, content.kind)
    }
}
