use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;
use url::Url;

use super::error::{MediaError, MediaResult};
use super::types::{ContentKind, ContentRef};

/// Handles are letters, digits, `_` and `.`; the segment must end there.
static OWNER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"/(@[A-Za-z0-9_.]+)(?:[/?#]|$)").expect("owner pattern is valid")
});

static CONTENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"/(video|photo)/(\d+)(?:[/?#]|$)").expect("content pattern is valid")
});

/// Hosts that only redirect to a canonical link. Entries match a bare host
/// or a `host:port` authority.
pub const SHORT_LINK_HOSTS: &[&str] = &["vm.tiktok.com", "vt.tiktok.com"];

/// Turns raw share links into [`ContentRef`]s.
pub struct LinkIdentifier {
    client: reqwest::Client,
    short_hosts: Vec<String>,
}

impl LinkIdentifier {
    pub fn new(client: reqwest::Client) -> Self {
        Self::with_short_hosts(client, SHORT_LINK_HOSTS.iter().map(|h| h.to_string()))
    }

    pub fn with_short_hosts(
        client: reqwest::Client,
        hosts: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            client,
            short_hosts: hosts.into_iter().collect(),
        }
    }

    /// Resolves short links through one redirecting GET, then parses.
    pub async fn identify(&self, link: &str) -> MediaResult<ContentRef> {
        let link = link.trim();
        if self.is_short_link(link) {
            let canonical = self.follow_redirect(link).await?;
            debug!("Short link {} resolved to {}", link, canonical);
            parse_canonical(&canonical)
        } else {
            parse_canonical(link)
        }
    }

    fn is_short_link(&self, link: &str) -> bool {
        let Ok(url) = Url::parse(link) else {
            return false;
        };
        let Some(host) = url.host_str() else {
            return false;
        };
        if host.ends_with("tiktok.com") && url.path().starts_with("/t/") {
            return true;
        }
        let authority = match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };
        self.short_hosts.iter().any(|h| h == host || *h == authority)
    }

    async fn follow_redirect(&self, link: &str) -> MediaResult<String> {
        let response = self
            .client
            .get(link)
            .send()
            .await
            .map_err(|e| MediaError::MalformedLink(format!("{link}: redirect failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(MediaError::MalformedLink(format!(
                "{link}: short link did not resolve (HTTP {status})"
            )));
        }

        let landed = response.url().to_string();
        if self.is_short_link(&landed) {
            return Err(MediaError::MalformedLink(format!(
                "{link}: short link did not resolve, still at {landed}"
            )));
        }
        Ok(landed)
    }
}

/// Extracts owner, id and kind from a canonical link. Both patterns must match.
pub fn parse_canonical(link: &str) -> MediaResult<ContentRef> {
    let owner = OWNER_RE
        .captures(link)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| MediaError::MalformedLink(format!("{link}: no @owner segment")))?;
    if owner[1..].chars().all(|c| c == '.') {
        return Err(MediaError::MalformedLink(format!("{link}: invalid owner {owner}")));
    }

    let caps = CONTENT_RE
        .captures(link)
        .ok_or_else(|| MediaError::MalformedLink(format!("{link}: no /video|photo/<id> segment")))?;

    let kind = match &caps[1] {
        "photo" => ContentKind::Photo,
        _ => ContentKind::Video,
    };

    Ok(ContentRef {
        owner,
        content_id: caps[2].to_string(),
        kind,
        canonical_url: link.to_string(),
    })
}
