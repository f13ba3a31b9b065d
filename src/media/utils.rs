use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, ORIGIN, REFERER};
use scraper::{Html, Selector};
use url::Url;

use crate::config::HttpConfig;

/// Plain client shared by link identification, downloads and metadata.
pub fn shared_client(http: &HttpConfig) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(http.user_agent.clone())
        .timeout(Duration::from_secs(http.timeout_secs))
        .build()
}

/// Cookie-carrying client for one provider exchange. Providers tie the
/// anti-forgery token to a session cookie, so the landing page GET and the
/// exchange POST must go through the same client.
pub fn provider_session(http: &HttpConfig, base: &Url) -> reqwest::Result<reqwest::Client> {
    let origin = base.origin().ascii_serialization();
    let mut headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(&origin) {
        headers.insert(ORIGIN, value);
    }
    if let Ok(value) = HeaderValue::from_str(base.as_str()) {
        headers.insert(REFERER, value);
    }

    reqwest::Client::builder()
        .user_agent(http.user_agent.clone())
        .timeout(Duration::from_secs(http.timeout_secs))
        .default_headers(headers)
        .cookie_store(true)
        .build()
}

/// Joins a path onto a provider base, keeping any path prefix on the base.
pub fn endpoint(base: &Url, path: &str) -> Result<Url, url::ParseError> {
    base.join(path.trim_start_matches('/'))
}

/// Every value of `attr` on elements matching `selector`, in document order.
/// Elements without the attribute are skipped.
pub fn select_attrs(html: &str, selector: &str, attr: &str) -> Result<Vec<String>, String> {
    let selector = Selector::parse(selector).map_err(|e| format!("bad selector {selector}: {e}"))?;
    let document = Html::parse_document(html);
    Ok(document
        .select(&selector)
        .filter_map(|el| el.value().attr(attr))
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .collect())
}

/// `(name, value)` of each input matching `selector`. Missing values are empty.
pub fn select_inputs(html: &str, selector: &str) -> Result<Vec<(String, String)>, String> {
    let selector = Selector::parse(selector).map_err(|e| format!("bad selector {selector}: {e}"))?;
    let document = Html::parse_document(html);
    Ok(document
        .select(&selector)
        .filter_map(|el| {
            let name = el.value().attr("name")?;
            let value = el.value().attr("value").unwrap_or_default();
            Some((name.to_string(), value.to_string()))
        })
        .collect())
}

/// Inner text of the first element matching `selector`.
pub fn select_text(html: &str, selector: &str) -> Result<Option<String>, String> {
    let selector = Selector::parse(selector).map_err(|e| format!("bad selector {selector}: {e}"))?;
    let document = Html::parse_document(html);
    Ok(document
        .select(&selector)
        .next()
        .map(|el| el.text().collect::<String>()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
        <html><body>
          <form id="f">
            <input name="token" type="hidden" value="abc123">
            <input name="empty" type="hidden">
            <input type="submit">
          </form>
          <a class="x" href="/one">1</a>
          <a class="x">no href</a>
          <a class="x" href=" /two ">2</a>
          <script id="blob">{"k": 1}</script>
        </body></html>
    "#;

    #[test]
    fn test_select_attrs_keeps_document_order() {
        let hrefs = select_attrs(PAGE, "a.x", "href").unwrap();
        assert_eq!(hrefs, vec!["/one", "/two"]);
    }

    #[test]
    fn test_select_inputs_skips_unnamed() {
        let inputs = select_inputs(PAGE, "form#f input").unwrap();
        assert_eq!(
            inputs,
            vec![
                ("token".to_string(), "abc123".to_string()),
                ("empty".to_string(), String::new()),
            ]
        );
    }

    #[test]
    fn test_select_text_reads_script_body() {
        let text = select_text(PAGE, "script#blob").unwrap();
        assert_eq!(text.as_deref(), Some(r#"{"k": 1}"#));
        assert_eq!(select_text(PAGE, "script#missing").unwrap(), None);
    }

    #[test]
    fn test_invalid_selector_is_an_error() {
        assert!(select_attrs(PAGE, "a[", "href").is_err());
    }

    #[test]
    fn test_endpoint_keeps_base_prefix() {
        let base = Url::parse("http://127.0.0.1:8080/mirror/").unwrap();
        assert_eq!(
            endpoint(&base, "/action").unwrap().as_str(),
            "http://127.0.0.1:8080/mirror/action"
        );
    }
}
