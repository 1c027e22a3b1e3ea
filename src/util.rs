use anyhow::Context;
use reqwest::Url;
use std::time::Duration;

pub(crate) fn retriable_status(code: u16) -> bool {
    matches!(code, 500 | 502 | 503 | 504 | 429 | 408)
}

pub(crate) fn backoff(current: Duration, max: Duration) -> Duration {
    let next = Duration::from_secs_f64((current.as_secs_f64() * 1.5).max(1.0));
    if next > max { max } else { next }
}

/// Last path segment of `url`, ignoring any query string or fragment.
pub(crate) fn guess_filename_from_url(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.rsplit('/').next().and_then(|s| {
        if s.is_empty() {
            None
        } else {
            Some(s.to_string())
        }
    })
}

pub(crate) fn urljoin(base: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }
    let base = base.trim_end_matches('/');
    if path.starts_with('/') {
        format!("{}{}", base, path)
    } else {
        format!("{}/{}", base, path)
    }
}

/// Adds each `(key, value)` pair to `url` unless the query already names that key.
///
/// Next-page links returned by the metadata API usually carry their own
/// `pageSize`/`version`; repeating them would send duplicate parameters.
pub(crate) fn with_missing_query(url: &str, params: &[(&str, String)]) -> anyhow::Result<Url> {
    let mut parsed = Url::parse(url).with_context(|| format!("invalid URL: {}", url))?;
    let present: Vec<String> = parsed.query_pairs().map(|(k, _)| k.into_owned()).collect();
    {
        let mut pairs = parsed.query_pairs_mut();
        for (k, v) in params {
            if !present.iter().any(|p| p == k) {
                pairs.append_pair(k, v);
            }
        }
    }
    if parsed.query() == Some("") {
        parsed.set_query(None);
    }
    Ok(parsed)
}
