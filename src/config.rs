use anyhow::{Context, Result, anyhow};
use std::path::{Path, PathBuf};

use crate::client::ClientConfig;

pub(crate) const DEFAULT_BASE_URL: &str = "https://api.ipums.org";

#[derive(Debug, Default, PartialEq)]
struct RcConfig {
    url: Option<String>,
    key: Option<String>,
    verify: Option<bool>,
}

/// Resolves each setting from, in order: the argument, the environment, the
/// first rc file found.
pub(crate) fn load_config(
    key: Option<String>,
    url: Option<String>,
    verify: Option<bool>,
) -> Result<ClientConfig> {
    let key = key.or_else(|| std::env::var("IPUMS_API_KEY").ok());
    let url = url.or_else(|| std::env::var("IPUMS_API_URL").ok());

    let candidates = rc_candidates();
    let rc = if key.is_some() && url.is_some() && verify.is_some() {
        RcConfig::default()
    } else {
        first_rc(&candidates)?.unwrap_or_default()
    };

    let key = key
        .or(rc.key)
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
        .ok_or_else(|| missing_key(&candidates))?;

    Ok(ClientConfig {
        key,
        // The API root is fixed in practice; only tests and proxies override it.
        url: url.or(rc.url).unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        verify: verify.or(rc.verify).unwrap_or(true),
    })
}

fn missing_key(candidates: &[PathBuf]) -> anyhow::Error {
    let places = if candidates.is_empty() {
        ".ipumsrc".to_string()
    } else {
        candidates
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(", ")
    };
    anyhow!("Missing configuration: key (set IPUMS_API_KEY or put `key:` in one of: {places})")
}

fn first_rc(candidates: &[PathBuf]) -> Result<Option<RcConfig>> {
    candidates
        .iter()
        .find(|p| p.exists())
        .map(|p| {
            read_rc(p).with_context(|| format!("failed to read configuration file {}", p.display()))
        })
        .transpose()
}

fn read_rc(path: &Path) -> Result<RcConfig> {
    let text = std::fs::read_to_string(path)?;
    Ok(parse_rc(&text))
}

fn parse_rc(text: &str) -> RcConfig {
    let mut cfg = RcConfig::default();
    // A bare `key:` or `url:` takes its value from the next line.
    let mut dangling: Option<&str> = None;

    let lines = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'));
    for line in lines {
        let (field, value) = match (dangling.take(), line.split_once(':')) {
            (Some(field), None) => (field, line),
            (_, Some((field, value))) => (field.trim(), value),
            (None, None) => continue,
        };
        let value = unquote(value);
        match field {
            "key" | "url" if value.is_empty() => dangling = Some(field),
            "key" => cfg.key = Some(value.to_string()),
            "url" => cfg.url = Some(value.to_string()),
            "verify" if !value.is_empty() => {
                cfg.verify = Some(value != "0" && !value.eq_ignore_ascii_case("false"));
            }
            _ => {}
        }
    }

    cfg
}

fn unquote(s: &str) -> &str {
    let s = s.trim();
    ['"', '\'']
        .into_iter()
        .find_map(|q| s.strip_prefix(q)?.strip_suffix(q))
        .unwrap_or(s)
}

/// `IPUMS_RC` alone when set, else `./.ipumsrc` then `~/.ipumsrc`.
fn rc_candidates() -> Vec<PathBuf> {
    if let Some(explicit) = std::env::var_os("IPUMS_RC") {
        return vec![PathBuf::from(explicit)];
    }
    [std::env::current_dir().ok(), dirs::home_dir()]
        .into_iter()
        .flatten()
        .map(|dir| dir.join(".ipumsrc"))
        .collect()
}
