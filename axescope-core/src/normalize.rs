//! Canonical URL keys.
//!
//! Two raw URLs that point at the same page normalize to the same
//! [`NormalizedUrl`], which is what the frontier dedups on and what gets
//! persisted in checkpoints.

use crate::error::UrlError;
use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NormalizedUrl(String);

impl NormalizedUrl {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn to_url(&self) -> Result<Url, UrlError> {
        Url::parse(&self.0).map_err(|_| UrlError::Parse(self.0.clone()))
    }

    pub fn domain(&self) -> Option<String> {
        self.to_url().ok().as_ref().and_then(domain_of)
    }

    /// Path component, always starting with `/`.
    pub fn path(&self) -> String {
        self.to_url()
            .map(|u| u.path().to_string())
            .unwrap_or_else(|_| "/".to_string())
    }
}

impl fmt::Display for NormalizedUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for NormalizedUrl {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Canonicalizes `raw`, resolving it against `base` when it is relative.
///
/// Entities are decoded, a missing scheme becomes `https`, the fragment is
/// dropped, an empty path becomes `/` and query pairs are sorted.
pub fn normalize(raw: &str, base: Option<&Url>) -> Result<NormalizedUrl, UrlError> {
    let decoded = html_escape::decode_html_entities(raw.trim()).trim().to_string();
    if decoded.is_empty() {
        return Err(UrlError::Empty);
    }

    let parsed = if decoded.contains("://") {
        Url::parse(&decoded)
    } else if let Some(rest) = decoded.strip_prefix("//") {
        Url::parse(&format!("https://{}", rest))
    } else if let Some(base) = base {
        base.join(&decoded)
    } else if has_non_http_scheme(&decoded) {
        Url::parse(&decoded)
    } else {
        Url::parse(&format!("https://{}", decoded))
    };
    let mut url = parsed.map_err(|_| UrlError::Parse(decoded.clone()))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(UrlError::UnsupportedScheme(url.scheme().to_string()));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(UrlError::MissingHost(decoded));
    }

    url.set_fragment(None);

    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if pairs.is_empty() {
        url.set_query(None);
    } else {
        pairs.sort();
        url.query_pairs_mut().clear().extend_pairs(pairs);
    }

    Ok(NormalizedUrl(url.to_string()))
}

/// `mailto:`, `javascript:` and friends; a `host:port` form is not a scheme.
fn has_non_http_scheme(value: &str) -> bool {
    match value.split_once(':') {
        Some((scheme, rest)) => {
            !scheme.is_empty()
                && scheme
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
                && !rest.starts_with(|c: char| c.is_ascii_digit())
                && !scheme.contains('.')
        }
        None => false,
    }
}

/// Lowercased host with a leading `www.` removed.
pub fn domain_of(url: &Url) -> Option<String> {
    let host = url.host_str()?.to_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host).to_string();
    if host.is_empty() { None } else { Some(host) }
}
