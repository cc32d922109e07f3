//! Base URL normalization, query strings and form bodies.

use std::borrow::Cow;

use url::Url;

use crate::error::{NetworkError, Result};

const PROTOCOL_HTTPS: &str = "https";

/// Lower-case `base_url` and add a missing or mangled scheme.
///
/// ```ignore
/// assert_eq!(validate_url("gap.com/order"), "https://gap.com/order");
/// assert_eq!(validate_url("http:/gap.com"), "http://gap.com");
/// assert_eq!(validate_url("//gap.com"), "https://gap.com");
/// ```
///
/// Blank input is returned unchanged.
pub fn validate_url(base_url: &str) -> String {
    if base_url.trim().is_empty() {
        return base_url.to_string();
    }

    let url = base_url.to_lowercase();
    if url.starts_with("https://") || url.starts_with("http://") {
        return url;
    }
    if let Some(rest) = url.strip_prefix("https:/") {
        return format!("https://{rest}");
    }
    if let Some(rest) = url.strip_prefix("http:/") {
        return format!("http://{rest}");
    }
    if url.starts_with("://") {
        return format!("{PROTOCOL_HTTPS}{url}");
    }
    if url.starts_with("//") {
        return format!("{PROTOCOL_HTTPS}:{url}");
    }
    format!("{PROTOCOL_HTTPS}://{url}")
}

/// Host and path of `base_url` without the scheme or a leading `www.`.
pub fn resolve_url(base_url: &str) -> Result<String> {
    let validated = validate_url(base_url);
    if validated.trim().is_empty() {
        return Ok(validated);
    }

    let url = Url::parse(&validated)?;
    let mut domain = url.host_str().unwrap_or_default().to_string();
    if let Some(port) = url.port() {
        domain.push_str(&format!(":{port}"));
    }
    if url.path() != "/" {
        domain.push_str(url.path());
    }

    if domain.is_empty() {
        return Ok(base_url.to_string());
    }
    Ok(domain
        .strip_prefix("www.")
        .map(str::to_string)
        .unwrap_or(domain))
}

/// Append `params` to `url` as a percent-encoded query string.
pub fn append_query(url: &str, params: &[(String, String)]) -> String {
    if params.is_empty() {
        return url.to_string();
    }
    let query = params
        .iter()
        .map(|(key, value)| format!("{}={}", urlencoding::encode(key), urlencoding::encode(value)))
        .collect::<Vec<_>>()
        .join("&");
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{url}{separator}{query}")
}

/// Percent-decode a whole URL.
pub fn decode_url(url: &str) -> Result<String> {
    urlencoding::decode(url)
        .map(Cow::into_owned)
        .map_err(|e| NetworkError::InvalidUrl(format!("{url}: {e}")))
}

/// Encode `params` as an `application/x-www-form-urlencoded` body.
pub fn form_encode<'a>(params: impl IntoIterator<Item = (&'a str, &'a str)>) -> String {
    url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(params)
        .finish()
}
