use std::net::IpAddr;
use thiserror::Error;
use url::Url;

/// Errors that can occur during URL validation.
#[derive(Error, Debug)]
pub enum UrlValidationError {
    /// The URL string could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    /// The URL uses a scheme other than http or https.
    #[error("Unsupported scheme: {0} (only http/https allowed)")]
    UnsupportedScheme(String),
    /// The URL has no host component.
    #[error("URL has no host")]
    MissingHost,
    /// The URL points to a private/internal IP address.
    #[error("Private IP address not allowed: {0}")]
    PrivateIp(String),
    /// The URL points to localhost.
    #[error("Localhost not allowed")]
    Localhost,
}

/// Validates and normalizes a feed URL before a source is registered.
///
/// Only `http` and `https` URLs with a host are accepted. Unless
/// `allow_private` is set, localhost and private/link-local addresses are
/// rejected so a shared deployment cannot be pointed at internal services.
///
/// Surrounding whitespace is trimmed; the returned [`Url`] is normalized by
/// the `url` crate (lowercase scheme and host, default port dropped).
///
/// # Examples
///
/// ```
/// use prophet::util::validate_feed_url;
///
/// let url = validate_feed_url(" https://Example.com/feed.xml ", false).unwrap();
/// assert_eq!(url.as_str(), "https://example.com/feed.xml");
///
/// assert!(validate_feed_url("http://192.168.1.1/feed", false).is_err());
/// assert!(validate_feed_url("http://192.168.1.1/feed", true).is_ok());
/// assert!(validate_feed_url("file:///etc/passwd", true).is_err());
/// ```
pub fn validate_feed_url(url_str: &str, allow_private: bool) -> Result<Url, UrlValidationError> {
    let url = Url::parse(url_str.trim())?;

    match url.scheme() {
        "http" | "https" => {}
        scheme => return Err(UrlValidationError::UnsupportedScheme(scheme.to_owned())),
    }

    let host = url.host_str().ok_or(UrlValidationError::MissingHost)?;
    if allow_private {
        return Ok(url);
    }

    if host == "localhost" {
        return Err(UrlValidationError::Localhost);
    }

    let host_for_parse = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);

    if let Ok(ip) = host_for_parse.parse::<IpAddr>() {
        if ip.is_loopback() {
            return Err(UrlValidationError::Localhost);
        }
        if is_private_ip(&ip) {
            return Err(UrlValidationError::PrivateIp(ip.to_string()));
        }
    }

    Ok(url)
}

fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(ipv4) => ipv4.is_private() || ipv4.is_link_local() || ipv4.is_unspecified(),
        IpAddr::V6(ipv6) => {
            if ipv6.is_unspecified() {
                return true;
            }
            let segments = ipv6.segments();
            // fc00::/7 unique local, fe80::/10 link-local
            (segments[0] & 0xfe00) == 0xfc00 || (segments[0] & 0xffc0) == 0xfe80
        }
    }
}

/// Location of the conventional favicon for a site: `/favicon.ico` at the
/// root of its origin.
///
/// Site URLs that do not parse get `/favicon.ico` appended as-is.
pub fn favicon_url(site_url: &str) -> String {
    match Url::parse(site_url.trim()).and_then(|url| url.join("/favicon.ico")) {
        Ok(url) => url.to_string(),
        Err(_) => format!("{}/favicon.ico", site_url.trim_end_matches('/')),
    }
}
