// URL classification - pure, total functions safe to call on every keystroke
//
// Failures lean toward the narrower reading: unparsable input is
// InvalidFormat for validation and Single for mode detection.

use url::Url;

use super::errors::ValidationError;
use super::models::{DownloadMode, ServiceId, UrlClassification};

/// Mix/Radio playlists use list ids with this prefix
const MIX_LIST_PREFIX: &str = "RD";

/// Parse only strings that literally start with an http(s) scheme
fn parse_http(s: &str) -> Option<Url> {
    if !(s.starts_with("http://") || s.starts_with("https://")) {
        return None;
    }
    let url = Url::parse(s).ok()?;
    match url.host_str() {
        Some(host) if !host.is_empty() => Some(url),
        _ => None,
    }
}

/// True iff `s` is an http/https URL with a non-empty host
pub fn is_http_url(s: &str) -> bool {
    parse_http(s).is_some()
}

/// Lower-case and drop a single leading `www.`
pub fn normalize_host(host: &str) -> String {
    let lower = host.to_lowercase();
    match lower.strip_prefix("www.") {
        Some(rest) => rest.to_string(),
        None => lower,
    }
}

pub fn matches_service(url: &str, service: ServiceId) -> bool {
    parse_http(url)
        .and_then(|u| u.host_str().map(normalize_host))
        .map_or(false, |host| service.allowed_hosts().contains(&host.as_str()))
}

/// First service whose allow-list accepts the URL host
pub fn detect_service(url: &str) -> Option<ServiceId> {
    ServiceId::ALL
        .into_iter()
        .find(|service| matches_service(url, *service))
}

pub fn validate_for_service(url: &str, service: ServiceId) -> Result<(), ValidationError> {
    let url = url.trim();
    if url.is_empty() {
        return Err(ValidationError::Empty);
    }
    if !is_http_url(url) {
        return Err(ValidationError::InvalidFormat);
    }
    if !matches_service(url, service) {
        return Err(ValidationError::InvalidDomain);
    }
    Ok(())
}

/// Same as [`validate_for_service`] for a service given by name
///
/// Front ends that pass service names as strings go through here.
pub fn validate_for_service_name(url: &str, service: &str) -> Result<ServiceId, ValidationError> {
    let url = url.trim();
    if url.is_empty() {
        return Err(ValidationError::Empty);
    }
    if !is_http_url(url) {
        return Err(ValidationError::InvalidFormat);
    }
    let service: ServiceId = service.parse()?;
    validate_for_service(url, service).map(|_| service)
}

fn query_value<'a>(url: &'a Url, key: &str) -> Option<std::borrow::Cow<'a, str>> {
    url.query_pairs()
        .find(|(k, v)| k == key && !v.is_empty())
        .map(|(_, v)| v)
}

pub fn detect_mode(url: &str) -> DownloadMode {
    let Some(parsed) = parse_http(url.trim()) else {
        return DownloadMode::Single;
    };

    let path = parsed.path();
    // shorts are always single
    if path.contains("/shorts/") {
        return DownloadMode::Single;
    }
    if path.starts_with("/playlist") {
        return DownloadMode::Playlist;
    }
    if query_value(&parsed, "list").is_some() {
        return DownloadMode::Playlist;
    }
    if query_value(&parsed, "start_radio").as_deref() == Some("1") {
        return DownloadMode::Playlist;
    }
    DownloadMode::Single
}

/// True iff a `list` parameter starts with `RD` (case-sensitive)
pub fn is_mix_or_radio(url: &str) -> bool {
    parse_http(url.trim()).map_or(false, |parsed| {
        parsed
            .query_pairs()
            .any(|(k, v)| k == "list" && v.starts_with(MIX_LIST_PREFIX))
    })
}

pub fn classify(url: &str) -> UrlClassification {
    let url = url.trim();
    UrlClassification {
        is_http_url: is_http_url(url),
        service: detect_service(url),
        mode: detect_mode(url),
        is_mix_or_radio: is_mix_or_radio(url),
    }
}
