//! Paginated link enumeration.
//!
//! A download's file list comes from a listing endpoint that returns pages of
//! the form `{cursor?: string, links: string[], done?: boolean}`. Pages are
//! requested with `page=1, 2, ...` until the server hands out a cursor, after
//! which `cursor=<value>` is sent instead.
//!
//! Before the first request the endpoint host is checked against the
//! trusted-host list; an untrusted endpoint never sees a request.

mod error;
mod fetcher;

pub use error::LinkFetchError;
pub use fetcher::{
    CONNECT_TIMEOUT_SECS, FetchReport, LinkFetcher, PagePosition, READ_TIMEOUT_SECS,
};

use std::path::{Component, Path};

use serde::Deserialize;
use url::Url;

/// One page of the listing endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LinkPage {
    #[serde(default)]
    pub cursor: Option<String>,
    pub links: Vec<String>,
    #[serde(default)]
    pub done: bool,
}

/// Returns true if `host` equals a trusted host or is a subdomain of one.
#[must_use]
pub fn is_trusted_host(host: &str, trusted: &[String]) -> bool {
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    trusted.iter().any(|entry| {
        let entry = entry.trim().trim_end_matches('.').to_ascii_lowercase();
        !entry.is_empty()
            && (host == entry
                || host
                    .strip_suffix(&entry)
                    .is_some_and(|prefix| prefix.ends_with('.')))
    })
}

/// Validates a listed link and derives the filename it is saved under.
///
/// Only absolute `http`/`https` URLs are accepted. The filename is the last
/// path segment, percent-decoded and stripped of characters that are invalid
/// on common filesystems.
#[must_use]
pub fn accept_link(link: &str) -> Option<(Url, String)> {
    let url = Url::parse(link.trim()).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    let filename = filename_from_url(&url)?;
    Some((url, filename))
}

/// Last non-empty path segment of `url`, decoded and sanitized.
#[must_use]
pub fn filename_from_url(url: &Url) -> Option<String> {
    let last = url.path_segments()?.rfind(|segment| !segment.is_empty())?;
    let decoded = urlencoding::decode(last).ok()?;
    let name = sanitize_filename(&decoded);
    (!name.trim_matches('_').is_empty()).then_some(name)
}

/// Replaces characters that are invalid on common filesystems.
pub(crate) fn sanitize_filename(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    if is_safe_filename_segment(&sanitized) {
        sanitized
    } else {
        sanitized.replace('.', "_")
    }
}

fn is_safe_filename_segment(name: &str) -> bool {
    !Path::new(name).components().any(|component| {
        matches!(
            component,
            Component::CurDir | Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    })
}
