//! Shared User-Agent string for listing and transfer HTTP clients.

/// Project URL for User-Agent identification.
const PROJECT_UA_URL: &str = "https://github.com/bulk-downloader/bulk-downloader";

/// Default User-Agent for every request the crate sends.
#[must_use]
pub(crate) fn default_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("bulk-downloader/{version} (+{PROJECT_UA_URL})")
}
