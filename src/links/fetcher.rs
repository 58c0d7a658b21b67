//! HTTP client for the link listing endpoint.

use std::time::Duration;

use reqwest::Client;
use serde::Serialize;
use tracing::{debug, instrument};
use url::Url;

use super::{LinkFetchError, LinkPage};
use crate::user_agent::default_user_agent;

/// Default connect timeout for listing requests.
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default read timeout for listing requests.
pub const READ_TIMEOUT_SECS: u64 = 60;

/// Which page to request next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PagePosition {
    /// `page=N`, counting from 1.
    Number(u32),
    /// `cursor=<value>` as returned by the previous page.
    Cursor(String),
}

impl PagePosition {
    /// The endpoint URL with this position appended as a query parameter.
    #[must_use]
    pub fn apply(&self, endpoint: &Url) -> Url {
        let mut url = endpoint.clone();
        let (key, value) = match self {
            Self::Number(page) => ("page", page.to_string()),
            Self::Cursor(cursor) => ("cursor", cursor.clone()),
        };
        url.query_pairs_mut().append_pair(key, &value);
        url
    }
}

/// Summary of one enumeration run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchReport {
    pub pages: u32,
    /// Links that became new `pending` files.
    pub added: u64,
    /// Links whose filename already existed in the download.
    pub duplicates: u64,
    /// Links rejected as non-HTTP or without a usable filename.
    pub skipped: u64,
    /// Links whose host is not on the trusted-host list.
    pub untrusted: u64,
    /// Whether the server signalled the end of the listing.
    pub finished: bool,
}

/// Fetches listing pages over HTTP.
///
/// Created once per manager and reused for every download, taking advantage
/// of connection pooling.
#[derive(Debug, Clone)]
pub struct LinkFetcher {
    client: Client,
}

impl LinkFetcher {
    /// Creates a fetcher with explicit timeouts.
    ///
    /// # Errors
    ///
    /// Returns the `reqwest` builder error if the client cannot be built.
    pub fn new(connect_timeout: Duration, read_timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .read_timeout(read_timeout)
            .user_agent(default_user_agent())
            .gzip(true)
            .build()?;
        Ok(Self { client })
    }

    /// Fetches and validates one page.
    ///
    /// # Errors
    ///
    /// Returns [`LinkFetchError::Network`] if the request fails,
    /// [`LinkFetchError::HttpStatus`] for a non-2xx answer and
    /// [`LinkFetchError::InvalidResponse`] when the body does not match the
    /// page schema.
    #[instrument(skip(self, endpoint), fields(position = ?position))]
    pub async fn fetch_page(
        &self,
        endpoint: &Url,
        position: &PagePosition,
    ) -> Result<LinkPage, LinkFetchError> {
        let url = position.apply(endpoint);
        let url_text = url.to_string();
        debug!(url = %url_text, "requesting links page");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|source| LinkFetchError::Network {
                url: url_text.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(LinkFetchError::HttpStatus {
                url: url_text,
                status: status.as_u16(),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|source| LinkFetchError::Network {
                url: url_text.clone(),
                source,
            })?;
        let page: LinkPage =
            serde_json::from_str(&body).map_err(|e| LinkFetchError::InvalidResponse {
                url: url_text.clone(),
                message: e.to_string(),
            })?;
        debug!(
            links = page.links.len(),
            has_cursor = page.cursor.is_some(),
            done = page.done,
            "links page received"
        );
        Ok(page)
    }
}
