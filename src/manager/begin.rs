//! Creating downloads and enumerating their links.

use tracing::{info, instrument, warn};
use url::Url;

use super::{DownloadManager, Result};
use crate::links::{FetchReport, LinkFetchError, PagePosition, accept_link, is_trusted_host};
use crate::store::{AddFileOutcome, DownloadState, NewDownload, now_millis};

/// A request to start a new download from a link listing.
#[derive(Debug, Clone)]
pub struct BeginDownload {
    /// Human label; the download id is the label plus a millisecond suffix.
    pub label: String,
    pub links_url: String,
    pub download_location: String,
    pub client_id: Option<String>,
}

/// Builds a download id as `<label>-<epoch millis>`.
#[must_use]
pub fn download_id_for(label: &str, millis: i64) -> String {
    let label = label.trim();
    let label = if label.is_empty() { "download" } else { label };
    format!("{label}-{millis}")
}

impl DownloadManager {
    /// Creates a download and enumerates its links.
    ///
    /// Returns the new download id together with the enumeration report. A
    /// failed enumeration still leaves the download row behind, in `error` or
    /// `errorFetchingLinks`, with the failure recorded on it.
    ///
    /// # Errors
    ///
    /// Returns a store error if the row cannot be created, or the link
    /// enumeration error.
    #[instrument(skip(self, request), fields(label = %request.label))]
    pub async fn begin_download(&self, request: BeginDownload) -> Result<(String, FetchReport)> {
        let download_id = download_id_for(&request.label, now_millis());
        let mut new = NewDownload::new(&download_id, &request.download_location)
            .with_links_url(&request.links_url);
        new.client_id = request.client_id;
        self.store().create_download(&new).await?;
        self.store()
            .set_last_download_location(&request.download_location)
            .await?;
        info!(download_id = %download_id, "download created");

        let report = self.fetch_links(&download_id).await?;
        Ok((download_id, report))
    }

    /// Pages through the download's listing endpoint, adding files as it goes.
    ///
    /// The first page promotes the download to `active` and runs the
    /// scheduler, so transfers start while later pages are still loading.
    /// Enumeration stops early if the download is cancelled, deleted or
    /// cleared in the meantime.
    ///
    /// # Errors
    ///
    /// Returns [`LinkFetchError::UntrustedSource`] without sending any request
    /// when the endpoint host is not trusted, and the page error when a page
    /// cannot be fetched or parsed. Both are recorded on the download.
    #[instrument(skip(self))]
    pub async fn fetch_links(&self, download_id: &str) -> Result<FetchReport> {
        let download = self.store().require_download(download_id).await?;
        let Some(links_url) = download.links_url else {
            return Err(LinkFetchError::MissingEndpoint {
                download_id: download_id.to_string(),
            }
            .into());
        };

        let endpoint = match Url::parse(&links_url) {
            Ok(url) if url.host_str().is_some() => url,
            _ => {
                let error = LinkFetchError::InvalidEndpoint { url: links_url };
                return Err(self.record_link_failure(download_id, DownloadState::Error, error).await);
            }
        };
        let host = endpoint.host_str().unwrap_or_default().to_string();
        if !is_trusted_host(&host, &self.settings().trusted_hosts) {
            warn!(download_id, host = %host, "refusing untrusted link source");
            let error = LinkFetchError::UntrustedSource {
                host,
                url: endpoint.to_string(),
            };
            return Err(self.record_link_failure(download_id, DownloadState::Error, error).await);
        }

        let mut report = FetchReport::default();
        let mut position = PagePosition::Number(1);
        loop {
            let current = self.store().require_download(download_id).await?;
            let state = current.state()?;
            if !current.active || matches!(state, DownloadState::Cancelled | DownloadState::Completed)
            {
                info!(download_id, state = %state, "link enumeration stopped");
                break;
            }

            let page = match self.links().fetch_page(&endpoint, &position).await {
                Ok(page) => page,
                Err(error) => {
                    warn!(download_id, error = %error, "link page failed");
                    return Err(self
                        .record_link_failure(download_id, DownloadState::ErrorFetchingLinks, error)
                        .await);
                }
            };
            report.pages += 1;

            for link in &page.links {
                let Some((url, filename)) = accept_link(link) else {
                    warn!(download_id, link = %link, "skipping unusable link");
                    report.skipped += 1;
                    continue;
                };
                if !url
                    .host_str()
                    .is_some_and(|host| is_trusted_host(host, &self.settings().trusted_hosts))
                {
                    warn!(download_id, link = %link, "skipping link from untrusted host");
                    report.untrusted += 1;
                    continue;
                }
                match self
                    .store()
                    .add_file(download_id, url.as_str(), &filename)
                    .await?
                {
                    AddFileOutcome::Inserted(_) => report.added += 1,
                    AddFileOutcome::Duplicate(_) => report.duplicates += 1,
                }
            }

            if report.pages == 1 {
                self.store().mark_download_started(download_id).await?;
            }
            self.schedule_next(None).await?;

            if page.done || page.links.is_empty() {
                report.finished = true;
                break;
            }
            position = match page.cursor {
                Some(cursor) => PagePosition::Cursor(cursor),
                None => match position {
                    PagePosition::Number(n) => PagePosition::Number(n + 1),
                    // A cursor-mode page without a new cursor has nothing after it.
                    PagePosition::Cursor(_) => {
                        report.finished = true;
                        break;
                    }
                },
            };
        }

        if report.finished {
            self.store().set_loading_more_files(download_id, false).await?;
            self.finish_download(download_id).await?;
        }
        info!(
            download_id,
            pages = report.pages,
            added = report.added,
            duplicates = report.duplicates,
            skipped = report.skipped,
            untrusted = report.untrusted,
            "link enumeration finished"
        );
        Ok(report)
    }

    /// Stores a link failure on the download and hands the error back.
    async fn record_link_failure(
        &self,
        download_id: &str,
        state: DownloadState,
        error: LinkFetchError,
    ) -> super::ManagerError {
        let outcome = async {
            self.store().set_download_state(download_id, state).await?;
            if let Some(record) = error.to_record() {
                self.store().append_download_error(download_id, record).await?;
            }
            Ok::<(), crate::store::StoreError>(())
        }
        .await;
        match outcome {
            Ok(()) => error.into(),
            Err(store_error) => store_error.into(),
        }
    }
}
