//! Download and file lifecycle states.

use std::fmt;

use serde::{Deserialize, Serialize};

/// State of a single file transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FileState {
    /// Waiting for a concurrency slot.
    Pending,
    /// Handed to the host engine, not yet acknowledged.
    Starting,
    /// Bytes are flowing.
    Active,
    /// Paused by the user.
    Paused,
    /// The host engine reported an interruption mid-transfer.
    Interrupted,
    /// The transfer failed; eligible for retry.
    Error,
    /// The server asked for authentication.
    WaitingForAuth,
    /// The server asked for a license to be accepted.
    WaitingForEula,
    /// Restart in progress; the old handle is being torn down.
    Cancelling,
    /// Cancelled by the user.
    Cancelled,
    /// Finished successfully.
    Completed,
}

impl FileState {
    /// States in which the host engine may still be moving bytes for the file.
    pub const IN_FLIGHT: [Self; 5] = [
        Self::Starting,
        Self::Active,
        Self::Paused,
        Self::Interrupted,
        Self::Cancelling,
    ];

    /// States that count as finished for download completion.
    pub const TERMINAL: [Self; 3] = [Self::Completed, Self::Cancelled, Self::Error];

    /// Returns the database string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Starting => "starting",
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Interrupted => "interrupted",
            Self::Error => "error",
            Self::WaitingForAuth => "waitingForAuth",
            Self::WaitingForEula => "waitingForEula",
            Self::Cancelling => "cancelling",
            Self::Cancelled => "cancelled",
            Self::Completed => "completed",
        }
    }

    /// Returns true for completed, cancelled and error.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        Self::TERMINAL.contains(&self)
    }
}

impl fmt::Display for FileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for FileState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "starting" => Ok(Self::Starting),
            "active" => Ok(Self::Active),
            "paused" => Ok(Self::Paused),
            "interrupted" => Ok(Self::Interrupted),
            "error" => Ok(Self::Error),
            "waitingForAuth" => Ok(Self::WaitingForAuth),
            "waitingForEula" => Ok(Self::WaitingForEula),
            "cancelling" => Ok(Self::Cancelling),
            "cancelled" => Ok(Self::Cancelled),
            "completed" => Ok(Self::Completed),
            _ => Err(format!("invalid file state: {s}")),
        }
    }
}

/// State of a download (a batch of files).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DownloadState {
    /// Created, links still being enumerated.
    Pending,
    /// Eligible for dispatch.
    Active,
    /// Paused by the user.
    Paused,
    /// Every live transfer was interrupted.
    Interrupted,
    /// Unrecoverable failure, such as an untrusted link source.
    Error,
    /// Suspended until an auth callback arrives.
    WaitingForAuth,
    /// Suspended until a license is accepted.
    WaitingForEula,
    /// Cancelled by the user.
    Cancelled,
    /// All files reached a terminal state.
    Completed,
    /// Link enumeration failed part way.
    ErrorFetchingLinks,
    /// Suspended for application shutdown.
    AppQuitting,
}

impl DownloadState {
    /// Returns the database string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Interrupted => "interrupted",
            Self::Error => "error",
            Self::WaitingForAuth => "waitingForAuth",
            Self::WaitingForEula => "waitingForEula",
            Self::Cancelled => "cancelled",
            Self::Completed => "completed",
            Self::ErrorFetchingLinks => "errorFetchingLinks",
            Self::AppQuitting => "appQuitting",
        }
    }

    /// States set top-down by a user action or failure rather than derived from files.
    #[must_use]
    pub fn is_imposed(self) -> bool {
        matches!(
            self,
            Self::Paused
                | Self::Cancelled
                | Self::Error
                | Self::ErrorFetchingLinks
                | Self::AppQuitting
                | Self::WaitingForAuth
                | Self::WaitingForEula
        )
    }
}

impl fmt::Display for DownloadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for DownloadState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "active" => Ok(Self::Active),
            "paused" => Ok(Self::Paused),
            "interrupted" => Ok(Self::Interrupted),
            "error" => Ok(Self::Error),
            "waitingForAuth" => Ok(Self::WaitingForAuth),
            "waitingForEula" => Ok(Self::WaitingForEula),
            "cancelled" => Ok(Self::Cancelled),
            "completed" => Ok(Self::Completed),
            "errorFetchingLinks" => Ok(Self::ErrorFetchingLinks),
            "appQuitting" => Ok(Self::AppQuitting),
            _ => Err(format!("invalid download state: {s}")),
        }
    }
}

/// Derives the displayed download state from the states of its files.
///
/// Imposed states win. Otherwise: no files yet keeps `pending`, anything
/// waiting on auth or a license surfaces first, all-terminal is `completed`,
/// and a download whose only live files are interrupted is `interrupted`.
#[must_use]
pub fn derive_download_state(stored: DownloadState, files: &[FileState]) -> DownloadState {
    if stored.is_imposed() || files.is_empty() {
        return stored;
    }
    if files.contains(&FileState::WaitingForAuth) {
        return DownloadState::WaitingForAuth;
    }
    if files.contains(&FileState::WaitingForEula) {
        return DownloadState::WaitingForEula;
    }
    if files.iter().all(|state| state.is_terminal()) {
        return DownloadState::Completed;
    }
    let live = files.iter().filter(|state| !state.is_terminal());
    let mut saw_interrupted = false;
    for state in live {
        match state {
            FileState::Interrupted => saw_interrupted = true,
            FileState::Paused => {}
            _ => return DownloadState::Active,
        }
    }
    if saw_interrupted {
        DownloadState::Interrupted
    } else {
        DownloadState::Paused
    }
}
