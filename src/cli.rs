//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};

/// Bulk file download manager.
///
/// Enumerates files from a trusted link listing and downloads them under a
/// concurrency ceiling, with pause, resume, cancel, retry and restart.
#[derive(Parser, Debug)]
#[command(name = "bulk-downloader")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Config file (defaults to $XDG_CONFIG_HOME/bulk-downloader/config.toml)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// State database path
    #[arg(long, global = true, value_name = "PATH")]
    pub db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Download and file selection shared by item commands.
#[derive(ClapArgs, Debug, Clone)]
pub struct ItemArgs {
    /// Download id
    pub download_id: String,

    /// Restrict the operation to one file of the download
    #[arg(long, value_name = "FILENAME")]
    pub file: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create a download from a link listing and run it
    Begin {
        /// Link listing endpoint (must be on a trusted host)
        links_url: String,

        /// Human label used as the download id prefix
        #[arg(long, default_value = "download")]
        label: String,

        /// Destination directory
        #[arg(long, value_name = "DIR")]
        dest: Option<PathBuf>,
    },

    /// Recover the previous session and transfer until nothing is left
    Run,

    /// Read JSON control requests from stdin, one per line, while transferring
    Serve,

    /// Pause one file, one download, or everything
    Pause {
        /// Download id; omit to pause every running download
        download_id: Option<String>,

        #[arg(long, value_name = "FILENAME", requires = "download_id")]
        file: Option<String>,
    },

    /// Resume one file, one download, or everything
    Resume {
        /// Download id; omit to resume every paused download
        download_id: Option<String>,

        #[arg(long, value_name = "FILENAME", requires = "download_id")]
        file: Option<String>,
    },

    /// Cancel a download or one of its files
    Cancel(ItemArgs),

    /// Requeue errored files
    Retry(ItemArgs),

    /// Restart a download or one of its files from scratch
    Restart(ItemArgs),

    /// Show download progress
    Status {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Show file progress of one download
    Files {
        #[command(flatten)]
        item: ItemArgs,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Undo a cancel, restart or delete within its grace window
    Undo {
        marker: String,
    },

    /// Delete a download (undoable within the grace window)
    Delete {
        download_id: String,
    },

    /// Hide a finished download from listings
    Clear {
        download_id: String,
    },

    /// Provide a bearer token for files waiting on authentication
    Auth {
        download_id: String,
        token: String,
    },

    /// Accept or reject the license files are waiting on
    Eula {
        download_id: String,

        #[arg(long, conflicts_with = "reject", required_unless_present = "reject")]
        accept: bool,

        #[arg(long)]
        reject: bool,
    },

    /// Show or change preferences
    Prefs {
        /// Maximum concurrent transfers (1-100)
        #[arg(long, value_parser = clap::value_parser!(i64).range(1..=100))]
        concurrent_downloads: Option<i64>,

        /// Default destination directory
        #[arg(long, value_name = "DIR")]
        default_location: Option<PathBuf>,

        /// Allow usage metrics
        #[arg(long)]
        allow_metrics: Option<bool>,
    },
}
