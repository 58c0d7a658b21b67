//! Application configuration loading for CLI defaults.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};

/// `key = value` file configuration for bulk-downloader defaults.
#[derive(Debug, Clone, Default)]
pub struct FileConfig {
    /// Path of the `SQLite` state database.
    pub db_path: Option<PathBuf>,
    /// Concurrency ceiling written to preferences at startup (1..=100).
    pub concurrent_downloads: Option<u8>,
    /// Destination used when `begin` is given no `--dest`.
    pub download_location: Option<PathBuf>,
    /// Hosts trusted to serve link listings, comma separated in the file.
    pub trusted_hosts: Option<Vec<String>>,
    /// Undo grace window in seconds.
    pub undo_grace_secs: Option<u64>,
    /// Default verbosity mode.
    pub verbosity: Option<VerbositySetting>,
    /// Optional database pool max connections (1..=20).
    pub db_max_connections: Option<u32>,
    /// Optional database busy timeout in milliseconds.
    pub db_busy_timeout_ms: Option<u32>,
    /// Optional listing client connect timeout in seconds.
    pub links_connect_timeout_secs: Option<u64>,
    /// Optional listing client read timeout in seconds.
    pub links_read_timeout_secs: Option<u64>,
}

impl FileConfig {
    /// Validates config values against runtime and CLI constraints.
    pub fn validate(&self) -> Result<()> {
        if let Some(limit) = self.concurrent_downloads
            && !(1..=100).contains(&limit)
        {
            bail!(
                "Invalid config value for `concurrent_downloads`: {limit}. Expected range: 1..=100"
            );
        }
        if let Some(grace) = self.undo_grace_secs
            && grace > 3600
        {
            bail!("Invalid config value for `undo_grace_secs`: {grace}. Expected range: 0..=3600");
        }
        if let Some(hosts) = &self.trusted_hosts
            && hosts.is_empty()
        {
            bail!("Invalid config value for `trusted_hosts`: expected at least one host");
        }
        validate_timeout_secs("links_connect_timeout_secs", self.links_connect_timeout_secs)?;
        validate_timeout_secs("links_read_timeout_secs", self.links_read_timeout_secs)?;
        validate_db_max_connections(self.db_max_connections)?;
        validate_db_busy_timeout_ms(self.db_busy_timeout_ms)?;
        Ok(())
    }
}

fn validate_db_max_connections(value: Option<u32>) -> Result<()> {
    let Some(value) = value else {
        return Ok(());
    };
    if !(1..=20).contains(&value) {
        bail!("Invalid config value for `db_max_connections`: {value}. Expected range: 1..=20");
    }
    Ok(())
}

fn validate_db_busy_timeout_ms(value: Option<u32>) -> Result<()> {
    let Some(value) = value else {
        return Ok(());
    };
    if value > 120_000 {
        bail!("Invalid config value for `db_busy_timeout_ms`: {value}. Expected range: 0..=120000");
    }
    Ok(())
}

fn validate_timeout_secs(field: &str, value: Option<u64>) -> Result<()> {
    let Some(value) = value else {
        return Ok(());
    };
    if !(1..=3600).contains(&value) {
        bail!("Invalid config value for `{field}`: {value}. Expected range: 1..=3600");
    }
    Ok(())
}

/// Supported config verbosity labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerbositySetting {
    Default,
    Verbose,
    Quiet,
    Debug,
}

impl VerbositySetting {
    /// Log filter used when neither flags nor `RUST_LOG` say otherwise.
    #[must_use]
    pub fn filter(self) -> &'static str {
        match self {
            Self::Default => "info",
            Self::Verbose | Self::Debug => "debug",
            Self::Quiet => "error",
        }
    }
}

/// Loaded config metadata.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// Resolved config path if a base directory is known.
    pub path: Option<PathBuf>,
    /// Parsed file config when a config file exists and was valid.
    pub config: Option<FileConfig>,
}

/// Resolves default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/bulk-downloader/config.toml`
/// 2. `$HOME/.config/bulk-downloader/config.toml`
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(
            PathBuf::from(xdg_config_home)
                .join("bulk-downloader")
                .join("config.toml"),
        );
    }

    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("bulk-downloader")
            .join("config.toml"),
    )
}

/// Default location of the state database, next to the config file.
#[must_use]
pub fn resolve_default_db_path() -> PathBuf {
    if let Some(data_home) = env_var_non_empty_os("XDG_DATA_HOME") {
        return PathBuf::from(data_home)
            .join("bulk-downloader")
            .join("state.db");
    }
    env_var_non_empty_os("HOME").map_or_else(
        || PathBuf::from("bulk-downloader.db"),
        |home| {
            PathBuf::from(home)
                .join(".local")
                .join("share")
                .join("bulk-downloader")
                .join("state.db")
        },
    )
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

/// Loads config from an explicit path, or the default path if present.
pub fn load_file_config_from(explicit: Option<&Path>) -> Result<LoadedConfig> {
    if let Some(path) = explicit {
        let config = load_file_config(path)?;
        return Ok(LoadedConfig {
            path: Some(path.to_path_buf()),
            config: Some(config),
        });
    }

    let path = resolve_default_config_path();
    let Some(path_ref) = path.as_deref() else {
        return Ok(LoadedConfig { path, config: None });
    };
    if !path_ref.exists() {
        return Ok(LoadedConfig { path, config: None });
    }

    let config = load_file_config(path_ref)?;
    Ok(LoadedConfig {
        path,
        config: Some(config),
    })
}

fn load_file_config(path: &Path) -> Result<FileConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
    parse_config_str(&raw)
        .with_context(|| format!("Failed to parse config file '{}'", path.display()))
}

fn parse_config_str(raw: &str) -> Result<FileConfig> {
    let mut cfg = FileConfig::default();
    for (line_index, raw_line) in raw.lines().enumerate() {
        let line = strip_inline_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }
        let line_no = line_index + 1;

        let Some((raw_key, raw_value)) = line.split_once('=') else {
            bail!("Invalid config syntax on line {line_no}: expected key = value");
        };

        let key = raw_key.trim();
        let value = raw_value.trim();
        let context = || format!("Invalid `{key}` value on line {line_no}");

        match key {
            "db_path" => {
                cfg.db_path = Some(PathBuf::from(
                    parse_string_literal(value).with_context(context)?,
                ));
            }
            "concurrent_downloads" => {
                cfg.concurrent_downloads = Some(parse_integer_u8(value).with_context(context)?);
            }
            "download_location" => {
                cfg.download_location = Some(PathBuf::from(
                    parse_string_literal(value).with_context(context)?,
                ));
            }
            "trusted_hosts" => {
                let parsed = parse_string_literal(value).with_context(context)?;
                cfg.trusted_hosts = Some(
                    parsed
                        .split(',')
                        .map(|host| host.trim().to_ascii_lowercase())
                        .filter(|host| !host.is_empty())
                        .collect(),
                );
            }
            "undo_grace_secs" => {
                cfg.undo_grace_secs = Some(parse_integer_u64(value).with_context(context)?);
            }
            "verbosity" => {
                let parsed = parse_string_literal(value).with_context(context)?;
                cfg.verbosity = Some(parse_verbosity(&parsed).with_context(|| {
                    format!("Invalid `verbosity` value '{parsed}' on line {line_no}")
                })?);
            }
            "db_max_connections" => {
                let parsed = parse_integer_u64(value).with_context(context)?;
                let n = u32::try_from(parsed)
                    .map_err(|_| anyhow::anyhow!("db_max_connections out of range for u32"))?;
                cfg.db_max_connections = Some(n);
            }
            "db_busy_timeout_ms" => {
                let parsed = parse_integer_u64(value).with_context(context)?;
                let n = u32::try_from(parsed)
                    .map_err(|_| anyhow::anyhow!("db_busy_timeout_ms out of range for u32"))?;
                cfg.db_busy_timeout_ms = Some(n);
            }
            "links_connect_timeout_secs" => {
                cfg.links_connect_timeout_secs =
                    Some(parse_integer_u64(value).with_context(context)?);
            }
            "links_read_timeout_secs" => {
                cfg.links_read_timeout_secs =
                    Some(parse_integer_u64(value).with_context(context)?);
            }
            unknown => {
                bail!("Unknown configuration key: '{unknown}' on line {line_no}");
            }
        }
    }
    cfg.validate()?;
    Ok(cfg)
}

fn strip_inline_comment(line: &str) -> &str {
    let mut in_string = false;
    for (index, ch) in line.char_indices() {
        match ch {
            '"' => in_string = !in_string,
            '#' if !in_string => return &line[..index],
            _ => {}
        }
    }
    line
}

fn parse_string_literal(raw_value: &str) -> Result<String> {
    if raw_value.len() < 2 || !raw_value.starts_with('"') || !raw_value.ends_with('"') {
        bail!("Expected double-quoted string");
    }
    Ok(raw_value[1..raw_value.len() - 1].to_string())
}

fn parse_integer_u8(raw_value: &str) -> Result<u8> {
    let token = raw_value.trim();
    if token.is_empty() {
        bail!("Expected integer value");
    }
    let value = token.parse::<u16>()?;
    u8::try_from(value).map_err(|_| anyhow::anyhow!("Integer value out of range for u8"))
}

fn parse_integer_u64(raw_value: &str) -> Result<u64> {
    let token = raw_value.trim();
    if token.is_empty() {
        bail!("Expected integer value");
    }
    let value = token.parse::<i128>()?;
    if value < 0 {
        bail!("Expected non-negative integer");
    }
    u64::try_from(value).map_err(|_| anyhow::anyhow!("Integer value out of range for u64"))
}

fn parse_verbosity(value: &str) -> Result<VerbositySetting> {
    match value {
        "default" => Ok(VerbositySetting::Default),
        "verbose" => Ok(VerbositySetting::Verbose),
        "quiet" => Ok(VerbositySetting::Quiet),
        "debug" => Ok(VerbositySetting::Debug),
        _ => bail!("Expected one of: default, verbose, quiet, debug"),
    }
}
