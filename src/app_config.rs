//! Config file loading and layering for the CLI.
//!
//! Precedence: command-line flag > config file > built-in default.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use songfetch_core::Settings;

use crate::cli::Args;

/// Values read from the key = value config file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileConfig {
    /// Default output directory.
    pub output_dir: Option<PathBuf>,
    /// Default concurrency (at least 1).
    pub concurrency: Option<usize>,
    /// Attempts per request, including the first.
    pub max_retries: Option<u32>,
    /// Delay between attempts in milliseconds.
    pub backoff_ms: Option<u64>,
    /// Exponential instead of constant backoff.
    pub exponential_backoff: Option<bool>,
    /// Jitter bound in milliseconds.
    pub jitter_ms: Option<u64>,
    /// Audio quality level.
    pub level: Option<String>,
    /// Credential endpoint.
    pub token_url: Option<String>,
    /// Metadata endpoint.
    pub metadata_url: Option<String>,
    /// Referer header; an empty string disables it.
    pub referer: Option<String>,
    /// TCP connect timeout in seconds.
    pub connect_timeout_secs: Option<u64>,
    /// Per-attempt request timeout in seconds.
    pub request_timeout_secs: Option<u64>,
    /// Longest `Retry-After` wait honored, in seconds.
    pub max_retry_wait_secs: Option<u64>,
}

impl FileConfig {
    /// Validates config values against the CLI constraints.
    pub fn validate(&self) -> Result<()> {
        if self.concurrency == Some(0) {
            bail!("Invalid config value for `concurrency`: 0. Expected a value of at least 1");
        }
        if let Some(max_retries) = self.max_retries
            && max_retries > 20
        {
            bail!("Invalid config value for `max_retries`: {max_retries}. Expected range: 0..=20");
        }
        validate_delay_ms("backoff_ms", self.backoff_ms)?;
        validate_delay_ms("jitter_ms", self.jitter_ms)?;
        validate_timeout_secs("connect_timeout_secs", self.connect_timeout_secs)?;
        validate_timeout_secs("request_timeout_secs", self.request_timeout_secs)?;
        validate_timeout_secs("max_retry_wait_secs", self.max_retry_wait_secs)?;
        Ok(())
    }
}

fn validate_delay_ms(field: &str, value: Option<u64>) -> Result<()> {
    let Some(value) = value else {
        return Ok(());
    };
    if value > 600_000 {
        bail!("Invalid config value for `{field}`: {value}. Expected range: 0..=600000");
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

/// Resolves default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/songfetch/config.toml`
/// 2. `$HOME/.config/songfetch/config.toml`
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(PathBuf::from(xdg_config_home).join("songfetch").join("config.toml"));
    }

    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("songfetch")
            .join("config.toml"),
    )
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

/// Loads the config file: an explicit path must exist, the default path is optional.
pub fn load_file_config(explicit: Option<&Path>) -> Result<Option<FileConfig>> {
    if let Some(path) = explicit {
        return read_file_config(path).map(Some);
    }

    match resolve_default_config_path() {
        Some(path) if path.exists() => read_file_config(&path).map(Some),
        _ => Ok(None),
    }
}

fn read_file_config(path: &Path) -> Result<FileConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
    parse_config_str(&raw)
        .with_context(|| format!("Failed to parse config file '{}'", path.display()))
}

/// Layers defaults, file values and CLI flags into validated [`Settings`].
pub fn resolve_settings(args: &Args, file: Option<&FileConfig>) -> Result<Settings> {
    let mut settings = Settings::default();

    if let Some(file) = file {
        apply_file_config(&mut settings, file);
    }

    if let Some(concurrency) = args.concurrency {
        settings.max_concurrency = concurrency;
    }
    if let Some(max_retries) = args.max_retries {
        settings.max_retries = max_retries;
    }
    if let Some(backoff_ms) = args.backoff_ms {
        settings.retry_backoff = Duration::from_millis(backoff_ms);
    }
    if args.exponential_backoff {
        settings.exponential_backoff = true;
    }
    if let Some(jitter_ms) = args.jitter_ms {
        settings.jitter = Duration::from_millis(jitter_ms);
    }
    if let Some(output_dir) = &args.output_dir {
        settings.output_dir.clone_from(output_dir);
    }
    if let Some(level) = &args.level {
        settings.level.clone_from(level);
    }
    if let Some(token_url) = &args.token_url {
        settings.token_url.clone_from(token_url);
    }
    if let Some(metadata_url) = &args.metadata_url {
        settings.metadata_url.clone_from(metadata_url);
    }

    settings.validate().context("Invalid settings")?;
    Ok(settings)
}

fn apply_file_config(settings: &mut Settings, file: &FileConfig) {
    if let Some(output_dir) = &file.output_dir {
        settings.output_dir.clone_from(output_dir);
    }
    if let Some(concurrency) = file.concurrency {
        settings.max_concurrency = concurrency;
    }
    if let Some(max_retries) = file.max_retries {
        settings.max_retries = max_retries;
    }
    if let Some(backoff_ms) = file.backoff_ms {
        settings.retry_backoff = Duration::from_millis(backoff_ms);
    }
    if let Some(exponential) = file.exponential_backoff {
        settings.exponential_backoff = exponential;
    }
    if let Some(jitter_ms) = file.jitter_ms {
        settings.jitter = Duration::from_millis(jitter_ms);
    }
    if let Some(level) = &file.level {
        settings.level.clone_from(level);
    }
    if let Some(token_url) = &file.token_url {
        settings.token_url.clone_from(token_url);
    }
    if let Some(metadata_url) = &file.metadata_url {
        settings.metadata_url.clone_from(metadata_url);
    }
    if let Some(referer) = &file.referer {
        settings.referer = (!referer.is_empty()).then(|| referer.clone());
    }
    if let Some(secs) = file.connect_timeout_secs {
        settings.connect_timeout = Duration::from_secs(secs);
    }
    if let Some(secs) = file.request_timeout_secs {
        settings.request_timeout = Duration::from_secs(secs);
    }
    if let Some(secs) = file.max_retry_wait_secs {
        settings.max_retry_wait = Duration::from_secs(secs);
    }
}

fn parse_config_str(raw: &str) -> Result<FileConfig> {
    let mut cfg = FileConfig::default();
    for (line_index, raw_line) in raw.lines().enumerate() {
        let line_no = line_index + 1;
        let line = strip_inline_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }

        let Some((raw_key, raw_value)) = line.split_once('=') else {
            bail!("Invalid config syntax on line {line_no}: expected key = value");
        };

        let key = raw_key.trim();
        let value = raw_value.trim();
        let invalid = || format!("Invalid `{key}` value on line {line_no}");

        match key {
            "output_dir" => {
                cfg.output_dir = Some(PathBuf::from(
                    parse_string_literal(value).with_context(invalid)?,
                ));
            }
            "concurrency" => {
                let parsed = parse_integer_u64(value).with_context(invalid)?;
                let n = usize::try_from(parsed)
                    .map_err(|_| anyhow::anyhow!("concurrency out of range for usize"))
                    .with_context(invalid)?;
                cfg.concurrency = Some(n);
            }
            "max_retries" => {
                let parsed = parse_integer_u64(value).with_context(invalid)?;
                let n = u32::try_from(parsed)
                    .map_err(|_| anyhow::anyhow!("max_retries out of range for u32"))
                    .with_context(invalid)?;
                cfg.max_retries = Some(n);
            }
            "backoff_ms" => cfg.backoff_ms = Some(parse_integer_u64(value).with_context(invalid)?),
            "exponential_backoff" => {
                cfg.exponential_backoff = Some(parse_boolean(value).with_context(invalid)?);
            }
            "jitter_ms" => cfg.jitter_ms = Some(parse_integer_u64(value).with_context(invalid)?),
            "level" => cfg.level = Some(parse_string_literal(value).with_context(invalid)?),
            "token_url" => cfg.token_url = Some(parse_string_literal(value).with_context(invalid)?),
            "metadata_url" => {
                cfg.metadata_url = Some(parse_string_literal(value).with_context(invalid)?);
            }
            "referer" => cfg.referer = Some(parse_string_literal(value).with_context(invalid)?),
            "connect_timeout_secs" => {
                cfg.connect_timeout_secs = Some(parse_integer_u64(value).with_context(invalid)?);
            }
            "request_timeout_secs" => {
                cfg.request_timeout_secs = Some(parse_integer_u64(value).with_context(invalid)?);
            }
            "max_retry_wait_secs" => {
                cfg.max_retry_wait_secs = Some(parse_integer_u64(value).with_context(invalid)?);
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

fn parse_boolean(raw_value: &str) -> Result<bool> {
    match raw_value.trim() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => bail!("Expected 'true' or 'false'"),
    }
}
