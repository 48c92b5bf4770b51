//! CLI argument definitions using clap derive macros.
//!
//! Flags that can also come from the config file are `Option`s: `None` means
//! "not given on the command line", so the file value (or the built-in
//! default) applies.

use std::path::PathBuf;

use clap::Parser;

/// Batch-download songs by id.
///
/// Ids can be passed as arguments or piped via stdin, as bare numbers, song
/// page URLs, or HTML playlist fragments.
#[derive(Parser, Debug)]
#[command(name = "songfetch")]
#[command(author, version, about)]
pub struct Args {
    /// Song ids, song URLs, or text containing them
    pub ids: Vec<String>,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,

    /// Config file (default: $XDG_CONFIG_HOME/songfetch/config.toml)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Maximum concurrent songs (at least 1)
    #[arg(short = 'c', long, value_parser = parse_concurrency)]
    pub concurrency: Option<usize>,

    /// Attempts per request, including the first (0 behaves like 1)
    #[arg(short = 'r', long, value_parser = clap::value_parser!(u32).range(0..=20))]
    pub max_retries: Option<u32>,

    /// Delay between attempts in milliseconds
    #[arg(long, value_parser = clap::value_parser!(u64).range(0..=600_000))]
    pub backoff_ms: Option<u64>,

    /// Double the delay after every failed attempt
    #[arg(long)]
    pub exponential_backoff: bool,

    /// Random jitter added to each delay, in milliseconds
    #[arg(long, value_parser = clap::value_parser!(u64).range(0..=600_000))]
    pub jitter_ms: Option<u64>,

    /// Output directory for songs
    #[arg(short = 'o', long)]
    pub output_dir: Option<PathBuf>,

    /// Audio quality level (standard, exhigh, lossless, hires, ...)
    #[arg(long)]
    pub level: Option<String>,

    /// Credential endpoint URL
    #[arg(long)]
    pub token_url: Option<String>,

    /// Metadata endpoint URL
    #[arg(long)]
    pub metadata_url: Option<String>,

    /// Write a JSON-lines report of every item to this path
    #[arg(long)]
    pub report: Option<PathBuf>,
}

fn parse_concurrency(value: &str) -> Result<usize, String> {
    match value.parse::<usize>() {
        Ok(0) => Err("must be at least 1".to_string()),
        Ok(n) => Ok(n),
        Err(e) => Err(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_default_args_parses_successfully() {
        let args = Args::try_parse_from(["songfetch"]).unwrap();
        assert!(args.ids.is_empty());
        assert_eq!(args.verbose, 0);
        assert!(!args.quiet);
        assert!(args.concurrency.is_none());
        assert!(args.max_retries.is_none());
        assert!(!args.exponential_backoff);
    }

    #[test]
    fn test_cli_positional_ids() {
        let args = Args::try_parse_from(["songfetch", "186016", "42"]).unwrap();
        assert_eq!(args.ids, vec!["186016", "42"]);
    }

    #[test]
    fn test_cli_verbose_flag_increments_count() {
        let args = Args::try_parse_from(["songfetch", "-vv"]).unwrap();
        assert_eq!(args.verbose, 2);
    }

    #[test]
    fn test_cli_concurrency_range() {
        let args = Args::try_parse_from(["songfetch", "-c", "150"]).unwrap();
        assert_eq!(args.concurrency, Some(150));
        assert!(Args::try_parse_from(["songfetch", "-c", "0"]).is_err());
        assert!(Args::try_parse_from(["songfetch", "-c", "many"]).is_err());
    }

    #[test]
    fn test_cli_retry_flags() {
        let args = Args::try_parse_from([
            "songfetch",
            "-r",
            "0",
            "--backoff-ms",
            "250",
            "--exponential-backoff",
            "--jitter-ms",
            "50",
        ])
        .unwrap();
        assert_eq!(args.max_retries, Some(0));
        assert_eq!(args.backoff_ms, Some(250));
        assert!(args.exponential_backoff);
        assert_eq!(args.jitter_ms, Some(50));
    }

    #[test]
    fn test_cli_endpoints_and_report() {
        let args = Args::try_parse_from([
            "songfetch",
            "--token-url",
            "http://localhost/token",
            "--metadata-url",
            "http://localhost/music",
            "--report",
            "out.jsonl",
            "-o",
            "songs",
            "--level",
            "lossless",
        ])
        .unwrap();
        assert_eq!(args.token_url.as_deref(), Some("http://localhost/token"));
        assert_eq!(args.metadata_url.as_deref(), Some("http://localhost/music"));
        assert_eq!(args.report, Some(PathBuf::from("out.jsonl")));
        assert_eq!(args.output_dir, Some(PathBuf::from("songs")));
        assert_eq!(args.level.as_deref(), Some("lossless"));
    }

    #[test]
    fn test_cli_help_flag_shows_usage() {
        let err = Args::try_parse_from(["songfetch", "--help"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
    }

    #[test]
    fn test_cli_invalid_flag_returns_error() {
        let err = Args::try_parse_from(["songfetch", "--invalid-flag"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::UnknownArgument);
    }
}
