//! CLI entry point for songfetch.

use std::io::{self, IsTerminal, Read};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use songfetch_core::{BatchCoordinator, BatchReport, ItemPipeline, extract_song_ids};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

mod app_config;
mod cli;

use cli::Args;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    debug!(?args, "CLI arguments parsed");

    let file_config = app_config::load_file_config(args.config.as_deref())?;
    let settings = app_config::resolve_settings(&args, file_config.as_ref())?;
    debug!(?settings, from_file = file_config.is_some(), "settings resolved");

    // Read input: from positional args or stdin
    let input_text = if !args.ids.is_empty() {
        args.ids.join("\n")
    } else if !io::stdin().is_terminal() {
        let mut buffer = String::new();
        io::stdin()
            .read_to_string(&mut buffer)
            .context("Failed to read song ids from stdin")?;
        buffer
    } else {
        info!("No input provided. Pass song ids as arguments or pipe them via stdin.");
        info!("Example: echo 'https://music.163.com/#/song?id=186016' | songfetch");
        return Ok(ExitCode::SUCCESS);
    };

    let items = extract_song_ids(&input_text);
    if items.is_empty() {
        info!("No song ids found in input");
        return Ok(ExitCode::SUCCESS);
    }

    info!(
        count = items.len(),
        concurrency = settings.max_concurrency,
        output_dir = %settings.output_dir.display(),
        "songfetch starting"
    );

    let pipeline =
        Arc::new(ItemPipeline::from_settings(&settings).context("Failed to build HTTP client")?);
    let coordinator = BatchCoordinator::new(pipeline, settings.max_concurrency)?;

    let cancel = CancellationToken::new();
    let ctrl_c_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing in-flight songs");
            ctrl_c_token.cancel();
        }
    });

    let report = coordinator.run_until_cancelled(items, &cancel).await;

    log_summary(&report);

    if let Some(path) = &args.report {
        report
            .write_jsonl(path)
            .with_context(|| format!("Failed to write report '{}'", path.display()))?;
        info!(path = %path.display(), "report written");
    }

    Ok(if report.is_clean() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn log_summary(report: &BatchReport) {
    info!(
        submitted = report.submitted(),
        succeeded = report.success_count(),
        skipped = report.skipped_count(),
        failed = report.failure_count(),
        cancelled = report.cancelled_count(),
        elapsed_secs = report.elapsed.as_secs_f64(),
        "Run summary"
    );

    for (kind, count) in report.failures_by_kind() {
        info!(%kind, count, "failures by kind");
    }
    for (item, failures) in report.failure_reasons() {
        for failure in failures {
            warn!(id = %item, kind = %failure.kind, reason = %failure.reason, "song failed");
        }
    }
    if !report.cancelled.is_empty() {
        let ids: Vec<String> = report.cancelled.iter().map(ToString::to_string).collect();
        warn!(ids = %ids.join(","), "songs cancelled before completion");
    }
}
