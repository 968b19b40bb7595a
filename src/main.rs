use std::io::{self, BufWriter, IsTerminal, Write};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use cwtail_logs::{
    BackoffPolicy, FilterEngine, PollSettings, Poller, StreamCursorTable, TailError, Tailer,
};
use cwtail_output::{Banner, Emitter, EmitterOptions, OutputFormat, scroll_up};
use cwtail_source::AwsCliSource;
use cwtail_types::now_millis;

mod config;

use config::{Args, Settings};

const MIN_SCROLL_LINES: usize = 10;

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let args = Args::parse();

    let level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()),
        )
        .with_writer(io::stderr)
        .init();

    match run(args).await {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let stdout_is_terminal = io::stdout().is_terminal();
    let settings = Settings::load(args, stdout_is_terminal).context("invalid configuration")?;
    debug!(?settings, "resolved settings");

    let filter = FilterEngine::new(&settings.filters).context("invalid filter tokens")?;

    let source = AwsCliSource::new()
        .with_region(settings.region.clone())
        .with_profile(settings.profile.clone())
        .with_timeout(settings.query_timeout)
        .with_discovery_limit(settings.discovery_limit);

    let since = now_millis().saturating_sub(settings.since_ms);
    let table = StreamCursorTable::new(since)
        .with_dedup_window(settings.dedup_window)
        .with_settle_window(settings.settle_window);

    let poll_settings = PollSettings {
        streams: settings.streams.clone(),
        discover: settings.discover,
        discovery_interval: settings.discovery_interval,
        max_concurrency: settings.concurrency,
        filter_pattern: filter.filter_pattern(),
        exclude_streams: settings.filters.exclude_streams.clone(),
        ..PollSettings::new(settings.log_group.clone())
    };

    let mut out = BufWriter::new(io::stdout());
    if settings.format != OutputFormat::Json && stdout_is_terminal {
        scroll_up(&mut out, MIN_SCROLL_LINES)?;
        banner(&settings, poll_settings.filter_pattern.clone())
            .write(&mut out, settings.colorize)?;
        writeln!(out)?;
        out.flush()?;
    }

    let poller = Poller::new(source, poll_settings, table);
    let mut tailer = Tailer::new(poller, filter.clone(), settings.interval).with_backoff(
        BackoffPolicy {
            max_delay: settings.max_backoff.max(Duration::from_secs(1)),
            ..Default::default()
        },
    );

    let options = EmitterOptions {
        format: settings.format,
        colorize: settings.colorize,
        stream_width: settings.stream_width,
        utc: settings.utc,
        timestamp_format: settings.timestamp_format.clone(),
        formatter: settings.formatter.clone(),
    };
    let mut emitter = Emitter::new(out, options, filter);

    let cancel = CancellationToken::new();
    let interrupted = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupted.cancel();
        }
    });

    info!(group = %settings.log_group, "starting tail");
    let result = tailer.run(&mut emitter, &cancel).await;
    debug!(stats = ?tailer.stats(), "tail finished");

    match result {
        Ok(()) => {
            eprintln!("\nExiting tail...");
            Ok(())
        }
        // Reader went away (e.g. piped into `head`)
        Err(TailError::Output(e)) if e.kind() == io::ErrorKind::BrokenPipe => Ok(()),
        Err(e) => {
            Err(e).with_context(|| format!("tailing log group '{}' failed", settings.log_group))
        }
    }
}

fn banner(settings: &Settings, filter_pattern: Option<String>) -> Banner {
    Banner {
        group: settings.log_group.clone(),
        region: settings.region.clone(),
        filter_pattern,
        highlight: settings.filters.highlight.clone(),
        exclude: settings.filters.exclude.clone(),
        exclude_streams: settings.filters.exclude_streams.clone(),
        since: settings.since_label.clone(),
    }
}
