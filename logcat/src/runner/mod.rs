//! Process lifecycle for logcat: resolve identity, wire signals, run the pipeline.

pub mod metrics_server;

use crate::config::Config;
use crate::output_writer::RotatingWriter;
use crate::pipeline::{Pipeline, PipelineSettings, PipelineSummary};
use crate::tailer::{FileTailer, LineSource, TailerConfig};
use anyhow::{Context, Result};
use metrics_server::MetricsServer;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const HOSTNAME_ENV: &str = "HOSTNAME";
const HOSTNAME_FILES: [&str; 2] = ["/proc/sys/kernel/hostname", "/etc/hostname"];
const FALLBACK_HOSTNAME: &str = "localhost";

/// Runs the pipeline described by `config` until a shutdown signal arrives.
pub async fn run(config: &Config) -> Result<PipelineSummary> {
    let shutdown = CancellationToken::new();
    spawn_signal_listener(shutdown.clone()).context("failed to install signal handlers")?;
    run_until(config, shutdown).await
}

/// Same as [`run`] but stops when `shutdown` is cancelled instead of on a signal.
pub async fn run_until(config: &Config, shutdown: CancellationToken) -> Result<PipelineSummary> {
    let server_identity = resolve_server_identity(config.server_name());
    info!(
        input = %config.input_path().display(),
        output = %config.output_dir().display(),
        server_name = %server_identity,
        workers = config.pipeline.workers,
        "logcat starting"
    );

    let metrics_task = match config.metrics.listen_addr {
        Some(addr) => match MetricsServer::bind(addr).await {
            Ok(server) => Some(tokio::spawn(server.serve(shutdown.child_token()))),
            Err(err) => {
                warn!(error = %err, "metrics endpoint disabled");
                None
            }
        },
        None => None,
    };

    let result = run_pipeline(config, server_identity, shutdown.clone()).await;

    // The pipeline may have ended on its own; make sure the metrics server follows.
    shutdown.cancel();
    if let Some(task) = metrics_task {
        if let Err(err) = task.await {
            warn!(error = %err, "metrics server task failed");
        }
    }

    let summary = result?;
    info!(
        lines_received = summary.lines_received,
        lines_queued = summary.lines_queued,
        shape_mismatches = summary.shape_mismatches,
        parse_errors = summary.workers.parse_errors,
        records_written = summary.writer.records_written,
        files_opened = summary.writer.files_opened,
        "logcat stopped"
    );
    Ok(summary)
}

async fn run_pipeline(
    config: &Config,
    server_identity: String,
    shutdown: CancellationToken,
) -> Result<PipelineSummary> {
    let tailer_config = TailerConfig {
        poll_interval: config.poll_interval(),
        start_at_end: config.input.start_at_end,
    };
    let mut tailer = FileTailer::start(config.input_path(), tailer_config)
        .await
        .context("failed to start tailing input file")?;

    let settings = PipelineSettings::from_config(config, server_identity);
    let pipeline = match Pipeline::start(settings, RotatingWriter::new(config.output_dir())).await {
        Ok(pipeline) => pipeline,
        Err(err) => {
            if let Err(stop_err) = tailer.stop().await {
                warn!(error = %stop_err, "failed to stop tailer after startup failure");
            }
            return Err(err);
        }
    };

    pipeline.run(&mut tailer, shutdown).await
}

/// Name stamped on every record: the configured value, else the host name.
pub fn resolve_server_identity(configured: Option<&str>) -> String {
    if let Some(name) = configured {
        return name.to_string();
    }

    let from_env = std::env::var(HOSTNAME_ENV).ok();
    let from_files = HOSTNAME_FILES
        .iter()
        .filter_map(|path| std::fs::read_to_string(Path::new(path)).ok());

    first_hostname(from_env.into_iter().chain(from_files)).unwrap_or_else(|| {
        warn!("could not determine host name; using {FALLBACK_HOSTNAME}");
        FALLBACK_HOSTNAME.to_string()
    })
}

fn first_hostname(candidates: impl IntoIterator<Item = String>) -> Option<String> {
    candidates
        .into_iter()
        .map(|candidate| candidate.trim().to_string())
        .find(|candidate| !candidate.is_empty())
}

/// Cancels `shutdown` on SIGINT, SIGTERM, SIGHUP or SIGQUIT (Ctrl-C off unix).
#[cfg(unix)]
fn spawn_signal_listener(shutdown: CancellationToken) -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let mut hangup = signal(SignalKind::hangup())?;
    let mut quit = signal(SignalKind::quit())?;

    tokio::spawn(async move {
        let received = tokio::select! {
            _ = interrupt.recv() => "SIGINT",
            _ = terminate.recv() => "SIGTERM",
            _ = hangup.recv() => "SIGHUP",
            _ = quit.recv() => "SIGQUIT",
            _ = shutdown.cancelled() => return,
        };
        info!(signal = received, "shutdown signal received");
        shutdown.cancel();
    });
    Ok(())
}

#[cfg(not(unix))]
fn spawn_signal_listener(shutdown: CancellationToken) -> Result<()> {
    tokio::spawn(async move {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(err) = result {
                    tracing::error!(error = %err, "failed while waiting for shutdown signal");
                }
                info!("shutdown signal received");
                shutdown.cancel();
            }
            _ = shutdown.cancelled() => {}
        }
    });
    Ok(())
}
