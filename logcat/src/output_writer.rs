//! Single owner of the output file.
//!
//! All serialized records arrive through one queue and are appended by one task, so the file
//! handle is never shared. The writer rotates to a freshly named file whenever a rotation event
//! arrives (hourly, see [`hourly_rotation`]) and transparently reopens a file that disappeared
//! underneath it.

use crate::metrics::{FILE_ROTATIONS_TOTAL, RECORDS_WRITTEN_TOTAL, WRITER_ERRORS_TOTAL};
use anyhow::{Context, Result};
use chrono::{DateTime, Local, TimeZone, Timelike};
use rand::distr::{Alphanumeric, SampleString};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub const FILE_PREFIX: &str = "artifactory-traffic";
pub const FILE_EXTENSION: &str = "log";
pub const SUFFIX_LEN: usize = 8;
/// Regenerated candidates tried after the first one collides. Uniqueness is best-effort: once
/// these are exhausted the last candidate is appended to even if it exists.
pub const MAX_NAME_RETRIES: usize = 10;
#[cfg(unix)]
const FILE_MODE: u32 = 0o644;
/// A wake-up this close to the hour is the boundary that just fired, not the next one.
const MIN_ROTATION_DELAY: Duration = Duration::from_secs(1);

/// Source of the random part of output file names.
pub trait SuffixSource: Send {
    fn next_suffix(&mut self) -> String;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RandomSuffix;

impl SuffixSource for RandomSuffix {
    fn next_suffix(&mut self) -> String {
        Alphanumeric.sample_string(&mut rand::rng(), SUFFIX_LEN)
    }
}

/// `artifactory-traffic-<YYYY-MM-DD>-<suffix>.log`
pub fn output_file_name<Tz: TimeZone>(date: &DateTime<Tz>, suffix: &str) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!(
        "{FILE_PREFIX}-{}-{suffix}.{FILE_EXTENSION}",
        date.format("%Y-%m-%d")
    )
}

/// Time left until the next top of the hour.
pub fn until_next_hour<Tz: TimeZone>(now: &DateTime<Tz>) -> Duration {
    let into_hour = Duration::from_secs(u64::from(now.minute() * 60 + now.second()))
        + Duration::from_nanos(u64::from(now.nanosecond() % 1_000_000_000));
    Duration::from_secs(3600).saturating_sub(into_hour)
}

/// Delay before the next scheduled rotation. Never lands on the boundary that was just crossed
/// when the timer wakes slightly ahead of the wall clock.
pub fn next_rotation_delay<Tz: TimeZone>(now: &DateTime<Tz>) -> Duration {
    let delay = until_next_hour(now);
    if delay < MIN_ROTATION_DELAY {
        delay + Duration::from_secs(3600)
    } else {
        delay
    }
}

/// Sends a rotation event at the start of every local hour until cancelled.
pub async fn hourly_rotation(rotate_tx: mpsc::Sender<()>, cancel_token: CancellationToken) {
    loop {
        let delay = next_rotation_delay(&Local::now());
        debug!(delay_secs = delay.as_secs(), "next output rotation scheduled");

        tokio::select! {
            biased;
            _ = cancel_token.cancelled() => break,
            _ = sleep(delay) => {}
        }

        if rotate_tx.send(()).await.is_err() {
            break;
        }
    }
    debug!("rotation schedule stopped");
}

struct RotationState {
    path: PathBuf,
    file: File,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterStats {
    pub records_written: u64,
    pub files_opened: u64,
    pub write_errors: u64,
}

pub struct RotatingWriter {
    directory: PathBuf,
    suffixes: Box<dyn SuffixSource>,
    state: Option<RotationState>,
    stats: WriterStats,
}

impl RotatingWriter {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self::with_suffix_source(directory, Box::new(RandomSuffix))
    }

    pub fn with_suffix_source(directory: impl Into<PathBuf>, suffixes: Box<dyn SuffixSource>) -> Self {
        Self {
            directory: directory.into(),
            suffixes,
            state: None,
            stats: WriterStats::default(),
        }
    }

    pub fn current_path(&self) -> Option<&Path> {
        self.state.as_ref().map(|state| state.path.as_path())
    }

    pub fn stats(&self) -> WriterStats {
        self.stats
    }

    /// Opens the first output file and spawns the writer task.
    ///
    /// Failing to open the initial file is fatal; later open failures are retried on the next
    /// write. The task exits after `records_rx` closes, closing the file on the way out.
    pub async fn start(
        mut self,
        records_rx: mpsc::Receiver<String>,
        rotations_rx: mpsc::Receiver<()>,
    ) -> Result<WriterHandle> {
        self.open()
            .await
            .context("failed to open initial output file")?;

        let join = tokio::spawn(self.run(records_rx, rotations_rx));
        Ok(WriterHandle { join })
    }

    async fn run(
        mut self,
        mut records_rx: mpsc::Receiver<String>,
        mut rotations_rx: mpsc::Receiver<()>,
    ) -> WriterStats {
        loop {
            tokio::select! {
                biased;
                Some(()) = rotations_rx.recv() => {
                    if let Err(err) = self.rotate().await {
                        error!(error = %err, "failed to rotate output file; retrying on next write");
                    }
                }
                maybe_record = records_rx.recv() => match maybe_record {
                    Some(record) => {
                        if let Err(err) = self.write(&record).await {
                            error!(error = %err, "failed writing to output file");
                        }
                    }
                    None => break,
                },
            }
        }

        info!("output queue closed; stopping writer");
        if let Err(err) = self.close().await {
            error!(error = %err, "failed to close output file");
        }
        self.stats
    }

    /// Creates a new uniquely named file in the output directory and makes it current.
    pub async fn open(&mut self) -> Result<&Path> {
        let path = self.next_file_path().await;

        let mut options = OpenOptions::new();
        options.create(true).append(true);
        #[cfg(unix)]
        options.mode(FILE_MODE);

        let file = match options.open(&path).await {
            Ok(file) => file,
            Err(err) => {
                WRITER_ERRORS_TOTAL.with_label_values(&["open"]).inc();
                self.state = None;
                return Err(err)
                    .with_context(|| format!("failed to open output file {}", path.display()));
            }
        };

        info!(path = %path.display(), "opened output file");
        self.stats.files_opened += 1;
        let state = self.state.insert(RotationState { path, file });
        Ok(state.path.as_path())
    }

    async fn next_file_path(&mut self) -> PathBuf {
        let today = Local::now();
        let mut candidate = self
            .directory
            .join(output_file_name(&today, &self.suffixes.next_suffix()));

        for _ in 0..MAX_NAME_RETRIES {
            if !path_exists(&candidate).await {
                return candidate;
            }
            candidate = self
                .directory
                .join(output_file_name(&today, &self.suffixes.next_suffix()));
        }

        if path_exists(&candidate).await {
            warn!(
                path = %candidate.display(),
                attempts = MAX_NAME_RETRIES + 1,
                "could not find an unused output file name; appending to existing file"
            );
        }
        candidate
    }

    /// Appends `record` plus a newline, reopening first if the current file is gone.
    pub async fn write(&mut self, record: &str) -> Result<()> {
        let needs_open = match &self.state {
            Some(state) => !path_exists(&state.path).await,
            None => true,
        };

        if needs_open {
            if let Some(state) = &self.state {
                warn!(path = %state.path.display(), "output file disappeared; opening a replacement");
                FILE_ROTATIONS_TOTAL.with_label_values(&["recovery"]).inc();
            }
            let opened = self.open().await.map(|_| ());
            if let Err(err) = opened {
                self.stats.write_errors += 1;
                return Err(err);
            }
        }

        let Some(state) = self.state.as_mut() else {
            self.stats.write_errors += 1;
            anyhow::bail!("no output file open");
        };

        let mut line = String::with_capacity(record.len() + 1);
        line.push_str(record);
        line.push('\n');

        let result = async {
            state.file.write_all(line.as_bytes()).await?;
            state.file.flush().await
        }
        .await;

        if let Err(err) = result {
            WRITER_ERRORS_TOTAL.with_label_values(&["write"]).inc();
            self.stats.write_errors += 1;
            return Err(err)
                .with_context(|| format!("failed to append to {}", state.path.display()));
        }

        RECORDS_WRITTEN_TOTAL.inc();
        self.stats.records_written += 1;
        Ok(())
    }

    /// Closes the current file and opens a new one.
    pub async fn rotate(&mut self) -> Result<()> {
        if let Err(err) = self.close().await {
            warn!(error = %err, "failed to close output file during rotation");
        }
        FILE_ROTATIONS_TOTAL.with_label_values(&["schedule"]).inc();
        let path = self.open().await?;
        info!(path = %path.display(), "rotated output file");
        Ok(())
    }

    /// Flushes and releases the current file handle, leaving the writer closed.
    pub async fn close(&mut self) -> Result<()> {
        let Some(mut state) = self.state.take() else {
            return Ok(());
        };

        let result = async {
            state.file.flush().await?;
            state.file.sync_all().await
        }
        .await;

        if let Err(err) = result {
            // A file deleted behind our back still has a valid handle; only real I/O errors land here.
            WRITER_ERRORS_TOTAL.with_label_values(&["close"]).inc();
            return Err(err)
                .with_context(|| format!("failed to close output file {}", state.path.display()));
        }

        debug!(path = %state.path.display(), "closed output file");
        Ok(())
    }
}

/// Completion handle for the writer task.
pub struct WriterHandle {
    join: JoinHandle<WriterStats>,
}

impl WriterHandle {
    /// Resolves once the writer has closed its file after the record queue closed.
    pub async fn wait(self) -> Result<WriterStats> {
        self.join.await.context("writer task failed")
    }
}

async fn path_exists(path: &Path) -> bool {
    fs::metadata(path).await.is_ok()
}
