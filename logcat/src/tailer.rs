use crate::parsers::{drain_complete_lines, trim_line_bytes};
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const DEFAULT_POLL_INTERVAL_MS: u64 = 100;
const MAX_READ_CHUNK_BYTES: usize = 8 * 1024 * 1024; // 8 MiB per iteration
pub const LINE_CHANNEL_CAPACITY: usize = 1000;

/// Ordered stream of lines from an ingestion source.
#[async_trait]
pub trait LineSource: Send {
    /// Next complete line, or `None` once the source has ended.
    async fn next_line(&mut self) -> Option<String>;

    /// Stops producing lines. Lines not yet returned by `next_line` are discarded.
    async fn stop(&mut self) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct TailerConfig {
    pub poll_interval: Duration,
    /// Skip whatever the file already holds when the tailer starts.
    pub start_at_end: bool,
}

impl Default for TailerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            start_at_end: true,
        }
    }
}

/// Follows a growing file and yields each appended line.
///
/// Truncation and replacement of the file (log rotation) restart reading from the top of the new
/// content. A file that does not exist yet is waited for.
pub struct FileTailer {
    path: PathBuf,
    lines_rx: mpsc::Receiver<String>,
    cancel_token: CancellationToken,
    handle: Option<JoinHandle<Result<()>>>,
}

impl FileTailer {
    pub async fn start(path: impl Into<PathBuf>, config: TailerConfig) -> Result<Self> {
        let path = path.into();
        check_tailable(&path).await?;
        let position = initial_position(&path, config.start_at_end).await;

        let cancel_token = CancellationToken::new();
        let (lines_tx, lines_rx) = mpsc::channel(LINE_CHANNEL_CAPACITY);
        let handle = tokio::spawn(tail_file(
            path.clone(),
            config,
            position,
            lines_tx,
            cancel_token.clone(),
        ));

        Ok(Self {
            path,
            lines_rx,
            cancel_token,
            handle: Some(handle),
        })
    }
}

#[async_trait]
impl LineSource for FileTailer {
    async fn next_line(&mut self) -> Option<String> {
        self.lines_rx.recv().await
    }

    async fn stop(&mut self) -> Result<()> {
        self.cancel_token.cancel();
        self.lines_rx.close();

        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        handle
            .await
            .map_err(|err| anyhow!("tailer task for {} failed: {err}", self.path.display()))?
    }
}

async fn check_tailable(path: &Path) -> Result<()> {
    match fs::metadata(path).await {
        Ok(meta) if meta.is_dir() => bail!("{} is a directory, not a log file", path.display()),
        Ok(_) => Ok(()),
        Err(_) => {
            let parent = path
                .parent()
                .filter(|parent| !parent.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let parent_meta = fs::metadata(parent)
                .await
                .with_context(|| format!("input directory {} is not accessible", parent.display()))?;
            if !parent_meta.is_dir() {
                bail!("{} is not a directory", parent.display());
            }
            info!(path = %path.display(), "input file does not exist yet; waiting for it");
            Ok(())
        }
    }
}

/// Where reading begins, captured before the tailer task runs so nothing appended after
/// `start` returns is skipped.
#[derive(Debug, Clone, Copy, Default)]
struct StartPosition {
    identity: Option<(u64, u64)>,
    offset: u64,
}

/// A file that does not exist yet starts at byte 0 with no identity.
async fn initial_position(path: &Path, start_at_end: bool) -> StartPosition {
    match fs::metadata(path).await {
        Ok(meta) => StartPosition {
            identity: file_identity(&meta),
            offset: if start_at_end { meta.len() } else { 0 },
        },
        Err(_) => StartPosition::default(),
    }
}

async fn sleep_or_cancel(duration: Duration, cancel_token: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        _ = cancel_token.cancelled() => true,
        _ = sleep(duration) => false,
    }
}

/// Identity of the file behind a path, so a replaced file is noticed even when it is larger.
#[cfg(unix)]
fn file_identity(meta: &std::fs::Metadata) -> Option<(u64, u64)> {
    use std::os::unix::fs::MetadataExt;
    Some((meta.dev(), meta.ino()))
}

#[cfg(not(unix))]
fn file_identity(_meta: &std::fs::Metadata) -> Option<(u64, u64)> {
    None
}

async fn tail_file(
    file_path: PathBuf,
    config: TailerConfig,
    position: StartPosition,
    lines_tx: mpsc::Sender<String>,
    cancel_token: CancellationToken,
) -> Result<()> {
    let sleep_interval = if config.poll_interval.is_zero() {
        Duration::from_millis(DEFAULT_POLL_INTERVAL_MS)
    } else {
        config.poll_interval
    };

    let mut identity = position.identity;
    let mut read_offset = position.offset;
    let mut pending: Vec<u8> = Vec::new();

    info!(path = %file_path.display(), offset = read_offset, "starting tailer");

    loop {
        let metadata = match fs::metadata(&file_path).await {
            Ok(meta) => meta,
            Err(err) => {
                debug!(
                    error = %err,
                    path = %file_path.display(),
                    "metadata unavailable; retrying"
                );
                if sleep_or_cancel(sleep_interval, &cancel_token).await {
                    return Ok(());
                }
                continue;
            }
        };

        let file_size = metadata.len();
        let current_identity = file_identity(&metadata);
        let replaced = identity.is_some() && current_identity != identity;
        identity = current_identity;

        if replaced || file_size < read_offset {
            warn!(
                path = %file_path.display(),
                previous_offset = read_offset,
                current_size = file_size,
                replaced,
                "file truncated or rotated; reading from the start"
            );
            read_offset = 0;
            pending.clear();
        }

        if file_size > read_offset {
            let bytes_to_read =
                (file_size - read_offset).min(MAX_READ_CHUNK_BYTES as u64) as usize;

            match read_new_bytes(&file_path, read_offset, bytes_to_read).await {
                Ok(buffer) if !buffer.is_empty() => {
                    read_offset += buffer.len() as u64;
                    pending.extend_from_slice(&buffer);

                    for raw_line in drain_complete_lines(&mut pending) {
                        let line = trim_line_bytes(raw_line);
                        if line.is_empty() {
                            continue;
                        }
                        let line = String::from_utf8_lossy(&line).into_owned();

                        tokio::select! {
                            biased;
                            _ = cancel_token.cancelled() => return Ok(()),
                            sent = lines_tx.send(line) => {
                                if sent.is_err() {
                                    debug!(path = %file_path.display(), "line consumer gone; stopping tailer");
                                    return Ok(());
                                }
                            }
                        }
                    }

                    // More data may already be waiting; skip the sleep.
                    if read_offset < file_size {
                        continue;
                    }
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(
                        error = %err,
                        path = %file_path.display(),
                        "failed to read newly appended bytes"
                    );
                }
            }
        }

        if sleep_or_cancel(sleep_interval, &cancel_token).await {
            return Ok(());
        }
    }
}

async fn read_new_bytes(path: &Path, offset: u64, max_bytes: usize) -> Result<Vec<u8>> {
    let mut file = fs::File::open(path)
        .await
        .with_context(|| format!("failed to open {}", path.display()))?;
    file.seek(std::io::SeekFrom::Start(offset))
        .await
        .with_context(|| format!("failed to seek {} to offset {}", path.display(), offset))?;
    if max_bytes == 0 {
        return Ok(Vec::new());
    }

    let mut buffer = vec![0u8; max_bytes];
    let mut total_read = 0usize;
    while total_read < max_bytes {
        let bytes_read = file
            .read(&mut buffer[total_read..])
            .await
            .with_context(|| format!("failed to read from {}", path.display()))?;
        if bytes_read == 0 {
            break;
        }
        total_read += bytes_read;
    }
    buffer.truncate(total_read);
    Ok(buffer)
}
