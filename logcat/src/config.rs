use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub input: InputConfig,
    pub output: OutputConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct InputConfig {
    pub file: String,
    #[serde(default = "default_delimiter")]
    pub delimiter: String,
    #[serde(default = "default_num_fields")]
    pub num_fields: usize,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Only ingest lines appended after startup (DEFAULT: true)
    /// - true: seek to the end of the log before following it
    /// - false: replay the whole file first (use for backfilling)
    #[serde(default = "default_start_at_end")]
    pub start_at_end: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct OutputConfig {
    pub directory: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_queue_capacity")]
    pub work_queue_capacity: usize,
    #[serde(default = "default_queue_capacity")]
    pub output_queue_capacity: usize,
    /// Written as `server_name` in every record; the host name is used when unset.
    #[serde(default)]
    pub server_name: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct MetricsConfig {
    #[serde(default)]
    pub listen_addr: Option<SocketAddr>,
}

const DEFAULT_DELIMITER: &str = "|";
const DEFAULT_NUM_FIELDS: usize = 11;
const DEFAULT_POLL_INTERVAL_MS: u64 = 100;
const DEFAULT_START_AT_END: bool = true;
const DEFAULT_WORKERS: usize = 5;
const DEFAULT_QUEUE_CAPACITY: usize = 100;
/// The transform reads the size from field index 8.
const MIN_NUM_FIELDS: usize = 9;

fn default_delimiter() -> String {
    DEFAULT_DELIMITER.to_string()
}

fn default_num_fields() -> usize {
    DEFAULT_NUM_FIELDS
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

fn default_start_at_end() -> bool {
    DEFAULT_START_AT_END
}

fn default_workers() -> usize {
    DEFAULT_WORKERS
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            work_queue_capacity: DEFAULT_QUEUE_CAPACITY,
            output_queue_capacity: DEFAULT_QUEUE_CAPACITY,
            server_name: None,
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let config = Self::read(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a config file without validating it, so callers can apply overrides
    /// before calling [`Config::validate`].
    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        toml::from_str(&raw).context("failed to parse config")
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let config: Config = toml::from_str(raw).context("failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    /// Builds a config with every tunable at its default.
    pub fn from_paths(file: impl Into<String>, directory: impl Into<String>) -> Self {
        Self {
            input: InputConfig {
                file: file.into(),
                delimiter: default_delimiter(),
                num_fields: DEFAULT_NUM_FIELDS,
                poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
                start_at_end: DEFAULT_START_AT_END,
            },
            output: OutputConfig {
                directory: directory.into(),
            },
            pipeline: PipelineConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !self.input_path().is_absolute() {
            bail!("input file {} must be an absolute path", self.input.file);
        }
        if !self.output_dir().is_absolute() {
            bail!(
                "output directory {} must be an absolute path",
                self.output.directory
            );
        }
        if self.input.delimiter.is_empty() {
            bail!("input delimiter cannot be empty");
        }
        if self.input.num_fields < MIN_NUM_FIELDS {
            bail!(
                "num_fields must be at least {MIN_NUM_FIELDS}, got {}",
                self.input.num_fields
            );
        }
        if self.input.poll_interval_ms == 0 {
            bail!("poll_interval_ms must be greater than zero");
        }
        if self.pipeline.workers == 0 {
            bail!("pipeline requires at least one worker");
        }
        if self.pipeline.work_queue_capacity == 0 || self.pipeline.output_queue_capacity == 0 {
            bail!("queue capacities must be greater than zero");
        }
        Ok(())
    }

    pub fn input_path(&self) -> PathBuf {
        expand_path(&self.input.file)
    }

    pub fn output_dir(&self) -> PathBuf {
        expand_path(&self.output.directory)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.input.poll_interval_ms)
    }

    pub fn server_name(&self) -> Option<&str> {
        self.pipeline
            .server_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
    }
}

fn expand_path(raw: &str) -> PathBuf {
    let expanded = shellexpand::tilde(raw);
    PathBuf::from(expanded.as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [input]
        file = "/var/log/artifactory-request.log"

        [output]
        directory = "/var/lib/logcat"
    "#;

    #[test]
    fn minimal_config_uses_defaults() {
        let config = Config::parse(MINIMAL).expect("minimal config is valid");

        assert_eq!(config.input.delimiter, "|");
        assert_eq!(config.input.num_fields, 11);
        assert!(config.input.start_at_end);
        assert_eq!(config.poll_interval(), Duration::from_millis(100));
        assert_eq!(config.pipeline.workers, 5);
        assert_eq!(config.pipeline.work_queue_capacity, 100);
        assert_eq!(config.pipeline.output_queue_capacity, 100);
        assert_eq!(config.server_name(), None);
        assert!(config.metrics.listen_addr.is_none());
    }

    #[test]
    fn full_config_overrides_defaults() {
        let config = Config::parse(
            r#"
            [input]
            file = "/logs/requests.log"
            delimiter = ";"
            num_fields = 12
            poll_interval_ms = 250
            start_at_end = false

            [output]
            directory = "/out"

            [pipeline]
            workers = 8
            work_queue_capacity = 1000
            output_queue_capacity = 500
            server_name = " artifactory-01 "

            [metrics]
            listen_addr = "127.0.0.1:9090"
            "#,
        )
        .expect("config is valid");

        assert_eq!(config.input.delimiter, ";");
        assert_eq!(config.input.num_fields, 12);
        assert!(!config.input.start_at_end);
        assert_eq!(config.pipeline.workers, 8);
        assert_eq!(config.server_name(), Some("artifactory-01"));
        assert_eq!(
            config.metrics.listen_addr,
            Some("127.0.0.1:9090".parse().unwrap())
        );
    }

    #[test]
    fn load_validates_but_read_does_not() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("logcat.toml");
        std::fs::write(&path, "[input]\nfile = \"requests.log\"\n\n[output]\ndirectory = \"/out\"\n")
            .unwrap();

        assert!(Config::load(&path).is_err());
        let config = Config::read(&path).unwrap();
        assert_eq!(config.input.file, "requests.log");

        std::fs::write(&path, MINIMAL).unwrap();
        assert!(Config::load(&path).is_ok());
    }

    #[test]
    fn relative_paths_are_rejected() {
        let config = Config::from_paths("requests.log", "/out");
        assert!(config.validate().is_err());

        let config = Config::from_paths("/requests.log", "out");
        assert!(config.validate().is_err());
    }

    #[test]
    fn tilde_paths_expand_to_absolute() {
        let config = Config::from_paths("~/requests.log", "~/out");
        if std::env::var_os("HOME").is_some() {
            assert!(config.input_path().is_absolute());
            assert!(config.output_dir().is_absolute());
        }
    }

    #[test]
    fn rejects_unusable_tunables() {
        let mut config = Config::from_paths("/in.log", "/out");
        config.pipeline.workers = 0;
        assert!(config.validate().is_err());

        let mut config = Config::from_paths("/in.log", "/out");
        config.input.num_fields = 8;
        assert!(config.validate().is_err());

        let mut config = Config::from_paths("/in.log", "/out");
        config.input.delimiter.clear();
        assert!(config.validate().is_err());

        let mut config = Config::from_paths("/in.log", "/out");
        config.pipeline.output_queue_capacity = 0;
        assert!(config.validate().is_err());
    }
}
