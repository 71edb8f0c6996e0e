use anyhow::{Context, Result};
use clap::error::ErrorKind;
use clap::{CommandFactory, Parser};
use logcat::config::Config;
use logcat::runner;

/// Ships billable Artifactory remote downloads as JSON lines.
#[derive(Parser, Debug)]
#[command(name = "logcat", version, about)]
struct Args {
    /// Absolute path of the request log to follow
    #[arg(long)]
    file: Option<String>,

    /// Absolute directory that receives the output files
    #[arg(long)]
    outdir: Option<String>,

    /// TOML configuration file; --file and --outdir override its paths
    #[arg(short, long, env = "LOGCAT_CONFIG")]
    config: Option<String>,

    /// Number of transform workers
    #[arg(long)]
    workers: Option<usize>,

    /// Value written as server_name in every record (defaults to the host name)
    #[arg(long)]
    server_name: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let args = Args::parse();
    let config = build_config(args)?;

    runner::run(&config).await?;
    Ok(())
}

fn build_config(args: Args) -> Result<Config> {
    let mut config = match (&args.config, &args.file, &args.outdir) {
        (Some(path), _, _) => Config::read(path)
            .with_context(|| format!("failed to load config from {path}"))?,
        (None, Some(file), Some(outdir)) => Config::from_paths(file.as_str(), outdir.as_str()),
        (None, _, _) => Args::command()
            .error(
                ErrorKind::MissingRequiredArgument,
                "either --config or both --file and --outdir are required",
            )
            .exit(),
    };

    if let Some(file) = args.file {
        config.input.file = file;
    }
    if let Some(outdir) = args.outdir {
        config.output.directory = outdir;
    }
    if let Some(workers) = args.workers {
        config.pipeline.workers = workers;
    }
    if let Some(server_name) = args.server_name {
        config.pipeline.server_name = Some(server_name);
    }

    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn init_tracing() {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with_target(false)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}
