use anyhow::{Context, Result};
use clap::Parser;
use pgschema_include::utils::logging::init_logging;
use pgschema_include::{Resolver, ResolverConfig, default_sandbox_root};
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// pgschema include resolver
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about,
    long_about = "Expands \\i <path> directives in a schema file into a single SQL document on stdout.

Include targets are read relative to the sandbox root, which defaults to the
directory holding --file. Targets with '..' segments, absolute targets and
anything resolving outside the root are refused.

Example: pgschema_resolve --file schema/main.sql > schema.sql"
)]
struct Cli {
    /// Root schema file to resolve.
    #[arg(long, short = 'f')]
    file: PathBuf,

    /// Sandbox root directory. Defaults to the directory containing --file.
    #[arg(long)]
    root: Option<PathBuf>,

    /// TOML file with resolver settings (max_depth, memoize).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Maximum include depth, counting the root file.
    #[arg(long)]
    max_depth: Option<usize>,

    /// Read each file at most once per run.
    #[arg(long)]
    memoize: bool,

    /// Print the files that make up the document instead of the SQL.
    #[arg(long)]
    list_files: bool,

    /// Enable debug logging.
    #[arg(short, long)]
    debug: bool,

    /// Log to a rolling file in the cache directory instead of stderr.
    #[arg(long)]
    log_to_file: bool,
}

impl Cli {
    fn resolver_config(&self) -> Result<ResolverConfig> {
        let mut config = match &self.config {
            Some(path) => ResolverConfig::load_from_file(path)?,
            None => ResolverConfig::default(),
        };
        if let Some(max_depth) = self.max_depth {
            config.max_depth = max_depth;
        }
        if self.memoize {
            config.memoize = true;
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("pgschema_resolve: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let log_level = if cli.debug { "debug" } else { "warn" };
    init_logging(log_level, cli.log_to_file)?;

    let config = cli.resolver_config()?;
    let sandbox_root = cli
        .root
        .clone()
        .unwrap_or_else(|| default_sandbox_root(&cli.file));
    debug!(
        "Resolving {} in sandbox {} ({:?})",
        cli.file.display(),
        sandbox_root.display(),
        config
    );

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, cancelling resolution");
            on_interrupt.cancel();
        }
    });

    let document = Resolver::new(config)
        .resolve_with_cancel(&cli.file, &sandbox_root, &cancel)
        .await
        .with_context(|| format!("Failed to resolve {}", cli.file.display()))?;

    let output = if cli.list_files {
        document
            .files()
            .iter()
            .map(|path| format!("{}\n", path.display()))
            .collect::<String>()
    } else {
        document.to_sql()
    };

    let mut stdout = std::io::stdout().lock();
    stdout
        .write_all(output.as_bytes())
        .and_then(|()| stdout.flush())
        .context("Failed to write resolved schema to stdout")?;
    Ok(())
}
