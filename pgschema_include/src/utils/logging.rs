//! # Logging Initialization
//!
//! One entry point, [`init_logging`], sets up a global `tracing` subscriber the
//! first time it is called; later calls are no-ops.
//!
//! - **Filter**: `RUST_LOG` wins when set. Otherwise the given level applies to
//!   the pgschema crates and everything else stays at `warn`.
//! - **Stderr (default)**: ANSI-coloured output on stderr. Stdout is left alone
//!   because it carries the resolved schema.
//! - **File (opt-in)**: a daily rolling file in the platform cache directory
//!   (via `directories`), without colours. If the directory cannot be
//!   determined or created, logging falls back to stderr.

use anyhow::Result;
use directories::ProjectDirs;
use std::{io::stderr, sync::Once};
use tracing_subscriber::{EnvFilter, fmt::layer, prelude::*};

static INIT: Once = Once::new();

pub fn init_test_logging() {
    init_logging("trace", false).expect("Failed to initialize test logging");
}

/// Initializes the logging system.
///
/// Logs to stderr with colours, or to a rolling file when `log_to_file` is set.
pub fn init_logging(log_level: &str, log_to_file: bool) -> Result<()> {
    INIT.call_once(|| {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(format!(
                "warn,pgschema_include={log_level},pgschema_resolve={log_level}"
            )));

        let log_dir = if log_to_file {
            ProjectDirs::from("io", "pgschema", "pgschema")
                .map(|dirs| dirs.cache_dir().to_path_buf())
                .filter(|dir| std::fs::create_dir_all(dir).is_ok())
        } else {
            None
        };

        match log_dir {
            Some(dir) => {
                let file_appender = tracing_appender::rolling::daily(dir, "pgschema_resolve.log");
                let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(layer().with_writer(non_blocking).with_ansi(false))
                    .init();
                // Leaked so buffered lines are flushed on exit.
                Box::leak(Box::new(guard));
            }
            None => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(layer().with_writer(stderr).with_ansi(true))
                    .init();
            }
        }
    });

    Ok(())
}
