//! Logging setup on top of `tracing_subscriber`.

use std::io::IsTerminal;
use std::sync::Once;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

static FONCIER_LOG_ENV_VAR: &str = "FONCIER_LOG";

/// Initializes a stderr subscriber. Safe to call more than once.
///
/// `FONCIER_LOG` sets the level of this crate and wins over `default_level`;
/// `RUST_LOG` directives apply to everything else (sqlx, ...).
pub fn init(default_level: &str) {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let (env_filter, log_level) = env_filter_and_log_level(default_level);

        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .with_ansi(std::io::stderr().is_terminal())
            .init();

        tracing::debug!("log level: {}", log_level);
    });
}

/// Level matching the CLI's `-q` / `-v` flags.
pub fn level_for_verbosity(verbose: u8, quiet: bool) -> &'static str {
    match (quiet, verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        _ => "trace",
    }
}

fn env_filter_and_log_level(default_level: &str) -> (EnvFilter, String) {
    let directive_string = std::env::var(EnvFilter::DEFAULT_ENV).unwrap_or_default();
    let log_level =
        std::env::var(FONCIER_LOG_ENV_VAR).unwrap_or_else(|_| default_level.to_string());

    let mut env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::ERROR.into())
        .parse_lossy(&directive_string);

    if !directive_string.contains("foncier_extract=") {
        match format!("foncier_extract={}", log_level).parse() {
            Ok(directive) => env_filter = env_filter.add_directive(directive),
            Err(err) => eprintln!("ignoring invalid {}: {}", FONCIER_LOG_ENV_VAR, err),
        }
    }

    (env_filter, log_level)
}
