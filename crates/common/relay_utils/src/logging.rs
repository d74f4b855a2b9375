//! Tracing subscriber initialisation shared by the `relay` and `bridge`
//! binaries. Library crates only ever call `tracing::{debug,info,warn,error}`;
//! the subscriber is installed exactly once, in `main()`.

use std::io::IsTerminal;

use tracing_subscriber::EnvFilter;

/// Installs a stderr-only subscriber. `RUST_LOG` overrides `log_level` when
/// set; ANSI colour is suppressed when stderr isn't a terminal, or when
/// `NO_COLOR` is set, or when `TERM=dumb` (logs always go to stderr).
pub fn init_tracing(log_level: &str) {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::new(log_level.to_string())
    };

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_ansi(ansi_enabled())
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .with_env_filter(filter)
        .init();
}

fn ansi_enabled() -> bool {
    if std::env::var_os("NO_COLOR").is_some() {
        return false;
    }
    if std::env::var("TERM").map(|term| term == "dumb").unwrap_or(false) {
        return false;
    }
    std::io::stderr().is_terminal()
}
