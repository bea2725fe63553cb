//! Logging initialization.
//!
//! Logs go to stderr so that stdout only carries readings. `RUST_LOG` takes
//! precedence over the defaults chosen here.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

/// Default filter when `RUST_LOG` is unset.
///
/// Verbose mode also shows why advertisements were not handled, which the
/// router logs at `trace`.
pub fn default_directives(verbose: bool) -> &'static str {
    if verbose {
        "info,wxbeacon2_listener=debug,wxbeacon2_listener::gate=trace"
    } else {
        "info"
    }
}

/// Install the global `tracing` subscriber.
///
/// # Errors
/// Returns an error if a subscriber is already installed.
pub fn init(verbose: bool) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(verbose)));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(verbose)
        .with_span_events(FmtSpan::NONE)
        .compact()
        .try_init()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directives_parse() {
        for verbose in [false, true] {
            assert!(EnvFilter::try_new(default_directives(verbose)).is_ok());
        }
    }

    #[test]
    fn test_verbose_enables_router_trace() {
        assert!(default_directives(true).contains("gate=trace"));
        assert!(!default_directives(false).contains("trace"));
    }
}
