//! Tracing/logging initialization.

use tracing_subscriber::EnvFilter;

/// Directive used when `RUST_LOG` is not set.
pub fn default_directive(verbose: bool) -> &'static str {
    if verbose { "jobline=debug,info" } else { "info" }
}

/// Initialize logging to stderr. `RUST_LOG` wins over `verbose`.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbose_enables_debug_for_the_crate() {
        assert_eq!(default_directive(false), "info");
        assert_eq!(default_directive(true), "jobline=debug,info");
    }

    #[test]
    fn default_directives_are_valid_filters() {
        assert!(EnvFilter::try_new(default_directive(false)).is_ok());
        assert!(EnvFilter::try_new(default_directive(true)).is_ok());
    }
}
