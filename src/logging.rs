use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,legal_events_lib=debug";

/// Installs the global subscriber. `RUST_LOG` wins over the built-in filter;
/// `quiet` drops the default to warnings so JSON on stdout stays readable.
pub fn init_logging(quiet: bool) {
    let default = if quiet { "warn" } else { DEFAULT_FILTER };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init();
}
