use tracing_subscriber::EnvFilter;

/// Install the process-wide subscriber. Honors `RUST_LOG`, defaults to `rehearse=info`.
///
/// Logs go to stderr so they never interleave with the chat transcript on stdout.
pub fn init(verbose: bool) {
    let default = if verbose { "rehearse=debug" } else { "rehearse=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
