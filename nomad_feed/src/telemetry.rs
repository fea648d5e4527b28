use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "nomad_feed=info,nomad_cli=info";

/// Logs to stderr so feed output on stdout stays clean. `RUST_LOG` replaces
/// the default filter. When a subscriber is already installed it stays in
/// place.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let installed = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .try_init();
    if installed.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_keeps_the_first_subscriber() {
        init_tracing();
        init_tracing();
        tracing::info!("still logging");
    }
}
