mod dyn_err;
#[macro_use]
mod unwrap_or;
mod err_with_sources;

use anyhow::{Context, Result};
use tracing::subscriber::DefaultGuard;
use tracing_subscriber::{
    EnvFilter, Layer, Registry, filter::ParseError, fmt, layer::SubscriberExt as _,
    util::SubscriberInitExt as _,
};

pub use dyn_err::{anyhow_dyn_err, std_dyn_err};
pub use err_with_sources::{ErrorWithSources, err_with_src};

/// Registers a global subscriber with stdout logging and `additional_layer`.
pub fn setup_global_subscriber<L>(additional_layer: L) -> Result<()>
where
    L: Layer<Registry> + Send + Sync,
{
    let directives = std::env::var("RUST_LOG").unwrap_or_default();

    let subscriber = Registry::default()
        .with(
            additional_layer
                .with_filter(try_filter(&directives).context("Failed to parse directives")?),
        )
        .with(fmt::layer().with_filter(try_filter(&directives).context("Failed to parse directives")?));

    subscriber
        .try_init()
        .context("Could not set global default subscriber")?;

    Ok(())
}

/// Constructs an opinionated [`EnvFilter`] with some noisy crates already silenced.
pub fn try_filter(directives: &str) -> Result<EnvFilter, ParseError> {
    /// A filter directive that silences noisy crates.
    ///
    /// For debugging, it is useful to set a catch-all log like `debug`. This
    /// obviously creates a lot of logs from all kinds of crates. Prepending this
    /// directive to the active log filter keeps a simple directive like `debug`
    /// actually useful; restate the crate in your own directive to see it anyway.
    const IRRELEVANT_CRATES: &str = "hyper=warn,h2=warn,rustls=warn";

    if directives.is_empty() {
        return EnvFilter::try_new(IRRELEVANT_CRATES);
    }

    EnvFilter::try_new(format!("{IRRELEVANT_CRATES},{directives}"))
}

/// Initialises a logger to be used in tests.
pub fn test(directives: &str) -> DefaultGuard {
    tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(directives)
        .set_default()
}
