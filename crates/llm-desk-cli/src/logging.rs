//! Subscriber setup from the `logging` config section.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

use llm_desk_core::config::LoggingConfig;

/// Install the global subscriber.
///
/// `RUST_LOG` wins over the configured level; `--verbose` raises the
/// fallback level to `debug`.
pub fn init(config: Option<&LoggingConfig>, verbose: bool) {
    let config = config.cloned().unwrap_or_default();

    let fallback = config
        .level
        .clone()
        .unwrap_or_else(|| if verbose { "debug" } else { "info" }.to_string());
    let mut filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&fallback));

    let mut rejected = Vec::new();
    for directive in &config.filters {
        match directive.parse::<Directive>() {
            Ok(d) => filter = filter.add_directive(d),
            Err(_) => rejected.push(directive.clone()),
        }
    }

    let writer = if config.output == "stdout" {
        BoxMakeWriter::new(std::io::stdout)
    } else {
        BoxMakeWriter::new(std::io::stderr)
    };

    let registry = tracing_subscriber::registry().with(filter);
    let _ = if config.format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(writer))
            .try_init()
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .compact()
                    .with_target(false)
                    .with_writer(writer),
            )
            .try_init()
    };

    for directive in rejected {
        tracing::warn!(%directive, "Ignoring invalid log filter");
    }
}
