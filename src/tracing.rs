use tracing::subscriber::set_global_default;
use tracing_log::LogTracer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::EnvFilter;

/// JSON logs to stdout, filtered by `RUST_LOG` (default `info`).
pub fn init_tracing() {
    LogTracer::init().expect("failed to set logger");

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let json_layer = tracing_subscriber::fmt::layer()
        .with_level(true)
        .with_thread_names(true)
        .json();

    let subscriber = tracing_subscriber::registry::Registry::default()
        .with(filter)
        .with(json_layer);

    set_global_default(subscriber).expect("failed to set default subscriber");

    tracing::info!(
        task = "tracing_setup",
        result = "success",
        "tracing successfully setup"
    );
}
