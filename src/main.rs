use std::io;

use contract_mirror::{JsonLinesSource, Mirror, MirrorConfig, MirrorError, RedisStore};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn main() -> Result<(), MirrorError> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "contract_mirror=info".into()))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_thread_names(true),
        )
        .init();

    let config = MirrorConfig::from_env()?;
    let store = RedisStore::connect(&config)?;
    let sink = RedisStore::connect(&config)?;

    let mut mirror = Mirror::initialize(&config, store, sink)?;
    mirror.start()?;

    let mut source = JsonLinesSource::new(io::stdin().lock());
    let count = mirror.pump(&mut source);
    info!(count, skipped = source.skipped(), "Event stream ended");

    match mirror.shutdown() {
        Some(stats) => info!(?stats, "Mirror stopped"),
        None => error!("Mirror did not shut down cleanly"),
    }
    Ok(())
}
