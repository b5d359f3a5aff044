//! Scriba server: the consumer runtime plus the read-only query API.

mod api;
mod startup;
mod state;

use scriba_shared::config::ConfigLoader;
use std::path::PathBuf;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env_file = std::env::var("SCRIBA_ENV_FILE").ok().map(PathBuf::from);
    let config = ConfigLoader::new(env_file).load()?;

    scriba_shared::logging::init(&config.logging);

    startup::run(config).await
}
