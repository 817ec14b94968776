use color_eyre::eyre::{
    Result,
    eyre,
};
use dsic_client::config;
use std::sync::OnceLock;
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling,
};
use tracing_subscriber::{
    EnvFilter,
    fmt,
};

mod client;
mod ui;

const LOG_DIR: &str = ".logs";

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// The terminal belongs to the dashboard, so logs go to a daily file instead.
fn init_tracing() {
    let appender = rolling::daily(LOG_DIR, "dsic-client.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let _ = LOG_GUARD.set(guard);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    init_tracing();
    deployments::ensure_structure().map_err(|e| eyre!(e))?;

    let Some(config) = config::parse_args(std::env::args().skip(1))? else {
        println!("{}", config::USAGE);
        return Ok(());
    };
    client::run_app(config).await
}
