use clap::Parser;
use dotenvy::dotenv;
use tracing::error;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::LocalTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use vouncer::app::App;
use vouncer::bouncer::BouncerClient;
use vouncer::config::Config;

#[tokio::main]
async fn main() {
    std::process::exit(run().await);
}

async fn run() -> i32 {
    dotenv().ok();

    let config = match Config::try_parse() {
        Ok(config) => config,
        Err(e) => {
            let _ = e.print();
            return match e.kind() {
                clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion => 0,
                _ => 1,
            };
        }
    };

    let mut env_filter = EnvFilter::from_default_env();
    if let Some(Ok(level)) = config
        .log_level
        .as_ref()
        .map(|level| level.parse::<LevelFilter>())
    {
        env_filter = env_filter.add_directive(level.into());
    }
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_timer(LocalTime::rfc_3339()))
        .init();

    let screen = match BouncerClient::new(&config.service_host) {
        Ok(screen) => screen,
        Err(e) => {
            error!("failed to create service URL: {e:#}");
            return 2;
        }
    };

    let app = match App::connect(config, screen).await {
        Ok(app) => app,
        Err(e) => {
            error!("{e:#}");
            return 1;
        }
    };

    if let Err(e) = app.serve().await {
        error!("{e:#}");
        return 1;
    }
    0
}
