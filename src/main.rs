mod ai;
mod api;
mod config;
mod custom_styles;
mod error;
mod markdown;
mod render;
mod server;
mod state;
mod style;
mod theme;
mod wechat;

#[cfg(test)]
mod test_support;

use anyhow::Result;
use dotenvy::{dotenv, from_filename};

#[tokio::main]
async fn main() -> Result<()> {
    from_filename(".env.local").ok();
    dotenv().ok();
    init_tracing();

    let config = config::AppConfig::from_env()?;
    tracing::debug!(?config, "configuration loaded");
    server::serve(config).await
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .with_target(false)
        .init();
}
