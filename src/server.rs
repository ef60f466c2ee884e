use std::{net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};
use axum::{
    Router,
    http::{HeaderValue, Method},
    routing::{get, post},
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;

use crate::config::AppConfig;
use crate::state::{self, AppState};
use crate::theme::ThemeRegistry;
use crate::api;

pub async fn serve(config: AppConfig) -> Result<()> {
    let themes = ThemeRegistry::load(&config.themes_path);
    if let Some(ai) = config.ai.as_ref() {
        info!(provider = ai.provider.as_str(), model = %ai.model, "AI enabled");
    } else {
        info!("AI disabled (no provider API key)");
    }

    let app_state = Arc::new(AppState::new(config.clone(), themes)?);
    let app = build_router(app_state).layer(cors_layer(&config)?);

    let addr: SocketAddr = config.bind_addr;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("failed to bind TCP listener")?;

    info!(%addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server exited")?;

    Ok(())
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(api::root))
        .route("/health", get(api::health))
        .route("/themes", get(api::list_themes))
        .route("/render", post(api::render))
        .route("/render/custom", post(api::render_custom))
        .route("/preview/{theme}", get(api::preview_theme))
        .route(
            "/custom-styles",
            get(api::list_custom_styles).post(api::save_custom_style),
        )
        .route(
            "/custom-styles/{name}",
            get(api::get_custom_style).delete(api::delete_custom_style),
        )
        .route("/ai", post(api::ai_chat))
        .route("/ai/generate-markdown", post(api::ai_generate_markdown))
        .route("/ai/format-markdown", post(api::ai_format_markdown))
        .route("/text-to-markdown", post(api::text_to_markdown))
        .route("/api/extract-style", post(api::extract_style))
        .route("/wechat/access_token", post(api::wechat_access_token))
        .route("/wechat/send_draft", post(api::wechat_send_draft))
        .route("/wechat/draft", post(api::wechat_draft))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

fn cors_layer(config: &AppConfig) -> Result<CorsLayer> {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([axum::http::header::CONTENT_TYPE]);

    let Some(origin) = config.cors_origin.as_ref() else {
        return Ok(cors.allow_origin(Any));
    };
    let origin = state::normalize_origin(origin)?;
    // Origin headers carry no trailing slash.
    let origin: HeaderValue = origin
        .as_str()
        .trim_end_matches('/')
        .parse()
        .context("invalid cors origin")?;
    Ok(cors.allow_origin(origin))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutting down");
}
