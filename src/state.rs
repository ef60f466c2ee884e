use std::sync::Arc;

use anyhow::{Context, Result};
use url::Url;

use crate::config::AppConfig;
use crate::custom_styles::CustomStyleStore;
use crate::render::MarkdownRenderer;
use crate::theme::ThemeRegistry;

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub http: reqwest::Client,
    pub themes: Arc<ThemeRegistry>,
    pub custom_styles: CustomStyleStore,
    pub renderer: MarkdownRenderer,
}

impl AppState {
    pub fn new(config: AppConfig, themes: ThemeRegistry) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("md2any/", env!("CARGO_PKG_VERSION")))
            .timeout(config.http_timeout)
            .build()
            .context("failed to build http client")?;

        Ok(Self {
            config,
            http,
            themes: Arc::new(themes),
            custom_styles: CustomStyleStore::new(),
            renderer: MarkdownRenderer::new(),
        })
    }
}

pub fn normalize_origin(url: &Url) -> Result<Url> {
    let origin = url.origin().ascii_serialization();
    Url::parse(&origin).context("failed to normalize origin url")
}
