use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
    response::Html,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::custom_styles::CustomStyle;
use crate::error::ApiError;
use crate::markdown::extract_title;
use crate::state::AppState;
use crate::style::{Mode, Platform};
use crate::theme::{DEFAULT_THEME_ID, LIGHT_MODE_ID, StyleMap, Theme, ThemeMode};
use crate::{ai, wechat};

const PREVIEW_SAMPLE: &str = include_str!("preview_sample.md");
const RENDERED_MESSAGE: &str = "Rendered successfully";

fn default_theme() -> String {
    DEFAULT_THEME_ID.to_owned()
}

fn default_mode() -> String {
    LIGHT_MODE_ID.to_owned()
}

fn default_true() -> bool {
    true
}

fn default_one() -> i64 {
    1
}

fn require_non_blank<'a>(value: &'a str, field: &str) -> Result<&'a str, ApiError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ApiError::bad_request(format!("{field} is required")));
    }
    Ok(trimmed)
}

fn require_ai(state: &AppState) -> Result<(), ApiError> {
    if state.config.ai.is_none() {
        return Err(ApiError::service_unavailable(
            "ai_disabled",
            "AI is not configured: set the API key for AI_PROVIDER",
        ));
    }
    Ok(())
}

fn check_mode(theme_id: &str, theme: &Theme, mode: &str) -> Result<Mode, ApiError> {
    if !theme.supports_mode(mode) {
        return Err(ApiError::bad_request(format!(
            "Mode '{mode}' not available for theme '{theme_id}'. Available modes: {:?}",
            theme.mode_ids()
        )));
    }
    Ok(Mode::from_id(mode))
}

async fn render_blocking(
    state: &AppState,
    markdown: String,
    styles: StyleMap,
    mode: Mode,
    platform: Platform,
) -> Result<String, ApiError> {
    let renderer = state.renderer.clone();
    tokio::task::spawn_blocking(move || {
        renderer.render_with_styles(&markdown, &styles, mode, platform)
    })
    .await
    .map_err(ApiError::internal)?
    .map_err(ApiError::internal)
}

pub async fn root() -> Json<Value> {
    Json(json!({
        "name": "md2any API",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Markdown to HTML API with theme support",
        "endpoints": {
            "/render": "POST - Render markdown to HTML",
            "/render/custom": "POST - Render markdown with a custom style map",
            "/themes": "GET - List available themes",
            "/preview/{theme}": "GET - Preview a theme with sample markdown",
            "/custom-styles": "GET/POST - List or save custom styles",
            "/ai": "POST - Ask the AI assistant",
            "/wechat/send_draft": "POST - Render markdown and save it as a WeChat draft",
            "/health": "GET - Health check",
        }
    }))
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: &'static str,
    themes_loaded: usize,
    custom_styles: usize,
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        themes_loaded: state.themes.len(),
        custom_styles: state.custom_styles.len().await,
    })
}

#[derive(Debug, Serialize)]
pub struct ThemesResponse {
    themes: Vec<ThemeSummary>,
}

#[derive(Debug, Serialize)]
pub struct ThemeSummary {
    id: String,
    name: String,
    description: String,
    modes: Vec<ThemeMode>,
}

pub async fn list_themes(State(state): State<Arc<AppState>>) -> Json<ThemesResponse> {
    let themes = state
        .themes
        .iter()
        .map(|(id, theme)| ThemeSummary {
            id: id.to_owned(),
            name: theme.name.clone(),
            description: theme.description.clone(),
            modes: theme.served_modes(),
        })
        .collect();
    Json(ThemesResponse { themes })
}

#[derive(Debug, Deserialize)]
pub struct RenderRequest {
    markdown_text: String,
    #[serde(default = "default_theme")]
    theme: String,
    #[serde(default = "default_mode")]
    mode: String,
    #[serde(default)]
    platform: Platform,
}

#[derive(Debug, Serialize)]
pub struct RenderResponse {
    success: bool,
    html: String,
    theme: String,
    mode: String,
    platform: Platform,
    message: &'static str,
}

pub async fn render(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RenderRequest>,
) -> Result<Json<RenderResponse>, ApiError> {
    let Some(theme) = state.themes.get(&req.theme) else {
        return Err(ApiError::bad_request(format!(
            "Theme '{}' not found. Available themes: {:?}",
            req.theme,
            state.themes.ids()
        )));
    };
    let mode = check_mode(&req.theme, theme, &req.mode)?;

    let html = render_blocking(
        &state,
        req.markdown_text,
        theme.styles.clone(),
        mode,
        req.platform,
    )
    .await?;
    tracing::debug!(theme = %req.theme, mode = %req.mode, platform = req.platform.as_str(), "rendered");

    Ok(Json(RenderResponse {
        success: true,
        html,
        theme: req.theme,
        mode: req.mode,
        platform: req.platform,
        message: RENDERED_MESSAGE,
    }))
}

#[derive(Debug, Deserialize)]
pub struct RenderCustomRequest {
    markdown_text: String,
    #[serde(default)]
    style_name: Option<String>,
    #[serde(default)]
    styles: Option<StyleMap>,
    #[serde(default = "default_mode")]
    mode: String,
    #[serde(default)]
    platform: Platform,
}

pub async fn render_custom(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RenderCustomRequest>,
) -> Result<Json<RenderResponse>, ApiError> {
    let style_name = req
        .style_name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_owned);

    let (label, styles) = match (req.styles, style_name) {
        (Some(styles), name) => (name.unwrap_or_else(|| "custom".to_owned()), styles),
        (None, Some(name)) => {
            let Some(stored) = state.custom_styles.get(&name).await else {
                return Err(ApiError::not_found(format!("Custom style '{name}' not found")));
            };
            (name, stored.styles)
        }
        (None, None) => {
            return Err(ApiError::bad_request("either styles or style_name is required"));
        }
    };

    let mode = Mode::from_id(&req.mode);
    let html = render_blocking(&state, req.markdown_text, styles, mode, req.platform).await?;

    Ok(Json(RenderResponse {
        success: true,
        html,
        theme: label,
        mode: req.mode,
        platform: req.platform,
        message: RENDERED_MESSAGE,
    }))
}

#[derive(Debug, Deserialize)]
pub struct PreviewQuery {
    #[serde(default = "default_mode")]
    mode: String,
    #[serde(default)]
    platform: Platform,
}

pub async fn preview_theme(
    State(state): State<Arc<AppState>>,
    Path(theme_id): Path<String>,
    Query(query): Query<PreviewQuery>,
) -> Result<Html<String>, ApiError> {
    let Some(theme) = state.themes.get(&theme_id) else {
        return Err(ApiError::not_found(format!("Theme '{theme_id}' not found")));
    };
    let mode = check_mode(&theme_id, theme, &query.mode)?;

    let renderer = state.renderer.clone();
    let theme = theme.clone();
    let html = tokio::task::spawn_blocking(move || {
        renderer.render(PREVIEW_SAMPLE, &theme, mode, query.platform)
    })
    .await
    .map_err(ApiError::internal)?
    .map_err(ApiError::internal)?;
    Ok(Html(html))
}

#[derive(Debug, Serialize)]
pub struct CustomStylesResponse {
    styles: Vec<CustomStyle>,
}

pub async fn list_custom_styles(State(state): State<Arc<AppState>>) -> Json<CustomStylesResponse> {
    Json(CustomStylesResponse {
        styles: state.custom_styles.list().await,
    })
}

#[derive(Debug, Deserialize)]
pub struct SaveCustomStyleRequest {
    name: String,
    styles: StyleMap,
}

#[derive(Debug, Serialize)]
pub struct SaveCustomStyleResponse {
    success: bool,
    name: String,
    replaced: bool,
}

pub async fn save_custom_style(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SaveCustomStyleRequest>,
) -> Result<Json<SaveCustomStyleResponse>, ApiError> {
    let name = require_non_blank(&req.name, "name")?.to_owned();
    let replaced = state.custom_styles.save(&name, req.styles).await;
    tracing::info!(name = %name, replaced, "custom style saved");
    Ok(Json(SaveCustomStyleResponse {
        success: true,
        name,
        replaced,
    }))
}

pub async fn get_custom_style(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<CustomStyle>, ApiError> {
    state
        .custom_styles
        .get(name.trim())
        .await
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("Custom style '{name}' not found")))
}

#[derive(Debug, Serialize)]
pub struct DeleteCustomStyleResponse {
    success: bool,
    name: String,
}

pub async fn delete_custom_style(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<DeleteCustomStyleResponse>, ApiError> {
    let name = name.trim().to_owned();
    if !state.custom_styles.delete(&name).await {
        return Err(ApiError::not_found(format!("Custom style '{name}' not found")));
    }
    Ok(Json(DeleteCustomStyleResponse {
        success: true,
        name,
    }))
}

#[derive(Debug, Deserialize)]
pub struct AiRequest {
    prompt: String,
    #[serde(default)]
    context: String,
}

#[derive(Debug, Serialize)]
pub struct AiResponse {
    success: bool,
    response: String,
    message: &'static str,
}

pub async fn ai_chat(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AiRequest>,
) -> Result<Json<AiResponse>, ApiError> {
    require_ai(&state)?;
    let prompt = require_non_blank(&req.prompt, "prompt")?;
    let response = ai::ask(&state, prompt, &req.context)
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(AiResponse {
        success: true,
        response,
        message: "AI request processed successfully",
    }))
}

#[derive(Debug, Serialize)]
pub struct MarkdownResponse {
    success: bool,
    markdown: String,
    message: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct GenerateMarkdownRequest {
    prompt: String,
}

pub async fn ai_generate_markdown(
    State(state): State<Arc<AppState>>,
    Json(req): Json<GenerateMarkdownRequest>,
) -> Result<Json<MarkdownResponse>, ApiError> {
    require_ai(&state)?;
    let prompt = require_non_blank(&req.prompt, "prompt")?;
    let markdown = ai::generate_markdown(&state, prompt)
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(MarkdownResponse {
        success: true,
        markdown,
        message: "Markdown generated successfully",
    }))
}

#[derive(Debug, Deserialize)]
pub struct TextToMarkdownRequest {
    text: String,
    #[serde(default = "default_text_style")]
    style: String,
    #[serde(default = "default_true")]
    preserve_formatting: bool,
}

fn default_text_style() -> String {
    "standard".to_owned()
}

pub async fn text_to_markdown(
    State(state): State<Arc<AppState>>,
    Json(req): Json<TextToMarkdownRequest>,
) -> Result<Json<MarkdownResponse>, ApiError> {
    require_ai(&state)?;
    let text = require_non_blank(&req.text, "text")?;
    let markdown = ai::text_to_markdown(&state, text, &req.style, req.preserve_formatting)
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(MarkdownResponse {
        success: true,
        markdown,
        message: "Text converted to markdown successfully",
    }))
}

#[derive(Debug, Deserialize)]
pub struct FormatMarkdownRequest {
    markdown: String,
    #[serde(default)]
    theme: Option<String>,
    #[serde(default)]
    mode: Option<String>,
    #[serde(default)]
    platform: Option<Platform>,
}

#[derive(Debug, Serialize)]
pub struct FormatMarkdownResponse {
    success: bool,
    html: String,
    message: &'static str,
}

pub async fn ai_format_markdown(
    State(state): State<Arc<AppState>>,
    Json(req): Json<FormatMarkdownRequest>,
) -> Result<Json<FormatMarkdownResponse>, ApiError> {
    require_non_blank(&req.markdown, "markdown")?;
    let requested = req.theme.as_deref().unwrap_or(DEFAULT_THEME_ID);
    let (_, theme) = state.themes.resolve(requested);
    let mode = Mode::from_id(req.mode.as_deref().unwrap_or(LIGHT_MODE_ID));
    let html = render_blocking(
        &state,
        req.markdown,
        theme.styles.clone(),
        mode,
        req.platform.unwrap_or_default(),
    )
    .await?;
    Ok(Json(FormatMarkdownResponse {
        success: true,
        html,
        message: "Markdown formatted successfully",
    }))
}

#[derive(Debug, Deserialize)]
pub struct ExtractStyleRequest {
    html: String,
}

#[derive(Debug, Serialize)]
pub struct ExtractStyleResponse {
    success: bool,
    styles: StyleMap,
}

pub async fn extract_style(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ExtractStyleRequest>,
) -> Result<Json<ExtractStyleResponse>, ApiError> {
    require_ai(&state)?;
    let html = require_non_blank(&req.html, "html")?;
    let styles = ai::extract_styles(&state, html)
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(ExtractStyleResponse {
        success: true,
        styles,
    }))
}

#[derive(Debug, Deserialize)]
pub struct WeChatTokenRequest {
    appid: String,
    secret: String,
}

pub async fn wechat_access_token(
    State(state): State<Arc<AppState>>,
    Json(req): Json<WeChatTokenRequest>,
) -> Result<Json<wechat::AccessToken>, ApiError> {
    let appid = require_non_blank(&req.appid, "appid")?;
    let secret = require_non_blank(&req.secret, "secret")?;
    let token =
        wechat::fetch_access_token(&state.http, &state.config.wechat_api_base, appid, secret)
            .await?;
    Ok(Json(token))
}

#[derive(Debug, Deserialize)]
pub struct WeChatSendDraftRequest {
    appid: String,
    secret: String,
    markdown: String,
    #[serde(default = "default_theme")]
    style: String,
    #[serde(default)]
    thumb_media_id: String,
    #[serde(default)]
    author: String,
    #[serde(default)]
    digest: String,
    #[serde(default)]
    content_source_url: String,
    #[serde(default = "default_one")]
    need_open_comment: i64,
    #[serde(default = "default_one")]
    only_fans_can_comment: i64,
}

#[derive(Debug, Serialize)]
pub struct DraftResponse {
    success: bool,
    media_id: String,
    title: String,
}

pub async fn wechat_send_draft(
    State(state): State<Arc<AppState>>,
    Json(req): Json<WeChatSendDraftRequest>,
) -> Result<Json<DraftResponse>, ApiError> {
    let appid = require_non_blank(&req.appid, "appid")?;
    let secret = require_non_blank(&req.secret, "secret")?;
    require_non_blank(&req.markdown, "markdown")?;

    let token =
        wechat::fetch_access_token(&state.http, &state.config.wechat_api_base, appid, secret)
            .await?;

    let title = extract_title(&req.markdown);
    let requested = req.style.trim().trim_end_matches(".css");
    if !state.themes.contains(requested) {
        tracing::warn!(requested, "unknown draft style, using fallback theme");
    }
    let (_, theme) = state.themes.resolve(requested);
    let html = render_blocking(
        &state,
        req.markdown,
        theme.styles.clone(),
        Mode::Light,
        Platform::Wechat,
    )
    .await?;

    let article = wechat::DraftArticle {
        title: title.clone(),
        author: req.author,
        digest: req.digest,
        content: wechat::wrap_markdown_body(&html),
        content_source_url: req.content_source_url,
        thumb_media_id: wechat::thumb_media_id(&req.thumb_media_id),
        need_open_comment: req.need_open_comment,
        only_fans_can_comment: req.only_fans_can_comment,
    };
    let media_id = wechat::add_draft(
        &state.http,
        &state.config.wechat_api_base,
        &token.access_token,
        &article,
    )
    .await?;

    Ok(Json(DraftResponse {
        success: true,
        media_id,
        title,
    }))
}

#[derive(Debug, Deserialize)]
pub struct WeChatDirectDraftRequest {
    #[serde(default)]
    access_token: String,
    title: String,
    content: String,
    #[serde(default)]
    author: String,
    #[serde(default)]
    digest: String,
    #[serde(default)]
    content_source_url: String,
    #[serde(default)]
    thumb_media_id: String,
    #[serde(default = "default_one")]
    need_open_comment: i64,
    #[serde(default = "default_one")]
    only_fans_can_comment: i64,
}

pub async fn wechat_draft(
    State(state): State<Arc<AppState>>,
    Json(req): Json<WeChatDirectDraftRequest>,
) -> Result<Json<DraftResponse>, ApiError> {
    let access_token = req.access_token.trim();
    if access_token.is_empty() {
        return Err(ApiError::bad_request("缺少access_token"));
    }

    let article = wechat::DraftArticle {
        title: req.title.clone(),
        author: req.author,
        digest: req.digest,
        content: req.content,
        content_source_url: req.content_source_url,
        thumb_media_id: wechat::thumb_media_id(&req.thumb_media_id),
        need_open_comment: req.need_open_comment,
        only_fans_can_comment: req.only_fans_can_comment,
    };
    let media_id = wechat::add_draft(
        &state.http,
        &state.config.wechat_api_base,
        access_token,
        &article,
    )
    .await?;

    Ok(Json(DraftResponse {
        success: true,
        media_id,
        title: req.title,
    }))
}
