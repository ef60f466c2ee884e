
use serde::{Deserialize, Serialize};
use url::Url;

#[derive(Debug, thiserror::Error)]
pub enum WeChatError {
    #[error("wechat errcode {errcode}: {errmsg}")]
    Api { errcode: i64, errmsg: String },
    #[error("wechat request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected wechat response: {0}")]
    Decode(String),
}

pub fn describe_errcode(errcode: i64, errmsg: &str) -> String {
    match errcode {
        40013 => "无效的AppID，请检查微信公众号AppID是否正确".to_owned(),
        40001 => "AppSecret错误，请检查微信公众号AppSecret是否正确".to_owned(),
        40002 => "请检查公众号权限，确保已开通草稿箱功能".to_owned(),
        40164 => "IP地址未在白名单中，请在微信公众号后台添加服务器IP".to_owned(),
        _ => errmsg.to_owned(),
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AccessToken {
    pub access_token: String,
    pub expires_in: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DraftArticle {
    pub title: String,
    pub author: String,
    pub digest: String,
    pub content: String,
    pub content_source_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumb_media_id: Option<String>,
    pub need_open_comment: i64,
    pub only_fans_can_comment: i64,
}

pub fn thumb_media_id(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_owned())
}

pub fn wrap_markdown_body(html: &str) -> String {
    format!("<div class=\"markdown-body\">{html}</div>")
}

#[derive(Debug, Deserialize)]
struct Envelope {
    errcode: Option<i64>,
    errmsg: Option<String>,
    access_token: Option<String>,
    expires_in: Option<i64>,
    media_id: Option<String>,
}

#[derive(Serialize)]
struct DraftRequest<'a> {
    articles: [&'a DraftArticle; 1],
}

fn endpoint(base: &Url, path: &str) -> Result<Url, WeChatError> {
    base.join(path)
        .map_err(|err| WeChatError::Decode(format!("invalid wechat endpoint {path}: {err}")))
}

async fn read_envelope(resp: reqwest::Response) -> Result<Envelope, WeChatError> {
    let body = resp.bytes().await?;
    let envelope: Envelope = serde_json::from_slice(&body)
        .map_err(|err| WeChatError::Decode(err.to_string()))?;
    match envelope.errcode {
        Some(errcode) if errcode != 0 => {
            let errmsg = envelope.errmsg.as_deref().unwrap_or("Unknown error");
            tracing::warn!(errcode, errmsg, "wechat api error");
            Err(WeChatError::Api {
                errcode,
                errmsg: describe_errcode(errcode, errmsg),
            })
        }
        _ => Ok(envelope),
    }
}

pub async fn fetch_access_token(
    http: &reqwest::Client,
    base: &Url,
    appid: &str,
    secret: &str,
) -> Result<AccessToken, WeChatError> {
    tracing::info!(appid, "fetching wechat access token");
    let resp = http
        .get(endpoint(base, "cgi-bin/token")?)
        .query(&[
            ("grant_type", "client_credential"),
            ("appid", appid),
            ("secret", secret),
        ])
        .send()
        .await?;

    let envelope = read_envelope(resp).await?;
    let access_token = envelope
        .access_token
        .filter(|token| !token.is_empty())
        .ok_or_else(|| WeChatError::Decode("access_token missing".to_owned()))?;

    Ok(AccessToken {
        access_token,
        expires_in: envelope.expires_in.unwrap_or(7200),
    })
}

/// Adds a single-article draft and returns its `media_id`.
pub async fn add_draft(
    http: &reqwest::Client,
    base: &Url,
    access_token: &str,
    article: &DraftArticle,
) -> Result<String, WeChatError> {
    let resp = http
        .post(endpoint(base, "cgi-bin/draft/add")?)
        .query(&[("access_token", access_token)])
        .json(&DraftRequest { articles: [article] })
        .send()
        .await?;

    let envelope = read_envelope(resp).await?;
    let media_id = envelope
        .media_id
        .ok_or_else(|| WeChatError::Decode("media_id missing".to_owned()))?;
    tracing::info!(media_id = %media_id, "wechat draft created");
    Ok(media_id)
}
