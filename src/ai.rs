use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::AiConfig;
use crate::state::AppState;
use crate::theme::StyleMap;

const CHAT_MAX_TOKENS: u32 = 2_048;
const MARKDOWN_MAX_TOKENS: u32 = 4_096;
const STYLE_MAX_TOKENS: u32 = 2_048;
const STYLE_SOURCE_MAX_CHARS: usize = 12_000;

const CHAT_SYSTEM_PROMPT: &str = "你是一个写作助手，帮助用户撰写和润色公众号文章。回答使用用户的语言。";

const GENERATE_MARKDOWN_PROMPT: &str = "根据用户的要求写一篇结构清晰的文章。只输出 Markdown 正文，使用标题、列表、引用和代码块等元素，不要输出任何解释。";

const TEXT_TO_MARKDOWN_PROMPT: &str = "把用户提供的纯文本整理成 Markdown。识别标题层级、列表、引用和代码，只输出转换后的 Markdown。";

const STYLE_EXTRACTION_PROMPT: &str = "分析用户提供的 HTML 片段的视觉样式，输出一个 JSON 对象：键是 CSS 选择器（如 h1、h2、p、blockquote、code、pre、a、strong、ul、li、table、th、td、img，以及 container），值是内联 CSS 声明字符串。只输出 JSON。";

#[derive(Debug, Serialize)]
struct ChatCompletionsRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage<'a>],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

impl<'a> ChatMessage<'a> {
    pub fn system(content: &'a str) -> Self {
        Self {
            role: "system",
            content,
        }
    }

    pub fn user(content: &'a str) -> Self {
        Self {
            role: "user",
            content,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionsResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
    reasoning_content: Option<String>,
}

fn truncate_chars_lossy(bytes: &[u8], max_chars: usize) -> String {
    let s = String::from_utf8_lossy(bytes);
    truncate_chars(&s, max_chars)
}

fn truncate_chars(s: &str, max_chars: usize) -> String {
    let mut out: String = s.chars().take(max_chars).collect();
    if s.chars().count() > max_chars {
        out.push('…');
    }
    out
}

fn extract_error_message(body: &[u8]) -> Option<String> {
    let value: Value = serde_json::from_slice(body).ok()?;
    // OpenAI-style: { "error": { "message": "..." } }
    if let Some(msg) = value
        .get("error")
        .and_then(|e| e.get("message"))
        .and_then(|m| m.as_str())
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
    {
        return Some(msg.to_owned());
    }
    // Fallback: { "message": "..." }
    value
        .get("message")
        .and_then(|m| m.as_str())
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
}

fn non_empty(raw: Option<String>) -> Option<String> {
    raw.map(|s| s.trim().to_owned()).filter(|s| !s.is_empty())
}

pub async fn chat_completion(
    state: &AppState,
    messages: &[ChatMessage<'_>],
    max_tokens: u32,
) -> Result<String> {
    let Some(ai) = state.config.ai.as_ref() else {
        return Err(anyhow!("AI is not configured (provider API key is missing)"));
    };
    complete(&state.http, ai, messages, max_tokens).await
}

async fn complete(
    http: &reqwest::Client,
    ai: &AiConfig,
    messages: &[ChatMessage<'_>],
    max_tokens: u32,
) -> Result<String> {
    let url = ai
        .base_url
        .join("chat/completions")
        .context("invalid AI_BASE_URL")?;

    let req = ChatCompletionsRequest {
        model: &ai.model,
        messages,
        temperature: 0.7,
        max_tokens,
    };

    tracing::debug!(provider = ai.provider.as_str(), model = %ai.model, "AI request");
    let resp = http
        .post(url)
        .bearer_auth(&ai.api_key)
        .json(&req)
        .send()
        .await
        .context("AI request failed")?;

    let status = resp.status();
    let body = resp.bytes().await.context("AI read response failed")?;

    if !status.is_success() {
        let msg = extract_error_message(&body).unwrap_or_else(|| truncate_chars_lossy(&body, 400));
        return Err(anyhow!("AI returned {status}: {msg}"));
    }

    let resp: ChatCompletionsResponse =
        serde_json::from_slice(&body).context("AI response json decode failed")?;

    resp.choices
        .into_iter()
        .next()
        .and_then(|c| non_empty(c.message.content).or_else(|| non_empty(c.message.reasoning_content)))
        .ok_or_else(|| anyhow!("AI response missing content"))
}

fn strip_markdown_fence(reply: &str) -> String {
    let trimmed = reply.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed.to_owned();
    };
    let Some((info, body)) = rest.split_once('\n') else {
        return trimmed.to_owned();
    };
    if !matches!(info.trim(), "" | "markdown" | "md") {
        return trimmed.to_owned();
    }
    body.trim_end()
        .strip_suffix("```")
        .unwrap_or(body)
        .trim()
        .to_owned()
}

fn extract_json_object_span(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end < start {
        return None;
    }
    Some(raw[start..=end].trim())
}

/// Parses a selector → declarations object out of a model reply.
pub fn extract_style_map(raw: &str) -> Option<StyleMap> {
    fn parse_direct(raw: &str) -> Option<StyleMap> {
        serde_json::from_str::<StyleMap>(raw).ok().or_else(|| {
            let inner = serde_json::from_str::<String>(raw).ok()?;
            serde_json::from_str::<StyleMap>(&inner).ok()
        })
    }

    let trimmed = raw.trim();
    parse_direct(trimmed)
        .or_else(|| extract_json_object_span(trimmed).and_then(parse_direct))
        .filter(|styles| !styles.is_empty())
}

pub async fn ask(state: &AppState, prompt: &str, context: &str) -> Result<String> {
    let user = if context.trim().is_empty() {
        prompt.to_owned()
    } else {
        format!("上下文：\n{context}\n\n问题：\n{prompt}")
    };
    let messages = [ChatMessage::system(CHAT_SYSTEM_PROMPT), ChatMessage::user(&user)];
    chat_completion(state, &messages, CHAT_MAX_TOKENS).await
}

pub async fn generate_markdown(state: &AppState, prompt: &str) -> Result<String> {
    let messages = [
        ChatMessage::system(GENERATE_MARKDOWN_PROMPT),
        ChatMessage::user(prompt),
    ];
    let reply = chat_completion(state, &messages, MARKDOWN_MAX_TOKENS).await?;
    Ok(strip_markdown_fence(&reply))
}

pub async fn text_to_markdown(
    state: &AppState,
    text: &str,
    style: &str,
    preserve_formatting: bool,
) -> Result<String> {
    let mut system = format!("{TEXT_TO_MARKDOWN_PROMPT}\n排版风格：{style}。");
    if preserve_formatting {
        system.push_str("保留原文的段落划分和措辞，不要改写内容。");
    }
    let messages = [ChatMessage::system(&system), ChatMessage::user(text)];
    let reply = chat_completion(state, &messages, MARKDOWN_MAX_TOKENS).await?;
    Ok(strip_markdown_fence(&reply))
}

pub async fn extract_styles(state: &AppState, html: &str) -> Result<StyleMap> {
    let source = truncate_chars(html, STYLE_SOURCE_MAX_CHARS);
    let messages = [
        ChatMessage::system(STYLE_EXTRACTION_PROMPT),
        ChatMessage::user(&source),
    ];
    let reply = chat_completion(state, &messages, STYLE_MAX_TOKENS).await?;
    extract_style_map(&reply).ok_or_else(|| {
        anyhow!(
            "AI reply did not contain a style map: {}",
            truncate_chars(&reply, 200)
        )
    })
}
