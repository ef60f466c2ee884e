use std::{env, fmt, net::SocketAddr, path::PathBuf, str::FromStr, time::Duration};

use anyhow::{Context, Result, bail};
use url::Url;

fn ensure_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        url.set_path(&format!("{}/", url.path()));
    }
    url
}

#[derive(Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub themes_path: PathBuf,
    pub cors_origin: Option<Url>,
    pub http_timeout: Duration,
    pub wechat_api_base: Url,
    pub ai: Option<AiConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AiProvider {
    Glm,
    DeepSeek,
    Nvidia,
}

impl AiProvider {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Glm => "glm",
            Self::DeepSeek => "deepseek",
            Self::Nvidia => "nvidia",
        }
    }

    fn api_key_var(self) -> &'static str {
        match self {
            Self::Glm => "GLM_API_KEY",
            Self::DeepSeek => "DEEPSEEK_API_KEY",
            Self::Nvidia => "NVIDIA_API_KEY",
        }
    }

    fn default_base_url(self) -> &'static str {
        match self {
            Self::Glm => "https://open.bigmodel.cn/api/paas/v4/",
            Self::DeepSeek => "https://api.deepseek.com/v1/",
            Self::Nvidia => "https://integrate.api.nvidia.com/v1/",
        }
    }

    fn default_model(self) -> &'static str {
        match self {
            Self::Glm => "glm-4-flash",
            Self::DeepSeek => "deepseek-chat",
            Self::Nvidia => "deepseek-ai/deepseek-r1",
        }
    }
}

impl FromStr for AiProvider {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "glm" | "zhipu" => Ok(Self::Glm),
            "deepseek" => Ok(Self::DeepSeek),
            "nvidia" => Ok(Self::Nvidia),
            other => bail!("unknown AI_PROVIDER {other:?} (expected glm, deepseek or nvidia)"),
        }
    }
}

#[derive(Clone)]
pub struct AiConfig {
    pub provider: AiProvider,
    pub base_url: Url,
    pub model: String,
    pub api_key: String,
}

impl fmt::Debug for AiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AiConfig")
            .field("provider", &self.provider)
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("bind_addr", &self.bind_addr)
            .field("themes_path", &self.themes_path)
            .field("cors_origin", &self.cors_origin)
            .field("http_timeout", &self.http_timeout)
            .field("wechat_api_base", &self.wechat_api_base)
            .field("ai", &self.ai)
            .finish()
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from any key lookup; blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_owned())
                .filter(|v| !v.is_empty())
        };

        let bind_addr: SocketAddr = var("MD2ANY_BIND_ADDR")
            .unwrap_or_else(|| "127.0.0.1:8000".to_owned())
            .parse()
            .context("invalid MD2ANY_BIND_ADDR (expected ip:port)")?;

        let themes_path = var("MD2ANY_THEMES_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("themes/styles.json"));

        let cors_origin = var("MD2ANY_CORS_ORIGIN")
            .map(|raw| Url::parse(&raw).context("invalid MD2ANY_CORS_ORIGIN"))
            .transpose()?;

        let http_timeout_secs: u64 = var("MD2ANY_HTTP_TIMEOUT_SECS")
            .map(|raw| raw.parse::<u64>())
            .transpose()
            .context("invalid MD2ANY_HTTP_TIMEOUT_SECS (expected whole seconds)")?
            .unwrap_or(10);
        if http_timeout_secs == 0 {
            bail!("MD2ANY_HTTP_TIMEOUT_SECS must be greater than zero");
        }

        let wechat_api_base = var("WECHAT_API_BASE")
            .unwrap_or_else(|| "https://api.weixin.qq.com/".to_owned());
        let wechat_api_base =
            ensure_trailing_slash(Url::parse(&wechat_api_base).context("invalid WECHAT_API_BASE")?);

        let provider: AiProvider = var("AI_PROVIDER")
            .as_deref()
            .unwrap_or("glm")
            .parse()?;
        let ai = var(provider.api_key_var())
            .map(|api_key| {
                let base_url = var("AI_BASE_URL")
                    .unwrap_or_else(|| provider.default_base_url().to_owned());
                let base_url = Url::parse(&base_url).context("invalid AI_BASE_URL")?;
                let model = var("AI_MODEL").unwrap_or_else(|| provider.default_model().to_owned());
                Ok::<_, anyhow::Error>(AiConfig {
                    provider,
                    base_url: ensure_trailing_slash(base_url),
                    model,
                    api_key,
                })
            })
            .transpose()?;

        Ok(Self {
            bind_addr,
            themes_path,
            cors_origin,
            http_timeout: Duration::from_secs(http_timeout_secs),
            wechat_api_base,
            ai,
        })
    }
}
