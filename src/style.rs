use serde::{Deserialize, Serialize};

use crate::theme::DARK_MODE_ID;

pub trait StyleTransform {
    fn apply(&self, declarations: &str) -> String;
}

/// Light colours and their dark replacements, applied in order.
const DARK_PALETTE: &[(&str, &str)] = &[
    ("#ffffff", "#1a1a1a"),
    ("#fff", "#1a1a1a"),
    ("#333333", "#e8e8e8"),
    ("#333", "#e8e8e8"),
    ("#555555", "#b0b0b0"),
    ("#555", "#b0b0b0"),
    ("#000000", "#ffffff"),
    ("#000", "#ffffff"),
    ("#f8f9fa", "#2c3e50"),
    ("#ecf0f1", "#2c3e50"),
    ("#f7f7f7", "#2c3e50"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Light,
    Dark,
}

impl Mode {
    /// Any id other than `dark-mode` renders with the light palette.
    pub fn from_id(id: &str) -> Self {
        if id == DARK_MODE_ID { Self::Dark } else { Self::Light }
    }
}

impl StyleTransform for Mode {
    fn apply(&self, declarations: &str) -> String {
        match self {
            Self::Light => declarations.to_owned(),
            Self::Dark => DARK_PALETTE
                .iter()
                .fold(declarations.to_owned(), |acc, (light, dark)| {
                    acc.replace(light, dark)
                }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    #[default]
    Wechat,
    Xiaohongshu,
    Zhihu,
    General,
}

impl Platform {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Wechat => "wechat",
            Self::Xiaohongshu => "xiaohongshu",
            Self::Zhihu => "zhihu",
            Self::General => "general",
        }
    }
}

impl StyleTransform for Platform {
    fn apply(&self, declarations: &str) -> String {
        match self {
            Self::Wechat => force_important(declarations),
            Self::Xiaohongshu | Self::Zhihu | Self::General => declarations.to_owned(),
        }
    }
}

fn force_important(declarations: &str) -> String {
    if declarations.is_empty() {
        return String::new();
    }
    declarations
        .split(';')
        .map(str::trim)
        .filter(|decl| !decl.is_empty() && decl.contains(':'))
        .map(|decl| {
            if decl.contains("!important") {
                decl.to_owned()
            } else {
                format!("{decl} !important")
            }
        })
        .collect::<Vec<_>>()
        .join("; ")
}

/// Mode first, then platform.
pub fn adjust(declarations: &str, mode: Mode, platform: Platform) -> String {
    platform.apply(&mode.apply(declarations))
}

/// Container sections only get the WeChat rewrite.
pub fn adjust_container(declarations: &str, mode: Mode, platform: Platform) -> String {
    let adjusted = mode.apply(declarations);
    match platform {
        Platform::Wechat => platform.apply(&adjusted),
        _ => adjusted,
    }
}

pub fn merge_style(existing: &str, addition: &str) -> String {
    let mut combined = existing.to_owned();
    if !combined.is_empty() && !combined.ends_with(';') {
        combined.push(';');
    }
    combined.push(' ');
    combined.push_str(addition);
    combined.trim().to_owned()
}
