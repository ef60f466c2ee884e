use std::path::Path;

use anyhow::{Context, Result, anyhow};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Selector → declaration string, in source order.
pub type StyleMap = IndexMap<String, String>;

pub const CONTAINER_SELECTOR: &str = "container";
pub const INNER_CONTAINER_SELECTOR: &str = "innerContainer";
pub const DEFAULT_THEME_ID: &str = "wechat-default";
pub const LIGHT_MODE_ID: &str = "light-mode";
pub const DARK_MODE_ID: &str = "dark-mode";

pub fn is_reserved_selector(selector: &str) -> bool {
    selector == CONTAINER_SELECTOR || selector == INNER_CONTAINER_SELECTOR
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThemeMode {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class: Option<String>,
    #[serde(default = "default_background")]
    pub background: String,
}

fn default_background() -> String {
    "#ffffff".to_owned()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Theme {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub modes: Vec<ThemeMode>,
    #[serde(default)]
    pub styles: StyleMap,
}

impl Theme {
    /// Themes that declare no modes get a single light entry.
    pub fn served_modes(&self) -> Vec<ThemeMode> {
        if !self.modes.is_empty() {
            return self.modes.clone();
        }
        vec![ThemeMode {
            id: LIGHT_MODE_ID.to_owned(),
            name: "默认".to_owned(),
            class: None,
            background: default_background(),
        }]
    }

    pub fn supports_mode(&self, mode: &str) -> bool {
        self.modes.is_empty() || self.modes.iter().any(|m| m.id == mode)
    }

    pub fn mode_ids(&self) -> Vec<&str> {
        self.modes.iter().map(|m| m.id.as_str()).collect()
    }
}

#[derive(Debug, Clone)]
pub struct ThemeRegistry {
    themes: IndexMap<String, Theme>,
}

impl ThemeRegistry {
    /// Loads the themes file, falling back to the baked-in theme on any failure.
    pub fn load(path: &Path) -> Self {
        match Self::read_file(path) {
            Ok(registry) => {
                tracing::info!(path = %path.display(), themes = registry.len(), "themes loaded");
                registry
            }
            Err(err) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %format!("{err:#}"),
                    "could not load themes, using built-in default"
                );
                Self::builtin()
            }
        }
    }

    fn read_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).context("failed to read themes file")?;
        Self::from_json_str(&raw)
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        let mut themes: IndexMap<String, Theme> =
            serde_json::from_str(raw).context("themes file json decode failed")?;
        if themes.is_empty() {
            return Err(anyhow!("themes file contains no themes"));
        }
        for (id, theme) in themes.iter_mut() {
            if theme.name.trim().is_empty() {
                theme.name = display_name_from_id(id);
            }
        }
        Ok(Self { themes })
    }

    pub fn builtin() -> Self {
        let mut themes = IndexMap::new();
        themes.insert(DEFAULT_THEME_ID.to_owned(), builtin_default_theme());
        Self { themes }
    }

    pub fn get(&self, id: &str) -> Option<&Theme> {
        self.themes.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.themes.contains_key(id)
    }

    /// The named theme, or the first available one when the id is unknown.
    pub fn resolve(&self, id: &str) -> (&str, &Theme) {
        if let Some((key, theme)) = self.themes.get_key_value(id) {
            return (key.as_str(), theme);
        }
        let (key, theme) = self
            .themes
            .first()
            .expect("theme registry is never empty");
        (key.as_str(), theme)
    }

    pub fn ids(&self) -> Vec<&str> {
        self.themes.keys().map(String::as_str).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Theme)> {
        self.themes.iter().map(|(id, theme)| (id.as_str(), theme))
    }

    pub fn len(&self) -> usize {
        self.themes.len()
    }
}

fn display_name_from_id(id: &str) -> String {
    id.split(['-', '_'])
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

const BUILTIN_DEFAULT_STYLES: &[(&str, &str)] = &[
    (
        "container",
        "max-width: 740px; margin: 0 auto; padding: 20px; font-family: 'Helvetica Neue', Helvetica, Arial, 'PingFang SC', 'Hiragino Sans GB', 'Microsoft YaHei', sans-serif; font-size: 16px; line-height: 1.8; color: #333; background-color: #ffffff;",
    ),
    (
        "h1",
        "font-size: 28px; line-height: 1.4; font-weight: 700; color: #2c3e50; position: relative; padding-bottom: 16px; border-bottom: 2px solid #3498db; margin: 32px 0 24px;",
    ),
    (
        "h2",
        "display: table; padding: 0.6em 1.5em; margin: 2.8em auto 1.5em; font-size: 1.3em; font-weight: 700; text-align: center; color: #fff; background: linear-gradient(135deg, #3498db, #2980b9); border-radius: 30px; box-shadow: 0 6px 16px rgba(52, 152, 219, 0.25);",
    ),
    (
        "h3",
        "font-size: 1.2em; font-weight: 600; color: #2c3e50; margin: 2.2em 0 1em; padding-left: 16px; border-left: 4px solid #3498db; line-height: 1.5;",
    ),
    (
        "h4",
        "font-size: 20px; font-weight: 600; color: #34495e; line-height: 1.4; margin: 24px 0 12px;",
    ),
    (
        "h5",
        "font-size: 18px; font-weight: 600; color: #34495e; line-height: 1.4; margin: 20px 0 10px;",
    ),
    (
        "h6",
        "font-size: 16px; font-weight: 600; color: #7f8c8d; margin-top: 1.5em; margin-bottom: 0.8em;",
    ),
    ("p", "color: #555555; margin: 20px 0; line-height: 1.8;"),
    (
        "strong",
        "font-weight: 700; color: #e74c3c; background-color: rgba(231, 76, 60, 0.08); padding: 2px 4px; border-radius: 3px;",
    ),
    ("em", "color: #9b59b6; font-style: italic;"),
    (
        "a",
        "color: #3498db; text-decoration: none; font-weight: 600; border-bottom: 2px solid rgba(52, 152, 219, 0.3); padding: 0 2px;",
    ),
    (
        "ul",
        "padding: 16px 16px 16px 36px; background: rgba(52, 152, 219, 0.05); border-radius: 12px; margin: 20px 0;",
    ),
    (
        "ol",
        "padding: 16px 16px 16px 36px; background: rgba(46, 204, 113, 0.05); border-radius: 12px; margin: 20px 0;",
    ),
    (
        "li",
        "font-size: 16px; line-height: 1.8; color: #555555; margin: 12px 0;",
    ),
    (
        "blockquote",
        "padding: 20px 25px 20px 30px; background: #ecf0f1; border-left: 5px solid #3498db; border-radius: 0 12px 12px 0; color: #444; margin: 24px 0; font-style: italic;",
    ),
    (
        "code",
        "font-family: 'Monaco', 'Consolas', monospace; background: rgba(52, 152, 219, 0.08); padding: 4px 8px; border-radius: 6px; font-size: 14px; color: #2980b9;",
    ),
    (
        "pre",
        "background: #f8f9fa; border-radius: 12px; padding: 20px 24px; overflow-x: auto; border: 1px solid #e9ecef; margin: 24px 0; line-height: 1.6;",
    ),
    (
        "table",
        "width: 100%; border-collapse: collapse; font-size: 15px; border: 1px solid #bdc3c7; border-radius: 12px; overflow: hidden; margin: 24px 0;",
    ),
    (
        "th",
        "background: rgba(52, 152, 219, 0.1); font-weight: 600; text-align: left; padding: 16px 20px; color: #2c3e50;",
    ),
    (
        "td",
        "padding: 16px 20px; border-bottom: 1px solid #ecf0f1; color: #555; line-height: 1.6;",
    ),
    (
        "img",
        "max-width: 100%; border-radius: 8px; box-shadow: 0 4px 12px rgba(0, 0, 0, 0.1); margin: 24px auto;",
    ),
];

fn builtin_default_theme() -> Theme {
    Theme {
        name: "默认样式".to_owned(),
        description: String::new(),
        modes: vec![
            ThemeMode {
                id: LIGHT_MODE_ID.to_owned(),
                name: "浅色".to_owned(),
                class: None,
                background: "#ffffff".to_owned(),
            },
            ThemeMode {
                id: DARK_MODE_ID.to_owned(),
                name: "深色".to_owned(),
                class: Some("dark-mode".to_owned()),
                background: "#1a1a1a".to_owned(),
            },
        ],
        styles: BUILTIN_DEFAULT_STYLES
            .iter()
            .map(|(selector, decl)| ((*selector).to_owned(), (*decl).to_owned()))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHIPPED_THEMES: &str = include_str!("../themes/styles.json");

    #[test]
    fn builtin_registry_has_default_theme() {
        let registry = ThemeRegistry::builtin();
        assert_eq!(registry.len(), 1);
        let theme = registry.get(DEFAULT_THEME_ID).expect("default theme");
        for selector in ["h1", "h2", "h3", "p", "a", "strong", "em", "code", "blockquote"] {
            assert!(theme.styles.contains_key(selector), "missing {selector}");
        }
        assert!(theme.styles.contains_key(CONTAINER_SELECTOR));
    }

    #[test]
    fn shipped_themes_file_parses() {
        let registry = ThemeRegistry::from_json_str(SHIPPED_THEMES).expect("parse shipped themes");
        assert!(registry.contains(DEFAULT_THEME_ID));
        assert!(registry.contains("alibaba"));
        for (id, theme) in registry.iter() {
            assert!(!theme.name.is_empty(), "{id} has no name");
            for (selector, decl) in &theme.styles {
                assert!(decl.contains(':'), "{id}/{selector} has no declaration");
            }
        }
    }

    #[test]
    fn shipped_default_theme_matches_builtin() {
        let shipped = ThemeRegistry::from_json_str(SHIPPED_THEMES).expect("parse shipped themes");
        let builtin = ThemeRegistry::builtin();
        assert_eq!(
            shipped.get(DEFAULT_THEME_ID).map(|t| &t.styles),
            builtin.get(DEFAULT_THEME_ID).map(|t| &t.styles)
        );
    }

    #[test]
    fn load_falls_back_when_file_missing() {
        let registry = ThemeRegistry::load(Path::new("does/not/exist.json"));
        assert_eq!(registry.ids(), vec![DEFAULT_THEME_ID]);
    }

    #[test]
    fn malformed_or_empty_source_is_rejected() {
        assert!(ThemeRegistry::from_json_str("{ not json").is_err());
        assert!(ThemeRegistry::from_json_str("{}").is_err());
    }

    #[test]
    fn missing_name_is_derived_from_id() {
        let registry = ThemeRegistry::from_json_str(r#"{"ink_wash-dark": {"styles": {"p": "color: #333;"}}}"#)
            .expect("parse");
        assert_eq!(registry.get("ink_wash-dark").map(|t| t.name.as_str()), Some("Ink Wash Dark"));
    }

    #[test]
    fn theme_without_modes_serves_single_light_mode() {
        let registry =
            ThemeRegistry::from_json_str(r#"{"plain": {"name": "Plain", "styles": {}}}"#).expect("parse");
        let theme = registry.get("plain").expect("plain");
        let modes = theme.served_modes();
        assert_eq!(modes.len(), 1);
        assert_eq!(modes[0].id, LIGHT_MODE_ID);
        assert!(theme.supports_mode("dark-mode"));
    }

    #[test]
    fn declared_modes_limit_supported_modes() {
        let theme = ThemeRegistry::builtin().get(DEFAULT_THEME_ID).cloned().expect("default");
        assert!(theme.supports_mode(LIGHT_MODE_ID));
        assert!(theme.supports_mode(DARK_MODE_ID));
        assert!(!theme.supports_mode("sepia-mode"));
    }

    #[test]
    fn resolve_falls_back_to_first_theme() {
        let registry = ThemeRegistry::from_json_str(SHIPPED_THEMES).expect("parse shipped themes");
        let (id, _) = registry.resolve("nope");
        assert_eq!(id, registry.ids()[0]);
        let (id, _) = registry.resolve("alibaba");
        assert_eq!(id, "alibaba");
    }

    #[test]
    fn style_map_keeps_source_order() {
        let registry = ThemeRegistry::from_json_str(
            r#"{"t": {"styles": {"p": "a: 1;", "h1": "b: 2;", "li": "c: 3;"}}}"#,
        )
        .expect("parse");
        let keys: Vec<_> = registry.get("t").expect("t").styles.keys().cloned().collect();
        assert_eq!(keys, vec!["p", "h1", "li"]);
    }
}
