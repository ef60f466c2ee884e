use std::borrow::Cow;
use std::sync::{Arc, OnceLock};

use anyhow::{Context, Result};
use lol_html::html_content::Element;
use lol_html::{ElementContentHandlers, HandlerResult, RewriteStrSettings, Selector, rewrite_str};
use regex::{Captures, Regex};

use crate::markdown::{MarkdownConverter, escape_html, preprocess_markdown};
use crate::style::{Mode, Platform, adjust, adjust_container, merge_style};
use crate::theme::{CONTAINER_SELECTOR, INNER_CONTAINER_SELECTOR, StyleMap, Theme, is_reserved_selector};

static IMAGE_RUN: OnceLock<Regex> = OnceLock::new();
static IMAGE_TAG: OnceLock<Regex> = OnceLock::new();

fn image_run_re() -> &'static Regex {
    IMAGE_RUN.get_or_init(|| Regex::new(r"(?:<p><img[^>]*></p>\s*)+").expect("image run regex"))
}

fn image_tag_re() -> &'static Regex {
    IMAGE_TAG.get_or_init(|| Regex::new(r"<img[^>]*>").expect("image tag regex"))
}

pub fn group_image_runs(html: &str) -> String {
    image_run_re()
        .replace_all(html, |caps: &Captures<'_>| {
            let run = &caps[0];
            let class = match image_tag_re().find_iter(run).count() {
                0 | 1 => return run.to_owned(),
                2 => "img-grid-2",
                3 => "img-grid-3",
                _ => "img-grid-multi",
            };
            format!("<section class=\"img-grid {class}\">{run}</section>")
        })
        .into_owned()
}

fn merge_into_style(declarations: String) -> impl FnMut(&mut Element<'_, '_>) -> HandlerResult {
    move |el: &mut Element<'_, '_>| {
        let current = el.get_attribute("style").unwrap_or_default();
        el.set_attribute("style", &merge_style(&current, &declarations))?;
        Ok(())
    }
}

/// Inlines `styles` into the converted HTML and wraps it in the container sections.
pub fn apply_styles(html: &str, styles: &StyleMap, mode: Mode, platform: Platform) -> Result<String> {
    let grouped = group_image_runs(html);

    let mut handlers = Vec::with_capacity(styles.len());
    for (selector, declarations) in styles {
        if is_reserved_selector(selector) {
            continue;
        }
        let parsed = match selector.parse::<Selector>() {
            Ok(parsed) => parsed,
            Err(err) => {
                tracing::debug!(selector = %selector, error = %err, "skipping selector");
                continue;
            }
        };
        let adjusted = adjust(declarations, mode, platform);
        handlers.push((
            Cow::Owned(parsed),
            ElementContentHandlers::default().element(merge_into_style(adjusted)),
        ));
    }

    let body = rewrite_str(
        &grouped,
        RewriteStrSettings {
            element_content_handlers: handlers,
            strict: false,
            ..RewriteStrSettings::default()
        },
    )
    .context("failed to inline styles")?;

    let container = styles
        .get(CONTAINER_SELECTOR)
        .map(|decl| adjust_container(decl, mode, platform))
        .unwrap_or_default();
    let inner = styles
        .get(INNER_CONTAINER_SELECTOR)
        .map(|decl| adjust_container(decl, mode, platform))
        .unwrap_or_default();

    let mut out = String::with_capacity(body.len() + container.len() + inner.len() + 96);
    out.push_str("<section class=\"markdown-content\"");
    if !container.is_empty() {
        write_attr("style", &container, &mut out);
    }
    out.push('>');
    if inner.is_empty() {
        out.push_str(&body);
    } else {
        out.push_str("<section class=\"inner-container\"");
        write_attr("style", &inner, &mut out);
        out.push('>');
        out.push_str(&body);
        out.push_str("</section>");
    }
    out.push_str("</section>");
    Ok(out)
}

fn write_attr(name: &str, value: &str, out: &mut String) {
    out.push(' ');
    out.push_str(name);
    out.push_str("=\"");
    escape_html(value, out, true);
    out.push('"');
}

#[derive(Debug, Clone, Default)]
pub struct MarkdownRenderer {
    converter: Arc<MarkdownConverter>,
}

impl MarkdownRenderer {
    pub fn new() -> Self {
        Self {
            converter: Arc::new(MarkdownConverter::new()),
        }
    }

    pub fn render(&self, markdown: &str, theme: &Theme, mode: Mode, platform: Platform) -> Result<String> {
        self.render_with_styles(markdown, &theme.styles, mode, platform)
    }

    pub fn render_with_styles(
        &self,
        markdown: &str,
        styles: &StyleMap,
        mode: Mode,
        platform: Platform,
    ) -> Result<String> {
        let preprocessed = preprocess_markdown(markdown);
        let html = self.converter.convert(&preprocessed);
        apply_styles(&html, styles, mode, platform)
    }
}

#[cfg(test)]
mod tests {
    use scraper::Html;

    use super::*;
    use crate::theme::{DEFAULT_THEME_ID, ThemeRegistry};

    const SAMPLE: &str = "# Test Heading\n\nThis is a **bold** text and this is *italic*.\n\n## Subheading\n\n- Item 1\n- Item 2\n- Item 3\n\n> This is a blockquote\n\n```python\ndef hello():\n    print(\"Hello, World!\")\n```\n\n| Column 1 | Column 2 |\n|----------|----------|\n| Cell 1   | Cell 2   |\n";

    fn renderer() -> &'static MarkdownRenderer {
        static RENDERER: OnceLock<MarkdownRenderer> = OnceLock::new();
        RENDERER.get_or_init(MarkdownRenderer::new)
    }

    fn styles(pairs: &[(&str, &str)]) -> StyleMap {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    fn style_of<'a>(doc: &'a Html, selector: &str) -> Vec<&'a str> {
        let selector = scraper::Selector::parse(selector).expect("selector");
        doc.select(&selector)
            .map(|el| el.value().attr("style").unwrap_or_default())
            .collect()
    }

    #[test]
    fn single_image_is_not_grouped() {
        let html = "<p><img src=\"test.jpg\" alt=\"test\"></p>";
        assert_eq!(group_image_runs(html), html);
    }

    #[test]
    fn image_runs_get_grid_class_by_count() {
        let img = |n: usize| format!("<p><img src=\"{n}.jpg\" /></p>\n");
        let run = |count: usize| (0..count).map(img).collect::<String>();

        assert!(group_image_runs(&run(2)).starts_with("<section class=\"img-grid img-grid-2\">"));
        assert!(group_image_runs(&run(3)).starts_with("<section class=\"img-grid img-grid-3\">"));
        assert!(group_image_runs(&run(4)).starts_with("<section class=\"img-grid img-grid-multi\">"));
        assert!(group_image_runs(&run(7)).contains("img-grid-multi"));
    }

    #[test]
    fn separate_runs_are_grouped_independently() {
        let html = "<p><img src=\"a\" /></p>\n<p><img src=\"b\" /></p>\n<p>text</p>\n<p><img src=\"c\" /></p>\n";
        let out = group_image_runs(html);
        assert_eq!(out.matches("img-grid-2").count(), 1);
        assert_eq!(out.matches("<section").count(), 1);
        assert!(out.ends_with("<p>text</p>\n<p><img src=\"c\" /></p>\n"));
    }

    #[test]
    fn every_matched_element_carries_adjusted_declaration() {
        let map = styles(&[
            ("p", "color: #333;"),
            ("li", "margin: 4px 0;"),
            ("strong", "font-weight: bold;"),
            ("blockquote p", "font-style: italic;"),
        ]);
        for (mode, platform) in [
            (Mode::Light, Platform::Wechat),
            (Mode::Dark, Platform::Wechat),
            (Mode::Dark, Platform::Zhihu),
        ] {
            let out = renderer().render_with_styles(SAMPLE, &map, mode, platform).expect("render");
            let doc = Html::parse_fragment(&out);
            for (selector, decl) in &map {
                let expected = adjust(decl, mode, platform);
                let found = style_of(&doc, selector);
                assert!(!found.is_empty(), "{selector} matched nothing");
                for style in found {
                    assert!(style.contains(&expected), "{selector}: {style} lacks {expected}");
                }
            }
        }
    }

    #[test]
    fn existing_inline_style_is_preserved() {
        let map = styles(&[("pre", "border-radius: 12px;")]);
        let out = renderer().render_with_styles(SAMPLE, &map, Mode::Light, Platform::General).expect("render");
        let doc = Html::parse_fragment(&out);
        let pre = style_of(&doc, "div.highlight > pre");
        assert_eq!(pre.len(), 1);
        assert!(pre[0].starts_with("background-color:"), "{}", pre[0]);
        assert!(pre[0].ends_with("; border-radius: 12px;"), "{}", pre[0]);
    }

    #[test]
    fn unsupported_selectors_are_skipped() {
        let map = styles(&[
            ("a:hover", "color: red;"),
            ("li::before", "content: '';"),
            ("[[[", "color: blue;"),
            ("h1", "color: green;"),
        ]);
        let out = renderer().render_with_styles(SAMPLE, &map, Mode::Light, Platform::General).expect("render");
        assert!(out.contains("<h1 id=\"test-heading\" style=\"color: green;\">"), "{out}");
        assert!(!out.contains("color: red"));
        assert!(!out.contains("color: blue"));
    }

    #[test]
    fn empty_style_map_still_wraps() {
        let out = renderer().render_with_styles("hello", &StyleMap::new(), Mode::Light, Platform::Wechat).expect("render");
        assert_eq!(out, "<section class=\"markdown-content\"><p>hello</p>\n</section>");
    }

    #[test]
    fn empty_markdown_yields_empty_container() {
        let out = renderer().render_with_styles("", &StyleMap::new(), Mode::Light, Platform::Wechat).expect("render");
        assert_eq!(out, "<section class=\"markdown-content\"></section>");
    }

    #[test]
    fn container_styles_are_adjusted_and_never_applied_to_content() {
        let map = styles(&[
            ("container", "background-color: #ffffff;"),
            ("innerContainer", "padding: 8px;"),
            ("p", "margin: 0;"),
        ]);
        let out = renderer().render_with_styles("text", &map, Mode::Dark, Platform::Wechat).expect("render");
        assert!(out.starts_with(
            "<section class=\"markdown-content\" style=\"background-color: #1a1a1a !important\"><section class=\"inner-container\" style=\"padding: 8px !important\"><p style=\"margin: 0 !important\">"
        ), "{out}");
        assert!(out.ends_with("</section></section>"));
    }

    #[test]
    fn container_keeps_plain_declarations_off_wechat() {
        let map = styles(&[("container", "color: #333;")]);
        let out = renderer().render_with_styles("text", &map, Mode::Light, Platform::Xiaohongshu).expect("render");
        assert!(out.starts_with("<section class=\"markdown-content\" style=\"color: #333;\">"), "{out}");
    }

    #[test]
    fn images_in_grid_keep_theme_styles() {
        let map = styles(&[("img", "max-width: 100%;"), (".img-grid", "display: grid;")]);
        let out = renderer().render_with_styles(
            "![a](1.png)\n\n![b](2.png)\n",
            &map,
            Mode::Light,
            Platform::General,
        )
        .expect("render");
        let doc = Html::parse_fragment(&out);
        assert_eq!(style_of(&doc, "section.img-grid-2"), vec!["display: grid;"]);
        assert_eq!(style_of(&doc, ".img-grid img").len(), 2);
    }

    #[test]
    fn converter_escaping_passes_through() {
        let out = renderer().render_with_styles(
            "a &lt; b & [link](https://x.test/?a=1&b=2)",
            &StyleMap::new(),
            Mode::Light,
            Platform::General,
        )
        .expect("render");
        assert!(out.contains("a &lt; b &amp; "), "{out}");
        assert!(out.contains("href=\"https://x.test/?a=1&amp;b=2\""), "{out}");
    }

    #[test]
    fn raw_inline_html_is_kept_as_written() {
        let map = styles(&[("p", "color: #333;"), ("b", "color: red;")]);
        let out = renderer()
            .render_with_styles("before <b>unclosed\n\nafter", &map, Mode::Light, Platform::General)
            .expect("render");
        assert!(
            out.contains("<p style=\"color: #333;\">before <b style=\"color: red;\">unclosed</p>"),
            "{out}"
        );
        assert!(out.contains("<p style=\"color: #333;\">after</p>"), "{out}");
        assert_eq!(out.matches("<b").count(), 1, "{out}");
    }

    #[test]
    fn stray_table_tags_survive() {
        let map = styles(&[("td", "padding: 4px;")]);
        let out = renderer()
            .render_with_styles(
                "<tr><td>orphan cell</td></tr>\n\ntext",
                &map,
                Mode::Light,
                Platform::General,
            )
            .expect("render");
        assert!(
            out.contains("<tr><td style=\"padding: 4px;\">orphan cell</td></tr>"),
            "{out}"
        );
        assert!(out.contains("<p>text</p>"), "{out}");
    }

    #[test]
    fn quoted_font_names_stay_inside_the_attribute() {
        let map = styles(&[("p", "font-family: \"PingFang SC\", sans-serif;")]);
        let out = renderer()
            .render_with_styles("hi", &map, Mode::Light, Platform::General)
            .expect("render");
        let doc = Html::parse_fragment(&out);
        assert_eq!(style_of(&doc, "p"), vec!["font-family: \"PingFang SC\", sans-serif;"]);
    }

    #[test]
    fn renders_do_not_leak_between_calls() {
        let theme = ThemeRegistry::builtin().get(DEFAULT_THEME_ID).cloned().expect("default");
        let first = renderer().render(SAMPLE, &theme, Mode::Light, Platform::Wechat).expect("render");
        let second = renderer().render("# Title\n\nContent", &theme, Mode::Light, Platform::Wechat).expect("render");
        assert!(second.len() < first.len());
        assert!(!second.contains("Subheading"));
        assert!(!second.contains("blockquote"));
        assert_eq!(second.matches("<h1").count(), 1);
    }

    #[test]
    fn default_theme_h1_gets_important_rule() {
        let theme = ThemeRegistry::builtin().get(DEFAULT_THEME_ID).cloned().expect("default");
        let out = renderer().render("# T\n\nhi", &theme, Mode::Light, Platform::Wechat).expect("render");
        let expected = adjust(&theme.styles["h1"], Mode::Light, Platform::Wechat);
        let doc = Html::parse_fragment(&out);
        assert_eq!(style_of(&doc, "section.markdown-content > h1"), vec![expected.as_str()]);
    }
}
