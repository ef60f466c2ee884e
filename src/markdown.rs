use std::collections::HashMap;
use std::sync::OnceLock;

use pulldown_cmark::{
    CodeBlockKind, CowStr, Event, HeadingLevel, Options, Parser, Tag, TagEnd, TextMergeStream,
    html,
};
use regex::Regex;
use syntect::highlighting::{Theme as HighlightTheme, ThemeSet};
use syntect::html::highlighted_html_for_string;
use syntect::parsing::SyntaxSet;

pub const FALLBACK_TITLE: &str = "默认标题";
const TOC_MARKER: &str = "[TOC]";
const HIGHLIGHT_THEME: &str = "InspiredGitHub";

static LIST_FIXUPS: OnceLock<[(Regex, &'static str); 4]> = OnceLock::new();

fn list_fixups() -> &'static [(Regex, &'static str); 4] {
    LIST_FIXUPS.get_or_init(|| {
        [
            (
                Regex::new(r"(?m)^(\s*(?:\d+\.|-|\*)\s+[^:\n]+)\n\s*:\s*(.+?)$")
                    .expect("list fixup 1"),
                "${1}: ${2}",
            ),
            (
                Regex::new(r"(?m)^(\s*(?:\d+\.|-|\*)\s+.+?:)\s*\n\s+(.+?)$").expect("list fixup 2"),
                "${1} ${2}",
            ),
            (
                Regex::new(r"(?m)^(\s*(?:\d+\.|-|\*)\s+[^:\n]+)\n:\s*(.+?)$").expect("list fixup 3"),
                "${1}: ${2}",
            ),
            (
                Regex::new(r"(?m)^(\s*(?:\d+\.|-|\*)\s+.+?)\n\n\s+(.+?)$").expect("list fixup 4"),
                "${1} ${2}",
            ),
        ]
    })
}

/// Joins list items with descriptions that editors tend to break onto the next line.
pub fn preprocess_markdown(content: &str) -> String {
    list_fixups()
        .iter()
        .fold(content.to_owned(), |acc, (re, replacement)| {
            re.replace_all(&acc, *replacement).into_owned()
        })
}

/// First `# ` heading line, or the fallback title.
pub fn extract_title(markdown: &str) -> String {
    markdown
        .split('\n')
        .find(|line| line.starts_with('#') && !line.starts_with("##"))
        .map(|line| line.replacen('#', "", 1).trim().to_owned())
        .unwrap_or_else(|| FALLBACK_TITLE.to_owned())
}

pub(crate) fn escape_html(raw: &str, out: &mut String, in_attribute: bool) {
    for ch in raw.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '\u{a0}' => out.push_str("&nbsp;"),
            '"' if in_attribute => out.push_str("&quot;"),
            '<' if !in_attribute => out.push_str("&lt;"),
            '>' if !in_attribute => out.push_str("&gt;"),
            _ => out.push(ch),
        }
    }
}

/// Markdown → HTML with tables, footnotes, heading anchors, `[TOC]` and
/// inline-styled code highlighting.
pub struct MarkdownConverter {
    options: Options,
    syntaxes: SyntaxSet,
    highlight_theme: HighlightTheme,
}

impl std::fmt::Debug for MarkdownConverter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarkdownConverter")
            .field("options", &self.options)
            .field("syntaxes", &self.syntaxes.syntaxes().len())
            .finish()
    }
}

impl Default for MarkdownConverter {
    fn default() -> Self {
        Self::new()
    }
}

impl MarkdownConverter {
    pub fn new() -> Self {
        let mut options = Options::empty();
        options.insert(Options::ENABLE_TABLES);
        options.insert(Options::ENABLE_FOOTNOTES);
        options.insert(Options::ENABLE_STRIKETHROUGH);
        options.insert(Options::ENABLE_TASKLISTS);
        options.insert(Options::ENABLE_HEADING_ATTRIBUTES);

        let mut themes = ThemeSet::load_defaults();
        let highlight_theme = themes
            .themes
            .remove(HIGHLIGHT_THEME)
            .unwrap_or_default();

        Self {
            options,
            syntaxes: SyntaxSet::load_defaults_newlines(),
            highlight_theme,
        }
    }

    pub fn convert(&self, markdown: &str) -> String {
        let events: Vec<Event<'_>> =
            TextMergeStream::new(Parser::new_ext(markdown, self.options)).collect();

        let mut state = ConvertState::default();
        let events = state.assign_heading_ids(events);
        let events = self.rewrite_blocks(events, &state.toc);

        let mut out = String::with_capacity(markdown.len() * 3 / 2);
        html::push_html(&mut out, events.into_iter());
        out
    }

    fn rewrite_blocks<'a>(&self, events: Vec<Event<'a>>, toc: &[TocEntry]) -> Vec<Event<'a>> {
        let mut out = Vec::with_capacity(events.len());
        let mut iter = events.into_iter().peekable();

        while let Some(event) = iter.next() {
            match event {
                Event::Start(Tag::CodeBlock(CodeBlockKind::Fenced(lang)))
                    if !lang.trim().is_empty() =>
                {
                    let mut code = String::new();
                    for inner in iter.by_ref() {
                        match inner {
                            Event::End(TagEnd::CodeBlock) => break,
                            Event::Text(text) => code.push_str(&text),
                            _ => {}
                        }
                    }
                    out.push(Event::Html(CowStr::from(self.highlight(&code, &lang))));
                }
                Event::Start(Tag::Paragraph) => {
                    let is_marker = matches!(
                        iter.peek(),
                        Some(Event::Text(text)) if text.trim() == TOC_MARKER
                    );
                    if !is_marker {
                        out.push(Event::Start(Tag::Paragraph));
                        continue;
                    }
                    let marker = iter.next();
                    if matches!(iter.peek(), Some(Event::End(TagEnd::Paragraph))) {
                        iter.next();
                        out.push(Event::Html(CowStr::from(render_toc(toc))));
                    } else {
                        out.push(Event::Start(Tag::Paragraph));
                        out.extend(marker);
                    }
                }
                other => out.push(other),
            }
        }
        out
    }

    fn highlight(&self, code: &str, lang: &str) -> String {
        let token = lang.split_whitespace().next().unwrap_or_default();
        let syntax = self
            .syntaxes
            .find_syntax_by_token(token)
            .unwrap_or_else(|| self.syntaxes.find_syntax_plain_text());

        match highlighted_html_for_string(code, &self.syntaxes, syntax, &self.highlight_theme) {
            Ok(highlighted) => format!("<div class=\"highlight\">{highlighted}</div>\n"),
            Err(err) => {
                tracing::debug!(lang = token, error = %err, "code highlighting failed");
                let mut out = String::from("<pre><code>");
                escape_html(code, &mut out, false);
                out.push_str("</code></pre>\n");
                out
            }
        }
    }
}

#[derive(Debug, Clone)]
struct TocEntry {
    level: usize,
    id: String,
    text: String,
}

#[derive(Debug, Default)]
struct ConvertState {
    used_ids: HashMap<String, usize>,
    toc: Vec<TocEntry>,
}

impl ConvertState {
    fn assign_heading_ids<'a>(&mut self, mut events: Vec<Event<'a>>) -> Vec<Event<'a>> {
        let mut idx = 0;
        while idx < events.len() {
            let Event::Start(Tag::Heading { level, id, .. }) = &events[idx] else {
                idx += 1;
                continue;
            };
            let level = heading_depth(*level);
            let explicit = id.as_ref().map(|id| id.to_string());

            let mut text = String::new();
            let mut end = idx + 1;
            while end < events.len() {
                match &events[end] {
                    Event::End(TagEnd::Heading(_)) => break,
                    Event::Text(t) | Event::Code(t) => text.push_str(t),
                    _ => {}
                }
                end += 1;
            }

            let id = match explicit {
                Some(id) => {
                    self.used_ids.entry(id.clone()).or_insert(0);
                    id
                }
                None => self.unique_id(&slugify(&text)),
            };

            if let Event::Start(Tag::Heading { id: slot, .. }) = &mut events[idx] {
                *slot = Some(CowStr::from(id.clone()));
            }
            self.toc.push(TocEntry {
                level,
                id,
                text: text.trim().to_owned(),
            });
            idx = end + 1;
        }
        events
    }

    fn unique_id(&mut self, base: &str) -> String {
        let base = if base.is_empty() { "section" } else { base };
        let Some(&seen) = self.used_ids.get(base) else {
            self.used_ids.insert(base.to_owned(), 0);
            return base.to_owned();
        };

        let mut count = seen;
        loop {
            count += 1;
            let candidate = format!("{base}_{count}");
            if !self.used_ids.contains_key(&candidate) {
                self.used_ids.insert(base.to_owned(), count);
                self.used_ids.insert(candidate.clone(), 0);
                return candidate;
            }
        }
    }
}

fn heading_depth(level: HeadingLevel) -> usize {
    match level {
        HeadingLevel::H1 => 1,
        HeadingLevel::H2 => 2,
        HeadingLevel::H3 => 3,
        HeadingLevel::H4 => 4,
        HeadingLevel::H5 => 5,
        HeadingLevel::H6 => 6,
    }
}

/// Lower-cased words joined by `-`; CJK and other letters are kept.
fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut pending_dash = false;
    for ch in text.trim().chars() {
        if ch.is_alphanumeric() || ch == '_' {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.extend(ch.to_lowercase());
        } else if ch.is_whitespace() || ch == '-' {
            pending_dash = true;
        }
    }
    slug
}

fn render_toc(entries: &[TocEntry]) -> String {
    let mut out = String::from("<div class=\"toc\">");
    let mut open_levels: Vec<usize> = Vec::new();

    for entry in entries {
        match open_levels.last() {
            Some(&top) if entry.level <= top => {
                out.push_str("</li>");
                while open_levels.len() > 1 && open_levels.last().is_some_and(|&l| l > entry.level) {
                    open_levels.pop();
                    out.push_str("</ul></li>");
                }
            }
            _ => {
                out.push_str("<ul>");
                open_levels.push(entry.level);
            }
        }
        out.push_str("<li><a href=\"#");
        escape_html(&entry.id, &mut out, true);
        out.push_str("\">");
        escape_html(&entry.text, &mut out, false);
        out.push_str("</a>");
    }

    while open_levels.pop().is_some() {
        out.push_str("</li></ul>");
    }
    out.push_str("</div>\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn converter() -> &'static MarkdownConverter {
        static CONVERTER: OnceLock<MarkdownConverter> = OnceLock::new();
        CONVERTER.get_or_init(MarkdownConverter::new)
    }

    #[test]
    fn title_from_first_h1() {
        assert_eq!(extract_title("# Hello\n\nBody"), "Hello");
        assert_eq!(extract_title("intro\n#  Spaced Title  \n# Second"), "Spaced Title");
    }

    #[test]
    fn title_ignores_deeper_headings() {
        assert_eq!(extract_title("## Sub\n\n### Deeper"), FALLBACK_TITLE);
        assert_eq!(extract_title("## Sub\n# Real"), "Real");
    }

    #[test]
    fn title_falls_back_without_heading() {
        assert_eq!(extract_title("just text"), FALLBACK_TITLE);
        assert_eq!(extract_title(""), FALLBACK_TITLE);
    }

    #[test]
    fn preprocess_joins_colon_description() {
        let input = "- item\n: description";
        assert_eq!(preprocess_markdown(input), "- item: description");
    }

    #[test]
    fn preprocess_joins_indented_continuation_after_colon() {
        let input = "1. Name:\n   value";
        assert_eq!(preprocess_markdown(input), "1. Name: value");
    }

    #[test]
    fn preprocess_joins_item_separated_by_blank_line() {
        let input = "* item\n\n  continued";
        assert_eq!(preprocess_markdown(input), "* item continued");
    }

    #[test]
    fn preprocess_leaves_plain_text_alone() {
        let input = "# Title\n\nA paragraph: with colon.\n\n- a\n- b\n";
        assert_eq!(preprocess_markdown(input), input);
    }

    #[test]
    fn convert_renders_tables_and_headings() {
        let html = converter().convert("# Title\n\n| a | b |\n|---|---|\n| 1 | 2 |\n");
        assert!(html.contains("<h1 id=\"title\">Title</h1>"), "{html}");
        assert!(html.contains("<table>"));
        assert!(html.contains("<td>1</td>"));
    }

    #[test]
    fn heading_ids_are_unique_and_keep_cjk() {
        let html = converter().convert("## 示例 标题\n\n## 示例 标题\n\n## Hello, World!\n");
        assert!(html.contains("id=\"示例-标题\""), "{html}");
        assert!(html.contains("id=\"示例-标题_1\""), "{html}");
        assert!(html.contains("id=\"hello-world\""), "{html}");
    }

    #[test]
    fn explicit_heading_id_is_kept() {
        let html = converter().convert("# Intro {#start}\n");
        assert!(html.contains("id=\"start\""), "{html}");
    }

    #[test]
    fn toc_marker_becomes_nested_list() {
        let html = converter().convert("[TOC]\n\n# One\n\n## One A\n\n# Two\n");
        assert!(html.contains("<div class=\"toc\">"), "{html}");
        assert!(html.contains("<a href=\"#one\">One</a><ul><li><a href=\"#one-a\">One A</a>"), "{html}");
        assert!(!html.contains("[TOC]"));
    }

    #[test]
    fn fenced_code_is_highlighted_inline() {
        let html = converter().convert("```rust\nfn main() {}\n```\n");
        assert!(html.contains("<div class=\"highlight\"><pre style="), "{html}");
        assert!(html.contains("style=\"color:"), "{html}");
    }

    #[test]
    fn unknown_language_falls_back_to_plain_text() {
        let html = converter().convert("```nosuchlang\n<tag>\n```\n");
        assert!(html.contains("<div class=\"highlight\">"), "{html}");
        assert!(html.contains("&lt;tag&gt;"), "{html}");
    }

    #[test]
    fn consecutive_conversions_do_not_share_state() {
        let first = converter().convert("# Repeated\n\nlong body with **bold** text\n");
        let second = converter().convert("# Repeated\n\nhi\n");
        assert!(first.contains("id=\"repeated\""));
        assert!(second.contains("id=\"repeated\""), "{second}");
        assert!(!second.contains("bold"));
        assert!(second.len() < first.len());
    }

    #[test]
    fn slugify_collapses_separators() {
        assert_eq!(slugify("  Hello --  World "), "hello-world");
        assert_eq!(slugify("!!!"), "");
    }
}
