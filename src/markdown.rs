//! Markdown to HTML rendering with syntax highlighting.
//!
//! Used for blog bodies and for chat replies (`POST /api/markdown`).
//! Fenced code blocks with a known language are highlighted by syntect
//! with inline styles; anything else is emitted as escaped `<pre><code>`.
//! Headings receive slug anchors so posts can link to sections. Raw HTML
//! in the source is escaped, since chat replies come from a hosted model.

use pulldown_cmark::{html, CodeBlockKind, CowStr, Event, HeadingLevel, Options, Parser, Tag, TagEnd};
use std::collections::HashMap;
use std::sync::OnceLock;
use syntect::highlighting::{Theme, ThemeSet};
use syntect::html::highlighted_html_for_string;
use syntect::parsing::SyntaxSet;
use tracing::warn;

static SYNTAX_SET: OnceLock<SyntaxSet> = OnceLock::new();
static THEME_SET: OnceLock<ThemeSet> = OnceLock::new();

fn syntax_set() -> &'static SyntaxSet {
    SYNTAX_SET.get_or_init(SyntaxSet::load_defaults_newlines)
}

fn theme_set() -> &'static ThemeSet {
    THEME_SET.get_or_init(ThemeSet::load_defaults)
}

const FALLBACK_THEME: &str = "base16-ocean.dark";

#[derive(Debug, Clone)]
pub struct MarkdownRenderer {
    theme: String,
}

impl Default for MarkdownRenderer {
    fn default() -> Self {
        Self::new(FALLBACK_THEME)
    }
}

impl MarkdownRenderer {
    pub fn new(theme: impl Into<String>) -> Self {
        let theme = theme.into();
        if !theme_set().themes.contains_key(&theme) {
            warn!(theme = %theme, "unknown highlight theme, using {}", FALLBACK_THEME);
        }
        Self { theme }
    }

    fn theme(&self) -> Option<&'static Theme> {
        let ts = theme_set();
        ts.themes
            .get(&self.theme)
            .or_else(|| ts.themes.get(FALLBACK_THEME))
            .or_else(|| ts.themes.values().next())
    }

    /// Renders `markdown` to an HTML fragment.
    pub fn render(&self, markdown: &str) -> String {
        let mut options = Options::empty();
        options.insert(Options::ENABLE_TABLES);
        options.insert(Options::ENABLE_FOOTNOTES);
        options.insert(Options::ENABLE_STRIKETHROUGH);
        options.insert(Options::ENABLE_TASKLISTS);

        // Raw HTML in the source is shown as text, never passed through.
        let parser = Parser::new_ext(markdown, options).map(|event| match event {
            Event::Html(raw) | Event::InlineHtml(raw) => Event::Text(raw),
            other => other,
        });
        let mut events: Vec<Event> = Vec::new();
        let mut anchors = AnchorSet::default();

        let mut code: Option<(String, String)> = None;
        let mut heading: Option<(HeadingLevel, Vec<Event>, String)> = None;

        for event in parser {
            if let Some((_, buf)) = code.as_mut() {
                match event {
                    Event::Text(text) => buf.push_str(&text),
                    Event::End(TagEnd::CodeBlock) => {
                        if let Some((lang, buf)) = code.take() {
                            events.push(Event::Html(CowStr::from(self.highlight(&buf, &lang))));
                        }
                    }
                    _ => {}
                }
                continue;
            }

            if let Some((_, inner, text)) = heading.as_mut() {
                match event {
                    Event::End(TagEnd::Heading(_)) => {
                        if let Some((level, inner, text)) = heading.take() {
                            let tag = heading_tag(level);
                            let id = anchors.claim(&text);
                            events.push(Event::Html(CowStr::from(format!("<{} id=\"{}\">", tag, id))));
                            events.extend(inner);
                            events.push(Event::Html(CowStr::from(format!("</{}>\n", tag))));
                        }
                    }
                    other => {
                        if let Event::Text(t) | Event::Code(t) = &other {
                            text.push_str(t);
                        }
                        inner.push(other);
                    }
                }
                continue;
            }

            match event {
                Event::Start(Tag::CodeBlock(kind)) => {
                    let lang = match kind {
                        CodeBlockKind::Fenced(info) => info
                            .split(|c: char| c.is_whitespace() || c == ',')
                            .next()
                            .unwrap_or("")
                            .to_string(),
                        CodeBlockKind::Indented => String::new(),
                    };
                    code = Some((lang, String::new()));
                }
                Event::Start(Tag::Heading { level, .. }) => {
                    heading = Some((level, Vec::new(), String::new()));
                }
                other => events.push(other),
            }
        }

        let mut out = String::with_capacity(markdown.len() * 3 / 2);
        html::push_html(&mut out, events.into_iter());
        out
    }

    fn highlight(&self, code: &str, lang: &str) -> String {
        if !lang.is_empty() {
            let ss = syntax_set();
            if let (Some(syntax), Some(theme)) = (ss.find_syntax_by_token(lang), self.theme()) {
                match highlighted_html_for_string(code, ss, syntax, theme) {
                    Ok(html) => return html,
                    Err(e) => warn!(lang = %lang, "highlighting failed: {}", e),
                }
            }
        }
        plain_code_block(code, lang)
    }
}

fn plain_code_block(code: &str, lang: &str) -> String {
    if lang.is_empty() {
        format!("<pre><code>{}</code></pre>\n", html_escape(code))
    } else {
        format!(
            "<pre><code class=\"language-{}\">{}</code></pre>\n",
            html_escape(lang),
            html_escape(code)
        )
    }
}

fn heading_tag(level: HeadingLevel) -> &'static str {
    match level {
        HeadingLevel::H1 => "h1",
        HeadingLevel::H2 => "h2",
        HeadingLevel::H3 => "h3",
        HeadingLevel::H4 => "h4",
        HeadingLevel::H5 => "h5",
        HeadingLevel::H6 => "h6",
    }
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Heading slugs already used in a document.
#[derive(Default)]
struct AnchorSet {
    seen: HashMap<String, usize>,
}

impl AnchorSet {
    fn claim(&mut self, text: &str) -> String {
        let base = slugify(text);
        let base = if base.is_empty() {
            "section".to_string()
        } else {
            base
        };
        let count = self.seen.entry(base.clone()).or_insert(0);
        let id = if *count == 0 {
            base
        } else {
            format!("{}-{}", base, count)
        };
        *count += 1;
        id
    }
}

/// `"Hello, World!"` → `"hello-world"`.
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut dash = false;
    for c in text.trim().chars() {
        if c.is_alphanumeric() {
            slug.extend(c.to_lowercase());
            dash = false;
        } else if (c.is_whitespace() || c == '-' || c == '_') && !dash && !slug.is_empty() {
            slug.push('-');
            dash = true;
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}

/// Whitespace-separated word count of the Markdown source.
pub fn word_count(markdown: &str) -> usize {
    markdown.split_whitespace().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paragraph_and_emphasis() {
        let html = MarkdownRenderer::default().render("Hello *world*");
        assert_eq!(html, "<p>Hello <em>world</em></p>\n");
    }

    #[test]
    fn test_heading_anchors_are_unique() {
        let html = MarkdownRenderer::default().render("## Hello World\n\n## Hello World\n");
        assert!(html.contains("<h2 id=\"hello-world\">Hello World</h2>"));
        assert!(html.contains("<h2 id=\"hello-world-1\">Hello World</h2>"));
    }

    #[test]
    fn test_heading_with_inline_code() {
        let html = MarkdownRenderer::default().render("# Using `tokio`");
        assert!(html.contains("id=\"using-tokio\""));
        assert!(html.contains("<code>tokio</code>"));
    }

    #[test]
    fn test_known_language_is_highlighted() {
        let html = MarkdownRenderer::default().render("```rust\nfn main() {}\n```\n");
        assert!(html.contains("<pre style="));
        assert!(html.contains("<span style="));
        assert!(!html.contains("language-rust"));
    }

    #[test]
    fn test_unknown_language_is_escaped() {
        let html = MarkdownRenderer::default().render("```nosuchlang\n<a> & b\n```\n");
        assert!(html.contains("class=\"language-nosuchlang\""));
        assert!(html.contains("&lt;a&gt; &amp; b"));
    }

    #[test]
    fn test_untagged_block() {
        let html = MarkdownRenderer::default().render("    indented <x>\n");
        assert!(html.contains("<pre><code>indented &lt;x&gt;"));
    }

    #[test]
    fn test_tables_enabled() {
        let html = MarkdownRenderer::default().render("| a | b |\n|---|---|\n| 1 | 2 |\n");
        assert!(html.contains("<table>"));
    }

    #[test]
    fn test_unknown_theme_falls_back() {
        let html = MarkdownRenderer::new("no-such-theme").render("```rust\nlet x = 1;\n```\n");
        assert!(html.contains("<pre style="));
    }

    #[test]
    fn test_raw_html_is_escaped() {
        let html = MarkdownRenderer::default()
            .render("Hi <img src=x onerror=alert(1)>\n\n<script>alert(2)</script>\n");
        assert!(!html.contains("<script>"));
        assert!(!html.contains("<img"));
        assert!(html.contains("&lt;script&gt;alert(2)&lt;/script&gt;"));
        assert!(html.contains("&lt;img src=x onerror=alert(1)&gt;"));
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Hello, World!"), "hello-world");
        assert_eq!(slugify("  Rust -- async  "), "rust-async");
        assert_eq!(slugify("!!!"), "");
    }

    #[test]
    fn test_word_count() {
        assert_eq!(word_count(""), 0);
        assert_eq!(word_count("one two\nthree"), 3);
    }
}
