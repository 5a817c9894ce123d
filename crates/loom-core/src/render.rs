// Copyright (c) 2026 Loom Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Markdown-to-sanitized-HTML conversion.
//!
//! This is the delegate the design calls "a markdown→HTML converter with
//! syntax highlighting and HTML sanitization" — rendering itself is a
//! Non-goal of the buffer logic, but the delegate has to exist for the
//! server to ship HTML to a browser at all.

use std::sync::OnceLock;

use pulldown_cmark::{CodeBlockKind, Event as MdEvent, Options, Parser, Tag, TagEnd};
use syntect::easy::HighlightLines;
use syntect::highlighting::{Style, ThemeSet};
use syntect::html::{styled_line_to_highlighted_html, IncludeBackground};
use syntect::parsing::SyntaxSet;

fn syntax_set() -> &'static SyntaxSet {
    static SET: OnceLock<SyntaxSet> = OnceLock::new();
    SET.get_or_init(SyntaxSet::load_defaults_newlines)
}

fn theme_set() -> &'static ThemeSet {
    static SET: OnceLock<ThemeSet> = OnceLock::new();
    SET.get_or_init(ThemeSet::load_defaults)
}

/// Render `markdown` to a sanitized HTML fragment.
///
/// Falls back to an escaped `<pre>` block if the highlighter can't cope with
/// a fence's language tag — never to an error, per the error-handling design.
pub fn render(markdown: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_FOOTNOTES);
    options.insert(Options::ENABLE_TASKLISTS);

    let parser = Parser::new_ext(markdown, options);
    let mut html = String::new();
    let mut in_code_block = false;
    let mut code_lang: Option<String> = None;
    let mut code_buf = String::new();

    let events: Vec<MdEvent> = parser.collect();
    for event in events {
        match event {
            MdEvent::Start(Tag::CodeBlock(kind)) => {
                in_code_block = true;
                code_buf.clear();
                code_lang = match kind {
                    CodeBlockKind::Fenced(info) => {
                        let lang = info.split_whitespace().next().unwrap_or("").to_string();
                        if lang.is_empty() { None } else { Some(lang) }
                    }
                    CodeBlockKind::Indented => None,
                };
            }
            MdEvent::End(TagEnd::CodeBlock) => {
                in_code_block = false;
                html.push_str(&highlight_code_block(&code_buf, code_lang.as_deref()));
                code_buf.clear();
                code_lang = None;
            }
            MdEvent::Text(text) if in_code_block => {
                code_buf.push_str(&text);
            }
            other => {
                pulldown_cmark::html::push_html(&mut html, std::iter::once(other));
            }
        }
    }

    sanitize(&html)
}

fn highlight_code_block(code: &str, lang: Option<&str>) -> String {
    let ss = syntax_set();
    let ts = theme_set();
    let syntax = lang
        .and_then(|l| ss.find_syntax_by_token(l))
        .unwrap_or_else(|| ss.find_syntax_plain_text());
    let theme = &ts.themes["InspiredGitHub"];
    let mut highlighter = HighlightLines::new(syntax, theme);

    let mut out = String::from("<pre><code>");
    for line in code.lines() {
        let Ok(ranges): Result<Vec<(Style, &str)>, _> = highlighter.highlight_line(line, ss)
        else {
            out.push_str(&html_escape(line));
            out.push('\n');
            continue;
        };
        match styled_line_to_highlighted_html(&ranges[..], IncludeBackground::No) {
            Ok(rendered) => {
                out.push_str(&rendered);
                out.push('\n');
            }
            Err(_) => {
                out.push_str(&html_escape(line));
                out.push('\n');
            }
        }
    }
    out.push_str("</code></pre>");
    out
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Sanitize an HTML fragment produced from agent-controlled markdown before
/// it ever reaches a browser client.
pub fn sanitize(html: &str) -> String {
    ammonia::Builder::default()
        .add_tags(["pre", "code", "span", "table", "thead", "tbody", "tr", "th", "td"])
        .add_generic_attributes(["class", "style"])
        .clean(html)
        .to_string()
}

/// Escapes raw text into a safe `<pre>` block. Used as the fallback path
/// when the hard inactivity timeout releases content that may still be an
/// unbalanced markdown structure.
pub fn escaped_pre(raw: &str) -> String {
    format!("<pre>{}</pre>", html_escape(raw))
}
