//! # HTML Module Renderer
//!
//! A single tokenizing regex walks comments, CDATA, server tags (skipped
//! verbatim), `<script>`/`<style>` elements, and ordinary tags. Attribute
//! handling is table-driven: `(tagName, attrName)` (or `("*", attrName)` as a
//! fallback) picks an [`Action`] that decides whether the attribute value is
//! a URL dependency, an inline code sub-module, or left alone.

use crate::module::{DependencyType, ModuleDependency, RewriteFormat};
use crate::text_document::{EditError, TextDocument};
use once_cell::sync::Lazy;
use regex::Regex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    PlainText,
    Url,
    UrlSet,
    Script,
    ScriptUrl,
    Style,
    StyleUrl,
    Lang,
    Rel,
}

fn action_for(tag: &str, attr: &str) -> Action {
    match (tag, attr) {
        ("img", "src") | ("source", "src") | ("a", "href") | ("iframe", "src") | ("embed", "src") => Action::Url,
        ("img", "srcset") | ("source", "srcset") => Action::UrlSet,
        ("script", "src") => Action::ScriptUrl,
        ("link", "href") => Action::StyleUrl,
        ("link", "rel") => Action::Rel,
        ("script", "lang") | ("style", "lang") => Action::Lang,
        (_, "style") => Action::Style,
        (_, "onclick") | (_, "onload") | (_, "onerror") | (_, "onchange") | (_, "onsubmit") => Action::Script,
        _ => Action::PlainText,
    }
}

#[derive(Debug, Clone)]
pub struct HtmlRendererConfig {
    /// Inline `scriptURL`/`styleURL`/`<link rel=stylesheet>` targets when resolution
    /// succeeds, rather than leaving them as external URL references.
    pub inline: bool,
    /// Recognize `<!--#include url="x"-->` server-side includes.
    pub include: bool,
}

impl Default for HtmlRendererConfig {
    fn default() -> Self {
        Self { inline: false, include: true }
    }
}

/// An inline `<script>`/`<style>` body, or a `style`/`onclick`-style inline
/// attribute value, recorded as a sub-module of the containing document.
/// The renderer only has the text and its position; `Builder::render_html`
/// is what turns these into real child `Module`s.
#[derive(Debug, Clone)]
pub struct InlineSubmodule {
    pub name: String,
    pub lang: Option<String>,
    pub source: String,
    pub parent_line: u32,
    pub parent_column: u32,
    pub mime_hint: &'static str,
}

#[derive(Debug, Clone)]
pub struct IncludeDependency {
    pub url: String,
    pub start: u32,
    pub end: u32,
}

pub struct HtmlRenderOutput {
    pub document: TextDocument,
    pub dependencies: Vec<ModuleDependency>,
    pub submodules: Vec<InlineSubmodule>,
    pub includes: Vec<IncludeDependency>,
}

// Ordering matters: the SSI include comment must be tried before the
// generic comment alternative swallows it.
static TOKEN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?xs)
        <!--\#include\s+url=(?:"(?P<inc_dq>[^"]*)"|'(?P<inc_sq>[^']*)')\s*-->
        |<!--.*?-->
        |<!\[CDATA\[.*?\]\]>
        |<[%?].*?[%?]>
        |<script\b(?P<script_attrs>[^>]*)>(?P<script_body>.*?)</script\s*>
        |<style\b(?P<style_attrs>[^>]*)>(?P<style_body>.*?)</style\s*>
        |<(?P<closing>/)?(?P<tag>[A-Za-z][\w:-]*)(?P<attrs>[^>]*?)(?P<selfclose>/)?>
        "#,
    )
    .expect("static regex is valid")
});

static ATTR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?P<name>[A-Za-z_:][-\w:.]*)\s*=\s*(?:"(?P<dq>[^"]*)"|'(?P<sq>[^']*)'|(?P<nq>[^\s"'>]+))"#)
        .expect("static regex is valid")
});

struct AttrValue<'t> {
    name: String,
    text: &'t str,
    start: u32,
    end: u32,
    quote: char,
}

fn attr_value<'t>(caps: &regex::Captures<'t>, base: u32) -> AttrValue<'t> {
    let name = caps.name("name").unwrap().as_str().to_ascii_lowercase();
    if let Some(m) = caps.name("dq") {
        AttrValue { name, text: m.as_str(), start: base + m.start() as u32 - 1, end: base + m.end() as u32 + 1, quote: '"' }
    } else if let Some(m) = caps.name("sq") {
        AttrValue { name, text: m.as_str(), start: base + m.start() as u32 - 1, end: base + m.end() as u32 + 1, quote: '\'' }
    } else {
        let m = caps.name("nq").unwrap();
        AttrValue { name, text: m.as_str(), start: base + m.start() as u32, end: base + m.end() as u32, quote: '"' }
    }
}

/// Scans backward from `local_start` over whitespace in `attrs_str` so a
/// removed attribute doesn't leave a doubled space behind.
fn widen_over_leading_whitespace(attrs_str: &str, local_start: usize) -> usize {
    let bytes = attrs_str.as_bytes();
    let mut i = local_start;
    while i > 0 && bytes[i - 1].is_ascii_whitespace() {
        i -= 1;
    }
    i
}

fn line_col(source: &str, offset: u32) -> (u32, u32) {
    let mut line = 1u32;
    let mut col = 1u32;
    for ch in source[..offset as usize].chars() {
        if ch == '\n' {
            line += 1;
            col = 1;
        } else {
            col += 1;
        }
    }
    (line, col)
}

fn register_url(
    document: &mut TextDocument,
    dependencies: &mut Vec<ModuleDependency>,
    attr: &AttrValue,
) -> Result<(), EditError> {
    let mut dep = ModuleDependency::new(DependencyType::Reference, attr.start, attr.end)
        .with_rewrite(RewriteFormat::QuotedUrl { quote: attr.quote });
    dep.source = Some(attr.text.to_string());
    let replacement = dep.rewrite.clone().unwrap().into_replacement();
    document.replace(dep.index, dep.end_index, replacement)?;
    dependencies.push(dep);
    Ok(())
}

/// `srcset="a.png 1x, b.png 2x"` — each comma-separated entry's leading URL
/// token becomes its own dependency; the width/density descriptor is left untouched.
fn register_urlset(
    document: &mut TextDocument,
    dependencies: &mut Vec<ModuleDependency>,
    attr: &AttrValue,
) -> Result<(), EditError> {
    let mut offset = 0usize;
    for entry in attr.text.split(',') {
        let leading_ws = entry.len() - entry.trim_start().len();
        let url_part = entry.trim_start().split_whitespace().next().unwrap_or("");
        if !url_part.is_empty() {
            let local_start = offset + leading_ws;
            let local_end = local_start + url_part.len();
            let start = attr.start + local_start as u32;
            let end = attr.start + local_end as u32;
            let mut dep = ModuleDependency::new(DependencyType::Reference, start, end)
                .with_rewrite(RewriteFormat::BareUrl);
            dep.source = Some(url_part.to_string());
            let replacement = dep.rewrite.clone().unwrap().into_replacement();
            document.replace(dep.index, dep.end_index, replacement)?;
            dependencies.push(dep);
        }
        offset += entry.len() + 1;
    }
    Ok(())
}

fn strip_wrapper(body: &str) -> &str {
    let trimmed = body.trim();
    if let Some(inner) = trimmed.strip_prefix("<!--").and_then(|s| s.strip_suffix("-->")) {
        return inner.trim();
    }
    if let Some(inner) = trimmed.strip_prefix("<![CDATA[").and_then(|s| s.strip_suffix("]]>")) {
        return inner.trim();
    }
    body
}

pub fn render(source: &str, config: &HtmlRendererConfig) -> Result<HtmlRenderOutput, EditError> {
    let mut document = TextDocument::new();
    let mut dependencies = Vec::new();
    let mut submodules = Vec::new();
    let mut includes = Vec::new();

    for caps in TOKEN_RE.captures_iter(source) {
        if let Some(m) = caps.name("inc_dq").or_else(|| caps.name("inc_sq")) {
            if config.include {
                let whole = caps.get(0).unwrap();
                includes.push(IncludeDependency { url: m.as_str().to_string(), start: whole.start() as u32, end: whole.end() as u32 });
            }
            continue;
        }

        if let Some(body) = caps.name("script_body") {
            let attrs_str = caps.name("script_attrs").map(|m| m.as_str()).unwrap_or("");
            let attrs_base = caps.name("script_attrs").map(|m| m.start() as u32).unwrap_or(0);
            let has_src = render_tag_attrs("script", attrs_str, attrs_base, &mut document, &mut dependencies, config.inline)?;
            if has_src && config.inline {
                if let Some(src) = take_attr(&mut document, attrs_str, attrs_base, "src")? {
                    let mut dep = ModuleDependency::new(DependencyType::Reference, body.start() as u32, body.end() as u32)
                        .with_rewrite(RewriteFormat::InlineScript);
                    dep.source = Some(src);
                    dep.inline = true;
                    let replacement = dep.rewrite.clone().unwrap().into_replacement();
                    document.replace(dep.index, dep.end_index, replacement)?;
                    dependencies.push(dep);
                }
            }
            if !has_src && !body.as_str().trim().is_empty() {
                let lang = find_attr(attrs_str, "lang").map(|s| s.to_string());
                let (line, col) = line_col(source, body.start() as u32);
                submodules.push(InlineSubmodule {
                    name: "script".to_string(),
                    lang,
                    source: strip_wrapper(body.as_str()).to_string(),
                    parent_line: line,
                    parent_column: col,
                    mime_hint: "text/javascript",
                });
            }
            continue;
        }

        if let Some(body) = caps.name("style_body") {
            let attrs_str = caps.name("style_attrs").map(|m| m.as_str()).unwrap_or("");
            let attrs_base = caps.name("style_attrs").map(|m| m.start() as u32).unwrap_or(0);
            render_tag_attrs("style", attrs_str, attrs_base, &mut document, &mut dependencies, config.inline)?;
            if !body.as_str().trim().is_empty() {
                let lang = find_attr(attrs_str, "lang").map(|s| s.to_string());
                let (line, col) = line_col(source, body.start() as u32);
                submodules.push(InlineSubmodule {
                    name: "style".to_string(),
                    lang,
                    source: strip_wrapper(body.as_str()).to_string(),
                    parent_line: line,
                    parent_column: col,
                    mime_hint: "text/css",
                });
            }
            continue;
        }

        if let Some(tag_m) = caps.name("tag") {
            if caps.name("closing").is_some() {
                continue;
            }
            let tag = tag_m.as_str().to_ascii_lowercase();
            let attrs_str = caps.name("attrs").map(|m| m.as_str()).unwrap_or("");
            let attrs_base = caps.name("attrs").map(|m| m.start() as u32).unwrap_or(0);

            let is_stylesheet_link = tag == "link" && has_rel_stylesheet(attrs_str);
            if is_stylesheet_link && config.inline {
                let tag_open = caps.get(0).expect("whole match always present");
                // `<link` -> `<style`; drop the trailing self-close slash if present.
                document.replace(tag_open.start() as u32, tag_open.start() as u32 + 5, "<style".to_string())?;
                if let Some(sc) = caps.name("selfclose") {
                    document.remove(sc.start() as u32, sc.end() as u32)?;
                }
                if let Some(rel_span) = attr_span(attrs_str, attrs_base, "rel") {
                    document.remove(rel_span.0, rel_span.1)?;
                }
                if let Some(href) = take_attr(&mut document, attrs_str, attrs_base, "href")? {
                    let at = tag_open.end() as u32;
                    let mut dep = ModuleDependency::new(DependencyType::Reference, at, at)
                        .with_rewrite(RewriteFormat::InlineStyle);
                    dep.source = Some(href);
                    dep.inline = true;
                    let replacement = dep.rewrite.clone().unwrap().into_replacement();
                    document.insert(dep.index, replacement)?;
                    dependencies.push(dep);
                }
            } else {
                render_tag_attrs(&tag, attrs_str, attrs_base, &mut document, &mut dependencies, config.inline)?;
            }

            for ac in ATTR_RE.captures_iter(attrs_str) {
                let attr = attr_value(&ac, attrs_base);
                if attr.name == "style" {
                    let (line, col) = line_col(source, tag_m.start() as u32);
                    submodules.push(InlineSubmodule {
                        name: "style".to_string(),
                        lang: None,
                        source: attr.text.to_string(),
                        parent_line: line,
                        parent_column: col,
                        mime_hint: "text/css",
                    });
                } else if action_for(&tag, &attr.name) == Action::Script {
                    let (line, col) = line_col(source, tag_m.start() as u32);
                    submodules.push(InlineSubmodule {
                        name: attr.name.clone(),
                        lang: None,
                        source: attr.text.to_string(),
                        parent_line: line,
                        parent_column: col,
                        mime_hint: "text/javascript",
                    });
                }
            }
        }
    }

    Ok(HtmlRenderOutput { document, dependencies, submodules, includes })
}

/// Applies `url`/`urlSet`/`styleURL`/`lang` handling over one tag's
/// attribute string. `scriptURL` (`<script src>`) is a no-op here when
/// `inline` is set — the caller handles it once it has the script body's
/// span to splice into. Returns whether a `src`/`href` attribute was
/// present (callers use this to decide whether an inline body is dead).
fn render_tag_attrs(
    tag: &str,
    attrs_str: &str,
    attrs_base: u32,
    document: &mut TextDocument,
    dependencies: &mut Vec<ModuleDependency>,
    inline: bool,
) -> Result<bool, EditError> {
    let mut had_url = false;
    for caps in ATTR_RE.captures_iter(attrs_str) {
        let attr = attr_value(&caps, attrs_base);
        match action_for(tag, &attr.name) {
            Action::Url | Action::StyleUrl => {
                register_url(document, dependencies, &attr)?;
                had_url = true;
            }
            Action::ScriptUrl => {
                // Splicing the resolved content in needs the `<script>` body
                // span, which only the caller has; it removes the attribute
                // and registers the inline dependency itself when `inline`.
                if !inline {
                    register_url(document, dependencies, &attr)?;
                }
                had_url = true;
            }
            Action::UrlSet => {
                register_urlset(document, dependencies, &attr)?;
            }
            Action::Lang => {
                let name_m = caps.name("name").unwrap();
                let start = attrs_base + widen_over_leading_whitespace(attrs_str, name_m.start()) as u32;
                document.remove(start, attr.end)?;
            }
            Action::PlainText | Action::Rel | Action::Script | Action::Style => {}
        }
    }
    Ok(had_url)
}

/// Finds `name` in `attrs_str` and removes its whole `name="value"` span
/// (including leading whitespace) from `document`, returning the value.
fn take_attr(
    document: &mut TextDocument,
    attrs_str: &str,
    attrs_base: u32,
    name: &str,
) -> Result<Option<String>, EditError> {
    let Some(caps) = ATTR_RE
        .captures_iter(attrs_str)
        .find(|c| c.name("name").is_some_and(|m| m.as_str().eq_ignore_ascii_case(name)))
    else {
        return Ok(None);
    };
    let attr = attr_value(&caps, attrs_base);
    let name_start = attrs_base + widen_over_leading_whitespace(attrs_str, caps.name("name").unwrap().start()) as u32;
    document.remove(name_start, attr.end)?;
    Ok(Some(attr.text.to_string()))
}

fn find_attr<'t>(attrs_str: &'t str, name: &str) -> Option<&'t str> {
    ATTR_RE.captures_iter(attrs_str).find_map(|caps| {
        if caps.name("name")?.as_str().eq_ignore_ascii_case(name) {
            Some(attr_value(&caps, 0).text)
        } else {
            None
        }
    })
}

fn has_rel_stylesheet(attrs_str: &str) -> bool {
    find_attr(attrs_str, "rel").map(|v| v.eq_ignore_ascii_case("stylesheet")).unwrap_or(false)
}

fn attr_span(attrs_str: &str, attrs_base: u32, name: &str) -> Option<(u32, u32)> {
    ATTR_RE.captures_iter(attrs_str).find_map(|caps| {
        if caps.name("name")?.as_str().eq_ignore_ascii_case(name) {
            let attr = attr_value(&caps, attrs_base);
            let name_start = attrs_base + widen_over_leading_whitespace(attrs_str, caps.name("name").unwrap().start()) as u32;
            Some((name_start, attr.end))
        } else {
            None
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::text_document::TextWriter;

    fn write(document: TextDocument, source: &str) -> String {
        let mut writer = TextWriter::new();
        document.write(source, "a.html", &mut writer);
        writer.output
    }

    #[test]
    fn img_src_registers_url_dependency() {
        let source = r#"<img src="./logo.png">"#;
        let output = render(source, &HtmlRendererConfig::default()).expect("render succeeds");
        assert_eq!(output.dependencies.len(), 1);
        assert_eq!(output.dependencies[0].source.as_deref(), Some("./logo.png"));
        output.dependencies[0].rewrite.as_ref().unwrap().resolve("/static/logo-1.png");
        let text = write(output.document, source);
        assert_eq!(text, r#"<img src="/static/logo-1.png">"#);
    }

    #[test]
    fn srcset_splits_into_independent_entries() {
        let source = r#"<img srcset="a.png 1x, b.png 2x">"#;
        let output = render(source, &HtmlRendererConfig::default()).expect("render succeeds");
        assert_eq!(output.dependencies.len(), 2);
        assert_eq!(output.dependencies[0].source.as_deref(), Some("a.png"));
        assert_eq!(output.dependencies[1].source.as_deref(), Some("b.png"));
    }

    #[test]
    fn inline_script_without_src_becomes_submodule() {
        let source = "<script>var x = 1;</script>";
        let output = render(source, &HtmlRendererConfig::default()).expect("render succeeds");
        assert_eq!(output.submodules.len(), 1);
        assert_eq!(output.submodules[0].mime_hint, "text/javascript");
        assert_eq!(output.submodules[0].source, "var x = 1;");
    }

    #[test]
    fn script_with_src_registers_dependency_and_skips_submodule() {
        let source = r#"<script src="./app.js"></script>"#;
        let output = render(source, &HtmlRendererConfig::default()).expect("render succeeds");
        assert_eq!(output.dependencies.len(), 1);
        assert!(output.submodules.is_empty());
    }

    #[test]
    fn lang_attribute_is_deleted_from_output() {
        let source = r#"<script lang="babel">var x = 1;</script>"#;
        let output = render(source, &HtmlRendererConfig::default()).expect("render succeeds");
        assert_eq!(output.submodules[0].lang.as_deref(), Some("babel"));
        let text = write(output.document, source);
        assert_eq!(text, "<script>var x = 1;</script>");
    }

    #[test]
    fn link_stylesheet_inlines_to_style_tag_when_enabled() {
        let source = r#"<link rel="stylesheet" href="./a.css">"#;
        let config = HtmlRendererConfig { inline: true, include: true };
        let output = render(source, &config).expect("render succeeds");
        assert_eq!(output.dependencies.len(), 1);
        assert!(output.dependencies[0].inline);
        output.dependencies[0].rewrite.as_ref().unwrap().resolve("body{color:red}");
        let text = write(output.document, source);
        assert_eq!(text, "<style>body{color:red}</style>");
    }

    #[test]
    fn script_src_inline_splices_resolved_content_and_escapes_nested_closing_tag() {
        let source = r#"<script src="./a.js"></script>"#;
        let config = HtmlRendererConfig { inline: true, include: true };
        let output = render(source, &config).expect("render succeeds");
        assert_eq!(output.dependencies.len(), 1);
        assert!(output.dependencies[0].inline);
        assert!(output.submodules.is_empty());
        output.dependencies[0].rewrite.as_ref().unwrap().resolve("x();</script>y");
        let text = write(output.document, source);
        assert_eq!(text, "<script>x();<\\/script>y</script>");
    }

    #[test]
    fn ssi_include_registered_when_enabled() {
        let source = r#"<!--#include url="header.html"-->"#;
        let output = render(source, &HtmlRendererConfig::default()).expect("render succeeds");
        assert_eq!(output.includes.len(), 1);
        assert_eq!(output.includes[0].url, "header.html");
    }

    #[test]
    fn ssi_include_ignored_when_disabled() {
        let source = r#"<!--#include url="header.html"-->"#;
        let config = HtmlRendererConfig { inline: false, include: false };
        let output = render(source, &config).expect("render succeeds");
        assert!(output.includes.is_empty());
    }

    #[test]
    fn style_attribute_becomes_inline_submodule() {
        let source = r#"<div style="color: red;"></div>"#;
        let output = render(source, &HtmlRendererConfig::default()).expect("render succeeds");
        assert_eq!(output.submodules.len(), 1);
        assert_eq!(output.submodules[0].mime_hint, "text/css");
        assert_eq!(output.submodules[0].source, "color: red;");
    }
}
