//! # CSS Module Renderer
//!
//! Regex-driven scan for `@import url(...)` and `url(...)` references,
//! mirroring how the JS renderer treats `require(...)`: each match becomes a
//! dependency with a deferred rewrite, quoted with whichever delimiter (or
//! none) the original used.

use crate::module::{DependencyType, ModuleDependency, RewriteFormat};
use crate::text_document::{EditError, TextDocument};
use once_cell::sync::Lazy;
use regex::Regex;

/// `import` config: register `@import url(...)` as a `staticImport` (`true`),
/// as a plain `reference` (`"url"`), or ignore it entirely (`false`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ImportMode {
    StaticImport,
    Reference,
    Off,
}

#[derive(Debug, Clone)]
pub struct CssRendererConfig {
    pub import: ImportMode,
    pub url: bool,
}

impl Default for CssRendererConfig {
    fn default() -> Self {
        Self { import: ImportMode::StaticImport, url: true }
    }
}

pub struct CssRenderOutput {
    pub document: TextDocument,
    pub dependencies: Vec<ModuleDependency>,
}

// One pass finds `@import url(...)`/`@import "..."` and bare `url(...)`. The
// `regex` crate has no backreferences, so each quote style gets its own
// named group instead of matching the opening quote against the close.
static REFERENCE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?x)
        (?P<at_import>@import\s+)?
        url\(\s*
            (?:
                "(?P<dq>[^"]*)"
                |'(?P<sq>[^']*)'
                |(?P<nq>[^'"\)\s][^'")]*)
            )
        \s*\)
        |
        (?P<at_import_bare>@import\s+)
            (?:"(?P<bdq>[^"]*)"|'(?P<bsq>[^']*)')
        "#,
    )
    .expect("static regex is valid")
});

/// One matched url reference: the decoded text, the byte range the
/// dependency's rewrite must replace (widened to include the surrounding
/// quote characters so a quoted rewrite doesn't double them up), and the
/// quote character to re-wrap the resolved id with.
struct MatchedUrl<'t> {
    text: &'t str,
    start: u32,
    end: u32,
    quote: char,
}

fn matched_url<'t>(caps: &regex::Captures<'t>) -> MatchedUrl<'t> {
    let widen = |m: regex::Match<'t>, quote: char| MatchedUrl {
        text: m.as_str(),
        start: m.start() as u32 - 1,
        end: m.end() as u32 + 1,
        quote,
    };
    if let Some(m) = caps.name("dq") {
        widen(m, '"')
    } else if let Some(m) = caps.name("sq") {
        widen(m, '\'')
    } else if let Some(m) = caps.name("nq") {
        // Original had no quotes at all; the rewritten url() is always
        // quoted since the resolved id isn't guaranteed to be bare-safe.
        MatchedUrl { text: m.as_str(), start: m.start() as u32, end: m.end() as u32, quote: '"' }
    } else if let Some(m) = caps.name("bdq") {
        widen(m, '"')
    } else {
        widen(caps.name("bsq").expect("one alternative always matches"), '\'')
    }
}

pub fn render(source: &str, config: &CssRendererConfig) -> Result<CssRenderOutput, EditError> {
    let mut document = TextDocument::new();
    let mut dependencies = Vec::new();

    for caps in REFERENCE_RE.captures_iter(source) {
        let is_import = caps.name("at_import").is_some() || caps.name("at_import_bare").is_some();
        let url = matched_url(&caps);

        let kind = if is_import {
            if config.import == ImportMode::Off {
                continue;
            }
            if config.import == ImportMode::StaticImport { DependencyType::StaticImport } else { DependencyType::Reference }
        } else {
            if !config.url {
                continue;
            }
            DependencyType::Reference
        };

        let mut dep = ModuleDependency::new(kind, url.start, url.end)
            .with_rewrite(RewriteFormat::QuotedUrl { quote: url.quote });
        dep.source = Some(url.text.to_string());
        let replacement = dep.rewrite.clone().unwrap().into_replacement();
        document.replace(dep.index, dep.end_index, replacement)?;
        dependencies.push(dep);
    }

    Ok(CssRenderOutput { document, dependencies })
}
