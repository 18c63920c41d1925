//! # Path & Text Utilities
//!
//! Small, dependency-free helpers shared by every other component: path
//! joining/relativizing for module specifiers, a byte-offset to line/column
//! mapper, and the quoting/decoding rules the JS, CSS, and HTML renderers
//! need for string literals and attribute values.

use std::path::{Component, Path, PathBuf};

/// Joins a relative specifier onto a referrer's directory, collapsing `.`
/// and `..` components the way a resolver needs (no filesystem access).
pub fn join(base_dir: &Path, specifier: &str) -> PathBuf {
    let mut parts: Vec<Component> = base_dir.components().collect();
    for piece in Path::new(specifier).components() {
        match piece {
            Component::CurDir => {}
            Component::ParentDir => {
                if matches!(parts.last(), Some(Component::Normal(_))) {
                    parts.pop();
                } else {
                    parts.push(piece);
                }
            }
            other => parts.push(other),
        }
    }
    parts.iter().collect()
}

/// Renders `path` relative to `base_dir` using forward slashes, the way
/// specifiers are written back into rewritten source text.
pub fn relativize(base_dir: &Path, path: &Path) -> String {
    let base: Vec<_> = base_dir.components().collect();
    let target: Vec<_> = path.components().collect();
    let common = base.iter().zip(target.iter()).take_while(|(a, b)| a == b).count();

    let mut out = Vec::new();
    for _ in common..base.len() {
        out.push("..".to_string());
    }
    for comp in &target[common..] {
        out.push(comp.as_os_str().to_string_lossy().into_owned());
    }

    if out.is_empty() {
        ".".to_string()
    } else {
        let joined = out.join("/");
        if joined.starts_with("..") {
            joined
        } else {
            format!("./{joined}")
        }
    }
}

/// A line/column mapper built once per source string, used for remapping
/// byte offsets recorded during parsing and editing (§7 log remapping).
#[derive(Debug, Clone)]
pub struct LineIndex {
    /// Byte offset of the start of each line (0-based lines).
    line_starts: Vec<u32>,
}

impl LineIndex {
    pub fn new(source: &str) -> Self {
        let mut line_starts = vec![0u32];
        for (i, b) in source.bytes().enumerate() {
            if b == b'\n' {
                line_starts.push((i + 1) as u32);
            }
        }
        Self { line_starts }
    }

    /// Returns the 1-based `(line, column)` for a byte offset, matching the
    /// convention used by the module's existing error positions.
    pub fn line_column(&self, offset: u32) -> (u32, u32) {
        let line_idx = match self.line_starts.binary_search(&offset) {
            Ok(i) => i,
            Err(i) => i.saturating_sub(1),
        };
        let line_start = self.line_starts[line_idx];
        (line_idx as u32 + 1, offset - line_start + 1)
    }

    pub fn line_count(&self) -> u32 {
        self.line_starts.len() as u32
    }
}

/// Quote style captured from source so rewrites can preserve it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuoteStyle {
    Single,
    Double,
    None,
}

impl QuoteStyle {
    pub fn char(self) -> Option<char> {
        match self {
            QuoteStyle::Single => Some('\''),
            QuoteStyle::Double => Some('"'),
            QuoteStyle::None => None,
        }
    }

    pub fn from_char(c: char) -> Self {
        match c {
            '\'' => QuoteStyle::Single,
            '"' => QuoteStyle::Double,
            _ => QuoteStyle::None,
        }
    }

    /// Quotes `content`, escaping the chosen delimiter and backslashes.
    pub fn quote(self, content: &str) -> String {
        let q = self.char().unwrap_or('"');
        let mut out = String::with_capacity(content.len() + 2);
        out.push(q);
        for c in content.chars() {
            if c == q || c == '\\' {
                out.push('\\');
            }
            out.push(c);
        }
        out.push(q);
        out
    }
}

/// Quotes a JS string literal, preferring double quotes unless the content
/// contains more doubles than singles (mirrors common minifier heuristics).
pub fn quote_js_string(content: &str) -> String {
    let doubles = content.matches('"').count();
    let singles = content.matches('\'').count();
    let style = if doubles > singles { QuoteStyle::Single } else { QuoteStyle::Double };
    style.quote(content)
}

/// Encodes arbitrary bytes as a `data:` URI, used when inlining binary
/// dependencies that have no textual representation (§4.7 bundler body
/// rule for non-text MIME types, §4.5 HTML inline-with-no-text-source).
pub fn data_uri(mime: &str, bytes: &[u8]) -> String {
    use base64::Engine;
    let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
    format!("data:{mime};base64,{encoded}")
}

/// Decodes a minimal set of HTML entities found in attribute values
/// (`&amp; &lt; &gt; &quot; &#39;`), the set the HTML renderer needs when
/// reading `url`/`urlSet` attribute contents before resolving them.
pub fn decode_html_entities(input: &str) -> String {
    input
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
}
