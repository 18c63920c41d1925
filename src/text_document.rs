//! # TextDocument / TextWriter
//!
//! `TextDocument` holds an ordered, non-overlapping edit log over an
//! immutable source string. Replacements may be deferred closures resolved
//! only when the document is finally written, because some rewrites (a
//! `require(...)` argument, a CSS `url(...)`) depend on resolution results
//! computed after parsing. `TextWriter` is the append-only sink the
//! document plays its edits into, accumulating a `SourceMapBuilder`
//! alongside the text as it goes.

use crate::path_text::LineIndex;
use crate::sourcemap::SourceMapBuilder;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EditError {
    #[error("overlapping edit: [{a_start},{a_end}) overlaps existing [{b_start},{b_end})")]
    Overlapping {
        a_start: u32,
        a_end: u32,
        b_start: u32,
        b_end: u32,
    },
}

/// Either a literal replacement string, or a callback resolved at write
/// time (§3 TextDocument edit: `replacement` is literal or deferred).
pub enum Replacement {
    Literal(String),
    Deferred(Box<dyn FnOnce() -> String + Send>),
}

impl From<String> for Replacement {
    fn from(s: String) -> Self {
        Replacement::Literal(s)
    }
}

impl From<&str> for Replacement {
    fn from(s: &str) -> Self {
        Replacement::Literal(s.to_string())
    }
}

struct Edit {
    start: u32,
    end: u32,
    replacement: Replacement,
}

/// An ordered edit log over a source string identified by `source_path`,
/// used both to resolve line/column mappings while writing.
pub struct TextDocument {
    edits: Vec<Edit>,
}

impl TextDocument {
    pub fn new() -> Self {
        Self { edits: Vec::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.edits.is_empty()
    }

    pub fn insert(&mut self, at: u32, replacement: impl Into<Replacement>) -> Result<(), EditError> {
        self.push_edit(at, at, replacement.into())
    }

    pub fn remove(&mut self, start: u32, end: u32) -> Result<(), EditError> {
        self.push_edit(start, end, Replacement::Literal(String::new()))
    }

    pub fn replace(&mut self, start: u32, end: u32, replacement: impl Into<Replacement>) -> Result<(), EditError> {
        self.push_edit(start, end, replacement.into())
    }

    pub fn append(&mut self, source_len: u32, replacement: impl Into<Replacement>) -> Result<(), EditError> {
        self.push_edit(source_len, source_len, replacement.into())
    }

    fn push_edit(&mut self, start: u32, end: u32, replacement: Replacement) -> Result<(), EditError> {
        for existing in &self.edits {
            let strictly_overlaps = start < existing.end && existing.start < end && start != end && existing.start != existing.end;
            if strictly_overlaps {
                return Err(EditError::Overlapping {
                    a_start: start,
                    a_end: end,
                    b_start: existing.start,
                    b_end: existing.end,
                });
            }
        }
        self.edits.push(Edit { start, end, replacement });
        Ok(())
    }

    /// Consumes the document, playing its edits (sorted by start, closures
    /// resolved now) into `writer` against `source`.
    pub fn write(self, source: &str, source_path: &str, writer: &mut TextWriter) {
        let line_index = LineIndex::new(source);
        let mut edits = self.edits;
        edits.sort_by_key(|e| e.start);

        let mut cursor = 0u32;
        for edit in edits {
            if edit.start > cursor {
                let slice = &source[cursor as usize..edit.start as usize];
                writer.write_mapped(slice, cursor, &line_index, source_path);
            }
            let text = match edit.replacement {
                Replacement::Literal(s) => s,
                Replacement::Deferred(f) => f(),
            };
            writer.write_str(&text);
            cursor = edit.end.max(cursor);
        }
        if (cursor as usize) < source.len() {
            let slice = &source[cursor as usize..];
            writer.write_mapped(slice, cursor, &line_index, source_path);
        }
    }
}

impl Default for TextDocument {
    fn default() -> Self {
        Self::new()
    }
}

/// Append-only sink accumulating generated text plus a `SourceMapBuilder`.
pub struct TextWriter {
    pub output: String,
    pub source_map: SourceMapBuilder,
    gen_line: u32,
    gen_column: u32,
}

impl TextWriter {
    pub fn new() -> Self {
        Self {
            output: String::new(),
            source_map: SourceMapBuilder::new(),
            gen_line: 0,
            gen_column: 0,
        }
    }

    pub fn write_str(&mut self, s: &str) {
        for line in split_keep_newlines(s) {
            self.output.push_str(line);
            if line.ends_with('\n') {
                self.gen_line += 1;
                self.gen_column = 0;
            } else {
                self.gen_column += line.chars().count() as u32;
            }
        }
    }

    pub fn add_mapping(&mut self, source: &str, orig_line: u32, orig_column: u32) {
        self.source_map
            .add_mapping(self.gen_line, self.gen_column, Some(source), Some(orig_line), Some(orig_column), None);
    }

    /// Writes an unchanged slice of original source, forwarding a mapping
    /// at the start of every physical line within it (§4.2: at least one
    /// mapping per original line so downstream tools can resolve any
    /// reported generated line back to source).
    fn write_mapped(&mut self, slice: &str, slice_start: u32, line_index: &LineIndex, source_path: &str) {
        let mut offset = slice_start;
        let mut first = true;
        for line in split_keep_newlines(slice) {
            if first || !line.trim().is_empty() {
                let (orig_line, orig_col) = line_index.line_column(offset);
                self.add_mapping(source_path, orig_line - 1, orig_col - 1);
            }
            self.write_str(line);
            offset += line.len() as u32;
            first = false;
        }
    }
}

impl Default for TextWriter {
    fn default() -> Self {
        Self::new()
    }
}

fn split_keep_newlines(s: &str) -> impl Iterator<Item = &str> {
    let mut rest = s;
    std::iter::from_fn(move || {
        if rest.is_empty() {
            return None;
        }
        match rest.find('\n') {
            Some(idx) => {
                let (line, tail) = rest.split_at(idx + 1);
                rest = tail;
                Some(line)
            }
            None => {
                let line = rest;
                rest = "";
                Some(line)
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_replace_rewrites_range() {
        let mut doc = TextDocument::new();
        let source = "require(\"./util\")";
        doc.replace(8, 17, "\"5\"").unwrap();
        let mut writer = TextWriter::new();
        doc.write(source, "a.js", &mut writer);
        assert_eq!(writer.output, "require(\"5\")");
    }

    #[test]
    fn deferred_replacement_resolved_at_write_time() {
        let mut doc = TextDocument::new();
        let source = "require(\"./util\")";
        doc.replace(
            8,
            17,
            Replacement::Deferred(Box::new(|| "\"5\"".to_string())),
        )
        .unwrap();
        let mut writer = TextWriter::new();
        doc.write(source, "a.js", &mut writer);
        assert_eq!(writer.output, "require(\"5\")");
    }

    #[test]
    fn overlapping_edits_rejected() {
        let mut doc = TextDocument::new();
        doc.replace(0, 10, "x").unwrap();
        let err = doc.replace(5, 15, "y");
        assert!(err.is_err());
    }

    #[test]
    fn adjacent_edits_are_not_overlapping() {
        let mut doc = TextDocument::new();
        doc.replace(0, 5, "a").unwrap();
        assert!(doc.replace(5, 10, "b").is_ok());
    }

    #[test]
    fn append_adds_after_source_end() {
        let mut doc = TextDocument::new();
        let source = "a();";
        doc.append(source.len() as u32, ";b();").unwrap();
        let mut writer = TextWriter::new();
        doc.write(source, "a.js", &mut writer);
        assert_eq!(writer.output, "a();;b();");
    }

    #[test]
    fn removal_elides_range() {
        let mut doc = TextDocument::new();
        let source = "@import url(\"a.css\");\nbody{}";
        doc.remove(0, 23).unwrap();
        let mut writer = TextWriter::new();
        doc.write(source, "a.css", &mut writer);
        assert_eq!(writer.output, "body{}");
    }

    #[test]
    fn write_emits_mapping_for_each_line() {
        let mut doc = TextDocument::new();
        let source = "a;\nb;\nc;";
        let mut writer = TextWriter::new();
        doc.write(source, "a.js", &mut writer);
        assert_eq!(writer.output, source);
        let l0 = writer.source_map.get_source(0, 0).unwrap();
        assert_eq!((l0.line, l0.column), (0, 0));
        let l2 = writer.source_map.get_source(2, 0).unwrap();
        assert_eq!((l2.line, l2.column), (2, 0));
    }
}
