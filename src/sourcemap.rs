//! # Source Map Engine
//!
//! Implements the Source Map V3 specification: a builder holding a sorted
//! list of mappings per generated line, Base64-VLQ (de)serialization, a
//! binary-search reverse lookup (`getSource`), and functional composition
//! of successive pipeline stages (`applySourceMap`).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Source Map V3 structure, the on-disk/over-the-wire form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceMap {
    pub version: u8,
    pub file: Option<String>,
    #[serde(rename = "sourceRoot", skip_serializing_if = "Option::is_none")]
    pub source_root: Option<String>,
    pub sources: Vec<String>,
    #[serde(rename = "sourcesContent", skip_serializing_if = "Option::is_none")]
    pub sources_content: Option<Vec<Option<String>>>,
    pub names: Vec<String>,
    pub mappings: String,
}

impl SourceMap {
    pub fn empty() -> Self {
        Self {
            version: 3,
            file: None,
            source_root: None,
            sources: Vec::new(),
            sources_content: None,
            names: Vec::new(),
            mappings: String::new(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn to_inline_data_url(&self) -> Result<String, serde_json::Error> {
        use base64::Engine;
        let json = self.to_json()?;
        let encoded = base64::engine::general_purpose::STANDARD.encode(json);
        Ok(format!("data:application/json;charset=utf-8;base64,{encoded}"))
    }

    /// Loads a map's mappings into a fresh builder so it can be queried with
    /// `getSource` or composed via `applySourceMap`.
    pub fn into_builder(self) -> SourceMapBuilder {
        let mut builder = SourceMapBuilder::new();
        builder.file = self.file;
        builder.source_root = self.source_root;
        let source_ids: Vec<u32> = self
            .sources
            .iter()
            .map(|s| builder.add_source(s))
            .collect();
        if let Some(contents) = self.sources_content {
            for (id, content) in source_ids.iter().zip(contents.into_iter()) {
                if let Some(content) = content {
                    builder.set_source_content(*id, content);
                }
            }
        }
        let name_ids: Vec<u32> = self.names.iter().map(|n| builder.add_name(n)).collect();

        for (line_idx, line) in decode_mappings(&self.mappings).into_iter().enumerate() {
            for seg in line {
                builder.lines.entry(line_idx as u32).or_default().push(MappingSegment {
                    generated_column: seg.generated_column,
                    source_index: seg.source_index.map(|i| source_ids.get(i as usize).copied().unwrap_or(i)),
                    original_line: seg.original_line,
                    original_column: seg.original_column,
                    name_index: seg.name_index.map(|i| name_ids.get(i as usize).copied().unwrap_or(i)),
                });
            }
        }
        builder
    }
}

/// One mapping record within a generated line's sorted sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct MappingSegment {
    pub generated_column: u32,
    pub source_index: Option<u32>,
    pub original_line: Option<u32>,
    pub original_column: Option<u32>,
    pub name_index: Option<u32>,
}

/// A resolved original position returned by `getSource`.
#[derive(Debug, Clone, PartialEq)]
pub struct SourcePosition {
    pub source: String,
    pub line: u32,
    pub column: u32,
    pub name: Option<String>,
}

/// Builder accumulating mappings per generated line. This is the mutable
/// working form used while rendering; `build()` serializes it to VLQ.
#[derive(Debug, Clone)]
pub struct SourceMapBuilder {
    sources: Vec<String>,
    sources_content: HashMap<u32, String>,
    names: Vec<String>,
    lines: HashMap<u32, Vec<MappingSegment>>,
    source_lookup: HashMap<String, u32>,
    name_lookup: HashMap<String, u32>,
    file: Option<String>,
    source_root: Option<String>,
}

impl SourceMapBuilder {
    pub fn new() -> Self {
        Self {
            sources: Vec::new(),
            sources_content: HashMap::new(),
            names: Vec::new(),
            lines: HashMap::new(),
            source_lookup: HashMap::new(),
            name_lookup: HashMap::new(),
            file: None,
            source_root: None,
        }
    }

    pub fn set_file(&mut self, file: impl Into<String>) {
        self.file = Some(file.into());
    }

    pub fn add_source(&mut self, path: &str) -> u32 {
        if let Some(&idx) = self.source_lookup.get(path) {
            return idx;
        }
        let idx = self.sources.len() as u32;
        self.sources.push(path.to_string());
        self.source_lookup.insert(path.to_string(), idx);
        idx
    }

    pub fn set_source_content(&mut self, source_index: u32, content: impl Into<String>) {
        self.sources_content.insert(source_index, content.into());
    }

    pub fn add_name(&mut self, name: &str) -> u32 {
        if let Some(&idx) = self.name_lookup.get(name) {
            return idx;
        }
        let idx = self.names.len() as u32;
        self.names.push(name.to_string());
        self.name_lookup.insert(name.to_string(), idx);
        idx
    }

    /// Appends a mapping to `gen_line`'s sorted sequence (§4.1 addMapping).
    /// Callers are expected to add mappings roughly in column order; the
    /// sequence is re-sorted defensively at query/serialization time.
    pub fn add_mapping(
        &mut self,
        gen_line: u32,
        gen_column: u32,
        source: Option<&str>,
        orig_line: Option<u32>,
        orig_column: Option<u32>,
        name: Option<&str>,
    ) {
        let source_index = source.map(|s| self.add_source(s));
        let name_index = name.map(|n| self.add_name(n));
        self.lines.entry(gen_line).or_default().push(MappingSegment {
            generated_column: gen_column,
            source_index,
            original_line: orig_line,
            original_column: orig_column,
            name_index,
        });
    }

    fn sorted_line(&self, gen_line: u32) -> Vec<&MappingSegment> {
        let mut segs: Vec<&MappingSegment> = match self.lines.get(&gen_line) {
            Some(v) => v.iter().collect(),
            None => return Vec::new(),
        };
        segs.sort_by_key(|s| s.generated_column);
        segs
    }

    /// Binary search for the greatest mapping whose generated column is
    /// `<= gen_column` on `gen_line` (§4.1 getSource).
    pub fn get_source(&self, gen_line: u32, gen_column: u32) -> Option<SourcePosition> {
        let segs = self.sorted_line(gen_line);
        if segs.is_empty() {
            return None;
        }
        let idx = match segs.binary_search_by_key(&gen_column, |s| s.generated_column) {
            Ok(i) => i,
            Err(0) => return None,
            Err(i) => i - 1,
        };
        let seg = segs[idx];
        let source_index = seg.source_index?;
        let orig_line = seg.original_line?;
        let orig_column_base = seg.original_column?;
        let adjust = gen_column - seg.generated_column;
        Some(SourcePosition {
            source: self.sources[source_index as usize].clone(),
            line: orig_line,
            column: orig_column_base + adjust,
            name: seg.name_index.map(|i| self.names[i as usize].clone()),
        })
    }

    /// Functional composition: for every mapping in `self` pointing into a
    /// source matching `prev.file`, replace it with what `prev.get_source`
    /// resolves to. Mappings into other sources are left unchanged. This is
    /// the operation that makes a pipeline's maps associative (§4.1,
    /// invariant 1 in §8): composing with an absent previous stage is the
    /// identity.
    pub fn apply_source_map(&mut self, prev: &SourceMapBuilder) {
        let prev_file = match &prev.file {
            Some(f) => f.clone(),
            None => return,
        };
        let prev_index = match self.source_lookup.get(&prev_file) {
            Some(&idx) => idx,
            None => return,
        };

        // First pass: compute resolved positions without holding a mutable
        // borrow of `self.lines` alongside `self.sources`/`self.add_source`.
        let mut resolutions: Vec<(u32, usize, Option<SourcePosition>)> = Vec::new();
        for (&line, segs) in self.lines.iter() {
            for (i, seg) in segs.iter().enumerate() {
                if seg.source_index != Some(prev_index) {
                    continue;
                }
                let (Some(orig_line), Some(orig_column)) = (seg.original_line, seg.original_column) else {
                    continue;
                };
                resolutions.push((line, i, prev.get_source(orig_line, orig_column)));
            }
        }

        for (line, i, resolved) in resolutions {
            let Some(resolved) = resolved else { continue };
            let new_source_index = self.add_source(&resolved.source);
            let new_name_index = resolved.name.as_deref().map(|n| self.add_name(n));
            let seg = &mut self.lines.get_mut(&line).unwrap()[i];
            seg.source_index = Some(new_source_index);
            seg.original_line = Some(resolved.line);
            seg.original_column = Some(resolved.column);
            if let Some(ni) = new_name_index {
                seg.name_index = Some(ni);
            }
        }
    }

    pub fn build(self) -> SourceMap {
        let mappings = encode_mappings(&self.lines);
        let mut sources_content = None;
        if !self.sources_content.is_empty() {
            sources_content = Some(
                (0..self.sources.len() as u32)
                    .map(|i| self.sources_content.get(&i).cloned())
                    .collect(),
            );
        }
        SourceMap {
            version: 3,
            file: self.file,
            source_root: self.source_root,
            sources: self.sources,
            sources_content,
            names: self.names,
            mappings,
        }
    }
}

impl Default for SourceMapBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn encode_mappings(lines: &HashMap<u32, Vec<MappingSegment>>) -> String {
    let mut result = String::new();
    let max_line = lines.keys().copied().max().unwrap_or(0);

    let mut prev_source_index = 0i64;
    let mut prev_original_line = 0i64;
    let mut prev_original_column = 0i64;
    let mut prev_name_index = 0i64;

    for line in 0..=max_line {
        if line > 0 {
            result.push(';');
        }
        let mut prev_generated_column = 0i64;
        if let Some(segments) = lines.get(&line) {
            let mut sorted: Vec<&MappingSegment> = segments.iter().collect();
            sorted.sort_by_key(|s| s.generated_column);
            for (seg_idx, segment) in sorted.iter().enumerate() {
                if seg_idx > 0 {
                    result.push(',');
                }
                result.push_str(&encode_vlq(segment.generated_column as i64 - prev_generated_column));
                prev_generated_column = segment.generated_column as i64;

                if let (Some(source_idx), Some(orig_line), Some(orig_col)) =
                    (segment.source_index, segment.original_line, segment.original_column)
                {
                    result.push_str(&encode_vlq(source_idx as i64 - prev_source_index));
                    prev_source_index = source_idx as i64;
                    result.push_str(&encode_vlq(orig_line as i64 - prev_original_line));
                    prev_original_line = orig_line as i64;
                    result.push_str(&encode_vlq(orig_col as i64 - prev_original_column));
                    prev_original_column = orig_col as i64;

                    if let Some(name_idx) = segment.name_index {
                        result.push_str(&encode_vlq(name_idx as i64 - prev_name_index));
                        prev_name_index = name_idx as i64;
                    }
                }
            }
        }
    }

    result
}

/// Parses a VLQ mappings string into per-line segment lists, the inverse of
/// `encode_mappings`. Needed so `applySourceMap`/`getSource` can operate on
/// a map that was serialized and reloaded (e.g. one supplied by an external
/// compiler adapter).
pub fn decode_mappings(mappings: &str) -> Vec<Vec<MappingSegment>> {
    let mut lines = Vec::new();

    let mut prev_generated_column;
    let mut prev_source_index = 0i64;
    let mut prev_original_line = 0i64;
    let mut prev_original_column = 0i64;
    let mut prev_name_index = 0i64;

    for line_str in mappings.split(';') {
        prev_generated_column = 0;
        let mut current_line = Vec::new();
        if !line_str.is_empty() {
            for seg_str in line_str.split(',') {
                if seg_str.is_empty() {
                    continue;
                }
                let fields = decode_vlq_sequence(seg_str);
                if fields.is_empty() {
                    continue;
                }
                prev_generated_column += fields[0];
                let mut seg = MappingSegment {
                    generated_column: prev_generated_column.max(0) as u32,
                    source_index: None,
                    original_line: None,
                    original_column: None,
                    name_index: None,
                };
                if fields.len() >= 4 {
                    prev_source_index += fields[1];
                    prev_original_line += fields[2];
                    prev_original_column += fields[3];
                    seg.source_index = Some(prev_source_index.max(0) as u32);
                    seg.original_line = Some(prev_original_line.max(0) as u32);
                    seg.original_column = Some(prev_original_column.max(0) as u32);
                }
                if fields.len() >= 5 {
                    prev_name_index += fields[4];
                    seg.name_index = Some(prev_name_index.max(0) as u32);
                }
                current_line.push(seg);
            }
        }
        lines.push(current_line);
    }

    lines
}

fn decode_vlq_sequence(s: &str) -> Vec<i64> {
    let mut out = Vec::new();
    let mut chars = s.chars().peekable();
    while chars.peek().is_some() {
        let mut result: i64 = 0;
        let mut shift = 0;
        loop {
            let Some(c) = chars.next() else { break };
            let digit = decode_base64_digit(c) as i64;
            let continuation = digit & 0x20 != 0;
            result += (digit & 0x1f) << shift;
            shift += 5;
            if !continuation {
                break;
            }
        }
        let negate = result & 1 != 0;
        let value = result >> 1;
        out.push(if negate { -value } else { value });
    }
    out
}

fn encode_vlq(mut value: i64) -> String {
    let mut result = String::new();
    let sign = if value < 0 { 1 } else { 0 };
    value = value.abs();
    let mut vlq = (value << 1) | sign;

    loop {
        let mut digit = (vlq & 0x1f) as u8;
        vlq >>= 5;
        if vlq != 0 {
            digit |= 0x20;
        }
        result.push(encode_base64_digit(digit));
        if vlq == 0 {
            break;
        }
    }

    result
}

fn encode_base64_digit(value: u8) -> char {
    match value {
        0..=25 => (b'A' + value) as char,
        26..=51 => (b'a' + (value - 26)) as char,
        52..=61 => (b'0' + (value - 52)) as char,
        62 => '+',
        _ => '/',
    }
}

fn decode_base64_digit(c: char) -> u8 {
    match c {
        'A'..='Z' => c as u8 - b'A',
        'a'..='z' => c as u8 - b'a' + 26,
        '0'..='9' => c as u8 - b'0' + 52,
        '+' => 62,
        _ => 63,
    }
}
