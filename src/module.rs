//! # Module Data Model
//!
//! The in-memory representation of one source or generated artifact: path
//! identity, lazily-produced content, dependency list, accumulated logs,
//! and the small state machine the Builder drives it through.

use crate::sourcemap::SourceMapBuilder;
use crate::text_document::TextDocument;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// How a dependency's resolved id gets turned into replacement text once
/// linking fills in `RewriteSpec::resolved_id` (§4.3 "the argument's range is
/// later replaced by the resolved module's id (deferred closure)", §4.4/§4.5
/// analogues for CSS/HTML urls).
#[derive(Debug, Clone)]
pub enum RewriteFormat {
    /// JS `require("x")` argument -> `"<id>"`.
    QuotedId,
    /// JS free `process` prelude, inserted at byte 0.
    ProcessPrelude,
    /// CSS/HTML URL, quoted with the original delimiter (or none).
    QuotedUrl { quote: char },
    /// HTML `srcset` entry: the resolved id splices in bare, since the
    /// surrounding attribute value supplies the quoting.
    BareUrl,
    /// `<script src>` inlined per §4.5: the resolved content (not a path)
    /// splices between `<script>`/`</script>`, with any nested `</script`
    /// escaped so it can't terminate the tag early.
    InlineScript,
    /// `<link rel=stylesheet href>` inlined per §4.5: the resolved content
    /// splices in with a synthesized `</style>` suffix, since `<link>` has
    /// no body in source to hold it.
    InlineStyle,
}

static CLOSE_SCRIPT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)</script").unwrap());
static CLOSE_STYLE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)</style").unwrap());

/// A deferred rewrite a renderer registers alongside a dependency: linking
/// fills `resolved_id` once the dependency resolves; the `TextDocument`
/// closure created at render time reads it back when the document is
/// finally written.
#[derive(Debug, Clone)]
pub struct RewriteSpec {
    pub format: RewriteFormat,
    pub resolved_id: Arc<Mutex<Option<String>>>,
}

impl RewriteSpec {
    pub fn new(format: RewriteFormat) -> Self {
        Self { format, resolved_id: Arc::new(Mutex::new(None)) }
    }

    pub fn resolve(&self, id: impl Into<String>) {
        *self.resolved_id.lock().unwrap() = Some(id.into());
    }

    /// Builds the closure a renderer hands to `TextDocument::insert`/`replace`.
    pub fn into_replacement(self) -> crate::text_document::Replacement {
        crate::text_document::Replacement::Deferred(Box::new(move || {
            let id = self.resolved_id.lock().unwrap().clone().unwrap_or_default();
            match self.format {
                RewriteFormat::QuotedId => format!("\"{id}\""),
                RewriteFormat::ProcessPrelude => format!("var process = require(\"{id}\");\n"),
                RewriteFormat::QuotedUrl { quote } => format!("{quote}{id}{quote}"),
                RewriteFormat::BareUrl => id,
                RewriteFormat::InlineScript => CLOSE_SCRIPT_RE.replace_all(&id, "<\\/script").into_owned(),
                RewriteFormat::InlineStyle => {
                    format!("{}</style>", CLOSE_STYLE_RE.replace_all(&id, "<\\/style"))
                }
            }
        }))
    }
}

/// Monotonic state a module moves through. Bit 0 marks phase completion,
/// matching the spec's `(state & 1) == 1` rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleState {
    Initial = 0,
    Loading = 2,
    Loaded = 1,
    Emitting = 4,
    Emitted = 5,
    Deleted = 6,
}

impl ModuleState {
    pub fn is_complete_phase(self) -> bool {
        (self as u8) & 1 == 1
    }
}

#[derive(Debug, Error)]
pub enum ModuleError {
    #[error("overlapping edit in module {path}: [{a_start},{a_end}) overlaps [{b_start},{b_end})")]
    OverlappingEdit {
        path: String,
        a_start: u32,
        a_end: u32,
        b_start: u32,
        b_end: u32,
    },
    #[error("data read before being set on module {path}")]
    DataUnavailable { path: String },
    #[error("invalid submodule path {path:?}: child name must not contain '|'")]
    InvalidSubmodulePath { path: String },
    #[error("module {path} already has a dependency at byte range [{start},{end})")]
    DuplicateDependency { path: String, start: u32, end: u32 },
}

pub type ModuleResult<T> = Result<T, ModuleError>;

/// One of the three mutually-exclusive content representations a module may
/// hold, plus the "not yet set" state (§3 invariant: exactly one of text,
/// buffer, generator, absent).
pub enum ModuleData {
    Empty,
    Text(String),
    Bytes(Vec<u8>),
    Pending(Box<dyn FnOnce(&Module) -> (ModuleData, Option<SourceMapBuilder>) + Send>),
}

impl std::fmt::Debug for ModuleData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModuleData::Empty => write!(f, "ModuleData::Empty"),
            ModuleData::Text(s) => write!(f, "ModuleData::Text({} bytes)", s.len()),
            ModuleData::Bytes(b) => write!(f, "ModuleData::Bytes({} bytes)", b.len()),
            ModuleData::Pending(_) => write!(f, "ModuleData::Pending(..)"),
        }
    }
}

/// The kind of reference a `ModuleDependency` represents (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyType {
    External,
    ExternalList,
    Reference,
    StaticImport,
    DynamicImport,
}

/// One dependency discovered while rendering a module.
#[derive(Debug, Clone)]
pub struct ModuleDependency {
    pub source: Option<String>,
    pub kind: DependencyType,
    pub url: Option<String>,
    /// Byte offset range in the module's original content this dependency
    /// was discovered at; used both for the deferred rewrite and for log
    /// remapping.
    pub index: u32,
    pub end_index: u32,
    pub path: Option<String>,
    pub module: Option<ModuleId>,
    pub inline: bool,
    pub circular: bool,
    pub detail: Option<String>,
    pub rewrite: Option<RewriteSpec>,
}

impl ModuleDependency {
    pub fn new(kind: DependencyType, index: u32, end_index: u32) -> Self {
        Self {
            source: None,
            kind,
            url: None,
            index,
            end_index,
            path: None,
            module: None,
            inline: false,
            circular: false,
            detail: None,
            rewrite: None,
        }
    }

    pub fn with_rewrite(mut self, format: RewriteFormat) -> Self {
        self.rewrite = Some(RewriteSpec::new(format));
        self
    }
}

/// Severity of a `LogEntry`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warning,
    Info,
}

/// One accumulated diagnostic on a module (§7: per-module errors never
/// abort the build, they accumulate here).
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
    pub line: Option<u32>,
    pub column: Option<u32>,
    pub processor_name: Option<String>,
}

/// Arena index identifying a module within a `Graph` (§9 design notes:
/// "represent modules as indices into an arena").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId(pub u32);

/// Parsed submodule identity: the `"parent|child"` convention modeled as a
/// dedicated pair rather than a raw string (§9 design notes).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmodulePath {
    pub parent: String,
    pub child: String,
}

impl SubmodulePath {
    pub fn parse(original_path: &str) -> Option<ModuleResult<Self>> {
        let (parent, child) = original_path.split_once('|')?;
        if child.contains('|') {
            return Some(Err(ModuleError::InvalidSubmodulePath {
                path: original_path.to_string(),
            }));
        }
        Some(Ok(SubmodulePath {
            parent: parent.to_string(),
            child: child.to_string(),
        }))
    }

    pub fn render(&self) -> String {
        format!("{}|{}", self.parent, self.child)
    }
}

pub struct Module {
    pub id: ModuleId,
    pub original_path: String,
    pub path: String,
    pub is_entry_module: bool,
    pub state: ModuleState,
    pub mime_type: String,
    data: ModuleData,
    cached_text: Option<String>,
    pub source_map: bool,
    pub source_map_data: Option<SourceMapBuilder>,
    pub dependencies: Vec<ModuleDependency>,
    pub logs: Vec<LogEntry>,
    pub generated_modules: Vec<ModuleId>,
    pub original_module: Option<ModuleId>,
    pub parent_line: Option<u32>,
    pub parent_column: Option<u32>,
    pub props: HashMap<String, String>,
    pub hash: Option<String>,
    pub no_write: bool,
    pub no_cache: bool,
    pub update_type: Option<String>,
    pub edits: Option<TextDocument>,
    pub processor_name: Option<String>,
}

impl std::fmt::Debug for Module {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Module")
            .field("id", &self.id)
            .field("original_path", &self.original_path)
            .field("path", &self.path)
            .field("state", &self.state)
            .field("mime_type", &self.mime_type)
            .field("dependencies", &self.dependencies.len())
            .finish()
    }
}

impl Module {
    pub fn new(id: ModuleId, original_path: impl Into<String>, mime_type: impl Into<String>, is_entry_module: bool) -> Self {
        let original_path = original_path.into();
        let path = original_path.clone();
        Self {
            id,
            original_path,
            path,
            is_entry_module,
            state: ModuleState::Initial,
            mime_type: mime_type.into(),
            data: ModuleData::Empty,
            cached_text: None,
            source_map: false,
            source_map_data: None,
            dependencies: Vec::new(),
            logs: Vec::new(),
            generated_modules: Vec::new(),
            original_module: None,
            parent_line: None,
            parent_column: None,
            props: HashMap::new(),
            hash: None,
            no_write: false,
            no_cache: false,
            update_type: None,
            edits: None,
            processor_name: None,
        }
    }

    pub fn submodule_path(&self) -> Option<SubmodulePath> {
        SubmodulePath::parse(&self.original_path).and_then(Result::ok)
    }

    pub fn set_text(&mut self, text: impl Into<String>) {
        self.data = ModuleData::Text(text.into());
        self.cached_text = None;
    }

    pub fn set_bytes(&mut self, bytes: Vec<u8>) {
        self.data = ModuleData::Bytes(bytes);
        self.cached_text = None;
    }

    /// Reads the module's text content, resolving and caching a deferred
    /// generator exactly once (§3: "triggers generation exactly once and
    /// caches the result").
    pub fn content(&mut self) -> ModuleResult<&str> {
        if self.cached_text.is_none() {
            let data = std::mem::replace(&mut self.data, ModuleData::Empty);
            let resolved = match data {
                ModuleData::Text(s) => s,
                ModuleData::Bytes(_) => {
                    return Err(ModuleError::DataUnavailable { path: self.original_path.clone() });
                }
                ModuleData::Pending(generate) => {
                    let (generated, map) = generate(self);
                    if let Some(map) = map {
                        self.source_map_data = Some(map);
                    }
                    match generated {
                        ModuleData::Text(s) => s,
                        _ => return Err(ModuleError::DataUnavailable { path: self.original_path.clone() }),
                    }
                }
                ModuleData::Empty => {
                    return Err(ModuleError::DataUnavailable { path: self.original_path.clone() });
                }
            };
            self.data = ModuleData::Text(resolved.clone());
            self.cached_text = Some(resolved);
        }
        Ok(self.cached_text.as_deref().expect("just populated above"))
    }

    pub fn add_dependency(&mut self, dep: ModuleDependency) -> ModuleResult<usize> {
        if self
            .dependencies
            .iter()
            .any(|d| d.index == dep.index && d.end_index == dep.end_index)
        {
            return Err(ModuleError::DuplicateDependency {
                path: self.original_path.clone(),
                start: dep.index,
                end: dep.end_index,
            });
        }
        self.dependencies.push(dep);
        Ok(self.dependencies.len() - 1)
    }

    pub fn log(&mut self, level: LogLevel, message: impl Into<String>) {
        self.logs.push(LogEntry {
            level,
            message: message.into(),
            line: None,
            column: None,
            processor_name: self.processor_name.clone(),
        });
    }

    pub fn log_at(&mut self, level: LogLevel, message: impl Into<String>, line: u32, column: u32) {
        self.logs.push(LogEntry {
            level,
            message: message.into(),
            line: Some(line),
            column: Some(column),
            processor_name: self.processor_name.clone(),
        });
    }

    pub fn has_errors(&self) -> bool {
        self.logs.iter().any(|l| l.level == LogLevel::Error)
    }

    /// Rewinds the module to `initial` or `loaded`, clearing mutable data
    /// without releasing its identity (§4.9, used by the external watcher).
    pub fn reset(&mut self, to: ModuleState) {
        debug_assert!(matches!(to, ModuleState::Initial | ModuleState::Loaded));
        self.state = to;
        self.data = ModuleData::Empty;
        self.cached_text = None;
        self.dependencies.clear();
        self.logs.clear();
        self.edits = None;
        self.hash = None;
        self.source_map_data = None;
    }
}

/// One generated output, the final artifact the Builder hands back (§6).
#[derive(Debug, Clone)]
pub struct GeneratedModule {
    pub original_module: ModuleId,
    pub path: String,
    pub content: GeneratedContent,
    pub size: usize,
    pub hash: String,
    pub md5: String,
    pub sha1: String,
    pub mime_type: String,
    pub logs: Vec<LogEntry>,
    pub no_write: bool,
    pub source_map: Option<crate::sourcemap::SourceMap>,
}

#[derive(Debug, Clone)]
pub enum GeneratedContent {
    Text(String),
    Bytes(Vec<u8>),
}

/// An ordered, de-duplicated set of modules emitted as one output (§3).
#[derive(Debug, Clone)]
pub struct Bundle {
    pub id: String,
    pub entry_module: Option<ModuleId>,
    pub modules: Vec<ModuleId>,
    module_set: std::collections::HashSet<ModuleId>,
    pub parent_bundles: Vec<String>,
    pub kind: BundleType,
    pub creating: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BundleType {
    Static,
    Dynamic,
    StaticOrDynamic,
}

impl Bundle {
    pub fn new(id: impl Into<String>, entry_module: Option<ModuleId>, kind: BundleType) -> Self {
        Self {
            id: id.into(),
            entry_module,
            modules: Vec::new(),
            module_set: std::collections::HashSet::new(),
            parent_bundles: Vec::new(),
            kind,
            creating: false,
        }
    }

    /// Adds `module_id` if absent, returning whether it was newly added.
    pub fn add(&mut self, module_id: ModuleId) -> bool {
        if self.module_set.insert(module_id) {
            self.modules.push(module_id);
            true
        } else {
            false
        }
    }

    pub fn contains(&self, module_id: ModuleId) -> bool {
        self.module_set.contains(&module_id)
    }

    pub fn remove(&mut self, module_id: ModuleId) -> bool {
        if self.module_set.remove(&module_id) {
            self.modules.retain(|m| *m != module_id);
            true
        } else {
            false
        }
    }

    pub fn max_parents(&self, max_initial_requests: usize, max_async_requests: usize) -> usize {
        match self.kind {
            BundleType::Dynamic => max_async_requests,
            _ => max_initial_requests,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inline_script_rewrite_escapes_nested_closing_tag() {
        let rewrite = RewriteSpec::new(RewriteFormat::InlineScript);
        rewrite.resolve("alert(1);</script><script>evil()");
        let replacement = rewrite.into_replacement();
        let text = match replacement {
            crate::text_document::Replacement::Deferred(f) => f(),
            _ => panic!("expected a deferred replacement"),
        };
        assert_eq!(text, "alert(1);<\\/script><script>evil()");
    }

    #[test]
    fn inline_style_rewrite_appends_closing_tag_and_escapes_nested_one() {
        let rewrite = RewriteSpec::new(RewriteFormat::InlineStyle);
        rewrite.resolve("body{}</style>");
        let replacement = rewrite.into_replacement();
        let text = match replacement {
            crate::text_document::Replacement::Deferred(f) => f(),
            _ => panic!("expected a deferred replacement"),
        };
        assert_eq!(text, "body{}<\\/style></style>");
    }

    #[test]
    fn module_state_completion_bit() {
        assert!(ModuleState::Loaded.is_complete_phase());
        assert!(ModuleState::Emitted.is_complete_phase());
        assert!(!ModuleState::Initial.is_complete_phase());
        assert!(!ModuleState::Loading.is_complete_phase());
    }

    #[test]
    fn submodule_path_parses_parent_and_child() {
        let parsed = SubmodulePath::parse("index.html|inline-script-0").unwrap().unwrap();
        assert_eq!(parsed.parent, "index.html");
        assert_eq!(parsed.child, "inline-script-0");
        assert_eq!(parsed.render(), "index.html|inline-script-0");
    }

    #[test]
    fn submodule_path_rejects_pipe_in_child() {
        let err = SubmodulePath::parse("a|b|c").unwrap();
        assert!(err.is_err());
    }

    #[test]
    fn submodule_path_none_for_plain_path() {
        assert!(SubmodulePath::parse("index.html").is_none());
    }

    #[test]
    fn content_caches_pending_generator_result() {
        let mut module = Module::new(ModuleId(0), "a.js", "text/javascript", true);
        module.data = ModuleData::Pending(Box::new(|_m| (ModuleData::Text("generated".into()), None)));
        assert_eq!(module.content().unwrap(), "generated");
        assert_eq!(module.content().unwrap(), "generated");
    }

    #[test]
    fn duplicate_dependency_rejected() {
        let mut module = Module::new(ModuleId(0), "a.js", "text/javascript", true);
        module.add_dependency(ModuleDependency::new(DependencyType::StaticImport, 5, 10)).unwrap();
        let err = module.add_dependency(ModuleDependency::new(DependencyType::StaticImport, 5, 10));
        assert!(err.is_err());
    }

    #[test]
    fn reset_clears_mutable_fields_but_keeps_identity() {
        let mut module = Module::new(ModuleId(3), "a.js", "text/javascript", false);
        module.set_text("content");
        module.log(LogLevel::Error, "boom");
        module.add_dependency(ModuleDependency::new(DependencyType::StaticImport, 0, 1)).unwrap();
        module.reset(ModuleState::Initial);
        assert_eq!(module.id, ModuleId(3));
        assert_eq!(module.original_path, "a.js");
        assert!(module.logs.is_empty());
        assert!(module.dependencies.is_empty());
        assert!(matches!(module.state, ModuleState::Initial));
    }

    #[test]
    fn bundle_deduplicates_modules() {
        let mut bundle = Bundle::new("main", Some(ModuleId(0)), BundleType::Static);
        assert!(bundle.add(ModuleId(1)));
        assert!(!bundle.add(ModuleId(1)));
        assert_eq!(bundle.modules.len(), 1);
        assert!(bundle.contains(ModuleId(1)));
        assert!(bundle.remove(ModuleId(1)));
        assert!(!bundle.contains(ModuleId(1)));
    }
}
