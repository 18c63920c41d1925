//! # Builder Orchestration
//!
//! Drives each module through `initial -> loading -> loaded -> emitting ->
//! emitted`: read the entry files, parse/render per MIME type, link the
//! resulting dependencies against the resolver, assemble JS bundles, and run
//! the common-bundle extractor. Runs on a single coordinator thread (§5
//! describes worker-pool dispatch for CPU-bound phases; this build keeps
//! the state machine but executes each phase inline rather than spawning a
//! pool, a scope simplification recorded in the grounding ledger).

use crate::config::BuildConfig;
use crate::extractor::{self, ExtractionRule, SizeLookup};
use crate::graph::Graph;
use crate::module::{
    DependencyType, GeneratedContent, GeneratedModule, LogLevel, Module, ModuleDependency, ModuleId, ModuleState,
    SubmodulePath,
};
use crate::parser::{parse_js, ParserConfig};
use crate::render::{css, html, js};
use crate::resolve::FsResolver;
use digest::Digest;
use md5::Md5;
use sha1::Sha1;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("failed to read entry {path}: {source}")]
    ReadEntry { path: String, source: std::io::Error },
    #[error("module error on {path}: {source}")]
    Module { path: String, source: crate::module::ModuleError },
    #[error("edit error on {path}: {source}")]
    Edit { path: String, source: crate::text_document::EditError },
    #[error("{0} module(s) aborted the build with a fatal error")]
    Aggregate(usize),
}

pub struct Builder {
    pub graph: Graph<FsResolver>,
    config: BuildConfig,
    next_hash_seed: u64,
    build_tag: String,
    /// Child modules interned mid-render (HTML inline `<script>`/`<style>`
    /// sub-modules) that still need adding to the frontier; drained by
    /// `build()` right after the render call that populated them.
    pending_children: Vec<ModuleId>,
}

struct Sizes<'a> {
    graph: &'a Graph<FsResolver>,
    computed: std::collections::HashMap<ModuleId, usize>,
}

impl SizeLookup for Sizes<'_> {
    fn size_of(&self, module: ModuleId) -> usize {
        self.computed.get(&module).copied().unwrap_or(0)
    }
    fn path_of(&self, module: ModuleId) -> String {
        self.graph.get(module).path.clone()
    }
}

impl Builder {
    pub fn new(config: BuildConfig) -> Self {
        let resolver = config.resolver.clone().into_resolver();
        let build_tag = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0).to_string();
        Self { graph: Graph::new(resolver), config, next_hash_seed: 0, build_tag, pending_children: Vec::new() }
    }

    /// Assigns the next module hash token: a per-Builder monotonic seed
    /// combined with the wall-clock tag stamped once at `Builder::new`, so
    /// two modules loaded in the same build never collide and two runs of
    /// the same build stay distinguishable by timestamp alone (the counter
    /// itself is deterministic across runs).
    fn next_module_hash(&mut self) -> String {
        self.next_hash_seed += 1;
        format!("{}-{}", self.next_hash_seed, self.build_tag)
    }

    /// Runs every phase to completion and returns the generated artifacts
    /// for every entry's bundle plus any common bundles the extractor split
    /// out. Per-module failures accumulate as logs (§7); only a fatal
    /// condition (an edit overlap, an internal invariant violation) returns
    /// `Err`.
    pub fn build(&mut self) -> Result<Vec<GeneratedModule>, BuildError> {
        let entries: Vec<(PathBuf, String)> =
            self.config.entries.iter().map(|e| (PathBuf::from(&e.path), e.mime_type.clone())).collect();

        let mut entry_ids = Vec::new();
        for (path, mime) in &entries {
            let id = self.graph.intern(path, mime.clone(), true);
            entry_ids.push(id);
        }

        let mut fatal = 0usize;
        let mut frontier = entry_ids.clone();
        while let Some(id) = frontier.pop() {
            if !matches!(self.graph.get(id).state, ModuleState::Initial) {
                continue;
            }
            match self.load_and_render(id) {
                Ok(()) => {
                    self.graph.link(id);
                    let dep_ids: Vec<ModuleId> =
                        self.graph.get(id).dependencies.iter().filter_map(|d| d.module).collect();
                    frontier.extend(dep_ids);
                    frontier.extend(self.pending_children.drain(..));
                }
                Err(BuildError::Module { .. }) | Err(BuildError::ReadEntry { .. }) => {
                    // Resolve/read failures are per-module; already logged.
                }
                Err(_) => fatal += 1,
            }
        }

        if fatal > 0 {
            return Err(BuildError::Aggregate(fatal));
        }

        let mut bundles: Vec<_> =
            entry_ids.iter().map(|&id| crate::bundler::build_bundle(&self.graph, id)).collect();

        let extraction_rules = self.config.extraction_rules.clone();
        let sizes = self.compute_sizes(&bundles);
        let mut common = Vec::new();
        for rule_cfg in &extraction_rules {
            let rule = ExtractionRule {
                matcher: None,
                min_use_count: rule_cfg.min_use_count,
                min_size: rule_cfg.min_size,
                max_size: rule_cfg.max_size,
                max_initial_requests: rule_cfg.max_initial_requests,
                max_async_requests: rule_cfg.max_async_requests,
                out_path: rule_cfg.out_path.clone(),
            };
            common.extend(extractor::extract(&mut bundles, &rule, &sizes));
        }

        let mut generated = Vec::new();
        for bundle in bundles.iter().chain(common.iter()) {
            let output = crate::bundler::emit_bundle(&mut self.graph, bundle);
            let source_map = self.config.source_map.then(|| output.source_map.build());
            generated.push(self.generated_module(bundle.entry_module, bundle.id.clone(), output.code, source_map));
        }
        Ok(generated)
    }

    fn compute_sizes(&mut self, bundles: &[crate::module::Bundle]) -> Sizes<'_> {
        let mut computed = std::collections::HashMap::new();
        for bundle in bundles {
            for &id in &bundle.modules {
                computed.entry(id).or_insert_with(|| self.graph.get_mut(id).content().map(|s| s.len()).unwrap_or(0));
            }
        }
        Sizes { graph: &self.graph, computed }
    }

    fn generated_module(
        &mut self,
        entry_module: Option<ModuleId>,
        path: String,
        content: String,
        source_map: Option<crate::sourcemap::SourceMap>,
    ) -> GeneratedModule {
        let size = content.len();
        let md5 = hex_encode(&Md5::digest(content.as_bytes()));
        let sha1 = hex_encode(&Sha1::digest(content.as_bytes()));
        let hash = self.next_module_hash();
        GeneratedModule {
            original_module: entry_module.unwrap_or(ModuleId(0)),
            path,
            content: GeneratedContent::Text(content),
            size,
            hash,
            md5,
            sha1,
            mime_type: "text/javascript".to_string(),
            logs: Vec::new(),
            no_write: false,
            source_map,
        }
    }

    fn load_and_render(&mut self, id: ModuleId) -> Result<(), BuildError> {
        self.graph.get_mut(id).state = ModuleState::Loading;
        let path = self.graph.get(id).path.clone();
        let mime = self.graph.get(id).mime_type.clone();
        let is_submodule = self.graph.get(id).submodule_path().is_some();

        let source = if is_submodule {
            // HTML inline `<script>`/`<style>` sub-modules carry their
            // source text from render time; there's no file to read.
            self.graph.get_mut(id).content().unwrap_or_default().to_string()
        } else {
            match std::fs::read_to_string(Path::new(&path)) {
                Ok(s) => s,
                Err(source) => {
                    let module = self.graph.get_mut(id);
                    module.log(LogLevel::Error, format!("failed to read {path}: {source}"));
                    return Err(BuildError::ReadEntry { path, source });
                }
            }
        };
        self.graph.get_mut(id).set_text(source.clone());
        self.graph.get_mut(id).processor_name = Some(processor_name(&mime));
        let hash = self.next_module_hash();
        self.graph.get_mut(id).hash = Some(hash);

        let result = match mime.as_str() {
            "text/javascript" => self.render_js(id, &source),
            "text/css" => self.render_css(id, &source),
            "text/html" => self.render_html(id, &source),
            _ => Ok(()),
        };

        let module = self.graph.get_mut(id);
        module.processor_name = None;
        module.state = ModuleState::Loaded;
        result
    }

    fn render_js(&mut self, id: ModuleId, source: &str) -> Result<(), BuildError> {
        let parsed = parse_js(source, &self.graph.get(id).path, &ParserConfig::default());
        let Some(program) = parsed.ast else {
            let module = self.graph.get_mut(id);
            for error in &parsed.errors {
                module.log(LogLevel::Error, format!("{error:?}"));
            }
            return Ok(());
        };
        let config = js::JsRendererConfig::from(self.config.js.clone());
        let output = js::render(source, &program, &config).map_err(|source| BuildError::Edit { path: self.graph.get(id).path.clone(), source })?;
        self.install_render_output(id, output.document, output.dependencies)
    }

    fn render_css(&mut self, id: ModuleId, source: &str) -> Result<(), BuildError> {
        let config = css::CssRendererConfig::from(self.config.css.clone());
        let output = css::render(source, &config).map_err(|source| BuildError::Edit { path: self.graph.get(id).path.clone(), source })?;
        self.install_render_output(id, output.document, output.dependencies)
    }

    fn render_html(&mut self, id: ModuleId, source: &str) -> Result<(), BuildError> {
        let config = html::HtmlRendererConfig::from(self.config.html.clone());
        let output = html::render(source, &config).map_err(|source| BuildError::Edit { path: self.graph.get(id).path.clone(), source })?;

        let parent_path = self.graph.get(id).original_path.clone();
        for (i, sub) in output.submodules.into_iter().enumerate() {
            let child_path = SubmodulePath { parent: parent_path.clone(), child: format!("{}-{i}", sub.name) }.render();
            let child_id = self.graph.intern(Path::new(&child_path), sub.mime_hint.to_string(), false);
            let child = self.graph.get_mut(child_id);
            child.set_text(sub.source);
            child.parent_line = Some(sub.parent_line);
            child.parent_column = Some(sub.parent_column);
            child.original_module = Some(id);
            self.graph.get_mut(id).generated_modules.push(child_id);
            self.pending_children.push(child_id);
        }

        let mut dependencies = output.dependencies;
        for include in output.includes {
            let mut dep = ModuleDependency::new(DependencyType::External, include.start, include.end);
            dep.source = Some(include.url);
            dependencies.push(dep);
        }

        self.install_render_output(id, output.document, dependencies)
    }

    fn install_render_output(
        &mut self,
        id: ModuleId,
        document: crate::text_document::TextDocument,
        dependencies: Vec<crate::module::ModuleDependency>,
    ) -> Result<(), BuildError> {
        let module: &mut Module = self.graph.get_mut(id);
        module.edits = Some(document);
        for dep in dependencies {
            module.add_dependency(dep).map_err(|source| BuildError::Module { path: module.path.clone(), source })?;
        }
        Ok(())
    }
}

fn processor_name(mime: &str) -> String {
    match mime {
        "text/javascript" => "js-renderer",
        "text/css" => "css-renderer",
        "text/html" => "html-renderer",
        _ => "passthrough",
    }
    .to_string()
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::File::create(&path).unwrap().write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn builds_entry_and_static_dependency_into_one_bundle() {
        let dir = std::env::temp_dir().join(format!("bundler-core-build-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        write_file(&dir, "util.js", "module.exports = 1;\n");
        let entry = write_file(&dir, "index.js", "var x = require(\"./util\");\n");

        let config = BuildConfig::default_single_entry(entry.to_str().unwrap(), "text/javascript");
        let mut builder = Builder::new(config);
        let generated = builder.build().expect("build succeeds");

        assert_eq!(generated.len(), 1);
        let GeneratedContent::Text(content) = &generated[0].content else { panic!("expected text") };
        assert!(content.contains("tpack.define"));
        assert!(content.contains("require(\"") && content.contains("util.js"));
        assert!(generated[0].source_map.is_none(), "source_map not requested by default");

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn source_map_populated_when_requested_and_resolves_to_dependency() {
        let dir = std::env::temp_dir().join(format!("bundler-core-build-test-sm-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        write_file(&dir, "util.js", "module.exports = 1;\n");
        let entry = write_file(&dir, "index.js", "var x = require(\"./util\");\n");

        let mut config = BuildConfig::default_single_entry(entry.to_str().unwrap(), "text/javascript");
        config.source_map = true;
        let mut builder = Builder::new(config);
        let generated = builder.build().expect("build succeeds");

        let map = generated[0].source_map.as_ref().expect("source_map requested");
        assert!(map.sources.iter().any(|s| s.ends_with("util.js")));
        assert!(map.sources.iter().any(|s| s.ends_with("index.js")));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn html_inline_script_becomes_a_real_child_module() {
        let dir = std::env::temp_dir().join(format!("bundler-core-build-test-html-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let entry = write_file(&dir, "index.html", "<html><body><script>var x = 1;</script></body></html>");

        let config = BuildConfig::default_single_entry(entry.to_str().unwrap(), "text/html");
        let mut builder = Builder::new(config);
        builder.build().expect("build succeeds");

        let entry_id = ModuleId(0);
        let generated_children = builder.graph.get(entry_id).generated_modules.clone();
        assert_eq!(generated_children.len(), 1);
        let child = builder.graph.get(generated_children[0]);
        assert_eq!(child.mime_type, "text/javascript");
        assert_eq!(child.original_module, Some(entry_id));
        assert!(child.parent_line.is_some());
        assert!(matches!(child.state, ModuleState::Loaded));

        std::fs::remove_dir_all(&dir).ok();
    }
}
