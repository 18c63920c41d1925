//! # JS Bundle Assembly
//!
//! Walks the static-import subgraph of an entry module and emits a single
//! self-executing loader module: a registry prelude plus one
//! `tpack.define(...)` call per bundled module, keyed by the module's path
//! as its runtime id.

use crate::graph::Graph;
use crate::module::{Bundle, BundleType, DependencyType, Module, ModuleId};
use crate::path_text::{data_uri, quote_js_string};
use crate::resolve::Resolver;
use crate::sourcemap::SourceMapBuilder;
use crate::text_document::TextWriter;

const LOADER_PRELUDE: &str = r#"var tpack = (function () {
  var modules = {};
  var cache = {};
  function define(name, factory) {
    modules[name] = factory;
  }
  function require(name, callback, data) {
    if (Array.isArray(name)) {
      var pending = name.length;
      var results = new Array(name.length);
      if (pending === 0 && callback) callback(results);
      name.forEach(function (n, i) {
        async(n, function (exports) {
          results[i] = exports;
          if (--pending === 0 && callback) callback(results);
        });
      });
      return;
    }
    if (cache[name] && cache[name].loaded) {
      return cache[name].exports;
    }
    var factory = modules[name];
    if (!factory) {
      throw new Error("Cannot find module '" + name + "'");
    }
    var module = cache[name] || (cache[name] = { exports: {}, loaded: false });
    factory(require, module.exports, module);
    module.loaded = true;
    return module.exports;
  }
  function async(url, callback) {
    callback(require(url));
  }
  function style(content) {
    var el = document.createElement("style");
    el.textContent = content;
    document.head.appendChild(el);
    return {};
  }
  return { cache: cache, define: define, require: require, async: async, style: style };
})();
"#;

/// Builds the bundle rooted at `entry`: a post-order, cycle-safe traversal
/// of `staticImport` dependencies, each resolved module visited once.
pub fn build_bundle<R: Resolver>(graph: &Graph<R>, entry: ModuleId) -> Bundle {
    let mut bundle = Bundle::new(graph.get(entry).path.clone(), Some(entry), BundleType::Static);
    bundle.creating = true;
    visit(graph, entry, &mut bundle);
    bundle.creating = false;
    bundle
}

fn visit<R: Resolver>(graph: &Graph<R>, module_id: ModuleId, bundle: &mut Bundle) {
    if bundle.contains(module_id) {
        return;
    }
    // Mark as visited before recursing into dependencies so a cycle back to
    // this module sees it already present and stops instead of looping.
    bundle.add(module_id);
    let module = graph.get(module_id);
    for dep in &module.dependencies {
        if dep.kind == DependencyType::StaticImport {
            if let Some(dep_id) = dep.module {
                visit(graph, dep_id, bundle);
            }
        }
    }
}

/// A bundle's generated code plus the composite source map accumulated
/// while emitting it: one shared `TextWriter` tracks absolute generated
/// line/column across the loader prelude and every `tpack.define` body, so
/// `source_map` resolves any generated line back to the original source
/// line of whichever module emitted it (§4.7).
pub struct BundleOutput {
    pub code: String,
    pub source_map: SourceMapBuilder,
}

/// Renders a bundle's loader prelude, one `tpack.define` per module, and the
/// closing `tpack.require(<entry>)`, consuming each module's edit log
/// through a single writer so generated positions stay absolute across
/// module boundaries.
pub fn emit_bundle<R: Resolver>(graph: &mut Graph<R>, bundle: &Bundle) -> BundleOutput {
    let mut writer = TextWriter::new();
    writer.source_map.set_file(bundle.id.clone());
    writer.write_str(LOADER_PRELUDE);

    for &module_id in &bundle.modules {
        let id = graph.get(module_id).path.clone();
        writer.write_str(&format!("tpack.define({}, function(require, exports, module){{\n", quote_js_string(&id)));
        emit_module_body(graph.get_mut(module_id), &mut writer);
        writer.write_str("\n});\n");
    }

    let entry_id = bundle.entry_module.map(|m| graph.get(m).path.clone()).unwrap_or_default();
    writer.write_str(&format!("tpack.require({});\n", quote_js_string(&entry_id)));
    BundleOutput { code: writer.output, source_map: writer.source_map }
}

fn emit_module_body(module: &mut Module, writer: &mut TextWriter) {
    match module.mime_type.as_str() {
        "text/javascript" => flush_edits(module, writer),
        "text/css" => {
            let path = module.path.clone();
            let content = rendered_text(module);
            writer.add_mapping(&path, 0, 0);
            writer.write_str(&format!("module.exports = tpack.style({});", quote_js_string(&content)));
        }
        "application/json" => {
            let path = module.path.clone();
            let content = rendered_text(module);
            writer.add_mapping(&path, 0, 0);
            writer.write_str(&format!("module.exports = {content};"));
        }
        mime if mime.starts_with("text/") => {
            let path = module.path.clone();
            let content = rendered_text(module);
            writer.add_mapping(&path, 0, 0);
            writer.write_str(&format!("module.exports = {};", quote_js_string(&content)));
        }
        mime => {
            let mime = mime.to_string();
            let path = module.path.clone();
            let bytes = module.content().map(|s| s.as_bytes().to_vec()).unwrap_or_default();
            writer.add_mapping(&path, 0, 0);
            writer.write_str(&format!("module.exports = {};", quote_js_string(&data_uri(&mime, &bytes))));
        }
    }
}

/// Replays a module's edit log (attribute rewrites, inline splices) against
/// its source and returns the result, or the raw source untouched when no
/// renderer registered any edits. Unlike `flush_edits`, this renders into a
/// throwaway writer: non-JS bodies aren't given fine-grained source-map
/// mappings, only the single line-0 mapping their caller adds afterward.
fn rendered_text(module: &mut Module) -> String {
    let path = module.path.clone();
    let source = module.content().unwrap_or_default().to_string();
    match module.edits.take() {
        Some(edits) => {
            let mut scratch = TextWriter::new();
            edits.write(&source, &path, &mut scratch);
            scratch.output
        }
        None => source,
    }
}

/// Flushes a JS module's recorded edit log against its original source into
/// the shared writer, falling back to the raw source (with a single
/// line-0 mapping) when no renderer ran (e.g. an external module reached
/// only through `require` with no parsed dependencies).
fn flush_edits(module: &mut Module, writer: &mut TextWriter) {
    let path = module.path.clone();
    let source = module.content().unwrap_or_default().to_string();
    match module.edits.take() {
        Some(edits) => edits.write(&source, &path, writer),
        None => {
            writer.add_mapping(&path, 0, 0);
            writer.write_str(&source);
        }
    }
}
