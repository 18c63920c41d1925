//! # Module Graph
//!
//! Owns the arena of `Module`s, drives resolution of each dependency a
//! renderer discovered, and fills in `dependency.module` (or logs the miss).
//! The coordinator (§5) is meant to own exactly one of these.

use crate::module::{LogLevel, Module, ModuleId, ModuleState};
use crate::resolve::{ModuleRegistry, ResolveError, Resolver, ResolverCache};
use std::path::Path;

pub struct Graph<R: Resolver> {
    resolver: R,
    cache: ResolverCache,
    registry: ModuleRegistry,
    modules: Vec<Module>,
}

impl<R: Resolver> Graph<R> {
    pub fn new(resolver: R) -> Self {
        Self { resolver, cache: ResolverCache::new(), registry: ModuleRegistry::new(), modules: Vec::new() }
    }

    pub fn get(&self, id: ModuleId) -> &Module {
        &self.modules[id.0 as usize]
    }

    pub fn get_mut(&mut self, id: ModuleId) -> &mut Module {
        &mut self.modules[id.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Inserts an already-constructed module and registers it under its
    /// canonicalized path, or returns the existing module sharing that path.
    pub fn intern(&mut self, path: &Path, mime_type: impl Into<String>, is_entry: bool) -> ModuleId {
        if let Some(existing) = self.registry.get(path) {
            return existing;
        }
        let id = ModuleId(self.modules.len() as u32);
        let module = Module::new(id, path.to_string_lossy().into_owned(), mime_type, is_entry);
        self.modules.push(module);
        self.registry.register(path.to_path_buf(), id);
        id
    }

    /// Resolves every dependency on `module_id` that doesn't already have a
    /// `module` set, caching filesystem lookups and interning newly
    /// discovered modules. Unresolved specifiers are logged on the owning
    /// module and left with `module = None`.
    pub fn link(&mut self, module_id: ModuleId) {
        let referrer_path = self.get(module_id).path.clone();
        let dep_count = self.get(module_id).dependencies.len();

        for i in 0..dep_count {
            if self.get(module_id).dependencies[i].module.is_some() {
                continue;
            }
            let Some(specifier) = self.get(module_id).dependencies[i].source.clone() else {
                continue;
            };

            let resolver = &self.resolver;
            let resolved = self
                .cache
                .get_or_insert(&specifier, &referrer_path, || resolver.resolve(&specifier, &referrer_path).map(|r| r.path));

            match resolved {
                Ok(path) => {
                    let mime_type = crate::resolve::guess_mime_type(&path);
                    let resolved_id = self.intern(&path, mime_type, false);
                    let resolved_path = self.get(resolved_id).path.clone();
                    let dep = &mut self.get_mut(module_id).dependencies[i];
                    dep.module = Some(resolved_id);
                    if let Some(rewrite) = &dep.rewrite {
                        rewrite.resolve(resolved_path);
                    }
                }
                Err(ResolveError::NotFound { specifier, referrer }) => {
                    let detail = format!("cannot resolve {specifier:?} from {referrer:?}");
                    let module = self.get_mut(module_id);
                    module.dependencies[i].detail = Some(detail.clone());
                    module.log(LogLevel::Warning, format!("unresolved dependency: {detail}"));
                }
            }
        }
    }

    /// Links every module currently `loaded`, repeating until no newly
    /// interned module needs linking. New modules start in `initial`, so a
    /// caller still has to parse/render them before this sees their
    /// dependencies.
    pub fn link_all_loaded(&mut self) {
        let mut i = 0;
        while i < self.modules.len() {
            if matches!(self.get(ModuleId(i as u32)).state, ModuleState::Loaded) {
                self.link(ModuleId(i as u32));
            }
            i += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::{DependencyType, ModuleDependency};
    use crate::resolve::ResolvedFile;
    use std::path::PathBuf;

    struct StubResolver;
    impl Resolver for StubResolver {
        fn resolve(&self, specifier: &str, referrer_path: &str) -> Result<ResolvedFile, ResolveError> {
            if specifier == "./missing" {
                return Err(ResolveError::NotFound { specifier: specifier.to_string(), referrer: referrer_path.to_string() });
            }
            Ok(ResolvedFile { path: PathBuf::from(format!("/root/{specifier}.js")), mime_type: "text/javascript".to_string() })
        }
    }

    #[test]
    fn link_resolves_dependency_and_fills_rewrite() {
        let mut graph = Graph::new(StubResolver);
        let entry = graph.intern(Path::new("/root/a.js"), "text/javascript", true);
        graph.get_mut(entry).state = ModuleState::Loaded;
        let mut dep = ModuleDependency::new(DependencyType::StaticImport, 0, 3)
            .with_rewrite(crate::module::RewriteFormat::QuotedId);
        dep.source = Some("./b".to_string());
        graph.get_mut(entry).add_dependency(dep).unwrap();

        graph.link(entry);

        let dep = &graph.get(entry).dependencies[0];
        assert!(dep.module.is_some());
        assert_eq!(*dep.rewrite.as_ref().unwrap().resolved_id.lock().unwrap(), Some("/root/./b.js".to_string()));
    }

    #[test]
    fn link_logs_unresolved_dependency() {
        let mut graph = Graph::new(StubResolver);
        let entry = graph.intern(Path::new("/root/a.js"), "text/javascript", true);
        let mut dep = ModuleDependency::new(DependencyType::StaticImport, 0, 3);
        dep.source = Some("./missing".to_string());
        graph.get_mut(entry).add_dependency(dep).unwrap();

        graph.link(entry);

        let module = graph.get(entry);
        assert!(module.dependencies[0].module.is_none());
        assert!(module.dependencies[0].detail.is_some());
        assert!(module.has_errors() == false);
        assert_eq!(module.logs.len(), 1);
        assert_eq!(module.logs[0].level, LogLevel::Warning);
    }

    #[test]
    fn intern_reuses_module_for_same_path() {
        let mut graph = Graph::new(StubResolver);
        let a = graph.intern(Path::new("/root/a.js"), "text/javascript", true);
        let b = graph.intern(Path::new("/root/a.js"), "text/javascript", false);
        assert_eq!(a, b);
        assert_eq!(graph.len(), 1);
    }
}
