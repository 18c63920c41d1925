//! # Resolver
//!
//! Maps a `(specifier, referrer)` pair to a concrete file path, and keeps the
//! reverse lookup from a resolved path back to the canonical `Module` that
//! owns it. Pluggable: the filesystem resolver below is the only
//! implementation shipped, but `Resolver` is a trait so an in-memory resolver
//! can back tests without touching disk.

use crate::module::ModuleId;
use crate::path_text::join;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("cannot resolve {specifier:?} from {referrer:?}")]
    NotFound { specifier: String, referrer: String },
}

/// A specifier resolved to a concrete file on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedFile {
    pub path: PathBuf,
    pub mime_type: String,
}

pub trait Resolver {
    /// Resolves `specifier` relative to `referrer_path`'s directory.
    fn resolve(&self, specifier: &str, referrer_path: &str) -> Result<ResolvedFile, ResolveError>;
}

/// Guesses a MIME type from a file extension, the table a filesystem
/// resolver needs to tag a resolved file before a `Module` exists for it.
pub fn guess_mime_type(path: &Path) -> String {
    match path.extension().and_then(|e| e.to_str()) {
        Some("js" | "mjs" | "cjs") => "text/javascript",
        Some("css") => "text/css",
        Some("html" | "htm") => "text/html",
        Some("json") => "application/json",
        _ => "application/octet-stream",
    }
    .to_string()
}

/// Resolves against the real filesystem: tries the specifier as given, then
/// with each of `extensions` appended, then as `<specifier>/index.<ext>`
/// inside `module_directories` (§13 `ResolverConfig`).
pub struct FsResolver {
    pub extensions: Vec<String>,
    pub module_directories: Vec<String>,
}

impl FsResolver {
    pub fn new() -> Self {
        Self {
            extensions: vec!["js".to_string(), "json".to_string(), "css".to_string()],
            module_directories: vec!["node_modules".to_string()],
        }
    }

    fn try_candidates(&self, base: &Path) -> Option<PathBuf> {
        if base.is_file() {
            return Some(base.to_path_buf());
        }
        for ext in &self.extensions {
            let candidate = base.with_extension(ext);
            if candidate.is_file() {
                return Some(candidate);
            }
        }
        for ext in &self.extensions {
            let candidate = base.join(format!("index.{ext}"));
            if candidate.is_file() {
                return Some(candidate);
            }
        }
        None
    }
}

impl Default for FsResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl Resolver for FsResolver {
    fn resolve(&self, specifier: &str, referrer_path: &str) -> Result<ResolvedFile, ResolveError> {
        let referrer_dir = Path::new(referrer_path).parent().unwrap_or_else(|| Path::new("."));

        if specifier.starts_with('.') || specifier.starts_with('/') {
            let base = join(referrer_dir, specifier);
            if let Some(found) = self.try_candidates(&base) {
                let mime_type = guess_mime_type(&found);
                return Ok(ResolvedFile { path: found, mime_type });
            }
        } else {
            for module_dir in &self.module_directories {
                let base = join(referrer_dir, &format!("{module_dir}/{specifier}"));
                if let Some(found) = self.try_candidates(&base) {
                    let mime_type = guess_mime_type(&found);
                    return Ok(ResolvedFile { path: found, mime_type });
                }
            }
        }

        Err(ResolveError::NotFound {
            specifier: specifier.to_string(),
            referrer: referrer_path.to_string(),
        })
    }
}

/// Cache keyed by `(specifier, referrer_dir)`, tolerating concurrent lookups
/// by storing only immutable results (§5 Concurrency & Resource Model).
#[derive(Debug, Default)]
pub struct ResolverCache {
    entries: HashMap<(String, String), PathBuf>,
}

impl ResolverCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_insert(
        &mut self,
        specifier: &str,
        referrer_dir: &str,
        resolve: impl FnOnce() -> Result<PathBuf, ResolveError>,
    ) -> Result<PathBuf, ResolveError> {
        let key = (specifier.to_string(), referrer_dir.to_string());
        if let Some(path) = self.entries.get(&key) {
            return Ok(path.clone());
        }
        let path = resolve()?;
        self.entries.insert(key, path.clone());
        Ok(path)
    }
}

/// Reverse lookup from a resolved, canonicalized path to the `Module` that
/// already owns it, so two dependencies resolving to the same file share one
/// module instance.
#[derive(Debug, Default)]
pub struct ModuleRegistry {
    by_path: HashMap<PathBuf, ModuleId>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &Path) -> Option<ModuleId> {
        self.by_path.get(path).copied()
    }

    pub fn register(&mut self, path: PathBuf, id: ModuleId) {
        self.by_path.insert(path, id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn guess_mime_type_covers_known_extensions() {
        assert_eq!(guess_mime_type(Path::new("a.js")), "text/javascript");
        assert_eq!(guess_mime_type(Path::new("a.css")), "text/css");
        assert_eq!(guess_mime_type(Path::new("a.html")), "text/html");
        assert_eq!(guess_mime_type(Path::new("a.bin")), "application/octet-stream");
    }

    #[test]
    fn fs_resolver_finds_sibling_file() {
        let dir = std::env::temp_dir().join(format!("bundler-core-resolve-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let target = dir.join("util.js");
        std::fs::File::create(&target).unwrap().write_all(b"module.exports = 1;").unwrap();

        let entry = dir.join("index.js");
        let resolver = FsResolver::new();
        let resolved = resolver.resolve("./util", entry.to_str().unwrap()).unwrap();
        assert_eq!(resolved.path, target);
        assert_eq!(resolved.mime_type, "text/javascript");

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn fs_resolver_reports_not_found() {
        let resolver = FsResolver::new();
        let err = resolver.resolve("./missing", "/tmp/does-not-exist/index.js");
        assert!(err.is_err());
    }

    #[test]
    fn resolver_cache_reuses_result() {
        let mut cache = ResolverCache::new();
        let mut calls = 0;
        let mut resolve_once = |cache: &mut ResolverCache| {
            cache.get_or_insert("./a", "/dir", || {
                calls += 1;
                Ok(PathBuf::from("/dir/a.js"))
            })
        };
        resolve_once(&mut cache).unwrap();
        resolve_once(&mut cache).unwrap();
        assert_eq!(calls, 1);
    }
}
