//! # Build Configuration
//!
//! `BuildConfig` aggregates every section-scoped configuration record named
//! across the renderers/resolver/extractor into one structure loadable from
//! a JSON file or built programmatically — the single source of truth the
//! CLI hands to the `Builder`.

use crate::render::css::{CssRendererConfig, ImportMode};
use crate::render::html::HtmlRendererConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read { path: String, source: std::io::Error },
    #[error("failed to parse config file {path}: {source}")]
    Parse { path: String, source: serde_json::Error },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryConfig {
    pub path: String,
    pub mime_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    #[serde(default = "default_module_directories")]
    pub module_directories: Vec<String>,
}

fn default_extensions() -> Vec<String> {
    vec!["js".to_string(), "json".to_string(), "css".to_string()]
}

fn default_module_directories() -> Vec<String> {
    vec!["node_modules".to_string()]
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self { extensions: default_extensions(), module_directories: default_module_directories() }
    }
}

impl ResolverConfig {
    pub fn into_resolver(self) -> crate::resolve::FsResolver {
        crate::resolve::FsResolver { extensions: self.extensions, module_directories: self.module_directories }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct JsConfig {
    #[serde(default)]
    pub global_defines: HashMap<String, String>,
    #[serde(default)]
    pub global_typeof: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CssConfig {
    pub import: ImportMode,
    pub url: bool,
}

impl Default for CssConfig {
    fn default() -> Self {
        Self { import: ImportMode::StaticImport, url: true }
    }
}

impl From<CssConfig> for CssRendererConfig {
    fn from(c: CssConfig) -> Self {
        CssRendererConfig { import: c.import, url: c.url }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HtmlConfig {
    #[serde(default)]
    pub inline: bool,
    #[serde(default = "default_true")]
    pub include: bool,
}

fn default_true() -> bool {
    true
}

impl Default for HtmlConfig {
    fn default() -> Self {
        Self { inline: false, include: true }
    }
}

impl From<HtmlConfig> for HtmlRendererConfig {
    fn from(c: HtmlConfig) -> Self {
        HtmlRendererConfig { inline: c.inline, include: c.include }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionRuleConfig {
    pub min_use_count: usize,
    #[serde(default)]
    pub min_size: usize,
    pub max_size: Option<usize>,
    #[serde(default = "usize_max")]
    pub max_initial_requests: usize,
    #[serde(default = "usize_max")]
    pub max_async_requests: usize,
    pub out_path: String,
}

fn usize_max() -> usize {
    usize::MAX
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    pub entries: Vec<EntryConfig>,
    #[serde(default)]
    pub resolver: ResolverConfig,
    #[serde(default)]
    pub js: JsConfig,
    #[serde(default)]
    pub css: CssConfig,
    #[serde(default)]
    pub html: HtmlConfig,
    #[serde(default)]
    pub extraction_rules: Vec<ExtractionRuleConfig>,
    #[serde(default)]
    pub source_map: bool,
}

impl BuildConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read { path: path.display().to_string(), source })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse { path: path.display().to_string(), source })
    }

    /// Builds the single-entry convenience config the CLI falls back to when
    /// no `--config` file is given: one entry, every other section default.
    pub fn default_single_entry(path: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            entries: vec![EntryConfig { path: path.into(), mime_type: mime_type.into() }],
            resolver: ResolverConfig::default(),
            js: JsConfig::default(),
            css: CssConfig::default(),
            html: HtmlConfig::default(),
            extraction_rules: Vec::new(),
            source_map: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_single_entry_has_one_entry_and_default_sections() {
        let config = BuildConfig::default_single_entry("index.js", "text/javascript");
        assert_eq!(config.entries.len(), 1);
        assert_eq!(config.entries[0].path, "index.js");
        assert_eq!(config.resolver.extensions, default_extensions());
        assert!(config.css.url);
        assert!(!config.source_map);
    }

    #[test]
    fn round_trips_through_json() {
        let config = BuildConfig::default_single_entry("a.js", "text/javascript");
        let json = serde_json::to_string(&config).unwrap();
        let parsed: BuildConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.entries[0].path, "a.js");
        assert_eq!(parsed.css.import, ImportMode::StaticImport);
    }
}
