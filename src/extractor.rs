//! # Common-Bundle Extractor
//!
//! Given a set of already-built bundles and extraction rules, computes new
//! "common" bundles that de-duplicate modules shared across parents,
//! respecting per-bundle request budgets and a size ceiling.

use crate::module::{Bundle, BundleType, ModuleId};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone)]
pub struct ExtractionRule {
    pub matcher: Option<fn(&str) -> bool>,
    pub min_use_count: usize,
    pub min_size: usize,
    pub max_size: Option<usize>,
    pub max_initial_requests: usize,
    pub max_async_requests: usize,
    pub out_path: String,
}

impl Default for ExtractionRule {
    fn default() -> Self {
        Self {
            matcher: None,
            min_use_count: 2,
            min_size: 0,
            max_size: None,
            max_initial_requests: usize::MAX,
            max_async_requests: usize::MAX,
            out_path: "common.js".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
struct Combination {
    id: String,
    bundles: Vec<usize>,
    modules: Vec<ModuleId>,
    size: usize,
}

/// A module's rendered size, looked up by the extractor rather than computed
/// (the bundler/module already knows this from its content).
pub trait SizeLookup {
    fn size_of(&self, module: ModuleId) -> usize;
    fn path_of(&self, module: ModuleId) -> String;
}

/// Runs one rule against `bundles`, returning the new common bundles plus,
/// for each, which original bundle indices should link to it as a parent.
pub fn extract(bundles: &mut [Bundle], rule: &ExtractionRule, sizes: &dyn SizeLookup) -> Vec<Bundle> {
    // 1. Candidate modules: everything in at least one bundle, filtered by
    // the rule's matcher if present.
    let mut candidates: HashSet<ModuleId> = HashSet::new();
    for bundle in bundles.iter() {
        for &m in &bundle.modules {
            let path = sizes.path_of(m);
            if rule.matcher.map(|f| f(&path)).unwrap_or(true) {
                candidates.insert(m);
            }
        }
    }

    // 2. Combination map: key by the (admissible) bundle set containing it.
    // Candidates are visited in a fixed order so tied module sizes within a
    // combination don't depend on hash-map iteration order.
    let mut ordered_candidates: Vec<ModuleId> = candidates.iter().copied().collect();
    ordered_candidates.sort_by_key(|m| m.0);
    let mut combos: HashMap<Vec<usize>, Combination> = HashMap::new();
    for module in ordered_candidates {
        let mut owners: Vec<usize> = bundles
            .iter()
            .enumerate()
            .filter(|(_, b)| b.contains(module))
            .filter(|(_, b)| admissible(b, rule))
            .map(|(i, _)| i)
            .collect();
        owners.sort_unstable();
        if owners.is_empty() {
            continue;
        }
        let key = owners.clone();
        let entry = combos.entry(key.clone()).or_insert_with(|| Combination {
            id: combo_id(&key, bundles),
            bundles: owners,
            modules: Vec::new(),
            size: 0,
        });
        entry.modules.push(module);
        entry.size += sizes.size_of(module);
    }

    // 4. Size gate.
    let mut admissible_combos: Vec<Combination> = combos
        .into_values()
        .filter(|c| c.bundles.len() >= rule.min_use_count)
        .collect();
    let total_candidate_size: usize = candidates.iter().map(|m| sizes.size_of(*m)).sum();
    if total_candidate_size < rule.min_size {
        return Vec::new();
    }

    // 5. Selection.
    let mut accepted: Vec<Combination> = Vec::new();
    if let Some(max_size) = rule.max_size {
        admissible_combos.sort_by(|a, b| {
            b.bundles.len()
                .cmp(&a.bundles.len())
                .then(b.size.cmp(&a.size))
                .then(b.modules.len().cmp(&a.modules.len()))
                .then(a.id.cmp(&b.id))
        });
        let mut running = 0usize;
        for mut combo in admissible_combos {
            if running + combo.size <= max_size {
                running += combo.size;
                accepted.push(combo);
            } else {
                let mut by_size: Vec<ModuleId> = combo.modules.clone();
                by_size.sort_by_key(|m| std::cmp::Reverse(sizes.size_of(*m)));
                let mut fitted = Vec::new();
                for m in by_size {
                    let size = sizes.size_of(m);
                    if running + size <= max_size {
                        running += size;
                        fitted.push(m);
                    }
                }
                if !fitted.is_empty() {
                    combo.size = fitted.iter().map(|m| sizes.size_of(*m)).sum();
                    combo.modules = fitted;
                    accepted.push(combo);
                }
                break;
            }
        }
    } else {
        accepted = admissible_combos;
    }
    accepted.sort_by(|a, b| a.id.cmp(&b.id));

    // 6. Commit: pull each accepted module out of its parent bundles and into
    // a fresh common bundle, linking the common bundle as their parent.
    let mut common_bundles = Vec::new();
    for combo in accepted {
        let mut common = Bundle::new(format!("{}/{}", rule.out_path, combo.id), None, BundleType::StaticOrDynamic);
        for &module in &combo.modules {
            common.add(module);
            for &bundle_idx in &combo.bundles {
                bundles[bundle_idx].remove(module);
            }
        }
        for &bundle_idx in &combo.bundles {
            bundles[bundle_idx].parent_bundles.push(common.id.clone());
        }
        common_bundles.push(common);
    }
    common_bundles
}

fn admissible(bundle: &Bundle, rule: &ExtractionRule) -> bool {
    bundle.parent_bundles.len() < bundle.max_parents(rule.max_initial_requests, rule.max_async_requests)
}

fn combo_id(owners: &[usize], bundles: &[Bundle]) -> String {
    owners.iter().map(|&i| bundles[i].id.clone()).collect::<Vec<_>>().join("+")
}
