//! Next-step recommendation after an attack vector completes.
//!
//! Candidates are scored against the last executed module:
//! a direct downstream dependency scores highest, then each prerequisite of the candidate
//! that the last module's declared capabilities satisfy. Ties go to lower risk, then higher
//! stealth, then key order. Modules already run in the vector are never proposed.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, RwLock};

use serde::Serialize;
use tracing::{debug, warn};

use crate::plugin::{Capability, Prerequisite, PrerequisiteKind, RedPathsModule};
use crate::store::{EdgeDirection, EdgeSource};

const DOWNSTREAM_SCORE: u32 = 100;
const REQUIRED_PREREQ_SCORE: u32 = 20;
const OPTIONAL_PREREQ_SCORE: u32 = 10;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recommendation {
    pub module_key: String,
    pub score: u32,
    pub reasons: Vec<String>,
    pub risk: u8,
    pub stealth: u8,
}

pub struct RecommendationEngine {
    modules: RwLock<BTreeMap<String, Arc<dyn RedPathsModule>>>,
    edges: Option<Arc<dyn EdgeSource>>,
}

impl RecommendationEngine {
    pub fn new(edges: Option<Arc<dyn EdgeSource>>) -> Self {
        Self {
            modules: RwLock::new(BTreeMap::new()),
            edges,
        }
    }

    pub fn register(&self, key: &str, module: Arc<dyn RedPathsModule>) {
        let mut modules = self.modules.write().unwrap_or_else(|e| e.into_inner());
        modules.insert(key.to_string(), module);
    }

    pub fn registered(&self) -> Vec<String> {
        let modules = self.modules.read().unwrap_or_else(|e| e.into_inner());
        modules.keys().cloned().collect()
    }

    /// Best next module after `last_key`, excluding anything in `executed`.
    pub fn calculate(&self, last_key: &str, executed: &[String]) -> Option<Recommendation> {
        let modules = self.modules.read().unwrap_or_else(|e| e.into_inner());
        let provided: Vec<Capability> = modules
            .get(last_key)
            .map(|m| m.metadata().provides)
            .unwrap_or_default();
        let downstream: HashSet<String> = self.downstream_of(last_key);
        let skip: HashSet<&str> = executed
            .iter()
            .map(String::as_str)
            .chain(std::iter::once(last_key))
            .collect();

        let mut best: Option<Recommendation> = None;
        for (key, module) in modules.iter() {
            if skip.contains(key.as_str()) {
                continue;
            }
            let meta = module.metadata();
            let mut score = 0;
            let mut reasons = Vec::new();

            if downstream.contains(key) {
                score += DOWNSTREAM_SCORE;
                reasons.push(format!("depends on {}", last_key));
            }
            for prereq in &meta.prerequisites {
                if satisfies(last_key, &provided, prereq) {
                    score += if prereq.required {
                        REQUIRED_PREREQ_SCORE
                    } else {
                        OPTIONAL_PREREQ_SCORE
                    };
                    reasons.push(format!("provides {}", prereq.name));
                }
            }
            if score == 0 {
                continue;
            }

            let candidate = Recommendation {
                module_key: key.clone(),
                score,
                reasons,
                risk: meta.risk,
                stealth: meta.stealth,
            };
            if best.as_ref().map_or(true, |b| outranks(&candidate, b)) {
                best = Some(candidate);
            }
        }

        debug!(target: "redpaths::recommend", last_module = %last_key, recommended = ?best.as_ref().map(|r| &r.module_key), "Recommendation calculated");
        best
    }

    fn downstream_of(&self, key: &str) -> HashSet<String> {
        let Some(ref edges) = self.edges else {
            return HashSet::new();
        };
        match edges.fetch_edges(EdgeDirection::Downstream, key) {
            Ok(found) => found.into_iter().map(|e| e.next_module).collect(),
            Err(e) => {
                warn!(target: "redpaths::recommend", module_key = %key, error = %e, "Could not read downstream edges");
                HashSet::new()
            }
        }
    }
}

fn satisfies(last_key: &str, provided: &[Capability], prereq: &Prerequisite) -> bool {
    if prereq.kind == PrerequisiteKind::Module {
        return prereq.name == last_key;
    }
    provided.iter().any(|cap| {
        cap.name.eq_ignore_ascii_case(&prereq.name) || cap.kind.eq_ignore_ascii_case(&prereq.name)
    })
}

/// Candidates are visited in key order, so equal rank keeps the earlier key.
fn outranks(a: &Recommendation, b: &Recommendation) -> bool {
    (a.score, std::cmp::Reverse(a.risk), a.stealth) > (b.score, std::cmp::Reverse(b.risk), b.stealth)
}
