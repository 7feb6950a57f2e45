use std::collections::{BTreeMap, BTreeSet};

use forksync_state::ContentDigest;
use serde::{Deserialize, Serialize};

/// Label spellings folded onto one skill name.
const LABEL_ALIASES: &[(&str, &str)] = &[
    ("doc", "documentation"),
    ("docs", "documentation"),
    ("bugfix", "bug"),
    ("defect", "bug"),
    ("test", "testing"),
    ("tests", "testing"),
    ("perf", "performance"),
    ("enhancement", "feature"),
    ("feature-request", "feature"),
    ("ci", "ci-cd"),
];

/// Lowercase, trim, collapse separators and resolve aliases.
pub fn canonical_label(label: &str) -> String {
    let folded: String = label
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c == '_' || c == ' ' { '-' } else { c })
        .collect();
    let stripped = folded
        .strip_prefix("type:")
        .or_else(|| folded.strip_prefix("kind/"))
        .unwrap_or(&folded)
        .trim_start_matches('-')
        .to_string();
    LABEL_ALIASES
        .iter()
        .find(|(alias, _)| *alias == stripped)
        .map(|(_, canonical)| (*canonical).to_string())
        .unwrap_or(stripped)
}

/// A contributor's areas of expertise, each weighted in `[0, 1]`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SkillProfile {
    skills: BTreeMap<String, f64>,
}

impl SkillProfile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a skill. Weights are clamped into `[0, 1]`.
    pub fn with_skill(mut self, name: &str, weight: f64) -> Self {
        self.set_skill(name, weight);
        self
    }

    pub fn set_skill(&mut self, name: &str, weight: f64) {
        let weight = if weight.is_finite() {
            weight.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self.skills.insert(canonical_label(name), weight);
    }

    pub fn skills(&self) -> &BTreeMap<String, f64> {
        &self.skills
    }

    pub fn is_empty(&self) -> bool {
        self.skills.is_empty()
    }

    /// Stable digest of the profile; part of every analysis cache key.
    pub fn fingerprint(&self) -> ContentDigest {
        let parts: Vec<String> = self
            .skills
            .iter()
            .map(|(name, weight)| format!("{name}={weight:.6}"))
            .collect();
        ContentDigest::from_parts(parts)
    }

    /// Highest skill weight among the labels, or 0 when none match.
    pub fn label_affinity(&self, labels: &BTreeSet<String>) -> f64 {
        labels
            .iter()
            .filter_map(|l| self.skills.get(&canonical_label(l)))
            .fold(0.0, |acc: f64, w| acc.max(*w))
    }

    /// Prompt-ready description, heaviest skills first.
    pub fn describe(&self) -> String {
        let mut skills: Vec<(&String, &f64)> = self.skills.iter().collect();
        skills.sort_by(|a, b| b.1.total_cmp(a.1).then_with(|| a.0.cmp(b.0)));
        skills
            .iter()
            .map(|(name, weight)| format!("{name} ({weight:.2})"))
            .collect::<Vec<_>>()
            .join(", ")
    }
}
