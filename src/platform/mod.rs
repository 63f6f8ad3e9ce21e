//! Platform identity and per-platform constants.
//!
//! A [`ProfileTable`] is the single canonical source of the numeric
//! constants used by the metrics model. It is built once (built-in defaults
//! plus config overrides) and shared read-only for the life of the process.

mod classify;
mod prefilter;

pub use classify::{Classifier, HostMatch, HostRule};
pub use prefilter::Prefilter;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Canonical, domain-derived identifier of an AI service (e.g. `chatgpt`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlatformId(String);

impl PlatformId {
    pub fn new(id: impl Into<String>) -> Self {
        PlatformId(id.into().to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlatformId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.0)
    }
}

impl From<&str> for PlatformId {
    fn from(s: &str) -> Self {
        PlatformId::new(s)
    }
}

/// Static per-platform constants. Never mutated at runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformProfile {
    pub display_name: String,
    /// Base energy estimate for one query, in kWh.
    pub energy_per_query_kwh: f64,
    /// Grid carbon intensity, kg CO2 per kWh.
    pub carbon_intensity_kg_per_kwh: f64,
    /// Water use in litres per kWh (yields millilitres once scaled by 1000).
    pub water_l_per_kwh: f64,
    /// Optional weight for the duration-weighted correction model.
    #[serde(default)]
    pub compute_complexity: Option<f64>,
}

impl PlatformProfile {
    fn builtin(
        display_name: &str,
        energy_per_query_kwh: f64,
        carbon_intensity_kg_per_kwh: f64,
        water_l_per_kwh: f64,
        compute_complexity: f64,
    ) -> Self {
        PlatformProfile {
            display_name: display_name.to_string(),
            energy_per_query_kwh,
            carbon_intensity_kg_per_kwh,
            water_l_per_kwh,
            compute_complexity: Some(compute_complexity),
        }
    }
}

/// (id, display name, kWh/query, kg CO2/kWh, L/kWh, complexity)
const BUILTIN_PROFILES: &[(&str, &str, f64, f64, f64, f64)] = &[
    ("chatgpt", "ChatGPT", 0.000421, 0.435, 2.0, 1.0),
    ("claude", "Claude", 0.000380, 0.435, 1.8, 1.0),
    ("gemini", "Gemini", 0.000240, 0.380, 1.1, 0.9),
    ("deepseek", "DeepSeek", 0.000300, 0.555, 1.9, 1.0),
    ("copilot", "Copilot", 0.000400, 0.435, 2.0, 1.0),
    ("grok", "Grok", 0.000450, 0.435, 2.1, 1.1),
    ("poe", "Poe", 0.000350, 0.435, 1.8, 0.8),
    ("perplexity", "Perplexity", 0.000330, 0.435, 1.8, 1.2),
    ("characterai", "Character.AI", 0.000200, 0.435, 1.8, 0.6),
    ("huggingface", "HuggingFace", 0.000250, 0.435, 1.8, 0.8),
    ("replicate", "Replicate", 0.000500, 0.435, 1.8, 1.3),
];

/// Lookup table from platform id to its profile.
#[derive(Debug, Clone, Default)]
pub struct ProfileTable {
    profiles: BTreeMap<PlatformId, PlatformProfile>,
}

impl ProfileTable {
    /// An empty table. Every platform is unrecognized until inserted.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The built-in profile set.
    pub fn builtin() -> Self {
        let profiles = BUILTIN_PROFILES
            .iter()
            .map(|&(id, name, energy, carbon, water, complexity)| {
                (
                    PlatformId::new(id),
                    PlatformProfile::builtin(name, energy, carbon, water, complexity),
                )
            })
            .collect();
        ProfileTable { profiles }
    }

    /// Insert or replace a profile.
    pub fn insert(&mut self, id: PlatformId, profile: PlatformProfile) {
        self.profiles.insert(id, profile);
    }

    /// Apply overrides on top of the current table.
    pub fn with_overrides(
        mut self,
        overrides: impl IntoIterator<Item = (PlatformId, PlatformProfile)>,
    ) -> Self {
        for (id, profile) in overrides {
            self.insert(id, profile);
        }
        self
    }

    pub fn get(&self, id: &PlatformId) -> Option<&PlatformProfile> {
        self.profiles.get(id)
    }

    pub fn contains(&self, id: &PlatformId) -> bool {
        self.profiles.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PlatformId, &PlatformProfile)> {
        self.profiles.iter()
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    /// Resolve a free-form platform hint (an id or a display name, any case).
    pub fn resolve_hint(&self, hint: &str) -> Option<PlatformId> {
        let hint = hint.trim();
        if hint.is_empty() {
            return None;
        }
        let as_id = PlatformId::new(hint);
        if self.profiles.contains_key(&as_id) {
            return Some(as_id);
        }
        self.profiles
            .iter()
            .find(|(_, p)| p.display_name.eq_ignore_ascii_case(hint))
            .map(|(id, _)| id.clone())
    }
}
