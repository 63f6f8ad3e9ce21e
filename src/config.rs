//! Engine configuration, loaded from TOML.
//!
//! Every key is optional; `effective_*` accessors supply the defaults.
//!
//! ```toml
//! [store]
//! path = "envirotrack.db"
//!
//! [pending]
//! max_age_secs = 300
//!
//! [metrics]
//! correction = "duration_weighted"
//!
//! [platforms.mistral]
//! display_name = "Le Chat"
//! energy_per_query_kwh = 0.0003
//! carbon_intensity_kg_per_kwh = 0.056
//! water_l_per_kwh = 1.5
//!
//! [[classifier.rules]]
//! domain = "mistral.ai"
//! platform = "mistral"
//! ```

use crate::error::{Error, Result};
use crate::metrics::CorrectionModel;
use crate::platform::{Classifier, HostRule, PlatformId, PlatformProfile, Prefilter, ProfileTable};
use crate::store::{Capacities, DEFAULT_HISTORY_CAPACITY, DEFAULT_LOG_CAPACITY};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct StoreConfig {
    /// Database file. Default: `envirotrack.db`.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PendingConfig {
    /// Pending requests older than this are evicted. Default: 300.
    pub max_age_secs: Option<u64>,
    /// Period of the background sweeper. Default: 30.
    pub sweep_interval_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RingConfig {
    pub capacity: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct MetricsConfig {
    pub correction: Option<CorrectionModel>,
    /// Merge retries before an update is dropped. Default: 1.
    pub storage_retries: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Extra host rules, tried before the built-in rules of the same kind.
    pub rules: Vec<HostRule>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PrefilterConfig {
    /// Extra URL fragments marking an AI endpoint.
    pub path_patterns: Vec<String>,
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EngineConfig {
    pub store: StoreConfig,
    pub pending: PendingConfig,
    pub log: RingConfig,
    pub history: RingConfig,
    pub metrics: MetricsConfig,
    pub classifier: ClassifierConfig,
    pub prefilter: PrefilterConfig,
    /// Profiles added to, or replacing, the built-in table.
    pub platforms: BTreeMap<String, PlatformProfile>,
}

impl EngineConfig {
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Load from `path`, or defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => {
                let config = Self::from_toml(&std::fs::read_to_string(p)?)?;
                config.validate()?;
                Ok(config)
            }
            None => Ok(Self::default()),
        }
    }

    /// Every classifier rule must name a platform that has a profile.
    pub fn validate(&self) -> Result<()> {
        let profiles = self.profile_table();
        for rule in &self.classifier.rules {
            if !profiles.contains(&rule.platform) {
                return Err(Error::UnknownPlatform(rule.platform.to_string()));
            }
        }
        Ok(())
    }

    pub fn effective_store_path(&self) -> PathBuf {
        self.store
            .path
            .clone()
            .unwrap_or_else(|| PathBuf::from("envirotrack.db"))
    }

    pub fn effective_max_pending_age(&self) -> Duration {
        Duration::from_secs(self.pending.max_age_secs.unwrap_or(300))
    }

    pub fn effective_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.pending.sweep_interval_secs.unwrap_or(30).max(1))
    }

    pub fn effective_correction(&self) -> CorrectionModel {
        self.metrics.correction.unwrap_or_default()
    }

    pub fn effective_storage_retries(&self) -> u32 {
        self.metrics.storage_retries.unwrap_or(1)
    }

    pub fn capacities(&self) -> Capacities {
        Capacities {
            log: self.log.capacity.unwrap_or(DEFAULT_LOG_CAPACITY).max(1),
            history: self.history.capacity.unwrap_or(DEFAULT_HISTORY_CAPACITY).max(1),
        }
    }

    pub fn profile_table(&self) -> ProfileTable {
        ProfileTable::builtin().with_overrides(
            self.platforms
                .iter()
                .map(|(id, p)| (PlatformId::new(id.as_str()), p.clone())),
        )
    }

    pub fn classifier(&self) -> Classifier {
        Classifier::builtin_with(self.classifier.rules.iter().cloned())
    }

    pub fn network_prefilter(&self) -> Prefilter {
        Prefilter::network().with_patterns(self.prefilter.path_patterns.iter().cloned())
    }

    pub fn page_prefilter(&self) -> Prefilter {
        Prefilter::page().with_patterns(self.prefilter.path_patterns.iter().cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let c = EngineConfig::default();
        assert_eq!(c.effective_store_path(), PathBuf::from("envirotrack.db"));
        assert_eq!(c.effective_max_pending_age(), Duration::from_secs(300));
        assert_eq!(c.effective_correction(), CorrectionModel::Flat);
        assert_eq!(c.capacities(), Capacities { log: 50, history: 100 });
    }

    #[test]
    fn test_full_toml() {
        let c = EngineConfig::from_toml(
            r#"
            [store]
            path = "/tmp/x.db"

            [pending]
            max_age_secs = 60

            [log]
            capacity = 10

            [metrics]
            correction = "duration_weighted"
            storage_retries = 3

            [platforms.mistral]
            display_name = "Le Chat"
            energy_per_query_kwh = 0.0003
            carbon_intensity_kg_per_kwh = 0.056
            water_l_per_kwh = 1.5

            [[classifier.rules]]
            domain = "mistral.ai"
            platform = "mistral"

            [prefilter]
            path_patterns = ["/v1/agents"]
            "#,
        )
        .unwrap();

        assert_eq!(c.effective_store_path(), PathBuf::from("/tmp/x.db"));
        assert_eq!(c.effective_max_pending_age(), Duration::from_secs(60));
        assert_eq!(c.capacities().log, 10);
        assert_eq!(c.effective_correction(), CorrectionModel::DurationWeighted);
        assert_eq!(c.effective_storage_retries(), 3);

        let mistral = PlatformId::new("mistral");
        assert!(c.profile_table().contains(&mistral));
        assert!(c.profile_table().contains(&PlatformId::new("chatgpt")));
        assert_eq!(
            c.classifier().classify("https://chat.mistral.ai/api/chat"),
            Some(mistral)
        );
        assert!(
            c.page_prefilter()
                .looks_like_ai_endpoint("https://x.test/v1/agents/run", None)
        );
    }

    #[test]
    fn test_rule_for_unknown_platform_is_rejected() {
        let c = EngineConfig::from_toml(
            r#"
            [[classifier.rules]]
            host = "chat.example.org"
            platform = "nobody"
            "#,
        )
        .unwrap();
        assert!(matches!(c.validate(), Err(Error::UnknownPlatform(p)) if p == "nobody"));
    }

    #[test]
    fn test_load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("envirotrack.toml");
        std::fs::write(&path, "[pending]\nmax_age_secs = 5\n").unwrap();
        let c = EngineConfig::load(Some(&path)).unwrap();
        assert_eq!(c.effective_max_pending_age(), Duration::from_secs(5));
        assert!(EngineConfig::load(None).unwrap().pending.max_age_secs.is_none());
    }

    #[test]
    fn test_bad_toml_is_config_error() {
        let err = EngineConfig::from_toml("[metrics]\ncorrection = \"quantum\"").unwrap_err();
        assert!(matches!(err, crate::Error::Config(_)));
    }
}
