use crate::platform::PlatformProfile;
use serde::{Deserialize, Serialize};

/// How per-query energy is scaled by request duration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrectionModel {
    /// Flat per-query estimate; the factor is always 1.
    #[default]
    Flat,
    /// `1 + complexity * ln(1 + seconds)`; 1 when the profile has no complexity.
    DurationWeighted,
}

impl CorrectionModel {
    pub fn factor(self, duration_ms: u64, complexity: Option<f64>) -> f64 {
        match self {
            CorrectionModel::Flat => 1.0,
            CorrectionModel::DurationWeighted => match complexity {
                Some(c) if c > 0.0 && c.is_finite() => {
                    let secs = duration_ms as f64 / 1000.0;
                    1.0 + c * secs.ln_1p()
                }
                _ => 1.0,
            },
        }
    }
}

/// Metrics attributed to a single completed request.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct DerivedMetrics {
    pub elapsed_seconds: f64,
    pub energy_kwh: f64,
    pub co2_grams: f64,
    pub water_ml: f64,
}

impl DerivedMetrics {
    pub fn derive(profile: &PlatformProfile, duration_ms: u64, model: CorrectionModel) -> Self {
        let energy_kwh = profile.energy_per_query_kwh
            * model.factor(duration_ms, profile.compute_complexity);
        DerivedMetrics {
            elapsed_seconds: duration_ms as f64 / 1000.0,
            energy_kwh,
            co2_grams: energy_kwh * profile.carbon_intensity_kg_per_kwh * 1000.0,
            water_ml: energy_kwh * profile.water_l_per_kwh * 1000.0,
        }
    }
}
