//! Everyday equivalents for accumulated energy and carbon.

use serde::Serialize;

/// Wh needed to fully charge a typical smartphone.
const PHONE_CHARGE_WH: f64 = 12.0;
/// g CO2 emitted per km by an average passenger car.
const CAR_CO2_G_PER_KM: f64 = 120.0;
/// g CO2 absorbed by one tree in a year.
const TREE_CO2_G_PER_YEAR: f64 = 21_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Equivalents {
    pub phones_charged: f64,
    pub km_driven: f64,
    pub tree_years: f64,
}

impl Equivalents {
    pub fn from_totals(energy_kwh: f64, co2_grams: f64) -> Self {
        Equivalents {
            phones_charged: energy_kwh * 1000.0 / PHONE_CHARGE_WH,
            km_driven: co2_grams / CAR_CO2_G_PER_KM,
            tree_years: co2_grams / TREE_CO2_G_PER_YEAR,
        }
    }
}
