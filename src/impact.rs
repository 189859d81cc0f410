//! Estimated environmental cost of browsing time. The model is deliberately simple: time is
//! converted into page views, page views into CO2, CO2 into energy and energy into water.

use std::ops::{Add, AddAssign};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImpactFactors {
    /// Average pages loaded per minute of browsing.
    pub pages_per_minute: f64,
    /// Grams of CO2 per page view.
    pub co2_per_page_view: f64,
    /// Wh per gram of CO2.
    pub co2_to_wh: f64,
    /// Liters of water per Wh.
    pub wh_to_water: f64,
}

impl Default for ImpactFactors {
    fn default() -> Self {
        Self {
            pages_per_minute: 2.5,
            co2_per_page_view: 0.5,
            co2_to_wh: 2.,
            wh_to_water: 0.001,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Impact {
    pub energy_wh: f64,
    pub water_liters: f64,
    pub co2_grams: f64,
}

impl ImpactFactors {
    pub fn impact(&self, seconds: u64) -> Impact {
        let minutes = seconds as f64 / 60.;
        let page_views = minutes * self.pages_per_minute;
        let co2_grams = page_views * self.co2_per_page_view;
        let energy_wh = co2_grams * self.co2_to_wh;
        let water_liters = energy_wh * self.wh_to_water;

        Impact {
            energy_wh: round_to(energy_wh, 4),
            water_liters: round_to(water_liters, 6),
            co2_grams: round_to(co2_grams, 4),
        }
    }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    (value * scale).round() / scale
}

impl Add for Impact {
    type Output = Impact;

    fn add(self, rhs: Self) -> Self::Output {
        Impact {
            energy_wh: self.energy_wh + rhs.energy_wh,
            water_liters: self.water_liters + rhs.water_liters,
            co2_grams: self.co2_grams + rhs.co2_grams,
        }
    }
}

impl AddAssign for Impact {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}
