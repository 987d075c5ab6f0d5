//! Indoor log-distance propagation

use serde::{Deserialize, Serialize};

const SPEED_OF_LIGHT: f64 = 299_792_458.0;
const BOLTZMANN_DBM_PER_HZ: f64 = -174.0;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PropagationModel {
    pub frequency_hz: f64,
    pub exponent: f64,
    pub reference_distance_m: f64,
}

impl Default for PropagationModel {
    fn default() -> Self {
        Self::indoor(5.18e9)
    }
}

impl PropagationModel {
    /// Log-distance model with exponent 3, typical for indoor office space.
    pub fn indoor(frequency_hz: f64) -> Self {
        Self {
            frequency_hz,
            exponent: 3.0,
            reference_distance_m: 1.0,
        }
    }

    fn reference_loss_db(&self) -> f64 {
        let wavelength = SPEED_OF_LIGHT / self.frequency_hz;
        20.0 * (4.0 * std::f64::consts::PI * self.reference_distance_m / wavelength).log10()
    }

    /// Path loss in dB. Distances inside the reference distance get the
    /// reference loss.
    pub fn loss_db(&self, distance_m: f64) -> f64 {
        let d = distance_m.max(self.reference_distance_m);
        self.reference_loss_db() + 10.0 * self.exponent * (d / self.reference_distance_m).log10()
    }

    pub fn rx_power_dbm(&self, tx_power_dbm: f64, tx_gain_db: f64, rx_gain_db: f64, distance_m: f64) -> f64 {
        tx_power_dbm + tx_gain_db + rx_gain_db - self.loss_db(distance_m)
    }
}

pub fn thermal_noise_dbm(bandwidth_hz: f64, noise_figure_db: f64) -> f64 {
    BOLTZMANN_DBM_PER_HZ + 10.0 * bandwidth_hz.log10() + noise_figure_db
}

pub fn dbm_to_mw(dbm: f64) -> f64 {
    10f64.powf(dbm / 10.0)
}

pub fn mw_to_dbm(mw: f64) -> f64 {
    10.0 * mw.log10()
}
