//! Radio parameters and rate adaptation

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RadioParams {
    pub tx_power_dbm: f64,
    pub tx_gain_db: f64,
    pub rx_gain_db: f64,
    pub noise_figure_db: f64,
}

impl RadioParams {
    pub fn eirp_dbm(&self) -> f64 {
        self.tx_power_dbm + self.tx_gain_db
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellId(pub u32);

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RadioTechnology {
    Cellular,
    Wifi,
}

pub const CHANNEL_BANDWIDTH_HZ: f64 = 20e6;

/// Clear channel assessment threshold for Wi-Fi preambles
pub const WIFI_CCA_THRESHOLD_DBM: f64 = -82.0;
/// Energy detection threshold applied to non-Wi-Fi signals
pub const ENERGY_DETECTION_THRESHOLD_DBM: f64 = -62.0;

const CELLULAR_EFFICIENCY: f64 = 0.75;
const CELLULAR_MAX_RATE_BPS: f64 = 75e6;
pub const CELLULAR_MIN_SINR_DB: f64 = -6.5;

/// Cellular downlink rate for a given SINR; zero below the lowest usable
/// modulation.
pub fn cellular_rate_bps(sinr_db: f64, bandwidth_hz: f64) -> f64 {
    if !(sinr_db >= CELLULAR_MIN_SINR_DB) {
        return 0.0;
    }
    let sinr = 10f64.powf(sinr_db / 10.0);
    (bandwidth_hz * CELLULAR_EFFICIENCY * (1.0 + sinr).log2()).min(CELLULAR_MAX_RATE_BPS)
}

/// 802.11n single-stream 20 MHz rates with the minimum SNR each needs.
const WIFI_RATES: [(f64, f64); 8] = [
    (2.0, 6.5e6),
    (5.0, 13.0e6),
    (9.0, 19.5e6),
    (11.0, 26.0e6),
    (15.0, 39.0e6),
    (18.0, 52.0e6),
    (20.0, 58.5e6),
    (25.0, 65.0e6),
];

/// Highest rate sustainable at `snr_db`, if any.
pub fn wifi_rate_bps(snr_db: f64) -> Option<f64> {
    WIFI_RATES
        .iter()
        .rev()
        .find(|(threshold, _)| snr_db >= *threshold)
        .map(|(_, rate)| *rate)
}
