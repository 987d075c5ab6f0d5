//! Scenario configuration
//!
//! Everything a run needs is carried in one immutable [`ScenarioConfig`],
//! loaded from JSON or assembled with [`ScenarioBuilder`](crate::ScenarioBuilder).
//! Missing JSON fields fall back to the defaults below.

use crate::duty_cycle::DutyCyclePattern;
use crate::errors::{CoexistError, Result};
use crate::timeline::PhaseTimeline;
use crate::types::{Operator, PhyParameters, Technology, Transport};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Offsets of the application phases, in seconds
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// When servers and sinks start
    pub server_start_secs: f64,
    /// When traffic sources start
    pub client_start_secs: f64,
    /// How long servers outlive the clients
    pub server_linger_secs: f64,
    /// How long the run continues after the servers stop
    pub simulation_linger_secs: f64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            server_start_secs: 3.0,
            client_start_secs: 3.0,
            server_linger_secs: 5.0,
            simulation_linger_secs: 5.0,
        }
    }
}

/// Grid of the radio environment map
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemConfig {
    pub x_min: f64,
    pub x_max: f64,
    pub x_resolution: u32,
    pub y_min: f64,
    pub y_max: f64,
    pub y_resolution: u32,
    /// Height of the sampled plane in meters
    pub z: f64,
    /// Directory receiving the map and the gnuplot label files
    pub dir: PathBuf,
}

impl Default for RemConfig {
    fn default() -> Self {
        Self {
            x_min: -50.0,
            x_max: 250.0,
            x_resolution: 600,
            y_min: -50.0,
            y_max: 250.0,
            y_resolution: 600,
            z: 1.5,
            dir: PathBuf::from("./"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioConfig {
    /// Distance between a base station and its own UE (m)
    pub d1: f64,
    /// Distance between the two base stations' columns (m)
    pub d2: f64,
    /// Data transfer duration in seconds
    pub duration_secs: f64,
    pub cell_config_a: Technology,
    pub cell_config_b: Technology,
    pub transport: Transport,
    /// Fraction of subframes a cellular operator may transmit in
    pub lte_duty_cycle: f64,
    /// Write the radio environment map and skip the traffic phase
    pub generate_rem: bool,
    /// Tag appended to report file names
    pub sim_tag: String,
    pub output_dir: PathBuf,
    pub output_prefix: String,
    /// File arrivals per second for streamed transport
    pub ftp_lambda: f64,
    pub seed: u64,
    pub phy: PhyParameters,
    pub timing: TimingConfig,
    pub rem: RemConfig,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            d1: 10.0,
            d2: 50.0,
            duration_secs: 1.0,
            cell_config_a: Technology::Cellular,
            cell_config_b: Technology::ContentionBased,
            transport: Transport::Datagram,
            lte_duty_cycle: 1.0,
            generate_rem: false,
            sim_tag: "default".to_string(),
            output_dir: PathBuf::from("./"),
            output_prefix: "laa_wifi_simple".to_string(),
            ftp_lambda: 0.5,
            seed: 1,
            phy: PhyParameters::default(),
            timing: TimingConfig::default(),
            rem: RemConfig::default(),
        }
    }
}

impl ScenarioConfig {
    /// Load configuration from JSON
    pub fn from_json(json: &str) -> Result<Self> {
        let config: ScenarioConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [("d1", self.d1), ("d2", self.d2)] {
            if !value.is_finite() || value < 0.0 {
                return Err(CoexistError::InvalidConfig(format!(
                    "{} must be a non-negative distance, got {}",
                    name, value
                )));
            }
        }

        DutyCyclePattern::generate(self.lte_duty_cycle)?;
        self.timeline()?;

        self.mean_file_gap()?;

        if self.output_prefix.is_empty() {
            return Err(CoexistError::InvalidConfig(
                "output_prefix must not be empty".to_string(),
            ));
        }

        for params in [self.phy.base_station, self.phy.user_equipment] {
            let values = [
                params.tx_power_dbm,
                params.tx_gain_db,
                params.rx_gain_db,
                params.noise_figure_db,
            ];
            if values.iter().any(|v| !v.is_finite()) {
                return Err(CoexistError::InvalidConfig(format!(
                    "radio parameters must be finite: {:?}",
                    params
                )));
            }
        }

        if self.generate_rem {
            let rem = &self.rem;
            if rem.x_resolution < 2 || rem.y_resolution < 2 {
                return Err(CoexistError::InvalidConfig(
                    "REM resolution must be at least 2 points per axis".to_string(),
                ));
            }
            if !(rem.x_min < rem.x_max) || !(rem.y_min < rem.y_max) {
                return Err(CoexistError::InvalidConfig(format!(
                    "REM bounds are empty: x [{}, {}], y [{}, {}]",
                    rem.x_min, rem.x_max, rem.y_min, rem.y_max
                )));
            }
        }

        Ok(())
    }

    /// Phase timings derived from the timing offsets and the duration
    pub fn timeline(&self) -> Result<PhaseTimeline> {
        if !self.duration_secs.is_finite() || self.duration_secs < 0.0 {
            return Err(CoexistError::InvalidTimeline(format!(
                "duration must be a non-negative number of seconds, got {}",
                self.duration_secs
            )));
        }
        let duration = Duration::try_from_secs_f64(self.duration_secs).map_err(|_| {
            CoexistError::InvalidTimeline(format!(
                "duration is out of range: {} s",
                self.duration_secs
            ))
        })?;
        PhaseTimeline::new(duration, &self.timing)
    }

    /// Mean time between file arrivals, `1 / ftp_lambda`
    pub fn mean_file_gap(&self) -> Result<Duration> {
        let invalid = || {
            CoexistError::InvalidConfig(format!(
                "ftp_lambda must give a positive, representable mean gap, got {}",
                self.ftp_lambda
            ))
        };
        if !self.ftp_lambda.is_finite() || self.ftp_lambda <= 0.0 {
            return Err(invalid());
        }
        match Duration::try_from_secs_f64(1.0 / self.ftp_lambda) {
            Ok(gap) if !gap.is_zero() => Ok(gap),
            _ => Err(invalid()),
        }
    }

    pub fn technology(&self, operator: Operator) -> Technology {
        match operator {
            Operator::A => self.cell_config_a,
            Operator::B => self.cell_config_b,
        }
    }

    /// `<output_dir>/<prefix>_<sim_tag>_operatorA|B`
    pub fn report_path(&self, operator: Operator) -> PathBuf {
        self.output_dir.join(format!(
            "{}_{}_{}",
            self.output_prefix,
            self.sim_tag,
            operator.report_suffix()
        ))
    }
}
