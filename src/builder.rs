//! Builder for scenario configurations

use crate::config::{RemConfig, ScenarioConfig, TimingConfig};
use crate::errors::Result;
use crate::orchestrator::ScenarioOrchestrator;
use crate::types::{PhyParameters, Technology, Transport};
use std::path::PathBuf;

/// Fluent construction of a [`ScenarioConfig`], starting from the defaults
#[derive(Clone, Debug, Default)]
pub struct ScenarioBuilder {
    config: ScenarioConfig,
}

impl ScenarioBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing configuration
    pub fn from_config(config: ScenarioConfig) -> Self {
        Self { config }
    }

    /// Load configuration from JSON
    pub fn from_json(json: &str) -> Result<Self> {
        let config: ScenarioConfig = serde_json::from_str(json)?;
        Ok(Self { config })
    }

    /// Intra-cell and inter-cell distances in meters
    pub fn distances(mut self, d1: f64, d2: f64) -> Self {
        self.config.d1 = d1;
        self.config.d2 = d2;
        self
    }

    pub fn duration_secs(mut self, secs: f64) -> Self {
        self.config.duration_secs = secs;
        self
    }

    pub fn technologies(mut self, a: Technology, b: Technology) -> Self {
        self.config.cell_config_a = a;
        self.config.cell_config_b = b;
        self
    }

    pub fn transport(mut self, transport: Transport) -> Self {
        self.config.transport = transport;
        self
    }

    pub fn lte_duty_cycle(mut self, duty_cycle: f64) -> Self {
        self.config.lte_duty_cycle = duty_cycle;
        self
    }

    pub fn generate_rem(mut self, enabled: bool) -> Self {
        self.config.generate_rem = enabled;
        self
    }

    pub fn sim_tag(mut self, tag: impl Into<String>) -> Self {
        self.config.sim_tag = tag.into();
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = dir.into();
        self
    }

    pub fn output_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.output_prefix = prefix.into();
        self
    }

    /// File arrivals per second for streamed transport
    pub fn ftp_lambda(mut self, lambda: f64) -> Self {
        self.config.ftp_lambda = lambda;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.config.seed = seed;
        self
    }

    pub fn phy(mut self, phy: PhyParameters) -> Self {
        self.config.phy = phy;
        self
    }

    pub fn timing(mut self, timing: TimingConfig) -> Self {
        self.config.timing = timing;
        self
    }

    pub fn rem(mut self, rem: RemConfig) -> Self {
        self.config.rem = rem;
        self
    }

    /// Validate and return the configuration
    pub fn build(self) -> Result<ScenarioConfig> {
        self.config.validate()?;
        Ok(self.config)
    }

    /// Validate and prepare an orchestrator for the configuration
    pub fn orchestrator(self) -> Result<ScenarioOrchestrator> {
        ScenarioOrchestrator::new(self.build()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::CoexistError;

    #[test]
    fn test_builder_overrides() {
        let config = ScenarioBuilder::new()
            .distances(5.0, 20.0)
            .technologies(Technology::ContentionBased, Technology::ContentionBased)
            .transport(Transport::Streamed)
            .lte_duty_cycle(0.5)
            .sim_tag("campaign")
            .seed(7)
            .build()
            .unwrap();
        assert_eq!(config.d1, 5.0);
        assert_eq!(config.d2, 20.0);
        assert_eq!(config.cell_config_a, Technology::ContentionBased);
        assert_eq!(config.transport, Transport::Streamed);
        assert_eq!(config.sim_tag, "campaign");
        assert_eq!(config.seed, 7);
    }

    #[test]
    fn test_build_validates() {
        let err = ScenarioBuilder::new().duration_secs(0.0).build().unwrap_err();
        assert!(matches!(err, CoexistError::InvalidTimeline(_)));

        let err = ScenarioBuilder::new().lte_duty_cycle(2.0).orchestrator().err().unwrap();
        assert!(matches!(err, CoexistError::InvalidDutyCycle(_)));
    }

    #[test]
    fn test_from_json_keeps_defaults() {
        let builder = ScenarioBuilder::from_json(r#"{"lte_duty_cycle": 0.25}"#).unwrap();
        let config = builder.ftp_lambda(2.0).build().unwrap();
        assert_eq!(config.lte_duty_cycle, 0.25);
        assert_eq!(config.ftp_lambda, 2.0);
        assert_eq!(config.output_prefix, "laa_wifi_simple");
    }
}
