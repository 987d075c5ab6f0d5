//! CLI command implementations
//!
//! Kept apart from main.rs so configuration resolution can be unit tested.

use anyhow::{Context, Result};
use clap::Args;
use laacoexist::report::console_summary;
use laacoexist::{DutyCyclePattern, ScenarioConfig, ScenarioOrchestrator, Technology, Transport};
use std::path::PathBuf;
use tracing::info;

/// Options of the 'run' command. Flags override values from `--config`.
#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// Scenario configuration file (JSON)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Distance between a base station and its own UE (m)
    #[arg(long)]
    pub d1: Option<f64>,

    /// Distance between the two cells (m)
    #[arg(long)]
    pub d2: Option<f64>,

    /// Data transfer duration (seconds)
    #[arg(long)]
    pub duration: Option<f64>,

    /// Technology of operator A (Lte or Wifi)
    #[arg(long)]
    pub cell_config_a: Option<Technology>,

    /// Technology of operator B (Lte or Wifi)
    #[arg(long)]
    pub cell_config_b: Option<Technology>,

    /// Traffic transport (Udp or Tcp)
    #[arg(long)]
    pub transport: Option<Transport>,

    /// Duty cycle of cellular operators, in [0, 1]
    #[arg(long)]
    pub lte_duty_cycle: Option<f64>,

    /// File arrivals per second for Tcp transport
    #[arg(long)]
    pub ftp_lambda: Option<f64>,

    /// Write the radio environment map instead of running traffic
    #[arg(long)]
    pub generate_rem: bool,

    /// Tag appended to report file names
    #[arg(long)]
    pub sim_tag: Option<String>,

    /// Directory receiving the report files
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// Random seed
    #[arg(long)]
    pub seed: Option<u64>,

    /// Print the run outcome as JSON instead of per-flow statistics
    #[arg(long)]
    pub json: bool,
}

/// Merge the configuration file, if any, with the command-line overrides.
pub fn resolve_config(args: &RunArgs) -> Result<ScenarioConfig> {
    let mut config = match &args.config {
        Some(path) => ScenarioConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => ScenarioConfig::default(),
    };

    if let Some(d1) = args.d1 {
        config.d1 = d1;
    }
    if let Some(d2) = args.d2 {
        config.d2 = d2;
    }
    if let Some(duration) = args.duration {
        config.duration_secs = duration;
    }
    if let Some(technology) = args.cell_config_a {
        config.cell_config_a = technology;
    }
    if let Some(technology) = args.cell_config_b {
        config.cell_config_b = technology;
    }
    if let Some(transport) = args.transport {
        config.transport = transport;
    }
    if let Some(duty_cycle) = args.lte_duty_cycle {
        config.lte_duty_cycle = duty_cycle;
    }
    if let Some(lambda) = args.ftp_lambda {
        config.ftp_lambda = lambda;
    }
    if args.generate_rem {
        config.generate_rem = true;
    }
    if let Some(tag) = &args.sim_tag {
        config.sim_tag = tag.clone();
    }
    if let Some(dir) = &args.output_dir {
        config.output_dir = dir.clone();
    }
    if let Some(seed) = args.seed {
        config.seed = seed;
    }

    config.validate()?;
    Ok(config)
}

/// Implementation of the 'run' command
pub fn cmd_run(args: RunArgs) -> Result<()> {
    let config = resolve_config(&args)?;
    info!(
        "Running scenario {} ({} / {}, {})",
        config.sim_tag, config.cell_config_a, config.cell_config_b, config.transport
    );

    let outcome = ScenarioOrchestrator::new(config)?.run()?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        return Ok(());
    }

    if let Some(rem) = &outcome.rem_file {
        println!("REM written to {}", rem.display());
        return Ok(());
    }
    for op in &outcome.operators {
        print!("{}", console_summary(op.operator.label(), &op.flows));
    }
    for op in &outcome.operators {
        if let Some(path) = &op.report_file {
            info!("Operator {} report: {}", op.operator, path.display());
        }
    }
    Ok(())
}

/// Implementation of the 'duty-cycle' command
pub fn cmd_duty_cycle(value: f64) -> Result<()> {
    let pattern = DutyCyclePattern::generate(value)?;
    println!(
        "duty cycle: requested {}, actual {}, pattern {}",
        value,
        pattern.realized(),
        pattern
    );
    println!("active subframes: {} of 40", pattern.active_slots());
    Ok(())
}

/// Implementation of the 'config' command
pub fn cmd_config() -> Result<()> {
    println!("{}", ScenarioConfig::default().to_json()?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_flags() {
        let config = resolve_config(&RunArgs::default()).unwrap();
        assert_eq!(config, ScenarioConfig::default());
    }

    #[test]
    fn test_flags_override_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scenario.json");
        std::fs::write(&path, r#"{"d1": 20.0, "d2": 80.0, "transport": "Tcp"}"#).unwrap();

        let args = RunArgs {
            config: Some(path),
            d2: Some(30.0),
            cell_config_b: Some(Technology::Cellular),
            ..Default::default()
        };
        let config = resolve_config(&args).unwrap();
        assert_eq!(config.d1, 20.0);
        assert_eq!(config.d2, 30.0);
        assert_eq!(config.transport, Transport::Streamed);
        assert_eq!(config.cell_config_b, Technology::Cellular);
    }

    #[test]
    fn test_invalid_override_is_rejected() {
        let args = RunArgs {
            lte_duty_cycle: Some(1.5),
            ..Default::default()
        };
        assert!(resolve_config(&args).is_err());
    }
}
