//! Coexistence experiments for LAA and Wi-Fi sharing unlicensed spectrum
//!
//! This crate orchestrates two operators, each deploying either a duty-cycled
//! cellular network or a contention-based Wi-Fi network, with:
//! - Blanking patterns synthesized from a fractional duty cycle
//! - Phase-timed UDP or bulk file-transfer traffic from a backhaul host
//! - Poisson file arrivals alternating between the operators
//! - Per-operator flow statistics reconciled into report files
//!
//! The radio, MAC and IP behavior comes from the `spectrum-sim` engine.

pub mod arrivals;
pub mod attach;
pub mod builder;
pub mod config;
pub mod duty_cycle;
pub mod errors;
pub mod orchestrator;
pub mod reconcile;
pub mod rem;
pub mod report;
pub mod routing;
pub mod timeline;
pub mod types;

// Re-exports for public API
pub use arrivals::{next_target, schedule_arrivals, Arrival, ArrivalProcess};
pub use builder::ScenarioBuilder;
pub use config::{RemConfig, ScenarioConfig, TimingConfig};
pub use duty_cycle::DutyCyclePattern;
pub use errors::{CoexistError, Result};
pub use orchestrator::{LinkBudget, OperatorOutcome, ScenarioOrchestrator, ScenarioOutcome};
pub use reconcile::{reconcile, FlowPair, FlowSummary, Reconciliation};
pub use timeline::PhaseTimeline;
pub use types::*;
