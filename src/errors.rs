//! Error types for scenario orchestration

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoexistError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid duty cycle {0}: must be within [0, 1]")]
    InvalidDutyCycle(f64),

    #[error("Invalid phase timeline: {0}")]
    InvalidTimeline(String),

    #[error("Invalid transport: {0}")]
    InvalidTransport(String),

    #[error("Invalid technology: {0}")]
    InvalidTechnology(String),

    #[error("Malformed association context: {0}")]
    MalformedContext(String),

    #[error("Route setup failed: {0}")]
    Routing(String),

    #[error("Flow consistency violated: {0}")]
    Consistency(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Engine error: {0}")]
    Engine(#[from] spectrum_sim::EngineError),
}

pub type Result<T> = std::result::Result<T, CoexistError>;
