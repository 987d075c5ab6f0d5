//! Error types for the simulation engine

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Node not found: {0}")]
    NodeNotFound(u32),

    #[error("Device {index} not found on node {node}")]
    DeviceNotFound { node: u32, index: u32 },

    #[error("Application not found: {0}")]
    AppNotFound(u32),

    #[error("Flow monitor not found: {0}")]
    MonitorNotFound(u32),

    #[error("No cell with SSID {0}")]
    UnknownSsid(String),

    #[error("No cellular cell accepts the UE on node {node} (CSG {csg_id})")]
    NoCellForUe { node: u32, csg_id: u32 },

    #[error("Address pool exhausted: {0}")]
    AddressPoolExhausted(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
