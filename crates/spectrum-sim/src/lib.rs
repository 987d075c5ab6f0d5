//! Discrete-event engine for shared-spectrum coexistence scenarios
//!
//! This crate provides the primitives a coexistence experiment is built from:
//! - A discrete-event clock with FIFO ordering among equal timestamps
//! - Nodes with constant positions and IPv4 stacks with static routing
//! - A shared spectrum channel with log-distance indoor propagation
//! - Duty-cycled cellular cells and CSMA/CA Wi-Fi devices
//! - UDP and bulk file-transfer applications
//! - Per-endpoint flow monitors producing [`FlowRecord`] batches

pub mod apps;
pub mod cellular;
pub mod channel;
pub mod errors;
pub mod flowmon;
pub mod ip;
pub mod packet;
pub mod propagation;
pub mod radio;
pub mod simulator;
pub mod topology;
pub mod wifi;
pub mod world;

// Re-exports for public API
pub use apps::{AppId, Application, FileTransferClient, PacketSink, UdpClient, UdpServer};
pub use cellular::{CellularConfig, BLANKING_PATTERN_LEN, EPC_GATEWAY_ADDRESS, EPC_NETWORK, EPC_PREFIX_LEN};
pub use errors::{EngineError, Result};
pub use flowmon::{FlowRecord, FlowStats, MonitorId};
pub use ip::{FiveTuple, Ipv4AddressHelper, PROTO_TCP, PROTO_UDP};
pub use propagation::PropagationModel;
pub use radio::{CellId, RadioParams, RadioTechnology};
pub use simulator::{RunStats, Scheduler, Simulator};
pub use topology::{DeviceClass, DeviceId, MacAddress, NodeId, Position};
pub use world::{AssociationListener, World};
