//! Nodes, devices and positions

use crate::radio::{CellId, RadioParams};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Constant position in metres.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Position {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn distance_to(&self, other: &Position) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MacAddress(pub [u8; 6]);

impl MacAddress {
    /// Locally administered address derived from a counter.
    pub fn from_index(index: u64) -> Self {
        let b = index.to_be_bytes();
        Self([0x02, b[3], b[4], b[5], b[6], b[7]])
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            m[0], m[1], m[2], m[3], m[4], m[5]
        )
    }
}

/// A device is addressed by its node and its index in the node's device list.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId {
    pub node: NodeId,
    pub index: u32,
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.node.0, self.index)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceClass {
    PointToPoint,
    EpcTunnel,
    CellularEnb,
    CellularUe,
    WifiAp,
    WifiSta,
}

#[derive(Clone, Debug)]
pub enum DeviceKind {
    PointToPoint { peer: Option<DeviceId> },
    EpcTunnel,
    CellularEnb { cell: CellId },
    CellularUe { cell: Option<CellId>, csg_id: u32 },
    WifiAp { cell: CellId },
    WifiSta { ssid: String, ap: Option<DeviceId> },
}

impl DeviceKind {
    pub fn class(&self) -> DeviceClass {
        match self {
            DeviceKind::PointToPoint { .. } => DeviceClass::PointToPoint,
            DeviceKind::EpcTunnel => DeviceClass::EpcTunnel,
            DeviceKind::CellularEnb { .. } => DeviceClass::CellularEnb,
            DeviceKind::CellularUe { .. } => DeviceClass::CellularUe,
            DeviceKind::WifiAp { .. } => DeviceClass::WifiAp,
            DeviceKind::WifiSta { .. } => DeviceClass::WifiSta,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Device {
    pub id: DeviceId,
    pub mac: MacAddress,
    pub kind: DeviceKind,
    pub radio: Option<RadioParams>,
}

#[derive(Clone, Debug)]
pub struct Node {
    pub id: NodeId,
    pub label: String,
    pub position: Position,
    pub devices: Vec<Device>,
}

impl Node {
    pub fn new(id: NodeId, label: impl Into<String>) -> Self {
        Self {
            id,
            label: label.into(),
            position: Position::default(),
            devices: Vec::new(),
        }
    }

    pub fn device(&self, index: u32) -> Option<&Device> {
        self.devices.get(index as usize)
    }

    pub fn device_mut(&mut self, index: u32) -> Option<&mut Device> {
        self.devices.get_mut(index as usize)
    }

    pub fn first_device(&self, class: DeviceClass) -> Option<&Device> {
        self.devices.iter().find(|d| d.kind.class() == class)
    }
}
