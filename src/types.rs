//! Core types shared by configuration and orchestration

use crate::errors::{CoexistError, Result};
use serde::{Deserialize, Serialize};
use spectrum_sim::RadioParams;
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// Radio access technology an operator deploys
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Technology {
    /// Scheduled cellular access (LTE/LAA) with subframe blanking
    #[serde(rename = "Lte")]
    Cellular,
    /// Listen-before-talk access (Wi-Fi)
    #[serde(rename = "Wifi")]
    ContentionBased,
}

impl fmt::Display for Technology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Technology::Cellular => write!(f, "Lte"),
            Technology::ContentionBased => write!(f, "Wifi"),
        }
    }
}

impl FromStr for Technology {
    type Err = CoexistError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "lte" | "laa" => Ok(Technology::Cellular),
            "wifi" | "wi-fi" => Ok(Technology::ContentionBased),
            _ => Err(CoexistError::InvalidTechnology(s.to_string())),
        }
    }
}

/// Traffic model driven between backhaul client and endpoints
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Transport {
    /// Constant bit rate UDP
    #[serde(rename = "Udp")]
    Datagram,
    /// Bulk file transfers over a reliable stream
    #[serde(rename = "Tcp")]
    Streamed,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Datagram => write!(f, "Udp"),
            Transport::Streamed => write!(f, "Tcp"),
        }
    }
}

impl FromStr for Transport {
    type Err = CoexistError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "udp" => Ok(Transport::Datagram),
            "tcp" | "ftp" => Ok(Transport::Streamed),
            _ => Err(CoexistError::InvalidTransport(s.to_string())),
        }
    }
}

/// One of the two operators sharing the band
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Operator {
    A,
    B,
}

impl Operator {
    pub const ALL: [Operator; 2] = [Operator::A, Operator::B];

    pub fn label(&self) -> &'static str {
        match self {
            Operator::A => "A",
            Operator::B => "B",
        }
    }

    /// Suffix of the operator's report file
    pub fn report_suffix(&self) -> &'static str {
        match self {
            Operator::A => "operatorA",
            Operator::B => "operatorB",
        }
    }

    /// Closed subscriber group keeping UEs on their own operator's cells
    pub fn csg_id(&self) -> u32 {
        match self {
            Operator::A => 1,
            Operator::B => 2,
        }
    }

    pub fn ssid(&self) -> String {
        format!("coexist-80211n-{}", self.label())
    }

    /// Backhaul link between the client and the packet gateway
    pub fn cellular_backhaul(&self) -> (Ipv4Addr, u8) {
        match self {
            Operator::A => (Ipv4Addr::new(1, 0, 0, 0), 8),
            Operator::B => (Ipv4Addr::new(2, 0, 0, 0), 8),
        }
    }

    /// Backhaul links between the client and each access point
    pub fn wifi_backhaul(&self) -> (Ipv4Addr, u8) {
        match self {
            Operator::A => (Ipv4Addr::new(11, 0, 0, 0), 16),
            Operator::B => (Ipv4Addr::new(12, 0, 0, 0), 16),
        }
    }

    /// Wireless side of the access points and stations
    pub fn wifi_wireless(&self) -> (Ipv4Addr, u8) {
        match self {
            Operator::A => (Ipv4Addr::new(17, 0, 0, 0), 16),
            Operator::B => (Ipv4Addr::new(18, 0, 0, 0), 16),
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Radio parameters per role, fixed for the whole run
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PhyParameters {
    /// Base stations and access points
    pub base_station: RadioParams,
    /// UEs and stations
    pub user_equipment: RadioParams,
}

impl Default for PhyParameters {
    fn default() -> Self {
        Self {
            base_station: RadioParams {
                tx_power_dbm: 18.0,
                tx_gain_db: 5.0,
                rx_gain_db: 5.0,
                noise_figure_db: 5.0,
            },
            user_equipment: RadioParams {
                tx_power_dbm: 18.0,
                tx_gain_db: 0.0,
                rx_gain_db: 0.0,
                noise_figure_db: 9.0,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_technology_names() {
        assert_eq!("Lte".parse::<Technology>().unwrap(), Technology::Cellular);
        assert_eq!("wifi".parse::<Technology>().unwrap(), Technology::ContentionBased);
        assert!(matches!(
            "Bluetooth".parse::<Technology>(),
            Err(CoexistError::InvalidTechnology(_))
        ));
        assert_eq!(Technology::ContentionBased.to_string(), "Wifi");
    }

    #[test]
    fn test_transport_names() {
        assert_eq!("Udp".parse::<Transport>().unwrap(), Transport::Datagram);
        assert_eq!("TCP".parse::<Transport>().unwrap(), Transport::Streamed);
        assert!(matches!(
            "Sctp".parse::<Transport>(),
            Err(CoexistError::InvalidTransport(_))
        ));
        assert_eq!(serde_json::to_string(&Transport::Streamed).unwrap(), "\"Tcp\"");
    }

    #[test]
    fn test_operator_plan() {
        assert_eq!(Operator::A.ssid(), "coexist-80211n-A");
        assert_eq!(Operator::B.csg_id(), 2);
        assert_eq!(Operator::B.report_suffix(), "operatorB");
        assert_eq!(Operator::A.wifi_wireless(), (Ipv4Addr::new(17, 0, 0, 0), 16));
    }
}
