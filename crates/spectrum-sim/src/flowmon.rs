//! Flow monitors
//!
//! A monitor watches a set of nodes. Packets sent by a watched node are
//! classified into flows by five-tuple; flow ids are assigned on first sight
//! starting at 1. A reception is counted when the packet reaches a watched
//! destination node.

use crate::ip::FiveTuple;
use crate::packet::Packet;
use crate::topology::NodeId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MonitorId(pub u32);

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowStats {
    pub tx_packets: u64,
    pub tx_bytes: u64,
    pub rx_packets: u64,
    pub rx_bytes: u64,
    pub delay_sum: Duration,
    pub jitter_sum: Duration,
    pub last_delay: Duration,
    pub time_first_tx_packet: Duration,
    pub time_last_tx_packet: Duration,
    pub time_first_rx_packet: Duration,
    pub time_last_rx_packet: Duration,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FlowRecord {
    pub flow_id: u32,
    pub tuple: FiveTuple,
    pub stats: FlowStats,
}

#[derive(Debug, Default)]
pub(crate) struct FlowMonitor {
    nodes: BTreeSet<NodeId>,
    flow_ids: HashMap<FiveTuple, u32>,
    flows: Vec<FlowRecord>,
    in_flight: HashMap<u64, (u32, Duration)>,
}

impl FlowMonitor {
    pub(crate) fn new(nodes: impl IntoIterator<Item = NodeId>) -> Self {
        Self {
            nodes: nodes.into_iter().collect(),
            ..Default::default()
        }
    }

    pub(crate) fn watches(&self, node: NodeId) -> bool {
        self.nodes.contains(&node)
    }

    pub(crate) fn record_tx(&mut self, node: NodeId, packet: &Packet, now: Duration) {
        if !self.watches(node) {
            return;
        }
        let flow_id = match self.flow_ids.get(&packet.tuple) {
            Some(id) => *id,
            None => {
                let id = self.flows.len() as u32 + 1;
                self.flow_ids.insert(packet.tuple, id);
                self.flows.push(FlowRecord {
                    flow_id: id,
                    tuple: packet.tuple,
                    stats: FlowStats {
                        time_first_tx_packet: now,
                        ..Default::default()
                    },
                });
                id
            }
        };
        let stats = &mut self.flows[(flow_id - 1) as usize].stats;
        stats.tx_packets += 1;
        stats.tx_bytes += u64::from(packet.size);
        stats.time_last_tx_packet = now;
        self.in_flight.insert(packet.uid, (flow_id, now));
    }

    pub(crate) fn record_rx(&mut self, node: NodeId, packet: &Packet, now: Duration) {
        if !self.watches(node) {
            return;
        }
        let Some((flow_id, sent)) = self.in_flight.remove(&packet.uid) else {
            return;
        };
        let stats = &mut self.flows[(flow_id - 1) as usize].stats;
        let delay = now.saturating_sub(sent);
        if stats.rx_packets > 0 {
            let jitter = if delay > stats.last_delay {
                delay - stats.last_delay
            } else {
                stats.last_delay - delay
            };
            stats.jitter_sum += jitter;
        } else {
            stats.time_first_rx_packet = now;
        }
        stats.delay_sum += delay;
        stats.last_delay = delay;
        stats.rx_packets += 1;
        stats.rx_bytes += u64::from(packet.size);
        stats.time_last_rx_packet = now;
    }

    /// Records in flow-id order.
    pub(crate) fn records(&self) -> Vec<FlowRecord> {
        self.flows.clone()
    }
}
