//! Flow record reconciliation
//!
//! Turns the raw per-direction records of a flow monitor into report
//! structures. Datagram traffic only flows downlink, so every record is
//! reported on its own. Streamed traffic produces a data flow and an
//! acknowledgement flow per connection; the two are paired by reversed
//! five-tuple.

use crate::errors::{CoexistError, Result};
use crate::types::Transport;
use serde::Serialize;
use spectrum_sim::{FiveTuple, FlowRecord};
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::time::Duration;

/// Derived metrics of one flow, in report units.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FlowSummary {
    pub flow_id: u32,
    pub source: Ipv4Addr,
    pub destination: Ipv4Addr,
    pub tx_packets: u64,
    pub tx_bytes: u64,
    pub offered_mbps: f64,
    pub rx_bytes: u64,
    pub throughput_mbps: f64,
    pub mean_delay_ms: f64,
    pub mean_jitter_ms: f64,
    pub rx_packets: u64,
}

fn mean_ms(sum: Duration, packets: u64) -> f64 {
    if packets == 0 {
        return 0.0;
    }
    1000.0 * sum.as_secs_f64() / packets as f64
}

impl FlowSummary {
    /// Offered load is averaged over the whole transfer `duration`;
    /// throughput over the receiver's window, from first transmission to
    /// last reception.
    pub fn from_record(record: &FlowRecord, duration: Duration) -> Self {
        let stats = &record.stats;
        let duration_secs = duration.as_secs_f64();
        let offered_mbps = if duration_secs > 0.0 {
            stats.tx_bytes as f64 * 8.0 / duration_secs / 1e6
        } else {
            0.0
        };

        let rx_window = stats
            .time_last_rx_packet
            .checked_sub(stats.time_first_tx_packet)
            .unwrap_or_default()
            .as_secs_f64();
        let throughput_mbps = if stats.rx_packets > 0 && rx_window > 0.0 {
            stats.rx_bytes as f64 * 8.0 / rx_window / 1e6
        } else {
            0.0
        };

        Self {
            flow_id: record.flow_id,
            source: record.tuple.source_address,
            destination: record.tuple.destination_address,
            tx_packets: stats.tx_packets,
            tx_bytes: stats.tx_bytes,
            offered_mbps,
            rx_bytes: stats.rx_bytes,
            throughput_mbps,
            mean_delay_ms: mean_ms(stats.delay_sum, stats.rx_packets),
            mean_jitter_ms: mean_ms(stats.jitter_sum, stats.rx_packets),
            rx_packets: stats.rx_packets,
        }
    }
}

/// Both directions of one streamed connection.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FlowPair {
    pub downlink: FlowSummary,
    pub uplink: FlowSummary,
}

/// Pair records whose five-tuples are mirror images.
///
/// Records are visited in flow-id order. A record whose mirror is pending
/// completes a pair and both leave the pending set; otherwise it becomes
/// pending itself. The downlink side is the record with the numerically
/// smaller source address. Returns the pairs in completion order and the
/// records left pending, in flow-id order.
pub fn pair_streams(records: &[FlowRecord]) -> (Vec<(FlowRecord, FlowRecord)>, Vec<FlowRecord>) {
    let mut ordered: Vec<&FlowRecord> = records.iter().collect();
    ordered.sort_by_key(|r| r.flow_id);

    let mut pending: HashMap<FiveTuple, &FlowRecord> = HashMap::new();
    let mut pairs = Vec::new();
    for record in ordered {
        match pending.remove(&record.tuple.reversed()) {
            Some(mirror) => {
                let (downlink, uplink) = if record.tuple.source_address < mirror.tuple.source_address {
                    (record, mirror)
                } else {
                    (mirror, record)
                };
                pairs.push((downlink.clone(), uplink.clone()));
            }
            None => {
                pending.insert(record.tuple, record);
            }
        }
    }

    let mut unmatched: Vec<FlowRecord> = pending.into_values().cloned().collect();
    unmatched.sort_by_key(|r| r.flow_id);
    (pairs, unmatched)
}

/// Every datagram flow must run from the backhaul towards an endpoint,
/// which the address plan makes numerically increasing.
pub fn check_datagrams(records: &[FlowRecord]) -> Result<()> {
    for record in records {
        let t = &record.tuple;
        if t.source_address >= t.destination_address {
            return Err(CoexistError::Consistency(format!(
                "flow {} ({} -> {}) is probably not downlink",
                record.flow_id, t.source_address, t.destination_address
            )));
        }
    }
    Ok(())
}

/// Reconciled view of one monitor's records.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Reconciliation {
    pub transport: Transport,
    /// Datagram flows in flow-id order
    pub flows: Vec<FlowSummary>,
    /// Streamed connections in pairing order
    pub pairs: Vec<FlowPair>,
    /// Streamed records with no mirror; left out of the report file
    pub unmatched: Vec<FlowSummary>,
}

impl Reconciliation {
    /// Sum of downlink throughput over all reported flows
    pub fn downlink_throughput_mbps(&self) -> f64 {
        match self.transport {
            Transport::Datagram => self.flows.iter().map(|f| f.throughput_mbps).sum(),
            Transport::Streamed => self.pairs.iter().map(|p| p.downlink.throughput_mbps).sum(),
        }
    }
}

pub fn reconcile(records: &[FlowRecord], transport: Transport, duration: Duration) -> Result<Reconciliation> {
    let summarize = |r: &FlowRecord| FlowSummary::from_record(r, duration);
    match transport {
        Transport::Datagram => {
            check_datagrams(records)?;
            let mut ordered: Vec<&FlowRecord> = records.iter().collect();
            ordered.sort_by_key(|r| r.flow_id);
            Ok(Reconciliation {
                transport,
                flows: ordered.into_iter().map(summarize).collect(),
                pairs: Vec::new(),
                unmatched: Vec::new(),
            })
        }
        Transport::Streamed => {
            let (pairs, unmatched) = pair_streams(records);
            Ok(Reconciliation {
                transport,
                flows: Vec::new(),
                pairs: pairs
                    .iter()
                    .map(|(down, up)| FlowPair {
                        downlink: summarize(down),
                        uplink: summarize(up),
                    })
                    .collect(),
                unmatched: unmatched.iter().map(summarize).collect(),
            })
        }
    }
}
