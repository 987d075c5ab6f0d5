//! Per-operator report files and console summaries
//!
//! Report files are space separated, without a header, and opened in
//! append mode so repeated runs of a campaign accumulate in one file.
//! Datagram runs write one line per flow:
//!
//! `flowId src dst txPackets txBytes offeredMbps rxBytes throughputMbps meanDelayMs meanJitterMs rxPackets`
//!
//! Streamed runs write the downlink fields followed by the uplink fields.

use crate::errors::Result;
use crate::reconcile::{FlowSummary, Reconciliation};
use crate::types::Transport;
use std::fmt::Write as _;
use std::fs::OpenOptions;
use std::path::Path;
use tracing::debug;

pub const DATAGRAM_FIELDS: usize = 11;
pub const STREAMED_FIELDS: usize = 2 * DATAGRAM_FIELDS;

fn summary_fields(summary: &FlowSummary) -> [String; DATAGRAM_FIELDS] {
    [
        summary.flow_id.to_string(),
        summary.source.to_string(),
        summary.destination.to_string(),
        summary.tx_packets.to_string(),
        summary.tx_bytes.to_string(),
        summary.offered_mbps.to_string(),
        summary.rx_bytes.to_string(),
        summary.throughput_mbps.to_string(),
        summary.mean_delay_ms.to_string(),
        summary.mean_jitter_ms.to_string(),
        summary.rx_packets.to_string(),
    ]
}

/// Report lines for a reconciliation, one record per line
pub fn report_records(reconciliation: &Reconciliation) -> Vec<Vec<String>> {
    match reconciliation.transport {
        Transport::Datagram => reconciliation
            .flows
            .iter()
            .map(|flow| summary_fields(flow).to_vec())
            .collect(),
        Transport::Streamed => reconciliation
            .pairs
            .iter()
            .map(|pair| {
                let mut record = summary_fields(&pair.downlink).to_vec();
                record.extend(summary_fields(&pair.uplink));
                record
            })
            .collect(),
    }
}

/// Append the reconciliation to `path`. Returns the number of lines written.
pub fn append_report(path: &Path, reconciliation: &Reconciliation) -> Result<usize> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let mut wtr = csv::WriterBuilder::new()
        .delimiter(b' ')
        .has_headers(false)
        .quote_style(csv::QuoteStyle::Never)
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(file);

    let records = report_records(reconciliation);
    for record in &records {
        wtr.write_record(record)?;
    }
    wtr.flush()?;
    debug!("Appended {} lines to {}", records.len(), path.display());
    Ok(records.len())
}

/// Human readable per-flow statistics of one monitor.
pub fn console_summary(monitor_label: &str, flows: &[FlowSummary]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "--------monitor{}----------", monitor_label);
    for flow in flows {
        let _ = writeln!(out, "Flow {} ({} -> {})", flow.flow_id, flow.source, flow.destination);
        let _ = writeln!(out, "  Tx Packets: {}", flow.tx_packets);
        let _ = writeln!(out, "  Tx Bytes:   {}", flow.tx_bytes);
        let _ = writeln!(out, "  TxOffered:  {} Mbps", flow.offered_mbps);
        let _ = writeln!(out, "  Rx Bytes:   {}", flow.rx_bytes);
        let _ = writeln!(out, "  Throughput: {} Mbps", flow.throughput_mbps);
        let _ = writeln!(out, "  Mean delay:  {} ms", flow.mean_delay_ms);
        let _ = writeln!(out, "  Mean jitter:  {} ms", flow.mean_jitter_ms);
        let _ = writeln!(out, "  Rx Packets: {}", flow.rx_packets);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::FlowPair;
    use std::net::Ipv4Addr;

    fn summary(flow_id: u32, src: [u8; 4], dst: [u8; 4]) -> FlowSummary {
        FlowSummary {
            flow_id,
            source: Ipv4Addr::from(src),
            destination: Ipv4Addr::from(dst),
            tx_packets: 100,
            tx_bytes: 102_800,
            offered_mbps: 0.8224,
            rx_bytes: 51_400,
            throughput_mbps: 0.5,
            mean_delay_ms: 2.5,
            mean_jitter_ms: 0.0,
            rx_packets: 50,
        }
    }

    #[test]
    fn test_datagram_lines_append() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("laa_wifi_simple_default_operatorA");
        let reconciliation = Reconciliation {
            transport: Transport::Datagram,
            flows: vec![summary(1, [1, 0, 0, 2], [7, 0, 0, 2])],
            pairs: Vec::new(),
            unmatched: Vec::new(),
        };

        assert_eq!(append_report(&path, &reconciliation).unwrap(), 1);
        assert_eq!(append_report(&path, &reconciliation).unwrap(), 1);

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(
            lines[0],
            "1 1.0.0.2 7.0.0.2 100 102800 0.8224 51400 0.5 2.5 0 50"
        );
        assert_eq!(lines[0].split(' ').count(), DATAGRAM_FIELDS);
    }

    #[test]
    fn test_streamed_lines_hold_both_directions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report");
        let reconciliation = Reconciliation {
            transport: Transport::Streamed,
            flows: Vec::new(),
            pairs: vec![FlowPair {
                downlink: summary(1, [11, 0, 0, 1], [17, 0, 0, 2]),
                uplink: summary(2, [17, 0, 0, 2], [11, 0, 0, 1]),
            }],
            unmatched: vec![summary(3, [11, 0, 0, 1], [17, 0, 0, 3])],
        };
        append_report(&path, &reconciliation).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        let fields: Vec<&str> = contents.trim_end().split(' ').collect();
        assert_eq!(fields.len(), STREAMED_FIELDS);
        assert_eq!(fields[0], "1");
        assert_eq!(fields[11], "2");
        assert!(!contents.contains("17.0.0.3"));
    }

    #[test]
    fn test_unopenable_path_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("report");
        let reconciliation = Reconciliation {
            transport: Transport::Datagram,
            flows: Vec::new(),
            pairs: Vec::new(),
            unmatched: Vec::new(),
        };
        assert!(append_report(&path, &reconciliation).is_err());
    }

    #[test]
    fn test_console_summary() {
        let text = console_summary("B", &[summary(4, [2, 0, 0, 2], [7, 0, 0, 3])]);
        assert!(text.starts_with("--------monitorB----------\n"));
        assert!(text.contains("Flow 4 (2.0.0.2 -> 7.0.0.3)"));
        assert!(text.contains("  Throughput: 0.5 Mbps"));
    }
}
