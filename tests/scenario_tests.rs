//! End-to-end scenario runs
//!
//! These tests drive the full orchestrator over short timelines and check the
//! per-operator outcome and the report files it appends to.

use laacoexist::{
    Operator, ScenarioBuilder, ScenarioOutcome, Technology, TimingConfig, Transport,
};
use std::path::Path;

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_target(false)
        .with_test_writer()
        .try_init();
}

fn short_timing() -> TimingConfig {
    TimingConfig {
        server_start_secs: 0.1,
        client_start_secs: 0.2,
        server_linger_secs: 0.2,
        simulation_linger_secs: 0.1,
    }
}

fn run(
    dir: &Path,
    a: Technology,
    b: Technology,
    transport: Transport,
    duty_cycle: f64,
) -> ScenarioOutcome {
    init_logging();
    ScenarioBuilder::new()
        .technologies(a, b)
        .transport(transport)
        .lte_duty_cycle(duty_cycle)
        .duration_secs(0.5)
        .ftp_lambda(20.0)
        .timing(short_timing())
        .output_dir(dir)
        .sim_tag("test")
        .orchestrator()
        .unwrap()
        .run()
        .unwrap()
}

fn report_lines(path: &Path) -> Vec<Vec<String>> {
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|l| l.split(' ').map(str::to_string).collect())
        .collect()
}

#[test]
fn test_cellular_pair_udp() {
    let dir = tempfile::tempdir().unwrap();
    let outcome = run(
        dir.path(),
        Technology::Cellular,
        Technology::Cellular,
        Transport::Datagram,
        1.0,
    );

    assert_eq!(outcome.operators.len(), 2);
    assert!(outcome.rem_file.is_none());
    for op in &outcome.operators {
        assert_eq!(op.reconciliation.flows.len(), 1, "operator {}", op.operator);
        let flow = &op.reconciliation.flows[0];
        assert!(flow.rx_packets > 0, "operator {} received nothing", op.operator);
        assert!(flow.throughput_mbps > 0.0);
        assert!(flow.mean_delay_ms > 0.0);
        assert!(flow.source < flow.destination);

        let path = op.report_file.as_ref().unwrap();
        let lines = report_lines(path);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].len(), 11);
        assert_eq!(lines[0][0], flow.flow_id.to_string());
    }
    assert_eq!(
        outcome.operator(Operator::A).unwrap().reconciliation.flows[0].source.to_string(),
        "1.0.0.2"
    );
    assert!(dir.path().join("laa_wifi_simple_test_operatorB").exists());
}

#[test]
fn test_reference_cellular_run_with_default_timing() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let outcome = ScenarioBuilder::new()
        .distances(10.0, 50.0)
        .duration_secs(1.0)
        .technologies(Technology::Cellular, Technology::Cellular)
        .transport(Transport::Datagram)
        .lte_duty_cycle(1.0)
        .output_dir(dir.path())
        .sim_tag("reference")
        .orchestrator()
        .unwrap()
        .run()
        .unwrap();

    assert_eq!(outcome.timeline.simulation_stop.as_secs(), 14);
    assert_eq!(outcome.duty_cycle.realized, 1.0);
    for op in &outcome.operators {
        assert_eq!(op.reconciliation.flows.len(), 1, "operator {}", op.operator);
        let flow = &op.reconciliation.flows[0];
        assert!(
            (60.0..90.0).contains(&flow.throughput_mbps),
            "operator {} throughput {} Mbps",
            op.operator,
            flow.throughput_mbps
        );
        assert!(
            (10.0..40.0).contains(&flow.mean_delay_ms),
            "operator {} delay {} ms",
            op.operator,
            flow.mean_delay_ms
        );
        let lines = report_lines(op.report_file.as_ref().unwrap());
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].len(), 11);
    }
}

#[test]
fn test_reports_are_appended_across_runs() {
    let dir = tempfile::tempdir().unwrap();
    for _ in 0..2 {
        run(
            dir.path(),
            Technology::Cellular,
            Technology::ContentionBased,
            Transport::Datagram,
            1.0,
        );
    }
    let lines = report_lines(&dir.path().join("laa_wifi_simple_test_operatorA"));
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0], lines[1]);
}

#[test]
fn test_wifi_routes_are_installed_on_association() {
    let dir = tempfile::tempdir().unwrap();
    let outcome = run(
        dir.path(),
        Technology::ContentionBased,
        Technology::ContentionBased,
        Transport::Datagram,
        1.0,
    );

    for op in &outcome.operators {
        assert_eq!(op.technology, Technology::ContentionBased);
        let flow = &op.reconciliation.flows[0];
        assert!(flow.rx_packets > 0, "operator {} received nothing", op.operator);
    }
    let a = outcome.operator(Operator::A).unwrap();
    assert_eq!(a.endpoints[0].address.to_string(), "17.0.0.2");
    assert_eq!(a.flows[0].source.to_string(), "11.0.0.1");
}

#[test]
fn test_blanking_reduces_cellular_throughput() {
    let dir = tempfile::tempdir().unwrap();
    let throughput = |duty_cycle: f64| {
        let outcome = run(
            dir.path(),
            Technology::Cellular,
            Technology::ContentionBased,
            Transport::Datagram,
            duty_cycle,
        );
        outcome
            .operator(Operator::A)
            .unwrap()
            .reconciliation
            .downlink_throughput_mbps()
    };
    let full = throughput(1.0);
    let reduced = throughput(0.3);
    assert!(reduced < full, "duty 0.3 gave {} Mbps, duty 1.0 gave {} Mbps", reduced, full);
}

#[test]
fn test_streamed_transfers_pair_up() {
    let dir = tempfile::tempdir().unwrap();
    let outcome = run(
        dir.path(),
        Technology::Cellular,
        Technology::ContentionBased,
        Transport::Streamed,
        1.0,
    );

    for op in &outcome.operators {
        let pairs = &op.reconciliation.pairs;
        assert!(!pairs.is_empty(), "operator {} has no connection", op.operator);
        for pair in pairs {
            assert!(pair.downlink.source < pair.uplink.source);
            assert!(pair.downlink.rx_bytes > pair.uplink.rx_bytes);
        }
        let lines = report_lines(op.report_file.as_ref().unwrap());
        assert_eq!(lines.len(), pairs.len());
        assert!(lines.iter().all(|l| l.len() == 22));
    }
}

#[test]
fn test_spectrum_map_mode_skips_traffic() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let mut rem = laacoexist::RemConfig::default();
    rem.x_resolution = 10;
    rem.y_resolution = 10;
    rem.dir = dir.path().to_path_buf();

    let outcome = ScenarioBuilder::new()
        .generate_rem(true)
        .rem(rem)
        .output_dir(dir.path())
        .orchestrator()
        .unwrap()
        .run()
        .unwrap();

    assert!(outcome.operators.is_empty());
    let rem_file = outcome.rem_file.unwrap();
    assert_eq!(std::fs::read_to_string(rem_file).unwrap().lines().count(), 100);
    for name in [
        "bs_A_labels.gnuplot",
        "ue_A_labels.gnuplot",
        "bs_B_labels.gnuplot",
        "ue_B_labels.gnuplot",
        "bs_A.gnuplot",
        "ue_A.gnuplot",
        "bs_B.gnuplot",
        "ue_B.gnuplot",
    ] {
        assert!(dir.path().join(name).exists(), "{} missing", name);
    }
    assert!(!dir.path().join("laa_wifi_simple_default_operatorA").exists());
}

#[test]
fn test_missing_output_dir_skips_report() {
    let dir = tempfile::tempdir().unwrap();
    let outcome = run(
        &dir.path().join("does-not-exist"),
        Technology::Cellular,
        Technology::Cellular,
        Transport::Datagram,
        1.0,
    );
    assert!(outcome.operators.iter().all(|op| op.report_file.is_none()));
    assert!(outcome.operators.iter().all(|op| !op.flows.is_empty()));
}
