//! Scenario lifecycle
//!
//! A run moves through fixed phases: topology, technology attachment and
//! addressing, traffic generators, measurement, the clock run itself, and
//! finally reconciliation and reporting. Configuration problems surface
//! from [`ScenarioOrchestrator::new`] before any node exists.

use crate::arrivals::{schedule_arrivals, ArrivalProcess};
use crate::attach::{attach_operator, AttachedOperator, Endpoint, OperatorNodes};
use crate::config::ScenarioConfig;
use crate::duty_cycle::DutyCyclePattern;
use crate::errors::Result;
use crate::reconcile::{reconcile, FlowSummary, Reconciliation};
use crate::rem::{write_gnuplot_files, write_rem, RemSource};
use crate::report::append_report;
use crate::routing::association_listener;
use crate::timeline::PhaseTimeline;
use crate::types::{Operator, PhyParameters, Technology, Transport};
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use spectrum_sim::{
    AppId, Application, FileTransferClient, MonitorId, PacketSink, Position, PropagationModel,
    Scheduler, Simulator, UdpClient, UdpServer, World,
};
use std::net::SocketAddrV4;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const UDP_PORT: u16 = 9;
pub const UDP_PAYLOAD_BYTES: u32 = 1000;
pub const TCP_PORT: u16 = 50000;
pub const FILE_SIZE_BYTES: u64 = 512_000;
pub const SEGMENT_SIZE_BYTES: u32 = 1448;

/// Packet interval that saturates a 75 Mb/s cell with a single UE
const UDP_BASE_INTERVAL: Duration = Duration::from_micros(106);
/// Client start times are spread over this window
const START_JITTER_SECS: f64 = 0.1;

/// Received power at the two reference distances, for logging.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct LinkBudget {
    /// From base station A to its own UE
    pub rx_power_d1_dbm: f64,
    /// From base station A to the other operator's UE
    pub rx_power_d2_dbm: f64,
}

impl LinkBudget {
    pub fn compute(model: &PropagationModel, phy: &PhyParameters, d1: f64, d2: f64) -> Self {
        let bs = phy.base_station;
        let ue = phy.user_equipment;
        let rx = |d: f64| model.rx_power_dbm(bs.tx_power_dbm, bs.tx_gain_db, ue.rx_gain_db, d);
        Self {
            rx_power_d1_dbm: rx(d1),
            rx_power_d2_dbm: rx(d2),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DutyCycleSummary {
    pub requested: f64,
    pub realized: f64,
    pub pattern: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct OperatorOutcome {
    pub operator: Operator,
    pub technology: Technology,
    pub endpoints: Vec<Endpoint>,
    /// Every flow the monitor saw, in flow-id order
    pub flows: Vec<FlowSummary>,
    pub reconciliation: Reconciliation,
    /// Report file the results were appended to, if it could be opened
    pub report_file: Option<PathBuf>,
}

#[derive(Clone, Debug, Serialize)]
pub struct ScenarioOutcome {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub sim_tag: String,
    pub transport: Transport,
    pub simulation_params: String,
    pub duty_cycle: DutyCycleSummary,
    pub link_budget: LinkBudget,
    pub timeline: PhaseTimeline,
    /// Set in spectrum map mode, where no traffic runs
    pub rem_file: Option<PathBuf>,
    pub operators: Vec<OperatorOutcome>,
    pub events_executed: u64,
    pub dropped_packets: u64,
}

impl ScenarioOutcome {
    pub fn operator(&self, operator: Operator) -> Option<&OperatorOutcome> {
        self.operators.iter().find(|o| o.operator == operator)
    }
}

pub struct ScenarioOrchestrator {
    config: ScenarioConfig,
    timeline: PhaseTimeline,
    pattern: DutyCyclePattern,
    model: PropagationModel,
}

impl ScenarioOrchestrator {
    /// Validate the configuration and derive the phase timings and the
    /// blanking pattern.
    pub fn new(config: ScenarioConfig) -> Result<Self> {
        config.validate()?;
        let timeline = config.timeline()?;
        let pattern = DutyCyclePattern::generate(config.lte_duty_cycle)?;
        Ok(Self {
            config,
            timeline,
            pattern,
            model: PropagationModel::default(),
        })
    }

    pub fn config(&self) -> &ScenarioConfig {
        &self.config
    }

    pub fn timeline(&self) -> &PhaseTimeline {
        &self.timeline
    }

    pub fn pattern(&self) -> &DutyCyclePattern {
        &self.pattern
    }

    pub fn link_budget(&self) -> LinkBudget {
        LinkBudget::compute(&self.model, &self.config.phy, self.config.d1, self.config.d2)
    }

    /// `d1 d2 rxPowerD1 rxPowerD2 dutyCycle`
    pub fn simulation_params(&self) -> String {
        let budget = self.link_budget();
        format!(
            "{} {} {} {} {}",
            self.config.d1,
            self.config.d2,
            budget.rx_power_d1_dbm,
            budget.rx_power_d2_dbm,
            self.config.lte_duty_cycle
        )
    }

    fn udp_interval(nodes: &OperatorNodes) -> Duration {
        let ues = nodes.user_equipment.len().max(1) as u32;
        let cells = nodes.base_stations.len().max(1) as u32;
        UDP_BASE_INTERVAL * ues / cells
    }

    /// Execute the scenario end to end.
    pub fn run(self) -> Result<ScenarioOutcome> {
        let started_at = Utc::now();
        let config = &self.config;
        let timeline = self.timeline;
        let simulation_params = self.simulation_params();

        info!(
            "Running simulation for {} sec of data transfer; {} sec overall",
            timeline.duration.as_secs_f64(),
            timeline.simulation_stop.as_secs_f64()
        );
        info!(
            "duty cycle: requested {}, actual {}, pattern {}",
            config.lte_duty_cycle,
            self.pattern.realized(),
            self.pattern
        );
        info!("Simulation parameters: {}", simulation_params);

        let mut sim = Simulator::new(World::new(config.seed, self.model));
        let mut rng = StdRng::seed_from_u64(config.seed);

        // Phase 1: topology
        let deployments = build_topology(sim.world_mut(), config)?;
        for nodes in &deployments {
            info!(
                "Operator {}: {}; number of cells {}; number of UEs {}",
                nodes.operator,
                config.technology(nodes.operator),
                nodes.base_stations.len(),
                nodes.user_equipment.len()
            );
        }

        // Phases 2 and 3: attachment, addressing, routing
        let (world, scheduler) = sim.parts_mut();
        if Operator::ALL
            .iter()
            .any(|op| config.technology(*op) == Technology::ContentionBased)
        {
            world.add_association_listener(association_listener());
        }
        let mut attached = Vec::with_capacity(deployments.len());
        for nodes in &deployments {
            attached.push(attach_operator(
                world,
                scheduler,
                nodes,
                config.technology(nodes.operator),
                &config.phy,
                &self.pattern,
            )?);
        }

        if config.generate_rem {
            let rem_file = self.write_spectrum_map(world, &deployments)?;
            return Ok(ScenarioOutcome {
                started_at,
                finished_at: Utc::now(),
                sim_tag: config.sim_tag.clone(),
                transport: config.transport,
                simulation_params,
                duty_cycle: self.duty_cycle_summary(),
                link_budget: self.link_budget(),
                timeline,
                rem_file: Some(rem_file),
                operators: Vec::new(),
                events_executed: 0,
                dropped_packets: 0,
            });
        }

        // Phase 4: traffic
        let mut file_clients = Vec::new();
        for (nodes, op) in deployments.iter().zip(&attached) {
            let start_jitter = Duration::from_secs_f64(rng.gen_range(0.0..START_JITTER_SECS));
            match config.transport {
                Transport::Datagram => install_datagram_traffic(
                    world,
                    scheduler,
                    op,
                    &timeline,
                    Self::udp_interval(nodes),
                    start_jitter,
                )?,
                Transport::Streamed => file_clients.extend(install_streamed_traffic(
                    world,
                    scheduler,
                    op,
                    &timeline,
                    start_jitter,
                )?),
            }
        }
        if config.transport == Transport::Streamed {
            let process = ArrivalProcess::new(
                file_clients.len(),
                config.mean_file_gap()?,
                timeline.client_stop,
                rng.gen(),
            )?;
            let trigger = move |world: &mut World, s: &mut Scheduler<World>, target: usize| {
                if let Err(e) = world.send_file(s, file_clients[target]) {
                    warn!("File arrival on client {} failed: {}", target, e);
                }
            };
            let first = schedule_arrivals(scheduler, process, timeline.client_start, trigger);
            debug!("First file arrival at {:?}", first);
        }

        // Phase 5: measurement and run
        let monitors: Vec<MonitorId> = attached
            .iter()
            .map(|op| world.install_flow_monitor(op.monitored_nodes()))
            .collect();
        sim.stop_at(timeline.simulation_stop);
        let stats = sim.run();
        info!(
            "Simulation finished at {:?} after {} events",
            stats.end_time, stats.events_executed
        );

        // Phase 6: reconciliation and reports
        let world = sim.world();
        let mut operators = Vec::with_capacity(attached.len());
        for (op, monitor) in attached.into_iter().zip(monitors) {
            operators.push(self.report_operator(world, op, monitor)?);
        }

        Ok(ScenarioOutcome {
            started_at,
            finished_at: Utc::now(),
            sim_tag: config.sim_tag.clone(),
            transport: config.transport,
            simulation_params,
            duty_cycle: self.duty_cycle_summary(),
            link_budget: self.link_budget(),
            timeline,
            rem_file: None,
            operators,
            events_executed: stats.events_executed,
            dropped_packets: world.dropped_packets(),
        })
    }

    fn duty_cycle_summary(&self) -> DutyCycleSummary {
        DutyCycleSummary {
            requested: self.config.lte_duty_cycle,
            realized: self.pattern.realized(),
            pattern: self.pattern.to_bit_string(),
        }
    }

    fn write_spectrum_map(&self, world: &World, deployments: &[OperatorNodes; 2]) -> Result<PathBuf> {
        let rem = &self.config.rem;
        let [a, b] = deployments;
        write_gnuplot_files(&rem.dir, world, a, b)?;

        let mut sources = Vec::new();
        for bs in deployments.iter().flat_map(|d| d.base_stations.iter()) {
            sources.push(RemSource {
                position: world.position(*bs)?,
                radio: self.config.phy.base_station,
            });
        }
        write_rem(rem, &self.model, &sources, &self.config.phy.user_equipment)
    }

    fn report_operator(&self, world: &World, op: AttachedOperator, monitor: MonitorId) -> Result<OperatorOutcome> {
        let config = &self.config;
        let duration = self.timeline.duration;
        let mut records = world.flow_records(monitor)?;
        records.sort_by_key(|r| r.flow_id);
        let flows: Vec<FlowSummary> = records
            .iter()
            .map(|r| FlowSummary::from_record(r, duration))
            .collect();

        let reconciliation = reconcile(&records, config.transport, duration)?;
        for flow in &reconciliation.unmatched {
            warn!(
                "Operator {}: flow {} ({} -> {}) has no reverse direction, left out of the report",
                op.operator, flow.flow_id, flow.source, flow.destination
            );
        }
        info!(
            "Operator {}: {} flows, {:.3} Mbps downlink",
            op.operator,
            flows.len(),
            reconciliation.downlink_throughput_mbps()
        );

        let path = config.report_path(op.operator);
        let report_file = match append_report(&path, &reconciliation) {
            Ok(_) => Some(path),
            Err(e) => {
                warn!("Can't open file {}: {}", path.display(), e);
                None
            }
        };

        Ok(OperatorOutcome {
            operator: op.operator,
            technology: op.technology,
            endpoints: op.endpoints,
            flows,
            reconciliation,
            report_file,
        })
    }
}

/// One base station and one UE per operator, plus a backhaul client each.
///
/// ```text
///   y
///   d1  UE A ---------- BS B
///    |
///   0   BS A ---------- UE B
///       0               d2   x
/// ```
fn build_topology(world: &mut World, config: &ScenarioConfig) -> Result<[OperatorNodes; 2]> {
    let (d1, d2) = (config.d1, config.d2);
    let bs_a = world.create_node("bs-A");
    let bs_b = world.create_node("bs-B");
    let ue_a = world.create_node("ue-A");
    let ue_b = world.create_node("ue-B");
    world.set_position(bs_a, Position::new(0.0, 0.0, 0.0))?;
    world.set_position(bs_b, Position::new(d2, d1, 0.0))?;
    world.set_position(ue_a, Position::new(0.0, d1, 0.0))?;
    world.set_position(ue_b, Position::new(d2, 0.0, 0.0))?;
    let client_a = world.create_node("client-A");
    let client_b = world.create_node("client-B");

    Ok([
        OperatorNodes {
            operator: Operator::A,
            base_stations: vec![bs_a],
            user_equipment: vec![ue_a],
            client: client_a,
        },
        OperatorNodes {
            operator: Operator::B,
            base_stations: vec![bs_b],
            user_equipment: vec![ue_b],
            client: client_b,
        },
    ])
}

/// UDP servers on the endpoints and one constant bit rate client per
/// endpoint on the backhaul client. The clients of one operator share a
/// start offset.
fn install_datagram_traffic(
    world: &mut World,
    scheduler: &mut Scheduler<World>,
    op: &AttachedOperator,
    timeline: &PhaseTimeline,
    interval: Duration,
    start_jitter: Duration,
) -> Result<()> {
    for endpoint in &op.endpoints {
        let server = world.install_application(
            endpoint.node,
            Application::UdpServer(UdpServer::new(UDP_PORT)),
        )?;
        World::schedule_start(scheduler, server, timeline.server_start);
        World::schedule_stop(scheduler, server, timeline.server_stop);
    }
    for endpoint in &op.endpoints {
        let remote = SocketAddrV4::new(endpoint.address, UDP_PORT);
        let client = world.install_application(
            op.client,
            Application::UdpClient(UdpClient::new(remote, UDP_PAYLOAD_BYTES, interval)),
        )?;
        let start = timeline.client_start.saturating_add(start_jitter);
        World::schedule_start(scheduler, client, start);
        World::schedule_stop(scheduler, client, timeline.client_stop);
    }
    debug!(
        "Operator {}: {} UDP flows every {:?}, start offset {:?}",
        op.operator,
        op.endpoints.len(),
        interval,
        start_jitter
    );
    Ok(())
}

/// Packet sinks on the endpoints and one file-transfer client per endpoint.
/// Returns the clients in endpoint order.
fn install_streamed_traffic(
    world: &mut World,
    scheduler: &mut Scheduler<World>,
    op: &AttachedOperator,
    timeline: &PhaseTimeline,
    start_jitter: Duration,
) -> Result<Vec<AppId>> {
    for endpoint in &op.endpoints {
        let sink = world.install_application(
            endpoint.node,
            Application::PacketSink(PacketSink::new(TCP_PORT)),
        )?;
        World::schedule_start(scheduler, sink, timeline.server_start);
    }
    let mut clients = Vec::with_capacity(op.endpoints.len());
    for endpoint in &op.endpoints {
        let remote = SocketAddrV4::new(endpoint.address, TCP_PORT);
        let transfer = FileTransferClient::new(remote, FILE_SIZE_BYTES, SEGMENT_SIZE_BYTES);
        let client = world.install_application(op.client, Application::FileTransfer(transfer))?;
        let start = timeline.client_start.saturating_add(start_jitter);
        World::schedule_start(scheduler, client, start);
        clients.push(client);
    }
    Ok(clients)
}
