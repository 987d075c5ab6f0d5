//! Duty-cycled cellular cells and the packet core
//!
//! Each cell transmits downlink data in 1 ms subframes. A 40-entry blanking
//! pattern marks the subframes in which the cell stays silent; the pattern
//! repeats every 40 ms. Link adaptation uses the SINR measured in the
//! previous transmission to each UE, and failed subframes are retried.
//!
//! The packet core is a single gateway node reached over point-to-point
//! links. It owns the UE address pool and tunnels downlink packets to the
//! serving cell. Uplink traffic reaches the gateway after a fixed latency.

use crate::errors::{EngineError, Result};
use crate::ip::Ipv4AddressHelper;
use crate::packet::Packet;
use crate::propagation::{dbm_to_mw, mw_to_dbm, thermal_noise_dbm};
use crate::radio::{cellular_rate_bps, CellId, RadioParams, RadioTechnology, CELLULAR_MIN_SINR_DB};
use crate::simulator::Scheduler;
use crate::topology::{DeviceId, DeviceKind, NodeId};
use crate::world::World;
use std::collections::VecDeque;
use std::net::Ipv4Addr;
use std::time::Duration;
use tracing::{debug, trace};

pub const SUBFRAME: Duration = Duration::from_millis(1);
pub const BLANKING_PATTERN_LEN: usize = 40;
pub const UPLINK_LATENCY: Duration = Duration::from_millis(4);

pub const EPC_NETWORK: Ipv4Addr = Ipv4Addr::new(7, 0, 0, 0);
pub const EPC_PREFIX_LEN: u8 = 8;
pub const EPC_GATEWAY_ADDRESS: Ipv4Addr = Ipv4Addr::new(7, 0, 0, 1);

const MAX_ATTEMPTS: u8 = 4;

#[derive(Clone, Debug, PartialEq)]
pub struct CellularConfig {
    /// Closed subscriber group; UEs only attach to cells with their group
    pub csg_id: u32,
    /// `true` marks a blanked subframe
    pub blanking: [bool; BLANKING_PATTERN_LEN],
    pub bandwidth_hz: f64,
}

impl CellularConfig {
    pub fn new(csg_id: u32) -> Self {
        Self {
            csg_id,
            blanking: [false; BLANKING_PATTERN_LEN],
            bandwidth_hz: crate::radio::CHANNEL_BANDWIDTH_HZ,
        }
    }

    pub fn with_blanking(mut self, blanking: [bool; BLANKING_PATTERN_LEN]) -> Self {
        self.blanking = blanking;
        self
    }
}

pub(crate) struct UeContext {
    device: DeviceId,
    sinr_estimate_db: f64,
}

struct QueuedPacket {
    ue: DeviceId,
    packet: Packet,
    attempts: u8,
}

pub(crate) struct CellularCell {
    enb: DeviceId,
    config: CellularConfig,
    ues: Vec<UeContext>,
    queue: VecDeque<QueuedPacket>,
    active: bool,
}

impl CellularCell {
    fn estimate(&self, ue: DeviceId) -> f64 {
        self.ues
            .iter()
            .find(|c| c.device == ue)
            .map_or(CELLULAR_MIN_SINR_DB, |c| c.sinr_estimate_db)
    }
}

pub(crate) struct EpcState {
    gateway: Option<(NodeId, DeviceId)>,
    pool: Ipv4AddressHelper,
}

impl Default for EpcState {
    fn default() -> Self {
        Self {
            gateway: None,
            // .1 belongs to the gateway
            pool: Ipv4AddressHelper::new(EPC_NETWORK, EPC_PREFIX_LEN).with_first_host(2),
        }
    }
}

fn next_subframe_boundary(now: Duration) -> Duration {
    let ms = now.as_nanos().div_ceil(SUBFRAME.as_nanos());
    Duration::from_millis(ms as u64)
}

fn subframe_index(now: Duration) -> usize {
    (now.as_nanos() / SUBFRAME.as_nanos()) as usize % BLANKING_PATTERN_LEN
}

impl World {
    pub fn install_cellular_enb(&mut self, node: NodeId, radio: RadioParams, config: CellularConfig) -> Result<DeviceId> {
        if !(config.bandwidth_hz > 0.0) {
            return Err(EngineError::InvalidParameter(format!(
                "cellular bandwidth must be positive, got {}",
                config.bandwidth_hz
            )));
        }
        let cell = CellId(self.cells.len() as u32);
        let enb = self.add_device(node, DeviceKind::CellularEnb { cell }, Some(radio))?;
        debug!(
            "Cell {} on node {} (CSG {}, {} blanked subframes)",
            cell,
            node,
            config.csg_id,
            config.blanking.iter().filter(|b| **b).count()
        );
        self.cells.push(CellularCell {
            enb,
            config,
            ues: Vec::new(),
            queue: VecDeque::new(),
            active: false,
        });
        Ok(enb)
    }

    pub fn install_cellular_ue(&mut self, node: NodeId, radio: RadioParams, csg_id: u32) -> Result<DeviceId> {
        self.add_device(node, DeviceKind::CellularUe { cell: None, csg_id }, Some(radio))
    }

    /// Attach a UE to the strongest cell of its closed subscriber group.
    pub fn attach_ue(&mut self, ue: DeviceId) -> Result<CellId> {
        let csg_id = match self.device(ue)?.kind {
            DeviceKind::CellularUe { csg_id, .. } => csg_id,
            _ => {
                return Err(EngineError::InvalidParameter(format!(
                    "device {} is not a cellular UE",
                    ue
                )))
            }
        };

        let mut best: Option<(CellId, f64)> = None;
        for (i, cell) in self.cells.iter().enumerate() {
            if cell.config.csg_id != csg_id {
                continue;
            }
            let rx = self.link_rx_power_dbm(cell.enb, ue)?;
            if best.map_or(true, |(_, p)| rx > p) {
                best = Some((CellId(i as u32), rx));
            }
        }
        let (cell, rx_dbm) = best.ok_or(EngineError::NoCellForUe {
            node: ue.node.0,
            csg_id,
        })?;

        let (_, ue_radio) = self.radio_endpoint(ue)?;
        let bandwidth = self.cells[cell.0 as usize].config.bandwidth_hz;
        let snr_db = rx_dbm - thermal_noise_dbm(bandwidth, ue_radio.noise_figure_db);

        self.device_mut(ue)?.kind = DeviceKind::CellularUe {
            cell: Some(cell),
            csg_id,
        };
        let state = &mut self.cells[cell.0 as usize];
        state.ues.retain(|c| c.device != ue);
        state.ues.push(UeContext {
            device: ue,
            sinr_estimate_db: snr_db,
        });
        debug!("UE {} attached to cell {} (rx {:.1} dBm)", ue, cell, rx_dbm);
        Ok(cell)
    }

    pub fn cell_of(&self, ue: DeviceId) -> Option<CellId> {
        match self.device(ue).ok()?.kind {
            DeviceKind::CellularUe { cell, .. } => cell,
            _ => None,
        }
    }

    /// The packet gateway node, created on first use.
    pub fn epc_gateway(&mut self) -> Result<NodeId> {
        if let Some((node, _)) = self.epc.gateway {
            return Ok(node);
        }
        let node = self.create_node("pgw");
        let tunnel = self.add_device(node, DeviceKind::EpcTunnel, None)?;
        self.assign_address(tunnel, EPC_GATEWAY_ADDRESS, EPC_PREFIX_LEN)?;
        self.epc.gateway = Some((node, tunnel));
        Ok(node)
    }

    /// Give a UE the next address from the packet core pool.
    pub fn assign_ue_address(&mut self, ue: DeviceId) -> Result<Ipv4Addr> {
        self.epc_gateway()?;
        let address = self.epc.pool.allocate()?;
        self.assign_address(ue, address, EPC_PREFIX_LEN)?;
        Ok(address)
    }

    fn link_rx_power_dbm(&self, tx: DeviceId, rx: DeviceId) -> Result<f64> {
        let (tx_pos, tx_radio) = self.radio_endpoint(tx)?;
        let (rx_pos, rx_radio) = self.radio_endpoint(rx)?;
        Ok(self.propagation().rx_power_dbm(
            tx_radio.tx_power_dbm,
            tx_radio.tx_gain_db,
            rx_radio.rx_gain_db,
            tx_pos.distance_to(&rx_pos),
        ))
    }

    pub(crate) fn epc_downlink(&mut self, scheduler: &mut Scheduler<World>, ue_address: Ipv4Addr, packet: Packet) {
        let target = self.cells.iter().enumerate().find_map(|(i, cell)| {
            cell.ues
                .iter()
                .find(|c| self.address_of(c.device) == Some(ue_address))
                .map(|c| (i, c.device))
        });
        let Some((index, ue)) = target else {
            trace!("No attached UE with address {}", ue_address);
            self.count_drop();
            return;
        };

        let limit = self.queue_limit;
        let cell = &mut self.cells[index];
        if cell.queue.len() >= limit {
            self.count_drop();
            return;
        }
        cell.queue.push_back(QueuedPacket {
            ue,
            packet,
            attempts: 0,
        });
        if !cell.active {
            cell.active = true;
            let cell_id = CellId(index as u32);
            scheduler.schedule_at(next_subframe_boundary(scheduler.now()), move |world: &mut World, s| {
                world.cellular_subframe(s, cell_id)
            });
        }
    }

    pub(crate) fn cellular_uplink(&mut self, scheduler: &mut Scheduler<World>, ue: DeviceId, packet: Packet) {
        let gateway = self.epc.gateway.map(|(node, _)| node);
        match (self.cell_of(ue), gateway) {
            (Some(_), Some(gateway)) => {
                scheduler.schedule(UPLINK_LATENCY, move |world: &mut World, s| {
                    world.ip_receive(s, gateway, packet)
                });
            }
            _ => self.count_drop(),
        }
    }

    fn cellular_subframe(&mut self, scheduler: &mut Scheduler<World>, cell_id: CellId) {
        let now = scheduler.now();
        let index = cell_id.0 as usize;
        let Some(cell) = self.cells.get_mut(index) else {
            return;
        };
        if cell.queue.is_empty() {
            cell.active = false;
            return;
        }
        if cell.config.blanking[subframe_index(now)] {
            scheduler.schedule(SUBFRAME, move |world: &mut World, s| {
                world.cellular_subframe(s, cell_id)
            });
            return;
        }

        // Fill the subframe in queue order at each UE's estimated rate
        let bandwidth = cell.config.bandwidth_hz;
        let floor_rate = cellular_rate_bps(CELLULAR_MIN_SINR_DB, bandwidth);
        let mut budget = SUBFRAME.as_secs_f64();
        let mut burst = Vec::new();
        while let Some(front) = cell.queue.front() {
            let rate = cellular_rate_bps(cell.estimate(front.ue), bandwidth).max(floor_rate);
            let airtime = f64::from(front.packet.size) * 8.0 / rate;
            if !burst.is_empty() && airtime > budget {
                break;
            }
            budget -= airtime;
            if let Some(queued) = cell.queue.pop_front() {
                burst.push((queued, rate));
            }
        }

        let enb = cell.enb;
        let Ok((position, radio)) = self.radio_endpoint(enb) else {
            return;
        };
        let end = now + SUBFRAME;
        let tx_id = self.channel.start_transmission(
            enb.node,
            position,
            RadioTechnology::Cellular,
            radio.eirp_dbm(),
            now,
            end,
        );
        scheduler.schedule(SUBFRAME, move |world: &mut World, s| {
            world.cellular_subframe_end(s, cell_id, tx_id, now, burst)
        });
    }

    fn cellular_subframe_end(
        &mut self,
        scheduler: &mut Scheduler<World>,
        cell_id: CellId,
        tx_id: u64,
        start: Duration,
        burst: Vec<(QueuedPacket, f64)>,
    ) {
        let end = scheduler.now();
        let index = cell_id.0 as usize;
        let Some(cell) = self.cells.get(index) else {
            return;
        };
        let enb = cell.enb;
        let bandwidth = cell.config.bandwidth_hz;

        let mut retry = Vec::new();
        for (mut queued, rate) in burst {
            let sinr_db = match self.downlink_sinr_db(enb, queued.ue, tx_id, bandwidth, start, end) {
                Ok(v) => v,
                Err(_) => {
                    self.count_drop();
                    continue;
                }
            };
            if let Some(ctx) = self.cells[index].ues.iter_mut().find(|c| c.device == queued.ue) {
                ctx.sinr_estimate_db = sinr_db;
            }
            if cellular_rate_bps(sinr_db, bandwidth) >= rate {
                self.ip_receive(scheduler, queued.ue.node, queued.packet);
            } else {
                queued.attempts += 1;
                if queued.attempts >= MAX_ATTEMPTS {
                    trace!("Cell {}: dropping packet {} after {} attempts", cell_id, queued.packet.uid, queued.attempts);
                    self.count_drop();
                } else {
                    retry.push(queued);
                }
            }
        }

        let cell = &mut self.cells[index];
        for queued in retry.into_iter().rev() {
            cell.queue.push_front(queued);
        }
        self.cellular_subframe(scheduler, cell_id);
    }

    fn downlink_sinr_db(
        &self,
        enb: DeviceId,
        ue: DeviceId,
        tx_id: u64,
        bandwidth_hz: f64,
        start: Duration,
        end: Duration,
    ) -> Result<f64> {
        let signal_dbm = self.link_rx_power_dbm(enb, ue)?;
        let (ue_pos, ue_radio) = self.radio_endpoint(ue)?;
        let interference_mw = self
            .channel
            .interference_mw(tx_id, ue.node, &ue_pos, ue_radio.rx_gain_db, start, end);
        let noise_mw = dbm_to_mw(thermal_noise_dbm(bandwidth_hz, ue_radio.noise_figure_db));
        Ok(signal_dbm - mw_to_dbm(noise_mw + interference_mw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apps::{Application, UdpClient, UdpServer};
    use crate::propagation::PropagationModel;
    use crate::simulator::Simulator;
    use crate::topology::Position;
    use std::net::SocketAddrV4;

    fn bs_radio() -> RadioParams {
        RadioParams {
            tx_power_dbm: 18.0,
            tx_gain_db: 5.0,
            rx_gain_db: 5.0,
            noise_figure_db: 5.0,
        }
    }

    fn ue_radio() -> RadioParams {
        RadioParams {
            tx_power_dbm: 18.0,
            tx_gain_db: 0.0,
            rx_gain_db: 0.0,
            noise_figure_db: 9.0,
        }
    }

    #[test]
    fn test_subframe_helpers() {
        assert_eq!(next_subframe_boundary(Duration::from_micros(1500)), Duration::from_millis(2));
        assert_eq!(next_subframe_boundary(Duration::from_millis(3)), Duration::from_millis(3));
        assert_eq!(subframe_index(Duration::from_millis(41)), 1);
    }

    #[test]
    fn test_ue_attaches_only_within_its_group() {
        let mut world = World::new(1, PropagationModel::default());
        let near = world.create_node("bs-near");
        let far = world.create_node("bs-far");
        let ue = world.create_node("ue");
        world.set_position(far, Position::new(100.0, 0.0, 0.0)).unwrap();
        world.set_position(ue, Position::new(1.0, 0.0, 0.0)).unwrap();
        world.install_cellular_enb(near, bs_radio(), CellularConfig::new(1)).unwrap();
        world.install_cellular_enb(far, bs_radio(), CellularConfig::new(2)).unwrap();

        let dev = world.install_cellular_ue(ue, ue_radio(), 2).unwrap();
        assert_eq!(world.attach_ue(dev).unwrap(), CellId(1));
        assert_eq!(world.cell_of(dev), Some(CellId(1)));

        let stray = world.install_cellular_ue(ue, ue_radio(), 9).unwrap();
        assert!(matches!(world.attach_ue(stray), Err(EngineError::NoCellForUe { csg_id: 9, .. })));
    }

    #[test]
    fn test_ue_addresses_come_from_the_pool() {
        let mut world = World::new(1, PropagationModel::default());
        let bs = world.create_node("bs");
        let ue = world.create_node("ue");
        world.install_cellular_enb(bs, bs_radio(), CellularConfig::new(1)).unwrap();
        let dev = world.install_cellular_ue(ue, ue_radio(), 1).unwrap();
        assert_eq!(world.assign_ue_address(dev).unwrap(), Ipv4Addr::new(7, 0, 0, 2));
        let gw = world.epc_gateway().unwrap();
        assert!(world.stack(gw).unwrap().owns(EPC_GATEWAY_ADDRESS));
    }

    fn downlink_throughput(blanking: [bool; BLANKING_PATTERN_LEN]) -> u64 {
        let mut world = World::new(1, PropagationModel::default());
        let bs = world.create_node("bs");
        let ue = world.create_node("ue");
        let client = world.create_node("client");
        world.set_position(ue, Position::new(0.0, 10.0, 0.0)).unwrap();

        world
            .install_cellular_enb(bs, bs_radio(), CellularConfig::new(1).with_blanking(blanking))
            .unwrap();
        let ue_dev = world.install_cellular_ue(ue, ue_radio(), 1).unwrap();
        world.attach_ue(ue_dev).unwrap();
        let ue_addr = world.assign_ue_address(ue_dev).unwrap();
        world.set_default_route(ue, EPC_GATEWAY_ADDRESS).unwrap();

        let pgw = world.epc_gateway().unwrap();
        let (pgw_dev, client_dev) = world.install_point_to_point(pgw, client).unwrap();
        world.assign_address(pgw_dev, Ipv4Addr::new(1, 0, 0, 1), 8).unwrap();
        world.assign_address(client_dev, Ipv4Addr::new(1, 0, 0, 2), 8).unwrap();
        world
            .add_network_route(client, EPC_NETWORK, EPC_PREFIX_LEN, Ipv4Addr::new(1, 0, 0, 1))
            .unwrap();

        let server = world
            .install_application(ue, Application::UdpServer(UdpServer::new(9)))
            .unwrap();
        let sender = UdpClient::new(SocketAddrV4::new(ue_addr, 9), 1000, Duration::from_micros(200));
        let sender = world.install_application(client, Application::UdpClient(sender)).unwrap();

        let mut sim = Simulator::new(world);
        World::schedule_start(sim.scheduler_mut(), server, Duration::ZERO);
        World::schedule_start(sim.scheduler_mut(), sender, Duration::ZERO);
        World::schedule_stop(sim.scheduler_mut(), sender, Duration::from_millis(400));
        sim.stop_at(Duration::from_millis(500));
        sim.run();

        match sim.world().application(server).unwrap() {
            Application::UdpServer(s) => s.received_bytes,
            other => panic!("unexpected application {:?}", other),
        }
    }

    #[test]
    fn test_blanking_reduces_throughput() {
        let full = downlink_throughput([false; BLANKING_PATTERN_LEN]);
        let mut pattern = [true; BLANKING_PATTERN_LEN];
        pattern[0] = false;
        pattern[35] = false;
        let sparse = downlink_throughput(pattern);
        assert!(full > 0);
        assert!(sparse > 0);
        assert!(sparse < full / 2, "sparse {} full {}", sparse, full);
    }
}
