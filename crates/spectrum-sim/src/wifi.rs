//! Contention-based Wi-Fi access points and stations
//!
//! Channel access is a simplified DCF: a device waits DIFS plus a random
//! backoff, senses the medium and defers until it is idle. Frames to the
//! same receiver are aggregated into one transmission. Each transmitter
//! keeps a per-receiver SINR estimate from the last exchange and picks the
//! highest rate it supports. Failed transmissions double the contention
//! window and are retried a bounded number of times.

use crate::errors::{EngineError, Result};
use crate::packet::Packet;
use crate::propagation::{dbm_to_mw, mw_to_dbm, thermal_noise_dbm};
use crate::radio::{wifi_rate_bps, CellId, RadioParams, RadioTechnology, CHANNEL_BANDWIDTH_HZ, WIFI_CCA_THRESHOLD_DBM};
use crate::simulator::Scheduler;
use crate::topology::{DeviceId, DeviceKind, NodeId};
use crate::world::World;
use rand::Rng;
use std::collections::{HashMap, VecDeque};
use std::net::Ipv4Addr;
use std::time::Duration;
use tracing::{debug, trace, warn};

const SLOT: Duration = Duration::from_micros(9);
const DIFS: Duration = Duration::from_micros(34);
/// Preamble, SIFS and block acknowledgement
const FRAME_OVERHEAD: Duration = Duration::from_micros(100);
const CW_MIN: u32 = 15;
const CW_MAX: u32 = 1023;
const MAX_RETRIES: u32 = 7;
/// Lowest rate, used when no rate is expected to succeed
const BASE_RATE_BPS: f64 = 6.5e6;
const MAX_AGGREGATE_PACKETS: usize = 32;
const MAX_AGGREGATE_AIRTIME: Duration = Duration::from_millis(4);
pub const BEACON_INTERVAL: Duration = Duration::from_micros(102_400);

#[derive(Debug)]
pub(crate) struct WifiCell {
    ssid: String,
    ap: DeviceId,
    stations: Vec<DeviceId>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum AccessState {
    Idle,
    Contending,
    Transmitting,
}

#[derive(Debug)]
pub(crate) struct WifiRadio {
    queue: VecDeque<(DeviceId, Packet)>,
    state: AccessState,
    cw: u32,
    retries: u32,
    sinr_estimates: HashMap<DeviceId, f64>,
}

impl WifiRadio {
    fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            state: AccessState::Idle,
            cw: CW_MIN,
            retries: 0,
            sinr_estimates: HashMap::new(),
        }
    }
}

struct Burst {
    tx_id: u64,
    receiver: DeviceId,
    rate_bps: f64,
    start: Duration,
    packets: Vec<Packet>,
}

impl World {
    pub fn install_wifi_ap(&mut self, node: NodeId, radio: RadioParams, ssid: impl Into<String>) -> Result<DeviceId> {
        let cell = CellId(self.wifi_cells.len() as u32);
        let ap = self.add_device(node, DeviceKind::WifiAp { cell }, Some(radio))?;
        let ssid = ssid.into();
        debug!("Access point {} on node {} (SSID {})", ap, node, ssid);
        self.wifi_cells.push(WifiCell {
            ssid,
            ap,
            stations: Vec::new(),
        });
        self.wifi_radios.insert(ap, WifiRadio::new());
        Ok(ap)
    }

    /// Install a station and schedule its association with the SSID's
    /// access point, which completes within the first beacon interval.
    pub fn install_wifi_sta(
        &mut self,
        scheduler: &mut Scheduler<World>,
        node: NodeId,
        radio: RadioParams,
        ssid: impl Into<String>,
    ) -> Result<DeviceId> {
        let ssid = ssid.into();
        if !self.wifi_cells.iter().any(|c| c.ssid == ssid) {
            return Err(EngineError::UnknownSsid(ssid));
        }
        let sta = self.add_device(node, DeviceKind::WifiSta { ssid, ap: None }, Some(radio))?;
        self.wifi_radios.insert(sta, WifiRadio::new());

        let jitter = self.rng.gen_range(0..BEACON_INTERVAL.as_micros() as u64);
        scheduler.schedule(Duration::from_micros(jitter), move |world: &mut World, s| {
            world.try_associate(s, sta)
        });
        Ok(sta)
    }

    /// Access point a station is associated with.
    pub fn associated_ap(&self, sta: DeviceId) -> Option<DeviceId> {
        match &self.device(sta).ok()?.kind {
            DeviceKind::WifiSta { ap, .. } => *ap,
            _ => None,
        }
    }

    fn try_associate(&mut self, scheduler: &mut Scheduler<World>, sta: DeviceId) {
        let ssid = match self.device(sta) {
            Ok(dev) => match &dev.kind {
                DeviceKind::WifiSta { ssid, ap: None } => ssid.clone(),
                _ => return,
            },
            Err(_) => return,
        };
        let Some(index) = self.wifi_cells.iter().position(|c| c.ssid == ssid) else {
            warn!("Station {}: SSID {} disappeared", sta, ssid);
            return;
        };
        let ap = self.wifi_cells[index].ap;

        let rx_dbm = match self.wifi_link_rx_power_dbm(ap, sta) {
            Ok(v) => v,
            Err(_) => return,
        };
        if rx_dbm < WIFI_CCA_THRESHOLD_DBM {
            trace!("Station {} cannot hear {} ({:.1} dBm), retrying", sta, ssid, rx_dbm);
            scheduler.schedule(BEACON_INTERVAL, move |world: &mut World, s| {
                world.try_associate(s, sta)
            });
            return;
        }

        if let Ok(dev) = self.device_mut(sta) {
            dev.kind = DeviceKind::WifiSta {
                ssid: ssid.clone(),
                ap: Some(ap),
            };
        }
        self.wifi_cells[index].stations.push(sta);
        let Ok(bssid) = self.device(ap).map(|d| d.mac) else {
            return;
        };
        debug!("Station {} associated with {} ({})", sta, ssid, bssid);

        let context = format!("/NodeList/{}/DeviceList/{}/Mac/Assoc", sta.node.0, sta.index);
        self.notify_association(&context, bssid);
    }

    fn wifi_link_rx_power_dbm(&self, tx: DeviceId, rx: DeviceId) -> Result<f64> {
        let (tx_pos, tx_radio) = self.radio_endpoint(tx)?;
        let (rx_pos, rx_radio) = self.radio_endpoint(rx)?;
        Ok(self.propagation().rx_power_dbm(
            tx_radio.tx_power_dbm,
            tx_radio.tx_gain_db,
            rx_radio.rx_gain_db,
            tx_pos.distance_to(&rx_pos),
        ))
    }

    fn wifi_noise_dbm(&self, rx: DeviceId) -> Result<f64> {
        let (_, radio) = self.radio_endpoint(rx)?;
        Ok(thermal_noise_dbm(CHANNEL_BANDWIDTH_HZ, radio.noise_figure_db))
    }

    /// Resolve the wireless receiver for a next-hop address.
    fn wifi_receiver(&self, device: DeviceId, next_hop: Ipv4Addr) -> Option<DeviceId> {
        match &self.device(device).ok()?.kind {
            DeviceKind::WifiSta { ap, .. } => *ap,
            DeviceKind::WifiAp { cell } => {
                let node = self.node_owning(next_hop)?;
                self.wifi_cells
                    .get(cell.0 as usize)?
                    .stations
                    .iter()
                    .find(|sta| sta.node == node)
                    .copied()
            }
            _ => None,
        }
    }

    pub(crate) fn wifi_enqueue(
        &mut self,
        scheduler: &mut Scheduler<World>,
        device: DeviceId,
        next_hop: Ipv4Addr,
        packet: Packet,
    ) {
        let Some(receiver) = self.wifi_receiver(device, next_hop) else {
            trace!("Device {}: no associated receiver for {}", device, next_hop);
            self.count_drop();
            return;
        };
        let limit = self.queue_limit;
        let Some(radio) = self.wifi_radios.get_mut(&device) else {
            return;
        };
        if radio.queue.len() >= limit {
            self.count_drop();
            return;
        }
        radio.queue.push_back((receiver, packet));
        if radio.state == AccessState::Idle {
            let now = scheduler.now();
            self.begin_access(scheduler, device, now);
        }
    }

    /// Wait DIFS plus a random backoff from `from`, then sense the medium.
    fn begin_access(&mut self, scheduler: &mut Scheduler<World>, device: DeviceId, from: Duration) {
        let Some(radio) = self.wifi_radios.get_mut(&device) else {
            return;
        };
        radio.state = AccessState::Contending;
        let cw = radio.cw;
        let slots = self.rng.gen_range(0..=cw);
        let at = from + DIFS + SLOT * slots;
        scheduler.schedule_at(at, move |world: &mut World, s| world.access_attempt(s, device));
    }

    fn access_attempt(&mut self, scheduler: &mut Scheduler<World>, device: DeviceId) {
        let now = scheduler.now();
        let Ok((position, radio)) = self.radio_endpoint(device) else {
            return;
        };
        if let Some(busy_until) = self.channel.busy_until(device.node, &position, radio.rx_gain_db, now) {
            self.begin_access(scheduler, device, busy_until);
            return;
        }
        self.wifi_transmit(scheduler, device, now);
    }

    fn wifi_transmit(&mut self, scheduler: &mut Scheduler<World>, device: DeviceId, now: Duration) {
        let Some(receiver) = self
            .wifi_radios
            .get(&device)
            .and_then(|r| r.queue.front().map(|(rx, _)| *rx))
        else {
            self.set_idle(device);
            return;
        };

        let estimate = match self.wifi_radios.get(&device).and_then(|r| r.sinr_estimates.get(&receiver)) {
            Some(v) => *v,
            None => match (self.wifi_link_rx_power_dbm(device, receiver), self.wifi_noise_dbm(receiver)) {
                (Ok(rx), Ok(noise)) => rx - noise,
                _ => f64::NEG_INFINITY,
            },
        };
        let rate_bps = wifi_rate_bps(estimate).unwrap_or(BASE_RATE_BPS);

        let Some(radio) = self.wifi_radios.get_mut(&device) else {
            return;
        };
        let mut packets = Vec::new();
        let mut airtime = FRAME_OVERHEAD;
        while let Some((rx, packet)) = radio.queue.front() {
            if *rx != receiver || packets.len() >= MAX_AGGREGATE_PACKETS {
                break;
            }
            let frame = Duration::from_secs_f64(f64::from(packet.size) * 8.0 / rate_bps);
            if !packets.is_empty() && airtime + frame > MAX_AGGREGATE_AIRTIME {
                break;
            }
            airtime += frame;
            if let Some((_, packet)) = radio.queue.pop_front() {
                packets.push(packet);
            }
        }
        radio.state = AccessState::Transmitting;

        let Ok((position, params)) = self.radio_endpoint(device) else {
            return;
        };
        let end = now + airtime;
        let tx_id = self.channel.start_transmission(
            device.node,
            position,
            RadioTechnology::Wifi,
            params.eirp_dbm(),
            now,
            end,
        );
        let burst = Burst {
            tx_id,
            receiver,
            rate_bps,
            start: now,
            packets,
        };
        scheduler.schedule_at(end, move |world: &mut World, s| world.wifi_transmit_end(s, device, burst));
    }

    fn set_idle(&mut self, device: DeviceId) {
        if let Some(radio) = self.wifi_radios.get_mut(&device) {
            radio.state = AccessState::Idle;
        }
    }

    fn wifi_transmit_end(&mut self, scheduler: &mut Scheduler<World>, device: DeviceId, burst: Burst) {
        let end = scheduler.now();
        let sinr_db = self
            .wifi_sinr_db(device, burst.receiver, burst.tx_id, burst.start, end)
            .unwrap_or(f64::NEG_INFINITY);
        let success = wifi_rate_bps(sinr_db).is_some_and(|rate| rate >= burst.rate_bps);

        let Some(radio) = self.wifi_radios.get_mut(&device) else {
            return;
        };
        radio.sinr_estimates.insert(burst.receiver, sinr_db);

        if success {
            radio.cw = CW_MIN;
            radio.retries = 0;
            let node = burst.receiver.node;
            for packet in burst.packets {
                self.ip_receive(scheduler, node, packet);
            }
        } else {
            radio.retries += 1;
            if radio.retries > MAX_RETRIES {
                trace!("Device {}: dropping {} frames after {} retries", device, burst.packets.len(), MAX_RETRIES);
                radio.cw = CW_MIN;
                radio.retries = 0;
                self.dropped(burst.packets.len());
            } else {
                radio.cw = (radio.cw * 2 + 1).min(CW_MAX);
                for packet in burst.packets.into_iter().rev() {
                    radio.queue.push_front((burst.receiver, packet));
                }
            }
        }

        let pending = self
            .wifi_radios
            .get(&device)
            .is_some_and(|r| !r.queue.is_empty());
        if pending {
            self.begin_access(scheduler, device, end);
        } else {
            self.set_idle(device);
        }
    }

    fn dropped(&mut self, count: usize) {
        for _ in 0..count {
            self.count_drop();
        }
    }

    fn wifi_sinr_db(&self, tx: DeviceId, rx: DeviceId, tx_id: u64, start: Duration, end: Duration) -> Result<f64> {
        let signal_dbm = self.wifi_link_rx_power_dbm(tx, rx)?;
        let (rx_pos, rx_radio) = self.radio_endpoint(rx)?;
        let interference_mw = self
            .channel
            .interference_mw(tx_id, rx.node, &rx_pos, rx_radio.rx_gain_db, start, end);
        let noise_mw = dbm_to_mw(self.wifi_noise_dbm(rx)?);
        Ok(signal_dbm - mw_to_dbm(noise_mw + interference_mw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apps::{Application, UdpClient, UdpServer};
    use crate::propagation::PropagationModel;
    use crate::simulator::Simulator;
    use crate::topology::{MacAddress, Position};
    use std::cell::RefCell;
    use std::net::SocketAddrV4;
    use std::rc::Rc;

    fn radio() -> RadioParams {
        RadioParams {
            tx_power_dbm: 18.0,
            tx_gain_db: 0.0,
            rx_gain_db: 0.0,
            noise_figure_db: 9.0,
        }
    }

    fn ip(s: &str) -> Ipv4Addr {
        s.parse().unwrap()
    }

    #[test]
    fn test_unknown_ssid_rejected() {
        let mut sim = Simulator::new(World::new(1, PropagationModel::default()));
        let (world, s) = sim.parts_mut();
        let node = world.create_node("sta");
        assert!(matches!(
            world.install_wifi_sta(s, node, radio(), "nope"),
            Err(EngineError::UnknownSsid(_))
        ));
    }

    #[test]
    fn test_association_notifies_listeners() {
        let mut sim = Simulator::new(World::new(1, PropagationModel::default()));
        let seen: Rc<RefCell<Vec<(String, MacAddress)>>> = Rc::new(RefCell::new(Vec::new()));
        let (world, s) = sim.parts_mut();
        let ap_node = world.create_node("ap");
        let sta_node = world.create_node("sta");
        world.set_position(sta_node, Position::new(10.0, 0.0, 0.0)).unwrap();
        let ap = world.install_wifi_ap(ap_node, radio(), "net").unwrap();
        let sta = world.install_wifi_sta(s, sta_node, radio(), "net").unwrap();

        let log = Rc::clone(&seen);
        world.add_association_listener(Rc::new(move |_: &mut World, context: &str, bssid: MacAddress| {
            log.borrow_mut().push((context.to_string(), bssid));
        }));
        sim.stop_at(Duration::from_secs(1));
        sim.run();

        let ap_mac = sim.world().device(ap).unwrap().mac;
        assert_eq!(
            seen.borrow().as_slice(),
            &[("/NodeList/1/DeviceList/0/Mac/Assoc".to_string(), ap_mac)]
        );
        assert_eq!(sim.world().associated_ap(sta), Some(ap));
    }

    #[test]
    fn test_out_of_range_station_never_associates() {
        let mut sim = Simulator::new(World::new(1, PropagationModel::default()));
        let (world, s) = sim.parts_mut();
        let ap_node = world.create_node("ap");
        let sta_node = world.create_node("sta");
        world.set_position(sta_node, Position::new(5000.0, 0.0, 0.0)).unwrap();
        world.install_wifi_ap(ap_node, radio(), "net").unwrap();
        let sta = world.install_wifi_sta(s, sta_node, radio(), "net").unwrap();
        sim.stop_at(Duration::from_secs(1));
        sim.run();
        assert_eq!(sim.world().associated_ap(sta), None);
    }

    #[test]
    fn test_downlink_over_wifi() {
        let mut sim = Simulator::new(World::new(7, PropagationModel::default()));
        let (world, s) = sim.parts_mut();
        let ap_node = world.create_node("ap");
        let sta_node = world.create_node("sta");
        world.set_position(sta_node, Position::new(10.0, 0.0, 0.0)).unwrap();
        let ap = world.install_wifi_ap(ap_node, radio(), "net").unwrap();
        let sta = world.install_wifi_sta(s, sta_node, radio(), "net").unwrap();
        world.assign_address(ap, ip("17.0.0.1"), 16).unwrap();
        world.assign_address(sta, ip("17.0.0.2"), 16).unwrap();

        let server = world
            .install_application(sta_node, Application::UdpServer(UdpServer::new(9)))
            .unwrap();
        let client = UdpClient::new(SocketAddrV4::new(ip("17.0.0.2"), 9), 1000, Duration::from_millis(1));
        let client = world.install_application(ap_node, Application::UdpClient(client)).unwrap();
        World::schedule_start(s, server, Duration::ZERO);
        World::schedule_start(s, client, Duration::from_millis(200));
        World::schedule_stop(s, client, Duration::from_millis(300));
        sim.stop_at(Duration::from_millis(400));
        sim.run();

        match sim.world().application(server).unwrap() {
            Application::UdpServer(s) => assert_eq!(s.received_packets, 100),
            other => panic!("unexpected application {:?}", other),
        }
    }
}
