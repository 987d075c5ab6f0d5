//! The simulated world: nodes, stacks, devices, applications and monitors
//!
//! All mutable simulation state lives here and is handed to events as
//! `&mut World` by the [`Simulator`](crate::Simulator).

use crate::apps::{AppId, AppOutput, AppTimer, Application, OutgoingPacket};
use crate::cellular::{CellularCell, EpcState};
use crate::channel::SpectrumChannel;
use crate::errors::{EngineError, Result};
use crate::flowmon::{FlowMonitor, FlowRecord, MonitorId};
use crate::ip::{FiveTuple, Ipv4Stack};
use crate::packet::Packet;
use crate::propagation::PropagationModel;
use crate::radio::RadioParams;
use crate::simulator::Scheduler;
use crate::topology::{Device, DeviceClass, DeviceId, DeviceKind, MacAddress, Node, NodeId, Position};
use crate::wifi::{WifiCell, WifiRadio};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::rc::Rc;
use std::time::Duration;
use tracing::{debug, trace};

/// Callback fired when a Wi-Fi station associates. Receives the station's
/// context path `/NodeList/<n>/DeviceList/<d>/Mac/Assoc` and the BSSID.
pub type AssociationListener = Rc<dyn Fn(&mut World, &str, MacAddress)>;

const FIRST_EPHEMERAL_PORT: u16 = 49153;
const POINT_TO_POINT_RATE_BPS: f64 = 100e9;
const DEFAULT_QUEUE_LIMIT: usize = 1000;

struct AppSlot {
    node: NodeId,
    app: Application,
    running: bool,
}

pub struct World {
    nodes: Vec<Node>,
    stacks: Vec<Ipv4Stack>,
    pub(crate) channel: SpectrumChannel,
    pub(crate) cells: Vec<CellularCell>,
    pub(crate) epc: EpcState,
    pub(crate) wifi_cells: Vec<WifiCell>,
    pub(crate) wifi_radios: HashMap<DeviceId, WifiRadio>,
    apps: Vec<AppSlot>,
    bindings: HashMap<(NodeId, u8, u16), AppId>,
    ephemeral_ports: HashMap<NodeId, u16>,
    monitors: Vec<FlowMonitor>,
    listeners: Vec<AssociationListener>,
    pub(crate) rng: StdRng,
    pub(crate) queue_limit: usize,
    next_packet_uid: u64,
    next_mac: u64,
    dropped_packets: u64,
}

impl World {
    pub fn new(seed: u64, model: PropagationModel) -> Self {
        Self {
            nodes: Vec::new(),
            stacks: Vec::new(),
            channel: SpectrumChannel::new(model),
            cells: Vec::new(),
            epc: EpcState::default(),
            wifi_cells: Vec::new(),
            wifi_radios: HashMap::new(),
            apps: Vec::new(),
            bindings: HashMap::new(),
            ephemeral_ports: HashMap::new(),
            monitors: Vec::new(),
            listeners: Vec::new(),
            rng: StdRng::seed_from_u64(seed),
            queue_limit: DEFAULT_QUEUE_LIMIT,
            next_packet_uid: 0,
            next_mac: 1,
            dropped_packets: 0,
        }
    }

    pub fn propagation(&self) -> &PropagationModel {
        self.channel.model()
    }

    /// Packets discarded for lack of a route, a full queue or exhausted
    /// retries.
    pub fn dropped_packets(&self) -> u64 {
        self.dropped_packets
    }

    pub(crate) fn count_drop(&mut self) {
        self.dropped_packets += 1;
    }

    // Nodes and devices

    pub fn create_node(&mut self, label: impl Into<String>) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node::new(id, label));
        self.stacks.push(Ipv4Stack::default());
        id
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn node(&self, id: NodeId) -> Result<&Node> {
        self.nodes
            .get(id.0 as usize)
            .ok_or(EngineError::NodeNotFound(id.0))
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        self.nodes
            .get_mut(id.0 as usize)
            .ok_or(EngineError::NodeNotFound(id.0))
    }

    pub fn set_position(&mut self, id: NodeId, position: Position) -> Result<()> {
        self.node_mut(id)?.position = position;
        Ok(())
    }

    pub fn position(&self, id: NodeId) -> Result<Position> {
        Ok(self.node(id)?.position)
    }

    pub fn device(&self, id: DeviceId) -> Result<&Device> {
        self.node(id.node)?
            .device(id.index)
            .ok_or(EngineError::DeviceNotFound {
                node: id.node.0,
                index: id.index,
            })
    }

    pub(crate) fn device_mut(&mut self, id: DeviceId) -> Result<&mut Device> {
        self.node_mut(id.node)?
            .device_mut(id.index)
            .ok_or(EngineError::DeviceNotFound {
                node: id.node.0,
                index: id.index,
            })
    }

    pub(crate) fn add_device(
        &mut self,
        node: NodeId,
        kind: DeviceKind,
        radio: Option<RadioParams>,
    ) -> Result<DeviceId> {
        let mac = MacAddress::from_index(self.next_mac);
        self.next_mac += 1;
        let n = self.node_mut(node)?;
        let id = DeviceId {
            node,
            index: n.devices.len() as u32,
        };
        n.devices.push(Device {
            id,
            mac,
            kind,
            radio,
        });
        Ok(id)
    }

    pub(crate) fn radio_endpoint(&self, device: DeviceId) -> Result<(Position, RadioParams)> {
        let radio = self.device(device)?.radio.ok_or_else(|| {
            EngineError::InvalidParameter(format!("device {} has no radio", device))
        })?;
        Ok((self.position(device.node)?, radio))
    }

    pub fn first_device(&self, node: NodeId, class: DeviceClass) -> Option<DeviceId> {
        self.node(node).ok()?.first_device(class).map(|d| d.id)
    }

    pub fn node_by_mac(&self, mac: MacAddress) -> Option<DeviceId> {
        self.nodes
            .iter()
            .flat_map(|n| n.devices.iter())
            .find(|d| d.mac == mac)
            .map(|d| d.id)
    }

    /// Connect two nodes with a point-to-point link.
    pub fn install_point_to_point(&mut self, a: NodeId, b: NodeId) -> Result<(DeviceId, DeviceId)> {
        let dev_a = self.add_device(a, DeviceKind::PointToPoint { peer: None }, None)?;
        let dev_b = self.add_device(b, DeviceKind::PointToPoint { peer: Some(dev_a) }, None)?;
        self.device_mut(dev_a)?.kind = DeviceKind::PointToPoint { peer: Some(dev_b) };
        Ok((dev_a, dev_b))
    }

    pub fn point_to_point_peer(&self, device: DeviceId) -> Option<DeviceId> {
        match self.device(device).ok()?.kind {
            DeviceKind::PointToPoint { peer } => peer,
            _ => None,
        }
    }

    // Addressing and routing

    fn stack_mut(&mut self, node: NodeId) -> Result<&mut Ipv4Stack> {
        self.stacks
            .get_mut(node.0 as usize)
            .ok_or(EngineError::NodeNotFound(node.0))
    }

    pub fn stack(&self, node: NodeId) -> Result<&Ipv4Stack> {
        self.stacks
            .get(node.0 as usize)
            .ok_or(EngineError::NodeNotFound(node.0))
    }

    pub fn assign_address(&mut self, device: DeviceId, address: Ipv4Addr, prefix_len: u8) -> Result<()> {
        self.device(device)?;
        self.stack_mut(device.node)?
            .add_address(device.index, address, prefix_len);
        Ok(())
    }

    pub fn address_of(&self, device: DeviceId) -> Option<Ipv4Addr> {
        self.stack(device.node).ok()?.address_for_device(device.index)
    }

    pub fn add_network_route(
        &mut self,
        node: NodeId,
        destination: Ipv4Addr,
        prefix_len: u8,
        gateway: Ipv4Addr,
    ) -> Result<()> {
        self.stack_mut(node)?.add_route(destination, prefix_len, gateway)
    }

    pub fn add_host_route(&mut self, node: NodeId, destination: Ipv4Addr, gateway: Ipv4Addr) -> Result<()> {
        self.stack_mut(node)?.add_host_route(destination, gateway)
    }

    pub fn set_default_route(&mut self, node: NodeId, gateway: Ipv4Addr) -> Result<()> {
        self.stack_mut(node)?.set_default_route(gateway)
    }

    // Association notifications

    pub fn add_association_listener(&mut self, listener: AssociationListener) {
        self.listeners.push(listener);
    }

    pub(crate) fn notify_association(&mut self, context: &str, bssid: MacAddress) {
        let listeners = self.listeners.clone();
        for listener in listeners {
            listener(self, context, bssid);
        }
    }

    // Applications

    pub fn install_application(&mut self, node: NodeId, mut app: Application) -> Result<AppId> {
        self.node(node)?;
        let id = AppId(self.apps.len() as u32);
        if let Some((protocol, port)) = app.listening_port() {
            self.bindings.insert((node, protocol, port), id);
        }
        if let Some(protocol) = app.needs_ephemeral_port() {
            let next = self.ephemeral_ports.entry(node).or_insert(FIRST_EPHEMERAL_PORT);
            let port = *next;
            *next = next.wrapping_add(1).max(FIRST_EPHEMERAL_PORT);
            app.bind_local_port(port);
            self.bindings.insert((node, protocol, port), id);
        }
        self.apps.push(AppSlot {
            node,
            app,
            running: false,
        });
        Ok(id)
    }

    pub fn application(&self, id: AppId) -> Result<&Application> {
        self.apps
            .get(id.0 as usize)
            .map(|slot| &slot.app)
            .ok_or(EngineError::AppNotFound(id.0))
    }

    fn slot_mut(&mut self, id: AppId) -> Result<&mut AppSlot> {
        self.apps
            .get_mut(id.0 as usize)
            .ok_or(EngineError::AppNotFound(id.0))
    }

    pub fn is_running(&self, id: AppId) -> bool {
        self.apps.get(id.0 as usize).is_some_and(|slot| slot.running)
    }

    /// Schedule an application to start at an absolute time.
    pub fn schedule_start(scheduler: &mut Scheduler<World>, app: AppId, at: Duration) {
        scheduler.schedule_at(at, move |world: &mut World, s| {
            if let Err(e) = world.start_application(s, app) {
                debug!("Failed to start application {}: {}", app.0, e);
            }
        });
    }

    /// Schedule an application to stop at an absolute time.
    pub fn schedule_stop(scheduler: &mut Scheduler<World>, app: AppId, at: Duration) {
        scheduler.schedule_at(at, move |world: &mut World, _| {
            if let Ok(slot) = world.slot_mut(app) {
                slot.running = false;
                slot.app.stop();
            }
        });
    }

    pub fn start_application(&mut self, scheduler: &mut Scheduler<World>, app: AppId) -> Result<()> {
        let slot = self.slot_mut(app)?;
        if slot.running {
            return Ok(());
        }
        slot.running = true;
        let out = slot.app.start();
        self.apply_output(scheduler, app, out);
        Ok(())
    }

    /// Ask a file-transfer client to send one more file.
    pub fn send_file(&mut self, scheduler: &mut Scheduler<World>, app: AppId) -> Result<()> {
        let slot = self.slot_mut(app)?;
        let out = match &mut slot.app {
            Application::FileTransfer(client) => client.send_file(),
            _ => {
                return Err(EngineError::InvalidParameter(format!(
                    "application {} is not a file-transfer client",
                    app.0
                )))
            }
        };
        self.apply_output(scheduler, app, out);
        Ok(())
    }

    fn apply_output(&mut self, scheduler: &mut Scheduler<World>, app: AppId, out: AppOutput) {
        let Some(node) = self.apps.get(app.0 as usize).map(|slot| slot.node) else {
            return;
        };
        for packet in out.packets {
            self.send_from(scheduler, node, packet);
        }
        for (delay, timer) in out.timers {
            scheduler.schedule(delay, move |world: &mut World, s| world.fire_timer(s, app, timer));
        }
    }

    fn fire_timer(&mut self, scheduler: &mut Scheduler<World>, app: AppId, timer: AppTimer) {
        let Ok(slot) = self.slot_mut(app) else {
            return;
        };
        if !slot.running {
            return;
        }
        let out = slot.app.timer(timer);
        self.apply_output(scheduler, app, out);
    }

    // Flow monitoring

    pub fn install_flow_monitor(&mut self, nodes: impl IntoIterator<Item = NodeId>) -> MonitorId {
        let id = MonitorId(self.monitors.len() as u32);
        self.monitors.push(FlowMonitor::new(nodes));
        id
    }

    pub fn flow_records(&self, monitor: MonitorId) -> Result<Vec<FlowRecord>> {
        self.monitors
            .get(monitor.0 as usize)
            .map(FlowMonitor::records)
            .ok_or(EngineError::MonitorNotFound(monitor.0))
    }

    // IP layer

    fn next_uid(&mut self) -> u64 {
        let uid = self.next_packet_uid;
        self.next_packet_uid += 1;
        uid
    }

    fn send_from(&mut self, scheduler: &mut Scheduler<World>, node: NodeId, out: OutgoingPacket) {
        let Ok(stack) = self.stack(node) else {
            return;
        };
        let destination = *out.destination.ip();
        let Some(hop) = stack.lookup(destination) else {
            trace!("Node {}: no route to {}", node, destination);
            self.count_drop();
            return;
        };
        let Some(source_address) = stack.address_for_device(hop.device) else {
            self.count_drop();
            return;
        };

        let now = scheduler.now();
        let packet = Packet {
            uid: self.next_uid(),
            tuple: FiveTuple {
                source_address,
                destination_address: destination,
                protocol: out.protocol,
                source_port: out.source_port,
                destination_port: out.destination.port(),
            },
            size: out.size,
            created: now,
            payload: out.payload,
        };
        for monitor in &mut self.monitors {
            monitor.record_tx(node, &packet, now);
        }
        self.transmit(
            scheduler,
            DeviceId {
                node,
                index: hop.device,
            },
            hop.address,
            packet,
        );
    }

    /// Hand a packet arriving at `node` to the IP layer.
    pub(crate) fn ip_receive(&mut self, scheduler: &mut Scheduler<World>, node: NodeId, packet: Packet) {
        let Ok(stack) = self.stack(node) else {
            return;
        };
        let destination = packet.tuple.destination_address;
        if stack.owns(destination) {
            let now = scheduler.now();
            for monitor in &mut self.monitors {
                monitor.record_rx(node, &packet, now);
            }
            self.deliver_local(scheduler, node, packet);
            return;
        }

        match stack.lookup(destination) {
            Some(hop) => self.transmit(
                scheduler,
                DeviceId {
                    node,
                    index: hop.device,
                },
                hop.address,
                packet,
            ),
            None => {
                trace!("Node {}: cannot forward to {}", node, destination);
                self.count_drop();
            }
        }
    }

    fn deliver_local(&mut self, scheduler: &mut Scheduler<World>, node: NodeId, packet: Packet) {
        let key = (node, packet.tuple.protocol, packet.tuple.destination_port);
        let Some(app) = self.bindings.get(&key).copied() else {
            return;
        };
        let Ok(slot) = self.slot_mut(app) else {
            return;
        };
        if !slot.running {
            return;
        }
        let out = slot.app.receive(&packet);
        self.apply_output(scheduler, app, out);
    }

    fn transmit(&mut self, scheduler: &mut Scheduler<World>, device: DeviceId, next_hop: Ipv4Addr, packet: Packet) {
        let class = match self.device(device) {
            Ok(d) => d.kind.class(),
            Err(_) => return,
        };
        match class {
            DeviceClass::PointToPoint => {
                let Some(peer) = self.point_to_point_peer(device) else {
                    self.count_drop();
                    return;
                };
                let delay = Duration::from_secs_f64(f64::from(packet.size) * 8.0 / POINT_TO_POINT_RATE_BPS);
                scheduler.schedule(delay, move |world: &mut World, s| {
                    world.ip_receive(s, peer.node, packet)
                });
            }
            DeviceClass::EpcTunnel => self.epc_downlink(scheduler, next_hop, packet),
            DeviceClass::CellularUe => self.cellular_uplink(scheduler, device, packet),
            DeviceClass::WifiAp | DeviceClass::WifiSta => {
                self.wifi_enqueue(scheduler, device, next_hop, packet)
            }
            DeviceClass::CellularEnb => self.count_drop(),
        }
    }

    /// Node whose stack owns `address`.
    pub(crate) fn node_owning(&self, address: Ipv4Addr) -> Option<NodeId> {
        self.stacks
            .iter()
            .position(|s| s.owns(address))
            .map(|i| NodeId(i as u32))
    }
}
