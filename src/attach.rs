//! Per-operator technology attachment and addressing
//!
//! Both variants connect the operator's backhaul client to its radio
//! network and hand back the endpoints traffic is sent to. Cellular
//! operators reach their UEs through the shared packet gateway; contention
//! based operators reach their stations through a point-to-point link to
//! each access point.

use crate::duty_cycle::DutyCyclePattern;
use crate::errors::Result;
use crate::types::{Operator, PhyParameters, Technology};
use serde::Serialize;
use spectrum_sim::{
    CellularConfig, DeviceId, Ipv4AddressHelper, NodeId, Scheduler, World, EPC_GATEWAY_ADDRESS,
    EPC_NETWORK, EPC_PREFIX_LEN,
};
use std::net::Ipv4Addr;
use tracing::{debug, info};

/// Nodes making up one operator's deployment
#[derive(Clone, Debug)]
pub struct OperatorNodes {
    pub operator: Operator,
    pub base_stations: Vec<NodeId>,
    pub user_equipment: Vec<NodeId>,
    /// Backhaul host sourcing all traffic
    pub client: NodeId,
}

/// A wireless endpoint traffic is delivered to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Endpoint {
    pub node: NodeId,
    #[serde(skip)]
    pub device: DeviceId,
    pub address: Ipv4Addr,
}

/// Result of attaching one operator
#[derive(Clone, Debug)]
pub struct AttachedOperator {
    pub operator: Operator,
    pub technology: Technology,
    pub client: NodeId,
    /// Backhaul address of the client
    pub client_address: Ipv4Addr,
    pub base_station_devices: Vec<DeviceId>,
    pub endpoints: Vec<Endpoint>,
}

impl AttachedOperator {
    /// Nodes a flow monitor must watch: the client and every endpoint
    pub fn monitored_nodes(&self) -> Vec<NodeId> {
        std::iter::once(self.client)
            .chain(self.endpoints.iter().map(|e| e.node))
            .collect()
    }
}

pub fn attach_operator(
    world: &mut World,
    scheduler: &mut Scheduler<World>,
    nodes: &OperatorNodes,
    technology: Technology,
    phy: &PhyParameters,
    pattern: &DutyCyclePattern,
) -> Result<AttachedOperator> {
    let attached = match technology {
        Technology::Cellular => attach_cellular(world, nodes, phy, pattern)?,
        Technology::ContentionBased => attach_contention(world, scheduler, nodes, phy)?,
    };
    info!(
        "Operator {}: {} with {} cells and {} endpoints",
        nodes.operator,
        technology,
        attached.base_station_devices.len(),
        attached.endpoints.len()
    );
    Ok(attached)
}

fn attach_cellular(
    world: &mut World,
    nodes: &OperatorNodes,
    phy: &PhyParameters,
    pattern: &DutyCyclePattern,
) -> Result<AttachedOperator> {
    let operator = nodes.operator;
    let gateway = world.epc_gateway()?;

    let (gateway_link, client_link) = world.install_point_to_point(gateway, nodes.client)?;
    let (network, prefix_len) = operator.cellular_backhaul();
    let mut backhaul = Ipv4AddressHelper::new(network, prefix_len);
    let gateway_address = backhaul.allocate()?;
    let client_address = backhaul.allocate()?;
    world.assign_address(gateway_link, gateway_address, prefix_len)?;
    world.assign_address(client_link, client_address, prefix_len)?;
    world.add_network_route(nodes.client, EPC_NETWORK, EPC_PREFIX_LEN, gateway_address)?;

    let config = CellularConfig::new(operator.csg_id()).with_blanking(pattern.blanking());
    let mut base_station_devices = Vec::with_capacity(nodes.base_stations.len());
    for bs in &nodes.base_stations {
        base_station_devices.push(world.install_cellular_enb(*bs, phy.base_station, config.clone())?);
    }

    let mut endpoints = Vec::with_capacity(nodes.user_equipment.len());
    for ue in &nodes.user_equipment {
        let device = world.install_cellular_ue(*ue, phy.user_equipment, operator.csg_id())?;
        let address = world.assign_ue_address(device)?;
        world.set_default_route(*ue, EPC_GATEWAY_ADDRESS)?;
        let cell = world.attach_ue(device)?;
        debug!("Operator {} UE {} at {} on cell {}", operator, ue, address, cell);
        endpoints.push(Endpoint {
            node: *ue,
            device,
            address,
        });
    }

    Ok(AttachedOperator {
        operator,
        technology: Technology::Cellular,
        client: nodes.client,
        client_address,
        base_station_devices,
        endpoints,
    })
}

fn attach_contention(
    world: &mut World,
    scheduler: &mut Scheduler<World>,
    nodes: &OperatorNodes,
    phy: &PhyParameters,
) -> Result<AttachedOperator> {
    let operator = nodes.operator;
    let ssid = operator.ssid();

    let (network, prefix_len) = operator.wifi_backhaul();
    let mut backhaul = Ipv4AddressHelper::new(network, prefix_len);
    let mut client_address = None;
    for bs in &nodes.base_stations {
        let (client_link, ap_link) = world.install_point_to_point(nodes.client, *bs)?;
        let address = backhaul.allocate()?;
        world.assign_address(client_link, address, prefix_len)?;
        world.assign_address(ap_link, backhaul.allocate()?, prefix_len)?;
        client_address.get_or_insert(address);
    }

    let mut base_station_devices = Vec::with_capacity(nodes.base_stations.len());
    for bs in &nodes.base_stations {
        base_station_devices.push(world.install_wifi_ap(*bs, phy.base_station, ssid.as_str())?);
    }
    let mut stations = Vec::with_capacity(nodes.user_equipment.len());
    for ue in &nodes.user_equipment {
        stations.push((*ue, world.install_wifi_sta(scheduler, *ue, phy.user_equipment, ssid.as_str())?));
    }

    // Access points take the first wireless addresses, stations follow
    let (network, prefix_len) = operator.wifi_wireless();
    let mut wireless = Ipv4AddressHelper::new(network, prefix_len);
    for ap in &base_station_devices {
        world.assign_address(*ap, wireless.allocate()?, prefix_len)?;
    }
    let mut endpoints = Vec::with_capacity(stations.len());
    for (node, device) in stations {
        let address = wireless.allocate()?;
        world.assign_address(device, address, prefix_len)?;
        endpoints.push(Endpoint {
            node,
            device,
            address,
        });
    }

    Ok(AttachedOperator {
        operator,
        technology: Technology::ContentionBased,
        client: nodes.client,
        client_address: client_address.unwrap_or(network),
        base_station_devices,
        endpoints,
    })
}
