//! Reactive routes for contention-based operators
//!
//! Wi-Fi stations only learn their access point when they associate, so
//! their routes are installed from the association notification instead of
//! up front.

use crate::errors::{CoexistError, Result};
use spectrum_sim::{AssociationListener, DeviceClass, DeviceId, MacAddress, NodeId, World};
use std::net::Ipv4Addr;
use std::rc::Rc;
use tracing::{debug, warn};

/// Station identity carried by an association notification
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AssocContext {
    pub node: NodeId,
    pub device: u32,
}

impl AssocContext {
    pub fn device_id(&self) -> DeviceId {
        DeviceId {
            node: self.node,
            index: self.device,
        }
    }
}

/// Parse `/NodeList/<n>/DeviceList/<d>/...` into node and device indices.
pub fn parse_context(context: &str) -> Result<AssocContext> {
    let malformed = || CoexistError::MalformedContext(context.to_string());
    let mut parts = context.split('/');
    if parts.next() != Some("") || parts.next() != Some("NodeList") {
        return Err(malformed());
    }
    let node = parts
        .next()
        .and_then(|s| s.parse::<u32>().ok())
        .ok_or_else(malformed)?;
    if parts.next() != Some("DeviceList") {
        return Err(malformed());
    }
    let device = parts
        .next()
        .and_then(|s| s.parse::<u32>().ok())
        .ok_or_else(malformed)?;
    Ok(AssocContext {
        node: NodeId(node),
        device,
    })
}

fn address(world: &World, device: DeviceId, what: &str) -> Result<Ipv4Addr> {
    world
        .address_of(device)
        .ok_or_else(|| CoexistError::Routing(format!("{} {} has no address", what, device)))
}

/// Install the routes of a station that just associated with `bssid`:
/// a default route on the station via the access point's wireless address,
/// and a host route on the backhaul client via the access point's
/// backhaul address.
pub fn configure_station_routes(world: &mut World, context: &str, bssid: MacAddress) -> Result<()> {
    let ctx = parse_context(context)?;
    let station_address = address(world, ctx.device_id(), "station")?;

    let ap = world
        .node_by_mac(bssid)
        .ok_or_else(|| CoexistError::Routing(format!("no device with MAC {}", bssid)))?;
    let ap_wireless = world
        .first_device(ap.node, DeviceClass::WifiAp)
        .ok_or_else(|| CoexistError::Routing(format!("node {} has no access point", ap.node)))?;
    let ap_wireless_address = address(world, ap_wireless, "access point")?;

    world.set_default_route(ctx.node, ap_wireless_address)?;
    debug!(
        "Station {} default route via {}",
        ctx.device_id(),
        ap_wireless_address
    );

    let ap_backhaul = world
        .first_device(ap.node, DeviceClass::PointToPoint)
        .ok_or_else(|| CoexistError::Routing(format!("node {} has no backhaul link", ap.node)))?;
    let ap_backhaul_address = address(world, ap_backhaul, "backhaul link")?;
    let client = world
        .point_to_point_peer(ap_backhaul)
        .ok_or_else(|| CoexistError::Routing(format!("backhaul link {} has no peer", ap_backhaul)))?;

    world.add_host_route(client.node, station_address, ap_backhaul_address)?;
    debug!(
        "Client {} host route to {} via {}",
        client.node, station_address, ap_backhaul_address
    );
    Ok(())
}

/// Listener installing station routes on every association
pub fn association_listener() -> AssociationListener {
    Rc::new(|world: &mut World, context: &str, bssid: MacAddress| {
        if let Err(e) = configure_station_routes(world, context, bssid) {
            warn!("Association {} ignored: {}", context, e);
        }
    })
}
