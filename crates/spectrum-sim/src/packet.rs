//! Packets as seen by the IP layer
//!
//! Sizes are wire sizes including IP and transport headers, which is what
//! flow monitors count.

use crate::ip::FiveTuple;
use std::time::Duration;

pub const IPV4_HEADER: u32 = 20;
pub const UDP_HEADER: u32 = 8;
pub const TCP_HEADER: u32 = 32;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Payload {
    Datagram { seq: u64 },
    /// Data segment of a reliable stream
    Segment { seq: u64 },
    /// Cumulative acknowledgement: every segment below `next` was received
    Ack { next: u64 },
}

#[derive(Clone, Debug)]
pub struct Packet {
    pub uid: u64,
    pub tuple: FiveTuple,
    pub size: u32,
    pub created: Duration,
    pub payload: Payload,
}
