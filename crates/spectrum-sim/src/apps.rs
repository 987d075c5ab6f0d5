//! Traffic applications
//!
//! Applications are plain state machines. They never touch the world
//! directly: every callback returns an [`AppOutput`] listing packets to send
//! and timers to arm, which the world executes.

use crate::ip::{PROTO_TCP, PROTO_UDP};
use crate::packet::{Packet, Payload, IPV4_HEADER, TCP_HEADER, UDP_HEADER};
use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::Duration;
use tracing::trace;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AppId(pub u32);

#[derive(Clone, Debug, PartialEq)]
pub struct OutgoingPacket {
    pub destination: SocketAddrV4,
    pub source_port: u16,
    pub protocol: u8,
    pub size: u32,
    pub payload: Payload,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AppTimer {
    UdpSend,
    Retransmit { generation: u64 },
}

#[derive(Debug, Default)]
pub struct AppOutput {
    pub packets: Vec<OutgoingPacket>,
    pub timers: Vec<(Duration, AppTimer)>,
}

/// Counts datagrams arriving on a port.
#[derive(Clone, Debug)]
pub struct UdpServer {
    pub port: u16,
    pub received_packets: u64,
    pub received_bytes: u64,
}

impl UdpServer {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            received_packets: 0,
            received_bytes: 0,
        }
    }
}

/// Constant bit rate datagram source.
#[derive(Clone, Debug)]
pub struct UdpClient {
    pub remote: SocketAddrV4,
    pub payload_size: u32,
    pub interval: Duration,
    pub max_packets: u64,
    pub sent: u64,
    local_port: u16,
}

impl UdpClient {
    pub fn new(remote: SocketAddrV4, payload_size: u32, interval: Duration) -> Self {
        Self {
            remote,
            payload_size,
            interval,
            max_packets: 1_000_000,
            sent: 0,
            local_port: 0,
        }
    }

    fn send(&mut self, out: &mut AppOutput) {
        if self.sent >= self.max_packets {
            return;
        }
        out.packets.push(OutgoingPacket {
            destination: self.remote,
            source_port: self.local_port,
            protocol: PROTO_UDP,
            size: self.payload_size + IPV4_HEADER + UDP_HEADER,
            payload: Payload::Datagram { seq: self.sent },
        });
        self.sent += 1;
        if self.sent < self.max_packets {
            out.timers.push((self.interval, AppTimer::UdpSend));
        }
    }
}

#[derive(Clone, Debug, Default)]
struct SinkStream {
    next_expected: u64,
}

/// Receiving end of reliable streams. Every data segment is acknowledged
/// cumulatively; out-of-order segments are dropped.
#[derive(Clone, Debug)]
pub struct PacketSink {
    pub port: u16,
    pub received_bytes: u64,
    streams: HashMap<(Ipv4Addr, u16), SinkStream>,
}

impl PacketSink {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            received_bytes: 0,
            streams: HashMap::new(),
        }
    }

    fn receive(&mut self, packet: &Packet, out: &mut AppOutput) {
        let Payload::Segment { seq } = packet.payload else {
            return;
        };
        let peer = (packet.tuple.source_address, packet.tuple.source_port);
        let stream = self.streams.entry(peer).or_default();
        if seq == stream.next_expected {
            stream.next_expected += 1;
            self.received_bytes += u64::from(packet.size.saturating_sub(IPV4_HEADER + TCP_HEADER));
        }
        out.packets.push(OutgoingPacket {
            destination: SocketAddrV4::new(peer.0, peer.1),
            source_port: self.port,
            protocol: PROTO_TCP,
            size: IPV4_HEADER + TCP_HEADER,
            payload: Payload::Ack {
                next: stream.next_expected,
            },
        });
    }
}

/// Bulk sender of fixed-size files over one reliable stream, using a fixed
/// window with go-back-N recovery.
#[derive(Clone, Debug)]
pub struct FileTransferClient {
    pub remote: SocketAddrV4,
    pub file_size: u64,
    pub segment_size: u32,
    pub window: u64,
    pub rto: Duration,
    pub files_requested: u64,
    local_port: u16,
    total_segments: u64,
    base: u64,
    next_seq: u64,
    generation: u64,
    timer_armed: bool,
    running: bool,
}

impl FileTransferClient {
    pub fn new(remote: SocketAddrV4, file_size: u64, segment_size: u32) -> Self {
        Self {
            remote,
            file_size,
            segment_size,
            window: 64,
            rto: Duration::from_millis(200),
            files_requested: 0,
            local_port: 0,
            total_segments: 0,
            base: 0,
            next_seq: 0,
            generation: 0,
            timer_armed: false,
            running: false,
        }
    }

    fn segments_per_file(&self) -> u64 {
        self.file_size.div_ceil(u64::from(self.segment_size)).max(1)
    }

    fn segment_len(&self, seq: u64) -> u32 {
        let per_file = self.segments_per_file();
        if seq % per_file == per_file - 1 {
            let rest = self.file_size - (per_file - 1) * u64::from(self.segment_size);
            rest as u32
        } else {
            self.segment_size
        }
    }

    /// Segments acknowledged so far.
    pub fn acknowledged_segments(&self) -> u64 {
        self.base
    }

    pub fn is_idle(&self) -> bool {
        self.base == self.total_segments
    }

    /// Queue one more file. Data flows once the application has started.
    pub fn send_file(&mut self) -> AppOutput {
        self.files_requested += 1;
        self.total_segments += self.segments_per_file();
        let mut out = AppOutput::default();
        if self.running {
            self.pump(&mut out);
        }
        out
    }

    fn pump(&mut self, out: &mut AppOutput) {
        while self.next_seq < self.total_segments && self.next_seq < self.base + self.window {
            out.packets.push(OutgoingPacket {
                destination: self.remote,
                source_port: self.local_port,
                protocol: PROTO_TCP,
                size: self.segment_len(self.next_seq) + IPV4_HEADER + TCP_HEADER,
                payload: Payload::Segment { seq: self.next_seq },
            });
            self.next_seq += 1;
        }
        if self.base < self.next_seq && !self.timer_armed {
            self.timer_armed = true;
            out.timers.push((
                self.rto,
                AppTimer::Retransmit {
                    generation: self.generation,
                },
            ));
        }
    }

    fn on_ack(&mut self, next: u64, out: &mut AppOutput) {
        if next <= self.base {
            return;
        }
        self.base = next.min(self.total_segments);
        self.next_seq = self.next_seq.max(self.base);
        self.generation += 1;
        self.timer_armed = false;
        self.pump(out);
    }

    fn on_timeout(&mut self, generation: u64, out: &mut AppOutput) {
        if generation != self.generation || !self.timer_armed {
            return;
        }
        trace!("Retransmission timeout at segment {}", self.base);
        self.generation += 1;
        self.timer_armed = false;
        self.next_seq = self.base;
        self.pump(out);
    }
}

#[derive(Clone, Debug)]
pub enum Application {
    UdpServer(UdpServer),
    UdpClient(UdpClient),
    PacketSink(PacketSink),
    FileTransfer(FileTransferClient),
}

impl Application {
    /// Protocol and local port this application listens on, if it listens.
    pub fn listening_port(&self) -> Option<(u8, u16)> {
        match self {
            Application::UdpServer(s) => Some((PROTO_UDP, s.port)),
            Application::PacketSink(s) => Some((PROTO_TCP, s.port)),
            Application::UdpClient(_) => None,
            Application::FileTransfer(_) => None,
        }
    }

    /// Clients need an ephemeral port to receive replies on.
    pub fn needs_ephemeral_port(&self) -> Option<u8> {
        match self {
            Application::UdpClient(_) => Some(PROTO_UDP),
            Application::FileTransfer(_) => Some(PROTO_TCP),
            _ => None,
        }
    }

    pub(crate) fn bind_local_port(&mut self, port: u16) {
        match self {
            Application::UdpClient(c) => c.local_port = port,
            Application::FileTransfer(c) => c.local_port = port,
            _ => {}
        }
    }

    pub(crate) fn start(&mut self) -> AppOutput {
        let mut out = AppOutput::default();
        match self {
            Application::UdpClient(c) => c.send(&mut out),
            Application::FileTransfer(c) => {
                c.running = true;
                c.pump(&mut out);
            }
            _ => {}
        }
        out
    }

    pub(crate) fn stop(&mut self) {
        if let Application::FileTransfer(c) = self {
            c.running = false;
        }
    }

    pub(crate) fn receive(&mut self, packet: &Packet) -> AppOutput {
        let mut out = AppOutput::default();
        match self {
            Application::UdpServer(s) => {
                s.received_packets += 1;
                s.received_bytes += u64::from(packet.size);
            }
            Application::PacketSink(s) => s.receive(packet, &mut out),
            Application::FileTransfer(c) => {
                if let Payload::Ack { next } = packet.payload {
                    c.on_ack(next, &mut out);
                }
            }
            Application::UdpClient(_) => {}
        }
        out
    }

    pub(crate) fn timer(&mut self, timer: AppTimer) -> AppOutput {
        let mut out = AppOutput::default();
        match (self, timer) {
            (Application::UdpClient(c), AppTimer::UdpSend) => c.send(&mut out),
            (Application::FileTransfer(c), AppTimer::Retransmit { generation }) => {
                c.on_timeout(generation, &mut out)
            }
            _ => {}
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ip::FiveTuple;

    fn remote() -> SocketAddrV4 {
        SocketAddrV4::new(Ipv4Addr::new(7, 0, 0, 2), 50000)
    }

    fn segment_from_client(seq: u64, size: u32) -> Packet {
        Packet {
            uid: seq,
            tuple: FiveTuple {
                source_address: Ipv4Addr::new(1, 0, 0, 1),
                destination_address: Ipv4Addr::new(7, 0, 0, 2),
                protocol: PROTO_TCP,
                source_port: 49153,
                destination_port: 50000,
            },
            size,
            created: Duration::ZERO,
            payload: Payload::Segment { seq },
        }
    }

    fn ack(next: u64) -> Packet {
        let mut p = segment_from_client(0, 52);
        p.tuple = p.tuple.reversed();
        p.payload = Payload::Ack { next };
        p
    }

    #[test]
    fn test_udp_client_sends_and_rearms() {
        let mut app = Application::UdpClient(UdpClient::new(
            SocketAddrV4::new(Ipv4Addr::new(7, 0, 0, 2), 9),
            1000,
            Duration::from_micros(106),
        ));
        app.bind_local_port(49153);
        let out = app.start();
        assert_eq!(out.packets.len(), 1);
        assert_eq!(out.packets[0].size, 1028);
        assert_eq!(out.packets[0].source_port, 49153);
        assert_eq!(out.timers, vec![(Duration::from_micros(106), AppTimer::UdpSend)]);
    }

    #[test]
    fn test_file_waits_for_start() {
        let mut client = FileTransferClient::new(remote(), 512_000, 1448);
        let out = client.send_file();
        assert!(out.packets.is_empty());

        let mut app = Application::FileTransfer(client);
        let out = app.start();
        assert_eq!(out.packets.len(), 64);
        assert_eq!(out.timers.len(), 1);
    }

    #[test]
    fn test_last_segment_is_partial() {
        let client = FileTransferClient::new(remote(), 512_000, 1448);
        assert_eq!(client.segments_per_file(), 354);
        assert_eq!(client.segment_len(0), 1448);
        assert_eq!(client.segment_len(353), 512_000 - 353 * 1448);
    }

    #[test]
    fn test_ack_slides_window() {
        let mut app = Application::FileTransfer(FileTransferClient::new(remote(), 512_000, 1448));
        if let Application::FileTransfer(c) = &mut app {
            c.send_file();
        }
        app.start();
        let out = app.receive(&ack(10));
        assert_eq!(out.packets.len(), 10);
        assert_eq!(out.packets[0].payload, Payload::Segment { seq: 64 });
        // timer re-armed with the new generation
        assert_eq!(out.timers, vec![(Duration::from_millis(200), AppTimer::Retransmit { generation: 1 })]);
    }

    #[test]
    fn test_timeout_goes_back_to_base() {
        let mut app = Application::FileTransfer(FileTransferClient::new(remote(), 512_000, 1448));
        if let Application::FileTransfer(c) = &mut app {
            c.send_file();
        }
        app.start();
        app.receive(&ack(5));

        // stale timer from before the ack is ignored
        let out = app.timer(AppTimer::Retransmit { generation: 0 });
        assert!(out.packets.is_empty());

        let out = app.timer(AppTimer::Retransmit { generation: 1 });
        assert_eq!(out.packets.len(), 64);
        assert_eq!(out.packets[0].payload, Payload::Segment { seq: 5 });
    }

    #[test]
    fn test_sink_acks_cumulatively() {
        let mut app = Application::PacketSink(PacketSink::new(50000));
        let out = app.receive(&segment_from_client(0, 1500));
        assert_eq!(out.packets[0].payload, Payload::Ack { next: 1 });
        assert_eq!(out.packets[0].destination, SocketAddrV4::new(Ipv4Addr::new(1, 0, 0, 1), 49153));

        // gap: segment 2 is dropped, the ack repeats
        let out = app.receive(&segment_from_client(2, 1500));
        assert_eq!(out.packets[0].payload, Payload::Ack { next: 1 });

        let out = app.receive(&segment_from_client(1, 1500));
        assert_eq!(out.packets[0].payload, Payload::Ack { next: 2 });
        if let Application::PacketSink(s) = &app {
            assert_eq!(s.received_bytes, 2 * 1448);
        }
    }
}
