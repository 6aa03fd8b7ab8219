//! Interface selection, CIDR enumeration, and gateway discovery.
//!
//! Gateway facts come from the kernel's route and neighbor tables via the
//! `ip` binary; everything else comes from the datalink interface list.

use std::net::{IpAddr, Ipv4Addr};
use std::process::Command;

use ipnetwork::{IpNetwork, Ipv4Network};
use pnet::datalink::{self, NetworkInterface};
use pnet::util::MacAddr;

use crate::common::globals::BIN_IP;
use crate::common::{Error, Result};

/// Picks the first interface that is up, not loopback, and looks like a
/// wireless NIC (`wlan*`, `*wifi*`, `wl*`).
pub fn find_wireless_interface() -> Result<NetworkInterface> {
    datalink::interfaces()
        .into_iter()
        .filter(|iface| iface.is_up() && !iface.is_loopback())
        .find(|iface| {
            let name = iface.name.to_lowercase();
            name.contains("wlan") || name.contains("wifi") || name.starts_with("wl")
        })
        .ok_or_else(|| Error::environment("no active wireless interface found"))
}

pub fn interface_by_name(name: &str) -> Result<NetworkInterface> {
    datalink::interfaces()
        .into_iter()
        .find(|iface| iface.name == name)
        .ok_or_else(|| Error::environment(format!("interface {} not found", name)))
}

pub fn interface_exists(name: &str) -> bool {
    datalink::interfaces().iter().any(|iface| iface.name == name)
}

/// First IPv4 network configured on the interface, e.g. `192.168.1.37/24`.
pub fn interface_cidr(iface: &NetworkInterface) -> Result<Ipv4Network> {
    iface
        .ips
        .iter()
        .find_map(|net| match net {
            IpNetwork::V4(v4) => Some(*v4),
            IpNetwork::V6(_) => None,
        })
        .ok_or_else(|| Error::environment(format!("no IPv4 network on {}", iface.name)))
}

/// Enumerates scan candidates for a network: every address it contains,
/// minus the network and broadcast addresses when the prefix admits more
/// than two hosts (/31 and /32 keep everything).
pub fn ips_from_cidr(network: Ipv4Network) -> Vec<Ipv4Addr> {
    // Normalize to the network base; the stored CIDR carries the
    // interface's own address.
    let network =
        Ipv4Network::new(network.network(), network.prefix()).unwrap_or(network);
    let ips: Vec<Ipv4Addr> = network.iter().collect();
    if ips.len() > 2 {
        ips[1..ips.len() - 1].to_vec()
    } else {
        ips
    }
}

fn run_ip_tool(arg: &str) -> Result<String> {
    let bin = BIN_IP
        .as_ref()
        .ok_or_else(|| Error::environment("ip binary not found in PATH"))?;
    let output = Command::new(bin).arg(arg).output()?;
    if !output.status.success() {
        return Err(Error::kernel_op(format!("ip {} exited with {}", arg, output.status)));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Default gateway from `ip route`: the token after `via` on the first
/// line starting with `default`.
pub fn default_gateway_ip() -> Result<Ipv4Addr> {
    let routes = run_ip_tool("route")?;
    parse_gateway_ip(&routes).ok_or_else(|| Error::environment("no default gateway found"))
}

fn parse_gateway_ip(routes: &str) -> Option<Ipv4Addr> {
    for line in routes.lines() {
        if !line.starts_with("default") {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        if let Some(pos) = fields.iter().position(|f| *f == "via") {
            if let Some(addr) = fields.get(pos + 1) {
                if let Ok(ip) = addr.parse::<Ipv4Addr>() {
                    return Some(ip);
                }
            }
        }
    }
    None
}

/// Gateway MAC from `ip neigh`: the token after `lladdr` on the line
/// starting with the gateway address.
pub fn gateway_mac(gateway_ip: Ipv4Addr) -> Result<MacAddr> {
    let neighbors = run_ip_tool("neigh")?;
    parse_gateway_mac(&neighbors, gateway_ip).ok_or_else(|| {
        Error::environment(format!("no neighbor entry for gateway {}", gateway_ip))
    })
}

fn parse_gateway_mac(neighbors: &str, gateway_ip: Ipv4Addr) -> Option<MacAddr> {
    let needle = gateway_ip.to_string();
    for line in neighbors.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.first() != Some(&needle.as_str()) {
            continue;
        }
        if let Some(pos) = fields.iter().position(|f| *f == "lladdr") {
            if let Some(mac) = fields.get(pos + 1) {
                if let Ok(parsed) = mac.parse::<MacAddr>() {
                    return Some(parsed);
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slash24_yields_254_hosts() {
        let net: Ipv4Network = "192.168.1.0/24".parse().unwrap();
        let ips = ips_from_cidr(net);
        assert_eq!(ips.len(), 254);
        assert_eq!(ips[0], Ipv4Addr::new(192, 168, 1, 1));
        assert_eq!(ips[253], Ipv4Addr::new(192, 168, 1, 254));
        assert!(!ips.contains(&Ipv4Addr::new(192, 168, 1, 0)));
        assert!(!ips.contains(&Ipv4Addr::new(192, 168, 1, 255)));
    }

    #[test]
    fn host_addressed_cidr_enumerates_from_network_base() {
        let net: Ipv4Network = "192.168.1.37/24".parse().unwrap();
        let ips = ips_from_cidr(net);
        assert_eq!(ips.len(), 254);
        assert_eq!(ips[0], Ipv4Addr::new(192, 168, 1, 1));
    }

    #[test]
    fn slash29_yields_six_hosts() {
        let net: Ipv4Network = "10.0.0.0/29".parse().unwrap();
        let ips = ips_from_cidr(net);
        assert_eq!(ips.len(), 6);
        assert_eq!(ips[0], Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(ips[5], Ipv4Addr::new(10, 0, 0, 6));
    }

    #[test]
    fn tiny_prefixes_keep_every_address() {
        let p2p: Ipv4Network = "10.0.0.0/31".parse().unwrap();
        assert_eq!(ips_from_cidr(p2p).len(), 2);

        let single: Ipv4Network = "10.0.0.1/32".parse().unwrap();
        let ips = ips_from_cidr(single);
        assert_eq!(ips, vec![Ipv4Addr::new(10, 0, 0, 1)]);
    }

    #[test]
    fn gateway_ip_parses_from_route_output() {
        let routes = "\
default via 192.168.1.1 dev wlan0 proto dhcp metric 600\n\
192.168.1.0/24 dev wlan0 proto kernel scope link src 192.168.1.37\n";
        assert_eq!(parse_gateway_ip(routes), Some(Ipv4Addr::new(192, 168, 1, 1)));
    }

    #[test]
    fn gateway_ip_absent_when_no_default_route() {
        let routes = "192.168.1.0/24 dev wlan0 proto kernel scope link\n";
        assert_eq!(parse_gateway_ip(routes), None);
    }

    #[test]
    fn gateway_mac_parses_from_neigh_output() {
        let neighbors = "\
192.168.1.42 dev wlan0 lladdr aa:bb:cc:dd:ee:02 STALE\n\
192.168.1.1 dev wlan0 lladdr aa:bb:cc:dd:ee:01 REACHABLE\n";
        let mac = parse_gateway_mac(neighbors, Ipv4Addr::new(192, 168, 1, 1));
        assert_eq!(mac, Some(MacAddr(0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x01)));
    }

    #[test]
    fn gateway_mac_ignores_failed_entries() {
        let neighbors = "192.168.1.1 dev wlan0 FAILED\n";
        assert_eq!(parse_gateway_mac(neighbors, Ipv4Addr::new(192, 168, 1, 1)), None);
    }
}
