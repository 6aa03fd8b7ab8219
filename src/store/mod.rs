//! Process-wide session state: the interface context learned at startup,
//! every discovered host, and the spoof/limiter handles that act on them.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use ipnetwork::Ipv4Network;
use log::{info, warn};
use pnet::datalink::NetworkInterface;
use pnet::util::MacAddr;

use crate::common::{Error, Result};
use crate::networking::host::Host;
use crate::networking::limit::Limiter;
use crate::networking::spoof::SpoofManager;
use crate::networking::utils;

/// Shared registry tying scanner, spoof engine, and limiter together.
///
/// The interface context is immutable after construction; the host table
/// is guarded by a mutex and only ever grows.
pub struct Store {
    pub iface: NetworkInterface,
    pub cidr: Ipv4Network,
    pub gateway_ip: Ipv4Addr,
    pub gateway_mac: MacAddr,
    pub spoofer: SpoofManager,
    pub limiter: Limiter,
    hosts: Mutex<HashMap<u32, Host>>,
    next_id: AtomicU32,
}

impl Store {
    /// Learns the interface context from the system and installs the HTB
    /// root. Every failure here is an environment error and fatal to
    /// startup.
    pub fn new(interface_override: Option<&str>) -> Result<Self> {
        let iface = match interface_override {
            Some(name) => utils::interface_by_name(name)?,
            None => utils::find_wireless_interface()?,
        };
        let cidr = utils::interface_cidr(&iface)?;
        let gateway_ip = utils::default_gateway_ip()?;
        let gateway_mac = utils::gateway_mac(gateway_ip)?;

        if !cidr.contains(gateway_ip) {
            return Err(Error::environment(format!(
                "gateway {} is outside {}",
                gateway_ip, cidr
            )));
        }

        let limiter = Limiter::new(&iface.name);
        limiter.init()?;

        info!(
            "session on {} ({}), gateway {} at {}",
            iface.name, cidr, gateway_ip, gateway_mac
        );

        Ok(Store {
            iface,
            cidr,
            gateway_ip,
            gateway_mac,
            spoofer: SpoofManager::new(),
            limiter,
            hosts: Mutex::new(HashMap::new()),
            next_id: AtomicU32::new(0),
        })
    }

    /// Next host id; ids start at 1 and are never reused.
    pub fn alloc_id(&self) -> u32 {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Inserts (or overwrites by id). Hosts with an unspecified address
    /// are dropped.
    pub fn add_host(&self, host: Host) {
        if host.ip.is_unspecified() {
            return;
        }
        self.hosts.lock().unwrap().insert(host.id, host);
    }

    pub fn get_host(&self, id: u32) -> Option<Host> {
        self.hosts.lock().unwrap().get(&id).cloned()
    }

    pub fn has_ip(&self, ip: Ipv4Addr) -> bool {
        self.hosts.lock().unwrap().values().any(|host| host.ip == ip)
    }

    /// Snapshot of all hosts, ascending by id.
    pub fn list_hosts(&self) -> Vec<Host> {
        let mut hosts: Vec<Host> = self.hosts.lock().unwrap().values().cloned().collect();
        hosts.sort_by_key(|host| host.id);
        hosts
    }

    pub fn host_count(&self) -> usize {
        self.hosts.lock().unwrap().len()
    }

    /// Records the outcome of a limit/unlimit operation on the host row.
    pub fn set_limit_state(&self, id: u32, upload_rate: &str, download_rate: &str, limited: bool) {
        if let Some(host) = self.hosts.lock().unwrap().get_mut(&id) {
            host.limited = limited;
            host.upload_rate = if limited { upload_rate.to_string() } else { String::new() };
            host.download_rate = if limited { download_rate.to_string() } else { String::new() };
        }
    }

    /// Hosts with a running spoof session, ascending by id.
    pub fn spoof_list(&self) -> Vec<Host> {
        self.spoofer
            .active_ids()
            .into_iter()
            .filter_map(|id| self.get_host(id))
            .collect()
    }

    /// Starts poisoning the host using the stored gateway context.
    pub fn start_spoof(&self, host: &Host) {
        self.spoofer
            .start(host, &self.iface, self.gateway_ip, self.gateway_mac);
    }

    /// Shutdown path shared by `quit` and the signal handler: stop every
    /// spoof session, then tear down rules for each limited host. Safe
    /// to call twice; removal tolerates absence.
    pub fn shutdown(&self) {
        let sessions = self.spoofer.session_count();
        if sessions > 0 {
            info!("stopping {} spoof sessions", sessions);
        }
        self.spoofer.stop_all();

        for (ip, _) in self.limiter.list() {
            if let Err(e) = self.limiter.remove(ip) {
                warn!("could not remove limits for {}: {}", ip, e);
            }
        }

        let mut hosts = self.hosts.lock().unwrap();
        for host in hosts.values_mut() {
            host.limited = false;
            host.upload_rate.clear();
            host.download_rate.clear();
        }
    }
}
