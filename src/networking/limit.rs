//! Per-host bandwidth limiting over `tc` HTB classes and `iptables`
//! mangle marks.
//!
//! The interface carries one HTB root qdisc (`1:`, default minor 999) and
//! a link-ceiling parent class `1:1`. Each limited host gets up to two
//! child classes, one per direction, matched by fw mark. Upload traffic
//! is source-matched in PREROUTING and marked 20; download traffic is
//! destination-matched and marked 10.
//!
//! Every mutation is delete-then-add, so a repeated `apply` never stacks
//! duplicate rules and a failed call is safe to retry.

use std::collections::HashMap;
use std::fmt;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Mutex;

use log::{info, warn};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::common::globals::{
    BIN_ETHTOOL, BIN_IPTABLES, BIN_TC, DOWNLOAD_MARK, IFB_DEVICE, PARENT_CLASS,
    PARENT_CLASS_RATE, ROOT_HANDLE, UNSHAPED_MINOR, UPLOAD_MARK,
};
use crate::common::{Error, Result};
use crate::networking::exec::{argv, run, run_quiet};
use crate::networking::utils::interface_exists;

static RATE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\d+(bit|kbit|mbit|gbit|tbit|bps|kbps|mbps|gbps|tbps)$")
        .expect("rate pattern is valid")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Upload,
    Download,
}

impl Direction {
    fn mark(self) -> u32 {
        match self {
            Direction::Upload => UPLOAD_MARK,
            Direction::Download => DOWNLOAD_MARK,
        }
    }

    /// `-s` for upload (traffic from the host), `-d` for download
    /// (traffic towards the host).
    fn iptables_match(self) -> &'static str {
        match self {
            Direction::Upload => "-s",
            Direction::Download => "-d",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Upload => write!(f, "upload"),
            Direction::Download => write!(f, "download"),
        }
    }
}

/// HTB minor for a host/direction pair: upload 200+x, download 100+x,
/// where x is the host's last octet. Collides outside a /24.
pub fn class_minor(ip: Ipv4Addr, direction: Direction) -> u16 {
    let base: u16 = match direction {
        Direction::Upload => 200,
        Direction::Download => 100,
    };
    base + u16::from(ip.octets()[3])
}

/// Accepts the `tc` rate grammar, e.g. `1mbit`, `100kbit`, `512bps`.
pub fn is_valid_rate(rate: &str) -> bool {
    RATE_RE.is_match(rate)
}

/// One installed ruleset, keyed by host IP in the limiter table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimitEntry {
    pub upload_rate: String,
    pub download_rate: String,
    pub upload_class: u16,
    pub download_class: u16,
}

// Argv builders. Pure functions so tests can pin the exact command shape
// without touching the kernel.

fn qdisc_replace_root_args(iface: &str) -> (Vec<String>, Vec<String>) {
    (
        argv(&format!("qdisc del dev {} root", iface)),
        argv(&format!(
            "qdisc add dev {} root handle {} htb default {}",
            iface, ROOT_HANDLE, UNSHAPED_MINOR
        )),
    )
}

fn parent_class_args(iface: &str) -> Vec<String> {
    argv(&format!(
        "class add dev {} parent {} classid {} htb rate {}",
        iface, ROOT_HANDLE, PARENT_CLASS, PARENT_CLASS_RATE
    ))
}

fn class_add_args(iface: &str, minor: u16, rate: &str) -> Vec<String> {
    argv(&format!(
        "class add dev {} parent {} classid 1:{} htb rate {}",
        iface, PARENT_CLASS, minor, rate
    ))
}

fn class_change_args(iface: &str, minor: u16, rate: &str) -> Vec<String> {
    argv(&format!(
        "class change dev {} parent {} classid 1:{} htb rate {}",
        iface, PARENT_CLASS, minor, rate
    ))
}

fn class_del_args(iface: &str, minor: u16) -> Vec<String> {
    argv(&format!(
        "class del dev {} parent {} classid 1:{}",
        iface, PARENT_CLASS, minor
    ))
}

/// Filter prio doubles as the per-host handle for deletion; the fw mark
/// it matches is shared between hosts of the same direction.
fn filter_add_args(iface: &str, minor: u16, mark: u32) -> Vec<String> {
    argv(&format!(
        "filter add dev {} parent {} protocol ip prio {} handle {} fw flowid 1:{}",
        iface, ROOT_HANDLE, minor, mark, minor
    ))
}

fn filter_del_args(iface: &str, minor: u16) -> Vec<String> {
    argv(&format!(
        "filter del dev {} parent {} protocol ip prio {}",
        iface, ROOT_HANDLE, minor
    ))
}

fn mangle_rule_args(action: &str, ip: Ipv4Addr, direction: Direction) -> Vec<String> {
    argv(&format!(
        "-t mangle {} PREROUTING {} {} -j MARK --set-mark {}",
        action,
        direction.iptables_match(),
        ip,
        direction.mark()
    ))
}

fn mangle_flush_args(chain: &str) -> Vec<String> {
    argv(&format!("-t mangle -F {}", chain))
}

/// Declarative layer over `tc`/`iptables` for one interface.
///
/// A single internal mutex serializes every mutation so concurrent shell
/// and shutdown paths never interleave kernel commands.
pub struct Limiter {
    iface: String,
    entries: Mutex<HashMap<Ipv4Addr, LimitEntry>>,
}

impl Limiter {
    pub fn new(iface: &str) -> Self {
        Limiter {
            iface: iface.to_string(),
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn tc(&self) -> Result<&PathBuf> {
        BIN_TC
            .as_ref()
            .ok_or_else(|| Error::environment("tc binary not found in PATH"))
    }

    fn iptables(&self) -> Result<&PathBuf> {
        BIN_IPTABLES
            .as_ref()
            .ok_or_else(|| Error::environment("iptables binary not found in PATH"))
    }

    /// Installs the root qdisc and the link-ceiling parent class. Called
    /// once at startup; replaces any root qdisc already present.
    pub fn init(&self) -> Result<()> {
        let _guard = self.entries.lock().unwrap();
        let tc = self.tc()?;

        let (del, add) = qdisc_replace_root_args(&self.iface);
        run_quiet(tc, &del);
        run(tc, &add)?;
        run(tc, &parent_class_args(&self.iface))?;

        // Offloaded segmentation bypasses the shaper; best-effort off.
        if let Some(ethtool) = BIN_ETHTOOL.as_ref() {
            run_quiet(ethtool, &argv(&format!("-K {} tso off gso off", self.iface)));
        }

        info!("HTB root installed on {}", self.iface);
        Ok(())
    }

    fn validate(&self, upload_rate: &str, download_rate: &str) -> Result<()> {
        if upload_rate.is_empty() && download_rate.is_empty() {
            return Err(Error::input("at least one direction must carry a rate"));
        }
        for rate in [upload_rate, download_rate] {
            if !rate.is_empty() && !is_valid_rate(rate) {
                return Err(Error::input(format!(
                    "bad rate {:?} (expected e.g. 1mbit, 100kbit, 512bps)",
                    rate
                )));
            }
        }
        if !interface_exists(&self.iface) {
            return Err(Error::environment(format!(
                "interface {} disappeared",
                self.iface
            )));
        }
        Ok(())
    }

    /// Installs (or reinstalls) marks, classes, and filters for the host.
    ///
    /// Steps run delete-then-add, so a partial failure leaves a state a
    /// plain retry repairs.
    pub fn apply(&self, ip: Ipv4Addr, upload_rate: &str, download_rate: &str) -> Result<()> {
        self.validate(upload_rate, download_rate)?;

        let mut entries = self.entries.lock().unwrap();
        let tc = self.tc()?;
        let iptables = self.iptables()?;

        let directions = [
            (Direction::Upload, upload_rate),
            (Direction::Download, download_rate),
        ];

        for (direction, rate) in directions {
            if rate.is_empty() {
                continue;
            }
            run_quiet(iptables, &mangle_rule_args("-D", ip, direction));
            run(iptables, &mangle_rule_args("-A", ip, direction))
                .map_err(|e| Error::kernel_op(format!("{} mark for {}: {}", direction, ip, e)))?;
        }

        for (direction, rate) in directions {
            if rate.is_empty() {
                continue;
            }
            let minor = class_minor(ip, direction);
            if run(tc, &class_add_args(&self.iface, minor, rate)).is_err() {
                run(tc, &class_change_args(&self.iface, minor, rate))?;
            }
        }

        for (direction, rate) in directions {
            if rate.is_empty() {
                continue;
            }
            let minor = class_minor(ip, direction);
            run_quiet(tc, &filter_del_args(&self.iface, minor));
            run(tc, &filter_add_args(&self.iface, minor, direction.mark()))?;
        }

        entries.insert(
            ip,
            LimitEntry {
                upload_rate: upload_rate.to_string(),
                download_rate: download_rate.to_string(),
                upload_class: class_minor(ip, Direction::Upload),
                download_class: class_minor(ip, Direction::Download),
            },
        );
        info!(
            "limits installed for {} (up: {}, down: {})",
            ip,
            if upload_rate.is_empty() { "-" } else { upload_rate },
            if download_rate.is_empty() { "-" } else { download_rate },
        );
        Ok(())
    }

    /// Tears down both directions for the host: filters, then classes,
    /// then mangle rules, each tolerating absence. Idempotent.
    pub fn remove(&self, ip: Ipv4Addr) -> Result<()> {
        let mut entries = self.entries.lock().unwrap();
        let tc = self.tc()?;
        let iptables = self.iptables()?;

        for direction in [Direction::Upload, Direction::Download] {
            let minor = class_minor(ip, direction);
            run_quiet(tc, &filter_del_args(&self.iface, minor));
        }
        for direction in [Direction::Upload, Direction::Download] {
            let minor = class_minor(ip, direction);
            run_quiet(tc, &class_del_args(&self.iface, minor));
        }
        for direction in [Direction::Upload, Direction::Download] {
            run_quiet(iptables, &mangle_rule_args("-D", ip, direction));
        }

        entries.remove(&ip);
        info!("limits removed for {}", ip);
        Ok(())
    }

    /// Replaces the host's limits; a failed removal is logged, not fatal.
    pub fn update(&self, ip: Ipv4Addr, upload_rate: &str, download_rate: &str) -> Result<()> {
        if let Err(e) = self.remove(ip) {
            warn!("stale limits for {} not fully removed: {}", ip, e);
        }
        self.apply(ip, upload_rate, download_rate)
    }

    /// Flushes the mangle chains, drops the root qdisc (plus the ingress
    /// qdisc and an `ifb0` root left behind by ingress-shaping setups),
    /// and clears the table. Everything is best-effort.
    pub fn cleanup(&self) {
        let mut entries = self.entries.lock().unwrap();

        if let Some(iptables) = BIN_IPTABLES.as_ref() {
            run_quiet(iptables, &mangle_flush_args("PREROUTING"));
            run_quiet(iptables, &mangle_flush_args("POSTROUTING"));
        }
        if let Some(tc) = BIN_TC.as_ref() {
            run_quiet(tc, &argv(&format!("qdisc del dev {} root", self.iface)));
            run_quiet(tc, &argv(&format!("qdisc del dev {} ingress", self.iface)));
            run_quiet(tc, &argv(&format!("qdisc del dev {} root", IFB_DEVICE)));
        }

        entries.clear();
        info!("traffic control state cleared on {}", self.iface);
    }

    /// Snapshot of installed limits, ordered by IP.
    pub fn list(&self) -> Vec<(Ipv4Addr, LimitEntry)> {
        let entries = self.entries.lock().unwrap();
        let mut snapshot: Vec<_> = entries.iter().map(|(ip, e)| (*ip, e.clone())).collect();
        snapshot.sort_by_key(|(ip, _)| *ip);
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> Ipv4Addr {
        s.parse().unwrap()
    }

    #[test]
    fn class_minor_is_pure_and_octet_based() {
        assert_eq!(class_minor(ip("192.168.1.42"), Direction::Upload), 242);
        assert_eq!(class_minor(ip("192.168.1.42"), Direction::Download), 142);
        assert_eq!(class_minor(ip("10.0.0.3"), Direction::Upload), 203);
        assert_eq!(class_minor(ip("10.0.0.3"), Direction::Download), 103);
        // Stays inside HTB's 16-bit minor space even for .255.
        assert_eq!(class_minor(ip("10.0.0.255"), Direction::Upload), 455);
    }

    #[test]
    fn rate_grammar_accepts_tc_units() {
        for rate in ["1mbit", "100kbit", "512bps", "3gbit", "9tbps"] {
            assert!(is_valid_rate(rate), "{} should be accepted", rate);
        }
    }

    #[test]
    fn rate_grammar_rejects_malformed_input() {
        for rate in ["1mb", "1 mbit", "mbit", "1.5mbit", "", "100kbit "] {
            assert!(!is_valid_rate(rate), "{:?} should be rejected", rate);
        }
    }

    #[test]
    fn validate_requires_one_direction() {
        let limiter = Limiter::new("lo");
        let err = limiter.validate("", "").unwrap_err();
        assert!(matches!(err, Error::Input(_)));
    }

    #[test]
    fn validate_rejects_bad_rate_before_any_command() {
        let limiter = Limiter::new("lo");
        let err = limiter.validate("1mb", "").unwrap_err();
        assert!(matches!(err, Error::Input(_)));
        // Nothing was installed.
        assert!(limiter.list().is_empty());
    }

    #[test]
    fn mangle_rules_match_direction_semantics() {
        let upload = mangle_rule_args("-A", ip("10.0.0.3"), Direction::Upload);
        assert_eq!(
            upload,
            argv("-t mangle -A PREROUTING -s 10.0.0.3 -j MARK --set-mark 20")
        );

        let download = mangle_rule_args("-A", ip("10.0.0.3"), Direction::Download);
        assert_eq!(
            download,
            argv("-t mangle -A PREROUTING -d 10.0.0.3 -j MARK --set-mark 10")
        );
    }

    #[test]
    fn class_commands_use_derived_minors() {
        let add = class_add_args("wlan0", class_minor(ip("10.0.0.3"), Direction::Upload), "1mbit");
        assert_eq!(add, argv("class add dev wlan0 parent 1:1 classid 1:203 htb rate 1mbit"));

        let del = class_del_args("wlan0", class_minor(ip("10.0.0.3"), Direction::Download));
        assert_eq!(del, argv("class del dev wlan0 parent 1:1 classid 1:103"));
    }

    #[test]
    fn filter_commands_bind_mark_to_class() {
        let add = filter_add_args("wlan0", 203, UPLOAD_MARK);
        assert_eq!(
            add,
            argv("filter add dev wlan0 parent 1: protocol ip prio 203 handle 20 fw flowid 1:203")
        );
        let del = filter_del_args("wlan0", 203);
        assert_eq!(del, argv("filter del dev wlan0 parent 1: protocol ip prio 203"));
    }

    #[test]
    fn root_qdisc_is_replaced_not_stacked() {
        let (del, add) = qdisc_replace_root_args("wlan0");
        assert_eq!(del, argv("qdisc del dev wlan0 root"));
        assert_eq!(add, argv("qdisc add dev wlan0 root handle 1: htb default 999"));
    }

    #[test]
    fn parent_class_carries_link_ceiling() {
        assert_eq!(
            parent_class_args("wlan0"),
            argv("class add dev wlan0 parent 1: classid 1:1 htb rate 1000mbit")
        );
    }

    #[test]
    fn list_starts_empty() {
        let limiter = Limiter::new("wlan0");
        assert!(limiter.list().is_empty());
    }
}
