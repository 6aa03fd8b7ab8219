//! Interactive command shell driving the session store.

use std::sync::Arc;
use std::time::Instant;

use colored::Colorize;
use nix::unistd::Uid;

use crate::common::globals::{BIN_IP, BIN_IPTABLES, BIN_TC};
use crate::common::{Error, Result};
use crate::console::banner::display_banner;
use crate::console::io::IO;
use crate::networking::scan::ArpScanner;
use crate::networking::utils::ips_from_cidr;
use crate::store::Store;

/// Verifies OS, privileges, and required binaries, printing one line per
/// check. Any failure makes startup abort with exit code 1.
pub fn check_requirements() -> Result<()> {
    let mut all_passed = true;

    if cfg!(target_os = "linux") {
        IO::ok("Linux detected");
    } else {
        IO::error(&format!("Linux required (running on {})", std::env::consts::OS));
        all_passed = false;
    }

    if Uid::effective().is_root() {
        IO::ok("running as root");
    } else {
        IO::error("root privileges required (try sudo)");
        all_passed = false;
    }

    for (name, bin) in [("tc", &*BIN_TC), ("iptables", &*BIN_IPTABLES), ("ip", &*BIN_IP)] {
        match bin {
            Some(path) => IO::ok(&format!("{} found at {}", name, path.display())),
            None => {
                IO::error(&format!("{} not found in PATH", name));
                all_passed = false;
            }
        }
    }

    if all_passed {
        Ok(())
    } else {
        Err(Error::environment("one or more requirements are not met"))
    }
}

pub struct ShellSession {
    store: Arc<Store>,
}

impl ShellSession {
    pub fn new(store: Arc<Store>) -> Self {
        ShellSession { store }
    }

    /// Prompt loop. Returns when the operator quits or stdin closes;
    /// the caller runs the shutdown path afterwards.
    pub fn run(&self) {
        IO::ok(&format!(
            "interface {} ({}), gateway {} at {}",
            self.store.iface.name, self.store.cidr, self.store.gateway_ip, self.store.gateway_mac
        ));
        IO::print("type 'help' for commands");
        IO::spacer();

        loop {
            let line = match IO::input(&format!("{} ", "chokehold>".bright_red().bold())) {
                Some(line) => line,
                None => break,
            };
            if line.is_empty() {
                continue;
            }

            let mut parts = line.split_whitespace();
            let command = parts.next().unwrap_or_default();
            let args: Vec<&str> = parts.collect();

            match command {
                "scan" => self.cmd_scan(),
                "list" => self.cmd_list(),
                "limit" => self.report(self.cmd_limit(&args)),
                "unlimit" => self.report(self.cmd_unlimit(&args)),
                "spoof" => self.report(self.cmd_spoof(&args)),
                "help" => print_help(),
                "clear" => {
                    IO::clear();
                    display_banner();
                }
                "quit" | "exit" => break,
                _ => {
                    IO::error(&format!("unknown command '{}'", command));
                    IO::print("type 'help' for the command list");
                }
            }
            IO::spacer();
        }
    }

    /// Command errors are rendered, never fatal.
    fn report(&self, result: Result<()>) {
        if let Err(e) = result {
            IO::error(&e.to_string());
        }
    }

    fn cmd_scan(&self) {
        let candidates = ips_from_cidr(self.store.cidr);
        IO::ok(&format!(
            "scanning {} addresses in {}",
            candidates.len(),
            self.store.cidr
        ));

        let started = Instant::now();
        ArpScanner::new(Arc::clone(&self.store)).scan(&candidates);

        IO::ok(&format!(
            "scan finished in {:.1?}, {} hosts known",
            started.elapsed(),
            self.store.host_count()
        ));
        self.cmd_list();
    }

    fn cmd_list(&self) {
        let hosts = self.store.list_hosts();
        if hosts.is_empty() {
            IO::warn("no hosts discovered yet, run 'scan' first");
            return;
        }

        let header = format!(
            "{:<4} {:<16} {:<18} {:<24} {:<8} {}",
            "ID", "IP", "MAC", "Hostname", "Spoofed", "Limit (up/down)"
        );
        IO::print(&header.as_str().bold().to_string());
        for host in hosts {
            let spoofed = if self.store.spoofer.is_active(host.id) { "yes" } else { "-" };
            IO::print(&format!(
                "{:<4} {:<16} {:<18} {:<24} {:<8} {}",
                host.id,
                host.ip.to_string(),
                host.mac.to_string(),
                host.display_name(),
                spoofed,
                host.rate_summary()
            ));
        }
    }

    fn parse_host_id(&self, raw: &str) -> Result<u32> {
        let id: u32 = raw
            .parse()
            .map_err(|_| Error::input(format!("'{}' is not a host id", raw)))?;
        if self.store.get_host(id).is_none() {
            return Err(Error::input(format!("no host with id {}", id)));
        }
        Ok(id)
    }

    /// `limit <id> <up|none> <down|none>`: poison the target, then
    /// install the rules so the redirected traffic is actually shaped.
    fn cmd_limit(&self, args: &[&str]) -> Result<()> {
        if args.len() < 3 {
            return Err(Error::input(
                "usage: limit <id> <upload-rate|none> <download-rate|none>",
            ));
        }

        let id = self.parse_host_id(args[0])?;
        let upload_rate = if args[1] == "none" { "" } else { args[1] };
        let download_rate = if args[2] == "none" { "" } else { args[2] };

        let host = self
            .store
            .get_host(id)
            .ok_or_else(|| Error::input(format!("no host with id {}", id)))?;

        self.store.start_spoof(&host);
        if host.limited {
            self.store.limiter.update(host.ip, upload_rate, download_rate)?;
        } else {
            self.store.limiter.apply(host.ip, upload_rate, download_rate)?;
        }
        self.store.set_limit_state(id, upload_rate, download_rate, true);

        IO::ok(&format!(
            "host {} limited (up: {}, down: {})",
            host.ip,
            if upload_rate.is_empty() { "unlimited" } else { upload_rate },
            if download_rate.is_empty() { "unlimited" } else { download_rate },
        ));
        Ok(())
    }

    /// `unlimit <id>`: tear down in reverse, rules first, then the
    /// poisoning session.
    fn cmd_unlimit(&self, args: &[&str]) -> Result<()> {
        if args.is_empty() {
            return Err(Error::input("usage: unlimit <id>"));
        }

        let id = self.parse_host_id(args[0])?;
        let host = self
            .store
            .get_host(id)
            .ok_or_else(|| Error::input(format!("no host with id {}", id)))?;

        self.store.limiter.remove(host.ip)?;
        self.store.spoofer.stop(id);
        self.store.set_limit_state(id, "", "", false);

        IO::ok(&format!("host {} unlimited", host.ip));
        Ok(())
    }

    /// `spoof list` / `spoof stop <id>`.
    fn cmd_spoof(&self, args: &[&str]) -> Result<()> {
        match args.first().copied() {
            Some("list") => {
                let spoofed = self.store.spoof_list();
                if spoofed.is_empty() {
                    IO::warn("no active spoof sessions");
                    return Ok(());
                }
                let header = format!("{:<4} {:<16} {}", "ID", "IP", "Hostname");
                IO::print(&header.as_str().bold().to_string());
                for host in spoofed {
                    IO::print(&format!(
                        "{:<4} {:<16} {}",
                        host.id,
                        host.ip.to_string(),
                        host.display_name()
                    ));
                }
                Ok(())
            }
            Some("stop") => {
                let raw = args
                    .get(1)
                    .copied()
                    .ok_or_else(|| Error::input("usage: spoof stop <id>"))?;
                let id = self.parse_host_id(raw)?;
                self.store.spoofer.stop(id);
                IO::ok(&format!("spoof session for host {} stopped", id));
                Ok(())
            }
            _ => Err(Error::input("usage: spoof <list|stop <id>>")),
        }
    }
}

fn print_help() {
    IO::print("commands:");
    IO::print("  scan                              probe the local network for hosts");
    IO::print("  list                              show discovered hosts");
    IO::print("  limit <id> <up|none> <down|none>  poison a host and shape its traffic");
    IO::print("                                    rates like 1mbit, 100kbit, 512bps");
    IO::print("  unlimit <id>                      remove limits and stop poisoning");
    IO::print("  spoof list                        show active poisoning sessions");
    IO::print("  spoof stop <id>                   stop one poisoning session");
    IO::print("  clear                             clear the screen");
    IO::print("  help                              this text");
    IO::print("  quit | exit                       clean up and leave");
}
