use std::net::Ipv4Addr;

use pnet::util::MacAddr;

/// A device discovered on the local broadcast domain.
///
/// Ids are handed out by the session store and stay stable for the
/// lifetime of the process; the rate strings are empty unless a limit
/// is installed for that direction.
#[derive(Debug, Clone, PartialEq)]
pub struct Host {
    pub id: u32,
    pub ip: Ipv4Addr,
    pub mac: MacAddr,
    pub hostname: Option<String>,
    pub limited: bool,
    pub upload_rate: String,
    pub download_rate: String,
}

impl Host {
    pub fn new(id: u32, ip: Ipv4Addr, mac: MacAddr, hostname: Option<String>) -> Self {
        Host {
            id,
            ip,
            mac,
            hostname,
            limited: false,
            upload_rate: String::new(),
            download_rate: String::new(),
        }
    }

    /// Hostname for table rendering, `-` when reverse DNS gave nothing.
    pub fn display_name(&self) -> &str {
        match self.hostname.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ => "-",
        }
    }

    /// Compact `up / down` rate cell for the host table.
    pub fn rate_summary(&self) -> String {
        if !self.limited {
            return "-".to_string();
        }
        let up = if self.upload_rate.is_empty() { "∞" } else { &self.upload_rate };
        let down = if self.download_rate.is_empty() { "∞" } else { &self.download_rate };
        format!("{} / {}", up, down)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_host_is_unlimited() {
        let host = Host::new(1, Ipv4Addr::new(10, 0, 0, 3), MacAddr::zero(), None);
        assert!(!host.limited);
        assert!(host.upload_rate.is_empty());
        assert!(host.download_rate.is_empty());
        assert_eq!(host.display_name(), "-");
        assert_eq!(host.rate_summary(), "-");
    }

    #[test]
    fn rate_summary_marks_unlimited_direction() {
        let mut host = Host::new(2, Ipv4Addr::new(10, 0, 0, 4), MacAddr::zero(), None);
        host.limited = true;
        host.download_rate = "2mbit".to_string();
        assert_eq!(host.rate_summary(), "∞ / 2mbit");
    }
}
