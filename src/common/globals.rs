use std::env;
use std::path::PathBuf;
use std::time::Duration;

use once_cell::sync::Lazy;

// Application metadata
pub const APP_NAME: &str = "chokehold";

// Scanner settings
pub const SCAN_WORKERS: usize = 50;
pub const SCAN_TIMEOUT: Duration = Duration::from_secs(2);
pub const SCAN_RETRY_EXTENSION: Duration = Duration::from_millis(500);
pub const SCAN_RETRY_PAUSE: Duration = Duration::from_millis(200);

// Spoof engine settings
pub const SPOOF_TICK: Duration = Duration::from_secs(1);

// Traffic control layout. The root HTB qdisc sends unclassified traffic
// to minor 999 so unlimited hosts are never shaped.
pub const ROOT_HANDLE: &str = "1:";
pub const PARENT_CLASS: &str = "1:1";
pub const PARENT_CLASS_RATE: &str = "1000mbit";
pub const UNSHAPED_MINOR: &str = "999";

// Packet marks set in the mangle table and matched by `tc filter … fw`.
pub const DOWNLOAD_MARK: u32 = 10;
pub const UPLOAD_MARK: u32 = 20;

// Auxiliary device some deployments use for ingress shaping; cleanup
// tears it down tolerantly even though this tool does not create it.
pub const IFB_DEVICE: &str = "ifb0";

/// Locates an executable by scanning the PATH environment variable.
pub fn find_binary(name: &str) -> Option<PathBuf> {
    let path = env::var_os("PATH")?;
    env::split_paths(&path)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}

pub static BIN_TC: Lazy<Option<PathBuf>> = Lazy::new(|| find_binary("tc"));
pub static BIN_IPTABLES: Lazy<Option<PathBuf>> = Lazy::new(|| find_binary("iptables"));
pub static BIN_IP: Lazy<Option<PathBuf>> = Lazy::new(|| find_binary("ip"));
pub static BIN_ETHTOOL: Lazy<Option<PathBuf>> = Lazy::new(|| find_binary("ethtool"));

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_binary_misses_nonexistent_name() {
        assert!(find_binary("chokehold-no-such-binary-xyzzy").is_none());
    }

    #[test]
    fn marks_are_distinct() {
        assert_ne!(UPLOAD_MARK, DOWNLOAD_MARK);
    }
}
