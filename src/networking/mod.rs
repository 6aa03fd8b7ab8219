//! Network subsystem: ARP codec, scanner, spoof engine, and the
//! tc/iptables bandwidth limiter.

pub mod arp;
pub mod exec;
pub mod host;
pub mod limit;
pub mod scan;
pub mod spoof;
pub mod utils;

pub use host::Host;
pub use limit::Limiter;
pub use scan::ArpScanner;
pub use spoof::SpoofManager;
