use colored::Colorize;

use crate::common::globals::APP_NAME;
use crate::console::io::IO;

const BANNER: &str = r#"
        _           _        _           _     _
    ___| |__   ___ | | _____| |__   ___ | | __| |
   / __| '_ \ / _ \| |/ / _ \ '_ \ / _ \| |/ _` |
  | (__| | | | (_) |   <  __/ | | | (_) | | (_| |
   \___|_| |_|\___/|_|\_\___|_| |_|\___/|_|\__,_|
"#;

/// Prints the startup banner and tagline.
pub fn display_banner() {
    IO::print(&format!("{}", BANNER.bright_red()));
    IO::print(&format!(
        "   {}",
        "LAN bandwidth control via ARP poisoning".bold()
    ));
    IO::print(&format!(
        "   {}",
        format!("{} v{}", APP_NAME, env!("CARGO_PKG_VERSION")).dimmed()
    ));
    IO::spacer();
}
