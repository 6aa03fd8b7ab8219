use std::process;
use std::sync::Arc;

use clap::Parser;
use log::error;
use tokio::signal::unix::{signal, SignalKind};

mod common;
mod console;
mod networking;
mod store;

use console::{check_requirements, display_banner, IO, ShellSession};
use store::Store;

/// LAN bandwidth control through ARP cache poisoning and tc/iptables
/// traffic shaping. Requires root on Linux.
#[derive(Parser, Debug)]
#[command(name = "chokehold", version, about, long_about = None)]
struct Cli {
    /// Network interface to use (default: first active wireless NIC)
    #[arg(short, long, value_name = "INTERFACE")]
    interface: Option<String>,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    IO::initialize(cli.no_color);
    display_banner();

    if check_requirements().is_err() {
        IO::spacer();
        IO::error("requirements not met, aborting");
        process::exit(1);
    }
    IO::spacer();

    let store = match Store::new(cli.interface.as_deref()) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            IO::error(&e.to_string());
            process::exit(1);
        }
    };

    // SIGINT/SIGTERM run the same shutdown path as a clean quit. The
    // store's shutdown is idempotent, so racing a concurrent quit is
    // harmless.
    let signal_store = Arc::clone(&store);
    tokio::spawn(async move {
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                error!("cannot install SIGTERM handler: {}", e);
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
        IO::spacer();
        IO::ok("interrupted, restoring network state");
        signal_store.shutdown();
        signal_store.limiter.cleanup();
        process::exit(0);
    });

    let shell_store = Arc::clone(&store);
    let shell = tokio::task::spawn_blocking(move || {
        ShellSession::new(shell_store).run();
    });
    let _ = shell.await;

    IO::ok("restoring network state");
    store.shutdown();
    store.limiter.cleanup();
    IO::ok("bye");
}
