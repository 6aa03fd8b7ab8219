//! Concurrent ARP sweep with a single bounded-retry pass.
//!
//! A fixed pool of workers drains a job channel; each job opens its own
//! short-lived resolver, so no socket is ever shared. After the first
//! sweep, missed addresses get exactly one retry with a slightly longer
//! deadline, but only when the network was mostly responsive; a dead
//! /24 should not double the scan time.

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use log::{debug, info};

use crate::common::globals::{
    SCAN_RETRY_EXTENSION, SCAN_RETRY_PAUSE, SCAN_TIMEOUT, SCAN_WORKERS,
};
use crate::networking::arp::ArpResolver;
use crate::networking::host::Host;
use crate::store::Store;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fixed-size worker pool drained by dropping the sender and joining.
struct WorkerPool {
    tx: Option<mpsc::Sender<Job>>,
    workers: Vec<thread::JoinHandle<()>>,
}

impl WorkerPool {
    fn new(count: usize) -> Self {
        let (tx, rx) = mpsc::channel::<Job>();
        let rx = Arc::new(Mutex::new(rx));
        let workers = (0..count)
            .map(|_| {
                let rx = Arc::clone(&rx);
                thread::spawn(move || loop {
                    // Take the next job without holding the lock while
                    // running it.
                    let job = { rx.lock().unwrap().recv() };
                    match job {
                        Ok(job) => job(),
                        Err(_) => break,
                    }
                })
            })
            .collect();
        WorkerPool { tx: Some(tx), workers }
    }

    fn submit<F: FnOnce() + Send + 'static>(&self, job: F) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(Box::new(job));
        }
    }

    fn wait(mut self) {
        self.tx.take();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

/// Single-shot sweep writing discovered hosts into the session store.
pub struct ArpScanner {
    store: Arc<Store>,
    timeout: Duration,
    max_workers: usize,
}

impl ArpScanner {
    pub fn new(store: Arc<Store>) -> Self {
        ArpScanner {
            store,
            timeout: SCAN_TIMEOUT,
            max_workers: SCAN_WORKERS,
        }
    }

    /// Probes every candidate address and stores each responder.
    ///
    /// Addresses already present in the store are skipped, which keeps
    /// the store add-only and host ids stable across repeated scans.
    pub fn scan(&self, ips: &[Ipv4Addr]) {
        let candidates: Vec<Ipv4Addr> = ips
            .iter()
            .copied()
            .filter(|ip| !self.store.has_ip(*ip))
            .collect();
        if candidates.is_empty() {
            return;
        }

        info!("sweeping {} addresses on {}", candidates.len(), self.store.iface.name);

        let found = Arc::new(Mutex::new(HashSet::new()));
        self.sweep(&candidates, self.timeout, Some(&found));

        let missed: Vec<Ipv4Addr> = {
            let found = found.lock().unwrap();
            candidates
                .iter()
                .copied()
                .filter(|ip| !found.contains(ip))
                .collect()
        };

        // Retry only recovers stragglers on a mostly-live network.
        if !missed.is_empty() && missed.len() < candidates.len() / 2 {
            debug!("retrying {} silent addresses", missed.len());
            thread::sleep(SCAN_RETRY_PAUSE);
            self.sweep(&missed, self.timeout + SCAN_RETRY_EXTENSION, None);
        }
    }

    fn sweep(
        &self,
        ips: &[Ipv4Addr],
        timeout: Duration,
        found: Option<&Arc<Mutex<HashSet<Ipv4Addr>>>>,
    ) {
        let pool = WorkerPool::new(self.max_workers.min(ips.len()));
        for ip in ips.iter().copied() {
            let store = Arc::clone(&self.store);
            let found = found.map(Arc::clone);
            pool.submit(move || {
                if let Some(host) = probe(&store, ip, timeout) {
                    if let Some(found) = &found {
                        found.lock().unwrap().insert(ip);
                    }
                    store.add_host(host);
                }
            });
        }
        pool.wait();
    }
}

/// One probe: resolve the MAC, allocate an id, enrich with reverse DNS.
/// Silence and socket trouble both yield `None`.
fn probe(store: &Store, ip: Ipv4Addr, timeout: Duration) -> Option<Host> {
    let mut resolver = match ArpResolver::open(&store.iface) {
        Ok(resolver) => resolver,
        Err(e) => {
            debug!("resolver on {}: {}", store.iface.name, e);
            return None;
        }
    };
    let mac = resolver.resolve(ip, timeout)?;
    let id = store.alloc_id();
    let hostname = dns_lookup::lookup_addr(&IpAddr::V4(ip)).ok();
    debug!("{} is at {} (id {})", ip, mac, id);
    Some(Host::new(id, ip, mac, hostname))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn pool_runs_every_job_before_wait_returns() {
        let counter = Arc::new(AtomicUsize::new(0));
        let pool = WorkerPool::new(4);
        for _ in 0..100 {
            let counter = Arc::clone(&counter);
            pool.submit(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        pool.wait();
        assert_eq!(counter.load(Ordering::SeqCst), 100);
    }

    #[test]
    fn pool_with_one_worker_is_sequential_but_complete() {
        let counter = Arc::new(AtomicUsize::new(0));
        let pool = WorkerPool::new(1);
        for _ in 0..10 {
            let counter = Arc::clone(&counter);
            pool.submit(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        pool.wait();
        assert_eq!(counter.load(Ordering::SeqCst), 10);
    }
}
