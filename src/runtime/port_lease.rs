// src/runtime/port_lease.rs
//! Port leasing backed by filesystem lock files
//!
//! Simulation middleware binds fixed default ports, so running several
//! instances on one host requires dynamic reassignment. A lease is taken
//! by atomically creating a lock file in a shared directory, which makes
//! leases visible across separate OS processes, not just threads. A port
//! is only a candidate when a TCP connect probe to localhost fails and no
//! lock file exists.
//!
//! Known limitation: a process killed out-of-band (SIGKILL) never runs its
//! release path and leaks its lock file; stale locks must be cleaned up
//! manually.

use crate::utils::config::EngineConfig;
use crate::utils::errors::{EngineError, Result};
use parking_lot::Mutex;
use rand::Rng;
use std::fs::OpenOptions;
use std::net::{SocketAddr, TcpStream};
use std::ops::Range;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Connect probe timeout; a bound port answers well within this
const PROBE_TIMEOUT: Duration = Duration::from_millis(200);

/// An exclusive claim on one port, released on drop
#[derive(Debug)]
pub struct PortLease {
    port: u16,
    lock_file: PathBuf,
    held: bool,
}

impl PortLease {
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_held(&self) -> bool {
        self.held
    }

    /// Delete the lock file. Releasing an already-released lease is a
    /// no-op, never an error.
    pub fn release(&mut self) {
        if !self.held {
            return;
        }
        self.held = false;
        match std::fs::remove_file(&self.lock_file) {
            Ok(()) => info!(port = self.port, "port lease released"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(port = self.port, "lock file already gone")
            }
            Err(e) => warn!(port = self.port, error = %e, "failed to remove port lock file"),
        }
    }
}

impl Drop for PortLease {
    fn drop(&mut self) {
        self.release();
    }
}

/// Allocates and releases port leases for one host
#[derive(Debug)]
pub struct PortLeaseManager {
    lock_dir: PathBuf,
    lock_prefix: String,
    /// Serializes the probe-then-lock sequence between in-process callers
    /// so concurrent acquisitions don't hammer the same candidates
    probe_lock: Mutex<()>,
}

impl PortLeaseManager {
    pub fn new(lock_dir: impl Into<PathBuf>, lock_prefix: impl Into<String>) -> Self {
        Self {
            lock_dir: lock_dir.into(),
            lock_prefix: lock_prefix.into(),
            probe_lock: Mutex::new(()),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.lock_dir.clone(), config.lock_prefix.clone())
    }

    /// Acquire a lease on a random free port in `range`.
    ///
    /// Samples until a port passes both the connect probe and the lock
    /// file check; gives up with `PortAllocation` once `timeout` elapses.
    pub fn acquire(&self, range: Range<u16>, timeout: Duration) -> Result<PortLease> {
        let started = Instant::now();
        let mut rng = rand::thread_rng();

        while started.elapsed() < timeout {
            let port = rng.gen_range(range.clone());
            trace!(port, "testing port");

            let _guard = self.probe_lock.lock();
            if port_open(port) || self.is_locked(port) {
                trace!(port, "port unavailable");
                continue;
            }

            let lock_file = self.lock_file_path(port);
            match OpenOptions::new().write(true).create_new(true).open(&lock_file) {
                Ok(_) => {
                    info!(port, "port lease acquired");
                    return Ok(PortLease {
                        port,
                        lock_file,
                        held: true,
                    });
                }
                // Lost the race against another process
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            }
        }

        Err(EngineError::PortAllocation {
            start: range.start,
            end: range.end,
            timeout_secs: timeout.as_secs(),
        })
    }

    fn is_locked(&self, port: u16) -> bool {
        self.lock_file_path(port).exists()
    }

    fn lock_file_path(&self, port: u16) -> PathBuf {
        self.lock_dir
            .join(format!("{}-{}.lock", self.lock_prefix, port))
    }

    /// Lock files currently present, for diagnostics
    pub fn locked_ports(&self) -> Vec<u16> {
        let Ok(entries) = std::fs::read_dir(&self.lock_dir) else {
            return Vec::new();
        };
        let prefix = format!("{}-", self.lock_prefix);
        entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().to_string();
                name.strip_prefix(&prefix)?
                    .strip_suffix(".lock")?
                    .parse()
                    .ok()
            })
            .collect()
    }
}

fn port_open(port: u16) -> bool {
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    TcpStream::connect_timeout(&addr, PROBE_TIMEOUT).is_ok()
}
