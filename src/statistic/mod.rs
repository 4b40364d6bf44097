//! Statistics Registry (SPEC_FULL §4.F): global counters plus a
//! per-client-IP, per-target nested breakdown.
//!
//! The nested shape — `clients[ip].targets[host:port]` carrying its own
//! active/bytes_sent/bytes_received — mirrors the reference stack's
//! `StatsCollector` (`stats/collector.py`) almost field for field; the
//! `DashMap`+atomics idiom is carried over from the teacher's
//! `StatisticManager`.

mod tracker;

pub use tracker::ConnRecord;

use dashmap::DashMap;
use serde::Serialize;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Default, Serialize)]
pub struct TargetStats {
    pub active_count: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

struct TargetEntry {
    active_count: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
}

impl TargetEntry {
    fn new() -> Self {
        TargetEntry {
            active_count: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
        }
    }

    fn snapshot(&self) -> TargetStats {
        TargetStats {
            active_count: self.active_count.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Default, Serialize)]
pub struct ClientStats {
    pub active_connections: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub targets: std::collections::HashMap<String, TargetStats>,
}

struct ClientEntry {
    /// Distinct active connection ids for this client IP.
    active: dashmap::DashSet<u64>,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    targets: DashMap<String, TargetEntry>,
}

impl ClientEntry {
    fn new() -> Self {
        ClientEntry {
            active: dashmap::DashSet::new(),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            targets: DashMap::new(),
        }
    }

    fn snapshot(&self) -> ClientStats {
        ClientStats {
            active_connections: self.active.len() as u64,
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            targets: self
                .targets
                .iter()
                .map(|r| (r.key().clone(), r.value().snapshot()))
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct GlobalStats {
    pub total_accepted: u64,
    pub active: u64,
    pub rejected: u64,
    pub closed: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub start_time: u64,
}

#[derive(Debug, Serialize)]
pub struct Snapshot {
    pub global: GlobalStats,
    pub clients: std::collections::HashMap<IpAddr, ClientStats>,
}

/// Which direction a byte count applies to, from the relay's point of
/// view: `Sent` means bytes written toward the target (client upload),
/// `Received` means bytes written back to the client (download).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Sent,
    Received,
}

pub struct Registry {
    total_accepted: AtomicU64,
    active: AtomicU64,
    rejected: AtomicU64,
    closed: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    start_time: u64,
    clients: DashMap<IpAddr, ClientEntry>,
    connections: DashMap<u64, ConnRecord>,
    next_id: AtomicU64,
}

impl Registry {
    pub fn new() -> Self {
        Registry {
            total_accepted: AtomicU64::new(0),
            active: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            closed: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            start_time: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
            clients: DashMap::new(),
            connections: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn next_conn_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn active_count(&self) -> u64 {
        self.active.load(Ordering::Relaxed)
    }

    pub fn on_accept(&self, conn_id: u64, client_ip: IpAddr) {
        self.total_accepted.fetch_add(1, Ordering::Relaxed);
        self.active.fetch_add(1, Ordering::Relaxed);
        self.connections.insert(conn_id, ConnRecord::new(client_ip));
        let client = self.clients.entry(client_ip).or_insert_with(ClientEntry::new);
        client.active.insert(conn_id);
    }

    pub fn on_reject(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Called exactly once per connection, at the moment the Address
    /// Codec returns success (SPEC_FULL §9's single-source-of-truth
    /// note).
    pub fn on_target_known(&self, conn_id: u64, target: &str) {
        let Some(record) = self.connections.get(&conn_id) else {
            return;
        };
        *record.target.lock() = Some(target.to_string());
        if let Some(client) = self.clients.get(&record.client_ip) {
            let entry = client.targets.entry(target.to_string()).or_insert_with(TargetEntry::new);
            entry.active_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn on_bytes(&self, conn_id: u64, direction: Direction, n: u64) {
        match direction {
            Direction::Sent => self.bytes_sent.fetch_add(n, Ordering::Relaxed),
            Direction::Received => self.bytes_received.fetch_add(n, Ordering::Relaxed),
        };
        let Some(record) = self.connections.get(&conn_id) else {
            return;
        };
        let Some(client) = self.clients.get(&record.client_ip) else {
            return;
        };
        match direction {
            Direction::Sent => client.bytes_sent.fetch_add(n, Ordering::Relaxed),
            Direction::Received => client.bytes_received.fetch_add(n, Ordering::Relaxed),
        };
        if let Some(target) = record.target.lock().as_ref() {
            if let Some(entry) = client.targets.get(target) {
                match direction {
                    Direction::Sent => entry.bytes_sent.fetch_add(n, Ordering::Relaxed),
                    Direction::Received => entry.bytes_received.fetch_add(n, Ordering::Relaxed),
                };
            }
        }
    }

    pub fn on_close(&self, conn_id: u64) {
        self.active.fetch_sub(1, Ordering::Relaxed);
        self.closed.fetch_add(1, Ordering::Relaxed);
        let Some((_, record)) = self.connections.remove(&conn_id) else {
            return;
        };
        if let Some(client) = self.clients.get(&record.client_ip) {
            client.active.remove(&conn_id);
            if let Some(target) = record.target.lock().as_ref() {
                if let Some(entry) = client.targets.get(target) {
                    entry.active_count.fetch_sub(1, Ordering::Relaxed);
                }
            }
        }
    }

    /// Immutable snapshot safe to serialize. Per-client entries with zero
    /// active connections are not pruned here — cumulative per-client
    /// totals are useful even after the last connection from that IP
    /// closes, and pruning is cheap for a caller to do on the serialized
    /// form if desired.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            global: GlobalStats {
                total_accepted: self.total_accepted.load(Ordering::Relaxed),
                active: self.active.load(Ordering::Relaxed),
                rejected: self.rejected.load(Ordering::Relaxed),
                closed: self.closed.load(Ordering::Relaxed),
                bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
                bytes_received: self.bytes_received.load(Ordering::Relaxed),
                start_time: self.start_time,
            },
            clients: self
                .clients
                .iter()
                .map(|r| (*r.key(), r.value().snapshot()))
                .collect(),
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
