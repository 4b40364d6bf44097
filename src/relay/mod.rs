//! The Relay (SPEC_FULL §4.E): Acceptor + Reactor + Sweeper.
//!
//! The accept loop's shape — bind, mark running, loop on
//! `listener.accept()`, `tokio::spawn` a per-connection task — is lifted
//! from the teacher's `inbound::socks5::Socks5Listener::start`; what's new
//! is the connection table (for the Sweeper and shutdown to reach
//! in-flight connections) and the reject-only admission check in front of
//! every spawn.

use crate::cipher::CipherPair;
use crate::config::Config;
use crate::connection::{self, ConnectionHandle, Params};
use crate::dns::Resolver;
use crate::events::{Event, EventBus};
use crate::statistic::Registry;
use crate::Result;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tracing::{info, warn};

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);
/// Grace period the shutdown path waits for in-flight connections to
/// close on their own before forcing them closed (SPEC_FULL §5).
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Runs the Acceptor, Sweeper, and (implicitly, via spawned tasks) the
/// Reactor for a single listening socket.
pub struct Relay {
    config: Config,
    registry: Arc<Registry>,
    events: Arc<EventBus>,
    resolver: Arc<Resolver>,
    table: Arc<DashMap<u64, ConnectionHandle>>,
    running: AtomicBool,
    epoch: Instant,
}

impl Relay {
    pub async fn new(config: Config) -> Result<Self> {
        let resolver = Arc::new(Resolver::new(4096)?);
        Ok(Relay {
            config,
            registry: Arc::new(Registry::new()),
            events: Arc::new(EventBus::default()),
            resolver,
            table: Arc::new(DashMap::new()),
            running: AtomicBool::new(false),
            epoch: Instant::now(),
        })
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Binds the listening socket and runs the Acceptor and Sweeper until
    /// `shutdown()` is called or the process receives its shutdown signal.
    /// Mirrors the teacher's `Socks5Listener::start` accept loop.
    pub async fn run(&self) -> Result<()> {
        let addr = format!("{}:{}", self.config.server, self.config.server_port);
        let listener = TcpListener::bind(&addr).await?;
        let local_addr = listener.local_addr()?;
        info!("Shadowsocks relay listening on {}", local_addr);

        self.running.store(true, Ordering::SeqCst);

        let sweeper = tokio::spawn(sweep_loop(self.table.clone(), self.epoch, self.config.timeout));

        while self.running.load(Ordering::SeqCst) {
            match listener.accept().await {
                Ok((stream, peer_addr)) => {
                    self.accept(stream, peer_addr);
                }
                Err(e) => {
                    if self.running.load(Ordering::SeqCst) {
                        warn!("accept error: {}", e);
                    }
                }
            }
        }

        sweeper.abort();
        Ok(())
    }

    fn accept(&self, stream: tokio::net::TcpStream, peer_addr: std::net::SocketAddr) {
        let active = self.registry.active_count();
        let max = self.config.max_connections;
        if active >= max {
            self.registry.on_reject();
            self.events.publish(Event::Rejected { client: peer_addr, active, max });
            return;
        }

        let conn_id = self.registry.next_conn_id();
        self.registry.on_accept(conn_id, peer_addr.ip());
        self.events.publish(Event::Accepted { client: peer_addr, active: active + 1, max });

        let cipher = match crate::cipher::CipherKind::try_from(self.config.method.as_str()) {
            Ok(kind) => CipherPair::new(kind, self.config.password.as_bytes()),
            Err(e) => {
                warn!("invalid cipher method in config: {}", e);
                self.registry.on_close(conn_id);
                return;
            }
        };

        let params = Params {
            id: conn_id,
            client_addr: peer_addr,
            cipher,
            target_dial_timeout: Duration::from_secs(self.config.target_connect_timeout),
            epoch: self.epoch,
            registry: self.registry.clone(),
            events: self.events.clone(),
            resolver: self.resolver.clone(),
        };

        let (handle, join) = connection::spawn(stream, params);
        let client_addr = handle.client_addr;
        self.table.insert(conn_id, handle);

        let table = self.table.clone();
        let registry = self.registry.clone();
        let events = self.events.clone();
        let started = Instant::now();

        tokio::spawn(async move {
            let outcome = match join.await {
                Ok(outcome) => outcome,
                Err(_) => return, // task panicked or was aborted; nothing left to report
            };
            table.remove(&conn_id);
            registry.on_close(conn_id);
            events.publish(Event::Closed {
                client: client_addr,
                target: outcome.target,
                cause: outcome.cause,
                duration: started.elapsed(),
                bytes_in: outcome.bytes_in,
                bytes_out: outcome.bytes_out,
            });
        });
    }

    /// Requests every in-flight connection close, waits up to
    /// `SHUTDOWN_GRACE`, then returns regardless (SPEC_FULL §5: shutdown
    /// does not wait indefinitely for stuck peers).
    pub async fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
        for entry in self.table.iter() {
            entry.value().request_close();
        }
        tokio::time::sleep(SHUTDOWN_GRACE).await;
    }
}

/// Runs every `SWEEP_INTERVAL`, reaping connections whose last recorded
/// activity is older than `timeout_secs` (SPEC_FULL §4.E). `epoch` is the
/// same `Instant` each Connection stamps `last_activity_secs` against, so
/// "now" here must be computed the same way.
async fn sweep_loop(table: Arc<DashMap<u64, ConnectionHandle>>, epoch: Instant, timeout_secs: u64) {
    let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
    loop {
        ticker.tick().await;
        let now = epoch.elapsed().as_secs();
        let mut reaped = 0u64;
        for entry in table.iter() {
            let last = entry.value().last_activity_secs.load(Ordering::Relaxed);
            if now.saturating_sub(last) > timeout_secs {
                entry.value().request_close();
                reaped += 1;
            }
        }
        if reaped > 0 {
            warn!("sweeper closing {} idle connection(s)", reaped);
        }
    }
}
