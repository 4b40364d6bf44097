//! Connection state machine (SPEC_FULL §4.D): decrypt-handshake -> resolve
//! -> dial -> stream -> close. Each Connection owns its client socket,
//! its (eventually) dialed target socket, and its `CipherPair`
//! exclusively — nothing outside this module touches cipher state, per
//! SPEC_FULL §5's concurrency contract.
//!
//! Byte counting follows the teacher's `tunnel::connection::TrackedStream`
//! idiom (update a shared atomic on every successful read/write) rather
//! than its idiom of wrapping the socket in an `AsyncRead`/`AsyncWrite`
//! adapter — here the byte count is a side effect of the state machine's
//! own read/write calls, since the state machine already owns the loop.

use crate::cipher::CipherPair;
use crate::common::address::{Address, ParseResult};
use crate::common::net::configure_tcp_stream;
use crate::dns::Resolver;
use crate::events::{CloseCause, Event, EventBus};
use crate::statistic::{Direction as StatDirection, Registry};
use crate::{Error, Result};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Notify;
use tracing::{debug, warn};

const HEADER_BUFFER_LIMIT: usize = 64 * 1024;
const IO_BUFFER_SIZE: usize = 64 * 1024;

/// Shared, cheaply-clonable handle the Relay keeps in its connection
/// table so the Sweeper and shutdown path can observe/signal a
/// Connection without reaching into its owning task.
pub struct ConnectionHandle {
    pub client_addr: SocketAddr,
    pub last_activity_secs: Arc<AtomicU64>,
    cancel: Arc<Notify>,
}

impl ConnectionHandle {
    pub fn request_close(&self) {
        self.cancel.notify_waiters();
    }
}

pub struct ConnectionOutcome {
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub cause: CloseCause,
    pub target: Option<String>,
}

pub struct Params {
    pub id: u64,
    pub client_addr: SocketAddr,
    pub cipher: CipherPair,
    pub target_dial_timeout: Duration,
    pub epoch: Instant,
    pub registry: Arc<Registry>,
    pub events: Arc<EventBus>,
    pub resolver: Arc<Resolver>,
}

/// Spawns one Connection's state machine onto its own task and returns a
/// handle immediately — before ReadingHeader even starts — so the Relay's
/// connection table can observe and signal it without waiting for any I/O.
/// The returned `JoinHandle` resolves to the `ConnectionOutcome` once the
/// Connection reaches Closed.
pub fn spawn(mut client: TcpStream, mut params: Params) -> (ConnectionHandle, tokio::task::JoinHandle<ConnectionOutcome>) {
    configure_tcp_stream(&client);
    let last_activity_secs = Arc::new(AtomicU64::new(params.epoch.elapsed().as_secs()));
    let cancel = Arc::new(Notify::new());
    let handle = ConnectionHandle {
        client_addr: params.client_addr,
        last_activity_secs: last_activity_secs.clone(),
        cancel: cancel.clone(),
    };

    let join = tokio::spawn(async move { drive(&mut client, &mut params, &last_activity_secs, &cancel).await });
    (handle, join)
}

async fn drive(
    client: &mut TcpStream,
    params: &mut Params,
    last_activity: &Arc<AtomicU64>,
    cancel: &Arc<Notify>,
) -> ConnectionOutcome {
    let header = tokio::select! {
        biased;
        _ = cancel.notified() => {
            return ConnectionOutcome { bytes_in: 0, bytes_out: 0, cause: CloseCause::Shutdown, target: None };
        }
        result = read_header(client, &mut params.cipher, last_activity, params.epoch) => result,
    };

    let (address, port, initial_payload) = match header {
        Ok(v) => v,
        Err(e) => {
            return ConnectionOutcome {
                bytes_in: 0,
                bytes_out: 0,
                cause: cause_for(&e),
                target: None,
            };
        }
    };

    let target_str = address.to_string_with_port(port);
    params.registry.on_target_known(params.id, &target_str);
    params.events.publish(Event::TargetResolved {
        client: params.client_addr,
        target: target_str.clone(),
    });

    let ip = match address.to_ip() {
        Some(ip) => ip,
        None => match params.resolver.resolve(&address.to_host()).await {
            Ok(ip) => ip,
            Err(e) => {
                warn!(target = %target_str, error = %e, "name resolution failed");
                return ConnectionOutcome {
                    bytes_in: 0,
                    bytes_out: 0,
                    cause: CloseCause::NameResolutionFailed,
                    target: Some(target_str),
                };
            }
        },
    };

    let mut target_stream =
        match tokio::time::timeout(params.target_dial_timeout, TcpStream::connect((ip, port))).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                debug!(target = %target_str, error = %e, "target unreachable");
                return ConnectionOutcome {
                    bytes_in: 0,
                    bytes_out: 0,
                    cause: CloseCause::TargetUnreachable,
                    target: Some(target_str),
                };
            }
            Err(_) => {
                return ConnectionOutcome {
                    bytes_in: 0,
                    bytes_out: 0,
                    cause: CloseCause::TargetUnreachable,
                    target: Some(target_str),
                };
            }
        };
    configure_tcp_stream(&target_stream);

    if !initial_payload.is_empty() {
        if let Err(e) = target_stream.write_all(&initial_payload).await {
            return ConnectionOutcome {
                bytes_in: initial_payload.len() as u64,
                bytes_out: 0,
                cause: cause_for(&e.into()),
                target: Some(target_str),
            };
        }
        params
            .registry
            .on_bytes(params.id, StatDirection::Sent, initial_payload.len() as u64);
    }

    params.events.publish(Event::StreamEstablished {
        client: params.client_addr,
        target: target_str.clone(),
    });

    let (bytes_in, bytes_out, cause) = stream(
        client,
        &mut target_stream,
        &mut params.cipher,
        params.id,
        params.registry.as_ref(),
        last_activity,
        params.epoch,
        cancel,
        initial_payload.len() as u64,
    )
    .await;

    ConnectionOutcome {
        bytes_in,
        bytes_out,
        cause,
        target: Some(target_str),
    }
}

async fn read_header(
    client: &mut TcpStream,
    cipher: &mut CipherPair,
    last_activity: &Arc<AtomicU64>,
    epoch: Instant,
) -> Result<(Address, u16, Vec<u8>)> {
    let mut raw = vec![0u8; 4096];
    let mut plain: Vec<u8> = Vec::new();
    loop {
        let n = client.read(&mut raw).await?;
        if n == 0 {
            return Err(Error::malformed_stream("client closed during header read"));
        }
        let decrypted = cipher.decryptor.decrypt(&raw[..n]);
        plain.extend_from_slice(&decrypted);
        touch(last_activity, epoch);

        if plain.len() > HEADER_BUFFER_LIMIT {
            return Err(Error::malformed_stream("decrypt buffer exceeded 64 KiB before header parsed"));
        }

        match Address::parse(&plain) {
            ParseResult::Ok { address, port, consumed } => {
                let initial_payload = plain[consumed..].to_vec();
                return Ok((address, port, initial_payload));
            }
            ParseResult::NeedMore => continue,
            ParseResult::Invalid => return Err(Error::malformed_stream("invalid address header")),
        }
    }
}

/// Backpressured two-direction copy: at most one direction's data is in
/// flight at a time, and its write is fully drained before the loop reads
/// again (SPEC_FULL §4.D). See SPEC_FULL §9 for why this intentionally
/// forgoes the teacher's cross-connection fair-scheduling copy loop.
async fn stream(
    client: &mut TcpStream,
    target: &mut TcpStream,
    cipher: &mut CipherPair,
    conn_id: u64,
    registry: &Registry,
    last_activity: &Arc<AtomicU64>,
    epoch: Instant,
    cancel: &Arc<Notify>,
    mut bytes_in: u64,
) -> (u64, u64, CloseCause) {
    let mut bytes_out = 0u64;
    let mut client_buf = vec![0u8; IO_BUFFER_SIZE];
    let mut target_buf = vec![0u8; IO_BUFFER_SIZE];
    // Set once a side reaches EOF; that side's read branch is then
    // disabled and the loop keeps draining the other direction until it
    // too finishes, per SPEC_FULL §4.D's half-close-then-drain rule.
    let mut client_done = false;
    let mut target_done = false;
    let mut cause = CloseCause::Eof;

    loop {
        if client_done && target_done {
            return (bytes_in, bytes_out, cause);
        }
        tokio::select! {
            biased;
            _ = cancel.notified() => {
                return (bytes_in, bytes_out, CloseCause::Shutdown);
            }
            result = client.read(&mut client_buf), if !client_done => {
                match result {
                    Ok(0) => {
                        let _ = target.shutdown().await;
                        client_done = true;
                        cause = CloseCause::Eof;
                    }
                    Ok(n) => {
                        let decrypted = cipher.decryptor.decrypt(&client_buf[..n]);
                        if !decrypted.is_empty() {
                            if let Err(e) = target.write_all(&decrypted).await {
                                return (bytes_in, bytes_out, cause_for(&e.into()));
                            }
                        }
                        bytes_in += n as u64;
                        touch(last_activity, epoch);
                        registry.on_bytes(conn_id, StatDirection::Sent, n as u64);
                    }
                    Err(e) if Error::is_peer_reset_io(&e) => {
                        let _ = target.shutdown().await;
                        return (bytes_in, bytes_out, CloseCause::PeerReset);
                    }
                    Err(e) => return (bytes_in, bytes_out, cause_for(&e.into())),
                }
            }
            result = target.read(&mut target_buf), if !target_done => {
                match result {
                    Ok(0) => {
                        let _ = client.shutdown().await;
                        target_done = true;
                        cause = CloseCause::Eof;
                    }
                    Ok(n) => {
                        let encrypted = cipher.encryptor.encrypt(&target_buf[..n]);
                        if let Err(e) = client.write_all(&encrypted).await {
                            return (bytes_in, bytes_out, cause_for(&e.into()));
                        }
                        bytes_out += n as u64;
                        touch(last_activity, epoch);
                        registry.on_bytes(conn_id, StatDirection::Received, n as u64);
                    }
                    Err(e) if Error::is_peer_reset_io(&e) => {
                        let _ = client.shutdown().await;
                        return (bytes_in, bytes_out, CloseCause::PeerReset);
                    }
                    Err(e) => return (bytes_in, bytes_out, cause_for(&e.into())),
                }
            }
        }
    }
}

fn touch(last_activity: &AtomicU64, epoch: Instant) {
    last_activity.store(epoch.elapsed().as_secs(), Ordering::Relaxed);
}

fn cause_for(e: &Error) -> CloseCause {
    match e {
        Error::MalformedStream(_) => CloseCause::MalformedStream,
        Error::NameResolutionFailed(_) => CloseCause::NameResolutionFailed,
        Error::TargetUnreachable(_) => CloseCause::TargetUnreachable,
        Error::IdleTimeout => CloseCause::IdleTimeout,
        Error::Io(io_err) if Error::is_peer_reset_io(io_err) => CloseCause::PeerReset,
        _ => CloseCause::Eof,
    }
}
