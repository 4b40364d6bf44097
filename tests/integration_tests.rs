//! End-to-end scenario tests (SPEC_FULL §8 seed scenarios): each test
//! binds a real `Relay` to `127.0.0.1:0`, drives it with a hand-rolled
//! Shadowsocks test client, and asserts on the wire behavior and the
//! Statistics Registry rather than on internal state.

use ss_relay::cipher::{CipherKind, CipherPair};
use ss_relay::common::address::Address;
use ss_relay::{Config, Relay};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

fn test_config(server_port: u16, max_connections: u64, timeout: u64) -> Config {
    Config {
        server: "127.0.0.1".to_string(),
        server_port,
        password: "passw0rd".to_string(),
        method: "aes-256-cfb".to_string(),
        timeout,
        max_connections,
        target_connect_timeout: 5,
        fast_open: false,
        workers: 1,
        verbose: false,
    }
}

/// Binds a stub target that echoes back whatever it receives.
async fn spawn_echo_target() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut sock, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                let mut buf = vec![0u8; 64 * 1024];
                loop {
                    match sock.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => {
                            if sock.write_all(&buf[..n]).await.is_err() {
                                return;
                            }
                        }
                    }
                }
            });
        }
    });
    addr
}

/// Spawns a Relay bound to an ephemeral port (pass `server_port: 0` in
/// `config`) and returns it plus the address clients should connect to.
/// The relay runs on a background task for the lifetime of the test.
async fn spawn_relay(config: Config) -> (Arc<Relay>, SocketAddr) {
    // Discover a free port by binding and immediately dropping a probe
    // listener, then hand that exact port to the relay's own listener.
    let probe = TcpListener::bind(format!("{}:0", config.server)).await.unwrap();
    let real_addr = probe.local_addr().unwrap();
    drop(probe);

    let relay = Arc::new(Relay::new(Config { server_port: real_addr.port(), ..config }).await.unwrap());
    {
        let relay = relay.clone();
        tokio::spawn(async move {
            let _ = relay.run().await;
        });
    }
    // Give the acceptor a moment to bind before the first connect attempt.
    tokio::time::sleep(Duration::from_millis(50)).await;
    (relay, real_addr)
}

/// Connects to the relay and performs the client side of the handshake:
/// sends the encrypted address header (plus any trailing payload) and
/// returns the connected socket and the client-side `CipherPair` so the
/// caller can keep streaming.
async fn handshake(relay_addr: SocketAddr, header_payload: &[u8], password: &str, method: &str) -> (TcpStream, CipherPair) {
    let kind = CipherKind::try_from(method).unwrap();
    let mut cipher = CipherPair::new(kind, password.as_bytes());
    let mut sock = TcpStream::connect(relay_addr).await.unwrap();
    let on_wire = cipher.encryptor.encrypt(header_payload);
    sock.write_all(&on_wire).await.unwrap();
    (sock, cipher)
}

#[tokio::test]
async fn request_response_round_trips_through_echo_target() {
    let target_addr = spawn_echo_target().await;
    let (relay, relay_addr) = spawn_relay(test_config(0, 10, 120)).await;

    let header = Address::encode(&Address::from_host_str(&target_addr.ip().to_string()), target_addr.port());
    let request = b"GET / HTTP/1.0\r\n\r\n";
    let mut payload = header.clone();
    payload.extend_from_slice(request);

    let (mut sock, mut client_cipher) = handshake(relay_addr, &payload, "passw0rd", "aes-256-cfb").await;

    // Server's first bytes are its freshly generated IV.
    let iv_len = CipherKind::Aes256Cfb.iv_len();
    let mut iv_buf = vec![0u8; iv_len];
    sock.read_exact(&mut iv_buf).await.unwrap();

    let mut echoed = vec![0u8; request.len()];
    sock.read_exact(&mut echoed).await.unwrap();
    let decrypted = client_cipher.decryptor.decrypt(&[&iv_buf[..], &echoed[..]].concat());
    assert_eq!(decrypted, request);

    tokio::time::sleep(Duration::from_millis(50)).await;
    let snap = relay.registry().snapshot();
    assert_eq!(snap.global.total_accepted, 1);
    // The initial payload (the request, carried past the header in the
    // same encrypted chunk) must be counted as sent bytes, not just
    // folded silently into the stream.
    assert_eq!(snap.global.bytes_sent, request.len() as u64);
}

#[tokio::test]
async fn client_half_close_after_request_still_relays_the_full_response() {
    // A very common HTTP/1.0 client pattern: send the request, then
    // shutdown(SHUT_WR) while waiting for the response. The relay must
    // half-close the target in turn and keep draining the response back
    // to the client rather than tearing down both sockets on the first
    // EOF it observes (SPEC_FULL §4.D).
    let target_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let listen_addr = target_listener.local_addr().unwrap();
    let response = b"HTTP/1.0 200 OK\r\nContent-Length: 5\r\n\r\nhello".to_vec();
    let response_for_target = response.clone();
    tokio::spawn(async move {
        let (mut sock, _) = target_listener.accept().await.unwrap();
        let mut request = Vec::new();
        sock.read_to_end(&mut request).await.unwrap();
        assert_eq!(request, b"GET / HTTP/1.0\r\n\r\n");
        sock.write_all(&response_for_target).await.unwrap();
    });

    let (relay, relay_addr) = spawn_relay(test_config(0, 10, 120)).await;

    let header = Address::encode(&Address::from_host_str(&listen_addr.ip().to_string()), listen_addr.port());
    let request = b"GET / HTTP/1.0\r\n\r\n";
    let mut payload = header.clone();
    payload.extend_from_slice(request);

    let (mut sock, mut client_cipher) = handshake(relay_addr, &payload, "passw0rd", "aes-256-cfb").await;
    sock.shutdown().await.unwrap();

    let mut on_wire = Vec::new();
    sock.read_to_end(&mut on_wire).await.unwrap();
    let decrypted = client_cipher.decryptor.decrypt(&on_wire);
    assert_eq!(decrypted, response);

    tokio::time::sleep(Duration::from_millis(50)).await;
    let snap = relay.registry().snapshot();
    assert_eq!(snap.global.closed, 1);
}

#[tokio::test]
async fn long_one_way_transfer_is_never_reaped_by_a_short_idle_timeout() {
    let target_addr = spawn_echo_target().await;
    // idle_timeout must satisfy the config range (60..604800); the sweep
    // itself only runs every 60s so this test only asserts the connection
    // is still alive and the byte counters moved, not that a sweep tick
    // actually elapsed.
    let (_relay, relay_addr) = spawn_relay(test_config(0, 10, 60)).await;

    let header = Address::encode(&Address::from_host_str(&target_addr.ip().to_string()), target_addr.port());
    let (mut sock, mut client_cipher) = handshake(relay_addr, &header, "passw0rd", "aes-256-cfb").await;

    let iv_len = CipherKind::Aes256Cfb.iv_len();
    let mut iv_buf = vec![0u8; iv_len];
    sock.read_exact(&mut iv_buf).await.unwrap();
    let _ = client_cipher.decryptor.decrypt(&iv_buf);

    let chunk = vec![0xABu8; 64 * 1024];
    let mut total_sent = 0u64;
    for _ in 0..4 {
        let on_wire = client_cipher.encryptor.encrypt(&chunk);
        sock.write_all(&on_wire).await.unwrap();
        let mut echoed = vec![0u8; chunk.len()];
        sock.read_exact(&mut echoed).await.unwrap();
        total_sent += chunk.len() as u64;
    }
    assert_eq!(total_sent, 4 * 64 * 1024);
    // The connection must still be writable — a reaped connection would
    // have had its socket closed out from under us.
    let on_wire = client_cipher.encryptor.encrypt(b"still alive");
    sock.write_all(&on_wire).await.unwrap();
    let mut echoed = vec![0u8; b"still alive".len()];
    sock.read_exact(&mut echoed).await.unwrap();
}

#[tokio::test]
async fn undefined_atyp_closes_the_connection_as_malformed_stream() {
    let (relay, relay_addr) = spawn_relay(test_config(0, 10, 120)).await;

    let bad_header = vec![0x05, 1, 2, 3, 4, 0, 80];
    let (mut sock, _client_cipher) = handshake(relay_addr, &bad_header, "passw0rd", "aes-256-cfb").await;

    // The relay closes the socket without ever sending its IV prefix.
    let mut buf = [0u8; 1];
    let n = sock.read(&mut buf).await.unwrap_or(0);
    assert_eq!(n, 0, "relay must not stream anything back for a malformed header");

    tokio::time::sleep(Duration::from_millis(50)).await;
    let snap = relay.registry().snapshot();
    assert_eq!(snap.global.rejected, 0);
    assert_eq!(snap.global.closed, 1);
}

#[tokio::test]
async fn admission_control_rejects_only_the_overflowing_connection() {
    let target_addr = spawn_echo_target().await;
    let (relay, relay_addr) = spawn_relay(test_config(0, 2, 120)).await;

    let header = Address::encode(&Address::from_host_str(&target_addr.ip().to_string()), target_addr.port());

    let (sock_a, _cipher_a) = handshake(relay_addr, &header, "passw0rd", "aes-256-cfb").await;
    let (sock_b, _cipher_b) = handshake(relay_addr, &header, "passw0rd", "aes-256-cfb").await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(relay.registry().active_count(), 2);

    let mut sock_c = TcpStream::connect(relay_addr).await.unwrap();
    let mut buf = [0u8; 1];
    let n = sock_c.read(&mut buf).await.unwrap_or(0);
    assert_eq!(n, 0, "the third connection must be closed, not streamed");

    tokio::time::sleep(Duration::from_millis(50)).await;
    let snap = relay.registry().snapshot();
    assert_eq!(snap.global.rejected, 1);
    assert_eq!(snap.global.active, 2);

    drop(sock_a);
    drop(sock_b);
}

#[tokio::test]
async fn client_disconnect_mid_transfer_half_closes_the_target() {
    let target_addr = spawn_echo_target().await;
    let (relay, relay_addr) = spawn_relay(test_config(0, 10, 120)).await;

    let header = Address::encode(&Address::from_host_str(&target_addr.ip().to_string()), target_addr.port());
    let (mut sock, mut client_cipher) = handshake(relay_addr, &header, "passw0rd", "aes-256-cfb").await;

    let chunk = vec![0x11u8; 1024 * 1024];
    let on_wire = client_cipher.encryptor.encrypt(&chunk);
    sock.write_all(&on_wire).await.unwrap();

    // Disconnect without reading the echoed response back.
    drop(sock);

    tokio::time::sleep(Duration::from_millis(100)).await;
    let snap = relay.registry().snapshot();
    assert_eq!(snap.global.closed, 1);
    assert_eq!(snap.global.active, 0);
}

#[tokio::test]
async fn dns_resolution_failure_closes_the_connection() {
    let (relay, relay_addr) = spawn_relay(test_config(0, 10, 120)).await;

    let header = Address::encode(&Address::Domain("does-not-exist.invalid".to_string()), 80);
    let (mut sock, _client_cipher) = handshake(relay_addr, &header, "passw0rd", "aes-256-cfb").await;

    let mut buf = [0u8; 1];
    let n = sock.read(&mut buf).await.unwrap_or(0);
    assert_eq!(n, 0);

    tokio::time::sleep(Duration::from_millis(200)).await;
    let snap = relay.registry().snapshot();
    assert_eq!(snap.global.closed, 1);
}
