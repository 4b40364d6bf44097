//! Socket tuning helpers.

use socket2::SockRef;
use tokio::net::TcpStream;

/// Applies the socket-level tuning SPEC_FULL §4.D calls for: TCP_NODELAY
/// for small-packet latency, SO_KEEPALIVE, and (Linux/Android) SO_REUSEPORT
/// so multiple acceptor workers can share one listen address.
#[inline]
pub fn configure_tcp_stream(stream: &TcpStream) {
    let _ = stream.set_nodelay(true);
    let sock = SockRef::from(stream);
    let _ = sock.set_keepalive(true);
    #[cfg(any(target_os = "linux", target_os = "android"))]
    let _ = sock.set_reuse_port(true);
    // Best-effort: raise socket buffers toward 1 MiB where the host permits.
    let _ = sock.set_recv_buffer_size(1 << 20);
    let _ = sock.set_send_buffer_size(1 << 20);
}
