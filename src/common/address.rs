//! Shadowsocks address header codec (SPEC_FULL §4.B).
//!
//! Unlike a SOCKS5-style reader that assumes a whole frame is already
//! buffered, `parse` works against whatever prefix of the decrypt buffer
//! is available and tells the caller whether to wait for more bytes.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    Ipv4(Ipv4Addr),
    Ipv6(Ipv6Addr),
    Domain(String),
}

/// Outcome of attempting to parse a header out of a partial buffer.
#[derive(Debug, PartialEq, Eq)]
pub enum ParseResult {
    /// Parsed a full header; `consumed` is the number of bytes (including
    /// ATYP and PORT) that made up the header.
    Ok {
        address: Address,
        port: u16,
        consumed: usize,
    },
    /// Not enough bytes yet — caller should wait for more and retry.
    NeedMore,
    /// Header can never be valid from this prefix (bad ATYP, zero-length
    /// domain, or a disallowed host byte). Caller MUST drop the connection.
    Invalid,
}

impl Address {
    /// Parses a Shadowsocks address header from the front of `buf`.
    ///
    /// `buf` need not contain only the header — trailing bytes past
    /// `consumed` are the caller's "initial payload".
    pub fn parse(buf: &[u8]) -> ParseResult {
        if buf.is_empty() {
            return ParseResult::NeedMore;
        }
        match buf[0] {
            ATYP_IPV4 => {
                // atyp + 4 octets + 2 port bytes
                if buf.len() < 1 + 4 + 2 {
                    return ParseResult::NeedMore;
                }
                let ip = Ipv4Addr::new(buf[1], buf[2], buf[3], buf[4]);
                let port = u16::from_be_bytes([buf[5], buf[6]]);
                ParseResult::Ok {
                    address: Address::Ipv4(ip),
                    port,
                    consumed: 7,
                }
            }
            ATYP_IPV6 => {
                if buf.len() < 1 + 16 + 2 {
                    return ParseResult::NeedMore;
                }
                let mut octets = [0u8; 16];
                octets.copy_from_slice(&buf[1..17]);
                let ip = Ipv6Addr::from(octets);
                let port = u16::from_be_bytes([buf[17], buf[18]]);
                ParseResult::Ok {
                    address: Address::Ipv6(ip),
                    port,
                    consumed: 19,
                }
            }
            ATYP_DOMAIN => {
                if buf.len() < 2 {
                    return ParseResult::NeedMore;
                }
                let len = buf[1] as usize;
                if len == 0 {
                    return ParseResult::Invalid;
                }
                let total = 2 + len + 2;
                if buf.len() < total {
                    return ParseResult::NeedMore;
                }
                let host_bytes = &buf[2..2 + len];
                if !host_bytes.iter().all(|&b| is_host_byte(b)) {
                    return ParseResult::Invalid;
                }
                // Safe: is_host_byte restricts to ASCII.
                let domain = std::str::from_utf8(host_bytes)
                    .expect("is_host_byte guarantees ASCII")
                    .to_string();
                let port = u16::from_be_bytes([buf[total - 2], buf[total - 1]]);
                ParseResult::Ok {
                    address: Address::Domain(domain),
                    port,
                    consumed: total,
                }
            }
            _ => ParseResult::Invalid,
        }
    }

    /// Encodes an address header. Chooses IPv4/IPv6 when the literal
    /// string parses as one, otherwise encodes as DomainName.
    pub fn encode(addr: &Address, port: u16) -> Vec<u8> {
        let mut buf = Vec::with_capacity(addr.len());
        match addr {
            Address::Ipv4(ip) => {
                buf.push(ATYP_IPV4);
                buf.extend_from_slice(&ip.octets());
            }
            Address::Ipv6(ip) => {
                buf.push(ATYP_IPV6);
                buf.extend_from_slice(&ip.octets());
            }
            Address::Domain(host) => {
                buf.push(ATYP_DOMAIN);
                buf.push(host.len() as u8);
                buf.extend_from_slice(host.as_bytes());
            }
        }
        buf.extend_from_slice(&port.to_be_bytes());
        buf
    }

    /// Encodes a literal host string, preferring IPv4/IPv6 when it parses
    /// as one, falling back to DomainName.
    pub fn encode_host(host: &str, port: u16) -> Vec<u8> {
        let addr = Address::from_host_str(host);
        Address::encode(&addr, port)
    }

    pub fn from_host_str(host: &str) -> Address {
        if let Ok(ip) = host.parse::<Ipv4Addr>() {
            return Address::Ipv4(ip);
        }
        if let Ok(ip) = host.parse::<Ipv6Addr>() {
            return Address::Ipv6(ip);
        }
        Address::Domain(host.to_string())
    }

    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        match self {
            Address::Ipv4(_) => 1 + 4 + 2,
            Address::Ipv6(_) => 1 + 16 + 2,
            Address::Domain(d) => 1 + 1 + d.len() + 2,
        }
    }

    pub fn to_ip(&self) -> Option<IpAddr> {
        match self {
            Address::Ipv4(ip) => Some(IpAddr::V4(*ip)),
            Address::Ipv6(ip) => Some(IpAddr::V6(*ip)),
            Address::Domain(_) => None,
        }
    }

    pub fn to_host(&self) -> String {
        match self {
            Address::Ipv4(ip) => ip.to_string(),
            Address::Ipv6(ip) => ip.to_string(),
            Address::Domain(d) => d.clone(),
        }
    }

    pub fn to_string_with_port(&self, port: u16) -> String {
        match self {
            Address::Ipv4(ip) => format!("{ip}:{port}"),
            Address::Ipv6(ip) => format!("[{ip}]:{port}"),
            Address::Domain(d) => format!("{d}:{port}"),
        }
    }
}

/// RFC 1035-ish "safe host character" check: letters, digits, '.', '-',
/// '_', ':' (to tolerate bracket-free IPv6 literals some clients send).
/// Anything else in a domain field is refused rather than handed to the
/// resolver — SPEC_FULL §4.B requires garbage never falls through to DNS.
fn is_host_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'.' | b'-' | b'_' | b':')
}
