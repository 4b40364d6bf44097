//! Per-connection bookkeeping record. The Registry keeps one of these per
//! active connection id so that a later `on_bytes`/`on_close` call knows
//! which client/target bucket to update without the caller re-supplying
//! that context on every call.

use parking_lot::Mutex;
use std::net::IpAddr;

pub struct ConnRecord {
    pub client_ip: IpAddr,
    pub target: Mutex<Option<String>>,
}

impl ConnRecord {
    pub fn new(client_ip: IpAddr) -> Self {
        ConnRecord {
            client_ip,
            target: Mutex::new(None),
        }
    }
}
