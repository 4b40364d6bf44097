//! Name resolution (SPEC_FULL §4.C): given a host and a 5 s deadline,
//! return one IP address, trying IPv4 first and falling back to IPv6.

use super::DnsCache;
use crate::{Error, Result};
use hickory_resolver::TokioAsyncResolver;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const RESOLVE_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Resolver {
    resolver: TokioAsyncResolver,
    cache: Arc<DnsCache>,
}

impl Resolver {
    /// Builds a resolver from the host's system configuration
    /// (`/etc/resolv.conf` on Unix), with an in-process LRU+TTL cache.
    pub fn new(cache_size: usize) -> Result<Self> {
        let resolver = TokioAsyncResolver::tokio_from_system_conf()
            .map_err(|e| Error::name_resolution_failed(format!("failed to init resolver: {e}")))?;
        Ok(Resolver {
            resolver,
            cache: Arc::new(DnsCache::new(cache_size)),
        })
    }

    /// Resolves `host` to a single IP, preferring IPv4. IP literals pass
    /// through without a query. Bounded by a fixed 5s deadline
    /// regardless of caller-supplied timeouts, per SPEC_FULL §4.C.
    pub async fn resolve(&self, host: &str) -> Result<IpAddr> {
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(ip);
        }

        if let Some(entry) = self.cache.get(host) {
            if let Some(ip) = entry.first_ip() {
                debug!(%host, %ip, "dns cache hit");
                return Ok(ip);
            }
        }

        let ip = tokio::time::timeout(RESOLVE_TIMEOUT, self.lookup(host)).await??;

        self.cache.put(host.to_string(), vec![ip]);
        debug!(%host, %ip, "dns resolved");
        Ok(ip)
    }

    async fn lookup(&self, host: &str) -> Result<IpAddr> {
        if let Ok(response) = self.resolver.ipv4_lookup(host).await {
            if let Some(ip) = response.iter().next() {
                return Ok(IpAddr::V4(ip.0));
            }
        }
        match self.resolver.ipv6_lookup(host).await {
            Ok(response) => response
                .iter()
                .next()
                .map(|ip| IpAddr::V6(ip.0))
                .ok_or_else(|| Error::name_resolution_failed(format!("no records for {host}"))),
            Err(e) => Err(Error::name_resolution_failed(format!("{host}: {e}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[tokio::test]
    async fn ip_literal_passes_through_without_lookup() {
        let resolver = Resolver::new(64).unwrap();
        let ip = resolver.resolve("127.0.0.1").await.unwrap();
        assert_eq!(ip, IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)));
    }
}
