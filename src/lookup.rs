//! Collaborators the engine calls to annotate results. Neither one can
//! change which units are probed or how they are classified.

use crate::types::{PortInfo, Protocol};
use async_trait::async_trait;
use std::net::IpAddr;
use std::time::Duration;
use trust_dns_resolver::config::{ResolverConfig, ResolverOpts};
use trust_dns_resolver::TokioAsyncResolver;

/// Reverse name resolution, called at most once per host per scan.
/// Any failure is reported as `None`; the scan carries on without a name.
#[async_trait]
pub trait HostnameResolver: Send + Sync {
    async fn resolve(&self, addr: IpAddr) -> Option<String>;
}

/// Service annotation for a port.
pub trait PortLookup: Send + Sync {
    fn lookup(&self, port: u16, protocol: Protocol) -> Option<PortInfo>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoResolve;

#[async_trait]
impl HostnameResolver for NoResolve {
    async fn resolve(&self, _addr: IpAddr) -> Option<String> {
        None
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoLookup;

impl PortLookup for NoLookup {
    fn lookup(&self, _port: u16, _protocol: Protocol) -> Option<PortInfo> {
        None
    }
}

/// PTR lookups through the system's configured name servers.
///
/// A fresh resolver is built for every lookup so that no sockets outlive the
/// runtime of the scan that issued them.
#[derive(Debug, Clone)]
pub struct DnsResolver {
    config: ResolverConfig,
    opts: ResolverOpts,
    timeout: Duration,
}

impl DnsResolver {
    pub fn from_system_conf(timeout: Duration) -> Self {
        let (config, mut opts) = match trust_dns_resolver::system_conf::read_system_conf() {
            Ok(conf) => conf,
            Err(e) => {
                tracing::warn!("failed to read system resolver config, using defaults: {e}");
                (ResolverConfig::default(), ResolverOpts::default())
            }
        };
        opts.timeout = timeout;
        opts.attempts = 1;
        Self {
            config,
            opts,
            timeout,
        }
    }
}

#[async_trait]
impl HostnameResolver for DnsResolver {
    async fn resolve(&self, addr: IpAddr) -> Option<String> {
        let resolver = TokioAsyncResolver::tokio(self.config.clone(), self.opts.clone());
        let lookup = match tokio::time::timeout(self.timeout, resolver.reverse_lookup(addr)).await {
            Ok(Ok(lookup)) => lookup,
            Ok(Err(e)) => {
                tracing::debug!(%addr, "reverse lookup failed: {e}");
                return None;
            }
            Err(_) => {
                tracing::debug!(%addr, "reverse lookup timed out");
                return None;
            }
        };
        let name = lookup.iter().next()?.to_string();
        let name = name.trim_end_matches('.');
        if name.is_empty() {
            None
        } else {
            Some(name.to_string())
        }
    }
}
