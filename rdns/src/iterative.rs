//! Iterative resolution: walk the delegation hierarchy from the root
//! servers toward an authoritative answer, following CNAME redirects and
//! harvesting glue from referrals.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::debug;

use crate::cache::DnsCache;
use crate::packet::{self, DnsMessage, DnsParseError};
use crate::records::{RData, RecordType, canonical_name};
use crate::roots;

/// Upper bound on delegation depth. CNAME redirects restart from the roots
/// with the same counter, so this also bounds chain length, and retries
/// against alternate nameservers consume iterations too, which keeps total
/// wall time below MAX_ITERATIONS x QUERY_TIMEOUT.
pub const MAX_ITERATIONS: usize = 15;

const QUERY_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_RESPONSE: usize = packet::MAX_UDP_MESSAGE;

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("invalid domain name")]
    InvalidDomain,
    #[error("maximum iterations exceeded")]
    MaxIterationsExceeded,
    #[error("no answer received")]
    NoAnswer,
    #[error("name does not exist")]
    NxDomain,
    #[error("invalid DNS response: {0}")]
    InvalidResponse(#[from] DnsParseError),
    #[error("unexpected response: {0}")]
    UnexpectedResponse(&'static str),
    #[error("upstream nameserver unreachable: {0}")]
    Upstream(#[source] std::io::Error),
}

/// A successfully resolved address and the TTL the authority attached to it.
#[derive(Debug, Clone, Copy)]
pub struct ResolvedAddress {
    pub addr: Ipv4Addr,
    pub ttl: u32,
}

pub struct IterativeResolver {
    roots: Vec<SocketAddr>,
    cache: Option<DnsCache>,
    default_ttl: Duration,
    /// Port queried on nameservers learned from glue or NS fallback.
    port: u16,
}

impl IterativeResolver {
    pub fn new(cache: Option<DnsCache>, default_ttl: Duration) -> Self {
        let roots = roots::all_ipv4()
            .into_iter()
            .map(|ip| SocketAddr::new(IpAddr::V4(ip), 53))
            .collect();
        Self {
            roots,
            cache,
            default_ttl,
            port: 53,
        }
    }

    /// Engine pointed at a custom root set. The port of the first root is
    /// reused for nameservers learned along the walk.
    pub fn with_roots(
        roots: Vec<SocketAddr>,
        cache: Option<DnsCache>,
        default_ttl: Duration,
    ) -> Self {
        let port = roots.first().map(|addr| addr.port()).unwrap_or(53);
        Self {
            roots,
            cache,
            default_ttl,
            port,
        }
    }

    /// Resolve a name by walking delegations from the roots.
    pub async fn resolve(
        &self,
        domain: &str,
        qtype: RecordType,
    ) -> Result<ResolvedAddress, ResolveError> {
        let mut domain = canonical_name(domain);
        let mut nameservers = self.roots.clone();
        let mut iteration = 0;

        while iteration < MAX_ITERATIONS {
            iteration += 1;

            let Some(&target) = nameservers.first() else {
                return Err(ResolveError::NoAnswer);
            };

            let response = match self.query_nameserver(target, &domain, qtype).await {
                Ok(response) => response,
                Err(e) => {
                    // Fall through the remaining candidates before giving up
                    if nameservers.len() > 1 {
                        debug!(nameserver = %target, error = %e, "nameserver failed, trying next");
                        nameservers.remove(0);
                        continue;
                    }
                    return Err(e);
                }
            };

            if response.header.rcode() == packet::RCODE_NXDOMAIN {
                return Err(ResolveError::NxDomain);
            }

            // Answer section, in wire order: a matching A record resolves the
            // query; a CNAME redirects it and restarts the walk at the roots.
            let mut redirected = false;
            for answer in &response.answers {
                match &answer.rdata {
                    RData::A(ip) if answer.rtype == qtype => {
                        let ttl = if answer.ttl > 0 {
                            Duration::from_secs(answer.ttl as u64)
                        } else {
                            self.default_ttl
                        };
                        if let Some(cache) = &self.cache {
                            cache.set(&domain, *ip, ttl).await;
                        }
                        return Ok(ResolvedAddress {
                            addr: *ip,
                            ttl: ttl.as_secs() as u32,
                        });
                    }
                    RData::CNAME(cname) => {
                        debug!(from = %domain, to = %cname, "following CNAME");
                        domain = canonical_name(cname);
                        nameservers = self.roots.clone();
                        redirected = true;
                        break;
                    }
                    _ => {}
                }
            }
            if redirected {
                continue;
            }

            // Referral: replace the nameserver set from the NS authorities,
            // preferring glue in the additional section over a lookup.
            let ns_names: Vec<&str> = response
                .authorities
                .iter()
                .filter_map(|record| match &record.rdata {
                    RData::NS(name) => Some(name.as_str()),
                    _ => None,
                })
                .collect();

            if !ns_names.is_empty() {
                let mut next = self.glue_addresses(&response);
                if next.is_empty() {
                    next = self.resolve_ns_names(&ns_names).await;
                }
                if !next.is_empty() {
                    nameservers = next;
                    continue;
                }
            }

            return Err(ResolveError::NoAnswer);
        }

        Err(ResolveError::MaxIterationsExceeded)
    }

    /// A records in the additional section are glue for the referral.
    fn glue_addresses(&self, response: &DnsMessage) -> Vec<SocketAddr> {
        response
            .additionals
            .iter()
            .filter_map(|record| match &record.rdata {
                RData::A(ip) => Some(SocketAddr::new(IpAddr::V4(*ip), self.port)),
                _ => None,
            })
            .collect()
    }

    async fn resolve_ns_names(&self, names: &[&str]) -> Vec<SocketAddr> {
        let mut addrs = Vec::new();
        for name in names {
            match self.resolve_nameserver(name).await {
                Ok(ip) => addrs.push(SocketAddr::new(IpAddr::V4(ip), self.port)),
                Err(e) => {
                    debug!(nameserver = %name, error = %e, "failed to resolve nameserver")
                }
            }
        }
        addrs
    }

    /// Glueless referral: find the nameserver's own address, via the cache
    /// when possible, otherwise through the system resolver.
    async fn resolve_nameserver(&self, name: &str) -> Result<Ipv4Addr, ResolveError> {
        let name = canonical_name(name);

        if let Some(cache) = &self.cache {
            if let Some(hit) = cache.get(&name).await {
                return Ok(hit.addr);
            }
        }

        let mut candidates = tokio::net::lookup_host((name.as_str(), 53))
            .await
            .map_err(ResolveError::Upstream)?;
        let ip = candidates
            .find_map(|addr| match addr.ip() {
                IpAddr::V4(v4) => Some(v4),
                IpAddr::V6(_) => None,
            })
            .ok_or(ResolveError::NoAnswer)?;

        if let Some(cache) = &self.cache {
            cache.set(&name, ip, self.default_ttl).await;
        }
        Ok(ip)
    }

    /// One UDP exchange with a nameserver. The deadline covers the whole
    /// exchange, send and receive included.
    async fn query_nameserver(
        &self,
        nameserver: SocketAddr,
        domain: &str,
        qtype: RecordType,
    ) -> Result<DnsMessage, ResolveError> {
        let id: u16 = rand::rng().random();
        let query = packet::build_message(&DnsMessage::query(id, domain, qtype))?;

        let exchange = async {
            let socket = UdpSocket::bind("0.0.0.0:0")
                .await
                .map_err(ResolveError::Upstream)?;
            // Connecting filters datagrams from other sources
            socket
                .connect(nameserver)
                .await
                .map_err(ResolveError::Upstream)?;
            socket.send(&query).await.map_err(ResolveError::Upstream)?;

            let mut buf = [0u8; MAX_RESPONSE];
            let len = socket.recv(&mut buf).await.map_err(ResolveError::Upstream)?;
            Ok::<_, ResolveError>(buf[..len].to_vec())
        };

        let raw = timeout(QUERY_TIMEOUT, exchange).await.map_err(|_| {
            ResolveError::Upstream(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("query to {} timed out", nameserver),
            ))
        })??;

        let response = packet::parse_message(&raw)?;
        if response.header.id != id {
            return Err(ResolveError::UnexpectedResponse("transaction id mismatch"));
        }
        if !response.header.is_response() {
            return Err(ResolveError::UnexpectedResponse("QR flag not set"));
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_roots() {
        let engine = IterativeResolver::new(None, Duration::from_secs(300));
        assert_eq!(engine.roots.len(), 13);
        assert!(engine.roots.iter().all(|addr| addr.port() == 53));
    }

    #[test]
    fn test_with_roots_reuses_port() {
        let engine = IterativeResolver::with_roots(
            vec!["127.0.0.1:5533".parse().unwrap()],
            None,
            Duration::from_secs(300),
        );
        assert_eq!(engine.port, 5533);
    }
}
