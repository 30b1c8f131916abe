//! The `ServerContext` holds the common state across the server

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::dns::cache::SynchronizedCache;
use crate::dns::client::{DnsClient, DnsNetworkClient};
use crate::dns::resolve::IterativeResolver;

pub const DEFAULT_CACHE_SIZE: usize = 128;
pub const DEFAULT_CACHE_TTL: u32 = 600;

/// IPv4 addresses of the IANA root nameservers, a.root-servers.net
/// through m.root-servers.net. Resolution starts here unless other hints
/// are configured.
pub const ROOT_HINTS: [Ipv4Addr; 13] = [
    Ipv4Addr::new(198, 41, 0, 4),
    Ipv4Addr::new(199, 9, 14, 201),
    Ipv4Addr::new(192, 33, 4, 12),
    Ipv4Addr::new(199, 7, 91, 13),
    Ipv4Addr::new(192, 203, 230, 10),
    Ipv4Addr::new(192, 5, 5, 241),
    Ipv4Addr::new(192, 112, 36, 4),
    Ipv4Addr::new(198, 97, 190, 53),
    Ipv4Addr::new(192, 36, 148, 17),
    Ipv4Addr::new(192, 58, 128, 30),
    Ipv4Addr::new(193, 0, 14, 129),
    Ipv4Addr::new(199, 7, 83, 42),
    Ipv4Addr::new(202, 12, 27, 33),
];

pub struct ServerStatistics {
    pub udp_query_count: AtomicUsize,
    pub failed_request_count: AtomicUsize,
}

impl ServerStatistics {
    pub fn get_udp_query_count(&self) -> usize {
        self.udp_query_count.load(Ordering::Acquire)
    }

    pub fn get_failed_request_count(&self) -> usize {
        self.failed_request_count.load(Ordering::Acquire)
    }
}

/// Configuration and shared runtime state handed to every request handler.
pub struct ServerContext {
    pub cache: SynchronizedCache,
    pub client: Box<dyn DnsClient + Send + Sync>,
    pub listen_address: String,
    pub dns_port: u16,
    pub root_hints: Vec<Ipv4Addr>,
    pub statistics: ServerStatistics,
}

impl ServerContext {
    pub fn new() -> ServerContext {
        ServerContext {
            cache: SynchronizedCache::new(DEFAULT_CACHE_SIZE, DEFAULT_CACHE_TTL),
            client: Box::new(DnsNetworkClient::new()),
            listen_address: "0.0.0.0".to_string(),
            dns_port: 53,
            root_hints: ROOT_HINTS.to_vec(),
            statistics: ServerStatistics {
                udp_query_count: AtomicUsize::new(0),
                failed_request_count: AtomicUsize::new(0),
            },
        }
    }

    pub fn create_resolver(&self, ptr: Arc<ServerContext>) -> IterativeResolver {
        IterativeResolver::new(ptr)
    }
}

impl Default for ServerContext {
    fn default() -> Self {
        ServerContext::new()
    }
}

#[cfg(test)]
pub mod tests {

    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    use super::*;
    use crate::dns::client::tests::{DnsStubClient, StubCallback};

    pub fn create_test_context(callback: Box<StubCallback>) -> Arc<ServerContext> {
        Arc::new(ServerContext {
            cache: SynchronizedCache::new(16, 300),
            client: Box::new(DnsStubClient::new(callback)),
            listen_address: "127.0.0.1".to_string(),
            dns_port: 53,
            root_hints: vec![Ipv4Addr::new(10, 0, 0, 1)],
            statistics: ServerStatistics {
                udp_query_count: AtomicUsize::new(0),
                failed_request_count: AtomicUsize::new(0),
            },
        })
    }
}
