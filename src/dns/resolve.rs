//! iterative resolution: walking the delegation tree from the root hints
//! down to whichever server holds the answer

use std::collections::{HashSet, VecDeque};
use std::net::Ipv4Addr;
use std::sync::Arc;

use derive_more::{Display, Error, From};

use crate::dns::client::ClientError;
use crate::dns::context::ServerContext;
use crate::dns::protocol::{DnsPacket, QueryType};

#[derive(Debug, Display, From, Error)]
pub enum ResolveError {
    Client(ClientError),
    NoServersAvailable,
    ResolutionDepthExceeded,
    ResolutionTimeout,
    NoSuchName,
}

type Result<T> = std::result::Result<T, ResolveError>;

/// Upper bound on upstream queries for one client question, nested
/// lookups included.
const MAX_HOPS: u32 = 16;

const UPSTREAM_PORT: u16 = 53;

/// Hop accounting shared between a resolution and the nested lookups it
/// spawns for glueless referrals, so a delegation chain cannot recurse
/// without bound.
struct ResolveBudget {
    hops: u32,
}

impl ResolveBudget {
    fn new() -> ResolveBudget {
        ResolveBudget { hops: 0 }
    }

    fn take_hop(&mut self) -> Result<()> {
        self.hops += 1;
        if self.hops > MAX_HOPS {
            return Err(ResolveError::ResolutionDepthExceeded);
        }

        Ok(())
    }
}

/// Resolver that answers questions by walking referrals from the root
/// hints, without asking any server to recurse on its behalf.
pub struct IterativeResolver {
    context: Arc<ServerContext>,
}

impl IterativeResolver {
    pub fn new(context: Arc<ServerContext>) -> IterativeResolver {
        IterativeResolver { context }
    }

    /// Resolve a question starting from the root hints.
    ///
    /// On success the returned packet is guaranteed to hold an answer
    /// record matching `(qname, qtype)`; every failure is a typed error,
    /// never a partial packet.
    pub fn resolve(&self, qname: &str, qtype: QueryType) -> Result<DnsPacket> {
        log::debug!("resolving {:?} {}", qtype, qname);

        let mut budget = ResolveBudget::new();
        self.resolve_with_budget(qname, qtype, &mut budget)
    }

    fn resolve_with_budget(
        &self,
        qname: &str,
        qtype: QueryType,
        budget: &mut ResolveBudget,
    ) -> Result<DnsPacket> {
        let mut candidates: VecDeque<Ipv4Addr> =
            self.context.root_hints.iter().copied().collect();
        let mut visited: HashSet<Ipv4Addr> = HashSet::new();
        let mut timed_out = false;

        while let Some(server) = candidates.pop_front() {
            // referral cycles come back to a server we have already asked
            if !visited.insert(server) {
                continue;
            }
            budget.take_hop()?;

            let response = match self.query_server(qname, qtype, server) {
                Ok(response) => response,
                Err(ClientError::TimeOut) => {
                    log::debug!("{} timed out for {}", server, qname);
                    timed_out = true;
                    continue;
                }
                Err(err) => {
                    log::debug!("{} unreachable for {}: {}", server, qname, err);
                    continue;
                }
            };

            if response.has_answer(qname, qtype) {
                return Ok(response);
            }

            let glue = response.get_glue_a(qname);
            if !glue.is_empty() {
                candidates.extend(glue);
                continue;
            }

            let unresolved = response.get_unresolved_ns(qname);
            if unresolved.is_empty() {
                // neither an answer nor anywhere further to go
                return Err(ResolveError::NoSuchName);
            }

            if let Some(addr) = self.resolve_nameserver(&unresolved, budget) {
                candidates.push_back(addr);
            }
        }

        if timed_out {
            Err(ResolveError::ResolutionTimeout)
        } else {
            Err(ResolveError::NoServersAvailable)
        }
    }

    fn query_server(
        &self,
        qname: &str,
        qtype: QueryType,
        server: Ipv4Addr,
    ) -> crate::dns::client::Result<DnsPacket> {
        log::debug!("querying {} for {:?} {}", server, qtype, qname);
        self.context
            .client
            .send_query(qname, qtype, (server, UPSTREAM_PORT), false)
    }

    /// A referral without glue names hosts we first have to resolve
    /// ourselves. The nested walk draws hops from the same budget as the
    /// parent.
    fn resolve_nameserver(
        &self,
        hosts: &[String],
        budget: &mut ResolveBudget,
    ) -> Option<Ipv4Addr> {
        for host in hosts {
            match self.resolve_with_budget(host, QueryType::A, budget) {
                Ok(response) => {
                    if let Some(addr) = response.get_random_a() {
                        return Some(addr);
                    }
                }
                Err(ResolveError::ResolutionDepthExceeded) => break,
                Err(err) => {
                    log::debug!("failed to resolve nameserver {}: {}", host, err);
                }
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::dns::context::tests::create_test_context;
    use crate::dns::protocol::{DnsRecord, ResultCode};

    fn referral(qname: &str, zone: &str, host: &str, glue: Option<Ipv4Addr>) -> DnsPacket {
        let mut packet = DnsPacket::new();
        packet
            .questions
            .push(crate::dns::protocol::DnsQuestion::new(
                qname.to_string(),
                QueryType::A,
            ));
        packet.authorities.push(DnsRecord::Ns {
            domain: zone.to_string(),
            host: host.to_string(),
            ttl: 172800,
        });
        if let Some(addr) = glue {
            packet.resources.push(DnsRecord::A {
                domain: host.to_string(),
                addr,
                ttl: 172800,
            });
        }

        packet
    }

    fn answer(qname: &str, addr: Ipv4Addr) -> DnsPacket {
        let mut packet = DnsPacket::new();
        packet.answers.push(DnsRecord::A {
            domain: qname.to_string(),
            addr,
            ttl: 60,
        });

        packet
    }

    #[test]
    fn test_follows_referral_with_glue() {
        let queries = Arc::new(AtomicUsize::new(0));
        let counter = queries.clone();

        let context = create_test_context(Box::new(move |qname, _, (server, _), _| {
            counter.fetch_add(1, Ordering::SeqCst);

            if server == Ipv4Addr::new(10, 0, 0, 1) {
                // root refers to the zone server, address included
                Ok(referral(
                    qname,
                    "test",
                    "ns.test",
                    Some(Ipv4Addr::new(10, 0, 0, 2)),
                ))
            } else if server == Ipv4Addr::new(10, 0, 0, 2) {
                Ok(answer(qname, Ipv4Addr::new(192, 0, 2, 55)))
            } else {
                Ok(DnsPacket::new())
            }
        }));

        let resolver = context.create_resolver(context.clone());
        let response = resolver.resolve("example.test", QueryType::A).unwrap();

        assert!(response.has_answer("example.test", QueryType::A));
        assert_eq!(Some(Ipv4Addr::new(192, 0, 2, 55)), response.get_random_a());
        assert_eq!(2, queries.load(Ordering::SeqCst));
    }

    #[test]
    fn test_glueless_referral_resolves_nameserver() {
        let context = create_test_context(Box::new(|qname, _, (server, _), _| {
            if server == Ipv4Addr::new(10, 0, 0, 1) {
                if qname == "ns.test" {
                    return Ok(answer(qname, Ipv4Addr::new(10, 0, 0, 3)));
                }
                return Ok(referral(qname, "test", "ns.test", None));
            }
            if server == Ipv4Addr::new(10, 0, 0, 3) {
                return Ok(answer(qname, Ipv4Addr::new(192, 0, 2, 7)));
            }

            Ok(DnsPacket::new())
        }));

        let resolver = context.create_resolver(context.clone());
        let response = resolver.resolve("example.test", QueryType::A).unwrap();

        assert_eq!(Some(Ipv4Addr::new(192, 0, 2, 7)), response.get_random_a());
    }

    #[test]
    fn test_referral_cycle_terminates() {
        let context = create_test_context(Box::new(|qname, _, (server, _), _| {
            if server == Ipv4Addr::new(10, 0, 0, 1) {
                Ok(referral(
                    qname,
                    "test",
                    "ns-b.test",
                    Some(Ipv4Addr::new(10, 0, 0, 2)),
                ))
            } else {
                Ok(referral(
                    qname,
                    "test",
                    "ns-a.test",
                    Some(Ipv4Addr::new(10, 0, 0, 1)),
                ))
            }
        }));

        let resolver = context.create_resolver(context.clone());

        match resolver.resolve("example.test", QueryType::A) {
            Err(ResolveError::NoServersAvailable)
            | Err(ResolveError::ResolutionDepthExceeded) => {}
            other => panic!("expected termination error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_long_delegation_chain_exceeds_depth() {
        let context = create_test_context(Box::new(|qname, _, (server, _), _| {
            // every server refers one step further down, fresh address
            // each time
            let next = if server == Ipv4Addr::new(10, 0, 0, 1) {
                1
            } else {
                server.octets()[3] + 1
            };

            Ok(referral(
                qname,
                "test",
                &format!("ns{}.test", next),
                Some(Ipv4Addr::new(10, 0, 1, next)),
            ))
        }));

        let resolver = context.create_resolver(context.clone());

        match resolver.resolve("example.test", QueryType::A) {
            Err(ResolveError::ResolutionDepthExceeded) => {}
            other => panic!("expected depth error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_no_answer_and_no_referral_is_no_such_name() {
        let context = create_test_context(Box::new(|_, _, _, _| {
            let mut packet = DnsPacket::new();
            packet.header.rescode = ResultCode::NXDOMAIN;
            Ok(packet)
        }));

        let resolver = context.create_resolver(context.clone());

        match resolver.resolve("nonexistent.test", QueryType::A) {
            Err(ResolveError::NoSuchName) => {}
            other => panic!("expected NoSuchName, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_all_servers_timing_out() {
        let context = create_test_context(Box::new(|_, _, _, _| Err(ClientError::TimeOut)));

        let resolver = context.create_resolver(context.clone());

        match resolver.resolve("example.test", QueryType::A) {
            Err(ResolveError::ResolutionTimeout) => {}
            other => panic!("expected timeout, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_ns_query_is_answered() {
        let context = create_test_context(Box::new(|qname, qtype, _, _| {
            let mut packet = DnsPacket::new();
            if qtype == QueryType::Ns {
                packet.answers.push(DnsRecord::Ns {
                    domain: qname.to_string(),
                    host: "ns.example.test".to_string(),
                    ttl: 3600,
                });
            }
            Ok(packet)
        }));

        let resolver = context.create_resolver(context.clone());
        let response = resolver.resolve("example.test", QueryType::Ns).unwrap();

        assert!(response.has_answer("example.test", QueryType::Ns));
    }
}
