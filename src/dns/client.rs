//! client for sending DNS queries to other servers

use std::io::ErrorKind;
use std::net::{Ipv4Addr, UdpSocket};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use derive_more::{Display, Error, From};

use crate::dns::buffer::BytePacketBuffer;
use crate::dns::protocol::{DnsPacket, QueryType};

#[derive(Debug, Display, From, Error)]
pub enum ClientError {
    Protocol(crate::dns::protocol::ProtocolError),
    Io(std::io::Error),
    TimeOut,
}

pub type Result<T> = std::result::Result<T, ClientError>;

/// Interface for sending a single query to a single server. This is the
/// seam the resolver is tested through; production code uses
/// `DnsNetworkClient`, tests substitute a scripted implementation.
pub trait DnsClient {
    fn send_query(
        &self,
        qname: &str,
        qtype: QueryType,
        server: (Ipv4Addr, u16),
        recursion_desired: bool,
    ) -> Result<DnsPacket>;
}

/// The UDP client
///
/// Each attempt binds its own ephemeral socket, so the descriptor is
/// released by drop on every exit path: answer, failure or timeout. The
/// receive loop discards datagrams whose id does not match the query and
/// keeps waiting until the attempt deadline runs out.
pub struct DnsNetworkClient {
    /// Counter for assigning packet ids
    seq: AtomicUsize,

    /// Read deadline for a single attempt
    attempt_timeout: Duration,

    /// Number of attempts per server before giving up
    attempts: u32,
}

impl DnsNetworkClient {
    pub fn new() -> DnsNetworkClient {
        DnsNetworkClient::with_timeout(Duration::from_secs(2), 2)
    }

    pub fn with_timeout(attempt_timeout: Duration, attempts: u32) -> DnsNetworkClient {
        DnsNetworkClient {
            seq: AtomicUsize::new(0),
            attempt_timeout,
            attempts,
        }
    }
}

impl Default for DnsNetworkClient {
    fn default() -> Self {
        DnsNetworkClient::new()
    }
}

impl DnsClient for DnsNetworkClient {
    fn send_query(
        &self,
        qname: &str,
        qtype: QueryType,
        server: (Ipv4Addr, u16),
        recursion_desired: bool,
    ) -> Result<DnsPacket> {
        let id = self.seq.fetch_add(1, Ordering::SeqCst) as u16;
        let mut packet = DnsPacket::query(id, qname, qtype, recursion_desired);

        let mut req_buffer = BytePacketBuffer::new();
        packet.write(&mut req_buffer, 512)?;

        for _ in 0..self.attempts {
            // The socket lives for exactly one attempt.
            let socket = UdpSocket::bind(("0.0.0.0", 0))?;
            socket.set_read_timeout(Some(self.attempt_timeout))?;
            socket.send_to(&req_buffer.buf[0..req_buffer.pos], server)?;

            loop {
                let mut res_buffer = BytePacketBuffer::new();
                match socket.recv_from(&mut res_buffer.buf) {
                    Ok((len, _)) => {
                        res_buffer.len = len;

                        match DnsPacket::from_buffer(&mut res_buffer) {
                            Ok(response) => {
                                if response.header.id == id {
                                    return Ok(response);
                                }
                                log::debug!(
                                    "discarding response with unexpected id {}",
                                    response.header.id
                                );
                            }
                            Err(err) => {
                                log::debug!("discarding unparsable response: {}", err);
                            }
                        }
                    }
                    Err(ref err)
                        if err.kind() == ErrorKind::WouldBlock
                            || err.kind() == ErrorKind::TimedOut =>
                    {
                        break;
                    }
                    Err(err) => return Err(err.into()),
                }
            }
        }

        Err(ClientError::TimeOut)
    }
}

#[cfg(test)]
pub mod tests {

    use std::thread;

    use super::*;
    use crate::dns::buffer::VectorPacketBuffer;
    use crate::dns::protocol::DnsRecord;

    pub type StubCallback = dyn Fn(&str, QueryType, (Ipv4Addr, u16), bool) -> Result<DnsPacket>;

    /// Scripted stand-in for the network client.
    pub struct DnsStubClient {
        callback: Box<StubCallback>,
    }

    impl DnsStubClient {
        pub fn new(callback: Box<StubCallback>) -> DnsStubClient {
            DnsStubClient { callback }
        }
    }

    unsafe impl Send for DnsStubClient {}
    unsafe impl Sync for DnsStubClient {}

    impl DnsClient for DnsStubClient {
        fn send_query(
            &self,
            qname: &str,
            qtype: QueryType,
            server: (Ipv4Addr, u16),
            recursion_desired: bool,
        ) -> Result<DnsPacket> {
            (self.callback)(qname, qtype, server, recursion_desired)
        }
    }

    /// Run a scripted nameserver on a loopback socket. The handler maps
    /// each decoded request to the datagrams to send back.
    fn spawn_upstream<F>(handler: F) -> (Ipv4Addr, u16)
    where
        F: Fn(DnsPacket) -> Vec<DnsPacket> + Send + 'static,
    {
        let socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let port = socket.local_addr().unwrap().port();

        thread::spawn(move || loop {
            let mut req_buffer = BytePacketBuffer::new();
            let (len, src) = match socket.recv_from(&mut req_buffer.buf) {
                Ok(x) => x,
                Err(_) => return,
            };
            req_buffer.len = len;

            let request = match DnsPacket::from_buffer(&mut req_buffer) {
                Ok(x) => x,
                Err(_) => continue,
            };

            for mut response in handler(request) {
                let mut res_buffer = VectorPacketBuffer::new();
                if response.write(&mut res_buffer, 512).is_ok() {
                    let _ = socket.send_to(&res_buffer.buffer, src);
                }
            }
        });

        (Ipv4Addr::LOCALHOST, port)
    }

    #[test]
    fn test_network_client_gets_answer() {
        let server = spawn_upstream(|request| {
            let question = request.questions[0].clone();
            vec![DnsPacket::address_reply(
                request.header.id,
                &question,
                Ipv4Addr::new(10, 9, 8, 7),
                60,
            )]
        });

        let client = DnsNetworkClient::with_timeout(Duration::from_millis(500), 2);
        let response = client
            .send_query("example.test", QueryType::A, server, false)
            .unwrap();

        assert_eq!("example.test", response.questions[0].name);
        match response.answers[0] {
            DnsRecord::A { ref domain, addr, .. } => {
                assert_eq!("example.test", domain);
                assert_eq!(Ipv4Addr::new(10, 9, 8, 7), addr);
            }
            _ => panic!("expected an A answer"),
        }
    }

    #[test]
    fn test_network_client_skips_mismatched_id() {
        let server = spawn_upstream(|request| {
            let question = request.questions[0].clone();
            let stray = DnsPacket::address_reply(
                request.header.id.wrapping_add(1),
                &question,
                Ipv4Addr::new(1, 1, 1, 1),
                60,
            );
            let wanted = DnsPacket::address_reply(
                request.header.id,
                &question,
                Ipv4Addr::new(2, 2, 2, 2),
                60,
            );
            vec![stray, wanted]
        });

        let client = DnsNetworkClient::with_timeout(Duration::from_millis(500), 2);
        let response = client
            .send_query("example.test", QueryType::A, server, false)
            .unwrap();

        assert_eq!(Some(Ipv4Addr::new(2, 2, 2, 2)), response.get_random_a());
    }

    #[test]
    fn test_network_client_times_out() {
        // an upstream that never answers
        let server = spawn_upstream(|_| Vec::new());

        let client = DnsNetworkClient::with_timeout(Duration::from_millis(50), 2);
        let result = client.send_query("example.test", QueryType::A, server, false);

        match result {
            Err(ClientError::TimeOut) => {}
            other => panic!("expected a timeout, got {:?}", other.map(|_| ())),
        }
    }
}
