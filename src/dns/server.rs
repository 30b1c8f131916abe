//! UDP server loop and request handlers

use std::collections::VecDeque;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::Builder;

use derive_more::{Display, Error, From};

use crate::dns::buffer::VectorPacketBuffer;
use crate::dns::context::ServerContext;
use crate::dns::protocol::{DnsPacket, DnsQuestion, QueryType, ResultCode};
use crate::dns::synth;

#[derive(Debug, Display, From, Error)]
pub enum ServerError {
    Io(std::io::Error),
}

type Result<T> = std::result::Result<T, ServerError>;

/// Replies have to fit a plain UDP message.
const MAX_REPLY_SIZE: usize = 512;

/// TTL on synthesized address answers.
const COMPUTED_ANSWER_TTL: u32 = 60;

/// Overwrite the id field of an already encoded reply.
fn patch_id(reply: &mut [u8], id: u16) {
    if reply.len() >= 2 {
        reply[0] = (id >> 8) as u8;
        reply[1] = (id & 0xFF) as u8;
    }
}

fn encode_reply(packet: &mut DnsPacket) -> Option<Vec<u8>> {
    let mut res_buffer = VectorPacketBuffer::new();
    match packet.write(&mut res_buffer, MAX_REPLY_SIZE) {
        Ok(_) => Some(res_buffer.buffer),
        Err(err) => {
            log::warn!("failed to encode reply: {}", err);
            None
        }
    }
}

/// Turn an upstream response into the reply for the client that asked:
/// same records, the client's id, and exactly the question it posed.
fn make_client_reply(mut response: DnsPacket, id: u16, question: &DnsQuestion) -> DnsPacket {
    response.header.id = id;
    response.header.response = true;
    response.header.recursion_desired = true;
    response.header.recursion_available = true;
    response.questions = vec![question.clone()];

    response
}

fn make_error_reply(id: u16, question: &DnsQuestion, rescode: ResultCode) -> DnsPacket {
    let mut packet = DnsPacket::new();
    packet.header.id = id;
    packet.header.response = true;
    packet.header.recursion_available = true;
    packet.header.rescode = rescode;
    packet.questions.push(question.clone());

    packet
}

/// Answer one decoded request, or return `None` when it should be dropped
/// without a reply.
///
/// Engine failures degrade to a SERVFAIL reply rather than silence;
/// failed lookups are never cached.
pub fn answer_query(context: &Arc<ServerContext>, request: &DnsPacket) -> Option<Vec<u8>> {
    let question = match request.questions.first() {
        Some(question) => question.clone(),
        None => return None,
    };
    let id = request.header.id;

    if let QueryType::Unknown(_) = question.qtype {
        let mut packet = make_error_reply(id, &question, ResultCode::NOTIMP);
        return encode_reply(&mut packet);
    }

    // the cache covers resolved and computed answers alike
    if let Some(mut reply) = context.cache.lookup(&question.name, question.qtype) {
        patch_id(&mut reply, id);
        return Some(reply);
    }

    if question.qtype == QueryType::A {
        if let Some(addr) = synth::evaluate(&question.name) {
            let mut packet = DnsPacket::address_reply(id, &question, addr, COMPUTED_ANSWER_TTL);
            let reply = encode_reply(&mut packet)?;
            let _ = context
                .cache
                .store(&question.name, question.qtype, reply.clone());
            return Some(reply);
        }
    }

    let resolver = context.create_resolver(context.clone());
    match resolver.resolve(&question.name, question.qtype) {
        Ok(response) => {
            let mut packet = make_client_reply(response, id, &question);
            let reply = encode_reply(&mut packet)?;
            let _ = context
                .cache
                .store(&question.name, question.qtype, reply.clone());
            Some(reply)
        }
        Err(err) => {
            let _ = context
                .statistics
                .failed_request_count
                .fetch_add(1, Ordering::Release);
            log::info!(
                "failed to resolve {:?} {}: {}",
                question.qtype,
                question.name,
                err
            );

            let mut packet = make_error_reply(id, &question, ResultCode::SERVFAIL);
            encode_reply(&mut packet)
        }
    }
}

/// The UDP server
///
/// Datagrams are read on a single thread and handed to a fixed pool of
/// request handlers. Decoding happens inside the handler, so a malformed
/// datagram costs nothing but that handler's turn and is dropped without
/// a reply.
pub struct DnsUdpServer {
    context: Arc<ServerContext>,
    request_queue: Arc<Mutex<VecDeque<(SocketAddr, Vec<u8>)>>>,
    request_cond: Arc<Condvar>,
    thread_count: usize,
}

impl DnsUdpServer {
    pub fn new(context: Arc<ServerContext>, thread_count: usize) -> DnsUdpServer {
        DnsUdpServer {
            context,
            request_queue: Arc::new(Mutex::new(VecDeque::new())),
            request_cond: Arc::new(Condvar::new()),
            thread_count,
        }
    }

    /// Decode and answer a single datagram.
    fn process_request(
        socket: &UdpSocket,
        context: &Arc<ServerContext>,
        src: SocketAddr,
        data: Vec<u8>,
    ) {
        let mut req_buffer = VectorPacketBuffer::from_slice(&data);
        let request = match DnsPacket::from_buffer(&mut req_buffer) {
            Ok(x) => x,
            Err(err) => {
                log::debug!("dropping malformed query from {}: {}", src, err);
                return;
            }
        };

        if let Some(reply) = answer_query(context, &request) {
            if let Err(err) = socket.send_to(&reply, src) {
                log::info!("failed to send response to {}: {}", src, err);
            }
        }
    }

    /// Spawn a worker thread feeding off the shared request queue.
    fn spawn_request_handler(&self, thread_id: usize, socket: UdpSocket) -> std::io::Result<()> {
        let context = self.context.clone();
        let request_cond = self.request_cond.clone();
        let request_queue = self.request_queue.clone();

        let name = format!("DnsUdpServer-request-{}", thread_id);
        Builder::new().name(name).spawn(move || {
            loop {
                // wait on the condition until a request is available
                let (src, data) = match request_queue
                    .lock()
                    .ok()
                    .and_then(|x| request_cond.wait(x).ok())
                    .and_then(|mut x| x.pop_front())
                {
                    Some(x) => x,
                    None => continue,
                };

                Self::process_request(&socket, &context, src, data);
            }
        })?;

        Ok(())
    }

    /// Spawn the thread that reads datagrams and fills the queue.
    fn spawn_incoming_handler(self, socket: UdpSocket) -> std::io::Result<()> {
        Builder::new()
            .name("DnsUdpServer-incoming".into())
            .spawn(move || {
                let mut buf = [0u8; 512];

                loop {
                    let (len, src) = match socket.recv_from(&mut buf) {
                        Ok(x) => x,
                        Err(err) => {
                            log::info!("failed to read from UDP socket: {}", err);
                            continue;
                        }
                    };

                    let _ = self
                        .context
                        .statistics
                        .udp_query_count
                        .fetch_add(1, Ordering::Release);

                    self.enqueue_request(src, buf[..len].to_vec());
                }
            })?;

        Ok(())
    }

    fn enqueue_request(&self, src: SocketAddr, data: Vec<u8>) {
        match self.request_queue.lock() {
            Ok(mut queue) => {
                queue.push_back((src, data));
                self.request_cond.notify_one();
            }
            Err(err) => {
                log::info!("failed to enqueue UDP request: {}", err);
            }
        }
    }

    /// Launch the server
    ///
    /// Spawns the worker pool and the incoming thread, then returns; the
    /// method takes ownership so it cannot be called twice.
    pub fn run_server(self) -> Result<()> {
        let socket = UdpSocket::bind((self.context.listen_address.as_str(), self.context.dns_port))?;

        for thread_id in 0..self.thread_count {
            let socket_clone = match socket.try_clone() {
                Ok(x) => x,
                Err(err) => {
                    log::info!("failed to clone socket for request handler: {}", err);
                    continue;
                }
            };

            self.spawn_request_handler(thread_id, socket_clone)?;
        }

        self.spawn_incoming_handler(socket)?;

        Ok(())
    }
}
