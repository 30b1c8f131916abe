//! implements the DNS protocol in a transport agnostic fashion

use std::net::Ipv4Addr;

use derive_more::{Display, Error, From};
use rand::random;

use crate::dns::buffer::{PacketBuffer, VectorPacketBuffer};

#[derive(Debug, Display, From, Error, PartialEq, Eq)]
pub enum ProtocolError {
    Buffer(crate::dns::buffer::BufferError),
    MalformedRecord,
}

type Result<T> = std::result::Result<T, ProtocolError>;

/// `QueryType` represents the requested Record Type of a query
///
/// Only A and NS lookups are serviced; everything else is retained as
/// `Unknown` with its numeric type so it can be reported back unchanged.
#[derive(PartialEq, Eq, Debug, Clone, Hash, Copy)]
pub enum QueryType {
    Unknown(u16),
    A,  // 1
    Ns, // 2
}

impl QueryType {
    pub fn to_num(&self) -> u16 {
        match *self {
            QueryType::Unknown(x) => x,
            QueryType::A => 1,
            QueryType::Ns => 2,
        }
    }

    pub fn from_num(num: u16) -> QueryType {
        match num {
            1 => QueryType::A,
            2 => QueryType::Ns,
            _ => QueryType::Unknown(num),
        }
    }
}

/// The result code for a DNS query, as described in RFC 1035
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum ResultCode {
    #[default]
    NOERROR = 0,
    FORMERR = 1,
    SERVFAIL = 2,
    NXDOMAIN = 3,
    NOTIMP = 4,
    REFUSED = 5,
}

impl ResultCode {
    pub fn from_num(num: u8) -> ResultCode {
        match num {
            1 => ResultCode::FORMERR,
            2 => ResultCode::SERVFAIL,
            3 => ResultCode::NXDOMAIN,
            4 => ResultCode::NOTIMP,
            5 => ResultCode::REFUSED,
            _ => ResultCode::NOERROR,
        }
    }
}

/// Representation of a DNS header
///
/// The sixteen flag bits are kept as individual typed fields; reading and
/// writing reproduces the exact bit layout of RFC 1035 section 4.1.1.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DnsHeader {
    pub id: u16, // 16 bits

    pub recursion_desired: bool,    // 1 bit
    pub truncated_message: bool,    // 1 bit
    pub authoritative_answer: bool, // 1 bit
    pub opcode: u8,                 // 4 bits
    pub response: bool,             // 1 bit

    pub rescode: ResultCode,       // 4 bits
    pub checking_disabled: bool,   // 1 bit
    pub authed_data: bool,         // 1 bit
    pub z: bool,                   // 1 bit
    pub recursion_available: bool, // 1 bit

    pub questions: u16,             // 16 bits
    pub answers: u16,               // 16 bits
    pub authoritative_entries: u16, // 16 bits
    pub resource_entries: u16,      // 16 bits
}

impl DnsHeader {
    pub fn new() -> DnsHeader {
        DnsHeader::default()
    }

    pub fn binary_len(&self) -> usize {
        12
    }

    pub fn read<T: PacketBuffer>(&mut self, buffer: &mut T) -> Result<()> {
        self.id = buffer.read_u16()?;

        let flags = buffer.read_u16()?;
        let a = (flags >> 8) as u8;
        let b = (flags & 0xFF) as u8;
        self.recursion_desired = (a & (1 << 0)) > 0;
        self.truncated_message = (a & (1 << 1)) > 0;
        self.authoritative_answer = (a & (1 << 2)) > 0;
        self.opcode = (a >> 3) & 0x0F;
        self.response = (a & (1 << 7)) > 0;

        self.rescode = ResultCode::from_num(b & 0x0F);
        self.checking_disabled = (b & (1 << 4)) > 0;
        self.authed_data = (b & (1 << 5)) > 0;
        self.z = (b & (1 << 6)) > 0;
        self.recursion_available = (b & (1 << 7)) > 0;

        self.questions = buffer.read_u16()?;
        self.answers = buffer.read_u16()?;
        self.authoritative_entries = buffer.read_u16()?;
        self.resource_entries = buffer.read_u16()?;

        Ok(())
    }

    pub fn write<T: PacketBuffer>(&self, buffer: &mut T) -> Result<()> {
        buffer.write_u16(self.id)?;

        buffer.write_u8(
            (self.recursion_desired as u8)
                | ((self.truncated_message as u8) << 1)
                | ((self.authoritative_answer as u8) << 2)
                | (self.opcode << 3)
                | ((self.response as u8) << 7),
        )?;

        buffer.write_u8(
            (self.rescode as u8)
                | ((self.checking_disabled as u8) << 4)
                | ((self.authed_data as u8) << 5)
                | ((self.z as u8) << 6)
                | ((self.recursion_available as u8) << 7),
        )?;

        buffer.write_u16(self.questions)?;
        buffer.write_u16(self.answers)?;
        buffer.write_u16(self.authoritative_entries)?;
        buffer.write_u16(self.resource_entries)?;

        Ok(())
    }
}

/// Representation of a DNS question
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsQuestion {
    pub name: String,
    pub qtype: QueryType,
    pub class: u16,
}

impl DnsQuestion {
    pub fn new(name: String, qtype: QueryType) -> DnsQuestion {
        DnsQuestion {
            name,
            qtype,
            class: 1,
        }
    }

    pub fn read<T: PacketBuffer>(&mut self, buffer: &mut T) -> Result<()> {
        buffer.read_qname(&mut self.name)?;
        self.qtype = QueryType::from_num(buffer.read_u16()?);
        self.class = buffer.read_u16()?;

        Ok(())
    }

    pub fn write<T: PacketBuffer>(&self, buffer: &mut T) -> Result<()> {
        buffer.write_qname(&self.name)?;
        buffer.write_u16(self.qtype.to_num())?;
        buffer.write_u16(self.class)?;

        Ok(())
    }
}

/// `DnsRecord` is the primary representation of a DNS record
///
/// Record data is a tagged union: an A record carries its four address
/// bytes, an NS record the target name, and anything else an opaque blob.
/// Opaque rdata is retained on read but never written back, since it may
/// embed compression pointers that are only meaningful in the message it
/// came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DnsRecord {
    Unknown {
        domain: String,
        qtype: u16,
        data: Vec<u8>,
        ttl: u32,
    }, // 0
    A {
        domain: String,
        addr: Ipv4Addr,
        ttl: u32,
    }, // 1
    Ns {
        domain: String,
        host: String,
        ttl: u32,
    }, // 2
}

impl DnsRecord {
    pub fn read<T: PacketBuffer>(buffer: &mut T) -> Result<DnsRecord> {
        let mut domain = String::new();
        buffer.read_qname(&mut domain)?;

        let qtype_num = buffer.read_u16()?;
        let qtype = QueryType::from_num(qtype_num);
        let _class = buffer.read_u16()?;
        let ttl = buffer.read_u32()?;
        let data_len = buffer.read_u16()?;

        if buffer.pos() + data_len as usize > buffer.len() {
            return Err(ProtocolError::MalformedRecord);
        }

        match qtype {
            QueryType::A => {
                if data_len != 4 {
                    return Err(ProtocolError::MalformedRecord);
                }

                let addr = Ipv4Addr::from(buffer.read_u32()?);

                Ok(DnsRecord::A { domain, addr, ttl })
            }
            QueryType::Ns => {
                let mut host = String::new();
                buffer.read_qname(&mut host)?;

                Ok(DnsRecord::Ns { domain, host, ttl })
            }
            QueryType::Unknown(_) => {
                let cur_pos = buffer.pos();
                let data = buffer.get_range(cur_pos, data_len as usize)?.to_vec();
                buffer.step(data_len as usize)?;

                Ok(DnsRecord::Unknown {
                    domain,
                    qtype: qtype_num,
                    data,
                    ttl,
                })
            }
        }
    }

    pub fn write<T: PacketBuffer>(&self, buffer: &mut T) -> Result<usize> {
        let start_pos = buffer.pos();

        match *self {
            DnsRecord::A {
                ref domain,
                ref addr,
                ttl,
            } => {
                buffer.write_qname(domain)?;
                buffer.write_u16(QueryType::A.to_num())?;
                buffer.write_u16(1)?;
                buffer.write_u32(ttl)?;
                buffer.write_u16(4)?;

                for octet in &addr.octets() {
                    buffer.write_u8(*octet)?;
                }
            }
            DnsRecord::Ns {
                ref domain,
                ref host,
                ttl,
            } => {
                buffer.write_qname(domain)?;
                buffer.write_u16(QueryType::Ns.to_num())?;
                buffer.write_u16(1)?;
                buffer.write_u32(ttl)?;

                // rdata length is not known until the name has been
                // written, so patch it in afterwards
                let pos = buffer.pos();
                buffer.write_u16(0)?;

                buffer.write_qname(host)?;

                let size = buffer.pos() - (pos + 2);
                buffer.set_u16(pos, size as u16)?;
            }
            DnsRecord::Unknown { .. } => {
                log::debug!("skipping record: {:?}", self);
            }
        }

        Ok(buffer.pos() - start_pos)
    }

    pub fn get_querytype(&self) -> QueryType {
        match *self {
            DnsRecord::A { .. } => QueryType::A,
            DnsRecord::Ns { .. } => QueryType::Ns,
            DnsRecord::Unknown { qtype, .. } => QueryType::Unknown(qtype),
        }
    }

    pub fn get_domain(&self) -> &str {
        match *self {
            DnsRecord::A { ref domain, .. }
            | DnsRecord::Ns { ref domain, .. }
            | DnsRecord::Unknown { ref domain, .. } => domain,
        }
    }
}

/// Representation of a complete DNS packet
///
/// A packet can be read and written in a single operation, and is used
/// both by the network facing components and internally by the resolver
/// and the request handlers.
#[derive(Clone, Debug, Default)]
pub struct DnsPacket {
    pub header: DnsHeader,
    pub questions: Vec<DnsQuestion>,
    pub answers: Vec<DnsRecord>,
    pub authorities: Vec<DnsRecord>,
    pub resources: Vec<DnsRecord>,
}

impl DnsPacket {
    pub fn new() -> DnsPacket {
        DnsPacket::default()
    }

    /// Build an outgoing query with a single question.
    pub fn query(id: u16, qname: &str, qtype: QueryType, recursion_desired: bool) -> DnsPacket {
        let mut packet = DnsPacket::new();
        packet.header.id = id;
        packet.header.recursion_desired = recursion_desired;
        packet
            .questions
            .push(DnsQuestion::new(qname.to_string(), qtype));

        packet
    }

    /// Build a complete reply answering `question` with a single address
    /// record.
    pub fn address_reply(id: u16, question: &DnsQuestion, addr: Ipv4Addr, ttl: u32) -> DnsPacket {
        let mut packet = DnsPacket::new();
        packet.header.id = id;
        packet.header.response = true;
        packet.header.recursion_desired = true;
        packet.header.recursion_available = true;
        packet.questions.push(question.clone());
        packet.answers.push(DnsRecord::A {
            domain: question.name.clone(),
            addr,
            ttl,
        });

        packet
    }

    pub fn from_buffer<T: PacketBuffer>(buffer: &mut T) -> Result<DnsPacket> {
        let mut result = DnsPacket::new();
        result.header.read(buffer)?;

        for _ in 0..result.header.questions {
            let mut question = DnsQuestion::new(String::new(), QueryType::Unknown(0));
            question.read(buffer)?;
            result.questions.push(question);
        }

        for _ in 0..result.header.answers {
            result.answers.push(DnsRecord::read(buffer)?);
        }
        for _ in 0..result.header.authoritative_entries {
            result.authorities.push(DnsRecord::read(buffer)?);
        }
        for _ in 0..result.header.resource_entries {
            result.resources.push(DnsRecord::read(buffer)?);
        }

        Ok(result)
    }

    /// True if any answer record matches the requested name and type.
    pub fn has_answer(&self, qname: &str, qtype: QueryType) -> bool {
        self.answers
            .iter()
            .any(|rec| rec.get_querytype() == qtype && rec.get_domain() == qname)
    }

    /// Pick one of the answer addresses at random.
    pub fn get_random_a(&self) -> Option<Ipv4Addr> {
        let addrs = self
            .answers
            .iter()
            .filter_map(|rec| match rec {
                DnsRecord::A { addr, .. } => Some(*addr),
                _ => None,
            })
            .collect::<Vec<_>>();

        if addrs.is_empty() {
            return None;
        }

        Some(addrs[random::<usize>() % addrs.len()])
    }

    /// Addresses of nameservers this referral delegates to, taken from
    /// additional records that match an in-bailiwick authority NS entry.
    pub fn get_glue_a(&self, qname: &str) -> Vec<Ipv4Addr> {
        let mut addrs = Vec::new();

        for auth in &self.authorities {
            if let DnsRecord::Ns { domain, host, .. } = auth {
                if !qname.ends_with(domain.as_str()) {
                    continue;
                }

                for rsrc in &self.resources {
                    if let DnsRecord::A {
                        domain: glue_domain,
                        addr,
                        ..
                    } = rsrc
                    {
                        if glue_domain == host {
                            addrs.push(*addr);
                        }
                    }
                }
            }
        }

        addrs
    }

    /// Nameserver names from a referral that arrived without glue and so
    /// need a lookup of their own before they can be queried.
    pub fn get_unresolved_ns(&self, qname: &str) -> Vec<String> {
        let mut hosts = Vec::new();

        for auth in &self.authorities {
            if let DnsRecord::Ns { domain, host, .. } = auth {
                if !qname.ends_with(domain.as_str()) {
                    continue;
                }

                let has_glue = self.resources.iter().any(
                    |rsrc| matches!(rsrc, DnsRecord::A { domain: d, .. } if d == host),
                );

                if !has_glue {
                    hosts.push(host.clone());
                }
            }
        }

        hosts
    }

    /// Write the packet, recomputing the section counts from the list
    /// lengths. Records that would push the message past `max_size` are
    /// dropped and the TC flag raised.
    pub fn write<T: PacketBuffer>(&mut self, buffer: &mut T, max_size: usize) -> Result<()> {
        let mut test_buffer = VectorPacketBuffer::new();

        for question in &self.questions {
            question.write(&mut test_buffer)?;
        }
        let mut size = self.header.binary_len() + test_buffer.pos();

        self.header.questions = self.questions.len() as u16;
        self.header.answers = 0;
        self.header.authoritative_entries = 0;
        self.header.resource_entries = 0;

        let mut record_count = 0;
        for (i, rec) in self
            .answers
            .iter()
            .chain(self.authorities.iter())
            .chain(self.resources.iter())
            .enumerate()
        {
            let rec_size = rec.write(&mut test_buffer)?;
            if size + rec_size > max_size {
                self.header.truncated_message = true;
                break;
            }

            size += rec_size;
            record_count = i + 1;

            if rec_size == 0 {
                // unwritable record types don't count towards the header
                continue;
            }

            if i < self.answers.len() {
                self.header.answers += 1;
            } else if i < self.answers.len() + self.authorities.len() {
                self.header.authoritative_entries += 1;
            } else {
                self.header.resource_entries += 1;
            }
        }

        self.header.write(buffer)?;

        for question in &self.questions {
            question.write(buffer)?;
        }

        for rec in self
            .answers
            .iter()
            .chain(self.authorities.iter())
            .chain(self.resources.iter())
            .take(record_count)
        {
            rec.write(buffer)?;
        }

        Ok(())
    }
}
