//! DNS wire format codec (RFC 1035).
//!
//! Parses whole messages including name compression pointers; builds flat
//! messages without emitting pointers, so anything parsed from a compressed
//! message is re-serialized in expanded form.

use std::net::{Ipv4Addr, Ipv6Addr};
use thiserror::Error;

use crate::records::{DnsRecord, RData, RecordClass, RecordType};

pub const HEADER_LEN: usize = 12;
/// RFC 1035 UDP payload limit (no EDNS0).
pub const MAX_UDP_MESSAGE: usize = 512;

// Header flag bits (MSB = bit 15)
pub const FLAG_QR: u16 = 0x8000;
pub const FLAG_AA: u16 = 0x0400;
pub const FLAG_TC: u16 = 0x0200;
pub const FLAG_RD: u16 = 0x0100;
pub const FLAG_RA: u16 = 0x0080;
const FLAG_Z: u16 = 0x0040;

// RCODE values
pub const RCODE_NOERROR: u8 = 0;
pub const RCODE_FORMERR: u8 = 1;
pub const RCODE_SERVFAIL: u8 = 2;
pub const RCODE_NXDOMAIN: u8 = 3;
pub const RCODE_NOTIMPL: u8 = 4;
pub const RCODE_REFUSED: u8 = 5;

pub fn rcode_name(rcode: u8) -> &'static str {
    match rcode {
        RCODE_NOERROR => "NOERROR",
        RCODE_FORMERR => "FORMERR",
        RCODE_SERVFAIL => "SERVFAIL",
        RCODE_NXDOMAIN => "NXDOMAIN",
        RCODE_NOTIMPL => "NOTIMPL",
        RCODE_REFUSED => "REFUSED",
        _ => "UNKNOWN",
    }
}

#[derive(Error, Debug)]
pub enum DnsParseError {
    #[error("packet too short: {0} bytes")]
    TooShort(usize),
    #[error("packet truncated at offset {0}")]
    Truncated(usize),
    #[error("bad compression pointer at offset {0}")]
    BadPointer(usize),
    #[error("name compression loop detected")]
    CompressionLoop,
    #[error("reserved label prefix at offset {0}")]
    InvalidLabel(usize),
    #[error("label at offset {0} extends past end of packet")]
    LabelOverflow(usize),
    #[error("label too long: {0} bytes (max 63)")]
    LabelTooLong(usize),
    #[error("name too long (exceeds 255 bytes)")]
    NameTooLong,
    #[error("invalid UTF-8 in name")]
    InvalidUtf8,
    #[error("bad rdata length {len} for {rtype} record")]
    BadRdataLength { rtype: RecordType, len: usize },
    #[error("unsupported record type {0}")]
    UnsupportedType(RecordType),
}

/// Parsed DNS header (12 bytes)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DnsHeader {
    pub id: u16,
    pub flags: u16,
    pub qd_count: u16,
    pub an_count: u16,
    pub ns_count: u16,
    pub ar_count: u16,
}

impl DnsHeader {
    pub fn is_response(&self) -> bool {
        self.flags & FLAG_QR != 0
    }
    pub fn opcode(&self) -> u8 {
        ((self.flags >> 11) & 0xF) as u8
    }
    pub fn is_authoritative(&self) -> bool {
        self.flags & FLAG_AA != 0
    }
    pub fn is_truncated(&self) -> bool {
        self.flags & FLAG_TC != 0
    }
    pub fn recursion_desired(&self) -> bool {
        self.flags & FLAG_RD != 0
    }
    pub fn recursion_available(&self) -> bool {
        self.flags & FLAG_RA != 0
    }
    pub fn rcode(&self) -> u8 {
        (self.flags & 0xF) as u8
    }
}

/// A parsed DNS question
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsQuestion {
    pub name: String,
    pub qtype: RecordType,
    pub qclass: RecordClass,
}

/// A full DNS message with separated sections
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DnsMessage {
    pub header: DnsHeader,
    pub questions: Vec<DnsQuestion>,
    pub answers: Vec<DnsRecord>,
    pub authorities: Vec<DnsRecord>,
    pub additionals: Vec<DnsRecord>,
}

impl DnsMessage {
    /// A standard query: fresh id, RD set, one IN question.
    pub fn query(id: u16, name: &str, qtype: RecordType) -> Self {
        Self {
            header: DnsHeader {
                id,
                flags: FLAG_RD,
                ..Default::default()
            },
            questions: vec![DnsQuestion {
                name: name.to_string(),
                qtype,
                qclass: RecordClass::IN,
            }],
            ..Default::default()
        }
    }
}

/// Parse a DNS name from the wire format with pointer compression support.
/// Returns the name and the offset immediately after it (after the two-byte
/// pointer when the name was compressed).
pub fn parse_name(buf: &[u8], mut offset: usize) -> Result<(String, usize), DnsParseError> {
    let mut name = String::with_capacity(64);
    let mut resume = 0;
    let mut jumped = false;
    let mut jumps = 0;
    const MAX_JUMPS: usize = 128;

    loop {
        if offset >= buf.len() {
            return Err(DnsParseError::Truncated(offset));
        }

        let len = buf[offset] as usize;

        // Compression pointer: top two bits set, 14-bit absolute offset.
        if len & 0xC0 == 0xC0 {
            if offset + 1 >= buf.len() {
                return Err(DnsParseError::BadPointer(offset));
            }
            let target = ((len & 0x3F) << 8) | buf[offset + 1] as usize;
            // Pointers may only refer backwards; a forward or self reference
            // can never terminate.
            if target >= offset {
                return Err(DnsParseError::BadPointer(offset));
            }
            if !jumped {
                resume = offset + 2;
                jumped = true;
            }
            jumps += 1;
            if jumps > MAX_JUMPS {
                return Err(DnsParseError::CompressionLoop);
            }
            offset = target;
            continue;
        }

        // 0b01/0b10 prefixes are reserved
        if len & 0xC0 != 0 {
            return Err(DnsParseError::InvalidLabel(offset));
        }

        // End of name
        if len == 0 {
            if !jumped {
                resume = offset + 1;
            }
            break;
        }

        offset += 1;
        if offset + len > buf.len() {
            return Err(DnsParseError::LabelOverflow(offset));
        }

        if !name.is_empty() {
            name.push('.');
        }
        let label = std::str::from_utf8(&buf[offset..offset + len])
            .map_err(|_| DnsParseError::InvalidUtf8)?;
        name.push_str(label);
        offset += len;

        // RFC 1035 §2.3.4: 255 wire bytes = 253 presentation characters
        if name.len() > 253 {
            return Err(DnsParseError::NameTooLong);
        }
    }

    Ok((name, resume))
}

/// Encode a DNS name as length-prefixed labels with a zero terminator.
/// A trailing dot on the input is ignored. No compression pointers are
/// emitted.
pub fn encode_name(name: &str, buf: &mut Vec<u8>) -> Result<(), DnsParseError> {
    let name = name.strip_suffix('.').unwrap_or(name);
    if name.is_empty() {
        buf.push(0);
        return Ok(());
    }

    let start = buf.len();
    for label in name.split('.') {
        if label.is_empty() {
            return Err(DnsParseError::InvalidLabel(buf.len()));
        }
        // A length of 64 would collide with the pointer prefix bits
        if label.len() > 63 {
            return Err(DnsParseError::LabelTooLong(label.len()));
        }
        buf.push(label.len() as u8);
        buf.extend_from_slice(label.as_bytes());
    }
    buf.push(0);

    if buf.len() - start > 255 {
        return Err(DnsParseError::NameTooLong);
    }
    Ok(())
}

fn parse_header(buf: &[u8]) -> Result<DnsHeader, DnsParseError> {
    if buf.len() < HEADER_LEN {
        return Err(DnsParseError::TooShort(buf.len()));
    }
    Ok(DnsHeader {
        id: u16::from_be_bytes([buf[0], buf[1]]),
        flags: u16::from_be_bytes([buf[2], buf[3]]),
        qd_count: u16::from_be_bytes([buf[4], buf[5]]),
        an_count: u16::from_be_bytes([buf[6], buf[7]]),
        ns_count: u16::from_be_bytes([buf[8], buf[9]]),
        ar_count: u16::from_be_bytes([buf[10], buf[11]]),
    })
}

/// Parse a complete DNS message. Section counts from the header drive the
/// parse; a buffer that ends before all counted records are read is an error.
pub fn parse_message(buf: &[u8]) -> Result<DnsMessage, DnsParseError> {
    let header = parse_header(buf)?;
    let mut offset = HEADER_LEN;

    let mut questions = Vec::new();
    for _ in 0..header.qd_count {
        let (name, next) = parse_name(buf, offset)?;
        offset = next;

        if offset + 4 > buf.len() {
            return Err(DnsParseError::Truncated(offset));
        }
        let qtype = RecordType::from_u16(u16::from_be_bytes([buf[offset], buf[offset + 1]]));
        let qclass = RecordClass::from_u16(u16::from_be_bytes([buf[offset + 2], buf[offset + 3]]));
        offset += 4;

        questions.push(DnsQuestion {
            name: name.to_lowercase(),
            qtype,
            qclass,
        });
    }

    let mut answers = Vec::new();
    let mut authorities = Vec::new();
    let mut additionals = Vec::new();

    for (count, section) in [
        (header.an_count, &mut answers),
        (header.ns_count, &mut authorities),
        (header.ar_count, &mut additionals),
    ] {
        for _ in 0..count {
            let (record, next) = parse_record(buf, offset)?;
            offset = next;
            section.push(record);
        }
    }

    Ok(DnsMessage {
        header,
        questions,
        answers,
        authorities,
        additionals,
    })
}

fn parse_record(buf: &[u8], offset: usize) -> Result<(DnsRecord, usize), DnsParseError> {
    let (name, mut offset) = parse_name(buf, offset)?;

    if offset + 10 > buf.len() {
        return Err(DnsParseError::Truncated(offset));
    }
    let rtype = RecordType::from_u16(u16::from_be_bytes([buf[offset], buf[offset + 1]]));
    let class = RecordClass::from_u16(u16::from_be_bytes([buf[offset + 2], buf[offset + 3]]));
    let ttl = u32::from_be_bytes([
        buf[offset + 4],
        buf[offset + 5],
        buf[offset + 6],
        buf[offset + 7],
    ]);
    let rdlength = u16::from_be_bytes([buf[offset + 8], buf[offset + 9]]) as usize;
    offset += 10;

    if offset + rdlength > buf.len() {
        return Err(DnsParseError::Truncated(offset));
    }

    let rdata = parse_rdata(buf, offset, rdlength, rtype)?;

    Ok((
        DnsRecord {
            name: name.to_lowercase(),
            rtype,
            class,
            ttl,
            rdata,
        },
        offset + rdlength,
    ))
}

/// Parse rdata with access to the whole message, since names inside
/// NS/CNAME/PTR/MX/SOA/SRV rdata may use compression pointers that refer
/// to earlier offsets anywhere in the packet.
fn parse_rdata(
    buf: &[u8],
    offset: usize,
    rdlength: usize,
    rtype: RecordType,
) -> Result<RData, DnsParseError> {
    match rtype {
        RecordType::A => {
            if rdlength != 4 {
                return Err(DnsParseError::BadRdataLength {
                    rtype,
                    len: rdlength,
                });
            }
            Ok(RData::A(Ipv4Addr::new(
                buf[offset],
                buf[offset + 1],
                buf[offset + 2],
                buf[offset + 3],
            )))
        }
        RecordType::AAAA => {
            if rdlength != 16 {
                return Err(DnsParseError::BadRdataLength {
                    rtype,
                    len: rdlength,
                });
            }
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&buf[offset..offset + 16]);
            Ok(RData::AAAA(Ipv6Addr::from(octets)))
        }
        RecordType::NS | RecordType::CNAME | RecordType::PTR => {
            let (name, _) = parse_name(buf, offset)?;
            let name = name.to_lowercase();
            Ok(match rtype {
                RecordType::NS => RData::NS(name),
                RecordType::CNAME => RData::CNAME(name),
                _ => RData::PTR(name),
            })
        }
        RecordType::MX => {
            if rdlength < 3 {
                return Err(DnsParseError::BadRdataLength {
                    rtype,
                    len: rdlength,
                });
            }
            let preference = u16::from_be_bytes([buf[offset], buf[offset + 1]]);
            let (exchange, _) = parse_name(buf, offset + 2)?;
            Ok(RData::MX {
                preference,
                exchange: exchange.to_lowercase(),
            })
        }
        RecordType::TXT => {
            // One or more <length><string> pairs
            let mut txt = String::new();
            let mut pos = offset;
            let end = offset + rdlength;
            while pos < end {
                let len = buf[pos] as usize;
                pos += 1;
                if pos + len > end {
                    break;
                }
                if let Ok(s) = std::str::from_utf8(&buf[pos..pos + len]) {
                    txt.push_str(s);
                }
                pos += len;
            }
            Ok(RData::TXT(txt))
        }
        RecordType::SOA => {
            let (mname, next) = parse_name(buf, offset)?;
            let (rname, next) = parse_name(buf, next)?;
            if next + 20 > buf.len() || next + 20 > offset + rdlength {
                return Err(DnsParseError::BadRdataLength {
                    rtype,
                    len: rdlength,
                });
            }
            let o = next;
            Ok(RData::SOA {
                mname: mname.to_lowercase(),
                rname: rname.to_lowercase(),
                serial: u32::from_be_bytes([buf[o], buf[o + 1], buf[o + 2], buf[o + 3]]),
                refresh: u32::from_be_bytes([buf[o + 4], buf[o + 5], buf[o + 6], buf[o + 7]]),
                retry: u32::from_be_bytes([buf[o + 8], buf[o + 9], buf[o + 10], buf[o + 11]]),
                expire: u32::from_be_bytes([buf[o + 12], buf[o + 13], buf[o + 14], buf[o + 15]]),
                minimum: u32::from_be_bytes([buf[o + 16], buf[o + 17], buf[o + 18], buf[o + 19]]),
            })
        }
        RecordType::SRV => {
            if rdlength < 7 {
                return Err(DnsParseError::BadRdataLength {
                    rtype,
                    len: rdlength,
                });
            }
            let priority = u16::from_be_bytes([buf[offset], buf[offset + 1]]);
            let weight = u16::from_be_bytes([buf[offset + 2], buf[offset + 3]]);
            let port = u16::from_be_bytes([buf[offset + 4], buf[offset + 5]]);
            let (target, _) = parse_name(buf, offset + 6)?;
            Ok(RData::SRV {
                priority,
                weight,
                port,
                target: target.to_lowercase(),
            })
        }
        RecordType::Unknown(_) => Ok(RData::Raw(buf[offset..offset + rdlength].to_vec())),
    }
}

/// Serialize a message. Section counts are derived from the section vectors,
/// overriding whatever the header claims, and the reserved Z bit is cleared.
pub fn build_message(msg: &DnsMessage) -> Result<Vec<u8>, DnsParseError> {
    let mut buf = Vec::with_capacity(MAX_UDP_MESSAGE);

    buf.extend_from_slice(&msg.header.id.to_be_bytes());
    buf.extend_from_slice(&(msg.header.flags & !FLAG_Z).to_be_bytes());
    buf.extend_from_slice(&(msg.questions.len() as u16).to_be_bytes());
    buf.extend_from_slice(&(msg.answers.len() as u16).to_be_bytes());
    buf.extend_from_slice(&(msg.authorities.len() as u16).to_be_bytes());
    buf.extend_from_slice(&(msg.additionals.len() as u16).to_be_bytes());

    for q in &msg.questions {
        encode_name(&q.name, &mut buf)?;
        buf.extend_from_slice(&q.qtype.to_u16().to_be_bytes());
        buf.extend_from_slice(&q.qclass.to_u16().to_be_bytes());
    }

    for record in msg
        .answers
        .iter()
        .chain(&msg.authorities)
        .chain(&msg.additionals)
    {
        encode_record(record, &mut buf)?;
    }

    Ok(buf)
}

fn encode_record(record: &DnsRecord, buf: &mut Vec<u8>) -> Result<(), DnsParseError> {
    encode_name(&record.name, buf)?;
    buf.extend_from_slice(&record.rtype.to_u16().to_be_bytes());
    buf.extend_from_slice(&record.class.to_u16().to_be_bytes());
    buf.extend_from_slice(&record.ttl.to_be_bytes());
    encode_rdata(&record.rdata, buf)
}

fn encode_rdata(rdata: &RData, buf: &mut Vec<u8>) -> Result<(), DnsParseError> {
    match rdata {
        RData::A(ip) => {
            buf.extend_from_slice(&4u16.to_be_bytes());
            buf.extend_from_slice(&ip.octets());
        }
        RData::AAAA(ip) => {
            buf.extend_from_slice(&16u16.to_be_bytes());
            buf.extend_from_slice(&ip.octets());
        }
        RData::NS(name) | RData::CNAME(name) | RData::PTR(name) => {
            let mut rdata_buf = Vec::new();
            encode_name(name, &mut rdata_buf)?;
            buf.extend_from_slice(&(rdata_buf.len() as u16).to_be_bytes());
            buf.extend_from_slice(&rdata_buf);
        }
        RData::MX {
            preference,
            exchange,
        } => {
            let mut rdata_buf = Vec::new();
            rdata_buf.extend_from_slice(&preference.to_be_bytes());
            encode_name(exchange, &mut rdata_buf)?;
            buf.extend_from_slice(&(rdata_buf.len() as u16).to_be_bytes());
            buf.extend_from_slice(&rdata_buf);
        }
        RData::TXT(text) => {
            let text_bytes = text.as_bytes();
            // TXT strings are limited to 255 bytes each
            let mut rdata_buf = Vec::new();
            for chunk in text_bytes.chunks(255) {
                rdata_buf.push(chunk.len() as u8);
                rdata_buf.extend_from_slice(chunk);
            }
            if text_bytes.is_empty() {
                rdata_buf.push(0);
            }
            buf.extend_from_slice(&(rdata_buf.len() as u16).to_be_bytes());
            buf.extend_from_slice(&rdata_buf);
        }
        RData::SOA {
            mname,
            rname,
            serial,
            refresh,
            retry,
            expire,
            minimum,
        } => {
            let mut rdata_buf = Vec::new();
            encode_name(mname, &mut rdata_buf)?;
            encode_name(rname, &mut rdata_buf)?;
            rdata_buf.extend_from_slice(&serial.to_be_bytes());
            rdata_buf.extend_from_slice(&refresh.to_be_bytes());
            rdata_buf.extend_from_slice(&retry.to_be_bytes());
            rdata_buf.extend_from_slice(&expire.to_be_bytes());
            rdata_buf.extend_from_slice(&minimum.to_be_bytes());
            buf.extend_from_slice(&(rdata_buf.len() as u16).to_be_bytes());
            buf.extend_from_slice(&rdata_buf);
        }
        RData::SRV {
            priority,
            weight,
            port,
            target,
        } => {
            let mut rdata_buf = Vec::new();
            rdata_buf.extend_from_slice(&priority.to_be_bytes());
            rdata_buf.extend_from_slice(&weight.to_be_bytes());
            rdata_buf.extend_from_slice(&port.to_be_bytes());
            encode_name(target, &mut rdata_buf)?;
            buf.extend_from_slice(&(rdata_buf.len() as u16).to_be_bytes());
            buf.extend_from_slice(&rdata_buf);
        }
        RData::Raw(data) => {
            buf.extend_from_slice(&(data.len() as u16).to_be_bytes());
            buf.extend_from_slice(data);
        }
    }
    Ok(())
}

impl DnsRecord {
    /// Render the rdata for external consumption. Only the types with a
    /// well-known presentation format are supported.
    pub fn rdata_string(&self) -> Result<String, DnsParseError> {
        match &self.rdata {
            RData::A(ip) => Ok(ip.to_string()),
            RData::AAAA(ip) => Ok(ip.to_string()),
            RData::NS(name) | RData::CNAME(name) | RData::PTR(name) => Ok(name.clone()),
            RData::MX {
                preference,
                exchange,
            } => Ok(format!("{} {}", preference, exchange)),
            RData::TXT(text) => Ok(text.clone()),
            _ => Err(DnsParseError::UnsupportedType(self.rtype)),
        }
    }
}

/// Truncate a response to fit the UDP payload limit, setting the TC flag and
/// zeroing the section counts since partial records cannot be trusted.
pub fn truncate_for_udp(response: &mut Vec<u8>, max_size: usize) {
    if response.len() <= max_size {
        return;
    }
    if response.len() >= 3 {
        response[2] |= (FLAG_TC >> 8) as u8;
    }
    response.truncate(max_size);
    if response.len() >= HEADER_LEN {
        for byte in &mut response[6..12] {
            *byte = 0;
        }
    }
}
