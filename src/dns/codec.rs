//! DNS wire codec.
//!
//! Decodes inbound queries into an immutable [`Query`] and synthesizes the
//! three kinds of answers the proxy sends: blocked (null address), forwarded
//! (upstream bytes with the client's transaction id) and error (SERVFAIL,
//! REFUSED). Parsing goes through `hickory-proto`'s binary decoder, which
//! rejects out-of-range labels, overruns and forward-pointing compression
//! pointers.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};

use hickory_proto::op::{Message, MessageType, OpCode, ResponseCode};
use hickory_proto::rr::rdata::{A, AAAA};
use hickory_proto::rr::{DNSClass, RData, Record, RecordType};
use hickory_proto::serialize::binary::{BinDecodable, BinEncodable};
use tracing::warn;

use crate::config::AaaaPolicy;
use crate::error::DecodeError;

/// Size of the fixed DNS header.
pub const HEADER_LEN: usize = 12;

/// Largest payload a client without EDNS accepts over UDP.
pub const MIN_UDP_PAYLOAD: u16 = 512;

/// A parsed, validated DNS query.
#[derive(Debug, Clone)]
pub struct Query {
    id: u16,
    domain: String,
    query_type: RecordType,
    query_class: DNSClass,
    source: SocketAddr,
    question: hickory_proto::op::Query,
    recursion_desired: bool,
    max_udp_payload: u16,
    raw: Vec<u8>,
}

impl Query {
    /// Transaction id chosen by the client.
    #[inline]
    pub const fn id(&self) -> u16 {
        self.id
    }

    /// Question name, lowercase and without the trailing dot.
    #[inline]
    pub fn domain(&self) -> &str {
        &self.domain
    }

    #[inline]
    pub const fn query_type(&self) -> RecordType {
        self.query_type
    }

    #[inline]
    pub const fn query_class(&self) -> DNSClass {
        self.query_class
    }

    /// Address the query came from.
    #[inline]
    pub const fn source(&self) -> SocketAddr {
        self.source
    }

    /// Largest UDP answer the client accepts (EDNS advertised size, at least 512).
    #[inline]
    pub const fn max_udp_payload(&self) -> u16 {
        self.max_udp_payload
    }

    /// The packet exactly as received.
    #[inline]
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }
}

/// Decode an inbound packet into a [`Query`].
pub fn decode(bytes: &[u8], source: SocketAddr) -> Result<Query, DecodeError> {
    if bytes.len() < HEADER_LEN {
        return Err(DecodeError::TooShort(bytes.len()));
    }

    let message =
        Message::from_bytes(bytes).map_err(|err| DecodeError::Malformed(err.to_string()))?;

    if message.message_type() != MessageType::Query {
        return Err(DecodeError::NotAQuery);
    }
    if message.op_code() != OpCode::Query {
        return Err(DecodeError::UnsupportedOpCode(format!(
            "{:?}",
            message.op_code()
        )));
    }

    let question = message
        .queries()
        .first()
        .cloned()
        .ok_or(DecodeError::NoQuestion)?;

    let domain = question
        .name()
        .to_ascii()
        .trim_end_matches('.')
        .to_ascii_lowercase();

    let max_udp_payload = message
        .extensions()
        .as_ref()
        .map_or(MIN_UDP_PAYLOAD, |edns| edns.max_payload().max(MIN_UDP_PAYLOAD));

    Ok(Query {
        id: message.id(),
        domain,
        query_type: question.query_type(),
        query_class: question.query_class(),
        source,
        recursion_desired: message.recursion_desired(),
        question,
        max_udp_payload,
        raw: bytes.to_vec(),
    })
}

/// Build the answer for a blocked domain.
///
/// - A queries → one `A 0.0.0.0` record
/// - AAAA queries → one `AAAA ::` record, or no record with [`AaaaPolicy::NoData`]
/// - anything else → NOERROR with an empty answer section
pub fn encode_blocked(query: &Query, ttl: u32, aaaa: AaaaPolicy) -> Vec<u8> {
    let mut response = response_for(query, ResponseCode::NoError);
    let name = query.question.name().clone();

    match query.query_type {
        RecordType::A => {
            response.add_answer(Record::from_rdata(
                name,
                ttl,
                RData::A(A(Ipv4Addr::UNSPECIFIED)),
            ));
        }
        RecordType::AAAA if aaaa == AaaaPolicy::NullAddress => {
            response.add_answer(Record::from_rdata(
                name,
                ttl,
                RData::AAAA(AAAA(Ipv6Addr::UNSPECIFIED)),
            ));
        }
        _ => {}
    }

    finish(&response, query)
}

/// Relay an upstream answer, replacing only its transaction id with the client's.
pub fn encode_forwarded_answer(query: &Query, upstream: &[u8]) -> Vec<u8> {
    with_id(upstream, query.id)
}

/// Build an error answer (SERVFAIL, REFUSED, ...) echoing the question.
pub fn encode_error(query: &Query, rcode: ResponseCode) -> Vec<u8> {
    finish(&response_for(query, rcode), query)
}

/// Build an empty answer with the TC bit set, asking the client to retry over TCP.
pub fn encode_truncated(query: &Query) -> Vec<u8> {
    let mut response = response_for(query, ResponseCode::NoError);
    response.set_truncated(true);
    finish(&response, query)
}

/// Copy `packet`, overwriting its transaction id.
pub fn with_id(packet: &[u8], id: u16) -> Vec<u8> {
    let mut out = packet.to_vec();
    if out.len() >= 2 {
        out[..2].copy_from_slice(&id.to_be_bytes());
    }
    out
}

/// Read the transaction id of a packet, if it has a complete header.
pub fn read_id(packet: &[u8]) -> Option<u16> {
    (packet.len() >= HEADER_LEN).then(|| u16::from_be_bytes([packet[0], packet[1]]))
}

/// Whether the packet's header has the QR (response) bit set.
pub fn is_response(packet: &[u8]) -> bool {
    packet.len() >= HEADER_LEN && packet[2] & 0x80 != 0
}

fn response_for(query: &Query, rcode: ResponseCode) -> Message {
    let mut response = Message::new();
    response
        .set_id(query.id)
        .set_message_type(MessageType::Response)
        .set_op_code(OpCode::Query)
        .set_recursion_desired(query.recursion_desired)
        .set_recursion_available(true)
        .set_response_code(rcode);
    response.add_query(query.question.clone());
    response
}

fn finish(response: &Message, query: &Query) -> Vec<u8> {
    match response.to_bytes() {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!(domain = %query.domain, "failed to serialize response: {err}");
            header_only(query.id, query.recursion_desired, ResponseCode::ServFail)
        }
    }
}

/// Bare header answer used when serialization fails.
fn header_only(id: u16, recursion_desired: bool, rcode: ResponseCode) -> Vec<u8> {
    let mut header = vec![0u8; HEADER_LEN];
    header[..2].copy_from_slice(&id.to_be_bytes());
    header[2] = 0x80 | u8::from(recursion_desired);
    header[3] = 0x80 | (u16::from(rcode) & 0x0F) as u8;
    header
}
