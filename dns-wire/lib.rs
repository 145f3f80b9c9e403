//! DNS message construction and parsing for the DoH forwarder.
//!
//! This crate is the "DNS message library" collaborator: it knows how to pack and
//! unpack a [`Message`], and offers a couple of narrow helpers the forwarder needs
//! (EDNS(0) padding, SERVFAIL/NXDOMAIN synthesis). It does not know anything about
//! HTTP, TCP framing, or blocklists.

#![cfg_attr(test, allow(clippy::unwrap_used))]

use bytes::Bytes;
use domain::base::{Message, MessageBuilder, Rtype, iana::Rcode, wire::ParseError};

/// Default padding block size for EDNS(0) padding, per the common DoH recommendation
/// of rounding messages up to a multiple of 128 bytes (RFC 8467 ยง4.1).
pub const PADDING_BLOCK_SIZE: usize = 128;

/// Overhead of an OPT record with a single PADDING option and zero other options:
/// 1 byte root name + 2 bytes TYPE + 2 bytes CLASS + 4 bytes TTL + 2 bytes RDLENGTH,
/// plus the option's own 2 byte OPTION-CODE + 2 byte OPTION-LENGTH header.
const OPT_PADDING_OVERHEAD: usize = 11 + 4;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("message is too short to be a valid DNS message")]
    TooShort,
    #[error("message does not contain exactly one question")]
    NotSingleQuestion,
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("failed to build message: {0}")]
    Build(String),
}

/// A parsed DNS query, still backed by its original octets.
pub struct Query<'a> {
    inner: Message<&'a [u8]>,
}

impl<'a> Query<'a> {
    pub fn parse(bytes: &'a [u8]) -> Result<Self, Error> {
        let message = Message::from_octets(bytes).map_err(|_| Error::TooShort)?;
        let _ = message.sole_question().map_err(|_| Error::NotSingleQuestion)?;

        Ok(Self { inner: message })
    }

    pub fn id(&self) -> u16 {
        self.inner.header().id()
    }

    pub fn qtype(&self) -> Rtype {
        self.inner
            .sole_question()
            .expect("verified in parse")
            .qtype()
    }
}

/// Builds an EDNS(0)-padded copy of `query`, rounding the total message length up
/// to the next multiple of [`PADDING_BLOCK_SIZE`].
///
/// The original `query` bytes are left untouched; the caller gets a fresh `Vec<u8>`.
pub fn pad(query: &[u8]) -> Result<Vec<u8>, Error> {
    let message = Message::from_octets(query).map_err(|_| Error::TooShort)?;

    let mut builder = MessageBuilder::new_vec().question();
    *builder.header_mut() = message.header();

    for question in message.question() {
        let question = question?;
        builder
            .push(question)
            .map_err(|e| Error::Build(e.to_string()))?;
    }

    let mut additional = builder.answer().authority().additional();

    let unpadded_len = AsRef::<[u8]>::as_ref(&additional).len() + OPT_PADDING_OVERHEAD;
    let remainder = unpadded_len % PADDING_BLOCK_SIZE;
    let pad_len = if remainder == 0 {
        0
    } else {
        PADDING_BLOCK_SIZE - remainder
    };

    additional
        .opt(|opt| opt.padding(pad_len as u16))
        .map_err(|e| Error::Build(e.to_string()))?;

    Ok(additional.finish())
}

/// Synthesizes a SERVFAIL response for `query`, stripping the Additional section
/// (which also removes any EDNS(0) OPT record from the reply).
pub fn synthesize_servfail(query: &[u8]) -> Result<Vec<u8>, Error> {
    synthesize(query, Rcode::SERVFAIL)
}

/// Synthesizes an NXDOMAIN response for `query`, used to report a blocklist hit.
pub fn synthesize_blocked(query: &[u8]) -> Result<Vec<u8>, Error> {
    synthesize(query, Rcode::NXDOMAIN)
}

fn synthesize(query: &[u8], rcode: Rcode) -> Result<Vec<u8>, Error> {
    let message = Message::from_octets(query).map_err(|_| Error::TooShort)?;

    let mut answer = MessageBuilder::new_vec()
        .start_answer(&message, rcode)
        .map_err(|e| Error::Build(e.to_string()))?;
    answer.header_mut().set_ra(true);

    Ok(answer.finish())
}

/// Reads the 16-bit transaction ID from the first two bytes of a raw DNS message.
pub fn read_id(message: &[u8]) -> Option<u16> {
    message.get(0..2).map(|b| u16::from_be_bytes([b[0], b[1]]))
}

/// Overwrites the 16-bit transaction ID in the first two bytes of a raw DNS message.
pub fn write_id(message: &mut [u8], id: u16) -> bool {
    let Some(slot) = message.get_mut(0..2) else {
        return false;
    };
    slot.copy_from_slice(&id.to_be_bytes());
    true
}

/// Builds the DoH POST request body: `Content-Type`/`Accept` are the caller's
/// responsibility to attach (they belong to the transport, not the wire format).
pub fn into_request_body(message: Vec<u8>) -> Bytes {
    Bytes::from(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::base::{MessageBuilder as Builder, Name, Question};

    fn sample_query(id: u16) -> Vec<u8> {
        let mut builder = Builder::new_vec().question();
        builder.header_mut().set_id(id);
        builder.header_mut().set_rd(true);
        builder
            .push(Question::new_in(
                Name::vec_from_str("example.com").unwrap(),
                Rtype::A,
            ))
            .unwrap();
        builder.finish()
    }

    #[test]
    fn padding_rounds_up_to_block_size() {
        let query = sample_query(0x1234);

        let padded = pad(&query).unwrap();

        assert_eq!(padded.len() % PADDING_BLOCK_SIZE, 0);
        assert!(padded.len() > query.len());
        assert_eq!(read_id(&padded), Some(0x1234));
    }

    #[test]
    fn servfail_preserves_id_and_strips_additional() {
        let query = sample_query(0xabcd);

        let servfail = synthesize_servfail(&query).unwrap();

        let message = Message::from_octets(servfail.as_slice()).unwrap();
        assert_eq!(message.header().id(), 0xabcd);
        assert!(message.header().qr());
        assert!(message.header().ra());
        assert_eq!(message.header().rcode(), Rcode::SERVFAIL);
        assert_eq!(message.header_counts().arcount(), 0);
    }

    #[test]
    fn blocked_response_is_nxdomain() {
        let query = sample_query(7);

        let blocked = synthesize_blocked(&query).unwrap();

        let message = Message::from_octets(blocked.as_slice()).unwrap();
        assert_eq!(message.header().rcode(), Rcode::NXDOMAIN);
    }

    #[test]
    fn id_round_trips() {
        let mut query = sample_query(42);
        assert_eq!(read_id(&query), Some(42));

        assert!(write_id(&mut query, 0));
        assert_eq!(read_id(&query), Some(0));

        assert!(write_id(&mut query, 42));
        assert_eq!(read_id(&query), Some(42));
    }

    #[test]
    fn too_short_is_rejected() {
        assert!(Query::parse(&[0u8]).is_err());
        assert!(pad(&[0u8]).is_err());
    }
}
