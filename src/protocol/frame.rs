//! Relay envelope framing
//!
//! Both directions of the TCP connection use the same envelope:
//!
//! ```text
//! +----------------+----------------+-------------------+
//! | IPv4 (4, BE)   | length N (4,BE)| payload (N bytes) |
//! +----------------+----------------+-------------------+
//! ```
//!
//! Client to relay, the address is the DHCP server to forward to and
//! `0.0.0.0` means "close this session". Relay to client, the address is the
//! host that sent the datagram.

use crate::error::RelayError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::net::Ipv4Addr;
use tokio_util::codec::{Decoder, Encoder};

/// Envelope header size: address plus length
pub const HEADER_LEN: usize = 8;

/// Default ceiling on the payload of a single frame
pub const DEFAULT_MAX_PAYLOAD: u32 = 65507;

/// Request sent by a relay client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayRequest {
    /// DHCP server to forward the payload to
    pub target: Ipv4Addr,
    /// Encoded DHCP request
    pub payload: Bytes,
}

impl RelayRequest {
    /// Create a request for `target`
    pub fn new(target: Ipv4Addr, payload: impl Into<Bytes>) -> Self {
        RelayRequest {
            target,
            payload: payload.into(),
        }
    }

    /// The session termination frame
    pub fn sentinel() -> Self {
        RelayRequest {
            target: Ipv4Addr::UNSPECIFIED,
            payload: Bytes::new(),
        }
    }

    /// Whether this frame asks the relay to close the session
    pub fn is_sentinel(&self) -> bool {
        self.target.is_unspecified()
    }
}

/// Datagram handed to every live session by the fan-out receiver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayMessage {
    /// Host the datagram came from
    pub source: Ipv4Addr,
    /// Raw datagram body
    pub payload: Bytes,
}

impl RelayMessage {
    /// Create a message from `source`
    pub fn new(source: Ipv4Addr, payload: impl Into<Bytes>) -> Self {
        RelayMessage {
            source,
            payload: payload.into(),
        }
    }
}

fn decode_envelope(
    src: &mut BytesMut,
    max_payload: u32,
) -> Result<Option<(Ipv4Addr, Bytes)>, RelayError> {
    if src.len() < HEADER_LEN {
        src.reserve(HEADER_LEN - src.len());
        return Ok(None);
    }

    let addr = Ipv4Addr::new(src[0], src[1], src[2], src[3]);
    let len = u32::from_be_bytes([src[4], src[5], src[6], src[7]]);
    if len > max_payload {
        return Err(RelayError::Decode(format!(
            "payload length {} exceeds limit {}",
            len, max_payload
        )));
    }

    let total = HEADER_LEN + len as usize;
    if src.len() < total {
        src.reserve(total - src.len());
        return Ok(None);
    }

    src.advance(HEADER_LEN);
    let payload = src.split_to(len as usize).freeze();
    Ok(Some((addr, payload)))
}

fn encode_envelope(
    addr: Ipv4Addr,
    payload: &[u8],
    max_payload: u32,
    dst: &mut BytesMut,
) -> Result<(), RelayError> {
    let len = u32::try_from(payload.len())
        .ok()
        .filter(|len| *len <= max_payload)
        .ok_or_else(|| {
            RelayError::Decode(format!(
                "payload length {} exceeds limit {}",
                payload.len(),
                max_payload
            ))
        })?;

    dst.reserve(HEADER_LEN + payload.len());
    dst.put_slice(&addr.octets());
    dst.put_u32(len);
    dst.put_slice(payload);
    Ok(())
}

/// Relay side of the connection: decodes requests, encodes messages
#[derive(Debug, Clone, Copy)]
pub struct RelayCodec {
    max_payload: u32,
}

impl RelayCodec {
    /// Create a codec rejecting payloads larger than `max_payload`
    pub fn new(max_payload: u32) -> Self {
        RelayCodec { max_payload }
    }
}

impl Default for RelayCodec {
    fn default() -> Self {
        RelayCodec::new(DEFAULT_MAX_PAYLOAD)
    }
}

impl Decoder for RelayCodec {
    type Item = RelayRequest;
    type Error = RelayError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        Ok(decode_envelope(src, self.max_payload)?
            .map(|(target, payload)| RelayRequest { target, payload }))
    }
}

impl Encoder<RelayMessage> for RelayCodec {
    type Error = RelayError;

    fn encode(&mut self, item: RelayMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        encode_envelope(item.source, &item.payload, u32::MAX, dst)
    }
}

/// Client side of the connection: encodes requests, decodes messages
#[derive(Debug, Clone, Copy)]
pub struct ClientCodec {
    max_payload: u32,
}

impl ClientCodec {
    /// Create a codec rejecting payloads larger than `max_payload`
    pub fn new(max_payload: u32) -> Self {
        ClientCodec { max_payload }
    }
}

impl Default for ClientCodec {
    fn default() -> Self {
        ClientCodec::new(DEFAULT_MAX_PAYLOAD)
    }
}

impl Decoder for ClientCodec {
    type Item = RelayMessage;
    type Error = RelayError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        Ok(decode_envelope(src, self.max_payload)?
            .map(|(source, payload)| RelayMessage { source, payload }))
    }
}

impl Encoder<RelayRequest> for ClientCodec {
    type Error = RelayError;

    fn encode(&mut self, item: RelayRequest, dst: &mut BytesMut) -> Result<(), Self::Error> {
        encode_envelope(item.target, &item.payload, self.max_payload, dst)
    }
}
