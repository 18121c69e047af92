//! Wire format serialization and deserialization.
//!
//! Every protocol message is a 1-byte type tag followed by a fixed-layout
//! payload. Multi-byte fields are big-endian.
//!
//! ```text
//! PING     (tag 1): packet_count (1) || origin (4)
//! PONG     (tag 2): queue (1) || energy (1) || hop_count (1) || link_quality (1)
//!                   || destination (4) || origin (4)
//! HELLO    (tag 3): hop_count (1) || origin (4)
//! DATA_ACK (tag 4): ident (2)
//! ```
//!
//! The energy and link-quality bytes carry fractions quantized to 1/255
//! steps (see [`crate::types::scale_unit`]).
//!
//! Data packets are not protocol messages; they travel on the data port as
//! an 11-byte header followed by the raw payload:
//!
//! ```text
//! source (4) || destination (4) || ident (2) || hop_limit (1) || payload (*)
//! ```

use alloc::vec::Vec;

use crate::types::{
    DataAck, DataPacket, Hello, NodeAddress, PacketHeader, Ping, Pong, MSG_DATA_ACK, MSG_HELLO,
    MSG_PING, MSG_PONG,
};

/// Decoding error types.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecodeError {
    /// Unexpected end of buffer.
    UnexpectedEof,
    /// Unrecognized type tag. Callers must drop the packet.
    UnknownType,
    /// Trailing bytes after a complete message.
    TrailingBytes,
}

/// Zero-copy reader over a byte slice.
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    /// Create a new reader over a byte slice.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Returns the number of bytes remaining.
    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    /// Returns true if there are no more bytes to read.
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Returns the number of bytes consumed so far.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Read a single byte.
    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        if self.pos >= self.buf.len() {
            return Err(DecodeError::UnexpectedEof);
        }
        let v = self.buf[self.pos];
        self.pos += 1;
        Ok(v)
    }

    /// Read a fixed number of bytes.
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        if self.pos + len > self.buf.len() {
            return Err(DecodeError::UnexpectedEof);
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    /// Read a u16 in big-endian format.
    pub fn read_u16_be(&mut self) -> Result<u16, DecodeError> {
        let bytes = self.read_bytes(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    /// Read a node address (4 bytes, big-endian).
    pub fn read_address(&mut self) -> Result<NodeAddress, DecodeError> {
        let bytes = self.read_bytes(4)?;
        Ok(NodeAddress::from_be_bytes([
            bytes[0], bytes[1], bytes[2], bytes[3],
        ]))
    }

    /// Read all remaining bytes.
    pub fn read_rest(&mut self) -> &'a [u8] {
        let slice = &self.buf[self.pos..];
        self.pos = self.buf.len();
        slice
    }
}

/// Writer for encoding messages.
#[derive(Default)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    /// Create a new empty writer.
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Returns the current length of written data.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Returns true if no data has been written.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Write a single byte.
    pub fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    /// Write a slice of bytes.
    pub fn write_bytes(&mut self, v: &[u8]) {
        self.buf.extend_from_slice(v);
    }

    /// Write a u16 in big-endian format.
    pub fn write_u16_be(&mut self, v: u16) {
        self.write_bytes(&v.to_be_bytes());
    }

    /// Write a node address (4 bytes, big-endian).
    pub fn write_address(&mut self, addr: NodeAddress) {
        self.write_bytes(&addr.to_be_bytes());
    }

    /// Finish writing and return the buffer.
    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

/// Trait for types that can be encoded to wire format.
pub trait Encode {
    /// Encode this value to the writer.
    fn encode(&self, w: &mut Writer);

    /// Encode and return the bytes.
    fn encode_to_vec(&self) -> Vec<u8> {
        let mut w = Writer::new();
        self.encode(&mut w);
        w.finish()
    }
}

/// Trait for types that can be decoded from wire format.
pub trait Decode: Sized {
    /// Decode a value from the reader.
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError>;

    /// Decode from a byte slice (strict: rejects trailing bytes).
    fn decode_from_slice(data: &[u8]) -> Result<Self, DecodeError> {
        let mut r = Reader::new(data);
        let result = Self::decode(&mut r)?;
        if !r.is_empty() {
            return Err(DecodeError::TrailingBytes);
        }
        Ok(result)
    }
}

/// Wrapper enum for encoding/decoding protocol messages.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Message {
    Ping(Ping),
    Pong(Pong),
    Hello(Hello),
    DataAck(DataAck),
}

impl Message {
    /// The wire type tag of this message.
    pub fn msg_type(&self) -> u8 {
        match self {
            Message::Ping(_) => MSG_PING,
            Message::Pong(_) => MSG_PONG,
            Message::Hello(_) => MSG_HELLO,
            Message::DataAck(_) => MSG_DATA_ACK,
        }
    }

    /// Declared serialized size, tag byte included.
    ///
    /// Every variant has a fixed layout, so this is a constant per type.
    pub fn serialized_size(&self) -> usize {
        1 + match self {
            Message::Ping(_) => 5,
            Message::Pong(_) => 12,
            Message::Hello(_) => 5,
            Message::DataAck(_) => 2,
        }
    }
}

impl Encode for Ping {
    fn encode(&self, w: &mut Writer) {
        w.write_u8(self.packet_count);
        w.write_address(self.origin);
    }
}

impl Decode for Ping {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let packet_count = r.read_u8()?;
        let origin = r.read_address()?;
        Ok(Ping {
            packet_count,
            origin,
        })
    }
}

impl Encode for Pong {
    fn encode(&self, w: &mut Writer) {
        w.write_u8(self.queue);
        w.write_u8(self.energy);
        w.write_u8(self.hop_count);
        w.write_u8(self.link_quality);
        w.write_address(self.destination);
        w.write_address(self.origin);
    }
}

impl Decode for Pong {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let queue = r.read_u8()?;
        let energy = r.read_u8()?;
        let hop_count = r.read_u8()?;
        let link_quality = r.read_u8()?;
        let destination = r.read_address()?;
        let origin = r.read_address()?;
        Ok(Pong {
            queue,
            energy,
            hop_count,
            link_quality,
            destination,
            origin,
        })
    }
}

impl Encode for Hello {
    fn encode(&self, w: &mut Writer) {
        w.write_u8(self.hop_count);
        w.write_address(self.origin);
    }
}

impl Decode for Hello {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let hop_count = r.read_u8()?;
        let origin = r.read_address()?;
        Ok(Hello { hop_count, origin })
    }
}

impl Encode for DataAck {
    fn encode(&self, w: &mut Writer) {
        w.write_u16_be(self.ident);
    }
}

impl Decode for DataAck {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let ident = r.read_u16_be()?;
        Ok(DataAck { ident })
    }
}

impl Encode for Message {
    fn encode(&self, w: &mut Writer) {
        let start = w.len();
        w.write_u8(self.msg_type());
        match self {
            Message::Ping(m) => m.encode(w),
            Message::Pong(m) => m.encode(w),
            Message::Hello(m) => m.encode(w),
            Message::DataAck(m) => m.encode(w),
        }
        debug_assert_eq!(w.len() - start, self.serialized_size());
    }
}

impl Decode for Message {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let start = r.position();
        let msg = match r.read_u8()? {
            MSG_PING => Message::Ping(Ping::decode(r)?),
            MSG_PONG => Message::Pong(Pong::decode(r)?),
            MSG_HELLO => Message::Hello(Hello::decode(r)?),
            MSG_DATA_ACK => Message::DataAck(DataAck::decode(r)?),
            _ => return Err(DecodeError::UnknownType),
        };
        debug_assert_eq!(r.position() - start, msg.serialized_size());
        Ok(msg)
    }
}

impl Encode for DataPacket {
    fn encode(&self, w: &mut Writer) {
        w.write_address(self.header.source);
        w.write_address(self.header.destination);
        w.write_u16_be(self.header.ident);
        w.write_u8(self.header.hop_limit);
        w.write_bytes(&self.payload);
    }
}

impl Decode for DataPacket {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let source = r.read_address()?;
        let destination = r.read_address()?;
        let ident = r.read_u16_be()?;
        let hop_limit = r.read_u8()?;
        let payload = r.read_rest().to_vec();
        Ok(DataPacket {
            header: PacketHeader {
                source,
                destination,
                ident,
                hop_limit,
            },
            payload,
        })
    }
}
