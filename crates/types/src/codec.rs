//! Length-prefixed, big-endian canonical encoding (§4.C).
//!
//! Every top-level encoded value is wrapped with a one-byte entity tag and
//! an 8-byte big-endian version prefix. The decoder never silently accepts
//! a version it doesn't understand.

use crate::error::CodecError;

/// Tags for every entity this system's codec knows how to frame. `KeyPart`
/// through `BatchProof` are the storage-layer entity kinds named by the
/// storage interface; `Header` through `Identity` are this system's own
/// top-level block-model entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EntityTag {
    KeyPart = 1,
    Key = 2,
    Value = 3,
    Path = 4,
    Payload = 5,
    Proof = 6,
    BatchProof = 7,
    Header = 8,
    Seal = 9,
    ExecutionResult = 10,
    ServiceEvent = 11,
    Identity = 12,
}

impl EntityTag {
    fn from_u8(tag: u8) -> Result<Self, CodecError> {
        Ok(match tag {
            1 => Self::KeyPart,
            2 => Self::Key,
            3 => Self::Value,
            4 => Self::Path,
            5 => Self::Payload,
            6 => Self::Proof,
            7 => Self::BatchProof,
            8 => Self::Header,
            9 => Self::Seal,
            10 => Self::ExecutionResult,
            11 => Self::ServiceEvent,
            12 => Self::Identity,
            other => return Err(CodecError::UnknownEntityType(other)),
        })
    }
}

/// The newest encoding version this build understands, per entity. All
/// entities currently start at version 0.
pub const CURRENT_VERSION: u64 = 0;

/// Append-only byte buffer builder for the canonical wire format.
#[derive(Debug, Default)]
pub struct Encoder {
    buf: Vec<u8>,
}

impl Encoder {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Opens a top-level entity frame: one tag byte, then an 8-byte
    /// big-endian version.
    pub fn with_header(tag: EntityTag, version: u64) -> Self {
        let mut enc = Self::new();
        enc.buf.push(tag as u8);
        enc.encode_u64(version);
        enc
    }

    pub fn encode_u8(&mut self, v: u8) -> &mut Self {
        self.buf.push(v);
        self
    }

    pub fn encode_u16(&mut self, v: u16) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn encode_u32(&mut self, v: u32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn encode_u64(&mut self, v: u64) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    /// Encodes a byte string as an 8-byte big-endian length prefix
    /// followed by the raw bytes.
    pub fn encode_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.encode_u64(bytes.len() as u64);
        self.buf.extend_from_slice(bytes);
        self
    }

    /// Encodes a list as a 2-byte big-endian count prefix, each item
    /// itself framed by `item_encoder` into a length-prefixed slot.
    pub fn encode_list<T>(&mut self, items: &[T], mut item_encoder: impl FnMut(&mut Self, &T)) -> &mut Self {
        // counts beyond u16::MAX saturate rather than panic; no encoded
        // entity in this system ever approaches that many list items.
        self.encode_u16(items.len().min(u16::MAX as usize) as u16);
        for item in items {
            let mut inner = Encoder::new();
            item_encoder(&mut inner, item);
            self.encode_bytes(&inner.buf);
        }
        self
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

/// Cursor-based strict-inverse reader for the canonical wire format.
pub struct Decoder<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Reads the one-byte entity tag and 8-byte version, rejecting
    /// versions newer than `CURRENT_VERSION`.
    pub fn read_header(&mut self) -> Result<EntityTag, CodecError> {
        let tag = EntityTag::from_u8(self.decode_u8()?)?;
        let version = self.decode_u64()?;
        if version > CURRENT_VERSION {
            return Err(CodecError::VersionTooNew {
                found: version,
                supported: CURRENT_VERSION,
            });
        }
        Ok(tag)
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        if self.buf.len() - self.pos < n {
            return Err(CodecError::ShortInput);
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    /// Like `take`, but copies straight into a fixed-size array so callers
    /// converting to a sized integer never need a fallible `try_into`.
    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn decode_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    pub fn decode_u16(&mut self) -> Result<u16, CodecError> {
        Ok(u16::from_be_bytes(self.take_array()?))
    }

    pub fn decode_u32(&mut self) -> Result<u32, CodecError> {
        Ok(u32::from_be_bytes(self.take_array()?))
    }

    pub fn decode_u64(&mut self) -> Result<u64, CodecError> {
        Ok(u64::from_be_bytes(self.take_array()?))
    }

    pub fn decode_bytes(&mut self) -> Result<Vec<u8>, CodecError> {
        let len = self.decode_u64()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    /// Reads a list previously written by `Encoder::encode_list`.
    pub fn decode_list<T>(
        &mut self,
        mut item_decoder: impl FnMut(&mut Decoder<'_>) -> Result<T, CodecError>,
    ) -> Result<Vec<T>, CodecError> {
        let count = self.decode_u16()?;
        let mut out = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let item_bytes = self.decode_bytes()?;
            let mut inner = Decoder::new(&item_bytes);
            out.push(item_decoder(&mut inner)?);
            if inner.pos != inner.buf.len() {
                return Err(CodecError::TrailingBytes);
            }
        }
        Ok(out)
    }

    /// Fails if any bytes remain unconsumed: the decoder is the strict
    /// inverse of the encoder, not a prefix parser.
    pub fn finish(self) -> Result<(), CodecError> {
        if self.pos == self.buf.len() {
            Ok(())
        } else {
            Err(CodecError::TrailingBytes)
        }
    }
}

/// Types with a canonical, hashable byte encoding.
pub trait Canonical: Sized {
    fn encode_canonical(&self, enc: &mut Encoder);
    fn decode_canonical(dec: &mut Decoder<'_>) -> Result<Self, CodecError>;
    fn entity_tag() -> EntityTag;

    fn to_bytes_canonical(&self) -> Vec<u8> {
        let mut enc = Encoder::with_header(Self::entity_tag(), CURRENT_VERSION);
        self.encode_canonical(&mut enc);
        enc.finish()
    }

    fn from_bytes_canonical(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut dec = Decoder::new(bytes);
        let tag = dec.read_header()?;
        if tag != Self::entity_tag() {
            return Err(CodecError::UnknownEntityType(tag as u8));
        }
        let value = Self::decode_canonical(&mut dec)?;
        dec.finish()?;
        Ok(value)
    }
}
