// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: SUIT component identifier codec
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Unit tests below
//!
//! A component id is a CBOR array of byte strings. The first element wraps a text string
//! naming the component type; the remaining elements depend on the type:
//!
//! ```text
//! [h'"MEM"', h'<cpu int>', h'<address uint>', h'<size uint>']
//! [h'"CAND_IMG"' | h'"CAND_MFST"' | h'"MFST_VAR"' | h'"SOC_SPEC"' | h'"CACHE_POOL"', h'<number uint>']
//! [h'"INSTLD_MFST"', <16-byte class id>]
//! ```

use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

use ciborium_io::{Read, Write};
use ciborium_ll::{Decoder, Encoder, Header};
use suit_storage::ManifestClassId;

/// Upper bound on elements in a component id array.
const MAX_ELEMENTS: usize = 5;
/// Upper bound on the type name length.
const MAX_TYPE_NAME: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// Not the expected CBOR shape.
    #[error("malformed component id")]
    Malformed,
    /// Valid CBOR followed by unconsumed bytes.
    #[error("trailing bytes after component id")]
    TrailingBytes,
    /// Component id of a different type than requested.
    #[error("unexpected component type")]
    WrongType,
    #[error("value out of range")]
    OutOfRange,
}

/// Component type named by element 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentType {
    Mem,
    CandidateImage,
    CandidateManifest,
    ManifestVariable,
    SocSpecific,
    CachePool,
    InstalledManifest,
    /// Well-formed type name this platform does not know.
    Unsupported,
}

impl ComponentType {
    const NAMES: [(ComponentType, &'static str); 7] = [
        (ComponentType::Mem, "MEM"),
        (ComponentType::CandidateImage, "CAND_IMG"),
        (ComponentType::CandidateManifest, "CAND_MFST"),
        (ComponentType::ManifestVariable, "MFST_VAR"),
        (ComponentType::SocSpecific, "SOC_SPEC"),
        (ComponentType::CachePool, "CACHE_POOL"),
        (ComponentType::InstalledManifest, "INSTLD_MFST"),
    ];

    pub fn from_name(name: &str) -> Self {
        Self::NAMES
            .iter()
            .find(|(_, n)| *n == name)
            .map(|(ty, _)| *ty)
            .unwrap_or(ComponentType::Unsupported)
    }

    pub fn name(self) -> Option<&'static str> {
        Self::NAMES.iter().find(|(ty, _)| *ty == self).map(|(_, n)| *n)
    }
}

/// Fully decoded component identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentId {
    Mem { cpu_id: i32, address: u64, size: u64 },
    CandidateImage(u32),
    CandidateManifest(u32),
    ManifestVariable(u32),
    SocSpecific(u32),
    CachePool(u32),
    InstalledManifest(ManifestClassId),
}

impl ComponentId {
    pub fn component_type(&self) -> ComponentType {
        match self {
            Self::Mem { .. } => ComponentType::Mem,
            Self::CandidateImage(_) => ComponentType::CandidateImage,
            Self::CandidateManifest(_) => ComponentType::CandidateManifest,
            Self::ManifestVariable(_) => ComponentType::ManifestVariable,
            Self::SocSpecific(_) => ComponentType::SocSpecific,
            Self::CachePool(_) => ComponentType::CachePool,
            Self::InstalledManifest(_) => ComponentType::InstalledManifest,
        }
    }

    pub fn decode(raw: &[u8]) -> Result<Self, CodecError> {
        let id = match decode_component_type(raw)? {
            ComponentType::Mem => {
                let (cpu_id, address, size) = decode_mem(raw)?;
                Self::Mem { cpu_id, address, size }
            }
            ComponentType::CandidateImage => Self::CandidateImage(decode_component_number(raw)?),
            ComponentType::CandidateManifest => {
                Self::CandidateManifest(decode_component_number(raw)?)
            }
            ComponentType::ManifestVariable => {
                Self::ManifestVariable(decode_component_number(raw)?)
            }
            ComponentType::SocSpecific => Self::SocSpecific(decode_component_number(raw)?),
            ComponentType::CachePool => Self::CachePool(decode_component_number(raw)?),
            ComponentType::InstalledManifest => {
                Self::InstalledManifest(decode_manifest_class_id(raw)?)
            }
            ComponentType::Unsupported => return Err(CodecError::WrongType),
        };
        Ok(id)
    }

    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let name = self.component_type().name().ok_or(CodecError::WrongType)?;
        let mut elements: Vec<Vec<u8>> = vec![wrap_text(name)?];
        match *self {
            Self::Mem { cpu_id, address, size } => {
                elements.push(wrap_int(i64::from(cpu_id))?);
                elements.push(wrap_uint(address)?);
                elements.push(wrap_uint(size)?);
            }
            Self::CandidateImage(n)
            | Self::CandidateManifest(n)
            | Self::ManifestVariable(n)
            | Self::SocSpecific(n)
            | Self::CachePool(n) => elements.push(wrap_uint(u64::from(n))?),
            Self::InstalledManifest(class_id) => elements.push(class_id.as_bytes().to_vec()),
        }
        encode_elements(&elements)
    }
}

// ============================================================================
// Decoding
// ============================================================================

/// Type of a component id. Unknown but well-formed type names are `Unsupported`.
pub fn decode_component_type(raw: &[u8]) -> Result<ComponentType, CodecError> {
    let elements = decode_elements(raw)?;
    let first = elements.first().ok_or(CodecError::Malformed)?;
    let name = unwrap_text(first)?;
    Ok(ComponentType::from_name(&name))
}

/// `(cpu_id, address, size)` of a `MEM` component.
pub fn decode_mem(raw: &[u8]) -> Result<(i32, u64, u64), CodecError> {
    let elements = typed_elements(raw, ComponentType::Mem, 4)?;
    let cpu_id = i32::try_from(unwrap_int(&elements[1])?).map_err(|_| CodecError::OutOfRange)?;
    let address = unwrap_uint(&elements[2])?;
    let size = unwrap_uint(&elements[3])?;
    Ok((cpu_id, address, size))
}

/// Component number of a numbered component type.
pub fn decode_component_number(raw: &[u8]) -> Result<u32, CodecError> {
    let elements = decode_elements(raw)?;
    if elements.len() != 2 {
        return Err(CodecError::Malformed);
    }
    let ty = ComponentType::from_name(&unwrap_text(&elements[0])?);
    if matches!(ty, ComponentType::Mem | ComponentType::InstalledManifest | ComponentType::Unsupported)
    {
        return Err(CodecError::WrongType);
    }
    u32::try_from(unwrap_uint(&elements[1])?).map_err(|_| CodecError::OutOfRange)
}

/// Class id referenced by an `INSTLD_MFST` component.
pub fn decode_manifest_class_id(raw: &[u8]) -> Result<ManifestClassId, CodecError> {
    let elements = typed_elements(raw, ComponentType::InstalledManifest, 2)?;
    ManifestClassId::from_slice(&elements[1]).ok_or(CodecError::Malformed)
}

fn typed_elements(
    raw: &[u8],
    expected: ComponentType,
    count: usize,
) -> Result<Vec<Vec<u8>>, CodecError> {
    let elements = decode_elements(raw)?;
    if elements.len() != count {
        return Err(CodecError::Malformed);
    }
    if ComponentType::from_name(&unwrap_text(&elements[0])?) != expected {
        return Err(CodecError::WrongType);
    }
    Ok(elements)
}

/// Splits the outer array into the contents of its byte strings.
fn decode_elements(raw: &[u8]) -> Result<Vec<Vec<u8>>, CodecError> {
    let mut decoder = Decoder::from(raw);
    let count = match decoder.pull().map_err(|_| CodecError::Malformed)? {
        Header::Array(Some(count)) if (1..=MAX_ELEMENTS).contains(&count) => count,
        _ => return Err(CodecError::Malformed),
    };
    let mut elements = Vec::with_capacity(count);
    for _ in 0..count {
        let len = match decoder.pull().map_err(|_| CodecError::Malformed)? {
            Header::Bytes(Some(len)) if len <= raw.len() => len,
            _ => return Err(CodecError::Malformed),
        };
        let mut element = vec![0u8; len];
        decoder.read_exact(&mut element).map_err(|_| CodecError::Malformed)?;
        elements.push(element);
    }
    if decoder.offset() != raw.len() {
        return Err(CodecError::TrailingBytes);
    }
    Ok(elements)
}

/// Decodes exactly one header from `bytes` and returns it with the decoder.
fn single_header(bytes: &[u8]) -> Result<(Header, Decoder<&[u8]>), CodecError> {
    let mut decoder = Decoder::from(bytes);
    let header = decoder.pull().map_err(|_| CodecError::Malformed)?;
    Ok((header, decoder))
}

fn finish(mut decoder: Decoder<&[u8]>, len: usize) -> Result<(), CodecError> {
    if decoder.offset() != len {
        return Err(CodecError::TrailingBytes);
    }
    Ok(())
}

fn unwrap_uint(bytes: &[u8]) -> Result<u64, CodecError> {
    match single_header(bytes)? {
        (Header::Positive(value), decoder) => {
            finish(decoder, bytes.len())?;
            Ok(value)
        }
        _ => Err(CodecError::Malformed),
    }
}

fn unwrap_int(bytes: &[u8]) -> Result<i64, CodecError> {
    match single_header(bytes)? {
        (Header::Positive(value), decoder) => {
            finish(decoder, bytes.len())?;
            i64::try_from(value).map_err(|_| CodecError::OutOfRange)
        }
        (Header::Negative(value), decoder) => {
            finish(decoder, bytes.len())?;
            let magnitude = i64::try_from(value).map_err(|_| CodecError::OutOfRange)?;
            Ok(-1 - magnitude)
        }
        _ => Err(CodecError::Malformed),
    }
}

fn unwrap_text(bytes: &[u8]) -> Result<String, CodecError> {
    let (header, mut decoder) = single_header(bytes)?;
    let len = match header {
        Header::Text(Some(len)) if len <= MAX_TYPE_NAME => len,
        _ => return Err(CodecError::Malformed),
    };
    let mut text = vec![0u8; len];
    decoder.read_exact(&mut text).map_err(|_| CodecError::Malformed)?;
    finish(decoder, bytes.len())?;
    String::from_utf8(text).map_err(|_| CodecError::Malformed)
}

// ============================================================================
// Encoding
// ============================================================================

fn encode_item(header: Header, body: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::new();
    let mut encoder = Encoder::from(&mut out);
    encoder.push(header).map_err(|_| CodecError::Malformed)?;
    encoder.write_all(body).map_err(|_| CodecError::Malformed)?;
    Ok(out)
}

fn wrap_text(text: &str) -> Result<Vec<u8>, CodecError> {
    encode_item(Header::Text(Some(text.len())), text.as_bytes())
}

fn wrap_uint(value: u64) -> Result<Vec<u8>, CodecError> {
    encode_item(Header::Positive(value), &[])
}

fn wrap_int(value: i64) -> Result<Vec<u8>, CodecError> {
    if value >= 0 {
        encode_item(Header::Positive(value.unsigned_abs()), &[])
    } else {
        encode_item(Header::Negative((-1 - value).unsigned_abs()), &[])
    }
}

fn encode_elements(elements: &[Vec<u8>]) -> Result<Vec<u8>, CodecError> {
    let mut out = encode_item(Header::Array(Some(elements.len())), &[])?;
    for element in elements {
        out.extend_from_slice(&encode_item(Header::Bytes(Some(element.len())), element)?);
    }
    Ok(out)
}
