//! Registry Value Types
//!
//! A value is persisted as one file: a single type byte followed by the
//! raw payload. Multi-strings terminate each component with a NUL plus a
//! final extra NUL.

use crate::abi::Dword;
use crate::status::HostError;
use num_derive::FromPrimitive;

/// Registry value types. The discriminant doubles as the on-disk type
/// byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
#[repr(u8)]
pub enum RegType {
    /// Null-terminated string
    Sz = 1,
    /// Expandable string (with %VARIABLE% references)
    ExpandSz = 2,
    /// Binary data
    Binary = 3,
    /// 32-bit little-endian integer
    Dword = 4,
    /// Array of null-terminated strings
    MultiSz = 7,
    /// 64-bit little-endian integer
    Qword = 11,
}

impl RegType {
    pub fn from_u32(value: Dword) -> Option<Self> {
        u8::try_from(value)
            .ok()
            .and_then(num_traits::FromPrimitive::from_u8)
    }
}

/// Serialize a value for its backing file.
pub fn encode(ty: RegType, payload: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(1 + payload.len());
    bytes.push(ty as u8);
    bytes.extend_from_slice(payload);
    bytes
}

/// Split a backing file into type and payload.
pub fn decode(bytes: &[u8]) -> Result<(RegType, &[u8]), HostError> {
    let (&type_byte, payload) = bytes
        .split_first()
        .ok_or_else(|| HostError::MalformedInput("empty value file".into()))?;
    let ty = <RegType as num_traits::FromPrimitive>::from_u8(type_byte)
        .ok_or_else(|| HostError::MalformedInput(format!("value type byte {type_byte}")))?;
    Ok((ty, payload))
}

/// Join multi-string components into the wire layout.
pub fn encode_multi_sz(parts: &[&str]) -> Vec<u8> {
    let mut bytes = Vec::new();
    for part in parts {
        bytes.extend_from_slice(part.as_bytes());
        bytes.push(0);
    }
    bytes.push(0);
    bytes
}
