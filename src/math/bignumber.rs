//! Big Number Data Types

#![allow(clippy::assign_op_pattern)]
#![allow(clippy::ptr_offset_with_cast)]
#![allow(clippy::manual_range_contains)]

use crate::error::EngineError;
use borsh::{BorshDeserialize, BorshSerialize};
use std::borrow::BorrowMut;
use std::convert::TryInto;
use std::io::{Error, ErrorKind, Read, Write};
use std::mem::size_of;
use uint::construct_uint;

use crate::error::EngineResult;

macro_rules! impl_borsh_serialize_for_bn {
    ($type: ident) => {
        impl BorshSerialize for $type {
            #[inline]
            fn serialize<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
                let bytes = self.to_le_bytes();
                writer.write_all(&bytes)
            }
        }
    };
}

macro_rules! impl_borsh_deserialize_for_bn {
    ($type: ident) => {
        impl BorshDeserialize for $type {
            #[inline]
            fn deserialize(buf: &mut &[u8]) -> std::io::Result<Self> {
                if buf.len() < size_of::<$type>() {
                    return Err(Error::new(ErrorKind::InvalidInput, "Unexpected length of input"));
                }

                let res = $type::from_le_bytes(buf[..size_of::<$type>()].try_into().unwrap());
                *buf = &buf[size_of::<$type>()..];
                Ok(res)
            }

            fn deserialize_reader<R: Read>(_: &mut R) -> std::io::Result<Self> {
                todo!()
            }
        }
    };
}

construct_uint! {
    /// 256-bit unsigned integer.
    pub struct U256(4);
}

impl U256 {
    /// Converts a u256 to u64
    pub fn to_u64(self) -> Option<u64> {
        self.try_into().map_or_else(|_| None, Some)
    }

    /// Converts a u256 to u64
    pub fn try_to_u64(self) -> EngineResult<u64> {
        self.try_into().map_err(|_| EngineError::CastingFailure)
    }

    /// Converts a u256 to u128
    pub fn to_u128(self) -> Option<u128> {
        self.try_to_u128().map_or_else(|_| None, Some)
    }

    /// Converts a u256 to u128
    pub fn try_to_u128(self) -> EngineResult<u128> {
        self.try_into().map_err(|_| EngineError::CastingFailure)
    }

    /// Converts from little endian bytes
    pub fn from_le_bytes(bytes: [u8; 32]) -> Self {
        U256::from_little_endian(&bytes)
    }

    /// Converts to little endian bytes
    pub fn to_le_bytes(self) -> [u8; 32] {
        let mut buf: Vec<u8> = Vec::with_capacity(size_of::<Self>());
        self.to_little_endian(buf.borrow_mut());

        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(buf.as_slice());
        bytes
    }
}

impl_borsh_deserialize_for_bn!(U256);
impl_borsh_serialize_for_bn!(U256);

construct_uint! {
    /// 192-bit unsigned integer
    pub struct U192(3);
}

impl U192 {
    /// Convert u192 to u64
    pub fn to_u64(self) -> Option<u64> {
        self.try_to_u64().map_or_else(|_| None, Some)
    }

    /// Convert u192 to u64
    pub fn try_to_u64(self) -> EngineResult<u64> {
        self.try_into().map_err(|_| EngineError::CastingFailure)
    }

    /// Convert u192 to u128
    pub fn to_u128(self) -> Option<u128> {
        self.try_to_u128().map_or_else(|_| None, Some)
    }

    /// Convert u192 to u128
    pub fn try_to_u128(self) -> EngineResult<u128> {
        self.try_into().map_err(|_| EngineError::CastingFailure)
    }

    /// Convert from little endian bytes
    pub fn from_le_bytes(bytes: [u8; 32]) -> Self {
        U192::from_little_endian(&bytes)
    }

    /// Convert to little endian bytes
    pub fn to_le_bytes(self) -> [u8; 32] {
        let mut buf = Vec::with_capacity(size_of::<Self>());
        self.to_little_endian(buf.borrow_mut());

        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(buf.as_slice());
        bytes
    }
}

impl_borsh_deserialize_for_bn!(U192);
impl_borsh_serialize_for_bn!(U192);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn u256_roundtrips_through_le_bytes() {
        let value = U256::from(123_456_789_u64);
        let bytes = value.to_le_bytes();
        assert_eq!(U256::from_le_bytes(bytes), value);
    }

    #[test]
    fn u256_try_to_u64_fails_when_too_large() {
        let value = U256::from(u64::MAX) + U256::from(1u8);
        assert!(value.try_to_u64().is_err());
    }
}
