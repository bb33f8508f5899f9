//! Fixed, versioned, little-endian wire types for the collective and socket paths.

use crate::m2n_error::M2nError;
use bytemuck::{Pod, Zeroable};
use static_assertions::const_assert_eq;
use std::mem::size_of;

pub fn cast_slice<T: Pod>(v: &[T]) -> &[u8] {
    bytemuck::cast_slice(v)
}

pub fn expect_exact_len(actual: usize, expected: usize) -> Result<(), M2nError> {
    if actual == expected {
        Ok(())
    } else {
        Err(M2nError::ShortTransfer { expected, actual })
    }
}

/// Decode a single `Pod` record from exactly `size_of::<T>()` bytes.
pub fn read_record<T: Pod>(bytes: &[u8]) -> Result<T, M2nError> {
    expect_exact_len(bytes.len(), size_of::<T>())?;
    Ok(bytemuck::pod_read_unaligned(bytes))
}

/// Bump when the layout or semantics change in incompatible ways.
pub const WIRE_VERSION: u16 = 1;

/// First four bytes of every hello: `b"M2N\0"` read as little-endian.
pub const HELLO_MAGIC: u32 = u32::from_le_bytes(*b"M2N\0");

/// Socket message tags. Sockets have no call-order matching, so every
/// message carries one of these and the receiver checks it.
pub const TAG_HELLO: u32 = 0x4D32_0001;
pub const TAG_RANK: u32 = 0x4D32_0002;
pub const TAG_LENGTH: u32 = 0x4D32_0010;
pub const TAG_PAYLOAD: u32 = 0x4D32_0011;

/// All multi-byte integers in these structs are **little-endian** on the wire.
/// We store them pre-LE with `.to_le()` and decode with `.from_le()`.

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireCount {
    pub n_le: u32,
}
impl WireCount {
    pub fn new(n: usize) -> Self {
        Self {
            n_le: (n as u32).to_le(),
        }
    }
    pub fn get(&self) -> usize {
        u32::from_le(self.n_le) as usize
    }
}

/// 64-bit word used by the point-to-point collectives.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireWord {
    pub v_le: u64,
}
impl WireWord {
    pub fn new(v: u64) -> Self {
        Self { v_le: v.to_le() }
    }
    pub fn get(&self) -> u64 {
        u64::from_le(self.v_le)
    }
}

/// Header preceding every socket payload.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireFrameHdr {
    pub tag_le: u32,
    pub len_le: u32,
}
impl WireFrameHdr {
    pub fn new(tag: u32, len: usize) -> Self {
        Self {
            tag_le: tag.to_le(),
            len_le: (len as u32).to_le(),
        }
    }
    pub fn tag(&self) -> u32 {
        u32::from_le(self.tag_le)
    }
    pub fn len(&self) -> usize {
        u32::from_le(self.len_le) as usize
    }
}

/// Hello record exchanged first on a fresh socket.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireHello {
    pub magic_le: u32,
    pub version_le: u16,
    pub role_le: u16, // 0 = server (waiter), 1 = client (caller)
}
impl WireHello {
    pub fn new(role: u16) -> Self {
        Self {
            magic_le: HELLO_MAGIC.to_le(),
            version_le: WIRE_VERSION.to_le(),
            role_le: role.to_le(),
        }
    }
    pub fn magic(&self) -> u32 {
        u32::from_le(self.magic_le)
    }
    pub fn version(&self) -> u16 {
        u16::from_le(self.version_le)
    }
    pub fn role(&self) -> u16 {
        u16::from_le(self.role_le)
    }
}

const_assert_eq!(size_of::<WireCount>(), 4);
const_assert_eq!(size_of::<WireWord>(), 8);
const_assert_eq!(size_of::<WireFrameHdr>(), 8);
const_assert_eq!(size_of::<WireHello>(), 8);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_header_is_little_endian() {
        let hdr = WireFrameHdr::new(TAG_PAYLOAD, 0x0102);
        let bytes = cast_slice(std::slice::from_ref(&hdr));
        assert_eq!(&bytes[4..8], &[0x02, 0x01, 0, 0]);
        let back: WireFrameHdr = read_record(bytes).unwrap();
        assert_eq!(back.tag(), TAG_PAYLOAD);
        assert_eq!(back.len(), 0x0102);
    }

    #[test]
    fn read_record_rejects_wrong_length() {
        let err = read_record::<WireCount>(&[1, 2, 3]).unwrap_err();
        assert!(matches!(
            err,
            M2nError::ShortTransfer {
                expected: 4,
                actual: 3
            }
        ));
    }

    #[test]
    fn version_guard() {
        let hello = WireHello::new(1);
        assert_eq!(hello.version(), WIRE_VERSION);
        assert_eq!(hello.magic(), HELLO_MAGIC);
        assert_eq!(hello.role(), 1);
    }
}
