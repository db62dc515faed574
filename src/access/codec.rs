//! Fixed-width binary encoding for hash table keys and values.

use bytes::{Buf, BufMut};

/// A type stored in a fixed number of bytes.
pub trait FixedCodec: Sized {
    const SIZE: usize;

    /// Encode into `buf`, which is exactly `SIZE` bytes.
    fn encode(&self, buf: &mut [u8]);

    /// Decode from `buf`, which is exactly `SIZE` bytes.
    fn decode(buf: &[u8]) -> Self;

    fn to_bytes(&self) -> Vec<u8> {
        let mut buf = vec![0u8; Self::SIZE];
        self.encode(&mut buf);
        buf
    }
}

/// A key with a hash that is stable across runs, so tables can be reopened.
pub trait TableKey: FixedCodec {
    fn hash_key(&self) -> u64;
}

macro_rules! int_codec {
    ($ty:ty, $put:ident, $get:ident) => {
        impl FixedCodec for $ty {
            const SIZE: usize = std::mem::size_of::<$ty>();

            fn encode(&self, mut buf: &mut [u8]) {
                buf.$put(*self);
            }

            fn decode(mut buf: &[u8]) -> Self {
                buf.$get()
            }
        }

        impl TableKey for $ty {
            // Integers hash to themselves.
            fn hash_key(&self) -> u64 {
                *self as u64
            }
        }
    };
}

int_codec!(u16, put_u16_le, get_u16_le);
int_codec!(u32, put_u32_le, get_u32_le);
int_codec!(u64, put_u64_le, get_u64_le);
int_codec!(i32, put_i32_le, get_i32_le);
int_codec!(i64, put_i64_le, get_i64_le);

impl<const N: usize> FixedCodec for [u8; N] {
    const SIZE: usize = N;

    fn encode(&self, buf: &mut [u8]) {
        buf.copy_from_slice(self);
    }

    fn decode(buf: &[u8]) -> Self {
        let mut out = [0u8; N];
        out.copy_from_slice(&buf[..N]);
        out
    }
}

impl<const N: usize> TableKey for [u8; N] {
    fn hash_key(&self) -> u64 {
        fnv1a(self)
    }
}

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// 64-bit FNV-1a.
pub fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET_BASIS, |hash, &b| {
        (hash ^ b as u64).wrapping_mul(FNV_PRIME)
    })
}
