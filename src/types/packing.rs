//! Fixed-width packing and unpacking primitives.
//!
//! Every wire structure in the stack is read and written through these
//! packers. They perform no bounds checking beyond slice indexing: callers
//! guarantee that `buf.len() >= SIZE`, and a short buffer panics.
//!
//! Floats are reinterpreted from their little-endian IEEE-754 bit patterns
//! with `from_bits`, which is independent of host word order, so no special
//! handling for mixed-endian double layouts is needed.

/// A fixed-width wire field codec.
pub trait Packer {
    /// Native type of the field
    type Type: Copy + PartialOrd;
    /// Encoded width in bytes
    const SIZE: usize;
    /// Smallest representable value
    const MIN: Self::Type;
    /// Largest representable value
    const MAX: Self::Type;

    /// Read a value from the start of `buf`.
    ///
    /// # Panics
    ///
    /// Panics if `buf` is shorter than `SIZE`.
    fn read(buf: &[u8]) -> Self::Type;

    /// Write a value to the start of `buf`.
    ///
    /// # Panics
    ///
    /// Panics if `buf` is shorter than `SIZE`.
    fn write(buf: &mut [u8], value: Self::Type);
}

macro_rules! int_packer {
    ($(#[$doc:meta])* $name:ident, $ty:ty, $size:literal, $from:ident, $to:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub struct $name;

        impl Packer for $name {
            type Type = $ty;
            const SIZE: usize = $size;
            const MIN: $ty = <$ty>::MIN;
            const MAX: $ty = <$ty>::MAX;

            #[inline]
            fn read(buf: &[u8]) -> $ty {
                let mut bytes = [0u8; $size];
                bytes.copy_from_slice(&buf[..$size]);
                <$ty>::$from(bytes)
            }

            #[inline]
            fn write(buf: &mut [u8], value: $ty) {
                buf[..$size].copy_from_slice(&value.$to());
            }
        }
    };
}

int_packer!(
    /// Unsigned 8-bit
    UInt8, u8, 1, from_le_bytes, to_le_bytes
);
int_packer!(
    /// Signed 16-bit, little-endian
    Int16LE, i16, 2, from_le_bytes, to_le_bytes
);
int_packer!(
    /// Unsigned 16-bit, little-endian
    UInt16LE, u16, 2, from_le_bytes, to_le_bytes
);
int_packer!(
    /// Signed 32-bit, little-endian
    Int32LE, i32, 4, from_le_bytes, to_le_bytes
);
int_packer!(
    /// Unsigned 32-bit, little-endian
    UInt32LE, u32, 4, from_le_bytes, to_le_bytes
);
int_packer!(
    /// Signed 16-bit, big-endian
    Int16BE, i16, 2, from_be_bytes, to_be_bytes
);
int_packer!(
    /// Unsigned 16-bit, big-endian
    UInt16BE, u16, 2, from_be_bytes, to_be_bytes
);
int_packer!(
    /// Signed 32-bit, big-endian
    Int32BE, i32, 4, from_be_bytes, to_be_bytes
);
int_packer!(
    /// Unsigned 32-bit, big-endian
    UInt32BE, u32, 4, from_be_bytes, to_be_bytes
);
int_packer!(
    /// Signed 64-bit, big-endian
    Int64BE, i64, 8, from_be_bytes, to_be_bytes
);
int_packer!(
    /// Unsigned 64-bit, big-endian
    UInt64BE, u64, 8, from_be_bytes, to_be_bytes
);

/// Unsigned 48-bit little-endian value held in an `i64`.
///
/// Used for DNP3 absolute time (milliseconds since 1970). Writes above
/// `2^48 - 1` are clamped to that value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UInt48LE;

impl Packer for UInt48LE {
    type Type = i64;
    const SIZE: usize = 6;
    const MIN: i64 = 0;
    const MAX: i64 = (1 << 48) - 1;

    #[inline]
    fn read(buf: &[u8]) -> i64 {
        let mut bytes = [0u8; 8];
        bytes[..6].copy_from_slice(&buf[..6]);
        i64::from_le_bytes(bytes)
    }

    #[inline]
    fn write(buf: &mut [u8], value: i64) {
        let value = value.min(Self::MAX);
        buf[..6].copy_from_slice(&value.to_le_bytes()[..6]);
    }
}

/// IEEE-754 single precision, little-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SingleFloat;

impl Packer for SingleFloat {
    type Type = f32;
    const SIZE: usize = 4;
    const MIN: f32 = -f32::MAX;
    const MAX: f32 = f32::MAX;

    #[inline]
    fn read(buf: &[u8]) -> f32 {
        f32::from_bits(UInt32LE::read(buf))
    }

    #[inline]
    fn write(buf: &mut [u8], value: f32) {
        UInt32LE::write(buf, value.to_bits());
    }
}

/// IEEE-754 double precision, little-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DoubleFloat;

impl Packer for DoubleFloat {
    type Type = f64;
    const SIZE: usize = 8;
    const MIN: f64 = -f64::MAX;
    const MAX: f64 = f64::MAX;

    #[inline]
    fn read(buf: &[u8]) -> f64 {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&buf[..8]);
        f64::from_le_bytes(bytes)
    }

    #[inline]
    fn write(buf: &mut [u8], value: f64) {
        buf[..8].copy_from_slice(&value.to_le_bytes());
    }
}
