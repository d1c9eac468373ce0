//! Conversion between typed points and object records.
//!
//! An object record is laid out as optional flags (Q), optional value (V)
//! and optional 48-bit time (T), in that order. The writers here cover the
//! combinations used by the object library: Q, QT, V, QV, QVT and the
//! check-range forms of QV and QVT, which raise the over-range flag when
//! the value had to be clamped to the wire type.
//!
//! [`ObjectCodec`] maps each group/variation of a point type onto these
//! writers and their matching readers.

use crate::error::{Dnp3Error, Result};
use crate::types::packing::{
    DoubleFloat, Int16LE, Int32LE, Packer, SingleFloat, UInt16LE, UInt32LE, UInt48LE, UInt8,
};
use crate::types::{
    lookup, Analog, ApduBuilder, Binary, ControlStatus, Counter, HeaderInfo, ObjectType, Point,
    Quality, SetpointStatus,
};

/// Conversion between a database value type and a wire type `W`.
///
/// Floating-point sources narrow explicitly with `as`; integer sources
/// widen losslessly where they can.
pub trait WireConvert<W>: Copy + PartialOrd {
    /// Convert an in-range value to the wire type.
    fn to_wire(self) -> W;

    /// Convert a wire value back to the database type.
    fn from_wire(wire: W) -> Self;
}

macro_rules! narrow_from_f64 {
    ($($wire:ty),*) => {
        $(
            impl WireConvert<$wire> for f64 {
                #[inline]
                fn to_wire(self) -> $wire {
                    self as $wire
                }

                #[inline]
                fn from_wire(wire: $wire) -> f64 {
                    wire as f64
                }
            }
        )*
    };
}

narrow_from_f64!(i16, i32, u16, u32, f32, f64);

impl WireConvert<u32> for u32 {
    #[inline]
    fn to_wire(self) -> u32 {
        self
    }

    #[inline]
    fn from_wire(wire: u32) -> u32 {
        wire
    }
}

impl WireConvert<u16> for u32 {
    #[inline]
    fn to_wire(self) -> u16 {
        self as u16
    }

    #[inline]
    fn from_wire(wire: u16) -> u32 {
        u32::from(wire)
    }
}

/// Clamp `value` to the range of packer `P`.
///
/// Returns the wire value and whether clamping occurred.
pub fn clamp<P, V>(value: V) -> (P::Type, bool)
where
    P: Packer,
    V: WireConvert<P::Type>,
{
    if value > V::from_wire(P::MAX) {
        (P::MAX, true)
    } else if value < V::from_wire(P::MIN) {
        (P::MIN, true)
    } else {
        (value.to_wire(), false)
    }
}

/// Write flags.
#[inline]
pub fn write_q<T: Point>(buf: &mut [u8], point: &T) {
    UInt8::write(buf, point.flags());
}

/// Write flags and time.
#[inline]
pub fn write_qt<T: Point>(buf: &mut [u8], point: &T) {
    write_q(buf, point);
    UInt48LE::write(&mut buf[1..], point.time());
}

/// Write the clamped value alone.
#[inline]
pub fn write_v<P, T>(buf: &mut [u8], point: &T)
where
    P: Packer,
    T: Point,
    T::Value: WireConvert<P::Type>,
{
    let (value, _) = clamp::<P, _>(point.value());
    P::write(buf, value);
}

/// Write flags and the clamped value.
#[inline]
pub fn write_qv<P, T>(buf: &mut [u8], point: &T)
where
    P: Packer,
    T: Point,
    T::Value: WireConvert<P::Type>,
{
    write_q(buf, point);
    write_v::<P, T>(&mut buf[1..], point);
}

/// Write flags, the clamped value and time.
#[inline]
pub fn write_qvt<P, T>(buf: &mut [u8], point: &T)
where
    P: Packer,
    T: Point,
    T::Value: WireConvert<P::Type>,
{
    write_qv::<P, T>(buf, point);
    UInt48LE::write(&mut buf[1 + P::SIZE..], point.time());
}

/// Write flags and value, setting the over-range flag if clamped.
#[inline]
pub fn write_check_range_qv<P, T>(buf: &mut [u8], point: &T)
where
    P: Packer,
    T: Point,
    T::Value: WireConvert<P::Type>,
{
    let (value, clamped) = clamp::<P, _>(point.value());
    let mut flags = point.flags();
    if clamped {
        flags |= Quality::OVER_RANGE_MASK;
    }
    UInt8::write(buf, flags);
    P::write(&mut buf[1..], value);
}

/// Write flags, value and time, setting the over-range flag if clamped.
#[inline]
pub fn write_check_range_qvt<P, T>(buf: &mut [u8], point: &T)
where
    P: Packer,
    T: Point,
    T::Value: WireConvert<P::Type>,
{
    write_check_range_qv::<P, T>(buf, point);
    UInt48LE::write(&mut buf[1 + P::SIZE..], point.time());
}

/// Read flags.
#[inline]
pub fn read_q(buf: &[u8]) -> Quality {
    Quality::from_raw(UInt8::read(buf))
}

/// Read a value.
#[inline]
pub fn read_v<P, V>(buf: &[u8]) -> V
where
    P: Packer,
    V: WireConvert<P::Type>,
{
    V::from_wire(P::read(buf))
}

/// Read flags and value.
#[inline]
pub fn read_qv<P, V>(buf: &[u8]) -> (Quality, V)
where
    P: Packer,
    V: WireConvert<P::Type>,
{
    (read_q(buf), read_v::<P, V>(&buf[1..]))
}

/// Read flags, value and time.
#[inline]
pub fn read_qvt<P, V>(buf: &[u8]) -> (Quality, V, i64)
where
    P: Packer,
    V: WireConvert<P::Type>,
{
    let (quality, value) = read_qv::<P, V>(buf);
    (quality, value, UInt48LE::read(&buf[1 + P::SIZE..]))
}

/// Check `len` can hold one fixed-size object of `group`/`variation`.
fn fixed_size(group: u8, variation: u8, len: usize) -> Result<usize> {
    match lookup(group, variation)?.object_type {
        ObjectType::Fixed(size) if len >= size => Ok(size),
        ObjectType::Fixed(size) => Err(Dnp3Error::invalid_object(format!(
            "g{}v{} needs {} bytes, {} available",
            group, variation, size, len
        ))),
        ObjectType::Bitfield => Err(Dnp3Error::invalid_object(format!(
            "g{}v{} is a bitfield object",
            group, variation
        ))),
    }
}

fn unsupported<T>(group: u8, variation: u8) -> Result<T> {
    Err(Dnp3Error::UnknownObject { group, variation })
}

/// Object encoding for a point type.
pub trait ObjectCodec: Point + Sized {
    /// Write one object of `group`/`variation` at the start of `buf`.
    fn write_object(&self, group: u8, variation: u8, buf: &mut [u8]) -> Result<()>;

    /// Read one object of `group`/`variation` from the start of `buf`.
    fn read_object(group: u8, variation: u8, buf: &[u8]) -> Result<Self>;

    /// State for packed (bitfield) variations, if the type has one.
    fn state_bit(&self) -> Option<bool> {
        None
    }
}

impl ObjectCodec for Binary {
    fn write_object(&self, group: u8, variation: u8, buf: &mut [u8]) -> Result<()> {
        fixed_size(group, variation, buf.len())?;
        match (group, variation) {
            (1, 2) | (2, 1) => write_q(buf, self),
            (2, 2) => write_qt(buf, self),
            (2, 3) => {
                write_q(buf, self);
                UInt16LE::write(&mut buf[1..], self.time.clamp(0, u16::MAX as i64) as u16);
            }
            _ => return unsupported(group, variation),
        }
        Ok(())
    }

    fn read_object(group: u8, variation: u8, buf: &[u8]) -> Result<Self> {
        fixed_size(group, variation, buf.len())?;
        let flags = read_q(buf);
        let time = match (group, variation) {
            (1, 2) | (2, 1) => 0,
            (2, 2) => UInt48LE::read(&buf[1..]),
            (2, 3) => UInt16LE::read(&buf[1..]) as i64,
            _ => return unsupported(group, variation),
        };
        Ok(Binary::with_time(flags.state(), flags.set_state(false), time))
    }

    fn state_bit(&self) -> Option<bool> {
        Some(self.value)
    }
}

impl ObjectCodec for ControlStatus {
    fn write_object(&self, group: u8, variation: u8, buf: &mut [u8]) -> Result<()> {
        fixed_size(group, variation, buf.len())?;
        match (group, variation) {
            (10, 2) => write_q(buf, self),
            _ => return unsupported(group, variation),
        }
        Ok(())
    }

    fn read_object(group: u8, variation: u8, buf: &[u8]) -> Result<Self> {
        fixed_size(group, variation, buf.len())?;
        match (group, variation) {
            (10, 2) => {
                let flags = read_q(buf);
                Ok(ControlStatus::with_quality(flags.state(), flags.set_state(false)))
            }
            _ => unsupported(group, variation),
        }
    }

    fn state_bit(&self) -> Option<bool> {
        Some(self.value)
    }
}

impl ObjectCodec for Analog {
    fn write_object(&self, group: u8, variation: u8, buf: &mut [u8]) -> Result<()> {
        fixed_size(group, variation, buf.len())?;
        match (group, variation) {
            (30, 1) | (32, 1) => write_check_range_qv::<Int32LE, _>(buf, self),
            (30, 2) | (32, 2) => write_check_range_qv::<Int16LE, _>(buf, self),
            (30, 3) => write_v::<Int32LE, _>(buf, self),
            (30, 4) => write_v::<Int16LE, _>(buf, self),
            (30, 5) | (32, 5) => write_check_range_qv::<SingleFloat, _>(buf, self),
            (30, 6) | (32, 6) => write_qv::<DoubleFloat, _>(buf, self),
            (32, 3) => write_check_range_qvt::<Int32LE, _>(buf, self),
            (32, 4) => write_check_range_qvt::<Int16LE, _>(buf, self),
            (32, 7) => write_check_range_qvt::<SingleFloat, _>(buf, self),
            (32, 8) => write_qvt::<DoubleFloat, _>(buf, self),
            _ => return unsupported(group, variation),
        }
        Ok(())
    }

    fn read_object(group: u8, variation: u8, buf: &[u8]) -> Result<Self> {
        fixed_size(group, variation, buf.len())?;
        let (quality, value, time) = match (group, variation) {
            (30, 1) | (32, 1) => with_no_time(read_qv::<Int32LE, f64>(buf)),
            (30, 2) | (32, 2) => with_no_time(read_qv::<Int16LE, f64>(buf)),
            (30, 3) => (Quality::Online, read_v::<Int32LE, f64>(buf), 0),
            (30, 4) => (Quality::Online, read_v::<Int16LE, f64>(buf), 0),
            (30, 5) | (32, 5) => with_no_time(read_qv::<SingleFloat, f64>(buf)),
            (30, 6) | (32, 6) => with_no_time(read_qv::<DoubleFloat, f64>(buf)),
            (32, 3) => read_qvt::<Int32LE, f64>(buf),
            (32, 4) => read_qvt::<Int16LE, f64>(buf),
            (32, 7) => read_qvt::<SingleFloat, f64>(buf),
            (32, 8) => read_qvt::<DoubleFloat, f64>(buf),
            _ => return unsupported(group, variation),
        };
        Ok(Analog::with_time(value, quality, time))
    }
}

impl ObjectCodec for Counter {
    fn write_object(&self, group: u8, variation: u8, buf: &mut [u8]) -> Result<()> {
        fixed_size(group, variation, buf.len())?;
        match (group, variation) {
            (20, 1) | (22, 1) => write_qv::<UInt32LE, _>(buf, self),
            (20, 2) | (22, 2) => write_check_range_qv::<UInt16LE, _>(buf, self),
            (20, 5) => write_v::<UInt32LE, _>(buf, self),
            (20, 6) => write_v::<UInt16LE, _>(buf, self),
            (22, 5) => write_qvt::<UInt32LE, _>(buf, self),
            (22, 6) => write_check_range_qvt::<UInt16LE, _>(buf, self),
            _ => return unsupported(group, variation),
        }
        Ok(())
    }

    fn read_object(group: u8, variation: u8, buf: &[u8]) -> Result<Self> {
        fixed_size(group, variation, buf.len())?;
        let (quality, value, time) = match (group, variation) {
            (20, 1) | (22, 1) => with_no_time(read_qv::<UInt32LE, u32>(buf)),
            (20, 2) | (22, 2) => with_no_time(read_qv::<UInt16LE, u32>(buf)),
            (20, 5) => (Quality::Online, read_v::<UInt32LE, u32>(buf), 0),
            (20, 6) => (Quality::Online, read_v::<UInt16LE, u32>(buf), 0),
            (22, 5) => read_qvt::<UInt32LE, u32>(buf),
            (22, 6) => read_qvt::<UInt16LE, u32>(buf),
            _ => return unsupported(group, variation),
        };
        Ok(Counter::with_time(value, quality, time))
    }
}

impl ObjectCodec for SetpointStatus {
    fn write_object(&self, group: u8, variation: u8, buf: &mut [u8]) -> Result<()> {
        fixed_size(group, variation, buf.len())?;
        match (group, variation) {
            (40, 1) => write_check_range_qv::<Int32LE, _>(buf, self),
            (40, 2) => write_check_range_qv::<Int16LE, _>(buf, self),
            (40, 3) => write_check_range_qv::<SingleFloat, _>(buf, self),
            (40, 4) => write_qv::<DoubleFloat, _>(buf, self),
            _ => return unsupported(group, variation),
        }
        Ok(())
    }

    fn read_object(group: u8, variation: u8, buf: &[u8]) -> Result<Self> {
        fixed_size(group, variation, buf.len())?;
        let (quality, value) = match (group, variation) {
            (40, 1) => read_qv::<Int32LE, f64>(buf),
            (40, 2) => read_qv::<Int16LE, f64>(buf),
            (40, 3) => read_qv::<SingleFloat, f64>(buf),
            (40, 4) => read_qv::<DoubleFloat, f64>(buf),
            _ => return unsupported(group, variation),
        };
        Ok(SetpointStatus::with_quality(value, quality))
    }
}

#[inline]
fn with_no_time<V>((quality, value): (Quality, V)) -> (Quality, V, i64) {
    (quality, value, 0)
}

/// Append a start-stop header for `points` beginning at index `start`.
///
/// Packed variations write each point's state bit.
pub fn write_range<T: ObjectCodec>(
    builder: &mut ApduBuilder,
    group: u8,
    variation: u8,
    start: usize,
    points: &[T],
) -> Result<()> {
    if points.is_empty() {
        return Err(Dnp3Error::argument("No points to write"));
    }

    let header = HeaderInfo::range(group, variation, start, start + points.len() - 1)?;
    match header.object_type {
        ObjectType::Bitfield => {
            let bits = points
                .iter()
                .map(|p| {
                    p.state_bit().ok_or_else(|| {
                        Dnp3Error::invalid_object(format!("g{}v{} needs a state bit", group, variation))
                    })
                })
                .collect::<Result<Vec<bool>>>()?;
            let region = builder.add_header(&header);
            for (i, bit) in bits.into_iter().enumerate() {
                if bit {
                    region[i / 8] |= 1 << (i % 8);
                }
            }
        }
        ObjectType::Fixed(size) => {
            // Validate the variation before reserving space
            if let Some(first) = points.first() {
                first.write_object(group, variation, &mut vec![0u8; size])?;
            }
            let region = builder.add_header(&header);
            for (point, chunk) in points.iter().zip(region.chunks_exact_mut(size.max(1))) {
                point.write_object(group, variation, chunk)?;
            }
        }
    }
    Ok(())
}
