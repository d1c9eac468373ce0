//! DNP3 object headers, qualifier codes and the object registry.
//!
//! Every block of application objects starts with a header:
//!
//! ```text
//! +-------+-----------+-----------+-------------------------+
//! | Group | Variation | Qualifier | Range (0, 1, 2, 4, 8 B) |
//! +-------+-----------+-----------+-------------------------+
//! ```
//!
//! The qualifier decides how the range field is read and whether each
//! object carries an index prefix.

use bytes::{BufMut, BytesMut};

use crate::error::{Dnp3Error, Result};
use crate::types::packing::{Packer, UInt16LE, UInt32LE, UInt8};

/// Object header qualifier codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum QualifierCode {
    /// 1-byte start and stop indices
    Uint8StartStop = 0x00,
    /// 2-byte start and stop indices
    Uint16StartStop = 0x01,
    /// 4-byte start and stop indices
    Uint32StartStop = 0x02,
    /// All objects of the type, no range field
    AllObjects = 0x06,
    /// 1-byte count
    Uint8Count = 0x07,
    /// 2-byte count
    Uint16Count = 0x08,
    /// 4-byte count
    Uint32Count = 0x09,
    /// 1-byte count, 1-byte index prefix per object
    Uint8CountUint8Index = 0x17,
    /// 2-byte count, 2-byte index prefix per object
    Uint16CountUint16Index = 0x28,
    /// 4-byte count, 4-byte index prefix per object
    Uint32CountUint32Index = 0x39,
}

impl QualifierCode {
    /// Decode a qualifier byte.
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0x00 => Ok(Self::Uint8StartStop),
            0x01 => Ok(Self::Uint16StartStop),
            0x02 => Ok(Self::Uint32StartStop),
            0x06 => Ok(Self::AllObjects),
            0x07 => Ok(Self::Uint8Count),
            0x08 => Ok(Self::Uint16Count),
            0x09 => Ok(Self::Uint32Count),
            0x17 => Ok(Self::Uint8CountUint8Index),
            0x28 => Ok(Self::Uint16CountUint16Index),
            0x39 => Ok(Self::Uint32CountUint32Index),
            _ => Err(Dnp3Error::UnknownQualifier(value)),
        }
    }

    /// Get the raw qualifier byte.
    #[inline]
    pub const fn as_u8(&self) -> u8 {
        *self as u8
    }

    /// Width of each start/stop index or of the count field.
    #[inline]
    pub const fn field_size(&self) -> usize {
        match self {
            Self::AllObjects => 0,
            Self::Uint8StartStop | Self::Uint8Count | Self::Uint8CountUint8Index => 1,
            Self::Uint16StartStop | Self::Uint16Count | Self::Uint16CountUint16Index => 2,
            Self::Uint32StartStop | Self::Uint32Count | Self::Uint32CountUint32Index => 4,
        }
    }

    /// Total size of the range field following the qualifier.
    #[inline]
    pub const fn range_size(&self) -> usize {
        if self.is_range() {
            2 * self.field_size()
        } else {
            self.field_size()
        }
    }

    /// Size of the index prefix in front of every object.
    #[inline]
    pub const fn prefix_size(&self) -> usize {
        match self {
            Self::Uint8CountUint8Index => 1,
            Self::Uint16CountUint16Index => 2,
            Self::Uint32CountUint32Index => 4,
            _ => 0,
        }
    }

    /// Check if this is a start-stop qualifier.
    #[inline]
    pub const fn is_range(&self) -> bool {
        matches!(
            self,
            Self::Uint8StartStop | Self::Uint16StartStop | Self::Uint32StartStop
        )
    }

    /// Check if objects carry an index prefix.
    #[inline]
    pub const fn has_index_prefix(&self) -> bool {
        self.prefix_size() > 0
    }
}

impl std::fmt::Display for QualifierCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:02X}", self.as_u8())
    }
}

/// Layout of the objects that follow a header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectType {
    /// Each object occupies a fixed number of bytes (0 for objects with
    /// no data, such as class data requests)
    Fixed(usize),
    /// Objects are single bits packed into a shared region
    Bitfield,
}

impl ObjectType {
    /// Size of the object region for `count` objects with the given prefix.
    ///
    /// A bitfield region has a single prefix in front of the packed bits.
    pub const fn data_size(&self, count: usize, prefix_size: usize) -> usize {
        match self {
            Self::Fixed(size) => count * (prefix_size + *size),
            Self::Bitfield => {
                if count == 0 {
                    0
                } else {
                    prefix_size + count.div_ceil(8)
                }
            }
        }
    }
}

/// Registry entry for one group/variation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectDescriptor {
    /// Object group
    pub group: u8,
    /// Object variation
    pub variation: u8,
    /// Layout on the wire
    pub object_type: ObjectType,
    /// Short description
    pub description: &'static str,
}

macro_rules! objects {
    ($(($g:literal, $v:literal, $ty:expr, $desc:literal)),* $(,)?) => {
        /// Every object known to this stack.
        pub const OBJECTS: &[ObjectDescriptor] = &[
            $(ObjectDescriptor { group: $g, variation: $v, object_type: $ty, description: $desc }),*
        ];
    };
}

use ObjectType::{Bitfield, Fixed};

objects![
    (1, 1, Bitfield, "Binary input packed format"),
    (1, 2, Fixed(1), "Binary input with flags"),
    (2, 1, Fixed(1), "Binary input event without time"),
    (2, 2, Fixed(7), "Binary input event with absolute time"),
    (2, 3, Fixed(3), "Binary input event with relative time"),
    (10, 1, Bitfield, "Binary output packed format"),
    (10, 2, Fixed(1), "Binary output status with flags"),
    (12, 1, Fixed(11), "Control relay output block"),
    (20, 1, Fixed(5), "32-bit counter with flags"),
    (20, 2, Fixed(3), "16-bit counter with flags"),
    (20, 5, Fixed(4), "32-bit counter without flags"),
    (20, 6, Fixed(2), "16-bit counter without flags"),
    (22, 1, Fixed(5), "32-bit counter event without time"),
    (22, 2, Fixed(3), "16-bit counter event without time"),
    (22, 5, Fixed(11), "32-bit counter event with time"),
    (22, 6, Fixed(9), "16-bit counter event with time"),
    (30, 1, Fixed(5), "32-bit analog input with flags"),
    (30, 2, Fixed(3), "16-bit analog input with flags"),
    (30, 3, Fixed(4), "32-bit analog input without flags"),
    (30, 4, Fixed(2), "16-bit analog input without flags"),
    (30, 5, Fixed(5), "Single-precision analog input with flags"),
    (30, 6, Fixed(9), "Double-precision analog input with flags"),
    (32, 1, Fixed(5), "32-bit analog event without time"),
    (32, 2, Fixed(3), "16-bit analog event without time"),
    (32, 3, Fixed(11), "32-bit analog event with time"),
    (32, 4, Fixed(9), "16-bit analog event with time"),
    (32, 5, Fixed(5), "Single-precision analog event without time"),
    (32, 6, Fixed(9), "Double-precision analog event without time"),
    (32, 7, Fixed(11), "Single-precision analog event with time"),
    (32, 8, Fixed(15), "Double-precision analog event with time"),
    (40, 1, Fixed(5), "32-bit analog output status with flags"),
    (40, 2, Fixed(3), "16-bit analog output status with flags"),
    (40, 3, Fixed(5), "Single-precision analog output status with flags"),
    (40, 4, Fixed(9), "Double-precision analog output status with flags"),
    (41, 1, Fixed(5), "32-bit analog output block"),
    (41, 2, Fixed(3), "16-bit analog output block"),
    (41, 3, Fixed(5), "Single-precision analog output block"),
    (41, 4, Fixed(9), "Double-precision analog output block"),
    (50, 1, Fixed(6), "Time and date"),
    (60, 1, Fixed(0), "Class 0 data"),
    (60, 2, Fixed(0), "Class 1 data"),
    (60, 3, Fixed(0), "Class 2 data"),
    (60, 4, Fixed(0), "Class 3 data"),
    (80, 1, Bitfield, "Internal indications"),
];

/// Look up a group/variation in the registry.
pub fn lookup(group: u8, variation: u8) -> Result<&'static ObjectDescriptor> {
    OBJECTS
        .iter()
        .find(|d| d.group == group && d.variation == variation)
        .ok_or(Dnp3Error::UnknownObject { group, variation })
}

/// Decoded object header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderInfo {
    /// Object group
    pub group: u8,
    /// Object variation
    pub variation: u8,
    /// Qualifier code
    pub qualifier: QualifierCode,
    /// Layout of the objects
    pub object_type: ObjectType,
    /// First index for start-stop qualifiers, 0 otherwise
    pub start: usize,
    /// Number of objects following the header
    pub count: usize,
}

impl HeaderInfo {
    /// Fixed part of an object header (group, variation, qualifier).
    pub const FIXED_SIZE: usize = 3;

    /// Create a start-stop header covering `start..=stop`.
    pub fn range(group: u8, variation: u8, start: usize, stop: usize) -> Result<Self> {
        if stop < start {
            return Err(Dnp3Error::argument(format!("Stop {} precedes start {}", stop, start)));
        }
        if stop > u32::MAX as usize {
            return Err(Dnp3Error::argument(format!("Stop {} exceeds a 4-byte index", stop)));
        }
        let qualifier = if stop <= u8::MAX as usize {
            QualifierCode::Uint8StartStop
        } else if stop <= u16::MAX as usize {
            QualifierCode::Uint16StartStop
        } else {
            QualifierCode::Uint32StartStop
        };
        Ok(Self {
            group,
            variation,
            qualifier,
            object_type: lookup(group, variation)?.object_type,
            start,
            count: stop - start + 1,
        })
    }

    /// Create a header with no range field (qualifier 0x06).
    pub fn all_objects(group: u8, variation: u8) -> Result<Self> {
        Ok(Self {
            group,
            variation,
            qualifier: QualifierCode::AllObjects,
            object_type: lookup(group, variation)?.object_type,
            start: 0,
            count: 0,
        })
    }

    /// Create a count header, optionally with index prefixes.
    pub fn count(group: u8, variation: u8, qualifier: QualifierCode, count: usize) -> Result<Self> {
        if qualifier.is_range() || qualifier == QualifierCode::AllObjects {
            return Err(Dnp3Error::argument(format!("Qualifier {} is not a count qualifier", qualifier)));
        }
        let max = field_max(qualifier.field_size());
        if count > max {
            return Err(Dnp3Error::argument(format!(
                "Count {} does not fit qualifier {} (max {})",
                count, qualifier, max
            )));
        }
        Ok(Self {
            group,
            variation,
            qualifier,
            object_type: lookup(group, variation)?.object_type,
            start: 0,
            count,
        })
    }

    /// Parse a header from the start of `buf`.
    ///
    /// Only the header itself is read; the caller checks the object data
    /// against [`HeaderInfo::data_size`].
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < Self::FIXED_SIZE {
            return Err(Dnp3Error::invalid_object("Object header too short"));
        }

        let group = buf[0];
        let variation = buf[1];
        let qualifier = QualifierCode::from_u8(buf[2])?;
        let object_type = lookup(group, variation)?.object_type;

        if buf.len() < Self::FIXED_SIZE + qualifier.range_size() {
            return Err(Dnp3Error::invalid_object(format!(
                "Range field truncated for g{}v{} qualifier {}",
                group, variation, qualifier
            )));
        }

        let field = &buf[Self::FIXED_SIZE..];
        let width = qualifier.field_size();
        let (start, count) = if qualifier.is_range() {
            let start = read_field(field, width);
            let stop = read_field(&field[width..], width);
            if stop < start {
                return Err(Dnp3Error::invalid_object(format!(
                    "Stop index {} precedes start index {}",
                    stop, start
                )));
            }
            (start, stop - start + 1)
        } else if width > 0 {
            (0, read_field(field, width))
        } else {
            (0, 0)
        };

        Ok(Self {
            group,
            variation,
            qualifier,
            object_type,
            start,
            count,
        })
    }

    /// Size of the header including its range field.
    #[inline]
    pub const fn header_size(&self) -> usize {
        Self::FIXED_SIZE + self.qualifier.range_size()
    }

    /// Size of the object data following the header.
    #[inline]
    pub const fn data_size(&self) -> usize {
        self.object_type.data_size(self.count, self.qualifier.prefix_size())
    }

    /// Last index covered by a start-stop header.
    #[inline]
    pub const fn stop(&self) -> usize {
        (self.start + self.count).saturating_sub(1)
    }

    /// Size of one object, 0 for bitfields.
    #[inline]
    pub const fn object_size(&self) -> usize {
        match self.object_type {
            ObjectType::Fixed(size) => size,
            ObjectType::Bitfield => 0,
        }
    }

    /// Write the header and range field.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.group);
        buf.put_u8(self.variation);
        buf.put_u8(self.qualifier.as_u8());

        let width = self.qualifier.field_size();
        if self.qualifier.is_range() {
            put_field(buf, width, self.start);
            put_field(buf, width, self.stop());
        } else if width > 0 {
            put_field(buf, width, self.count);
        }
    }
}

impl std::fmt::Display for HeaderInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "g{}v{} q={} ", self.group, self.variation, self.qualifier)?;
        if self.qualifier.is_range() {
            write!(f, "[{}, {}]", self.start, self.stop())
        } else {
            write!(f, "count={}", self.count)
        }
    }
}

/// Read a 1, 2 or 4 byte little-endian unsigned field.
pub(crate) fn read_field(buf: &[u8], width: usize) -> usize {
    match width {
        1 => UInt8::read(buf) as usize,
        2 => UInt16LE::read(buf) as usize,
        4 => UInt32LE::read(buf) as usize,
        _ => 0,
    }
}

/// Largest value a 1, 2 or 4 byte field can hold.
const fn field_max(width: usize) -> usize {
    match width {
        1 => u8::MAX as usize,
        2 => u16::MAX as usize,
        4 => u32::MAX as usize,
        _ => 0,
    }
}

fn put_field(buf: &mut BytesMut, width: usize, value: usize) {
    match width {
        1 => buf.put_u8(value as u8),
        2 => buf.put_u16_le(value as u16),
        4 => buf.put_u32_le(value as u32),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hex::parse_hex;

    #[test]
    fn test_qualifier_from_u8() {
        for code in [0x00, 0x01, 0x02, 0x06, 0x07, 0x08, 0x09, 0x17, 0x28, 0x39] {
            assert_eq!(QualifierCode::from_u8(code).unwrap().as_u8(), code);
        }
        assert!(matches!(
            QualifierCode::from_u8(0x5B),
            Err(Dnp3Error::UnknownQualifier(0x5B))
        ));
    }

    #[test]
    fn test_qualifier_sizes() {
        assert_eq!(QualifierCode::Uint16StartStop.range_size(), 4);
        assert_eq!(QualifierCode::Uint32Count.range_size(), 4);
        assert_eq!(QualifierCode::AllObjects.range_size(), 0);
        assert_eq!(QualifierCode::Uint16CountUint16Index.prefix_size(), 2);
        assert_eq!(QualifierCode::Uint8Count.prefix_size(), 0);
        assert!(QualifierCode::Uint8CountUint8Index.has_index_prefix());
    }

    #[test]
    fn test_registry_lookup() {
        assert_eq!(lookup(30, 1).unwrap().object_type, ObjectType::Fixed(5));
        assert_eq!(lookup(1, 1).unwrap().object_type, ObjectType::Bitfield);
        assert_eq!(lookup(32, 8).unwrap().object_type, ObjectType::Fixed(15));
        assert!(matches!(
            lookup(30, 9),
            Err(Dnp3Error::UnknownObject { group: 30, variation: 9 })
        ));
    }

    #[test]
    fn test_registry_has_no_duplicates() {
        for (i, a) in OBJECTS.iter().enumerate() {
            for b in &OBJECTS[i + 1..] {
                assert!(a.group != b.group || a.variation != b.variation);
            }
        }
    }

    #[test]
    fn test_parse_range_header() {
        let bytes = parse_hex("1E 01 00 05 07").unwrap();
        let header = HeaderInfo::parse(&bytes).unwrap();
        assert_eq!(header.group, 30);
        assert_eq!(header.qualifier, QualifierCode::Uint8StartStop);
        assert_eq!(header.start, 5);
        assert_eq!(header.stop(), 7);
        assert_eq!(header.count, 3);
        assert_eq!(header.header_size(), 5);
        assert_eq!(header.data_size(), 15);
    }

    #[test]
    fn test_parse_prefixed_header() {
        let bytes = parse_hex("20 01 28 02 00").unwrap();
        let header = HeaderInfo::parse(&bytes).unwrap();
        assert_eq!(header.qualifier, QualifierCode::Uint16CountUint16Index);
        assert_eq!(header.count, 2);
        assert_eq!(header.start, 0);
        assert_eq!(header.data_size(), 2 * (2 + 5));
    }

    #[test]
    fn test_parse_all_objects() {
        let header = HeaderInfo::parse(&parse_hex("3C 02 06").unwrap()).unwrap();
        assert_eq!(header.count, 0);
        assert_eq!(header.header_size(), 3);
        assert_eq!(header.data_size(), 0);
    }

    #[test]
    fn test_parse_bitfield_size() {
        let header = HeaderInfo::parse(&parse_hex("01 01 00 00 09").unwrap()).unwrap();
        assert_eq!(header.count, 10);
        assert_eq!(header.data_size(), 2);
    }

    #[test]
    fn test_parse_errors() {
        assert!(HeaderInfo::parse(&[0x1E, 0x01]).is_err());
        // Range truncated
        assert!(HeaderInfo::parse(&parse_hex("1E 01 01 00 00 05").unwrap()).is_err());
        // Stop before start
        assert!(HeaderInfo::parse(&parse_hex("1E 01 00 07 05").unwrap()).is_err());
        // Unknown qualifier
        assert!(matches!(
            HeaderInfo::parse(&parse_hex("1E 01 5B").unwrap()),
            Err(Dnp3Error::UnknownQualifier(0x5B))
        ));
    }

    #[test]
    fn test_encode_chooses_qualifier_width() {
        let mut buf = BytesMut::new();
        HeaderInfo::range(30, 1, 5, 7).unwrap().encode(&mut buf);
        assert_eq!(&buf[..], &parse_hex("1E 01 00 05 07").unwrap()[..]);

        buf.clear();
        HeaderInfo::range(1, 2, 0, 300).unwrap().encode(&mut buf);
        assert_eq!(&buf[..], &parse_hex("01 02 01 00 00 2C 01").unwrap()[..]);

        buf.clear();
        HeaderInfo::all_objects(60, 1).unwrap().encode(&mut buf);
        assert_eq!(&buf[..], &[0x3C, 0x01, 0x06]);

        buf.clear();
        HeaderInfo::count(32, 1, QualifierCode::Uint8CountUint8Index, 2)
            .unwrap()
            .encode(&mut buf);
        assert_eq!(&buf[..], &[0x20, 0x01, 0x17, 0x02]);
    }

    #[test]
    fn test_encode_parse_agree() {
        let header = HeaderInfo::range(20, 1, 1000, 1010).unwrap();
        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        assert_eq!(buf.len(), header.header_size());
        assert_eq!(HeaderInfo::parse(&buf).unwrap(), header);
    }

    #[test]
    fn test_constructor_errors() {
        assert!(HeaderInfo::range(30, 1, 8, 7).is_err());
        assert!(HeaderInfo::count(30, 1, QualifierCode::Uint8StartStop, 1).is_err());
        assert!(HeaderInfo::all_objects(99, 1).is_err());
    }

    #[test]
    fn test_count_must_fit_field() {
        assert!(HeaderInfo::count(30, 1, QualifierCode::Uint8Count, 255).is_ok());
        assert!(matches!(
            HeaderInfo::count(30, 1, QualifierCode::Uint8Count, 300),
            Err(Dnp3Error::Argument { .. })
        ));
        assert!(HeaderInfo::count(30, 1, QualifierCode::Uint16CountUint16Index, 70_000).is_err());

        let header = HeaderInfo::count(30, 1, QualifierCode::Uint16Count, 300).unwrap();
        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        assert_eq!(HeaderInfo::parse(&buf).unwrap().count, 300);
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn test_range_stop_must_fit_field() {
        let stop = u32::MAX as usize;
        assert_eq!(
            HeaderInfo::range(30, 1, stop - 1, stop).unwrap().qualifier,
            QualifierCode::Uint32StartStop
        );
        assert!(HeaderInfo::range(30, 1, 0, stop + 1).is_err());
    }

    #[test]
    fn test_display() {
        let header = HeaderInfo::range(30, 1, 5, 7).unwrap();
        assert_eq!(header.to_string(), "g30v1 q=0x00 [5, 7]");
    }
}
