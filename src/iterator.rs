//! Forward-only cursor over application objects.
//!
//! An [`ObjectReadIterator`] borrows the object region that follows one
//! object header and walks it without copying. [`HeaderReader`] splits an
//! APDU body into consecutive headers and hands out one iterator per header.

use tracing::trace;

use crate::error::{Dnp3Error, Result};
use crate::types::packing::{Packer, UInt16LE, UInt32LE, UInt8};
use crate::types::{HeaderInfo, ObjectType, QualifierCode};

/// Per-object information produced by the iterator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ObjectInfo {
    index: usize,
    start: usize,
}

impl ObjectInfo {
    /// Device-based index of the object.
    #[inline]
    pub const fn index(&self) -> usize {
        self.index
    }

    /// Index of the first object in a bitfield collection.
    #[inline]
    pub const fn start(&self) -> usize {
        self.start
    }
}

/// Cursor over the objects of one header.
#[derive(Debug, Clone)]
pub struct ObjectReadIterator<'a> {
    header: HeaderInfo,
    data: &'a [u8],
    has_data: bool,
    current: usize,
    prefix_pos: usize,
    info: ObjectInfo,
}

impl<'a> ObjectReadIterator<'a> {
    /// Create an iterator for `header`.
    ///
    /// `data` is the buffer following the header, `None` for headers that
    /// carry no object data (read requests). Only `header.data_size()`
    /// bytes are borrowed; a shorter buffer is an error.
    pub fn new(header: HeaderInfo, data: Option<&'a [u8]>) -> Result<Self> {
        let size = header.data_size();
        let (data, has_data) = match data {
            Some(buf) if buf.len() < size => {
                return Err(Dnp3Error::invalid_object(format!(
                    "{} needs {} bytes of object data, {} available",
                    header,
                    size,
                    buf.len()
                )));
            }
            Some(buf) => (&buf[..size], size > 0),
            None => (&[][..], false),
        };

        let mut iter = Self {
            header,
            data,
            has_data,
            current: 0,
            prefix_pos: 0,
            info: ObjectInfo::default(),
        };
        if !iter.is_end() {
            iter.set_object_info();
        }
        Ok(iter)
    }

    /// Check if the header carries object data.
    #[inline]
    pub fn has_data(&self) -> bool {
        self.has_data
    }

    /// The header this iterator walks.
    #[inline]
    pub fn header(&self) -> &HeaderInfo {
        &self.header
    }

    /// Number of objects under the header.
    #[inline]
    pub fn count(&self) -> usize {
        self.header.count
    }

    /// Check if every object has been visited.
    #[inline]
    pub fn is_end(&self) -> bool {
        self.current >= self.count()
    }

    /// Info of the current object.
    pub fn info(&self) -> Result<&ObjectInfo> {
        if self.is_end() {
            return Err(Dnp3Error::iterator_out_of_bounds());
        }
        Ok(&self.info)
    }

    /// Data of the current object.
    ///
    /// For fixed-size objects this is exactly one object. For bitfields it
    /// is the shared bit region; the object's bit is `index - start`.
    pub fn data(&self) -> Result<&'a [u8]> {
        if self.is_end() {
            return Err(Dnp3Error::iterator_out_of_bounds());
        }
        if !self.has_data {
            return Err(Dnp3Error::iterator_no_data());
        }

        let data: &'a [u8] = self.data;
        let pos = self.prefix_pos + self.header.qualifier.prefix_size();
        match self.header.object_type {
            ObjectType::Fixed(size) => Ok(&data[pos..pos + size]),
            ObjectType::Bitfield => Ok(&data[pos..]),
        }
    }

    /// Bit of the current bitfield object.
    pub fn bit(&self) -> Result<bool> {
        let region = self.data()?;
        let offset = self.info.index - self.info.start;
        Ok(region[offset / 8] & (1 << (offset % 8)) != 0)
    }

    /// Move to the next object.
    pub fn advance(&mut self) -> Result<()> {
        if self.is_end() {
            return Err(Dnp3Error::iterator_out_of_bounds());
        }

        self.current += 1;

        if !self.is_end() {
            // Bitfield objects share one region behind a single prefix
            if let ObjectType::Fixed(size) = self.header.object_type {
                self.prefix_pos += self.header.qualifier.prefix_size() + size;
            }
            self.set_object_info();
        }
        Ok(())
    }

    /// Move to the next object, returning the iterator as it was before.
    pub fn advance_post(&mut self) -> Result<Self> {
        let snapshot = self.clone();
        self.advance()?;
        Ok(snapshot)
    }

    fn set_object_info(&mut self) {
        let prefix = self.read_prefix();
        let (index, start) = match (self.header.object_type, prefix) {
            (ObjectType::Bitfield, Some(first)) => (first + self.current, first),
            (_, Some(index)) => (index, 0),
            (_, None) if self.header.qualifier.is_range() => {
                (self.header.start + self.current, self.header.start)
            }
            (_, None) => (self.current, 0),
        };
        self.info = ObjectInfo { index, start };
        trace!(group = self.header.group, variation = self.header.variation, index, "object");
    }

    fn read_prefix(&self) -> Option<usize> {
        if !self.has_data {
            return None;
        }
        let buf = &self.data[self.prefix_pos..];
        match self.header.qualifier {
            QualifierCode::Uint8CountUint8Index => Some(UInt8::read(buf) as usize),
            QualifierCode::Uint16CountUint16Index => Some(UInt16LE::read(buf) as usize),
            QualifierCode::Uint32CountUint32Index => Some(UInt32LE::read(buf) as usize),
            _ => None,
        }
    }
}

/// Splits an APDU body into object headers.
///
/// Yields one [`ObjectReadIterator`] per header. After the first error
/// the reader is exhausted.
#[derive(Debug, Clone)]
pub struct HeaderReader<'a> {
    buf: &'a [u8],
    pos: usize,
    with_data: bool,
}

impl<'a> HeaderReader<'a> {
    /// Reader for headers followed by object data (responses, writes).
    pub fn objects(body: &'a [u8]) -> Self {
        Self {
            buf: body,
            pos: 0,
            with_data: true,
        }
    }

    /// Reader for headers without object data (read requests).
    pub fn requests(body: &'a [u8]) -> Self {
        Self {
            buf: body,
            pos: 0,
            with_data: false,
        }
    }

    /// Bytes not yet consumed.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn read_next(&mut self) -> Result<ObjectReadIterator<'a>> {
        let buf: &'a [u8] = self.buf;
        let rest = &buf[self.pos..];
        let header = HeaderInfo::parse(rest)?;
        let after = &rest[header.header_size()..];

        if self.with_data {
            let iter = ObjectReadIterator::new(header, Some(after))?;
            self.pos += header.header_size() + header.data_size();
            Ok(iter)
        } else {
            self.pos += header.header_size();
            ObjectReadIterator::new(header, None)
        }
    }
}

impl<'a> Iterator for HeaderReader<'a> {
    type Item = Result<ObjectReadIterator<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.buf.len() {
            return None;
        }
        let result = self.read_next();
        if result.is_err() {
            self.pos = self.buf.len();
        }
        Some(result)
    }
}
