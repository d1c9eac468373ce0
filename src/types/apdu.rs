//! DNP3 application layer header and APDU builder.
//!
//! ```text
//! Request:   +---------+----------+------------------
//!            | Control | Function | Object headers...
//!            +---------+----------+------------------
//! Response:  +---------+----------+------+------+------------------
//!            | Control | Function | IIN1 | IIN2 | Object headers...
//!            +---------+----------+------+------+------------------
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Dnp3Error, Result};
use crate::types::objects::{HeaderInfo, QualifierCode};
use crate::types::PointClass;

/// Application control octet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AppControl {
    /// First fragment of a message
    pub fir: bool,
    /// Final fragment of a message
    pub fin: bool,
    /// Confirmation requested
    pub con: bool,
    /// Unsolicited response
    pub uns: bool,
    /// Sequence number (0-15)
    pub seq: u8,
}

impl AppControl {
    pub const FIR_MASK: u8 = 0x80;
    pub const FIN_MASK: u8 = 0x40;
    pub const CON_MASK: u8 = 0x20;
    pub const UNS_MASK: u8 = 0x10;
    pub const SEQ_MASK: u8 = 0x0F;

    /// Control for a single-fragment request with the given sequence.
    #[inline]
    pub const fn request(seq: u8) -> Self {
        Self {
            fir: true,
            fin: true,
            con: false,
            uns: false,
            seq: seq & Self::SEQ_MASK,
        }
    }

    /// Decode a control octet.
    #[inline]
    pub const fn from_u8(value: u8) -> Self {
        Self {
            fir: value & Self::FIR_MASK != 0,
            fin: value & Self::FIN_MASK != 0,
            con: value & Self::CON_MASK != 0,
            uns: value & Self::UNS_MASK != 0,
            seq: value & Self::SEQ_MASK,
        }
    }

    /// Encode to a control octet.
    #[inline]
    pub const fn as_u8(&self) -> u8 {
        let mut value = self.seq & Self::SEQ_MASK;
        if self.fir {
            value |= Self::FIR_MASK;
        }
        if self.fin {
            value |= Self::FIN_MASK;
        }
        if self.con {
            value |= Self::CON_MASK;
        }
        if self.uns {
            value |= Self::UNS_MASK;
        }
        value
    }
}

/// Application layer function codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FunctionCode {
    Confirm = 0x00,
    Read = 0x01,
    Write = 0x02,
    Select = 0x03,
    Operate = 0x04,
    DirectOperate = 0x05,
    DirectOperateNoAck = 0x06,
    ImmediateFreeze = 0x07,
    ImmediateFreezeNoAck = 0x08,
    FreezeClear = 0x09,
    FreezeClearNoAck = 0x0A,
    ColdRestart = 0x0D,
    WarmRestart = 0x0E,
    EnableUnsolicited = 0x14,
    DisableUnsolicited = 0x15,
    AssignClass = 0x16,
    DelayMeasure = 0x17,
    Response = 0x81,
    UnsolicitedResponse = 0x82,
}

impl FunctionCode {
    /// Decode a function code byte.
    pub fn from_u8(value: u8) -> Result<Self> {
        let code = match value {
            0x00 => Self::Confirm,
            0x01 => Self::Read,
            0x02 => Self::Write,
            0x03 => Self::Select,
            0x04 => Self::Operate,
            0x05 => Self::DirectOperate,
            0x06 => Self::DirectOperateNoAck,
            0x07 => Self::ImmediateFreeze,
            0x08 => Self::ImmediateFreezeNoAck,
            0x09 => Self::FreezeClear,
            0x0A => Self::FreezeClearNoAck,
            0x0D => Self::ColdRestart,
            0x0E => Self::WarmRestart,
            0x14 => Self::EnableUnsolicited,
            0x15 => Self::DisableUnsolicited,
            0x16 => Self::AssignClass,
            0x17 => Self::DelayMeasure,
            0x81 => Self::Response,
            0x82 => Self::UnsolicitedResponse,
            _ => return Err(Dnp3Error::UnknownFunctionCode(value)),
        };
        Ok(code)
    }

    /// Get the raw byte.
    #[inline]
    pub const fn as_u8(&self) -> u8 {
        *self as u8
    }

    /// Check if this function is sent by an outstation and carries IIN.
    #[inline]
    pub const fn is_response(&self) -> bool {
        matches!(self, Self::Response | Self::UnsolicitedResponse)
    }
}

/// Internal indications returned by an outstation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Iin {
    /// First octet
    pub iin1: u8,
    /// Second octet
    pub iin2: u8,
}

impl Iin {
    // IIN1
    pub const ALL_STATIONS: u8 = 0x01;
    pub const CLASS1_EVENTS: u8 = 0x02;
    pub const CLASS2_EVENTS: u8 = 0x04;
    pub const CLASS3_EVENTS: u8 = 0x08;
    pub const NEED_TIME: u8 = 0x10;
    pub const LOCAL_CONTROL: u8 = 0x20;
    pub const DEVICE_TROUBLE: u8 = 0x40;
    pub const DEVICE_RESTART: u8 = 0x80;

    // IIN2
    pub const NO_FUNC_CODE_SUPPORT: u8 = 0x01;
    pub const OBJECT_UNKNOWN: u8 = 0x02;
    pub const PARAMETER_ERROR: u8 = 0x04;
    pub const EVENT_BUFFER_OVERFLOW: u8 = 0x08;
    pub const ALREADY_EXECUTING: u8 = 0x10;
    pub const CONFIG_CORRUPT: u8 = 0x20;

    /// Create from the two octets.
    #[inline]
    pub const fn new(iin1: u8, iin2: u8) -> Self {
        Self { iin1, iin2 }
    }

    /// Check if any event class has data pending.
    #[inline]
    pub const fn has_events(&self) -> bool {
        self.iin1 & (Self::CLASS1_EVENTS | Self::CLASS2_EVENTS | Self::CLASS3_EVENTS) != 0
    }

    /// Check if the outstation restarted.
    #[inline]
    pub const fn device_restart(&self) -> bool {
        self.iin1 & Self::DEVICE_RESTART != 0
    }

    /// Check if the outstation requests time synchronization.
    #[inline]
    pub const fn need_time(&self) -> bool {
        self.iin1 & Self::NEED_TIME != 0
    }

    /// Check if any IIN2 error bit is set.
    #[inline]
    pub const fn has_error(&self) -> bool {
        self.iin2 != 0
    }
}

/// Application layer header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApduHeader {
    /// Control octet
    pub control: AppControl,
    /// Function code
    pub function: FunctionCode,
    /// Internal indications, present on responses only
    pub iin: Option<Iin>,
}

impl ApduHeader {
    /// Create a request header.
    pub const fn request(control: AppControl, function: FunctionCode) -> Self {
        Self {
            control,
            function,
            iin: None,
        }
    }

    /// Create a response header.
    pub const fn response(control: AppControl, function: FunctionCode, iin: Iin) -> Self {
        Self {
            control,
            function,
            iin: Some(iin),
        }
    }

    /// Parse a header from the start of an APDU.
    ///
    /// Returns the header and the number of bytes consumed.
    pub fn parse(data: &[u8]) -> Result<(Self, usize)> {
        if data.len() < 2 {
            return Err(Dnp3Error::invalid_object("APDU header too short"));
        }

        let control = AppControl::from_u8(data[0]);
        let function = FunctionCode::from_u8(data[1])?;

        if function.is_response() {
            if data.len() < 4 {
                return Err(Dnp3Error::invalid_object("Response header missing IIN"));
            }
            Ok((Self::response(control, function, Iin::new(data[2], data[3])), 4))
        } else {
            Ok((Self::request(control, function), 2))
        }
    }

    /// Encode the header.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.control.as_u8());
        buf.put_u8(self.function.as_u8());
        if let Some(iin) = self.iin {
            buf.put_u8(iin.iin1);
            buf.put_u8(iin.iin2);
        }
    }

    /// Encoded size in bytes.
    #[inline]
    pub const fn encoded_size(&self) -> usize {
        if self.iin.is_some() {
            4
        } else {
            2
        }
    }
}

/// Builder for application fragments.
///
/// Object space is reserved zeroed and handed back to the caller, who
/// fills it with the conversion writers.
#[derive(Debug)]
pub struct ApduBuilder {
    buf: BytesMut,
}

impl ApduBuilder {
    /// Start a fragment with the given header.
    pub fn new(header: ApduHeader) -> Self {
        let mut buf = BytesMut::with_capacity(256);
        header.encode(&mut buf);
        Self { buf }
    }

    /// Append an object header and reserve its data region.
    ///
    /// Returns the zeroed data region, `header.data_size()` bytes long.
    pub fn add_header(&mut self, header: &HeaderInfo) -> &mut [u8] {
        header.encode(&mut self.buf);
        let start = self.buf.len();
        self.buf.put_bytes(0, header.data_size());
        &mut self.buf[start..]
    }

    /// Append a start-stop header for `start..=stop` and reserve its data.
    pub fn add_range(&mut self, group: u8, variation: u8, start: usize, stop: usize) -> Result<&mut [u8]> {
        let header = HeaderInfo::range(group, variation, start, stop)?;
        Ok(self.add_header(&header))
    }

    /// Append a start-stop header for `start..=stop` with no object data,
    /// as used by read requests.
    pub fn add_range_request(&mut self, group: u8, variation: u8, start: usize, stop: usize) -> Result<()> {
        let header = HeaderInfo::range(group, variation, start, stop)?;
        header.encode(&mut self.buf);
        Ok(())
    }

    /// Append a count header with index prefixes and reserve its data.
    pub fn add_indexed(&mut self, group: u8, variation: u8, qualifier: QualifierCode, count: usize) -> Result<&mut [u8]> {
        let header = HeaderInfo::count(group, variation, qualifier, count)?;
        Ok(self.add_header(&header))
    }

    /// Append an all-objects header.
    pub fn add_all_objects(&mut self, group: u8, variation: u8) -> Result<()> {
        let header = HeaderInfo::all_objects(group, variation)?;
        self.add_header(&header);
        Ok(())
    }

    /// Append a class data request (group 60).
    pub fn add_class_read(&mut self, class: PointClass) -> Result<()> {
        let variation = match class {
            PointClass::Class0 => 1,
            PointClass::Class1 => 2,
            PointClass::Class2 => 3,
            PointClass::Class3 => 4,
        };
        self.add_all_objects(60, variation)
    }

    /// Current fragment size.
    #[inline]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Check if nothing was written.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Finish the fragment.
    pub fn build(self) -> Bytes {
        self.buf.freeze()
    }
}
