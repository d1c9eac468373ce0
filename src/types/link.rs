//! DNP3 FT3 link header.
//!
//! The link header is the fixed 10-byte prefix of every link frame.
//!
//! ```text
//! +------+------+--------+---------+-----------+-----------+-----------+
//! | 0x05 | 0x64 | Length | Control | Dest (LE) | Src (LE)  | CRC (LE)  |
//! +------+------+--------+---------+-----------+-----------+-----------+
//!   Start bytes   1 byte   1 byte    2 bytes     2 bytes     2 bytes
//! ```

use crc::{Crc, CRC_16_DNP};

use crate::error::{Dnp3Error, Result};
use crate::types::packing::{Packer, UInt16LE, UInt8};

/// First start byte of a link frame.
pub const START_BYTE_1: u8 = 0x05;

/// Second start byte of a link frame.
pub const START_BYTE_2: u8 = 0x64;

/// Size of the link header, CRC included.
pub const LINK_HEADER_SIZE: usize = 10;

/// Largest user data payload carried by one link frame.
pub const MAX_LINK_PAYLOAD: usize = 250;

/// Minimum length field value (control, destination and source only).
pub const MIN_LINK_LENGTH: u8 = 5;

/// Direction bit: set when the frame originates from a master.
pub const MASK_DIR: u8 = 0x80;
/// Primary bit: set when the frame is primary-to-secondary.
pub const MASK_PRM: u8 = 0x40;
/// Frame count bit.
pub const MASK_FCB: u8 = 0x20;
/// Frame count valid (primary) or data flow control (secondary).
pub const MASK_FCV: u8 = 0x10;
/// Function code bits.
pub const MASK_FUNC: u8 = 0x0F;
/// Function code bits plus PRM, which selects the function code table.
pub const MASK_FUNC_OR_PRM: u8 = MASK_PRM | MASK_FUNC;

static DNP_CRC: Crc<u16> = Crc::<u16>::new(&CRC_16_DNP);

/// CRC-16/DNP over `data`, as transmitted (low byte first).
#[inline]
pub fn crc16(data: &[u8]) -> u16 {
    DNP_CRC.checksum(data)
}

/// Link layer function codes.
///
/// The encoding includes the PRM bit, so primary and secondary codes that
/// share the same low nibble remain distinct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkFunction {
    /// Primary: reset link states
    PriResetLinkStates,
    /// Primary: reset user process
    PriResetUserProcess,
    /// Primary: test link states
    PriTestLinkStates,
    /// Primary: confirmed user data
    PriConfirmedUserData,
    /// Primary: unconfirmed user data
    PriUnconfirmedUserData,
    /// Primary: request link status
    PriRequestLinkStatus,
    /// Secondary: positive acknowledgement
    SecAck,
    /// Secondary: negative acknowledgement
    SecNack,
    /// Secondary: link status
    SecLinkStatus,
    /// Secondary: link service not supported
    SecNotSupported,
    /// Any other value of the PRM and function bits
    Unknown(u8),
}

impl LinkFunction {
    /// Get the PRM and function bits for this code.
    #[inline]
    pub const fn as_u8(&self) -> u8 {
        match self {
            Self::PriResetLinkStates => 0x40,
            Self::PriResetUserProcess => 0x41,
            Self::PriTestLinkStates => 0x42,
            Self::PriConfirmedUserData => 0x43,
            Self::PriUnconfirmedUserData => 0x44,
            Self::PriRequestLinkStatus => 0x49,
            Self::SecAck => 0x00,
            Self::SecNack => 0x01,
            Self::SecLinkStatus => 0x0B,
            Self::SecNotSupported => 0x0F,
            Self::Unknown(value) => *value & MASK_FUNC_OR_PRM,
        }
    }

    /// Decode the PRM and function bits of a control byte.
    #[inline]
    pub const fn from_u8(value: u8) -> Self {
        match value & MASK_FUNC_OR_PRM {
            0x40 => Self::PriResetLinkStates,
            0x41 => Self::PriResetUserProcess,
            0x42 => Self::PriTestLinkStates,
            0x43 => Self::PriConfirmedUserData,
            0x44 => Self::PriUnconfirmedUserData,
            0x49 => Self::PriRequestLinkStatus,
            0x00 => Self::SecAck,
            0x01 => Self::SecNack,
            0x0B => Self::SecLinkStatus,
            0x0F => Self::SecNotSupported,
            other => Self::Unknown(other),
        }
    }

    /// Check if this is a primary (PRM = 1) function.
    #[inline]
    pub const fn is_primary(&self) -> bool {
        self.as_u8() & MASK_PRM != 0
    }

    /// Check if frames with this function carry user data.
    #[inline]
    pub const fn carries_user_data(&self) -> bool {
        matches!(
            self,
            Self::PriConfirmedUserData | Self::PriUnconfirmedUserData
        )
    }

    /// Get the standard name of this function.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::PriResetLinkStates => "PRI_RESET_LINK_STATES",
            Self::PriResetUserProcess => "PRI_RESET_USER_PROCESS",
            Self::PriTestLinkStates => "PRI_TEST_LINK_STATES",
            Self::PriConfirmedUserData => "PRI_CONFIRMED_USER_DATA",
            Self::PriUnconfirmedUserData => "PRI_UNCONFIRMED_USER_DATA",
            Self::PriRequestLinkStatus => "PRI_REQUEST_LINK_STATUS",
            Self::SecAck => "SEC_ACK",
            Self::SecNack => "SEC_NACK",
            Self::SecLinkStatus => "SEC_LINK_STATUS",
            Self::SecNotSupported => "SEC_NOT_SUPPORTED",
            Self::Unknown(_) => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for LinkFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// FT3 link header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LinkHeader {
    /// Length field, counts control, addresses and user data; [5, 255] valid
    length: u8,
    /// Where the frame originated
    src: u16,
    /// Where the frame is going
    dest: u16,
    /// Control octet
    ctrl: u8,
}

impl LinkHeader {
    /// Create a header from its fields.
    pub fn new(
        length: u8,
        src: u16,
        dest: u16,
        from_master: bool,
        fcv_dfc: bool,
        fcb: bool,
        function: LinkFunction,
    ) -> Self {
        Self {
            length,
            src,
            dest,
            ctrl: Self::control_byte(from_master, fcb, fcv_dfc, function),
        }
    }

    /// Pack the control sub-fields into one byte.
    #[inline]
    pub const fn control_byte(is_master: bool, fcb: bool, fcv_dfc: bool, function: LinkFunction) -> u8 {
        let mut ctrl = function.as_u8() & MASK_FUNC_OR_PRM;
        if is_master {
            ctrl |= MASK_DIR;
        }
        if fcb {
            ctrl |= MASK_FCB;
        }
        if fcv_dfc {
            ctrl |= MASK_FCV;
        }
        ctrl
    }

    /// Set or clear the frame count bit.
    #[inline]
    pub fn change_fcb(&mut self, fcb: bool) {
        if fcb {
            self.ctrl |= MASK_FCB;
        } else {
            self.ctrl &= !MASK_FCB;
        }
    }

    /// Length field.
    #[inline]
    pub const fn length(&self) -> u8 {
        self.length
    }

    /// Destination address.
    #[inline]
    pub const fn dest(&self) -> u16 {
        self.dest
    }

    /// Source address.
    #[inline]
    pub const fn src(&self) -> u16 {
        self.src
    }

    /// Raw control byte.
    #[inline]
    pub const fn control(&self) -> u8 {
        self.ctrl
    }

    /// DIR bit.
    #[inline]
    pub const fn is_from_master(&self) -> bool {
        self.ctrl & MASK_DIR != 0
    }

    /// PRM bit.
    #[inline]
    pub const fn is_pri_to_sec(&self) -> bool {
        self.ctrl & MASK_PRM != 0
    }

    /// FCB bit.
    #[inline]
    pub const fn is_fcb_set(&self) -> bool {
        self.ctrl & MASK_FCB != 0
    }

    /// FCV (primary) or DFC (secondary) bit.
    #[inline]
    pub const fn is_fcv_dfc_set(&self) -> bool {
        self.ctrl & MASK_FCV != 0
    }

    /// Low function nibble, without PRM.
    #[inline]
    pub const fn func_byte(&self) -> u8 {
        self.ctrl & MASK_FUNC
    }

    /// Function code, decoded through the PRM-aware mask.
    #[inline]
    pub const fn function(&self) -> LinkFunction {
        LinkFunction::from_u8(self.ctrl & MASK_FUNC_OR_PRM)
    }

    /// Check the length field is structurally valid.
    #[inline]
    pub const fn valid_length(&self) -> bool {
        self.length > 4
    }

    /// Number of user data bytes announced by the length field.
    #[inline]
    pub const fn user_data_len(&self) -> usize {
        self.length.saturating_sub(MIN_LINK_LENGTH) as usize
    }

    /// Read the header fields from a buffer of at least 10 bytes.
    ///
    /// Does NOT validate the 0x0564 start bytes or the CRC.
    pub fn read(buf: &[u8]) -> Result<Self> {
        if buf.len() < LINK_HEADER_SIZE {
            return Err(Dnp3Error::invalid_frame("Link header too short"));
        }

        Ok(Self {
            length: UInt8::read(&buf[2..]),
            ctrl: UInt8::read(&buf[3..]),
            dest: UInt16LE::read(&buf[4..]),
            src: UInt16LE::read(&buf[6..]),
        })
    }

    /// Write the header including 0x0564 and CRC to the start of `buf`.
    ///
    /// # Panics
    ///
    /// Panics if `buf` is shorter than 10 bytes.
    pub fn write(&self, buf: &mut [u8]) {
        buf[0] = START_BYTE_1;
        buf[1] = START_BYTE_2;
        UInt8::write(&mut buf[2..], self.length);
        UInt8::write(&mut buf[3..], self.ctrl);
        UInt16LE::write(&mut buf[4..], self.dest);
        UInt16LE::write(&mut buf[6..], self.src);
        let crc = crc16(&buf[..8]);
        UInt16LE::write(&mut buf[8..], crc);
    }

    /// Encode the header into a new 10-byte array.
    #[inline]
    pub fn encode(&self) -> [u8; LINK_HEADER_SIZE] {
        let mut buf = [0u8; LINK_HEADER_SIZE];
        self.write(&mut buf);
        buf
    }

    /// Check the start bytes and CRC of an encoded header.
    pub fn validate(buf: &[u8]) -> bool {
        buf.len() >= LINK_HEADER_SIZE
            && buf[0] == START_BYTE_1
            && buf[1] == START_BYTE_2
            && UInt16LE::read(&buf[8..]) == crc16(&buf[..8])
    }
}

impl std::fmt::Display for LinkHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} frm {} to {}",
            self.function(),
            self.src,
            self.dest
        )?;
        if self.is_from_master() {
            f.write_str(" DIR")?;
        }
        if self.is_pri_to_sec() {
            f.write_str(" PRM")?;
        }
        if self.is_fcb_set() {
            f.write_str(" FCB")?;
        }
        if self.is_fcv_dfc_set() {
            f.write_str(if self.is_pri_to_sec() { " FCV" } else { " DFC" })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hex::parse_hex;
    use proptest::prelude::*;

    #[test]
    fn test_reset_link_states_bytes() {
        // Master 1024 resetting outstation 1
        let header = LinkHeader::new(5, 1024, 1, true, false, false, LinkFunction::PriResetLinkStates);
        assert_eq!(header.control(), 0xC0);
        assert_eq!(header.encode().to_vec(), parse_hex("05 64 05 C0 01 00 00 04 E9 21").unwrap());
    }

    #[test]
    fn test_read_known_header() {
        let bytes = parse_hex("05 64 05 C0 01 00 00 04 E9 21").unwrap();
        assert!(LinkHeader::validate(&bytes));

        let header = LinkHeader::read(&bytes).unwrap();
        assert_eq!(header.length(), 5);
        assert_eq!(header.dest(), 1);
        assert_eq!(header.src(), 1024);
        assert!(header.is_from_master());
        assert!(header.is_pri_to_sec());
        assert_eq!(header.function(), LinkFunction::PriResetLinkStates);
        assert!(header.valid_length());
        assert_eq!(header.user_data_len(), 0);
    }

    #[test]
    fn test_read_does_not_validate() {
        // Start bytes and CRC are garbage, fields still parse
        let bytes = [0xFF, 0xFF, 0x08, 0x44, 0x02, 0x00, 0x03, 0x00, 0x00, 0x00];
        let header = LinkHeader::read(&bytes).unwrap();
        assert_eq!(header.length(), 8);
        assert_eq!(header.function(), LinkFunction::PriUnconfirmedUserData);
        assert!(!LinkHeader::validate(&bytes));
    }

    #[test]
    fn test_read_too_short() {
        assert!(LinkHeader::read(&[0x05, 0x64, 0x05]).is_err());
    }

    #[test]
    fn test_control_byte_bits() {
        let ctrl = LinkHeader::control_byte(true, true, true, LinkFunction::PriConfirmedUserData);
        assert_eq!(ctrl, 0xF3);

        let ctrl = LinkHeader::control_byte(false, false, true, LinkFunction::SecAck);
        assert_eq!(ctrl, 0x10);
    }

    #[test]
    fn test_prm_selects_function_table() {
        // Same low nibble, different meaning
        let primary = LinkHeader::new(5, 1, 2, false, false, false, LinkFunction::PriResetLinkStates);
        let secondary = LinkHeader::new(5, 1, 2, false, false, false, LinkFunction::SecAck);
        assert_eq!(primary.func_byte(), secondary.func_byte());
        assert_ne!(primary.function(), secondary.function());

        let primary = LinkHeader::new(5, 1, 2, false, false, false, LinkFunction::PriResetUserProcess);
        assert_eq!(primary.function(), LinkFunction::PriResetUserProcess);
        assert_eq!(
            LinkHeader::new(5, 1, 2, false, false, false, LinkFunction::SecNack).function(),
            LinkFunction::SecNack
        );
    }

    #[test]
    fn test_change_fcb() {
        let mut header = LinkHeader::new(5, 1, 2, true, true, false, LinkFunction::PriTestLinkStates);
        assert!(!header.is_fcb_set());
        header.change_fcb(true);
        assert!(header.is_fcb_set());
        assert!(header.is_fcv_dfc_set());
        assert_eq!(header.function(), LinkFunction::PriTestLinkStates);
        header.change_fcb(false);
        assert!(!header.is_fcb_set());
    }

    #[test]
    fn test_valid_length() {
        let header = LinkHeader::new(4, 1, 2, true, false, false, LinkFunction::PriResetLinkStates);
        assert!(!header.valid_length());
        let header = LinkHeader::new(255, 1, 2, true, false, false, LinkFunction::PriUnconfirmedUserData);
        assert!(header.valid_length());
        assert_eq!(header.user_data_len(), MAX_LINK_PAYLOAD);
    }

    #[test]
    fn test_function_unknown_preserved() {
        let function = LinkFunction::from_u8(0x4D);
        assert_eq!(function, LinkFunction::Unknown(0x4D));
        assert!(function.is_primary());
        assert_eq!(function.as_u8(), 0x4D);
    }

    #[test]
    fn test_display() {
        let header = LinkHeader::new(5, 1024, 1, true, false, true, LinkFunction::PriResetLinkStates);
        assert_eq!(header.to_string(), "PRI_RESET_LINK_STATES frm 1024 to 1 DIR PRM FCB");
    }

    #[test]
    fn test_all_control_combinations_roundtrip() {
        let functions = [
            LinkFunction::PriResetLinkStates,
            LinkFunction::PriResetUserProcess,
            LinkFunction::PriTestLinkStates,
            LinkFunction::PriConfirmedUserData,
            LinkFunction::PriUnconfirmedUserData,
            LinkFunction::PriRequestLinkStatus,
            LinkFunction::SecAck,
            LinkFunction::SecNack,
            LinkFunction::SecLinkStatus,
            LinkFunction::SecNotSupported,
        ];

        for bits in 0..8u8 {
            let (dir, fcb, fcv) = (bits & 1 != 0, bits & 2 != 0, bits & 4 != 0);
            for function in functions {
                let header = LinkHeader::new(20, 3, 4, dir, fcv, fcb, function);
                let decoded = LinkHeader::read(&header.encode()).unwrap();
                assert_eq!(decoded, header);
                assert_eq!(decoded.is_from_master(), dir);
                assert_eq!(decoded.is_fcb_set(), fcb);
                assert_eq!(decoded.is_fcv_dfc_set(), fcv);
                assert_eq!(decoded.is_pri_to_sec(), function.is_primary());
                assert_eq!(decoded.function(), function);
            }
        }
    }

    proptest! {
        #[test]
        fn prop_header_roundtrip(
            length in any::<u8>(),
            src in any::<u16>(),
            dest in any::<u16>(),
            dir in any::<bool>(),
            fcv in any::<bool>(),
            fcb in any::<bool>(),
            func in 0u8..16,
            prm in any::<bool>(),
        ) {
            let function = LinkFunction::from_u8(func | if prm { MASK_PRM } else { 0 });
            let header = LinkHeader::new(length, src, dest, dir, fcv, fcb, function);
            let encoded = header.encode();
            prop_assert!(LinkHeader::validate(&encoded));
            prop_assert_eq!(LinkHeader::read(&encoded).unwrap(), header);
        }
    }
}
