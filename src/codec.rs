//! FT3 link frame codec for tokio.
//!
//! A frame is a 10-byte header followed by the user data split into blocks
//! of at most 16 bytes, each block trailed by its own CRC.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::{trace, warn};

use crate::error::{Dnp3Error, Result};
use crate::types::packing::{Packer, UInt16LE};
use crate::types::{
    crc16, LinkFunction, LinkHeader, LINK_HEADER_SIZE, MAX_LINK_PAYLOAD, MIN_LINK_LENGTH,
    START_BYTE_1, START_BYTE_2,
};

/// User data bytes per CRC block.
pub const LINK_BLOCK_SIZE: usize = 16;

/// CRC bytes after each block.
pub const LINK_CRC_SIZE: usize = 2;

/// Largest encoded frame: 250 bytes of user data in 16 blocks.
pub const MAX_LINK_FRAME_SIZE: usize = 292;

/// Number of bytes on the wire for a frame carrying `user_data` bytes.
pub const fn frame_size(user_data: usize) -> usize {
    LINK_HEADER_SIZE + user_data + LINK_CRC_SIZE * user_data.div_ceil(LINK_BLOCK_SIZE)
}

/// A link layer frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkFrame {
    /// Frame header
    pub header: LinkHeader,
    /// User data with block CRCs removed
    pub payload: Bytes,
}

impl LinkFrame {
    /// Create a frame, checking the payload fits.
    pub fn new(function: LinkFunction, is_master: bool, fcb: bool, fcv_dfc: bool, dest: u16, src: u16, payload: Bytes) -> Result<Self> {
        if payload.len() > MAX_LINK_PAYLOAD {
            return Err(Dnp3Error::argument(format!(
                "Link payload of {} bytes exceeds {}",
                payload.len(),
                MAX_LINK_PAYLOAD
            )));
        }
        let length = MIN_LINK_LENGTH + payload.len() as u8;
        Ok(Self {
            header: LinkHeader::new(length, src, dest, is_master, fcv_dfc, fcb, function),
            payload,
        })
    }

    /// Create an unconfirmed user data frame.
    pub fn user_data(is_master: bool, dest: u16, src: u16, payload: Bytes) -> Result<Self> {
        Self::new(LinkFunction::PriUnconfirmedUserData, is_master, false, false, dest, src, payload)
    }

    /// Create a header-only frame such as reset link states, ack or link status.
    pub fn control(function: LinkFunction, is_master: bool, dest: u16, src: u16) -> Self {
        Self {
            header: LinkHeader::new(MIN_LINK_LENGTH, src, dest, is_master, false, false, function),
            payload: Bytes::new(),
        }
    }

    /// Link function of this frame.
    #[inline]
    pub fn function(&self) -> LinkFunction {
        self.header.function()
    }

    /// Number of bytes on the wire.
    #[inline]
    pub fn encoded_len(&self) -> usize {
        frame_size(self.payload.len())
    }
}

impl std::fmt::Display for LinkFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} len {}", self.header, self.payload.len())
    }
}

/// FT3 link frame codec.
///
/// # Example
///
/// ```rust,ignore
/// use tokio_util::codec::Framed;
/// use voltage_dnp3::codec::{LinkFrame, LinkFrameCodec};
///
/// let stream = TcpStream::connect("192.168.1.100:20000").await?;
/// let mut framed = Framed::new(stream, LinkFrameCodec::new());
///
/// framed.send(LinkFrame::control(LinkFunction::PriResetLinkStates, true, 1, 1024)).await?;
///
/// while let Some(frame) = framed.next().await {
///     println!("Received: {}", frame?);
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct LinkFrameCodec {
    state: DecodeState,
}

#[derive(Debug, Clone, Copy, Default)]
enum DecodeState {
    #[default]
    WaitingForHeader,
    WaitingForBody {
        header: LinkHeader,
    },
}

impl LinkFrameCodec {
    /// Create a new link frame codec.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for LinkFrameCodec {
    type Item = LinkFrame;
    type Error = Dnp3Error;

    fn decode(&mut self, src: &mut BytesMut) -> std::result::Result<Option<Self::Item>, Self::Error> {
        loop {
            match self.state {
                DecodeState::WaitingForHeader => {
                    // Skip to the start bytes
                    let start = src
                        .windows(2)
                        .position(|w| w[0] == START_BYTE_1 && w[1] == START_BYTE_2);
                    match start {
                        Some(pos) => {
                            if pos > 0 {
                                trace!("Discarding {} bytes before start", pos);
                                src.advance(pos);
                            }
                        }
                        None => {
                            // Keep a trailing 0x05, it may begin the next frame
                            let keep = usize::from(src.last() == Some(&START_BYTE_1));
                            let discard = src.len() - keep;
                            src.advance(discard);
                            return Ok(None);
                        }
                    }

                    if src.len() < LINK_HEADER_SIZE {
                        src.reserve(LINK_HEADER_SIZE - src.len());
                        return Ok(None);
                    }

                    if !LinkHeader::validate(&src[..LINK_HEADER_SIZE]) {
                        warn!("Bad header CRC, resynchronizing");
                        src.advance(1);
                        continue;
                    }

                    let header = LinkHeader::read(&src[..LINK_HEADER_SIZE])?;
                    if !header.valid_length() {
                        warn!("Bad length field {}, resynchronizing", header.length());
                        src.advance(1);
                        continue;
                    }

                    self.state = DecodeState::WaitingForBody { header };
                }

                DecodeState::WaitingForBody { header } => {
                    let size = frame_size(header.user_data_len());
                    if src.len() < size {
                        src.reserve(size - src.len());
                        return Ok(None);
                    }

                    let frame = src.split_to(size);
                    self.state = DecodeState::WaitingForHeader;

                    let mut payload = BytesMut::with_capacity(header.user_data_len());
                    let mut valid = true;
                    for block in frame[LINK_HEADER_SIZE..].chunks(LINK_BLOCK_SIZE + LINK_CRC_SIZE) {
                        let (data, crc) = block.split_at(block.len() - LINK_CRC_SIZE);
                        if UInt16LE::read(crc) != crc16(data) {
                            valid = false;
                            break;
                        }
                        payload.extend_from_slice(data);
                    }

                    if !valid {
                        warn!("Bad block CRC, dropping frame: {}", header);
                        continue;
                    }

                    trace!("Received frame: {}", header);
                    return Ok(Some(LinkFrame {
                        header,
                        payload: payload.freeze(),
                    }));
                }
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> std::result::Result<Option<Self::Item>, Self::Error> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        if !src.is_empty() {
            trace!("Discarding {} bytes at end of stream", src.len());
            src.clear();
        }
        self.state = DecodeState::WaitingForHeader;
        Ok(None)
    }
}

impl Encoder<LinkFrame> for LinkFrameCodec {
    type Error = Dnp3Error;

    fn encode(&mut self, item: LinkFrame, dst: &mut BytesMut) -> std::result::Result<(), Self::Error> {
        if item.payload.len() > MAX_LINK_PAYLOAD {
            return Err(Dnp3Error::Codec("Link payload too large".into()));
        }
        if item.header.user_data_len() != item.payload.len() || !item.header.valid_length() {
            return Err(Dnp3Error::Codec(format!(
                "Length field {} does not match payload of {} bytes",
                item.header.length(),
                item.payload.len()
            )));
        }

        dst.reserve(item.encoded_len());
        dst.extend_from_slice(&item.header.encode());
        for block in item.payload.chunks(LINK_BLOCK_SIZE) {
            dst.extend_from_slice(block);
            dst.put_u16_le(crc16(block));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hex::{parse_hex, to_hex};

    const RESET_LINK: &str = "05 64 05 C0 01 00 00 04 E9 21";
    const CLASS_READ: &str =
        "05 64 14 F3 01 00 00 04 0A 3B C0 C3 01 3C 02 06 3C 03 06 3C 04 06 3C 01 06 9A 12";

    fn encode(frame: LinkFrame) -> BytesMut {
        let mut buf = BytesMut::new();
        LinkFrameCodec::new().encode(frame, &mut buf).unwrap();
        buf
    }

    #[test]
    fn test_frame_size() {
        assert_eq!(frame_size(0), 10);
        assert_eq!(frame_size(1), 13);
        assert_eq!(frame_size(16), 28);
        assert_eq!(frame_size(17), 31);
        assert_eq!(frame_size(MAX_LINK_PAYLOAD), MAX_LINK_FRAME_SIZE);
    }

    #[test]
    fn test_encode_reset_link_states() {
        let frame = LinkFrame::control(LinkFunction::PriResetLinkStates, true, 1, 1024);
        assert_eq!(to_hex(&encode(frame)), RESET_LINK);
    }

    #[test]
    fn test_decode_known_user_data() {
        let mut buf = BytesMut::from(&parse_hex(CLASS_READ).unwrap()[..]);
        let frame = LinkFrameCodec::new().decode(&mut buf).unwrap().unwrap();

        assert!(buf.is_empty());
        assert_eq!(frame.function(), LinkFunction::PriConfirmedUserData);
        assert_eq!(frame.header.dest(), 1);
        assert_eq!(frame.header.src(), 1024);
        assert!(frame.header.is_fcb_set());
        assert_eq!(to_hex(&frame.payload), "C0 C3 01 3C 02 06 3C 03 06 3C 04 06 3C 01 06");
    }

    #[test]
    fn test_encode_matches_known_user_data() {
        let payload = Bytes::from(parse_hex("C0 C3 01 3C 02 06 3C 03 06 3C 04 06 3C 01 06").unwrap());
        let frame = LinkFrame::new(LinkFunction::PriConfirmedUserData, true, true, true, 1, 1024, payload).unwrap();
        assert_eq!(to_hex(&encode(frame)), CLASS_READ);
    }

    #[test]
    fn test_multi_block_roundtrip() {
        let payload: Bytes = (0..=249u8).collect::<Vec<_>>().into();
        let frame = LinkFrame::user_data(false, 1024, 1, payload.clone()).unwrap();
        let mut buf = encode(frame.clone());
        assert_eq!(buf.len(), MAX_LINK_FRAME_SIZE);

        let decoded = LinkFrameCodec::new().decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, frame);
        assert_eq!(decoded.payload, payload);
    }

    #[test]
    fn test_decode_partial_frame() {
        let bytes = parse_hex(CLASS_READ).unwrap();
        let mut codec = LinkFrameCodec::new();

        let mut buf = BytesMut::from(&bytes[..4]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(&bytes[4..15]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(&bytes[15..]);
        assert!(codec.decode(&mut buf).unwrap().is_some());
    }

    #[test]
    fn test_decode_skip_garbage() {
        let mut bytes = parse_hex("FF 05 AA 64").unwrap();
        bytes.extend(parse_hex(RESET_LINK).unwrap());
        let mut buf = BytesMut::from(&bytes[..]);

        let frame = LinkFrameCodec::new().decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.function(), LinkFunction::PriResetLinkStates);
        assert!(frame.payload.is_empty());
    }

    #[test]
    fn test_bad_header_crc_resyncs() {
        let mut bytes = parse_hex("05 64 05 C0 01 00 00 04 E9 22").unwrap();
        bytes.extend(parse_hex(RESET_LINK).unwrap());
        let mut buf = BytesMut::from(&bytes[..]);

        let frame = LinkFrameCodec::new().decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.header.src(), 1024);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_bad_block_crc_drops_frame() {
        let mut bytes = parse_hex(CLASS_READ).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        bytes.extend(parse_hex(RESET_LINK).unwrap());
        let mut buf = BytesMut::from(&bytes[..]);

        let frame = LinkFrameCodec::new().decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.function(), LinkFunction::PriResetLinkStates);
    }

    #[test]
    fn test_trailing_start_byte_kept() {
        let mut codec = LinkFrameCodec::new();
        let mut buf = BytesMut::from(&[0x11, 0x22, 0x05][..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert_eq!(&buf[..], &[0x05]);

        buf.extend_from_slice(&parse_hex(RESET_LINK).unwrap()[1..]);
        assert!(codec.decode(&mut buf).unwrap().is_some());
    }

    #[test]
    fn test_decode_eof_discards_leftovers() {
        let mut codec = LinkFrameCodec::new();
        let mut buf = BytesMut::from(&[0x11, 0x05][..]);
        assert!(codec.decode_eof(&mut buf).unwrap().is_none());
        assert!(buf.is_empty());

        // Half a frame
        let frame = parse_hex(CLASS_READ).unwrap();
        let mut buf = BytesMut::from(&frame[..14]);
        assert!(codec.decode_eof(&mut buf).unwrap().is_none());
        assert!(buf.is_empty());

        // A complete frame is still delivered
        let mut buf = BytesMut::from(&frame[..]);
        assert!(codec.decode_eof(&mut buf).unwrap().is_some());
    }

    #[test]
    fn test_payload_too_large() {
        let payload = Bytes::from(vec![0u8; MAX_LINK_PAYLOAD + 1]);
        assert!(LinkFrame::user_data(true, 1, 2, payload).is_err());
    }

    #[test]
    fn test_encode_rejects_length_mismatch() {
        let mut frame = LinkFrame::control(LinkFunction::SecAck, false, 1024, 1);
        frame.payload = Bytes::from_static(&[1, 2, 3]);
        let mut buf = BytesMut::new();
        assert!(LinkFrameCodec::new().encode(frame, &mut buf).is_err());
    }

    #[test]
    fn test_display() {
        let frame = LinkFrame::control(LinkFunction::SecLinkStatus, false, 1024, 1);
        assert_eq!(frame.to_string(), "SEC_LINK_STATUS frm 1 to 1024 len 0");
    }
}
