//! DNP3 transport function.
//!
//! Segments outgoing APDUs into TPDUs that fit one link frame and
//! reassembles incoming TPDUs. Each TPDU starts with a one-byte header:
//!
//! ```text
//! +-----+-----+-----------------+
//! | FIN | FIR | Sequence (0-63) |
//! +-----+-----+-----------------+
//!  bit 7 bit 6   bits 0-5
//! ```
//!
//! The layer is a small state machine. [`transition`] is the whole table;
//! [`TransportLayer`] applies it and carries out the resulting [`Action`].

use tracing::{debug, trace, warn};

use crate::error::{Dnp3Error, Result};
use crate::layer::{LowerLayer, UpperLayer};
use crate::types::MAX_LINK_PAYLOAD;

/// Size of the transport header.
pub const TRANSPORT_HEADER_SIZE: usize = 1;

/// Largest APDU payload in one TPDU.
pub const MAX_SEGMENT_PAYLOAD: usize = MAX_LINK_PAYLOAD - TRANSPORT_HEADER_SIZE;

/// Default largest APDU accepted for send and reassembly.
pub const DEFAULT_MAX_FRAGMENT_SIZE: usize = 2048;

/// Transport header bits.
pub const TL_HDR_FIN: u8 = 0x80;
pub const TL_HDR_FIR: u8 = 0x40;
pub const TL_HDR_SEQ: u8 = 0x3F;

/// Transport configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportConfig {
    /// Largest APDU accepted for send and reassembly
    pub max_fragment_size: usize,
    /// APDU bytes carried per TPDU (1-249)
    pub segment_payload: usize,
}

impl TransportConfig {
    /// Create a configuration with default sizes.
    pub fn new() -> Self {
        Self {
            max_fragment_size: DEFAULT_MAX_FRAGMENT_SIZE,
            segment_payload: MAX_SEGMENT_PAYLOAD,
        }
    }

    /// Set the largest APDU size.
    pub fn max_fragment_size(mut self, size: usize) -> Self {
        self.max_fragment_size = size;
        self
    }

    /// Set the APDU bytes per TPDU, clamped to 1-249.
    pub fn segment_payload(mut self, size: usize) -> Self {
        self.segment_payload = size.clamp(1, MAX_SEGMENT_PAYLOAD);
        self
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Transport segment header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportHeader {
    /// Final segment
    pub fin: bool,
    /// First segment
    pub fir: bool,
    /// Rolling sequence number (0-63)
    pub seq: u8,
}

impl TransportHeader {
    /// Create a header, masking the sequence to 6 bits.
    #[inline]
    pub const fn new(fir: bool, fin: bool, seq: u8) -> Self {
        Self {
            fin,
            fir,
            seq: seq & TL_HDR_SEQ,
        }
    }

    /// Decode a header byte.
    #[inline]
    pub const fn from_u8(value: u8) -> Self {
        Self {
            fin: value & TL_HDR_FIN != 0,
            fir: value & TL_HDR_FIR != 0,
            seq: value & TL_HDR_SEQ,
        }
    }

    /// Encode to a header byte.
    #[inline]
    pub const fn as_u8(&self) -> u8 {
        let mut value = self.seq & TL_HDR_SEQ;
        if self.fin {
            value |= TL_HDR_FIN;
        }
        if self.fir {
            value |= TL_HDR_FIR;
        }
        value
    }
}

impl std::fmt::Display for TransportHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.fir {
            f.write_str("FIR ")?;
        }
        if self.fin {
            f.write_str("FIN ")?;
        }
        write!(f, "#{}", self.seq)
    }
}

/// Next sequence number, modulo 64.
#[inline]
const fn next_seq(seq: u8) -> u8 {
    (seq + 1) & TL_HDR_SEQ
}

/// Transport layer state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportState {
    /// Lower layer offline
    Closed,
    /// Online, idle
    Ready,
    /// Online, an APDU is being transmitted
    Sending,
}

impl std::fmt::Display for TransportState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Closed => "Closed",
            Self::Ready => "Ready",
            Self::Sending => "Sending",
        };
        f.write_str(name)
    }
}

/// Inputs to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportEvent {
    /// Lower layer came online
    LowerLayerUp,
    /// Lower layer went offline
    LowerLayerDown,
    /// Upper layer requested an APDU send
    Send,
    /// A TPDU arrived from below
    ReceiveTpdu,
    /// The outstanding TPDU was sent
    SendSuccess,
    /// The outstanding TPDU failed
    SendFailure,
}

impl TransportEvent {
    /// Every event, for exhaustive tests.
    pub const ALL: [TransportEvent; 6] = [
        Self::LowerLayerUp,
        Self::LowerLayerDown,
        Self::Send,
        Self::ReceiveTpdu,
        Self::SendSuccess,
        Self::SendFailure,
    ];
}

/// Work to perform after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    /// Ignore the event
    None,
    /// Notify the upper layer it is online
    ThisLayerUp,
    /// Reset the receiver and notify the upper layer it is offline
    ThisLayerDown,
    /// Load the APDU and transmit its first segment
    BeginSend,
    /// Feed the TPDU into reassembly
    Receive,
    /// Transmit the next queued segment
    TransmitNext,
    /// Signal send success upward
    SignalSuccess,
    /// Drop remaining segments and signal failure upward
    SignalFailure,
}

/// The transport state table.
///
/// `more_segments` only matters for `SendSuccess` in `Sending`. Pairs not
/// in the table leave the state unchanged with [`Action::None`].
pub const fn transition(
    state: TransportState,
    event: TransportEvent,
    more_segments: bool,
) -> (TransportState, Action) {
    use TransportEvent as E;
    use TransportState as S;

    match (state, event) {
        (S::Closed, E::LowerLayerUp) => (S::Ready, Action::ThisLayerUp),

        (S::Ready, E::Send) => (S::Sending, Action::BeginSend),
        (S::Ready, E::ReceiveTpdu) => (S::Ready, Action::Receive),
        (S::Ready, E::LowerLayerDown) => (S::Closed, Action::ThisLayerDown),

        (S::Sending, E::ReceiveTpdu) => (S::Sending, Action::Receive),
        (S::Sending, E::SendSuccess) if more_segments => (S::Sending, Action::TransmitNext),
        (S::Sending, E::SendSuccess) => (S::Ready, Action::SignalSuccess),
        (S::Sending, E::SendFailure) => (S::Ready, Action::SignalFailure),
        (S::Sending, E::LowerLayerDown) => (S::Closed, Action::ThisLayerDown),

        (state, _) => (state, Action::None),
    }
}

/// Reassembles TPDUs into APDUs.
#[derive(Debug)]
struct TransportRx {
    buffer: Vec<u8>,
    max_fragment_size: usize,
    expected_seq: u8,
    in_progress: bool,
}

impl TransportRx {
    fn new(max_fragment_size: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(max_fragment_size),
            max_fragment_size,
            expected_seq: 0,
            in_progress: false,
        }
    }

    fn reset(&mut self) {
        self.buffer.clear();
        self.in_progress = false;
    }

    /// Accept one TPDU, returning the APDU it completes.
    fn receive(&mut self, tpdu: &[u8]) -> Option<Vec<u8>> {
        if tpdu.len() <= TRANSPORT_HEADER_SIZE {
            warn!("Received TPDU with no payload, length {}", tpdu.len());
            return None;
        }

        let header = TransportHeader::from_u8(tpdu[0]);
        let payload = &tpdu[TRANSPORT_HEADER_SIZE..];
        trace!("TL <- {} ({} bytes)", header, payload.len());

        if header.fir {
            if self.in_progress {
                warn!("FIR received mid-fragment, discarding {} bytes", self.buffer.len());
            }
            self.reset();
        } else if !self.in_progress {
            warn!("{} received without a preceding FIR, ignoring", header);
            return None;
        } else if header.seq != self.expected_seq {
            warn!(
                "Bad sequence number, expected {} got {}, discarding {} bytes",
                self.expected_seq,
                header.seq,
                self.buffer.len()
            );
            self.reset();
            return None;
        }

        if self.buffer.len() + payload.len() > self.max_fragment_size {
            warn!(
                "Reassembly exceeds max fragment size {}, discarding",
                self.max_fragment_size
            );
            self.reset();
            return None;
        }

        self.buffer.extend_from_slice(payload);
        self.expected_seq = next_seq(header.seq);
        self.in_progress = true;

        if header.fin {
            let apdu = std::mem::take(&mut self.buffer);
            self.reset();
            Some(apdu)
        } else {
            None
        }
    }
}

/// Segments an APDU into TPDUs, one outstanding at a time.
#[derive(Debug)]
struct TransportTx {
    apdu: Vec<u8>,
    offset: usize,
    segment_payload: usize,
    seq: u8,
    tpdu: Vec<u8>,
}

impl TransportTx {
    fn new(segment_payload: usize) -> Self {
        Self {
            apdu: Vec::new(),
            offset: 0,
            segment_payload,
            seq: 0,
            tpdu: Vec::with_capacity(segment_payload + TRANSPORT_HEADER_SIZE),
        }
    }

    /// Load an APDU and build its first segment.
    fn load(&mut self, apdu: &[u8]) {
        self.apdu.clear();
        self.apdu.extend_from_slice(apdu);
        self.offset = 0;
        self.build_segment();
    }

    fn build_segment(&mut self) {
        let end = (self.offset + self.segment_payload).min(self.apdu.len());
        let header = TransportHeader::new(self.offset == 0, end == self.apdu.len(), self.seq);
        self.seq = next_seq(self.seq);

        self.tpdu.clear();
        self.tpdu.push(header.as_u8());
        self.tpdu.extend_from_slice(&self.apdu[self.offset..end]);
        trace!("TL -> {} ({} bytes)", header, end - self.offset);
    }

    /// The segment awaiting transmission.
    fn segment(&self) -> &[u8] {
        &self.tpdu
    }

    /// Mark the current segment sent. Returns true and builds the next
    /// segment if any APDU bytes remain.
    fn complete_segment(&mut self) -> bool {
        self.offset = (self.offset + self.segment_payload).min(self.apdu.len());
        if self.offset < self.apdu.len() {
            self.build_segment();
            true
        } else {
            self.abandon();
            false
        }
    }

    fn abandon(&mut self) {
        self.apdu.clear();
        self.tpdu.clear();
        self.offset = 0;
    }
}

/// Transport layer between an application (upper) and link (lower) layer.
///
/// Acts as the [`LowerLayer`] of the application and as the [`UpperLayer`]
/// of the link.
#[derive(Debug)]
pub struct TransportLayer<U, L> {
    config: TransportConfig,
    state: TransportState,
    rx: TransportRx,
    tx: TransportTx,
    upper: U,
    lower: L,
}

impl<U: UpperLayer, L: LowerLayer> TransportLayer<U, L> {
    /// Create a closed transport layer.
    pub fn new(config: TransportConfig, upper: U, lower: L) -> Self {
        Self {
            rx: TransportRx::new(config.max_fragment_size),
            tx: TransportTx::new(config.segment_payload.clamp(1, MAX_SEGMENT_PAYLOAD)),
            config,
            state: TransportState::Closed,
            upper,
            lower,
        }
    }

    /// Current state.
    #[inline]
    pub fn state(&self) -> TransportState {
        self.state
    }

    /// Check if the lower layer is up.
    #[inline]
    pub fn is_online(&self) -> bool {
        self.state != TransportState::Closed
    }

    /// Configuration in use.
    #[inline]
    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// The upper layer.
    pub fn upper(&self) -> &U {
        &self.upper
    }

    /// The upper layer, mutably.
    pub fn upper_mut(&mut self) -> &mut U {
        &mut self.upper
    }

    /// The lower layer.
    pub fn lower(&self) -> &L {
        &self.lower
    }

    /// The lower layer, mutably.
    pub fn lower_mut(&mut self) -> &mut L {
        &mut self.lower
    }

    /// Consume the layer, returning upper and lower.
    pub fn into_parts(self) -> (U, L) {
        (self.upper, self.lower)
    }

    fn dispatch(&mut self, event: TransportEvent, more_segments: bool, data: &[u8]) {
        let (next, action) = transition(self.state, event, more_segments);

        if next != self.state {
            debug!("{} -> {}", self.state, next);
        }
        // The state changes before the action so that a signaled upper layer
        // observes the new state.
        self.state = next;

        match action {
            Action::None => {
                debug!("{:?} ignored in state {}", event, self.state);
            }
            Action::ThisLayerUp => self.upper.on_lower_layer_up(),
            Action::ThisLayerDown => {
                self.rx.reset();
                self.tx.abandon();
                self.upper.on_lower_layer_down();
            }
            Action::BeginSend => {
                self.tx.load(data);
                self.transmit();
            }
            Action::Receive => {
                if let Some(apdu) = self.rx.receive(data) {
                    debug!("Reassembled APDU of {} bytes", apdu.len());
                    self.upper.on_receive(&apdu);
                }
            }
            Action::TransmitNext => self.transmit(),
            Action::SignalSuccess => self.upper.on_send_success(),
            Action::SignalFailure => {
                self.tx.abandon();
                self.upper.on_send_failure();
            }
        }
    }

    fn transmit(&mut self) {
        if let Err(e) = self.lower.send(self.tx.segment()) {
            warn!("Lower layer rejected TPDU: {}", e);
            self.dispatch(TransportEvent::SendFailure, false, &[]);
        }
    }
}

impl<U: UpperLayer, L: LowerLayer> LowerLayer for TransportLayer<U, L> {
    /// Send an APDU of 1 to `max_fragment_size` bytes.
    fn send(&mut self, apdu: &[u8]) -> Result<()> {
        if apdu.is_empty() || apdu.len() > self.config.max_fragment_size {
            return Err(Dnp3Error::argument(format!(
                "Illegal arg: {}, Array length must be in the range [1,{}]",
                apdu.len(),
                self.config.max_fragment_size
            )));
        }
        self.dispatch(TransportEvent::Send, false, apdu);
        Ok(())
    }
}

impl<U: UpperLayer, L: LowerLayer> UpperLayer for TransportLayer<U, L> {
    fn on_receive(&mut self, tpdu: &[u8]) {
        self.dispatch(TransportEvent::ReceiveTpdu, false, tpdu);
    }

    fn on_send_success(&mut self) {
        let more = self.state == TransportState::Sending && self.tx.complete_segment();
        self.dispatch(TransportEvent::SendSuccess, more, &[]);
    }

    fn on_send_failure(&mut self) {
        self.dispatch(TransportEvent::SendFailure, false, &[]);
    }

    fn on_lower_layer_up(&mut self) {
        self.dispatch(TransportEvent::LowerLayerUp, false, &[]);
    }

    fn on_lower_layer_down(&mut self) {
        self.dispatch(TransportEvent::LowerLayerDown, false, &[]);
    }
}
