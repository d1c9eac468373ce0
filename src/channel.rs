//! Async DNP3 channel.
//!
//! Drives one transport layer over any `AsyncRead + AsyncWrite` stream
//! framed with [`LinkFrameCodec`]. The channel answers link-level requests
//! itself and delivers reassembled APDUs as [`ChannelEvent`]s.

use std::collections::VecDeque;
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tracing::{debug, trace, warn};

use crate::codec::{LinkFrame, LinkFrameCodec};
use crate::error::{Dnp3Error, Result};
use crate::layer::{LowerLayer, UpperLayer};
use crate::transport::{TransportConfig, TransportLayer, TransportState};
use crate::types::LinkFunction;

/// Default DNP3 TCP port.
pub const DEFAULT_PORT: u16 = 20000;

/// Default master link address.
pub const DEFAULT_MASTER_ADDRESS: u16 = 1;

/// Default outstation link address.
pub const DEFAULT_OUTSTATION_ADDRESS: u16 = 1024;

/// Channel configuration.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Remote address (host:port), used by [`Dnp3Channel::connect_tcp`]
    pub address: String,
    /// Connection timeout
    pub connect_timeout: Duration,
    /// Link address of this station
    pub local_address: u16,
    /// Link address of the remote station
    pub remote_address: u16,
    /// Whether this station is the master (sets DIR on sent frames)
    pub is_master: bool,
    /// Transport layer settings
    pub transport: TransportConfig,
    /// How long `poll` waits for a frame
    pub poll_interval: Duration,
}

impl ChannelConfig {
    /// Create a master configuration with the given address.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            connect_timeout: Duration::from_secs(10),
            local_address: DEFAULT_MASTER_ADDRESS,
            remote_address: DEFAULT_OUTSTATION_ADDRESS,
            is_master: true,
            transport: TransportConfig::new(),
            poll_interval: Duration::from_millis(100),
        }
    }

    /// Set connection timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set local and remote link addresses.
    pub fn addresses(mut self, local: u16, remote: u16) -> Self {
        self.local_address = local;
        self.remote_address = remote;
        self
    }

    /// Set the station role.
    pub fn master(mut self, is_master: bool) -> Self {
        self.is_master = is_master;
        self
    }

    /// Set transport layer settings.
    pub fn transport(mut self, transport: TransportConfig) -> Self {
        self.transport = transport;
        self
    }

    /// Set poll interval.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// Events emitted by the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// A complete APDU arrived
    Apdu(Bytes),
    /// The last APDU was sent
    SendSuccess,
    /// The last APDU could not be sent
    SendFailure,
    /// The channel came online
    Online,
    /// The channel went offline
    Offline,
}

/// Collects transport callbacks as channel events.
#[derive(Debug, Default)]
struct EventQueue(VecDeque<ChannelEvent>);

impl UpperLayer for EventQueue {
    fn on_receive(&mut self, data: &[u8]) {
        self.0.push_back(ChannelEvent::Apdu(Bytes::copy_from_slice(data)));
    }

    fn on_send_success(&mut self) {
        self.0.push_back(ChannelEvent::SendSuccess);
    }

    fn on_send_failure(&mut self) {
        self.0.push_back(ChannelEvent::SendFailure);
    }

    fn on_lower_layer_up(&mut self) {
        self.0.push_back(ChannelEvent::Online);
    }

    fn on_lower_layer_down(&mut self) {
        self.0.push_back(ChannelEvent::Offline);
    }
}

/// Holds segments the transport asked to send until the channel writes them.
#[derive(Debug, Default)]
struct SegmentQueue(VecDeque<Bytes>);

impl LowerLayer for SegmentQueue {
    fn send(&mut self, data: &[u8]) -> Result<()> {
        self.0.push_back(Bytes::copy_from_slice(data));
        Ok(())
    }
}

/// DNP3 channel over a framed stream.
pub struct Dnp3Channel<T> {
    config: ChannelConfig,
    transport: TransportLayer<EventQueue, SegmentQueue>,
    framed: Framed<T, LinkFrameCodec>,
    event_tx: mpsc::Sender<ChannelEvent>,
    event_rx: Option<mpsc::Receiver<ChannelEvent>>,
}

impl Dnp3Channel<TcpStream> {
    /// Connect over TCP and open the channel.
    pub async fn connect_tcp(config: ChannelConfig) -> Result<Self> {
        let stream = timeout(config.connect_timeout, TcpStream::connect(&config.address))
            .await
            .map_err(|_| Dnp3Error::ConnectionTimeout)?
            .map_err(Dnp3Error::Io)?;

        stream.set_nodelay(true).ok();

        let mut channel = Self::new(stream, config);
        channel.open();
        Ok(channel)
    }
}

impl<T: AsyncRead + AsyncWrite + Unpin> Dnp3Channel<T> {
    /// Create a closed channel over `stream`.
    pub fn new(stream: T, config: ChannelConfig) -> Self {
        let (event_tx, event_rx) = mpsc::channel(100);
        Self {
            transport: TransportLayer::new(
                config.transport,
                EventQueue::default(),
                SegmentQueue::default(),
            ),
            config,
            framed: Framed::new(stream, LinkFrameCodec::new()),
            event_tx,
            event_rx: Some(event_rx),
        }
    }

    /// Configuration in use.
    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// Transport state.
    pub fn state(&self) -> TransportState {
        self.transport.state()
    }

    /// Check if the channel is open.
    pub fn is_online(&self) -> bool {
        self.transport.is_online()
    }

    /// Subscribe to events.
    ///
    /// This can only be called once. Returns None if already subscribed.
    pub fn subscribe(&mut self) -> Option<mpsc::Receiver<ChannelEvent>> {
        self.event_rx.take()
    }

    /// Bring the transport online.
    pub fn open(&mut self) {
        self.transport.on_lower_layer_up();
    }

    /// Take the transport offline, abandoning any send in progress.
    pub fn close(&mut self) {
        self.transport.on_lower_layer_down();
        self.transport.lower_mut().0.clear();
    }

    /// Segment and transmit one APDU.
    ///
    /// Each segment goes out as an unconfirmed user data frame. Completion
    /// is reported as a [`ChannelEvent::SendSuccess`] or
    /// [`ChannelEvent::SendFailure`].
    ///
    /// # Cancel safety
    ///
    /// Not cancel safe. If the future is dropped mid-write, the next call
    /// abandons the interrupted APDU with a [`ChannelEvent::SendFailure`]
    /// before sending its own.
    pub async fn send_apdu(&mut self, apdu: &[u8]) -> Result<()> {
        if !self.transport.is_online() {
            return Err(Dnp3Error::NotConnected);
        }
        if self.transport.state() == TransportState::Sending {
            warn!("Abandoning interrupted send");
            self.transport.on_send_failure();
            self.transport.lower_mut().0.clear();
        }
        self.transport.send(apdu)?;

        while let Some(segment) = self.transport.lower_mut().0.pop_front() {
            let frame = LinkFrame::user_data(
                self.config.is_master,
                self.config.remote_address,
                self.config.local_address,
                segment,
            )?;
            match self.send_frame(frame).await {
                Ok(()) => self.transport.on_send_success(),
                Err(e) => {
                    warn!("Segment write failed: {}", e);
                    self.transport.on_send_failure();
                    self.transport.lower_mut().0.clear();
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Process incoming frames.
    ///
    /// Returns the next queued event, reading at most one frame when the
    /// queue is empty. Returns `Ok(None)` if nothing arrived within the
    /// poll interval.
    pub async fn poll(&mut self) -> Result<Option<ChannelEvent>> {
        if let Some(event) = self.next_event() {
            return Ok(Some(event));
        }

        match timeout(self.config.poll_interval, self.framed.next()).await {
            Ok(Some(Ok(frame))) => {
                self.handle_frame(frame).await?;
                Ok(self.next_event())
            }
            Ok(Some(Err(e))) => Err(e),
            Ok(None) => {
                self.close();
                Err(Dnp3Error::Connection("Connection closed by peer".into()))
            }
            Err(_) => Ok(None),
        }
    }

    // Internal methods

    fn next_event(&mut self) -> Option<ChannelEvent> {
        let event = self.transport.upper_mut().0.pop_front()?;
        if let Err(mpsc::error::TrySendError::Full(dropped)) = self.event_tx.try_send(event.clone()) {
            warn!("Event queue full, dropping {:?}", dropped);
        }
        Some(event)
    }

    async fn send_frame(&mut self, frame: LinkFrame) -> Result<()> {
        trace!("Sending frame: {}", frame);
        self.framed.send(frame).await
    }

    async fn reply(&mut self, function: LinkFunction) -> Result<()> {
        let frame = LinkFrame::control(
            function,
            self.config.is_master,
            self.config.remote_address,
            self.config.local_address,
        );
        self.send_frame(frame).await
    }

    async fn handle_frame(&mut self, frame: LinkFrame) -> Result<()> {
        if frame.header.dest() != self.config.local_address {
            debug!("Ignoring frame for address {}", frame.header.dest());
            return Ok(());
        }

        match frame.function() {
            LinkFunction::PriUnconfirmedUserData => {
                self.transport.on_receive(&frame.payload);
            }
            LinkFunction::PriConfirmedUserData => {
                self.reply(LinkFunction::SecAck).await?;
                self.transport.on_receive(&frame.payload);
            }
            LinkFunction::PriRequestLinkStatus => {
                self.reply(LinkFunction::SecLinkStatus).await?;
            }
            LinkFunction::PriResetLinkStates | LinkFunction::PriTestLinkStates => {
                self.reply(LinkFunction::SecAck).await?;
            }
            other => {
                debug!("Unhandled link function {}", other);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, DuplexStream};

    type Peer = Framed<DuplexStream, LinkFrameCodec>;

    fn pair() -> (Dnp3Channel<DuplexStream>, Peer) {
        let (a, b) = duplex(4096);
        let config = ChannelConfig::new("unused").poll_interval(Duration::from_millis(20));
        (Dnp3Channel::new(a, config), Framed::new(b, LinkFrameCodec::new()))
    }

    fn outstation_frame(function: LinkFunction, payload: &[u8]) -> LinkFrame {
        LinkFrame::new(
            function,
            false,
            false,
            false,
            DEFAULT_MASTER_ADDRESS,
            DEFAULT_OUTSTATION_ADDRESS,
            Bytes::copy_from_slice(payload),
        )
        .unwrap()
    }

    #[test]
    fn test_channel_config() {
        let config = ChannelConfig::new("192.168.1.100:20000")
            .connect_timeout(Duration::from_secs(5))
            .addresses(3, 4)
            .master(false);

        assert_eq!(config.address, "192.168.1.100:20000");
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.local_address, 3);
        assert_eq!(config.remote_address, 4);
        assert!(!config.is_master);
        assert_eq!(config.poll_interval, Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_open_and_close() {
        let (mut channel, _peer) = pair();
        let mut events = channel.subscribe().unwrap();
        assert!(channel.subscribe().is_none());
        assert_eq!(channel.state(), TransportState::Closed);

        channel.open();
        assert!(channel.is_online());
        assert_eq!(channel.poll().await.unwrap(), Some(ChannelEvent::Online));

        channel.close();
        assert_eq!(channel.poll().await.unwrap(), Some(ChannelEvent::Offline));
        assert_eq!(events.recv().await, Some(ChannelEvent::Online));
        assert_eq!(events.recv().await, Some(ChannelEvent::Offline));
    }

    #[tokio::test]
    async fn test_send_apdu_segments() {
        let (mut channel, mut peer) = pair();
        channel.open();

        let apdu: Vec<u8> = (0..300).map(|i| i as u8).collect();
        channel.send_apdu(&apdu).await.unwrap();

        let first = peer.next().await.unwrap().unwrap();
        let second = peer.next().await.unwrap().unwrap();
        assert_eq!(first.function(), LinkFunction::PriUnconfirmedUserData);
        assert!(first.header.is_from_master());
        assert_eq!(first.header.dest(), DEFAULT_OUTSTATION_ADDRESS);
        assert_eq!(first.payload.len(), 250);
        assert_eq!(first.payload[0], 0x40);
        assert_eq!(second.payload.len(), 52);
        assert_eq!(second.payload[0], 0x81);
        assert_eq!(&second.payload[1..], &apdu[249..]);

        assert_eq!(channel.poll().await.unwrap(), Some(ChannelEvent::Online));
        assert_eq!(channel.poll().await.unwrap(), Some(ChannelEvent::SendSuccess));
        assert_eq!(channel.state(), TransportState::Ready);
    }

    #[tokio::test]
    async fn test_cancelled_send_recovers() {
        let (a, b) = duplex(8);
        let config = ChannelConfig::new("unused").poll_interval(Duration::from_millis(20));
        let mut channel = Dnp3Channel::new(a, config);
        let mut peer = Framed::new(b, LinkFrameCodec::new());
        channel.open();

        let first = timeout(Duration::from_millis(20), channel.send_apdu(&[0xAA; 100])).await;
        assert!(first.is_err());
        assert_eq!(channel.state(), TransportState::Sending);

        let reader = tokio::spawn(async move {
            let mut frames = Vec::new();
            while frames.len() < 2 {
                frames.push(peer.next().await.unwrap().unwrap());
            }
            frames
        });
        channel.send_apdu(&[0xC0, 0x01]).await.unwrap();
        let frames = reader.await.unwrap();
        assert_eq!(frames[1].payload[0] & 0xC0, 0xC0);
        assert_eq!(&frames[1].payload[1..], &[0xC0, 0x01]);

        assert_eq!(channel.state(), TransportState::Ready);
        assert_eq!(channel.poll().await.unwrap(), Some(ChannelEvent::Online));
        assert_eq!(channel.poll().await.unwrap(), Some(ChannelEvent::SendFailure));
        assert_eq!(channel.poll().await.unwrap(), Some(ChannelEvent::SendSuccess));
    }

    #[tokio::test]
    async fn test_send_apdu_when_closed() {
        let (mut channel, _peer) = pair();
        assert!(matches!(channel.send_apdu(&[1, 2, 3]).await, Err(Dnp3Error::NotConnected)));
    }

    #[tokio::test]
    async fn test_send_apdu_rejects_empty() {
        let (mut channel, _peer) = pair();
        channel.open();
        let err = channel.send_apdu(&[]).await.unwrap_err();
        assert!(err.is_contract_violation());
    }

    #[tokio::test]
    async fn test_receive_apdu() {
        let (mut channel, mut peer) = pair();
        channel.open();
        assert_eq!(channel.poll().await.unwrap(), Some(ChannelEvent::Online));

        peer.send(outstation_frame(LinkFunction::PriUnconfirmedUserData, &[0xC0, 0xC1, 0x81, 0x00, 0x00]))
            .await
            .unwrap();

        let event = channel.poll().await.unwrap();
        assert_eq!(event, Some(ChannelEvent::Apdu(Bytes::from_static(&[0xC1, 0x81, 0x00, 0x00]))));
    }

    #[tokio::test]
    async fn test_confirmed_user_data_is_acknowledged() {
        let (mut channel, mut peer) = pair();
        channel.open();
        channel.poll().await.unwrap();

        peer.send(outstation_frame(LinkFunction::PriConfirmedUserData, &[0xC0, 0x01]))
            .await
            .unwrap();
        let event = channel.poll().await.unwrap();
        assert_eq!(event, Some(ChannelEvent::Apdu(Bytes::from_static(&[0x01]))));

        let ack = peer.next().await.unwrap().unwrap();
        assert_eq!(ack.function(), LinkFunction::SecAck);
        assert_eq!(ack.header.dest(), DEFAULT_OUTSTATION_ADDRESS);
    }

    #[tokio::test]
    async fn test_link_status_reply() {
        let (mut channel, mut peer) = pair();

        peer.send(outstation_frame(LinkFunction::PriRequestLinkStatus, &[]))
            .await
            .unwrap();
        assert_eq!(channel.poll().await.unwrap(), None);

        let reply = peer.next().await.unwrap().unwrap();
        assert_eq!(reply.function(), LinkFunction::SecLinkStatus);
        assert_eq!(reply.header.src(), DEFAULT_MASTER_ADDRESS);
    }

    fn encoded(frame: LinkFrame) -> Vec<u8> {
        let mut buf = bytes::BytesMut::new();
        tokio_util::codec::Encoder::encode(&mut LinkFrameCodec::new(), frame, &mut buf).unwrap();
        buf.to_vec()
    }

    #[tokio::test]
    async fn test_link_status_reply_exact_bytes() {
        let request = encoded(outstation_frame(LinkFunction::PriRequestLinkStatus, &[]));
        let reply = encoded(LinkFrame::control(
            LinkFunction::SecLinkStatus,
            true,
            DEFAULT_OUTSTATION_ADDRESS,
            DEFAULT_MASTER_ADDRESS,
        ));
        let stream = tokio_test::io::Builder::new().read(&request).write(&reply).build();

        let mut channel = Dnp3Channel::new(stream, ChannelConfig::new("unused"));
        assert_eq!(channel.poll().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_reset_link_states_acknowledged() {
        let (mut channel, mut peer) = pair();

        peer.send(outstation_frame(LinkFunction::PriResetLinkStates, &[]))
            .await
            .unwrap();
        channel.poll().await.unwrap();

        let reply = peer.next().await.unwrap().unwrap();
        assert_eq!(reply.function(), LinkFunction::SecAck);
    }

    #[tokio::test]
    async fn test_frame_for_other_address_ignored() {
        let (mut channel, mut peer) = pair();
        channel.open();
        channel.poll().await.unwrap();

        let frame = LinkFrame::user_data(false, 77, DEFAULT_OUTSTATION_ADDRESS, Bytes::from_static(&[0xC0, 0x01])).unwrap();
        peer.send(frame).await.unwrap();
        assert_eq!(channel.poll().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_poll_timeout() {
        let (mut channel, _peer) = pair();
        assert_eq!(channel.poll().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_peer_close() {
        let (mut channel, peer) = pair();
        channel.open();
        channel.poll().await.unwrap();
        drop(peer);

        let err = channel.poll().await.unwrap_err();
        assert!(err.is_connection_error());
        assert!(!channel.is_online());
        assert_eq!(channel.poll().await.unwrap(), Some(ChannelEvent::Offline));
    }

    #[tokio::test]
    async fn test_peer_close_with_start_byte_buffered() {
        use tokio::io::AsyncWriteExt;

        let (mut channel, mut peer) = pair();
        channel.open();
        channel.poll().await.unwrap();

        peer.get_mut().write_all(&[0x05]).await.unwrap();
        drop(peer);

        let err = channel.poll().await.unwrap_err();
        assert!(err.is_connection_error());
        assert!(!channel.is_online());
        assert_eq!(channel.poll().await.unwrap(), Some(ChannelEvent::Offline));
    }
}
