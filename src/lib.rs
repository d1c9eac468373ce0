//! # voltage_dnp3
//!
//! DNP3 (IEEE 1815) protocol stack for Rust.
//!
//! This crate implements the lower half of a DNP3 stack: FT3 link framing,
//! the transport segmentation layer, application object headers and the
//! conversions between point values and object encodings. A point database
//! with deadband change detection sits on top.
//!
//! ## Features
//!
//! - **Link layer**: FT3 header packing, CRC-16/DNP, full frame codec for `tokio-util`
//! - **Transport layer**: segmentation, reassembly and a three-state send machine
//! - **Application objects**: qualifier-aware object iteration without copying
//! - **Conversions**: clamping writers with over-range flagging for every point type
//! - **Database**: classes, deadbands and events for binary, analog and counter points
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use voltage_dnp3::{ChannelConfig, ChannelEvent, Database, Dnp3Channel, parse_response};
//! use voltage_dnp3::{ApduBuilder, ApduHeader, AppControl, FunctionCode, PointClass};
//!
//! #[tokio::main]
//! async fn main() -> voltage_dnp3::Result<()> {
//!     let config = ChannelConfig::new("192.168.1.100:20000");
//!     let mut channel = Dnp3Channel::connect_tcp(config).await?;
//!
//!     // Class 0 read
//!     let mut request = ApduBuilder::new(ApduHeader::request(AppControl::request(0), FunctionCode::Read));
//!     request.add_class_read(PointClass::Class0)?;
//!     channel.send_apdu(&request.build()).await?;
//!
//!     let mut database = Database::new();
//!     loop {
//!         if let Some(ChannelEvent::Apdu(apdu)) = channel.poll().await? {
//!             let (_, points) = parse_response(&apdu)?;
//!             database.load(&points)?;
//!         }
//!     }
//! }
//! ```
//!
//! ## Layering
//!
//! ```text
//! application objects  <-  iterator / conversion / parser / database
//!        |
//! transport (TPDU)     <-  1-byte header: FIN | FIR | 6-bit sequence
//!        |
//! link (FT3 frame)     <-  0x05 0x64 LEN CTRL DEST SRC CRC, 16-byte CRC blocks
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod channel;
pub mod codec;
pub mod conversion;
pub mod database;
pub mod error;
pub mod hex;
pub mod iterator;
pub mod layer;
pub mod parser;
pub mod transport;
pub mod types;

// Re-export main types
pub use channel::{ChannelConfig, ChannelEvent, Dnp3Channel};
pub use codec::{LinkFrame, LinkFrameCodec};
pub use conversion::{write_range, ObjectCodec, WireConvert};
pub use database::{Database, DatabasePoint, DeviceTemplate, EventSink, PointRecord, PointTemplate};
pub use error::{Dnp3Error, Result};
pub use iterator::{HeaderReader, ObjectInfo, ObjectReadIterator};
pub use layer::{LowerLayer, UpperLayer};
pub use parser::{parse_measurements, parse_response};
pub use transport::{TransportConfig, TransportLayer, TransportState};
pub use types::*;
