//! DNP3 type definitions.
//!
//! This module contains the wire-level types of the stack:
//!
//! - `packing` - Fixed-width integer and float packers
//! - `LinkHeader` - FT3 link header and control byte
//! - `HeaderInfo` - Object headers, qualifier codes and the object registry
//! - `ApduHeader` - Application control, function codes and IIN
//! - `Binary`, `Analog`, ... - Typed points with `Quality`

mod apdu;
mod link;
mod objects;
pub mod packing;
mod points;

pub use apdu::*;
pub use link::*;
pub use objects::*;
pub use points::*;
