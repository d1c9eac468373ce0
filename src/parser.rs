//! Measurement parser.
//!
//! Walks the object headers of a response body and decodes static and
//! event objects into [`Measurement`] values.

use tracing::debug;

use crate::conversion::ObjectCodec;
use crate::database::DatabasePoint;
use crate::error::{Dnp3Error, Result};
use crate::iterator::{HeaderReader, ObjectReadIterator};
use crate::types::{
    Analog, ApduHeader, Binary, ControlStatus, Counter, Measurement, SetpointStatus,
};

/// Parse a response APDU into its header and measurements.
///
/// # Example
///
/// ```rust,ignore
/// if let ChannelEvent::Apdu(apdu) = channel.poll().await? {
///     let (header, points) = parse_response(&apdu)?;
///     database.load(&points)?;
/// }
/// ```
pub fn parse_response(apdu: &[u8]) -> Result<(ApduHeader, Vec<Measurement>)> {
    let (header, consumed) = ApduHeader::parse(apdu)?;
    if !header.function.is_response() {
        return Err(Dnp3Error::invalid_object(format!(
            "Expected a response, got {:?}",
            header.function
        )));
    }
    let measurements = parse_measurements(&apdu[consumed..])?;
    Ok((header, measurements))
}

/// Parse the object headers of a response body into measurements.
///
/// Objects that do not describe point values (time, class, IIN) are
/// skipped.
pub fn parse_measurements(body: &[u8]) -> Result<Vec<Measurement>> {
    let mut out = Vec::new();

    for iter in HeaderReader::objects(body) {
        let mut iter = iter?;
        let (group, variation) = (iter.header().group, iter.header().variation);

        match (group, variation) {
            (1, 1) => read_packed(&mut iter, Binary::new, &mut out)?,
            (1 | 2, _) => read_fixed::<Binary>(&mut iter, &mut out)?,
            (10, 1) => read_packed(&mut iter, ControlStatus::new, &mut out)?,
            (10, _) => read_fixed::<ControlStatus>(&mut iter, &mut out)?,
            (20 | 22, _) => read_fixed::<Counter>(&mut iter, &mut out)?,
            (30 | 32, _) => read_fixed::<Analog>(&mut iter, &mut out)?,
            (40, _) => read_fixed::<SetpointStatus>(&mut iter, &mut out)?,
            _ => debug!("Skipping {}", iter.header()),
        }
    }

    Ok(out)
}

fn read_fixed<T: ObjectCodec + DatabasePoint>(
    iter: &mut ObjectReadIterator<'_>,
    out: &mut Vec<Measurement>,
) -> Result<()> {
    let (group, variation) = (iter.header().group, iter.header().variation);
    while !iter.is_end() {
        let index = iter.info()?.index();
        let point = T::read_object(group, variation, iter.data()?)?;
        out.push(point.measurement(index));
        iter.advance()?;
    }
    Ok(())
}

fn read_packed<T: DatabasePoint>(
    iter: &mut ObjectReadIterator<'_>,
    make: fn(bool) -> T,
    out: &mut Vec<Measurement>,
) -> Result<()> {
    while !iter.is_end() {
        let index = iter.info()?.index();
        out.push(make(iter.bit()?).measurement(index));
        iter.advance()?;
    }
    Ok(())
}
