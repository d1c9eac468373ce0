//! Layer contracts between link, transport and application.
//!
//! Each layer talks to the one above through [`UpperLayer`] and to the one
//! below through [`LowerLayer`]. Sends are requests: the lower layer
//! completes each one later with `on_send_success` or `on_send_failure`.

use crate::error::Result;

/// Callbacks a layer receives from the layer below it.
pub trait UpperLayer {
    /// A complete unit of data arrived.
    fn on_receive(&mut self, data: &[u8]);

    /// The last send completed.
    fn on_send_success(&mut self);

    /// The last send failed.
    fn on_send_failure(&mut self);

    /// The layer below came online.
    fn on_lower_layer_up(&mut self);

    /// The layer below went offline.
    fn on_lower_layer_down(&mut self);
}

/// Requests a layer makes of the layer below it.
pub trait LowerLayer {
    /// Queue `data` for transmission.
    fn send(&mut self, data: &[u8]) -> Result<()>;
}

impl<U: UpperLayer + ?Sized> UpperLayer for &mut U {
    fn on_receive(&mut self, data: &[u8]) {
        (**self).on_receive(data)
    }

    fn on_send_success(&mut self) {
        (**self).on_send_success()
    }

    fn on_send_failure(&mut self) {
        (**self).on_send_failure()
    }

    fn on_lower_layer_up(&mut self) {
        (**self).on_lower_layer_up()
    }

    fn on_lower_layer_down(&mut self) {
        (**self).on_lower_layer_down()
    }
}

impl<L: LowerLayer + ?Sized> LowerLayer for &mut L {
    fn send(&mut self, data: &[u8]) -> Result<()> {
        (**self).send(data)
    }
}
