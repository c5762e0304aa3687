//! Message captures.
//!
//! A capture owns a `prefix:` namespace. Messages named `prefix:rest` are
//! handed to it with `rest` as the message name. Replies go into the outbox
//! and are sent by the caller once the capture returns.

use crate::codec::Variant;
use crate::error::Result;
use crate::message::Message;

/// Handler for one message namespace.
pub trait MessageCapture: Send {
    /// Handle `message` (prefix already stripped).
    ///
    /// Returns `Ok(false)` when the message is not recognized.
    fn capture(&mut self, message: &str, args: &[Variant], outbox: &mut Vec<Message>)
        -> Result<bool>;
}

impl<F> MessageCapture for F
where
    F: FnMut(&str, &[Variant], &mut Vec<Message>) -> Result<bool> + Send,
{
    fn capture(
        &mut self,
        message: &str,
        args: &[Variant],
        outbox: &mut Vec<Message>,
    ) -> Result<bool> {
        self(message, args, outbox)
    }
}
