//! In-process debugger peers.
//!
//! [`MemoryPeer::pair`] returns two connected ends. Messages still go
//! through the binary codec, so size guards and decode failures behave as
//! they do over a socket.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;

use super::peer::DebuggerPeer;
use crate::error::{DebugWireError, Result};
use crate::message::Message;
use crate::protocol::{DEFAULT_MAX_FRAME_SIZE, DEFAULT_MAX_VALUE_SIZE};

type Queue = Arc<Mutex<VecDeque<Bytes>>>;

/// One end of an in-process connection.
pub struct MemoryPeer {
    incoming: Queue,
    outgoing: Queue,
    /// Delivered by `poll`, read by `get_message`.
    ready: VecDeque<Bytes>,
    closed: Arc<AtomicBool>,
    max_value_size: usize,
}

impl MemoryPeer {
    /// Two connected ends.
    pub fn pair() -> (MemoryPeer, MemoryPeer) {
        let a_to_b: Queue = Arc::default();
        let b_to_a: Queue = Arc::default();
        let closed = Arc::new(AtomicBool::new(false));

        let a = MemoryPeer {
            incoming: b_to_a.clone(),
            outgoing: a_to_b.clone(),
            ready: VecDeque::new(),
            closed: closed.clone(),
            max_value_size: DEFAULT_MAX_VALUE_SIZE,
        };
        let b = MemoryPeer {
            incoming: a_to_b,
            outgoing: b_to_a,
            ready: VecDeque::new(),
            closed,
            max_value_size: DEFAULT_MAX_VALUE_SIZE,
        };
        (a, b)
    }

    pub fn set_max_value_size(&mut self, max_value_size: usize) {
        self.max_value_size = max_value_size;
    }

    /// Queue raw bytes as if the other end had sent them.
    pub fn inject_raw(&self, payload: &[u8]) -> Result<()> {
        lock(&self.incoming)?.push_back(Bytes::copy_from_slice(payload));
        Ok(())
    }
}

fn lock(queue: &Queue) -> Result<std::sync::MutexGuard<'_, VecDeque<Bytes>>> {
    queue
        .lock()
        .map_err(|_| DebugWireError::Connection("Memory peer queue poisoned".to_string()))
}

impl DebuggerPeer for MemoryPeer {
    fn poll(&mut self) -> Result<()> {
        let mut incoming = lock(&self.incoming)?;
        self.ready.extend(incoming.drain(..));
        if self.ready.is_empty() && self.closed.load(Ordering::Acquire) {
            return Err(DebugWireError::ConnectionClosed);
        }
        Ok(())
    }

    fn has_message(&self) -> bool {
        !self.ready.is_empty()
    }

    fn get_message(&mut self) -> Result<Message> {
        let packet = self.ready.pop_front().ok_or(DebugWireError::Unavailable)?;
        Message::decode(&packet)
    }

    fn put_message(&mut self, message: &Message) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(DebugWireError::ConnectionClosed);
        }
        let encoded = message.encode(self.max_value_size)?;
        lock(&self.outgoing)?.push_back(Bytes::from(encoded));
        Ok(())
    }

    fn is_peer_connected(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }

    fn max_message_size(&self) -> usize {
        DEFAULT_MAX_FRAME_SIZE as usize
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::Release);
        self.ready.clear();
    }

    fn can_block(&self) -> bool {
        false
    }
}
