use std::collections::VecDeque;

use parking_lot::{Condvar, Mutex};
use thiserror::Error;

use crate::models::frame::{Frame, FrameTag};

/// Default byte budget for queued payloads.
const DEFAULT_CAPACITY: usize = 8 * 1024 * 1024;

/// Why a buffer operation could not complete.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum BufferError {
    /// The buffer was cancelled; every blocked producer and consumer has
    /// been released.
    #[error("packet buffer cancelled")]
    Cancelled,

    /// The buffer was closed and (for consumers) fully drained.
    #[error("packet buffer closed")]
    Closed,
}

struct Shared {
    queue: VecDeque<Frame>,
    /// Queued payload bytes plus bytes reserved by open slots.
    queued_bytes: usize,
    closed: bool,
    cancelled: bool,
}

/// Shared packet buffer connecting pipeline stages.
///
/// A bounded, blocking frame queue with reserve-fill-commit slots so the
/// read pump can stream payload bytes straight from the file into the
/// destination allocation. `push`/`pop` block on backpressure; `close`
/// lets consumers drain what remains; `cancel` releases every waiter at
/// once (blocked consumers see `Cancelled` even if frames are still
/// queued; `try_pop` can still drain them).
///
/// Wrap in `Arc` to share between the producing and consuming sides.
pub struct PacketBuffer {
    shared: Mutex<Shared>,
    capacity: usize,
    readable: Condvar,
    writable: Condvar,
}

impl PacketBuffer {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Buffer bounded to roughly `capacity` queued payload bytes. A frame
    /// larger than the whole budget is still admitted once the buffer is
    /// empty, so no frame can deadlock on its own size.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            shared: Mutex::new(Shared {
                queue: VecDeque::new(),
                queued_bytes: 0,
                closed: false,
                cancelled: false,
            }),
            capacity,
            readable: Condvar::new(),
            writable: Condvar::new(),
        }
    }

    /// Queue a frame, blocking while the buffer is over budget.
    pub fn push(&self, frame: Frame) -> Result<(), BufferError> {
        let mut shared = self.shared.lock();
        self.wait_for_room(&mut shared, frame.len())?;

        shared.queued_bytes += frame.len();
        shared.queue.push_back(frame);
        self.readable.notify_one();
        Ok(())
    }

    /// Reserve a same-size slot for a frame whose payload will be filled
    /// in place (e.g. streamed from a file) before `commit`. Blocks while
    /// the buffer is over budget. Dropping the slot without committing
    /// releases the reservation.
    pub fn open_slot(&self, tag: FrameTag, payload_len: usize) -> Result<Slot<'_>, BufferError> {
        let mut shared = self.shared.lock();
        self.wait_for_room(&mut shared, payload_len)?;

        shared.queued_bytes += payload_len;
        Ok(Slot {
            buffer: self,
            frame: Some(Frame::new(tag, vec![0; payload_len])),
            reserved: payload_len,
        })
    }

    /// Dequeue the next frame, blocking while the buffer is empty.
    /// Returns `Closed` once the buffer is closed and drained, and
    /// `Cancelled` as soon as the buffer is cancelled.
    pub fn pop(&self) -> Result<Frame, BufferError> {
        let mut shared = self.shared.lock();
        loop {
            if shared.cancelled {
                return Err(BufferError::Cancelled);
            }
            if let Some(frame) = shared.queue.pop_front() {
                shared.queued_bytes -= frame.len();
                self.writable.notify_all();
                return Ok(frame);
            }
            if shared.closed {
                return Err(BufferError::Closed);
            }
            self.readable.wait(&mut shared);
        }
    }

    /// Dequeue without blocking. Unlike `pop`, this keeps working after a
    /// cancel so leftover frames can be inspected or drained.
    pub fn try_pop(&self) -> Option<Frame> {
        let mut shared = self.shared.lock();
        let frame = shared.queue.pop_front()?;
        shared.queued_bytes -= frame.len();
        self.writable.notify_all();
        Some(frame)
    }

    /// Stop accepting frames; consumers drain what is queued and then see
    /// `Closed`.
    pub fn close(&self) {
        let mut shared = self.shared.lock();
        shared.closed = true;
        self.readable.notify_all();
        self.writable.notify_all();
    }

    /// Tear the buffer down, releasing every blocked producer and
    /// consumer. Queued frames stay in place for `try_pop`.
    pub fn cancel(&self) {
        let mut shared = self.shared.lock();
        shared.cancelled = true;
        self.readable.notify_all();
        self.writable.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.lock().cancelled
    }

    /// Number of frames currently queued.
    pub fn len(&self) -> usize {
        self.shared.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.lock().queue.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn wait_for_room(
        &self,
        shared: &mut parking_lot::MutexGuard<'_, Shared>,
        len: usize,
    ) -> Result<(), BufferError> {
        loop {
            if shared.cancelled {
                return Err(BufferError::Cancelled);
            }
            if shared.closed {
                return Err(BufferError::Closed);
            }
            if shared.queued_bytes + len <= self.capacity || shared.queued_bytes == 0 {
                return Ok(());
            }
            self.writable.wait(shared);
        }
    }
}

impl Default for PacketBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// A reserved, uncommitted frame inside a `PacketBuffer`.
pub struct Slot<'a> {
    buffer: &'a PacketBuffer,
    frame: Option<Frame>,
    reserved: usize,
}

impl Slot<'_> {
    /// The payload region to fill in place.
    pub fn payload_mut(&mut self) -> &mut [u8] {
        match &mut self.frame {
            Some(frame) => &mut frame.payload,
            None => &mut [],
        }
    }

    /// Publish the filled frame to consumers.
    pub fn commit(mut self) -> Result<(), BufferError> {
        let Some(frame) = self.frame.take() else {
            return Ok(());
        };

        let mut shared = self.buffer.shared.lock();
        if shared.cancelled {
            shared.queued_bytes -= self.reserved;
            self.buffer.writable.notify_all();
            return Err(BufferError::Cancelled);
        }
        // The reservation already accounts for the payload bytes.
        shared.queue.push_back(frame);
        self.buffer.readable.notify_one();
        Ok(())
    }
}

impl Drop for Slot<'_> {
    fn drop(&mut self) {
        if self.frame.take().is_some() {
            let mut shared = self.buffer.shared.lock();
            shared.queued_bytes -= self.reserved;
            self.buffer.writable.notify_all();
        }
    }
}
