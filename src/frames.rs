//! Bounded hand-off between the capture thread and the processing thread.

use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};

/// Frames buffered between producer and consumer.
pub const FRAME_CAPACITY: usize = 2;

pub fn frame_channel<T>(capacity: usize) -> (FrameSender<T>, FrameReceiver<T>) {
    let (tx, rx) = mpsc::sync_channel(capacity);
    (FrameSender { tx }, FrameReceiver { rx })
}

pub struct FrameSender<T> {
    tx: SyncSender<T>,
}

/// Outcome of a non-blocking put.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Put {
    Queued,
    /// Channel full, the new frame was discarded.
    Dropped,
    /// Consumer is gone.
    Closed,
}

impl<T> FrameSender<T> {
    /// Never blocks. Under backpressure the newest frame is thrown away.
    pub fn put(&self, frame: T) -> Put {
        match self.tx.try_send(frame) {
            Ok(()) => Put::Queued,
            Err(TrySendError::Full(_)) => Put::Dropped,
            Err(TrySendError::Disconnected(_)) => Put::Closed,
        }
    }
}

pub struct FrameReceiver<T> {
    rx: Receiver<T>,
}

impl<T> FrameReceiver<T> {
    /// Block until a frame arrives. `None` once the producer has hung up and
    /// the buffer is empty.
    pub fn get(&self) -> Option<T> {
        self.rx.recv().ok()
    }

    /// Discard whatever is still buffered; returns how many frames were dropped.
    pub fn drain(&self) -> usize {
        self.rx.try_iter().count()
    }
}
