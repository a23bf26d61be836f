//! Bounded channel - inter-task communication primitive.
//!
//! A fixed-capacity ring protected by a mutex with two condition variables
//! (`not_empty`, `not_full`). FIFO ordering is guaranteed per channel
//! regardless of sender count. Send/recv pairs are the only cross-task
//! happens-before edges besides task join.

use crate::vm::value::Value;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;

struct ChannelInner {
    /// Message ring
    queue: VecDeque<Value>,
    /// Fixed buffer capacity (≥ 1)
    capacity: usize,
    /// Whether the channel is closed
    closed: bool,
}

/// A bounded, blocking, multi-producer multi-consumer channel.
pub struct ChannelObject {
    inner: Mutex<ChannelInner>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl ChannelObject {
    /// Create a channel with the given buffer capacity (must be ≥ 1).
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(ChannelInner {
                queue: VecDeque::with_capacity(capacity),
                capacity,
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().capacity
    }

    pub fn length(&self) -> usize {
        self.inner.lock().queue.len()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Block until there is room, then enqueue. Fails if the channel is
    /// closed before the value is enqueued.
    pub fn send(&self, value: Value) -> Result<(), String> {
        let mut inner = self.inner.lock();
        loop {
            if inner.closed {
                return Err("send on closed channel".to_string());
            }
            if inner.queue.len() < inner.capacity {
                break;
            }
            self.not_full.wait(&mut inner);
        }
        inner.queue.push_back(value);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Block until a value is available. Returns `None` once the channel is
    /// closed and drained.
    pub fn recv(&self) -> Option<Value> {
        let mut inner = self.inner.lock();
        while inner.queue.is_empty() && !inner.closed {
            self.not_empty.wait(&mut inner);
        }
        match inner.queue.pop_front() {
            Some(value) => {
                self.not_full.notify_one();
                Some(value)
            }
            None => None,
        }
    }

    /// Close the channel and wake all waiters. Idempotent.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }
}

impl std::fmt::Debug for ChannelObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("ChannelObject")
            .field("capacity", &inner.capacity)
            .field("length", &inner.queue.len())
            .field("closed", &inner.closed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_send_recv_fifo() {
        let ch = ChannelObject::new(4);
        ch.send(Value::I32(1)).unwrap();
        ch.send(Value::I32(2)).unwrap();
        ch.send(Value::I32(3)).unwrap();
        assert_eq!(ch.recv(), Some(Value::I32(1)));
        assert_eq!(ch.recv(), Some(Value::I32(2)));
        assert_eq!(ch.recv(), Some(Value::I32(3)));
    }

    #[test]
    fn test_recv_after_close_drains_then_null() {
        let ch = ChannelObject::new(2);
        ch.send(Value::I32(7)).unwrap();
        ch.close();
        assert_eq!(ch.recv(), Some(Value::I32(7)));
        assert_eq!(ch.recv(), None);
        assert_eq!(ch.recv(), None);
    }

    #[test]
    fn test_send_on_closed_fails() {
        let ch = ChannelObject::new(1);
        ch.close();
        assert!(ch.send(Value::I32(1)).is_err());
    }

    #[test]
    fn test_close_idempotent() {
        let ch = ChannelObject::new(1);
        ch.close();
        ch.close();
        assert!(ch.is_closed());
    }

    #[test]
    fn test_blocking_send_unblocks_on_recv() {
        let ch = Arc::new(ChannelObject::new(1));
        ch.send(Value::I32(1)).unwrap();
        let sender = {
            let ch = ch.clone();
            std::thread::spawn(move || ch.send(Value::I32(2)))
        };
        // The sender blocks until we make room.
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert_eq!(ch.recv(), Some(Value::I32(1)));
        sender.join().unwrap().unwrap();
        assert_eq!(ch.recv(), Some(Value::I32(2)));
    }

    #[test]
    fn test_cross_thread_fifo() {
        let ch = Arc::new(ChannelObject::new(2));
        let producer = {
            let ch = ch.clone();
            std::thread::spawn(move || {
                for i in 0..100 {
                    ch.send(Value::I32(i)).unwrap();
                }
                ch.close();
            })
        };
        let mut received = Vec::new();
        while let Some(v) = ch.recv() {
            received.push(v);
        }
        producer.join().unwrap();
        let expected: Vec<Value> = (0..100).map(Value::I32).collect();
        assert_eq!(received, expected);
    }
}
