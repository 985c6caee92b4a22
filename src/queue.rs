//! Work queue between the broker I/O task and the worker pool
//!
//! A multi-producer/multi-consumer FIFO of owned payload buffers. The
//! I/O side enqueues without blocking; workers dequeue with a short
//! timeout so they can observe shutdown. The empty buffer is reserved
//! as the poison pill that tells a single worker to exit — the engine
//! never enqueues empty payloads.

use crossbeam_channel::{unbounded, Receiver, Sender};
use std::time::Duration;

/// Cloneable handle to the shared payload FIFO
#[derive(Clone)]
pub struct WorkQueue {
    tx: Sender<Vec<u8>>,
    rx: Receiver<Vec<u8>>,
}

impl WorkQueue {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self { tx, rx }
    }

    /// Enqueue a payload without blocking
    pub fn enqueue(&self, payload: Vec<u8>) {
        // send only fails when every handle is gone, which cannot
        // happen while this one is alive
        let _ = self.tx.send(payload);
    }

    /// Block up to `timeout` for the next payload
    pub fn dequeue_timed(&self, timeout: Duration) -> Option<Vec<u8>> {
        self.rx.recv_timeout(timeout).ok()
    }

    /// Approximate queue depth, for stats only
    pub fn depth(&self) -> usize {
        self.rx.len()
    }
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order() {
        let queue = WorkQueue::new();
        queue.enqueue(vec![1]);
        queue.enqueue(vec![2]);
        queue.enqueue(vec![3]);

        assert_eq!(queue.depth(), 3);
        assert_eq!(queue.dequeue_timed(Duration::from_millis(10)), Some(vec![1]));
        assert_eq!(queue.dequeue_timed(Duration::from_millis(10)), Some(vec![2]));
        assert_eq!(queue.dequeue_timed(Duration::from_millis(10)), Some(vec![3]));
        assert_eq!(queue.depth(), 0);
    }

    #[test]
    fn test_dequeue_times_out_when_empty() {
        let queue = WorkQueue::new();
        assert_eq!(queue.dequeue_timed(Duration::from_millis(10)), None);
    }

    #[test]
    fn test_multi_producer_multi_consumer() {
        let queue = WorkQueue::new();
        let producers: Vec<_> = (0..4u8)
            .map(|p| {
                let queue = queue.clone();
                std::thread::spawn(move || {
                    for i in 0..25u8 {
                        queue.enqueue(vec![p, i]);
                    }
                })
            })
            .collect();
        for handle in producers {
            handle.join().unwrap();
        }

        let consumers: Vec<_> = (0..2)
            .map(|_| {
                let queue = queue.clone();
                std::thread::spawn(move || {
                    let mut count = 0;
                    while queue.dequeue_timed(Duration::from_millis(20)).is_some() {
                        count += 1;
                    }
                    count
                })
            })
            .collect();

        let total: usize = consumers.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(total, 100);
    }
}
