// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Bounded blocking ring buffer used for command-reply correlation.
//!
//! The producer is a reader thread that must never block on the kernel's
//! behalf: when the ring is full, the oldest quarter is dropped instead.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

pub(crate) struct EventRing<T> {
    capacity: usize,
    inner: Mutex<VecDeque<T>>,
    readable: Condvar,
}

impl<T> EventRing<T> {
    pub(crate) fn new(capacity: usize) -> EventRing<T> {
        EventRing {
            capacity,
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            readable: Condvar::new(),
        }
    }

    /// Appends an element, dropping the oldest quarter first when full.
    /// Returns how many elements were dropped.
    pub(crate) fn put(&self, value: T) -> usize {
        let mut queue = self.inner.lock().unwrap();
        let mut dropped = 0;
        if queue.len() >= self.capacity {
            dropped = (self.capacity / 4).max(1);
            queue.drain(..dropped);
        }
        queue.push_back(value);
        self.readable.notify_one();
        dropped
    }

    /// Removes and returns the oldest element, waiting up to `timeout`.
    pub(crate) fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        let mut queue = self.inner.lock().unwrap();
        let deadline = std::time::Instant::now() + timeout;
        while queue.is_empty() {
            let now = std::time::Instant::now();
            if now >= deadline {
                return None;
            }
            let (guard, result) = self
                .readable
                .wait_timeout(queue, deadline - now)
                .unwrap();
            queue = guard;
            if result.timed_out() && queue.is_empty() {
                return None;
            }
        }
        queue.pop_front()
    }

    pub(crate) fn clear(&self) -> usize {
        let mut queue = self.inner.lock().unwrap();
        let flushed = queue.len();
        queue.clear();
        flushed
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn overflow_drops_oldest_quarter() {
        let ring = EventRing::new(4);
        for i in 0..5 {
            let dropped = ring.put(i);
            assert_eq!(if i == 4 { 1 } else { 0 }, dropped);
        }
        // 0 was dropped, 1..=4 remain.
        assert_eq!(4, ring.len());
        assert_eq!(Some(1), ring.pop_timeout(Duration::from_millis(10)));
        assert_eq!(Some(2), ring.pop_timeout(Duration::from_millis(10)));
        assert_eq!(Some(3), ring.pop_timeout(Duration::from_millis(10)));
        assert_eq!(Some(4), ring.pop_timeout(Duration::from_millis(10)));
    }

    #[test]
    fn pop_times_out_when_empty() {
        let ring: EventRing<u8> = EventRing::new(4);
        assert_eq!(None, ring.pop_timeout(Duration::from_millis(20)));
    }

    #[test]
    fn pop_wakes_on_put_from_other_thread() {
        let ring = Arc::new(EventRing::new(4));
        let producer = Arc::clone(&ring);
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            producer.put(7_u8);
        });
        assert_eq!(Some(7), ring.pop_timeout(Duration::from_millis(1_000)));
        handle.join().unwrap();
    }
}
