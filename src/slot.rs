//! Bounded single-slot channel.
//!
//! Monitor-style produce/consume made explicit: one value cell guarded by a
//! mutex, with full/empty predicate loops on two condition variables.
//! Producers block while the slot is full, consumers while it is empty.

use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// A rendezvous cell holding at most one value.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use threadmill::SingleSlot;
///
/// let slot = Arc::new(SingleSlot::new());
/// let producer = slot.clone();
/// std::thread::spawn(move || producer.put(42));
/// assert_eq!(slot.take(), 42);
/// ```
pub struct SingleSlot<T> {
    cell: Mutex<Option<T>>,
    not_full: Condvar,
    not_empty: Condvar,
}

impl<T> SingleSlot<T> {
    /// Creates an empty slot.
    pub fn new() -> Self {
        SingleSlot {
            cell: Mutex::new(None),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
        }
    }

    /// Blocks until the slot is empty, then stores `value`.
    pub fn put(&self, value: T) {
        let mut cell = self.cell.lock();
        while cell.is_some() {
            self.not_full.wait(&mut cell);
        }
        *cell = Some(value);
        self.not_empty.notify_one();
    }

    /// Bounded `put`. On timeout the value is handed back to the caller.
    pub fn put_timeout(&self, value: T, timeout: Duration) -> Result<(), T> {
        let deadline = Instant::now() + timeout;
        let mut cell = self.cell.lock();
        while cell.is_some() {
            if self.not_full.wait_until(&mut cell, deadline).timed_out() && cell.is_some() {
                return Err(value);
            }
        }
        *cell = Some(value);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Blocks until a value is present, then takes it.
    pub fn take(&self) -> T {
        let mut cell = self.cell.lock();
        loop {
            if let Some(value) = cell.take() {
                self.not_full.notify_one();
                return value;
            }
            self.not_empty.wait(&mut cell);
        }
    }

    /// Bounded `take`.
    pub fn take_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut cell = self.cell.lock();
        loop {
            if let Some(value) = cell.take() {
                self.not_full.notify_one();
                return Some(value);
            }
            if self.not_empty.wait_until(&mut cell, deadline).timed_out() {
                let taken = cell.take();
                if taken.is_some() {
                    self.not_full.notify_one();
                }
                return taken;
            }
        }
    }

    /// Current occupancy: 0 or 1.
    pub fn len(&self) -> usize {
        usize::from(self.cell.lock().is_some())
    }

    /// Whether the slot is empty.
    pub fn is_empty(&self) -> bool {
        self.cell.lock().is_none()
    }
}

impl<T> Default for SingleSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_put_then_take() {
        let slot = SingleSlot::new();
        slot.put(1);
        assert_eq!(slot.len(), 1);
        assert_eq!(slot.take(), 1);
        assert!(slot.is_empty());
    }

    #[test]
    fn test_producer_consumer_ping_pong() {
        let slot = Arc::new(SingleSlot::new());
        let producer = {
            let slot = slot.clone();
            thread::spawn(move || {
                for i in 0..100 {
                    slot.put(i);
                }
            })
        };
        let received: Vec<u32> = (0..100).map(|_| slot.take()).collect();
        producer.join().unwrap();
        assert_eq!(received, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_put_timeout_returns_value_when_full() {
        let slot = SingleSlot::new();
        slot.put("first");
        match slot.put_timeout("second", Duration::from_millis(10)) {
            Err(value) => assert_eq!(value, "second"),
            Ok(()) => panic!("slot should have been full"),
        }
        assert_eq!(slot.take(), "first");
    }

    #[test]
    fn test_take_timeout_on_empty() {
        let slot: SingleSlot<u32> = SingleSlot::new();
        assert_eq!(slot.take_timeout(Duration::from_millis(10)), None);
    }
}
