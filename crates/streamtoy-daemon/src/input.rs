//! Button input queue with long-press classification.
//!
//! Viewers feed raw `(row, col, pressed)` transitions from their own threads;
//! scene code drains the queue with [`InputManager::poll_event`] or
//! [`InputManager::poll_event_async`].

use std::collections::{HashMap, VecDeque};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::{debug, info};

/// A button transition ready for scene code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputEvent {
    pub row: u8,
    pub col: u8,
    pub pressed: bool,
    pub timestamp: Instant,
    /// Only ever set on a release whose press was held past the threshold.
    pub long_press: bool,
}

/// Thread-safe input event queue.
pub struct InputManager {
    queue: Mutex<VecDeque<InputEvent>>,
    available: Condvar,
    notify: Notify,
    presses: Mutex<HashMap<(u8, u8), Instant>>,
    threshold: Mutex<Duration>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Default for InputManager {
    fn default() -> Self {
        Self::new(Duration::from_secs(3))
    }
}

impl InputManager {
    pub fn new(long_press_threshold: Duration) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
            notify: Notify::new(),
            presses: Mutex::new(HashMap::new()),
            threshold: Mutex::new(long_press_threshold),
        }
    }

    /// Records a transition reported by a viewer.
    pub fn on_key_event(&self, row: u8, col: u8, pressed: bool) {
        self.on_key_event_at(row, col, pressed, Instant::now());
    }

    /// Records a transition observed at `at`.
    pub fn on_key_event_at(&self, row: u8, col: u8, pressed: bool, at: Instant) {
        let held = {
            let mut presses = lock(&self.presses);
            if pressed {
                presses.insert((row, col), at);
                debug!("Key press: ({}, {})", row, col);
                None
            } else {
                presses
                    .remove(&(row, col))
                    .map(|start| at.saturating_duration_since(start))
            }
        };

        let long_press = match held {
            Some(held) => {
                debug!("Key release: ({}, {}) held {:?}", row, col, held);
                held >= self.long_press_threshold()
            }
            None => false,
        };
        if long_press {
            info!("Long press: ({}, {})", row, col);
        }

        self.push(InputEvent {
            row,
            col,
            pressed,
            timestamp: at,
            long_press,
        });
    }

    fn push(&self, event: InputEvent) {
        lock(&self.queue).push_back(event);
        self.available.notify_one();
        self.notify.notify_waiters();
    }

    fn pop(&self) -> Option<InputEvent> {
        lock(&self.queue).pop_front()
    }

    /// Takes the next event, waiting up to `timeout`.
    pub fn poll_event(&self, timeout: Duration) -> Option<InputEvent> {
        let queue = lock(&self.queue);
        let (mut queue, _) = self
            .available
            .wait_timeout_while(queue, timeout, |q| q.is_empty())
            .unwrap_or_else(PoisonError::into_inner);
        queue.pop_front()
    }

    /// Takes the next event, waiting up to `timeout` without blocking the
    /// executor.
    pub async fn poll_event_async(&self, timeout: Duration) -> Option<InputEvent> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(event) = self.pop() {
                return Some(event);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.pop();
            }
        }
    }

    /// Drops every pending event.
    pub fn clear_queue(&self) {
        lock(&self.queue).clear();
        debug!("Event queue cleared");
    }

    /// Number of pending events.
    pub fn queue_size(&self) -> usize {
        lock(&self.queue).len()
    }

    pub fn set_long_press_threshold(&self, threshold: Duration) {
        *lock(&self.threshold) = threshold;
        info!("Long press threshold set to {:?}", threshold);
    }

    pub fn long_press_threshold(&self) -> Duration {
        *lock(&self.threshold)
    }

    /// Buttons currently held, with their press times.
    pub fn active_presses(&self) -> HashMap<(u8, u8), Instant> {
        lock(&self.presses).clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn release_after(threshold_ms: u64, held_ms: u64) -> InputEvent {
        let input = InputManager::new(Duration::from_millis(threshold_ms));
        let t0 = Instant::now();
        input.on_key_event_at(1, 2, true, t0);
        input.on_key_event_at(1, 2, false, t0 + Duration::from_millis(held_ms));

        let press = input.poll_event(Duration::ZERO).unwrap();
        assert!(press.pressed);
        assert!(!press.long_press);
        input.poll_event(Duration::ZERO).unwrap()
    }

    #[test]
    fn test_long_press_classification() {
        let release = release_after(500, 100);
        assert!(!release.pressed);
        assert!(!release.long_press);

        assert!(release_after(500, 600).long_press);
        assert!(release_after(500, 500).long_press);
    }

    #[test]
    fn test_release_without_press() {
        let input = InputManager::default();
        input.on_key_event(0, 0, false);
        let event = input.poll_event(Duration::ZERO).unwrap();
        assert!(!event.long_press);
    }

    #[test]
    fn test_active_presses() {
        let input = InputManager::default();
        input.on_key_event(0, 1, true);
        input.on_key_event(2, 4, true);
        assert_eq!(input.active_presses().len(), 2);
        input.on_key_event(0, 1, false);
        let active = input.active_presses();
        assert_eq!(active.len(), 1);
        assert!(active.contains_key(&(2, 4)));
    }

    #[test]
    fn test_poll_timeout_and_queue_ops() {
        let input = InputManager::default();
        let start = Instant::now();
        assert!(input.poll_event(Duration::from_millis(20)).is_none());
        assert!(start.elapsed() >= Duration::from_millis(20));

        input.on_key_event(0, 0, true);
        input.on_key_event(0, 0, false);
        assert_eq!(input.queue_size(), 2);
        input.clear_queue();
        assert_eq!(input.queue_size(), 0);
    }

    #[test]
    fn test_poll_wakes_on_event_from_other_thread() {
        let input = Arc::new(InputManager::default());
        let feeder = input.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            feeder.on_key_event(1, 1, true);
        });

        let event = input.poll_event(Duration::from_secs(5)).unwrap();
        assert_eq!((event.row, event.col, event.pressed), (1, 1, true));
        handle.join().unwrap();
    }

    #[tokio::test]
    async fn test_async_poll() {
        let input = Arc::new(InputManager::default());
        assert!(input
            .poll_event_async(Duration::from_millis(10))
            .await
            .is_none());

        let feeder = input.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            feeder.on_key_event(2, 3, true);
        });

        let event = input.poll_event_async(Duration::from_secs(5)).await.unwrap();
        assert_eq!((event.row, event.col), (2, 3));
    }

    #[test]
    fn test_events_in_order() {
        let input = InputManager::default();
        input.on_key_event(0, 0, true);
        input.on_key_event(0, 1, true);
        input.on_key_event(0, 0, false);
        let order: Vec<_> = std::iter::from_fn(|| input.poll_event(Duration::ZERO))
            .map(|e| (e.col, e.pressed))
            .collect();
        assert_eq!(order, vec![(0, true), (1, true), (0, false)]);
    }
}
