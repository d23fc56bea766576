//! Resend policy and bounded retry queue
//!
//! While a destination is down, failed and newly submitted messages wait in
//! a bounded FIFO queue and are retried every `ResendRepeatPeriod`. When
//! the queue is full the oldest entry is evicted so that a dead destination
//! can never block its producers.

use std::collections::VecDeque;
use std::time::Duration;

use contracts::{keys, Properties, ValidationError};

/// Default retry period while a destination is in error state
pub const DEFAULT_RESEND_REPEAT_PERIOD: Duration = Duration::from_millis(5000);

/// Default bound of the per-destination resend queue
pub const DEFAULT_RESEND_QUEUE_SIZE: usize = 100;

/// Parsed resend settings of one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResendPolicy {
    /// Retry period while in error state
    pub repeat_period: Duration,
    /// Queue bound; the oldest entry is dropped on overflow
    pub queue_size: usize,
}

impl Default for ResendPolicy {
    fn default() -> Self {
        Self {
            repeat_period: DEFAULT_RESEND_REPEAT_PERIOD,
            queue_size: DEFAULT_RESEND_QUEUE_SIZE,
        }
    }
}

impl ResendPolicy {
    /// Parse the policy from subscription properties.
    ///
    /// 校验规则:
    /// - `Transporter.ResendRepeatPeriod` 为正整数毫秒
    /// - `Transporter.ResendQueueSize` 为正整数
    pub fn from_properties(properties: &Properties) -> Result<Self, ValidationError> {
        let repeat_period = match properties.get_duration_ms(keys::RESEND_REPEAT_PERIOD)? {
            Some(period) if period.is_zero() => {
                return Err(ValidationError::invalid_field(
                    keys::RESEND_REPEAT_PERIOD,
                    "period must be greater than zero",
                ))
            }
            Some(period) => period,
            None => DEFAULT_RESEND_REPEAT_PERIOD,
        };
        let queue_size = match properties.get_usize(keys::RESEND_QUEUE_SIZE)? {
            Some(0) => {
                return Err(ValidationError::invalid_field(
                    keys::RESEND_QUEUE_SIZE,
                    "queue size must be greater than zero",
                ))
            }
            Some(size) => size,
            None => DEFAULT_RESEND_QUEUE_SIZE,
        };
        Ok(Self {
            repeat_period,
            queue_size,
        })
    }
}

/// Bounded FIFO queue with drop-oldest overflow.
#[derive(Debug)]
pub(crate) struct ResendQueue<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> ResendQueue<T> {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::new(),
            capacity,
        }
    }

    /// Append an entry, returning the evicted oldest entry when full
    pub(crate) fn push(&mut self, item: T) -> Option<T> {
        let evicted = if self.items.len() >= self.capacity {
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(item);
        evicted
    }

    /// Put a retried entry back at the head, preserving FIFO order
    pub(crate) fn push_front(&mut self, item: T) {
        self.items.push_front(item);
    }

    pub(crate) fn pop_front(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_defaults() {
        let policy = ResendPolicy::from_properties(&Properties::new()).unwrap();
        assert_eq!(policy, ResendPolicy::default());
    }

    #[test]
    fn test_policy_parsed_from_properties() {
        let properties = Properties::from_pairs([
            (keys::RESEND_REPEAT_PERIOD, "150"),
            (keys::RESEND_QUEUE_SIZE, "3"),
        ]);
        let policy = ResendPolicy::from_properties(&properties).unwrap();
        assert_eq!(policy.repeat_period, Duration::from_millis(150));
        assert_eq!(policy.queue_size, 3);
    }

    #[test]
    fn test_policy_rejects_zero_and_garbage() {
        let zero = Properties::from_pairs([(keys::RESEND_QUEUE_SIZE, "0")]);
        assert!(ResendPolicy::from_properties(&zero).is_err());

        let garbage = Properties::from_pairs([(keys::RESEND_REPEAT_PERIOD, "soon")]);
        assert!(ResendPolicy::from_properties(&garbage).is_err());
    }

    #[test]
    fn test_queue_drops_oldest_on_overflow() {
        let mut queue = ResendQueue::new(2);
        assert_eq!(queue.push(1), None);
        assert_eq!(queue.push(2), None);
        assert_eq!(queue.push(3), Some(1));
        assert_eq!(queue.pop_front(), Some(2));
        assert_eq!(queue.pop_front(), Some(3));
        assert!(queue.is_empty());
    }
}
