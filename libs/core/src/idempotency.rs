//! Recently-seen message ids, used to drop transport re-deliveries.
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use tokio::time::Instant;

/// In-memory seen-set with TTL, owned by a single session.
///
/// ```
/// use gsm_core::SeenSet;
/// use std::time::Duration;
///
/// let mut set = SeenSet::new(Duration::from_secs(600));
/// assert!(!set.seen_or_insert("msg-1"));
/// assert!(set.seen_or_insert("msg-1"));
/// ```
#[derive(Debug)]
pub struct SeenSet {
    ttl: Duration,
    seen: HashMap<String, Instant>,
    order: VecDeque<(String, Instant)>,
}

impl SeenSet {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            seen: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    /// Returns `true` when the id was seen within the TTL, otherwise records it.
    pub fn seen_or_insert(&mut self, id: &str) -> bool {
        let now = Instant::now();
        self.evict(now);
        if self.seen.contains_key(id) {
            return true;
        }
        self.seen.insert(id.to_string(), now);
        self.order.push_back((id.to_string(), now));
        false
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    fn evict(&mut self, now: Instant) {
        while let Some((id, at)) = self.order.front() {
            if now.duration_since(*at) <= self.ttl {
                break;
            }
            if self.seen.get(id) == Some(at) {
                self.seen.remove(id);
            }
            self.order.pop_front();
        }
    }
}
